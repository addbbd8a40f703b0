use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

use crate::limits::MAX_PREPARATION_MINUTES;
use crate::model::{AgencyConfig, MINUTE_MS, Ms};

/// Booking policy constants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Policy {
    /// How long before `start` a check-in is accepted.
    pub check_in_grace_ms: Ms,
    /// How long after `start` an unclaimed booking becomes a no-show.
    pub no_show_grace_ms: Ms,
    /// Preparation buffer for agencies that did not configure one.
    pub default_preparation_minutes: i64,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            check_in_grace_ms: 60 * MINUTE_MS,
            no_show_grace_ms: 120 * MINUTE_MS,
            default_preparation_minutes: 30,
        }
    }
}

impl Policy {
    pub fn preparation_minutes(&self, agency: Option<&AgencyConfig>) -> i64 {
        agency
            .and_then(|a| a.preparation_minutes)
            .unwrap_or(self.default_preparation_minutes)
    }
}

/// Process configuration, read from `FLEETBOOK_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub data_dir: PathBuf,
    pub metrics_port: Option<u16>,
    /// `None` disables the background sweeper.
    pub sweep_interval: Option<Duration>,
    /// Journal appends that trigger a snapshot checkpoint. 0 disables it.
    pub compact_threshold: u64,
    pub policy: Policy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            metrics_port: None,
            sweep_interval: Some(Duration::from_secs(60)),
            compact_threshold: 1000,
            policy: Policy::default(),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Config::default();
        let default_policy = defaults.policy;

        let data_dir = lookup("FLEETBOOK_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.data_dir);
        let metrics_port = lookup("FLEETBOOK_METRICS_PORT").and_then(|raw| match raw.parse() {
            Ok(port) => Some(port),
            Err(_) => {
                warn!("ignoring FLEETBOOK_METRICS_PORT={raw:?}: not a port number");
                None
            }
        });

        let sweep_secs: u64 = parse_or(&lookup, "FLEETBOOK_SWEEP_INTERVAL_SECS", 60);
        let sweep_interval = (sweep_secs > 0).then(|| Duration::from_secs(sweep_secs));
        let compact_threshold = parse_or(
            &lookup,
            "FLEETBOOK_COMPACT_THRESHOLD",
            defaults.compact_threshold,
        );

        let check_in_grace: u32 = parse_or(
            &lookup,
            "FLEETBOOK_CHECK_IN_GRACE_MINUTES",
            (default_policy.check_in_grace_ms / MINUTE_MS) as u32,
        );
        let no_show_grace: u32 = parse_or(
            &lookup,
            "FLEETBOOK_NO_SHOW_GRACE_MINUTES",
            (default_policy.no_show_grace_ms / MINUTE_MS) as u32,
        );
        let mut preparation: u32 = parse_or(
            &lookup,
            "FLEETBOOK_DEFAULT_PREPARATION_MINUTES",
            default_policy.default_preparation_minutes as u32,
        );
        if i64::from(preparation) > MAX_PREPARATION_MINUTES {
            warn!("FLEETBOOK_DEFAULT_PREPARATION_MINUTES={preparation} above limit, clamping");
            preparation = MAX_PREPARATION_MINUTES as u32;
        }

        Self {
            data_dir,
            metrics_port,
            sweep_interval,
            compact_threshold,
            policy: Policy {
                check_in_grace_ms: Ms::from(check_in_grace) * MINUTE_MS,
                no_show_grace_ms: Ms::from(no_show_grace) * MINUTE_MS,
                default_preparation_minutes: i64::from(preparation),
            },
        }
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T
where
    T: FromStr + Copy + std::fmt::Display,
{
    match lookup(key) {
        None => default,
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!("ignoring {key}={raw:?}: unparseable, using {default}");
            default
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_unset() {
        let cfg = Config::from_lookup(lookup_from(&[]));
        assert_eq!(cfg.data_dir, PathBuf::from("./data"));
        assert_eq!(cfg.metrics_port, None);
        assert_eq!(cfg.sweep_interval, Some(Duration::from_secs(60)));
        assert_eq!(cfg.compact_threshold, 1000);
        assert_eq!(cfg.policy, Policy::default());
    }

    #[test]
    fn reads_every_variable() {
        let cfg = Config::from_lookup(lookup_from(&[
            ("FLEETBOOK_DATA_DIR", "/var/lib/fleetbook"),
            ("FLEETBOOK_METRICS_PORT", "9100"),
            ("FLEETBOOK_SWEEP_INTERVAL_SECS", "15"),
            ("FLEETBOOK_COMPACT_THRESHOLD", "250"),
            ("FLEETBOOK_CHECK_IN_GRACE_MINUTES", "30"),
            ("FLEETBOOK_NO_SHOW_GRACE_MINUTES", "45"),
            ("FLEETBOOK_DEFAULT_PREPARATION_MINUTES", "90"),
        ]));
        assert_eq!(cfg.data_dir, PathBuf::from("/var/lib/fleetbook"));
        assert_eq!(cfg.metrics_port, Some(9100));
        assert_eq!(cfg.sweep_interval, Some(Duration::from_secs(15)));
        assert_eq!(cfg.compact_threshold, 250);
        assert_eq!(cfg.policy.check_in_grace_ms, 30 * MINUTE_MS);
        assert_eq!(cfg.policy.no_show_grace_ms, 45 * MINUTE_MS);
        assert_eq!(cfg.policy.default_preparation_minutes, 90);
    }

    #[test]
    fn zero_interval_disables_sweeper() {
        let cfg = Config::from_lookup(lookup_from(&[("FLEETBOOK_SWEEP_INTERVAL_SECS", "0")]));
        assert_eq!(cfg.sweep_interval, None);
    }

    #[test]
    fn garbage_falls_back_to_defaults() {
        let cfg = Config::from_lookup(lookup_from(&[
            ("FLEETBOOK_METRICS_PORT", "not-a-port"),
            ("FLEETBOOK_NO_SHOW_GRACE_MINUTES", "-5"),
            ("FLEETBOOK_DEFAULT_PREPARATION_MINUTES", "999999"),
        ]));
        assert_eq!(cfg.metrics_port, None);
        assert_eq!(cfg.policy.no_show_grace_ms, Policy::default().no_show_grace_ms);
        assert_eq!(cfg.policy.default_preparation_minutes, MAX_PREPARATION_MINUTES);
    }

    #[test]
    fn agency_preparation_overrides_default() {
        let policy = Policy::default();
        let agency = AgencyConfig {
            agency_id: ulid::Ulid::new(),
            preparation_minutes: Some(15),
            capacity: None,
        };
        assert_eq!(policy.preparation_minutes(Some(&agency)), 15);
        assert_eq!(policy.preparation_minutes(None), 30);
        let unset = AgencyConfig {
            preparation_minutes: None,
            ..agency
        };
        assert_eq!(policy.preparation_minutes(Some(&unset)), 30);
    }
}
