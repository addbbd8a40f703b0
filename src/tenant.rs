use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use futures::future::join_all;
use tracing::info;

use crate::auth::ModuleGate;
use crate::clock::Clock;
use crate::config::Config;
use crate::engine::{Engine, EngineError, SweepReport};
use crate::journal::FileJournal;
use crate::limits::*;
use crate::model::Ms;
use crate::notify::NotifyHub;
use crate::snapshot::Snapshot;
use crate::sweeper;

/// Manages per-tenant engines. Each tenant (rental company) gets its own Engine + sweeper.
pub struct TenantManager {
    engines: DashMap<String, Arc<Engine>>,
    config: Config,
    gate: Arc<dyn ModuleGate>,
    clock: Arc<dyn Clock>,
}

impl TenantManager {
    pub fn new(config: Config, gate: Arc<dyn ModuleGate>, clock: Arc<dyn Clock>) -> Self {
        Self {
            engines: DashMap::new(),
            config,
            gate,
            clock,
        }
    }

    /// Get or lazily create an engine for the given tenant. State is rebuilt
    /// from `<data_dir>/<tenant>.json` plus the records in
    /// `<data_dir>/<tenant>.journal` written since that snapshot.
    ///
    /// Tenants are keyed by their sanitized name, so names that differ only in
    /// stripped characters share one engine, snapshot and journal.
    pub async fn get_or_create(&self, tenant: &str) -> Result<Arc<Engine>, EngineError> {
        if tenant.len() > MAX_TENANT_NAME_LEN {
            return Err(EngineError::LimitExceeded("tenant name too long"));
        }
        let safe_name = sanitize(tenant)?;
        if let Some(engine) = self.engines.get(&safe_name) {
            return Ok(engine.value().clone());
        }
        if self.engines.len() >= MAX_TENANTS {
            return Err(EngineError::LimitExceeded("too many tenants"));
        }

        let io_err = |path: &PathBuf, e: std::io::Error| {
            EngineError::JournalError(format!("{}: {e}", path.display()))
        };
        std::fs::create_dir_all(&self.config.data_dir)
            .map_err(|e| io_err(&self.config.data_dir, e))?;
        let journal_path = self.journal_path(&safe_name);
        let records = FileJournal::replay(&journal_path).map_err(|e| io_err(&journal_path, e))?;
        let journal = FileJournal::open(&journal_path).map_err(|e| io_err(&journal_path, e))?;

        let engine = Arc::new(Engine::new(
            Arc::new(journal),
            Arc::new(NotifyHub::new()),
            self.gate.clone(),
            self.clock.clone(),
            self.config.policy,
        ));
        let path = self.snapshot_path(&safe_name);
        if path.exists() {
            let snapshot = Snapshot::load(&path)
                .map_err(|e| EngineError::JournalError(format!("snapshot {}: {e}", path.display())))?;
            engine.restore(snapshot).await?;
            info!(
                "tenant {safe_name}: restored {} vehicles from {}",
                engine.vehicle_count(),
                path.display()
            );
        }
        if !records.is_empty() {
            let applied = engine.replay(records).await;
            info!("tenant {safe_name}: replayed {applied} journal records");
        }

        // Two callers may race to create the same tenant; the first insert wins.
        let winner = self
            .engines
            .entry(safe_name.clone())
            .or_insert_with(|| engine.clone())
            .clone();
        if Arc::ptr_eq(&winner, &engine) {
            if let Some(every) = self.config.sweep_interval {
                tokio::spawn(sweeper::run_sweeper(engine.clone(), every));
            }
            if self.config.compact_threshold > 0 {
                tokio::spawn(sweeper::run_checkpointer(
                    engine.clone(),
                    path,
                    self.config.compact_threshold,
                ));
            }
            metrics::gauge!(crate::observability::TENANTS_ACTIVE).set(self.engines.len() as f64);
        }
        Ok(winner)
    }

    pub fn tenant_names(&self) -> Vec<String> {
        self.engines.iter().map(|e| e.key().clone()).collect()
    }

    /// Sweep every tenant concurrently.
    pub async fn sweep_all(&self, now: Ms) -> Vec<(String, Vec<SweepReport>)> {
        let engines: Vec<(String, Arc<Engine>)> = self
            .engines
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        join_all(engines.into_iter().map(|(name, engine)| async move {
            let reports = engine.sweep(now).await;
            (name, reports)
        }))
        .await
    }

    /// Checkpoint every tenant: write its snapshot and compact its journal.
    pub async fn save_all(&self) -> Result<(), EngineError> {
        let engines: Vec<(String, Arc<Engine>)> = self
            .engines
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        for (safe_name, engine) in engines {
            let path = self.snapshot_path(&safe_name);
            engine.checkpoint(&path).await?;
            info!("tenant {safe_name}: saved snapshot to {}", path.display());
        }
        Ok(())
    }

    fn snapshot_path(&self, safe_name: &str) -> PathBuf {
        self.config.data_dir.join(format!("{safe_name}.json"))
    }

    fn journal_path(&self, safe_name: &str) -> PathBuf {
        self.config.data_dir.join(format!("{safe_name}.journal"))
    }
}

/// Strip everything that could escape the data directory.
fn sanitize(tenant: &str) -> Result<String, EngineError> {
    let safe_name: String = tenant
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '_' || *c == '-')
        .collect();
    if safe_name.is_empty() {
        return Err(EngineError::InvalidInput("empty tenant name"));
    }
    Ok(safe_name)
}
