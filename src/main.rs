use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{error, info, warn};

use fleetbook::auth::AllowAll;
use fleetbook::clock::SystemClock;
use fleetbook::config::Config;
use fleetbook::tenant::TenantManager;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = Config::from_env();
    fleetbook::observability::init(config.metrics_port);

    // Ensure data directory exists
    std::fs::create_dir_all(&config.data_dir)?;

    info!("fleetbook starting");
    info!("  data_dir: {}", config.data_dir.display());
    info!(
        "  sweep: {}",
        config
            .sweep_interval
            .map_or("disabled".to_string(), |d| format!("every {}s", d.as_secs()))
    );
    info!("  compact threshold: {}", config.compact_threshold);
    info!(
        "  grace: check-in {}min, no-show {}min, default preparation {}min",
        config.policy.check_in_grace_ms / 60_000,
        config.policy.no_show_grace_ms / 60_000,
        config.policy.default_preparation_minutes
    );
    info!(
        "  metrics: {}",
        config
            .metrics_port
            .map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics"))
    );

    let data_dir = config.data_dir.clone();
    let tenants = Arc::new(TenantManager::new(config, Arc::new(AllowAll), Arc::new(SystemClock)));

    // Restore every tenant with a snapshot or journal in the data directory
    let mut names = BTreeSet::new();
    for entry in std::fs::read_dir(&data_dir)? {
        let path = entry?.path();
        if !matches!(path.extension().and_then(|e| e.to_str()), Some("json" | "journal")) {
            continue;
        }
        if let Some(name) = path.file_stem().and_then(|s| s.to_str()) {
            names.insert(name.to_string());
        }
    }
    for name in names {
        match tenants.get_or_create(&name).await {
            Ok(engine) => info!("tenant {name}: {} vehicles loaded", engine.vehicle_count()),
            Err(e) => error!("tenant {name}: restore failed: {e}"),
        }
    }

    shutdown_signal().await;
    info!("shutdown signal received, checkpointing tenants");
    if let Err(e) = tenants.save_all().await {
        error!("snapshot save failed: {e}");
    }

    info!("fleetbook stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                warn!("failed to register SIGTERM handler: {e}");
                ctrl_c.await.ok();
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
}
