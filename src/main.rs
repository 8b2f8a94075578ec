use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use slotkeeper::config::Config;
use slotkeeper::engine::{Engine, EngineDeps};
use slotkeeper::reaper;
use slotkeeper::schedule::ScheduleConfig;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env();
    slotkeeper::observability::init(config.metrics_port)?;

    std::fs::create_dir_all(&config.data_dir)?;
    let schedule = ScheduleConfig::load(&config.schedule_path)?;
    info!(
        "schedule: {} workers, {} services from {}",
        schedule.workers.len(),
        schedule.services.len(),
        config.schedule_path.display()
    );

    let deps = EngineDeps {
        offer_ttl: config.offer_ttl,
        ..EngineDeps::default()
    };
    let engine = Arc::new(Engine::new(config.wal_path(), schedule, deps)?);

    let tasks = [
        tokio::spawn(reaper::run_reaper(engine.clone(), config.sweep_every)),
        tokio::spawn(reaper::run_scanner(engine.clone(), config.scan_every)),
        tokio::spawn(reaper::run_compactor(engine.clone(), config.compact_threshold)),
    ];

    info!("slotkeeper running");
    info!("  data_dir: {}", config.data_dir.display());
    info!("  offer ttl: {} min", config.offer_ttl.num_minutes());
    info!("  sweep every {:?}, scan every {:?}", config.sweep_every, config.scan_every);
    info!("  metrics: {}", config.metrics_port.map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics")));

    // SIGHUP reloads the schedule; ctrl-c or SIGTERM stops.
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sighup = signal(SignalKind::hangup())?;
        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => break,
                _ = sigterm.recv() => break,
                _ = sighup.recv() => match ScheduleConfig::load(&config.schedule_path) {
                    Ok(schedule) => {
                        engine.set_schedule(schedule);
                        info!("schedule reloaded");
                    }
                    Err(e) => tracing::warn!("schedule reload failed, keeping current: {e}"),
                },
            }
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }

    info!("shutdown signal received");
    for task in tasks {
        task.abort();
    }
    // leave a compact journal behind
    if let Err(e) = engine.compact_wal().await {
        tracing::warn!("final compaction failed: {e}");
    }
    info!("slotkeeper stopped");
    Ok(())
}
