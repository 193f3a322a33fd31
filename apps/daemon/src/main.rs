use axum::Router;
use std::sync::Arc;
use tokio::{net::TcpListener, sync::oneshot};
use tokio_util::sync::CancellationToken;

use relay_daemon::{
    config::DaemonConfig,
    error::StartupError,
    logger,
    monitor::{spawn_health_monitor, HealthMonitor, LogAlert},
    routes::build_router,
    state::{DaemonState, SharedState},
    store::ConfigStore,
    supervisor::Supervisor,
};

#[tokio::main]
async fn main() -> Result<(), StartupError> {
    logger::init_logging();

    let config = DaemonConfig::from_env().inspect_err(|err| logger::error("config", err.to_string()))?;

    // --- stream store ---
    let store = ConfigStore::open(&config.streams_file)
        .inspect_err(|err| logger::error("store", err.to_string()))?;
    let supervisor = Arc::new(Supervisor::new(
        store,
        config.supervisor.clone(),
        Arc::new(LogAlert),
    )?);

    // --- resume streams that were running at last shutdown ---
    {
        let supervisor = supervisor.clone();
        match tokio::task::spawn_blocking(move || supervisor.resume()).await {
            Ok(started) => logger::info("daemon", format!("resumed {} stream(s)", started)),
            Err(err) => logger::error("daemon", format!("resume panicked: {}", err)),
        }
    }

    // --- background health checks ---
    let cancel = CancellationToken::new();
    let monitor = spawn_health_monitor(
        HealthMonitor::new(supervisor.clone(), config.health_interval),
        cancel.clone(),
    );

    // --- server ---
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let state: SharedState = Arc::new(DaemonState::new(supervisor.clone(), Some(shutdown_tx)));
    let app: Router = build_router(state);

    let listener = TcpListener::bind(config.bind_addr)
        .await
        .map_err(|source| StartupError::Bind {
            addr: config.bind_addr,
            source,
        })?;
    logger::info("daemon", format!("listening on {}", config.bind_addr));

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            tokio::select! {
                _ = shutdown_rx => {}
                _ = tokio::signal::ctrl_c() => {}
            }
            logger::info("daemon", "shutting down");
        })
        .await;

    // --- teardown: desired state is left as-is for the next boot ---
    cancel.cancel();
    let _ = monitor.await;
    if let Err(err) = tokio::task::spawn_blocking(move || supervisor.shutdown()).await {
        logger::error("daemon", format!("encoder shutdown panicked: {}", err));
    }

    served.map_err(StartupError::Serve)
}
