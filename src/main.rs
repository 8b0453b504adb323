use charge_connector::api::{self, AppState};
use charge_connector::charges::GatewayAccount;
use charge_connector::config::AppConfig;
use charge_connector::database::{ChargeStore, InMemoryChargeStore};
use charge_connector::health::HealthChecker;
use charge_connector::logging::init_tracing;
use charge_connector::middleware::logging::{request_logging_middleware, UuidRequestId};
use charge_connector::payments::{GatewayName, GatewayRegistry};
use charge_connector::services::{
    AuthorisationErrorCleanupService, CardAuthoriseService, CardCaptureService,
    ChargeCancelService, ChargeRefundService, ChargeService, GatewayOperationExecutor,
    LoggingStatusChangeNotifier, NotificationReconciler, NotificationSourceVerifier,
    StatusChangeNotifier,
};
use charge_connector::workers::{
    AuthorisationErrorCleanupSweep, CaptureSweep, ExpirySweep, Sweep, SweepWorker,
};
use dotenv::dotenv;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tower::ServiceBuilder;
use tower_http::request_id::{PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, starting graceful shutdown");
}

async fn shutdown_signal_with_notify(shutdown_tx: watch::Sender<bool>) {
    shutdown_signal().await;
    let _ = shutdown_tx.send(true);
}

async fn init_store(config: &AppConfig) -> anyhow::Result<Arc<dyn ChargeStore>> {
    #[cfg(feature = "database")]
    {
        if let Some(url) = config.database.url.as_deref() {
            info!("🗄️  Connecting to database...");
            let pool =
                charge_connector::database::init_pool_from_config(url, &config.database).await?;
            info!("✅ Database connection established");
            return Ok(Arc::new(charge_connector::database::PgChargeStore::new(pool)));
        }
    }
    #[cfg(not(feature = "database"))]
    {
        if config.database.url.is_some() {
            warn!("⚠️  DATABASE_URL is set but the database feature is disabled");
        }
    }

    warn!("⚠️  No DATABASE_URL configured, charges are kept in memory only");
    let store = InMemoryChargeStore::new();
    store
        .insert_gateway_account(GatewayAccount::new(1, GatewayName::Sandbox))
        .await;
    Ok(Arc::new(store))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    let config = AppConfig::from_env()?;
    config.validate()?;
    init_tracing(&config.logging);

    info!("🚀 Starting charge connector");

    let store = init_store(&config).await?;

    let registry = Arc::new(GatewayRegistry::from_env()?);
    info!(gateways = ?registry.list_available(), "✅ Payment gateways registered");

    let executor = Arc::new(GatewayOperationExecutor::new(&config.executor));
    info!(
        permits = executor.size(),
        timeout_ms = config.executor.timeout.as_millis() as u64,
        "✅ Gateway executor ready"
    );

    let notifier: Arc<dyn StatusChangeNotifier> = Arc::new(LoggingStatusChangeNotifier::new());

    let charges = Arc::new(ChargeService::new(store.clone()));
    let authorise = Arc::new(CardAuthoriseService::new(
        store.clone(),
        registry.clone(),
        notifier.clone(),
        executor.clone(),
    ));
    let captures = Arc::new(CardCaptureService::new(
        store.clone(),
        registry.clone(),
        notifier.clone(),
        config.lifecycle.clone(),
    ));
    let cancels = Arc::new(ChargeCancelService::new(
        store.clone(),
        registry.clone(),
        notifier.clone(),
    ));
    let refunds = Arc::new(ChargeRefundService::new(
        store.clone(),
        registry.clone(),
        notifier.clone(),
    ));
    let cleanup = Arc::new(AuthorisationErrorCleanupService::new(
        store.clone(),
        registry.clone(),
        notifier.clone(),
    ));
    let reconciler = Arc::new(NotificationReconciler::new(
        store.clone(),
        registry.clone(),
        notifier.clone(),
        NotificationSourceVerifier::system(),
    ));

    // ------------------------------------------------------------------------
    // Sweeps
    // ------------------------------------------------------------------------

    let (worker_shutdown_tx, worker_shutdown_rx) = watch::channel(false);
    let sweeps = &config.sweeps;
    let capture_sweep: Arc<dyn Sweep> = Arc::new(CaptureSweep::new(
        store.clone(),
        captures.clone(),
        sweeps.capture.batch_size,
    ));
    let expiry_sweep: Arc<dyn Sweep> = Arc::new(ExpirySweep::new(
        store.clone(),
        cancels.clone(),
        config.lifecycle.clone(),
        sweeps.expiry.batch_size,
    ));
    let cleanup_sweep: Arc<dyn Sweep> = Arc::new(AuthorisationErrorCleanupSweep::new(
        store.clone(),
        cleanup,
        config.lifecycle.authorisation_error_cleanup_age,
        sweeps.authorisation_cleanup.batch_size,
    ));
    let candidates = [
        (capture_sweep, sweeps.capture.clone()),
        (expiry_sweep, sweeps.expiry.clone()),
        (cleanup_sweep, sweeps.authorisation_cleanup.clone()),
    ];

    let mut worker_handles: Vec<JoinHandle<()>> = Vec::new();
    for (sweep, sweep_config) in candidates {
        let name = sweep.name();
        if !sweep_config.enabled {
            info!(sweep = name, "⏭️  Sweep disabled");
            continue;
        }
        let worker = SweepWorker::new(sweep, sweep_config);
        worker_handles.push(tokio::spawn(worker.run(worker_shutdown_rx.clone())));
        info!(sweep = name, "✅ Sweep worker started");
    }

    // ------------------------------------------------------------------------
    // HTTP
    // ------------------------------------------------------------------------

    info!("🛣️  Setting up application routes...");
    let state = AppState {
        charges,
        authorise,
        captures,
        cancels,
        refunds,
        reconciler,
        health: HealthChecker::new(store, executor, registry),
    };

    let app = api::router(state).layer(
        ServiceBuilder::new()
            .layer(SetRequestIdLayer::x_request_id(UuidRequestId))
            .layer(TraceLayer::new_for_http())
            .layer(axum::middleware::from_fn(request_logging_middleware))
            .layer(PropagateRequestIdLayer::x_request_id()),
    );
    info!("✅ Routes configured");

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
        error!("❌ Failed to bind to address {}: {}", addr, e);
        e
    })?;

    info!(address = %addr, "🚀 Server listening on http://{}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal_with_notify(worker_shutdown_tx.clone()))
    .await?;

    let _ = worker_shutdown_tx.send(true);
    for handle in worker_handles {
        if tokio::time::timeout(Duration::from_secs(5), handle).await.is_err() {
            error!("Timed out waiting for sweep worker shutdown");
        }
    }

    info!("👋 Server shutdown complete");

    Ok(())
}
