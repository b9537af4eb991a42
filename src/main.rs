use {
    bakery_payments::{
        AppState,
        adapters::{
            http,
            mock_gateway::MockGateway,
            order_client::{HttpOrderNotifier, LogOnlySink},
            stripe_gateway::StripeGateway,
        },
        config::{AppConfig, GatewayConfig},
        domain::{
            ports::{IdempotencyStore, Ledger, OutboxStore, OutcomeSink},
            provider::PaymentGateway,
        },
        infra::postgres::{PgIdempotencyStore, PgLedger},
        services::{
            orchestrator::PaymentOrchestrator,
            outbox_relay::run_outbox_relay,
            reconciler::{run_idempotency_sweeper, run_reconciler},
        },
    },
    sqlx::postgres::PgPoolOptions,
    std::{sync::Arc, time::Duration},
    tokio::{signal, sync::watch},
    tracing_subscriber::EnvFilter,
};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    dotenvy::dotenv().ok();
    let cfg = AppConfig::from_env().expect("invalid configuration");

    let pool = PgPoolOptions::new()
        .max_connections(20)
        .acquire_timeout(Duration::from_secs(3))
        .connect(&cfg.database_url)
        .await
        .expect("failed to connect to database");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("failed to run migrations");

    let ledger = Arc::new(PgLedger::new(pool.clone()));
    let idempotency: Arc<dyn IdempotencyStore> =
        Arc::new(PgIdempotencyStore::new(pool).with_lease(cfg.idempotency_lease));

    let gateway: Arc<dyn PaymentGateway> = match &cfg.gateway {
        GatewayConfig::Mock(behavior) => Arc::new(MockGateway::new(*behavior)),
        GatewayConfig::Stripe {
            secret_key,
            payment_method,
        } => Arc::new(StripeGateway::new(secret_key, payment_method.clone())),
    };
    tracing::info!(gateway = gateway.name(), "payment gateway selected");

    let sink: Arc<dyn OutcomeSink> = match &cfg.order_service_url {
        Some(url) => Arc::new(
            HttpOrderNotifier::new(url.clone(), Duration::from_secs(5))
                .expect("failed to build order service client"),
        ),
        None => {
            tracing::warn!("ORDER_SERVICE_URL not set, payment outcomes will only be logged");
            Arc::new(LogOnlySink)
        }
    };

    let orchestrator = PaymentOrchestrator::new(
        ledger.clone() as Arc<dyn Ledger>,
        idempotency.clone(),
        gateway,
        cfg.orchestrator.clone(),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let relay = tokio::spawn(run_outbox_relay(
        ledger as Arc<dyn OutboxStore>,
        sink,
        cfg.relay,
        shutdown_rx.clone(),
    ));
    let reconciler = tokio::spawn(run_reconciler(
        orchestrator.clone(),
        cfg.reconciler,
        shutdown_rx.clone(),
    ));
    let sweeper = tokio::spawn(run_idempotency_sweeper(
        idempotency,
        cfg.idempotency_retention,
        Duration::from_secs(3600),
        shutdown_rx,
    ));

    let state = AppState {
        orchestrator,
        request_budget: cfg.request_timeout,
    };
    let app = http::router(state, cfg.request_timeout);

    let listener = tokio::net::TcpListener::bind(&cfg.bind_addr)
        .await
        .expect("failed to bind listener");
    tracing::info!(addr = %cfg.bind_addr, "listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    let _ = shutdown_tx.send(true);
    let _ = tokio::join!(relay, reconciler, sweeper);
    tracing::info!("shutdown complete");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to listen for ctrl+c");
    };

    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to listen for SIGTERM")
            .recv()
            .await;
    };

    tokio::select! {
        _ = ctrl_c => tracing::info!("received ctrl+c, shutting down"),
        _ = terminate => tracing::info!("received SIGTERM, shutting down"),
    }
}
