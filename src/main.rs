use std::sync::Arc;

use anyhow::Context;
use tokio::sync::watch;
use tracing::{error, info, warn};

use wallet_gateway::api::{self, AppState};
use wallet_gateway::config::{AppConfig, GatewayProvider, LedgerBackend};
use wallet_gateway::gateway::{HttpGateway, PaymentGateway};
use wallet_gateway::ledger::{InMemoryLedger, LedgerStore};
use wallet_gateway::logging::init_tracing;
use wallet_gateway::middleware::webhook_auth::WebhookVerifier;
use wallet_gateway::reconciliation::{ReconciliationService, ReconciliationSweeper};

async fn build_ledger(config: &AppConfig) -> anyhow::Result<Arc<dyn LedgerStore>> {
    match config.database.backend {
        LedgerBackend::Memory => {
            warn!("Using in-memory ledger; balances are lost on restart");
            Ok(Arc::new(InMemoryLedger::new()))
        }
        #[cfg(feature = "database")]
        LedgerBackend::Postgres => {
            let ledger = wallet_gateway::ledger::PgLedger::connect(
                &config.database.url,
                config.database.max_connections,
            )
            .await
            .context("failed to connect to database")?;
            ledger
                .ensure_schema()
                .await
                .context("failed to prepare ledger schema")?;
            info!("PostgreSQL ledger ready");
            Ok(Arc::new(ledger))
        }
        #[cfg(not(feature = "database"))]
        LedgerBackend::Postgres => {
            anyhow::bail!("postgres ledger requested but the `database` feature is disabled")
        }
    }
}

fn build_gateway(config: &AppConfig) -> anyhow::Result<Arc<dyn PaymentGateway>> {
    match config.gateway.provider {
        GatewayProvider::Http => {
            let gateway =
                HttpGateway::new(&config.gateway).context("failed to build gateway client")?;
            Ok(Arc::new(gateway))
        }
        #[cfg(feature = "mock-gateway")]
        GatewayProvider::Mock => {
            warn!("Using mock payment gateway");
            let gateway = wallet_gateway::gateway::MockGateway::new();
            gateway.set_auto_confirm(true);
            Ok(Arc::new(gateway))
        }
        #[cfg(not(feature = "mock-gateway"))]
        GatewayProvider::Mock => {
            anyhow::bail!("mock gateway requested but the `mock-gateway` feature is disabled")
        }
    }
}

async fn shutdown_signal(shutdown_tx: watch::Sender<bool>) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
    }
    info!("Shutdown signal received");
    let _ = shutdown_tx.send(true);
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    let config = AppConfig::load().map_err(|e| {
        error!(error = %e, "Failed to load configuration");
        e
    })?;
    info!(
        ledger = ?config.database.backend,
        gateway = ?config.gateway.provider,
        "Starting wallet gateway"
    );

    let ledger = build_ledger(&config).await?;
    let gateway = build_gateway(&config)?;
    let service = Arc::new(ReconciliationService::new(ledger, gateway, &config));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweeper_handle = if config.reconciliation.enabled {
        let sweeper = ReconciliationSweeper::new(service.clone(), config.reconciliation.clone());
        Some(tokio::spawn(async move { sweeper.run(shutdown_rx).await }))
    } else {
        info!("Reconciliation sweep disabled");
        None
    };

    let verifier = Arc::new(WebhookVerifier::new(
        &config.webhook,
        config.server.max_body_bytes,
    ));
    let app = api::router(AppState::new(service), verifier, config.server.max_body_bytes);

    let listener = tokio::net::TcpListener::bind(config.bind_address())
        .await
        .with_context(|| format!("failed to bind {}", config.bind_address()))?;
    info!(address = %config.bind_address(), "HTTP server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown_tx))
        .await
        .context("server error")?;

    if let Some(handle) = sweeper_handle {
        if let Err(e) = handle.await {
            error!(error = %e, "Reconciliation sweeper task failed");
        }
    }
    info!("Wallet gateway stopped");
    Ok(())
}
