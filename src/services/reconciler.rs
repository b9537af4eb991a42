use {
    super::orchestrator::PaymentOrchestrator,
    crate::domain::{
        error::{ErrorCode, PaymentError},
        ports::IdempotencyStore,
    },
    chrono::Utc,
    std::{sync::Arc, time::Duration},
    tokio::sync::watch,
};

#[derive(Debug, Clone, Copy)]
pub struct ReconcilerSettings {
    pub interval: Duration,
    /// A payment must have sat in progress this long before it is picked up.
    pub stale_after: Duration,
    pub batch: i64,
}

impl Default for ReconcilerSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            stale_after: Duration::from_secs(60),
            batch: 50,
        }
    }
}

/// Periodically resolve payments left in an in-progress state.
pub async fn run_reconciler(
    orchestrator: PaymentOrchestrator,
    settings: ReconcilerSettings,
    mut shutdown: watch::Receiver<bool>,
) {
    tracing::info!("payment reconciler started");

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                tracing::info!("payment reconciler shutting down");
                return;
            }
            _ = tokio::time::sleep(settings.interval) => {}
        }

        match reconcile_once(&orchestrator, settings.stale_after, settings.batch).await {
            Ok(0) => {}
            Ok(n) => tracing::info!(count = n, "reconciled stale payments"),
            Err(e) => tracing::error!(error = %e, "reconciler error"),
        }
    }
}

/// One reconciliation sweep. Returns how many payments left the
/// in-progress states.
pub async fn reconcile_once(
    orchestrator: &PaymentOrchestrator,
    stale_after: Duration,
    limit: i64,
) -> Result<usize, PaymentError> {
    let stale_after = chrono::Duration::from_std(stale_after)
        .map_err(|e| PaymentError::Precondition(format!("stale_after out of range: {e}")))?;
    let stuck = orchestrator
        .ledger()
        .list_in_progress(Utc::now() - stale_after, limit)
        .await?;

    let mut resolved = 0;
    for payment in stuck {
        let payment_id = payment.id();
        match orchestrator.reconcile(payment_id).await {
            Ok(view) => {
                tracing::info!(%payment_id, state = %view.state, "payment reconciled");
                resolved += 1;
            }
            // A decline is still a resolution.
            Err(rejection) if rejection.code == ErrorCode::GatewayDeclined => {
                tracing::info!(%payment_id, "payment reconciled as declined");
                resolved += 1;
            }
            Err(rejection) if rejection.code == ErrorCode::GatewayTimeout => {
                tracing::debug!(%payment_id, "gateway outcome still unknown");
            }
            Err(rejection) => {
                tracing::warn!(%payment_id, error = %rejection, "reconciliation failed");
            }
        }
    }
    Ok(resolved)
}

/// Periodically drop completed idempotency records past their retention.
pub async fn run_idempotency_sweeper(
    store: Arc<dyn IdempotencyStore>,
    retention: Duration,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    tracing::info!("idempotency sweeper started");

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                tracing::info!("idempotency sweeper shutting down");
                return;
            }
            _ = tokio::time::sleep(interval) => {}
        }

        match sweep_once(&*store, retention).await {
            Ok(0) => {}
            Ok(n) => tracing::info!(count = n, "purged expired idempotency records"),
            Err(e) => tracing::error!(error = %e, "idempotency sweeper error"),
        }
    }
}

pub async fn sweep_once(
    store: &dyn IdempotencyStore,
    retention: Duration,
) -> Result<u64, PaymentError> {
    let retention = chrono::Duration::from_std(retention)
        .map_err(|e| PaymentError::Precondition(format!("retention out of range: {e}")))?;
    store.purge_expired(Utc::now() - retention).await
}
