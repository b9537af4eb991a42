use {
    super::retry::outbox_delay,
    crate::domain::{
        error::PaymentError,
        ports::{OutboxStore, OutcomeSink},
    },
    chrono::Utc,
    std::{sync::Arc, time::Duration},
    tokio::sync::watch,
};

#[derive(Debug, Clone, Copy)]
pub struct RelaySettings {
    pub poll: Duration,
    pub batch: i64,
    /// How long a claimed entry stays hidden from other relays.
    pub lease: chrono::Duration,
    /// Failed attempts after which each further failure is logged as an
    /// error. Delivery keeps being retried at the capped backoff.
    pub alert_after: i32,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            poll: Duration::from_secs(1),
            batch: 20,
            lease: chrono::Duration::seconds(60),
            alert_after: 10,
        }
    }
}

/// Deliver queued outcome notifications to the ordering service.
pub async fn run_outbox_relay(
    outbox: Arc<dyn OutboxStore>,
    sink: Arc<dyn OutcomeSink>,
    settings: RelaySettings,
    mut shutdown: watch::Receiver<bool>,
) {
    tracing::info!("outbox relay started");

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                tracing::info!("outbox relay shutting down");
                return;
            }
            _ = tokio::time::sleep(settings.poll) => {}
        }

        if let Err(e) = relay_once(&*outbox, &*sink, &settings).await {
            tracing::error!(error = %e, "outbox relay poll error");
        }
    }
}

/// Claims one batch and tries each entry once. Returns how many were
/// delivered.
pub async fn relay_once(
    outbox: &dyn OutboxStore,
    sink: &dyn OutcomeSink,
    settings: &RelaySettings,
) -> Result<usize, PaymentError> {
    let entries = outbox.claim_due(settings.batch, settings.lease).await?;

    let mut delivered = 0;
    for entry in entries {
        let payment_id = entry.outcome.payment_id;
        match sink.deliver(&entry.outcome).await {
            Ok(()) => {
                outbox.mark_delivered(entry.id).await?;
                tracing::info!(%payment_id, final_state = %entry.outcome.final_state, "payment outcome delivered");
                delivered += 1;
            }
            Err(e) => {
                let attempts = entry.attempts.saturating_add(1);
                let error = e.to_string();
                let next_attempt_at = Utc::now() + outbox_delay(attempts);
                if attempts >= settings.alert_after {
                    tracing::error!(%payment_id, attempts, %next_attempt_at, error = %error, "payment outcome still undelivered");
                } else {
                    tracing::warn!(%payment_id, attempts, %next_attempt_at, error = %error, "payment outcome delivery failed, will retry");
                }
                outbox
                    .mark_retry(entry.id, attempts, next_attempt_at, &error)
                    .await?;
            }
        }
    }
    Ok(delivered)
}
