use {
    crate::domain::{
        error::PaymentError,
        outcome::PaymentOutcome,
        ports::{BoxFuture, OutcomeSink},
    },
    std::time::Duration,
};

/// Notifies the ordering service of final payment outcomes over HTTP.
#[derive(Clone)]
pub struct HttpOrderNotifier {
    client: reqwest::Client,
    base_url: String,
}

impl HttpOrderNotifier {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, PaymentError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PaymentError::Delivery(format!("http client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn endpoint(&self, outcome: &PaymentOutcome) -> String {
        format!(
            "{}/api/orders/{}/payment-update",
            self.base_url, outcome.order_id
        )
    }

    async fn deliver_inner(&self, outcome: &PaymentOutcome) -> Result<(), PaymentError> {
        let response = self
            .client
            .post(self.endpoint(outcome))
            .header("Content-Type", "application/json")
            .header("Idempotency-Key", outcome.dedup_key())
            .json(outcome)
            .send()
            .await
            .map_err(|e| PaymentError::Delivery(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(PaymentError::Delivery(format!(
                "ordering service answered {status}"
            )));
        }
        Ok(())
    }
}

impl OutcomeSink for HttpOrderNotifier {
    fn deliver<'a>(&'a self, outcome: &'a PaymentOutcome) -> BoxFuture<'a, Result<(), PaymentError>> {
        Box::pin(self.deliver_inner(outcome))
    }
}

/// Sink used when no ordering service is configured: outcomes are logged
/// and acknowledged.
pub struct LogOnlySink;

impl OutcomeSink for LogOnlySink {
    fn deliver<'a>(&'a self, outcome: &'a PaymentOutcome) -> BoxFuture<'a, Result<(), PaymentError>> {
        Box::pin(async move {
            tracing::info!(
                payment_id = %outcome.payment_id,
                order_id = %outcome.order_id,
                final_state = %outcome.final_state,
                "payment outcome (no ordering service configured)"
            );
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::domain::{
            id::{OrderId, PaymentId},
            payment::PaymentState,
        },
        uuid::Uuid,
    };

    fn outcome() -> PaymentOutcome {
        PaymentOutcome {
            payment_id: PaymentId::from_uuid(Uuid::now_v7()),
            order_id: OrderId::from_uuid(Uuid::new_v4()),
            final_state: PaymentState::Captured,
            gateway_reference: Some("ch_123".into()),
        }
    }

    #[test]
    fn endpoint_is_per_order() {
        let notifier =
            HttpOrderNotifier::new("http://orders.local/", Duration::from_secs(1)).unwrap();
        let outcome = outcome();
        assert_eq!(
            notifier.endpoint(&outcome),
            format!("http://orders.local/api/orders/{}/payment-update", outcome.order_id)
        );
    }

    #[tokio::test]
    async fn unreachable_service_is_a_delivery_error() {
        let notifier =
            HttpOrderNotifier::new("http://127.0.0.1:9", Duration::from_millis(200)).unwrap();
        let err = notifier.deliver(&outcome()).await.unwrap_err();
        assert!(matches!(err, PaymentError::Delivery(_)));
    }

    #[tokio::test]
    async fn log_only_sink_acknowledges() {
        assert!(LogOnlySink.deliver(&outcome()).await.is_ok());
    }
}
