use {
    super::id::{OrderId, PaymentId},
    super::payment::{Payment, PaymentState},
    chrono::{DateTime, Utc},
    serde::{Deserialize, Serialize},
    uuid::Uuid,
};

/// Message delivered to the ordering service when a payment reaches a
/// terminal state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentOutcome {
    pub payment_id: PaymentId,
    pub order_id: OrderId,
    pub final_state: PaymentState,
    pub gateway_reference: Option<String>,
}

impl PaymentOutcome {
    /// `None` unless the payment is in a terminal state.
    pub fn for_payment(payment: &Payment) -> Option<Self> {
        payment.state().is_terminal().then(|| Self {
            payment_id: payment.id(),
            order_id: payment.order_id(),
            final_state: payment.state(),
            gateway_reference: payment.gateway_reference().map(str::to_string),
        })
    }

    /// Stable across redeliveries so the receiver can drop duplicates.
    pub fn dedup_key(&self) -> String {
        format!("{}:{}", self.payment_id, self.final_state)
    }
}

/// A queued notification, as claimed by the outbox relay.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboxEntry {
    pub id: Uuid,
    pub outcome: PaymentOutcome,
    pub attempts: i32,
    pub next_attempt_at: DateTime<Utc>,
}
