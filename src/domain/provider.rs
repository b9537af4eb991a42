use {
    super::money::MoneyAmount,
    super::ports::BoxFuture,
    thiserror::Error,
};

/// What the gateway said about one authorize / capture / refund call.
#[derive(Debug, Clone, PartialEq)]
pub enum GatewayResult {
    /// The gateway acknowledged the operation under `reference`.
    Success {
        reference: String,
        raw: serde_json::Value,
    },
    /// Definitive refusal.
    Declined {
        reason_code: String,
        raw: serde_json::Value,
    },
    /// No answer in time. The far side may or may not have acted.
    Timeout,
}

impl GatewayResult {
    pub fn raw(&self) -> serde_json::Value {
        match self {
            Self::Success { raw, .. } | Self::Declined { raw, .. } => raw.clone(),
            Self::Timeout => serde_json::json!({ "status": "timeout" }),
        }
    }
}

/// Transport-level failure reaching the gateway. Always retryable.
#[derive(Debug, Clone, Error)]
#[error("gateway transport: {0}")]
pub struct GatewayError(pub String);

/// Capability interface every payment provider implements. Each call takes
/// an idempotency `token`; a provider that supports it must treat two calls
/// with the same token as one.
pub trait PaymentGateway: Send + Sync {
    fn name(&self) -> &'static str;

    fn authorize<'a>(
        &'a self,
        amount: MoneyAmount,
        reference: &'a str,
        token: &'a str,
    ) -> BoxFuture<'a, Result<GatewayResult, GatewayError>>;

    fn capture<'a>(
        &'a self,
        reference: &'a str,
        token: &'a str,
    ) -> BoxFuture<'a, Result<GatewayResult, GatewayError>>;

    fn refund<'a>(
        &'a self,
        reference: &'a str,
        amount: MoneyAmount,
        token: &'a str,
    ) -> BoxFuture<'a, Result<GatewayResult, GatewayError>>;
}
