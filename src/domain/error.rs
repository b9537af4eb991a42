use {
    super::payment::{PaymentState, PaymentView},
    super::state_machine::PaymentEvent,
    derive_more::Display,
    serde::{Deserialize, Serialize},
    thiserror::Error,
};

#[derive(Debug, Error)]
pub enum PaymentError {
    #[error("validation: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("{event} is not valid for a payment in state {from}")]
    InvalidTransition { from: PaymentState, event: PaymentEvent },

    #[error("payment {payment_id} was modified concurrently (expected version {expected})")]
    VersionConflict { payment_id: String, expected: i64 },

    #[error("payment already exists for idempotency key {0}")]
    DuplicatePayment(String),

    #[error("request with idempotency key {0} is still in flight")]
    IdempotencyConflict(String),

    #[error("idempotency key {0} was reused with a different payload")]
    IdempotencyKeyReused(String),

    #[error("gateway declined: {reason}")]
    GatewayDeclined { reason: String },

    #[error("gateway outcome pending: {0}")]
    GatewayTimeout(String),

    #[error("database: {0}")]
    Database(#[from] sqlx::Error),

    #[error("persistence: {0}")]
    Persistence(String),

    #[error("serialization: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("precondition violated: {0}")]
    Precondition(String),

    #[error("outcome delivery: {0}")]
    Delivery(String),
}

impl PaymentError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Validation(_) => ErrorCode::ValidationError,
            Self::NotFound(_) => ErrorCode::NotFound,
            Self::InvalidTransition { .. } => ErrorCode::InvalidTransition,
            Self::VersionConflict { .. } => ErrorCode::VersionConflict,
            Self::DuplicatePayment(_) | Self::IdempotencyConflict(_) => {
                ErrorCode::IdempotencyConflict
            }
            Self::IdempotencyKeyReused(_) => ErrorCode::IdempotencyKeyReused,
            Self::GatewayDeclined { .. } => ErrorCode::GatewayDeclined,
            Self::GatewayTimeout(_) => ErrorCode::GatewayTimeout,
            Self::Database(_) | Self::Persistence(_) => ErrorCode::PersistenceFailure,
            Self::Serialization(_) | Self::Precondition(_) | Self::Delivery(_) => {
                ErrorCode::InternalError
            }
        }
    }
}

/// Stable, client-facing error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    #[display("validation_error")]
    ValidationError,
    #[display("not_found")]
    NotFound,
    #[display("invalid_transition")]
    InvalidTransition,
    #[display("version_conflict")]
    VersionConflict,
    #[display("idempotency_conflict")]
    IdempotencyConflict,
    #[display("idempotency_key_reused")]
    IdempotencyKeyReused,
    #[display("gateway_declined")]
    GatewayDeclined,
    #[display("gateway_timeout")]
    GatewayTimeout,
    #[display("persistence_failure")]
    PersistenceFailure,
    #[display("internal_error")]
    InternalError,
}

impl ErrorCode {
    /// Whether the client may resend the same request later and expect progress.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::IdempotencyConflict | Self::PersistenceFailure | Self::VersionConflict
        )
    }
}

/// What a lifecycle operation hands back to its caller when it does not
/// succeed. Serializable so that an idempotent replay returns it verbatim.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[error("{code}: {message}")]
pub struct Rejection {
    pub code: ErrorCode,
    pub message: String,
    pub payment: Option<PaymentView>,
}

impl Rejection {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            payment: None,
        }
    }

    pub fn with_payment(mut self, payment: PaymentView) -> Self {
        self.payment = Some(payment);
        self
    }
}

impl From<PaymentError> for Rejection {
    fn from(err: PaymentError) -> Self {
        Self::new(err.code(), err.to_string())
    }
}
