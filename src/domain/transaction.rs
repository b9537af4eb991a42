use {
    super::error::PaymentError,
    super::id::PaymentId,
    chrono::{DateTime, Utc},
    serde::{Deserialize, Serialize},
    std::fmt,
    uuid::Uuid,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    Authorize,
    Capture,
    Refund,
    Reversal,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Authorize => "authorize",
            Self::Capture => "capture",
            Self::Refund => "refund",
            Self::Reversal => "reversal",
        }
    }
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for TransactionKind {
    type Error = PaymentError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s {
            "authorize" => Ok(Self::Authorize),
            "capture" => Ok(Self::Capture),
            "refund" => Ok(Self::Refund),
            "reversal" => Ok(Self::Reversal),
            other => Err(PaymentError::Validation(format!(
                "unknown transaction kind: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionOutcome {
    Success,
    Failure,
    Timeout,
}

impl TransactionOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Timeout => "timeout",
        }
    }
}

impl fmt::Display for TransactionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for TransactionOutcome {
    type Error = PaymentError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s {
            "success" => Ok(Self::Success),
            "failure" => Ok(Self::Failure),
            "timeout" => Ok(Self::Timeout),
            other => Err(PaymentError::Validation(format!(
                "unknown transaction outcome: {other}"
            ))),
        }
    }
}

/// One gateway attempt against a payment. Append-only audit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub transaction_id: Uuid,
    pub payment_id: PaymentId,
    pub kind: TransactionKind,
    pub outcome: TransactionOutcome,
    pub attempt_number: i32,
    pub occurred_at: DateTime<Utc>,
    pub raw_gateway_response: serde_json::Value,
}

impl Transaction {
    pub fn record(
        payment_id: PaymentId,
        kind: TransactionKind,
        outcome: TransactionOutcome,
        attempt_number: i32,
        raw_gateway_response: serde_json::Value,
    ) -> Self {
        Self {
            transaction_id: Uuid::now_v7(),
            payment_id,
            kind,
            outcome,
            attempt_number,
            occurred_at: Utc::now(),
            raw_gateway_response,
        }
    }
}
