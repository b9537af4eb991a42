use {
    super::error::{PaymentError, Rejection},
    super::payment::PaymentView,
    serde::{Deserialize, Serialize},
    std::{fmt, time::Duration},
};

/// The lifecycle operations an idempotency key can guard. Keys are scoped
/// per operation, so the same client key may guard a create and a capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Create,
    Capture,
    Refund,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Capture => "capture",
            Self::Refund => "refund",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for Operation {
    type Error = PaymentError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s {
            "create" => Ok(Self::Create),
            "capture" => Ok(Self::Capture),
            "refund" => Ok(Self::Refund),
            other => Err(PaymentError::Validation(format!("unknown operation: {other}"))),
        }
    }
}

/// How long an in-flight record protects its key when nobody finishes it.
pub const DEFAULT_IN_FLIGHT_LEASE: Duration = Duration::from_secs(300);

/// The result handed to the original caller, replayed verbatim to retries.
pub type StoredOutcome = Result<PaymentView, Rejection>;

/// What `begin` observed for an `(operation, key)` pair.
#[derive(Debug, Clone, PartialEq)]
pub enum BeginOutcome {
    /// The caller now holds the key: no record existed, or an in-flight one
    /// for the same request had outlived its lease and was taken over.
    Started,
    /// Another execution holds the key.
    AlreadyInFlight { fingerprint: String },
    /// A previous execution finished with this result.
    AlreadyCompleted {
        fingerprint: String,
        outcome: StoredOutcome,
    },
}

/// How a request reacts to finding its key held by another execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InFlightPolicy {
    /// Fail fast with a retryable `idempotency_conflict`.
    #[default]
    Reject,
    /// Poll until the holder finishes or `max_wait` elapses.
    Wait { max_wait: Duration, poll: Duration },
}

impl InFlightPolicy {
    pub fn parse(raw: &str, max_wait: Duration) -> Result<Self, PaymentError> {
        match raw {
            "reject" => Ok(Self::Reject),
            "wait" => Ok(Self::Wait {
                max_wait,
                poll: Duration::from_millis(50),
            }),
            other => Err(PaymentError::Validation(format!(
                "unknown in-flight policy: {other} (expected reject or wait)"
            ))),
        }
    }
}
