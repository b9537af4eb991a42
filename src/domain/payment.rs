use {
    super::error::PaymentError,
    super::id::{IdempotencyKey, OrderId, PaymentId},
    super::money::MoneyAmount,
    super::state_machine::{self, PaymentEvent},
    chrono::{DateTime, Utc},
    serde::{Deserialize, Serialize},
    std::fmt,
};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentState {
    Created,
    Authorizing,
    Authorized,
    Capturing,
    Captured,
    Refunding,
    Refunded,
    Failed,
}

impl PaymentState {
    pub const ALL: [PaymentState; 8] = [
        Self::Created,
        Self::Authorizing,
        Self::Authorized,
        Self::Capturing,
        Self::Captured,
        Self::Refunding,
        Self::Refunded,
        Self::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "CREATED",
            Self::Authorizing => "AUTHORIZING",
            Self::Authorized => "AUTHORIZED",
            Self::Capturing => "CAPTURING",
            Self::Captured => "CAPTURED",
            Self::Refunding => "REFUNDING",
            Self::Refunded => "REFUNDED",
            Self::Failed => "FAILED",
        }
    }

    /// States whose outcome the ordering service is told about.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Captured | Self::Refunded | Self::Failed)
    }

    /// States with a gateway call outstanding.
    pub fn is_in_progress(&self) -> bool {
        matches!(self, Self::Authorizing | Self::Capturing | Self::Refunding)
    }
}

impl fmt::Display for PaymentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for PaymentState {
    type Error = PaymentError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        Self::ALL
            .into_iter()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| PaymentError::Validation(format!("unknown payment state: {s}")))
    }
}

/// Payment aggregate. `state` only moves through [`Payment::apply`], which
/// consults the state machine.
#[derive(Debug, Clone, PartialEq)]
pub struct Payment {
    id: PaymentId,
    order_id: OrderId,
    idempotency_key: IdempotencyKey,
    amount: MoneyAmount,
    state: PaymentState,
    gateway_reference: Option<String>,
    refund_amount: Option<MoneyAmount>,
    gateway_token: Option<String>,
    step_key: Option<IdempotencyKey>,
    failure_reason: Option<String>,
    version: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

/// Column-level view of a stored payment, used to rehydrate from storage.
#[derive(Debug, Clone)]
pub struct PaymentRecord {
    pub id: PaymentId,
    pub order_id: OrderId,
    pub idempotency_key: IdempotencyKey,
    pub amount: MoneyAmount,
    pub state: PaymentState,
    pub gateway_reference: Option<String>,
    pub refund_amount: Option<MoneyAmount>,
    pub gateway_token: Option<String>,
    /// Idempotency key of the request that started the outstanding step.
    pub step_key: Option<IdempotencyKey>,
    pub failure_reason: Option<String>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Payment {
    /// A fresh payment in `CREATED`, not yet persisted (version 0).
    pub fn new(order_id: OrderId, idempotency_key: IdempotencyKey, amount: MoneyAmount) -> Self {
        let now = Utc::now();
        Self {
            id: PaymentId::generate(),
            order_id,
            idempotency_key,
            amount,
            state: PaymentState::Created,
            gateway_reference: None,
            refund_amount: None,
            gateway_token: None,
            step_key: None,
            failure_reason: None,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn from_record(record: PaymentRecord) -> Self {
        Self {
            id: record.id,
            order_id: record.order_id,
            idempotency_key: record.idempotency_key,
            amount: record.amount,
            state: record.state,
            gateway_reference: record.gateway_reference,
            refund_amount: record.refund_amount,
            gateway_token: record.gateway_token,
            step_key: record.step_key,
            failure_reason: record.failure_reason,
            version: record.version,
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }

    pub fn id(&self) -> PaymentId {
        self.id
    }

    pub fn order_id(&self) -> OrderId {
        self.order_id
    }

    pub fn idempotency_key(&self) -> &IdempotencyKey {
        &self.idempotency_key
    }

    pub fn amount(&self) -> MoneyAmount {
        self.amount
    }

    pub fn state(&self) -> PaymentState {
        self.state
    }

    pub fn gateway_reference(&self) -> Option<&str> {
        self.gateway_reference.as_deref()
    }

    pub fn refund_amount(&self) -> Option<MoneyAmount> {
        self.refund_amount
    }

    pub fn gateway_token(&self) -> Option<&str> {
        self.gateway_token.as_deref()
    }

    /// Key of the request that owns the outstanding gateway step. A retry
    /// under this key resumes the step instead of being refused.
    pub fn step_key(&self) -> Option<&IdempotencyKey> {
        self.step_key.as_ref()
    }

    pub fn failure_reason(&self) -> Option<&str> {
        self.failure_reason.as_deref()
    }

    pub fn version(&self) -> i64 {
        self.version
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Runs `event` through the state machine and moves to the resulting
    /// state. On an invalid transition the payment is left untouched.
    pub fn apply(&mut self, event: PaymentEvent) -> Result<PaymentState, PaymentError> {
        let next = state_machine::transition(self.state, event)?;
        self.state = next;
        Ok(next)
    }

    pub fn set_gateway_reference(&mut self, reference: impl Into<String>) {
        self.gateway_reference = Some(reference.into());
    }

    pub fn set_refund_amount(&mut self, amount: MoneyAmount) -> Result<(), PaymentError> {
        if amount > self.amount {
            return Err(PaymentError::Validation(format!(
                "refund amount {amount} exceeds payment amount {}",
                self.amount
            )));
        }
        self.refund_amount = Some(amount);
        Ok(())
    }

    pub fn clear_refund_amount(&mut self) {
        self.refund_amount = None;
    }

    pub fn set_gateway_token(&mut self, token: Option<String>) {
        self.gateway_token = token;
    }

    pub fn set_step_key(&mut self, key: Option<IdempotencyKey>) {
        self.step_key = key;
    }

    pub fn set_failure_reason(&mut self, reason: Option<String>) {
        self.failure_reason = reason;
    }

    /// Called by ledgers after a successful write.
    pub fn mark_persisted(&mut self, version: i64, updated_at: DateTime<Utc>) {
        self.version = version;
        self.updated_at = updated_at;
    }

    pub fn view(&self) -> PaymentView {
        PaymentView {
            payment_id: self.id,
            order_id: self.order_id,
            idempotency_key: self.idempotency_key.clone(),
            amount: self.amount,
            currency: MoneyAmount::CURRENCY.to_string(),
            state: self.state,
            gateway_reference: self.gateway_reference.clone(),
            refund_amount: self.refund_amount,
            failure_reason: self.failure_reason.clone(),
            version: self.version,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// Client-facing snapshot of a payment at one point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentView {
    pub payment_id: PaymentId,
    pub order_id: OrderId,
    pub idempotency_key: IdempotencyKey,
    pub amount: MoneyAmount,
    pub currency: String,
    pub state: PaymentState,
    pub gateway_reference: Option<String>,
    pub refund_amount: Option<MoneyAmount>,
    pub failure_reason: Option<String>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
