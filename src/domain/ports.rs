use {
    super::error::PaymentError,
    super::id::{IdempotencyKey, OrderId, PaymentId},
    super::idempotency::{BeginOutcome, Operation, StoredOutcome},
    super::outcome::{OutboxEntry, PaymentOutcome},
    super::payment::Payment,
    super::transaction::Transaction,
    chrono::{DateTime, Utc},
    std::{future::Future, pin::Pin},
    uuid::Uuid,
};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// One lifecycle step's worth of writes. A ledger persists all of it or none.
#[derive(Debug, Clone)]
pub struct LedgerWrite {
    pub payment: Payment,
    pub expected_version: i64,
    pub transaction: Option<Transaction>,
    pub outcome: Option<PaymentOutcome>,
}

/// Durable record of payments and their transaction history.
pub trait Ledger: Send + Sync {
    fn load(&self, id: PaymentId) -> BoxFuture<'_, Result<Option<Payment>, PaymentError>>;

    fn load_by_idempotency_key<'a>(
        &'a self,
        key: &'a IdempotencyKey,
    ) -> BoxFuture<'a, Result<Option<Payment>, PaymentError>>;

    fn load_by_order(&self, order_id: OrderId)
    -> BoxFuture<'_, Result<Vec<Payment>, PaymentError>>;

    /// Inserts a new payment. Fails with `DuplicatePayment` if its
    /// idempotency key is already taken.
    fn create(&self, payment: Payment) -> BoxFuture<'_, Result<Payment, PaymentError>>;

    /// Compare-and-swap on `version`. Returns the stored payment with its
    /// new version, or `VersionConflict` without writing anything.
    fn save(&self, write: LedgerWrite) -> BoxFuture<'_, Result<Payment, PaymentError>>;

    fn append_transaction(
        &self,
        transaction: Transaction,
    ) -> BoxFuture<'_, Result<(), PaymentError>>;

    fn transactions(&self, id: PaymentId)
    -> BoxFuture<'_, Result<Vec<Transaction>, PaymentError>>;

    /// Payments sitting in an in-progress state since before `updated_before`.
    fn list_in_progress(
        &self,
        updated_before: DateTime<Utc>,
        limit: i64,
    ) -> BoxFuture<'_, Result<Vec<Payment>, PaymentError>>;
}

pub trait IdempotencyStore: Send + Sync {
    /// Atomic check-and-set: at most one caller ever sees `Started` for a
    /// given `(operation, key)` until the record is released or purged.
    fn begin<'a>(
        &'a self,
        operation: Operation,
        key: &'a IdempotencyKey,
        fingerprint: &'a str,
    ) -> BoxFuture<'a, Result<BeginOutcome, PaymentError>>;

    /// Moves an in-flight record to completed. Errors with `Precondition`
    /// if the record is not in flight; a stored result is never replaced.
    fn complete<'a>(
        &'a self,
        operation: Operation,
        key: &'a IdempotencyKey,
        outcome: &'a StoredOutcome,
    ) -> BoxFuture<'a, Result<(), PaymentError>>;

    /// Drops an in-flight record so the request can be retried from scratch.
    fn release<'a>(
        &'a self,
        operation: Operation,
        key: &'a IdempotencyKey,
    ) -> BoxFuture<'a, Result<(), PaymentError>>;

    /// Removes completed records older than `completed_before`, and
    /// in-flight records whose lease has run out.
    fn purge_expired(
        &self,
        completed_before: DateTime<Utc>,
    ) -> BoxFuture<'_, Result<u64, PaymentError>>;
}

/// Queue of outcome notifications awaiting delivery.
pub trait OutboxStore: Send + Sync {
    /// Claims up to `limit` due entries. A claimed entry is hidden from other
    /// claimers for `lease` and reappears if it is neither delivered nor
    /// rescheduled by then.
    fn claim_due(
        &self,
        limit: i64,
        lease: chrono::Duration,
    ) -> BoxFuture<'_, Result<Vec<OutboxEntry>, PaymentError>>;

    fn mark_delivered(&self, id: Uuid) -> BoxFuture<'_, Result<(), PaymentError>>;

    /// Records a failed delivery. Entries are never abandoned; the next
    /// attempt is scheduled at `next_attempt_at`.
    fn mark_retry<'a>(
        &'a self,
        id: Uuid,
        attempts: i32,
        next_attempt_at: DateTime<Utc>,
        error: &'a str,
    ) -> BoxFuture<'a, Result<(), PaymentError>>;
}

/// Receiver of outcome notifications (the ordering service).
pub trait OutcomeSink: Send + Sync {
    fn deliver<'a>(&'a self, outcome: &'a PaymentOutcome) -> BoxFuture<'a, Result<(), PaymentError>>;
}
