use {
    crate::domain::{
        error::PaymentError,
        id::{IdempotencyKey, OrderId, PaymentId},
        idempotency::{BeginOutcome, DEFAULT_IN_FLIGHT_LEASE, Operation, StoredOutcome},
        outcome::OutboxEntry,
        payment::Payment,
        ports::{BoxFuture, IdempotencyStore, Ledger, LedgerWrite, OutboxStore},
        transaction::Transaction,
    },
    chrono::{DateTime, Utc},
    std::{
        collections::HashMap,
        sync::{
            Arc,
            atomic::{AtomicBool, Ordering},
        },
        time::Duration,
    },
    tokio::sync::Mutex,
    uuid::Uuid,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutboxStatus {
    Pending,
    Processing,
    Delivered,
}

#[derive(Debug, Clone)]
pub struct OutboxRecord {
    pub entry: OutboxEntry,
    pub status: OutboxStatus,
    pub last_error: Option<String>,
}

#[derive(Default)]
struct LedgerState {
    payments: HashMap<PaymentId, Payment>,
    by_key: HashMap<IdempotencyKey, PaymentId>,
    transactions: Vec<Transaction>,
    outbox: Vec<OutboxRecord>,
}

/// Ledger and outbox kept in process memory.
///
/// Each call takes one lock over the whole state, which gives the same
/// all-or-nothing behaviour as the database transaction in the Postgres
/// ledger. Used by tests and by local runs without a database.
#[derive(Default, Clone)]
pub struct InMemoryLedger {
    state: Arc<Mutex<LedgerState>>,
    unavailable: Arc<AtomicBool>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// While set, every call fails with a persistence error.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub async fn outbox_records(&self) -> Vec<OutboxRecord> {
        self.state.lock().await.outbox.clone()
    }

    /// Makes every undelivered entry due now, skipping its backoff.
    pub async fn expedite_outbox(&self) {
        let now = Utc::now();
        let mut state = self.state.lock().await;
        for record in state.outbox.iter_mut() {
            if matches!(record.status, OutboxStatus::Pending | OutboxStatus::Processing) {
                record.entry.next_attempt_at = now;
            }
        }
    }

    fn check_available(&self) -> Result<(), PaymentError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(PaymentError::Persistence("ledger unavailable".into()));
        }
        Ok(())
    }
}

impl Ledger for InMemoryLedger {
    fn load(&self, id: PaymentId) -> BoxFuture<'_, Result<Option<Payment>, PaymentError>> {
        Box::pin(async move {
            self.check_available()?;
            Ok(self.state.lock().await.payments.get(&id).cloned())
        })
    }

    fn load_by_idempotency_key<'a>(
        &'a self,
        key: &'a IdempotencyKey,
    ) -> BoxFuture<'a, Result<Option<Payment>, PaymentError>> {
        Box::pin(async move {
            self.check_available()?;
            let state = self.state.lock().await;
            Ok(state
                .by_key
                .get(key)
                .and_then(|id| state.payments.get(id))
                .cloned())
        })
    }

    fn load_by_order(
        &self,
        order_id: OrderId,
    ) -> BoxFuture<'_, Result<Vec<Payment>, PaymentError>> {
        Box::pin(async move {
            self.check_available()?;
            let state = self.state.lock().await;
            let mut payments: Vec<Payment> = state
                .payments
                .values()
                .filter(|p| p.order_id() == order_id)
                .cloned()
                .collect();
            payments.sort_by_key(|p| p.created_at());
            Ok(payments)
        })
    }

    fn create(&self, payment: Payment) -> BoxFuture<'_, Result<Payment, PaymentError>> {
        Box::pin(async move {
            self.check_available()?;
            let mut state = self.state.lock().await;
            if state.by_key.contains_key(payment.idempotency_key()) {
                return Err(PaymentError::DuplicatePayment(
                    payment.idempotency_key().to_string(),
                ));
            }
            state
                .by_key
                .insert(payment.idempotency_key().clone(), payment.id());
            state.payments.insert(payment.id(), payment.clone());
            Ok(payment)
        })
    }

    fn save(&self, write: LedgerWrite) -> BoxFuture<'_, Result<Payment, PaymentError>> {
        Box::pin(async move {
            self.check_available()?;
            let mut state = self.state.lock().await;
            let LedgerWrite {
                mut payment,
                expected_version,
                transaction,
                outcome,
            } = write;

            let stored_version = state
                .payments
                .get(&payment.id())
                .map(Payment::version)
                .ok_or_else(|| PaymentError::NotFound(format!("payment {}", payment.id())))?;
            if stored_version != expected_version {
                return Err(PaymentError::VersionConflict {
                    payment_id: payment.id().to_string(),
                    expected: expected_version,
                });
            }

            let now = Utc::now();
            payment.mark_persisted(expected_version + 1, now);
            state.payments.insert(payment.id(), payment.clone());
            if let Some(transaction) = transaction {
                state.transactions.push(transaction);
            }
            if let Some(outcome) = outcome {
                let queued = state.outbox.iter().any(|r| {
                    r.entry.outcome.payment_id == outcome.payment_id
                        && r.entry.outcome.final_state == outcome.final_state
                });
                if !queued {
                    state.outbox.push(OutboxRecord {
                        entry: OutboxEntry {
                            id: Uuid::now_v7(),
                            outcome,
                            attempts: 0,
                            next_attempt_at: now,
                        },
                        status: OutboxStatus::Pending,
                        last_error: None,
                    });
                }
            }
            Ok(payment)
        })
    }

    fn append_transaction(
        &self,
        transaction: Transaction,
    ) -> BoxFuture<'_, Result<(), PaymentError>> {
        Box::pin(async move {
            self.check_available()?;
            self.state.lock().await.transactions.push(transaction);
            Ok(())
        })
    }

    fn transactions(
        &self,
        id: PaymentId,
    ) -> BoxFuture<'_, Result<Vec<Transaction>, PaymentError>> {
        Box::pin(async move {
            self.check_available()?;
            let state = self.state.lock().await;
            Ok(state
                .transactions
                .iter()
                .filter(|t| t.payment_id == id)
                .cloned()
                .collect())
        })
    }

    fn list_in_progress(
        &self,
        updated_before: DateTime<Utc>,
        limit: i64,
    ) -> BoxFuture<'_, Result<Vec<Payment>, PaymentError>> {
        Box::pin(async move {
            self.check_available()?;
            let state = self.state.lock().await;
            let mut stuck: Vec<Payment> = state
                .payments
                .values()
                .filter(|p| p.state().is_in_progress() && p.updated_at() < updated_before)
                .cloned()
                .collect();
            stuck.sort_by_key(|p| p.updated_at());
            stuck.truncate(limit.max(0) as usize);
            Ok(stuck)
        })
    }
}

impl OutboxStore for InMemoryLedger {
    fn claim_due(
        &self,
        limit: i64,
        lease: chrono::Duration,
    ) -> BoxFuture<'_, Result<Vec<OutboxEntry>, PaymentError>> {
        Box::pin(async move {
            self.check_available()?;
            let now = Utc::now();
            let mut state = self.state.lock().await;
            let mut claimed = Vec::new();
            for record in state.outbox.iter_mut() {
                if claimed.len() as i64 >= limit {
                    break;
                }
                let claimable =
                    matches!(record.status, OutboxStatus::Pending | OutboxStatus::Processing);
                if claimable && record.entry.next_attempt_at <= now {
                    claimed.push(record.entry.clone());
                    record.status = OutboxStatus::Processing;
                    record.entry.next_attempt_at = now + lease;
                }
            }
            Ok(claimed)
        })
    }

    fn mark_delivered(&self, id: Uuid) -> BoxFuture<'_, Result<(), PaymentError>> {
        Box::pin(async move {
            self.check_available()?;
            let mut state = self.state.lock().await;
            if let Some(record) = state.outbox.iter_mut().find(|r| r.entry.id == id) {
                record.status = OutboxStatus::Delivered;
            }
            Ok(())
        })
    }

    fn mark_retry<'a>(
        &'a self,
        id: Uuid,
        attempts: i32,
        next_attempt_at: DateTime<Utc>,
        error: &'a str,
    ) -> BoxFuture<'a, Result<(), PaymentError>> {
        Box::pin(async move {
            self.check_available()?;
            let mut state = self.state.lock().await;
            if let Some(record) = state.outbox.iter_mut().find(|r| r.entry.id == id) {
                record.status = OutboxStatus::Pending;
                record.entry.attempts = attempts;
                record.entry.next_attempt_at = next_attempt_at;
                record.last_error = Some(error.to_string());
            }
            Ok(())
        })
    }
}

enum RecordState {
    InFlight,
    Completed(StoredOutcome),
}

struct IdempotencyRecord {
    fingerprint: String,
    state: RecordState,
    started_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
}

impl IdempotencyRecord {
    fn in_flight(fingerprint: &str) -> Self {
        Self {
            fingerprint: fingerprint.to_string(),
            state: RecordState::InFlight,
            started_at: Utc::now(),
            completed_at: None,
        }
    }

    fn lease_expired(&self, cutoff: Option<DateTime<Utc>>) -> bool {
        matches!(self.state, RecordState::InFlight)
            && cutoff.is_some_and(|cutoff| self.started_at <= cutoff)
    }
}

/// Idempotency records in a mutex-guarded map; `begin` is check-and-set
/// under the lock.
#[derive(Clone)]
pub struct InMemoryIdempotencyStore {
    records: Arc<Mutex<HashMap<(Operation, IdempotencyKey), IdempotencyRecord>>>,
    lease: Duration,
}

impl Default for InMemoryIdempotencyStore {
    fn default() -> Self {
        Self {
            records: Arc::default(),
            lease: DEFAULT_IN_FLIGHT_LEASE,
        }
    }
}

impl InMemoryIdempotencyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_lease(mut self, lease: Duration) -> Self {
        self.lease = lease;
        self
    }

    /// In-flight records started at or before this instant are abandoned.
    fn lease_cutoff(&self) -> Option<DateTime<Utc>> {
        let lease = chrono::Duration::from_std(self.lease).ok()?;
        Utc::now().checked_sub_signed(lease)
    }

    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.lock().await.is_empty()
    }
}

impl IdempotencyStore for InMemoryIdempotencyStore {
    fn begin<'a>(
        &'a self,
        operation: Operation,
        key: &'a IdempotencyKey,
        fingerprint: &'a str,
    ) -> BoxFuture<'a, Result<BeginOutcome, PaymentError>> {
        Box::pin(async move {
            let cutoff = self.lease_cutoff();
            let mut records = self.records.lock().await;
            let slot = (operation, key.clone());
            match records.get_mut(&slot) {
                Some(record)
                    if record.lease_expired(cutoff) && record.fingerprint == fingerprint =>
                {
                    tracing::warn!(%operation, idempotency_key = %key, started_at = %record.started_at, "taking over abandoned in-flight record");
                    record.started_at = Utc::now();
                    Ok(BeginOutcome::Started)
                }
                Some(record) => Ok(match &record.state {
                    RecordState::InFlight => BeginOutcome::AlreadyInFlight {
                        fingerprint: record.fingerprint.clone(),
                    },
                    RecordState::Completed(outcome) => BeginOutcome::AlreadyCompleted {
                        fingerprint: record.fingerprint.clone(),
                        outcome: outcome.clone(),
                    },
                }),
                None => {
                    records.insert(slot, IdempotencyRecord::in_flight(fingerprint));
                    Ok(BeginOutcome::Started)
                }
            }
        })
    }

    fn complete<'a>(
        &'a self,
        operation: Operation,
        key: &'a IdempotencyKey,
        outcome: &'a StoredOutcome,
    ) -> BoxFuture<'a, Result<(), PaymentError>> {
        Box::pin(async move {
            let mut records = self.records.lock().await;
            match records.get_mut(&(operation, key.clone())) {
                Some(record) if matches!(record.state, RecordState::InFlight) => {
                    record.state = RecordState::Completed(outcome.clone());
                    record.completed_at = Some(Utc::now());
                    Ok(())
                }
                _ => {
                    tracing::error!(%operation, idempotency_key = %key, "complete called for a key that is not in flight");
                    Err(PaymentError::Precondition(format!(
                        "idempotency record {operation}/{key} is not in flight"
                    )))
                }
            }
        })
    }

    fn release<'a>(
        &'a self,
        operation: Operation,
        key: &'a IdempotencyKey,
    ) -> BoxFuture<'a, Result<(), PaymentError>> {
        Box::pin(async move {
            let mut records = self.records.lock().await;
            let slot = (operation, key.clone());
            if matches!(
                records.get(&slot).map(|r| &r.state),
                Some(RecordState::InFlight)
            ) {
                records.remove(&slot);
            }
            Ok(())
        })
    }

    fn purge_expired(
        &self,
        completed_before: DateTime<Utc>,
    ) -> BoxFuture<'_, Result<u64, PaymentError>> {
        Box::pin(async move {
            let cutoff = self.lease_cutoff();
            let mut records = self.records.lock().await;
            let before = records.len();
            records.retain(|_, r| {
                !r.lease_expired(cutoff) && r.completed_at.is_none_or(|at| at >= completed_before)
            });
            Ok((before - records.len()) as u64)
        })
    }
}
