use {
    super::retry::Backoff,
    crate::domain::{
        context::RequestContext,
        error::{ErrorCode, PaymentError, Rejection},
        id::{IdempotencyKey, OrderId, PaymentId},
        idempotency::{BeginOutcome, InFlightPolicy, Operation, StoredOutcome},
        money::{AmountLimits, MoneyAmount},
        outcome::PaymentOutcome,
        payment::{Payment, PaymentState, PaymentView},
        ports::{BoxFuture, IdempotencyStore, Ledger, LedgerWrite},
        provider::{GatewayError, GatewayResult, PaymentGateway},
        state_machine::PaymentEvent,
        transaction::{Transaction, TransactionKind, TransactionOutcome},
    },
    std::{future::Future, sync::Arc, time::Duration},
    tokio::time::Instant,
    tracing::Instrument,
};

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// Per-call ceiling; past it the outcome is indeterminate.
    pub gateway_timeout: Duration,
    pub gateway_retry: Backoff,
    /// Reload-and-recompute rounds after a `VersionConflict`.
    pub version_conflict_retries: u32,
    pub in_flight: InFlightPolicy,
    pub limits: AmountLimits,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            gateway_timeout: Duration::from_secs(10),
            gateway_retry: Backoff::default(),
            version_conflict_retries: 3,
            in_flight: InFlightPolicy::default(),
            limits: AmountLimits::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CreatePayment {
    pub order_id: OrderId,
    pub amount: MoneyAmount,
}

enum GatewayCall {
    Settled {
        result: GatewayResult,
        transaction: Transaction,
    },
    Indeterminate,
}

/// Runs payment lifecycle steps end to end: idempotency guard, state
/// machine, gateway call with retries, atomic ledger write.
#[derive(Clone)]
pub struct PaymentOrchestrator {
    ledger: Arc<dyn Ledger>,
    idempotency: Arc<dyn IdempotencyStore>,
    gateway: Arc<dyn PaymentGateway>,
    settings: OrchestratorSettings,
}

impl PaymentOrchestrator {
    pub fn new(
        ledger: Arc<dyn Ledger>,
        idempotency: Arc<dyn IdempotencyStore>,
        gateway: Arc<dyn PaymentGateway>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            ledger,
            idempotency,
            gateway,
            settings,
        }
    }

    pub fn ledger(&self) -> &Arc<dyn Ledger> {
        &self.ledger
    }

    pub fn idempotency(&self) -> &Arc<dyn IdempotencyStore> {
        &self.idempotency
    }

    /// Creates a payment for an order and authorizes it at the gateway.
    pub async fn create_payment(
        &self,
        ctx: &RequestContext,
        request: CreatePayment,
    ) -> StoredOutcome {
        let span = tracing::info_span!(
            "create_payment",
            operation_id = %ctx.operation_id,
            idempotency_key = %ctx.idempotency_key,
            order_id = %request.order_id,
        );
        let fingerprint = format!("create:{}:{}", request.order_id, request.amount);
        self.guarded(ctx, Operation::Create, fingerprint, self.run_create(ctx, request))
            .instrument(span)
            .await
    }

    pub async fn capture_payment(&self, ctx: &RequestContext, payment_id: PaymentId) -> StoredOutcome {
        let span = tracing::info_span!(
            "capture_payment",
            operation_id = %ctx.operation_id,
            idempotency_key = %ctx.idempotency_key,
            %payment_id,
        );
        let fingerprint = format!("capture:{payment_id}");
        let step = async move {
            let payment = self.load(payment_id).await?;
            self.drive(payment, TransactionKind::Capture, None, &ctx.idempotency_key)
                .await
        };
        self.guarded(ctx, Operation::Capture, fingerprint, step)
            .instrument(span)
            .await
    }

    pub async fn refund_payment(
        &self,
        ctx: &RequestContext,
        payment_id: PaymentId,
        amount: MoneyAmount,
    ) -> StoredOutcome {
        let span = tracing::info_span!(
            "refund_payment",
            operation_id = %ctx.operation_id,
            idempotency_key = %ctx.idempotency_key,
            %payment_id,
            %amount,
        );
        let fingerprint = format!("refund:{payment_id}:{amount}");
        let step = async move {
            let payment = self.load(payment_id).await?;
            self.drive(
                payment,
                TransactionKind::Refund,
                Some(amount),
                &ctx.idempotency_key,
            )
            .await
        };
        self.guarded(ctx, Operation::Refund, fingerprint, step)
            .instrument(span)
            .await
    }

    pub async fn get_payment(&self, payment_id: PaymentId) -> Result<PaymentView, Rejection> {
        Ok(self.load(payment_id).await?.view())
    }

    pub async fn transactions(&self, payment_id: PaymentId) -> Result<Vec<Transaction>, Rejection> {
        self.load(payment_id).await?;
        Ok(self.ledger.transactions(payment_id).await?)
    }

    pub async fn payments_for_order(&self, order_id: OrderId) -> Result<Vec<PaymentView>, Rejection> {
        let payments = self.ledger.load_by_order(order_id).await?;
        Ok(payments.iter().map(Payment::view).collect())
    }

    /// Re-issues the outstanding gateway call of an in-progress payment with
    /// its original token and applies the answer. Payments that are not in
    /// progress are returned unchanged.
    pub async fn reconcile(&self, payment_id: PaymentId) -> StoredOutcome {
        let payment = self.load(payment_id).await?;
        let Some(kind) = pending_kind(payment.state()) else {
            return Ok(payment.view());
        };
        tracing::info!(%payment_id, %kind, state = %payment.state(), "reconciling payment");
        self.resume(payment, kind).await
    }

    /// Applies a gateway answer learned out of band (for example from a
    /// provider notification) to the payment's outstanding step.
    pub async fn apply_gateway_result(
        &self,
        payment_id: PaymentId,
        kind: TransactionKind,
        result: GatewayResult,
    ) -> StoredOutcome {
        let payment = self.load(payment_id).await?;
        let attempt_number = self
            .ledger
            .transactions(payment_id)
            .await?
            .iter()
            .filter(|t| t.kind == kind)
            .count() as i32
            + 1;
        let outcome = match &result {
            GatewayResult::Success { .. } => TransactionOutcome::Success,
            GatewayResult::Declined { .. } => TransactionOutcome::Failure,
            GatewayResult::Timeout => TransactionOutcome::Timeout,
        };
        let transaction =
            Transaction::record(payment_id, kind, outcome, attempt_number, result.raw());

        if matches!(result, GatewayResult::Timeout) {
            self.ledger.append_transaction(transaction).await?;
            return Err(pending(&payment, kind));
        }
        self.settle(payment, kind, result, transaction).await
    }

    async fn run_create(&self, ctx: &RequestContext, request: CreatePayment) -> StoredOutcome {
        self.settings.limits.check(request.amount)?;

        let key = &ctx.idempotency_key;
        // Reached on a retry after a released or purged record.
        if let Some(existing) = self.ledger.load_by_idempotency_key(key).await? {
            return self.continue_existing(existing, &request, key).await;
        }

        let fresh = Payment::new(request.order_id, key.clone(), request.amount);
        let payment = match self.ledger.create(fresh).await {
            Ok(payment) => payment,
            Err(PaymentError::DuplicatePayment(_)) => {
                let existing = self
                    .ledger
                    .load_by_idempotency_key(key)
                    .await?
                    .ok_or_else(|| PaymentError::NotFound(key.to_string()))?;
                return self.continue_existing(existing, &request, key).await;
            }
            Err(e) => return Err(e.into()),
        };
        tracing::info!(payment_id = %payment.id(), amount = %payment.amount(), "payment created");

        self.drive(payment, TransactionKind::Authorize, None, key).await
    }

    /// A payment already exists under the create key. If its authorization
    /// never finished it is carried on, otherwise its current state is returned.
    async fn continue_existing(
        &self,
        existing: Payment,
        request: &CreatePayment,
        key: &IdempotencyKey,
    ) -> StoredOutcome {
        if existing.order_id() != request.order_id || existing.amount() != request.amount {
            return Err(
                PaymentError::IdempotencyKeyReused(existing.idempotency_key().to_string()).into(),
            );
        }
        match existing.state() {
            PaymentState::Created | PaymentState::Authorizing => {
                tracing::info!(payment_id = %existing.id(), state = %existing.state(), "continuing unfinished authorization");
                self.drive(existing, TransactionKind::Authorize, None, key)
                    .await
            }
            _ => {
                tracing::warn!(payment_id = %existing.id(), "payment already exists for key, returning current state");
                Ok(existing.view())
            }
        }
    }

    /// Holds the idempotency key around `step` and records its result.
    async fn guarded(
        &self,
        ctx: &RequestContext,
        operation: Operation,
        fingerprint: String,
        step: impl Future<Output = StoredOutcome>,
    ) -> StoredOutcome {
        let key = &ctx.idempotency_key;
        let wait_until = match self.settings.in_flight {
            InFlightPolicy::Wait { max_wait, .. } => Instant::now() + max_wait.min(ctx.remaining()),
            InFlightPolicy::Reject => Instant::now(),
        };

        loop {
            match self.idempotency.begin(operation, key, &fingerprint).await? {
                BeginOutcome::Started => break,
                BeginOutcome::AlreadyCompleted {
                    fingerprint: stored,
                    outcome,
                } => {
                    if stored != fingerprint {
                        return Err(PaymentError::IdempotencyKeyReused(key.to_string()).into());
                    }
                    tracing::info!(%operation, "replaying stored result");
                    return outcome;
                }
                BeginOutcome::AlreadyInFlight {
                    fingerprint: stored,
                } => {
                    if stored != fingerprint {
                        return Err(PaymentError::IdempotencyKeyReused(key.to_string()).into());
                    }
                    match self.settings.in_flight {
                        InFlightPolicy::Wait { poll, .. } if Instant::now() + poll <= wait_until => {
                            tokio::time::sleep(poll).await;
                        }
                        _ => {
                            tracing::info!(%operation, "request already in flight");
                            return Err(PaymentError::IdempotencyConflict(key.to_string()).into());
                        }
                    }
                }
            }
        }

        let outcome = step.await;

        match &outcome {
            // The step could not be recorded; a retry under the same key
            // picks the payment up where it stopped.
            Err(rejection)
                if matches!(
                    rejection.code,
                    ErrorCode::PersistenceFailure | ErrorCode::VersionConflict
                ) =>
            {
                if let Err(e) = self.idempotency.release(operation, key).await {
                    tracing::error!(%operation, error = %e, "failed to release idempotency record");
                }
            }
            _ => {
                if let Err(e) = self.idempotency.complete(operation, key, &outcome).await {
                    tracing::error!(%operation, error = %e, "failed to finalize idempotency record");
                }
            }
        }
        outcome
    }

    /// Moves `payment` into the in-progress state for `kind`, calls the
    /// gateway and settles the result. If the step is already in progress
    /// under `key`, an earlier attempt got that far and the step is resumed
    /// with its original gateway token.
    async fn drive(
        &self,
        payment: Payment,
        kind: TransactionKind,
        refund_amount: Option<MoneyAmount>,
        key: &IdempotencyKey,
    ) -> StoredOutcome {
        let event = PaymentEvent::request(kind)
            .ok_or_else(|| PaymentError::Precondition(format!("{kind} cannot be requested")))?;

        let mut current = payment;
        let mut conflicts = 0;
        let started = loop {
            if pending_kind(current.state()) == Some(kind) && current.step_key() == Some(key) {
                tracing::info!(payment_id = %current.id(), %kind, "resuming step started under this key");
                return self.resume(current, kind).await;
            }
            let mut next = current.clone();
            if let Err(e) = next.apply(event) {
                tracing::info!(payment_id = %current.id(), %event, state = %current.state(), "rejected invalid transition");
                return Err(Rejection::from(e).with_payment(current.view()));
            }
            if let Some(amount) = refund_amount {
                next.set_refund_amount(amount)
                    .map_err(|e| Rejection::from(e).with_payment(current.view()))?;
            }
            next.set_gateway_token(Some(gateway_token(current.id(), kind, current.version())));
            next.set_step_key(Some(key.clone()));
            next.set_failure_reason(None);

            let write = LedgerWrite {
                payment: next,
                expected_version: current.version(),
                transaction: None,
                outcome: None,
            };
            match self.ledger.save(write).await {
                Ok(saved) => break saved,
                Err(PaymentError::VersionConflict { .. })
                    if conflicts < self.settings.version_conflict_retries =>
                {
                    conflicts += 1;
                    tracing::warn!(payment_id = %current.id(), attempt = conflicts, "version conflict, reloading");
                    current = self.load(current.id()).await?;
                }
                Err(e) => return Err(Rejection::from(e).with_payment(current.view())),
            }
        };
        tracing::info!(payment_id = %started.id(), state = %started.state(), "gateway step started");

        match self.call_gateway(&started, kind).await? {
            GatewayCall::Settled {
                result,
                transaction,
            } => self.settle(started, kind, result, transaction).await,
            GatewayCall::Indeterminate => {
                tracing::warn!(payment_id = %started.id(), %kind, "gateway outcome unknown, left in progress");
                Err(pending(&started, kind))
            }
        }
    }

    /// Re-issues the outstanding call of an in-progress payment and settles it.
    async fn resume(&self, payment: Payment, kind: TransactionKind) -> StoredOutcome {
        match self.call_gateway(&payment, kind).await? {
            GatewayCall::Settled {
                result,
                transaction,
            } => self.settle(payment, kind, result, transaction).await,
            GatewayCall::Indeterminate => Err(pending(&payment, kind)),
        }
    }

    /// Calls the gateway with bounded attempts. Every attempt is recorded;
    /// the definitive one is handed back unpersisted so it can be written
    /// together with the state change.
    async fn call_gateway(
        &self,
        payment: &Payment,
        kind: TransactionKind,
    ) -> Result<GatewayCall, Rejection> {
        let token = payment
            .gateway_token()
            .map(str::to_string)
            .unwrap_or_else(|| gateway_token(payment.id(), kind, payment.version()));
        let reference = payment.id().to_string();
        let gateway_reference = match kind {
            TransactionKind::Authorize => reference.as_str(),
            _ => payment.gateway_reference().ok_or_else(|| {
                Rejection::from(PaymentError::Precondition(format!(
                    "{kind} requires a gateway reference"
                )))
                .with_payment(payment.view())
            })?,
        };
        let backoff = self.settings.gateway_retry;
        let max_attempts = backoff.max_attempts.max(1);

        for attempt in 1..=max_attempts {
            let call = self.invoke(kind, payment, gateway_reference, &token);
            let (outcome, raw) = match tokio::time::timeout(self.settings.gateway_timeout, call).await {
                Ok(Ok(result @ (GatewayResult::Success { .. } | GatewayResult::Declined { .. }))) => {
                    let outcome = match result {
                        GatewayResult::Success { .. } => TransactionOutcome::Success,
                        _ => TransactionOutcome::Failure,
                    };
                    let transaction = Transaction::record(
                        payment.id(),
                        kind,
                        outcome,
                        attempt as i32,
                        result.raw(),
                    );
                    return Ok(GatewayCall::Settled {
                        result,
                        transaction,
                    });
                }
                Ok(Ok(GatewayResult::Timeout)) | Err(_) => (
                    TransactionOutcome::Timeout,
                    GatewayResult::Timeout.raw(),
                ),
                Ok(Err(GatewayError(message))) => (
                    TransactionOutcome::Failure,
                    serde_json::json!({ "status": "transport_error", "error": message }),
                ),
            };

            tracing::warn!(payment_id = %payment.id(), %kind, attempt, %outcome, "gateway attempt inconclusive");
            let transaction = Transaction::record(payment.id(), kind, outcome, attempt as i32, raw);
            if let Err(e) = self.ledger.append_transaction(transaction).await {
                tracing::error!(payment_id = %payment.id(), error = %e, "failed to record gateway attempt");
            }
            if attempt < max_attempts {
                tokio::time::sleep(backoff.delay(attempt)).await;
            }
        }
        Ok(GatewayCall::Indeterminate)
    }

    fn invoke<'a>(
        &'a self,
        kind: TransactionKind,
        payment: &'a Payment,
        gateway_reference: &'a str,
        token: &'a str,
    ) -> BoxFuture<'a, Result<GatewayResult, GatewayError>> {
        match kind {
            TransactionKind::Authorize => {
                self.gateway
                    .authorize(payment.amount(), gateway_reference, token)
            }
            TransactionKind::Capture => self.gateway.capture(gateway_reference, token),
            TransactionKind::Refund | TransactionKind::Reversal => {
                let amount = payment.refund_amount().unwrap_or(payment.amount());
                self.gateway.refund(gateway_reference, amount, token)
            }
        }
    }

    /// Applies a definitive gateway result and persists it together with
    /// its transaction record and, for terminal states, the outcome message.
    async fn settle(
        &self,
        payment: Payment,
        kind: TransactionKind,
        result: GatewayResult,
        transaction: Transaction,
    ) -> StoredOutcome {
        let ok = matches!(result, GatewayResult::Success { .. });
        let event = PaymentEvent::result(kind, ok)
            .ok_or_else(|| PaymentError::Precondition(format!("{kind} has no result event")))?;

        let mut current = payment;
        let mut conflicts = 0;
        loop {
            let mut next = current.clone();
            if let Err(e) = next.apply(event) {
                // The step was already resolved by someone else.
                tracing::warn!(payment_id = %current.id(), %event, state = %current.state(), "gateway result no longer applies");
                self.record_orphan(&transaction).await;
                return Err(Rejection::from(e).with_payment(current.view()));
            }
            match &result {
                GatewayResult::Success { reference, .. } => {
                    if kind == TransactionKind::Authorize {
                        next.set_gateway_reference(reference.clone());
                    }
                    next.set_failure_reason(None);
                }
                GatewayResult::Declined { reason_code, .. } => {
                    next.set_failure_reason(Some(reason_code.clone()));
                    if kind == TransactionKind::Refund {
                        next.clear_refund_amount();
                    }
                }
                GatewayResult::Timeout => {}
            }
            next.set_gateway_token(None);
            next.set_step_key(None);

            let write = LedgerWrite {
                outcome: PaymentOutcome::for_payment(&next),
                payment: next,
                expected_version: current.version(),
                transaction: Some(transaction.clone()),
            };
            match self.ledger.save(write).await {
                Ok(saved) => {
                    tracing::info!(
                        payment_id = %saved.id(),
                        state = %saved.state(),
                        version = saved.version(),
                        "payment step settled"
                    );
                    return match &result {
                        GatewayResult::Declined { reason_code, .. } => Err(Rejection::from(
                            PaymentError::GatewayDeclined {
                                reason: reason_code.clone(),
                            },
                        )
                        .with_payment(saved.view())),
                        _ => Ok(saved.view()),
                    };
                }
                Err(PaymentError::VersionConflict { .. })
                    if conflicts < self.settings.version_conflict_retries =>
                {
                    conflicts += 1;
                    tracing::warn!(payment_id = %current.id(), attempt = conflicts, "version conflict while settling, reloading");
                    current = self.load(current.id()).await?;
                }
                Err(e) => {
                    tracing::error!(payment_id = %current.id(), error = %e, "failed to persist gateway result");
                    self.record_orphan(&transaction).await;
                    return Err(Rejection::from(e).with_payment(current.view()));
                }
            }
        }
    }

    async fn record_orphan(&self, transaction: &Transaction) {
        if let Err(e) = self.ledger.append_transaction(transaction.clone()).await {
            tracing::error!(payment_id = %transaction.payment_id, error = %e, "failed to record gateway attempt");
        }
    }

    async fn load(&self, payment_id: PaymentId) -> Result<Payment, PaymentError> {
        self.ledger
            .load(payment_id)
            .await?
            .ok_or_else(|| PaymentError::NotFound(format!("payment {payment_id}")))
    }
}

/// The gateway step a payment in `state` is waiting on.
pub fn pending_kind(state: PaymentState) -> Option<TransactionKind> {
    match state {
        PaymentState::Authorizing => Some(TransactionKind::Authorize),
        PaymentState::Capturing => Some(TransactionKind::Capture),
        PaymentState::Refunding => Some(TransactionKind::Refund),
        _ => None,
    }
}

/// Idempotency token sent to the gateway. Derived from the version the step
/// started at, so a later refund after a failed one gets a fresh token.
fn gateway_token(payment_id: PaymentId, kind: TransactionKind, version: i64) -> String {
    format!("{payment_id}:{kind}:{version}")
}

fn pending(payment: &Payment, kind: TransactionKind) -> Rejection {
    Rejection::from(PaymentError::GatewayTimeout(format!(
        "{kind} outcome for payment {} is not yet known",
        payment.id()
    )))
    .with_payment(payment.view())
}
