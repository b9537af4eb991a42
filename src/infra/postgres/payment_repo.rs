use {
    super::{outbox_repo, transaction_repo},
    crate::domain::{
        error::PaymentError,
        id::{IdempotencyKey, OrderId, PaymentId},
        money::MoneyAmount,
        outcome::OutboxEntry,
        payment::{Payment, PaymentRecord, PaymentState},
        ports::{BoxFuture, Ledger, LedgerWrite, OutboxStore},
        transaction::Transaction,
    },
    chrono::{DateTime, Utc},
    rust_decimal::Decimal,
    sqlx::{PgPool, Row, postgres::PgRow},
    uuid::Uuid,
};

/// Postgres-backed ledger. A lifecycle step (state change, transaction
/// record, outbox entry) commits in one database transaction.
#[derive(Clone)]
pub struct PgLedger {
    pool: PgPool,
}

impl PgLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn save_inner(&self, write: LedgerWrite) -> Result<Payment, PaymentError> {
        let LedgerWrite {
            mut payment,
            expected_version,
            transaction,
            outcome,
        } = write;

        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            r#"
            UPDATE payments
            SET state = $1, gateway_reference = $2, refund_amount = $3,
                gateway_token = $4, step_key = $5, failure_reason = $6,
                version = version + 1, updated_at = now()
            WHERE id = $7 AND version = $8
            RETURNING version, updated_at
            "#,
        )
        .bind(payment.state().as_str())
        .bind(payment.gateway_reference())
        .bind(payment.refund_amount().map(|a| a.value()))
        .bind(payment.gateway_token())
        .bind(payment.step_key().map(IdempotencyKey::as_str))
        .bind(payment.failure_reason())
        .bind(payment.id().as_uuid())
        .bind(expected_version)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            tx.rollback().await?;
            let exists: bool =
                sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM payments WHERE id = $1)")
                    .bind(payment.id().as_uuid())
                    .fetch_one(&self.pool)
                    .await?;
            return Err(if exists {
                PaymentError::VersionConflict {
                    payment_id: payment.id().to_string(),
                    expected: expected_version,
                }
            } else {
                PaymentError::NotFound(format!("payment {}", payment.id()))
            });
        };

        if let Some(transaction) = &transaction {
            transaction_repo::insert_transaction(&mut tx, transaction).await?;
        }
        if let Some(outcome) = &outcome {
            outbox_repo::enqueue(&mut tx, outcome).await?;
        }
        tx.commit().await?;

        payment.mark_persisted(row.try_get("version")?, row.try_get("updated_at")?);
        Ok(payment)
    }
}

fn payment_from_row(row: &PgRow) -> Result<Payment, PaymentError> {
    let state: String = row.try_get("state")?;
    let key: String = row.try_get("idempotency_key")?;
    let amount: Decimal = row.try_get("amount")?;
    let refund_amount: Option<Decimal> = row.try_get("refund_amount")?;
    let step_key: Option<String> = row.try_get("step_key")?;

    Ok(Payment::from_record(PaymentRecord {
        id: PaymentId::from_uuid(row.try_get("id")?),
        order_id: OrderId::from_uuid(row.try_get("order_id")?),
        idempotency_key: IdempotencyKey::new(key)?,
        amount: MoneyAmount::new(amount)?,
        state: PaymentState::try_from(state.as_str())?,
        gateway_reference: row.try_get("gateway_reference")?,
        refund_amount: refund_amount.map(MoneyAmount::new).transpose()?,
        gateway_token: row.try_get("gateway_token")?,
        step_key: step_key.map(IdempotencyKey::new).transpose()?,
        failure_reason: row.try_get("failure_reason")?,
        version: row.try_get("version")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    }))
}

impl Ledger for PgLedger {
    fn load(&self, id: PaymentId) -> BoxFuture<'_, Result<Option<Payment>, PaymentError>> {
        Box::pin(async move {
            let row = sqlx::query("SELECT * FROM payments WHERE id = $1")
                .bind(id.as_uuid())
                .fetch_optional(&self.pool)
                .await?;
            row.as_ref().map(payment_from_row).transpose()
        })
    }

    fn load_by_idempotency_key<'a>(
        &'a self,
        key: &'a IdempotencyKey,
    ) -> BoxFuture<'a, Result<Option<Payment>, PaymentError>> {
        Box::pin(async move {
            let row = sqlx::query("SELECT * FROM payments WHERE idempotency_key = $1")
                .bind(key.as_str())
                .fetch_optional(&self.pool)
                .await?;
            row.as_ref().map(payment_from_row).transpose()
        })
    }

    fn load_by_order(
        &self,
        order_id: OrderId,
    ) -> BoxFuture<'_, Result<Vec<Payment>, PaymentError>> {
        Box::pin(async move {
            let rows = sqlx::query("SELECT * FROM payments WHERE order_id = $1 ORDER BY created_at")
                .bind(order_id.as_uuid())
                .fetch_all(&self.pool)
                .await?;
            rows.iter().map(payment_from_row).collect()
        })
    }

    fn create(&self, payment: Payment) -> BoxFuture<'_, Result<Payment, PaymentError>> {
        Box::pin(async move {
            let inserted: Option<bool> = sqlx::query_scalar(
                r#"
                INSERT INTO payments
                    (id, order_id, idempotency_key, amount, state, version, created_at, updated_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                ON CONFLICT (idempotency_key) DO NOTHING
                RETURNING true
                "#,
            )
            .bind(payment.id().as_uuid())
            .bind(payment.order_id().as_uuid())
            .bind(payment.idempotency_key().as_str())
            .bind(payment.amount().value())
            .bind(payment.state().as_str())
            .bind(payment.version())
            .bind(payment.created_at())
            .bind(payment.updated_at())
            .fetch_optional(&self.pool)
            .await?;

            if inserted.is_none() {
                return Err(PaymentError::DuplicatePayment(
                    payment.idempotency_key().to_string(),
                ));
            }
            Ok(payment)
        })
    }

    fn save(&self, write: LedgerWrite) -> BoxFuture<'_, Result<Payment, PaymentError>> {
        Box::pin(self.save_inner(write))
    }

    fn append_transaction(
        &self,
        transaction: Transaction,
    ) -> BoxFuture<'_, Result<(), PaymentError>> {
        Box::pin(async move {
            let mut tx = self.pool.begin().await?;
            transaction_repo::insert_transaction(&mut tx, &transaction).await?;
            tx.commit().await?;
            Ok(())
        })
    }

    fn transactions(
        &self,
        id: PaymentId,
    ) -> BoxFuture<'_, Result<Vec<Transaction>, PaymentError>> {
        Box::pin(transaction_repo::list_for_payment(&self.pool, id))
    }

    fn list_in_progress(
        &self,
        updated_before: DateTime<Utc>,
        limit: i64,
    ) -> BoxFuture<'_, Result<Vec<Payment>, PaymentError>> {
        Box::pin(async move {
            let rows = sqlx::query(
                r#"
                SELECT * FROM payments
                WHERE state IN ('AUTHORIZING', 'CAPTURING', 'REFUNDING')
                  AND updated_at < $1
                ORDER BY updated_at
                LIMIT $2
                "#,
            )
            .bind(updated_before)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
            rows.iter().map(payment_from_row).collect()
        })
    }
}

impl OutboxStore for PgLedger {
    fn claim_due(
        &self,
        limit: i64,
        lease: chrono::Duration,
    ) -> BoxFuture<'_, Result<Vec<OutboxEntry>, PaymentError>> {
        Box::pin(outbox_repo::claim_due(&self.pool, limit, lease))
    }

    fn mark_delivered(&self, id: Uuid) -> BoxFuture<'_, Result<(), PaymentError>> {
        Box::pin(outbox_repo::mark_delivered(&self.pool, id))
    }

    fn mark_retry<'a>(
        &'a self,
        id: Uuid,
        attempts: i32,
        next_attempt_at: DateTime<Utc>,
        error: &'a str,
    ) -> BoxFuture<'a, Result<(), PaymentError>> {
        Box::pin(outbox_repo::mark_retry(
            &self.pool,
            id,
            attempts,
            next_attempt_at,
            error,
        ))
    }
}
