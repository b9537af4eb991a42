use {
    crate::domain::{
        error::PaymentError,
        id::IdempotencyKey,
        idempotency::{BeginOutcome, DEFAULT_IN_FLIGHT_LEASE, Operation, StoredOutcome},
        ports::{BoxFuture, IdempotencyStore},
    },
    chrono::{DateTime, Utc},
    sqlx::{PgPool, Row},
    std::time::Duration,
};

#[derive(Clone)]
pub struct PgIdempotencyStore {
    pool: PgPool,
    lease: Duration,
}

impl PgIdempotencyStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            lease: DEFAULT_IN_FLIGHT_LEASE,
        }
    }

    pub fn with_lease(mut self, lease: Duration) -> Self {
        self.lease = lease;
        self
    }

    async fn begin_inner(
        &self,
        operation: Operation,
        key: &IdempotencyKey,
        fingerprint: &str,
    ) -> Result<BeginOutcome, PaymentError> {
        // A record can vanish between the insert and the read (released or
        // purged), so retry the pair a couple of times.
        for _ in 0..3 {
            // The conflict arm takes over an abandoned in-flight record for
            // the same request; the row lock makes that single-winner too.
            let inserted: Option<bool> = sqlx::query_scalar(
                r#"
                INSERT INTO idempotency_records (operation, idempotency_key, fingerprint)
                VALUES ($1, $2, $3)
                ON CONFLICT (operation, idempotency_key) DO UPDATE
                SET created_at = now()
                WHERE idempotency_records.status = 'in_flight'
                  AND idempotency_records.fingerprint = EXCLUDED.fingerprint
                  AND idempotency_records.created_at <= now() - make_interval(secs => $4)
                RETURNING true
                "#,
            )
            .bind(operation.as_str())
            .bind(key.as_str())
            .bind(fingerprint)
            .bind(self.lease.as_secs_f64())
            .fetch_optional(&self.pool)
            .await?;

            if inserted.is_some() {
                return Ok(BeginOutcome::Started);
            }

            let row = sqlx::query(
                r#"
                SELECT fingerprint, status, result
                FROM idempotency_records
                WHERE operation = $1 AND idempotency_key = $2
                "#,
            )
            .bind(operation.as_str())
            .bind(key.as_str())
            .fetch_optional(&self.pool)
            .await?;

            let Some(row) = row else { continue };
            let fingerprint: String = row.try_get("fingerprint")?;
            let status: String = row.try_get("status")?;
            let result: Option<serde_json::Value> = row.try_get("result")?;

            return match (status.as_str(), result) {
                ("completed", Some(result)) => Ok(BeginOutcome::AlreadyCompleted {
                    fingerprint,
                    outcome: serde_json::from_value::<StoredOutcome>(result)?,
                }),
                _ => Ok(BeginOutcome::AlreadyInFlight { fingerprint }),
            };
        }
        Err(PaymentError::IdempotencyConflict(key.to_string()))
    }
}

impl IdempotencyStore for PgIdempotencyStore {
    fn begin<'a>(
        &'a self,
        operation: Operation,
        key: &'a IdempotencyKey,
        fingerprint: &'a str,
    ) -> BoxFuture<'a, Result<BeginOutcome, PaymentError>> {
        Box::pin(self.begin_inner(operation, key, fingerprint))
    }

    fn complete<'a>(
        &'a self,
        operation: Operation,
        key: &'a IdempotencyKey,
        outcome: &'a StoredOutcome,
    ) -> BoxFuture<'a, Result<(), PaymentError>> {
        Box::pin(async move {
            let result = sqlx::query(
                r#"
                UPDATE idempotency_records
                SET status = 'completed', result = $3, completed_at = now()
                WHERE operation = $1 AND idempotency_key = $2 AND status = 'in_flight'
                "#,
            )
            .bind(operation.as_str())
            .bind(key.as_str())
            .bind(serde_json::to_value(outcome)?)
            .execute(&self.pool)
            .await?;

            if result.rows_affected() == 0 {
                tracing::error!(%operation, idempotency_key = %key, "complete called for a key that is not in flight");
                return Err(PaymentError::Precondition(format!(
                    "idempotency record {operation}/{key} is not in flight"
                )));
            }
            Ok(())
        })
    }

    fn release<'a>(
        &'a self,
        operation: Operation,
        key: &'a IdempotencyKey,
    ) -> BoxFuture<'a, Result<(), PaymentError>> {
        Box::pin(async move {
            sqlx::query(
                r#"
                DELETE FROM idempotency_records
                WHERE operation = $1 AND idempotency_key = $2 AND status = 'in_flight'
                "#,
            )
            .bind(operation.as_str())
            .bind(key.as_str())
            .execute(&self.pool)
            .await?;
            Ok(())
        })
    }

    fn purge_expired(
        &self,
        completed_before: DateTime<Utc>,
    ) -> BoxFuture<'_, Result<u64, PaymentError>> {
        Box::pin(async move {
            let result = sqlx::query(
                r#"
                DELETE FROM idempotency_records
                WHERE (status = 'completed' AND completed_at < $1)
                   OR (status = 'in_flight' AND created_at <= now() - make_interval(secs => $2))
                "#,
            )
            .bind(completed_before)
            .bind(self.lease.as_secs_f64())
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected())
        })
    }
}
