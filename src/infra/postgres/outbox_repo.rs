use {
    crate::domain::{
        error::PaymentError,
        outcome::{OutboxEntry, PaymentOutcome},
    },
    chrono::{DateTime, Utc},
    sqlx::{PgPool, Row},
    uuid::Uuid,
};

/// Queue an outcome notification inside the caller's transaction.
/// A second notification for the same payment and final state is dropped.
pub async fn enqueue(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    outcome: &PaymentOutcome,
) -> Result<(), PaymentError> {
    sqlx::query(
        r#"
        INSERT INTO outcome_outbox (id, payment_id, final_state, payload)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (payment_id, final_state) DO NOTHING
        "#,
    )
    .bind(Uuid::now_v7())
    .bind(outcome.payment_id.as_uuid())
    .bind(outcome.final_state.as_str())
    .bind(serde_json::to_value(outcome)?)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

/// Claim up to `limit` due entries and push them `lease` into the future,
/// so a relay that dies mid-batch does not strand them.
/// Uses SKIP LOCKED to avoid contention with other relays.
pub async fn claim_due(
    pool: &PgPool,
    limit: i64,
    lease: chrono::Duration,
) -> Result<Vec<OutboxEntry>, PaymentError> {
    let lease_secs = lease.num_milliseconds() as f64 / 1000.0;
    let rows = sqlx::query(
        r#"
        UPDATE outcome_outbox
        SET status = 'processing',
            next_attempt_at = now() + make_interval(secs => $2),
            updated_at = now()
        WHERE id IN (
            SELECT id FROM outcome_outbox
            WHERE status IN ('pending', 'processing') AND next_attempt_at <= now()
            ORDER BY next_attempt_at
            LIMIT $1
            FOR UPDATE SKIP LOCKED
        )
        RETURNING id, payload, attempts, next_attempt_at
        "#,
    )
    .bind(limit)
    .bind(lease_secs)
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|row| {
            let payload: serde_json::Value = row.try_get("payload")?;
            Ok(OutboxEntry {
                id: row.try_get("id")?,
                outcome: serde_json::from_value(payload)?,
                attempts: row.try_get("attempts")?,
                next_attempt_at: row.try_get("next_attempt_at")?,
            })
        })
        .collect()
}

pub async fn mark_delivered(pool: &PgPool, id: Uuid) -> Result<(), PaymentError> {
    sqlx::query("UPDATE outcome_outbox SET status = 'delivered', updated_at = now() WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Record a failed delivery and schedule the next one.
pub async fn mark_retry(
    pool: &PgPool,
    id: Uuid,
    attempts: i32,
    next_attempt_at: DateTime<Utc>,
    error: &str,
) -> Result<(), PaymentError> {
    sqlx::query(
        r#"
        UPDATE outcome_outbox
        SET status = 'pending', attempts = $2, next_attempt_at = $3,
            last_error = $4, updated_at = now()
        WHERE id = $1
        "#,
    )
    .bind(id)
    .bind(attempts)
    .bind(next_attempt_at)
    .bind(error)
    .execute(pool)
    .await?;
    Ok(())
}
