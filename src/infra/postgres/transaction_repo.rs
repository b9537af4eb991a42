use {
    crate::domain::{
        error::PaymentError,
        id::PaymentId,
        transaction::{Transaction, TransactionKind, TransactionOutcome},
    },
    sqlx::{PgPool, Row},
};

pub async fn insert_transaction(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    transaction: &Transaction,
) -> Result<(), PaymentError> {
    sqlx::query(
        r#"
        INSERT INTO payment_transactions
            (id, payment_id, kind, outcome, attempt_number, occurred_at, raw_gateway_response)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        ON CONFLICT (id) DO NOTHING
        "#,
    )
    .bind(transaction.transaction_id)
    .bind(transaction.payment_id.as_uuid())
    .bind(transaction.kind.as_str())
    .bind(transaction.outcome.as_str())
    .bind(transaction.attempt_number)
    .bind(transaction.occurred_at)
    .bind(&transaction.raw_gateway_response)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

pub async fn list_for_payment(
    pool: &PgPool,
    payment_id: PaymentId,
) -> Result<Vec<Transaction>, PaymentError> {
    let rows = sqlx::query(
        r#"
        SELECT id, kind, outcome, attempt_number, occurred_at, raw_gateway_response
        FROM payment_transactions
        WHERE payment_id = $1
        ORDER BY occurred_at, id
        "#,
    )
    .bind(payment_id.as_uuid())
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|row| {
            let kind: String = row.try_get("kind")?;
            let outcome: String = row.try_get("outcome")?;
            Ok(Transaction {
                transaction_id: row.try_get("id")?,
                payment_id,
                kind: TransactionKind::try_from(kind.as_str())?,
                outcome: TransactionOutcome::try_from(outcome.as_str())?,
                attempt_number: row.try_get("attempt_number")?,
                occurred_at: row.try_get("occurred_at")?,
                raw_gateway_response: row.try_get("raw_gateway_response")?,
            })
        })
        .collect()
}
