pub mod idempotency_repo;
pub mod outbox_repo;
pub mod payment_repo;
pub mod transaction_repo;

pub use {idempotency_repo::PgIdempotencyStore, payment_repo::PgLedger};
