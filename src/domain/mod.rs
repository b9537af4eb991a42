pub mod context;
pub mod error;
pub mod id;
pub mod idempotency;
pub mod money;
pub mod outcome;
pub mod payment;
pub mod ports;
pub mod provider;
pub mod state_machine;
pub mod transaction;
