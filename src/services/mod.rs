pub mod orchestrator;
pub mod outbox_relay;
pub mod reconciler;
pub mod retry;
