pub mod adapters;
pub mod config;
pub mod domain;
pub mod infra;
pub mod services;

use {services::orchestrator::PaymentOrchestrator, std::time::Duration};

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: PaymentOrchestrator,
    /// Upper bound a request may spend waiting on a duplicate in flight.
    pub request_budget: Duration,
}
