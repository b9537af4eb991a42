use {
    super::id::IdempotencyKey,
    std::time::Duration,
    tokio::time::Instant,
    uuid::Uuid,
};

/// Per-request context threaded through every orchestrator call.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub operation_id: Uuid,
    pub idempotency_key: IdempotencyKey,
    pub deadline: Instant,
}

impl RequestContext {
    pub fn new(idempotency_key: IdempotencyKey, budget: Duration) -> Self {
        Self {
            operation_id: Uuid::new_v4(),
            idempotency_key,
            deadline: Instant::now() + budget,
        }
    }

    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }
}
