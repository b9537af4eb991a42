use {
    crate::domain::{
        error::PaymentError,
        money::MoneyAmount,
        ports::BoxFuture,
        provider::{GatewayError, GatewayResult, PaymentGateway},
    },
    std::{
        collections::{HashMap, VecDeque},
        str::FromStr,
        sync::{
            Arc,
            atomic::{AtomicUsize, Ordering},
        },
    },
    tokio::sync::Mutex,
    uuid::Uuid,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockBehavior {
    AlwaysSucceed,
    AlwaysDecline,
    AlwaysTimeout,
}

impl FromStr for MockBehavior {
    type Err = PaymentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "succeed" => Ok(Self::AlwaysSucceed),
            "decline" => Ok(Self::AlwaysDecline),
            "timeout" => Ok(Self::AlwaysTimeout),
            other => Err(PaymentError::Validation(format!(
                "unknown mock gateway behavior: {other}"
            ))),
        }
    }
}

/// Tokens remembered by [`MockGateway::new`].
pub const DEFAULT_MEMORY: usize = 10_000;

struct MockState {
    behavior: MockBehavior,
    /// Definitive answers by idempotency token, replayed on repeat calls.
    answered: HashMap<String, GatewayResult>,
    /// Tokens in answer order; the oldest is forgotten once `capacity` is hit.
    order: VecDeque<String>,
    capacity: usize,
}

impl MockState {
    fn remember(&mut self, token: &str, result: GatewayResult) {
        if self.capacity == 0 {
            return;
        }
        while self.order.len() >= self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.answered.remove(&oldest);
            }
        }
        self.order.push_back(token.to_string());
        self.answered.insert(token.to_string(), result);
    }
}

/// In-process gateway for tests and local runs without provider
/// credentials. Honours idempotency tokens the way a real provider does: a
/// repeated token gets the first answer, for the most recent
/// [`DEFAULT_MEMORY`] tokens (or the count given to [`MockGateway::with_memory`]).
#[derive(Clone)]
pub struct MockGateway {
    state: Arc<Mutex<MockState>>,
    calls: Arc<AtomicUsize>,
}

impl MockGateway {
    pub fn new(behavior: MockBehavior) -> Self {
        Self::with_memory(behavior, DEFAULT_MEMORY)
    }

    pub fn with_memory(behavior: MockBehavior, capacity: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState {
                behavior,
                answered: HashMap::new(),
                order: VecDeque::new(),
                capacity,
            })),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub async fn set_behavior(&self, behavior: MockBehavior) {
        self.state.lock().await.behavior = behavior;
    }

    /// Number of calls received, repeats included.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    async fn answer(&self, op: &str, token: &str, reference: impl FnOnce() -> String) -> GatewayResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock().await;
        if let Some(previous) = state.answered.get(token) {
            tracing::debug!(op, token, "mock gateway replaying answer");
            return previous.clone();
        }

        let result = match state.behavior {
            MockBehavior::AlwaysSucceed => {
                let reference = reference();
                GatewayResult::Success {
                    raw: serde_json::json!({ "op": op, "status": "succeeded", "reference": reference }),
                    reference,
                }
            }
            MockBehavior::AlwaysDecline => GatewayResult::Declined {
                reason_code: "card_declined".into(),
                raw: serde_json::json!({ "op": op, "status": "declined", "reason": "card_declined" }),
            },
            // Nothing happened on this side, so a later call may still succeed.
            MockBehavior::AlwaysTimeout => return GatewayResult::Timeout,
        };
        state.remember(token, result.clone());
        result
    }
}

impl PaymentGateway for MockGateway {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn authorize<'a>(
        &'a self,
        _amount: MoneyAmount,
        _reference: &'a str,
        token: &'a str,
    ) -> BoxFuture<'a, Result<GatewayResult, GatewayError>> {
        Box::pin(async move {
            Ok(self
                .answer("authorize", token, || format!("mock_auth_{}", Uuid::new_v4().simple()))
                .await)
        })
    }

    fn capture<'a>(
        &'a self,
        reference: &'a str,
        token: &'a str,
    ) -> BoxFuture<'a, Result<GatewayResult, GatewayError>> {
        Box::pin(async move { Ok(self.answer("capture", token, || reference.to_string()).await) })
    }

    fn refund<'a>(
        &'a self,
        _reference: &'a str,
        _amount: MoneyAmount,
        token: &'a str,
    ) -> BoxFuture<'a, Result<GatewayResult, GatewayError>> {
        Box::pin(async move {
            Ok(self
                .answer("refund", token, || format!("mock_refund_{}", Uuid::new_v4().simple()))
                .await)
        })
    }
}
