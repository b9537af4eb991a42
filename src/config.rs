use {
    crate::{
        adapters::mock_gateway::MockBehavior,
        domain::{
            error::PaymentError,
            idempotency::InFlightPolicy,
            money::{AmountLimits, MoneyAmount},
        },
        services::{
            orchestrator::OrchestratorSettings, outbox_relay::RelaySettings,
            reconciler::ReconcilerSettings, retry::Backoff,
        },
    },
    rust_decimal::Decimal,
    std::{str::FromStr, time::Duration},
};

#[derive(Debug, Clone, PartialEq)]
pub enum GatewayConfig {
    Mock(MockBehavior),
    Stripe {
        secret_key: String,
        payment_method: String,
    },
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub bind_addr: String,
    pub gateway: GatewayConfig,
    /// Base URL of the ordering service. Outcomes are only logged when unset.
    pub order_service_url: Option<String>,
    pub request_timeout: Duration,
    pub orchestrator: OrchestratorSettings,
    pub idempotency_retention: Duration,
    /// An in-flight idempotency record older than this is treated as
    /// abandoned: the same request may take it over and the sweeper drops it.
    pub idempotency_lease: Duration,
    pub reconciler: ReconcilerSettings,
    pub relay: RelaySettings,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, PaymentError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from any key lookup; `from_env` passes the process
    /// environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, PaymentError> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let database_url =
            get("DATABASE_URL").ok_or_else(|| PaymentError::Validation("DATABASE_URL must be set".into()))?;

        let gateway = match get("PAYMENT_GATEWAY").as_deref().unwrap_or("mock") {
            "mock" => GatewayConfig::Mock(
                get("MOCK_GATEWAY_BEHAVIOR")
                    .as_deref()
                    .unwrap_or("succeed")
                    .parse()?,
            ),
            "stripe" => GatewayConfig::Stripe {
                secret_key: get("STRIPE_SECRET_KEY").ok_or_else(|| {
                    PaymentError::Validation("STRIPE_SECRET_KEY must be set for the stripe gateway".into())
                })?,
                payment_method: get("STRIPE_PAYMENT_METHOD").unwrap_or_else(|| "pm_card_visa".into()),
            },
            other => {
                return Err(PaymentError::Validation(format!(
                    "unknown PAYMENT_GATEWAY: {other}"
                )));
            }
        };

        let idempotency_wait = Duration::from_millis(parse_or(&get, "IDEMPOTENCY_WAIT_MS", 2_000)?);
        let in_flight = InFlightPolicy::parse(
            get("IDEMPOTENCY_IN_FLIGHT_POLICY").as_deref().unwrap_or("reject"),
            idempotency_wait,
        )?;

        let defaults = AmountLimits::default();
        let limits = AmountLimits {
            min: amount_or(&get, "PAYMENT_MIN_AMOUNT", defaults.min)?,
            max: amount_or(&get, "PAYMENT_MAX_AMOUNT", defaults.max)?,
        };
        if limits.min > limits.max {
            return Err(PaymentError::Validation(format!(
                "PAYMENT_MIN_AMOUNT {} exceeds PAYMENT_MAX_AMOUNT {}",
                limits.min, limits.max
            )));
        }

        let orchestrator = OrchestratorSettings {
            gateway_timeout: Duration::from_millis(parse_or(&get, "GATEWAY_TIMEOUT_MS", 10_000)?),
            gateway_retry: Backoff {
                max_attempts: parse_or(&get, "GATEWAY_MAX_ATTEMPTS", 3)?,
                base: Duration::from_millis(parse_or(&get, "GATEWAY_BACKOFF_BASE_MS", 100)?),
                ..Backoff::default()
            },
            version_conflict_retries: parse_or(&get, "VERSION_CONFLICT_RETRIES", 3)?,
            in_flight,
            limits,
        };

        let reconciler = ReconcilerSettings {
            interval: Duration::from_secs(parse_or(&get, "RECONCILE_INTERVAL_SECS", 30)?),
            stale_after: Duration::from_secs(parse_or(&get, "RECONCILE_STALE_SECS", 60)?),
            ..ReconcilerSettings::default()
        };

        let relay = RelaySettings {
            poll: Duration::from_millis(parse_or(&get, "OUTBOX_POLL_MS", 1_000)?),
            alert_after: parse_or(&get, "OUTBOX_ALERT_AFTER_ATTEMPTS", 10)?,
            ..RelaySettings::default()
        };

        let request_timeout = Duration::from_millis(parse_or(&get, "REQUEST_TIMEOUT_MS", 30_000)?);
        let idempotency_lease =
            Duration::from_secs(parse_or(&get, "IDEMPOTENCY_IN_FLIGHT_LEASE_SECS", 300)?);
        if idempotency_lease <= request_timeout {
            return Err(PaymentError::Validation(format!(
                "IDEMPOTENCY_IN_FLIGHT_LEASE_SECS ({}s) must exceed REQUEST_TIMEOUT_MS ({}ms)",
                idempotency_lease.as_secs(),
                request_timeout.as_millis()
            )));
        }

        Ok(Self {
            database_url,
            bind_addr: get("BIND_ADDR").unwrap_or_else(|| "0.0.0.0:3000".into()),
            gateway,
            order_service_url: get("ORDER_SERVICE_URL"),
            request_timeout,
            orchestrator,
            idempotency_retention: Duration::from_secs(
                parse_or::<u64>(&get, "IDEMPOTENCY_RETENTION_HOURS", 24)? * 3600,
            ),
            idempotency_lease,
            reconciler,
            relay,
        })
    }
}

fn parse_or<T: FromStr>(
    get: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T, PaymentError> {
    match get(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| PaymentError::Validation(format!("{key} has an invalid value: {raw}"))),
    }
}

fn amount_or(
    get: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: Decimal,
) -> Result<Decimal, PaymentError> {
    match get(key) {
        None => Ok(default),
        Some(raw) => {
            let value = Decimal::from_str(raw.trim())
                .map_err(|_| PaymentError::Validation(format!("{key} is not a decimal: {raw}")))?;
            Ok(MoneyAmount::new(value)?.value())
        }
    }
}
