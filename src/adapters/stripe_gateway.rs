use {
    crate::domain::{
        money::MoneyAmount,
        ports::BoxFuture,
        provider::{GatewayError, GatewayResult, PaymentGateway},
    },
    std::collections::HashMap,
};

/// Stripe-backed gateway. Authorization is a manual-capture PaymentIntent;
/// every call carries our token as Stripe's `Idempotency-Key`.
pub struct StripeGateway {
    client: stripe::Client,
    payment_method: String,
}

impl StripeGateway {
    pub fn new(secret_key: &str, payment_method: impl Into<String>) -> Self {
        Self {
            client: stripe::Client::new(secret_key),
            payment_method: payment_method.into(),
        }
    }

    fn idempotent(&self, token: &str) -> stripe::Client {
        self.client
            .clone()
            .with_strategy(stripe::RequestStrategy::Idempotent(token.to_string()))
    }

    async fn authorize_inner(
        &self,
        amount: MoneyAmount,
        reference: &str,
        token: &str,
    ) -> Result<GatewayResult, GatewayError> {
        let Ok(minor) = amount.minor_units() else {
            return Ok(declined("invalid_amount", serde_json::Value::Null));
        };
        let payment_method = match self.payment_method.parse::<stripe::PaymentMethodId>() {
            Ok(id) => id,
            Err(e) => return Err(GatewayError(format!("invalid payment method id: {e}"))),
        };

        let mut params = stripe::CreatePaymentIntent::new(minor, stripe::Currency::USD);
        params.capture_method = Some(stripe::PaymentIntentCaptureMethod::Manual);
        params.confirm = Some(true);
        params.payment_method = Some(payment_method);
        params.metadata = Some(HashMap::from([(
            "payment_id".to_string(),
            reference.to_string(),
        )]));

        match stripe::PaymentIntent::create(&self.idempotent(token), params).await {
            Ok(pi) => Ok(convert_intent(&pi)?),
            Err(e) => classify(e),
        }
    }

    async fn capture_inner(&self, reference: &str, token: &str) -> Result<GatewayResult, GatewayError> {
        let params = stripe::CapturePaymentIntent::default();
        match stripe::PaymentIntent::capture(&self.idempotent(token), reference, params).await {
            Ok(pi) => Ok(convert_intent(&pi)?),
            Err(e) => classify(e),
        }
    }

    async fn refund_inner(
        &self,
        reference: &str,
        amount: MoneyAmount,
        token: &str,
    ) -> Result<GatewayResult, GatewayError> {
        let Ok(pi_id) = reference.parse::<stripe::PaymentIntentId>() else {
            return Ok(declined("invalid_reference", serde_json::Value::Null));
        };
        let Ok(minor) = amount.minor_units() else {
            return Ok(declined("invalid_amount", serde_json::Value::Null));
        };

        let mut params = stripe::CreateRefund::new();
        params.payment_intent = Some(pi_id);
        params.amount = Some(minor);

        match stripe::Refund::create(&self.idempotent(token), params).await {
            Ok(refund) => {
                let raw = to_raw(&refund)?;
                Ok(match refund.status.as_deref() {
                    Some("succeeded") | Some("pending") => GatewayResult::Success {
                        reference: refund.id.to_string(),
                        raw,
                    },
                    Some("failed") | Some("canceled") => declined("refund_failed", raw),
                    other => {
                        tracing::warn!(status = ?other, "unexpected refund status, treating as pending");
                        GatewayResult::Timeout
                    }
                })
            }
            Err(e) => classify(e),
        }
    }
}

impl PaymentGateway for StripeGateway {
    fn name(&self) -> &'static str {
        "stripe"
    }

    fn authorize<'a>(
        &'a self,
        amount: MoneyAmount,
        reference: &'a str,
        token: &'a str,
    ) -> BoxFuture<'a, Result<GatewayResult, GatewayError>> {
        Box::pin(self.authorize_inner(amount, reference, token))
    }

    fn capture<'a>(
        &'a self,
        reference: &'a str,
        token: &'a str,
    ) -> BoxFuture<'a, Result<GatewayResult, GatewayError>> {
        Box::pin(self.capture_inner(reference, token))
    }

    fn refund<'a>(
        &'a self,
        reference: &'a str,
        amount: MoneyAmount,
        token: &'a str,
    ) -> BoxFuture<'a, Result<GatewayResult, GatewayError>> {
        Box::pin(self.refund_inner(reference, amount, token))
    }
}

fn declined(reason: &str, raw: serde_json::Value) -> GatewayResult {
    GatewayResult::Declined {
        reason_code: reason.to_string(),
        raw,
    }
}

fn to_raw<T: serde::Serialize>(value: &T) -> Result<serde_json::Value, GatewayError> {
    serde_json::to_value(value).map_err(|e| GatewayError(format!("unreadable Stripe response: {e}")))
}

pub fn convert_intent(pi: &stripe::PaymentIntent) -> Result<GatewayResult, GatewayError> {
    let raw = to_raw(pi)?;
    #[allow(unreachable_patterns)]
    let result = match pi.status {
        stripe::PaymentIntentStatus::RequiresCapture | stripe::PaymentIntentStatus::Succeeded => {
            GatewayResult::Success {
                reference: pi.id.to_string(),
                raw,
            }
        }
        stripe::PaymentIntentStatus::Canceled
        | stripe::PaymentIntentStatus::RequiresPaymentMethod => declined("payment_intent_not_authorized", raw),
        stripe::PaymentIntentStatus::Processing
        | stripe::PaymentIntentStatus::RequiresAction
        | stripe::PaymentIntentStatus::RequiresConfirmation => GatewayResult::Timeout,
        other => {
            tracing::warn!("unknown PaymentIntentStatus: {other:?}, treating as pending");
            GatewayResult::Timeout
        }
    };
    Ok(result)
}

/// 5xx, rate limits and network failures are transport errors (retried with
/// the same token). Other API errors are definitive declines.
fn classify(err: stripe::StripeError) -> Result<GatewayResult, GatewayError> {
    match err {
        stripe::StripeError::Stripe(req) if req.http_status >= 500 || req.http_status == 429 => {
            Err(GatewayError(format!("Stripe API {}: {:?}", req.http_status, req.message)))
        }
        stripe::StripeError::Stripe(req) => {
            let reason = req
                .decline_code
                .clone()
                .or_else(|| req.message.clone())
                .unwrap_or_else(|| "declined".to_string());
            let raw = serde_json::json!({
                "http_status": req.http_status,
                "message": req.message,
                "decline_code": req.decline_code,
            });
            Ok(declined(&reason, raw))
        }
        stripe::StripeError::Timeout => Ok(GatewayResult::Timeout),
        other => Err(GatewayError(format!("Stripe API: {other}"))),
    }
}
