use {
    crate::{
        AppState,
        adapters::api_errors::ApiError,
        domain::{
            context::RequestContext,
            error::{ErrorCode, PaymentError, Rejection},
            id::{IdempotencyKey, OrderId, PaymentId},
            idempotency::StoredOutcome,
            money::MoneyAmount,
            payment::PaymentView,
            transaction::Transaction,
        },
        services::orchestrator::CreatePayment,
    },
    axum::{
        Json, Router,
        extract::{
            DefaultBodyLimit, Path, Query, State,
            rejection::{JsonRejection, QueryRejection},
        },
        http::{HeaderMap, StatusCode},
        response::{IntoResponse, Response},
        routing::{get, post},
    },
    rust_decimal::Decimal,
    serde::Deserialize,
    std::{future::Future, str::FromStr, time::Duration},
    tower_http::{timeout::TimeoutLayer, trace::TraceLayer},
    uuid::Uuid,
};

pub const IDEMPOTENCY_KEY_HEADER: &str = "Idempotency-Key";

pub fn router(state: AppState, request_timeout: Duration) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/payments", post(create_payment).get(payments_for_order))
        .route("/payments/{id}", get(get_payment))
        .route("/payments/{id}/capture", post(capture_payment))
        .route("/payments/{id}/refund", post(refund_payment))
        .route("/payments/{id}/transactions", get(list_transactions))
        .route("/payments/{id}/reconcile", post(reconcile_payment))
        .layer(DefaultBodyLimit::max(16 * 1024))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            request_timeout,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug, Deserialize)]
pub struct CreatePaymentBody {
    pub order_id: Uuid,
    pub amount: Decimal,
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RefundBody {
    pub amount: Decimal,
    pub reason: Option<String>,
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct OrderQuery {
    pub order_id: Uuid,
}

pub async fn health() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({ "status": "ok" })))
}

pub async fn create_payment(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<CreatePaymentBody>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(body) = body.map_err(|e| PaymentError::Validation(e.body_text()))?;
    let key = idempotency_key(&headers, body.idempotency_key.as_deref())?;
    let request = CreatePayment {
        order_id: OrderId::from_uuid(body.order_id),
        amount: MoneyAmount::new(body.amount)?,
    };

    let ctx = RequestContext::new(key, state.request_budget);
    let orchestrator = state.orchestrator.clone();
    let outcome = detached(async move { orchestrator.create_payment(&ctx, request).await }).await?;
    respond(outcome, StatusCode::CREATED)
}

pub async fn capture_payment(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let payment_id = PaymentId::from_str(&id)?;
    let key = idempotency_key(&headers, None)?;

    let ctx = RequestContext::new(key, state.request_budget);
    let orchestrator = state.orchestrator.clone();
    let outcome =
        detached(async move { orchestrator.capture_payment(&ctx, payment_id).await }).await?;
    respond(outcome, StatusCode::OK)
}

pub async fn refund_payment(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Result<Json<RefundBody>, JsonRejection>,
) -> Result<Response, ApiError> {
    let payment_id = PaymentId::from_str(&id)?;
    let Json(body) = body.map_err(|e| PaymentError::Validation(e.body_text()))?;
    let key = idempotency_key(&headers, body.idempotency_key.as_deref())?;
    let amount = MoneyAmount::new(body.amount)?;
    if let Some(reason) = &body.reason {
        tracing::info!(%payment_id, %amount, reason = %reason, "refund requested");
    }

    let ctx = RequestContext::new(key, state.request_budget);
    let orchestrator = state.orchestrator.clone();
    let outcome =
        detached(async move { orchestrator.refund_payment(&ctx, payment_id, amount).await })
            .await?;
    respond(outcome, StatusCode::OK)
}

pub async fn get_payment(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<PaymentView>, ApiError> {
    let payment_id = PaymentId::from_str(&id)?;
    Ok(Json(state.orchestrator.get_payment(payment_id).await?))
}

pub async fn list_transactions(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<Transaction>>, ApiError> {
    let payment_id = PaymentId::from_str(&id)?;
    Ok(Json(state.orchestrator.transactions(payment_id).await?))
}

pub async fn payments_for_order(
    State(state): State<AppState>,
    query: Result<Query<OrderQuery>, QueryRejection>,
) -> Result<Json<Vec<PaymentView>>, ApiError> {
    let Query(query) = query.map_err(|e| PaymentError::Validation(e.body_text()))?;
    let order_id = OrderId::from_uuid(query.order_id);
    Ok(Json(state.orchestrator.payments_for_order(order_id).await?))
}

pub async fn reconcile_payment(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let payment_id = PaymentId::from_str(&id)?;
    let orchestrator = state.orchestrator.clone();
    let outcome = detached(async move { orchestrator.reconcile(payment_id).await }).await?;
    respond(outcome, StatusCode::OK)
}

/// Runs a lifecycle step on its own task so a client disconnect or the
/// request timeout cannot drop it between the gateway call and the write.
async fn detached<F>(step: F) -> Result<StoredOutcome, ApiError>
where
    F: Future<Output = StoredOutcome> + Send + 'static,
{
    tokio::spawn(step).await.map_err(|e| {
        ApiError(Rejection::new(
            ErrorCode::InternalError,
            format!("payment task failed: {e}"),
        ))
    })
}

fn respond(outcome: StoredOutcome, status: StatusCode) -> Result<Response, ApiError> {
    let view = outcome?;
    Ok((status, Json(view)).into_response())
}

/// The key comes from the `Idempotency-Key` header or the body. When both
/// are present they must agree.
fn idempotency_key(headers: &HeaderMap, from_body: Option<&str>) -> Result<IdempotencyKey, ApiError> {
    let from_header = headers
        .get(IDEMPOTENCY_KEY_HEADER)
        .map(|v| {
            v.to_str().map_err(|_| {
                PaymentError::Validation("Idempotency-Key header is not valid text".into())
            })
        })
        .transpose()?;

    let raw = match (from_header, from_body) {
        (Some(h), Some(b)) if h.trim() != b.trim() => {
            return Err(PaymentError::Validation(
                "Idempotency-Key header and body idempotency_key differ".into(),
            )
            .into());
        }
        (Some(h), _) => h,
        (None, Some(b)) => b,
        (None, None) => {
            return Err(PaymentError::Validation("an idempotency key is required".into()).into());
        }
    };
    Ok(IdempotencyKey::new(raw)?)
}
