use {
    crate::domain::error::{ErrorCode, PaymentError, Rejection},
    axum::{
        Json,
        http::StatusCode,
        response::{IntoResponse, Response},
    },
};

/// Newtype over the domain rejection so axum can render it.
#[derive(Debug)]
pub struct ApiError(pub Rejection);

impl From<Rejection> for ApiError {
    fn from(rejection: Rejection) -> Self {
        Self(rejection)
    }
}

impl From<PaymentError> for ApiError {
    fn from(err: PaymentError) -> Self {
        Self(err.into())
    }
}

pub fn status_for(code: ErrorCode) -> StatusCode {
    match code {
        ErrorCode::ValidationError | ErrorCode::IdempotencyKeyReused => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        ErrorCode::NotFound => StatusCode::NOT_FOUND,
        ErrorCode::InvalidTransition
        | ErrorCode::VersionConflict
        | ErrorCode::IdempotencyConflict => StatusCode::CONFLICT,
        ErrorCode::GatewayDeclined => StatusCode::PAYMENT_REQUIRED,
        // Accepted: the step is running and will be reconciled.
        ErrorCode::GatewayTimeout => StatusCode::ACCEPTED,
        ErrorCode::PersistenceFailure => StatusCode::SERVICE_UNAVAILABLE,
        ErrorCode::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let Rejection {
            code,
            message,
            payment,
        } = self.0;
        let status = status_for(code);

        let message = if code == ErrorCode::InternalError {
            tracing::error!("internal error: {message}");
            "internal error".to_string()
        } else {
            message
        };

        let body = serde_json::json!({
            "error_code": code,
            "message": message,
            "retryable": code.is_retryable(),
            "payment": payment,
        });

        (status, Json(body)).into_response()
    }
}
