//! Response envelope, error mapping and request-context extraction.

use std::convert::Infallible;

use axum::Json;
use axum::extract::FromRequestParts;
use axum::http::StatusCode;
use axum::http::request::Parts;
use axum::response::{IntoResponse, Response};
use tracing::{debug, error};
use vmsched_core::RequestContext;
use vmsched_scheduler::{CollaboratorError, ErrorKind, RpcError, SchedulerError, SchedulerResult};
use vmsched_state::StateError;

/// Response wrapper for consistent API format.
#[derive(Debug, serde::Serialize)]
pub struct ApiResponse<T: serde::Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Error type name, e.g. `NoValidHost`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

impl<T: serde::Serialize> ApiResponse<T> {
    pub fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
            kind: None,
        })
    }
}

/// A failed request, rendered as an [`ApiResponse`] with no data.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
    pub kind: Option<String>,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            kind: None,
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ApiResponse::<()> {
                success: false,
                data: None,
                error: Some(self.message),
                kind: self.kind,
            }),
        )
            .into_response()
    }
}

/// HTTP status for a scheduler error.
pub fn status_for(err: &SchedulerError) -> StatusCode {
    match err {
        SchedulerError::Collaborator(CollaboratorError::NotFound(_)) => StatusCode::NOT_FOUND,
        SchedulerError::Collaborator(CollaboratorError::Conflict(_)) => StatusCode::CONFLICT,
        _ if err.is_invalid() => StatusCode::BAD_REQUEST,
        _ => match err.kind() {
            ErrorKind::NoValidHost | ErrorKind::ComputeServiceUnavailable => StatusCode::CONFLICT,
            ErrorKind::Unimplemented => StatusCode::NOT_IMPLEMENTED,
            ErrorKind::Other => StatusCode::INTERNAL_SERVER_ERROR,
        },
    }
}

impl From<RpcError> for ApiError {
    fn from(err: RpcError) -> Self {
        let inner = err.inner();
        match &err {
            RpcError::Expected(e) => debug!(error = %e, "scheduler call rejected"),
            RpcError::Unexpected(e) => error!(error = %e, "scheduler call failed"),
        }
        Self {
            status: status_for(inner),
            message: inner.to_string(),
            kind: Some(inner.type_name().to_string()),
        }
    }
}

impl From<SchedulerError> for ApiError {
    fn from(err: SchedulerError) -> Self {
        RpcError::from(err).into()
    }
}

impl From<StateError> for ApiError {
    fn from(err: StateError) -> Self {
        match err {
            StateError::NotFound(what) => Self::not_found(format!("{what} not found")),
            other => Self::internal(other.to_string()),
        }
    }
}

/// Run a blocking scheduler call off the async runtime.
pub async fn run_blocking<T, E, F>(f: F) -> Result<T, ApiError>
where
    F: FnOnce() -> Result<T, E> + Send + 'static,
    T: Send + 'static,
    E: Into<ApiError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ApiError::internal(format!("scheduler task failed: {e}")))?
        .map_err(Into::into)
}

/// Convenience for handlers that return a plain scheduler result.
pub async fn run_scheduler<T, F>(f: F) -> Result<T, ApiError>
where
    F: FnOnce() -> SchedulerResult<T> + Send + 'static,
    T: Send + 'static,
{
    run_blocking(f).await
}

// ── Request context ───────────────────────────────────────────────

/// Caller identity taken from the `x-user-id`, `x-project-id` and
/// `x-request-id` headers.
pub struct Ctx(pub RequestContext);

impl<S: Send + Sync> FromRequestParts<S> for Ctx {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header = |name: &str| {
            parts
                .headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        let mut ctx = RequestContext::new(
            header("x-user-id").unwrap_or_else(|| "anonymous".to_string()),
            header("x-project-id").unwrap_or_default(),
        );
        if let Some(request_id) = header("x-request-id") {
            ctx = ctx.with_request_id(request_id);
        }
        Ok(Ctx(ctx))
    }
}
