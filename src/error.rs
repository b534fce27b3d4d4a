use axum::{
    extract::{multipart::MultipartError, rejection::{JsonRejection, PathRejection, QueryRejection}, Request},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::json;
use tracing::{error, warn};

use crate::auth::jwt::TokenError;
use crate::auth::otp::OtpError;

const INTERNAL_MESSAGE: &str = "Something went wrong. Please try again later";

/// Every way a request can fail. Client-facing variants carry a message
/// that is safe to show verbatim.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    NotFound(String),
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    pub fn validation(msg: impl Into<String>) -> Self {
        AppError::Validation(msg.into())
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        AppError::Unauthorized(msg.into())
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        AppError::Forbidden(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        AppError::NotFound(msg.into())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Configuration(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message for the response body; server-side failures stay opaque.
    pub fn public_message(&self) -> String {
        match self {
            AppError::Configuration(_) | AppError::Internal(_) => INTERNAL_MESSAGE.to_string(),
            other => other.to_string(),
        }
    }
}

impl From<TokenError> for AppError {
    fn from(e: TokenError) -> Self {
        match e {
            TokenError::MissingKey => AppError::Configuration(e.to_string()),
            TokenError::InvalidSignature | TokenError::Expired => {
                AppError::unauthorized("Invalid JWT. Please log in again")
            }
        }
    }
}

impl From<OtpError> for AppError {
    fn from(e: OtpError) -> Self {
        AppError::Validation(e.to_string())
    }
}

impl From<JsonRejection> for AppError {
    fn from(e: JsonRejection) -> Self {
        AppError::Validation(e.body_text())
    }
}

impl From<QueryRejection> for AppError {
    fn from(e: QueryRejection) -> Self {
        AppError::Validation(e.body_text())
    }
}

impl From<PathRejection> for AppError {
    fn from(_: PathRejection) -> Self {
        AppError::validation("Invalid Id")
    }
}

impl From<MultipartError> for AppError {
    fn from(e: MultipartError) -> Self {
        AppError::Validation(e.body_text())
    }
}

/// Attached to failed responses so [`error_envelope`] can stamp the
/// request location onto the body.
#[derive(Debug, Clone)]
pub struct Failure {
    pub message: String,
    pub details: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct FailureBody<'a> {
    success: bool,
    message: &'a str,
    error_log: ErrorLog<'a>,
}

#[derive(Debug, Serialize)]
struct ErrorLog<'a> {
    location: &'a str,
    details: &'a str,
}

fn failure_body(status: StatusCode, failure: &Failure, location: &str) -> Response {
    let body = FailureBody {
        success: false,
        message: &failure.message,
        error_log: ErrorLog {
            location,
            details: &failure.details,
        },
    };
    (status, Json(body)).into_response()
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!(error = ?self, "request failed");
        } else {
            warn!(%status, error = %self, "request rejected");
        }
        let message = self.public_message();
        let failure = Failure {
            details: format!("Error: {message}"),
            message,
        };
        let mut res = failure_body(status, &failure, "");
        res.extensions_mut().insert(failure);
        res
    }
}

/// `/api/v1/auth/login` becomes `api::v1::auth::login`.
pub fn location_of(path: &str) -> String {
    path.trim_start_matches('/').split('/').collect::<Vec<_>>().join("::")
}

/// Rewrites failed responses into the uniform envelope, now that the
/// request path is known.
pub async fn error_envelope(req: Request, next: Next) -> Response {
    let location = location_of(req.uri().path());
    let res = next.run(req).await;
    match res.extensions().get::<Failure>().cloned() {
        Some(failure) => failure_body(res.status(), &failure, &location),
        None => res,
    }
}

/// Success envelope `{success, message, data, meta?}`.
#[derive(Debug)]
pub struct ApiResponse<T> {
    status: StatusCode,
    message: String,
    data: T,
    meta: Option<serde_json::Value>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(message: impl Into<String>, data: T) -> Self {
        Self {
            status: StatusCode::OK,
            message: message.into(),
            data,
            meta: None,
        }
    }

    pub fn created(message: impl Into<String>, data: T) -> Self {
        Self {
            status: StatusCode::CREATED,
            ..Self::ok(message, data)
        }
    }

    pub fn with_meta(mut self, meta: serde_json::Value) -> Self {
        self.meta = Some(meta);
        self
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        let mut body = json!({
            "success": true,
            "message": self.message,
            "data": self.data,
        });
        if let Some(meta) = self.meta {
            body["meta"] = meta;
        }
        (self.status, Json(body)).into_response()
    }
}
