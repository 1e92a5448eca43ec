//! Error taxonomy crossing the API boundary.
//!
//! Everything below the boundary (zone/ledger/session internals) returns
//! [`anyhow::Result`], in the teacher's own style of `anyhow::{bail,
//! Context}` deep in the stack. [`ShardError`] is the one typed error that
//! the `warp` filters see, so a handler can tell a 4xx precondition apart
//! from a 5xx ledger failure without string matching.
use serde::Serialize;
use warp::http::StatusCode;
use warp::reject::Reject;

#[derive(Debug, thiserror::Error)]
pub enum ShardError {
    #[error("validation: {0}")]
    Validation(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("precondition failed: {reason}")]
    Precondition { reason: String },

    #[error("ledger operation failed after retries: {0}")]
    LedgerUnavailable(String),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl ShardError {
    pub fn precondition(reason: impl Into<String>) -> Self {
        Self::Precondition {
            reason: reason.into(),
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            ShardError::Validation(_) => StatusCode::BAD_REQUEST,
            ShardError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ShardError::Precondition { .. } => StatusCode::BAD_REQUEST,
            ShardError::LedgerUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ShardError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl Reject for ShardError {}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    reason: Option<String>,
}

/// Top-level `warp` rejection handler. Every filter chain in [`crate::api`]
/// ends here so the JSON error shape is identical across routes.
pub async fn handle_rejection(
    err: warp::Rejection,
) -> Result<impl warp::Reply, std::convert::Infallible> {
    let (status, body) = if err.is_not_found() {
        (
            StatusCode::NOT_FOUND,
            ErrorBody {
                error: "not found".into(),
                reason: None,
            },
        )
    } else if let Some(shard_err) = err.find::<ShardError>() {
        let status = shard_err.status();
        let (error, reason) = match shard_err {
            ShardError::Precondition { reason } => ("precondition failed".to_owned(), Some(reason.clone())),
            other => (other.to_string(), None),
        };
        (status, ErrorBody { error, reason })
    } else if err.find::<warp::filters::body::BodyDeserializeError>().is_some() {
        (
            StatusCode::BAD_REQUEST,
            ErrorBody {
                error: "malformed request body".into(),
                reason: None,
            },
        )
    } else {
        tracing::error!(?err, "unhandled rejection");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            ErrorBody {
                error: "internal error".into(),
                reason: None,
            },
        )
    };

    Ok(warp::reply::with_status(warp::reply::json(&body), status))
}
