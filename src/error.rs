use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use crate::db::StoreError;
use crate::models::ErrorBody;

/// Error returned by route handlers, rendered as `{"error": "..."}`.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error("Invalid admin password")]
    Unauthorized,

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) | Self::Store(StoreError::UnknownCouple(_)) => StatusCode::NOT_FOUND,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let message = match &self {
            Self::Store(StoreError::UnknownCouple(id)) => format!("Couple {id} not found"),
            Self::Store(err) => {
                tracing::error!(error = %err, "Request failed");
                "Internal server error".to_string()
            }
            other => other.to_string(),
        };

        (status, Json(ErrorBody { error: message })).into_response()
    }
}

/// Failures seen by the attendee client.
///
/// The poll loop treats all of them alike: log, surface a notice, retry on
/// the next tick.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Network failure: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Server rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("Invalid couple: {0}")]
    Validation(String),

    #[error("Malformed response: {0}")]
    Malformed(String),
}

#[derive(Debug, Error)]
pub enum VoteError {
    #[error("This browser has already voted")]
    AlreadyVoted,

    #[error("A vote is already being submitted")]
    InFlight,

    #[error("Voting opens once the first update has loaded")]
    NotReady,

    #[error(transparent)]
    Client(#[from] ClientError),
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn render(err: AppError) -> (StatusCode, String) {
        let response = err.into_response();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: ErrorBody = serde_json::from_slice(&bytes).unwrap();
        (status, body.error)
    }

    #[tokio::test]
    async fn test_app_error_status_codes() {
        assert_eq!(
            render(AppError::BadRequest("coupleId is required".to_string())).await,
            (StatusCode::BAD_REQUEST, "coupleId is required".to_string())
        );
        assert_eq!(
            render(AppError::Unauthorized).await.0,
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            render(AppError::Store(StoreError::UnknownCouple(9))).await,
            (StatusCode::NOT_FOUND, "Couple 9 not found".to_string())
        );
    }

    #[tokio::test]
    async fn test_store_errors_are_not_exposed() {
        let err = AppError::Store(StoreError::Corrupt("couple 3 has -1 votes".to_string()));
        let (status, message) = render(err).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(message, "Internal server error");
    }
}
