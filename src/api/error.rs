use crate::application::circulation::CirculationError;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};

use super::types::ErrorResponse;

/// API層のエラー型
///
/// アプリケーション層のエラーをラップし、HTTPレスポンスへのマッピングを提供する。
#[derive(Debug)]
pub struct ApiError(CirculationError);

impl From<CirculationError> for ApiError {
    fn from(err: CirculationError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_type, message) = match self.0 {
            // 404 Not Found - リクエストされたリソースが存在しない
            CirculationError::NotFound { entity, id } => (
                StatusCode::NOT_FOUND,
                "NOT_FOUND",
                format!("{} {} not found", entity, id),
            ),

            // 409 Conflict - 現在の状態と両立しない操作
            CirculationError::Conflict(reason) => (StatusCode::CONFLICT, "CONFLICT", reason),

            // 422 Unprocessable Entity - 状態機械で許可されない遷移
            CirculationError::InvalidTransition { from, to } => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "INVALID_TRANSITION",
                format!("invalid transition: {} -> {}", from, to),
            ),

            // 400 Bad Request - 入力バリデーション違反
            CirculationError::Validation(field) => (
                StatusCode::BAD_REQUEST,
                "VALIDATION_FAILED",
                format!("validation failed for field: {}", field),
            ),

            // 500 Internal Server Error - システム障害
            // 内部エラーの詳細はログに記録し、クライアントには一般的なメッセージのみを返す
            CirculationError::Internal(ref e) => {
                tracing::error!("Storage error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "STORAGE_ERROR",
                    "An unexpected error occurred".to_string(),
                )
            }
        };

        let body = Json(ErrorResponse::new(error_type, message));
        (status, body).into_response()
    }
}
