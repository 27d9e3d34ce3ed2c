use thiserror::Error;
use uuid::Uuid;

use crate::domain::{BookStatusError, ReservationTransitionError, ReturnError};

/// 循環エンジンのエラー
///
/// NotFound / Conflict / InvalidTransition / Validationは期待される結果として
/// そのまま呼び出し側に返され、リトライされない。Internalのうちストア競合に
/// 見えるものだけがエンジン内で1回だけ自動リトライされる。
#[derive(Debug, Error)]
pub enum CirculationError {
    /// 対象エンティティが存在しない
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: Uuid },

    /// 現在の状態と両立しない操作（書籍が貸出不可、予約が解決済みなど）
    #[error("conflict: {0}")]
    Conflict(String),

    /// 状態機械で許可されない遷移
    #[error("invalid transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    /// 入力バリデーション違反
    #[error("validation failed for field: {0}")]
    Validation(&'static str),

    /// ストレージ層の障害
    #[error("storage error")]
    Internal(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl CirculationError {
    pub fn not_found(entity: &'static str, id: Uuid) -> Self {
        CirculationError::NotFound { entity, id }
    }

    pub fn conflict(reason: impl Into<String>) -> Self {
        CirculationError::Conflict(reason.into())
    }

    pub fn internal(cause: Box<dyn std::error::Error + Send + Sync>) -> Self {
        CirculationError::Internal(cause)
    }

    /// 一時的なストア競合（並行checkoutの直列化失敗など）に見えるか
    ///
    /// PostgreSQLのserialization failure（SQLSTATE 40001）とデッドロック検出を
    /// 対象とする。該当するエラーはエンジンが1回だけ自動リトライする。
    pub fn is_contention(&self) -> bool {
        match self {
            CirculationError::Internal(cause) => {
                let message = cause.to_string();
                message.contains("40001")
                    || message.contains("serialization")
                    || message.contains("deadlock")
            }
            _ => false,
        }
    }
}

impl From<ReservationTransitionError> for CirculationError {
    fn from(err: ReservationTransitionError) -> Self {
        match err {
            ReservationTransitionError::InvalidTransition { from, to } => {
                CirculationError::InvalidTransition {
                    from: from.to_string(),
                    to: to.to_string(),
                }
            }
        }
    }
}

impl From<BookStatusError> for CirculationError {
    fn from(err: BookStatusError) -> Self {
        match err {
            BookStatusError::InvalidTransition { from, to } => {
                CirculationError::InvalidTransition {
                    from: from.to_string(),
                    to: to.to_string(),
                }
            }
        }
    }
}

impl From<ReturnError> for CirculationError {
    fn from(err: ReturnError) -> Self {
        match err {
            ReturnError::AlreadyClosed(status) => CirculationError::Conflict(format!(
                "transaction already closed (status: {})",
                status
            )),
        }
    }
}

/// 循環エンジンのResult型
pub type Result<T> = std::result::Result<T, CirculationError>;
