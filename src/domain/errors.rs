use super::{BookStatus, ReservationStatus, TransactionStatus};

/// 書籍ステータス変更のエラー
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookStatusError {
    /// 状態機械で許可されない遷移
    InvalidTransition { from: BookStatus, to: BookStatus },
}

/// 予約遷移のエラー
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReservationTransitionError {
    /// 状態機械で許可されない遷移
    InvalidTransition {
        from: ReservationStatus,
        to: ReservationStatus,
    },
}

/// 返却のエラー
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReturnError {
    /// 既に決済済み（終端ステータス）
    AlreadyClosed(TransactionStatus),
}
