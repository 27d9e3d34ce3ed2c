use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{BookId, BookStatus, MemberId, ReservationId, ReservationStatus, ReturnCondition, TransactionId};

/// コマンド：書籍を貸し出す
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkout {
    pub book_id: BookId,
    pub member_id: MemberId,
    pub due_date: DateTime<Utc>,
    pub requested_at: DateTime<Utc>,
}

/// コマンド：書籍を返却する
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnItem {
    pub transaction_id: TransactionId,
    pub condition: ReturnCondition,
    pub notes: Option<String>,
    pub returned_at: DateTime<Utc>,
}

/// コマンド：予約を作成する
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaceReservation {
    pub book_id: BookId,
    pub member_id: MemberId,
    pub requested_at: DateTime<Utc>,
}

/// コマンド：予約ステータスを変更する
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateReservationStatus {
    pub reservation_id: ReservationId,
    pub new_status: ReservationStatus,
    pub requested_at: DateTime<Utc>,
}

/// コマンド：予約をキャンセルする
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelReservation {
    pub reservation_id: ReservationId,
    pub requested_at: DateTime<Utc>,
}

/// コマンド：書籍をカタログに登録する
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterBook {
    pub book_id: BookId,
    pub registered_at: DateTime<Utc>,
}

/// コマンド：書籍ステータスを手動で変更する（管理操作）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeBookStatus {
    pub book_id: BookId,
    pub new_status: BookStatus,
    pub requested_at: DateTime<Utc>,
}
