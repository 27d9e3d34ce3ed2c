use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::{
    Book, Reservation, ReservationStatus, ReturnCondition, Transaction, TransactionStatus,
};

// ============================================================================
// Book
// ============================================================================

/// 書籍登録リクエスト（POST /books）
///
/// book_idを省略した場合はサーバー側で採番する。
#[derive(Debug, Deserialize)]
pub struct RegisterBookRequest {
    pub book_id: Option<Uuid>,
}

/// 書籍ステータス変更リクエスト（POST /books/:id/status）
#[derive(Debug, Deserialize)]
pub struct ChangeBookStatusRequest {
    pub status: String,
}

/// 書籍レスポンス
#[derive(Debug, Serialize)]
pub struct BookResponse {
    pub book_id: Uuid,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Book> for BookResponse {
    fn from(book: Book) -> Self {
        Self {
            book_id: book.book_id.value(),
            status: book.status.as_str().to_string(),
            created_at: book.created_at,
            updated_at: book.updated_at,
        }
    }
}

// ============================================================================
// Transaction (loan)
// ============================================================================

/// 貸出リクエスト（POST /loans）
///
/// due_dateを省略した場合は貸出日から14日後となる。
#[derive(Debug, Deserialize)]
pub struct CheckoutRequest {
    pub book_id: Uuid,
    pub member_id: Uuid,
    pub due_date: Option<DateTime<Utc>>,
}

/// 返却リクエスト（POST /loans/:id/return）
#[derive(Debug, Deserialize)]
pub struct ReturnRequest {
    pub condition: ReturnCondition,
    pub notes: Option<String>,
}

/// 貸出トランザクションレスポンス
///
/// statusは延滞を加味した実効ステータス（CheckedOutのまま期限を過ぎた
/// 貸出はoverdueとして返る）。
#[derive(Debug, Serialize)]
pub struct TransactionResponse {
    pub transaction_id: Uuid,
    pub book_id: Uuid,
    pub member_id: Uuid,
    pub checked_out_at: DateTime<Utc>,
    pub due_date: DateTime<Utc>,
    pub returned_at: Option<DateTime<Utc>>,
    pub status: String,
    pub fine: Decimal,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TransactionResponse {
    pub fn new(transaction: Transaction, effective_status: TransactionStatus) -> Self {
        Self {
            transaction_id: transaction.transaction_id.value(),
            book_id: transaction.book_id.value(),
            member_id: transaction.member_id.value(),
            checked_out_at: transaction.checked_out_at,
            due_date: transaction.due_date,
            returned_at: transaction.returned_at,
            status: effective_status.as_str().to_string(),
            fine: transaction.fine,
            notes: transaction.notes,
            created_at: transaction.created_at,
            updated_at: transaction.updated_at,
        }
    }
}

/// 返却レスポンス（POST /loans/:id/return）
#[derive(Debug, Serialize)]
pub struct ReturnResponse {
    pub transaction: TransactionResponse,
    /// 返却によりキューから繰り上がった予約（あれば）
    pub promoted: Option<ReservationResponse>,
}

// ============================================================================
// Reservation
// ============================================================================

/// 予約作成リクエスト（POST /reservations）
#[derive(Debug, Deserialize)]
pub struct PlaceReservationRequest {
    pub book_id: Uuid,
    pub member_id: Uuid,
}

/// 予約ステータス変更リクエスト（POST /reservations/:id/status）
#[derive(Debug, Deserialize)]
pub struct UpdateReservationStatusRequest {
    pub status: String,
}

/// 予約レスポンス
#[derive(Debug, Serialize)]
pub struct ReservationResponse {
    pub reservation_id: Uuid,
    pub book_id: Uuid,
    pub member_id: Uuid,
    pub reserved_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Reservation> for ReservationResponse {
    fn from(reservation: Reservation) -> Self {
        Self {
            reservation_id: reservation.reservation_id.value(),
            book_id: reservation.book_id.value(),
            member_id: reservation.member_id.value(),
            reserved_at: reservation.reserved_at,
            expires_at: reservation.expires_at,
            status: reservation.status.as_str().to_string(),
            created_at: reservation.created_at,
            updated_at: reservation.updated_at,
        }
    }
}

/// 予約解決レスポンス（cancel / status変更）
#[derive(Debug, Serialize)]
pub struct ReservationOutcomeResponse {
    pub reservation: ReservationResponse,
    /// 解決によりキューから繰り上がった予約（あれば）
    pub promoted: Option<ReservationResponse>,
}

/// キュー内順位レスポンス（GET /reservations/:id/position）
#[derive(Debug, Serialize)]
pub struct QueuePositionResponse {
    pub reservation_id: Uuid,
    pub book_id: Uuid,
    /// 待機キュー内の1始まりの順位
    pub position: u32,
}

/// キュー内の1エントリ（GET /books/:id/queue）
#[derive(Debug, Serialize)]
pub struct QueueEntryResponse {
    pub reservation_id: Uuid,
    pub member_id: Uuid,
    pub status: String,
    pub expires_at: DateTime<Utc>,
    /// Pendingの予約のみが持つ1始まりの順位。ReadyForPickupはキュー外
    pub position: Option<u32>,
}

/// キュースナップショットレスポンス
#[derive(Debug, Serialize)]
pub struct QueueResponse {
    pub book_id: Uuid,
    pub entries: Vec<QueueEntryResponse>,
}

impl QueueResponse {
    pub fn from_snapshot(book_id: Uuid, snapshot: Vec<Reservation>) -> Self {
        let mut position = 0u32;
        let entries = snapshot
            .into_iter()
            .map(|reservation| {
                let entry_position = if reservation.status == ReservationStatus::Pending {
                    position += 1;
                    Some(position)
                } else {
                    None
                };
                QueueEntryResponse {
                    reservation_id: reservation.reservation_id.value(),
                    member_id: reservation.member_id.value(),
                    status: reservation.status.as_str().to_string(),
                    expires_at: reservation.expires_at,
                    position: entry_position,
                }
            })
            .collect();
        Self { book_id, entries }
    }
}

// ============================================================================
// Reports / maintenance
// ============================================================================

/// 書籍ステータス別冊数（GET /reports/book-status）
#[derive(Debug, Serialize)]
pub struct BookStatusCountResponse {
    pub status: String,
    pub count: u64,
}

/// 期間指定のクエリパラメータ（GET /reports/transactions）
#[derive(Debug, Deserialize)]
pub struct TransactionsReportQuery {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// 失効バッチの実行結果（POST /maintenance/expire-reservations）
#[derive(Debug, Serialize)]
pub struct ExpiryReportResponse {
    /// 失効した予約のID
    pub expired: Vec<Uuid>,
    /// 候補抽出後に状態が変わっていたためスキップした件数
    pub skipped: usize,
    /// 処理に失敗した件数（詳細はログ）
    pub failed: usize,
}

// ============================================================================
// Errors
// ============================================================================

/// エラーレスポンス
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
        }
    }
}
