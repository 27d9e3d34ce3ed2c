use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{BookId, BookStatusError};

/// 書籍ステータス
///
/// CheckedOutとReservedは循環エンジンのみが設定する（貸出・予約の状態から導かれる）。
/// Discardedは終端状態であり、いかなる遷移でも離れられない。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookStatus {
    /// 貸出可能
    Available,
    /// 貸出中
    CheckedOut,
    /// 予約確保中（次の予約者の受取待ち）
    Reserved,
    /// 紛失
    Lost,
    /// 破損
    Damaged,
    /// 整備中
    UnderMaintenance,
    /// 除籍済み（終端状態）
    Discarded,
}

impl BookStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookStatus::Available => "available",
            BookStatus::CheckedOut => "checked_out",
            BookStatus::Reserved => "reserved",
            BookStatus::Lost => "lost",
            BookStatus::Damaged => "damaged",
            BookStatus::UnderMaintenance => "under_maintenance",
            BookStatus::Discarded => "discarded",
        }
    }

    /// 循環エンジンが貸出・予約処理の中でのみ設定するステータスか
    pub fn is_circulation_managed(&self) -> bool {
        matches!(self, BookStatus::CheckedOut | BookStatus::Reserved)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, BookStatus::Discarded)
    }

    /// 全ステータスの一覧（集計レポート用）
    pub fn all() -> [BookStatus; 7] {
        [
            BookStatus::Available,
            BookStatus::CheckedOut,
            BookStatus::Reserved,
            BookStatus::Lost,
            BookStatus::Damaged,
            BookStatus::UnderMaintenance,
            BookStatus::Discarded,
        ]
    }
}

impl std::str::FromStr for BookStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "available" => Ok(BookStatus::Available),
            "checked_out" => Ok(BookStatus::CheckedOut),
            "reserved" => Ok(BookStatus::Reserved),
            "lost" => Ok(BookStatus::Lost),
            "damaged" => Ok(BookStatus::Damaged),
            "under_maintenance" => Ok(BookStatus::UnderMaintenance),
            "discarded" => Ok(BookStatus::Discarded),
            _ => Err(format!("Invalid book status: {}", s)),
        }
    }
}

impl std::fmt::Display for BookStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Book集約 - 蔵書1冊
///
/// ステータスの書き込みは循環エンジンのみが行う。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Book {
    pub book_id: BookId,
    pub status: BookStatus,

    // 監査情報
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// 純粋関数：書籍をカタログに登録する
///
/// 新規登録の書籍はAvailableで始まる。副作用なし。
pub fn register_book(book_id: BookId, registered_at: DateTime<Utc>) -> Book {
    Book {
        book_id,
        status: BookStatus::Available,
        created_at: registered_at,
        updated_at: registered_at,
    }
}

/// 純粋関数：書籍ステータスを手動で変更する（管理操作）
///
/// ビジネスルール：
/// - Discardedからの遷移は不可（終端状態）
/// - CheckedOut / Reservedへは手動で遷移できない（循環エンジン管理）
/// - CheckedOut / Reservedからは手動で遷移できない（返却・キャンセル経由のみ）
///
/// 副作用なし。新しいBookを返す。
pub fn change_status(
    book: &Book,
    new_status: BookStatus,
    changed_at: DateTime<Utc>,
) -> Result<Book, BookStatusError> {
    if book.status.is_terminal()
        || book.status.is_circulation_managed()
        || new_status.is_circulation_managed()
    {
        return Err(BookStatusError::InvalidTransition {
            from: book.status,
            to: new_status,
        });
    }

    Ok(Book {
        status: new_status,
        updated_at: changed_at,
        ..book.clone()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn available_book() -> Book {
        register_book(BookId::new(), Utc::now())
    }

    #[test]
    fn test_register_book_starts_available() {
        let book = available_book();
        assert_eq!(book.status, BookStatus::Available);
    }

    #[test]
    fn test_change_status_to_maintenance() {
        let book = available_book();
        let changed = change_status(&book, BookStatus::UnderMaintenance, Utc::now()).unwrap();
        assert_eq!(changed.status, BookStatus::UnderMaintenance);
    }

    #[test]
    fn test_change_status_discard_is_terminal() {
        let book = available_book();
        let discarded = change_status(&book, BookStatus::Discarded, Utc::now()).unwrap();

        let result = change_status(&discarded, BookStatus::Available, Utc::now());
        assert!(matches!(
            result,
            Err(BookStatusError::InvalidTransition {
                from: BookStatus::Discarded,
                ..
            })
        ));
    }

    #[test]
    fn test_change_status_rejects_circulation_managed_targets() {
        let book = available_book();
        for target in [BookStatus::CheckedOut, BookStatus::Reserved] {
            let result = change_status(&book, target, Utc::now());
            assert!(result.is_err());
        }
    }

    #[test]
    fn test_change_status_rejects_circulation_managed_sources() {
        let mut book = available_book();
        book.status = BookStatus::CheckedOut;

        let result = change_status(&book, BookStatus::Lost, Utc::now());
        assert!(result.is_err());
    }

    #[test]
    fn test_status_round_trips_through_str() {
        for status in BookStatus::all() {
            let parsed: BookStatus = status.as_str().parse().unwrap();
            assert_eq!(parsed, status);
        }
    }
}
