use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{BookId, MemberId, ReturnError, TransactionId};

/// 標準貸出期間（日数）- dueDateが指定されない場合に使用
pub const LOAN_PERIOD_DAYS: i64 = 14;

/// 貸出トランザクションのステータス
///
/// Overdueは保存されず、due_dateとの比較から読み取り時に導出される。
/// ClaimedReturnedは旧システムが書き込んだデータとの互換のために保持する。
/// 終端ステータス（Returned, Damaged, Lost）から貸出中に戻ることはない。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    /// 貸出中
    CheckedOut,
    /// 延滞中（導出ステータス）
    Overdue,
    /// 返却済み
    Returned,
    /// 破損返却
    Damaged,
    /// 紛失
    Lost,
    /// 返却主張中（会員が返却済みと主張、未確認）
    ClaimedReturned,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::CheckedOut => "checked_out",
            TransactionStatus::Overdue => "overdue",
            TransactionStatus::Returned => "returned",
            TransactionStatus::Damaged => "damaged",
            TransactionStatus::Lost => "lost",
            TransactionStatus::ClaimedReturned => "claimed_returned",
        }
    }

    /// 貸出が未決済（書籍が会員の手元にある想定）か
    pub fn is_open(&self) -> bool {
        matches!(self, TransactionStatus::CheckedOut | TransactionStatus::Overdue)
    }
}

impl std::str::FromStr for TransactionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "checked_out" => Ok(TransactionStatus::CheckedOut),
            "overdue" => Ok(TransactionStatus::Overdue),
            "returned" => Ok(TransactionStatus::Returned),
            "damaged" => Ok(TransactionStatus::Damaged),
            "lost" => Ok(TransactionStatus::Lost),
            "claimed_returned" => Ok(TransactionStatus::ClaimedReturned),
            _ => Err(format!("Invalid transaction status: {}", s)),
        }
    }
}

impl std::fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 返却時の書籍の状態
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReturnCondition {
    Good,
    Damaged,
    Lost,
}

impl ReturnCondition {
    /// 返却条件から終端トランザクションステータスへの写像
    pub fn terminal_status(&self) -> TransactionStatus {
        match self {
            ReturnCondition::Good => TransactionStatus::Returned,
            ReturnCondition::Damaged => TransactionStatus::Damaged,
            ReturnCondition::Lost => TransactionStatus::Lost,
        }
    }
}

/// Transaction集約 - 1冊の書籍の1回の貸出記録
///
/// checkoutで作成され、returnでのみ変更される。決済後は不変の履歴となり、
/// 削除されることはない。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub transaction_id: TransactionId,

    // 他の集約への参照（IDのみ）
    pub book_id: BookId,
    pub member_id: MemberId,

    // 貸出管理の責務
    pub checked_out_at: DateTime<Utc>,
    pub due_date: DateTime<Utc>,
    pub returned_at: Option<DateTime<Utc>>,
    pub status: TransactionStatus,
    pub fine: Decimal,
    pub notes: Option<String>,

    // 監査情報
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// 純粋関数：貸出を開始する
///
/// ビジネスルール：
/// - 状態はCheckedOut
/// - 罰金は0から始まる
///
/// 副作用なし。新しいTransactionを返す。
pub fn open_loan(
    book_id: BookId,
    member_id: MemberId,
    checked_out_at: DateTime<Utc>,
    due_date: DateTime<Utc>,
) -> Transaction {
    Transaction {
        transaction_id: TransactionId::new(),
        book_id,
        member_id,
        checked_out_at,
        due_date,
        returned_at: None,
        status: TransactionStatus::CheckedOut,
        fine: Decimal::ZERO,
        notes: None,
        created_at: checked_out_at,
        updated_at: checked_out_at,
    }
}

/// 純粋関数：延滞を加味した実効ステータス
///
/// CheckedOutのままdue_dateを過ぎた貸出はOverdueとして読む。
/// 保存ステータスは書き換えない。
pub fn effective_status(transaction: &Transaction, now: DateTime<Utc>) -> TransactionStatus {
    if transaction.status == TransactionStatus::CheckedOut && now > transaction.due_date {
        TransactionStatus::Overdue
    } else {
        transaction.status
    }
}

/// 純粋関数：貸出を決済する（返却・破損・紛失）
///
/// ビジネスルール：
/// - 未決済（CheckedOut / Overdue）の貸出のみ受け付ける
/// - 返却条件が終端ステータスを決める（Good→Returned, Damaged→Damaged, Lost→Lost）
/// - 罰金は呼び出し側（FineCalculator）が計算して渡す
///
/// 副作用なし。決済済みの新しいTransactionを返す。
pub fn close_loan(
    transaction: &Transaction,
    condition: ReturnCondition,
    fine: Decimal,
    notes: Option<String>,
    returned_at: DateTime<Utc>,
) -> Result<Transaction, ReturnError> {
    if !transaction.status.is_open() {
        return Err(ReturnError::AlreadyClosed(transaction.status));
    }

    Ok(Transaction {
        returned_at: Some(returned_at),
        status: condition.terminal_status(),
        fine,
        notes,
        updated_at: returned_at,
        ..transaction.clone()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use rust_decimal_macros::dec;

    fn open_transaction() -> Transaction {
        let now = Utc::now();
        open_loan(
            BookId::new(),
            MemberId::new(),
            now,
            now + Duration::days(LOAN_PERIOD_DAYS),
        )
    }

    #[test]
    fn test_open_loan_starts_checked_out_with_zero_fine() {
        let transaction = open_transaction();
        assert_eq!(transaction.status, TransactionStatus::CheckedOut);
        assert_eq!(transaction.fine, Decimal::ZERO);
        assert_eq!(transaction.returned_at, None);
    }

    #[test]
    fn test_effective_status_within_due_date() {
        let transaction = open_transaction();
        let status = effective_status(&transaction, transaction.due_date);
        assert_eq!(status, TransactionStatus::CheckedOut);
    }

    #[test]
    fn test_effective_status_derives_overdue() {
        let transaction = open_transaction();
        let status = effective_status(&transaction, transaction.due_date + Duration::hours(1));
        assert_eq!(status, TransactionStatus::Overdue);

        // 保存ステータスは変わらない
        assert_eq!(transaction.status, TransactionStatus::CheckedOut);
    }

    #[test]
    fn test_close_loan_good_condition() {
        let transaction = open_transaction();
        let returned_at = transaction.checked_out_at + Duration::days(7);

        let closed = close_loan(
            &transaction,
            ReturnCondition::Good,
            Decimal::ZERO,
            None,
            returned_at,
        )
        .unwrap();

        assert_eq!(closed.status, TransactionStatus::Returned);
        assert_eq!(closed.returned_at, Some(returned_at));
    }

    #[test]
    fn test_close_loan_records_fine_and_notes() {
        let transaction = open_transaction();
        let returned_at = transaction.due_date + Duration::days(3);

        let closed = close_loan(
            &transaction,
            ReturnCondition::Damaged,
            dec!(16.50),
            Some("water damage on cover".to_string()),
            returned_at,
        )
        .unwrap();

        assert_eq!(closed.status, TransactionStatus::Damaged);
        assert_eq!(closed.fine, dec!(16.50));
        assert_eq!(closed.notes.as_deref(), Some("water damage on cover"));
    }

    #[test]
    fn test_close_loan_lost_condition() {
        let transaction = open_transaction();
        let closed = close_loan(
            &transaction,
            ReturnCondition::Lost,
            dec!(50.00),
            None,
            Utc::now(),
        )
        .unwrap();
        assert_eq!(closed.status, TransactionStatus::Lost);
    }

    #[test]
    fn test_close_loan_fails_when_already_closed() {
        let transaction = open_transaction();
        let closed = close_loan(
            &transaction,
            ReturnCondition::Good,
            Decimal::ZERO,
            None,
            Utc::now(),
        )
        .unwrap();

        let result = close_loan(&closed, ReturnCondition::Good, Decimal::ZERO, None, Utc::now());
        assert_eq!(
            result.unwrap_err(),
            ReturnError::AlreadyClosed(TransactionStatus::Returned)
        );
    }

    #[test]
    fn test_status_round_trips_through_str() {
        for status in [
            TransactionStatus::CheckedOut,
            TransactionStatus::Overdue,
            TransactionStatus::Returned,
            TransactionStatus::Damaged,
            TransactionStatus::Lost,
            TransactionStatus::ClaimedReturned,
        ] {
            let parsed: TransactionStatus = status.as_str().parse().unwrap();
            assert_eq!(parsed, status);
        }
    }
}
