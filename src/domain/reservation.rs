use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::{BookId, MemberId, ReservationId, ReservationTransitionError};

/// 予約の保持期間（日数）
///
/// 予約日からこの日数を過ぎた予約はexpire_reservationsバッチで失効する。
/// 昇格（ReadyForPickup）しても期限は延長されない。
pub const RESERVATION_HOLD_DAYS: i64 = 7;

/// 予約ステータス
///
/// PendingとReadyForPickupが非終端、残りは終端。
/// 書籍1冊につきReadyForPickupの予約は常に高々1件。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReservationStatus {
    /// キュー待機中
    Pending,
    /// 受取可能（書籍を確保済み）
    ReadyForPickup,
    /// 受取済み（貸出成立）
    Fulfilled,
    /// キャンセル済み
    Cancelled,
    /// 期限切れ
    Expired,
}

impl ReservationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationStatus::Pending => "pending",
            ReservationStatus::ReadyForPickup => "ready_for_pickup",
            ReservationStatus::Fulfilled => "fulfilled",
            ReservationStatus::Cancelled => "cancelled",
            ReservationStatus::Expired => "expired",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ReservationStatus::Fulfilled
                | ReservationStatus::Cancelled
                | ReservationStatus::Expired
        )
    }
}

impl std::str::FromStr for ReservationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ReservationStatus::Pending),
            "ready_for_pickup" => Ok(ReservationStatus::ReadyForPickup),
            "fulfilled" => Ok(ReservationStatus::Fulfilled),
            "cancelled" => Ok(ReservationStatus::Cancelled),
            "expired" => Ok(ReservationStatus::Expired),
            _ => Err(format!("Invalid reservation status: {}", s)),
        }
    }
}

impl std::fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 純粋関数：予約ステータスの遷移が合法か
///
/// 合法な遷移：
/// - Pending → ReadyForPickup（昇格）/ Cancelled / Expired
/// - ReadyForPickup → Fulfilled / Cancelled / Expired
///
/// 終端状態からの遷移、およびPending→Fulfilledの直接遷移は不可。
pub fn is_legal_transition(from: ReservationStatus, to: ReservationStatus) -> bool {
    use ReservationStatus::*;
    matches!(
        (from, to),
        (Pending, ReadyForPickup)
            | (Pending, Cancelled)
            | (Pending, Expired)
            | (ReadyForPickup, Fulfilled)
            | (ReadyForPickup, Cancelled)
            | (ReadyForPickup, Expired)
    )
}

/// Reservation集約 - 1冊の書籍に対する1会員の予約
///
/// キュー内の順序はreserved_at昇順、同時刻はsequence_no昇順で決定的。
/// sequence_noはストアが採番する。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub reservation_id: ReservationId,

    // 他の集約への参照（IDのみ）
    pub book_id: BookId,
    pub member_id: MemberId,

    // キュー管理の責務
    pub reserved_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub status: ReservationStatus,
    pub sequence_no: i64,

    // 監査情報
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// 純粋関数：予約を作成する
///
/// ビジネスルール：
/// - 状態はPendingから始まる
/// - 有効期限は予約日 + RESERVATION_HOLD_DAYS
///
/// sequence_noは0のプレースホルダで、永続化時にストアが採番する。
/// 副作用なし。新しいReservationを返す。
pub fn place_reservation(
    book_id: BookId,
    member_id: MemberId,
    reserved_at: DateTime<Utc>,
) -> Reservation {
    Reservation {
        reservation_id: ReservationId::new(),
        book_id,
        member_id,
        reserved_at,
        expires_at: reserved_at + Duration::days(RESERVATION_HOLD_DAYS),
        status: ReservationStatus::Pending,
        sequence_no: 0,
        created_at: reserved_at,
        updated_at: reserved_at,
    }
}

/// 純粋関数：予約ステータスを遷移させる
///
/// 状態機械で合法な遷移のみ受け付ける。不正な遷移はエラー。
/// 副作用なし。新しいReservationを返す。
pub fn transition(
    reservation: &Reservation,
    to: ReservationStatus,
    at: DateTime<Utc>,
) -> Result<Reservation, ReservationTransitionError> {
    if !is_legal_transition(reservation.status, to) {
        return Err(ReservationTransitionError::InvalidTransition {
            from: reservation.status,
            to,
        });
    }

    Ok(Reservation {
        status: to,
        updated_at: at,
        ..reservation.clone()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ReservationStatus::*;

    fn pending_reservation() -> Reservation {
        place_reservation(BookId::new(), MemberId::new(), Utc::now())
    }

    #[test]
    fn test_place_reservation_starts_pending() {
        let reservation = pending_reservation();
        assert_eq!(reservation.status, Pending);
        assert_eq!(
            reservation.expires_at,
            reservation.reserved_at + Duration::days(RESERVATION_HOLD_DAYS)
        );
    }

    #[test]
    fn test_legal_transitions() {
        for (from, to) in [
            (Pending, ReadyForPickup),
            (Pending, Cancelled),
            (Pending, Expired),
            (ReadyForPickup, Fulfilled),
            (ReadyForPickup, Cancelled),
            (ReadyForPickup, Expired),
        ] {
            assert!(is_legal_transition(from, to), "{} -> {}", from, to);
        }
    }

    #[test]
    fn test_pending_cannot_fulfil_directly() {
        assert!(!is_legal_transition(Pending, Fulfilled));
    }

    #[test]
    fn test_terminal_states_admit_no_transition() {
        for from in [Fulfilled, Cancelled, Expired] {
            for to in [Pending, ReadyForPickup, Fulfilled, Cancelled, Expired] {
                assert!(!is_legal_transition(from, to), "{} -> {}", from, to);
            }
        }
    }

    #[test]
    fn test_transition_promotes_pending() {
        let reservation = pending_reservation();
        let promoted = transition(&reservation, ReadyForPickup, Utc::now()).unwrap();
        assert_eq!(promoted.status, ReadyForPickup);
    }

    #[test]
    fn test_transition_rejects_illegal_move() {
        let reservation = pending_reservation();
        let result = transition(&reservation, Fulfilled, Utc::now());
        assert_eq!(
            result.unwrap_err(),
            ReservationTransitionError::InvalidTransition {
                from: Pending,
                to: Fulfilled,
            }
        );
    }

    #[test]
    fn test_status_round_trips_through_str() {
        for status in [Pending, ReadyForPickup, Fulfilled, Cancelled, Expired] {
            let parsed: ReservationStatus = status.as_str().parse().unwrap();
            assert_eq!(parsed, status);
        }
    }
}
