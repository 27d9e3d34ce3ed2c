use chrono::{DateTime, Utc};

use crate::domain::{
    Book, BookStatus, Reservation, ReservationStatus, reservation,
    value_objects::{BookId, ReservationId},
};
use crate::ports::CirculationUow;

use super::errors::{CirculationError, Result};

/// キュー繰り上げの結果
///
/// NoneAvailableは昇格できる予約が存在しないことを示し、呼び出し側は
/// 書籍をAvailableに戻す。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromotionOutcome {
    Promoted(Reservation),
    NoneAvailable,
}

/// 書籍が空いたとき、次の予約をReadyForPickupに昇格させる
///
/// ビジネスルール：
/// - 対象はPendingの予約のみ、reserved_at昇順・sequence_no昇順（FIFO）
/// - 期限切れの待機予約は飛ばす（失効処理はexpire_reservationsの責務）
/// - excludeで指定された予約（いま解決中のもの）は対象外
///
/// 返却・キャンセル・ステータス更新・失効のすべての経路がこの1実装を
/// 呼ぶ。呼び出し側のuow内で実行され、単独ではコミットしない。
pub async fn promote_next(
    uow: &mut dyn CirculationUow,
    book_id: BookId,
    exclude: Option<ReservationId>,
    now: DateTime<Utc>,
) -> Result<PromotionOutcome> {
    let pending = uow
        .pending_reservations(book_id)
        .await
        .map_err(CirculationError::internal)?;

    for candidate in pending {
        if exclude == Some(candidate.reservation_id) {
            continue;
        }
        if candidate.expires_at < now {
            continue;
        }

        let promoted = reservation::transition(&candidate, ReservationStatus::ReadyForPickup, now)?;
        uow.update_reservation(&promoted)
            .await
            .map_err(CirculationError::internal)?;

        tracing::debug!(
            reservation_id = %promoted.reservation_id.value(),
            book_id = %book_id.value(),
            "reservation promoted to ready_for_pickup"
        );
        return Ok(PromotionOutcome::Promoted(promoted));
    }

    Ok(PromotionOutcome::NoneAvailable)
}

/// 予約を終端ステータスへ遷移させ、必要ならキューを繰り上げる
///
/// cancel / update / expireの各経路で共有されるカスケード処理。
///
/// 前提条件：呼び出し側は書籍の排他ロックを取得済みで、currentとbookは
/// ロック取得後に読み直した最新の状態であること。ロック前の読み取りで
/// 判定すると、並行する昇格・解決を取りこぼす。
///
/// 書籍を確保していた（ReadyForPickupだった）予約の解決後、書籍が
/// Reservedのままなら次の予約を昇格させ、昇格できなければAvailableに
/// 戻す。書籍が既にCheckedOutなど別の状態なら書籍には触れない。
pub(crate) async fn resolve_and_cascade(
    uow: &mut dyn CirculationUow,
    current: &Reservation,
    book: &Book,
    to: ReservationStatus,
    now: DateTime<Utc>,
) -> Result<(Reservation, Option<Reservation>)> {
    let was_holding_book = current.status == ReservationStatus::ReadyForPickup;

    let resolved = reservation::transition(current, to, now)?;
    uow.update_reservation(&resolved)
        .await
        .map_err(CirculationError::internal)?;

    if !was_holding_book || book.status != BookStatus::Reserved {
        return Ok((resolved, None));
    }

    match promote_next(uow, current.book_id, Some(current.reservation_id), now).await? {
        PromotionOutcome::Promoted(next) => Ok((resolved, Some(next))),
        PromotionOutcome::NoneAvailable => {
            uow.update_book_status(current.book_id, BookStatus::Available, now)
                .await
                .map_err(CirculationError::internal)?;
            Ok((resolved, None))
        }
    }
}
