use chrono::{DateTime, Utc};

use crate::domain::{ReservationStatus, value_objects::ReservationId};
use crate::ports::{CirculationStore, CirculationUow};

use super::engine::{ServiceDependencies, locked_reservation};
use super::errors::{CirculationError, Result};
use super::queue;

/// 失効バッチにおける1予約の処理結果
#[derive(Debug)]
pub enum ExpiryOutcome {
    /// 失効させた。書籍を確保していた場合は繰り上がった予約のID付き
    Expired {
        reservation_id: ReservationId,
        promoted: Option<ReservationId>,
    },
    /// 候補抽出後に他の操作が先に解決していたため何もしなかった
    Skipped { reservation_id: ReservationId },
    /// この予約の処理に失敗した（他の予約の処理は継続される）
    Failed {
        reservation_id: ReservationId,
        error: CirculationError,
    },
}

/// 期限切れ予約の失効バッチ
///
/// 外部スケジューラから定期的に呼ばれる。expires_at < now かつ
/// Pending / ReadyForPickupの予約を対象とする。
///
/// 各予約は独立した冪等なuowで処理される：
/// - 1件の失敗がバッチ全体を中断することはない
/// - 同じnowで2回実行しても結果の状態は1回実行と同じ
/// - 他のエンジン操作と並行して実行しても安全（予約ごとに
///   トランザクショナルなため）
///
/// 結果は予約ごとの成功/失敗レポート。
pub async fn expire_reservations(
    deps: &ServiceDependencies,
    now: DateTime<Utc>,
) -> Result<Vec<ExpiryOutcome>> {
    let candidates = deps
        .store
        .expiry_candidates(now)
        .await
        .map_err(CirculationError::internal)?;

    let mut outcomes = Vec::with_capacity(candidates.len());
    for reservation_id in candidates {
        let outcome = match expire_one(deps, reservation_id, now).await {
            Ok(outcome) => outcome,
            Err(error) => {
                tracing::warn!(
                    reservation_id = %reservation_id.value(),
                    "failed to expire reservation: {}",
                    error
                );
                ExpiryOutcome::Failed {
                    reservation_id,
                    error,
                }
            }
        };
        outcomes.push(outcome);
    }

    Ok(outcomes)
}

/// 1件の予約を失効させる
///
/// 候補抽出から処理までの間に状態が変わっていれば何もしない（冪等性）。
async fn expire_one(
    deps: &ServiceDependencies,
    reservation_id: ReservationId,
    now: DateTime<Utc>,
) -> Result<ExpiryOutcome> {
    let mut uow = deps.store.begin().await.map_err(CirculationError::internal)?;
    let (current, book) = locked_reservation(uow.as_mut(), reservation_id).await?;

    if current.status.is_terminal() || current.expires_at >= now {
        return Ok(ExpiryOutcome::Skipped { reservation_id });
    }

    let (_, promoted) = queue::resolve_and_cascade(
        uow.as_mut(),
        &current,
        &book,
        ReservationStatus::Expired,
        now,
    )
    .await?;
    uow.commit().await.map_err(CirculationError::internal)?;

    Ok(ExpiryOutcome::Expired {
        reservation_id,
        promoted: promoted.map(|r| r.reservation_id),
    })
}
