use std::future::Future;
use std::sync::Arc;

use crate::domain::{
    Book, BookStatus, FinePolicy, Reservation, ReservationStatus, ReturnCondition, Transaction,
    book, commands::*, reservation, transaction,
    value_objects::{BookId, ReservationId},
};
use crate::ports::{CirculationStore, CirculationUow, MembershipService};

use super::errors::{CirculationError, Result};
use super::queue::{self, PromotionOutcome};

/// サービスの依存関係
///
/// 関数型DDDの原則に従い、データ構造として定義。
/// 振る舞い（メソッド）は持たず、純粋な関数に依存関係を渡す。
///
/// ストアはbooks / transactions / reservationsの唯一の書き込み経路であり、
/// エンジン以外のコンポーネントがステータスを直接変更することはない。
#[derive(Clone)]
pub struct ServiceDependencies {
    pub store: Arc<dyn CirculationStore>,
    pub membership: Arc<dyn MembershipService>,
    pub fine_policy: FinePolicy,
}

/// 返却の結果：決済済みトランザクションと、昇格した予約（あれば）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReturnOutcome {
    pub transaction: Transaction,
    pub promoted: Option<Reservation>,
}

/// 予約解決の結果：解決された予約と、繰り上がった次の予約（あれば）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservationOutcome {
    pub reservation: Reservation,
    pub promoted: Option<Reservation>,
}

/// 一時的なストア競合に対して1回だけ自動リトライする
///
/// NotFound / Conflict / InvalidTransition / Validationは期待される結果
/// なのでリトライしない。2回目の失敗はそのまま呼び出し側へ返す。
async fn with_contention_retry<T, F, Fut>(operation: F) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    match operation().await {
        Err(err) if err.is_contention() => {
            tracing::warn!("storage contention detected, retrying once: {}", err);
            operation().await
        }
        other => other,
    }
}

/// 書籍を貸し出す
///
/// ビジネスルール：
/// - 会員が存在し、貸出資格があること（資格ポリシーはMembershipServiceの責務）
/// - 書籍がAvailableであること。ただしReservedの書籍は、ReadyForPickupの
///   予約を持つ本人に限り貸出可能で、その予約は同一トランザクション内で
///   Fulfilledになる（書籍ごとにReadyForPickupは高々1件の不変条件を保つ）
/// - 返却期限は貸出日より後であること
///
/// Transactionの作成とBook.statusの更新は1つのuowでアトミックに行われる。
pub async fn checkout(deps: &ServiceDependencies, cmd: Checkout) -> Result<Transaction> {
    with_contention_retry(|| execute_checkout(deps, cmd)).await
}

async fn execute_checkout(deps: &ServiceDependencies, cmd: Checkout) -> Result<Transaction> {
    // 1. 会員の存在・資格確認（予約キュー/台帳に触る前のゲート）
    let member_exists = deps
        .membership
        .exists(cmd.member_id)
        .await
        .map_err(CirculationError::internal)?;
    if !member_exists {
        return Err(CirculationError::not_found("member", cmd.member_id.value()));
    }

    let eligible = deps
        .membership
        .is_eligible(cmd.member_id)
        .await
        .map_err(CirculationError::internal)?;
    if !eligible {
        return Err(CirculationError::conflict("member is not eligible to borrow"));
    }

    // 2. 返却期限の妥当性
    if cmd.due_date <= cmd.requested_at {
        return Err(CirculationError::Validation("due_date"));
    }

    // 3. uowを開始し、最初に書籍の排他ロックを取る
    let mut uow = deps.store.begin().await.map_err(CirculationError::internal)?;
    let book = uow
        .lock_book(cmd.book_id)
        .await
        .map_err(CirculationError::internal)?
        .ok_or_else(|| CirculationError::not_found("book", cmd.book_id.value()))?;

    // 4. 貸出可能性の判定
    let held_reservation = match book.status {
        BookStatus::Available => None,
        BookStatus::Reserved => {
            let ready = uow
                .ready_reservation(cmd.book_id)
                .await
                .map_err(CirculationError::internal)?;
            match ready {
                Some(r) if r.member_id == cmd.member_id => Some(r),
                _ => {
                    return Err(CirculationError::conflict(
                        "book is reserved for another member",
                    ));
                }
            }
        }
        other => {
            return Err(CirculationError::conflict(format!(
                "book is not available for checkout (status: {})",
                other
            )));
        }
    };

    // 5. 貸出トランザクションを作成し、書籍をCheckedOutへ
    let loan = transaction::open_loan(cmd.book_id, cmd.member_id, cmd.requested_at, cmd.due_date);
    uow.insert_transaction(&loan)
        .await
        .map_err(CirculationError::internal)?;
    uow.update_book_status(cmd.book_id, BookStatus::CheckedOut, cmd.requested_at)
        .await
        .map_err(CirculationError::internal)?;

    // 6. 受取予約は同一スコープでFulfilledに遷移する
    if let Some(held) = held_reservation {
        let fulfilled =
            reservation::transition(&held, ReservationStatus::Fulfilled, cmd.requested_at)?;
        uow.update_reservation(&fulfilled)
            .await
            .map_err(CirculationError::internal)?;
    }

    uow.commit().await.map_err(CirculationError::internal)?;

    tracing::info!(
        transaction_id = %loan.transaction_id.value(),
        book_id = %cmd.book_id.value(),
        member_id = %cmd.member_id.value(),
        "book checked out"
    );
    Ok(loan)
}

/// 書籍を返却する
///
/// ビジネスルール：
/// - 未決済（CheckedOut / Overdue）のトランザクションのみ受け付ける
/// - 罰金はFineCalculator（純粋関数）で計算する
/// - 返却条件が書籍の行き先を決める：Good→Available、Damaged→Damaged、
///   Lost→Lost。ただしGoodの場合は先にキュー繰り上げを試み、昇格が
///   あればAvailableの代わりにReservedとする
/// - Damaged / Lostの返却では待機キューには触れない（確保する書籍が
///   存在しないため。扱いはプロダクト判断待ち）
///
/// Transaction・Book・（場合により）Reservationへの書き込みは1つのuowで
/// アトミックに行われ、途中で失敗すればすべてロールバックされる。
pub async fn return_item(deps: &ServiceDependencies, cmd: ReturnItem) -> Result<ReturnOutcome> {
    with_contention_retry(|| execute_return_item(deps, &cmd)).await
}

async fn execute_return_item(
    deps: &ServiceDependencies,
    cmd: &ReturnItem,
) -> Result<ReturnOutcome> {
    let mut uow = deps.store.begin().await.map_err(CirculationError::internal)?;

    // 最初の読み取りはbook_idを知るためだけに使う
    let loan = uow
        .transaction(cmd.transaction_id)
        .await
        .map_err(CirculationError::internal)?
        .ok_or_else(|| CirculationError::not_found("transaction", cmd.transaction_id.value()))?;

    // 書籍ステータスを書き換えるため、判定より先に排他ロックを取る
    uow.lock_book(loan.book_id)
        .await
        .map_err(CirculationError::internal)?
        .ok_or_else(|| CirculationError::not_found("book", loan.book_id.value()))?;

    // ロック獲得までに並行する返却が決済していることがあるため、
    // トランザクションはロック後に読み直してから判定する
    let loan = uow
        .transaction(cmd.transaction_id)
        .await
        .map_err(CirculationError::internal)?
        .ok_or_else(|| CirculationError::not_found("transaction", cmd.transaction_id.value()))?;

    if !loan.status.is_open() {
        return Err(CirculationError::conflict(format!(
            "transaction already closed (status: {})",
            loan.status
        )));
    }

    // 罰金計算は純粋関数。I/Oを挟まない
    let fine = deps
        .fine_policy
        .calculate(loan.due_date, cmd.returned_at, cmd.condition);

    let closed = transaction::close_loan(
        &loan,
        cmd.condition,
        fine,
        cmd.notes.clone(),
        cmd.returned_at,
    )?;
    uow.update_transaction(&closed)
        .await
        .map_err(CirculationError::internal)?;

    let (book_status, promoted) = match cmd.condition {
        ReturnCondition::Good => {
            match queue::promote_next(uow.as_mut(), loan.book_id, None, cmd.returned_at).await? {
                PromotionOutcome::Promoted(next) => (BookStatus::Reserved, Some(next)),
                PromotionOutcome::NoneAvailable => (BookStatus::Available, None),
            }
        }
        ReturnCondition::Damaged => (BookStatus::Damaged, None),
        ReturnCondition::Lost => (BookStatus::Lost, None),
    };

    uow.update_book_status(loan.book_id, book_status, cmd.returned_at)
        .await
        .map_err(CirculationError::internal)?;
    uow.commit().await.map_err(CirculationError::internal)?;

    tracing::info!(
        transaction_id = %closed.transaction_id.value(),
        book_id = %closed.book_id.value(),
        condition = ?cmd.condition,
        fine = %closed.fine,
        "book returned"
    );
    Ok(ReturnOutcome {
        transaction: closed,
        promoted,
    })
}

/// 予約を作成する
///
/// ビジネスルール：
/// - 会員が存在すること
/// - 書籍がCheckedOutまたはReservedであること。Availableの書籍は
///   そのまま借りられるため予約不可。非流通状態（Lost / Damaged /
///   UnderMaintenance / Discarded）も予約不可
/// - 同一会員が同一書籍に未解決の予約を複数持つことはできない
pub async fn place_reservation(
    deps: &ServiceDependencies,
    cmd: PlaceReservation,
) -> Result<Reservation> {
    with_contention_retry(|| execute_place_reservation(deps, cmd)).await
}

async fn execute_place_reservation(
    deps: &ServiceDependencies,
    cmd: PlaceReservation,
) -> Result<Reservation> {
    let member_exists = deps
        .membership
        .exists(cmd.member_id)
        .await
        .map_err(CirculationError::internal)?;
    if !member_exists {
        return Err(CirculationError::not_found("member", cmd.member_id.value()));
    }

    let mut uow = deps.store.begin().await.map_err(CirculationError::internal)?;
    let book = uow
        .lock_book(cmd.book_id)
        .await
        .map_err(CirculationError::internal)?
        .ok_or_else(|| CirculationError::not_found("book", cmd.book_id.value()))?;

    match book.status {
        BookStatus::CheckedOut | BookStatus::Reserved => {}
        BookStatus::Available => {
            return Err(CirculationError::conflict(
                "book is available; check it out instead of reserving",
            ));
        }
        other => {
            return Err(CirculationError::conflict(format!(
                "book is not circulating (status: {})",
                other
            )));
        }
    }

    let duplicate = uow
        .open_reservation_for_member(cmd.book_id, cmd.member_id)
        .await
        .map_err(CirculationError::internal)?;
    if duplicate.is_some() {
        return Err(CirculationError::conflict(
            "member already has an open reservation for this book",
        ));
    }

    let draft = reservation::place_reservation(cmd.book_id, cmd.member_id, cmd.requested_at);
    let stored = uow
        .insert_reservation(&draft)
        .await
        .map_err(CirculationError::internal)?;
    uow.commit().await.map_err(CirculationError::internal)?;

    tracing::info!(
        reservation_id = %stored.reservation_id.value(),
        book_id = %cmd.book_id.value(),
        member_id = %cmd.member_id.value(),
        "reservation placed"
    );
    Ok(stored)
}

/// 予約ステータスを変更する
///
/// ビジネスルール：
/// - 遷移は予約の状態機械で合法なものに限る
/// - ReadyForPickupへの昇格はキュー駆動のみ。手動要求はFIFO順序と
///   「ReadyForPickupは書籍ごとに高々1件」の不変条件を壊しうるため拒否する
/// - ReadyForPickup→Fulfilledは、同じ書籍+会員の未決済トランザクションが
///   存在する場合のみ許可する
/// - 書籍を確保していた予約の終端遷移はキュー繰り上げカスケードを起こす
pub async fn update_reservation_status(
    deps: &ServiceDependencies,
    cmd: UpdateReservationStatus,
) -> Result<ReservationOutcome> {
    with_contention_retry(|| execute_update_reservation_status(deps, cmd)).await
}

async fn execute_update_reservation_status(
    deps: &ServiceDependencies,
    cmd: UpdateReservationStatus,
) -> Result<ReservationOutcome> {
    if cmd.new_status == ReservationStatus::ReadyForPickup {
        return Err(CirculationError::conflict(
            "reservations are promoted from the queue, not set ready directly",
        ));
    }

    let mut uow = deps.store.begin().await.map_err(CirculationError::internal)?;

    // 予約の解決は書籍ステータスに影響しうるため、最初に書籍の排他
    // ロックを取り、予約はロック後に読み直した状態で判定する
    let (current, book) = locked_reservation(uow.as_mut(), cmd.reservation_id).await?;

    if cmd.new_status == ReservationStatus::Fulfilled {
        let open_loan = uow
            .active_transaction_for_book(current.book_id)
            .await
            .map_err(CirculationError::internal)?;
        let held_by_member =
            open_loan.is_some_and(|loan| loan.member_id == current.member_id);
        if !held_by_member {
            return Err(CirculationError::conflict(
                "fulfilment requires an open loan for the reserving member",
            ));
        }
    }

    let (resolved, promoted) = queue::resolve_and_cascade(
        uow.as_mut(),
        &current,
        &book,
        cmd.new_status,
        cmd.requested_at,
    )
    .await?;
    uow.commit().await.map_err(CirculationError::internal)?;

    Ok(ReservationOutcome {
        reservation: resolved,
        promoted,
    })
}

/// 予約を解決するための定型手順：予約からbook_idを引き、書籍の排他
/// ロックを取ってから予約を読み直す
///
/// ロック前に読んだ予約の状態は並行する昇格・解決で古くなっていること
/// があるため、返す予約は必ずロック後の読み直しとする。book_idは予約
/// 作成後に変わらないので、最初の読み取りをロック対象の特定に使える。
pub(super) async fn locked_reservation(
    uow: &mut dyn CirculationUow,
    reservation_id: ReservationId,
) -> Result<(Reservation, Book)> {
    let stale = uow
        .reservation(reservation_id)
        .await
        .map_err(CirculationError::internal)?
        .ok_or_else(|| CirculationError::not_found("reservation", reservation_id.value()))?;

    let book = uow
        .lock_book(stale.book_id)
        .await
        .map_err(CirculationError::internal)?
        .ok_or_else(|| CirculationError::not_found("book", stale.book_id.value()))?;

    let current = uow
        .reservation(reservation_id)
        .await
        .map_err(CirculationError::internal)?
        .ok_or_else(|| CirculationError::not_found("reservation", reservation_id.value()))?;

    Ok((current, book))
}

/// 予約をキャンセルする
///
/// ビジネスルール：
/// - 解決済み（Fulfilled / Cancelled / Expired）の予約はキャンセル不可
/// - 書籍を確保していた予約のキャンセルはキュー繰り上げカスケードを起こす
pub async fn cancel_reservation(
    deps: &ServiceDependencies,
    cmd: CancelReservation,
) -> Result<ReservationOutcome> {
    with_contention_retry(|| execute_cancel_reservation(deps, cmd)).await
}

async fn execute_cancel_reservation(
    deps: &ServiceDependencies,
    cmd: CancelReservation,
) -> Result<ReservationOutcome> {
    let mut uow = deps.store.begin().await.map_err(CirculationError::internal)?;
    let (current, book) = locked_reservation(uow.as_mut(), cmd.reservation_id).await?;

    if current.status.is_terminal() {
        return Err(CirculationError::conflict(format!(
            "reservation already resolved (status: {})",
            current.status
        )));
    }

    let (resolved, promoted) = queue::resolve_and_cascade(
        uow.as_mut(),
        &current,
        &book,
        ReservationStatus::Cancelled,
        cmd.requested_at,
    )
    .await?;
    uow.commit().await.map_err(CirculationError::internal)?;

    tracing::info!(
        reservation_id = %resolved.reservation_id.value(),
        "reservation cancelled"
    );
    Ok(ReservationOutcome {
        reservation: resolved,
        promoted,
    })
}

/// 書籍をカタログに登録する
pub async fn register_book(deps: &ServiceDependencies, cmd: RegisterBook) -> Result<Book> {
    let mut uow = deps.store.begin().await.map_err(CirculationError::internal)?;

    let existing = uow
        .lock_book(cmd.book_id)
        .await
        .map_err(CirculationError::internal)?;
    if existing.is_some() {
        return Err(CirculationError::conflict("book already registered"));
    }

    let new_book = book::register_book(cmd.book_id, cmd.registered_at);
    uow.insert_book(&new_book)
        .await
        .map_err(CirculationError::internal)?;
    uow.commit().await.map_err(CirculationError::internal)?;

    Ok(new_book)
}

/// 書籍ステータスを手動で変更する（管理操作）
///
/// 許可される遷移はドメイン層のchange_statusが決める。CheckedOut / Reserved
/// が関わる遷移は循環エンジンの専管なのでここでは扱わない。
pub async fn set_book_status(deps: &ServiceDependencies, cmd: ChangeBookStatus) -> Result<Book> {
    with_contention_retry(|| execute_set_book_status(deps, cmd)).await
}

async fn execute_set_book_status(
    deps: &ServiceDependencies,
    cmd: ChangeBookStatus,
) -> Result<Book> {
    let mut uow = deps.store.begin().await.map_err(CirculationError::internal)?;
    let current = uow
        .lock_book(cmd.book_id)
        .await
        .map_err(CirculationError::internal)?
        .ok_or_else(|| CirculationError::not_found("book", cmd.book_id.value()))?;

    let changed = book::change_status(&current, cmd.new_status, cmd.requested_at)?;
    uow.update_book_status(cmd.book_id, changed.status, cmd.requested_at)
        .await
        .map_err(CirculationError::internal)?;
    uow.commit().await.map_err(CirculationError::internal)?;

    Ok(changed)
}

/// 予約のキュー内順位を取得する（1始まり）
///
/// Pendingの予約のみを数える。ReadyForPickupの予約はキューを出ているため
/// 順位を持たない。
pub async fn queue_position(
    deps: &ServiceDependencies,
    book_id: BookId,
    reservation_id: ReservationId,
) -> Result<u32> {
    let snapshot = deps
        .store
        .queue_snapshot(book_id)
        .await
        .map_err(CirculationError::internal)?;

    let mut position = 0u32;
    for entry in snapshot {
        if entry.status != ReservationStatus::Pending {
            continue;
        }
        position += 1;
        if entry.reservation_id == reservation_id {
            return Ok(position);
        }
    }

    Err(CirculationError::not_found(
        "reservation",
        reservation_id.value(),
    ))
}
