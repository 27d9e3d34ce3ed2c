mod common;

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;

use library_circulation::adapters::memory::MemoryStore;
use library_circulation::application::circulation::{
    CirculationError, ExpiryOutcome, ServiceDependencies, cancel_reservation, expire_reservations,
    place_reservation, return_item,
};
use library_circulation::domain::commands::{CancelReservation, PlaceReservation, ReturnItem};
use library_circulation::domain::value_objects::{BookId, MemberId, ReservationId, TransactionId};
use library_circulation::domain::{
    Book, BookStatus, Reservation, ReservationStatus, ReturnCondition, Transaction,
    TransactionStatus,
};
use library_circulation::ports::store::{CirculationStore, CirculationUow, Result};

use common::{checkout_at, checkout_now, register_member, seed_available_book, setup};

async fn reserve_at(
    ctx: &common::TestContext,
    book_id: BookId,
    member_id: MemberId,
    requested_at: DateTime<Utc>,
) -> Reservation {
    place_reservation(
        &ctx.deps,
        PlaceReservation {
            book_id,
            member_id,
            requested_at,
        },
    )
    .await
    .expect("place_reservation should succeed")
}

// ============================================================================
// ロック前の読み取りが古いスナップショットを返すストア
// ============================================================================

/// 仕込んだスナップショットを最初に一致した読み取りで1回だけ返し、
/// 以降は内側のストアへ委譲するラッパー
///
/// PostgreSQL実装のREAD COMMITTEDでは、行ロックを取る前の読み取りが
/// 並行コミット済みの決済・昇格を反映していないことがある。その状況を
/// インメモリストアの上で再現する。
struct StaleReadStore {
    inner: Arc<MemoryStore>,
    stale_transaction: Mutex<Option<Transaction>>,
    stale_reservation: Mutex<Option<Reservation>>,
}

impl StaleReadStore {
    fn with_stale_transaction(inner: Arc<MemoryStore>, stale: Transaction) -> Self {
        Self {
            inner,
            stale_transaction: Mutex::new(Some(stale)),
            stale_reservation: Mutex::new(None),
        }
    }

    fn with_stale_reservation(inner: Arc<MemoryStore>, stale: Reservation) -> Self {
        Self {
            inner,
            stale_transaction: Mutex::new(None),
            stale_reservation: Mutex::new(Some(stale)),
        }
    }
}

#[async_trait]
impl CirculationStore for StaleReadStore {
    async fn begin(&self) -> Result<Box<dyn CirculationUow>> {
        let inner = self.inner.begin().await?;
        Ok(Box::new(StaleReadUow {
            inner,
            stale_transaction: self.stale_transaction.lock().unwrap().take(),
            stale_reservation: self.stale_reservation.lock().unwrap().take(),
        }))
    }

    async fn book(&self, book_id: BookId) -> Result<Option<Book>> {
        self.inner.book(book_id).await
    }

    async fn transaction(&self, transaction_id: TransactionId) -> Result<Option<Transaction>> {
        self.inner.transaction(transaction_id).await
    }

    async fn reservation(&self, reservation_id: ReservationId) -> Result<Option<Reservation>> {
        self.inner.reservation(reservation_id).await
    }

    async fn count_books_by_status(&self) -> Result<Vec<(BookStatus, u64)>> {
        self.inner.count_books_by_status().await
    }

    async fn transactions_in_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Transaction>> {
        self.inner.transactions_in_range(start, end).await
    }

    async fn active_transaction_for_book(&self, book_id: BookId) -> Result<Option<Transaction>> {
        self.inner.active_transaction_for_book(book_id).await
    }

    async fn active_transaction_count_for_member(&self, member_id: MemberId) -> Result<u64> {
        self.inner.active_transaction_count_for_member(member_id).await
    }

    async fn queue_snapshot(&self, book_id: BookId) -> Result<Vec<Reservation>> {
        self.inner.queue_snapshot(book_id).await
    }

    async fn expiry_candidates(&self, now: DateTime<Utc>) -> Result<Vec<ReservationId>> {
        self.inner.expiry_candidates(now).await
    }
}

struct StaleReadUow {
    inner: Box<dyn CirculationUow>,
    stale_transaction: Option<Transaction>,
    stale_reservation: Option<Reservation>,
}

#[async_trait]
impl CirculationUow for StaleReadUow {
    async fn lock_book(&mut self, book_id: BookId) -> Result<Option<Book>> {
        self.inner.lock_book(book_id).await
    }

    async fn insert_book(&mut self, book: &Book) -> Result<()> {
        self.inner.insert_book(book).await
    }

    async fn update_book_status(
        &mut self,
        book_id: BookId,
        status: BookStatus,
        updated_at: DateTime<Utc>,
    ) -> Result<()> {
        self.inner.update_book_status(book_id, status, updated_at).await
    }

    async fn transaction(
        &mut self,
        transaction_id: TransactionId,
    ) -> Result<Option<Transaction>> {
        if self
            .stale_transaction
            .as_ref()
            .is_some_and(|t| t.transaction_id == transaction_id)
        {
            return Ok(self.stale_transaction.take());
        }
        self.inner.transaction(transaction_id).await
    }

    async fn insert_transaction(&mut self, transaction: &Transaction) -> Result<()> {
        self.inner.insert_transaction(transaction).await
    }

    async fn update_transaction(&mut self, transaction: &Transaction) -> Result<()> {
        self.inner.update_transaction(transaction).await
    }

    async fn active_transaction_for_book(
        &mut self,
        book_id: BookId,
    ) -> Result<Option<Transaction>> {
        self.inner.active_transaction_for_book(book_id).await
    }

    async fn reservation(
        &mut self,
        reservation_id: ReservationId,
    ) -> Result<Option<Reservation>> {
        if self
            .stale_reservation
            .as_ref()
            .is_some_and(|r| r.reservation_id == reservation_id)
        {
            return Ok(self.stale_reservation.take());
        }
        self.inner.reservation(reservation_id).await
    }

    async fn insert_reservation(&mut self, reservation: &Reservation) -> Result<Reservation> {
        self.inner.insert_reservation(reservation).await
    }

    async fn update_reservation(&mut self, reservation: &Reservation) -> Result<()> {
        self.inner.update_reservation(reservation).await
    }

    async fn pending_reservations(&mut self, book_id: BookId) -> Result<Vec<Reservation>> {
        self.inner.pending_reservations(book_id).await
    }

    async fn ready_reservation(&mut self, book_id: BookId) -> Result<Option<Reservation>> {
        self.inner.ready_reservation(book_id).await
    }

    async fn open_reservation_for_member(
        &mut self,
        book_id: BookId,
        member_id: MemberId,
    ) -> Result<Option<Reservation>> {
        self.inner.open_reservation_for_member(book_id, member_id).await
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.inner.commit().await
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.inner.rollback().await
    }
}

#[tokio::test]
async fn test_return_conflicts_when_loan_was_settled_before_lock() {
    let ctx = setup();
    let member_id = register_member(&ctx);
    let book_id = seed_available_book(&ctx).await;
    let loan = checkout_now(&ctx, book_id, member_id).await;

    // 先行する返却が期日内にGoodで決済を終えている
    let settled_at = loan.due_date - Duration::days(1);
    return_item(
        &ctx.deps,
        ReturnItem {
            transaction_id: loan.transaction_id,
            condition: ReturnCondition::Good,
            notes: None,
            returned_at: settled_at,
        },
    )
    .await
    .expect("first return should succeed");

    // 2本目の返却はロック前の読み取りで決済前（CheckedOut）の貸出を見る
    let store = Arc::new(StaleReadStore::with_stale_transaction(
        ctx.store.clone(),
        loan.clone(),
    ));
    let deps = ServiceDependencies {
        store,
        ..ctx.deps.clone()
    };

    let result = return_item(
        &deps,
        ReturnItem {
            transaction_id: loan.transaction_id,
            condition: ReturnCondition::Damaged,
            notes: Some("torn pages".to_string()),
            returned_at: loan.due_date + Duration::days(5),
        },
    )
    .await;
    assert!(matches!(result, Err(CirculationError::Conflict(_))));

    // 決済済みの履歴は書き換えられていない
    let stored = ctx
        .store
        .transaction(loan.transaction_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, TransactionStatus::Returned);
    assert_eq!(stored.fine, Decimal::ZERO);
    assert_eq!(stored.returned_at, Some(settled_at));

    let book = ctx.store.book(book_id).await.unwrap().unwrap();
    assert_eq!(book.status, BookStatus::Available);
}

#[tokio::test]
async fn test_cancel_cascades_when_reservation_was_promoted_before_lock() {
    let ctx = setup();
    let member_a = register_member(&ctx);
    let member_b = register_member(&ctx);
    let member_c = register_member(&ctx);
    let book_id = seed_available_book(&ctx).await;
    let loan = checkout_now(&ctx, book_id, member_a).await;

    let r1 = reserve_at(&ctx, book_id, member_b, Utc::now()).await;
    let r2 = reserve_at(&ctx, book_id, member_c, Utc::now()).await;

    // 並行する返却がR1をReadyForPickupへ昇格させ、書籍をReservedにする
    return_item(
        &ctx.deps,
        ReturnItem {
            transaction_id: loan.transaction_id,
            condition: ReturnCondition::Good,
            notes: None,
            returned_at: Utc::now(),
        },
    )
    .await
    .expect("return should succeed");

    // キャンセルはロック前の読み取りで昇格前（Pending）のR1を見る
    let store = Arc::new(StaleReadStore::with_stale_reservation(
        ctx.store.clone(),
        r1.clone(),
    ));
    let deps = ServiceDependencies {
        store,
        ..ctx.deps.clone()
    };

    let outcome = cancel_reservation(
        &deps,
        CancelReservation {
            reservation_id: r1.reservation_id,
            requested_at: Utc::now(),
        },
    )
    .await
    .unwrap();

    // ロック後の読み直しに基づき、書籍を確保していた予約として解決される
    assert_eq!(outcome.reservation.status, ReservationStatus::Cancelled);
    let next = outcome.promoted.expect("next reservation should be promoted");
    assert_eq!(next.reservation_id, r2.reservation_id);

    let r2_stored = ctx
        .store
        .reservation(r2.reservation_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(r2_stored.status, ReservationStatus::ReadyForPickup);
    let book = ctx.store.book(book_id).await.unwrap().unwrap();
    assert_eq!(book.status, BookStatus::Reserved);
}

// ============================================================================
// 書き込み障害を注入するストア
// ============================================================================

/// 特定の予約への書き込みだけが失敗するラッパー
///
/// extra_candidateで任意の予約IDを失効候補に混ぜられる（候補抽出後に
/// 他の操作が先に解決したケースの再現用）。
struct WriteFaultStore {
    inner: Arc<MemoryStore>,
    fail_update_for: ReservationId,
    extra_candidate: Option<ReservationId>,
}

#[async_trait]
impl CirculationStore for WriteFaultStore {
    async fn begin(&self) -> Result<Box<dyn CirculationUow>> {
        let inner = self.inner.begin().await?;
        Ok(Box::new(WriteFaultUow {
            inner,
            fail_update_for: self.fail_update_for,
        }))
    }

    async fn book(&self, book_id: BookId) -> Result<Option<Book>> {
        self.inner.book(book_id).await
    }

    async fn transaction(&self, transaction_id: TransactionId) -> Result<Option<Transaction>> {
        self.inner.transaction(transaction_id).await
    }

    async fn reservation(&self, reservation_id: ReservationId) -> Result<Option<Reservation>> {
        self.inner.reservation(reservation_id).await
    }

    async fn count_books_by_status(&self) -> Result<Vec<(BookStatus, u64)>> {
        self.inner.count_books_by_status().await
    }

    async fn transactions_in_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Transaction>> {
        self.inner.transactions_in_range(start, end).await
    }

    async fn active_transaction_for_book(&self, book_id: BookId) -> Result<Option<Transaction>> {
        self.inner.active_transaction_for_book(book_id).await
    }

    async fn active_transaction_count_for_member(&self, member_id: MemberId) -> Result<u64> {
        self.inner.active_transaction_count_for_member(member_id).await
    }

    async fn queue_snapshot(&self, book_id: BookId) -> Result<Vec<Reservation>> {
        self.inner.queue_snapshot(book_id).await
    }

    async fn expiry_candidates(&self, now: DateTime<Utc>) -> Result<Vec<ReservationId>> {
        let mut candidates = self.inner.expiry_candidates(now).await?;
        candidates.extend(self.extra_candidate);
        Ok(candidates)
    }
}

struct WriteFaultUow {
    inner: Box<dyn CirculationUow>,
    fail_update_for: ReservationId,
}

#[async_trait]
impl CirculationUow for WriteFaultUow {
    async fn lock_book(&mut self, book_id: BookId) -> Result<Option<Book>> {
        self.inner.lock_book(book_id).await
    }

    async fn insert_book(&mut self, book: &Book) -> Result<()> {
        self.inner.insert_book(book).await
    }

    async fn update_book_status(
        &mut self,
        book_id: BookId,
        status: BookStatus,
        updated_at: DateTime<Utc>,
    ) -> Result<()> {
        self.inner.update_book_status(book_id, status, updated_at).await
    }

    async fn transaction(
        &mut self,
        transaction_id: TransactionId,
    ) -> Result<Option<Transaction>> {
        self.inner.transaction(transaction_id).await
    }

    async fn insert_transaction(&mut self, transaction: &Transaction) -> Result<()> {
        self.inner.insert_transaction(transaction).await
    }

    async fn update_transaction(&mut self, transaction: &Transaction) -> Result<()> {
        self.inner.update_transaction(transaction).await
    }

    async fn active_transaction_for_book(
        &mut self,
        book_id: BookId,
    ) -> Result<Option<Transaction>> {
        self.inner.active_transaction_for_book(book_id).await
    }

    async fn reservation(
        &mut self,
        reservation_id: ReservationId,
    ) -> Result<Option<Reservation>> {
        self.inner.reservation(reservation_id).await
    }

    async fn insert_reservation(&mut self, reservation: &Reservation) -> Result<Reservation> {
        self.inner.insert_reservation(reservation).await
    }

    async fn update_reservation(&mut self, reservation: &Reservation) -> Result<()> {
        if reservation.reservation_id == self.fail_update_for {
            return Err("simulated storage write failure".into());
        }
        self.inner.update_reservation(reservation).await
    }

    async fn pending_reservations(&mut self, book_id: BookId) -> Result<Vec<Reservation>> {
        self.inner.pending_reservations(book_id).await
    }

    async fn ready_reservation(&mut self, book_id: BookId) -> Result<Option<Reservation>> {
        self.inner.ready_reservation(book_id).await
    }

    async fn open_reservation_for_member(
        &mut self,
        book_id: BookId,
        member_id: MemberId,
    ) -> Result<Option<Reservation>> {
        self.inner.open_reservation_for_member(book_id, member_id).await
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.inner.commit().await
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.inner.rollback().await
    }
}

#[tokio::test]
async fn test_expiry_sweep_survives_single_write_failure() {
    let ctx = setup();
    let member_a = register_member(&ctx);
    let member_b = register_member(&ctx);
    let member_c = register_member(&ctx);
    let member_d = register_member(&ctx);
    let member_e = register_member(&ctx);
    let member_f = register_member(&ctx);

    // 期限切れのPendingを2冊分つくる。r_failの書き込みだけ失敗させる
    let t0 = Utc::now() - Duration::days(10);
    let book1 = seed_available_book(&ctx).await;
    checkout_at(&ctx, book1, member_a, t0).await;
    let r_fail = reserve_at(&ctx, book1, member_b, t0 + Duration::days(1)).await;

    let book2 = seed_available_book(&ctx).await;
    checkout_at(&ctx, book2, member_c, t0).await;
    let r_ok = reserve_at(&ctx, book2, member_d, t0 + Duration::days(1)).await;

    // 候補抽出後に他の操作が解決してしまったケース：解決済みの予約を
    // 候補に混ぜる
    let book3 = seed_available_book(&ctx).await;
    checkout_now(&ctx, book3, member_e).await;
    let r_done = reserve_at(&ctx, book3, member_f, Utc::now()).await;
    cancel_reservation(
        &ctx.deps,
        CancelReservation {
            reservation_id: r_done.reservation_id,
            requested_at: Utc::now(),
        },
    )
    .await
    .unwrap();

    let store = Arc::new(WriteFaultStore {
        inner: ctx.store.clone(),
        fail_update_for: r_fail.reservation_id,
        extra_candidate: Some(r_done.reservation_id),
    });
    let deps = ServiceDependencies {
        store,
        ..ctx.deps.clone()
    };

    let outcomes = expire_reservations(&deps, Utc::now()).await.unwrap();
    assert_eq!(outcomes.len(), 3);

    let mut expired = Vec::new();
    let mut skipped = Vec::new();
    let mut failed = Vec::new();
    for outcome in &outcomes {
        match outcome {
            ExpiryOutcome::Expired { reservation_id, .. } => expired.push(*reservation_id),
            ExpiryOutcome::Skipped { reservation_id } => skipped.push(*reservation_id),
            ExpiryOutcome::Failed { reservation_id, .. } => failed.push(*reservation_id),
        }
    }

    // 1件の書き込み失敗が残りの候補の処理を止めない
    assert_eq!(failed, vec![r_fail.reservation_id]);
    assert_eq!(expired, vec![r_ok.reservation_id]);
    assert_eq!(skipped, vec![r_done.reservation_id]);

    // 失敗した予約のuowはロールバックされ、Pendingのまま残る
    let r_fail_stored = ctx
        .store
        .reservation(r_fail.reservation_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(r_fail_stored.status, ReservationStatus::Pending);

    let r_ok_stored = ctx
        .store
        .reservation(r_ok.reservation_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(r_ok_stored.status, ReservationStatus::Expired);
}
