use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::domain::{
    Book, BookStatus, Reservation, ReservationStatus, Transaction,
    value_objects::{BookId, MemberId, ReservationId, TransactionId},
};
use crate::ports::store::{CirculationStore, CirculationUow, Result};

/// 3リレーションのインメモリ状態
#[derive(Debug, Default, Clone)]
struct StoreState {
    books: HashMap<BookId, Book>,
    transactions: HashMap<TransactionId, Transaction>,
    reservations: HashMap<ReservationId, Reservation>,
    next_sequence_no: i64,
}

impl StoreState {
    /// Pendingの予約をキュー順（reserved_at昇順、sequence_no昇順）で返す
    fn pending_queue(&self, book_id: BookId) -> Vec<Reservation> {
        let mut pending: Vec<Reservation> = self
            .reservations
            .values()
            .filter(|r| r.book_id == book_id && r.status == ReservationStatus::Pending)
            .cloned()
            .collect();
        pending.sort_by_key(|r| (r.reserved_at, r.sequence_no));
        pending
    }

    fn ready_reservation(&self, book_id: BookId) -> Option<Reservation> {
        self.reservations
            .values()
            .find(|r| r.book_id == book_id && r.status == ReservationStatus::ReadyForPickup)
            .cloned()
    }
}

/// CirculationStoreのインメモリ実装
///
/// 統合テストと開発時のローカル実行をサポートする。ストア全体を1つの
/// 非同期Mutexで保護し、uowの生存期間中ロックを保持することで、
/// 同一書籍への並行操作をPostgreSQL実装の行ロックと同じように直列化する。
pub struct MemoryStore {
    state: Arc<Mutex<StoreState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(StoreState::default())),
        }
    }

    /// テスト用に書籍を直接投入する
    pub async fn seed_book(&self, book: Book) {
        let mut state = self.state.lock().await;
        state.books.insert(book.book_id, book);
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CirculationStore for MemoryStore {
    /// uowを開始する
    ///
    /// ストアロックを取得し、状態のスナップショットを作業コピーとして持つ。
    /// commitで作業コピーを書き戻し、commitされないままdropされた場合は
    /// 作業コピーごと破棄される（ロールバック）。
    async fn begin(&self) -> Result<Box<dyn CirculationUow>> {
        let guard = self.state.clone().lock_owned().await;
        let staged = guard.clone();
        Ok(Box::new(MemoryUow { guard, staged }))
    }

    async fn book(&self, book_id: BookId) -> Result<Option<Book>> {
        let state = self.state.lock().await;
        Ok(state.books.get(&book_id).cloned())
    }

    async fn transaction(&self, transaction_id: TransactionId) -> Result<Option<Transaction>> {
        let state = self.state.lock().await;
        Ok(state.transactions.get(&transaction_id).cloned())
    }

    async fn reservation(&self, reservation_id: ReservationId) -> Result<Option<Reservation>> {
        let state = self.state.lock().await;
        Ok(state.reservations.get(&reservation_id).cloned())
    }

    async fn count_books_by_status(&self) -> Result<Vec<(BookStatus, u64)>> {
        let state = self.state.lock().await;
        let counts = BookStatus::all()
            .into_iter()
            .map(|status| {
                let count = state.books.values().filter(|b| b.status == status).count() as u64;
                (status, count)
            })
            .collect();
        Ok(counts)
    }

    async fn transactions_in_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Transaction>> {
        let state = self.state.lock().await;
        let mut matched: Vec<Transaction> = state
            .transactions
            .values()
            .filter(|t| t.checked_out_at >= start && t.checked_out_at < end)
            .cloned()
            .collect();
        matched.sort_by_key(|t| t.checked_out_at);
        Ok(matched)
    }

    async fn active_transaction_for_book(&self, book_id: BookId) -> Result<Option<Transaction>> {
        let state = self.state.lock().await;
        Ok(state
            .transactions
            .values()
            .find(|t| t.book_id == book_id && t.status.is_open())
            .cloned())
    }

    async fn active_transaction_count_for_member(&self, member_id: MemberId) -> Result<u64> {
        let state = self.state.lock().await;
        Ok(state
            .transactions
            .values()
            .filter(|t| t.member_id == member_id && t.status.is_open())
            .count() as u64)
    }

    async fn queue_snapshot(&self, book_id: BookId) -> Result<Vec<Reservation>> {
        let state = self.state.lock().await;
        let mut snapshot = Vec::new();
        if let Some(ready) = state.ready_reservation(book_id) {
            snapshot.push(ready);
        }
        snapshot.extend(state.pending_queue(book_id));
        Ok(snapshot)
    }

    async fn expiry_candidates(&self, now: DateTime<Utc>) -> Result<Vec<ReservationId>> {
        let state = self.state.lock().await;
        let mut candidates: Vec<&Reservation> = state
            .reservations
            .values()
            .filter(|r| !r.status.is_terminal() && r.expires_at < now)
            .collect();
        candidates.sort_by_key(|r| (r.expires_at, r.sequence_no));
        Ok(candidates.iter().map(|r| r.reservation_id).collect())
    }
}

/// インメモリunit of work
///
/// guardがストアロックを保持している間、他のuowは開始できない。
/// stagedへの変更はcommitまで外部から観測されない。
struct MemoryUow {
    guard: OwnedMutexGuard<StoreState>,
    staged: StoreState,
}

#[async_trait]
impl CirculationUow for MemoryUow {
    async fn lock_book(&mut self, book_id: BookId) -> Result<Option<Book>> {
        // ストアロックをuowの生存期間中保持しているため、これ自体が排他
        Ok(self.staged.books.get(&book_id).cloned())
    }

    async fn insert_book(&mut self, book: &Book) -> Result<()> {
        self.staged.books.insert(book.book_id, book.clone());
        Ok(())
    }

    async fn update_book_status(
        &mut self,
        book_id: BookId,
        status: BookStatus,
        updated_at: DateTime<Utc>,
    ) -> Result<()> {
        let book = self
            .staged
            .books
            .get_mut(&book_id)
            .ok_or_else(|| format!("book {} not found", book_id.value()))?;
        book.status = status;
        book.updated_at = updated_at;
        Ok(())
    }

    async fn transaction(
        &mut self,
        transaction_id: TransactionId,
    ) -> Result<Option<Transaction>> {
        Ok(self.staged.transactions.get(&transaction_id).cloned())
    }

    async fn insert_transaction(&mut self, transaction: &Transaction) -> Result<()> {
        self.staged
            .transactions
            .insert(transaction.transaction_id, transaction.clone());
        Ok(())
    }

    async fn update_transaction(&mut self, transaction: &Transaction) -> Result<()> {
        if !self
            .staged
            .transactions
            .contains_key(&transaction.transaction_id)
        {
            return Err(format!(
                "transaction {} not found",
                transaction.transaction_id.value()
            )
            .into());
        }
        self.staged
            .transactions
            .insert(transaction.transaction_id, transaction.clone());
        Ok(())
    }

    async fn active_transaction_for_book(
        &mut self,
        book_id: BookId,
    ) -> Result<Option<Transaction>> {
        Ok(self
            .staged
            .transactions
            .values()
            .find(|t| t.book_id == book_id && t.status.is_open())
            .cloned())
    }

    async fn reservation(
        &mut self,
        reservation_id: ReservationId,
    ) -> Result<Option<Reservation>> {
        Ok(self.staged.reservations.get(&reservation_id).cloned())
    }

    async fn insert_reservation(&mut self, reservation: &Reservation) -> Result<Reservation> {
        self.staged.next_sequence_no += 1;
        let stored = Reservation {
            sequence_no: self.staged.next_sequence_no,
            ..reservation.clone()
        };
        self.staged
            .reservations
            .insert(stored.reservation_id, stored.clone());
        Ok(stored)
    }

    async fn update_reservation(&mut self, reservation: &Reservation) -> Result<()> {
        if !self
            .staged
            .reservations
            .contains_key(&reservation.reservation_id)
        {
            return Err(format!(
                "reservation {} not found",
                reservation.reservation_id.value()
            )
            .into());
        }
        self.staged
            .reservations
            .insert(reservation.reservation_id, reservation.clone());
        Ok(())
    }

    async fn pending_reservations(&mut self, book_id: BookId) -> Result<Vec<Reservation>> {
        Ok(self.staged.pending_queue(book_id))
    }

    async fn ready_reservation(&mut self, book_id: BookId) -> Result<Option<Reservation>> {
        Ok(self.staged.ready_reservation(book_id))
    }

    async fn open_reservation_for_member(
        &mut self,
        book_id: BookId,
        member_id: MemberId,
    ) -> Result<Option<Reservation>> {
        Ok(self
            .staged
            .reservations
            .values()
            .find(|r| {
                r.book_id == book_id && r.member_id == member_id && !r.status.is_terminal()
            })
            .cloned())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let mut guard = self.guard;
        *guard = self.staged;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        // stagedを破棄するだけでよい
        Ok(())
    }
}
