use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{PgPool, Postgres, Row, postgres::PgRow};

use crate::domain::{
    Book, BookStatus, Reservation, ReservationStatus, Transaction, TransactionStatus,
    value_objects::{BookId, MemberId, ReservationId, TransactionId},
};
use crate::ports::store::{CirculationStore, CirculationUow, Result};

/// ステータス文字列のパース失敗をポート層のエラーに変換する
fn invalid_data(message: String) -> Box<dyn std::error::Error + Send + Sync> {
    Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, message))
}

/// PostgreSQLの行データをBookに変換する
fn map_book_row(row: &PgRow) -> Result<Book> {
    let status_str: &str = row.get("status");
    let status = BookStatus::from_str(status_str).map_err(invalid_data)?;

    Ok(Book {
        book_id: BookId::from_uuid(row.get("book_id")),
        status,
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

/// PostgreSQLの行データをTransactionに変換する
fn map_transaction_row(row: &PgRow) -> Result<Transaction> {
    let status_str: &str = row.get("status");
    let status = TransactionStatus::from_str(status_str).map_err(invalid_data)?;
    let fine: Decimal = row.get("fine");

    Ok(Transaction {
        transaction_id: TransactionId::from_uuid(row.get("transaction_id")),
        book_id: BookId::from_uuid(row.get("book_id")),
        member_id: MemberId::from_uuid(row.get("member_id")),
        checked_out_at: row.get("checked_out_at"),
        due_date: row.get("due_date"),
        returned_at: row.get("returned_at"),
        status,
        fine,
        notes: row.get("notes"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

/// PostgreSQLの行データをReservationに変換する
fn map_reservation_row(row: &PgRow) -> Result<Reservation> {
    let status_str: &str = row.get("status");
    let status = ReservationStatus::from_str(status_str).map_err(invalid_data)?;

    Ok(Reservation {
        reservation_id: ReservationId::from_uuid(row.get("reservation_id")),
        book_id: BookId::from_uuid(row.get("book_id")),
        member_id: MemberId::from_uuid(row.get("member_id")),
        reserved_at: row.get("reserved_at"),
        expires_at: row.get("expires_at"),
        status,
        sequence_no: row.get("sequence_no"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

const SELECT_BOOK: &str = r#"
    SELECT book_id, status, created_at, updated_at
    FROM books
    WHERE book_id = $1
"#;

const SELECT_TRANSACTION: &str = r#"
    SELECT transaction_id, book_id, member_id, checked_out_at, due_date,
           returned_at, status, fine, notes, created_at, updated_at
    FROM transactions
    WHERE transaction_id = $1
"#;

const SELECT_ACTIVE_TRANSACTION_FOR_BOOK: &str = r#"
    SELECT transaction_id, book_id, member_id, checked_out_at, due_date,
           returned_at, status, fine, notes, created_at, updated_at
    FROM transactions
    WHERE book_id = $1 AND status IN ('checked_out', 'overdue')
"#;

const SELECT_RESERVATION: &str = r#"
    SELECT reservation_id, book_id, member_id, reserved_at, expires_at,
           status, sequence_no, created_at, updated_at
    FROM reservations
    WHERE reservation_id = $1
"#;

/// CirculationStoreのPostgreSQL実装
///
/// Stores the three circulation relations (books, transactions,
/// reservations) in PostgreSQL. Every unit of work maps to one database
/// transaction; concurrent operations on the same book are serialized by
/// a SELECT ... FOR UPDATE row lock taken in lock_book.
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Create a new PostgresStore with a PostgreSQL connection pool
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CirculationStore for PostgresStore {
    async fn begin(&self) -> Result<Box<dyn CirculationUow>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PostgresUow { tx }))
    }

    async fn book(&self, book_id: BookId) -> Result<Option<Book>> {
        let row = sqlx::query(SELECT_BOOK)
            .bind(book_id.value())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(map_book_row).transpose()
    }

    async fn transaction(&self, transaction_id: TransactionId) -> Result<Option<Transaction>> {
        let row = sqlx::query(SELECT_TRANSACTION)
            .bind(transaction_id.value())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(map_transaction_row).transpose()
    }

    async fn reservation(&self, reservation_id: ReservationId) -> Result<Option<Reservation>> {
        let row = sqlx::query(SELECT_RESERVATION)
            .bind(reservation_id.value())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(map_reservation_row).transpose()
    }

    async fn count_books_by_status(&self) -> Result<Vec<(BookStatus, u64)>> {
        let rows = sqlx::query(
            r#"
            SELECT status, COUNT(*) AS book_count
            FROM books
            GROUP BY status
            ORDER BY status
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut counts = Vec::with_capacity(rows.len());
        for row in rows {
            let status_str: &str = row.get("status");
            let status = BookStatus::from_str(status_str).map_err(invalid_data)?;
            let count: i64 = row.get("book_count");
            counts.push((status, count as u64));
        }
        Ok(counts)
    }

    async fn transactions_in_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Transaction>> {
        let rows = sqlx::query(
            r#"
            SELECT transaction_id, book_id, member_id, checked_out_at, due_date,
                   returned_at, status, fine, notes, created_at, updated_at
            FROM transactions
            WHERE checked_out_at >= $1 AND checked_out_at < $2
            ORDER BY checked_out_at ASC
            "#,
        )
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(map_transaction_row).collect()
    }

    async fn active_transaction_for_book(&self, book_id: BookId) -> Result<Option<Transaction>> {
        let row = sqlx::query(SELECT_ACTIVE_TRANSACTION_FOR_BOOK)
            .bind(book_id.value())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(map_transaction_row).transpose()
    }

    async fn active_transaction_count_for_member(&self, member_id: MemberId) -> Result<u64> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*)
            FROM transactions
            WHERE member_id = $1 AND status IN ('checked_out', 'overdue')
            "#,
        )
        .bind(member_id.value())
        .fetch_one(&self.pool)
        .await?;
        Ok(count as u64)
    }

    /// 予約キューのスナップショット
    ///
    /// ReadyForPickupの予約を先頭に、Pendingをキュー順で続ける。
    async fn queue_snapshot(&self, book_id: BookId) -> Result<Vec<Reservation>> {
        let rows = sqlx::query(
            r#"
            SELECT reservation_id, book_id, member_id, reserved_at, expires_at,
                   status, sequence_no, created_at, updated_at
            FROM reservations
            WHERE book_id = $1 AND status IN ('ready_for_pickup', 'pending')
            ORDER BY CASE WHEN status = 'ready_for_pickup' THEN 0 ELSE 1 END,
                     reserved_at ASC, sequence_no ASC
            "#,
        )
        .bind(book_id.value())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(map_reservation_row).collect()
    }

    async fn expiry_candidates(&self, now: DateTime<Utc>) -> Result<Vec<ReservationId>> {
        let rows = sqlx::query(
            r#"
            SELECT reservation_id
            FROM reservations
            WHERE expires_at < $1 AND status IN ('pending', 'ready_for_pickup')
            ORDER BY expires_at ASC, sequence_no ASC
            "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| ReservationId::from_uuid(row.get("reservation_id")))
            .collect())
    }
}

/// PostgreSQL unit of work
///
/// Wraps one database transaction. Dropping it without commit rolls the
/// transaction back, which gives the all-or-nothing guarantee the engine
/// relies on.
struct PostgresUow {
    tx: sqlx::Transaction<'static, Postgres>,
}

#[async_trait]
impl CirculationUow for PostgresUow {
    /// Lock the book row for the duration of this transaction
    ///
    /// SELECT ... FOR UPDATE serializes concurrent engine operations that
    /// target the same book: the second caller blocks here until the first
    /// commits, then observes the committed status.
    async fn lock_book(&mut self, book_id: BookId) -> Result<Option<Book>> {
        let row = sqlx::query(
            r#"
            SELECT book_id, status, created_at, updated_at
            FROM books
            WHERE book_id = $1
            FOR UPDATE
            "#,
        )
        .bind(book_id.value())
        .fetch_optional(&mut *self.tx)
        .await?;
        row.as_ref().map(map_book_row).transpose()
    }

    async fn insert_book(&mut self, book: &Book) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO books (book_id, status, created_at, updated_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(book.book_id.value())
        .bind(book.status.as_str())
        .bind(book.created_at)
        .bind(book.updated_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn update_book_status(
        &mut self,
        book_id: BookId,
        status: BookStatus,
        updated_at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE books
            SET status = $2, updated_at = $3
            WHERE book_id = $1
            "#,
        )
        .bind(book_id.value())
        .bind(status.as_str())
        .bind(updated_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn transaction(
        &mut self,
        transaction_id: TransactionId,
    ) -> Result<Option<Transaction>> {
        let row = sqlx::query(SELECT_TRANSACTION)
            .bind(transaction_id.value())
            .fetch_optional(&mut *self.tx)
            .await?;
        row.as_ref().map(map_transaction_row).transpose()
    }

    async fn insert_transaction(&mut self, transaction: &Transaction) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO transactions (
                transaction_id, book_id, member_id, checked_out_at, due_date,
                returned_at, status, fine, notes, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(transaction.transaction_id.value())
        .bind(transaction.book_id.value())
        .bind(transaction.member_id.value())
        .bind(transaction.checked_out_at)
        .bind(transaction.due_date)
        .bind(transaction.returned_at)
        .bind(transaction.status.as_str())
        .bind(transaction.fine)
        .bind(transaction.notes.as_deref())
        .bind(transaction.created_at)
        .bind(transaction.updated_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    /// 決済で変化するフィールドのみ更新する
    ///
    /// checkoutで確定したフィールド（book_id, member_id, checked_out_at,
    /// due_date）は不変。
    async fn update_transaction(&mut self, transaction: &Transaction) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE transactions
            SET returned_at = $2, status = $3, fine = $4, notes = $5, updated_at = $6
            WHERE transaction_id = $1
            "#,
        )
        .bind(transaction.transaction_id.value())
        .bind(transaction.returned_at)
        .bind(transaction.status.as_str())
        .bind(transaction.fine)
        .bind(transaction.notes.as_deref())
        .bind(transaction.updated_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn active_transaction_for_book(
        &mut self,
        book_id: BookId,
    ) -> Result<Option<Transaction>> {
        let row = sqlx::query(SELECT_ACTIVE_TRANSACTION_FOR_BOOK)
            .bind(book_id.value())
            .fetch_optional(&mut *self.tx)
            .await?;
        row.as_ref().map(map_transaction_row).transpose()
    }

    async fn reservation(
        &mut self,
        reservation_id: ReservationId,
    ) -> Result<Option<Reservation>> {
        let row = sqlx::query(SELECT_RESERVATION)
            .bind(reservation_id.value())
            .fetch_optional(&mut *self.tx)
            .await?;
        row.as_ref().map(map_reservation_row).transpose()
    }

    /// Insert a reservation; sequence_no is assigned by the database
    async fn insert_reservation(&mut self, reservation: &Reservation) -> Result<Reservation> {
        let row = sqlx::query(
            r#"
            INSERT INTO reservations (
                reservation_id, book_id, member_id, reserved_at, expires_at,
                status, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING sequence_no
            "#,
        )
        .bind(reservation.reservation_id.value())
        .bind(reservation.book_id.value())
        .bind(reservation.member_id.value())
        .bind(reservation.reserved_at)
        .bind(reservation.expires_at)
        .bind(reservation.status.as_str())
        .bind(reservation.created_at)
        .bind(reservation.updated_at)
        .fetch_one(&mut *self.tx)
        .await?;

        Ok(Reservation {
            sequence_no: row.get("sequence_no"),
            ..reservation.clone()
        })
    }

    async fn update_reservation(&mut self, reservation: &Reservation) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE reservations
            SET status = $2, expires_at = $3, updated_at = $4
            WHERE reservation_id = $1
            "#,
        )
        .bind(reservation.reservation_id.value())
        .bind(reservation.status.as_str())
        .bind(reservation.expires_at)
        .bind(reservation.updated_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn pending_reservations(&mut self, book_id: BookId) -> Result<Vec<Reservation>> {
        let rows = sqlx::query(
            r#"
            SELECT reservation_id, book_id, member_id, reserved_at, expires_at,
                   status, sequence_no, created_at, updated_at
            FROM reservations
            WHERE book_id = $1 AND status = 'pending'
            ORDER BY reserved_at ASC, sequence_no ASC
            "#,
        )
        .bind(book_id.value())
        .fetch_all(&mut *self.tx)
        .await?;

        rows.iter().map(map_reservation_row).collect()
    }

    async fn ready_reservation(&mut self, book_id: BookId) -> Result<Option<Reservation>> {
        let row = sqlx::query(
            r#"
            SELECT reservation_id, book_id, member_id, reserved_at, expires_at,
                   status, sequence_no, created_at, updated_at
            FROM reservations
            WHERE book_id = $1 AND status = 'ready_for_pickup'
            "#,
        )
        .bind(book_id.value())
        .fetch_optional(&mut *self.tx)
        .await?;
        row.as_ref().map(map_reservation_row).transpose()
    }

    async fn open_reservation_for_member(
        &mut self,
        book_id: BookId,
        member_id: MemberId,
    ) -> Result<Option<Reservation>> {
        let row = sqlx::query(
            r#"
            SELECT reservation_id, book_id, member_id, reserved_at, expires_at,
                   status, sequence_no, created_at, updated_at
            FROM reservations
            WHERE book_id = $1 AND member_id = $2
              AND status IN ('pending', 'ready_for_pickup')
            "#,
        )
        .bind(book_id.value())
        .bind(member_id.value())
        .fetch_optional(&mut *self.tx)
        .await?;
        row.as_ref().map(map_reservation_row).transpose()
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}
