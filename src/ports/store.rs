use crate::domain::{
    Book, BookStatus, Reservation, Transaction,
    value_objects::{BookId, MemberId, ReservationId, TransactionId},
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

pub type Result<T> = std::result::Result<T, Box<dyn std::error::Error + Send + Sync>>;

/// 循環ストアポート
///
/// books / transactions / reservationsの3リレーションを1つの権威ある
/// トランザクショナルストアとして抽象化する。書き込みはすべて
/// CirculationUow（unit of work）経由で行い、読み取り専用クエリは
/// このトレイトから直接提供する（Reporting用）。
#[async_trait]
pub trait CirculationStore: Send + Sync {
    /// unit of workを開始する
    ///
    /// 返されたuowの中の書き込みは、commitするまで観測されない。
    /// commitせずにdropした場合はすべてロールバックされる。
    async fn begin(&self) -> Result<Box<dyn CirculationUow>>;

    /// IDで書籍を取得する（ロックなし）
    async fn book(&self, book_id: BookId) -> Result<Option<Book>>;

    /// IDでトランザクションを取得する（ロックなし）
    async fn transaction(&self, transaction_id: TransactionId) -> Result<Option<Transaction>>;

    /// IDで予約を取得する（ロックなし）
    async fn reservation(&self, reservation_id: ReservationId) -> Result<Option<Reservation>>;

    /// 書籍ステータスごとの冊数を集計する
    async fn count_books_by_status(&self) -> Result<Vec<(BookStatus, u64)>>;

    /// 期間内に開始された貸出を検索する
    async fn transactions_in_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Transaction>>;

    /// 書籍の未決済トランザクションを取得する
    ///
    /// 不変条件により高々1件。
    async fn active_transaction_for_book(&self, book_id: BookId) -> Result<Option<Transaction>>;

    /// 会員の未決済トランザクション数を数える
    ///
    /// 貸出上限ポリシーなど外部コラボレーターが利用する。
    async fn active_transaction_count_for_member(&self, member_id: MemberId) -> Result<u64>;

    /// 書籍の予約キューのスナップショットを取得する
    ///
    /// ReadyForPickupの予約（あれば）を先頭に、Pendingの予約を
    /// reserved_at昇順・sequence_no昇順で続けて返す。
    async fn queue_snapshot(&self, book_id: BookId) -> Result<Vec<Reservation>>;

    /// 失効候補の予約IDを検索する
    ///
    /// expires_at < now かつ status ∈ {Pending, ReadyForPickup}。
    /// 各候補は呼び出し側が個別のuowで処理する。
    async fn expiry_candidates(&self, now: DateTime<Utc>) -> Result<Vec<ReservationId>>;
}

/// 循環unit of workポート
///
/// 1回のエンジン操作に対応するトランザクショナルスコープ。
/// 複数エンティティへの書き込みはすべてcommitで一括反映されるか、
/// rollback（またはdrop）で一括破棄されるかのどちらか。
///
/// 同一書籍への並行操作はlock_bookで直列化される：PostgreSQLでは
/// SELECT ... FOR UPDATEの行ロック、インメモリ実装ではストア全体の
/// 排他ロックによる。
#[async_trait]
pub trait CirculationUow: Send {
    /// 書籍を排他取得する
    ///
    /// checkout / return / 書籍ステータスに影響しうる予約遷移は、
    /// 最初にこのロックを取ってから書き込みを行う。
    async fn lock_book(&mut self, book_id: BookId) -> Result<Option<Book>>;

    async fn insert_book(&mut self, book: &Book) -> Result<()>;

    async fn update_book_status(
        &mut self,
        book_id: BookId,
        status: BookStatus,
        updated_at: DateTime<Utc>,
    ) -> Result<()>;

    async fn transaction(&mut self, transaction_id: TransactionId)
    -> Result<Option<Transaction>>;

    async fn insert_transaction(&mut self, transaction: &Transaction) -> Result<()>;

    async fn update_transaction(&mut self, transaction: &Transaction) -> Result<()>;

    /// 書籍の未決済トランザクションを取得する（uow内読み取り）
    async fn active_transaction_for_book(&mut self, book_id: BookId)
    -> Result<Option<Transaction>>;

    async fn reservation(&mut self, reservation_id: ReservationId)
    -> Result<Option<Reservation>>;

    /// 予約を永続化し、採番済みsequence_noを反映した予約を返す
    async fn insert_reservation(&mut self, reservation: &Reservation) -> Result<Reservation>;

    async fn update_reservation(&mut self, reservation: &Reservation) -> Result<()>;

    /// 書籍のPendingの予約をキュー順（reserved_at昇順、sequence_no昇順）で返す
    async fn pending_reservations(&mut self, book_id: BookId) -> Result<Vec<Reservation>>;

    /// 書籍のReadyForPickupの予約を取得する（不変条件により高々1件）
    async fn ready_reservation(&mut self, book_id: BookId) -> Result<Option<Reservation>>;

    /// 会員が同一書籍に持つ未解決（Pending / ReadyForPickup）の予約を取得する
    async fn open_reservation_for_member(
        &mut self,
        book_id: BookId,
        member_id: MemberId,
    ) -> Result<Option<Reservation>>;

    /// uow内のすべての書き込みを確定する
    async fn commit(self: Box<Self>) -> Result<()>;

    /// uow内のすべての書き込みを破棄する
    async fn rollback(self: Box<Self>) -> Result<()>;
}
