use crate::application::circulation::{
    CirculationError, ExpiryOutcome, ServiceDependencies,
    cancel_reservation as execute_cancel_reservation, checkout as execute_checkout,
    expire_reservations as execute_expire_reservations,
    place_reservation as execute_place_reservation, queue_position as execute_queue_position,
    register_book as execute_register_book, return_item as execute_return_item,
    set_book_status as execute_set_book_status,
    update_reservation_status as execute_update_reservation_status,
};
use crate::domain::{
    BookStatus, ReservationStatus, commands, transaction,
    value_objects::{BookId, MemberId, ReservationId, TransactionId},
};
use crate::ports::CirculationStore;
use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;

use super::{
    error::ApiError,
    types::{
        BookResponse, BookStatusCountResponse, ChangeBookStatusRequest, CheckoutRequest,
        ExpiryReportResponse, PlaceReservationRequest, QueuePositionResponse, QueueResponse,
        RegisterBookRequest, ReservationOutcomeResponse, ReservationResponse, ReturnRequest,
        ReturnResponse, TransactionResponse, TransactionsReportQuery,
        UpdateReservationStatusRequest,
    },
};

// ============================================================================
// State
// ============================================================================

/// ハンドラー間で共有されるアプリケーション状態
#[derive(Clone)]
pub struct AppState {
    pub service_deps: ServiceDependencies,
}

// ============================================================================
// Book handlers
// ============================================================================

/// POST /books - 書籍をカタログに登録
///
/// book_idを省略した場合はサーバー側で採番する。登録直後のステータスは
/// Available。
pub async fn register_book(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RegisterBookRequest>,
) -> Result<(StatusCode, Json<BookResponse>), ApiError> {
    let cmd = commands::RegisterBook {
        book_id: req
            .book_id
            .map(BookId::from_uuid)
            .unwrap_or_else(BookId::new),
        registered_at: chrono::Utc::now(),
    };

    let book = execute_register_book(&state.service_deps, cmd).await?;
    Ok((StatusCode::CREATED, Json(BookResponse::from(book))))
}

/// POST /books/:id/status - 書籍ステータスを手動で変更（管理操作）
///
/// 強制されるビジネスルール:
/// - CheckedOut / Reservedが関わる遷移は循環エンジンの専管なので不可
/// - 終端状態（Discarded）からの遷移は不可
pub async fn change_book_status(
    State(state): State<Arc<AppState>>,
    Path(book_id): Path<Uuid>,
    Json(req): Json<ChangeBookStatusRequest>,
) -> Result<Json<BookResponse>, ApiError> {
    let new_status = BookStatus::from_str(&req.status)
        .map_err(|_| CirculationError::Validation("status"))?;

    let cmd = commands::ChangeBookStatus {
        book_id: BookId::from_uuid(book_id),
        new_status,
        requested_at: chrono::Utc::now(),
    };

    let book = execute_set_book_status(&state.service_deps, cmd).await?;
    Ok(Json(BookResponse::from(book)))
}

/// GET /books/:id - 書籍詳細をIDで取得
pub async fn get_book_by_id(
    State(state): State<Arc<AppState>>,
    Path(book_id): Path<Uuid>,
) -> Result<Json<BookResponse>, QueryError> {
    let book_id = BookId::from_uuid(book_id);

    match state.service_deps.store.book(book_id).await {
        Ok(Some(book)) => Ok(Json(BookResponse::from(book))),
        Ok(None) => Err(QueryError::NotFound(format!(
            "Book {} not found",
            book_id.value()
        ))),
        Err(e) => Err(QueryError::InternalError(e.to_string())),
    }
}

/// GET /books/:id/queue - 書籍の予約キューを取得
///
/// ReadyForPickupの予約を先頭に、Pendingをキュー順で返す。
pub async fn get_book_queue(
    State(state): State<Arc<AppState>>,
    Path(book_id): Path<Uuid>,
) -> Result<Json<QueueResponse>, QueryError> {
    let book_id = BookId::from_uuid(book_id);

    // 書籍の存在確認（存在しない書籍のキューは404）
    match state.service_deps.store.book(book_id).await {
        Ok(Some(_)) => {}
        Ok(None) => {
            return Err(QueryError::NotFound(format!(
                "Book {} not found",
                book_id.value()
            )));
        }
        Err(e) => return Err(QueryError::InternalError(e.to_string())),
    }

    let snapshot = state
        .service_deps
        .store
        .queue_snapshot(book_id)
        .await
        .map_err(|e| QueryError::InternalError(e.to_string()))?;

    Ok(Json(QueueResponse::from_snapshot(book_id.value(), snapshot)))
}

// ============================================================================
// Loan handlers
// ============================================================================

/// POST /loans - 書籍を貸し出す
///
/// 強制されるビジネスルール:
/// - 会員が存在し、貸出資格があること
/// - 書籍がAvailableであること（Reservedの書籍は受取予約の本人のみ可）
/// - 返却期限が貸出日より後であること（省略時は14日後）
pub async fn create_loan(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CheckoutRequest>,
) -> Result<(StatusCode, Json<TransactionResponse>), ApiError> {
    let requested_at = chrono::Utc::now();
    let due_date = req.due_date.unwrap_or_else(|| {
        requested_at + chrono::Duration::days(transaction::LOAN_PERIOD_DAYS)
    });

    let cmd = commands::Checkout {
        book_id: BookId::from_uuid(req.book_id),
        member_id: MemberId::from_uuid(req.member_id),
        due_date,
        requested_at,
    };

    let loan = execute_checkout(&state.service_deps, cmd).await?;
    let status = loan.status;
    Ok((
        StatusCode::CREATED,
        Json(TransactionResponse::new(loan, status)),
    ))
}

/// POST /loans/:id/return - 書籍を返却する
///
/// 強制されるビジネスルール:
/// - 未決済（CheckedOut / Overdue）のトランザクションのみ受け付ける
/// - 罰金は返却条件と延滞日数から計算される
/// - 良品返却でキューに待機予約があれば先頭が繰り上がる
pub async fn return_loan(
    State(state): State<Arc<AppState>>,
    Path(transaction_id): Path<Uuid>,
    Json(req): Json<ReturnRequest>,
) -> Result<Json<ReturnResponse>, ApiError> {
    let cmd = commands::ReturnItem {
        transaction_id: TransactionId::from_uuid(transaction_id),
        condition: req.condition,
        notes: req.notes,
        returned_at: chrono::Utc::now(),
    };

    let outcome = execute_return_item(&state.service_deps, cmd).await?;
    let status = outcome.transaction.status;
    Ok(Json(ReturnResponse {
        transaction: TransactionResponse::new(outcome.transaction, status),
        promoted: outcome.promoted.map(ReservationResponse::from),
    }))
}

/// GET /loans/:id - 貸出詳細をIDで取得
///
/// statusは延滞を加味した実効ステータスで返す。
pub async fn get_loan_by_id(
    State(state): State<Arc<AppState>>,
    Path(transaction_id): Path<Uuid>,
) -> Result<Json<TransactionResponse>, QueryError> {
    let transaction_id = TransactionId::from_uuid(transaction_id);

    match state.service_deps.store.transaction(transaction_id).await {
        Ok(Some(loan)) => {
            let status = transaction::effective_status(&loan, chrono::Utc::now());
            Ok(Json(TransactionResponse::new(loan, status)))
        }
        Ok(None) => Err(QueryError::NotFound(format!(
            "Transaction {} not found",
            transaction_id.value()
        ))),
        Err(e) => Err(QueryError::InternalError(e.to_string())),
    }
}

// ============================================================================
// Reservation handlers
// ============================================================================

/// POST /reservations - 予約を作成
///
/// 強制されるビジネスルール:
/// - 会員が存在すること
/// - 書籍がCheckedOutまたはReservedであること
/// - 同一会員・同一書籍の未解決予約は1件まで
pub async fn create_reservation(
    State(state): State<Arc<AppState>>,
    Json(req): Json<PlaceReservationRequest>,
) -> Result<(StatusCode, Json<ReservationResponse>), ApiError> {
    let cmd = commands::PlaceReservation {
        book_id: BookId::from_uuid(req.book_id),
        member_id: MemberId::from_uuid(req.member_id),
        requested_at: chrono::Utc::now(),
    };

    let reservation = execute_place_reservation(&state.service_deps, cmd).await?;
    Ok((
        StatusCode::CREATED,
        Json(ReservationResponse::from(reservation)),
    ))
}

/// POST /reservations/:id/cancel - 予約をキャンセル
///
/// 書籍を確保していた予約のキャンセルはキュー繰り上げカスケードを起こす。
pub async fn cancel_reservation(
    State(state): State<Arc<AppState>>,
    Path(reservation_id): Path<Uuid>,
) -> Result<Json<ReservationOutcomeResponse>, ApiError> {
    let cmd = commands::CancelReservation {
        reservation_id: ReservationId::from_uuid(reservation_id),
        requested_at: chrono::Utc::now(),
    };

    let outcome = execute_cancel_reservation(&state.service_deps, cmd).await?;
    Ok(Json(ReservationOutcomeResponse {
        reservation: ReservationResponse::from(outcome.reservation),
        promoted: outcome.promoted.map(ReservationResponse::from),
    }))
}

/// POST /reservations/:id/status - 予約ステータスを変更
///
/// 強制されるビジネスルール:
/// - 遷移は予約の状態機械で合法なものに限る
/// - ReadyForPickupへの手動昇格は不可（キュー駆動のみ）
pub async fn update_reservation_status(
    State(state): State<Arc<AppState>>,
    Path(reservation_id): Path<Uuid>,
    Json(req): Json<UpdateReservationStatusRequest>,
) -> Result<Json<ReservationOutcomeResponse>, ApiError> {
    let new_status = ReservationStatus::from_str(&req.status)
        .map_err(|_| CirculationError::Validation("status"))?;

    let cmd = commands::UpdateReservationStatus {
        reservation_id: ReservationId::from_uuid(reservation_id),
        new_status,
        requested_at: chrono::Utc::now(),
    };

    let outcome = execute_update_reservation_status(&state.service_deps, cmd).await?;
    Ok(Json(ReservationOutcomeResponse {
        reservation: ReservationResponse::from(outcome.reservation),
        promoted: outcome.promoted.map(ReservationResponse::from),
    }))
}

/// GET /reservations/:id - 予約詳細をIDで取得
pub async fn get_reservation_by_id(
    State(state): State<Arc<AppState>>,
    Path(reservation_id): Path<Uuid>,
) -> Result<Json<ReservationResponse>, QueryError> {
    let reservation_id = ReservationId::from_uuid(reservation_id);

    match state.service_deps.store.reservation(reservation_id).await {
        Ok(Some(reservation)) => Ok(Json(ReservationResponse::from(reservation))),
        Ok(None) => Err(QueryError::NotFound(format!(
            "Reservation {} not found",
            reservation_id.value()
        ))),
        Err(e) => Err(QueryError::InternalError(e.to_string())),
    }
}

/// GET /reservations/:id/position - 予約のキュー内順位を取得（1始まり）
///
/// Pendingの予約のみが順位を持つ。解決済みやReadyForPickupの予約は404。
pub async fn get_queue_position(
    State(state): State<Arc<AppState>>,
    Path(reservation_id): Path<Uuid>,
) -> Result<Json<QueuePositionResponse>, ApiError> {
    let reservation_id = ReservationId::from_uuid(reservation_id);

    let reservation = state
        .service_deps
        .store
        .reservation(reservation_id)
        .await
        .map_err(CirculationError::internal)?
        .ok_or_else(|| CirculationError::not_found("reservation", reservation_id.value()))?;

    let position =
        execute_queue_position(&state.service_deps, reservation.book_id, reservation_id).await?;

    Ok(Json(QueuePositionResponse {
        reservation_id: reservation_id.value(),
        book_id: reservation.book_id.value(),
        position,
    }))
}

// ============================================================================
// Report / maintenance handlers
// ============================================================================

/// GET /reports/book-status - ステータス別の蔵書数
pub async fn report_book_status(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<BookStatusCountResponse>>, QueryError> {
    let counts = state
        .service_deps
        .store
        .count_books_by_status()
        .await
        .map_err(|e| QueryError::InternalError(e.to_string()))?;

    Ok(Json(
        counts
            .into_iter()
            .map(|(status, count)| BookStatusCountResponse {
                status: status.as_str().to_string(),
                count,
            })
            .collect(),
    ))
}

/// GET /reports/transactions?start=..&end=.. - 期間内の貸出一覧
///
/// checked_out_atが[start, end)に含まれる貸出を返す。statusは延滞を
/// 加味した実効ステータス。
pub async fn report_transactions(
    State(state): State<Arc<AppState>>,
    Query(query): Query<TransactionsReportQuery>,
) -> Result<Json<Vec<TransactionResponse>>, QueryError> {
    if query.end <= query.start {
        return Err(QueryError::BadRequest(
            "end must be after start".to_string(),
        ));
    }

    let loans = state
        .service_deps
        .store
        .transactions_in_range(query.start, query.end)
        .await
        .map_err(|e| QueryError::InternalError(e.to_string()))?;

    let now = chrono::Utc::now();
    Ok(Json(
        loans
            .into_iter()
            .map(|loan| {
                let status = transaction::effective_status(&loan, now);
                TransactionResponse::new(loan, status)
            })
            .collect(),
    ))
}

/// POST /maintenance/expire-reservations - 期限切れ予約の失効バッチ
///
/// スケジューラからも同じ経路が定期実行される。手動実行は運用上の
/// リカバリー用。
pub async fn expire_reservations(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ExpiryReportResponse>, ApiError> {
    let outcomes = execute_expire_reservations(&state.service_deps, chrono::Utc::now()).await?;

    let mut expired = Vec::new();
    let mut skipped = 0;
    let mut failed = 0;
    for outcome in outcomes {
        match outcome {
            ExpiryOutcome::Expired { reservation_id, .. } => expired.push(reservation_id.value()),
            ExpiryOutcome::Skipped { .. } => skipped += 1,
            ExpiryOutcome::Failed { .. } => failed += 1,
        }
    }

    Ok(Json(ExpiryReportResponse {
        expired,
        skipped,
        failed,
    }))
}

// ============================================================================
// Error types
// ============================================================================

/// クエリハンドラー用のエラー型
#[derive(Debug)]
pub enum QueryError {
    NotFound(String),
    BadRequest(String),
    InternalError(String),
}

impl IntoResponse for QueryError {
    fn into_response(self) -> Response {
        let (status, error_type, message) = match self {
            QueryError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg),
            QueryError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
            QueryError::InternalError(msg) => {
                // 内部エラーの詳細はログに記録し、クライアントには一般的なメッセージのみを返す
                tracing::error!("Internal error in query handler: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An unexpected error occurred".to_string(),
                )
            }
        };

        let body = Json(super::types::ErrorResponse::new(error_type, message));
        (status, body).into_response()
    }
}
