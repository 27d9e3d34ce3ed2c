use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use super::handlers::{
    AppState, cancel_reservation, change_book_status, create_loan, create_reservation,
    expire_reservations, get_book_by_id, get_book_queue, get_loan_by_id, get_queue_position,
    get_reservation_by_id, register_book, report_book_status, report_transactions, return_loan,
    update_reservation_status,
};

/// Creates the API router with all circulation endpoints
///
/// Command endpoints (Write operations):
/// - POST /books - Register a book
/// - POST /books/:id/status - Change a book's status (staff operation)
/// - POST /loans - Check out a book
/// - POST /loans/:id/return - Return a book
/// - POST /reservations - Place a reservation
/// - POST /reservations/:id/cancel - Cancel a reservation
/// - POST /reservations/:id/status - Update a reservation's status
/// - POST /maintenance/expire-reservations - Run the expiry sweep
///
/// Query endpoints (Read operations):
/// - GET /books/:id - Get book details
/// - GET /books/:id/queue - Get a book's reservation queue
/// - GET /loans/:id - Get loan details
/// - GET /reservations/:id - Get reservation details
/// - GET /reservations/:id/position - Get a reservation's queue position
/// - GET /reports/book-status - Book counts by status
/// - GET /reports/transactions - Loans in a time range
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        // Health check endpoint
        .route("/health", get(health_check))
        // Book endpoints
        .route("/books", post(register_book))
        .route("/books/:id", get(get_book_by_id))
        .route("/books/:id/status", post(change_book_status))
        .route("/books/:id/queue", get(get_book_queue))
        // Loan endpoints
        .route("/loans", post(create_loan))
        .route("/loans/:id", get(get_loan_by_id))
        .route("/loans/:id/return", post(return_loan))
        // Reservation endpoints
        .route("/reservations", post(create_reservation))
        .route("/reservations/:id", get(get_reservation_by_id))
        .route("/reservations/:id/cancel", post(cancel_reservation))
        .route("/reservations/:id/status", post(update_reservation_status))
        .route("/reservations/:id/position", get(get_queue_position))
        // Report / maintenance endpoints
        .route("/reports/book-status", get(report_book_status))
        .route("/reports/transactions", get(report_transactions))
        .route("/maintenance/expire-reservations", post(expire_reservations))
        // Add tracing middleware
        .layer(TraceLayer::new_for_http())
        // Add application state
        .with_state(state)
}

/// Health check endpoint
async fn health_check() -> &'static str {
    "OK"
}
