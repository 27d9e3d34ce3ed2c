mod engine;
mod errors;
mod expiry;
mod queue;

pub use engine::{
    ReservationOutcome, ReturnOutcome, ServiceDependencies, cancel_reservation, checkout,
    place_reservation, queue_position, register_book, return_item, set_book_status,
    update_reservation_status,
};
pub use errors::{CirculationError, Result};
pub use expiry::{ExpiryOutcome, expire_reservations};
pub use queue::{PromotionOutcome, promote_next};
