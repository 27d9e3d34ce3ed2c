pub mod book;
pub mod commands;
pub mod errors;
pub mod fine;
pub mod reservation;
pub mod transaction;
pub mod value_objects;

pub use book::{Book, BookStatus};
pub use errors::*;
pub use fine::FinePolicy;
pub use reservation::{Reservation, ReservationStatus};
pub use transaction::{ReturnCondition, Transaction, TransactionStatus};
pub use value_objects::*;
