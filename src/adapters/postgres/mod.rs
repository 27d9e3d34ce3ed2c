pub mod store;

pub use store::PostgresStore;
