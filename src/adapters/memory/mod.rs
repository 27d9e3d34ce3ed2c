pub mod membership;
pub mod store;

pub use membership::MembershipService;
pub use store::MemoryStore;
