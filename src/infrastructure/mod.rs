//! Infrastructure layer for Replay Cache
//!
//! Persistence backends live here behind the document store interface the
//! proxy pipeline talks to.

pub mod memory;
pub mod postgres;
pub mod store;

pub use memory::MemoryStore;
pub use postgres::PostgresStore;
pub use store::*;
