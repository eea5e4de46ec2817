//! Persistence layer: the hosted record table and an in-memory stand-in.

pub mod memory;
pub mod postgrest;
pub mod traits;

pub use memory::MemoryStore;
pub use postgrest::PostgrestStore;
pub use traits::RecordStore;
