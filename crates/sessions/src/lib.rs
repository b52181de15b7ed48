//! Persistence gateway for Threadline: the storage-agnostic contract and
//! its in-memory and JSONL backends.

pub mod jsonl;
pub mod memory;
pub mod store;

pub use jsonl::JsonlStore;
pub use memory::MemoryStore;
pub use store::{open_store, PersistenceGateway};
