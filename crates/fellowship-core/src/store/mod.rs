//! Durable local storage for cache entries, queues and the session.
//!
//! Every component reads and writes whole JSON records through the
//! `DurableStore` trait. Records survive restarts when backed by
//! `FileStore`; `MemoryStore` keeps them in process only.

pub mod durable;

pub use durable::{load_json, save_json, DurableStore, FileStore, MemoryStore, SharedStore};
