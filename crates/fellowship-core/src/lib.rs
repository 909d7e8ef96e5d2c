//! Fellowship core - offline-first caching and synchronization engine.
//!
//! Keeps the community portal usable while the device is offline or the
//! remote backend is transiently failing:
//!
//! - `ProfileCache`: the signed-in user's profile with a 15 minute
//!   staleness window and stale fallback on transient backend failures
//! - `PendingQueues`: durable per-kind queues of writes awaiting the backend
//! - `Synchronizer`: drains the queues when connectivity returns
//! - `TaskScheduler`: coarse periodic jobs such as the connectivity re-check
//! - `Portal`: wires one instance of each together for the host application

pub mod api;
pub mod auth;
pub mod cache;
pub mod config;
pub mod connectivity;
pub mod events;
pub mod models;
pub mod portal;
pub mod queue;
pub mod scheduler;
pub mod store;
pub mod sync;
pub mod utils;

pub use api::{ApiError, ErrorClass, HttpBackend, RemoteBackend};
pub use cache::{CacheEntry, ProfileCache};
pub use config::Config;
pub use connectivity::Connectivity;
pub use events::{DomainEvent, EventBus};
pub use portal::{Portal, WriteOutcome};
pub use queue::{DrainReport, MutationKind, PendingMutation, PendingQueues};
pub use scheduler::{BackgroundStatus, IntervalSpec, TaskScheduler};
pub use store::{DurableStore, FileStore, MemoryStore};
pub use sync::{SyncReport, SyncStatus, Synchronizer};
