//! Pending-mutation queues.
//!
//! Writes that cannot reach the backend are queued here, one durable FIFO
//! queue per `MutationKind`. An entry leaves its queue only when the backend
//! confirms it or when it outlives `MAX_AGE_DAYS`; a failed retry leaves it
//! exactly as it was.

pub mod mutation;
pub mod pending;

pub use mutation::{MutationKind, PendingMutation, MAX_AGE_DAYS};
pub use pending::{DrainReport, PendingQueues};
