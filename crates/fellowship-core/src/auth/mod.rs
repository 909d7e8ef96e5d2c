//! Session tracking for the signed-in user.
//!
//! The session records which identity is signed in; whether it is usable
//! offline is decided by the profile cache's freshness check.

pub mod session;

pub use session::{Session, SessionData};
