//! Data models for portal entities touched by the sync engine.
//!
//! - `Profile`, `ProfileUpdate`: the signed-in user's profile and patches to it
//! - `NewContent`, `ContentRecord`: authored devotionals, events and playlists
//! - `NewComment`, `CommentRecord`: comments on any content record

pub mod content;
pub mod profile;

pub use content::{CommentRecord, ContentKind, ContentRecord, NewComment, NewContent};
pub use profile::{Profile, ProfileUpdate};
