use async_trait::async_trait;
use serde_json::Value;

use crate::models::{CommentRecord, ContentRecord, Profile};

use super::ApiError;

/// The narrow slice of the remote backend the sync engine depends on.
///
/// Payloads for writes are the exact JSON stored in a pending mutation, so a
/// retried write resends identical bytes.
#[async_trait]
pub trait RemoteBackend: Send + Sync {
    /// Fetch the profile owned by `identity`
    async fn fetch_profile(&self, identity: &str) -> Result<Profile, ApiError>;

    /// Apply a profile patch and return the stored profile
    async fn update_profile(&self, identity: &str, patch: &Value) -> Result<Profile, ApiError>;

    /// Create a content record (devotional, event, playlist) authored by `owner`
    async fn create_content(&self, owner: &str, payload: &Value) -> Result<ContentRecord, ApiError>;

    /// Create a comment authored by `owner`
    async fn create_comment(&self, owner: &str, payload: &Value) -> Result<CommentRecord, ApiError>;

    /// Cheap reachability probe used by the periodic connectivity check
    async fn ping(&self) -> Result<(), ApiError>;
}
