//! In-memory backend for unit tests.
//!
//! Configure failures and latency via builder methods, then hand the mock to
//! the component under test and inspect the recorded calls afterwards.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;

use super::{ApiError, RemoteBackend};
use crate::models::{CommentRecord, ContentRecord, NewComment, NewContent, Profile};

/// Failure to inject, rebuilt on every use because `ApiError` is not `Clone`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    /// Row-policy evaluation fault (transient)
    PolicyFault,
    /// Transport failure (transient)
    Unreachable,
    /// Resource absent (hard)
    NotFound,
    /// Duplicate unique field (hard)
    Conflict,
}

impl Failure {
    fn to_error(self) -> ApiError {
        match self {
            Failure::PolicyFault => ApiError::PolicyFault("42P17".to_string()),
            Failure::Unreachable => ApiError::Unreachable("connection refused".to_string()),
            Failure::NotFound => ApiError::NotFound("no such row".to_string()),
            Failure::Conflict => ApiError::Conflict("duplicate key value".to_string()),
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CallCounts {
    pub fetch_profile: usize,
    pub update_profile: usize,
    pub create_content: usize,
    pub create_comment: usize,
    pub ping: usize,
}

impl CallCounts {
    pub fn writes(&self) -> usize {
        self.update_profile + self.create_content + self.create_comment
    }
}

#[derive(Default)]
struct MockState {
    profiles: HashMap<String, Profile>,
    content: Vec<ContentRecord>,
    comments: Vec<CommentRecord>,
    /// One-shot failures, consumed in order
    failures: VecDeque<Failure>,
    /// Failure returned by every call until cleared
    fail_always: Option<Failure>,
    calls: CallCounts,
    next_id: usize,
}

#[derive(Default)]
pub struct MockBackend {
    state: Mutex<MockState>,
    latency: Option<Duration>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_profile(self, profile: Profile) -> Self {
        self.state
            .lock()
            .unwrap()
            .profiles
            .insert(profile.id.clone(), profile);
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn fail_next(&self, failure: Failure) {
        self.state.lock().unwrap().failures.push_back(failure);
    }

    pub fn fail_always(&self, failure: Option<Failure>) {
        self.state.lock().unwrap().fail_always = failure;
    }

    pub fn calls(&self) -> CallCounts {
        self.state.lock().unwrap().calls
    }

    pub fn profile(&self, identity: &str) -> Option<Profile> {
        self.state.lock().unwrap().profiles.get(identity).cloned()
    }

    pub fn content(&self) -> Vec<ContentRecord> {
        self.state.lock().unwrap().content.clone()
    }

    pub fn comments(&self) -> Vec<CommentRecord> {
        self.state.lock().unwrap().comments.clone()
    }

    async fn begin(&self, count: impl FnOnce(&mut CallCounts)) -> Result<(), ApiError> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        let mut state = self.state.lock().unwrap();
        count(&mut state.calls);
        if let Some(failure) = state.fail_always {
            return Err(failure.to_error());
        }
        match state.failures.pop_front() {
            Some(failure) => Err(failure.to_error()),
            None => Ok(()),
        }
    }
}

fn parse<T: serde::de::DeserializeOwned>(payload: &Value) -> Result<T, ApiError> {
    serde_json::from_value(payload.clone()).map_err(|e| ApiError::Validation(e.to_string()))
}

#[async_trait]
impl RemoteBackend for MockBackend {
    async fn fetch_profile(&self, identity: &str) -> Result<Profile, ApiError> {
        self.begin(|c| c.fetch_profile += 1).await?;
        self.profile(identity)
            .ok_or_else(|| ApiError::NotFound(identity.to_string()))
    }

    async fn update_profile(&self, identity: &str, patch: &Value) -> Result<Profile, ApiError> {
        self.begin(|c| c.update_profile += 1).await?;
        let mut state = self.state.lock().unwrap();
        let current = state
            .profiles
            .get(identity)
            .cloned()
            .unwrap_or_else(|| Profile::new(identity));
        let mut updated = current
            .apply_patch(patch)
            .map_err(|e| ApiError::Validation(e.to_string()))?;
        updated.updated_at = Some(Utc::now());
        state.profiles.insert(identity.to_string(), updated.clone());
        Ok(updated)
    }

    async fn create_content(
        &self,
        owner: &str,
        payload: &Value,
    ) -> Result<ContentRecord, ApiError> {
        self.begin(|c| c.create_content += 1).await?;
        let new: NewContent = parse(payload)?;
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let record = ContentRecord {
            id: format!("content-{}", state.next_id),
            author_id: owner.to_string(),
            kind: new.kind,
            title: new.title,
            body: new.body,
            created_at: Utc::now(),
        };
        state.content.push(record.clone());
        Ok(record)
    }

    async fn create_comment(
        &self,
        owner: &str,
        payload: &Value,
    ) -> Result<CommentRecord, ApiError> {
        self.begin(|c| c.create_comment += 1).await?;
        let new: NewComment = parse(payload)?;
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let record = CommentRecord {
            id: format!("comment-{}", state.next_id),
            author_id: owner.to_string(),
            target_id: new.target_id,
            body: new.body,
            created_at: Utc::now(),
        };
        state.comments.push(record.clone());
        Ok(record)
    }

    async fn ping(&self) -> Result<(), ApiError> {
        self.begin(|c| c.ping += 1).await
    }
}
