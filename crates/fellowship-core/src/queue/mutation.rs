use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::utils::format_age;

/// Queued mutations older than this are dropped without being applied.
pub const MAX_AGE_DAYS: i64 = 7;

/// Prefix marking payload fields as local bookkeeping (never sent remotely).
const LOCAL_FIELD_PREFIX: char = '_';

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "camelCase")]
pub enum MutationKind {
    ProfileUpdate,
    ContentCreate,
    CommentCreate,
}

impl MutationKind {
    /// Every kind, in the order a full sync drains them.
    pub const ALL: [MutationKind; 3] = [
        MutationKind::ProfileUpdate,
        MutationKind::ContentCreate,
        MutationKind::CommentCreate,
    ];

    /// Stable label used in storage keys and the CLI.
    pub fn label(&self) -> &'static str {
        match self {
            MutationKind::ProfileUpdate => "profile_update",
            MutationKind::ContentCreate => "content_create",
            MutationKind::CommentCreate => "comment_create",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.label() == label)
    }
}

impl std::fmt::Display for MutationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MutationKind::ProfileUpdate => write!(f, "Profile update"),
            MutationKind::ContentCreate => write!(f, "New content"),
            MutationKind::CommentCreate => write!(f, "New comment"),
        }
    }
}

/// A write waiting for the backend. Never modified once queued.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "camelCase")]
pub struct PendingMutation {
    /// Local id, not the id the backend eventually assigns
    pub id: String,
    pub kind: MutationKind,
    pub payload: Value,
    pub created_at: DateTime<Utc>,
    /// Identity that created the mutation
    pub owner_key: String,
}

impl PendingMutation {
    pub fn new(kind: MutationKind, payload: Value, owner_key: impl Into<String>) -> Self {
        let created_at = Utc::now();
        Self {
            id: generate_local_id(created_at),
            kind,
            payload: strip_local_fields(payload),
            created_at,
            owner_key: owner_key.into(),
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now - self.created_at > Duration::days(MAX_AGE_DAYS)
    }

    pub fn age_display(&self) -> String {
        format_age(self.created_at, Utc::now())
    }
}

/// `local-<millis>-<8 hex digits>`; unique enough for one device.
fn generate_local_id(at: DateTime<Utc>) -> String {
    let suffix: u32 = rand::thread_rng().gen();
    format!("local-{}-{:08x}", at.timestamp_millis(), suffix)
}

fn strip_local_fields(payload: Value) -> Value {
    match payload {
        Value::Object(fields) => Value::Object(
            fields
                .into_iter()
                .filter(|(key, _)| !key.starts_with(LOCAL_FIELD_PREFIX))
                .collect(),
        ),
        other => other,
    }
}
