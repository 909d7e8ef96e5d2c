use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::store::{load_json, save_json, SharedStore};

/// Storage key for the session record
const SESSION_KEY: &str = "session";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionData {
    pub identity: String,
    pub signed_in_at: DateTime<Utc>,
}

pub struct Session {
    store: SharedStore,
    pub data: Option<SessionData>,
}

impl Session {
    pub fn new(store: SharedStore) -> Self {
        Self { store, data: None }
    }

    /// Load the session from the durable store
    pub fn load(&mut self) -> Result<bool> {
        self.data = load_json(self.store.as_ref(), SESSION_KEY)?;
        Ok(self.data.is_some())
    }

    /// Record `identity` as signed in and persist it
    pub fn sign_in(&mut self, identity: &str) -> Result<()> {
        let data = SessionData {
            identity: identity.to_string(),
            signed_in_at: Utc::now(),
        };
        save_json(self.store.as_ref(), SESSION_KEY, &data)?;
        self.data = Some(data);
        Ok(())
    }

    /// Clear session data, returning the identity that was signed in
    pub fn clear(&mut self) -> Result<Option<String>> {
        self.store.remove_key(SESSION_KEY)?;
        Ok(self.data.take().map(|d| d.identity))
    }

    pub fn identity(&self) -> Option<&str> {
        self.data.as_ref().map(|d| d.identity.as_str())
    }
}
