use std::collections::HashMap;

use specter_core::{SpecterError, StreamingCallbacks};
use tokio::sync::RwLock;

/// At most one set of streaming observers per request id.
///
/// A session is consumed exactly once, at terminal resolution. Registering
/// a second observer for an id whose session is still active fails with
/// `SpecterError::SessionActive` rather than silently replacing it.
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, StreamingCallbacks>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
        }
    }

    pub async fn register(
        &self,
        request_id: &str,
        callbacks: StreamingCallbacks,
    ) -> Result<(), SpecterError> {
        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(request_id) {
            return Err(SpecterError::SessionActive(request_id.to_string()));
        }
        sessions.insert(request_id.to_string(), callbacks);
        Ok(())
    }

    /// Clone the observers without consuming the session.
    pub async fn peek(&self, request_id: &str) -> Option<StreamingCallbacks> {
        self.sessions.read().await.get(request_id).cloned()
    }

    /// Remove and return the session; the caller fires its single terminal
    /// callback.
    pub async fn take(&self, request_id: &str) -> Option<StreamingCallbacks> {
        self.sessions.write().await.remove(request_id)
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
