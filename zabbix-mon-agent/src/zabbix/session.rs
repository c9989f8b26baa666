//! Session and provisioned-item state
//!
//! The state is built as a whole by the control plane and swapped in as a
//! whole. Readers take an `Arc` snapshot and never see a half-built map.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::sender::DataEndpoint;

/// Item key -> server-assigned item id
pub type ItemMap = HashMap<String, String>;

#[derive(Clone)]
pub struct Session {
    pub auth_token: String,
    pub host_id: String,
    pub host_name: String,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("auth_token", &"***")
            .field("host_id", &self.host_id)
            .field("host_name", &self.host_name)
            .finish()
    }
}

/// Everything a cycle needs from the control plane
#[derive(Debug, Clone)]
pub struct SessionState {
    pub session: Session,
    pub items: ItemMap,
    pub endpoint: DataEndpoint,
}

/// Single-writer holder for the current [`SessionState`]
pub struct SessionStore {
    current: RwLock<Arc<SessionState>>,
}

impl SessionStore {
    pub fn new(initial: SessionState) -> Self {
        Self { current: RwLock::new(Arc::new(initial)) }
    }

    pub fn snapshot(&self) -> Arc<SessionState> {
        self.current.read().clone()
    }

    /// Swap in a freshly initialised state
    pub fn replace(&self, state: SessionState) {
        *self.current.write() = Arc::new(state);
    }
}
