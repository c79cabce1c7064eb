//! Practice Session Registry
//!
//! Open practice sessions live in memory for as long as their screen is open;
//! returning to the menu discards them.

use parley_core::session::{PracticeSession, SharedSession};
use std::{collections::HashMap, sync::Arc};
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<Uuid, Arc<SharedSession>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a freshly started session and returns its shared handle.
    pub async fn insert(&self, session: PracticeSession) -> Arc<SharedSession> {
        let id = session.id;
        let shared = Arc::new(SharedSession::new(session));
        self.sessions.write().await.insert(id, shared.clone());
        shared
    }

    pub async fn get(&self, id: Uuid) -> Option<Arc<SharedSession>> {
        self.sessions.read().await.get(&id).cloned()
    }

    /// Removes a session. Returns `false` if it was not open.
    pub async fn remove(&self, id: Uuid) -> bool {
        self.sessions.write().await.remove(&id).is_some()
    }

    /// Drops every session owned by `username`, e.g. on logout.
    pub async fn remove_owned_by(&self, username: &str) -> usize {
        let mut sessions = self.sessions.write().await;
        let mut owned = Vec::new();
        for (id, shared) in sessions.iter() {
            if shared.state().lock().await.owner == username {
                owned.push(*id);
            }
        }
        for id in &owned {
            sessions.remove(id);
        }
        owned.len()
    }
}
