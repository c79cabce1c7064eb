//! Shared Application State
//!
//! This module defines the `AppState` struct, which holds all shared,
//! clonable resources like the identity store and the tutor model client.

use crate::{config::Config, registry::SessionRegistry};
use parley_core::{
    exchange::Exchange,
    identity::{IdentityStore, JsonFileStore},
    llm_client::LLMClient,
    profile::UserProfile,
};
use std::sync::Arc;
use tokio::sync::Mutex;

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub identity: Arc<Mutex<IdentityStore<JsonFileStore>>>,
    pub sessions: Arc<SessionRegistry>,
    pub llm_client: Arc<dyn LLMClient>,
    pub exchange: Arc<Exchange>,
    pub config: Arc<Config>,
}

impl AppState {
    /// The logged-in profile, read fresh so profile edits apply to the next turn.
    pub async fn current_user(&self) -> Option<UserProfile> {
        self.identity.lock().await.current_user().cloned()
    }
}
