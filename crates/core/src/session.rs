//! Practice Session State
//!
//! A practice session is created when the student picks a mode from the menu
//! and lives until they return to it. It owns the append-only message thread
//! shown on the chat screen.

use crate::{
    instructions::{self, InputModality},
    profile::UserProfile,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;
use uuid::Uuid;

/// The practice mode, which decides the tutor's persona.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum PracticeMode {
    #[default]
    Menu,
    Conversation,
    Interview,
    Custom,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Speaker {
    User,
    Tutor,
}

/// A single entry in the chat thread.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub speaker: Speaker,
    pub text: String,
    pub created_at: DateTime<Utc>,
    /// Set on tutor messages that report a failure instead of a reply.
    #[serde(default)]
    pub notice: bool,
}

impl Message {
    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Speaker::User, text.into(), false)
    }

    pub fn tutor(text: impl Into<String>) -> Self {
        Self::new(Speaker::Tutor, text.into(), false)
    }

    pub fn notice(text: impl Into<String>) -> Self {
        Self::new(Speaker::Tutor, text.into(), true)
    }

    fn new(speaker: Speaker, text: String, notice: bool) -> Self {
        Self {
            id: Uuid::new_v4(),
            speaker,
            text,
            created_at: Utc::now(),
            notice,
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("A custom scenario needs a description")]
    MissingScenario,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PracticeSession {
    pub id: Uuid,
    /// Username of the student who started the session.
    pub owner: String,
    pub mode: PracticeMode,
    /// Only meaningful when `mode` is `Custom`.
    pub custom_scenario_text: String,
    pub created_at: DateTime<Utc>,
    messages: Vec<Message>,
}

impl PracticeSession {
    /// Starts a session for `profile`, seeding the thread with a greeting.
    /// The scenario is kept as written; a whitespace-only scenario counts as missing.
    pub fn start(
        profile: &UserProfile,
        mode: PracticeMode,
        scenario: &str,
    ) -> Result<Self, SessionError> {
        if mode == PracticeMode::Custom && scenario.trim().is_empty() {
            return Err(SessionError::MissingScenario);
        }

        let mut session = Self {
            id: Uuid::new_v4(),
            owner: profile.username.clone(),
            mode,
            custom_scenario_text: scenario.to_string(),
            created_at: Utc::now(),
            messages: Vec::new(),
        };
        session.push(Message::tutor(instructions::greeting(
            profile.target_language,
            mode,
        )));
        Ok(session)
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// Clears the thread. The session itself stays open.
    pub fn reset(&mut self) {
        self.messages.clear();
    }

    /// The instruction string for the next model call.
    pub fn instructions(&self, profile: &UserProfile, modality: InputModality) -> String {
        instructions::build_instructions(
            profile.proficiency_level,
            profile.target_language,
            self.mode,
            &self.custom_scenario_text,
            modality,
        )
    }
}

/// A practice session shared between the socket loop and in-flight turns.
///
/// The state mutex is only held for short edits. Whether a turn is in flight
/// is tracked separately so a second submission can be rejected instead of
/// queued behind the first.
#[derive(Debug)]
pub struct SharedSession {
    state: Mutex<PracticeSession>,
    processing: AtomicBool,
}

impl SharedSession {
    pub fn new(session: PracticeSession) -> Self {
        Self {
            state: Mutex::new(session),
            processing: AtomicBool::new(false),
        }
    }

    pub fn state(&self) -> &Mutex<PracticeSession> {
        &self.state
    }

    pub async fn snapshot(&self) -> PracticeSession {
        self.state.lock().await.clone()
    }

    pub fn is_processing(&self) -> bool {
        self.processing.load(Ordering::Acquire)
    }

    /// Claims the processing flag, or returns `None` if a turn is in flight.
    pub fn try_begin_processing(&self) -> Option<ProcessingGuard<'_>> {
        self.processing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| ProcessingGuard { session: self })
    }
}

/// Clears the processing flag when dropped, on success and error paths alike.
#[derive(Debug)]
pub struct ProcessingGuard<'a> {
    session: &'a SharedSession,
}

impl Drop for ProcessingGuard<'_> {
    fn drop(&mut self) {
        self.session.processing.store(false, Ordering::Release);
    }
}
