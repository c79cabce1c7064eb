//! Conversation Exchange
//!
//! Drives a single chat turn: records the student's utterance, asks the model
//! for a reply, and appends the result to the session thread. Remote failures
//! never escape as errors; they are reported in the thread as a tutor notice
//! so the session stays usable.

use crate::{
    capture::{AudioClip, MIN_CLIP_BYTES},
    instructions::InputModality,
    llm_client::{LLMClient, ModelError, Turn},
    profile::UserProfile,
    reply::parse_reply,
    session::{Message, SharedSession},
};
use std::{future::Future, sync::Arc, time::Duration};
use tracing::{info, warn};

/// Local rejections. None of these reach the model or touch the thread.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ExchangeError {
    #[error("The tutor is still answering the previous message")]
    Busy,
    #[error("Message is empty")]
    EmptyMessage,
    #[error("Recording is too short")]
    ClipTooShort,
}

/// What a turn added to the thread.
#[derive(Debug, Clone)]
pub struct ExchangeOutcome {
    /// New messages, in thread order.
    pub messages: Vec<Message>,
    /// The tutor reply to read aloud. `None` when the turn failed.
    pub speak: Option<String>,
}

pub struct Exchange {
    client: Arc<dyn LLMClient>,
    timeout: Duration,
}

impl Exchange {
    pub fn new(client: Arc<dyn LLMClient>, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    pub async fn send_text(
        &self,
        session: &SharedSession,
        profile: &UserProfile,
        text: &str,
    ) -> Result<ExchangeOutcome, ExchangeError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ExchangeError::EmptyMessage);
        }
        let _guard = session
            .try_begin_processing()
            .ok_or(ExchangeError::Busy)?;

        let user_message = Message::user(text);
        let (instruction, history) = {
            let mut state = session.state().lock().await;
            let instruction = state.instructions(profile, InputModality::Text);
            let history = Turn::history(state.messages());
            state.push(user_message.clone());
            (instruction, history)
        };

        info!(user = %profile.username, "Sending text turn");
        let result = self
            .bounded(self.client.generate_text(&instruction, &history, text))
            .await;

        let (reply, speak) = match result {
            Ok(reply) => {
                let reply = reply.trim().to_string();
                (Message::tutor(reply.clone()), Some(reply))
            }
            Err(e) => {
                warn!(error = %e, "Text turn failed");
                (Message::notice(failure_notice(&e)), None)
            }
        };
        session.state().lock().await.push(reply.clone());

        Ok(ExchangeOutcome {
            messages: vec![user_message, reply],
            speak,
        })
    }

    pub async fn send_audio(
        &self,
        session: &SharedSession,
        profile: &UserProfile,
        clip: &AudioClip,
    ) -> Result<ExchangeOutcome, ExchangeError> {
        if clip.bytes.len() < MIN_CLIP_BYTES {
            return Err(ExchangeError::ClipTooShort);
        }
        let _guard = session
            .try_begin_processing()
            .ok_or(ExchangeError::Busy)?;

        let (instruction, history) = {
            let state = session.state().lock().await;
            (
                state.instructions(profile, InputModality::Audio),
                Turn::history(state.messages()),
            )
        };

        info!(
            user = %profile.username,
            bytes = clip.bytes.len(),
            mime_type = %clip.mime_type,
            "Sending audio turn"
        );
        let result = self
            .bounded(self.client.generate_text_from_audio(
                &instruction,
                &history,
                &clip.bytes,
                &clip.mime_type,
            ))
            .await;

        let outcome = match result {
            Ok(raw) => {
                let parsed = parse_reply(&raw);
                ExchangeOutcome {
                    messages: vec![
                        Message::user(parsed.transcription),
                        Message::tutor(parsed.response.clone()),
                    ],
                    speak: Some(parsed.response),
                }
            }
            Err(e) => {
                warn!(error = %e, "Audio turn failed");
                ExchangeOutcome {
                    messages: vec![Message::notice(failure_notice(&e))],
                    speak: None,
                }
            }
        };

        let mut state = session.state().lock().await;
        for message in &outcome.messages {
            state.push(message.clone());
        }
        Ok(outcome)
    }

    async fn bounded<T>(
        &self,
        call: impl Future<Output = Result<T, ModelError>>,
    ) -> Result<T, ModelError> {
        tokio::time::timeout(self.timeout, call)
            .await
            .unwrap_or(Err(ModelError::Timeout(self.timeout.as_secs())))
    }
}

/// The tutor-role text shown in place of a reply when a call fails.
pub fn failure_notice(error: &ModelError) -> String {
    match error {
        ModelError::MissingCredential => {
            "The tutor is not available: no API key has been configured.".to_string()
        }
        ModelError::Timeout(_) => {
            "The tutor took too long to answer. Please try again.".to_string()
        }
        other => format!("Sorry, I couldn't answer that ({other}). Please try again."),
    }
}
