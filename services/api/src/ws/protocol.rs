//! Defines the WebSocket message protocol between the browser client and the API server.

use crate::models::{MessageView, SessionView};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Messages sent from the client (browser) to the server.
#[derive(Deserialize, Debug, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Attaches the connection to a practice session. This must be the first message.
    Init {
        session_id: Uuid,
        /// Rate the browser plays audio at. Defaults to the synthesis rate.
        #[serde(default)]
        playback_sample_rate: Option<u32>,
    },
    /// A typed message from the student.
    UserMessage { text: String },
    /// The record button was pressed. Binary frames that follow are audio.
    StartRecording {
        mime_type: String,
        /// Whether the browser obtained microphone permission.
        #[serde(default = "granted_by_default")]
        microphone_granted: bool,
    },
    /// The record button was released; the clip is submitted.
    StopRecording,
    /// The recording was abandoned; buffered audio is dropped.
    CancelRecording,
    /// Read a message aloud again.
    Speak { text: String },
    /// Clear the thread.
    Reset,
}

fn granted_by_default() -> bool {
    true
}

/// Messages sent from the server to the client (browser).
#[derive(Serialize, Debug, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Confirms the handshake and carries the current thread.
    Initialized { session: SessionView },
    /// A message appended to the thread.
    Message { message: MessageView },
    /// The tutor started or finished working on a turn.
    Processing { active: bool },
    /// A chunk of tutor speech (base64 encoded PCM16, mono).
    AudioChunk { data: String, sample_rate: u32 },
    SpeakingStart,
    SpeakingEnd,
    /// A transient, non-fatal problem that does not belong in the thread.
    Notice { message: String },
    /// The thread was cleared.
    Cleared,
    /// Reports a fatal error to the client.
    Error { message: String },
}
