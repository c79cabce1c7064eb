//! A single chat turn, run in its own task so the socket keeps reading.

use super::{
    protocol::ServerMessage,
    session::{SocketSink, send_msg},
};
use crate::{models::MessageView, state::AppState};
use anyhow::Result;
use parley_core::{
    capture::AudioClip,
    exchange::{ExchangeError, ExchangeOutcome},
    playback::{PlaybackOutcome, SpeechPlayer},
    profile::UserProfile,
    session::SharedSession,
};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

pub type SharedPlayer = Arc<Mutex<SpeechPlayer>>;

pub enum Utterance {
    Text(String),
    Audio(AudioClip),
}

pub async fn run_turn(
    state: Arc<AppState>,
    session: Arc<SharedSession>,
    profile: UserProfile,
    utterance: Utterance,
    socket_tx: SocketSink,
    player: SharedPlayer,
) -> Result<()> {
    send_msg(&mut *socket_tx.lock().await, ServerMessage::Processing { active: true }).await?;

    let result = match &utterance {
        Utterance::Text(text) => state.exchange.send_text(&session, &profile, text).await,
        Utterance::Audio(clip) => state.exchange.send_audio(&session, &profile, clip).await,
    };

    let reply = report_outcome(result, &socket_tx).await?;
    if let Some(reply) = reply {
        speak(&player, &reply).await?;
    }
    Ok(())
}

/// Sends the turn's messages to the client and returns the text to read aloud.
async fn report_outcome(
    result: Result<ExchangeOutcome, ExchangeError>,
    socket_tx: &SocketSink,
) -> Result<Option<String>> {
    let mut sink = socket_tx.lock().await;
    match result {
        Ok(outcome) => {
            for message in &outcome.messages {
                send_msg(
                    &mut sink,
                    ServerMessage::Message {
                        message: MessageView::from(message),
                    },
                )
                .await?;
            }
            send_msg(&mut sink, ServerMessage::Processing { active: false }).await?;
            Ok(outcome.speak)
        }
        // Another turn owns the processing flag and will clear it.
        Err(ExchangeError::Busy) => {
            send_msg(
                &mut sink,
                ServerMessage::Notice {
                    message: ExchangeError::Busy.to_string(),
                },
            )
            .await?;
            Ok(None)
        }
        Err(e) => {
            send_msg(
                &mut sink,
                ServerMessage::Notice {
                    message: e.to_string(),
                },
            )
            .await?;
            send_msg(&mut sink, ServerMessage::Processing { active: false }).await?;
            Ok(None)
        }
    }
}

/// Reads `text` aloud. Utterances on one connection play one at a time.
pub async fn speak(player: &SharedPlayer, text: &str) -> Result<()> {
    match player.lock().await.speak(text).await? {
        PlaybackOutcome::Played { samples } => info!(samples, "Played tutor speech"),
        outcome => debug!(?outcome, "Nothing played"),
    }
    Ok(())
}
