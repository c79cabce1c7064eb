//! Manages the WebSocket connection lifecycle for a practice session.

use super::{
    output::SocketAudioOutput,
    protocol::{ClientMessage, ServerMessage},
    turn::{SharedPlayer, Utterance, run_turn, speak},
};
use crate::{models::SessionView, registry::SessionRegistry, state::AppState};
use anyhow::{Context, Result, anyhow};
use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use futures_util::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use parley_core::{
    capture::{CaptureError, Microphone, Recorder},
    exchange::ExchangeError,
    playback::{PLAYBACK_SAMPLE_RATE, SpeechPlayer},
    profile::UserProfile,
    session::SharedSession,
};
use std::{future::Future, ops::ControlFlow, sync::Arc};
use tokio::{sync::Mutex, task::JoinSet};
use tracing::{Instrument, debug, error, info, instrument, warn};

pub(crate) type SocketSink = Arc<Mutex<SplitSink<WebSocket, Message>>>;

const MIN_PLAYBACK_RATE: u32 = 8_000;
const MAX_PLAYBACK_RATE: u32 = 192_000;

/// Axum handler to upgrade an HTTP connection to a WebSocket.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

/// The browser's microphone. Capture happens client-side; the browser reports
/// whether permission was granted when recording starts.
#[derive(Debug, Default)]
pub struct BrowserMicrophone {
    granted: bool,
    in_use: bool,
}

impl BrowserMicrophone {
    pub fn set_granted(&mut self, granted: bool) {
        self.granted = granted;
    }
}

impl Microphone for BrowserMicrophone {
    fn acquire(&mut self) -> Result<(), CaptureError> {
        if !self.granted {
            return Err(CaptureError::PermissionDenied);
        }
        self.in_use = true;
        Ok(())
    }

    fn release(&mut self) {
        if self.in_use {
            debug!("Browser microphone released");
        }
        self.in_use = false;
    }
}

/// Main handler for an individual WebSocket connection.
///
/// Performs the `init` handshake, then runs the chat loop in its own task.
#[instrument(name = "ws_session", skip_all, fields(connection_id, session_id))]
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let connection_id: u32 = rand::random();
    tracing::Span::current().record("connection_id", connection_id);
    info!("New WebSocket connection. Awaiting initialization...");

    let (socket_tx, mut socket_rx) = socket.split();
    let socket_tx: SocketSink = Arc::new(Mutex::new(socket_tx));

    let init = match socket_rx.next().await {
        Some(Ok(Message::Text(text))) => initialize_session(&text, &state).await,
        Some(Ok(_)) => Err(anyhow!("First message was not a text `init` message.")),
        Some(Err(e)) => Err(anyhow!(e).context("Failed to read init message")),
        None => {
            info!("Client disconnected before sending init message.");
            return;
        }
    };
    let (session, playback_rate) = match init {
        Ok(init) => init,
        Err(e) => {
            error!("Session initialization failed: {:?}", e);
            let _ = send_msg(
                &mut *socket_tx.lock().await,
                ServerMessage::Error {
                    message: e.to_string(),
                },
            )
            .await;
            return;
        }
    };

    let snapshot = session.snapshot().await;
    let session_id = snapshot.id;
    if send_msg(
        &mut *socket_tx.lock().await,
        ServerMessage::Initialized {
            session: SessionView::from(&snapshot),
        },
    )
    .await
    .is_err()
    {
        error!("Failed to send Initialized message to client.");
        return;
    }

    let chat_span = tracing::info_span!("chat_runtime", %session_id, mode = ?snapshot.mode);
    tokio::spawn(
        async move {
            if let Err(e) =
                run_chat_session(state, session, socket_tx, socket_rx, playback_rate).await
            {
                error!(error = ?e, "Chat session terminated with error.");
            }
            info!("Chat session finished.");
        }
        .instrument(chat_span),
    );
}

/// Parses the `init` message and attaches to a session owned by the current user.
async fn initialize_session(
    init_text: &str,
    state: &Arc<AppState>,
) -> Result<(Arc<SharedSession>, u32)> {
    let init_msg: ClientMessage =
        serde_json::from_str(init_text).context("Malformed init message")?;
    let ClientMessage::Init {
        session_id,
        playback_sample_rate,
    } = init_msg
    else {
        return Err(anyhow!("First message must be `init`"));
    };
    tracing::Span::current().record("session_id", &session_id.to_string());

    let user = state
        .current_user()
        .await
        .context("Please log in first")?;
    let session = state
        .sessions
        .get(session_id)
        .await
        .context("Session not found")?;
    if session.state().lock().await.owner != user.username {
        return Err(anyhow!("Session not found"));
    }

    let playback_rate = match playback_sample_rate {
        None => PLAYBACK_SAMPLE_RATE,
        Some(rate) if (MIN_PLAYBACK_RATE..=MAX_PLAYBACK_RATE).contains(&rate) => rate,
        Some(rate) => {
            warn!(rate, "Unsupported playback rate; using the synthesis rate");
            PLAYBACK_SAMPLE_RATE
        }
    };
    info!(username = %user.username, playback_rate, "Attached to practice session");
    Ok((session, playback_rate))
}

/// The main event loop for an attached WebSocket.
async fn run_chat_session(
    state: Arc<AppState>,
    session: Arc<SharedSession>,
    socket_tx: SocketSink,
    mut socket_rx: SplitStream<WebSocket>,
    playback_rate: u32,
) -> Result<()> {
    let player: SharedPlayer = Arc::new(Mutex::new(SpeechPlayer::new(
        state.llm_client.clone(),
        state.config.tts_voice.clone(),
        state.config.request_timeout,
        SocketAudioOutput::factory(socket_tx.clone(), playback_rate),
    )));
    let mut recorder = Recorder::new(BrowserMicrophone::default());
    let mut tasks = JoinSet::new();

    loop {
        tokio::select! {
            Some(msg_result) = socket_rx.next() => {
                match msg_result {
                    Ok(Message::Text(text)) => match serde_json::from_str::<ClientMessage>(&text) {
                        Ok(msg) => {
                            let flow = handle_client_message(msg, &state, &session, &socket_tx, &player, &mut recorder, &mut tasks).await?;
                            if flow.is_break() {
                                break;
                            }
                        }
                        Err(e) => warn!(error = %e, "Ignoring malformed client message."),
                    },
                    Ok(Message::Binary(data)) => {
                        if recorder.is_recording() {
                            if let Err(e) = recorder.push(&data) {
                                notice(&socket_tx, &format!("{}. Keep recordings under a few minutes.", e)).await?;
                            }
                        } else {
                            warn!("Received audio data from client, but no recording is active.");
                        }
                    }
                    Ok(Message::Close(_)) => {
                        info!("Client sent close frame. Shutting down session.");
                        break;
                    }
                    Ok(Message::Ping(_) | Message::Pong(_)) => {}
                    Err(e) => {
                        error!("Error receiving from client WebSocket: {:?}", e);
                        break;
                    }
                }
            },
            Some(joined) = tasks.join_next() => {
                if let Err(e) = joined {
                    error!(error = ?e, "Turn task panicked.");
                }
            },
            else => break,
        }
    }

    recorder.cancel();
    tasks.abort_all();
    info!("WebSocket connection closed.");
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn handle_client_message(
    msg: ClientMessage,
    state: &Arc<AppState>,
    session: &Arc<SharedSession>,
    socket_tx: &SocketSink,
    player: &SharedPlayer,
    recorder: &mut Recorder<BrowserMicrophone>,
    tasks: &mut JoinSet<()>,
) -> Result<ControlFlow<()>> {
    match msg {
        ClientMessage::UserMessage { text } => {
            return start_turn(state, session, socket_tx, player, tasks, Utterance::Text(text)).await;
        }
        ClientMessage::StartRecording {
            mime_type,
            microphone_granted,
        } => {
            recorder.microphone_mut().set_granted(microphone_granted);
            match recorder.press(&mime_type) {
                Ok(()) => {}
                Err(CaptureError::PermissionDenied) => {
                    notice(socket_tx, "Microphone access is needed to record. Please allow it in your browser.").await?;
                }
                Err(CaptureError::AlreadyRecording) => warn!("Ignoring start_recording while already recording."),
                Err(CaptureError::ClipTooLong) => {}
            }
        }
        ClientMessage::StopRecording if !recorder.is_recording() => {
            debug!("Ignoring stop_recording without an active recording.");
        }
        ClientMessage::StopRecording => match recorder.release() {
            Some(clip) => {
                return start_turn(state, session, socket_tx, player, tasks, Utterance::Audio(clip)).await;
            }
            None => notice(socket_tx, "Recording was too short. Hold the button while you speak.").await?,
        },
        ClientMessage::CancelRecording => recorder.cancel(),
        ClientMessage::Speak { text } => {
            let player = player.clone();
            spawn_task(tasks, async move { speak(&player, &text).await });
        }
        ClientMessage::Reset => {
            if let Err(reason) = check_attachment(&state.sessions, session, state.current_user().await).await {
                return detach(socket_tx, reason).await;
            }
            let Some(_guard) = session.try_begin_processing() else {
                notice(socket_tx, &ExchangeError::Busy.to_string()).await?;
                return Ok(ControlFlow::Continue(()));
            };
            session.state().lock().await.reset();
            info!("Thread cleared by client.");
            send_msg(&mut *socket_tx.lock().await, ServerMessage::Cleared).await?;
        }
        ClientMessage::Init { .. } => warn!("Ignoring repeated `init` message."),
    }
    Ok(ControlFlow::Continue(()))
}

/// Why a connection may no longer act on its session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Detached {
    LoggedOut,
    SessionClosed,
    OtherUser,
}

impl Detached {
    fn message(self) -> &'static str {
        match self {
            Detached::LoggedOut => "You have been logged out. Please log in again.",
            Detached::SessionClosed => "This practice session has been closed.",
            Detached::OtherUser => "This practice session belongs to another user.",
        }
    }
}

/// Confirms the session is still open and owned by the logged-in user, and
/// returns that user's current profile.
async fn check_attachment(
    sessions: &SessionRegistry,
    session: &Arc<SharedSession>,
    current: Option<UserProfile>,
) -> Result<UserProfile, Detached> {
    let profile = current.ok_or(Detached::LoggedOut)?;
    let (id, owner) = {
        let state = session.state().lock().await;
        (state.id, state.owner.clone())
    };
    match sessions.get(id).await {
        Some(registered) if Arc::ptr_eq(&registered, session) => {}
        _ => return Err(Detached::SessionClosed),
    }
    if profile.username != owner {
        return Err(Detached::OtherUser);
    }
    Ok(profile)
}

/// Reports a fatal error and closes the socket.
async fn detach(socket_tx: &SocketSink, reason: Detached) -> Result<ControlFlow<()>> {
    warn!(?reason, "Connection no longer attached to its session; closing.");
    let mut sink = socket_tx.lock().await;
    send_msg(
        &mut sink,
        ServerMessage::Error {
            message: reason.message().to_string(),
        },
    )
    .await?;
    sink.send(Message::Close(None)).await?;
    Ok(ControlFlow::Break(()))
}

/// Spawns a turn unless one is already in flight.
async fn start_turn(
    state: &Arc<AppState>,
    session: &Arc<SharedSession>,
    socket_tx: &SocketSink,
    player: &SharedPlayer,
    tasks: &mut JoinSet<()>,
    utterance: Utterance,
) -> Result<ControlFlow<()>> {
    let profile = match check_attachment(&state.sessions, session, state.current_user().await).await {
        Ok(profile) => profile,
        Err(reason) => return detach(socket_tx, reason).await,
    };
    if session.is_processing() {
        notice(socket_tx, &ExchangeError::Busy.to_string()).await?;
        return Ok(ControlFlow::Continue(()));
    }

    spawn_task(
        tasks,
        run_turn(
            state.clone(),
            session.clone(),
            profile,
            utterance,
            socket_tx.clone(),
            player.clone(),
        ),
    );
    Ok(ControlFlow::Continue(()))
}

fn spawn_task(tasks: &mut JoinSet<()>, task: impl Future<Output = Result<()>> + Send + 'static) {
    tasks.spawn(
        async move {
            if let Err(e) = task.await {
                warn!(error = ?e, "Turn task ended with error.");
            }
        }
        .in_current_span(),
    );
}

async fn notice(socket_tx: &SocketSink, message: &str) -> Result<()> {
    send_msg(
        &mut *socket_tx.lock().await,
        ServerMessage::Notice {
            message: message.to_string(),
        },
    )
    .await
}

/// A helper function to serialize and send a `ServerMessage` to the client.
pub(crate) async fn send_msg(
    socket_tx: &mut SplitSink<WebSocket, Message>,
    msg: ServerMessage,
) -> Result<()> {
    let serialized = serde_json::to_string(&msg)?;
    socket_tx.send(Message::Text(serialized.into())).await?;
    Ok(())
}
