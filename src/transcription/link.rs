//! # Transcription Link
//!
//! Owns the single outbound WebSocket connection from one bridge session to
//! the Deepgram listen endpoint: connect, send binary audio, interpret JSON
//! result events, close.
//!
//! ## Lifecycle:
//! `Disconnected -> Connecting -> Open -> Closed`, driven lazily — the link
//! is created on the stream's `start` event and torn down on `stop`,
//! `closed`, or connection close.
//!
//! ## Concurrency:
//! `connect` never blocks the caller: it spawns one background task that
//! performs the handshake and then runs a `select!` loop over the session's
//! command channel and the service socket. The task captures only link-owned
//! handles (shared state flag, channels), never the session, so a task that
//! briefly outlives its session cannot touch freed session state. `close` is
//! fire-and-forget: it requests the socket close and returns without joining
//! the task.

use crate::config::DeepgramConfig;
use crate::error::{BridgeError, BridgeResult};
use crate::transcription::messages::{handle_service_message, FinalTranscript};

use futures_util::{SinkExt, StreamExt};
use std::sync::{Arc, RwLock};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::Message;
use tracing::{debug, error, info, warn};

/// Connection state of the link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// No connection attempted, or credentials were refused
    Disconnected,
    /// Handshake in flight on the background task
    Connecting,
    /// Connected; audio may be forwarded
    Open,
    /// Torn down (or handshake failed); terminal
    Closed,
}

/// Commands from the session to the link's background task.
enum LinkCommand {
    Audio(Vec<u8>),
    Close,
}

/// Handle to one outbound transcription connection.
///
/// At most one link is open per session; the session closes its link before
/// replacing or discarding it.
pub struct TranscriptionLink {
    state: Arc<RwLock<LinkState>>,
    commands: Option<mpsc::UnboundedSender<LinkCommand>>,
    config: DeepgramConfig,
}

impl TranscriptionLink {
    pub fn new(config: DeepgramConfig) -> Self {
        Self {
            state: Arc::new(RwLock::new(LinkState::Disconnected)),
            commands: None,
            config,
        }
    }

    /// Current connection state.
    pub fn state(&self) -> LinkState {
        *self.state.read().unwrap()
    }

    /// Open the connection to the transcription service.
    ///
    /// Fails fast — logged, no connection attempt — when the credential is
    /// absent or still the placeholder. That is a configuration error, not a
    /// runtime fault, and must not take the session down.
    ///
    /// Otherwise the handshake and receive loop run on a background task and
    /// this call returns immediately with the link in `Connecting`. Final
    /// transcripts are emitted over `transcripts`.
    pub fn connect(&mut self, transcripts: mpsc::UnboundedSender<FinalTranscript>) {
        if !self.config.has_credentials() {
            let err = BridgeError::ConfigError(
                "Deepgram API key not set; set DEEPGRAM_API_KEY in the environment \
                 or a .env file. Audio will not be transcribed"
                    .to_string(),
            );
            error!("{}", err);
            return;
        }

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        self.commands = Some(command_tx);
        set_state(&self.state, LinkState::Connecting);

        tokio::spawn(run_link(
            self.config.clone(),
            Arc::clone(&self.state),
            command_rx,
            transcripts,
        ));
    }

    /// Forward one audio frame as a binary message.
    ///
    /// Returns a benign error when the link is not open; the caller logs it
    /// and moves on. Never faults against a closed connection.
    pub fn send_audio(&self, bytes: Vec<u8>) -> BridgeResult<()> {
        let state = self.state();
        if state != LinkState::Open {
            return Err(BridgeError::SendError(format!(
                "link is {:?}, not open",
                state
            )));
        }

        match &self.commands {
            Some(commands) => commands
                .send(LinkCommand::Audio(bytes))
                .map_err(|_| BridgeError::SendError("link task has exited".to_string())),
            None => Err(BridgeError::SendError("link was never connected".to_string())),
        }
    }

    /// Close the connection. Idempotent, best-effort, fire-and-forget.
    ///
    /// Requests the socket close and marks the link `Closed` without waiting
    /// for the background task to drain; nothing downstream depends on the
    /// task's exact exit time.
    pub fn close(&mut self) {
        if let Some(commands) = self.commands.take() {
            let _ = commands.send(LinkCommand::Close);
        }
        set_state(&self.state, LinkState::Closed);
    }

    /// Build a link that behaves as already-open, with the command stream
    /// exposed so tests can observe exactly what gets forwarded.
    #[cfg(test)]
    pub(crate) fn open_for_tests() -> (Self, mpsc::UnboundedReceiver<Vec<u8>>) {
        let (command_tx, mut command_rx) = mpsc::unbounded_channel();
        let (audio_tx, audio_rx) = mpsc::unbounded_channel();

        // Strip the command envelope so tests assert on raw frames.
        tokio::spawn(async move {
            while let Some(command) = command_rx.recv().await {
                if let LinkCommand::Audio(bytes) = command {
                    let _ = audio_tx.send(bytes);
                }
            }
        });

        let link = Self {
            state: Arc::new(RwLock::new(LinkState::Open)),
            commands: Some(command_tx),
            config: DeepgramConfig {
                api_key: "test-key".to_string(),
                endpoint: "ws://127.0.0.1:1/listen".to_string(),
                model: "nova-2".to_string(),
                language: "en-US".to_string(),
                utterance_end_ms: 1000,
            },
        };

        (link, audio_rx)
    }
}

impl Drop for TranscriptionLink {
    fn drop(&mut self) {
        // Dropping the command sender is enough to stop the task, but go
        // through close() so the state flag agrees with reality.
        self.close();
    }
}

fn set_state(state: &Arc<RwLock<LinkState>>, new_state: LinkState) {
    *state.write().unwrap() = new_state;
}

/// Background task: handshake, then pump audio out and results in.
async fn run_link(
    config: DeepgramConfig,
    state: Arc<RwLock<LinkState>>,
    mut commands: mpsc::UnboundedReceiver<LinkCommand>,
    transcripts: mpsc::UnboundedSender<FinalTranscript>,
) {
    let mut request = match config.listen_url().into_client_request() {
        Ok(request) => request,
        Err(err) => {
            error!("Invalid transcription service URL: {}", err);
            set_state(&state, LinkState::Closed);
            return;
        }
    };

    let auth = format!("Token {}", config.api_key);
    match HeaderValue::from_str(&auth) {
        Ok(value) => {
            request.headers_mut().insert(AUTHORIZATION, value);
        }
        Err(err) => {
            error!("Deepgram API key is not a valid header value: {}", err);
            set_state(&state, LinkState::Closed);
            return;
        }
    }

    let (socket, _response) = match connect_async(request).await {
        Ok(connected) => connected,
        Err(err) => {
            // Logged, never escalated to the session.
            let err = BridgeError::RemoteError(format!("handshake failed: {}", err));
            error!("{}", err);
            set_state(&state, LinkState::Closed);
            return;
        }
    };

    // The session may have requested close while the handshake was in
    // flight; don't reopen a link the owner already gave up on.
    {
        let mut current = state.write().unwrap();
        if *current == LinkState::Closed {
            drop(current);
            debug!("Link closed during handshake, dropping connection");
            return;
        }
        *current = LinkState::Open;
    }

    info!(model = %config.model, "Connected to transcription service");

    let (mut sink, mut stream) = socket.split();

    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(LinkCommand::Audio(bytes)) => {
                    if let Err(err) = sink.send(Message::Binary(bytes)).await {
                        warn!("Failed to send audio to transcription service: {}", err);
                    }
                }
                Some(LinkCommand::Close) | None => {
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                }
            },
            message = stream.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    handle_service_message(&text, &transcripts);
                }
                Some(Ok(Message::Close(frame))) => {
                    debug!(frame = ?frame, "Transcription service closed the connection");
                    break;
                }
                Some(Ok(_)) => {
                    // Binary/ping/pong frames from the service carry nothing
                    // the bridge consumes.
                }
                Some(Err(err)) => {
                    warn!("{}", BridgeError::RemoteError(err.to_string()));
                    break;
                }
                None => {
                    debug!("Transcription service stream ended");
                    break;
                }
            },
        }
    }

    set_state(&state, LinkState::Closed);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unconfigured_link() -> TranscriptionLink {
        TranscriptionLink::new(DeepgramConfig {
            api_key: crate::config::PLACEHOLDER_API_KEY.to_string(),
            endpoint: "wss://api.deepgram.com/v1/listen".to_string(),
            model: "nova-2".to_string(),
            language: "en-US".to_string(),
            utterance_end_ms: 1000,
        })
    }

    #[test]
    fn test_new_link_is_disconnected() {
        let link = unconfigured_link();
        assert_eq!(link.state(), LinkState::Disconnected);
    }

    #[test]
    fn test_send_audio_before_connect_is_benign() {
        let link = unconfigured_link();
        let result = link.send_audio(vec![1, 2, 3]);
        assert!(matches!(result, Err(BridgeError::SendError(_))));
    }

    #[test]
    fn test_connect_with_placeholder_credentials_refuses() {
        let mut link = unconfigured_link();
        let (tx, _rx) = mpsc::unbounded_channel();

        // No runtime needed: the refusal path never spawns.
        link.connect(tx);
        assert_eq!(link.state(), LinkState::Disconnected);
        assert!(link.send_audio(vec![1]).is_err());
    }

    #[tokio::test]
    async fn test_connect_with_credentials_starts_handshake() {
        let mut link = TranscriptionLink::new(DeepgramConfig {
            api_key: "dg_real_enough".to_string(),
            endpoint: "ws://127.0.0.1:1/listen".to_string(),
            model: "nova-2".to_string(),
            language: "en-US".to_string(),
            utterance_end_ms: 1000,
        });
        let (tx, _rx) = mpsc::unbounded_channel();

        // Under the current-thread test runtime the spawned task hasn't run
        // yet, so the synchronous transition is observable.
        link.connect(tx);
        assert_eq!(link.state(), LinkState::Connecting);
    }

    #[tokio::test]
    async fn test_open_link_forwards_audio() {
        let (link, mut audio_rx) = TranscriptionLink::open_for_tests();

        link.send_audio(vec![9, 9, 9]).unwrap();
        assert_eq!(audio_rx.recv().await.unwrap(), vec![9, 9, 9]);
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_blocks_sends() {
        let (mut link, _audio_rx) = TranscriptionLink::open_for_tests();

        link.close();
        assert_eq!(link.state(), LinkState::Closed);

        // Closing again is a no-op, and sends stay benign errors.
        link.close();
        assert_eq!(link.state(), LinkState::Closed);
        assert!(matches!(
            link.send_audio(vec![1]),
            Err(BridgeError::SendError(_))
        ));
    }
}
