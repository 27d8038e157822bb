//! # Media Stream Bridge Handler
//!
//! The core of the service: one WebSocket connection from the telephony
//! provider becomes one bridge session that relays inbound call audio to the
//! transcription service and surfaces final transcripts.
//!
//! ## WebSocket Protocol (Twilio Media Streams):
//! JSON text frames, one object per message, dispatched on the `event` field:
//! 1. `connected` — remote handshake acknowledgement, no-op
//! 2. `start` — stream metadata; the transcription link is opened here
//! 3. `media` — base64 mu-law audio chunk with a track label
//! 4. `stop` — the stream ended; the link is torn down, the session lives on
//! 5. `closed` — terminal; link torn down and the connection stops
//!
//! ## Structure:
//! [`BridgeSession`] is the plain state machine (`on_open` / `on_message` /
//! `on_close`) with no actix types in sight, so the dispatch rules are unit
//! testable. [`MediaStreamBridge`] is the thin actix actor around it: it
//! owns the connection, feeds frames in arrival order into the session, and
//! echoes final transcripts back to the peer.

use crate::audio::{FrameFilter, MediaFrame};
use crate::config::DeepgramConfig;
use crate::error::{BridgeError, BridgeResult};
use crate::state::AppState;
use crate::transcription::{FinalTranscript, LinkState, TranscriptionLink};

use actix::prelude::*;
use actix_web::{web, HttpRequest, HttpResponse, Result as ActixResult};
use actix_web_actors::ws;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// How often the bridge pings an idle peer.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// How long without any traffic before the connection is considered dead.
const CLIENT_TIMEOUT: Duration = Duration::from_secs(60);

/// An inbound stream event, tagged by its `event` field.
///
/// Modeling the protocol as a tagged union means a message with a missing
/// or unusable payload fails at parse time as one `MalformedEvent`, instead
/// of surfacing as a missing-key panic mid-dispatch. Event kinds this bridge
/// does not consume (`mark`, `dtmf`, ...) land in `Unknown` and are ignored.
#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum StreamEvent {
    Connected,
    Start {
        /// Opaque stream metadata from the provider (stream/call SIDs,
        /// declared tracks, custom parameters). Stored, not interpreted.
        start: Map<String, Value>,
    },
    Media {
        media: MediaPayload,
    },
    Stop,
    Closed,
    #[serde(other)]
    Unknown,
}

/// Payload of a `media` event: base64 audio plus an optional track label.
#[derive(Debug, Deserialize)]
pub struct MediaPayload {
    pub payload: String,
    #[serde(default)]
    pub track: Option<String>,
}

/// Messages the bridge sends back to the inbound peer.
#[derive(Debug, Serialize)]
#[serde(tag = "event", rename_all = "lowercase")]
enum BridgeReply {
    Transcript { text: String },
}

/// What the session wants done with the connection after an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOutcome {
    /// Keep processing events
    Continue,
    /// `closed` was received; no further event processing is required
    Terminate,
}

/// Per-connection bridge state machine.
///
/// ## Ownership:
/// The session exclusively owns its [`TranscriptionLink`]; teardown always
/// closes the link before the session is discarded, so no background
/// receiver outlives its purpose unnoticed.
pub struct BridgeSession {
    /// Correlation id for this connection's log lines
    session_id: String,

    /// Whether any media event has arrived yet (diagnostic only)
    has_seen_media: bool,

    /// Successfully dispatched events (diagnostic only)
    message_count: u64,

    /// Metadata map from the `start` event
    stream_config: Option<Map<String, Value>>,

    /// The outbound transcription connection, created lazily on `start`
    link: Option<TranscriptionLink>,

    filter: FrameFilter,
    deepgram: DeepgramConfig,
    app_state: AppState,

    /// Where link receive loops deliver final transcripts
    transcripts: mpsc::UnboundedSender<FinalTranscript>,
}

impl BridgeSession {
    pub fn new(app_state: AppState, transcripts: mpsc::UnboundedSender<FinalTranscript>) -> Self {
        let deepgram = app_state.get_config().deepgram;
        Self {
            session_id: Uuid::new_v4().to_string(),
            has_seen_media: false,
            message_count: 0,
            stream_config: None,
            link: None,
            filter: FrameFilter::new(),
            deepgram,
            app_state,
            transcripts,
        }
    }

    /// Called when the inbound connection is established.
    pub fn on_open(&self) {
        info!(session_id = %self.session_id, "Stream connection established");
    }

    /// Parse and dispatch one inbound message.
    ///
    /// ## Error behavior:
    /// A returned error always means one dropped message or frame — the
    /// caller logs it and the session continues. `message_count` only moves
    /// on successful dispatch.
    pub fn on_message(&mut self, raw: &str) -> BridgeResult<EventOutcome> {
        let event: StreamEvent = serde_json::from_str(raw)?;

        let outcome = match event {
            StreamEvent::Connected => {
                debug!(session_id = %self.session_id, "Stream handshake acknowledged");
                EventOutcome::Continue
            }
            StreamEvent::Start { start } => {
                self.handle_start(start);
                EventOutcome::Continue
            }
            StreamEvent::Media { media } => {
                self.handle_media(media)?;
                EventOutcome::Continue
            }
            StreamEvent::Stop => {
                info!(session_id = %self.session_id, "Stream stopped");
                if let Some(link) = &mut self.link {
                    link.close();
                }
                EventOutcome::Continue
            }
            StreamEvent::Closed => {
                if let Some(link) = &mut self.link {
                    link.close();
                }
                EventOutcome::Terminate
            }
            StreamEvent::Unknown => {
                debug!(session_id = %self.session_id, "Ignoring unrecognized stream event");
                EventOutcome::Continue
            }
        };

        self.message_count += 1;
        Ok(outcome)
    }

    /// Called when the inbound connection goes away, for any reason.
    /// Idempotent: closing an already-closed link is a no-op.
    pub fn on_close(&mut self) {
        if let Some(link) = &mut self.link {
            link.close();
        }

        info!(
            session_id = %self.session_id,
            messages = self.message_count,
            saw_media = self.has_seen_media,
            "Stream connection closed"
        );
    }

    /// `start` event: store the stream metadata and open the link.
    ///
    /// A second `start` on a live session is treated as an idempotent reset:
    /// the existing link is closed before a fresh one is connected, so at
    /// most one link is ever open per session.
    fn handle_start(&mut self, start: Map<String, Value>) {
        if let Some(mut existing) = self.link.take() {
            warn!(
                session_id = %self.session_id,
                "Duplicate start event, resetting transcription link"
            );
            existing.close();
        }

        let stream_sid = start
            .get("streamSid")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown");
        info!(session_id = %self.session_id, stream_sid = %stream_sid, "Stream started");

        self.stream_config = Some(start);

        let mut link = TranscriptionLink::new(self.deepgram.clone());
        link.connect(self.transcripts.clone());
        self.link = Some(link);
    }

    /// `media` event: decode, gate on track and link state, filter, forward.
    fn handle_media(&mut self, media: MediaPayload) -> BridgeResult<()> {
        let frame = MediaFrame::decode(&media.payload, media.track.as_deref())?;

        if !self.has_seen_media {
            self.has_seen_media = true;
            debug!(session_id = %self.session_id, "First media event received");
        }

        // Only the inbound call leg is transcribed; on conference calls the
        // outbound leg tends to carry echo.
        if !frame.track.is_inbound() {
            return Ok(());
        }

        let link = match &self.link {
            Some(link) if link.state() == LinkState::Open => link,
            _ => return Ok(()),
        };

        if !self.filter.accept(&frame.bytes) {
            self.app_state.record_frame_suppressed();
            return Ok(());
        }

        // Forwarding failures are logged and never close the session or the
        // link; the next frame gets its own chance.
        match link.send_audio(frame.bytes) {
            Ok(()) => self.app_state.record_frame_forwarded(),
            Err(err) => warn!(session_id = %self.session_id, "{}", err),
        }

        Ok(())
    }

    /// Events dispatched so far (diagnostic).
    pub fn message_count(&self) -> u64 {
        self.message_count
    }

    /// Whether any media has arrived (diagnostic).
    pub fn has_seen_media(&self) -> bool {
        self.has_seen_media
    }

    /// State of the owned link, if one was ever created.
    pub fn link_state(&self) -> Option<LinkState> {
        self.link.as_ref().map(|link| link.state())
    }

    /// Stream metadata captured from the `start` event.
    pub fn stream_config(&self) -> Option<&Map<String, Value>> {
        self.stream_config.as_ref()
    }

    #[cfg(test)]
    pub(crate) fn install_link(&mut self, link: TranscriptionLink) {
        self.link = Some(link);
    }
}

/// WebSocket actor wrapping one [`BridgeSession`].
///
/// ## Actor Model:
/// The actix mailbox gives the session its single logical thread of control:
/// events are handled strictly in arrival order with no reentrancy. The only
/// other flow touching the actor is the transcript stream, which arrives as
/// ordinary mailbox messages via `add_stream`.
pub struct MediaStreamBridge {
    session: BridgeSession,

    /// Receiver half of the transcript channel, handed to the mailbox in
    /// `started()`
    transcript_rx: Option<mpsc::UnboundedReceiver<FinalTranscript>>,

    app_state: AppState,

    /// Last time the peer showed any sign of life
    last_heartbeat: Instant,
}

impl MediaStreamBridge {
    pub fn new(app_state: AppState) -> Self {
        let (transcript_tx, transcript_rx) = mpsc::unbounded_channel();
        Self {
            session: BridgeSession::new(app_state.clone(), transcript_tx),
            transcript_rx: Some(transcript_rx),
            app_state,
            last_heartbeat: Instant::now(),
        }
    }
}

impl Actor for MediaStreamBridge {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        self.app_state.bridge_opened();
        self.session.on_open();

        // Final transcripts flow into the mailbox alongside peer frames.
        if let Some(transcript_rx) = self.transcript_rx.take() {
            ctx.add_stream(UnboundedReceiverStream::new(transcript_rx));
        }

        ctx.run_interval(HEARTBEAT_INTERVAL, |act, ctx| {
            if Instant::now().duration_since(act.last_heartbeat) > CLIENT_TIMEOUT {
                warn!("Stream heartbeat timeout, closing connection");
                ctx.stop();
            } else {
                ctx.ping(b"");
            }
        });
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        // Teardown discipline: the link is closed before the session object
        // is dropped, whatever ended the connection.
        self.session.on_close();
        self.app_state.bridge_closed();
    }
}

/// Inbound frames from the telephony side.
impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for MediaStreamBridge {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Text(text)) => match self.session.on_message(&text) {
                Ok(EventOutcome::Continue) => {
                    self.app_state.record_event_processed();
                }
                Ok(EventOutcome::Terminate) => {
                    self.app_state.record_event_processed();
                    info!("Stream reported closed, stopping bridge");
                    ctx.stop();
                }
                Err(err) => {
                    match &err {
                        BridgeError::DecodeError(_) => self.app_state.record_decode_failure(),
                        _ => self.app_state.record_malformed_event(),
                    }
                    // One dropped message; the session continues.
                    warn!("{}", err);
                }
            },
            Ok(ws::Message::Binary(data)) => {
                warn!(
                    "Unexpected binary frame from stream source ({} bytes), ignoring",
                    data.len()
                );
            }
            Ok(ws::Message::Ping(data)) => {
                self.last_heartbeat = Instant::now();
                ctx.pong(&data);
            }
            Ok(ws::Message::Pong(_)) => {
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Close(reason)) => {
                info!("Stream connection closed by peer: {:?}", reason);
                ctx.stop();
            }
            Ok(ws::Message::Continuation(_)) => {
                warn!("Unexpected continuation frame from stream source");
            }
            Ok(ws::Message::Nop) => {}
            Err(err) => {
                error!("Stream protocol error: {}", err);
                ctx.stop();
            }
        }
    }
}

/// Final transcripts from the link's receive loop.
impl StreamHandler<FinalTranscript> for MediaStreamBridge {
    fn handle(&mut self, transcript: FinalTranscript, ctx: &mut Self::Context) {
        self.app_state.record_final_transcript();

        let reply = BridgeReply::Transcript {
            text: transcript.text,
        };
        if let Ok(json) = serde_json::to_string(&reply) {
            ctx.text(json);
        }
    }

    fn finished(&mut self, _ctx: &mut Self::Context) {
        // The transcript channel draining is not a reason to drop the peer;
        // the connection lives until the stream side ends it.
    }
}

/// WebSocket endpoint handler: upgrades the HTTP request and hands the
/// connection to a fresh bridge actor. One bridge per inbound connection.
pub async fn media_stream(
    req: HttpRequest,
    stream: web::Payload,
    app_state: web::Data<AppState>,
) -> ActixResult<HttpResponse> {
    info!(
        "New stream connection request from: {:?}",
        req.connection_info().peer_addr()
    );

    ws::start(MediaStreamBridge::new(app_state.get_ref().clone()), &req, stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AppConfig, PLACEHOLDER_API_KEY};
    use base64::{engine::general_purpose::STANDARD, Engine as _};

    fn test_session() -> (BridgeSession, AppState, mpsc::UnboundedReceiver<FinalTranscript>) {
        let state = AppState::new(AppConfig::default());
        let (tx, rx) = mpsc::unbounded_channel();
        (BridgeSession::new(state.clone(), tx), state, rx)
    }

    fn media_event(bytes: &[u8], track: &str) -> String {
        format!(
            r#"{{"event":"media","media":{{"payload":"{}","track":"{}"}}}}"#,
            STANDARD.encode(bytes),
            track
        )
    }

    const START_EVENT: &str = r#"{"event":"start","sequenceNumber":"1",
        "start":{"streamSid":"MZtest","accountSid":"ACtest","tracks":["inbound"]},
        "streamSid":"MZtest"}"#;

    #[test]
    fn test_connected_event_is_noop() {
        let (mut session, _, _rx) = test_session();

        let outcome = session.on_message(r#"{"event":"connected","protocol":"Call"}"#);
        assert_eq!(outcome.unwrap(), EventOutcome::Continue);
        assert_eq!(session.message_count(), 1);
        assert!(session.link_state().is_none());
    }

    #[test]
    fn test_malformed_json_is_dropped() {
        let (mut session, _, _rx) = test_session();

        let result = session.on_message("{this is not json");
        assert!(matches!(result, Err(BridgeError::MalformedEvent(_))));

        // Dropped without altering the diagnostic counter or link state.
        assert_eq!(session.message_count(), 0);
        assert!(session.link_state().is_none());
    }

    #[test]
    fn test_missing_event_field_is_malformed() {
        let (mut session, _, _rx) = test_session();
        let result = session.on_message(r#"{"media":{"payload":"AAAA"}}"#);
        assert!(matches!(result, Err(BridgeError::MalformedEvent(_))));
        assert_eq!(session.message_count(), 0);
    }

    #[test]
    fn test_unknown_event_is_silently_ignored() {
        let (mut session, _, _rx) = test_session();

        let outcome = session.on_message(r#"{"event":"mark","mark":{"name":"x"}}"#);
        assert_eq!(outcome.unwrap(), EventOutcome::Continue);
        assert_eq!(session.message_count(), 1);
    }

    #[test]
    fn test_start_with_placeholder_credentials_stays_disconnected() {
        let (mut session, _, _rx) = test_session();

        session.on_message(START_EVENT).unwrap();

        assert_eq!(session.link_state(), Some(LinkState::Disconnected));
        let config = session.stream_config().expect("stream config stored");
        assert_eq!(
            config.get("streamSid").and_then(|v| v.as_str()),
            Some("MZtest")
        );
    }

    #[tokio::test]
    async fn test_start_with_credentials_begins_connecting() {
        let mut app_config = AppConfig::default();
        app_config.deepgram.api_key = "dg_real_enough".to_string();
        app_config.deepgram.endpoint = "ws://127.0.0.1:1/listen".to_string();
        let state = AppState::new(app_config);
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut session = BridgeSession::new(state, tx);

        session.on_message(START_EVENT).unwrap();

        // Current-thread test runtime: the handshake task hasn't run yet, so
        // the synchronous Disconnected -> Connecting transition is visible.
        assert_eq!(session.link_state(), Some(LinkState::Connecting));
    }

    #[tokio::test]
    async fn test_inbound_media_is_forwarded_exactly_once() {
        let (mut session, state, _rx) = test_session();
        let (link, mut audio_rx) = TranscriptionLink::open_for_tests();
        session.install_link(link);

        let audio: Vec<u8> = (1..=160).map(|i| (i % 251 + 1) as u8).collect();
        session.on_message(&media_event(&audio, "inbound")).unwrap();

        assert_eq!(audio_rx.recv().await.unwrap(), audio);
        assert!(audio_rx.try_recv().is_err(), "frame forwarded more than once");
        assert!(session.has_seen_media());
        assert_eq!(state.get_metrics_snapshot().frames_forwarded, 1);
    }

    #[tokio::test]
    async fn test_silent_media_is_suppressed() {
        let (mut session, state, _rx) = test_session();
        let (link, mut audio_rx) = TranscriptionLink::open_for_tests();
        session.install_link(link);

        session.on_message(&media_event(&[0u8; 160], "inbound")).unwrap();

        tokio::task::yield_now().await;
        assert!(audio_rx.try_recv().is_err(), "silence must not be forwarded");
        assert_eq!(state.get_metrics_snapshot().frames_suppressed, 1);
        assert_eq!(state.get_metrics_snapshot().frames_forwarded, 0);
        // The frame still counts as a seen, dispatched media event.
        assert!(session.has_seen_media());
        assert_eq!(session.message_count(), 1);
    }

    #[tokio::test]
    async fn test_outbound_track_is_never_forwarded() {
        let (mut session, state, _rx) = test_session();
        let (link, mut audio_rx) = TranscriptionLink::open_for_tests();
        session.install_link(link);

        session.on_message(&media_event(&[7u8; 160], "outbound")).unwrap();

        tokio::task::yield_now().await;
        assert!(audio_rx.try_recv().is_err());
        assert_eq!(state.get_metrics_snapshot().frames_forwarded, 0);
    }

    #[test]
    fn test_media_with_invalid_base64_is_dropped() {
        let (mut session, _, _rx) = test_session();

        let raw = r#"{"event":"media","media":{"payload":"!!!not-base64!!!","track":"inbound"}}"#;
        let result = session.on_message(raw);

        assert!(matches!(result, Err(BridgeError::DecodeError(_))));
        assert_eq!(session.message_count(), 0);
        assert!(!session.has_seen_media());
    }

    #[test]
    fn test_media_without_link_is_a_quiet_drop() {
        let (mut session, state, _rx) = test_session();

        // No start event, no link — the media event still dispatches fine.
        let outcome = session.on_message(&media_event(&[5u8; 160], "inbound"));
        assert_eq!(outcome.unwrap(), EventOutcome::Continue);
        assert_eq!(session.message_count(), 1);
        assert_eq!(state.get_metrics_snapshot().frames_forwarded, 0);
    }

    #[tokio::test]
    async fn test_stop_closes_link_but_session_continues() {
        let (mut session, _, _rx) = test_session();
        let (link, _audio_rx) = TranscriptionLink::open_for_tests();
        session.install_link(link);

        let outcome = session.on_message(r#"{"event":"stop"}"#).unwrap();
        assert_eq!(outcome, EventOutcome::Continue);
        assert_eq!(session.link_state(), Some(LinkState::Closed));

        // The session keeps processing events after the link is gone.
        let outcome = session.on_message(r#"{"event":"connected"}"#).unwrap();
        assert_eq!(outcome, EventOutcome::Continue);
        assert_eq!(session.message_count(), 2);
    }

    #[tokio::test]
    async fn test_closed_event_terminates() {
        let (mut session, _, _rx) = test_session();
        let (link, _audio_rx) = TranscriptionLink::open_for_tests();
        session.install_link(link);

        let outcome = session.on_message(r#"{"event":"closed"}"#).unwrap();
        assert_eq!(outcome, EventOutcome::Terminate);
        assert_eq!(session.link_state(), Some(LinkState::Closed));
    }

    #[tokio::test]
    async fn test_duplicate_start_resets_the_link() {
        let (mut session, _, _rx) = test_session();
        let (link, mut old_audio_rx) = TranscriptionLink::open_for_tests();
        session.install_link(link);

        session.on_message(START_EVENT).unwrap();

        // The replacement connect() refused on placeholder credentials, and
        // the old link was closed first: its command pump winds down, so the
        // observing channel ends instead of hanging.
        assert_eq!(session.link_state(), Some(LinkState::Disconnected));
        assert!(old_audio_rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_on_close_tears_down_idempotently() {
        let (mut session, _, _rx) = test_session();
        let (link, _audio_rx) = TranscriptionLink::open_for_tests();
        session.install_link(link);

        session.on_close();
        assert_eq!(session.link_state(), Some(LinkState::Closed));

        // A second close (connection close after a `closed` event) is a no-op.
        session.on_close();
        assert_eq!(session.link_state(), Some(LinkState::Closed));
    }
}
