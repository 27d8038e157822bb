//! # Transcription Service Response Model
//!
//! Typed view of the JSON messages Deepgram sends back over the listen
//! socket. Modeling the responses as a tagged union (one variant per `type`
//! value) turns missing-field surprises into explicit parse errors that the
//! receive loop can log and skip.

use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// A message from the transcription service, tagged by its `type` field.
///
/// Only `Results` drives behavior; the VAD/utterance events are decoded so
/// the receive loop can log them by name, and anything unrecognized lands in
/// `Unknown` without killing the loop.
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub enum ServiceMessage {
    Results(ResultsPayload),
    Metadata {},
    UtteranceEnd {},
    SpeechStarted {},
    #[serde(other)]
    Unknown,
}

/// Body of a `Results` message.
#[derive(Debug, Deserialize)]
pub struct ResultsPayload {
    #[serde(default)]
    pub is_final: bool,
    pub channel: Channel,
}

#[derive(Debug, Deserialize)]
pub struct Channel {
    pub alternatives: Vec<Alternative>,
}

#[derive(Debug, Deserialize)]
pub struct Alternative {
    pub transcript: String,
}

/// A completed transcript reported outward by the link's receive loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalTranscript {
    pub text: String,
}

impl ServiceMessage {
    /// Extract the reportable transcript, if any.
    ///
    /// Only the first alternative is considered, and only final, non-empty
    /// text is reported; interim results and empty finals are discarded.
    pub fn final_transcript(&self) -> Option<&str> {
        match self {
            ServiceMessage::Results(results) if results.is_final => results
                .channel
                .alternatives
                .first()
                .map(|alt| alt.transcript.as_str())
                .filter(|text| !text.is_empty()),
            _ => None,
        }
    }
}

/// Handle one text frame from the transcription service.
///
/// Parse failures are logged and swallowed — the receive loop persists.
/// Final transcripts go out over the channel; if the session side has gone
/// away the send error is ignored, since a briefly-outliving receive task is
/// an accepted part of fire-and-forget teardown.
pub fn handle_service_message(raw: &str, transcripts: &mpsc::UnboundedSender<FinalTranscript>) {
    let message: ServiceMessage = match serde_json::from_str(raw) {
        Ok(message) => message,
        Err(err) => {
            warn!("Failed to parse transcription service message: {}", err);
            return;
        }
    };

    if let Some(text) = message.final_transcript() {
        info!(transcript = %text, "Final transcript");
        let _ = transcripts.send(FinalTranscript {
            text: text.to_string(),
        });
    } else {
        debug!(message = ?message, "Transcription service event");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn results_json(is_final: bool, transcript: &str) -> String {
        format!(
            r#"{{"type":"Results","is_final":{},"channel":{{"alternatives":[{{"transcript":"{}"}}]}}}}"#,
            is_final, transcript
        )
    }

    #[test]
    fn test_interim_results_are_discarded() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        handle_service_message(&results_json(false, "hello"), &tx);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_final_result_is_reported_once() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        handle_service_message(&results_json(true, "hello"), &tx);

        assert_eq!(
            rx.try_recv().unwrap(),
            FinalTranscript {
                text: "hello".to_string()
            }
        );
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_empty_final_is_discarded() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        handle_service_message(&results_json(true, ""), &tx);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_unparseable_message_is_swallowed() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        handle_service_message("not json at all", &tx);
        handle_service_message(r#"{"no_type_field":true}"#, &tx);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_unknown_type_parses_to_unknown() {
        let message: ServiceMessage =
            serde_json::from_str(r#"{"type":"SomethingNew","extra":1}"#).unwrap();
        assert!(matches!(message, ServiceMessage::Unknown));
        assert!(message.final_transcript().is_none());
    }

    #[test]
    fn test_vad_events_parse() {
        let utterance: ServiceMessage =
            serde_json::from_str(r#"{"type":"UtteranceEnd","last_word_end":1.2}"#).unwrap();
        assert!(matches!(utterance, ServiceMessage::UtteranceEnd {}));

        let started: ServiceMessage =
            serde_json::from_str(r#"{"type":"SpeechStarted","timestamp":0.5}"#).unwrap();
        assert!(matches!(started, ServiceMessage::SpeechStarted {}));
    }

    #[test]
    fn test_only_first_alternative_is_considered() {
        let raw = r#"{"type":"Results","is_final":true,"channel":{"alternatives":[
            {"transcript":"first"},{"transcript":"second"}]}}"#;
        let message: ServiceMessage = serde_json::from_str(raw).unwrap();
        assert_eq!(message.final_transcript(), Some("first"));
    }

    #[test]
    fn test_no_alternatives_is_not_reported() {
        let raw = r#"{"type":"Results","is_final":true,"channel":{"alternatives":[]}}"#;
        let message: ServiceMessage = serde_json::from_str(raw).unwrap();
        assert!(message.final_transcript().is_none());
    }
}
