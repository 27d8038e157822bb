//! # Audio Frame Filter
//!
//! Silence suppression for the forwarding path. A frame whose every byte is
//! zero carries no signal under the stream's encoding and is not worth a
//! trip to the transcription service.
//!
//! This is a coarse, stateless heuristic, not a voice-activity detector:
//! no smoothing, no hysteresis, no hangover window.

/// Stateless frame-level silence filter.
#[derive(Debug, Default, Clone, Copy)]
pub struct FrameFilter;

impl FrameFilter {
    pub fn new() -> Self {
        Self
    }

    /// Whether a decoded frame carries signal worth forwarding.
    ///
    /// Rejects frames where every byte equals zero; an empty frame is
    /// vacuously all-zero and also rejected.
    pub fn accept(&self, frame: &[u8]) -> bool {
        frame.iter().any(|&byte| byte != 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_pure_silence() {
        let filter = FrameFilter::new();
        assert!(!filter.accept(&[0u8; 160]));
    }

    #[test]
    fn test_rejects_empty_frame() {
        let filter = FrameFilter::new();
        assert!(!filter.accept(&[]));
    }

    #[test]
    fn test_accepts_any_signal() {
        let filter = FrameFilter::new();

        // A single non-zero byte is enough.
        let mut frame = vec![0u8; 160];
        frame[159] = 1;
        assert!(filter.accept(&frame));

        assert!(filter.accept(&[0xff; 160]));
    }
}
