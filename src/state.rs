//! # Application State Management
//!
//! Shared state that multiple HTTP handlers and bridge actors access
//! concurrently.
//!
//! ## Arc<RwLock<T>> Pattern:
//! - **Arc**: multiple owners (every handler and bridge holds a reference)
//! - **RwLock**: many readers or one writer at a time
//! - **T**: the protected data (configuration, metrics)
//!
//! Handlers read the config far more often than anyone writes it, and the
//! metrics are small counters updated under a short-lived write lock, so the
//! std-library lock is plenty here — no async lock needed for data that is
//! never held across an await point.

use crate::config::AppConfig;
use std::sync::{Arc, RwLock};
use std::time::Instant;

/// The main application state shared across handlers and bridge actors.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Application configuration (can be updated at runtime)
    pub config: Arc<RwLock<AppConfig>>,

    /// Process-wide bridge metrics
    pub metrics: Arc<RwLock<BridgeMetrics>>,

    /// When the server started (Instant is Copy, no lock needed)
    pub start_time: Instant,
}

/// Counters collected across all bridge sessions and HTTP requests.
///
/// These are diagnostic: nothing in the bridge's behavior depends on them.
/// They surface through the `/health` and `/api/v1/metrics` endpoints.
#[derive(Debug, Default, Clone)]
pub struct BridgeMetrics {
    /// Stream connections accepted since startup
    pub total_connections: u64,

    /// Stream connections currently open
    pub active_bridges: u32,

    /// Inbound stream events successfully dispatched
    pub events_processed: u64,

    /// Inbound messages dropped as unparseable
    pub malformed_events: u64,

    /// Media payloads dropped as invalid base64
    pub decode_failures: u64,

    /// Audio frames forwarded to the transcription service
    pub frames_forwarded: u64,

    /// Inbound-track frames suppressed as silence
    pub frames_suppressed: u64,

    /// Final transcripts reported outward
    pub final_transcripts: u64,

    /// HTTP requests served (recorded by the metrics middleware)
    pub request_count: u64,

    /// HTTP requests that ended in a 4xx/5xx
    pub error_count: u64,
}

impl AppState {
    /// Create a new AppState with the given configuration.
    pub fn new(config: AppConfig) -> Self {
        Self {
            config: Arc::new(RwLock::new(config)),
            metrics: Arc::new(RwLock::new(BridgeMetrics::default())),
            start_time: Instant::now(),
        }
    }

    /// Get a copy of the current configuration.
    ///
    /// Cloning releases the read lock immediately so other threads are never
    /// blocked while a handler works with the values.
    pub fn get_config(&self) -> AppConfig {
        self.config.read().unwrap().clone()
    }

    /// Replace the configuration after validating it.
    pub fn update_config(&self, new_config: AppConfig) -> Result<(), String> {
        match new_config.validate() {
            Ok(_) => {
                *self.config.write().unwrap() = new_config;
                Ok(())
            }
            Err(e) => Err(e.to_string()),
        }
    }

    /// Record a newly accepted stream connection.
    pub fn bridge_opened(&self) {
        let mut metrics = self.metrics.write().unwrap();
        metrics.total_connections += 1;
        metrics.active_bridges += 1;
    }

    /// Record a stream connection going away.
    pub fn bridge_closed(&self) {
        let mut metrics = self.metrics.write().unwrap();
        // Guard against underflow if close is observed twice.
        if metrics.active_bridges > 0 {
            metrics.active_bridges -= 1;
        }
    }

    pub fn record_event_processed(&self) {
        self.metrics.write().unwrap().events_processed += 1;
    }

    pub fn record_malformed_event(&self) {
        self.metrics.write().unwrap().malformed_events += 1;
    }

    pub fn record_decode_failure(&self) {
        self.metrics.write().unwrap().decode_failures += 1;
    }

    pub fn record_frame_forwarded(&self) {
        self.metrics.write().unwrap().frames_forwarded += 1;
    }

    pub fn record_frame_suppressed(&self) {
        self.metrics.write().unwrap().frames_suppressed += 1;
    }

    pub fn record_final_transcript(&self) {
        self.metrics.write().unwrap().final_transcripts += 1;
    }

    /// Increment the HTTP request counter (called by middleware).
    pub fn increment_request_count(&self) {
        self.metrics.write().unwrap().request_count += 1;
    }

    /// Increment the HTTP error counter.
    pub fn increment_error_count(&self) {
        self.metrics.write().unwrap().error_count += 1;
    }

    /// Get a consistent snapshot of current metrics.
    pub fn get_metrics_snapshot(&self) -> BridgeMetrics {
        self.metrics.read().unwrap().clone()
    }

    /// Get server uptime in seconds.
    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bridge_lifecycle_counters() {
        let state = AppState::new(AppConfig::default());

        state.bridge_opened();
        state.bridge_opened();
        state.bridge_closed();

        let snapshot = state.get_metrics_snapshot();
        assert_eq!(snapshot.total_connections, 2);
        assert_eq!(snapshot.active_bridges, 1);

        // A second close on an already-closed bridge must not underflow.
        state.bridge_closed();
        state.bridge_closed();
        assert_eq!(state.get_metrics_snapshot().active_bridges, 0);
    }

    #[test]
    fn test_update_config_validates() {
        let state = AppState::new(AppConfig::default());

        let mut bad = AppConfig::default();
        bad.server.port = 0;
        assert!(state.update_config(bad).is_err());

        // The stored config is untouched by the failed update.
        assert_eq!(state.get_config().server.port, 5001);
    }
}
