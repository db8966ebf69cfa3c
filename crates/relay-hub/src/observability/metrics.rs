//! Metrics definitions for the Relay Hub
//!
//! All metrics follow Prometheus naming conventions:
//! - `relay_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Labels are bounded:
//! - `role`: 2 values (master, client)
//! - `kind`: 2 values (message, typing)
//! - `reason`: bounded by `DropReason`, `EnqueueError` and `ProtocolError`

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Initialize the Prometheus metrics recorder and return the handle
/// for serving `/metrics`.
///
/// Must be called before any metrics are recorded.
///
/// # Errors
///
/// Returns error if the recorder fails to install (e.g., already installed).
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        // Dispatch happens entirely in memory; anything over a few ms is a stall
        .set_buckets_for_metric(
            Matcher::Prefix("relay_dispatch".to_string()),
            &[
                0.000_05, 0.000_1, 0.000_25, 0.000_5, 0.001, 0.0025, 0.005, 0.010, 0.050,
            ],
        )
        .map_err(|e| format!("Failed to set dispatch duration buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus metrics recorder: {e}"))
}

// ============================================================================
// Session Metrics
// ============================================================================

/// Set the number of connected sessions for a role.
///
/// Metric: `relay_sessions_active`
/// Labels: `role`
///
/// Displaced masters count as master sessions until they disconnect.
pub fn set_sessions_active(role: &str, count: usize) {
    // usize to f64 conversion is safe for realistic session counts (< 2^53)
    #[allow(clippy::cast_precision_loss)]
    gauge!("relay_sessions_active", "role" => role.to_string()).set(count as f64);
}

/// Record a session registered with the hub.
///
/// Metric: `relay_sessions_total`
/// Labels: `role`
pub fn record_session_opened(role: &str) {
    counter!("relay_sessions_total", "role" => role.to_string()).increment(1);
}

/// Record a master replaced by a newer master connection.
///
/// Metric: `relay_master_replaced_total`
pub fn record_master_replaced() {
    counter!("relay_master_replaced_total").increment(1);
}

// ============================================================================
// Routing Metrics
// ============================================================================

/// Record an event delivered to its recipient's outbound queue.
///
/// Metric: `relay_events_routed_total`
/// Labels: `kind` (message, typing)
pub fn record_event_routed(kind: &str) {
    counter!("relay_events_routed_total", "kind" => kind.to_string()).increment(1);
}

/// Record an event that was not delivered.
///
/// Metric: `relay_events_dropped_total`
/// Labels: `reason`
///
/// Reasons: no_master, no_target, target_gone, stale_master, queue_full,
/// queue_closed. A steady `queue_full` rate means a peer is not reading.
pub fn record_event_dropped(reason: &str) {
    counter!("relay_events_dropped_total", "reason" => reason.to_string()).increment(1);
}

/// Record an inbound frame rejected before reaching the hub.
///
/// Metric: `relay_frames_rejected_total`
/// Labels: `reason` (malformed, too_large, role_mismatch, binary)
pub fn record_frame_rejected(reason: &str) {
    counter!("relay_frames_rejected_total", "reason" => reason.to_string()).increment(1);
}

/// Record time spent handling one dispatch inside the hub loop.
///
/// Metric: `relay_dispatch_duration_seconds`
/// Labels: `kind`
pub fn record_dispatch_duration(kind: &str, duration: Duration) {
    histogram!("relay_dispatch_duration_seconds", "kind" => kind.to_string())
        .record(duration.as_secs_f64());
}

// ============================================================================
// Hub Mailbox
// ============================================================================

/// Set the hub intake depth.
///
/// Metric: `relay_hub_mailbox_depth`
///
/// High values mean the hub loop is falling behind.
pub fn set_hub_mailbox_depth(depth: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("relay_hub_mailbox_depth").set(depth as f64);
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    // These run against the global no-op recorder; they only exercise the
    // recording paths. Value assertions use the debugging recorder below.

    #[test]
    fn test_set_sessions_active() {
        set_sessions_active("master", 0);
        set_sessions_active("master", 1);
        set_sessions_active("client", 250);
    }

    #[test]
    fn test_record_session_counters() {
        record_session_opened("master");
        record_session_opened("client");
        record_master_replaced();
    }

    #[test]
    fn test_record_routing_counters() {
        record_event_routed("message");
        record_event_routed("typing");
        for reason in [
            "no_master",
            "no_target",
            "target_gone",
            "stale_master",
            "queue_full",
            "queue_closed",
        ] {
            record_event_dropped(reason);
        }
        record_frame_rejected("malformed");
        record_frame_rejected("too_large");
    }

    #[test]
    fn test_record_dispatch_duration() {
        record_dispatch_duration("message", Duration::from_micros(40));
        record_dispatch_duration("typing", Duration::from_millis(2));
    }

    #[test]
    fn test_set_hub_mailbox_depth() {
        set_hub_mailbox_depth(0);
        set_hub_mailbox_depth(600);
    }

    #[test]
    fn test_counters_with_debugging_recorder() {
        use metrics_util::debugging::{DebugValue, DebuggingRecorder};

        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();

        metrics::with_local_recorder(&recorder, || {
            record_event_dropped("queue_full");
            record_event_dropped("queue_full");
            record_event_routed("message");
        });

        let snapshot = snapshotter.snapshot().into_vec();
        let dropped = snapshot
            .iter()
            .find(|(key, _, _, _)| key.key().name() == "relay_events_dropped_total")
            .map(|(_, _, _, value)| value)
            .unwrap();
        assert!(matches!(dropped, DebugValue::Counter(2)), "got {dropped:?}");

        let routed = snapshot
            .iter()
            .find(|(key, _, _, _)| key.key().name() == "relay_events_routed_total")
            .map(|(_, _, _, value)| value)
            .unwrap();
        assert!(matches!(routed, DebugValue::Counter(1)), "got {routed:?}");
    }
}
