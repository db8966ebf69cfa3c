//! Hub metrics and mailbox monitoring.
//!
//! Mailbox depth thresholds for the hub intake:
//!
//! | Level    | Depth     |
//! |----------|-----------|
//! | Normal   | < 100     |
//! | Warning  | 100-500   |
//! | Critical | > 500     |
//!
//! Prometheus emission lives in [`crate::observability::metrics`]; the types
//! here are in-process counters the hub reports through `status()`.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Mailbox depth thresholds for the hub intake.
pub const HUB_MAILBOX_NORMAL: usize = 100;
pub const HUB_MAILBOX_WARNING: usize = 500;

/// Mailbox depth level for alerting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MailboxLevel {
    /// Below normal threshold.
    Normal,
    /// Between normal and warning thresholds.
    Warning,
    /// Above warning threshold.
    Critical,
}

/// Tracks hub intake depth.
///
/// Shared between the handles (which enqueue) and the hub loop (which
/// dequeues). Handles call [`MailboxMonitor::record_enqueue`] before sending so
/// the depth never goes negative when the hub picks a message up first.
#[derive(Debug)]
pub struct MailboxMonitor {
    instance_id: String,
    depth: AtomicUsize,
    peak_depth: AtomicUsize,
    messages_processed: AtomicU64,
}

impl MailboxMonitor {
    #[must_use]
    pub fn new(instance_id: impl Into<String>) -> Self {
        Self {
            instance_id: instance_id.into(),
            depth: AtomicUsize::new(0),
            peak_depth: AtomicUsize::new(0),
            messages_processed: AtomicU64::new(0),
        }
    }

    /// Record a message about to be sent to the hub.
    pub fn record_enqueue(&self) {
        let new_depth = self.depth.fetch_add(1, Ordering::Relaxed) + 1;

        let mut current_peak = self.peak_depth.load(Ordering::Relaxed);
        while new_depth > current_peak {
            match self.peak_depth.compare_exchange_weak(
                current_peak,
                new_depth,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(actual) => current_peak = actual,
            }
        }

        let level = level_for_depth(new_depth);
        if level == MailboxLevel::Critical {
            warn!(
                target: "relay.actor.mailbox",
                instance_id = %self.instance_id,
                depth = new_depth,
                threshold = HUB_MAILBOX_WARNING,
                "Hub mailbox depth critical"
            );
        } else if level == MailboxLevel::Warning && new_depth == HUB_MAILBOX_NORMAL + 1 {
            // Log once when crossing into warning
            debug!(
                target: "relay.actor.mailbox",
                instance_id = %self.instance_id,
                depth = new_depth,
                "Hub mailbox depth elevated"
            );
        }
    }

    /// Undo an enqueue whose send failed.
    pub fn record_send_failed(&self) {
        self.decrement();
    }

    /// Record a message taken off the mailbox by the hub.
    pub fn record_dequeue(&self) {
        self.decrement();
        self.messages_processed.fetch_add(1, Ordering::Relaxed);
    }

    fn decrement(&self) {
        let _ = self
            .depth
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |d| {
                Some(d.saturating_sub(1))
            });
    }

    #[must_use]
    pub fn current_depth(&self) -> usize {
        self.depth.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn peak_depth(&self) -> usize {
        self.peak_depth.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn messages_processed(&self) -> u64 {
        self.messages_processed.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn current_level(&self) -> MailboxLevel {
        level_for_depth(self.current_depth())
    }
}

fn level_for_depth(depth: usize) -> MailboxLevel {
    if depth > HUB_MAILBOX_WARNING {
        MailboxLevel::Critical
    } else if depth > HUB_MAILBOX_NORMAL {
        MailboxLevel::Warning
    } else {
        MailboxLevel::Normal
    }
}

/// Lock-free counters updated by the hub loop.
///
/// Readable from anywhere (health logging, tests) without going through the
/// hub mailbox.
#[derive(Debug, Default)]
pub struct HubMetrics {
    active_clients: AtomicUsize,
    active_masters: AtomicUsize,
    events_routed: AtomicU64,
    events_dropped: AtomicU64,
    masters_replaced: AtomicU64,
}

/// Point-in-time copy of [`HubMetrics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HubMetricsSnapshot {
    pub active_clients: usize,
    /// Current master plus displaced masters still connected.
    pub active_masters: usize,
    pub events_routed: u64,
    pub events_dropped: u64,
    pub masters_replaced: u64,
}

impl HubMetrics {
    /// Create a new shared metrics instance.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_active_clients(&self, count: usize) {
        self.active_clients.store(count, Ordering::SeqCst);
    }

    pub fn set_active_masters(&self, count: usize) {
        self.active_masters.store(count, Ordering::SeqCst);
    }

    pub fn record_routed(&self) {
        self.events_routed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped(&self) {
        self.events_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_master_replaced(&self) {
        self.masters_replaced.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn snapshot(&self) -> HubMetricsSnapshot {
        HubMetricsSnapshot {
            active_clients: self.active_clients.load(Ordering::SeqCst),
            active_masters: self.active_masters.load(Ordering::SeqCst),
            events_routed: self.events_routed.load(Ordering::Relaxed),
            events_dropped: self.events_dropped.load(Ordering::Relaxed),
            masters_replaced: self.masters_replaced.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_mailbox_monitor_enqueue_dequeue() {
        let monitor = MailboxMonitor::new("relay-test");

        assert_eq!(monitor.current_depth(), 0);

        monitor.record_enqueue();
        monitor.record_enqueue();
        monitor.record_enqueue();
        assert_eq!(monitor.current_depth(), 3);
        assert_eq!(monitor.peak_depth(), 3);

        monitor.record_dequeue();
        assert_eq!(monitor.current_depth(), 2);
        assert_eq!(monitor.peak_depth(), 3);
        assert_eq!(monitor.messages_processed(), 1);
    }

    #[test]
    fn test_mailbox_monitor_send_failed() {
        let monitor = MailboxMonitor::new("relay-test");

        monitor.record_enqueue();
        monitor.record_send_failed();
        assert_eq!(monitor.current_depth(), 0);
        assert_eq!(monitor.messages_processed(), 0);
    }

    #[test]
    fn test_mailbox_monitor_never_underflows() {
        let monitor = MailboxMonitor::new("relay-test");

        monitor.record_dequeue();
        assert_eq!(monitor.current_depth(), 0);
    }

    #[test]
    fn test_mailbox_monitor_levels() {
        let monitor = MailboxMonitor::new("relay-test");
        assert_eq!(monitor.current_level(), MailboxLevel::Normal);

        for _ in 0..150 {
            monitor.record_enqueue();
        }
        assert_eq!(monitor.current_level(), MailboxLevel::Warning);

        for _ in 0..400 {
            monitor.record_enqueue();
        }
        assert_eq!(monitor.current_level(), MailboxLevel::Critical);
    }

    #[test]
    fn test_hub_metrics_snapshot() {
        let metrics = HubMetrics::new();

        metrics.set_active_clients(3);
        metrics.set_active_masters(1);
        metrics.record_routed();
        metrics.record_routed();
        metrics.record_dropped();
        metrics.record_master_replaced();

        assert_eq!(
            metrics.snapshot(),
            HubMetricsSnapshot {
                active_clients: 3,
                active_masters: 1,
                events_routed: 2,
                events_dropped: 1,
                masters_replaced: 1,
            }
        );
    }
}
