//! Observability for the Relay Hub
//!
//! Health probes plus Prometheus metrics. Message content and display names
//! never appear in metric labels; session IDs only appear in logs.
//!
//! # Metrics
//!
//! | Metric | Type | Labels | Purpose |
//! |--------|------|--------|---------|
//! | `relay_sessions_active` | Gauge | `role` | Connected sessions |
//! | `relay_sessions_total` | Counter | `role` | Registrations since start |
//! | `relay_events_routed_total` | Counter | `kind` | Delivered chat/typing events |
//! | `relay_events_dropped_total` | Counter | `reason` | Undelivered events |
//! | `relay_frames_rejected_total` | Counter | `reason` | Bad inbound frames |
//! | `relay_master_replaced_total` | Counter | none | Master takeovers |
//! | `relay_dispatch_duration_seconds` | Histogram | `kind` | Hub dispatch latency |
//! | `relay_hub_mailbox_depth` | Gauge | none | Hub backpressure indicator |

pub mod health;
pub mod metrics;

pub use health::{health_router, metrics_router, HealthState};
pub use metrics::init_metrics_recorder;
