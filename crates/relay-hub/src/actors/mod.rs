//! Actor model implementation for the Relay Hub.
//!
//! ```text
//! HubActor (singleton per relay instance)
//! ├── owns the Registry (clients + master slot)
//! ├── applies router rules to every dispatched event
//! └── pushes serialized events onto per-session outbound queues
//!         └── drained by each session's writer task (transport)
//! ```
//!
//! # Key Design Decisions
//!
//! - **Single serialization point**: registry reads and writes happen only
//!   inside the hub loop, so there is no registry lock
//! - **Single intake**: requests are handled in submission order
//! - **Non-blocking delivery**: a full outbound queue drops the event
//! - **CancellationToken propagation**: session tasks hold child tokens of the hub
//!
//! # Modules
//!
//! - [`hub`] - `HubActor` event loop and its handle
//! - [`registry`] - session storage and roster snapshots
//! - [`router`] - pure routing decisions
//! - [`session`] - session model, roles and outbound queues
//! - [`messages`] - hub intake message types
//! - [`metrics`] - mailbox monitoring and hub counters

pub mod hub;
pub mod messages;
pub mod metrics;
pub mod registry;
pub mod router;
pub mod session;

// Re-export primary types
pub use hub::{HubActor, HubActorHandle, HubSettings};
pub use messages::HubStatus;
pub use metrics::{HubMetrics, HubMetricsSnapshot, MailboxMonitor};
pub use registry::Registry;
pub use router::{route, DropReason, Route};
pub use session::{
    outbound_queue, OutboundReceiver, OutboundSender, Role, Session, SessionId, SessionIdentity,
};
