//! Message types for hub communication.
//!
//! Everything the hub does arrives on one channel, so requests are handled
//! in the order they were submitted. Request/reply uses `tokio::sync::oneshot`.

use super::session::{OutboundSender, Role, SessionId, SessionIdentity};
use crate::protocol::{Envelope, RosterEntry};

use chrono::{DateTime, Utc};
use tokio::sync::oneshot;

/// Messages sent to `HubActor`.
#[derive(Debug)]
pub enum HubMessage {
    /// A new session asking to join.
    Register {
        role: Role,
        /// Producer side of the session's outbound queue; the hub stores it.
        outbound: OutboundSender,
        /// Assigned identity.
        respond_to: oneshot::Sender<SessionIdentity>,
    },

    /// A session is gone. Fire-and-forget; unknown IDs are ignored.
    Unregister { session_id: SessionId },

    /// A validated inbound event to route.
    Dispatch { envelope: Envelope },

    /// Activity from a session whose event was not routed.
    Touch {
        session_id: SessionId,
        at: DateTime<Utc>,
    },

    /// Current hub status (for health checks and tests).
    GetStatus {
        respond_to: oneshot::Sender<HubStatus>,
    },

    /// Current roster, same content as a `clients_update` event.
    GetRoster {
        respond_to: oneshot::Sender<Vec<RosterEntry>>,
    },
}

/// Status of the `HubActor`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HubStatus {
    /// Connected clients.
    pub client_count: usize,
    /// Whether a master is installed.
    pub has_master: bool,
    /// Current master's session ID.
    pub master_id: Option<SessionId>,
    /// Replaced masters whose transport has not unregistered yet.
    pub detached_masters: usize,
    /// Current intake depth.
    pub mailbox_depth: usize,
    /// Intake messages handled since start.
    pub messages_processed: u64,
}
