//! Session model: one connected participant.
//!
//! A `Session` lives in the [`Registry`](super::registry::Registry) for the
//! duration of its connection. It owns the producer side of a bounded outbound
//! queue; the transport writer task owns the consumer side. Dropping the
//! session closes the queue, which lets the writer drain what is left and exit.
//!
//! # Outbound Queue
//!
//! - Bounded, ordered, one producer (the hub) and one consumer (the writer)
//! - Enqueue never blocks: a full queue fails fast with [`EnqueueError::Full`]
//! - Holds already-serialized frames

use crate::errors::{EnqueueError, RelayError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use uuid::Uuid;

/// Opaque, unique session identifier.
pub type SessionId = String;

/// Role a session connected with. Immutable after creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The single privileged participant that sees and messages all clients.
    Master,
    /// An anonymous participant that can only message the master.
    Client,
}

impl Role {
    /// Returns the role as a string for wire fields and metric labels.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Role::Master => "master",
            Role::Client => "client",
        }
    }

    /// Parse the `role` connection parameter.
    ///
    /// Missing or unknown roles are rejected before any session exists.
    pub fn from_query(value: Option<&str>) -> Result<Self, RelayError> {
        match value {
            Some("master") => Ok(Role::Master),
            Some("client") => Ok(Role::Client),
            Some(other) => Err(RelayError::InvalidRole(other.to_string())),
            None => Err(RelayError::InvalidRole("missing".to_string())),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity assigned by the hub at registration.
///
/// This is what the transport adapter keeps for its connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionIdentity {
    /// Assigned session ID.
    pub id: SessionId,
    /// Connection role.
    pub role: Role,
    /// Display name (clients only).
    pub display_name: Option<String>,
}

/// Create a bounded outbound queue with the given capacity.
///
/// `capacity` must be non-zero; the config layer rejects zero before this point.
#[must_use]
pub fn outbound_queue(capacity: usize) -> (OutboundSender, OutboundReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (OutboundSender { tx }, OutboundReceiver { rx })
}

/// Producer side of a session's outbound queue.
#[derive(Debug, Clone)]
pub struct OutboundSender {
    tx: mpsc::Sender<String>,
}

impl OutboundSender {
    /// Non-blocking enqueue of a serialized frame.
    pub fn try_push(&self, frame: String) -> Result<(), EnqueueError> {
        self.tx.try_send(frame).map_err(|e| match e {
            TrySendError::Full(_) => EnqueueError::Full,
            TrySendError::Closed(_) => EnqueueError::Closed,
        })
    }

    /// Frames currently waiting for the writer.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }
}

/// Consumer side of a session's outbound queue.
#[derive(Debug)]
pub struct OutboundReceiver {
    rx: mpsc::Receiver<String>,
}

impl OutboundReceiver {
    /// Wait for the next frame. Returns `None` once the producer is gone and
    /// the queue is drained.
    pub async fn recv(&mut self) -> Option<String> {
        self.rx.recv().await
    }
}

/// One connected participant.
#[derive(Debug)]
pub struct Session {
    id: SessionId,
    display_name: Option<String>,
    role: Role,
    outbound: OutboundSender,
    last_seen_at: DateTime<Utc>,
    is_typing: bool,
    /// Client-authored messages not yet acknowledged by the master.
    /// Monotonic: nothing currently resets it.
    unread_count: u64,
}

impl Session {
    /// Create a session. `display_name` is only set for clients.
    #[must_use]
    pub fn new(
        id: SessionId,
        role: Role,
        display_name: Option<String>,
        outbound: OutboundSender,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            display_name,
            role,
            outbound,
            last_seen_at: now,
            is_typing: false,
            unread_count: 0,
        }
    }

    /// Generate a new unique session ID (UUIDv4).
    #[must_use]
    pub fn generate_id() -> SessionId {
        Uuid::new_v4().to_string()
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn role(&self) -> Role {
        self.role
    }

    #[must_use]
    pub fn display_name(&self) -> Option<&str> {
        self.display_name.as_deref()
    }

    #[must_use]
    pub fn last_seen_at(&self) -> DateTime<Utc> {
        self.last_seen_at
    }

    #[must_use]
    pub fn is_typing(&self) -> bool {
        self.is_typing
    }

    #[must_use]
    pub fn unread_count(&self) -> u64 {
        self.unread_count
    }

    /// Identity as handed back to the transport adapter.
    #[must_use]
    pub fn identity(&self) -> SessionIdentity {
        SessionIdentity {
            id: self.id.clone(),
            role: self.role,
            display_name: self.display_name.clone(),
        }
    }

    /// Record inbound activity.
    pub fn touch(&mut self, at: DateTime<Utc>) {
        self.last_seen_at = at;
    }

    pub fn set_typing(&mut self, is_typing: bool) {
        self.is_typing = is_typing;
    }

    pub fn increment_unread(&mut self) {
        self.unread_count = self.unread_count.saturating_add(1);
    }

    /// Non-blocking enqueue onto this session's outbound queue.
    pub fn push(&self, frame: String) -> Result<(), EnqueueError> {
        self.outbound.try_push(frame)
    }

    /// Frames waiting for this session's writer.
    #[must_use]
    pub fn outbound_depth(&self) -> usize {
        self.outbound.depth()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn test_session(role: Role, capacity: usize) -> (Session, OutboundReceiver) {
        let (tx, rx) = outbound_queue(capacity);
        let name = (role == Role::Client).then(|| "Client 1".to_string());
        (
            Session::new(Session::generate_id(), role, name, tx, Utc::now()),
            rx,
        )
    }

    #[test]
    fn test_role_from_query() {
        assert_eq!(Role::from_query(Some("master")).unwrap(), Role::Master);
        assert_eq!(Role::from_query(Some("client")).unwrap(), Role::Client);
        assert!(matches!(
            Role::from_query(Some("admin")),
            Err(RelayError::InvalidRole(r)) if r == "admin"
        ));
        assert!(matches!(
            Role::from_query(Some("Master")),
            Err(RelayError::InvalidRole(_))
        ));
        assert!(matches!(
            Role::from_query(None),
            Err(RelayError::InvalidRole(_))
        ));
    }

    #[test]
    fn test_role_serde() {
        assert_eq!(serde_json::to_string(&Role::Master).unwrap(), "\"master\"");
        assert_eq!(
            serde_json::from_str::<Role>("\"client\"").unwrap(),
            Role::Client
        );
        assert!(serde_json::from_str::<Role>("\"system\"").is_err());
    }

    #[test]
    fn test_generated_ids_are_unique() {
        let a = Session::generate_id();
        let b = Session::generate_id();
        assert_ne!(a, b);
        assert!(Uuid::parse_str(&a).is_ok());
    }

    #[tokio::test]
    async fn test_push_preserves_order() {
        let (session, mut rx) = test_session(Role::Client, 4);

        session.push("one".to_string()).unwrap();
        session.push("two".to_string()).unwrap();
        assert_eq!(session.outbound_depth(), 2);

        assert_eq!(rx.recv().await.as_deref(), Some("one"));
        assert_eq!(rx.recv().await.as_deref(), Some("two"));
    }

    #[test]
    fn test_push_fails_fast_when_full() {
        let (session, _rx) = test_session(Role::Client, 2);

        session.push("a".to_string()).unwrap();
        session.push("b".to_string()).unwrap();
        assert_eq!(session.push("c".to_string()), Err(EnqueueError::Full));
    }

    #[test]
    fn test_push_after_receiver_dropped() {
        let (session, rx) = test_session(Role::Master, 2);
        drop(rx);

        assert_eq!(session.push("a".to_string()), Err(EnqueueError::Closed));
    }

    #[tokio::test]
    async fn test_dropping_session_drains_then_closes_queue() {
        let (session, mut rx) = test_session(Role::Client, 4);
        session.push("last".to_string()).unwrap();
        drop(session);

        assert_eq!(rx.recv().await.as_deref(), Some("last"));
        assert_eq!(rx.recv().await, None);
    }

    #[test]
    fn test_metadata_updates() {
        let (mut session, _rx) = test_session(Role::Client, 1);
        let later = session.last_seen_at() + chrono::Duration::seconds(5);

        session.touch(later);
        session.set_typing(true);
        session.increment_unread();
        session.increment_unread();

        assert_eq!(session.last_seen_at(), later);
        assert!(session.is_typing());
        assert_eq!(session.unread_count(), 2);

        let identity = session.identity();
        assert_eq!(identity.role, Role::Client);
        assert_eq!(identity.display_name.as_deref(), Some("Client 1"));
    }
}
