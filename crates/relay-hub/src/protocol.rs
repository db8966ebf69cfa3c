//! Wire protocol for the relay (JSON text frames).
//!
//! Inbound frames (peer → relay):
//!
//! ```text
//! {"type":"message","content":"hi","role":"client","clientId":"...","timestamp":"..."}
//! {"type":"typing","role":"master","clientId":"<target>","isTyping":true}
//! ```
//!
//! Outbound frames (relay → peer) use the same shape plus `welcome` and
//! `clients_update`. Frames are decoded into tagged unions and validated
//! against the sending session before they reach the hub; anything that fails
//! is rejected with a typed [`ProtocolError`].

use crate::actors::session::{Role, SessionId, SessionIdentity};
use crate::errors::{ProtocolError, RelayError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Author of an outbound chat event. `System` is used for relay notices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Author {
    Master,
    Client,
    System,
}

impl From<Role> for Author {
    fn from(role: Role) -> Self {
        match role {
            Role::Master => Author::Master,
            Role::Client => Author::Client,
        }
    }
}

/// Event as received from a peer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundEvent {
    Message {
        #[serde(default)]
        content: String,
        role: Role,
        /// Target client when sent by the master; ignored for clients.
        #[serde(rename = "clientId", default)]
        client_id: Option<String>,
        #[serde(default)]
        timestamp: Option<DateTime<Utc>>,
    },
    Typing {
        role: Role,
        #[serde(rename = "clientId", default)]
        client_id: Option<String>,
        #[serde(rename = "isTyping", default)]
        is_typing: bool,
        #[serde(default)]
        timestamp: Option<DateTime<Utc>>,
    },
}

impl InboundEvent {
    fn role(&self) -> Role {
        match self {
            InboundEvent::Message { role, .. } | InboundEvent::Typing { role, .. } => *role,
        }
    }
}

/// Routable event kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Message,
    Typing,
}

impl EventKind {
    /// Returns the kind as a string for metric labels.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            EventKind::Message => "message",
            EventKind::Typing => "typing",
        }
    }
}

/// Per-kind payload of a validated event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Message { content: String },
    Typing { is_typing: bool },
}

impl Payload {
    #[must_use]
    pub fn kind(&self) -> EventKind {
        match self {
            Payload::Message { .. } => EventKind::Message,
            Payload::Typing { .. } => EventKind::Typing,
        }
    }
}

/// A validated inbound event, stamped with the sender's identity and the
/// relay's receive time. This is what the hub dispatches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Who sent it (as assigned at registration, not as claimed in the frame).
    pub sender: SessionIdentity,
    /// Explicit target client; only meaningful when the sender is the master.
    pub target: Option<SessionId>,
    pub payload: Payload,
    pub received_at: DateTime<Utc>,
}

impl Envelope {
    /// Validate a decoded event against the session that sent it.
    ///
    /// - the declared role must equal the session role
    /// - message content may be empty
    /// - an empty `clientId` counts as absent
    pub fn from_inbound(
        event: InboundEvent,
        sender: &SessionIdentity,
        received_at: DateTime<Utc>,
    ) -> Result<Self, ProtocolError> {
        if event.role() != sender.role {
            return Err(ProtocolError::RoleMismatch {
                declared: event.role().to_string(),
                actual: sender.role.to_string(),
            });
        }

        let (client_id, payload) = match event {
            InboundEvent::Message {
                content, client_id, ..
            } => (client_id, Payload::Message { content }),
            InboundEvent::Typing {
                client_id,
                is_typing,
                ..
            } => (client_id, Payload::Typing { is_typing }),
        };

        let target = match sender.role {
            Role::Master => client_id.filter(|id| !id.is_empty()),
            Role::Client => None,
        };

        Ok(Self {
            sender: sender.clone(),
            target,
            payload,
            received_at,
        })
    }

    #[must_use]
    pub fn kind(&self) -> EventKind {
        self.payload.kind()
    }
}

/// One roster entry in a `clients_update` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RosterEntry {
    pub id: SessionId,
    pub name: String,
    #[serde(rename = "lastSeen")]
    pub last_seen: DateTime<Utc>,
    #[serde(rename = "unreadCount")]
    pub unread_count: u64,
}

/// Event sent to a peer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundEvent {
    Welcome {
        #[serde(rename = "clientId")]
        client_id: SessionId,
        role: Role,
        #[serde(rename = "clientName", default, skip_serializing_if = "Option::is_none")]
        client_name: Option<String>,
        timestamp: DateTime<Utc>,
    },
    Message {
        content: String,
        role: Author,
        #[serde(rename = "clientId", default, skip_serializing_if = "Option::is_none")]
        client_id: Option<SessionId>,
        #[serde(rename = "clientName", default, skip_serializing_if = "Option::is_none")]
        client_name: Option<String>,
        timestamp: DateTime<Utc>,
    },
    Typing {
        role: Author,
        #[serde(rename = "clientId", default, skip_serializing_if = "Option::is_none")]
        client_id: Option<SessionId>,
        #[serde(rename = "clientName", default, skip_serializing_if = "Option::is_none")]
        client_name: Option<String>,
        #[serde(rename = "isTyping")]
        is_typing: bool,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename = "clients_update")]
    RosterUpdate { clients: Vec<RosterEntry> },
}

impl OutboundEvent {
    /// Welcome for a freshly registered session.
    #[must_use]
    pub fn welcome(identity: &SessionIdentity, now: DateTime<Utc>) -> Self {
        OutboundEvent::Welcome {
            client_id: identity.id.clone(),
            role: identity.role,
            client_name: identity.display_name.clone(),
            timestamp: now,
        }
    }

    /// The outbound form of a routed envelope.
    ///
    /// Client-authored events carry the sender's id and name so the master can
    /// tell threads apart; master-authored events carry the target id.
    #[must_use]
    pub fn relayed(envelope: &Envelope) -> Self {
        let (client_id, client_name) = match envelope.sender.role {
            Role::Client => (
                Some(envelope.sender.id.clone()),
                envelope.sender.display_name.clone(),
            ),
            Role::Master => (envelope.target.clone(), None),
        };
        let role = Author::from(envelope.sender.role);

        match &envelope.payload {
            Payload::Message { content } => OutboundEvent::Message {
                content: content.clone(),
                role,
                client_id,
                client_name,
                timestamp: envelope.received_at,
            },
            Payload::Typing { is_typing } => OutboundEvent::Typing {
                role,
                client_id,
                client_name,
                is_typing: *is_typing,
                timestamp: envelope.received_at,
            },
        }
    }

    /// Greeting pushed to a newly joined client on the master's behalf.
    #[must_use]
    pub fn greeting(content: String, to: &SessionIdentity, now: DateTime<Utc>) -> Self {
        OutboundEvent::Message {
            content,
            role: Author::Master,
            client_id: Some(to.id.clone()),
            client_name: None,
            timestamp: now,
        }
    }

    /// A relay-authored notice about a client (join/leave).
    #[must_use]
    pub fn notice(content: String, about: &SessionIdentity, now: DateTime<Utc>) -> Self {
        OutboundEvent::Message {
            content,
            role: Author::System,
            client_id: Some(about.id.clone()),
            client_name: about.display_name.clone(),
            timestamp: now,
        }
    }

    /// Returns the event type as a string for logs and metric labels.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            OutboundEvent::Welcome { .. } => "welcome",
            OutboundEvent::Message { .. } => "message",
            OutboundEvent::Typing { .. } => "typing",
            OutboundEvent::RosterUpdate { .. } => "clients_update",
        }
    }
}

/// Decode one inbound text frame.
pub fn decode_inbound(frame: &str, max_frame_bytes: usize) -> Result<InboundEvent, ProtocolError> {
    if frame.len() > max_frame_bytes {
        return Err(ProtocolError::FrameTooLarge {
            len: frame.len(),
            max: max_frame_bytes,
        });
    }

    serde_json::from_str(frame).map_err(|e| ProtocolError::Malformed(e.to_string()))
}

/// Serialize one outbound event to a text frame.
pub fn encode_outbound(event: &OutboundEvent) -> Result<String, RelayError> {
    serde_json::to_string(event)
        .map_err(|e| RelayError::Internal(format!("failed to encode {}: {e}", event.type_name())))
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    const MAX: usize = 64 * 1024;

    fn client_identity() -> SessionIdentity {
        SessionIdentity {
            id: "c-1".to_string(),
            role: Role::Client,
            display_name: Some("Client 1".to_string()),
        }
    }

    fn master_identity() -> SessionIdentity {
        SessionIdentity {
            id: "m-1".to_string(),
            role: Role::Master,
            display_name: None,
        }
    }

    #[test]
    fn test_decode_message() {
        let event = decode_inbound(
            r#"{"type":"message","content":"hi","role":"client","clientId":"x","clientName":"ignored"}"#,
            MAX,
        )
        .unwrap();

        assert_eq!(
            event,
            InboundEvent::Message {
                content: "hi".to_string(),
                role: Role::Client,
                client_id: Some("x".to_string()),
                timestamp: None,
            }
        );
    }

    #[test]
    fn test_decode_typing_with_timestamp() {
        let event = decode_inbound(
            r#"{"type":"typing","role":"master","clientId":"c-1","isTyping":true,"timestamp":"2024-05-01T10:00:00Z"}"#,
            MAX,
        )
        .unwrap();

        match event {
            InboundEvent::Typing {
                role,
                client_id,
                is_typing,
                timestamp,
            } => {
                assert_eq!(role, Role::Master);
                assert_eq!(client_id.as_deref(), Some("c-1"));
                assert!(is_typing);
                assert!(timestamp.is_some());
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_decode_rejects_bad_frames() {
        assert!(matches!(
            decode_inbound("not json", MAX),
            Err(ProtocolError::Malformed(_))
        ));
        assert!(matches!(
            decode_inbound(r#"{"type":"welcome","role":"client"}"#, MAX),
            Err(ProtocolError::Malformed(_))
        ));
        assert!(matches!(
            decode_inbound(r#"{"type":"message","content":"hi"}"#, MAX),
            Err(ProtocolError::Malformed(_))
        ));
        assert!(matches!(
            decode_inbound(r#"{"type":"message","content":"hi","role":"system"}"#, MAX),
            Err(ProtocolError::Malformed(_))
        ));
    }

    #[test]
    fn test_decode_rejects_oversized_frame() {
        let frame = format!(
            r#"{{"type":"message","content":"{}","role":"client"}}"#,
            "a".repeat(100)
        );
        assert_eq!(
            decode_inbound(&frame, 32),
            Err(ProtocolError::FrameTooLarge {
                len: frame.len(),
                max: 32
            })
        );
    }

    #[test]
    fn test_envelope_client_target_is_ignored() {
        let event = InboundEvent::Message {
            content: "hello".to_string(),
            role: Role::Client,
            client_id: Some("someone-else".to_string()),
            timestamp: None,
        };

        let envelope = Envelope::from_inbound(event, &client_identity(), Utc::now()).unwrap();
        assert_eq!(envelope.target, None);
        assert_eq!(envelope.sender.id, "c-1");
        assert_eq!(envelope.kind(), EventKind::Message);
    }

    #[test]
    fn test_envelope_master_empty_target_is_absent() {
        let event = InboundEvent::Typing {
            role: Role::Master,
            client_id: Some(String::new()),
            is_typing: true,
            timestamp: None,
        };

        let envelope = Envelope::from_inbound(event, &master_identity(), Utc::now()).unwrap();
        assert_eq!(envelope.target, None);
        assert_eq!(envelope.payload, Payload::Typing { is_typing: true });
    }

    #[test]
    fn test_envelope_role_mismatch() {
        let event = InboundEvent::Message {
            content: "let me in".to_string(),
            role: Role::Master,
            client_id: Some("c-2".to_string()),
            timestamp: None,
        };

        let result = Envelope::from_inbound(event, &client_identity(), Utc::now());
        assert_eq!(
            result,
            Err(ProtocolError::RoleMismatch {
                declared: "master".to_string(),
                actual: "client".to_string()
            })
        );
    }

    #[test]
    fn test_envelope_empty_content_is_relayed() {
        let event = decode_inbound(r#"{"type":"message","role":"client"}"#, 1024).unwrap();
        let envelope = Envelope::from_inbound(event, &client_identity(), Utc::now()).unwrap();
        assert_eq!(
            envelope.payload,
            Payload::Message {
                content: String::new()
            }
        );

        let event = InboundEvent::Message {
            content: "   ".to_string(),
            role: Role::Client,
            client_id: None,
            timestamp: None,
        };
        let envelope = Envelope::from_inbound(event, &client_identity(), Utc::now()).unwrap();
        assert_eq!(
            envelope.payload,
            Payload::Message {
                content: "   ".to_string()
            }
        );
    }

    #[test]
    fn test_relayed_client_message_carries_sender() {
        let now = Utc::now();
        let envelope = Envelope {
            sender: client_identity(),
            target: None,
            payload: Payload::Message {
                content: "hi".to_string(),
            },
            received_at: now,
        };

        let value: Value =
            serde_json::from_str(&encode_outbound(&OutboundEvent::relayed(&envelope)).unwrap())
                .unwrap();
        assert_eq!(value["type"], "message");
        assert_eq!(value["role"], "client");
        assert_eq!(value["clientId"], "c-1");
        assert_eq!(value["clientName"], "Client 1");
        assert_eq!(value["content"], "hi");
    }

    #[test]
    fn test_relayed_master_typing_carries_target() {
        let envelope = Envelope {
            sender: master_identity(),
            target: Some("c-9".to_string()),
            payload: Payload::Typing { is_typing: false },
            received_at: Utc::now(),
        };

        let value: Value =
            serde_json::from_str(&encode_outbound(&OutboundEvent::relayed(&envelope)).unwrap())
                .unwrap();
        assert_eq!(value["type"], "typing");
        assert_eq!(value["role"], "master");
        assert_eq!(value["clientId"], "c-9");
        assert_eq!(value["isTyping"], false);
        assert!(value.get("clientName").is_none());
    }

    #[test]
    fn test_welcome_and_roster_wire_shape() {
        let now = Utc::now();
        let welcome = encode_outbound(&OutboundEvent::welcome(&client_identity(), now)).unwrap();
        let value: Value = serde_json::from_str(&welcome).unwrap();
        assert_eq!(value["type"], "welcome");
        assert_eq!(value["role"], "client");
        assert_eq!(value["clientId"], "c-1");
        assert_eq!(value["clientName"], "Client 1");

        let master_welcome =
            encode_outbound(&OutboundEvent::welcome(&master_identity(), now)).unwrap();
        let value: Value = serde_json::from_str(&master_welcome).unwrap();
        assert!(value.get("clientName").is_none());

        let roster = OutboundEvent::RosterUpdate {
            clients: vec![RosterEntry {
                id: "c-1".to_string(),
                name: "Client 1".to_string(),
                last_seen: now,
                unread_count: 3,
            }],
        };
        let value: Value = serde_json::from_str(&encode_outbound(&roster).unwrap()).unwrap();
        assert_eq!(value["type"], "clients_update");
        assert_eq!(
            value["clients"][0],
            json!({
                "id": "c-1",
                "name": "Client 1",
                "lastSeen": serde_json::to_value(now).unwrap(),
                "unreadCount": 3
            })
        );
    }

    #[test]
    fn test_notice_is_system_authored() {
        let notice = OutboundEvent::notice(
            "Client 1 has joined the chat".to_string(),
            &client_identity(),
            Utc::now(),
        );
        assert!(matches!(
            notice,
            OutboundEvent::Message {
                role: Author::System,
                ..
            }
        ));
        assert_eq!(notice.type_name(), "message");
    }
}
