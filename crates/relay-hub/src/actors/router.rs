//! Routing rules.
//!
//! Pure function from an envelope plus the current registry to a single
//! routing decision. Delivery is the hub's job; this module only decides
//! where an event goes.
//!
//! | Sender            | Target             | Result                         |
//! |-------------------|--------------------|--------------------------------|
//! | client            | n/a                | current master, or drop        |
//! | current master    | registered client  | that client                    |
//! | current master    | unknown client     | drop (`TargetGone`)            |
//! | current master    | none               | drop (`NoTarget`)              |
//! | displaced master  | any                | drop (`StaleMaster`)           |
//!
//! Events are never broadcast and never echoed to the sender.

use super::registry::Registry;
use super::session::{Role, SessionId};
use crate::protocol::{Envelope, EventKind};

/// Why an event was not delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Client event with no master connected.
    NoMaster,
    /// Master event without a target client.
    NoTarget,
    /// Master event naming a client that is not registered.
    TargetGone,
    /// Event from a master that has since been replaced.
    StaleMaster,
}

impl DropReason {
    /// Bounded label for the `relay_events_dropped_total` metric.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            DropReason::NoMaster => "no_master",
            DropReason::NoTarget => "no_target",
            DropReason::TargetGone => "target_gone",
            DropReason::StaleMaster => "stale_master",
        }
    }
}

/// Routing decision for one envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// Deliver to this client.
    ToClient { session_id: SessionId },
    /// Deliver to the current master. `credit_unread` is set for client
    /// messages whose sender is still registered.
    ToMaster { credit_unread: bool },
    /// Deliver nowhere.
    Drop(DropReason),
}

/// Decide where `envelope` goes.
#[must_use]
pub fn route(envelope: &Envelope, registry: &Registry) -> Route {
    match envelope.sender.role {
        Role::Client => {
            if !registry.has_master() {
                return Route::Drop(DropReason::NoMaster);
            }
            let credit_unread = envelope.kind() == EventKind::Message
                && registry.find_client(&envelope.sender.id).is_some();
            Route::ToMaster { credit_unread }
        }
        Role::Master => {
            if !registry.is_master(&envelope.sender.id) {
                return Route::Drop(DropReason::StaleMaster);
            }
            match &envelope.target {
                None => Route::Drop(DropReason::NoTarget),
                Some(target) if registry.find_client(target).is_some() => Route::ToClient {
                    session_id: target.clone(),
                },
                Some(_) => Route::Drop(DropReason::TargetGone),
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::actors::session::{outbound_queue, OutboundReceiver, Session, SessionIdentity};
    use crate::protocol::Payload;
    use chrono::Utc;

    fn add(registry: &mut Registry, id: &str, role: Role) -> (SessionIdentity, OutboundReceiver) {
        let (tx, rx) = outbound_queue(8);
        let session = Session::new(id.to_string(), role, None, tx, Utc::now());
        let identity = session.identity();
        registry.register(session);
        (identity, rx)
    }

    fn message(sender: &SessionIdentity, target: Option<&str>) -> Envelope {
        Envelope {
            sender: sender.clone(),
            target: target.map(str::to_string),
            payload: Payload::Message {
                content: "hi".to_string(),
            },
            received_at: Utc::now(),
        }
    }

    fn typing(sender: &SessionIdentity, target: Option<&str>) -> Envelope {
        Envelope {
            payload: Payload::Typing { is_typing: true },
            ..message(sender, target)
        }
    }

    #[test]
    fn test_client_message_goes_to_master_with_credit() {
        let mut registry = Registry::new();
        let (_m, _mrx) = add(&mut registry, "m", Role::Master);
        let (c, _crx) = add(&mut registry, "c", Role::Client);

        assert_eq!(
            route(&message(&c, None), &registry),
            Route::ToMaster {
                credit_unread: true
            }
        );
    }

    #[test]
    fn test_client_typing_goes_to_master_without_credit() {
        let mut registry = Registry::new();
        let (_m, _mrx) = add(&mut registry, "m", Role::Master);
        let (c, _crx) = add(&mut registry, "c", Role::Client);

        assert_eq!(
            route(&typing(&c, None), &registry),
            Route::ToMaster {
                credit_unread: false
            }
        );
    }

    #[test]
    fn test_client_without_master_is_dropped() {
        let mut registry = Registry::new();
        let (c, _crx) = add(&mut registry, "c", Role::Client);

        assert_eq!(
            route(&message(&c, None), &registry),
            Route::Drop(DropReason::NoMaster)
        );
        assert_eq!(
            route(&typing(&c, None), &registry),
            Route::Drop(DropReason::NoMaster)
        );
    }

    #[test]
    fn test_departed_client_still_reaches_master_without_credit() {
        let mut registry = Registry::new();
        let (_m, _mrx) = add(&mut registry, "m", Role::Master);
        let (c, _crx) = add(&mut registry, "c", Role::Client);
        registry.unregister("c");

        assert_eq!(
            route(&message(&c, None), &registry),
            Route::ToMaster {
                credit_unread: false
            }
        );
    }

    #[test]
    fn test_master_to_registered_client() {
        let mut registry = Registry::new();
        let (m, _mrx) = add(&mut registry, "m", Role::Master);
        let (_c, _crx) = add(&mut registry, "c", Role::Client);

        assert_eq!(
            route(&message(&m, Some("c")), &registry),
            Route::ToClient {
                session_id: "c".to_string()
            }
        );
        assert_eq!(
            route(&typing(&m, Some("c")), &registry),
            Route::ToClient {
                session_id: "c".to_string()
            }
        );
    }

    #[test]
    fn test_master_to_unknown_client_is_dropped() {
        let mut registry = Registry::new();
        let (m, _mrx) = add(&mut registry, "m", Role::Master);

        assert_eq!(
            route(&message(&m, Some("ghost")), &registry),
            Route::Drop(DropReason::TargetGone)
        );
    }

    #[test]
    fn test_master_cannot_target_itself() {
        let mut registry = Registry::new();
        let (m, _mrx) = add(&mut registry, "m", Role::Master);

        assert_eq!(
            route(&message(&m, Some("m")), &registry),
            Route::Drop(DropReason::TargetGone)
        );
    }

    #[test]
    fn test_master_without_target_is_dropped() {
        let mut registry = Registry::new();
        let (m, _mrx) = add(&mut registry, "m", Role::Master);
        let (_c, _crx) = add(&mut registry, "c", Role::Client);

        assert_eq!(
            route(&message(&m, None), &registry),
            Route::Drop(DropReason::NoTarget)
        );
    }

    #[test]
    fn test_displaced_master_is_dropped() {
        let mut registry = Registry::new();
        let (old, _orx) = add(&mut registry, "m-old", Role::Master);
        let (_new, _nrx) = add(&mut registry, "m-new", Role::Master);
        let (_c, _crx) = add(&mut registry, "c", Role::Client);

        assert_eq!(
            route(&message(&old, Some("c")), &registry),
            Route::Drop(DropReason::StaleMaster)
        );
    }

    #[test]
    fn test_drop_reason_labels() {
        assert_eq!(DropReason::NoMaster.as_str(), "no_master");
        assert_eq!(DropReason::NoTarget.as_str(), "no_target");
        assert_eq!(DropReason::TargetGone.as_str(), "target_gone");
        assert_eq!(DropReason::StaleMaster.as_str(), "stale_master");
    }
}
