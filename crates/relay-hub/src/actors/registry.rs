//! Registry of active sessions.
//!
//! Holds every connected client plus the single master slot. The registry
//! does no locking of its own: it is owned by the [`HubActor`](super::hub::HubActor)
//! and only touched from its event loop, which is the serialization point for
//! every register, unregister and routing decision.
//!
//! # Invariants
//!
//! - `master` holds zero or one session, always with `Role::Master`
//! - `clients` only holds `Role::Client` sessions
//! - a session lives in exactly one of the two

use super::session::{Role, Session, SessionId};
use crate::protocol::RosterEntry;

use std::collections::HashMap;

/// Active sessions, keyed by session ID.
#[derive(Debug, Default)]
pub struct Registry {
    clients: HashMap<SessionId, Session>,
    master: Option<Session>,
}

impl Registry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a session according to its role.
    ///
    /// A master silently replaces any previous master (last writer wins); the
    /// displaced master is returned so the caller decides what to do with it.
    pub fn register(&mut self, session: Session) -> Option<Session> {
        match session.role() {
            Role::Master => self.master.replace(session),
            Role::Client => {
                let id = session.id().to_string();
                self.clients.insert(id, session)
            }
        }
    }

    /// Remove a session by ID. Unknown IDs are ignored.
    ///
    /// Only clears the master slot when the ID matches the current master, so
    /// a displaced master leaving never evicts its replacement.
    pub fn unregister(&mut self, session_id: &str) -> Option<Session> {
        if self.master.as_ref().is_some_and(|m| m.id() == session_id) {
            return self.master.take();
        }
        self.clients.remove(session_id)
    }

    /// Immutable copy of roster metadata, in current iteration order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<RosterEntry> {
        self.clients
            .values()
            .map(|client| RosterEntry {
                id: client.id().to_string(),
                name: client.display_name().unwrap_or_default().to_string(),
                last_seen: client.last_seen_at(),
                unread_count: client.unread_count(),
            })
            .collect()
    }

    /// Find a session (client or current master) by ID.
    #[must_use]
    pub fn find(&self, session_id: &str) -> Option<&Session> {
        self.clients
            .get(session_id)
            .or_else(|| self.master.as_ref().filter(|m| m.id() == session_id))
    }

    /// Mutable variant of [`Registry::find`].
    pub fn find_mut(&mut self, session_id: &str) -> Option<&mut Session> {
        if let Some(client) = self.clients.get_mut(session_id) {
            return Some(client);
        }
        self.master.as_mut().filter(|m| m.id() == session_id)
    }

    /// Find a client session by ID.
    #[must_use]
    pub fn find_client(&self, session_id: &str) -> Option<&Session> {
        self.clients.get(session_id)
    }

    pub fn find_client_mut(&mut self, session_id: &str) -> Option<&mut Session> {
        self.clients.get_mut(session_id)
    }

    /// The current master, if one is connected.
    #[must_use]
    pub fn master_ref(&self) -> Option<&Session> {
        self.master.as_ref()
    }

    /// Whether `session_id` is the current master.
    #[must_use]
    pub fn is_master(&self, session_id: &str) -> bool {
        self.master.as_ref().is_some_and(|m| m.id() == session_id)
    }

    #[must_use]
    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    #[must_use]
    pub fn has_master(&self) -> bool {
        self.master.is_some()
    }

    /// Remove every session, closing all outbound queues.
    pub fn clear(&mut self) -> usize {
        let count = self.clients.len() + usize::from(self.master.is_some());
        self.clients.clear();
        self.master = None;
        count
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::actors::session::{outbound_queue, OutboundReceiver};
    use chrono::Utc;

    fn session(role: Role) -> (Session, OutboundReceiver) {
        let (tx, rx) = outbound_queue(8);
        (
            Session::new(Session::generate_id(), role, None, tx, Utc::now()),
            rx,
        )
    }

    fn assert_invariants(registry: &Registry) {
        if let Some(master) = registry.master_ref() {
            assert_eq!(master.role(), Role::Master);
            assert!(registry.find_client(master.id()).is_none());
        }
        for entry in registry.snapshot() {
            let client = registry.find_client(&entry.id).unwrap();
            assert_eq!(client.role(), Role::Client);
        }
    }

    #[test]
    fn test_register_routes_by_role() {
        let mut registry = Registry::new();
        let (master, _m) = session(Role::Master);
        let (client, _c) = session(Role::Client);
        let master_id = master.id().to_string();
        let client_id = client.id().to_string();

        assert!(registry.register(master).is_none());
        assert!(registry.register(client).is_none());

        assert_eq!(registry.master_ref().unwrap().id(), master_id);
        assert!(registry.find_client(&client_id).is_some());
        assert!(registry.find_client(&master_id).is_none());
        assert_eq!(registry.client_count(), 1);
        assert!(registry.find(&master_id).is_some());
        assert!(registry.find(&client_id).is_some());
        assert_invariants(&registry);
    }

    #[test]
    fn test_second_master_replaces_first() {
        let mut registry = Registry::new();
        let (first, _rx1) = session(Role::Master);
        let (second, _rx2) = session(Role::Master);
        let first_id = first.id().to_string();
        let second_id = second.id().to_string();

        registry.register(first);
        let displaced = registry.register(second).unwrap();

        assert_eq!(displaced.id(), first_id);
        assert_eq!(registry.master_ref().unwrap().id(), second_id);
        assert!(registry.find(&first_id).is_none());
        assert_invariants(&registry);
    }

    #[test]
    fn test_displaced_master_unregister_keeps_current_master() {
        let mut registry = Registry::new();
        let (first, _rx1) = session(Role::Master);
        let (second, _rx2) = session(Role::Master);
        let first_id = first.id().to_string();
        let second_id = second.id().to_string();

        registry.register(first);
        registry.register(second);

        assert!(registry.unregister(&first_id).is_none());
        assert!(registry.is_master(&second_id));

        assert!(registry.unregister(&second_id).is_some());
        assert!(!registry.has_master());
    }

    #[test]
    fn test_unregister_unknown_is_noop() {
        let mut registry = Registry::new();
        let (client, _rx) = session(Role::Client);
        registry.register(client);

        assert!(registry.unregister("does-not-exist").is_none());
        assert_eq!(registry.client_count(), 1);
    }

    #[test]
    fn test_invariants_hold_over_mixed_sequence() {
        let mut registry = Registry::new();
        let mut receivers = Vec::new();
        let mut ids = Vec::new();

        for i in 0..30 {
            let role = if i % 7 == 0 { Role::Master } else { Role::Client };
            let (s, rx) = session(role);
            ids.push(s.id().to_string());
            receivers.push(rx);
            registry.register(s);
            assert_invariants(&registry);

            if i % 3 == 0 {
                let victim = ids.get(i / 2).cloned().unwrap();
                registry.unregister(&victim);
                assert_invariants(&registry);
            }
        }

        for id in &ids {
            registry.unregister(id);
            assert_invariants(&registry);
        }
        assert_eq!(registry.client_count(), 0);
        assert!(!registry.has_master());
    }

    #[test]
    fn test_snapshot_reflects_metadata() {
        let mut registry = Registry::new();
        let (tx, _rx) = outbound_queue(8);
        let client = Session::new(
            "c-1".to_string(),
            Role::Client,
            Some("Client 1".to_string()),
            tx,
            Utc::now(),
        );
        registry.register(client);

        registry.find_client_mut("c-1").unwrap().increment_unread();

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), 1);
        let entry = snapshot.first().unwrap();
        assert_eq!(entry.id, "c-1");
        assert_eq!(entry.name, "Client 1");
        assert_eq!(entry.unread_count, 1);
    }

    #[tokio::test]
    async fn test_clear_closes_queues() {
        let mut registry = Registry::new();
        let (master, mut master_rx) = session(Role::Master);
        let (client, mut client_rx) = session(Role::Client);
        registry.register(master);
        registry.register(client);

        assert_eq!(registry.clear(), 2);
        assert_eq!(master_rx.recv().await, None);
        assert_eq!(client_rx.recv().await, None);
    }
}
