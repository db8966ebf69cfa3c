//! `HubActor` - the single serialization point of the relay.
//!
//! The hub owns the [`Registry`] and is the only code that reads or writes
//! it. Sessions talk to it through a cloneable [`HubActorHandle`] that
//! puts a [`HubMessage`] on a single intake channel:
//!
//! | Message    | Carries                          | Reply          |
//! |------------|----------------------------------|----------------|
//! | Register   | role + outbound queue producer   | identity       |
//! | Unregister | session ID                       | none           |
//! | Dispatch   | validated [`Envelope`]           | none           |
//! | Touch      | session ID + activity time       | none           |
//! | GetStatus  | -                                | status         |
//! | GetRoster  | -                                | roster         |
//!
//! Messages are handled strictly in submission order. A session's own
//! dispatches are always routed before its unregister, and a reply to a
//! query reflects everything submitted before the query.
//!
//! # Delivery
//!
//! Every push onto a session's outbound queue is non-blocking. A full or
//! closed queue drops that one event with a warning; the hub never waits on
//! a peer.
//!
//! # Master takeover
//!
//! A second master replaces the first. The displaced master is parked
//! outside the registry (nothing is routed to it) until its own transport
//! unregisters, and that unregister never touches the new master.

use crate::config::Config;
use crate::errors::{EnqueueError, RelayError};
use crate::observability::metrics as prom;
use crate::protocol::{encode_outbound, Envelope, OutboundEvent, Payload, RosterEntry};

use super::messages::{HubMessage, HubStatus};
use super::metrics::{HubMetrics, MailboxMonitor};
use super::registry::Registry;
use super::router::{self, Route};
use super::session::{OutboundSender, Role, Session, SessionId, SessionIdentity};

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Hub behaviour knobs, taken from [`Config`].
#[derive(Debug, Clone)]
pub struct HubSettings {
    /// Instance ID for logs.
    pub instance_id: String,
    /// Capacity of the intake channel.
    pub mailbox_capacity: usize,
    /// Greeting pushed to each new client after its welcome.
    pub client_greeting: Option<String>,
    /// Send join/leave notices to the master.
    pub presence_notices: bool,
}

impl Default for HubSettings {
    fn default() -> Self {
        Self {
            instance_id: "relay-local".to_string(),
            mailbox_capacity: crate::config::DEFAULT_HUB_MAILBOX_CAPACITY,
            client_greeting: None,
            presence_notices: false,
        }
    }
}

impl HubSettings {
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            instance_id: config.instance_id.clone(),
            mailbox_capacity: config.hub_mailbox_capacity,
            client_greeting: config.client_greeting.clone(),
            presence_notices: config.presence_notices,
        }
    }
}

/// Handle to the `HubActor`.
///
/// Cheap to clone; one copy per session task. All methods are async and fail
/// with [`RelayError::HubUnavailable`] once the hub has stopped.
#[derive(Clone, Debug)]
pub struct HubActorHandle {
    sender: mpsc::Sender<HubMessage>,
    mailbox: Arc<MailboxMonitor>,
    cancel_token: CancellationToken,
}

impl HubActorHandle {
    /// Spawn the hub task and return a handle plus its `JoinHandle`.
    #[must_use]
    pub fn spawn(settings: HubSettings, metrics: Arc<HubMetrics>) -> (Self, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(settings.mailbox_capacity.max(1));
        let cancel_token = CancellationToken::new();
        let mailbox = Arc::new(MailboxMonitor::new(settings.instance_id.clone()));

        let actor = HubActor {
            settings,
            registry: Registry::new(),
            detached_masters: HashMap::new(),
            receiver,
            cancel_token: cancel_token.clone(),
            mailbox: Arc::clone(&mailbox),
            metrics,
        };

        let task = tokio::spawn(actor.run());

        let handle = Self {
            sender,
            mailbox,
            cancel_token,
        };

        (handle, task)
    }

    async fn submit(&self, message: HubMessage) -> Result<(), RelayError> {
        self.mailbox.record_enqueue();
        self.sender
            .send(message).await.map_err(|e| {
            self.mailbox.record_send_failed();
            RelayError::HubUnavailable(format!("channel send failed: {e}"))
        })
    }

    /// Register a new session and wait for its assigned identity.
    ///
    /// The hub keeps `outbound`; the caller keeps the matching receiver.
    pub async fn register(
        &self,
        role: Role,
        outbound: OutboundSender,
    ) -> Result<SessionIdentity, RelayError> {
        let (tx, rx) = oneshot::channel();
        self.submit(HubMessage::Register {
            role,
            outbound,
            respond_to: tx,
        })
        .await?;

        rx.await
            .map_err(|e| RelayError::HubUnavailable(format!("response receive failed: {e}")))
    }

    /// Remove a session. Idempotent: unknown IDs are ignored by the hub.
    pub async fn unregister(&self, session_id: SessionId) -> Result<(), RelayError> {
        self.submit(HubMessage::Unregister { session_id }).await
    }

    /// Route a validated event. Fire-and-forget.
    pub async fn dispatch(&self, envelope: Envelope) -> Result<(), RelayError> {
        self.submit(HubMessage::Dispatch { envelope }).await
    }

    /// Record activity for a session without routing anything.
    ///
    /// Used for frames that decoded but failed validation.
    pub async fn touch(&self, session_id: SessionId, at: DateTime<Utc>) -> Result<(), RelayError> {
        self.submit(HubMessage::Touch { session_id, at }).await
    }

    /// Current hub status.
    pub async fn status(&self) -> Result<HubStatus, RelayError> {
        let (tx, rx) = oneshot::channel();
        self.submit(HubMessage::GetStatus { respond_to: tx }).await?;

        rx.await
            .map_err(|e| RelayError::HubUnavailable(format!("response receive failed: {e}")))
    }

    /// Current roster (what the master would see in a `clients_update`).
    pub async fn roster(&self) -> Result<Vec<RosterEntry>, RelayError> {
        let (tx, rx) = oneshot::channel();
        self.submit(HubMessage::GetRoster { respond_to: tx }).await?;

        rx.await
            .map_err(|e| RelayError::HubUnavailable(format!("response receive failed: {e}")))
    }

    /// Stop the hub. Every session's outbound queue is closed.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// Child token for session tasks and servers.
    #[must_use]
    pub fn child_token(&self) -> CancellationToken {
        self.cancel_token.child_token()
    }
}

/// The `HubActor` implementation.
pub struct HubActor {
    settings: HubSettings,
    registry: Registry,
    /// Replaced masters whose transport is still connected.
    detached_masters: HashMap<SessionId, Session>,
    receiver: mpsc::Receiver<HubMessage>,
    cancel_token: CancellationToken,
    mailbox: Arc<MailboxMonitor>,
    metrics: Arc<HubMetrics>,
}

impl HubActor {
    #[instrument(skip_all, name = "relay.actor.hub", fields(instance_id = %self.settings.instance_id))]
    async fn run(mut self) {
        info!(
            target: "relay.actor.hub",
            instance_id = %self.settings.instance_id,
            "HubActor started"
        );

        loop {
            tokio::select! {
                biased;

                () = self.cancel_token.cancelled() => {
                    info!(
                        target: "relay.actor.hub",
                        "HubActor received cancellation signal"
                    );
                    self.graceful_shutdown();
                    break;
                }

                message = self.receiver.recv() => {
                    if let Some(msg) = message {
                        self.mailbox.record_dequeue();
                        self.handle_message(msg);
                    } else {
                        info!(
                            target: "relay.actor.hub",
                            "All hub handles dropped, exiting"
                        );
                        self.graceful_shutdown();
                        break;
                    }
                }
            }

            prom::set_hub_mailbox_depth(self.mailbox.current_depth());
        }

        info!(
            target: "relay.actor.hub",
            messages_processed = self.mailbox.messages_processed(),
            peak_mailbox_depth = self.mailbox.peak_depth(),
            "HubActor stopped"
        );
    }

    fn handle_message(&mut self, message: HubMessage) {
        match message {
            HubMessage::Register {
                role,
                outbound,
                respond_to,
            } => self.handle_register(role, outbound, respond_to),
            HubMessage::Unregister { session_id } => self.handle_unregister(&session_id),
            HubMessage::Dispatch { envelope } => self.handle_dispatch(envelope),
            HubMessage::Touch { session_id, at } => self.handle_touch(&session_id, at),
            HubMessage::GetStatus { respond_to } => {
                let _ = respond_to.send(self.status());
            }
            HubMessage::GetRoster { respond_to } => {
                let _ = respond_to.send(self.registry.snapshot());
            }
        }
    }

    fn handle_register(
        &mut self,
        role: Role,
        outbound: OutboundSender,
        respond_to: oneshot::Sender<SessionIdentity>,
    ) {
        let now = Utc::now();
        let display_name = match role {
            Role::Client => Some(format!("Client {}", self.registry.client_count() + 1)),
            Role::Master => None,
        };
        let session = Session::new(Session::generate_id(), role, display_name, outbound, now);
        let identity = session.identity();

        let displaced_id = self.registry.register(session).map(|displaced| {
            info!(
                target: "relay.actor.hub",
                previous_master = %displaced.id(),
                new_master = %identity.id,
                "Master replaced by new connection"
            );
            self.metrics.record_master_replaced();
            prom::record_master_replaced();
            let displaced_id = displaced.id().to_string();
            self.detached_masters.insert(displaced_id.clone(), displaced);
            displaced_id
        });

        // The transport gave up while waiting; nobody will ever unregister this session
        if respond_to.send(identity.clone()).is_err() {
            debug!(
                target: "relay.actor.hub",
                session_id = %identity.id,
                "Registration abandoned by transport, removing session"
            );
            self.registry.unregister(&identity.id);
            if let Some(previous) = displaced_id.and_then(|id| self.detached_masters.remove(&id)) {
                self.registry.register(previous);
            }
            self.update_session_gauges();
            return;
        }

        prom::record_session_opened(role.as_str());
        info!(
            target: "relay.actor.hub",
            session_id = %identity.id,
            role = %role,
            display_name = identity.display_name.as_deref().unwrap_or(""),
            clients = self.registry.client_count(),
            "Session registered"
        );

        self.send_welcome(&identity);

        if role == Role::Client {
            if let Some(greeting) = self.settings.client_greeting.clone() {
                self.deliver_to(
                    &identity.id,
                    &OutboundEvent::greeting(greeting, &identity, Utc::now()),
                );
            }
        }

        self.notify_roster();

        if role == Role::Client {
            self.presence_notice(&identity, "has joined the chat");
        }

        self.update_session_gauges();
    }

    fn handle_unregister(&mut self, session_id: &str) {
        if let Some(detached) = self.detached_masters.remove(session_id) {
            debug!(
                target: "relay.actor.hub",
                session_id = %detached.id(),
                "Displaced master disconnected"
            );
            self.update_session_gauges();
            return;
        }

        let Some(session) = self.registry.unregister(session_id) else {
            debug!(
                target: "relay.actor.hub",
                session_id = %session_id,
                "Unregister for unknown session ignored"
            );
            return;
        };

        info!(
            target: "relay.actor.hub",
            session_id = %session.id(),
            role = %session.role(),
            clients = self.registry.client_count(),
            "Session unregistered"
        );

        let identity = session.identity();
        // Closes the outbound queue; the writer drains what is left and exits
        drop(session);

        if identity.role == Role::Client {
            self.notify_roster();
            self.presence_notice(&identity, "has left the chat");
        }

        self.update_session_gauges();
    }

    fn handle_dispatch(&mut self, envelope: Envelope) {
        let started = Instant::now();
        let kind = envelope.kind();

        if let Some(sender) = self.registry.find_mut(&envelope.sender.id) {
            sender.touch(envelope.received_at);
            if let Payload::Typing { is_typing } = envelope.payload {
                sender.set_typing(is_typing);
            }
        }

        match router::route(&envelope, &self.registry) {
            Route::ToMaster { credit_unread } => {
                if credit_unread {
                    if let Some(client) = self.registry.find_client_mut(&envelope.sender.id) {
                        client.increment_unread();
                    }
                }
                let event = OutboundEvent::relayed(&envelope);
                if let Some(master) = self.registry.master_ref() {
                    if self.deliver(master, &event) {
                        self.record_routed(kind.as_str());
                    }
                }
            }
            Route::ToClient { session_id } => {
                let event = OutboundEvent::relayed(&envelope);
                if self.deliver_to(&session_id, &event) {
                    self.record_routed(kind.as_str());
                }
            }
            Route::Drop(reason) => {
                debug!(
                    target: "relay.actor.hub",
                    sender_id = %envelope.sender.id,
                    sender_role = %envelope.sender.role,
                    kind = kind.as_str(),
                    reason = reason.as_str(),
                    "Event dropped"
                );
                self.metrics.record_dropped();
                prom::record_event_dropped(reason.as_str());
            }
        }

        prom::record_dispatch_duration(kind.as_str(), started.elapsed());
    }

    fn handle_touch(&mut self, session_id: &str, at: DateTime<Utc>) {
        if let Some(session) = self.registry.find_mut(session_id) {
            session.touch(at);
        }
    }

    fn status(&self) -> HubStatus {
        HubStatus {
            client_count: self.registry.client_count(),
            has_master: self.registry.has_master(),
            master_id: self.registry.master_ref().map(|m| m.id().to_string()),
            detached_masters: self.detached_masters.len(),
            mailbox_depth: self.mailbox.current_depth(),
            messages_processed: self.mailbox.messages_processed(),
        }
    }

    /// Push a welcome to a freshly registered session only.
    fn send_welcome(&self, identity: &SessionIdentity) {
        self.deliver_to(&identity.id, &OutboundEvent::welcome(identity, Utc::now()));
    }

    /// Push the current roster to the master. No-op without a master.
    fn notify_roster(&self) {
        let Some(master) = self.registry.master_ref() else {
            return;
        };
        let event = OutboundEvent::RosterUpdate {
            clients: self.registry.snapshot(),
        };
        self.deliver(master, &event);
    }

    fn presence_notice(&self, about: &SessionIdentity, verb: &str) {
        if !self.settings.presence_notices {
            return;
        }
        let Some(master) = self.registry.master_ref() else {
            return;
        };
        let name = about.display_name.as_deref().unwrap_or("A client");
        let event = OutboundEvent::notice(format!("{name} {verb}"), about, Utc::now());
        self.deliver(master, &event);
    }

    fn deliver_to(&self, session_id: &str, event: &OutboundEvent) -> bool {
        match self.registry.find(session_id) {
            Some(session) => self.deliver(session, event),
            None => false,
        }
    }

    /// Encode and enqueue without blocking. Returns whether the event was queued.
    fn deliver(&self, recipient: &Session, event: &OutboundEvent) -> bool {
        let frame = match encode_outbound(event) {
            Ok(frame) => frame,
            Err(e) => {
                error!(
                    target: "relay.actor.hub",
                    event_type = event.type_name(),
                    error = %e,
                    "Failed to encode outbound event"
                );
                return false;
            }
        };

        match recipient.push(frame) {
            Ok(()) => true,
            Err(e) => {
                self.record_enqueue_failure(recipient, event, e);
                false
            }
        }
    }

    fn record_enqueue_failure(&self, recipient: &Session, event: &OutboundEvent, e: EnqueueError) {
        warn!(
            target: "relay.actor.hub",
            session_id = %recipient.id(),
            role = %recipient.role(),
            event_type = event.type_name(),
            queue_depth = recipient.outbound_depth(),
            reason = e.reason(),
            "Outbound event dropped"
        );
        self.metrics.record_dropped();
        prom::record_event_dropped(e.reason());
    }

    fn record_routed(&self, kind: &str) {
        self.metrics.record_routed();
        prom::record_event_routed(kind);
    }

    fn update_session_gauges(&self) {
        let clients = self.registry.client_count();
        let masters = usize::from(self.registry.has_master()) + self.detached_masters.len();
        self.metrics.set_active_clients(clients);
        self.metrics.set_active_masters(masters);
        prom::set_sessions_active(Role::Client.as_str(), clients);
        prom::set_sessions_active(Role::Master.as_str(), masters);
    }

    /// Drop every session, closing all outbound queues.
    fn graceful_shutdown(&mut self) {
        let closed = self.registry.clear() + self.detached_masters.len();
        self.detached_masters.clear();
        self.update_session_gauges();
        info!(
            target: "relay.actor.hub",
            sessions_closed = closed,
            "HubActor shut down"
        );
    }
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
    use crate::actors::session::{outbound_queue, OutboundReceiver};
    use serde_json::Value;
    use std::time::Duration;
    use tokio::time::timeout;

    fn spawn_hub(settings: HubSettings) -> (HubActorHandle, Arc<HubMetrics>) {
        let metrics = HubMetrics::new();
        let (hub, _task) = HubActorHandle::spawn(settings, Arc::clone(&metrics));
        (hub, metrics)
    }

    async fn connect(hub: &HubActorHandle, role: Role) -> (SessionIdentity, OutboundReceiver) {
        let (tx, rx) = outbound_queue(16);
        let identity = hub.register(role, tx).await.unwrap();
        (identity, rx)
    }

    async fn next_event(rx: &mut OutboundReceiver) -> Value {
        let frame = timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("timed out waiting for event")
            .expect("queue closed");
        serde_json::from_str(&frame).unwrap()
    }

    /// Status shares the intake with everything else, so once it answers
    /// everything submitted earlier has been handled.
    async fn settle(hub: &HubActorHandle) -> HubStatus {
        hub.status().await.unwrap()
    }

    async fn assert_silent(rx: &mut OutboundReceiver) {
        if let Ok(Some(frame)) = timeout(Duration::from_millis(50), rx.recv()).await {
            panic!("unexpected event: {frame}");
        }
    }

    fn message_from(sender: &SessionIdentity, target: Option<&str>, content: &str) -> Envelope {
        Envelope {
            sender: sender.clone(),
            target: target.map(str::to_string),
            payload: Payload::Message {
                content: content.to_string(),
            },
            received_at: Utc::now(),
        }
    }

    fn typing_from(sender: &SessionIdentity, target: Option<&str>) -> Envelope {
        Envelope {
            payload: Payload::Typing { is_typing: true },
            ..message_from(sender, target, "unused")
        }
    }

    #[tokio::test]
    async fn test_concrete_scenario() {
        let (hub, _metrics) = spawn_hub(HubSettings::default());

        let (master, mut master_rx) = connect(&hub, Role::Master).await;
        let welcome = next_event(&mut master_rx).await;
        assert_eq!(welcome["type"], "welcome");
        assert_eq!(welcome["role"], "master");
        assert_eq!(welcome["clientId"], master.id.as_str());
        let empty_roster = next_event(&mut master_rx).await;
        assert_eq!(empty_roster["type"], "clients_update");
        assert_eq!(empty_roster["clients"].as_array().unwrap().len(), 0);

        let (c1, mut c1_rx) = connect(&hub, Role::Client).await;
        let welcome = next_event(&mut c1_rx).await;
        assert_eq!(welcome["type"], "welcome");
        assert_eq!(welcome["role"], "client");
        assert_eq!(welcome["clientId"], c1.id.as_str());
        assert_eq!(welcome["clientName"], "Client 1");

        let roster = next_event(&mut master_rx).await;
        assert_eq!(roster["type"], "clients_update");
        let clients = roster["clients"].as_array().unwrap();
        assert_eq!(clients.len(), 1);
        assert_eq!(clients[0]["name"], "Client 1");
        assert_eq!(clients[0]["unreadCount"], 0);

        hub.dispatch(message_from(&c1, None, "hi")).await.unwrap();
        let relayed = next_event(&mut master_rx).await;
        assert_eq!(relayed["type"], "message");
        assert_eq!(relayed["content"], "hi");
        assert_eq!(relayed["role"], "client");
        assert_eq!(relayed["clientId"], c1.id.as_str());
        assert_eq!(relayed["clientName"], "Client 1");

        let roster = hub.roster().await.unwrap();
        assert_eq!(roster.len(), 1);
        assert_eq!(roster[0].unread_count, 1);

        hub.dispatch(message_from(&master, Some(&c1.id), "hello"))
            .await
            .unwrap();
        let reply = next_event(&mut c1_rx).await;
        assert_eq!(reply["type"], "message");
        assert_eq!(reply["content"], "hello");
        assert_eq!(reply["role"], "master");

        // Master message did not touch unread accounting, and nothing echoed back
        assert_eq!(hub.roster().await.unwrap()[0].unread_count, 1);
        assert_silent(&mut master_rx).await;
    }

    #[tokio::test]
    async fn test_next_roster_update_shows_unread() {
        let (hub, _metrics) = spawn_hub(HubSettings::default());
        let (_m, mut master_rx) = connect(&hub, Role::Master).await;
        let (c1, _c1_rx) = connect(&hub, Role::Client).await;
        hub.dispatch(message_from(&c1, None, "hi")).await.unwrap();
        settle(&hub).await;

        let (_c2, _c2_rx) = connect(&hub, Role::Client).await;

        // welcome, empty roster, roster(c1), message, roster(c1, c2)
        for _ in 0..4 {
            next_event(&mut master_rx).await;
        }
        let roster = next_event(&mut master_rx).await;
        let clients = roster["clients"].as_array().unwrap();
        let entry = clients
            .iter()
            .find(|c| c["id"] == c1.id.as_str())
            .unwrap();
        assert_eq!(entry["unreadCount"], 1);
    }

    #[tokio::test]
    async fn test_typing_does_not_increment_unread() {
        let (hub, _metrics) = spawn_hub(HubSettings::default());
        let (_m, mut master_rx) = connect(&hub, Role::Master).await;
        let (c1, _c1_rx) = connect(&hub, Role::Client).await;

        hub.dispatch(typing_from(&c1, None)).await.unwrap();
        hub.dispatch(typing_from(&c1, None)).await.unwrap();
        settle(&hub).await;

        assert_eq!(hub.roster().await.unwrap()[0].unread_count, 0);

        // welcome, empty roster, roster, typing, typing
        for _ in 0..3 {
            next_event(&mut master_rx).await;
        }
        let typing = next_event(&mut master_rx).await;
        assert_eq!(typing["type"], "typing");
        assert_eq!(typing["isTyping"], true);
        assert_eq!(typing["clientId"], c1.id.as_str());
    }

    #[tokio::test]
    async fn test_client_message_without_master_is_dropped() {
        let (hub, metrics) = spawn_hub(HubSettings::default());
        let (c1, mut c1_rx) = connect(&hub, Role::Client).await;
        let (_c2, mut c2_rx) = connect(&hub, Role::Client).await;
        next_event(&mut c1_rx).await;
        next_event(&mut c2_rx).await;

        hub.dispatch(message_from(&c1, None, "anyone?"))
            .await
            .unwrap();
        settle(&hub).await;

        assert_silent(&mut c1_rx).await;
        assert_silent(&mut c2_rx).await;
        assert_eq!(hub.roster().await.unwrap().iter().map(|e| e.unread_count).sum::<u64>(), 0);
        assert_eq!(metrics.snapshot().events_dropped, 1);
    }

    #[tokio::test]
    async fn test_master_message_to_departed_client_is_dropped() {
        let (hub, metrics) = spawn_hub(HubSettings::default());
        let (master, mut master_rx) = connect(&hub, Role::Master).await;
        let (c1, c1_rx) = connect(&hub, Role::Client).await;
        drop(c1_rx);

        hub.unregister(c1.id.clone()).await.unwrap();
        hub.dispatch(message_from(&master, Some(&c1.id), "still there?"))
            .await
            .unwrap();
        let status = settle(&hub).await;

        assert_eq!(status.client_count, 0);
        assert!(status.has_master);
        assert_eq!(metrics.snapshot().events_routed, 0);

        // welcome, empty roster, roster(c1), roster(empty)
        for _ in 0..3 {
            next_event(&mut master_rx).await;
        }
        let roster = next_event(&mut master_rx).await;
        assert_eq!(roster["clients"].as_array().unwrap().len(), 0);
        assert_silent(&mut master_rx).await;
    }

    #[tokio::test]
    async fn test_master_message_without_target_is_dropped() {
        let (hub, metrics) = spawn_hub(HubSettings::default());
        let (master, _master_rx) = connect(&hub, Role::Master).await;
        let (_c1, mut c1_rx) = connect(&hub, Role::Client).await;
        next_event(&mut c1_rx).await;

        hub.dispatch(message_from(&master, None, "broadcast?"))
            .await
            .unwrap();
        settle(&hub).await;

        assert_silent(&mut c1_rx).await;
        assert_eq!(metrics.snapshot().events_dropped, 1);
    }

    #[tokio::test]
    async fn test_display_names_are_sequential_and_not_recycled() {
        let (hub, _metrics) = spawn_hub(HubSettings::default());

        let mut clients = Vec::new();
        for _ in 0..3 {
            clients.push(connect(&hub, Role::Client).await);
        }
        let names: Vec<_> = clients
            .iter()
            .map(|(identity, _)| identity.display_name.clone().unwrap())
            .collect();
        assert_eq!(names, ["Client 1", "Client 2", "Client 3"]);

        let (first, _rx) = clients.remove(0);
        hub.unregister(first.id.clone()).await.unwrap();
        let (newcomer, _newcomer_rx) = connect(&hub, Role::Client).await;

        // Name follows current count; existing sessions keep their names
        assert_eq!(newcomer.display_name.as_deref(), Some("Client 3"));
        let mut roster_names: Vec<_> = hub
            .roster()
            .await
            .unwrap()
            .into_iter()
            .filter(|e| e.id != newcomer.id)
            .map(|e| e.name)
            .collect();
        roster_names.sort();
        assert_eq!(roster_names, ["Client 2", "Client 3"]);
    }

    #[tokio::test]
    async fn test_second_master_replaces_first() {
        let (hub, metrics) = spawn_hub(HubSettings::default());
        let (m1, mut m1_rx) = connect(&hub, Role::Master).await;
        let (m2, mut m2_rx) = connect(&hub, Role::Master).await;
        let (c1, _c1_rx) = connect(&hub, Role::Client).await;

        let status = settle(&hub).await;
        assert_eq!(status.master_id.as_deref(), Some(m2.id.as_str()));
        assert_eq!(status.detached_masters, 1);
        assert_eq!(metrics.snapshot().masters_replaced, 1);

        hub.dispatch(message_from(&c1, None, "who's there?"))
            .await
            .unwrap();

        // m2: welcome, empty roster, roster(c1), message
        for _ in 0..3 {
            next_event(&mut m2_rx).await;
        }
        assert_eq!(next_event(&mut m2_rx).await["content"], "who's there?");

        // m1 only saw its own welcome and empty roster; its queue is still open
        next_event(&mut m1_rx).await;
        next_event(&mut m1_rx).await;
        assert_silent(&mut m1_rx).await;

        // The displaced master leaving does not unseat the new one
        hub.unregister(m1.id.clone()).await.unwrap();
        let status = settle(&hub).await;
        assert_eq!(status.master_id.as_deref(), Some(m2.id.as_str()));
        assert_eq!(status.detached_masters, 0);
        assert_eq!(m1_rx.recv().await, None);
    }

    #[tokio::test]
    async fn test_displaced_master_cannot_route() {
        let (hub, _metrics) = spawn_hub(HubSettings::default());
        let (m1, _m1_rx) = connect(&hub, Role::Master).await;
        let (_m2, _m2_rx) = connect(&hub, Role::Master).await;
        let (c1, mut c1_rx) = connect(&hub, Role::Client).await;
        next_event(&mut c1_rx).await;

        hub.dispatch(message_from(&m1, Some(&c1.id), "stale"))
            .await
            .unwrap();
        settle(&hub).await;

        assert_silent(&mut c1_rx).await;
    }

    #[tokio::test]
    async fn test_unregister_is_idempotent() {
        let (hub, _metrics) = spawn_hub(HubSettings::default());
        let (_m, mut master_rx) = connect(&hub, Role::Master).await;
        let (c1, mut c1_rx) = connect(&hub, Role::Client).await;

        hub.unregister(c1.id.clone()).await.unwrap();
        hub.unregister(c1.id.clone()).await.unwrap();
        hub.unregister("never-registered".to_string())
            .await
            .unwrap();
        let status = settle(&hub).await;
        assert_eq!(status.client_count, 0);
        assert!(status.has_master);

        // Client queue closed after its welcome
        next_event(&mut c1_rx).await;
        assert_eq!(c1_rx.recv().await, None);

        // welcome, empty roster, roster(c1), then exactly one refresh for the departure
        for _ in 0..4 {
            next_event(&mut master_rx).await;
        }
        assert_silent(&mut master_rx).await;
    }

    #[tokio::test]
    async fn test_full_queue_drops_event_without_blocking() {
        let (hub, metrics) = spawn_hub(HubSettings::default());
        let (master_tx, mut master_rx) = outbound_queue(2);
        hub.register(Role::Master, master_tx).await.unwrap();
        // welcome + empty roster fill the master queue
        let (c1, _c1_rx) = connect(&hub, Role::Client).await;

        hub.dispatch(message_from(&c1, None, "lost")).await.unwrap();
        let status = settle(&hub).await;
        assert_eq!(status.client_count, 1);

        // roster(c1) and the message were both dropped
        assert_eq!(metrics.snapshot().events_dropped, 2);
        assert_eq!(metrics.snapshot().events_routed, 0);
        assert_eq!(next_event(&mut master_rx).await["type"], "welcome");
        assert_eq!(next_event(&mut master_rx).await["type"], "clients_update");
        assert_silent(&mut master_rx).await;

        // Unread still credited: the message reached the hub, only delivery failed
        assert_eq!(hub.roster().await.unwrap()[0].unread_count, 1);
    }

    #[tokio::test]
    async fn test_greeting_and_presence_notices() {
        let (hub, _metrics) = spawn_hub(HubSettings {
            client_greeting: Some("Welcome! How can we help?".to_string()),
            presence_notices: true,
            ..HubSettings::default()
        });
        let (_m, mut master_rx) = connect(&hub, Role::Master).await;
        let (c1, mut c1_rx) = connect(&hub, Role::Client).await;

        assert_eq!(next_event(&mut c1_rx).await["type"], "welcome");
        let greeting = next_event(&mut c1_rx).await;
        assert_eq!(greeting["type"], "message");
        assert_eq!(greeting["role"], "master");
        assert_eq!(greeting["content"], "Welcome! How can we help?");

        // welcome, empty roster, roster(c1), join notice
        for _ in 0..3 {
            next_event(&mut master_rx).await;
        }
        let joined = next_event(&mut master_rx).await;
        assert_eq!(joined["role"], "system");
        assert_eq!(joined["content"], "Client 1 has joined the chat");

        hub.unregister(c1.id.clone()).await.unwrap();
        assert_eq!(next_event(&mut master_rx).await["type"], "clients_update");
        let left = next_event(&mut master_rx).await;
        assert_eq!(left["role"], "system");
        assert_eq!(left["content"], "Client 1 has left the chat");
    }

    #[tokio::test]
    async fn test_dispatch_updates_last_seen() {
        let (hub, _metrics) = spawn_hub(HubSettings::default());
        let (_m, _master_rx) = connect(&hub, Role::Master).await;
        let (c1, _c1_rx) = connect(&hub, Role::Client).await;
        let joined_at = hub.roster().await.unwrap()[0].last_seen;

        let mut envelope = typing_from(&c1, None);
        envelope.received_at = joined_at + chrono::Duration::seconds(30);
        hub.dispatch(envelope).await.unwrap();

        let roster = hub.roster().await.unwrap();
        assert_eq!(roster[0].last_seen, joined_at + chrono::Duration::seconds(30));
    }

    #[tokio::test]
    async fn test_touch_updates_last_seen_without_routing() {
        let (hub, metrics) = spawn_hub(HubSettings::default());
        let (_m, mut master_rx) = connect(&hub, Role::Master).await;
        let (c1, _c1_rx) = connect(&hub, Role::Client).await;
        let joined_at = hub.roster().await.unwrap()[0].last_seen;

        let seen_at = joined_at + chrono::Duration::seconds(45);
        hub.touch(c1.id.clone(), seen_at).await.unwrap();
        hub.touch("never-registered".to_string(), seen_at)
            .await
            .unwrap();

        let roster = hub.roster().await.unwrap();
        assert_eq!(roster[0].last_seen, seen_at);
        assert_eq!(roster[0].unread_count, 0);
        assert_eq!(metrics.snapshot().events_routed, 0);

        // welcome, empty roster, roster(c1) and nothing for the touch
        for _ in 0..3 {
            next_event(&mut master_rx).await;
        }
        assert_silent(&mut master_rx).await;
    }

    #[tokio::test]
    async fn test_dispatch_before_unregister_is_delivered_first() {
        let (hub, _metrics) = spawn_hub(HubSettings::default());
        let (_m, mut master_rx) = connect(&hub, Role::Master).await;
        let (c1, _c1_rx) = connect(&hub, Role::Client).await;
        let (_c2, _c2_rx) = connect(&hub, Role::Client).await;

        // Neither request is handled before both are queued
        hub.dispatch(message_from(&c1, None, "bye")).await.unwrap();
        hub.unregister(c1.id.clone()).await.unwrap();
        settle(&hub).await;

        // welcome, empty roster, roster(c1), roster(c1, c2)
        for _ in 0..4 {
            next_event(&mut master_rx).await;
        }
        let relayed = next_event(&mut master_rx).await;
        assert_eq!(relayed["type"], "message");
        assert_eq!(relayed["content"], "bye");
        assert_eq!(relayed["clientId"], c1.id.as_str());
        let roster = next_event(&mut master_rx).await;
        assert_eq!(roster["type"], "clients_update");
        assert_eq!(roster["clients"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_register_after_unregister_sees_departure() {
        let (hub, _metrics) = spawn_hub(HubSettings::default());
        let (c1, _c1_rx) = connect(&hub, Role::Client).await;
        let (_c2, _c2_rx) = connect(&hub, Role::Client).await;

        hub.unregister(c1.id.clone()).await.unwrap();
        let (c3, _c3_rx) = connect(&hub, Role::Client).await;

        assert_eq!(c3.display_name.as_deref(), Some("Client 2"));
        assert_eq!(settle(&hub).await.client_count, 2);
    }

    #[tokio::test]
    async fn test_abandoned_registration_is_rolled_back() {
        let (hub, _metrics) = spawn_hub(HubSettings::default());
        let (tx, _rx) = outbound_queue(4);
        let (respond_to, response) = oneshot::channel();
        drop(response);

        hub.submit(HubMessage::Register {
            role: Role::Client,
            outbound: tx,
            respond_to,
        })
        .await
        .unwrap();

        let status = settle(&hub).await;
        assert_eq!(status.client_count, 0);
    }

    #[tokio::test]
    async fn test_abandoned_master_registration_restores_previous_master() {
        let (hub, _metrics) = spawn_hub(HubSettings::default());
        let (master, _master_rx) = connect(&hub, Role::Master).await;

        let (tx, _rx) = outbound_queue(4);
        let (respond_to, response) = oneshot::channel();
        drop(response);
        hub.submit(HubMessage::Register {
            role: Role::Master,
            outbound: tx,
            respond_to,
        })
        .await
        .unwrap();

        let status = settle(&hub).await;
        assert_eq!(status.master_id.as_deref(), Some(master.id.as_str()));
        assert_eq!(status.detached_masters, 0);
    }

    #[tokio::test]
    async fn test_cancel_closes_all_sessions() {
        let metrics = HubMetrics::new();
        let (hub, task) = HubActorHandle::spawn(HubSettings::default(), Arc::clone(&metrics));
        let (_m, mut master_rx) = connect(&hub, Role::Master).await;
        let (_c, mut c_rx) = connect(&hub, Role::Client).await;

        hub.cancel();
        timeout(Duration::from_secs(1), task)
            .await
            .expect("hub should stop")
            .unwrap();

        assert!(hub.is_cancelled());
        while master_rx.recv().await.is_some() {}
        while c_rx.recv().await.is_some() {}
        assert!(matches!(
            hub.status().await,
            Err(RelayError::HubUnavailable(_))
        ));
        assert_eq!(metrics.snapshot().active_clients, 0);
    }
}
