// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Session Handler (C7), §4.7: the connection state machine, one instance
//! per active MQTT connection. Modeled on the teacher's `session::Session`
//! actor (a single task owning its mutable inflight/alias state, driven by
//! `tokio::select!` over the socket and its mailbox in the real run loop)
//! but generalized to drive C3 (subscriptions), C4 (retained), C5
//! (session store) and the cluster map (C6/§4.8) instead of the teacher's
//! no-op local state.
//!
//! The raw socket/codec loop is an external collaborator (§1: "wire codec
//! ... assumed given by a library") — this module exposes the state
//! machine as plain methods taking/returning the already-decoded
//! [`crate::routing::types`] vocabulary, so a connection loop (wherever it
//! lives) drives it by calling these methods and writing back whatever
//! [`Outbound`] it returns.

use std::collections::HashMap;
use std::sync::Arc;

use codec::{PacketId, QoS};
use tokio::sync::mpsc;

use crate::archive::ArchivePipeline;
use crate::bus::{BusFrame, MessageBus};
use crate::cluster::ClusterMap;
use crate::error::{Error, ErrorKind};
use crate::retained::RetainedStore;
use crate::routing::types::{
    now_millis, BrokerMessage, ClientId, ConnectionState, LastWill, NodeId, RetainHandling,
    Session, Subscription,
};
use crate::routing::SubscriptionManager;
use crate::session_store::SessionStore;

const SYS_PREFIX: &str = "$SYS";

/// Narrow authentication/authorization seam (§1: "external ACL/auth
/// store ... a narrow interface the core calls into"). The permissive
/// default lets the routing core be exercised standalone; a real
/// deployment supplies one backed by its user/ACL database.
pub trait Authorizer: Send + Sync + std::fmt::Debug {
    fn authenticate(&self, client_id: &str, username: Option<&str>, password: Option<&[u8]>) -> bool;
    fn can_publish(&self, client_id: &str, topic: &str) -> bool;
    fn can_subscribe(&self, client_id: &str, filter: &str) -> bool;
}

#[derive(Debug, Default)]
pub struct AllowAllAuthorizer;

impl Authorizer for AllowAllAuthorizer {
    fn authenticate(&self, _client_id: &str, _username: Option<&str>, _password: Option<&[u8]>) -> bool {
        true
    }

    fn can_publish(&self, _client_id: &str, topic: &str) -> bool {
        !topic.starts_with(SYS_PREFIX)
    }

    fn can_subscribe(&self, _client_id: &str, _filter: &str) -> bool {
        true
    }
}

/// The shared routing core every [`SessionHandler`] on this node drives.
/// Bundles C3–C6 and C8 behind `Arc` so many per-connection actors can
/// share them, mirroring how the teacher's dispatcher holds one set of
/// shared maps for all session actors.
#[derive(Debug)]
pub struct BrokerCore {
    pub node_id: NodeId,
    pub subscriptions: Arc<SubscriptionManager>,
    pub sessions: Arc<SessionStore>,
    pub retained: Arc<RetainedStore>,
    pub cluster: Arc<ClusterMap>,
    pub bus: Arc<MessageBus>,
    pub archive: Arc<ArchivePipeline>,
    pub authorizer: Arc<dyn Authorizer>,
}

impl BrokerCore {
    #[must_use]
    pub fn new(
        node_id: &str,
        subscriptions: Arc<SubscriptionManager>,
        sessions: Arc<SessionStore>,
        retained: Arc<RetainedStore>,
        cluster: Arc<ClusterMap>,
        bus: Arc<MessageBus>,
        archive: Arc<ArchivePipeline>,
    ) -> Self {
        Self {
            node_id: node_id.to_string(),
            subscriptions,
            sessions,
            retained,
            cluster,
            bus,
            archive,
            authorizer: Arc::new(AllowAllAuthorizer),
        }
    }

    #[must_use]
    pub fn with_authorizer(mut self, authorizer: Arc<dyn Authorizer>) -> Self {
        self.authorizer = authorizer;
        self
    }
}

/// §4.7.1 connection state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerState {
    Init,
    Authenticating,
    Connected,
    Disconnecting,
    Closed,
}

/// DISCONNECT/CONNACK reason, collapsed to what the routing core decides;
/// wire-level reason code mapping happens at the codec boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    Normal,
    SessionTakenOver,
    KeepAliveTimeout,
    ProtocolError,
    ServerShuttingDown,
    NotAuthorized,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnAckReason {
    Accepted,
    NotAuthorized,
    ServerUnavailable,
    IdentifierRejected,
}

#[derive(Debug, Clone)]
pub struct ConnectRequest {
    pub client_id: ClientId,
    pub client_address: String,
    pub clean_start: bool,
    pub keep_alive_secs: u16,
    pub session_expiry_interval: u32,
    pub username: Option<String>,
    pub password: Option<Vec<u8>>,
    pub last_will: Option<LastWill>,
}

/// What the connection loop must write back to the client after a call
/// into the handler.
#[derive(Debug, Clone)]
pub enum Outbound {
    ConnAck { reason: ConnAckReason, session_present: bool },
    SubAck(Vec<QoS>),
    UnsubAck,
    Publish(BrokerMessage),
    PubAck(PacketId),
    PubRec(PacketId),
    PubRel(PacketId),
    PubComp(PacketId),
    Disconnect(DisconnectReason),
}

/// Result of accepting an inbound PUBLISH, §4.7.3 step 5.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishAck {
    None,
    PubAck(PacketId),
    PubRec(PacketId),
}

/// Validate a subscription filter per §4.7.2: no `#` except as the final
/// level, no `+` sharing a level with other characters, bounded length.
#[must_use]
pub fn validate_filter(filter: &str) -> bool {
    if filter.is_empty() || filter.len() > 65535 {
        return false;
    }
    let levels: Vec<&str> = filter.split('/').collect();
    for (i, level) in levels.iter().enumerate() {
        if level.contains('#') && (*level != "#" || i != levels.len() - 1) {
            return false;
        }
        if level.contains('+') && *level != "+" {
            return false;
        }
    }
    true
}

/// One active MQTT connection's mutable state, §4.7.
#[derive(Debug)]
pub struct SessionHandler {
    pub client_id: ClientId,
    state: HandlerState,
    keep_alive_secs: u16,
    clean_start: bool,
    session_expiry_interval: u32,
    last_will: Option<LastWill>,
    /// MQTT5 per-connection topic alias table (outbound direction); a
    /// per-hop concept the spec forbids propagating across the bus (§9).
    topic_aliases: HashMap<u16, String>,
    /// This connection's bus mailbox, assigned on [`Self::connect`]; the
    /// run loop reads from it (via [`Self::recv`]) and feeds each frame to
    /// [`Self::deliver`].
    mailbox: Option<mpsc::Receiver<BusFrame>>,
}

impl SessionHandler {
    #[must_use]
    pub fn new(client_id: &str) -> Self {
        Self {
            client_id: client_id.to_string(),
            state: HandlerState::Init,
            keep_alive_secs: 60,
            clean_start: true,
            session_expiry_interval: 0,
            last_will: None,
            topic_aliases: HashMap::new(),
            mailbox: None,
        }
    }

    #[must_use]
    pub const fn state(&self) -> HandlerState {
        self.state
    }

    /// Receive the next bus frame for this connection, if its mailbox is
    /// registered (i.e. after [`Self::connect`]).
    pub async fn recv(&mut self) -> Option<BusFrame> {
        self.mailbox.as_mut()?.recv().await
    }

    /// Keepalive watchdog deadline, §4.7.1 step 9 / §5: 1.5x negotiated.
    #[must_use]
    pub fn keepalive_deadline_secs(&self) -> u64 {
        (f64::from(self.keep_alive_secs) * 1.5).ceil() as u64
    }

    pub fn resolve_topic_alias(&mut self, alias: u16, topic: Option<&str>) -> Option<String> {
        if let Some(topic) = topic {
            self.topic_aliases.insert(alias, topic.to_string());
            Some(topic.to_string())
        } else {
            self.topic_aliases.get(&alias).cloned()
        }
    }

    /// CONNECT processing, §4.7.1 steps 1-9. Returns the CONNACK plus
    /// whatever queued/inflight messages must be drained to the socket
    /// immediately after (step 8).
    pub fn connect(&mut self, core: &BrokerCore, req: ConnectRequest) -> (Outbound, Vec<Outbound>) {
        self.state = HandlerState::Authenticating;
        if !core.authorizer.authenticate(&req.client_id, req.username.as_deref(), req.password.as_deref()) {
            self.state = HandlerState::Closed;
            return (
                Outbound::ConnAck {
                    reason: ConnAckReason::NotAuthorized,
                    session_present: false,
                },
                Vec::new(),
            );
        }

        // Takeover: overwriting the client's mailbox drops the prior
        // Sender from the bus map; the prior handler's receiver then
        // observes its channel closed on its next poll and tears itself
        // down with `SessionTakenOver` (§4.7.1 step 3).
        let had_prior_owner = core.cluster.owner_of(&req.client_id).is_some();
        let event = core.cluster.set_owner(&req.client_id, &core.node_id);
        core.bus.publish_subs_event(event);
        self.mailbox = Some(core.bus.register_client(&req.client_id));

        self.client_id = req.client_id.clone();
        self.clean_start = req.clean_start;
        self.keep_alive_secs = req.keep_alive_secs;
        self.session_expiry_interval = req.session_expiry_interval;
        self.last_will = req.last_will;

        let session_present = if req.clean_start {
            core.sessions.delete_session(&req.client_id);
            for filter in core.subscriptions.disconnect_client(&req.client_id) {
                let _ = filter;
            }
            false
        } else {
            core.sessions.load_session(&req.client_id).is_some()
        };

        let mut session = Session::new(&req.client_id, &core.node_id, req.clean_start);
        session.client_address = req.client_address;
        session.session_expiry_interval = req.session_expiry_interval;
        session.last_will = self.last_will.clone();
        core.sessions.save_session(session);

        // Reinstate persisted subscriptions (step 6) and replay retained
        // messages for them (step 7). Only `retainHandling=SendRetained`
        // replays on an automatic reinstatement; options 1/2 are reserved
        // for a genuinely new SUBSCRIBE (§4.3).
        let mut drained = Vec::new();
        for sub in core.sessions.subscriptions(&req.client_id) {
            core.subscriptions.subscribe(sub.clone());
            if sub.retain_handling == RetainHandling::SendRetained {
                for message in core.retained.find_matching(&sub.topic_filter) {
                    drained.push(Outbound::Publish(apply_retain_as_published(message, sub.retain_as_published)));
                }
            }
        }

        // Step 8: drain offline queue and outstanding inflight state.
        for message in core.sessions.drain_offline(&req.client_id, usize::MAX) {
            drained.push(Outbound::Publish(message));
        }
        for (packet_id, entry) in core.sessions.inflight_out(&req.client_id) {
            let mut message = entry.message;
            message.dup = true;
            message.message_id = packet_id;
            drained.push(Outbound::Publish(message));
        }

        self.state = HandlerState::Connected;
        let _ = had_prior_owner;
        (
            Outbound::ConnAck {
                reason: ConnAckReason::Accepted,
                session_present,
            },
            drained,
        )
    }

    /// SUBSCRIBE, §4.7.2.
    pub fn subscribe(
        &mut self,
        core: &BrokerCore,
        filters: Vec<(String, QoS, bool, bool, RetainHandling)>,
    ) -> (Outbound, Vec<Outbound>) {
        let mut granted = Vec::with_capacity(filters.len());
        let mut replay = Vec::new();
        for (filter, qos, no_local, retain_as_published, retain_handling) in filters {
            if !validate_filter(&filter) || !core.authorizer.can_subscribe(&self.client_id, &filter) {
                granted.push(QoS::AtMostOnce);
                continue;
            }
            let is_new = !core.subscriptions.already_subscribed(&self.client_id, &filter);
            let mut sub = Subscription::new(&self.client_id, &filter, qos);
            sub.no_local = no_local;
            sub.retain_as_published = retain_as_published;
            sub.retain_handling = retain_handling;
            core.subscriptions.subscribe(sub.clone());
            core.sessions.add_subscription(&self.client_id, sub);
            granted.push(qos);

            let should_replay = match retain_handling {
                RetainHandling::SendRetained => true,
                RetainHandling::SendOnNewSubscribeOnly => is_new,
                RetainHandling::Never => false,
            };
            if should_replay {
                for message in core.retained.find_matching(&filter) {
                    replay.push(Outbound::Publish(apply_retain_as_published(message, retain_as_published)));
                }
            }
        }
        (Outbound::SubAck(granted), replay)
    }

    /// UNSUBSCRIBE, §4.7.2 (symmetric to SUBSCRIBE).
    pub fn unsubscribe(&mut self, core: &BrokerCore, filters: Vec<String>) -> Outbound {
        for filter in filters {
            core.subscriptions.unsubscribe(&self.client_id, &filter);
            core.sessions.remove_subscription(&self.client_id, &filter);
        }
        Outbound::UnsubAck
    }

    /// PUBLISH ingress, §4.7.3. Called once per inbound PUBLISH after any
    /// QoS 2 deduplication (see [`Self::handle_incoming_publish`]).
    fn publish_ingress(&self, core: &BrokerCore, message: BrokerMessage) -> Result<(), Error> {
        if message.topic.is_empty() || message.topic.contains(['+', '#']) {
            return Err(Error::new(ErrorKind::ProtocolError, "invalid publish topic"));
        }
        if !core.authorizer.can_publish(&self.client_id, &message.topic) {
            return Err(Error::new(ErrorKind::AuthorizationError, "publish not authorized"));
        }

        if message.retain {
            if message.payload.is_empty() {
                core.retained.delete(&message.topic);
                core.bus.publish_retained_delta(&message.topic, None);
            } else {
                core.retained.put(&message.topic, message.clone());
                core.bus.publish_retained_delta(&message.topic, Some(message.clone()));
            }
        }

        for subscriber in core.subscriptions.find_all_subscribers(&message.topic) {
            let mut outgoing = message.clone();
            outgoing.qos = outgoing.downgrade_qos(subscriber.qos);
            match core.cluster.owner_of(&subscriber.client_id) {
                Some(node) if node != core.node_id => {
                    let _ = core.bus.send_to_node(&node, vec![outgoing]);
                }
                _ => {
                    if core
                        .bus
                        .send_to_client(&subscriber.client_id, BusFrame::Single(outgoing.clone()))
                        .is_err()
                    {
                        core.sessions.enqueue_offline(&subscriber.client_id, outgoing);
                    }
                }
            }
        }

        core.archive.ingest(&message);
        Ok(())
    }

    /// Wraps [`Self::publish_ingress`] with the QoS 2 incoming-in-flight
    /// dedup table (§4.7.3 step 5, §4.7.6 last row).
    ///
    /// # Errors
    ///
    /// Propagates protocol/authorization failures from `publish_ingress`.
    pub fn handle_incoming_publish(
        &self,
        core: &BrokerCore,
        message: BrokerMessage,
        packet_id: PacketId,
        dup: bool,
    ) -> Result<PublishAck, Error> {
        let qos = message.qos;
        if qos == QoS::ExactOnce {
            if dup && core.sessions.has_inflight_in(&self.client_id, packet_id) {
                return Ok(PublishAck::PubRec(packet_id));
            }
            core.sessions.add_inflight_in(&self.client_id, packet_id);
        }
        self.publish_ingress(core, message)?;
        Ok(match qos {
            QoS::AtMostOnce => PublishAck::None,
            QoS::AtLeastOnce => PublishAck::PubAck(packet_id),
            QoS::ExactOnce => PublishAck::PubRec(packet_id),
        })
    }

    pub fn handle_pubrel(&self, core: &BrokerCore, packet_id: PacketId) -> Outbound {
        core.sessions.remove_inflight_in(&self.client_id, packet_id);
        Outbound::PubComp(packet_id)
    }

    /// PUBLISH egress, §4.7.4: turns bus-delivered messages into wire
    /// frames, assigning packet ids and persisting inflight state for
    /// QoS >= 1 before the caller writes to the socket.
    pub fn deliver(&self, core: &BrokerCore, frame: BusFrame) -> Vec<Outbound> {
        let mut out = Vec::new();
        for mut message in frame.into_vec() {
            if message.sender_id == self.client_id && core.subscriptions.has_no_local(&self.client_id, &message.topic) {
                continue;
            }
            if !message.recompute_expiry(now_millis()) {
                continue;
            }
            if message.qos == QoS::AtMostOnce {
                out.push(Outbound::Publish(message));
                continue;
            }
            let Some(packet_id) = core.sessions.next_free_packet_id(&self.client_id) else {
                // Flow-control backpressure (§4.7.4 step 3): the caller must
                // pause reading from the bus until an ack frees an id.
                continue;
            };
            message.message_id = packet_id;
            core.sessions.add_inflight_out(&self.client_id, packet_id, message.clone());
            out.push(Outbound::Publish(message));
        }
        out
    }

    pub fn handle_puback(&self, core: &BrokerCore, packet_id: PacketId) {
        core.sessions.remove_inflight_out(&self.client_id, packet_id);
    }

    pub fn handle_pubrec(&self, core: &BrokerCore, packet_id: PacketId) -> Outbound {
        core.sessions.mark_inflight_received(&self.client_id, packet_id);
        Outbound::PubRel(packet_id)
    }

    pub fn handle_pubcomp(&self, core: &BrokerCore, packet_id: PacketId) {
        core.sessions.remove_inflight_out(&self.client_id, packet_id);
    }

    /// Disconnect (graceful or not), §4.7.1/§4.7.5/§4.7.6. Returns the will
    /// message, if one must fire after its delay interval (the timer
    /// itself is the caller's responsibility; a reconnect within the
    /// delay should simply not call [`Self::fire_will`]).
    pub fn disconnect(&mut self, core: &BrokerCore, graceful: bool) -> Option<LastWill> {
        self.state = HandlerState::Disconnecting;
        core.bus.unregister_client(&self.client_id);
        self.mailbox = None;

        if self.clean_start || self.session_expiry_interval == 0 {
            core.sessions.delete_session(&self.client_id);
            core.subscriptions.disconnect_client(&self.client_id);
        } else if let Some(mut session) = core.sessions.load_session(&self.client_id) {
            session.connected = ConnectionState::Offline;
            core.sessions.save_session(session);
        }
        core.bus.publish_subs_event(core.cluster.remove_owner(&self.client_id));
        self.state = HandlerState::Closed;

        if graceful {
            None
        } else {
            self.last_will.take()
        }
    }

    /// Publish the armed will message (§4.7.5), once the delay interval has
    /// elapsed without a cancelling reconnect.
    pub fn fire_will(&self, core: &BrokerCore, will: LastWill) -> Result<(), Error> {
        self.publish_ingress(core, will.message)
    }
}

/// Applies `retainAsPublished=false` by stripping the retain flag on this
/// hop only; the stored retained record itself is untouched (Open
/// Question (a)).
fn apply_retain_as_published(mut message: BrokerMessage, retain_as_published: bool) -> BrokerMessage {
    if !retain_as_published {
        message.retain = false;
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;

    fn core() -> BrokerCore {
        BrokerCore::new(
            "node-1",
            Arc::new(SubscriptionManager::new()),
            Arc::new(SessionStore::new(100)),
            Arc::new(RetainedStore::default()),
            Arc::new(ClusterMap::new()),
            Arc::new(MessageBus::new()),
            Arc::new(ArchivePipeline::new(Vec::new())),
        )
    }

    fn connect_req(client_id: &str) -> ConnectRequest {
        ConnectRequest {
            client_id: client_id.to_string(),
            client_address: "127.0.0.1:1".to_string(),
            clean_start: true,
            keep_alive_secs: 60,
            session_expiry_interval: 0,
            username: None,
            password: None,
            last_will: None,
        }
    }

    #[test]
    fn connect_accepts_and_registers_mailbox() {
        let core = core();
        let mut handler = SessionHandler::new("c1");
        let (ack, drained) = handler.connect(&core, connect_req("c1"));
        assert!(matches!(ack, Outbound::ConnAck { reason: ConnAckReason::Accepted, .. }));
        assert!(drained.is_empty());
        assert!(core.bus.has_client("c1"));
        assert_eq!(core.cluster.owner_of("c1").as_deref(), Some("node-1"));
    }

    #[tokio::test]
    async fn qos0_fanout_reaches_two_subscribers() {
        let core = core();
        let mut a = SessionHandler::new("a");
        a.connect(&core, connect_req("a"));
        a.subscribe(
            &core,
            vec![("room/+/temp".to_string(), QoS::AtMostOnce, false, true, RetainHandling::SendRetained)],
        );
        let mut b = SessionHandler::new("b");
        b.connect(&core, connect_req("b"));
        b.subscribe(
            &core,
            vec![("room/+/temp".to_string(), QoS::AtMostOnce, false, true, RetainHandling::SendRetained)],
        );

        let publisher = SessionHandler::new("c");
        let msg = BrokerMessage::new("c", "room/kitchen/temp", b"21.5".to_vec(), QoS::AtMostOnce, false);
        publisher.publish_ingress(&core, msg).unwrap();

        let frame_a = a.recv().await.unwrap();
        let out_a = a.deliver(&core, frame_a);
        assert_eq!(out_a.len(), 1);
        let frame_b = b.recv().await.unwrap();
        let out_b = b.deliver(&core, frame_b);
        assert_eq!(out_b.len(), 1);
    }

    #[test]
    fn no_local_suppresses_self_delivery_on_egress() {
        let core = core();
        let mut a = SessionHandler::new("a");
        a.connect(&core, connect_req("a"));
        let mut sub = Subscription::new("a", "chat/room", QoS::AtLeastOnce);
        sub.no_local = true;
        core.subscriptions.subscribe(sub);

        let msg = BrokerMessage::new("a", "chat/room", b"hi".to_vec(), QoS::AtLeastOnce, false);
        let out = a.deliver(&core, BusFrame::Single(msg));
        assert!(out.is_empty());
    }

    #[test]
    fn sys_publish_rejected_for_regular_client() {
        let core = core();
        let handler = SessionHandler::new("c1");
        let msg = BrokerMessage::new("c1", "$SYS/broker/uptime", b"60".to_vec(), QoS::AtMostOnce, false);
        assert!(handler.publish_ingress(&core, msg).is_err());
    }

    #[test]
    fn retained_replay_respects_retain_handling_once() {
        let core = core();
        let publisher = SessionHandler::new("p");
        let retained = BrokerMessage::new("p", "sensor/1", b"on".to_vec(), QoS::AtLeastOnce, true);
        publisher.publish_ingress(&core, retained).unwrap();

        let mut a = SessionHandler::new("a");
        a.connect(&core, connect_req("a"));
        let (_, replay1) = a.subscribe(
            &core,
            vec![("sensor/#".to_string(), QoS::AtLeastOnce, false, true, RetainHandling::SendOnNewSubscribeOnly)],
        );
        assert_eq!(replay1.len(), 1);

        let (_, replay2) = a.subscribe(
            &core,
            vec![("sensor/#".to_string(), QoS::AtLeastOnce, false, true, RetainHandling::SendOnNewSubscribeOnly)],
        );
        assert!(replay2.is_empty());
    }

    #[test]
    fn takeover_reassigns_owner_and_reinstates_subscriptions() {
        let core = core();
        let mut a1 = SessionHandler::new("client-7");
        a1.connect(
            &core,
            ConnectRequest {
                clean_start: false,
                session_expiry_interval: 3600,
                ..connect_req("client-7")
            },
        );
        a1.subscribe(&core, vec![("a/b".to_string(), QoS::AtLeastOnce, false, true, RetainHandling::SendRetained)]);

        let mut a2 = SessionHandler::new("client-7");
        a2.connect(
            &core,
            ConnectRequest {
                clean_start: false,
                session_expiry_interval: 3600,
                ..connect_req("client-7")
            },
        );

        assert_eq!(core.cluster.owner_of("client-7").as_deref(), Some("node-1"));
        assert!(core
            .subscriptions
            .find_all_subscribers("a/b")
            .iter()
            .any(|s| s.client_id == "client-7"));
    }

    #[test]
    fn qos2_duplicate_before_pubrel_is_deduplicated() {
        let core = core();
        let handler = SessionHandler::new("c1");
        let msg = BrokerMessage::new("c1", "orders/42", b"x".to_vec(), QoS::ExactOnce, false);
        let ack = handler.handle_incoming_publish(&core, msg.clone(), 5, false).unwrap();
        assert_eq!(ack, PublishAck::PubRec(5));
        let ack2 = handler.handle_incoming_publish(&core, msg, 5, true).unwrap();
        assert_eq!(ack2, PublishAck::PubRec(5));
        assert_eq!(core.archive.group_names().len(), 0);
    }
}
