// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! End-to-end scenarios S1-S6, driving multiple `SessionHandler`s against a
//! shared `BrokerCore` the way a real connection loop would.

use std::sync::Arc;

use codec::QoS;

use driftmq_broker::archive::ArchivePipeline;
use driftmq_broker::bus::{BusFrame, MessageBus};
use driftmq_broker::cluster::ClusterMap;
use driftmq_broker::retained::RetainedStore;
use driftmq_broker::routing::types::{BrokerMessage, RetainHandling, Subscription};
use driftmq_broker::routing::SubscriptionManager;
use driftmq_broker::session_handler::{
    BrokerCore, ConnAckReason, ConnectRequest, Outbound, PublishAck, SessionHandler,
};
use driftmq_broker::session_store::SessionStore;

fn core(node_id: &str) -> BrokerCore {
    BrokerCore::new(
        node_id,
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
        client_address: "10.0.0.1:1".to_string(),
        clean_start: true,
        keep_alive_secs: 60,
        session_expiry_interval: 0,
        username: None,
        password: None,
        last_will: None,
    }
}

/// S1: a QoS 0 publish fans out to every matching subscriber.
#[tokio::test]
async fn s1_qos0_fanout_to_multiple_subscribers() {
    let core = core("node-1");

    let mut sub_a = SessionHandler::new("sub-a");
    sub_a.connect(&core, connect_req("sub-a"));
    sub_a.subscribe(
        &core,
        vec![("room/+/temp".to_string(), QoS::AtMostOnce, false, true, RetainHandling::SendRetained)],
    );

    let mut sub_b = SessionHandler::new("sub-b");
    sub_b.connect(&core, connect_req("sub-b"));
    sub_b.subscribe(
        &core,
        vec![("room/+/temp".to_string(), QoS::AtMostOnce, false, true, RetainHandling::SendRetained)],
    );

    let publisher = SessionHandler::new("publisher");
    let msg = BrokerMessage::new("publisher", "room/kitchen/temp", b"21.5".to_vec(), QoS::AtMostOnce, false);
    let ack = publisher.handle_incoming_publish(&core, msg, 0, false).unwrap();
    assert_eq!(ack, PublishAck::None);

    let frame_a = sub_a.recv().await.unwrap();
    let out_a = sub_a.deliver(&core, frame_a);
    assert_eq!(out_a.len(), 1);
    assert!(matches!(&out_a[0], Outbound::Publish(m) if m.topic == "room/kitchen/temp"));

    let frame_b = sub_b.recv().await.unwrap();
    let out_b = sub_b.deliver(&core, frame_b);
    assert_eq!(out_b.len(), 1);
}

/// S2: a retained message is replayed once for `retainHandling=1`
/// (`SendOnNewSubscribeOnly`) and not replayed on a later re-subscribe to
/// the same filter.
#[tokio::test]
async fn s2_retained_replay_send_on_new_subscribe_only() {
    let core = core("node-1");

    let publisher = SessionHandler::new("publisher");
    let retained = BrokerMessage::new("publisher", "sensor/1/state", b"on".to_vec(), QoS::AtLeastOnce, true);
    publisher.handle_incoming_publish(&core, retained, 1, false).unwrap();

    let mut sub = SessionHandler::new("sub-a");
    sub.connect(&core, connect_req("sub-a"));
    let (_, first_replay) = sub.subscribe(
        &core,
        vec![("sensor/#".to_string(), QoS::AtLeastOnce, false, true, RetainHandling::SendOnNewSubscribeOnly)],
    );
    assert_eq!(first_replay.len(), 1);
    assert!(matches!(&first_replay[0], Outbound::Publish(m) if m.retain));

    let (_, second_replay) = sub.subscribe(
        &core,
        vec![("sensor/#".to_string(), QoS::AtLeastOnce, false, true, RetainHandling::SendOnNewSubscribeOnly)],
    );
    assert!(second_replay.is_empty());
}

/// S3: a QoS 2 publish is delivered exactly once even if the PUBLISH is
/// retried before the PUBREL arrives, and an un-acked outbound QoS 2
/// message is redelivered with `dup=true` across a reconnect.
#[tokio::test]
async fn s3_qos2_exactly_once_across_reconnect() {
    let core = core("node-1");

    let mut sub = SessionHandler::new("sub-a");
    sub.connect(
        &core,
        ConnectRequest {
            clean_start: false,
            session_expiry_interval: 3600,
            ..connect_req("sub-a")
        },
    );
    sub.subscribe(
        &core,
        vec![("orders/#".to_string(), QoS::ExactOnce, false, true, RetainHandling::Never)],
    );

    let publisher = SessionHandler::new("publisher");
    let msg = BrokerMessage::new("publisher", "orders/42", b"create".to_vec(), QoS::ExactOnce, false);
    let first_ack = publisher.handle_incoming_publish(&core, msg.clone(), 7, false).unwrap();
    assert_eq!(first_ack, PublishAck::PubRec(7));
    // Retransmitted PUBLISH before PUBREL: deduplicated, still PUBREC, and
    // must not fan out a second time.
    let dup_ack = publisher.handle_incoming_publish(&core, msg, 7, true).unwrap();
    assert_eq!(dup_ack, PublishAck::PubRec(7));

    let frame = sub.recv().await.unwrap();
    let delivered = sub.deliver(&core, frame);
    assert_eq!(delivered.len(), 1);

    // The subscriber disconnects uncleanly (session survives) before
    // acking the QoS 2 message it was just handed.
    sub.disconnect(&core, false);

    let mut sub2 = SessionHandler::new("sub-a");
    let (_, drained) = sub2.connect(
        &core,
        ConnectRequest {
            clean_start: false,
            session_expiry_interval: 3600,
            ..connect_req("sub-a")
        },
    );
    assert_eq!(drained.len(), 1);
    match &drained[0] {
        Outbound::Publish(m) => {
            assert!(m.dup);
            assert_eq!(m.topic, "orders/42");
        }
        other => panic!("expected a redelivered Publish, got {other:?}"),
    }
}

/// S4: a `noLocal` subscription never receives its own publisher's
/// messages on egress, even though the publish still fans out normally to
/// other subscribers.
#[tokio::test]
async fn s4_no_local_suppresses_self_delivery() {
    let core = core("node-1");

    let mut author = SessionHandler::new("author");
    author.connect(&core, connect_req("author"));
    let mut no_local_sub = Subscription::new("author", "chat/room", QoS::AtLeastOnce);
    no_local_sub.no_local = true;
    core.subscriptions.subscribe(no_local_sub);

    let mut other = SessionHandler::new("listener");
    other.connect(&core, connect_req("listener"));
    other.subscribe(
        &core,
        vec![("chat/room".to_string(), QoS::AtLeastOnce, false, true, RetainHandling::Never)],
    );

    let msg = BrokerMessage::new("author", "chat/room", b"hi".to_vec(), QoS::AtLeastOnce, false);
    author.handle_incoming_publish(&core, msg, 3, false).unwrap();

    let own_frame = author.recv().await.unwrap();
    assert!(author.deliver(&core, own_frame).is_empty());

    let other_frame = other.recv().await.unwrap();
    assert_eq!(other.deliver(&core, other_frame).len(), 1);
}

/// S5: a bare `#` subscription never receives `$SYS/...` messages, while an
/// explicit `$SYS/#` subscription does.
#[tokio::test]
async fn s5_sys_topics_excluded_from_bare_wildcard() {
    let core = core("node-1");

    let mut plain = SessionHandler::new("plain");
    plain.connect(&core, connect_req("plain"));
    plain.subscribe(&core, vec![("#".to_string(), QoS::AtMostOnce, false, true, RetainHandling::Never)]);

    let mut sys_watcher = SessionHandler::new("sys-watcher");
    sys_watcher.connect(&core, connect_req("sys-watcher"));
    sys_watcher.subscribe(
        &core,
        vec![("$SYS/#".to_string(), QoS::AtMostOnce, false, true, RetainHandling::Never)],
    );

    assert!(core
        .subscriptions
        .find_all_subscribers("$SYS/broker/uptime")
        .iter()
        .all(|s| s.client_id != "plain"));
    assert!(core
        .subscriptions
        .find_all_subscribers("$SYS/broker/uptime")
        .iter()
        .any(|s| s.client_id == "sys-watcher"));
    assert!(core
        .subscriptions
        .find_all_subscribers("devices/1/status")
        .iter()
        .any(|s| s.client_id == "plain"));
}

/// S6: a second CONNECT with the same `clientId` takes over ownership and
/// reinstates the persisted subscriptions; the prior handler's mailbox is
/// starved, observable as its `recv()` returning `None`.
#[tokio::test]
async fn s6_reconnect_takes_over_session() {
    let core = core("node-1");

    let mut first = SessionHandler::new("client-7");
    first.connect(
        &core,
        ConnectRequest {
            clean_start: false,
            session_expiry_interval: 3600,
            ..connect_req("client-7")
        },
    );
    first.subscribe(
        &core,
        vec![("a/b".to_string(), QoS::AtLeastOnce, false, true, RetainHandling::SendRetained)],
    );

    let mut second = SessionHandler::new("client-7");
    let (ack, _) = second.connect(
        &core,
        ConnectRequest {
            clean_start: false,
            session_expiry_interval: 3600,
            ..connect_req("client-7")
        },
    );
    assert!(matches!(
        ack,
        Outbound::ConnAck { reason: ConnAckReason::Accepted, session_present: true }
    ));
    assert_eq!(core.cluster.owner_of("client-7").as_deref(), Some("node-1"));
    assert!(core
        .subscriptions
        .find_all_subscribers("a/b")
        .iter()
        .any(|s| s.client_id == "client-7"));

    // The original handler's mailbox was overwritten by the takeover; its
    // receiver observes the channel closing rather than hanging forever.
    let closed: Option<BusFrame> = first.recv().await;
    assert!(closed.is_none());
}
