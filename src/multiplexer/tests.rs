use std::time::Duration;

use super::{Multiplexer, ReconnectPolicy};
use crate::tests::support::{FakeUpstream, unreachable_base_url, within};
use crate::upstream::{CloseReason, ConnectionState, Message, Topic, UpstreamHandler};
use crate::utils::RelayError;
use tokio::sync::mpsc;
use tungstenite::protocol::Message as WsMessage;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Seen {
    Open(String),
    Content(String, String),
    Close(String, CloseReason),
}

struct Recorder(mpsc::UnboundedSender<Seen>);

impl UpstreamHandler for Recorder {
    fn on_open(&self, topic: &Topic) {
        let _ = self.0.send(Seen::Open(topic.display_key()));
    }

    fn on_message(&self, topic: &Topic, message: Message) {
        assert_eq!(message.topic, topic.display_key());
        let _ = self.0.send(Seen::Content(
            topic.display_key(),
            message.payload_text().into_owned(),
        ));
    }

    fn on_close(&self, topic: &Topic, reason: &CloseReason) {
        let _ = self.0.send(Seen::Close(topic.display_key(), reason.clone()));
    }
}

fn recorder() -> (Recorder, mpsc::UnboundedReceiver<Seen>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Recorder(tx), rx)
}

async fn next_seen(rx: &mut mpsc::UnboundedReceiver<Seen>) -> Seen {
    within(rx.recv()).await.expect("handler dropped")
}

fn fast_reconnect() -> ReconnectPolicy {
    ReconnectPolicy::exponential(Duration::from_millis(10), Duration::from_millis(40))
}

#[test]
fn test_reconnect_delays_double_and_cap() {
    let policy = ReconnectPolicy::exponential(Duration::from_millis(500), Duration::from_secs(8));
    let delays: Vec<u64> = (0..7)
        .map(|n| policy.delay_for(n).as_millis() as u64)
        .collect();
    assert_eq!(delays, [500, 1_000, 2_000, 4_000, 8_000, 8_000, 8_000]);

    // no overflow far out
    assert_eq!(policy.delay_for(200), Duration::from_secs(8));
}

#[test]
fn test_reconnect_attempt_limits() {
    assert!(!ReconnectPolicy::disabled().allows(0));

    let unlimited = fast_reconnect();
    assert!(unlimited.allows(0));
    assert!(unlimited.allows(10_000));

    let limited = fast_reconnect().with_max_attempts(3);
    assert!(limited.allows(2));
    assert!(!limited.allows(3));
}

#[tokio::test]
async fn test_subscribe_empty_topic_is_invalid() {
    let upstream = FakeUpstream::start().await;
    let (handler, _rx) = recorder();
    let mut mux = Multiplexer::new(upstream.base_url.clone(), handler);

    let err = mux.subscribe("", None).await.unwrap_err();
    assert!(matches!(err, RelayError::InvalidArgument(_)));
    assert!(mux.is_empty());
}

#[tokio::test]
async fn test_subscribe_unreachable_is_connection_error() {
    let (handler, _rx) = recorder();
    let mut mux = Multiplexer::new(unreachable_base_url().await, handler);

    let err = mux.subscribe("measurement", None).await.unwrap_err();
    assert!(matches!(err, RelayError::Connection { .. }));
    assert!(mux.is_empty());
}

#[tokio::test]
async fn test_instances_are_independent() {
    let mut upstream = FakeUpstream::start().await;
    let (handler, mut seen) = recorder();
    let mut mux = Multiplexer::new(upstream.base_url.clone(), handler);

    mux.subscribe("measurement", None).await.unwrap();
    let mut plain = upstream.accept().await;
    mux.subscribe("measurement", Some("2")).await.unwrap();
    let mut second = upstream.accept().await;

    assert_eq!(plain.path, "/subscribe/measurement");
    assert_eq!(second.path, "/subscribe/measurement/2");
    assert_eq!(mux.keys(), ["measurement", "measurement-2"]);

    assert_eq!(next_seen(&mut seen).await, Seen::Open("measurement".into()));
    assert_eq!(next_seen(&mut seen).await, Seen::Open("measurement-2".into()));

    second.send_text("only-2").await;
    assert_eq!(
        next_seen(&mut seen).await,
        Seen::Content("measurement-2".into(), "only-2".into())
    );

    plain.send_text("only-plain").await;
    assert_eq!(
        next_seen(&mut seen).await,
        Seen::Content("measurement".into(), "only-plain".into())
    );

    // closing one leaves the other running
    second.close().await;
    assert_eq!(
        next_seen(&mut seen).await,
        Seen::Close("measurement-2".into(), CloseReason::Remote(None))
    );
    plain.send_text("still-here").await;
    assert_eq!(
        next_seen(&mut seen).await,
        Seen::Content("measurement".into(), "still-here".into())
    );
    assert_eq!(mux.state("measurement"), Some(ConnectionState::Open));

    mux.shutdown().await;
}

#[tokio::test]
async fn test_duplicate_subscription_is_rejected_until_closed() {
    let mut upstream = FakeUpstream::start().await;
    let (handler, _seen) = recorder();
    let mut mux = Multiplexer::new(upstream.base_url.clone(), handler);

    let mut status = mux.subscribe("service", None).await.unwrap();
    let peer = upstream.accept().await;

    let err = mux.subscribe("service", None).await.unwrap_err();
    assert!(matches!(err, RelayError::AlreadySubscribed(key) if key == "service"));

    // without a reconnect policy an upstream close is terminal
    peer.close().await;
    assert!(within(status.wait_for(ConnectionState::Closed)).await);
    assert_eq!(mux.state("service"), Some(ConnectionState::Closed));

    // a closed key can be subscribed again, with a new connection
    let status = mux.subscribe("service", None).await.unwrap();
    let _again = upstream.accept().await;
    assert_eq!(status.state(), ConnectionState::Open);
    assert_eq!(mux.len(), 1);
}

#[tokio::test]
async fn test_unsubscribe_closes_upstream() {
    let mut upstream = FakeUpstream::start().await;
    let (handler, mut seen) = recorder();
    let mut mux = Multiplexer::new(upstream.base_url.clone(), handler);

    let mut status = mux.subscribe("measurement", Some("7")).await.unwrap();
    let mut peer = upstream.accept().await;
    assert_eq!(next_seen(&mut seen).await, Seen::Open("measurement-7".into()));

    assert!(mux.unsubscribe("measurement-7").await);
    assert!(!mux.unsubscribe("measurement-7").await);
    assert!(mux.is_empty());

    assert_eq!(
        next_seen(&mut seen).await,
        Seen::Close("measurement-7".into(), CloseReason::Local)
    );
    assert!(within(status.wait_for(ConnectionState::Closed)).await);

    match peer.next_frame().await {
        Some(WsMessage::Close(_)) | None => {}
        other => panic!("expected close frame, got {other:?}"),
    }
}

#[tokio::test]
async fn test_query_and_fields_reach_upstream() {
    let mut upstream = FakeUpstream::start().await;
    let (handler, _seen) = recorder();
    let mut mux = Multiplexer::new(upstream.base_url.clone(), handler);

    let topic = Topic::new("nodes", None)
        .unwrap()
        .with_query(r#"{"id":"3"}"#)
        .unwrap()
        .with_fields(["id"])
        .unwrap();
    mux.subscribe_topic(topic).await.unwrap();

    let peer = upstream.accept().await;
    assert_eq!(peer.path, "/subscribe/nodes");
    let query = peer.query.expect("query string");
    assert!(query.contains("query=%7B%22id%22%3A%223%22%7D"));
    assert!(query.contains("fields=id"));
}

#[tokio::test]
async fn test_reconnects_after_upstream_close() {
    let mut upstream = FakeUpstream::start().await;
    let (handler, mut seen) = recorder();
    let mut mux =
        Multiplexer::new(upstream.base_url.clone(), handler).with_reconnect(fast_reconnect());

    let mut status = mux.subscribe("measurement", None).await.unwrap();
    let first = upstream.accept().await;
    assert_eq!(next_seen(&mut seen).await, Seen::Open("measurement".into()));

    first.close().await;
    assert_eq!(
        next_seen(&mut seen).await,
        Seen::Close("measurement".into(), CloseReason::Remote(None))
    );

    // a fresh connection for the same topic
    let mut second = upstream.accept().await;
    assert_eq!(second.path, "/subscribe/measurement");
    assert_eq!(next_seen(&mut seen).await, Seen::Open("measurement".into()));
    assert!(within(status.wait_for(ConnectionState::Open)).await);

    second.send_text("after-reconnect").await;
    assert_eq!(
        next_seen(&mut seen).await,
        Seen::Content("measurement".into(), "after-reconnect".into())
    );

    // local teardown is never retried
    mux.shutdown().await;
    assert_eq!(
        next_seen(&mut seen).await,
        Seen::Close("measurement".into(), CloseReason::Local)
    );
    assert!(within(status.wait_for(ConnectionState::Closed)).await);
}

#[tokio::test]
async fn test_wait_closed_resolves_when_all_closed() {
    let mut upstream = FakeUpstream::start().await;
    let (handler, _seen) = recorder();
    let mut mux = Multiplexer::new(upstream.base_url.clone(), handler);

    mux.subscribe("measurement", None).await.unwrap();
    let a = upstream.accept().await;
    mux.subscribe("service", None).await.unwrap();
    let b = upstream.accept().await;

    a.close().await;
    b.close().await;
    within(mux.wait_closed()).await;
    assert_eq!(mux.state("measurement"), Some(ConnectionState::Closed));
    assert_eq!(mux.state("service"), Some(ConnectionState::Closed));
}

#[tokio::test]
async fn test_reconnect_covers_upstream_down_at_start() {
    let base = unreachable_base_url().await;
    let (handler, mut seen) = recorder();
    let mut mux = Multiplexer::new(base.clone(), handler).with_reconnect(fast_reconnect());
    assert_eq!(mux.base_url(), &base);
    assert_eq!(mux.policy(), fast_reconnect());

    let mut status = mux.subscribe("measurement", None).await.unwrap();
    assert_eq!(status.key(), "measurement");
    assert_eq!(status.state(), ConnectionState::Connecting);
    assert_eq!(
        mux.status("measurement").map(|s| s.state()),
        Some(ConnectionState::Connecting)
    );

    // the upstream comes up on the address being retried
    let addr = format!("{}:{}", base.host_str().unwrap(), base.port().unwrap());
    let mut upstream = FakeUpstream::start_at(&addr).await;
    let mut peer = upstream.accept().await;
    assert_eq!(peer.path, "/subscribe/measurement");
    assert!(within(status.wait_for(ConnectionState::Open)).await);
    assert_eq!(next_seen(&mut seen).await, Seen::Open("measurement".into()));

    peer.send_text("late-start").await;
    assert_eq!(
        next_seen(&mut seen).await,
        Seen::Content("measurement".into(), "late-start".into())
    );

    mux.shutdown().await;
}

#[tokio::test]
async fn test_reconnect_gives_up_after_max_attempts() {
    let (handler, _seen) = recorder();
    let mut mux = Multiplexer::new(unreachable_base_url().await, handler)
        .with_reconnect(fast_reconnect().with_max_attempts(2));

    let mut status = mux.subscribe("service", None).await.unwrap();
    assert!(within(status.wait_for(ConnectionState::Closed)).await);
    assert_eq!(mux.state("service"), Some(ConnectionState::Closed));
}
