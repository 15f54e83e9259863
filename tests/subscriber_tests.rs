//! Tests for the subscriber loop

mod common;

use common::{endpoint, FakeLink, FakeTransport};
use resilient_telemetry::{
    Backoff, ConnectionState, Error, HandlerResult, Message, Subscriber, SubscriberConfig, TopicFilter,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

fn config() -> SubscriberConfig {
    SubscriberConfig::new(endpoint())
        .with_topics(vec![TopicFilter::parse("sensors/#").unwrap()])
        .with_poll_interval(Duration::from_millis(1))
        .with_backoff(Backoff::new(Duration::ZERO, Duration::ZERO, 1.0))
}

fn recorder(
    log: &Arc<Mutex<Vec<String>>>,
) -> impl FnMut(&Message) -> HandlerResult + Clone + Send + 'static {
    let log = Arc::clone(log);
    move |msg: &Message| {
        log.lock()
            .unwrap()
            .push(format!("{} :: {}", msg.topic, msg.payload_str()));
        Ok(())
    }
}

#[test]
fn test_start_subscribes_configured_topics() {
    let transport = FakeTransport::new();
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut subscriber = Subscriber::new(config(), transport.clone(), FakeLink::up());

    subscriber.subscribe_configured(recorder(&log)).unwrap();
    assert!(transport.active_subscriptions().is_empty());

    subscriber.start().unwrap();
    assert_eq!(transport.active_subscriptions(), vec!["sensors/#".to_string()]);

    transport.push_inbound("sensors/environmental", r#"{"device":"sensor1"}"#);
    let outcome = subscriber.poll_once();

    assert_eq!(outcome.delivered, 1);
    assert_eq!(
        *log.lock().unwrap(),
        vec![r#"sensors/environmental :: {"device":"sensor1"}"#.to_string()]
    );
}

#[test]
fn test_add_subscription_after_start() {
    let transport = FakeTransport::new();
    let mut subscriber = Subscriber::new(config(), transport.clone(), FakeLink::up());
    subscriber.start().unwrap();

    subscriber.add_subscription("alerts/#", |_| Ok(())).unwrap();
    assert_eq!(transport.active_subscriptions(), vec!["alerts/#".to_string()]);

    assert!(subscriber.remove_subscription("alerts/#").unwrap());
    assert!(transport.active_subscriptions().is_empty());
}

#[test]
fn test_invalid_subscription_is_rejected() {
    let mut subscriber = Subscriber::new(config(), FakeTransport::new(), FakeLink::up());
    assert!(matches!(
        subscriber.add_subscription("sensors/#/x", |_| Ok(())),
        Err(Error::InvalidTopic(_))
    ));
}

#[test]
fn test_poll_fault_reconnects_and_replays() {
    let transport = FakeTransport::new();
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut subscriber = Subscriber::new(config(), transport.clone(), FakeLink::up());
    subscriber.subscribe_configured(recorder(&log)).unwrap();
    subscriber.start().unwrap();

    transport.kill_session();
    let outcome = subscriber.poll_once();
    assert_eq!(outcome.received(), 0);
    assert_eq!(transport.open_calls(), 2);
    assert_eq!(transport.active_subscriptions(), vec!["sensors/#".to_string()]);
    assert!(subscriber.connection().is_connected());

    transport.push_inbound("sensors/motion", "1");
    assert_eq!(subscriber.poll_once().delivered, 1);
}

#[test]
fn test_start_failure_recovers_on_poll() {
    let transport = FakeTransport::new();
    transport.script_open(&[false, false]);
    let mut subscriber = Subscriber::new(config(), transport.clone(), FakeLink::up());
    subscriber.add_subscription("sensors/#", |_| Ok(())).unwrap();

    assert!(subscriber.start().is_err());
    assert_eq!(subscriber.poll_once().received(), 0);
    assert_eq!(subscriber.connection().state(), ConnectionState::Faulted);

    transport.push_inbound("sensors/a", "x");
    assert_eq!(subscriber.poll_once().delivered, 1);
    assert_eq!(transport.open_calls(), 3);
    assert_eq!(transport.active_subscriptions(), vec!["sensors/#".to_string()]);
}

#[test]
fn test_backoff_delays_next_attempt() {
    let transport = FakeTransport::new();
    transport.script_open(&[false]);
    let cfg = config().with_backoff(Backoff::new(
        Duration::from_secs(60),
        Duration::from_secs(60),
        2.0,
    ));
    let mut subscriber = Subscriber::new(cfg, transport.clone(), FakeLink::up());

    assert!(subscriber.start().is_err());
    subscriber.poll_once();
    subscriber.poll_once();

    assert_eq!(transport.open_calls(), 1);
}

#[test]
fn test_handler_fault_does_not_stop_loop() {
    let transport = FakeTransport::new();
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut subscriber = Subscriber::new(config(), transport.clone(), FakeLink::up());
    subscriber
        .add_subscription("sensors/broken", |_| Err("bad payload".into()))
        .unwrap();
    subscriber.subscribe_configured(recorder(&log)).unwrap();
    subscriber.start().unwrap();

    transport.push_inbound("sensors/broken", "x");
    transport.push_inbound("sensors/fine", "y");
    let outcome = subscriber.poll_once();
    assert_eq!(outcome.handler_faults.len(), 1);
    assert_eq!(outcome.delivered, 1);

    transport.push_inbound("sensors/broken", "x");
    transport.push_inbound("sensors/fine", "z");
    let outcome = subscriber.poll_once();
    assert_eq!(outcome.handler_faults.len(), 1);
    assert_eq!(log.lock().unwrap().len(), 2);
    assert!(subscriber.connection().is_connected());
}

#[test]
fn test_run_stops_on_shutdown() {
    let transport = FakeTransport::new();
    let mut subscriber = Subscriber::new(config(), transport.clone(), FakeLink::up());

    let shutdown = AtomicBool::new(true);
    subscriber.run(&shutdown).unwrap();

    assert_eq!(transport.open_calls(), 1);
    assert_eq!(subscriber.connection().state(), ConnectionState::Disconnected);
    assert!(!transport.is_open());
}

#[test]
fn test_shutdown_during_poll_skips_the_sleep() {
    let transport = FakeTransport::new();
    transport.push_inbound("sensors/environmental", "{}");
    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&shutdown);

    let mut subscriber = Subscriber::new(
        config().with_poll_interval(Duration::from_secs(3)),
        transport.clone(),
        FakeLink::up(),
    );
    subscriber
        .add_subscription("sensors/#", move |_msg: &Message| {
            flag.store(true, Ordering::SeqCst);
            Ok(())
        })
        .unwrap();

    let started = Instant::now();
    subscriber.run(&shutdown).unwrap();

    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(subscriber.connection().stats().delivered, 1);
    assert_eq!(subscriber.connection().state(), ConnectionState::Disconnected);
}

#[test]
fn test_shutdown_leaves_network_it_joined() {
    let link = FakeLink::down();
    let mut subscriber = Subscriber::new(config(), FakeTransport::new(), link.clone());

    subscriber.start().unwrap();
    assert_eq!(link.joins(), 1);

    subscriber.shutdown().unwrap();
    assert!(!link.is_up());
}
