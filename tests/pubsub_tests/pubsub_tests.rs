//! Tests for subscriptions and message delivery
//!
//! These tests verify:
//! - Channel and pattern messages reach their listeners in order
//! - Acknowledgements complete the subscribe handles
//! - Listeners run on an event lane, not on the reader thread
//! - Subscriptions survive a reconnect

#[path = "../common/mod.rs"]
mod common;

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use atlaskv_client::command::output;
use atlaskv_client::protocol::{CommandArgs, CommandType};
use atlaskv_client::{Client, ClientError, Command, Commands, Connection, Message, Utf8Codec};
use common::{config_for, test_resources, wait_until, MockServer};
use parking_lot::Mutex;

const TIMEOUT: Duration = Duration::from_secs(5);

// =============================================================================
// Helper Functions
// =============================================================================

type Inbox = Arc<Mutex<Vec<Message>>>;

fn inbox() -> Inbox {
    Arc::new(Mutex::new(Vec::new()))
}

fn collector(inbox: &Inbox) -> impl Fn(&Message) + Send + Sync + 'static {
    let inbox = Arc::clone(inbox);
    move |message: &Message| inbox.lock().push(message.clone())
}

fn payloads(inbox: &Inbox) -> Vec<String> {
    inbox
        .lock()
        .iter()
        .map(|m| String::from_utf8_lossy(&m.payload).into_owned())
        .collect()
}

fn publish(publisher: &Connection, channel: &str, message: &str) -> i64 {
    let commands = Commands::new(Utf8Codec);
    publisher
        .submit_blocking(
            commands
                .publish(&channel.to_string(), &message.to_string())
                .unwrap(),
            TIMEOUT,
        )
        .unwrap()
}

fn client_for(server: &MockServer) -> Client {
    Client::with_resources(config_for(&server.addr()).build(), test_resources()).unwrap()
}

// =============================================================================
// Subscribe Tests
// =============================================================================

#[test]
fn test_channel_messages_delivered_in_order() {
    let server = MockServer::start();
    let client = client_for(&server);
    let subscriber = client.connect_pubsub().unwrap();
    let publisher = client.connect().unwrap();
    let received = inbox();

    let ack = subscriber.subscribe("news", collector(&received)).unwrap();
    assert_eq!(ack.get(TIMEOUT).unwrap(), 1);

    for i in 0..20 {
        assert_eq!(publish(&publisher, "news", &format!("m{}", i)), 1);
    }
    assert_eq!(publish(&publisher, "other", "ignored"), 0);

    assert!(wait_until(TIMEOUT, || received.lock().len() == 20));
    let expected: Vec<String> = (0..20).map(|i| format!("m{}", i)).collect();
    assert_eq!(payloads(&received), expected);

    let first = received.lock()[0].clone();
    assert_eq!(&first.channel[..], b"news");
    assert_eq!(first.pattern, None);
}

#[test]
fn test_pattern_messages_carry_pattern() {
    let server = MockServer::start();
    let client = client_for(&server);
    let subscriber = client.connect_pubsub().unwrap();
    let publisher = client.connect().unwrap();
    let received = inbox();

    let ack = subscriber.psubscribe("news.*", collector(&received)).unwrap();
    assert_eq!(ack.get(TIMEOUT).unwrap(), 1);

    assert_eq!(publish(&publisher, "news.sports", "goal"), 1);
    assert_eq!(publish(&publisher, "weather", "rain"), 0);

    assert!(wait_until(TIMEOUT, || received.lock().len() == 1));
    let message = received.lock()[0].clone();
    assert_eq!(&message.channel[..], b"news.sports");
    assert_eq!(message.pattern.as_deref(), Some(&b"news.*"[..]));
    assert_eq!(&message.payload[..], b"goal");
}

#[test]
fn test_every_listener_on_a_channel_is_called() {
    let server = MockServer::start();
    let client = client_for(&server);
    let subscriber = client.connect_pubsub().unwrap();
    let publisher = client.connect().unwrap();
    let first = inbox();
    let second = inbox();

    subscriber.subscribe("c", collector(&first)).unwrap().get(TIMEOUT).unwrap();
    subscriber.subscribe("c", collector(&second)).unwrap().get(TIMEOUT).unwrap();

    publish(&publisher, "c", "hello");
    assert!(wait_until(TIMEOUT, || {
        first.lock().len() == 1 && second.lock().len() == 1
    }));
}

#[test]
fn test_rejected_subscribe_leaves_no_listener_behind() {
    let server = MockServer::start();
    let config = config_for(&server.addr()).request_queue_size(1).build();
    let limited = Client::with_resources(config, test_resources()).unwrap();
    let subscriber = limited.connect_pubsub().unwrap();
    let publisher = client_for(&server).connect().unwrap();
    let kept = inbox();
    let rejected = inbox();

    subscriber.subscribe("news", collector(&kept)).unwrap().get(TIMEOUT).unwrap();

    // Occupy the single queue slot so the second SUBSCRIBE is refused
    let sleep = subscriber
        .submit(Command::new(
            CommandArgs::new(CommandType::parse("SLEEP")).arg_int(200),
            output::ok,
        ))
        .unwrap();
    assert!(matches!(
        subscriber.subscribe("news", collector(&rejected)),
        Err(ClientError::QueueFull(1))
    ));
    sleep.get(TIMEOUT).unwrap();

    publish(&publisher, "news", "hello");
    assert!(wait_until(TIMEOUT, || kept.lock().len() == 1));
    thread::sleep(Duration::from_millis(50));
    assert!(rejected.lock().is_empty());
}

#[test]
fn test_channel_and_pattern_counts() {
    let server = MockServer::start();
    let client = client_for(&server);
    let subscriber = client.connect_pubsub().unwrap();
    let received = inbox();

    let a = subscriber.subscribe("a", collector(&received)).unwrap();
    let b = subscriber.subscribe("b", collector(&received)).unwrap();
    let p = subscriber.psubscribe("x*", collector(&received)).unwrap();
    assert_eq!(a.get(TIMEOUT).unwrap(), 1);
    assert_eq!(b.get(TIMEOUT).unwrap(), 2);
    assert_eq!(p.get(TIMEOUT).unwrap(), 3);

    assert_eq!(subscriber.unsubscribe("a").unwrap().get(TIMEOUT).unwrap(), 2);
    assert_eq!(subscriber.punsubscribe("x*").unwrap().get(TIMEOUT).unwrap(), 1);
}

// =============================================================================
// Unsubscribe Tests
// =============================================================================

#[test]
fn test_unsubscribe_stops_delivery() {
    let server = MockServer::start();
    let client = client_for(&server);
    let subscriber = client.connect_pubsub().unwrap();
    let publisher = client.connect().unwrap();
    let received = inbox();

    subscriber.subscribe("news", collector(&received)).unwrap().get(TIMEOUT).unwrap();
    publish(&publisher, "news", "before");
    assert!(wait_until(TIMEOUT, || received.lock().len() == 1));

    assert_eq!(subscriber.unsubscribe("news").unwrap().get(TIMEOUT).unwrap(), 0);
    assert_eq!(publish(&publisher, "news", "after"), 0);

    thread::sleep(Duration::from_millis(50));
    assert_eq!(payloads(&received), vec!["before".to_string()]);
}

// =============================================================================
// Dispatch Tests
// =============================================================================

#[test]
fn test_listeners_run_off_the_reader_thread() {
    let server = MockServer::start();
    let client = client_for(&server);
    let subscriber = client.connect_pubsub().unwrap();
    let publisher = client.connect().unwrap();
    let threads = Arc::new(Mutex::new(Vec::new()));

    let seen = Arc::clone(&threads);
    subscriber
        .subscribe("t", move |_: &Message| {
            let name = thread::current().name().unwrap_or("").to_string();
            seen.lock().push(name);
        })
        .unwrap()
        .get(TIMEOUT)
        .unwrap();

    publish(&publisher, "t", "x");
    assert!(wait_until(TIMEOUT, || threads.lock().len() == 1));
    let name = threads.lock()[0].clone();
    assert!(name.starts_with("atlaskv-event"), "ran on {:?}", name);
}

#[test]
fn test_slow_listener_does_not_block_replies() {
    let server = MockServer::start();
    let client = client_for(&server);
    let subscriber = client.connect_pubsub().unwrap();
    let publisher = client.connect().unwrap();

    subscriber
        .subscribe("slow", |_: &Message| thread::sleep(Duration::from_millis(300)))
        .unwrap()
        .get(TIMEOUT)
        .unwrap();
    publish(&publisher, "slow", "x");

    // The ack for a second subscribe is read while the listener sleeps
    let ack = subscriber.subscribe("fast", |_: &Message| {}).unwrap();
    assert_eq!(ack.get(Duration::from_millis(200)).unwrap(), 2);
}

#[test]
fn test_subscribe_requires_pubsub_connection() {
    let server = MockServer::start();
    let client = client_for(&server);
    let connection = client.connect().unwrap();
    assert!(!connection.is_pubsub());

    let result = connection.subscribe("news", |_: &Message| {});
    assert!(matches!(result, Err(ClientError::InvalidCommand(_))));
    assert!(matches!(
        connection.punsubscribe("n*"),
        Err(ClientError::InvalidCommand(_))
    ));
}

// =============================================================================
// Reconnect Tests
// =============================================================================

#[test]
fn test_subscriptions_restored_after_reconnect() {
    let server = MockServer::start();
    let client = client_for(&server);
    let subscriber = client.connect_pubsub().unwrap();
    let publisher = client.connect().unwrap();
    let received = inbox();

    subscriber.subscribe("news", collector(&received)).unwrap().get(TIMEOUT).unwrap();
    subscriber.psubscribe("alerts.*", collector(&received)).unwrap().get(TIMEOUT).unwrap();

    server.kill_connections();

    // Both connections come back; the subscriber re-subscribes by itself
    assert!(wait_until(TIMEOUT, || {
        publisher
            .submit_blocking(
                Commands::new(Utf8Codec)
                    .publish(&"news".to_string(), &"ping".to_string())
                    .unwrap(),
                TIMEOUT,
            )
            .map_or(false, |receivers| receivers == 1)
    }));
    assert_eq!(publish(&publisher, "alerts.fire", "after"), 1);

    assert!(wait_until(TIMEOUT, || payloads(&received).contains(&"after".to_string())));
    let after = received
        .lock()
        .iter()
        .find(|m| &m.payload[..] == b"after")
        .cloned()
        .unwrap();
    assert_eq!(after.pattern.as_deref(), Some(&b"alerts.*"[..]));
}
