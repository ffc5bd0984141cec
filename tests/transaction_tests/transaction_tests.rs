//! Tests for MULTI/EXEC transactions
//!
//! These tests verify:
//! - Queued results delivered in order when EXEC completes
//! - DISCARD and implicit discard on drop
//! - WATCH-triggered aborts
//! - Misuse: nesting, plain submits and WATCH inside the block
//! - Queue-time rejections and transport loss mid-transaction

#[path = "../common/mod.rs"]
mod common;

use std::time::Duration;

use atlaskv_client::protocol::{CommandArgs, CommandType};
use atlaskv_client::{
    Client, ClientError, Command, Commands, ErrorKind, ExecOutcome, TxResult, Utf8Codec,
};
use common::{config_for, test_resources, wait_until, MockServer};

const TIMEOUT: Duration = Duration::from_secs(5);

// =============================================================================
// Helper Functions
// =============================================================================

fn key(name: &str) -> String {
    name.to_string()
}

fn client_for(server: &MockServer) -> Client {
    Client::with_resources(config_for(&server.addr()).build(), test_resources()).unwrap()
}

// =============================================================================
// Commit Tests
// =============================================================================

#[test]
fn test_exec_resolves_members_in_order() {
    let server = MockServer::start();
    let client = client_for(&server);
    let connection = client.connect().unwrap();
    let commands = Commands::new(Utf8Codec);

    let mut tx = connection.begin_transaction().unwrap();
    let started = tx.started().clone();
    let set = tx.queue(commands.set(&key("k"), &key("v")).unwrap()).unwrap();
    let incr = tx.queue(commands.incr(&key("n")).unwrap()).unwrap();
    let get = tx.queue(commands.get(&key("k")).unwrap()).unwrap();
    assert_eq!(tx.queued(), 3);

    // Nothing resolves before EXEC
    started.get(TIMEOUT).unwrap();
    assert!(!set.is_done());

    let exec = tx.commit().unwrap();
    assert_eq!(exec.get(TIMEOUT).unwrap(), ExecOutcome::Committed { executed: 3 });
    assert_eq!(set.get(TIMEOUT).unwrap(), TxResult::Value(()));
    assert_eq!(incr.get(TIMEOUT).unwrap(), TxResult::Value(1));
    assert_eq!(
        get.get(TIMEOUT).unwrap().value(),
        Some(Some("v".to_string()))
    );

    let received = server.received();
    assert_eq!(
        received,
        vec!["MULTI", "SET k v", "INCR n", "GET k", "EXEC"]
            .into_iter()
            .map(String::from)
            .collect::<Vec<_>>()
    );
}

#[test]
fn test_member_error_inside_exec_is_per_command() {
    let server = MockServer::start();
    server.put("text", "abc");
    let client = client_for(&server);
    let connection = client.connect().unwrap();
    let commands = Commands::new(Utf8Codec);

    let mut tx = connection.begin_transaction().unwrap();
    let bad = tx.queue(commands.incr(&key("text")).unwrap()).unwrap();
    let good = tx.queue(commands.incr(&key("n")).unwrap()).unwrap();
    let exec = tx.commit().unwrap();

    assert_eq!(exec.get(TIMEOUT).unwrap(), ExecOutcome::Committed { executed: 2 });
    assert!(matches!(bad.get(TIMEOUT), Err(ClientError::Server(_))));
    assert_eq!(good.get(TIMEOUT).unwrap(), TxResult::Value(1));
}

#[test]
fn test_empty_transaction_commits() {
    let server = MockServer::start();
    let client = client_for(&server);
    let connection = client.connect().unwrap();

    let tx = connection.begin_transaction().unwrap();
    let exec = tx.commit().unwrap();
    assert_eq!(exec.get(TIMEOUT).unwrap(), ExecOutcome::Committed { executed: 0 });
}

// =============================================================================
// Discard Tests
// =============================================================================

#[test]
fn test_discard_marks_members_discarded() {
    let server = MockServer::start();
    let client = client_for(&server);
    let connection = client.connect().unwrap();
    let commands = Commands::new(Utf8Codec);

    let mut tx = connection.begin_transaction().unwrap();
    let set = tx.queue(commands.set(&key("k"), &key("v")).unwrap()).unwrap();
    let discarded = tx.discard().unwrap();

    discarded.get(TIMEOUT).unwrap();
    let outcome = set.get(TIMEOUT).unwrap();
    assert!(outcome.is_discarded());
    assert_eq!(outcome.value(), None);
    assert_eq!(server.value("k"), None);

    // The connection is usable again
    assert_eq!(connection.submit_blocking(commands.ping(), TIMEOUT).unwrap(), "PONG");
}

#[test]
fn test_drop_discards_unfinished_transaction() {
    let server = MockServer::start();
    let client = client_for(&server);
    let connection = client.connect().unwrap();
    let commands = Commands::new(Utf8Codec);

    let set = {
        let mut tx = connection.begin_transaction().unwrap();
        let handle = tx.queue(commands.set(&key("k"), &key("v")).unwrap()).unwrap();
        handle
    };

    assert_eq!(set.get(TIMEOUT).unwrap(), TxResult::Discarded);
    assert!(server.received().iter().any(|c| c == "DISCARD"));
    assert_eq!(server.value("k"), None);
    assert!(connection.submit(commands.ping()).is_ok());
}

// =============================================================================
// WATCH Tests
// =============================================================================

#[test]
fn test_watched_key_change_aborts() {
    let server = MockServer::start();
    server.put("balance", "10");
    let client = client_for(&server);
    let connection = client.connect().unwrap();
    let commands = Commands::new(Utf8Codec);

    connection.watch(vec!["balance"]).unwrap().get(TIMEOUT).unwrap();
    // Another client writes the watched key
    server.put("balance", "99");

    let mut tx = connection.begin_transaction().unwrap();
    let set = tx.queue(commands.set(&key("balance"), &key("0")).unwrap()).unwrap();
    let exec = tx.commit().unwrap();

    assert_eq!(exec.get(TIMEOUT).unwrap(), ExecOutcome::Aborted);
    let outcome = set.get(TIMEOUT).unwrap();
    assert!(outcome.is_aborted());
    assert_eq!(server.value("balance"), Some("99".to_string()));
}

#[test]
fn test_unchanged_watch_commits() {
    let server = MockServer::start();
    server.put("balance", "10");
    let client = client_for(&server);
    let connection = client.connect().unwrap();
    let commands = Commands::new(Utf8Codec);

    connection
        .submit_blocking(commands.watch(&[key("balance")]).unwrap(), TIMEOUT)
        .unwrap();
    let mut tx = connection.begin_transaction().unwrap();
    let decr = tx.queue(commands.decr(&key("balance")).unwrap()).unwrap();
    assert_eq!(
        tx.commit().unwrap().get(TIMEOUT).unwrap(),
        ExecOutcome::Committed { executed: 1 }
    );
    assert_eq!(decr.get(TIMEOUT).unwrap(), TxResult::Value(9));
}

#[test]
fn test_unwatch_clears_watch() {
    let server = MockServer::start();
    server.put("k", "1");
    let client = client_for(&server);
    let connection = client.connect().unwrap();
    let commands = Commands::new(Utf8Codec);

    connection.watch(vec!["k"]).unwrap().get(TIMEOUT).unwrap();
    connection.unwatch().unwrap().get(TIMEOUT).unwrap();
    server.put("k", "2");

    let mut tx = connection.begin_transaction().unwrap();
    let get = tx.queue(commands.get(&key("k")).unwrap()).unwrap();
    assert!(matches!(
        tx.commit().unwrap().get(TIMEOUT).unwrap(),
        ExecOutcome::Committed { .. }
    ));
    assert_eq!(get.get(TIMEOUT).unwrap(), TxResult::Value(Some("2".to_string())));
}

#[test]
fn test_watch_requires_keys() {
    let server = MockServer::start();
    let client = client_for(&server);
    let connection = client.connect().unwrap();

    let no_keys: Vec<&str> = Vec::new();
    assert!(matches!(connection.watch(no_keys), Err(ClientError::InvalidCommand(_))));
}

// =============================================================================
// Misuse Tests
// =============================================================================

#[test]
fn test_nested_multi_is_rejected() {
    let server = MockServer::start();
    let client = client_for(&server);
    let connection = client.connect().unwrap();

    let _tx = connection.begin_transaction().unwrap();
    match connection.begin_transaction() {
        Err(ClientError::Transaction(message)) => assert!(message.contains("nested")),
        Err(other) => panic!("unexpected error {:?}", other),
        Ok(_) => panic!("nested MULTI accepted"),
    }
    assert_eq!(
        server.received().iter().filter(|c| c.as_str() == "MULTI").count(),
        1
    );
}

#[test]
fn test_plain_submit_rejected_inside_multi() {
    let server = MockServer::start();
    let client = client_for(&server);
    let connection = client.connect().unwrap();
    let commands = Commands::new(Utf8Codec);

    let tx = connection.begin_transaction().unwrap();
    let err = connection.submit(commands.ping()).err().unwrap();
    assert_eq!(err.kind(), ErrorKind::Transaction);

    tx.commit().unwrap().get(TIMEOUT).unwrap();
    assert_eq!(connection.submit_blocking(commands.ping(), TIMEOUT).unwrap(), "PONG");
}

#[test]
fn test_watch_inside_multi_is_rejected() {
    let server = MockServer::start();
    let client = client_for(&server);
    let connection = client.connect().unwrap();
    let commands = Commands::new(Utf8Codec);

    let mut tx = connection.begin_transaction().unwrap();
    let err = tx.queue(commands.watch(&[key("k")]).unwrap()).err().unwrap();
    assert!(matches!(err, ClientError::Transaction(_)));

    let control = Command::raw(CommandArgs::new(CommandType::Exec));
    assert!(matches!(tx.queue(control), Err(ClientError::InvalidCommand(_))));
    assert_eq!(tx.queued(), 0);
}

// =============================================================================
// Failure Tests
// =============================================================================

#[test]
fn test_queue_time_rejection_aborts_exec() {
    let server = MockServer::start();
    let client = client_for(&server);
    let connection = client.connect().unwrap();
    let commands = Commands::new(Utf8Codec);

    let mut tx = connection.begin_transaction().unwrap();
    let set = tx.queue(commands.set(&key("k"), &key("v")).unwrap()).unwrap();
    let bogus = tx
        .queue(Command::raw(CommandArgs::new(CommandType::parse("BOGUS"))))
        .unwrap();
    let exec = tx.commit().unwrap();

    match bogus.get(TIMEOUT) {
        Err(ClientError::Server(message)) => assert!(message.contains("unknown command")),
        other => panic!("unexpected {:?}", other),
    }
    match exec.get(TIMEOUT) {
        Err(ClientError::Server(message)) => assert!(message.starts_with("EXECABORT")),
        other => panic!("unexpected {:?}", other),
    }
    assert!(matches!(set.get(TIMEOUT), Err(ClientError::Server(_))));
    assert_eq!(server.value("k"), None);
}

#[test]
fn test_disconnect_fails_open_transaction() {
    let server = MockServer::start();
    let client = client_for(&server);
    let connection = client.connect().unwrap();
    let commands = Commands::new(Utf8Codec);

    let mut tx = connection.begin_transaction().unwrap();
    tx.started().get(TIMEOUT).unwrap();
    let set = tx.queue(commands.set(&key("k"), &key("v")).unwrap()).unwrap();
    assert!(wait_until(TIMEOUT, || {
        server.received().iter().any(|c| c == "SET k v")
    }));

    server.kill_connections();

    let err = set.get(TIMEOUT).unwrap_err();
    assert!(err.is_connection_error(), "got {:?}", err);

    // The block died with the transport
    let commit = tx.commit();
    assert!(matches!(commit, Err(ClientError::Transaction(_))));

    assert!(wait_until(TIMEOUT, || {
        connection.submit_blocking(commands.ping(), TIMEOUT).is_ok()
    }));
}
