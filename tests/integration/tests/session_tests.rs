//! Session lifecycle integration tests
//!
//! Everything runs in-process: scripted connection halves, in-memory pipes
//! and a gateway on a loopback port.
//!
//! Run with: cargo test -p integration-tests --test session_tests

use futures::future::join_all;
use integration_tests::{
    wait_closed, FailingWriter, RecordingEntity, ScriptedReader, TestGateway, TEST_FRONTEND,
};
use node_common::SessionConfig;
use node_session::{ListenerFlow, SessionError, SessionRegistry, SessionStatus};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

fn registry() -> Arc<SessionRegistry> {
    SessionRegistry::new_shared(SessionConfig::default())
}

// ============================================================================
// Reader loop
// ============================================================================

#[tokio::test]
async fn test_single_read_dispatches_exact_bytes() {
    let registry = registry();
    let session = registry.create("node-1", RecordingEntity::new().handle());
    let received = Arc::new(Mutex::new(Vec::new()));

    let log = Arc::clone(&received);
    session.on_message(move |_, bytes| {
        log.lock().push(bytes.to_vec());
        Ok(())
    });

    let reader = ScriptedReader::new([vec![0x01_u8, 0x02, 0x03]]);
    session.start(reader, tokio::io::sink()).unwrap();
    wait_closed(&session).await.unwrap();

    assert_eq!(*received.lock(), vec![vec![0x01, 0x02, 0x03]]);
}

#[tokio::test]
async fn test_read_error_runs_error_then_close_listeners_once() {
    let registry = registry();
    let entity = RecordingEntity::new();
    let session = registry.create("node-1", entity.handle());
    let events = Arc::new(Mutex::new(Vec::new()));

    let log = Arc::clone(&events);
    session.on_message(move |_, bytes| {
        log.lock().push(format!("message {}", bytes.len()));
        Ok(())
    });
    for name in ["error-a", "error-b"] {
        let log = Arc::clone(&events);
        session.on_error(move |_, err| log.lock().push(format!("{name} {}", err.error_code())));
    }
    for name in ["close-a", "close-b"] {
        let log = Arc::clone(&events);
        session.on_close(move |session| {
            assert!(session.is_closed());
            log.lock().push(name.to_string());
            ListenerFlow::Continue
        });
    }

    let reader = ScriptedReader::new([&b"hi"[..]]).then_fail(io::ErrorKind::ConnectionReset);
    session.start(reader, tokio::io::sink()).unwrap();
    wait_closed(&session).await.unwrap();

    assert_eq!(
        *events.lock(),
        vec![
            "message 2",
            "error-a TRANSPORT_READ",
            "error-b TRANSPORT_READ",
            "close-a",
            "close-b",
        ]
    );
    assert_eq!(entity.close_count(), 1);
    assert_eq!(session.status(), SessionStatus::Closed);
    assert!(registry.is_empty());
}

#[tokio::test]
async fn test_write_failure_closes_and_removes_session() {
    let registry = registry();
    let entity = RecordingEntity::new();
    let session = registry.create("node-1", entity.handle());
    session.on_message(|_, _| Ok(()));

    let (_client, server) = tokio::io::duplex(64);
    let (reader, _) = tokio::io::split(server);
    session.start(reader, FailingWriter).unwrap();

    assert!(session.send(&b"payload"[..]).await);
    wait_closed(&session).await.unwrap();

    assert_eq!(entity.close_count(), 1);
    assert!(!registry.contains(session.sid()));
    assert!(!session.send(&b"after close"[..]).await);
}

// ============================================================================
// Close idempotence
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_close_triggers_clean_up_once() {
    let registry = registry();
    let entity = RecordingEntity::new();
    let session_closes = Arc::new(AtomicUsize::new(0));
    let registry_closes = Arc::new(AtomicUsize::new(0));

    let counter = Arc::clone(&registry_closes);
    registry.on_close(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        ListenerFlow::Continue
    });

    let session = registry.create("node-1", entity.handle());
    session.on_message(|_, _| Ok(()));
    let counter = Arc::clone(&session_closes);
    session.on_close(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        ListenerFlow::Continue
    });
    session.bind(42).unwrap();

    let (client, server) = tokio::io::duplex(64);
    let (reader, writer) = tokio::io::split(server);
    session.start(reader, writer).unwrap();

    let closers = (0..16).map(|_| {
        let session = Arc::clone(&session);
        tokio::spawn(async move { session.close() })
    });
    drop(client);
    for result in join_all(closers).await {
        result.unwrap();
    }
    wait_closed(&session).await.unwrap();

    assert_eq!(session_closes.load(Ordering::SeqCst), 1);
    assert_eq!(registry_closes.load(Ordering::SeqCst), 1);
    assert_eq!(entity.close_count(), 1);
    assert_eq!(registry.sid_by_uid(42), None);
    assert!(registry.is_empty());
}

// ============================================================================
// Send ordering
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_senders_keep_their_own_order() {
    const PRODUCERS: u8 = 4;
    const PER_PRODUCER: u8 = 25;

    let registry = registry();
    let session = registry.create("node-1", RecordingEntity::new().handle());
    session.on_message(|_, _| Ok(()));
    let (mut client, server) = tokio::io::duplex(4096);
    let (reader, writer) = tokio::io::split(server);
    session.start(reader, writer).unwrap();

    let producers = (0..PRODUCERS).map(|producer| {
        let session = Arc::clone(&session);
        tokio::spawn(async move {
            for seq in 0..PER_PRODUCER {
                assert!(session.send(vec![producer, seq]).await);
            }
        })
    });
    for result in join_all(producers).await {
        result.unwrap();
    }

    let mut out = vec![0u8; usize::from(PRODUCERS) * usize::from(PER_PRODUCER) * 2];
    client.read_exact(&mut out).await.unwrap();

    let mut next: HashMap<u8, u8> = HashMap::new();
    for frame in out.chunks(2) {
        let expected = next.entry(frame[0]).or_insert(0);
        assert_eq!(frame[1], *expected, "producer {} out of order", frame[0]);
        *expected += 1;
    }
    assert!(next.values().all(|&count| count == PER_PRODUCER));

    session.close();
    wait_closed(&session).await.unwrap();
}

// ============================================================================
// Registry
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_next_sid_is_unique_across_tasks() {
    let registry = registry();

    let tasks = (0..32).map(|_| {
        let registry = Arc::clone(&registry);
        tokio::spawn(async move { (0..100).map(|_| registry.next_sid()).collect::<Vec<_>>() })
    });

    let mut seen = HashSet::new();
    for sids in join_all(tasks).await {
        for sid in sids.unwrap() {
            assert!(seen.insert(sid), "sid {sid} handed out twice");
        }
    }
    assert_eq!(seen.len(), 3200);
}

#[tokio::test]
async fn test_bind_lookup_unbind_scenario() {
    let registry = registry();
    let session = registry.create("node-1", RecordingEntity::new().handle());

    session.bind(42).unwrap();
    assert_eq!(session.uid(), 42);
    assert!(session.is_bind());
    assert_eq!(registry.sid_by_uid(42), Some(session.sid()));

    session.unbind();
    assert_eq!(registry.sid_by_uid(42), None);
    assert!(registry.get_by_uid(42).is_none());
}

#[tokio::test]
async fn test_illegal_uid_leaves_binding_untouched() {
    let registry = registry();
    let session = registry.create("node-1", RecordingEntity::new().handle());
    session.bind(5).unwrap();

    for uid in [0, -1, -42] {
        assert!(matches!(session.bind(uid), Err(SessionError::IllegalUid(_))));
        assert_eq!(session.uid(), 5);
        assert_eq!(registry.sid_by_uid(5), Some(session.sid()));
    }
}

#[tokio::test]
async fn test_session_forwards_to_network_entity() {
    let entity = RecordingEntity::new();
    let registry = registry();
    let session = registry.create("node-1", entity.handle());

    session.push("room.message", &b"hello"[..]).await.unwrap();
    session.response(9, &b"{}"[..]).await.unwrap();
    session.kick("server restart", true).await.unwrap();

    assert_eq!(
        entity.calls(),
        vec!["push room.message 5", "response 9 2", "kick server restart"]
    );
    assert!(session.is_closed());
    assert_eq!(entity.close_count(), 1);
}

// ============================================================================
// Gateway
// ============================================================================

#[tokio::test]
async fn test_gateway_echoes_bytes() {
    let gateway = TestGateway::start().await.expect("Failed to start gateway");
    let mut client = gateway.connect().await.unwrap();

    client.write_all(b"ping").await.unwrap();
    let mut echoed = [0u8; 4];
    client.read_exact(&mut echoed).await.unwrap();
    assert_eq!(&echoed, b"ping");

    let sessions = gateway.registry.sessions();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].frontend_id(), TEST_FRONTEND);
    assert!(sessions[0].remote_address().starts_with("127.0.0.1:"));

    let registry = Arc::clone(&gateway.registry);
    gateway.stop().await.unwrap();
    assert!(registry.is_empty());

    let mut rest = Vec::new();
    let _ = client.read_to_end(&mut rest).await;
    assert!(rest.is_empty());
}

#[tokio::test]
async fn test_gateway_client_disconnect_removes_session() {
    let gateway = TestGateway::start().await.expect("Failed to start gateway");
    let mut client = gateway.connect().await.unwrap();

    client.write_all(b"x").await.unwrap();
    let mut echoed = [0u8; 1];
    client.read_exact(&mut echoed).await.unwrap();

    let session = gateway.registry.sessions().pop().unwrap();
    drop(client);
    wait_closed(&session).await.unwrap();

    assert!(gateway.registry.is_empty());
    gateway.stop().await.unwrap();
}

// ============================================================================
// Empty reads and listener failures
// ============================================================================

#[tokio::test]
async fn test_empty_reads_below_limit_keep_reading() {
    let config = SessionConfig {
        max_empty_reads: 3,
        ..SessionConfig::default()
    };
    let registry = SessionRegistry::new_shared(config);
    let entity = RecordingEntity::new();
    let session = registry.create("node-1", entity.handle());
    let received = Arc::new(Mutex::new(Vec::new()));

    let log = Arc::clone(&received);
    session.on_message(move |_, bytes| {
        log.lock().push(bytes.to_vec());
        Ok(())
    });

    let reads: [&[u8]; 6] = [b"", b"", b"a", b"", b"", b"b"];
    let reader = ScriptedReader::new(reads);
    session.start(reader, tokio::io::sink()).unwrap();
    wait_closed(&session).await.unwrap();

    assert_eq!(*received.lock(), vec![b"a".to_vec(), b"b".to_vec()]);
    assert_eq!(entity.close_count(), 1);
}

#[tokio::test]
async fn test_empty_reads_at_limit_close_session() {
    let config = SessionConfig {
        max_empty_reads: 3,
        ..SessionConfig::default()
    };
    let registry = SessionRegistry::new_shared(config);
    let session = registry.create("node-1", RecordingEntity::new().handle());
    let received = Arc::new(Mutex::new(Vec::new()));

    let log = Arc::clone(&received);
    session.on_message(move |_, bytes| {
        log.lock().push(bytes.to_vec());
        Ok(())
    });

    let reads: [&[u8]; 4] = [b"", b"", b"", b"late"];
    let reader = ScriptedReader::new(reads);
    session.start(reader, tokio::io::sink()).unwrap();
    wait_closed(&session).await.unwrap();

    assert!(received.lock().is_empty());
    assert!(registry.is_empty());
}

#[tokio::test]
async fn test_panicking_close_listener_does_not_skip_cleanup() {
    let registry = registry();
    let entity = RecordingEntity::new();
    let session = registry.create("node-1", entity.handle());
    let later = Arc::new(AtomicUsize::new(0));
    let registry_closes = Arc::new(AtomicUsize::new(0));

    session.on_message(|_, _| Ok(()));
    session.on_close(|_| -> ListenerFlow { panic!("close listener bug") });
    let counter = Arc::clone(&later);
    session.on_close(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        ListenerFlow::Continue
    });
    let counter = Arc::clone(&registry_closes);
    registry.on_close(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        ListenerFlow::Continue
    });
    session.bind(42).unwrap();

    let (client, server) = tokio::io::duplex(64);
    let (reader, writer) = tokio::io::split(server);
    session.start(reader, writer).unwrap();
    drop(client);
    wait_closed(&session).await.unwrap();

    assert_eq!(later.load(Ordering::SeqCst), 1);
    assert_eq!(registry_closes.load(Ordering::SeqCst), 1);
    assert_eq!(entity.close_count(), 1);
    assert_eq!(registry.sid_by_uid(42), None);
    assert!(registry.is_empty());
}
