//! Session integration tests against an in-memory server.
//!
//! Covers the handshake, heartbeat supervision, acks and ack timeouts,
//! namespace join queues, binary reassembly, server-initiated disconnects,
//! reconnection and local disconnect.

mod common;

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use serde_json::json;

use sio_socket::{
    AckError, ClientEvent, ConnectionState, DisconnectReason, Frame, Payload, ReconnectConfig,
    SocketError,
};

use common::{
    connect_and_join, create_test_client, create_test_options, pump_until, MockConnector, SERVER_URL,
};

type AckSlot = Arc<Mutex<Vec<Result<Payload, AckError>>>>;

fn ack_slot() -> AckSlot {
    Arc::new(Mutex::new(Vec::new()))
}

fn record_into(slot: &AckSlot) -> impl FnOnce(Result<Payload, AckError>) + Send + 'static {
    let slot = slot.clone();
    move |result| slot.lock().unwrap().push(result)
}

fn record_lifecycle(client: &mut sio_socket::SocketClient) -> Rc<RefCell<Vec<ClientEvent>>> {
    let events = Rc::new(RefCell::new(Vec::new()));
    let sink = events.clone();
    client.on_lifecycle(move |event| sink.borrow_mut().push(event.clone()));
    events
}

fn reconnect_count(events: &Rc<RefCell<Vec<ClientEvent>>>) -> usize {
    events
        .borrow()
        .iter()
        .filter(|e| matches!(e, ClientEvent::Reconnecting { .. }))
        .count()
}

// ---- Handshake ----

#[tokio::test(start_paused = true)]
async fn handshake_connects_and_joins_default_namespace() {
    let (connector, mut accepted) = MockConnector::new();
    let mut client = create_test_client(connector);
    let events = record_lifecycle(&mut client);

    let server = connect_and_join(&mut client, &mut accepted, create_test_options()).await;

    assert_eq!(client.status(), ConnectionState::Connected);
    assert_eq!(client.sid(), Some("abc123"));
    assert_eq!(server.url.scheme(), "ws");
    assert_eq!(server.url.path(), "/socket.io/");
    assert!(server.url.query().unwrap().starts_with("EIO=4&transport=websocket&t="));
    assert_eq!(
        events.borrow().as_slice(),
        &[ClientEvent::Connect {
            namespace: "/".into()
        }]
    );
}

#[tokio::test(start_paused = true)]
async fn connect_twice_is_ignored() {
    let (connector, mut accepted) = MockConnector::new();
    let mut client = create_test_client(connector);
    let _server = connect_and_join(&mut client, &mut accepted, create_test_options()).await;

    client.connect(SERVER_URL, create_test_options()).unwrap();
    tokio::task::yield_now().await;
    assert!(accepted.try_recv().is_err());
    assert_eq!(client.status(), ConnectionState::Connected);
}

#[tokio::test(start_paused = true)]
async fn auth_payload_is_sent_with_namespace_connects() {
    let (connector, mut accepted) = MockConnector::new();
    let mut client = create_test_client(connector);
    let options = sio_socket::ConnectOptions {
        auth: Some(json!({"token": "secret"})),
        namespaces: vec!["/admin".into()],
        ..create_test_options()
    };

    client.connect(SERVER_URL, options).unwrap();
    let mut server = accepted.recv().await.unwrap();
    server.open("abc123", 25_000, 20_000);
    assert_eq!(server.recv_text().await, r#"40{"token":"secret"}"#);

    pump_until(&mut client, |c| c.sid().is_some()).await;
    assert_eq!(server.recv_text().await, r#"40/admin,{"token":"secret"}"#);
}

// ---- Heartbeat ----

#[tokio::test(start_paused = true)]
async fn ping_is_answered_with_pong() {
    let (connector, mut accepted) = MockConnector::new();
    let mut client = create_test_client(connector);
    let mut server = connect_and_join(&mut client, &mut accepted, create_test_options()).await;

    server.send_text("2");
    assert_eq!(server.recv_text().await, "3");
    server.send_text("2probe");
    assert_eq!(server.recv_text().await, "3probe");
}

#[tokio::test(start_paused = true)]
async fn server_activity_keeps_session_alive() {
    let (connector, mut accepted) = MockConnector::new();
    let mut client = create_test_client(connector);
    let mut server = connect_and_join(&mut client, &mut accepted, create_test_options()).await;

    for _ in 0..4 {
        tokio::time::sleep(Duration::from_secs(25)).await;
        server.send_text("2");
        assert_eq!(server.recv_text().await, "3");
    }
    client.pump();
    assert_eq!(client.status(), ConnectionState::Connected);
}

#[tokio::test(start_paused = true)]
async fn silence_triggers_exactly_one_reconnect() {
    let (connector, mut accepted) = MockConnector::new();
    let mut client = create_test_client(connector);
    let events = record_lifecycle(&mut client);
    let _server = connect_and_join(&mut client, &mut accepted, create_test_options()).await;

    let started = tokio::time::Instant::now();
    pump_until(&mut client, |_| reconnect_count(&events) > 0).await;
    assert!(started.elapsed() >= Duration::from_secs(45));
    assert_eq!(client.status(), ConnectionState::Reconnecting);
    assert!(!client.is_joined("/"));

    tokio::time::sleep(Duration::from_secs(30)).await;
    client.pump();
    assert_eq!(reconnect_count(&events), 1);
    assert_eq!(
        events.borrow().last(),
        Some(&ClientEvent::Reconnecting {
            attempt: 1,
            delay: Duration::from_secs(60)
        })
    );
}

// ---- Acknowledgements ----

#[tokio::test(start_paused = true)]
async fn ack_reply_reaches_continuation() {
    let (connector, mut accepted) = MockConnector::new();
    let mut client = create_test_client(connector);
    let mut server = connect_and_join(&mut client, &mut accepted, create_test_options()).await;

    let slot = ack_slot();
    client
        .emit_with_ack("/", "greet", json!({"name": "abc"}), None, record_into(&slot))
        .unwrap();
    assert_eq!(server.recv_text().await, r#"421["greet",{"name":"abc"}]"#);

    server.send_text(r#"431["ok"]"#);
    pump_until(&mut client, |_| !slot.lock().unwrap().is_empty()).await;

    let results = slot.lock().unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].as_ref().unwrap().args, vec![json!("ok")]);
}

#[tokio::test(start_paused = true)]
async fn ack_timeout_fires_once_and_late_ack_is_ignored() {
    let (connector, mut accepted) = MockConnector::new();
    let mut client = create_test_client(connector);
    let mut server = connect_and_join(&mut client, &mut accepted, create_test_options()).await;

    let slot = ack_slot();
    client
        .emit_with_ack("/", "slow", Payload::new(), Some(Duration::from_secs(2)), record_into(&slot))
        .unwrap();
    assert_eq!(server.recv_text().await, r#"421["slow"]"#);

    let started = tokio::time::Instant::now();
    pump_until(&mut client, |_| !slot.lock().unwrap().is_empty()).await;
    assert!(started.elapsed() >= Duration::from_secs(2));

    server.send_text(r#"431["late"]"#);
    server.send_text("2");
    assert_eq!(server.recv_text().await, "3");
    client.pump();

    assert_eq!(slot.lock().unwrap().as_slice(), &[Err::<Payload, _>(AckError::Timeout)]);
    assert_eq!(client.status(), ConnectionState::Connected);
}

#[tokio::test(start_paused = true)]
async fn server_ack_request_gets_single_reply() {
    let (connector, mut accepted) = MockConnector::new();
    let mut client = create_test_client(connector);
    let second_reply = Rc::new(RefCell::new(None));
    let seen = second_reply.clone();
    client
        .on("/", "question", move |event| {
            event.reply(json!("answer"))?;
            *seen.borrow_mut() = Some(matches!(
                event.reply(json!("again")),
                Err(SocketError::AlreadyAcknowledged)
            ));
            Ok(())
        })
        .unwrap();
    let mut server = connect_and_join(&mut client, &mut accepted, create_test_options()).await;

    server.send_text(r#"425["question",1]"#);
    pump_until(&mut client, |_| second_reply.borrow().is_some()).await;

    assert_eq!(server.recv_text().await, r#"435["answer"]"#);
    assert_eq!(*second_reply.borrow(), Some(true));
    assert!(server.try_recv().is_none());
}

// ---- Namespaces ----

#[tokio::test(start_paused = true)]
async fn emits_to_unjoined_namespace_flush_in_order() {
    let (connector, mut accepted) = MockConnector::new();
    let mut client = create_test_client(connector);
    let options = sio_socket::ConnectOptions {
        namespaces: vec!["/chat".into()],
        ..create_test_options()
    };
    let mut server = connect_and_join(&mut client, &mut accepted, options).await;
    assert_eq!(server.recv_text().await, "40/chat,");

    for text in ["one", "two", "three"] {
        client.emit("/chat", "msg", text).unwrap();
    }
    tokio::task::yield_now().await;
    assert!(server.try_recv().is_none());

    server.send_text(r#"40/chat,{"sid":"chat-1"}"#);
    pump_until(&mut client, |c| c.is_joined("/chat")).await;

    assert_eq!(server.recv_text().await, r#"42/chat,["msg","one"]"#);
    assert_eq!(server.recv_text().await, r#"42/chat,["msg","two"]"#);
    assert_eq!(server.recv_text().await, r#"42/chat,["msg","three"]"#);
}

#[tokio::test(start_paused = true)]
async fn full_join_queue_drops_oldest() {
    let (connector, mut accepted) = MockConnector::new();
    let mut client = create_test_client(connector);
    let events = record_lifecycle(&mut client);
    let options = sio_socket::ConnectOptions {
        pending_queue_capacity: 2,
        ..create_test_options()
    };
    let _server = connect_and_join(&mut client, &mut accepted, options).await;

    let slot = ack_slot();
    client
        .emit_with_ack("/slow", "first", Payload::new(), None, record_into(&slot))
        .unwrap();
    client.emit("/slow", "second", Payload::new()).unwrap();
    client.emit("/slow", "third", Payload::new()).unwrap();

    assert_eq!(slot.lock().unwrap().as_slice(), &[Err::<Payload, _>(AckError::Dropped)]);
    assert!(events.borrow().contains(&ClientEvent::Backpressure {
        namespace: "/slow".into(),
        dropped: 1
    }));
}

#[tokio::test(start_paused = true)]
async fn named_namespace_connect_error_rejects_queued_emits() {
    let (connector, mut accepted) = MockConnector::new();
    let mut client = create_test_client(connector);
    let events = record_lifecycle(&mut client);
    let mut server = connect_and_join(&mut client, &mut accepted, create_test_options()).await;

    let slot = ack_slot();
    client
        .emit_with_ack("/admin", "hello", Payload::new(), None, record_into(&slot))
        .unwrap();
    assert_eq!(server.recv_text().await, "40/admin,");

    server.send_text(r#"44/admin,{"message":"not authorized"}"#);
    pump_until(&mut client, |_| !slot.lock().unwrap().is_empty()).await;

    assert_eq!(slot.lock().unwrap().as_slice(), &[Err::<Payload, _>(AckError::JoinRejected)]);
    assert!(events.borrow().contains(&ClientEvent::ConnectError {
        namespace: "/admin".into(),
        data: json!({"message": "not authorized"}),
    }));
    assert_eq!(client.status(), ConnectionState::Connected);
}

#[tokio::test(start_paused = true)]
async fn events_route_to_namespace_handlers_in_order() {
    let (connector, mut accepted) = MockConnector::new();
    let mut client = create_test_client(connector);
    let log = Rc::new(RefCell::new(Vec::new()));
    for tag in ["a", "b"] {
        let log = log.clone();
        client
            .on("/chat", "msg", move |event| {
                log.borrow_mut().push(format!("{tag}:{}", event.args()[0]));
                Ok(())
            })
            .unwrap();
    }
    let mut server = connect_and_join(&mut client, &mut accepted, create_test_options()).await;
    assert_eq!(server.recv_text().await, "40/chat,");

    server.send_text(r#"42/chat,["msg",1]"#);
    server.send_text(r#"40/chat,{"sid":"chat-1"}"#);
    server.send_text(r#"42/chat,["msg",2]"#);
    pump_until(&mut client, |_| log.borrow().len() == 2).await;

    assert_eq!(*log.borrow(), vec!["a:2", "b:2"]);
}

#[tokio::test(start_paused = true)]
async fn namespace_can_be_rejoined_after_server_leave() {
    let (connector, mut accepted) = MockConnector::new();
    let mut client = create_test_client(connector);
    let events = record_lifecycle(&mut client);
    let mut server = connect_and_join(&mut client, &mut accepted, create_test_options()).await;

    client.join("/chat").unwrap();
    assert_eq!(server.recv_text().await, "40/chat,");
    server.send_text(r#"40/chat,{"sid":"chat-1"}"#);
    pump_until(&mut client, |c| c.is_joined("/chat")).await;

    server.send_text("41/chat,");
    pump_until(&mut client, |c| !c.is_joined("/chat")).await;
    assert!(events.borrow().contains(&ClientEvent::NamespaceDisconnect {
        namespace: "/chat".into()
    }));

    client.join("/chat").unwrap();
    assert_eq!(server.recv_text().await, "40/chat,");
    client.emit("/chat", "msg", "back").unwrap();
    client.join("/chat").unwrap();
    tokio::task::yield_now().await;
    assert!(server.try_recv().is_none());

    server.send_text(r#"40/chat,{"sid":"chat-2"}"#);
    pump_until(&mut client, |c| c.is_joined("/chat")).await;
    assert_eq!(server.recv_text().await, r#"42/chat,["msg","back"]"#);
}

#[tokio::test(start_paused = true)]
async fn namespace_can_be_retried_after_connect_error() {
    let (connector, mut accepted) = MockConnector::new();
    let mut client = create_test_client(connector);
    let events = record_lifecycle(&mut client);
    let mut server = connect_and_join(&mut client, &mut accepted, create_test_options()).await;

    client.join("/admin").unwrap();
    assert_eq!(server.recv_text().await, "40/admin,");
    server.send_text(r#"44/admin,{"message":"not yet"}"#);
    pump_until(&mut client, |_| {
        events
            .borrow()
            .iter()
            .any(|e| matches!(e, ClientEvent::ConnectError { .. }))
    })
    .await;

    client.join("/admin").unwrap();
    assert_eq!(server.recv_text().await, "40/admin,");
    server.send_text(r#"40/admin,{"sid":"admin-1"}"#);
    pump_until(&mut client, |c| c.is_joined("/admin")).await;
}

#[tokio::test(start_paused = true)]
async fn queued_ack_times_out_while_namespace_never_joins() {
    let (connector, mut accepted) = MockConnector::new();
    let mut client = create_test_client(connector);
    let mut server = connect_and_join(&mut client, &mut accepted, create_test_options()).await;

    let started = tokio::time::Instant::now();
    let slot = ack_slot();
    client
        .emit_with_ack(
            "/slow",
            "hello",
            Payload::new(),
            Some(Duration::from_secs(2)),
            record_into(&slot),
        )
        .unwrap();
    assert_eq!(server.recv_text().await, "40/slow,");

    pump_until(&mut client, |_| !slot.lock().unwrap().is_empty()).await;
    assert_eq!(slot.lock().unwrap().as_slice(), &[Err::<Payload, _>(AckError::Timeout)]);
    assert!(started.elapsed() >= Duration::from_secs(2));

    // A join that arrives afterwards has nothing left to flush.
    server.send_text(r#"40/slow,{"sid":"slow-1"}"#);
    pump_until(&mut client, |c| c.is_joined("/slow")).await;
    tokio::task::yield_now().await;
    assert!(server.try_recv().is_none());
    assert_eq!(slot.lock().unwrap().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn emit_while_connecting_waits_for_default_namespace() {
    let (connector, mut accepted) = MockConnector::new();
    let mut client = create_test_client(connector);

    client.connect(SERVER_URL, create_test_options()).unwrap();
    assert_eq!(client.status(), ConnectionState::Connecting);
    client.emit("/", "early", json!(1)).unwrap();

    let mut server = accepted.recv().await.unwrap();
    server.open("abc123", 25_000, 20_000);
    assert_eq!(server.recv_text().await, "40");
    client.pump();
    tokio::task::yield_now().await;
    assert!(server.try_recv().is_none());

    server.send_text(r#"40{"sid":"ns-abc123"}"#);
    pump_until(&mut client, |c| c.is_joined("/")).await;
    assert_eq!(server.recv_text().await, r#"42["early",1]"#);
}

// ---- Framing ----

#[tokio::test(start_paused = true)]
async fn binary_event_is_reassembled_before_dispatch() {
    let (connector, mut accepted) = MockConnector::new();
    let mut client = create_test_client(connector);
    let received = Rc::new(RefCell::new(None));
    let sink = received.clone();
    client
        .on("/", "binary_event", move |event| {
            *sink.borrow_mut() = event.binary(0).cloned();
            Ok(())
        })
        .unwrap();
    let mut server = connect_and_join(&mut client, &mut accepted, create_test_options()).await;

    server.send_text(r#"451-["binary_event",{"_placeholder":true,"num":0}]"#);
    server.send_text("2");
    assert_eq!(server.recv_text().await, "3");
    client.pump();
    assert!(received.borrow().is_none());

    server.send_binary(b"\x01\x02\x03");
    pump_until(&mut client, |_| received.borrow().is_some()).await;
    assert_eq!(*received.borrow(), Some(Bytes::from_static(b"\x01\x02\x03")));
}

#[tokio::test(start_paused = true)]
async fn binary_emit_uses_attachment_frames() {
    let (connector, mut accepted) = MockConnector::new();
    let mut client = create_test_client(connector);
    let mut server = connect_and_join(&mut client, &mut accepted, create_test_options()).await;

    let payload = Payload::new()
        .with_arg("avatar.png")
        .with_binary(Bytes::from_static(b"\x89PNG"));
    client.emit("/", "upload", payload).unwrap();

    assert_eq!(
        server.recv_text().await,
        r#"451-["upload","avatar.png",{"_placeholder":true,"num":0}]"#
    );
    assert_eq!(
        server.recv().await,
        Some(Frame::binary(Bytes::from_static(b"\x89PNG")))
    );
}

#[tokio::test(start_paused = true)]
async fn malformed_frames_do_not_drop_the_connection() {
    let (connector, mut accepted) = MockConnector::new();
    let mut client = create_test_client(connector);
    let mut server = connect_and_join(&mut client, &mut accepted, create_test_options()).await;

    for bad in ["", "9", "47", r#"42/chat["x"]"#, r#"42abc["x"]"#, r#"42["unterminated"#] {
        server.send_text(bad);
    }
    server.send_binary(b"stray");
    server.send_text("2");
    assert_eq!(server.recv_text().await, "3");

    client.pump();
    assert_eq!(client.status(), ConnectionState::Connected);
}

// ---- Disconnects and reconnection ----

#[tokio::test(start_paused = true)]
async fn server_disconnect_is_terminal() {
    let (connector, mut accepted) = MockConnector::new();
    let mut client = create_test_client(connector);
    let events = record_lifecycle(&mut client);
    let server = connect_and_join(&mut client, &mut accepted, create_test_options()).await;

    server.send_text("41");
    pump_until(&mut client, |c| c.status() == ConnectionState::Disconnected).await;
    client.pump();

    assert_eq!(
        events.borrow().last(),
        Some(&ClientEvent::Disconnect {
            reason: DisconnectReason::IoServerDisconnect
        })
    );
    assert_eq!(reconnect_count(&events), 0);
}

#[tokio::test(start_paused = true)]
async fn default_namespace_connect_error_is_fatal() {
    let (connector, mut accepted) = MockConnector::new();
    let mut client = create_test_client(connector);
    let events = record_lifecycle(&mut client);

    client.connect(SERVER_URL, create_test_options()).unwrap();
    let mut server = accepted.recv().await.unwrap();
    server.open("abc123", 25_000, 20_000);
    assert_eq!(server.recv_text().await, "40");
    server.send_text(r#"44{"message":"invalid credentials"}"#);

    pump_until(&mut client, |_| {
        events
            .borrow()
            .iter()
            .any(|e| matches!(e, ClientEvent::Disconnect { .. }))
    })
    .await;

    let events = events.borrow();
    assert_eq!(
        events[0],
        ClientEvent::ConnectError {
            namespace: "/".into(),
            data: json!({"message": "invalid credentials"}),
        }
    );
    assert_eq!(
        events[1],
        ClientEvent::Disconnect {
            reason: DisconnectReason::IoServerDisconnect
        }
    );
    assert_eq!(client.status(), ConnectionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn transport_loss_resets_acks_and_reconnects() {
    let (connector, mut accepted) = MockConnector::new();
    let mut client = create_test_client(connector);
    let events = record_lifecycle(&mut client);
    let mut server = connect_and_join(&mut client, &mut accepted, create_test_options()).await;

    let slot = ack_slot();
    client
        .emit_with_ack("/", "pending", Payload::new(), None, record_into(&slot))
        .unwrap();
    assert_eq!(server.recv_text().await, r#"421["pending"]"#);
    drop(server);

    pump_until(&mut client, |_| reconnect_count(&events) == 1).await;
    client.pump();
    assert_eq!(slot.lock().unwrap().as_slice(), &[Err::<Payload, _>(AckError::ConnectionReset)]);

    let mut server = accepted.recv().await.unwrap();
    server.open("def456", 25_000, 20_000);
    assert_eq!(server.recv_text().await, "40");
    server.send_text(r#"40{"sid":"ns-def456"}"#);
    pump_until(&mut client, |c| c.is_joined("/")).await;

    assert_eq!(client.sid(), Some("def456"));
    let slot = ack_slot();
    client
        .emit_with_ack("/", "fresh", Payload::new(), None, record_into(&slot))
        .unwrap();
    assert_eq!(server.recv_text().await, r#"421["fresh"]"#);
}

#[tokio::test(start_paused = true)]
async fn named_namespaces_rejoin_after_reconnect() {
    let (connector, mut accepted) = MockConnector::new();
    let mut client = create_test_client(connector);
    let events = record_lifecycle(&mut client);
    let options = sio_socket::ConnectOptions {
        namespaces: vec!["/chat".into()],
        ..create_test_options()
    };
    let mut server = connect_and_join(&mut client, &mut accepted, options).await;
    assert_eq!(server.recv_text().await, "40/chat,");
    server.send_text(r#"40/chat,{"sid":"chat-1"}"#);
    pump_until(&mut client, |c| c.is_joined("/chat")).await;
    drop(server);

    pump_until(&mut client, |_| reconnect_count(&events) == 1).await;
    assert!(!client.is_joined("/chat"));

    let mut server = accepted.recv().await.unwrap();
    server.open("def456", 25_000, 20_000);
    assert_eq!(server.recv_text().await, "40");
    server.send_text(r#"40{"sid":"ns-def456"}"#);
    pump_until(&mut client, |c| c.is_joined("/")).await;

    assert_eq!(server.recv_text().await, "40/chat,");
    server.send_text(r#"40/chat,{"sid":"chat-2"}"#);
    pump_until(&mut client, |c| c.is_joined("/chat")).await;
    tokio::task::yield_now().await;
    assert!(server.try_recv().is_none());
}

#[tokio::test(start_paused = true)]
async fn reconnection_gives_up_after_max_attempts() {
    let (connector, _accepted) = MockConnector::new();
    let mut client = create_test_client(connector.refusing());
    let events = record_lifecycle(&mut client);
    let options = sio_socket::ConnectOptions {
        reconnect: ReconnectConfig {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            max_attempts: 2,
            jitter_factor: 0.0,
            ..ReconnectConfig::default()
        },
        ..create_test_options()
    };

    client.connect(SERVER_URL, options).unwrap();
    pump_until(&mut client, |_| {
        events
            .borrow()
            .iter()
            .any(|e| matches!(e, ClientEvent::Disconnect { .. }))
    })
    .await;

    assert_eq!(
        *events.borrow(),
        vec![
            ClientEvent::Reconnecting {
                attempt: 1,
                delay: Duration::from_secs(1)
            },
            ClientEvent::Reconnecting {
                attempt: 2,
                delay: Duration::from_millis(1_500)
            },
            ClientEvent::Disconnect {
                reason: DisconnectReason::TransportError
            },
        ]
    );
    assert_eq!(client.status(), ConnectionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn disconnect_is_idempotent_and_rejects_emits() {
    let (connector, mut accepted) = MockConnector::new();
    let mut client = create_test_client(connector);
    let events = record_lifecycle(&mut client);
    let mut server = connect_and_join(&mut client, &mut accepted, create_test_options()).await;

    let slot = ack_slot();
    client
        .emit_with_ack("/later", "queued", Payload::new(), None, record_into(&slot))
        .unwrap();

    client.disconnect();
    client.disconnect();
    assert_eq!(client.status(), ConnectionState::Closing);
    assert!(matches!(
        client.emit("/", "nope", Payload::new()),
        Err(SocketError::NotConnected)
    ));
    assert!(matches!(
        client.emitter().emit("/", "nope", Payload::new()),
        Err(SocketError::NotConnected)
    ));
    assert_eq!(slot.lock().unwrap().as_slice(), &[Err::<Payload, _>(AckError::Cancelled)]);

    assert_eq!(server.recv_text().await, "40/later,");
    assert_eq!(server.recv_text().await, "41");
    assert_eq!(server.recv_text().await, "1");

    pump_until(&mut client, |c| c.status() == ConnectionState::Disconnected).await;
    client.pump();
    assert_eq!(
        events.borrow().last(),
        Some(&ClientEvent::Disconnect {
            reason: DisconnectReason::IoClientDisconnect
        })
    );
    assert_eq!(reconnect_count(&events), 0);
}

#[tokio::test(start_paused = true)]
async fn emitter_queues_cross_thread_emits() {
    let (connector, mut accepted) = MockConnector::new();
    let mut client = create_test_client(connector);
    let mut server = connect_and_join(&mut client, &mut accepted, create_test_options()).await;

    let emitter = client.emitter();
    std::thread::spawn(move || emitter.emit("/", "from-thread", json!(7)))
        .join()
        .unwrap()
        .unwrap();

    client.pump();
    assert_eq!(server.recv_text().await, r#"42["from-thread",7]"#);
}
