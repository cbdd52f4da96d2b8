//! End-to-end client/server scenarios over real UDP on 127.0.0.1.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rnp_protocol::config::{ClientConfig, ServerConfig};
use rnp_protocol::core::event::{EventRecord, EventType};
use rnp_protocol::core::packet::PacketType;
use rnp_protocol::protocol::handshake::SessionState;
use rnp_protocol::protocol::message::{DisconnectReason, EntityState, WorldState};
use rnp_protocol::service::client::{ClientEngine, ClientEvent};
use rnp_protocol::service::server::{ServerEngine, ServerEvent};

const WAIT: Duration = Duration::from_secs(3);

fn start_server(max_clients: usize) -> ServerEngine {
    ServerEngine::start(ServerConfig {
        address: "127.0.0.1:0".into(),
        max_clients,
        ..ServerConfig::default()
    })
    .expect("server should bind")
}

async fn client_event<F>(client: &mut ClientEngine, mut wanted: F) -> ClientEvent
where
    F: FnMut(&ClientEvent) -> bool,
{
    loop {
        let event = tokio::time::timeout(WAIT, client.next_event())
            .await
            .expect("timed out waiting for client event")
            .expect("client event channel closed");
        if wanted(&event) {
            return event;
        }
    }
}

async fn server_event<F>(server: &mut ServerEngine, mut wanted: F) -> ServerEvent
where
    F: FnMut(&ServerEvent) -> bool,
{
    loop {
        let event = tokio::time::timeout(WAIT, server.next_event())
            .await
            .expect("timed out waiting for server event")
            .expect("server event channel closed");
        if wanted(&event) {
            return event;
        }
    }
}

async fn connected_pair(name: &str) -> (ServerEngine, ClientEngine, u32) {
    let mut server = start_server(8);
    let mut client = ClientEngine::new(ClientConfig::default());
    client
        .connect("127.0.0.1", server.local_addr().port(), name, 0)
        .unwrap();

    let session_id = match client_event(&mut client, |e| matches!(e, ClientEvent::Connected(_))).await {
        ClientEvent::Connected(session) => session.session_id,
        _ => unreachable!(),
    };
    server_event(&mut server, |e| matches!(e, ServerEvent::ClientConnected { .. })).await;
    (server, client, session_id)
}

#[tokio::test]
async fn test_handshake_establishes_session() {
    let mut server = start_server(8);
    let mut client = ClientEngine::new(ClientConfig::default());
    assert_eq!(client.state(), SessionState::Disconnected);

    client
        .connect("127.0.0.1", server.local_addr().port(), "Ace", 5)
        .unwrap();

    let event = client_event(&mut client, |e| matches!(e, ClientEvent::Connected(_))).await;
    let ClientEvent::Connected(session) = event else {
        unreachable!()
    };
    assert_eq!(session.session_id, 1);
    assert_eq!(session.tick_rate_hz, 60);
    assert_eq!(session.mtu_payload_bytes, 512);
    assert_eq!(session.client_caps, 5);
    assert_eq!(client.state(), SessionState::Connected);
    assert_eq!(client.session().map(|s| s.session_id), Some(1));

    match server_event(&mut server, |e| matches!(e, ServerEvent::ClientConnected { .. })).await {
        ServerEvent::ClientConnected {
            endpoint,
            session_id,
            name,
            client_caps,
        } => {
            assert_eq!(Some(endpoint.port()), client.local_addr().map(|a| a.port()));
            assert_eq!(session_id, 1);
            assert_eq!(name, "Ace");
            assert_eq!(client_caps, 5);
        }
        _ => unreachable!(),
    }
    assert_eq!(server.client_count(), 1);
    assert!(matches!(
        client.connect("127.0.0.1", server.local_addr().port(), "Ace", 0),
        Err(rnp_protocol::ProtocolError::AlreadyConnected)
    ));
}

#[tokio::test]
async fn test_ping_measures_rtt() {
    let (_server, mut client, _) = connected_pair("Pinger").await;
    assert!(client.last_rtt().is_none());

    client.send_ping().unwrap();
    let event = client_event(&mut client, |e| matches!(e, ClientEvent::Pong { .. })).await;
    let ClientEvent::Pong { rtt, .. } = event else {
        unreachable!()
    };
    assert!(rtt < WAIT);
    assert_eq!(client.last_rtt(), Some(rtt));
}

#[tokio::test]
async fn test_events_flow_both_ways() {
    let (mut server, mut client, session_id) = connected_pair("Mover").await;

    client.send_player_input(3, &[0b0101]).unwrap();
    match server_event(&mut server, |e| matches!(e, ServerEvent::Events { .. })).await {
        ServerEvent::Events {
            session_id: from_session,
            events,
            ..
        } => {
            assert_eq!(from_session, session_id);
            // No server tick seen yet.
            assert_eq!(events.server_tick, Some(0));
            assert_eq!(events.events, vec![EventRecord::new(EventType::Input, 3, vec![0b0101])]);
        }
        _ => unreachable!(),
    }

    let spawn = vec![
        EventRecord::new(EventType::Spawn, 42, vec![]),
        EventRecord::new(EventType::PowerUp, 42, vec![2]),
    ];
    server.broadcast_events(900, spawn.clone(), true).unwrap();
    match client_event(&mut client, |e| matches!(e, ClientEvent::Events(_))).await {
        ClientEvent::Events(batch) => {
            assert_eq!(batch.server_tick, Some(900));
            assert_eq!(batch.events, spawn);
        }
        _ => unreachable!(),
    }

    let world = WorldState {
        server_tick: 901,
        entities: vec![EntityState {
            id: 42,
            entity_type: 1,
            x: 1.5,
            y: 2.5,
            vx: 0.0,
            vy: 0.0,
            state_flags: 1,
        }],
    };
    server.broadcast_world_state(world.clone(), false).unwrap();
    match client_event(&mut client, |e| matches!(e, ClientEvent::WorldState(_))).await {
        ClientEvent::WorldState(received) => assert_eq!(received, world),
        _ => unreachable!(),
    }
    assert_eq!(client.status().last_server_tick, Some(901));

    client.send_player_input(3, &[]).unwrap();
    match server_event(&mut server, |e| matches!(e, ServerEvent::Events { .. })).await {
        ServerEvent::Events { events, .. } => assert_eq!(events.server_tick, Some(901)),
        _ => unreachable!(),
    }

    // The reliable broadcast is acknowledged by the client.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(server.stats().pending_reliable, 0);
}

#[tokio::test]
async fn test_oversized_sends_rejected_synchronously() {
    let (server, client, _) = connected_pair("Big").await;

    assert!(matches!(
        client.send_player_input(1, &[0u8; 300]),
        Err(rnp_protocol::ProtocolError::EventDataTooLarge(300))
    ));

    let events: Vec<_> = (0..4)
        .map(|i| EventRecord::new(EventType::Custom, i, vec![0; 200]))
        .collect();
    assert!(server.broadcast_events(1, events, false).is_err());
}

#[tokio::test]
async fn test_client_disconnect_reaches_server() {
    let (mut server, mut client, session_id) = connected_pair("Leaver").await;

    client.disconnect(DisconnectReason::ClientRequest).unwrap();
    assert_eq!(client.state(), SessionState::Disconnected);
    assert!(!client.is_running());

    match server_event(&mut server, |e| matches!(e, ServerEvent::ClientDisconnected { .. })).await {
        ServerEvent::ClientDisconnected {
            session_id: gone,
            reason,
            ..
        } => {
            assert_eq!(gone, session_id);
            assert_eq!(reason, DisconnectReason::ClientRequest);
        }
        _ => unreachable!(),
    }
    assert_eq!(server.client_count(), 0);
    assert!(client.send_ping().is_err());
}

#[tokio::test]
async fn test_server_kicks_client() {
    let (server, mut client, _) = connected_pair("Cheater").await;
    let endpoint = client.local_addr().unwrap();
    let endpoint = std::net::SocketAddr::from(([127, 0, 0, 1], endpoint.port()));

    server
        .disconnect_client(endpoint, DisconnectReason::Banned)
        .unwrap();
    match client_event(&mut client, |e| matches!(e, ClientEvent::Disconnected { .. })).await {
        ClientEvent::Disconnected { reason } => assert_eq!(reason, DisconnectReason::Banned),
        _ => unreachable!(),
    }
    assert_eq!(client.state(), SessionState::Disconnected);
}

#[tokio::test]
async fn test_server_shutdown_notifies_clients() {
    let (mut server, mut client, _) = connected_pair("Stayer").await;

    server.shutdown();
    assert!(!server.is_running());
    match client_event(&mut client, |e| matches!(e, ClientEvent::Disconnected { .. })).await {
        ClientEvent::Disconnected { reason } => {
            assert_eq!(reason, DisconnectReason::ServerShutdown)
        }
        _ => unreachable!(),
    }
    server.shutdown();
}

#[tokio::test]
async fn test_dropped_server_notifies_clients() {
    let (server, mut client, _) = connected_pair("Orphan").await;

    drop(server);
    match client_event(&mut client, |e| matches!(e, ClientEvent::Disconnected { .. })).await {
        ClientEvent::Disconnected { reason } => {
            assert_eq!(reason, DisconnectReason::ServerShutdown)
        }
        _ => unreachable!(),
    }
}

#[tokio::test]
async fn test_full_server_refuses_connect() {
    let mut server = start_server(1);
    let port = server.local_addr().port();

    let mut first = ClientEngine::new(ClientConfig::default());
    first.connect("127.0.0.1", port, "One", 0).unwrap();
    client_event(&mut first, |e| matches!(e, ClientEvent::Connected(_))).await;
    server_event(&mut server, |e| matches!(e, ServerEvent::ClientConnected { .. })).await;

    let mut second = ClientEngine::new(ClientConfig::default());
    second.connect("127.0.0.1", port, "Two", 0).unwrap();
    match client_event(&mut second, |e| {
        matches!(e, ClientEvent::Disconnected { .. } | ClientEvent::Connected(_))
    })
    .await
    {
        ClientEvent::Disconnected { reason } => assert_eq!(reason, DisconnectReason::ServerFull),
        other => panic!("second client should be refused, got {other:?}"),
    }
    assert_eq!(server.client_count(), 1);
}

#[tokio::test]
async fn test_registered_handlers_run_after_builtins() {
    let (server, mut client, _) = connected_pair("Handled").await;

    let server_pings = Arc::new(AtomicUsize::new(0));
    let counter = server_pings.clone();
    server
        .on(PacketType::Ping, move |ctx| {
            assert!(ctx.header.session_id != 0);
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

    let client_pongs = Arc::new(AtomicUsize::new(0));
    let counter = client_pongs.clone();
    client
        .on(PacketType::Pong, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

    client.send_ping().unwrap();
    client_event(&mut client, |e| matches!(e, ClientEvent::Pong { .. })).await;
    // Client handlers run right after the event is queued.
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(server_pings.load(Ordering::SeqCst), 1);
    assert_eq!(client_pongs.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_reconnect_after_disconnect() {
    let mut server = start_server(8);
    let port = server.local_addr().port();
    let mut client = ClientEngine::new(ClientConfig::default());

    client.connect("127.0.0.1", port, "Again", 0).unwrap();
    client_event(&mut client, |e| matches!(e, ClientEvent::Connected(_))).await;
    client.disconnect(DisconnectReason::ClientRequest).unwrap();
    server_event(&mut server, |e| matches!(e, ServerEvent::ClientDisconnected { .. })).await;

    client.connect("127.0.0.1", port, "Again", 0).unwrap();
    match client_event(&mut client, |e| matches!(e, ClientEvent::Connected(_))).await {
        ClientEvent::Connected(session) => assert_eq!(session.session_id, 2),
        _ => unreachable!(),
    }
}

#[tokio::test]
async fn test_configured_client_and_server_ping() {
    let mut server = start_server(8);
    let mut client = ClientEngine::new(ClientConfig {
        address: format!("127.0.0.1:{}", server.local_addr().port()),
        player_name: "Configured".into(),
        client_caps: 2,
    });
    let mut status = client.watch_status();

    client.connect_configured().unwrap();
    client_event(&mut client, |e| matches!(e, ClientEvent::Connected(_))).await;
    tokio::time::timeout(WAIT, status.wait_for(|s| s.state == SessionState::Connected))
        .await
        .unwrap()
        .unwrap();
    assert!(status.borrow().server.is_some());

    let endpoint = match server_event(&mut server, |e| matches!(e, ServerEvent::ClientConnected { .. })).await {
        ServerEvent::ClientConnected {
            endpoint,
            name,
            client_caps,
            ..
        } => {
            assert_eq!(name, "Configured");
            assert_eq!(client_caps, 2);
            endpoint
        }
        _ => unreachable!(),
    };

    server.ping_client(endpoint).unwrap();
    match server_event(&mut server, |e| matches!(e, ServerEvent::Pong { .. })).await {
        ServerEvent::Pong { endpoint: from, rtt, .. } => {
            assert_eq!(from, endpoint);
            assert!(rtt < WAIT);
        }
        _ => unreachable!(),
    }
}

#[tokio::test]
async fn test_reliable_client_events_and_manual_ack() {
    let (mut server, client, session_id) = connected_pair("Reliable").await;

    let records = vec![EventRecord::new(EventType::Damage, 8, vec![25])];
    client.send_events(77, records.clone(), true).unwrap();
    // A forced resend of the same packet is harmless on the receiving side.
    client.retransmit_pending().unwrap();
    server.retransmit_pending().unwrap();

    match server_event(&mut server, |e| matches!(e, ServerEvent::Events { .. })).await {
        ServerEvent::Events {
            session_id: from,
            events,
            ..
        } => {
            assert_eq!(from, session_id);
            assert_eq!(events.server_tick, Some(77));
            assert_eq!(events.events, records);
        }
        _ => unreachable!(),
    }

    // An explicit ACK for sequences the server never sent clears nothing.
    client.send_ack(10_000, 0).unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(server.client_count(), 1);
}

#[tokio::test]
async fn test_empty_input_for_round_entity_id() {
    let (mut server, client, session_id) = connected_pair("Idle").await;

    // 256 ends in a zero byte, so a headerless record would read like an
    // empty batch header.
    client.send_player_input(256, &[]).unwrap();
    match server_event(&mut server, |e| matches!(e, ServerEvent::Events { .. })).await {
        ServerEvent::Events {
            session_id: from,
            events,
            ..
        } => {
            assert_eq!(from, session_id);
            assert_eq!(events.events, vec![EventRecord::new(EventType::Input, 256, vec![])]);
        }
        _ => unreachable!(),
    }
}
