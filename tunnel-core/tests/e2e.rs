//! End-to-end scenarios (spec.md §8) composing a real `TunnelServer` and
//! `TunnelClient` over real loopback sockets -- no mocked sockets, per
//! SPEC_FULL.md's testing register.

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tunnel_core::dial::TcpDialer;
use tunnel_core::{TunnelClient, TunnelServer};

/// A trivial echo service: accepts one connection, echoes until EOF.
async fn spawn_echo_service() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    tokio::spawn(async move {
        loop {
            let Ok((mut conn, _)) = listener.accept().await else {
                return;
            };
            tokio::spawn(async move {
                let mut buf = [0u8; 4096];
                loop {
                    match conn.read(&mut buf).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => {
                            if conn.write_all(&buf[..n]).await.is_err() {
                                return;
                            }
                        }
                    }
                }
            });
        }
    });
    addr
}

struct Harness {
    out_addr: String,
    in_addr: String,
    server: std::sync::Arc<TunnelServer>,
}

async fn spawn_server(token: &str) -> Harness {
    let server = TunnelServer::new("127.0.0.1:0", "127.0.0.1:0", token);
    let listeners = server.bind().await.unwrap();
    let out_addr = listeners.out_listener.local_addr().unwrap().to_string();
    let in_addr = listeners.in_listener.local_addr().unwrap().to_string();
    tokio::spawn(server.clone().serve(listeners));
    Harness {
        out_addr,
        in_addr,
        server,
    }
}

fn spawn_client(remote: String, local: String, token: &str) -> tokio_util::sync::CancellationToken {
    let server_dialer = TcpDialer::new(remote, Duration::from_secs(10));
    let local_dialer = TcpDialer::new(local, Duration::from_secs(10));
    let client = TunnelClient::new(server_dialer, local_dialer, token);
    let stop = client.stop_handle();
    tokio::spawn(client.run());
    stop
}

async fn wait_for_active_mux(server: &TunnelServer) {
    for _ in 0..100 {
        if server.has_active_mux() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("server never saw an active carrier");
}

/// S1 -- loopback round trip with encryption disabled.
#[tokio::test]
async fn s1_loopback_round_trip() {
    let echo_addr = spawn_echo_service().await;
    let harness = spawn_server("no").await;
    let _client_stop = spawn_client(harness.in_addr.clone(), echo_addr, "no");
    wait_for_active_mux(&harness.server).await;

    let mut external = TcpStream::connect(&harness.out_addr).await.unwrap();
    external.write_all(b"hello").await.unwrap();
    let mut buf = [0u8; 5];
    external.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"hello");
}

/// S2 -- same as S1 but with a shared encrypted token.
#[tokio::test]
async fn s2_encrypted_tunnel_round_trip() {
    let echo_addr = spawn_echo_service().await;
    let harness = spawn_server("secret").await;
    let _client_stop = spawn_client(harness.in_addr.clone(), echo_addr, "secret");
    wait_for_active_mux(&harness.server).await;

    let mut external = TcpStream::connect(&harness.out_addr).await.unwrap();
    external.write_all(b"hello").await.unwrap();
    let mut buf = [0u8; 5];
    external.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"hello");
}

/// S3 -- token mismatch: no carrier is ever registered, and an external
/// connection is closed after the retry budget.
#[tokio::test]
async fn s3_token_mismatch_never_registers_a_carrier() {
    let echo_addr = spawn_echo_service().await;
    let harness = spawn_server("a").await;
    let _client_stop = spawn_client(harness.in_addr.clone(), echo_addr, "b");

    // Give the client several dial/handshake-fail cycles a chance to run.
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(!harness.server.has_active_mux());

    let mut external = TcpStream::connect(&harness.out_addr).await.unwrap();
    external.write_all(b"x").await.unwrap();
    let mut buf = Vec::new();
    tokio::time::timeout(Duration::from_secs(2), external.read_to_end(&mut buf))
        .await
        .expect("external connection should be closed after the retry budget")
        .unwrap();
    assert!(buf.is_empty());
}

/// S4 -- private service unreachable: the external connection is closed
/// promptly rather than hanging.
#[tokio::test]
async fn s4_unreachable_local_service_closes_promptly() {
    // Bind and immediately drop a listener to get an address nothing is
    // listening on.
    let throwaway = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dead_addr = throwaway.local_addr().unwrap().to_string();
    drop(throwaway);

    let harness = spawn_server("no").await;
    let _client_stop = spawn_client(harness.in_addr.clone(), dead_addr, "no");
    wait_for_active_mux(&harness.server).await;

    let mut external = TcpStream::connect(&harness.out_addr).await.unwrap();
    external.write_all(b"x").await.unwrap();

    let mut buf = Vec::new();
    tokio::time::timeout(Duration::from_secs(10), external.read_to_end(&mut buf))
        .await
        .expect("external connection should close once the local dial fails")
        .unwrap();
    assert!(buf.is_empty());
}

/// Boundary behavior: 100 concurrent external connections riding one
/// carrier, each getting its own logical stream and seeing only its own
/// echoed bytes back.
#[tokio::test]
async fn boundary_100_concurrent_external_connections_through_one_carrier() {
    let echo_addr = spawn_echo_service().await;
    let harness = spawn_server("no").await;
    let _client_stop = spawn_client(harness.in_addr.clone(), echo_addr, "no");
    wait_for_active_mux(&harness.server).await;

    let mut tasks = Vec::new();
    for i in 0..100u32 {
        let out_addr = harness.out_addr.clone();
        tasks.push(tokio::spawn(async move {
            let payload = format!("req-{i:03}");
            let mut conn = TcpStream::connect(&out_addr).await.unwrap();
            conn.write_all(payload.as_bytes()).await.unwrap();
            let mut buf = vec![0u8; payload.len()];
            conn.read_exact(&mut buf).await.unwrap();
            assert_eq!(buf, payload.as_bytes());
        }));
    }

    for task in tasks {
        tokio::time::timeout(Duration::from_secs(10), task)
            .await
            .expect("every concurrent external connection should finish promptly")
            .unwrap();
    }
}

/// S6 -- severing the carrier mid-copy surfaces as EOF to the external
/// connection instead of hanging.
#[tokio::test]
async fn s6_carrier_severed_mid_stream_unblocks_external_side() {
    let echo_addr = spawn_echo_service().await;
    let harness = spawn_server("no").await;
    let client_stop = spawn_client(harness.in_addr.clone(), echo_addr, "no");
    wait_for_active_mux(&harness.server).await;

    let mut external = TcpStream::connect(&harness.out_addr).await.unwrap();
    external.write_all(b"hello").await.unwrap();
    let mut buf = [0u8; 5];
    external.read_exact(&mut buf).await.unwrap();

    // Sever the carrier by stopping the client; the server's Mux reader
    // task observes EOF on the carrier and tears the Mux (and every
    // stream riding it, including this one) down.
    client_stop.cancel();

    let mut tail = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), external.read_to_end(&mut tail))
        .await
        .expect("external side must observe EOF once the carrier is severed")
        .unwrap();
}
