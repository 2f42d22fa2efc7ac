//! Connection Tests
//!
//! These tests verify:
//! - Lazy connect and state transitions
//! - Pipelined requests matched out of order
//! - Quiet requests streamed up to the terminator
//! - Timeouts, peer hang-ups and reconnects
//! - SASL PLAIN authentication

#[path = "../common/mod.rs"]
mod common;

use std::time::Duration;

use bytes::BytesMut;
use common::{FakeServer, MemoryStore, Reply};
use memkv::config::Credentials;
use memkv::network::{authenticate, plain_auth_request, Connection, ConnectionConfig, ConnectionState};
use memkv::protocol::{encode_request, encode_response, parse_bytes, parse_message, Message, Opcode, Status};
use memkv::MemcacheError;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

// =============================================================================
// Helper Functions
// =============================================================================

fn connection_config(port: u16) -> ConnectionConfig {
    ConnectionConfig {
        host: "127.0.0.1".to_string(),
        port,
        timeout: Duration::from_millis(500),
        connect_timeout: Duration::from_millis(1_000),
        keep_alive: false,
        credentials: None,
    }
}

fn credentials(username: &str, password: &str) -> Credentials {
    Credentials {
        username: username.to_string(),
        password: password.to_string(),
    }
}

fn version_request(opaque: u32) -> Vec<u8> {
    encode_request(Opcode::Version, b"", b"", b"", opaque, 0)
}

async fn read_requests<S: AsyncRead + Unpin>(stream: &mut S, buffer: &mut BytesMut, count: usize) -> Vec<Message> {
    let mut messages = Vec::new();
    while messages.len() < count {
        messages.extend(parse_bytes(buffer).unwrap());
        if messages.len() >= count {
            break;
        }
        assert!(stream.read_buf(buffer).await.unwrap() > 0, "peer closed early");
    }
    messages
}

/// Node that answers GET after `get_delay`; STAT either gets a single
/// "Not found" error or no answer at all
async fn slow_get_server(answer_stat: bool, get_delay: Duration) -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut buffer = BytesMut::new();
        loop {
            if stream.read_buf(&mut buffer).await.unwrap_or(0) == 0 {
                return;
            }
            for request in parse_bytes(&mut buffer).unwrap() {
                let reply = match request.opcode() {
                    Opcode::Stat if !answer_stat => continue,
                    Opcode::Stat => encode_response(
                        Opcode::Stat,
                        Status::KeyNotFound,
                        b"",
                        b"",
                        b"Not found",
                        request.opaque(),
                        0,
                    ),
                    opcode => {
                        tokio::time::sleep(get_delay).await;
                        encode_response(opcode, Status::KeyNotFound, b"", b"", b"Not found", request.opaque(), 0)
                    }
                };
                if stream.write_all(&reply).await.is_err() {
                    return;
                }
            }
        }
    });

    port
}

/// Node that requires PLAIN auth with `user` / `secret`
async fn authenticating_server() -> FakeServer {
    let store = MemoryStore::default();
    FakeServer::start(move |request| match request.opcode() {
        Opcode::SaslListMechs => Reply::Send(encode_response(
            Opcode::SaslListMechs,
            Status::Success,
            b"",
            b"",
            b"PLAIN",
            request.opaque(),
            0,
        )),
        Opcode::SaslAuth => {
            let status = if &request.value[..] == b"\0user\0secret" {
                Status::Success
            } else {
                Status::AuthError
            };
            Reply::Send(encode_response(Opcode::SaslAuth, status, b"", b"", b"", request.opaque(), 0))
        }
        _ => store.handle(request),
    })
    .await
}

// =============================================================================
// Request / Response Tests
// =============================================================================

#[tokio::test]
async fn test_connects_lazily() {
    common::init_tracing();
    let server = FakeServer::memcached().await;
    let connection = Connection::new(connection_config(server.addr.port()));

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(connection.state(), ConnectionState::Disconnected);
    assert_eq!(server.accepts(), 0);

    let response = connection.send(1, version_request(1)).await.unwrap();
    assert_eq!(&response.value[..], common::VERSION.as_bytes());
    assert_eq!(connection.state(), ConnectionState::Ready);
    assert_eq!(server.accepts(), 1);
    assert_eq!(connection.server_key(), server.server_key());
}

#[tokio::test]
async fn test_concurrent_requests_matched_by_opaque() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    // Answer two pipelined requests in reverse order.
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut buffer = BytesMut::new();
        let requests = read_requests(&mut stream, &mut buffer, 2).await;
        for request in requests.iter().rev() {
            let value = format!("reply-{}", request.opaque());
            let bytes = encode_response(Opcode::Get, Status::Success, b"", b"", value.as_bytes(), request.opaque(), 0);
            stream.write_all(&bytes).await.unwrap();
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    });

    let connection = Connection::new(connection_config(port));
    let (first, second) = tokio::join!(
        connection.send(10, encode_request(Opcode::Get, b"a", b"", b"", 10, 0)),
        connection.send(11, encode_request(Opcode::Get, b"b", b"", b"", 11, 0)),
    );

    assert_eq!(&first.unwrap().value[..], b"reply-10");
    assert_eq!(&second.unwrap().value[..], b"reply-11");
}

#[tokio::test]
async fn test_send_quiet_streams_until_terminator() {
    let server = FakeServer::memcached().await;
    let connection = Connection::new(connection_config(server.addr.port()));

    let mut responses = connection
        .send_quiet(4, encode_request(Opcode::Stat, b"", b"", b"", 4, 0))
        .unwrap();

    let mut keys = Vec::new();
    while let Some(response) = responses.next().await {
        let message = response.unwrap();
        keys.push(String::from_utf8(message.key.to_vec()).unwrap());
    }
    assert_eq!(keys, vec!["pid", "curr_items", ""]);
    assert!(responses.next().await.is_none());
}

#[tokio::test]
async fn test_quiet_error_does_not_linger() {
    let port = slow_get_server(true, Duration::from_millis(250)).await;
    let mut config = connection_config(port);
    config.timeout = Duration::from_millis(300);
    let connection = Connection::new(config);

    let mut responses = connection
        .send_quiet(1, encode_request(Opcode::Stat, b"bogus", b"", b"", 1, 0))
        .unwrap();
    let error = responses.next().await.unwrap().unwrap();
    assert_eq!(error.status(), Status::KeyNotFound);
    assert!(responses.next().await.is_none());

    // A slow but in-time answer on the same socket must not inherit the
    // STAT deadline.
    tokio::time::sleep(Duration::from_millis(100)).await;
    let response = connection
        .send(2, encode_request(Opcode::Get, b"hello", b"", b"", 2, 0))
        .await
        .unwrap();
    assert_eq!(response.status(), Status::KeyNotFound);
    assert_eq!(connection.state(), ConnectionState::Ready);
}

#[tokio::test]
async fn test_dropped_quiet_request_is_cancelled() {
    let port = slow_get_server(false, Duration::from_millis(250)).await;
    let mut config = connection_config(port);
    config.timeout = Duration::from_millis(300);
    let connection = Connection::new(config);

    let responses = connection
        .send_quiet(1, encode_request(Opcode::Stat, b"", b"", b"", 1, 0))
        .unwrap();
    drop(responses);

    tokio::time::sleep(Duration::from_millis(100)).await;
    let response = connection
        .send(2, encode_request(Opcode::Get, b"hello", b"", b"", 2, 0))
        .await
        .unwrap();
    assert_eq!(response.status(), Status::KeyNotFound);
}

// =============================================================================
// Failure Tests
// =============================================================================

#[tokio::test]
async fn test_answer_ahead_of_malformed_frame_is_delivered() {
    let server = FakeServer::start(|request| {
        let mut bytes = encode_response(
            Opcode::Increment,
            Status::Success,
            b"",
            b"",
            &1u64.to_be_bytes(),
            request.opaque(),
            1,
        );
        bytes.extend_from_slice(&[0xff; 24]);
        Reply::Send(bytes)
    })
    .await;
    let connection = Connection::new(connection_config(server.addr.port()));

    let response = connection
        .send(1, encode_request(Opcode::Increment, b"counter", &[0; 20], b"", 1, 0))
        .await
        .unwrap();
    assert_eq!(&response.value[..], &1u64.to_be_bytes());

    // The garbage still resets the socket.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(connection.state(), ConnectionState::Disconnected);
    assert_eq!(server.requests(), 1);
}

#[tokio::test]
async fn test_peer_hangup_fails_request_and_reconnects() {
    let server = FakeServer::hanging_up().await;
    let connection = Connection::new(connection_config(server.addr.port()));

    let first = connection.send(1, version_request(1)).await;
    assert!(matches!(first, Err(MemcacheError::ConnectionClosed)));

    let second = connection.send(2, version_request(2)).await;
    assert!(matches!(second, Err(MemcacheError::ConnectionClosed)));
    assert_eq!(server.accepts(), 2);
}

#[tokio::test]
async fn test_response_timeout() {
    let server = FakeServer::silent().await;
    let mut config = connection_config(server.addr.port());
    config.timeout = Duration::from_millis(100);
    let connection = Connection::new(config);

    let started = std::time::Instant::now();
    let result = connection.send(1, version_request(1)).await;

    assert!(matches!(result, Err(MemcacheError::Timeout)));
    assert!(started.elapsed() >= Duration::from_millis(100));
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(connection.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_timeout_fails_every_outstanding_request() {
    let server = FakeServer::silent().await;
    let mut config = connection_config(server.addr.port());
    config.timeout = Duration::from_millis(100);
    let connection = Connection::new(config);

    let (first, second) = tokio::join!(
        connection.send(1, version_request(1)),
        connection.send(2, version_request(2)),
    );
    assert!(matches!(first, Err(MemcacheError::Timeout)));
    assert!(matches!(second, Err(MemcacheError::Timeout)));
}

#[tokio::test]
async fn test_connect_refused() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let connection = Connection::new(connection_config(port));
    let result = connection.send(1, version_request(1)).await;

    assert!(matches!(result, Err(MemcacheError::Io(_))));
    assert!(result.unwrap_err().is_retryable());
}

#[tokio::test]
async fn test_close_fails_outstanding_request() {
    let server = FakeServer::silent().await;
    let connection = Connection::new(connection_config(server.addr.port()));

    let pending = {
        let connection = connection.clone();
        tokio::spawn(async move { connection.send(1, version_request(1)).await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;
    connection.close();

    let result = pending.await.unwrap();
    assert!(matches!(result, Err(MemcacheError::ConnectionClosed)));
}

// =============================================================================
// Authentication Tests
// =============================================================================

#[test]
fn test_plain_auth_request_layout() {
    let bytes = plain_auth_request(&credentials("user", "pass"));
    let (message, _) = parse_message(&bytes).unwrap().unwrap();

    assert_eq!(message.opcode(), Opcode::SaslAuth);
    assert_eq!(&message.key[..], b"PLAIN");
    assert_eq!(&message.value[..], b"\0user\0pass");
}

#[tokio::test]
async fn test_authenticate_over_duplex() {
    let (mut client, mut server) = tokio::io::duplex(4096);

    let peer = tokio::spawn(async move {
        let mut buffer = BytesMut::new();
        let list = read_requests(&mut server, &mut buffer, 1).await;
        assert_eq!(list[0].opcode(), Opcode::SaslListMechs);
        server
            .write_all(&encode_response(Opcode::SaslListMechs, Status::Success, b"", b"", b"PLAIN", 0, 0))
            .await
            .unwrap();

        let auth = read_requests(&mut server, &mut buffer, 1).await;
        assert_eq!(auth[0].opcode(), Opcode::SaslAuth);
        assert_eq!(&auth[0].value[..], b"\0user\0pass");
        server
            .write_all(&encode_response(Opcode::SaslAuth, Status::Success, b"", b"", b"Authenticated", 0, 0))
            .await
            .unwrap();
    });

    let mut buffer = BytesMut::new();
    authenticate(&mut client, &mut buffer, &credentials("user", "pass"))
        .await
        .unwrap();
    peer.await.unwrap();
}

#[tokio::test]
async fn test_authenticate_rejected() {
    let (mut client, mut server) = tokio::io::duplex(4096);

    tokio::spawn(async move {
        let mut buffer = BytesMut::new();
        read_requests(&mut server, &mut buffer, 1).await;
        server
            .write_all(&encode_response(Opcode::SaslListMechs, Status::Success, b"", b"", b"PLAIN", 0, 0))
            .await
            .unwrap();
        read_requests(&mut server, &mut buffer, 1).await;
        server
            .write_all(&encode_response(Opcode::SaslAuth, Status::AuthError, b"", b"", b"Auth failure", 0, 0))
            .await
            .unwrap();
    });

    let mut buffer = BytesMut::new();
    let result = authenticate(&mut client, &mut buffer, &credentials("user", "wrong")).await;

    assert!(matches!(result, Err(MemcacheError::Authentication(_))));
    assert!(!result.unwrap_err().is_retryable());
}

#[tokio::test]
async fn test_connection_authenticates_before_requests() {
    let server = authenticating_server().await;
    let mut config = connection_config(server.addr.port());
    config.credentials = Some(credentials("user", "secret"));
    let connection = Connection::new(config);

    let response = connection.send(1, version_request(1)).await.unwrap();

    assert_eq!(response.status(), Status::Success);
    assert_eq!(connection.state(), ConnectionState::Ready);
    // list-mechs, auth, version
    assert_eq!(server.requests(), 3);
}

#[tokio::test]
async fn test_connection_auth_failure_fails_request() {
    let server = authenticating_server().await;
    let mut config = connection_config(server.addr.port());
    config.credentials = Some(credentials("user", "nope"));
    let connection = Connection::new(config);

    let result = connection.send(1, version_request(1)).await;
    assert!(matches!(result, Err(MemcacheError::Authentication(_))));
}
