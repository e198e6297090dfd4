//! End-to-end tests against the TCP front-end: a real `TcpListener`, a real
//! backend, and real client sockets.

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::util::{base_config, free_port, spawn_echo_backend, start_tcp_frontend, supervisor};

#[tokio::test]
async fn happy_path_forwards_bytes_to_backend_and_back() {
    let backend_port = spawn_echo_backend().await;
    let listen_port = free_port();

    let mut config = base_config();
    config.listen_port = listen_port;
    config.backend_port = backend_port;

    let sup = supervisor(config, &[], &[]);
    start_tcp_frontend(sup).await;

    let mut client = TcpStream::connect(("127.0.0.1", listen_port)).await.unwrap();
    client.write_all(b"LOGIN guest\r\n").await.unwrap();

    let mut buf = [0u8; 13];
    client.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"LOGIN guest\r\n");
}

#[tokio::test]
async fn blocklisted_ip_is_closed_before_touching_backend() {
    let backend_port = spawn_echo_backend().await;
    let listen_port = free_port();

    let mut config = base_config();
    config.listen_port = listen_port;
    config.backend_port = backend_port;

    let sup = supervisor(config, &[], &["127.0.0.1/32"]);
    start_tcp_frontend(sup).await;

    let mut client = TcpStream::connect(("127.0.0.1", listen_port)).await.unwrap();
    let mut buf = [0u8; 1];
    let read = client.read(&mut buf).await.unwrap();
    assert_eq!(read, 0, "denied connection must be closed with no bytes written");
}

#[tokio::test]
async fn whitelist_bypasses_a_matching_blocklist_entry() {
    let backend_port = spawn_echo_backend().await;
    let listen_port = free_port();

    let mut config = base_config();
    config.listen_port = listen_port;
    config.backend_port = backend_port;

    let sup = supervisor(config, &["127.0.0.1/32"], &["127.0.0.1/32"]);
    start_tcp_frontend(sup).await;

    let mut client = TcpStream::connect(("127.0.0.1", listen_port)).await.unwrap();
    client.write_all(b"HI").await.unwrap();
    let mut buf = [0u8; 2];
    client.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"HI");
}

#[tokio::test]
async fn fourth_rapid_connection_from_same_ip_is_rate_limited() {
    let backend_port = spawn_echo_backend().await;
    let listen_port = free_port();

    let mut config = base_config();
    config.listen_port = listen_port;
    config.backend_port = backend_port;
    config.rate_limit_enabled = true;
    config.max_connections_per_window = 3;
    config.rate_limit_window = Duration::from_secs(60);

    let sup = supervisor(config, &[], &[]);
    start_tcp_frontend(sup).await;

    for _ in 0..3 {
        let mut client = TcpStream::connect(("127.0.0.1", listen_port)).await.unwrap();
        client.write_all(b"x").await.unwrap();
        let mut buf = [0u8; 1];
        client.read_exact(&mut buf).await.unwrap();
    }

    let mut fourth = TcpStream::connect(("127.0.0.1", listen_port)).await.unwrap();
    let mut buf = [0u8; 1];
    let read = fourth.read(&mut buf).await.unwrap();
    assert_eq!(read, 0, "rate-limited connection must be closed with no bytes written");
}
