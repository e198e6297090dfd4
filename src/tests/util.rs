//! Shared fixtures for the end-to-end admission and byte-pump tests.
//!
//! Each test builds its own [`Config`] directly rather than going through
//! [`Config::from_env`], then starts the gateway's own front-end `run`
//! functions against ephemeral ports — these are full integration tests
//! against a real `TcpListener`, not unit tests against the admission
//! functions directly.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use bbs_gateway::config::Config;
use bbs_gateway::geo_filter::GeoFilter;
use bbs_gateway::ip_filter::{IpFilter, IpFilterConfig};
use bbs_gateway::supervisor::Supervisor;

pub fn base_config() -> Config {
    Config {
        listen_port: 0,
        backend_host: "127.0.0.1".to_string(),
        backend_port: 0,
        max_connections: 100,
        connection_timeout: Duration::ZERO,
        blocked_countries: vec![],
        block_unknown_countries: false,
        geoip_database_path: None,
        blocklist_path: None,
        whitelist_path: None,
        rate_limit_enabled: false,
        max_connections_per_window: 10,
        rate_limit_window: Duration::from_secs(60),
        rate_limit_block_duration: Duration::from_secs(300),
        ssh_enabled: false,
        ssh_listen_port: 0,
        ssh_host_key: PathBuf::from("./ssh_host_key"),
        ssh_ciphers: vec!["aes128-ctr".to_string()],
        encoding_detection_enabled: false,
        backend_port_utf8: None,
        backend_port_cp437: None,
        log_level: "error".to_string(),
    }
}

/// Reserves a free TCP port by binding and immediately dropping a listener.
/// Good enough for test isolation; a real race against another process
/// grabbing the same port between drop and rebind is possible but not
/// observed in practice for this suite.
pub fn free_port() -> u16 {
    std::net::TcpListener::bind(("127.0.0.1", 0)).unwrap().local_addr().unwrap().port()
}

/// Starts a backend that echoes everything it receives, returning the port
/// it bound to. Stands in for the telnet BBS backend the gateway forwards
/// to.
pub async fn spawn_echo_backend() -> u16 {
    let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else { return };
            tokio::spawn(async move {
                let mut buf = [0u8; 4096];
                loop {
                    match socket.read(&mut buf).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => {
                            if socket.write_all(&buf[..n]).await.is_err() {
                                return;
                            }
                        }
                    }
                }
            });
        }
    });

    port
}

/// Builds a [`Supervisor`] with the given `whitelist`/`blocklist` entries
/// (raw CIDR strings) and rate-limit settings, wired to `backend_port`.
pub fn supervisor(config: Config, whitelist: &[&str], blocklist: &[&str]) -> Arc<Supervisor> {
    let ip_filter = IpFilter::new(
        whitelist.iter().map(|s| bbs_gateway::addr::parse_cidr(s)).collect(),
        blocklist.iter().map(|s| bbs_gateway::addr::parse_cidr(s)).collect(),
        IpFilterConfig {
            rate_limit_enabled: config.rate_limit_enabled,
            max_connections_per_window: config.max_connections_per_window,
            window: config.rate_limit_window,
            block_duration: config.rate_limit_block_duration,
        },
    );
    Supervisor::new(config, ip_filter, GeoFilter::disabled())
}

/// Starts the TCP front-end (bound to `supervisor.config.listen_port`,
/// which callers must set to a free port before building the supervisor)
/// and waits until it is accepting connections. `tcp_frontend::run` has no
/// readiness callback, so tests poll-connect instead of sleeping a fixed
/// duration.
pub async fn start_tcp_frontend(supervisor: Arc<Supervisor>) {
    let port = supervisor.config.listen_port;
    let _handle = tokio::spawn(bbs_gateway::tcp_frontend::run(supervisor));
    wait_for_port(port).await;
}

async fn wait_for_port(port: u16) {
    for _ in 0..200 {
        if TcpStream::connect(("127.0.0.1", port)).await.is_ok() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("port {port} never started accepting connections");
}
