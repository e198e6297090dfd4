//! The plain-TCP front-end.
//!
//! No environment hints are available on a raw TCP connection, so the
//! encoding detector always degrades to `cp437` here.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};

use crate::encoding;
use crate::error::{AdmissionError, EndReason};
use crate::pump;
use crate::session::Session;
use crate::supervisor::Supervisor;

/// Runs the plain-TCP accept loop until `supervisor` signals shutdown.
pub async fn run(supervisor: Arc<Supervisor>) -> anyhow::Result<()> {
    let (addr, port) = crate::config::listen_address(supervisor.config.listen_port);
    let listener = TcpListener::bind((addr, port)).await?;
    info!(port, "TCP front-end listening");

    let mut shutdown = supervisor.shutdown_signal();
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (socket, peer_addr) = match accepted {
                    Ok(pair) => pair,
                    Err(error) => {
                        warn!(%error, "failed to accept TCP connection");
                        continue;
                    }
                };
                let supervisor = supervisor.clone();
                tokio::spawn(async move {
                    handle_connection(supervisor, socket, peer_addr).await;
                });
            }
            _ = shutdown.changed() => {
                info!("TCP front-end shutting down");
                return Ok(());
            }
        }
    }
}

async fn handle_connection(supervisor: Arc<Supervisor>, socket: TcpStream, peer_addr: std::net::SocketAddr) {
    if !supervisor.check_capacity() {
        debug!(%peer_addr, reason = %AdmissionError::MaxConnections, "rejected");
        return;
    }

    // `accept()` handed back `peer_addr`, but the socket can already have
    // been reset by the time we get here; re-querying it live is §4.6 step
    // 2's "clientAddr.ip is unavailable" check.
    if socket.peer_addr().is_err() {
        debug!(%peer_addr, reason = %AdmissionError::NoPeerAddress, "rejected");
        return;
    }

    let ip = peer_addr.ip().to_string();
    let decision = supervisor.ip_filter.should_allow(&ip);
    if !decision.allowed {
        info!(%peer_addr, reason = decision.reason.as_deref().unwrap_or(""), "admission denied");
        return;
    }

    if !decision.whitelisted && supervisor.geo_filter.is_blocked(&ip, &supervisor.blocked_countries, supervisor.block_unknown_countries) {
        info!(%peer_addr, reason = %AdmissionError::BlockedCountry, "admission denied");
        return;
    }

    supervisor.mark_admitted();

    let encoding = encoding::detect(&HashMap::new(), None);
    let backend_port = encoding::backend_port(encoding, &supervisor.config);

    if let Err(error) = pump::tune_client_socket(&socket) {
        debug!(%error, "failed to tune client socket");
    }

    let backend = match connect_backend(&supervisor, backend_port).await {
        Ok(stream) => stream,
        Err(error) => {
            error!(%peer_addr, %error, "backend dial failed");
            supervisor.record_session_end(EndReason::BackendDialError);
            return;
        }
    };

    let session = Session::new(peer_addr, supervisor.config.backend_host.clone(), backend_port, encoding, None);
    let session_id = session.id.clone();
    let counters = session.counters();

    let reason = pump::run(socket, backend, counters, supervisor.config.connection_timeout, Some(peer_addr)).await;
    let report = session.report(reason);
    info!(
        session_id = %session_id,
        bytes_client_to_backend = report.bytes_client_to_backend,
        bytes_backend_to_client = report.bytes_backend_to_client,
        reason = %reason,
        "session ended"
    );
    supervisor.record_session_end(reason);
}

async fn connect_backend(supervisor: &Supervisor, port: u16) -> anyhow::Result<TcpStream> {
    let stream = TcpStream::connect((supervisor.config.backend_host.as_str(), port)).await?;
    pump::tune_backend_socket(&stream)?;
    Ok(stream)
}

/// Exposed for the SSH front-end, which shares the exact same dial-and-tune
/// behavior once it has its own encoding-derived port.
pub async fn dial_backend(host: &str, port: u16) -> anyhow::Result<TcpStream> {
    let stream = TcpStream::connect((host, port)).await?;
    pump::tune_backend_socket(&stream)?;
    Ok(stream)
}

