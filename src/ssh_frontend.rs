//! The SSH front-end.
//!
//! Credentials are accepted unconditionally — the backend is responsible
//! for any further authentication. The admission pipeline
//! (whitelist/blocklist/rate-limit/geo-filter) runs against the raw TCP
//! socket *before* the SSH transport is ever started, so a denied peer never
//! burns a key exchange and the transport is simply closed without a
//! handshake.
//!
//! The channel's raw payload bytes are bridged to [`crate::pump`] through
//! [`ChannelIo`], a small `AsyncRead + AsyncWrite` adapter backed by two
//! `mpsc` channels: incoming bytes arrive via the [`russh::server::Handler`]
//! callbacks and are forwarded into the adapter's read side; outgoing bytes
//! written by the pump are handed to a task that owns the channel's
//! `Handle` and calls `Handle::data`. The pump itself never observes SSH
//! framing — it only sees this adapter's bytes.

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use async_trait::async_trait;
use russh::server::{Auth, Handle, Msg, Session as RusshSession};
use russh::{Channel, ChannelId};
use russh_keys::key::KeyPair;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use crate::encoding;
use crate::error::{AdmissionError, EndReason};
use crate::pump;
use crate::session::Session;
use crate::supervisor::Supervisor;
use crate::tcp_frontend;

/// Loads the SSH host key from the configured PEM file. Failure to read it
/// is a fatal startup error.
pub fn load_host_key(path: &std::path::Path) -> anyhow::Result<KeyPair> {
    russh_keys::load_secret_key(path, None)
        .map_err(|error| anyhow::anyhow!("failed to load SSH host key {}: {error}", path.display()))
}

fn build_russh_config(supervisor: &Supervisor, host_key: KeyPair) -> russh::server::Config {
    russh::server::Config {
        keys: vec![host_key],
        methods: russh::MethodSet::PASSWORD | russh::MethodSet::NONE,
        preferred: russh::Preferred {
            cipher: supervisor
                .config
                .ssh_ciphers
                .iter()
                .filter_map(|name| russh::cipher::Name::try_from(name.as_str()).ok())
                .collect::<Vec<_>>()
                .into(),
            ..russh::Preferred::default()
        },
        ..russh::server::Config::default()
    }
}

/// Runs the SSH accept loop until `supervisor` signals shutdown.
pub async fn run(supervisor: Arc<Supervisor>, host_key: KeyPair) -> anyhow::Result<()> {
    let (addr, port) = crate::config::listen_address(supervisor.config.ssh_listen_port);
    let listener = TcpListener::bind((addr, port)).await?;
    info!(port, "SSH front-end listening");

    let config = Arc::new(build_russh_config(&supervisor, host_key));
    let mut shutdown = supervisor.shutdown_signal();

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (socket, peer_addr) = match accepted {
                    Ok(pair) => pair,
                    Err(error) => {
                        warn!(%error, "failed to accept SSH connection");
                        continue;
                    }
                };

                if !supervisor.check_capacity() {
                    debug!(%peer_addr, reason = %AdmissionError::MaxConnections, "rejected");
                    continue;
                }

                // Same live re-check as the TCP front-end: `accept()`'s
                // address can already be stale if the peer reset the
                // connection before we got here.
                if socket.peer_addr().is_err() {
                    debug!(%peer_addr, reason = %AdmissionError::NoPeerAddress, "rejected");
                    continue;
                }

                let ip = peer_addr.ip().to_string();
                let decision = supervisor.ip_filter.should_allow(&ip);
                if !decision.allowed {
                    info!(%peer_addr, reason = decision.reason.as_deref().unwrap_or(""), "SSH admission denied");
                    continue;
                }
                if !decision.whitelisted
                    && supervisor.geo_filter.is_blocked(&ip, &supervisor.blocked_countries, supervisor.block_unknown_countries)
                {
                    info!(%peer_addr, reason = %AdmissionError::BlockedCountry, "SSH admission denied");
                    continue;
                }

                supervisor.mark_admitted();

                let supervisor = supervisor.clone();
                let config = config.clone();
                tokio::spawn(async move {
                    let handler = SshHandler::new(supervisor.clone(), peer_addr);
                    if let Err(error) = russh::server::run_stream(config, socket, handler).await {
                        debug!(%peer_addr, %error, "SSH session ended with transport error");
                    }
                });
            }
            _ = shutdown.changed() => {
                info!("SSH front-end shutting down");
                return Ok(());
            }
        }
    }
}

/// Bridges one SSH `session` channel's payload bytes to a plain
/// `AsyncRead + AsyncWrite` stream, so [`crate::pump`] can treat it exactly
/// like a TCP socket.
struct ChannelIo {
    incoming: mpsc::UnboundedReceiver<Vec<u8>>,
    pending: Vec<u8>,
    pending_pos: usize,
    outgoing: mpsc::UnboundedSender<Vec<u8>>,
}

impl AsyncRead for ChannelIo {
    fn poll_read(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        loop {
            if self.pending_pos < self.pending.len() {
                let n = std::cmp::min(buf.remaining(), self.pending.len() - self.pending_pos);
                let end = self.pending_pos + n;
                buf.put_slice(&self.pending[self.pending_pos..end]);
                self.pending_pos = end;
                return Poll::Ready(Ok(()));
            }

            match self.incoming.poll_recv(cx) {
                Poll::Ready(Some(chunk)) => {
                    self.pending = chunk;
                    self.pending_pos = 0;
                }
                Poll::Ready(None) => return Poll::Ready(Ok(())),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

impl AsyncWrite for ChannelIo {
    fn poll_write(self: Pin<&mut Self>, _cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        match self.outgoing.send(buf.to_vec()) {
            Ok(()) => Poll::Ready(Ok(buf.len())),
            Err(_) => Poll::Ready(Err(io::Error::new(io::ErrorKind::BrokenPipe, "ssh channel closed"))),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

/// Per-connection SSH handler. Owns the environment/terminal hints
/// accumulated before `shell`, and forwards channel bytes into the active
/// session's [`ChannelIo`] once a shell is running.
struct SshHandler {
    supervisor: Arc<Supervisor>,
    peer_addr: SocketAddr,
    username: Option<String>,
    env: HashMap<String, String>,
    term: Option<String>,
    /// The channel handed to us by `channel_open_session`, held until a
    /// `shell` request claims it — `shell_request` only carries a
    /// `ChannelId`, not the `Channel` itself.
    channel: Option<Channel<Msg>>,
    shell_channel: Option<ChannelId>,
    incoming_tx: Option<mpsc::UnboundedSender<Vec<u8>>>,
}

impl SshHandler {
    fn new(supervisor: Arc<Supervisor>, peer_addr: SocketAddr) -> Self {
        SshHandler {
            supervisor,
            peer_addr,
            username: None,
            env: HashMap::new(),
            term: None,
            channel: None,
            shell_channel: None,
            incoming_tx: None,
        }
    }

    fn end_session(&self, reason: EndReason) {
        self.supervisor.record_session_end(reason);
    }

    /// Starts bridging `channel` to the backend, spawning the write-side
    /// task and the pump task, and wiring `self.incoming_tx` so `data()`
    /// forwards client bytes into the pump.
    async fn start_shell(&mut self, channel: Channel<Msg>, handle: Handle) {
        let channel_id = channel.id();
        self.shell_channel = Some(channel_id);

        let (incoming_tx, incoming_rx) = mpsc::unbounded_channel::<Vec<u8>>();
        let (outgoing_tx, mut outgoing_rx) = mpsc::unbounded_channel::<Vec<u8>>();
        self.incoming_tx = Some(incoming_tx);

        let writer_handle = handle.clone();
        tokio::spawn(async move {
            while let Some(chunk) = outgoing_rx.recv().await {
                if writer_handle.data(channel_id, chunk.into()).await.is_err() {
                    break;
                }
            }
        });

        let channel_io = ChannelIo {
            incoming: incoming_rx,
            pending: Vec::new(),
            pending_pos: 0,
            outgoing: outgoing_tx,
        };

        let encoding = encoding::detect(&self.env, self.term.as_deref());
        let backend_port = encoding::backend_port(encoding, &self.supervisor.config);
        let backend_host = self.supervisor.config.backend_host.clone();
        let peer_addr = self.peer_addr;
        let term = self.term.clone();
        let supervisor = self.supervisor.clone();
        let connection_timeout = supervisor.config.connection_timeout;

        tokio::spawn(async move {
            let backend = match tcp_frontend::dial_backend(&backend_host, backend_port).await {
                Ok(stream) => stream,
                Err(error) => {
                    error!(%peer_addr, %error, "SSH backend dial failed");
                    let _ = handle.close(channel_id).await;
                    supervisor.record_session_end(EndReason::BackendDialError);
                    return;
                }
            };

            let session = Session::new(peer_addr, backend_host, backend_port, encoding, term);
            let session_id = session.id.clone();
            let counters = session.counters();

            let reason = pump::run(channel_io, backend, counters, connection_timeout, Some(peer_addr)).await;
            let report = session.report(reason);
            info!(
                session_id = %session_id,
                bytes_client_to_backend = report.bytes_client_to_backend,
                bytes_backend_to_client = report.bytes_backend_to_client,
                reason = %reason,
                "SSH session ended"
            );

            let _ = handle.close(channel_id).await;
            supervisor.record_session_end(reason);
        });
    }
}

#[async_trait]
impl russh::server::Handler for SshHandler {
    type Error = anyhow::Error;

    async fn auth_none(&mut self, user: &str) -> Result<Auth, Self::Error> {
        self.username = Some(user.to_string());
        Ok(Auth::Accept)
    }

    async fn auth_password(&mut self, user: &str, _password: &str) -> Result<Auth, Self::Error> {
        self.username = Some(user.to_string());
        Ok(Auth::Accept)
    }

    async fn channel_open_session(&mut self, channel: Channel<Msg>, _session: &mut RusshSession) -> Result<bool, Self::Error> {
        self.channel = Some(channel);
        Ok(true)
    }

    async fn env_request(
        &mut self,
        _channel: ChannelId,
        variable_name: &str,
        variable_value: &str,
        _session: &mut RusshSession,
    ) -> Result<(), Self::Error> {
        self.env.insert(variable_name.to_string(), variable_value.to_string());
        Ok(())
    }

    /// PTY is accepted unconditionally; no terminal modes are applied since
    /// the stream is treated as raw binary end-to-end.
    async fn pty_request(
        &mut self,
        channel: ChannelId,
        term: &str,
        _col_width: u32,
        _row_height: u32,
        _pix_width: u32,
        _pix_height: u32,
        _modes: &[(russh::Pty, u32)],
        session: &mut RusshSession,
    ) -> Result<(), Self::Error> {
        self.term = Some(term.to_string());
        session.channel_success(channel);
        Ok(())
    }

    /// Accepted and ignored.
    async fn window_change_request(
        &mut self,
        _channel: ChannelId,
        _col_width: u32,
        _row_height: u32,
        _pix_width: u32,
        _pix_height: u32,
        _session: &mut RusshSession,
    ) -> Result<(), Self::Error> {
        Ok(())
    }

    /// Interactive shell only; `exec` is always rejected, leaving any
    /// already-active shell on a different channel untouched.
    async fn exec_request(&mut self, channel: ChannelId, _data: &[u8], session: &mut RusshSession) -> Result<(), Self::Error> {
        session.channel_failure(channel);
        Ok(())
    }

    async fn subsystem_request(
        &mut self,
        channel: ChannelId,
        _name: &str,
        session: &mut RusshSession,
    ) -> Result<(), Self::Error> {
        session.channel_failure(channel);
        Ok(())
    }

    async fn shell_request(&mut self, channel: ChannelId, session: &mut RusshSession) -> Result<(), Self::Error> {
        session.channel_success(channel);
        let handle = session.handle();
        let Some(channel) = self.channel.take() else {
            return Err(anyhow::anyhow!("shell requested with no open channel"));
        };
        self.start_shell(channel, handle).await;
        Ok(())
    }

    async fn data(&mut self, channel: ChannelId, data: &[u8], _session: &mut RusshSession) -> Result<(), Self::Error> {
        if self.shell_channel == Some(channel) {
            if let Some(tx) = &self.incoming_tx {
                let _ = tx.send(data.to_vec());
            }
        }
        Ok(())
    }
}

impl Drop for SshHandler {
    fn drop(&mut self) {
        if self.shell_channel.is_none() {
            self.end_session(EndReason::NoShellRequested);
        }
    }
}
