//! The bidirectional byte pump.
//!
//! Two copy directions run concurrently over a split `AsyncRead +
//! AsyncWrite` pair. Each direction blocks on `write_all`, so the runtime's
//! own flow control provides backpressure — there is no manual pause/resume
//! bookkeeping. Whichever direction finishes first determines the session's
//! `EndReason`; the other direction is dropped (cancelled) rather than
//! allowed to half-close, so both endpoints are always closed together.

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::EndReason;
use crate::session::SessionCounters;

const BUFFER_SIZE: usize = 8192;

type SharedInstant = Arc<Mutex<Instant>>;

fn touch(last_activity: &SharedInstant) {
    *last_activity.lock().unwrap() = Instant::now();
}

fn idle_for(last_activity: &SharedInstant) -> Duration {
    last_activity.lock().unwrap().elapsed()
}

enum CopyOutcome {
    Eof,
    ReadError(io::Error),
    WriteError(io::Error),
}

#[derive(Clone, Copy)]
enum Direction {
    ClientToBackend,
    BackendToClient,
}

/// Runs one direction of the pump until EOF or an I/O error.
///
/// `write_all` suspends the task until the peer's send buffer can absorb
/// more data, so a slow peer naturally pauses this direction without any
/// explicit pause/resume signaling.
async fn copy_loop<R, W>(reader: &mut R, writer: &mut W, counter: Arc<std::sync::atomic::AtomicU64>, last_activity: SharedInstant) -> CopyOutcome
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = [0u8; BUFFER_SIZE];
    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => return CopyOutcome::Eof,
            Ok(n) => n,
            Err(error) => return CopyOutcome::ReadError(error),
        };

        if let Err(error) = writer.write_all(&buf[..n]).await {
            return CopyOutcome::WriteError(error);
        }

        counter.fetch_add(n as u64, Ordering::Relaxed);
        touch(&last_activity);
    }
}

fn reason_for(direction: Direction, outcome: CopyOutcome) -> EndReason {
    match (direction, outcome) {
        (Direction::ClientToBackend, CopyOutcome::Eof) => EndReason::ClientClose,
        (Direction::ClientToBackend, CopyOutcome::ReadError(_)) => EndReason::ClientError,
        (Direction::ClientToBackend, CopyOutcome::WriteError(_)) => EndReason::BackendError,
        (Direction::BackendToClient, CopyOutcome::Eof) => EndReason::BackendClose,
        (Direction::BackendToClient, CopyOutcome::ReadError(_)) => EndReason::BackendError,
        (Direction::BackendToClient, CopyOutcome::WriteError(_)) => EndReason::ClientError,
    }
}

async fn idle_watchdog(last_activity: SharedInstant, idle_timeout: Duration) {
    let poll_interval = (idle_timeout / 4).max(Duration::from_millis(25));
    loop {
        tokio::time::sleep(poll_interval).await;
        if idle_for(&last_activity) >= idle_timeout {
            return;
        }
    }
}

/// Shuttles bytes between `client` and `backend` until either side closes
/// or errors, or the idle timeout fires. `idle_timeout == Duration::ZERO`
/// disables the idle timer (`CONNECTION_TIMEOUT=0`).
///
/// `peer_addr` is the client address resolved at session setup. If it is
/// `None` — the peer address was undetermined when the caller set up this
/// session — the pump refuses the session outright: it never starts either
/// copy loop and returns `EndReason::NoPeerAddress` immediately, dropping
/// `client` and `backend` (and so closing both) as it returns.
pub async fn run<A, B>(client: A, backend: B, counters: SessionCounters, idle_timeout: Duration, peer_addr: Option<SocketAddr>) -> EndReason
where
    A: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    B: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    if peer_addr.is_none() {
        return EndReason::NoPeerAddress;
    }

    let (mut client_rd, mut client_wr) = tokio::io::split(client);
    let (mut backend_rd, mut backend_wr) = tokio::io::split(backend);

    let last_activity: SharedInstant = Arc::new(Mutex::new(Instant::now()));

    let client_to_backend = copy_loop(&mut client_rd, &mut backend_wr, counters.client_to_backend.clone(), last_activity.clone());
    let backend_to_client = copy_loop(&mut backend_rd, &mut client_wr, counters.backend_to_client.clone(), last_activity.clone());

    tokio::pin!(client_to_backend);
    tokio::pin!(backend_to_client);

    if idle_timeout.is_zero() {
        tokio::select! {
            outcome = &mut client_to_backend => reason_for(Direction::ClientToBackend, outcome),
            outcome = &mut backend_to_client => reason_for(Direction::BackendToClient, outcome),
        }
    } else {
        let watchdog = idle_watchdog(last_activity.clone(), idle_timeout);
        tokio::pin!(watchdog);

        tokio::select! {
            outcome = &mut client_to_backend => reason_for(Direction::ClientToBackend, outcome),
            outcome = &mut backend_to_client => reason_for(Direction::BackendToClient, outcome),
            _ = &mut watchdog => EndReason::Timeout,
        }
    }
}

/// Enables `TCP_NODELAY` and keepalive on the client-facing socket.
pub fn tune_client_socket(socket: &tokio::net::TcpStream) -> io::Result<()> {
    socket.set_nodelay(true)?;
    socket2::SockRef::from(socket).set_keepalive(true)
}

/// Enables `TCP_NODELAY` and a 30s keepalive interval on the backend
/// socket.
pub fn tune_backend_socket(socket: &tokio::net::TcpStream) -> io::Result<()> {
    socket.set_nodelay(true)?;
    let keepalive = socket2::TcpKeepalive::new()
        .with_time(Duration::from_secs(30))
        .with_interval(Duration::from_secs(30));
    socket2::SockRef::from(socket).set_tcp_keepalive(&keepalive)
}
