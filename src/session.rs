//! The `Session` entity: created on successful admission, mutated only by
//! its owning pump, and destroyed once both halves of the pipe have closed.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use rand::Rng;

use crate::encoding::Encoding;
use crate::error::EndReason;

static NEXT_SEQUENCE: AtomicU64 = AtomicU64::new(1);

/// A monotonically increasing counter plus a random suffix, so session ids
/// are both orderable (for logs) and non-guessable across a restart.
pub fn next_session_id() -> String {
    let sequence = NEXT_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    let suffix: u32 = rand::thread_rng().gen();
    format!("{sequence:x}-{suffix:08x}")
}

#[derive(Debug)]
pub struct Session {
    pub id: String,
    pub client_addr: SocketAddr,
    pub backend_host: String,
    pub backend_port: u16,
    pub encoding: Encoding,
    pub terminal_type: Option<String>,
    pub start_time: Instant,
    bytes_client_to_backend: Arc<AtomicU64>,
    bytes_backend_to_client: Arc<AtomicU64>,
}

impl Session {
    pub fn new(
        client_addr: SocketAddr,
        backend_host: String,
        backend_port: u16,
        encoding: Encoding,
        terminal_type: Option<String>,
    ) -> Self {
        Session {
            id: next_session_id(),
            client_addr,
            backend_host,
            backend_port,
            encoding,
            terminal_type,
            start_time: Instant::now(),
            bytes_client_to_backend: Arc::new(AtomicU64::new(0)),
            bytes_backend_to_client: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Handles shared with the byte pump so each direction can increment
    /// its own counter without touching the other's.
    pub fn counters(&self) -> SessionCounters {
        SessionCounters {
            client_to_backend: self.bytes_client_to_backend.clone(),
            backend_to_client: self.bytes_backend_to_client.clone(),
        }
    }

    pub fn bytes_client_to_backend(&self) -> u64 {
        self.bytes_client_to_backend.load(Ordering::Acquire)
    }

    pub fn bytes_backend_to_client(&self) -> u64 {
        self.bytes_backend_to_client.load(Ordering::Acquire)
    }
}

/// Cloneable counter handles, one pair per session, exclusively written by
/// their corresponding copy direction.
#[derive(Debug, Clone)]
pub struct SessionCounters {
    pub client_to_backend: Arc<AtomicU64>,
    pub backend_to_client: Arc<AtomicU64>,
}

/// The outcome recorded once a session's pump has finished.
#[derive(Debug, Clone)]
pub struct SessionReport {
    pub id: String,
    pub client_addr: SocketAddr,
    pub bytes_client_to_backend: u64,
    pub bytes_backend_to_client: u64,
    pub end_reason: EndReason,
    pub duration: std::time::Duration,
}

impl Session {
    pub fn report(&self, end_reason: EndReason) -> SessionReport {
        SessionReport {
            id: self.id.clone(),
            client_addr: self.client_addr,
            bytes_client_to_backend: self.bytes_client_to_backend(),
            bytes_backend_to_client: self.bytes_backend_to_client(),
            end_reason,
            duration: self.start_time.elapsed(),
        }
    }
}
