//! Typed errors at the seams between the gateway's components.
//!
//! Startup failures (bad configuration, an unreadable host key, a bind
//! failure) are reported as `anyhow::Error` up through `main`, matching
//! `Config::from_env`'s own convention. Per-connection failures use the
//! enums below so call sites can match on the reason instead of parsing
//! strings, and so every admission denial and session termination carries
//! a stable `reason` for logging and for the integration tests.

use std::fmt;

/// Why an inbound connection was denied admission before any bytes were
/// forwarded to the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdmissionError {
    InvalidAddress,
    Blocklisted,
    TemporarilyBlocked(String),
    RateLimited,
    BlockedCountry,
    MaxConnections,
    NoPeerAddress,
}

impl AdmissionError {
    /// The stable reason string used in logs and returned to callers, as
    /// specified by the `shouldAllow` algorithm.
    pub fn reason(&self) -> String {
        match self {
            AdmissionError::InvalidAddress => "Invalid IP address".to_string(),
            AdmissionError::Blocklisted => "IP in blocklist".to_string(),
            AdmissionError::TemporarilyBlocked(reason) => reason.clone(),
            AdmissionError::RateLimited => "Rate limit exceeded".to_string(),
            AdmissionError::BlockedCountry => "Blocked unknown country".to_string(),
            AdmissionError::MaxConnections => "max-connections".to_string(),
            AdmissionError::NoPeerAddress => "no-peer-address".to_string(),
        }
    }
}

impl fmt::Display for AdmissionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.reason())
    }
}

impl std::error::Error for AdmissionError {}

/// Why a session's byte pump stopped. Recorded exactly once per session,
/// per the pump's idempotent-cleanup invariant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    ClientClose,
    BackendClose,
    ClientError,
    BackendError,
    BackendDialError,
    Timeout,
    NoPeerAddress,
    /// An admitted SSH connection ended (disconnected, or rejected every
    /// channel request) without ever starting a shell, so the pump never
    /// ran. Still releases the connection slot exactly once.
    NoShellRequested,
}

impl EndReason {
    pub fn as_str(self) -> &'static str {
        match self {
            EndReason::ClientClose => "client-close",
            EndReason::BackendClose => "backend-close",
            EndReason::ClientError => "client-error",
            EndReason::BackendError => "backend-error",
            EndReason::BackendDialError => "backend-dial-error",
            EndReason::Timeout => "timeout",
            EndReason::NoPeerAddress => "no-peer-address",
            EndReason::NoShellRequested => "no-shell-requested",
        }
    }
}

impl fmt::Display for EndReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors surfaced while bridging an SSH channel to the backend.
#[derive(thiserror::Error, Debug)]
pub enum SshBridgeError {
    #[error("failed to read host key: {0}")]
    HostKey(#[source] anyhow::Error),

    #[error("ssh key exchange failed: {0}")]
    Handshake(#[source] russh::Error),

    #[error("client requested an unsupported channel operation")]
    UnsupportedRequest,

    #[error("admission denied: {0}")]
    Denied(AdmissionError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
