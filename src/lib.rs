//! This crate implements the connection-admission and byte-forwarding
//! gateway that sits in front of a legacy telnet BBS backend.
//!
//! Two front-ends accept client sessions — [`tcp_frontend`] for plain TCP
//! and [`ssh_frontend`] for SSH — and both hand admitted connections off to
//! the [`pump`] module, which shuttles bytes to and from the backend until
//! either side closes. Admission itself is layered across [`ip_filter`] and
//! [`geo_filter`], and [`supervisor`] owns the listeners and the process
//! lifecycle.

#![warn(clippy::all, rust_2018_idioms)]

#[cfg(test)]
#[macro_use]
extern crate claims;
#[macro_use]
extern crate tracing;

pub mod addr;
pub mod config;
pub mod encoding;
pub mod error;
pub mod geo_filter;
pub mod ip_filter;
pub mod pump;
pub mod session;
pub mod ssh_frontend;
pub mod supervisor;
pub mod tcp_frontend;

pub use crate::config::Config;
pub use crate::supervisor::Supervisor;

/// Used for setting different values depending on whether the gateway is
/// run in production or under the integration test harness.
///
/// `Env::Test` is only ever constructed by `src/tests/util.rs`.
#[derive(PartialEq, Eq, Clone, Copy, Debug)]
pub enum Env {
    Production,
    Test,
}
