//! Entry point for the `all` integration test binary (see the `[[test]]`
//! target in `Cargo.toml`). Exercises the gateway end to end: real
//! `TcpListener`s, real client sockets, and a real `russh` client for the
//! SSH front-end.

mod util;

mod tcp_admission;
