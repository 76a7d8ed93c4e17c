//! secure-socket - TLS sessions over raw TCP sockets
//!
//! This crate wraps a TLS library's client/server primitives around an
//! already-connected byte-stream socket: process-wide library initialization,
//! context creation, handshake (connect/accept), and record-sized encrypted
//! reads and writes.

pub mod net;
pub mod tls;
