//! Secure sockets
//!
//! A `SecureSocket` owns a raw socket and a TLS session bound to that
//! socket's descriptor. All calls are blocking: the session runs in the
//! library's auto-retry mode, so reads and writes return only once the
//! application-level operation has completed or failed.
//!
//! After every successful handshake step, read and write, the socket is
//! re-registered with the surrounding event mechanism. A server-side
//! `accept` registers read interest only, while a client-side `connect`
//! registers both read and write interest.

use super::error::{ErrorClass, TlsError};
use super::library::{OpenSsl, SessionHandle, TlsLibrary};
use super::Result;
use crate::net::{SocketOps, TcpSocket};
use bytes::{Bytes, BytesMut};
use libc::c_int;
use std::marker::PhantomData;
use std::os::fd::RawFd;

/// Largest plaintext a single TLS record can carry
pub const MAX_RECORD_LEN: usize = 16384;

/// Lifecycle of a secure socket
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Bound to the socket, no handshake attempted yet
    Created,
    /// Handshake in progress
    Handshaking,
    /// Handshake completed; records can flow
    Established,
    /// End of stream observed on read
    Closed,
    /// A library call failed
    Failed,
}

/// TLS session over a raw socket
pub struct SecureSocket<S: SocketOps = TcpSocket, L: TlsLibrary = OpenSsl> {
    // Declared first so the session is released before the socket closes
    ssl: L::Session,
    socket: S,
    state: SessionState,
    eof: bool,
    last_ret: c_int,
    _library: PhantomData<L>,
}

impl<S: SocketOps, L: TlsLibrary> SecureSocket<S, L> {
    /// Bind `ssl` to the descriptor of `socket`
    ///
    /// Fails with [`TlsError::InvalidSession`] when no session handle is
    /// given, and with an `SSL_set_fd` error when binding fails.
    pub fn new(socket: S, ssl: Option<L::Session>) -> Result<Self> {
        let mut ssl = ssl.ok_or(TlsError::InvalidSession)?;

        if ssl.set_fd(socket.as_raw_fd()) == 0 {
            return Err(TlsError::ssl("SSL_set_fd", L::error_details()));
        }

        ssl.set_auto_retry();

        Ok(SecureSocket {
            ssl,
            socket,
            state: SessionState::Created,
            eof: false,
            last_ret: 0,
            _library: PhantomData,
        })
    }

    /// Client-side handshake
    pub fn connect(&mut self) -> Result<()> {
        self.state = SessionState::Handshaking;

        let ret = self.ssl.connect();
        self.last_ret = ret;
        if ret <= 0 {
            return Err(self.fail("SSL_connect", ret));
        }

        self.state = SessionState::Established;
        log::debug!("TLS handshake completed (client, fd {})", self.fd());

        self.socket.register_read();
        self.socket.register_write();
        Ok(())
    }

    /// Server-side handshake; only a result of exactly 1 counts as success
    pub fn accept(&mut self) -> Result<()> {
        self.state = SessionState::Handshaking;

        let ret = self.ssl.accept();
        self.last_ret = ret;
        if ret != 1 {
            return Err(self.fail("SSL_accept", ret));
        }

        self.state = SessionState::Established;
        log::debug!("TLS handshake completed (server, fd {})", self.fd());

        self.socket.register_read();
        Ok(())
    }

    /// Decrypt at most one record
    ///
    /// An empty result means end of stream, after which every further call
    /// returns empty without touching the library.
    pub fn read(&mut self) -> Result<Bytes> {
        if self.eof {
            return Ok(Bytes::new());
        }

        let mut buffer = BytesMut::zeroed(MAX_RECORD_LEN);
        let ret = self.ssl.read(&mut buffer);
        self.last_ret = ret;

        debug_assert_eq!(
            self.ssl.pending(),
            0,
            "plaintext left buffered after a full-record read"
        );

        if ret > 0 {
            // ret is positive and bounded by MAX_RECORD_LEN
            buffer.truncate(ret as usize);
            log::trace!("read {} plaintext bytes (fd {})", ret, self.fd());
            self.socket.register_read();
            return Ok(buffer.freeze());
        }

        if ret < 0 {
            return Err(self.fail("SSL_read", ret));
        }

        match self.get_error(ret) {
            // Clean TLS close
            ErrorClass::ZeroReturn => {}
            // Underlying TCP connection closed
            ErrorClass::Syscall => {
                let queued = L::get_error_queue();
                if queued != 0 {
                    self.state = SessionState::Failed;
                    return Err(TlsError::Ssl {
                        op: "SSL_read",
                        class: Some(ErrorClass::Syscall),
                        detail: format!(
                            "transport closed with error {:#x} queued: {}",
                            queued,
                            L::error_details()
                        ),
                    });
                }
            }
            _ => return Err(self.fail("SSL_read", ret)),
        }

        self.eof = true;
        self.state = SessionState::Closed;
        log::debug!("TLS stream reached EOF (fd {})", self.fd());

        self.socket.register_read();
        Ok(Bytes::new())
    }

    /// Encrypt and send the whole payload
    pub fn write(&mut self, payload: &[u8]) -> Result<()> {
        if payload.len() > c_int::MAX as usize {
            self.state = SessionState::Failed;
            return Err(TlsError::ssl(
                "SSL_write",
                format!("payload of {} bytes exceeds a single write", payload.len()),
            ));
        }

        if !payload.is_empty() {
            let ret = self.ssl.write(payload);
            self.last_ret = ret;
            if ret <= 0 {
                return Err(self.fail("SSL_write", ret));
            }
            log::trace!("wrote {} plaintext bytes (fd {})", ret, self.fd());
        }

        self.socket.register_write();
        Ok(())
    }

    /// Send close_notify to the peer
    ///
    /// Returns `true` once the peer's close_notify has also been seen.
    pub fn shutdown(&mut self) -> Result<bool> {
        let ret = self.ssl.shutdown();
        self.last_ret = ret;
        if ret < 0 {
            return Err(self.fail("SSL_shutdown", ret));
        }
        Ok(ret == 1)
    }

    /// Library classification of a result code returned by this session
    pub fn get_error(&self, ret: c_int) -> ErrorClass {
        ErrorClass::from_raw(self.ssl.get_error(ret))
    }

    /// Raw result of the most recent library call on this session
    pub fn last_return(&self) -> c_int {
        self.last_ret
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Whether end of stream has been observed
    pub fn eof(&self) -> bool {
        self.eof
    }

    /// Descriptor of the wrapped socket
    pub fn fd(&self) -> RawFd {
        self.socket.as_raw_fd()
    }

    /// Descriptor the TLS session is bound to
    pub fn session_fd(&self) -> RawFd {
        self.ssl.fd()
    }

    /// Library session handle
    pub fn session(&self) -> &L::Session {
        &self.ssl
    }

    pub fn socket(&self) -> &S {
        &self.socket
    }

    pub fn socket_mut(&mut self) -> &mut S {
        &mut self.socket
    }

    fn fail(&mut self, op: &'static str, ret: c_int) -> TlsError {
        self.state = SessionState::Failed;
        let class = self.get_error(ret);
        let detail = L::error_details();
        log::debug!("{} failed on fd {} ({:?}): {}", op, self.fd(), class, detail);
        TlsError::Ssl {
            op,
            class: Some(class),
            detail,
        }
    }
}
