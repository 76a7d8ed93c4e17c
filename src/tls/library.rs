//! TLS library bindings
//!
//! The handshake, record layer and cipher negotiation all live in the TLS
//! library. This module describes the handful of primitives the wrapper
//! needs from it (`TlsLibrary` for process-wide and context operations,
//! `SessionHandle` for per-connection operations) and implements them for
//! OpenSSL.
//!
//! Session operations return the library's raw result codes unchanged; the
//! session state machine interprets them.

use super::builtin_cert::BUILTIN_IDENTITY;
use super::config::{ContextConfig, Role, TlsVersion};
use super::error::TlsError;
use super::init::{CryptoLibraryState, LockingCallback, ThreadIdCallback};
use super::Result;
use foreign_types::ForeignType;
use libc::{c_int, c_long, c_ulong};
use openssl::error::ErrorStack;
use openssl::pkey::PKey;
use openssl::ssl::{Ssl, SslContext, SslContextBuilder, SslMethod, SslOptions, SslVerifyMode};
use openssl::x509::X509;
use openssl_sys as ffi;
use std::os::fd::RawFd;
use std::ptr;
use std::sync::OnceLock;

/// Process-wide and context-level primitives of a TLS library
pub trait TlsLibrary: Sized + 'static {
    /// Configuration handle sessions are drawn from
    type Context;

    /// Per-connection session handle
    type Session: SessionHandle;

    /// Storage for this library's process-wide state
    fn state_cell() -> &'static OnceLock<CryptoLibraryState>;

    /// Number of lock slots the library wants for its global state
    fn num_locks() -> usize;

    /// One-time library startup: algorithm tables and error strings
    fn startup();

    /// Register the locking and thread-identity callbacks
    fn set_callbacks(locking: LockingCallback, thread_id: ThreadIdCallback);

    /// Allocate a configuration handle
    fn new_context(config: &ContextConfig) -> Result<Self::Context>;

    /// Allocate a session handle from `ctx`, `None` if the library refuses
    fn new_session(ctx: &Self::Context) -> Option<Self::Session>;

    /// Pop the oldest code from the calling thread's error queue, 0 when empty
    fn get_error_queue() -> c_ulong;

    /// Drain the calling thread's error queue into a readable message
    fn error_details() -> String;
}

/// Per-connection primitives of a TLS library
pub trait SessionHandle {
    /// Bind the session to a file descriptor; non-zero on success
    fn set_fd(&mut self, fd: RawFd) -> c_int;

    /// Descriptor the session is bound to, -1 if none
    fn fd(&self) -> RawFd;

    /// Retry transparently on renegotiation instead of surfacing want-read/write
    fn set_auto_retry(&mut self);

    fn connect(&mut self) -> c_int;

    fn accept(&mut self) -> c_int;

    fn read(&mut self, buf: &mut [u8]) -> c_int;

    fn write(&mut self, buf: &[u8]) -> c_int;

    fn shutdown(&mut self) -> c_int;

    /// Classify a result code previously returned by this session
    fn get_error(&self, ret: c_int) -> c_int;

    /// Decrypted bytes buffered inside the session and not yet read
    fn pending(&self) -> c_int;
}

mod ext {
    use libc::c_int;
    use openssl_sys::SSL;

    extern "C" {
        pub fn SSL_set_fd(ssl: *mut SSL, fd: c_int) -> c_int;
        pub fn SSL_get_fd(ssl: *const SSL) -> c_int;
    }
}

const SSL_CTRL_MODE: c_int = 33;
const SSL_MODE_AUTO_RETRY: c_long = 0x4;
const SSL_OP_IGNORE_UNEXPECTED_EOF: u64 = 1 << 7;
const OPENSSL_3: i64 = 0x3000_0000;

/// OpenSSL, through the `openssl` and `openssl-sys` crates
pub struct OpenSsl;

impl TlsLibrary for OpenSsl {
    type Context = SslContext;
    type Session = Ssl;

    fn state_cell() -> &'static OnceLock<CryptoLibraryState> {
        static STATE: OnceLock<CryptoLibraryState> = OnceLock::new();
        &STATE
    }

    // OpenSSL 1.1 and later lock internally; CRYPTO_num_locks() is a macro for 1
    fn num_locks() -> usize {
        1
    }

    fn startup() {
        openssl::init();
    }

    // CRYPTO_set_locking_callback and CRYPTO_set_id_callback compile to
    // nothing since OpenSSL 1.1; older releases get theirs from openssl::init.
    fn set_callbacks(_locking: LockingCallback, _thread_id: ThreadIdCallback) {}

    fn new_context(config: &ContextConfig) -> Result<SslContext> {
        let method = match config.role() {
            Role::Client => SslMethod::tls_client(),
            Role::Server => SslMethod::tls_server(),
        };

        let mut builder = SslContextBuilder::new(method).map_err(tagged("SSL_CTX_new"))?;

        builder
            .set_min_proto_version(config.min_version().map(TlsVersion::to_openssl_version))
            .map_err(tagged("SSL_CTX_set_min_proto_version"))?;
        builder
            .set_max_proto_version(config.max_version().map(TlsVersion::to_openssl_version))
            .map_err(tagged("SSL_CTX_set_max_proto_version"))?;

        // OpenSSL 3 reports a transport close without close_notify as a
        // protocol error; report it as a plain end of stream instead
        if openssl::version::number() >= OPENSSL_3 {
            builder.set_options(SslOptions::from_bits_retain(SSL_OP_IGNORE_UNEXPECTED_EOF as _));
        }

        if config.verifies_peer() {
            builder.set_verify(SslVerifyMode::PEER);
            if config.role() == Role::Client {
                builder
                    .set_default_verify_paths()
                    .map_err(tagged("SSL_CTX_set_default_verify_paths"))?;
            }
        } else {
            builder.set_verify(SslVerifyMode::NONE);
        }

        let identity = match (config.identity(), config.role()) {
            (Some(pem), _) => Some(pem),
            (None, Role::Server) => Some(BUILTIN_IDENTITY.as_bytes()),
            (None, Role::Client) => None,
        };
        if let Some(pem) = identity {
            load_identity(&mut builder, pem)?;
        }

        Ok(builder.build())
    }

    fn new_session(ctx: &SslContext) -> Option<Ssl> {
        match Ssl::new(ctx) {
            Ok(ssl) => Some(ssl),
            Err(e) => {
                log::debug!("SSL_new failed: {}", e);
                None
            }
        }
    }

    fn get_error_queue() -> c_ulong {
        unsafe { ffi::ERR_get_error() }
    }

    fn error_details() -> String {
        let stack = ErrorStack::get();
        if stack.errors().is_empty() {
            "no error reported by the library".to_string()
        } else {
            stack.to_string()
        }
    }
}

/// Load a certificate and its private key from one PEM bundle
fn load_identity(builder: &mut SslContextBuilder, pem: &[u8]) -> Result<()> {
    let cert = X509::from_pem(pem)
        .map_err(|e| TlsError::Certificate(format!("Failed to load certificate: {}", e)))?;
    let key = PKey::private_key_from_pem(pem)
        .map_err(|e| TlsError::Certificate(format!("Failed to load private key: {}", e)))?;

    builder
        .set_certificate(&cert)
        .map_err(tagged("SSL_CTX_use_certificate"))?;
    builder
        .set_private_key(&key)
        .map_err(tagged("SSL_CTX_use_PrivateKey"))?;
    builder.check_private_key().map_err(|e| {
        TlsError::Certificate(format!("Private key does not match certificate: {}", e))
    })?;

    Ok(())
}

/// Tag a failed library call with its name
fn tagged(op: &'static str) -> impl FnOnce(ErrorStack) -> TlsError {
    move |e| TlsError::ssl(op, e.to_string())
}

fn buf_len(len: usize) -> c_int {
    c_int::try_from(len).unwrap_or(c_int::MAX)
}

impl SessionHandle for Ssl {
    fn set_fd(&mut self, fd: RawFd) -> c_int {
        unsafe { ext::SSL_set_fd(self.as_ptr(), fd) }
    }

    fn fd(&self) -> RawFd {
        unsafe { ext::SSL_get_fd(self.as_ptr()) }
    }

    fn set_auto_retry(&mut self) {
        unsafe {
            ffi::SSL_ctrl(self.as_ptr(), SSL_CTRL_MODE, SSL_MODE_AUTO_RETRY, ptr::null_mut());
        }
    }

    fn connect(&mut self) -> c_int {
        unsafe { ffi::SSL_connect(self.as_ptr()) }
    }

    fn accept(&mut self) -> c_int {
        unsafe { ffi::SSL_accept(self.as_ptr()) }
    }

    fn read(&mut self, buf: &mut [u8]) -> c_int {
        unsafe { ffi::SSL_read(self.as_ptr(), buf.as_mut_ptr().cast(), buf_len(buf.len())) }
    }

    fn write(&mut self, buf: &[u8]) -> c_int {
        unsafe { ffi::SSL_write(self.as_ptr(), buf.as_ptr().cast(), buf_len(buf.len())) }
    }

    fn shutdown(&mut self) -> c_int {
        unsafe { ffi::SSL_shutdown(self.as_ptr()) }
    }

    fn get_error(&self, ret: c_int) -> c_int {
        unsafe { ffi::SSL_get_error(self.as_ptr(), ret) }
    }

    fn pending(&self) -> c_int {
        unsafe { ffi::SSL_pending(self.as_ptr()) }
    }
}
