//! TLS errors and error classification

use libc::c_int;
use openssl_sys as ffi;

/// Classification of a library result code, as reported by `SSL_get_error`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// The operation completed
    None,
    /// A protocol-level failure; details are in the error queue
    Ssl,
    WantRead,
    WantWrite,
    WantX509Lookup,
    /// The transport failed or closed without a protocol shutdown
    Syscall,
    /// The peer sent a clean protocol shutdown
    ZeroReturn,
    WantConnect,
    WantAccept,
    /// A code this crate does not know about
    Other(c_int),
}

impl ErrorClass {
    pub fn from_raw(code: c_int) -> Self {
        match code {
            ffi::SSL_ERROR_NONE => ErrorClass::None,
            ffi::SSL_ERROR_SSL => ErrorClass::Ssl,
            ffi::SSL_ERROR_WANT_READ => ErrorClass::WantRead,
            ffi::SSL_ERROR_WANT_WRITE => ErrorClass::WantWrite,
            ffi::SSL_ERROR_WANT_X509_LOOKUP => ErrorClass::WantX509Lookup,
            ffi::SSL_ERROR_SYSCALL => ErrorClass::Syscall,
            ffi::SSL_ERROR_ZERO_RETURN => ErrorClass::ZeroReturn,
            ffi::SSL_ERROR_WANT_CONNECT => ErrorClass::WantConnect,
            ffi::SSL_ERROR_WANT_ACCEPT => ErrorClass::WantAccept,
            other => ErrorClass::Other(other),
        }
    }

    pub fn as_raw(self) -> c_int {
        match self {
            ErrorClass::None => ffi::SSL_ERROR_NONE,
            ErrorClass::Ssl => ffi::SSL_ERROR_SSL,
            ErrorClass::WantRead => ffi::SSL_ERROR_WANT_READ,
            ErrorClass::WantWrite => ffi::SSL_ERROR_WANT_WRITE,
            ErrorClass::WantX509Lookup => ffi::SSL_ERROR_WANT_X509_LOOKUP,
            ErrorClass::Syscall => ffi::SSL_ERROR_SYSCALL,
            ErrorClass::ZeroReturn => ffi::SSL_ERROR_ZERO_RETURN,
            ErrorClass::WantConnect => ffi::SSL_ERROR_WANT_CONNECT,
            ErrorClass::WantAccept => ffi::SSL_ERROR_WANT_ACCEPT,
            ErrorClass::Other(code) => code,
        }
    }

    /// Whether the operation would succeed if retried once the transport is ready
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            ErrorClass::WantRead
                | ErrorClass::WantWrite
                | ErrorClass::WantX509Lookup
                | ErrorClass::WantConnect
                | ErrorClass::WantAccept
        )
    }
}

/// TLS errors
#[derive(Debug, thiserror::Error)]
pub enum TlsError {
    /// A TLS library call failed. `op` names the call.
    #[error("{op} failed: {detail}")]
    Ssl {
        op: &'static str,
        class: Option<ErrorClass>,
        detail: String,
    },

    #[error("SecureSocket: constructor must be passed valid SSL structure")]
    InvalidSession,

    #[error("OpenSSL error: {0}")]
    OpenSsl(#[from] openssl::error::ErrorStack),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TLS version: {0}")]
    InvalidVersion(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Certificate error: {0}")]
    Certificate(String),
}

impl TlsError {
    pub(crate) fn ssl(op: &'static str, detail: impl Into<String>) -> Self {
        TlsError::Ssl {
            op,
            class: None,
            detail: detail.into(),
        }
    }

    /// Name of the failed library operation, for library-operation failures
    pub fn op(&self) -> Option<&'static str> {
        match self {
            TlsError::Ssl { op, .. } => Some(op),
            _ => None,
        }
    }

    /// Classification captured when a session operation failed
    pub fn class(&self) -> Option<ErrorClass> {
        match self {
            TlsError::Ssl { class, .. } => *class,
            _ => None,
        }
    }
}
