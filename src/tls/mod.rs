//! TLS over raw sockets
//!
//! # Architecture
//!
//! 1. `init` performs the one-time, thread-safe setup of the TLS library's
//!    global state (startup routine, lock slots, thread-identity callback)
//! 2. `TlsContext` owns a library configuration handle and spawns sessions
//! 3. `SecureSocket` binds one session to one raw socket and exposes
//!    handshake, record-sized reads and whole-payload writes
//!
//! The TLS library is reached through the `TlsLibrary` and `SessionHandle`
//! traits; `OpenSsl` is the implementation used by default.
//!
//! # Examples
//!
//! ## Client
//!
//! ```no_run
//! use secure_socket::net::TcpSocket;
//! use secure_socket::tls::TlsContext;
//!
//! let ctx = TlsContext::create().unwrap();
//! let socket = TcpSocket::connect("127.0.0.1:4433".parse().unwrap()).unwrap();
//! let mut sock = ctx.new_secure_socket(socket).unwrap();
//!
//! sock.connect().unwrap();
//! sock.write(b"ping").unwrap();
//! let reply = sock.read().unwrap();
//! ```
//!
//! ## Server
//!
//! ```no_run
//! use secure_socket::net::TcpSocket;
//! use secure_socket::tls::{TlsContext, TlsVersion};
//! use std::net::TcpListener;
//!
//! let ctx = TlsContext::server()
//!     .version_range(TlsVersion::Tls12, TlsVersion::Tls13)
//!     .build()
//!     .unwrap();
//!
//! let listener = TcpListener::bind("127.0.0.1:4433").unwrap();
//! let (stream, _) = listener.accept().unwrap();
//! let mut sock = ctx.new_secure_socket(TcpSocket::from(stream)).unwrap();
//!
//! // Drop the connection if the handshake fails
//! if sock.accept().is_ok() {
//!     let request = sock.read().unwrap();
//!     sock.write(&request).unwrap();
//! }
//! ```

pub mod builtin_cert;
pub mod config;
pub mod error;
pub mod init;
pub mod library;
pub mod session;

pub use config::{ContextConfig, Role, TlsContext, TlsVersion};
pub use error::{ErrorClass, TlsError};
pub use init::{global_context, CryptoLibraryState};
pub use library::{OpenSsl, SessionHandle, TlsLibrary};
pub use session::{SecureSocket, SessionState, MAX_RECORD_LEN};

/// Result type for TLS operations
pub type Result<T> = std::result::Result<T, TlsError>;
