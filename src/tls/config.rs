//! TLS configuration and contexts
//!
//! A `ContextConfig` describes how a context should be set up; a
//! `TlsContext` owns the library's configuration handle built from it and
//! hands out one `SecureSocket` per raw socket.

use super::error::TlsError;
use super::init::global_context;
use super::library::{OpenSsl, TlsLibrary};
use super::session::SecureSocket;
use super::Result;
use crate::net::SocketOps;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::str::FromStr;

/// TLS version
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TlsVersion {
    /// TLS 1.0
    Tls10,
    /// TLS 1.1
    Tls11,
    /// TLS 1.2
    Tls12,
    /// TLS 1.3
    Tls13,
}

impl TlsVersion {
    /// Get OpenSSL protocol version constant
    pub fn to_openssl_version(self) -> openssl::ssl::SslVersion {
        use openssl::ssl::SslVersion;
        match self {
            TlsVersion::Tls10 => SslVersion::TLS1,
            TlsVersion::Tls11 => SslVersion::TLS1_1,
            TlsVersion::Tls12 => SslVersion::TLS1_2,
            TlsVersion::Tls13 => SslVersion::TLS1_3,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TlsVersion::Tls10 => "TLSv1.0",
            TlsVersion::Tls11 => "TLSv1.1",
            TlsVersion::Tls12 => "TLSv1.2",
            TlsVersion::Tls13 => "TLSv1.3",
        }
    }
}

impl FromStr for TlsVersion {
    type Err = TlsError;

    /// Case-insensitive: "TLSv1.2", "tls1.2", "TLSv1" ...
    fn from_str(s: &str) -> Result<Self> {
        match s.to_uppercase().as_str() {
            "TLSV1.0" | "TLS1.0" | "TLSV1" | "TLS1" => Ok(TlsVersion::Tls10),
            "TLSV1.1" | "TLS1.1" => Ok(TlsVersion::Tls11),
            "TLSV1.2" | "TLS1.2" => Ok(TlsVersion::Tls12),
            "TLSV1.3" | "TLS1.3" => Ok(TlsVersion::Tls13),
            _ => Err(TlsError::InvalidVersion(s.to_string())),
        }
    }
}

/// Which side of the handshake a context serves
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

/// Context configuration builder
#[derive(Debug, Clone)]
pub struct ContextConfig {
    role: Role,
    min_version: Option<TlsVersion>,
    max_version: Option<TlsVersion>,
    verify_peer: bool,
    identity: Option<Vec<u8>>,
}

impl ContextConfig {
    fn new(role: Role) -> Self {
        ContextConfig {
            role,
            min_version: None,
            max_version: None,
            verify_peer: false,
            identity: None,
        }
    }

    /// Client-style negotiation, any version, no peer verification
    pub fn client() -> Self {
        ContextConfig::new(Role::Client)
    }

    /// Server-style negotiation, presenting the built-in identity by default
    pub fn server() -> Self {
        ContextConfig::new(Role::Server)
    }

    /// Pin a single TLS version
    pub fn version(self, version: TlsVersion) -> Self {
        self.version_range(version, version)
    }

    pub fn version_range(mut self, min: TlsVersion, max: TlsVersion) -> Self {
        self.min_version = Some(min);
        self.max_version = Some(max);
        self
    }

    /// Enable/disable peer certificate verification
    pub fn verify_peer(mut self, verify: bool) -> Self {
        self.verify_peer = verify;
        self
    }

    /// Certificate and private key as one PEM bundle
    pub fn identity_pem(mut self, pem: impl Into<Vec<u8>>) -> Self {
        self.identity = Some(pem.into());
        self
    }

    /// Load certificate and private key from a PEM file
    pub fn identity_file<P: AsRef<Path>>(self, path: P) -> Result<Self> {
        let mut pem = Vec::new();
        File::open(path.as_ref())?.read_to_end(&mut pem)?;
        Ok(self.identity_pem(pem))
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn min_version(&self) -> Option<TlsVersion> {
        self.min_version
    }

    pub fn max_version(&self) -> Option<TlsVersion> {
        self.max_version
    }

    pub fn verifies_peer(&self) -> bool {
        self.verify_peer
    }

    pub fn identity(&self) -> Option<&[u8]> {
        self.identity.as_deref()
    }

    fn validate(&self) -> Result<()> {
        if let (Some(min), Some(max)) = (self.min_version, self.max_version) {
            if min > max {
                return Err(TlsError::InvalidConfig(format!(
                    "minimum version {} is above maximum version {}",
                    min.as_str(),
                    max.as_str()
                )));
            }
        }
        Ok(())
    }

    /// Build an OpenSSL context from this configuration
    pub fn build(self) -> Result<TlsContext> {
        TlsContext::new(self)
    }
}

/// A TLS configuration handle that secure sockets are spawned from
///
/// Each session keeps its own reference to the library context, so the
/// context may be dropped while sessions drawn from it are still alive.
pub struct TlsContext<L: TlsLibrary = OpenSsl> {
    ctx: L::Context,
    role: Role,
}

impl TlsContext {
    /// Client context with default settings
    pub fn create() -> Result<Self> {
        TlsContext::new(ContextConfig::client())
    }

    /// Create a new client configuration builder
    pub fn client() -> ContextConfig {
        ContextConfig::client()
    }

    /// Create a new server configuration builder
    pub fn server() -> ContextConfig {
        ContextConfig::server()
    }
}

impl<L: TlsLibrary> TlsContext<L> {
    /// Initialize the library if needed, then allocate a context
    pub fn new(config: ContextConfig) -> Result<Self> {
        global_context::<L>();
        config.validate()?;

        let ctx = L::new_context(&config)?;
        log::debug!("created {:?} TLS context", config.role());

        Ok(TlsContext {
            ctx,
            role: config.role(),
        })
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Library configuration handle
    pub fn handle(&self) -> &L::Context {
        &self.ctx
    }

    /// Wrap `socket` in a new session drawn from this context
    pub fn new_secure_socket<S: SocketOps>(&self, socket: S) -> Result<SecureSocket<S, L>> {
        SecureSocket::new(socket, L::new_session(&self.ctx))
    }
}
