//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the server
//! core. All types derive Serde traits for deserialization from config files,
//! and can equally be constructed in code by an embedder.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Root configuration for the server core.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen endpoints. One listener is created per spec.
    pub listeners: Vec<ListenSpec>,

    /// Number of concurrent accept tasks per listener.
    pub workers: usize,

    /// TLS handshake timeout in seconds. Carried for the transport layer;
    /// the core does not enforce it.
    pub handshake_timeout_secs: u64,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listeners: Vec::new(),
            workers: 1,
            handshake_timeout_secs: 10,
            observability: ObservabilityConfig::default(),
        }
    }
}

/// A single listen endpoint. Immutable after bind.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenSpec {
    /// Bind address. Port 0 requests an ephemeral port; the resolved
    /// address is reported after bind.
    pub addr: SocketAddr,

    /// Protocol served on this endpoint.
    pub protocol: Protocol,

    /// TLS identities for this listener. Empty = plaintext, one = single
    /// identity, several = SNI-multiplexed.
    pub tls: Vec<TlsSettings>,

    /// Accept plaintext connections on a TLS-configured port. The first
    /// bytes of each transport are inspected and non-TLS transports are
    /// routed as plaintext. Distinct from `strict_tls`, which governs
    /// credential *loading* failures at bind time.
    pub allow_insecure_on_secure_port: bool,

    /// When true (the default), a credential load failure at bind time is
    /// fatal to the whole bind call. When false, this listener degrades to
    /// plaintext-only operation with a warning.
    pub strict_tls: bool,

    /// Session-ticket seed material for this listener's TLS identities.
    /// Absent means rustls' default resumption behavior.
    pub ticket_seeds: Option<TicketSeedSet>,

    /// Maximum concurrent connections accepted on this listener
    /// (backpressure).
    pub max_connections: usize,
}

impl Default for ListenSpec {
    fn default() -> Self {
        Self {
            addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 8080),
            protocol: Protocol::Http,
            tls: Vec::new(),
            allow_insecure_on_secure_port: false,
            strict_tls: true,
            ticket_seeds: None,
            max_connections: 10_000,
        }
    }
}

impl ListenSpec {
    /// A plaintext HTTP spec on the given address.
    pub fn http(addr: SocketAddr) -> Self {
        Self {
            addr,
            ..Self::default()
        }
    }

    /// A TLS spec on the given address with a single identity.
    pub fn https(addr: SocketAddr, tls: TlsSettings) -> Self {
        Self {
            addr,
            tls: vec![tls],
            ..Self::default()
        }
    }
}

/// Protocol tag for a listen endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// HTTP/1.1, upgrading to HTTP/2 when negotiated via ALPN.
    #[default]
    Http,
    /// HTTP/2 only.
    Http2,
}

/// One TLS identity: certificate chain, private key, client trust settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TlsSettings {
    /// Certificate chain, PEM.
    pub cert: PemSource,

    /// Private key, PEM (PKCS#8, PKCS#1 or SEC1).
    pub key: PemSource,

    /// Trust anchors for client certificates, PEM. Required for `Optional`
    /// and `Required` verification.
    #[serde(default)]
    pub client_ca: Option<PemSource>,

    /// Client certificate verification mode.
    #[serde(default)]
    pub verification: ClientVerification,

    /// Marks the SNI-less fallback identity for its listener. At most one
    /// identity per listener may carry this flag.
    #[serde(default)]
    pub is_default: bool,
}

impl TlsSettings {
    /// An identity loaded from PEM files, flagged as the default.
    pub fn from_files(cert: impl Into<PathBuf>, key: impl Into<PathBuf>) -> Self {
        Self {
            cert: PemSource::Path(cert.into()),
            key: PemSource::Path(key.into()),
            client_ca: None,
            verification: ClientVerification::default(),
            is_default: true,
        }
    }

    /// An identity from in-memory PEM, flagged as the default.
    pub fn from_pem(cert_pem: impl Into<String>, key_pem: impl Into<String>) -> Self {
        Self {
            cert: PemSource::Inline {
                pem: cert_pem.into(),
            },
            key: PemSource::Inline { pem: key_pem.into() },
            client_ca: None,
            verification: ClientVerification::default(),
            is_default: true,
        }
    }

    pub fn with_client_ca(mut self, ca: PemSource, verification: ClientVerification) -> Self {
        self.client_ca = Some(ca);
        self.verification = verification;
        self
    }

    pub fn default_identity(mut self, is_default: bool) -> Self {
        self.is_default = is_default;
        self
    }
}

/// Where PEM material comes from: a file path (reloadable) or inline bytes.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum PemSource {
    Path(PathBuf),
    Inline { pem: String },
}

impl PemSource {
    /// Read the PEM bytes, re-reading files on every call so path sources
    /// pick up rotated content.
    pub fn read(&self) -> std::io::Result<Vec<u8>> {
        match self {
            PemSource::Path(path) => std::fs::read(path),
            PemSource::Inline { pem } => Ok(pem.clone().into_bytes()),
        }
    }

    /// The backing path, if this source is file-based.
    pub fn path(&self) -> Option<&PathBuf> {
        match self {
            PemSource::Path(path) => Some(path),
            PemSource::Inline { .. } => None,
        }
    }
}

/// Client certificate verification mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ClientVerification {
    /// No client certificate requested.
    #[default]
    None,
    /// Client certificate requested; the handshake proceeds without one.
    Optional,
    /// Client certificate required; the handshake fails without one.
    Required,
}

/// Ordered seed material for session-ticket encryption keys.
///
/// Tickets are always minted under the first `current` seed. Tickets minted
/// under any seed still present in the set (current, previous or next)
/// decrypt successfully and resume the session. Rotating a seed out of the
/// set invalidates its tickets, forcing a full handshake — that is the
/// point of rotation, not a failure mode.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct TicketSeedSet {
    pub current: Vec<String>,
    pub previous: Vec<String>,
    pub next: Vec<String>,
}

impl TicketSeedSet {
    /// A seed set with a single current seed.
    pub fn current(seed: impl Into<String>) -> Self {
        Self {
            current: vec![seed.into()],
            ..Self::default()
        }
    }

    /// All seeds in decrypt-acceptance order: current, previous, next.
    pub fn all_seeds(&self) -> impl Iterator<Item = &str> {
        self.current
            .iter()
            .chain(self.previous.iter())
            .chain(self.next.iter())
            .map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.current.is_empty() && self.previous.is_empty() && self.next.is_empty()
    }
}

/// Observability settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}
