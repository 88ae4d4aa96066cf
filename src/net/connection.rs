//! Connection identity and lifetime tracking.
//!
//! # Responsibilities
//! - Generate unique connection IDs for tracing
//! - Record per-connection admission metadata (peer, protocol, certificate)
//! - Track active connections so shutdown can report what is still in flight

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use rustls_pki_types::CertificateDer;

/// Global atomic counter for connection IDs.
/// Relaxed ordering is sufficient since we only need uniqueness.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for an accepted connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// How the transport is secured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportSecurity {
    /// No transport security.
    Plaintext,
    /// TLS-terminated transport.
    Tls,
}

impl std::fmt::Display for TransportSecurity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportSecurity::Plaintext => write!(f, "plaintext"),
            TransportSecurity::Tls => write!(f, "tls"),
        }
    }
}

/// Metadata for a transport that completed accept (and handshake, when
/// secured). Handed to the admission policy before any bytes are parsed and
/// shared read-only with the handler chain afterwards.
#[derive(Debug)]
pub struct AdmittedConnection {
    pub id: ConnectionId,
    pub peer_addr: SocketAddr,
    pub security: TransportSecurity,
    /// ALPN protocol negotiated during the handshake, when secured.
    pub alpn: Option<Vec<u8>>,
    /// SNI server name offered by the peer, when secured.
    pub server_name: Option<String>,
    /// The peer's end-entity certificate, when one was presented.
    pub peer_certificate: Option<CertificateDer<'static>>,
}

impl AdmittedConnection {
    /// The negotiated ALPN protocol as text, if any.
    pub fn alpn_str(&self) -> Option<&str> {
        self.alpn.as_deref().and_then(|p| std::str::from_utf8(p).ok())
    }

    /// The subject common name of the peer certificate, if one was presented
    /// and parses. Parsing is delegated to the certificate collaborator.
    pub fn peer_common_name(&self) -> Option<String> {
        let der = self.peer_certificate.as_ref()?;
        crate::security::admission::certificate_common_name(der)
    }
}

/// Tracks active connections for shutdown observability.
#[derive(Debug, Clone, Default)]
pub struct ConnectionTracker {
    active_count: Arc<AtomicU64>,
}

impl ConnectionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new active connection. Returns a guard that decrements on drop.
    pub fn track(&self, id: ConnectionId) -> ConnectionGuard {
        self.active_count.fetch_add(1, Ordering::SeqCst);
        crate::observability::metrics::connection_opened();
        ConnectionGuard {
            active_count: Arc::clone(&self.active_count),
            id,
        }
    }

    pub fn active_count(&self) -> u64 {
        self.active_count.load(Ordering::SeqCst)
    }
}

/// Guard that tracks a connection's lifetime.
#[derive(Debug)]
pub struct ConnectionGuard {
    active_count: Arc<AtomicU64>,
    id: ConnectionId,
}

impl ConnectionGuard {
    pub fn id(&self) -> ConnectionId {
        self.id
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.active_count.fetch_sub(1, Ordering::SeqCst);
        crate::observability::metrics::connection_closed();
        tracing::trace!(connection_id = %self.id, "Connection closed");
    }
}
