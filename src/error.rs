//! Error taxonomy for the server core.
//!
//! Bind-time errors (`BindConflict`, `Credential`) abort the whole start
//! sequence under strict TLS handling and are reported exactly once through
//! the `start` outcome. Admission vetoes are connection-local and never reach
//! lifecycle state. A session-ticket decrypt failure under a rotated seed is
//! deliberately *not* represented here: it falls back to a full handshake
//! with no visible error.

use crate::security::admission::AdmissionRejected;

/// Errors surfaced by the server core.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// The bind target is already in use, within this server or by another
    /// process.
    #[error("bind conflict on {addr}: {source}")]
    BindConflict {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// Certificate or private key material is unreadable, unparseable, or
    /// inconsistent (key does not match chain).
    #[error("invalid TLS credentials: {0}")]
    Credential(String),

    /// Aggregate failure while bringing listeners up; already-bound sockets
    /// have been released.
    #[error("listener failed to start: {0}")]
    ListenerStart(String),

    /// A connection was vetoed by the admission policy. Local to the
    /// connection; never propagates into lifecycle state.
    #[error(transparent)]
    Admission(#[from] AdmissionRejected),

    /// Configuration was rejected by semantic validation.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// An operation was invoked in a lifecycle state that does not permit it
    /// (e.g. `start` called twice).
    #[error("invalid lifecycle transition: {0}")]
    Lifecycle(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
