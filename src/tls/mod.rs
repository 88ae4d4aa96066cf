//! TLS identity subsystem.
//!
//! # Data Flow
//! ```text
//! TlsSettings (config)
//!     → identity.rs (load PEM, validate pair, build snapshot)
//!     → ArcSwap<IdentitySnapshot> (atomic replacement, wait-free reads)
//!     → rustls cert resolver consulted per handshake (SNI → identity)
//!
//! TicketSeedSet
//!     → ticket.rs (derive key ring, encrypt under current, decrypt under any retained)
//!     → rotated atomically without touching listeners
//!
//! Cert/key files on disk
//!     → watcher.rs (notify) → identity.rs reload
//! ```
//!
//! # Design Decisions
//! - Identity is an immutable snapshot behind a single atomic reference;
//!   updates swap the snapshot, never mutate shared state in place
//! - In-flight handshakes keep the identity they resolved; no connection is
//!   dropped by a credential swap
//! - A ticket minted under a seed no longer in the set must fail to decrypt;
//!   the client silently falls back to a full handshake

pub mod identity;
pub mod ticket;
pub mod watcher;

pub use identity::TlsIdentityStore;
pub use ticket::RollingTicketer;
pub use watcher::CredentialWatcher;
