//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! ListenSpec (+ optional adopted descriptor)
//!     → socket.rs (bind, NOT yet listening)
//!     → listener.rs (listen + accept loop, connection limits)
//!     → optional TLS handshake (tls subsystem)
//!     → admission gate (security subsystem)
//!     → Hand off to the protocol layer (hyper)
//! ```
//!
//! # Design Decisions
//! - Bind and listen are separate phases so every spec binds before any
//!   listener accepts traffic
//! - Adopted descriptors keep their OS identity end to end
//! - Bounded accept concurrency prevents resource exhaustion
//! - Each connection tracked for shutdown observability

pub mod connection;
pub mod listener;
pub mod socket;
