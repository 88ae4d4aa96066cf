//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Accepted transport (post-handshake):
//!     → admission.rs (policy predicate over peer identity)
//!     → veto: transport closed, nothing dispatched
//!     → admit: hand off to the protocol layer
//! ```
//!
//! # Design Decisions
//! - Fail closed: a policy error closes the connection
//! - The policy sees transport metadata only; no request bytes are parsed
//!   before admission

pub mod admission;
