//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! bind:
//!     Every spec → bound socket (none listening yet)
//!     Any failure → release all, FailedToStart
//!
//! start:
//!     Bound sockets → listening → accept loops spawned
//!     Handler factories notified in chain order
//!     Outcome reported exactly once
//!
//! stop:
//!     Shutdown broadcast → accept loops drain → sockets closed
//!     Handler factories notified in reverse order
//!     Repeat calls observe the terminal state and return
//! ```
//!
//! # Design Decisions
//! - One async mutex serializes every transition; a stop issued during
//!   start waits for start to settle instead of interleaving with it
//! - State is observable through a watch channel; the state machine is the
//!   contract, not any particular threading primitive
//! - Stopping never raises, even when invoked redundantly

pub mod server;
pub mod shutdown;
pub mod state;

pub use server::{Server, ServerBuilder};
pub use shutdown::Shutdown;
pub use state::LifecycleState;
