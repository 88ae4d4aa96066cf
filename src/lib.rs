//! Harbor — embeddable HTTP(S) server core.
//!
//! Harbor owns everything *below* the HTTP protocol layer: listen sockets,
//! the start/stop lifecycle, TLS identity (with hot reload and session-ticket
//! rotation), and per-connection admission. HTTP/1.1 and HTTP/2 wire handling
//! is delegated to hyper; request semantics are delegated to the embedder's
//! handler chain.
//!
//! # Architecture Overview
//!
//! ```text
//!                  ┌──────────────────────────────────────────────────────┐
//!                  │                     SERVER CORE                      │
//!                  │                                                      │
//!   ListenSpecs    │  ┌─────────┐   ┌──────────┐   ┌───────────────┐      │
//!   ───────────────┼─▶│   net   │──▶│   net    │──▶│   security    │      │
//!                  │  │ socket  │   │ listener │   │  admission    │      │
//!                  │  └─────────┘   └────┬─────┘   └──────┬────────┘      │
//!                  │                     │                │               │
//!                  │                ┌────▼─────┐    ┌─────▼────────┐      │
//!                  │                │   tls    │    │   handler    │      │
//!                  │                │ identity │    │    chain     │──▶ hyper
//!                  │                │ tickets  │    └──────────────┘      │
//!                  │                └──────────┘                          │
//!                  │                                                      │
//!                  │  ┌────────────────────────────────────────────────┐  │
//!                  │  │             Cross-Cutting Concerns             │  │
//!                  │  │  ┌─────────┐ ┌───────────┐ ┌────────────────┐  │  │
//!                  │  │  │ config  │ │ lifecycle │ │ observability  │  │  │
//!                  │  │  └─────────┘ └───────────┘ └────────────────┘  │  │
//!                  │  └────────────────────────────────────────────────┘  │
//!                  └──────────────────────────────────────────────────────┘
//! ```
//!
//! # Lifecycle
//!
//! A [`Server`] moves through `Created → Binding → Running → Stopping →
//! Stopped` (or `FailedToStart`). `bind` acquires every socket before any of
//! them starts listening, so a late bind failure never leaves an earlier
//! socket half-initialized. `start` resolves exactly once with the outcome;
//! `stop` is idempotent and safe to call concurrently from any task.
//!
//! # TLS hot reload
//!
//! Certificate material and session-ticket key rings live behind atomic
//! snapshot swaps. Updates apply to new handshakes immediately; in-flight
//! handshakes and established connections are never dropped by a swap.

// Core subsystems
pub mod config;
pub mod handler;
pub mod net;
pub mod tls;

// Cross-cutting concerns
pub mod error;
pub mod lifecycle;
pub mod observability;
pub mod security;

pub use config::schema::{ListenSpec, Protocol, ServerConfig, TicketSeedSet, TlsSettings};
pub use error::ServerError;
pub use handler::{Handler, HandlerChain, HandlerFactory};
pub use lifecycle::{LifecycleState, Server, ServerBuilder};
pub use net::connection::AdmittedConnection;
pub use security::admission::{AdmissionPolicy, AdmissionRejected};
