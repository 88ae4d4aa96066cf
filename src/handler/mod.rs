//! Request handler chain subsystem.
//!
//! # Data Flow
//! ```text
//! HandlerChain::builder()
//!     .add(factory_a)      ← outermost decorator
//!     .add(factory_b)
//!     .build()
//!     → composed once at configuration time (right-to-left)
//!     → one Arc<dyn Handler> shared read-only by every connection
//! ```
//!
//! # Design Decisions
//! - Explicit decorator composition over a list of factories, not
//!   subclassing: each factory wraps the handler produced after it
//! - Composition is pure; lifecycle side effects happen only through the
//!   on_server_start / on_server_stop hooks
//! - Hooks run in chain order on start and reverse order on stop

pub mod chain;

pub use chain::{Handler, HandlerChain, HandlerChainBuilder, HandlerFactory, Request, Response};
