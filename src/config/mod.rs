//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → ServerConfig (validated, immutable)
//!     → consumed by the lifecycle controller at bind time
//! ```
//!
//! # Design Decisions
//! - Listen specs are immutable once bound; changes require a new server
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks and
//!   reports every violation, not just the first

pub mod loader;
pub mod schema;
pub mod validation;

pub use schema::ListenSpec;
pub use schema::ServerConfig;
pub use schema::TicketSeedSet;
pub use schema::TlsSettings;
