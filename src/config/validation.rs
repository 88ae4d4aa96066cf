//! Configuration validation.
//!
//! Semantic checks that serde cannot express: duplicate bind targets,
//! identity flag consistency, seed-set sanity. Returns all violations, not
//! just the first, so an operator can fix a config in one pass.

use std::collections::HashSet;
use std::net::SocketAddr;

use crate::config::schema::{ClientVerification, ServerConfig};

/// A single semantic violation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Two specs name the same concrete bind target.
    DuplicateBindAddress(SocketAddr),
    /// More than one TLS identity on a listener is flagged default.
    MultipleDefaultIdentities(SocketAddr),
    /// Ticket seeds configured with an empty `current` set.
    EmptyCurrentSeeds(SocketAddr),
    /// `allow_insecure_on_secure_port` set on a listener with no TLS.
    InsecureFlagWithoutTls(SocketAddr),
    /// Client verification requested without a client CA to verify against.
    VerificationWithoutClientCa(SocketAddr),
    /// Worker count must be at least one accept task per listener.
    ZeroWorkers,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::DuplicateBindAddress(addr) => {
                write!(f, "duplicate bind address {addr}")
            }
            ValidationError::MultipleDefaultIdentities(addr) => {
                write!(f, "listener {addr} has more than one default TLS identity")
            }
            ValidationError::EmptyCurrentSeeds(addr) => {
                write!(f, "listener {addr} has ticket seeds with no current seed")
            }
            ValidationError::InsecureFlagWithoutTls(addr) => {
                write!(
                    f,
                    "listener {addr} allows insecure transports but has no TLS identity"
                )
            }
            ValidationError::VerificationWithoutClientCa(addr) => {
                write!(
                    f,
                    "listener {addr} requests client verification without a client CA"
                )
            }
            ValidationError::ZeroWorkers => write!(f, "workers must be >= 1"),
        }
    }
}

impl std::error::Error for ValidationError {}

/// Validate a configuration, collecting every violation.
pub fn validate_config(config: &ServerConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.workers == 0 {
        errors.push(ValidationError::ZeroWorkers);
    }

    let mut seen: HashSet<SocketAddr> = HashSet::new();
    for spec in &config.listeners {
        // Ephemeral requests (port 0) never conflict with each other.
        if spec.addr.port() != 0 && !seen.insert(spec.addr) {
            errors.push(ValidationError::DuplicateBindAddress(spec.addr));
        }

        let defaults = spec.tls.iter().filter(|t| t.is_default).count();
        if defaults > 1 {
            errors.push(ValidationError::MultipleDefaultIdentities(spec.addr));
        }

        if spec.allow_insecure_on_secure_port && spec.tls.is_empty() {
            errors.push(ValidationError::InsecureFlagWithoutTls(spec.addr));
        }

        if let Some(seeds) = &spec.ticket_seeds {
            if seeds.current.is_empty() {
                errors.push(ValidationError::EmptyCurrentSeeds(spec.addr));
            }
        }

        for tls in &spec.tls {
            if tls.verification != ClientVerification::None && tls.client_ca.is_none() {
                errors.push(ValidationError::VerificationWithoutClientCa(spec.addr));
                break;
            }
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
