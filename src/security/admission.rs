//! Connection admission: a pluggable policy gate ahead of protocol dispatch.
//!
//! The policy runs once per accepted transport, after the optional TLS
//! handshake and before any request bytes are parsed. A veto closes the
//! transport; the peer sees a closed connection and no response, and the
//! handler chain never observes the connection.
//!
//! The call is synchronous on the connection's accept context. A slow
//! policy directly delays dispatch on that context and, under the
//! listener's connection limit, throttles its accept rate. That is the
//! intended backpressure point; implementations that need I/O should
//! consult pre-computed state instead.

use rustls_pki_types::CertificateDer;

use crate::net::connection::AdmittedConnection;

/// Policy veto. Local to one connection; never reaches lifecycle state.
#[derive(Debug, Clone, thiserror::Error)]
#[error("admission rejected: {reason}")]
pub struct AdmissionRejected {
    pub reason: String,
}

impl AdmissionRejected {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Admission predicate over an accepted transport's metadata.
///
/// Absence of a policy means unconditional admission.
pub trait AdmissionPolicy: Send + Sync {
    fn admit(&self, conn: &AdmittedConnection) -> Result<(), AdmissionRejected>;
}

impl<F> AdmissionPolicy for F
where
    F: Fn(&AdmittedConnection) -> Result<(), AdmissionRejected> + Send + Sync,
{
    fn admit(&self, conn: &AdmittedConnection) -> Result<(), AdmissionRejected> {
        self(conn)
    }
}

/// A policy admitting only peers whose certificate subject common name
/// matches `expected`. Connections without a peer certificate are vetoed.
pub fn require_common_name(expected: impl Into<String>) -> impl AdmissionPolicy {
    let expected = expected.into();
    move |conn: &AdmittedConnection| {
        let cn = conn
            .peer_common_name()
            .ok_or_else(|| AdmissionRejected::new("client certificate is missing"))?;
        if cn == expected {
            Ok(())
        } else {
            Err(AdmissionRejected::new(format!(
                "client certificate CN {cn:?} is not authorized"
            )))
        }
    }
}

/// Extract the subject common name from a DER certificate. Parsing is
/// delegated to the certificate collaborator; unparseable input yields
/// `None` rather than an error.
pub fn certificate_common_name(cert: &CertificateDer<'_>) -> Option<String> {
    use x509_parser::prelude::*;

    let (_, parsed) = X509Certificate::from_der(cert.as_ref()).ok()?;
    parsed
        .subject()
        .iter_common_name()
        .next()
        .and_then(|attr| attr.as_str().ok())
        .map(str::to_string)
}
