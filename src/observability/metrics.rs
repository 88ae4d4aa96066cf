//! Connection metrics.
//!
//! # Metrics
//! - `harbor_connections_accepted_total` (counter): transports accepted
//! - `harbor_connections_admitted_total` (counter): transports past admission
//! - `harbor_connections_rejected_total` (counter): admission vetoes
//! - `harbor_tls_handshake_failures_total` (counter): failed handshakes
//! - `harbor_active_connections` (gauge): currently tracked connections

pub fn record_accepted() {
    metrics::counter!("harbor_connections_accepted_total").increment(1);
}

pub fn record_admitted() {
    metrics::counter!("harbor_connections_admitted_total").increment(1);
}

pub fn record_rejected() {
    metrics::counter!("harbor_connections_rejected_total").increment(1);
}

pub fn record_handshake_failure() {
    metrics::counter!("harbor_tls_handshake_failures_total").increment(1);
}

pub fn connection_opened() {
    metrics::gauge!("harbor_active_connections").increment(1.0);
}

pub fn connection_closed() {
    metrics::gauge!("harbor_active_connections").decrement(1.0);
}
