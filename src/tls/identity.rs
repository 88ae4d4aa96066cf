//! TLS identity store: certificate material with atomic hot replacement.
//!
//! # Responsibilities
//! - Load and validate certificate/key pairs from configured sources
//! - Map SNI names (subject CN + DNS SANs) to identities, with a flagged
//!   default as the SNI-less fallback
//! - Swap the whole identity set atomically; readers are wait-free
//! - Assemble the rustls server configuration for a listener
//!
//! The store is the sole writer of its snapshot. Listeners share it
//! read-only through the certificate resolver consulted per handshake, so a
//! swap is visible to the next handshake without touching the listener.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use arc_swap::ArcSwap;
use rustls::crypto::CryptoProvider;
use rustls::server::{ClientHello, ProducesTickets, ResolvesServerCert, WebPkiClientVerifier};
use rustls::sign::CertifiedKey;
use rustls::RootCertStore;
use rustls_pki_types::CertificateDer;

use crate::config::schema::{ClientVerification, TicketSeedSet, TlsSettings};
use crate::error::ServerError;
use crate::tls::ticket::RollingTicketer;

/// Immutable view of a listener's identities at one point in time.
struct IdentitySnapshot {
    default_identity: Option<Arc<CertifiedKey>>,
    by_name: HashMap<String, Arc<CertifiedKey>>,
}

impl IdentitySnapshot {
    fn resolve(&self, server_name: Option<&str>) -> Option<Arc<CertifiedKey>> {
        if let Some(name) = server_name {
            if let Some(identity) = self.by_name.get(&name.to_ascii_lowercase()) {
                return Some(Arc::clone(identity));
            }
        }
        self.default_identity.clone()
    }
}

/// Per-listener TLS identity store with copy-on-write replacement.
///
/// Two swappable layers: the identity snapshot consulted by the certificate
/// resolver (cert/key swaps need no configuration rebuild), and the
/// assembled rustls configuration itself, reassembled when a reload may
/// change the client-CA verifier baked into it. Listeners read the active
/// configuration per accepted transport.
pub struct TlsIdentityStore {
    snapshot: Arc<ArcSwap<IdentitySnapshot>>,
    active: ArcSwap<rustls::ServerConfig>,
    ticketer: Arc<RollingTicketer>,
    sources: Vec<TlsSettings>,
    alpn: Vec<Vec<u8>>,
    provider: Arc<CryptoProvider>,
}

impl std::fmt::Debug for TlsIdentityStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let snapshot = self.snapshot.load();
        f.debug_struct("TlsIdentityStore")
            .field("identities", &snapshot.by_name.len())
            .field("has_default", &snapshot.default_identity.is_some())
            .finish_non_exhaustive()
    }
}

impl TlsIdentityStore {
    /// Load every configured identity and build the store, including the
    /// assembled rustls configuration (ALPN per the listener's protocol).
    /// Any unreadable or inconsistent material fails the whole load; the
    /// caller decides whether that is fatal (strict) or degrades the
    /// listener (non-strict).
    pub fn from_settings(
        settings: &[TlsSettings],
        seeds: Option<&TicketSeedSet>,
        alpn: Vec<Vec<u8>>,
    ) -> Result<Arc<Self>, ServerError> {
        let provider = Arc::new(rustls::crypto::aws_lc_rs::default_provider());
        let snapshot = Arc::new(ArcSwap::from_pointee(build_snapshot(&provider, settings)?));

        let ticketer = match seeds {
            Some(seeds) => RollingTicketer::from_seeds(seeds)?,
            None => RollingTicketer::random()?,
        };

        let config = assemble_config(&provider, settings, &snapshot, &ticketer, alpn.clone())?;

        Ok(Arc::new(Self {
            snapshot,
            active: ArcSwap::from_pointee(config),
            ticketer,
            sources: settings.to_vec(),
            alpn,
            provider,
        }))
    }

    /// Install a new certificate/key pair as this store's identity set.
    /// The pair is validated before anything is replaced; on success the
    /// next handshake uses it, while handshakes already in flight keep the
    /// identity they resolved.
    pub fn set_certificate(&self, cert_pem: &[u8], key_pem: &[u8]) -> Result<(), ServerError> {
        let (identity, names) = load_certified_key(&self.provider, cert_pem, key_pem)?;

        let mut by_name = HashMap::new();
        for name in names {
            by_name.insert(name, Arc::clone(&identity));
        }
        self.snapshot.store(Arc::new(IdentitySnapshot {
            default_identity: Some(identity),
            by_name,
        }));

        tracing::info!("TLS certificate replaced");
        Ok(())
    }

    /// Re-read every configured source and swap in the result. File-backed
    /// sources pick up rotated content, and because the client-CA set is
    /// baked into the verifier, the whole rustls configuration is
    /// reassembled as well. Both swaps happen only after every load
    /// succeeded; a failure leaves the current identity untouched.
    pub fn update_credentials(&self) -> Result<(), ServerError> {
        let snapshot = build_snapshot(&self.provider, &self.sources)?;
        let config = assemble_config(
            &self.provider,
            &self.sources,
            &self.snapshot,
            &self.ticketer,
            self.alpn.clone(),
        )?;

        self.snapshot.store(Arc::new(snapshot));
        self.active.store(Arc::new(config));
        tracing::info!("TLS credentials reloaded");
        Ok(())
    }

    /// Atomically replace the session-ticket key ring.
    pub fn update_ticket_seeds(&self, seeds: &TicketSeedSet) -> Result<(), ServerError> {
        self.ticketer.rotate(seeds)
    }

    /// Resolve an identity the way the handshake resolver does: SNI exact
    /// match, else the default identity, else none (handshake aborts).
    pub fn resolve(&self, server_name: Option<&str>) -> Option<Arc<CertifiedKey>> {
        self.snapshot.load().resolve(server_name)
    }

    /// File paths backing this store's sources, for change watching.
    pub fn watch_paths(&self) -> Vec<PathBuf> {
        let mut paths = Vec::new();
        for source in &self.sources {
            for pem in [Some(&source.cert), Some(&source.key), source.client_ca.as_ref()]
                .into_iter()
                .flatten()
            {
                if let Some(path) = pem.path() {
                    paths.push(path.clone());
                }
            }
        }
        paths
    }

    /// The rustls configuration currently served to new handshakes. Cheap
    /// per-accept read; the embedded resolver and ticketer follow their own
    /// swaps, the configuration itself is replaced by
    /// [`TlsIdentityStore::update_credentials`].
    pub fn server_config(&self) -> Arc<rustls::ServerConfig> {
        self.active.load_full()
    }
}

fn assemble_config(
    provider: &Arc<CryptoProvider>,
    sources: &[TlsSettings],
    snapshot: &Arc<ArcSwap<IdentitySnapshot>>,
    ticketer: &Arc<RollingTicketer>,
    alpn: Vec<Vec<u8>>,
) -> Result<rustls::ServerConfig, ServerError> {
    let builder = rustls::ServerConfig::builder_with_provider(Arc::clone(provider))
        .with_safe_default_protocol_versions()
        .map_err(|e| ServerError::Credential(e.to_string()))?;

    let builder = match build_client_verifier(provider, sources)? {
        Some(verifier) => builder.with_client_cert_verifier(verifier),
        None => builder.with_no_client_auth(),
    };

    let resolver = SnapshotCertResolver {
        snapshot: Arc::clone(snapshot),
    };
    let mut config = builder.with_cert_resolver(Arc::new(resolver));

    let ticketer: Arc<dyn ProducesTickets> = Arc::clone(ticketer);
    config.ticketer = ticketer;
    config.alpn_protocols = alpn;

    Ok(config)
}

fn build_client_verifier(
    provider: &Arc<CryptoProvider>,
    sources: &[TlsSettings],
) -> Result<Option<Arc<dyn rustls::server::danger::ClientCertVerifier>>, ServerError> {
    // One verifier per listener: the first source that configures a
    // client CA wins.
    let found = sources.iter().find_map(|s| match &s.client_ca {
        Some(ca) if s.verification != ClientVerification::None => Some((ca, s.verification)),
        _ => None,
    });
    let (ca_source, verification) = match found {
        Some(found) => found,
        None => return Ok(None),
    };

    let ca_pem = ca_source
        .read()
        .map_err(|e| ServerError::Credential(format!("client CA unreadable: {e}")))?;

    let mut roots = RootCertStore::empty();
    for cert in parse_certs(&ca_pem)? {
        roots
            .add(cert)
            .map_err(|e| ServerError::Credential(format!("invalid client CA: {e}")))?;
    }

    let builder = WebPkiClientVerifier::builder_with_provider(Arc::new(roots), Arc::clone(provider));
    let builder = match verification {
        ClientVerification::Optional => builder.allow_unauthenticated(),
        _ => builder,
    };
    let verifier = builder
        .build()
        .map_err(|e| ServerError::Credential(format!("client verifier: {e}")))?;

    Ok(Some(verifier))
}

/// Resolver consulted by rustls per handshake. Reads the current snapshot;
/// never blocks a writer.
struct SnapshotCertResolver {
    snapshot: Arc<ArcSwap<IdentitySnapshot>>,
}

impl std::fmt::Debug for SnapshotCertResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotCertResolver").finish_non_exhaustive()
    }
}

impl ResolvesServerCert for SnapshotCertResolver {
    fn resolve(&self, client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
        self.snapshot.load().resolve(client_hello.server_name())
    }
}

fn build_snapshot(
    provider: &Arc<CryptoProvider>,
    settings: &[TlsSettings],
) -> Result<IdentitySnapshot, ServerError> {
    let mut default_identity = None;
    let mut by_name = HashMap::new();

    for source in settings {
        let cert_pem = source
            .cert
            .read()
            .map_err(|e| ServerError::Credential(format!("certificate unreadable: {e}")))?;
        let key_pem = source
            .key
            .read()
            .map_err(|e| ServerError::Credential(format!("private key unreadable: {e}")))?;

        let (identity, names) = load_certified_key(provider, &cert_pem, &key_pem)?;

        if source.is_default {
            default_identity = Some(Arc::clone(&identity));
        }
        for name in names {
            by_name.entry(name).or_insert_with(|| Arc::clone(&identity));
        }
    }

    Ok(IdentitySnapshot {
        default_identity,
        by_name,
    })
}

/// Parse and validate one PEM pair into a certified key plus the SNI names
/// it serves (subject CN and DNS SANs, lowercased).
fn load_certified_key(
    provider: &Arc<CryptoProvider>,
    cert_pem: &[u8],
    key_pem: &[u8],
) -> Result<(Arc<CertifiedKey>, Vec<String>), ServerError> {
    let chain = parse_certs(cert_pem)?;
    if chain.is_empty() {
        return Err(ServerError::Credential("no certificates in PEM".into()));
    }

    let key_der = rustls_pemfile::private_key(&mut &key_pem[..])
        .map_err(|e| ServerError::Credential(format!("private key parse: {e}")))?
        .ok_or_else(|| ServerError::Credential("no private key in PEM".into()))?;

    let signing_key = provider
        .key_provider
        .load_private_key(key_der)
        .map_err(|e| ServerError::Credential(format!("unsupported private key: {e}")))?;

    let names = identity_names(&chain[0]);
    let certified = CertifiedKey::new(chain, signing_key);

    match certified.keys_match() {
        Ok(()) => {}
        Err(rustls::Error::InconsistentKeys(rustls::InconsistentKeys::Unknown)) => {
            // The key type cannot expose its public half; accept it.
        }
        Err(e) => {
            return Err(ServerError::Credential(format!(
                "certificate/key mismatch: {e}"
            )))
        }
    }

    Ok((Arc::new(certified), names))
}

fn parse_certs(pem: &[u8]) -> Result<Vec<CertificateDer<'static>>, ServerError> {
    rustls_pemfile::certs(&mut &pem[..])
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ServerError::Credential(format!("certificate parse: {e}")))
}

/// Names the end-entity certificate answers for: subject common name plus
/// DNS subject alternative names. Extraction is delegated to the
/// certificate-parsing collaborator.
fn identity_names(cert: &CertificateDer<'_>) -> Vec<String> {
    use x509_parser::prelude::*;

    let mut names = Vec::new();
    let parsed = match X509Certificate::from_der(cert.as_ref()) {
        Ok((_, parsed)) => parsed,
        Err(_) => return names,
    };

    if let Some(cn) = parsed
        .subject()
        .iter_common_name()
        .next()
        .and_then(|attr| attr.as_str().ok())
    {
        names.push(cn.to_ascii_lowercase());
    }

    if let Ok(Some(san)) = parsed.subject_alternative_name() {
        for general_name in &san.value.general_names {
            if let GeneralName::DNSName(dns) = general_name {
                let dns = dns.to_ascii_lowercase();
                if !names.contains(&dns) {
                    names.push(dns);
                }
            }
        }
    }

    names
}
