//! Session-ticket encryption with rolling, seed-derived keys.
//!
//! Every seed in the configured set derives one ticket key: a 16-byte key
//! name (so tickets are self-describing) plus an AES-256-GCM key. Tickets
//! are minted under the first `current` seed and accepted under any seed
//! still present in the set. Swapping the set atomically replaces the ring;
//! tickets under dropped seeds stop decrypting, which forces those clients
//! through a full handshake.

use std::sync::Arc;

use arc_swap::ArcSwap;
use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM, NONCE_LEN};
use ring::hkdf::{Salt, HKDF_SHA256};
use ring::rand::{SecureRandom, SystemRandom};

use crate::config::schema::TicketSeedSet;
use crate::error::ServerError;

/// Length of the key-name prefix on every ticket.
pub const TICKET_KEY_NAME_LEN: usize = 16;

/// Ticket lifetime hint reported to clients, in seconds.
const TICKET_LIFETIME_SECS: u32 = 6 * 60 * 60;

const KEY_DERIVATION_SALT: &[u8] = b"harbor/session-ticket/v1";

/// One derived ticket key.
struct TicketKey {
    name: [u8; TICKET_KEY_NAME_LEN],
    aead: LessSafeKey,
}

impl TicketKey {
    fn derive(seed: &[u8]) -> Result<Self, ServerError> {
        let digest = ring::digest::digest(&ring::digest::SHA256, seed);
        let mut name = [0u8; TICKET_KEY_NAME_LEN];
        name.copy_from_slice(&digest.as_ref()[..TICKET_KEY_NAME_LEN]);

        let mut key_bytes = [0u8; 32];
        Salt::new(HKDF_SHA256, KEY_DERIVATION_SALT)
            .extract(seed)
            .expand(&[b"aead" as &[u8]], HKDF_SHA256)
            .and_then(|okm| okm.fill(&mut key_bytes))
            .map_err(|_| ServerError::Credential("ticket key derivation failed".into()))?;

        let unbound = UnboundKey::new(&AES_256_GCM, &key_bytes)
            .map_err(|_| ServerError::Credential("ticket key derivation failed".into()))?;

        Ok(Self {
            name,
            aead: LessSafeKey::new(unbound),
        })
    }
}

/// The active set of ticket keys. Index 0 encrypts; all entries decrypt.
struct TicketKeyRing {
    keys: Vec<TicketKey>,
}

impl TicketKeyRing {
    fn from_seeds(seeds: &TicketSeedSet) -> Result<Self, ServerError> {
        if seeds.current.is_empty() {
            return Err(ServerError::Config(
                "ticket seed set has no current seed".into(),
            ));
        }
        let keys = seeds
            .all_seeds()
            .map(|s| TicketKey::derive(s.as_bytes()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { keys })
    }

    fn encrypt_key(&self) -> &TicketKey {
        &self.keys[0]
    }

    fn find(&self, name: &[u8]) -> Option<&TicketKey> {
        self.keys.iter().find(|k| k.name == name)
    }
}

/// Ticket encrypter/decrypter with atomically swappable keys.
///
/// Implements rustls' `ProducesTickets`; one instance is shared by every
/// handshake of its listener, so rotating seeds never requires rebuilding
/// the TLS configuration.
pub struct RollingTicketer {
    ring: ArcSwap<TicketKeyRing>,
    rng: SystemRandom,
}

impl RollingTicketer {
    /// Build from a configured seed set.
    pub fn from_seeds(seeds: &TicketSeedSet) -> Result<Arc<Self>, ServerError> {
        Ok(Arc::new(Self {
            ring: ArcSwap::from_pointee(TicketKeyRing::from_seeds(seeds)?),
            rng: SystemRandom::new(),
        }))
    }

    /// Build with a random, process-local seed. Used when no seeds are
    /// configured; tickets then survive rotation calls but not restarts.
    pub fn random() -> Result<Arc<Self>, ServerError> {
        let rng = SystemRandom::new();
        let mut seed = [0u8; 32];
        rng.fill(&mut seed)
            .map_err(|_| ServerError::Credential("ticket seed generation failed".into()))?;
        let seeds = TicketSeedSet {
            current: vec![hex(&seed)],
            ..TicketSeedSet::default()
        };
        Ok(Arc::new(Self {
            ring: ArcSwap::from_pointee(TicketKeyRing::from_seeds(&seeds)?),
            rng,
        }))
    }

    /// Atomically replace the key ring. Handshakes already holding the old
    /// ring finish with it; everything after the swap uses the new one.
    pub fn rotate(&self, seeds: &TicketSeedSet) -> Result<(), ServerError> {
        let ring = TicketKeyRing::from_seeds(seeds)?;
        self.ring.store(Arc::new(ring));
        tracing::info!(keys = seeds.all_seeds().count(), "Session ticket keys rotated");
        Ok(())
    }
}

impl std::fmt::Debug for RollingTicketer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RollingTicketer")
            .field("keys", &self.ring.load().keys.len())
            .finish_non_exhaustive()
    }
}

impl rustls::server::ProducesTickets for RollingTicketer {
    fn enabled(&self) -> bool {
        true
    }

    fn lifetime(&self) -> u32 {
        TICKET_LIFETIME_SECS
    }

    fn encrypt(&self, plain: &[u8]) -> Option<Vec<u8>> {
        let ring = self.ring.load();
        let key = ring.encrypt_key();

        let mut nonce_bytes = [0u8; NONCE_LEN];
        self.rng.fill(&mut nonce_bytes).ok()?;
        let nonce = Nonce::assume_unique_for_key(nonce_bytes);

        let mut out = Vec::with_capacity(TICKET_KEY_NAME_LEN + NONCE_LEN + plain.len() + 16);
        out.extend_from_slice(&key.name);
        out.extend_from_slice(&nonce_bytes);

        let mut sealed = plain.to_vec();
        key.aead
            .seal_in_place_append_tag(nonce, Aad::empty(), &mut sealed)
            .ok()?;
        out.extend_from_slice(&sealed);
        Some(out)
    }

    fn decrypt(&self, cipher: &[u8]) -> Option<Vec<u8>> {
        if cipher.len() < TICKET_KEY_NAME_LEN + NONCE_LEN {
            return None;
        }
        let (name, rest) = cipher.split_at(TICKET_KEY_NAME_LEN);
        let (nonce_bytes, sealed) = rest.split_at(NONCE_LEN);

        let ring = self.ring.load();
        // Unknown key name means the seed was rotated out; the caller falls
        // back to a full handshake.
        let key = ring.find(name)?;

        let nonce = Nonce::try_assume_unique_for_key(nonce_bytes).ok()?;
        let mut buf = sealed.to_vec();
        let plain = key.aead.open_in_place(nonce, Aad::empty(), &mut buf).ok()?;
        Some(plain.to_vec())
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
