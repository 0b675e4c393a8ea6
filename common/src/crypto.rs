//! Traits abstracting the cryptographic primitives the service relies on.
//! Implementations are supplied by the embedder; the core never touches raw
//! algorithm internals.

use alloc::vec::Vec;
use zeroize::ZeroizeOnDrop;

use keystone_wire::AES_GCM_NONCE_LENGTH;

use crate::Error;

/// Combined collection of trait implementations that must be provided at
/// construction.
pub struct Implementation<'a> {
    /// Random number generator.
    pub rng: &'a mut dyn Rng,

    /// A constant-time equality implementation.
    pub compare: &'a dyn ConstTimeEq,

    /// HMAC-SHA256 implementation.
    pub hmac: &'a dyn Hmac,

    /// AES-GCM implementation.
    pub aes_gcm: &'a dyn AesGcm,

    /// X25519 key agreement implementation.
    pub x25519: &'a dyn X25519,

    /// HKDF-SHA256 implementation.
    pub hkdf: &'a dyn Hkdf,
}

/// Abstraction of a random number generator that is cryptographically secure
/// and which accepts additional entropy to be mixed in.
pub trait Rng {
    /// Add entropy to the generator's pool.
    fn add_entropy(&mut self, data: &[u8]);
    /// Generate random data.
    fn fill_bytes(&mut self, dest: &mut [u8]);
    /// Return a random `u64` value.
    fn next_u64(&mut self) -> u64 {
        let mut buf = [0u8; 8];
        self.fill_bytes(&mut buf);
        u64::from_le_bytes(buf)
    }
}

/// Abstraction of constant-time comparisons, for use in cryptographic
/// contexts where timing attacks need to be avoided.
pub trait ConstTimeEq {
    /// Indicate whether arguments are the same.
    fn eq(&self, left: &[u8], right: &[u8]) -> bool;
    /// Indicate whether arguments are different.
    fn ne(&self, left: &[u8], right: &[u8]) -> bool {
        !self.eq(left, right)
    }
}

/// Abstraction of one-shot HMAC-SHA256.
pub trait Hmac {
    /// MAC `data` under `key`, producing a 32-byte tag.
    fn hmac_sha256(&self, key: &[u8], data: &[u8]) -> Result<Vec<u8>, Error>;
}

/// Abstraction of AES-GCM authenticated encryption.
pub trait AesGcm {
    /// Encrypt `plaintext` under `key`/`nonce`, binding `aad`; the result is
    /// ciphertext with the tag appended.
    fn encrypt(
        &self,
        key: &[u8],
        nonce: &[u8; AES_GCM_NONCE_LENGTH],
        aad: &[u8],
        plaintext: &[u8],
    ) -> Result<Vec<u8>, Error>;
}

/// Abstraction of X25519 key agreement.
pub trait X25519 {
    /// Generate an ephemeral keypair, returned as (public value, private
    /// key).
    fn generate_keypair(&self, rng: &mut dyn Rng) -> Result<(Vec<u8>, RawKeyMaterial), Error>;

    /// Compute the shared secret between `private_key` and
    /// `peer_public_key`.
    fn agree(&self, private_key: &[u8], peer_public_key: &[u8]) -> Result<Vec<u8>, Error>;
}

/// Abstraction of HKDF-SHA256 extract-and-expand.
pub trait Hkdf {
    /// Derive `out_len` bytes of key material from `ikm`.
    fn hkdf(&self, salt: &[u8], ikm: &[u8], info: &[u8], out_len: usize)
        -> Result<Vec<u8>, Error>;
}

/// Opaque key material, zeroed on drop.
#[derive(Clone, PartialEq, Eq, ZeroizeOnDrop)]
pub struct RawKeyMaterial(pub Vec<u8>);

impl core::fmt::Debug for RawKeyMaterial {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        // Key material deliberately not shown.
        write!(f, "RawKeyMaterial({} bytes)", self.0.len())
    }
}
