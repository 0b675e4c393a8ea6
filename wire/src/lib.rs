//! Typed request/response pairs and domain enumerations for the Keystone key
//! management service.
//!
//! Clients link these types directly; serialization and transport are the
//! embedder's concern.

#![no_std]
extern crate alloc;

pub mod ops;
pub mod rkp;
pub mod types;
pub mod version;

pub use ops::*;
pub use types::*;
pub use version::{message_version, KmVersion, KM_DATE};

/// Size of a trusted confirmation token (HMAC-SHA256 output).
pub const CONFIRMATION_TOKEN_SIZE: usize = 32;

/// Wire overhead allowed on top of a confirmation message: the framing of the
/// "confirmation token" prompt prefix.
pub const CONFIRMATION_TOKEN_MESSAGE_TAG_SIZE: usize = 11;

/// Maximum size of a message that can be covered by a trusted confirmation.
pub const CONFIRMATION_MESSAGE_MAX_SIZE: usize = 6144;

/// AES-GCM nonce size used for CSR protected data.
pub const AES_GCM_NONCE_LENGTH: usize = 12;

/// SHA-256 digest size.
pub const SHA256_DIGEST_LENGTH: usize = 32;

/// X25519 private key size.
pub const X25519_PRIVATE_KEY_LEN: usize = 32;

/// X25519 public value size.
pub const X25519_PUBLIC_VALUE_LEN: usize = 32;

/// Size of a P-256 affine coordinate.
pub const P256_AFFINE_POINT_SIZE: usize = 32;

/// `CertificateNotAfter` value used for keys with no meaningful expiry
/// (9999-12-31T23:59:59Z in milliseconds since epoch).
pub const UNDEFINED_EXPIRATION_DATETIME: i64 = 253402300799000;

/// Marker type indicating failure to convert an integer into an `enum`
/// variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValueNotRecognized;

/// Macro that emits an implementation of `TryFrom<i32>` for an enum type that
/// has `#[derive(N)]` attached to it.
#[macro_export]
macro_rules! try_from_n {
    { $ename:ident } => {
        impl core::convert::TryFrom<i32> for $ename {
            type Error = $crate::ValueNotRecognized;
            fn try_from(value: i32) -> Result<Self, Self::Error> {
                Self::n(value).ok_or($crate::ValueNotRecognized)
            }
        }
    };
}
