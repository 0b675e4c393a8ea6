//! Types and constants for remote key provisioning.

use alloc::vec::Vec;
use enumn::N;

use crate::try_from_n;

/// A COSE_Mac0 message whose payload is a COSE_Key public key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MacedPublicKey {
    pub maced_key: Vec<u8>,
}

/// Remote-provisioning status codes.  These are bridged into [`ErrorCode`]
/// via the dedicated positive `Rkp*` variants.
///
/// [`ErrorCode`]: crate::types::ErrorCode
#[derive(Clone, Copy, Debug, PartialEq, Eq, N)]
#[repr(i32)]
pub enum RkpErrorCode {
    Failed = 1,
    InvalidMac = 2,
    ProductionKeyInTestRequest = 3,
    TestKeyInProductionRequest = 4,
    InvalidEek = 5,
}
try_from_n!(RkpErrorCode);

/// COSE_Key map labels used in the MACed public key (RFC 8152 s7.1, plus
/// the private test-key marker).
pub const COSE_KEY_TYPE: i64 = 1;
pub const COSE_KEY_ALGORITHM: i64 = 3;
pub const COSE_KEY_CURVE: i64 = -1;
pub const COSE_KEY_PUBKEY_X: i64 = -2;
pub const COSE_KEY_PUBKEY_Y: i64 = -3;
pub const COSE_KEY_TEST_KEY: i64 = -70000;

/// COSE_Key values for a P-256 ECDSA signing key.
pub const COSE_KEY_TYPE_EC2: i64 = 2;
pub const COSE_ALG_ES256: i64 = -7;
pub const COSE_CURVE_P256: i64 = 1;
