//! Domain types shared by requests, responses and key characteristics.

use alloc::vec::Vec;
use enumn::N;

use crate::try_from_n;

/// Key size in bits.
#[repr(transparent)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct KeySizeInBits(pub u32);

/// RSA public exponent.
#[repr(transparent)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct RsaExponent(pub u64);

/// Point in time, in milliseconds since the epoch.
#[repr(transparent)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct DateTime {
    pub ms_since_epoch: i64,
}

/// A single DER-encoded certificate.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Certificate {
    pub encoded_certificate: Vec<u8>,
}

/// Error codes visible on every response.  Values match the HAL numbering;
/// the positive `Rkp*` values are the remote-provisioning status codes that
/// the original interface squeezed into this enumeration by casting.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, N)]
#[repr(i32)]
pub enum ErrorCode {
    Ok = 0,
    RkpFailed = 1,
    RkpInvalidMac = 2,
    RkpProductionKeyInTestRequest = 3,
    RkpTestKeyInProductionRequest = 4,
    RkpInvalidEek = 5,
    UnsupportedPurpose = -2,
    IncompatiblePurpose = -3,
    UnsupportedAlgorithm = -4,
    IncompatibleAlgorithm = -5,
    UnsupportedKeySize = -6,
    UnsupportedBlockMode = -7,
    IncompatibleBlockMode = -8,
    UnsupportedMacLength = -9,
    UnsupportedPaddingMode = -10,
    IncompatiblePaddingMode = -11,
    UnsupportedDigest = -12,
    IncompatibleDigest = -13,
    InvalidExpirationTime = -14,
    InvalidUserId = -15,
    InvalidAuthorizationTimeout = -16,
    UnsupportedKeyFormat = -17,
    IncompatibleKeyFormat = -18,
    InvalidInputLength = -21,
    KeyNotYetValid = -24,
    KeyExpired = -25,
    KeyUserNotAuthenticated = -26,
    InvalidOperationHandle = -28,
    InsufficientBufferSpace = -29,
    VerificationFailed = -30,
    TooManyOperations = -31,
    InvalidKeyBlob = -33,
    ImportedKeyNotEncrypted = -34,
    ImportedKeyDecryptionFailed = -35,
    ImportedKeyVerificationFailed = -37,
    InvalidArgument = -38,
    UnsupportedTag = -39,
    InvalidTag = -40,
    MemoryAllocationFailed = -41,
    ImportParameterMismatch = -44,
    SecureHwCommunicationFailed = -49,
    MissingNonce = -51,
    InvalidNonce = -52,
    MissingMacLength = -53,
    KeyRateLimitExceeded = -54,
    CallerNonceProhibited = -55,
    KeyMaxOpsExceeded = -56,
    InvalidMacLength = -57,
    MissingMinMacLength = -58,
    UnsupportedKdf = -60,
    UnsupportedEcCurve = -61,
    KeyRequiresUpgrade = -62,
    AttestationChallengeMissing = -63,
    AttestationApplicationIdMissing = -65,
    NoUserConfirmation = -71,
    DeviceLocked = -72,
    EarlyBootEnded = -73,
    InvalidOperation = -76,
    MissingNotBefore = -80,
    MissingNotAfter = -81,
    Unimplemented = -100,
    UnknownError = -1000,
}
try_from_n!(ErrorCode);

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, N)]
#[repr(i32)]
pub enum Algorithm {
    Rsa = 1,
    Ec = 3,
    Aes = 32,
    TripleDes = 33,
    Hmac = 128,
}
try_from_n!(Algorithm);

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, N)]
#[repr(i32)]
pub enum KeyPurpose {
    Encrypt = 0,
    Decrypt = 1,
    Sign = 2,
    Verify = 3,
    WrapKey = 5,
    AgreeKey = 6,
    AttestKey = 7,
}
try_from_n!(KeyPurpose);

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, N)]
#[repr(i32)]
pub enum KeyFormat {
    X509 = 0,
    Pkcs8 = 1,
    Raw = 3,
}
try_from_n!(KeyFormat);

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, N)]
#[repr(i32)]
pub enum BlockMode {
    Ecb = 1,
    Cbc = 2,
    Ctr = 3,
    Gcm = 32,
}
try_from_n!(BlockMode);

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, N)]
#[repr(i32)]
pub enum PaddingMode {
    None = 1,
    RsaOaep = 2,
    RsaPss = 3,
    RsaPkcs115Encrypt = 4,
    RsaPkcs115Sign = 5,
    Pkcs7 = 64,
}
try_from_n!(PaddingMode);

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, N)]
#[repr(i32)]
pub enum Digest {
    None = 0,
    Md5 = 1,
    Sha1 = 2,
    Sha224 = 3,
    Sha256 = 4,
    Sha384 = 5,
    Sha512 = 6,
}
try_from_n!(Digest);

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, N)]
#[repr(i32)]
pub enum EcCurve {
    P224 = 0,
    P256 = 1,
    P384 = 2,
    P521 = 3,
    Curve25519 = 4,
}
try_from_n!(EcCurve);

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, N)]
#[repr(i32)]
pub enum SecurityLevel {
    Software = 0,
    TrustedEnvironment = 1,
    Strongbox = 2,
}
try_from_n!(SecurityLevel);

/// Authenticator-type bits carried in the low bits of a wrapped key's
/// `UserSecureId` value.
pub const HW_AUTH_PASSWORD: u8 = 1 << 0;
pub const HW_AUTH_FINGERPRINT: u8 = 1 << 1;

/// Tag value types, encoded in the top nibble of the tag number.
#[derive(Clone, Copy, Debug, PartialEq, Eq, N)]
#[repr(i32)]
pub enum TagType {
    Invalid = 0,
    Enum = 268435456,
    EnumRep = 536870912,
    Uint = 805306368,
    UintRep = 1073741824,
    Ulong = 1342177280,
    Date = 1610612736,
    Bool = 1879048192,
    Bignum = -2147483648,
    Bytes = -1879048192,
    UlongRep = -1610612736,
}
try_from_n!(TagType);

/// Authorization tags.  The closed set used by this service; values match
/// the HAL numbering, with the value type encoded in the top nibble.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, N)]
#[repr(i32)]
pub enum Tag {
    Invalid = 0,
    Purpose = 536870913,
    Algorithm = 268435458,
    KeySize = 805306371,
    BlockMode = 536870916,
    Digest = 536870917,
    Padding = 536870918,
    MinMacLength = 805306376,
    EcCurve = 268435466,
    RsaPublicExponent = 1342177480,
    EarlyBootOnly = 1879048497,
    UsageCountLimit = 805306773,
    UserSecureId = -1610612234,
    NoAuthRequired = 1879048695,
    UserAuthType = 268435960,
    AuthTimeout = 805306873,
    TrustedConfirmationRequired = 1879048700,
    ApplicationId = -1879047591,
    ApplicationData = -1879047492,
    OsVersion = 805307073,
    OsPatchlevel = 805307074,
    AttestationChallenge = -1879047484,
    AttestationApplicationId = -1879047483,
    Nonce = -1879047191,
    MacLength = 805307371,
    ConfirmationToken = -1879047187,
    CertificateNotBefore = 1610613744,
    CertificateNotAfter = 1610613745,
}
try_from_n!(Tag);

/// Return the value type of a tag, from its top nibble.
pub fn tag_type(tag: Tag) -> TagType {
    TagType::n(((tag as i32 as u32) & 0xf000_0000) as i32).unwrap_or(TagType::Invalid)
}

/// A single authorization: a tag together with its typed value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum KeyParam {
    Purpose(KeyPurpose),
    Algorithm(Algorithm),
    KeySize(KeySizeInBits),
    BlockMode(BlockMode),
    Digest(Digest),
    Padding(PaddingMode),
    MinMacLength(u32),
    EcCurve(EcCurve),
    RsaPublicExponent(RsaExponent),
    EarlyBootOnly,
    UsageCountLimit(u32),
    UserSecureId(u64),
    NoAuthRequired,
    UserAuthType(u32),
    AuthTimeout(u32),
    TrustedConfirmationRequired,
    ApplicationId(Vec<u8>),
    ApplicationData(Vec<u8>),
    OsVersion(u32),
    OsPatchlevel(u32),
    AttestationChallenge(Vec<u8>),
    AttestationApplicationId(Vec<u8>),
    Nonce(Vec<u8>),
    MacLength(u32),
    ConfirmationToken(Vec<u8>),
    CertificateNotBefore(DateTime),
    CertificateNotAfter(DateTime),
}

impl KeyParam {
    /// Return the tag for this parameter.
    pub fn tag(&self) -> Tag {
        match self {
            KeyParam::Purpose(_) => Tag::Purpose,
            KeyParam::Algorithm(_) => Tag::Algorithm,
            KeyParam::KeySize(_) => Tag::KeySize,
            KeyParam::BlockMode(_) => Tag::BlockMode,
            KeyParam::Digest(_) => Tag::Digest,
            KeyParam::Padding(_) => Tag::Padding,
            KeyParam::MinMacLength(_) => Tag::MinMacLength,
            KeyParam::EcCurve(_) => Tag::EcCurve,
            KeyParam::RsaPublicExponent(_) => Tag::RsaPublicExponent,
            KeyParam::EarlyBootOnly => Tag::EarlyBootOnly,
            KeyParam::UsageCountLimit(_) => Tag::UsageCountLimit,
            KeyParam::UserSecureId(_) => Tag::UserSecureId,
            KeyParam::NoAuthRequired => Tag::NoAuthRequired,
            KeyParam::UserAuthType(_) => Tag::UserAuthType,
            KeyParam::AuthTimeout(_) => Tag::AuthTimeout,
            KeyParam::TrustedConfirmationRequired => Tag::TrustedConfirmationRequired,
            KeyParam::ApplicationId(_) => Tag::ApplicationId,
            KeyParam::ApplicationData(_) => Tag::ApplicationData,
            KeyParam::OsVersion(_) => Tag::OsVersion,
            KeyParam::OsPatchlevel(_) => Tag::OsPatchlevel,
            KeyParam::AttestationChallenge(_) => Tag::AttestationChallenge,
            KeyParam::AttestationApplicationId(_) => Tag::AttestationApplicationId,
            KeyParam::Nonce(_) => Tag::Nonce,
            KeyParam::MacLength(_) => Tag::MacLength,
            KeyParam::ConfirmationToken(_) => Tag::ConfirmationToken,
            KeyParam::CertificateNotBefore(_) => Tag::CertificateNotBefore,
            KeyParam::CertificateNotAfter(_) => Tag::CertificateNotAfter,
        }
    }
}

/// Parameters contributed to the shared HMAC negotiation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HmacSharingParameters {
    pub seed: Vec<u8>,
    pub nonce: [u8; 32],
}

/// Token asserting that a timestamp was produced inside the secure
/// environment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TimestampToken {
    pub challenge: i64,
    /// Milliseconds since an epoch fixed by the secure environment.
    pub timestamp: i64,
    pub mac: Vec<u8>,
}

/// Token asserting that a set of authorizations was verified.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VerificationToken {
    pub challenge: u64,
    pub timestamp: u64,
    pub parameters_verified: Vec<KeyParam>,
    pub security_level: SecurityLevel,
    pub mac: Vec<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_type() {
        assert_eq!(tag_type(Tag::Algorithm), TagType::Enum);
        assert_eq!(tag_type(Tag::Purpose), TagType::EnumRep);
        assert_eq!(tag_type(Tag::OsPatchlevel), TagType::Uint);
        assert_eq!(tag_type(Tag::UserSecureId), TagType::UlongRep);
        assert_eq!(tag_type(Tag::NoAuthRequired), TagType::Bool);
        assert_eq!(tag_type(Tag::ConfirmationToken), TagType::Bytes);
        assert_eq!(tag_type(Tag::CertificateNotAfter), TagType::Date);
        assert_eq!(tag_type(Tag::RsaPublicExponent), TagType::Ulong);
    }

    #[test]
    fn test_error_code_from_i32() {
        assert_eq!(ErrorCode::try_from(0), Ok(ErrorCode::Ok));
        assert_eq!(ErrorCode::try_from(-62), Ok(ErrorCode::KeyRequiresUpgrade));
        assert_eq!(ErrorCode::try_from(1), Ok(ErrorCode::RkpFailed));
        assert_eq!(ErrorCode::try_from(-9999), Err(crate::ValueNotRecognized));
    }

    #[test]
    fn test_key_param_tag() {
        assert_eq!(KeyParam::Algorithm(Algorithm::Aes).tag(), Tag::Algorithm);
        assert_eq!(KeyParam::OsPatchlevel(202101).tag(), Tag::OsPatchlevel);
        assert_eq!(KeyParam::NoAuthRequired.tag(), Tag::NoAuthRequired);
    }
}
