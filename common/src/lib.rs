//! Functionality shared across the Keystone key management service crates:
//! the internal error type, fallible allocation helpers, CBOR error
//! bridging, the authorization set, and the crypto provider abstractions.

#![no_std]
extern crate alloc;

use alloc::{
    format,
    string::{String, ToString},
    vec::Vec,
};
use core::fmt::Write;

/// Re-export of the crate used for CBOR encoding.
pub use ciborium as cbor;
/// Re-export of the crate used for COSE encoding.
pub use coset;
/// Re-export of the message crate, so macros can name its types.
pub use keystone_wire as wire;

use keystone_wire::rkp::RkpErrorCode;
use keystone_wire::types::ErrorCode;

pub mod authset;
pub mod crypto;
pub mod tag;

pub use authset::AuthorizationSet;

/// General error type.
#[derive(Debug)]
pub enum Error {
    /// CBOR encode/decode failure.
    Cbor(CborError),
    /// An error to be reported on the response, with explanation.
    Hal(ErrorCode, String),
    /// A remote-provisioning status, with explanation.
    Rkp(RkpErrorCode, String),
    /// Allocation failure, naming what could not be allocated.
    Alloc(&'static str),
}

/// Macro to build an [`Error::Hal`] instance for an [`ErrorCode`] variant
/// known at compile time: `ks_err!(InvalidTag, "some {} format", arg)`.
#[macro_export]
macro_rules! ks_err {
    { $error_code:ident, $($arg:tt)+ } => {
        $crate::Error::Hal($crate::wire::types::ErrorCode::$error_code,
                           alloc::format!("{}:{}: {}", file!(), line!(), format_args!($($arg)+))) };
}

/// Macro to build an [`Error::Hal`] instance from an [`ErrorCode`] value:
/// `ks_verr!(rc, "some {} format", arg)`.
#[macro_export]
macro_rules! ks_verr {
    { $error_code:expr, $($arg:tt)+ } => {
        $crate::Error::Hal($error_code,
                           alloc::format!("{}:{}: {}", file!(), line!(), format_args!($($arg)+))) };
}

/// Macro to build an [`Error::Rkp`] instance:
/// `rkp_err!(Failed, "some {} format", arg)`.
#[macro_export]
macro_rules! rkp_err {
    { $status:ident, $($arg:tt)+ } => {
        $crate::Error::Rkp($crate::wire::rkp::RkpErrorCode::$status,
                           alloc::format!("{}:{}: {}", file!(), line!(), format_args!($($arg)+))) };
}

impl From<Error> for ErrorCode {
    fn from(e: Error) -> Self {
        match e {
            Error::Cbor(_) => ErrorCode::UnknownError,
            Error::Hal(e, _msg) => e,
            Error::Rkp(e, _msg) => match e {
                RkpErrorCode::Failed => ErrorCode::RkpFailed,
                RkpErrorCode::InvalidMac => ErrorCode::RkpInvalidMac,
                RkpErrorCode::ProductionKeyInTestRequest => {
                    ErrorCode::RkpProductionKeyInTestRequest
                }
                RkpErrorCode::TestKeyInProductionRequest => {
                    ErrorCode::RkpTestKeyInProductionRequest
                }
                RkpErrorCode::InvalidEek => ErrorCode::RkpInvalidEek,
            },
            Error::Alloc(_msg) => ErrorCode::MemoryAllocationFailed,
        }
    }
}

impl From<CborError> for Error {
    fn from(e: CborError) -> Self {
        Error::Cbor(e)
    }
}

impl From<alloc::collections::TryReserveError> for Error {
    fn from(_e: alloc::collections::TryReserveError) -> Self {
        Error::Alloc("allocation failure")
    }
}

/// Marker structure indicating that EOF was encountered when reading CBOR
/// data.
#[derive(Debug)]
pub struct EndOfFile;

/// Error type for failures in encoding or decoding CBOR types.
pub enum CborError {
    /// CBOR decoding failure.
    DecodeFailed(cbor::de::Error<EndOfFile>),
    /// CBOR encoding failure.
    EncodeFailed,
    /// CBOR input had extra data.
    ExtraneousData,
    /// Integer value outside expected range.
    OutOfRangeIntegerValue,
    /// Integer value that doesn't match expected set of allowed enum values.
    NonEnumValue,
    /// Unexpected CBOR item encountered (got, want).
    UnexpectedItem(&'static str, &'static str),
    /// Allocation failure.
    AllocationFailed,
}

impl From<cbor::de::Error<EndOfFile>> for CborError {
    fn from(e: cbor::de::Error<EndOfFile>) -> Self {
        CborError::DecodeFailed(e)
    }
}

impl<T> From<cbor::ser::Error<T>> for CborError {
    fn from(_e: cbor::ser::Error<T>) -> Self {
        CborError::EncodeFailed
    }
}

impl From<core::num::TryFromIntError> for CborError {
    fn from(_: core::num::TryFromIntError) -> Self {
        CborError::OutOfRangeIntegerValue
    }
}

impl From<coset::CoseError> for CborError {
    fn from(e: coset::CoseError) -> Self {
        match e {
            coset::CoseError::DecodeFailed(inner) => CborError::DecodeFailed(match inner {
                cbor::de::Error::Io(_io) => cbor::de::Error::Io(EndOfFile),
                cbor::de::Error::Syntax(v) => cbor::de::Error::Syntax(v),
                cbor::de::Error::Semantic(sz, msg) => cbor::de::Error::Semantic(sz, msg),
                cbor::de::Error::RecursionLimitExceeded => cbor::de::Error::RecursionLimitExceeded,
            }),
            coset::CoseError::EncodeFailed => CborError::EncodeFailed,
            coset::CoseError::ExtraneousData => CborError::ExtraneousData,
            coset::CoseError::OutOfRangeIntegerValue => CborError::OutOfRangeIntegerValue,
            coset::CoseError::UnregisteredIanaValue => CborError::NonEnumValue,
            coset::CoseError::UnregisteredIanaNonPrivateValue => CborError::NonEnumValue,
            coset::CoseError::UnexpectedItem(got, want) => CborError::UnexpectedItem(got, want),
            coset::CoseError::DuplicateMapKey => {
                CborError::UnexpectedItem("dup map key", "unique keys")
            }
        }
    }
}

impl From<coset::CoseError> for Error {
    fn from(e: coset::CoseError) -> Self {
        Error::Cbor(e.into())
    }
}

impl core::fmt::Debug for CborError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            CborError::DecodeFailed(de) => write!(f, "decode CBOR failure: {:?}", de),
            CborError::EncodeFailed => write!(f, "encode CBOR failure"),
            CborError::ExtraneousData => write!(f, "extraneous data in CBOR input"),
            CborError::OutOfRangeIntegerValue => write!(f, "out of range integer value"),
            CborError::NonEnumValue => write!(f, "integer not a valid enum value"),
            CborError::UnexpectedItem(got, want) => write!(f, "got {}, expected {}", got, want),
            CborError::AllocationFailed => write!(f, "allocation failed"),
        }
    }
}

/// Newtype wrapper around a byte slice to allow left-over data to be
/// detected.
struct MeasuringReader<'a>(&'a [u8]);

impl<'a> MeasuringReader<'a> {
    fn new(buf: &'a [u8]) -> MeasuringReader<'a> {
        MeasuringReader(buf)
    }

    fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<'a> ciborium_io::Read for &mut MeasuringReader<'a> {
    type Error = EndOfFile;

    fn read_exact(&mut self, data: &mut [u8]) -> Result<(), Self::Error> {
        if data.len() > self.0.len() {
            return Err(EndOfFile);
        }

        let (prefix, suffix) = self.0.split_at(data.len());
        data.copy_from_slice(prefix);
        self.0 = suffix;
        Ok(())
    }
}

/// Read a [`cbor::value::Value`] from a byte slice, failing if any extra
/// data remains after the `Value` has been read.
pub fn read_to_value(slice: &[u8]) -> Result<cbor::value::Value, CborError> {
    let mut mr = MeasuringReader::new(slice);
    let value = cbor::de::from_reader(&mut mr)?;
    if mr.is_empty() {
        Ok(value)
    } else {
        Err(CborError::ExtraneousData)
    }
}

/// Serialize a [`cbor::value::Value`] into bytes.
pub fn serialize_cbor(value: &cbor::value::Value) -> Result<Vec<u8>, Error> {
    let mut buf = Vec::new();
    cbor::ser::into_writer(value, &mut buf).map_err(|_e| Error::Cbor(CborError::EncodeFailed))?;
    Ok(buf)
}

/// Extension trait to provide fallible-allocation variants of `Vec`
/// operations.
pub trait FallibleAllocExt<T> {
    /// Append `value`, failing with [`Error::Alloc`] if more space cannot be
    /// reserved.
    fn try_push(&mut self, value: T) -> Result<(), Error>;
    /// Append the contents of `other`, failing with [`Error::Alloc`] if more
    /// space cannot be reserved.
    fn try_extend_from_slice(&mut self, other: &[T]) -> Result<(), Error>
    where
        T: Clone;
}

impl<T> FallibleAllocExt<T> for Vec<T> {
    fn try_push(&mut self, value: T) -> Result<(), Error> {
        self.try_reserve(1)?;
        self.push(value);
        Ok(())
    }
    fn try_extend_from_slice(&mut self, other: &[T]) -> Result<(), Error>
    where
        T: Clone,
    {
        self.try_reserve(other.len())?;
        self.extend_from_slice(other);
        Ok(())
    }
}

/// Copy a slice into a fresh vector, detecting allocation failure.
pub fn try_to_vec<T: Clone>(s: &[T]) -> Result<Vec<T>, Error> {
    let mut v = Vec::new();
    v.try_extend_from_slice(s)?;
    Ok(v)
}

/// Function that mimics `vec![<val>; <len>]` but which detects allocation
/// failure.
pub fn vec_try_fill<T: Clone>(elem: T, len: usize) -> Result<Vec<T>, Error> {
    let mut v = Vec::new();
    v.try_reserve(len)?;
    v.resize(len, elem);
    Ok(v)
}

/// Macro that mimics `vec!` but which detects allocation failure.
#[macro_export]
macro_rules! vec_try {
    { $elem:expr ; $len:expr } => {
        $crate::vec_try_fill($elem, $len)
    };
    { $($x:expr),+ $(,)? } => {
        {
            let mut v = alloc::vec::Vec::new();
            match v.try_reserve(0 $(+ { let _ = stringify!($x); 1 })+) {
                Err(e) => Err($crate::Error::from(e)),
                Ok(()) => {
                    $( v.push($x); )+
                    Ok(v)
                }
            }
        }
    };
}

/// Macro that mimics `Vec::with_capacity` but which detects allocation
/// failure.
#[macro_export]
macro_rules! vec_try_with_capacity {
    { $len:expr } => {
        {
            let mut v = alloc::vec::Vec::new();
            v.try_reserve($len).map_err($crate::Error::from).map(|_| v)
        }
    };
}

/// Check for an expected error.
#[macro_export]
macro_rules! expect_err {
    ($result:expr, $err_msg:expr) => {
        assert!(
            $result.is_err(),
            "Expected error containing '{}', got success {:?}",
            $err_msg,
            $result
        );
        let err = $result.err();
        assert!(
            alloc::format!("{:?}", err).contains($err_msg),
            "Unexpected error {:?}, doesn't contain '{}'",
            err,
            $err_msg
        );
    };
}

/// Convert data to a hex string.
pub fn hex_encode(data: &[u8]) -> String {
    let mut result = String::new();
    for byte in data {
        let _ = write!(result, "{:02x}", byte);
    }
    result
}

/// Convert a hex string to data.
pub fn hex_decode(hex: &str) -> Result<Vec<u8>, String> {
    let mut result = Vec::new();
    let mut pending = 0u8;
    for (idx, c) in hex.chars().enumerate() {
        let nibble: u8 = match c.to_digit(16) {
            Some(n) => n as u8,
            None => return Err(format!("char {} '{}' not a hex digit", idx, c)),
        };
        if idx % 2 == 0 {
            pending = nibble << 4;
        } else {
            result.push(pending | nibble);
        }
    }
    if hex.len() % 2 != 0 {
        return Err("odd number of hex digits".to_string());
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    #[test]
    fn test_hex_round_trip() {
        let data = vec![0x00, 0x01, 0xfe, 0xff];
        let hex = hex_encode(&data);
        assert_eq!(hex, "0001feff");
        assert_eq!(hex_decode(&hex).unwrap(), data);
    }

    #[test]
    fn test_hex_decode_fail() {
        assert!(hex_decode("0g").is_err());
        assert!(hex_decode("012").is_err());
    }

    #[test]
    fn test_read_to_value() {
        let data = hex::decode("01").unwrap();
        assert!(matches!(read_to_value(&data), Ok(cbor::value::Value::Integer(_))));
        let data = hex::decode("0101").unwrap();
        assert!(matches!(read_to_value(&data), Err(CborError::ExtraneousData)));
        let data = hex::decode("43").unwrap();
        assert!(matches!(read_to_value(&data), Err(CborError::DecodeFailed(_))));
    }

    #[test]
    fn test_vec_try() {
        let v: Vec<u8> = vec_try![1, 2, 3].unwrap();
        assert_eq!(v, vec![1, 2, 3]);
        let v: Vec<u8> = vec_try![0; 4].unwrap();
        assert_eq!(v, vec![0, 0, 0, 0]);
    }

    #[test]
    fn test_error_code_conversion() {
        let e: wire::types::ErrorCode = Error::Alloc("x").into();
        assert_eq!(e, wire::types::ErrorCode::MemoryAllocationFailed);
        let e: wire::types::ErrorCode = rkp_err!(InvalidMac, "nope").into();
        assert_eq!(e, wire::types::ErrorCode::RkpInvalidMac);
        let e: wire::types::ErrorCode = ks_err!(InvalidKeyBlob, "bad {}", 1).into();
        assert_eq!(e, wire::types::ErrorCode::InvalidKeyBlob);
    }
}
