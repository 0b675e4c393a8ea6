//! Request and response types, one pair per dispatcher entry point.
//!
//! Every response carries the `error` field and is stamped with the message
//! version that was current when it was built (negotiated via
//! `GetVersion2`).

use alloc::vec::Vec;

use crate::rkp::MacedPublicKey;
use crate::types::{
    Algorithm, BlockMode, Certificate, Digest, ErrorCode, HmacSharingParameters, KeyFormat,
    KeyParam, KeyPurpose, PaddingMode, TimestampToken, VerificationToken,
};
use crate::version::KmVersion;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GetVersionResponse {
    pub error: ErrorCode,
    pub major_ver: u8,
    pub minor_ver: u8,
    pub subminor_ver: u8,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GetVersion2Request {
    pub max_message_version: i32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GetVersion2Response {
    pub error: ErrorCode,
    pub km_version: KmVersion,
    pub km_date: u32,
    pub max_message_version: i32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SupportedAlgorithmsResponse {
    pub message_version: i32,
    pub error: ErrorCode,
    pub algorithms: Vec<Algorithm>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SupportedBlockModesRequest {
    pub algorithm: Algorithm,
    pub purpose: KeyPurpose,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SupportedBlockModesResponse {
    pub message_version: i32,
    pub error: ErrorCode,
    pub block_modes: Vec<BlockMode>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SupportedPaddingModesRequest {
    pub algorithm: Algorithm,
    pub purpose: KeyPurpose,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SupportedPaddingModesResponse {
    pub message_version: i32,
    pub error: ErrorCode,
    pub padding_modes: Vec<PaddingMode>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SupportedDigestsRequest {
    pub algorithm: Algorithm,
    pub purpose: KeyPurpose,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SupportedDigestsResponse {
    pub message_version: i32,
    pub error: ErrorCode,
    pub digests: Vec<Digest>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SupportedImportFormatsRequest {
    pub algorithm: Algorithm,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SupportedImportFormatsResponse {
    pub message_version: i32,
    pub error: ErrorCode,
    pub formats: Vec<KeyFormat>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SupportedExportFormatsRequest {
    pub algorithm: Algorithm,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SupportedExportFormatsResponse {
    pub message_version: i32,
    pub error: ErrorCode,
    pub formats: Vec<KeyFormat>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GetHmacSharingParametersResponse {
    pub message_version: i32,
    pub error: ErrorCode,
    pub params: Option<HmacSharingParameters>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ComputeSharedHmacRequest {
    pub params_array: Vec<HmacSharingParameters>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ComputeSharedHmacResponse {
    pub message_version: i32,
    pub error: ErrorCode,
    pub sharing_check: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VerifyAuthorizationRequest {
    pub challenge: u64,
    pub parameters_to_verify: Vec<KeyParam>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VerifyAuthorizationResponse {
    pub message_version: i32,
    pub error: ErrorCode,
    pub token: Option<VerificationToken>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GenerateTimestampTokenRequest {
    pub challenge: i64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GenerateTimestampTokenResponse {
    pub message_version: i32,
    pub error: ErrorCode,
    pub token: Option<TimestampToken>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AddRngEntropyRequest {
    pub random_data: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AddRngEntropyResponse {
    pub message_version: i32,
    pub error: ErrorCode,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GenerateKeyRequest {
    pub key_description: Vec<KeyParam>,
    /// Blob of the key to sign the new key's certificate with; empty for
    /// self-signed or unattested keys.
    pub attestation_signing_key_blob: Vec<u8>,
    pub attest_key_params: Vec<KeyParam>,
    pub issuer_subject: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GenerateKeyResponse {
    pub message_version: i32,
    pub error: ErrorCode,
    pub key_blob: Vec<u8>,
    pub hw_enforced: Vec<KeyParam>,
    pub sw_enforced: Vec<KeyParam>,
    pub certificate_chain: Vec<Certificate>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GenerateRkpKeyRequest {
    pub test_mode: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GenerateRkpKeyResponse {
    pub message_version: i32,
    pub error: ErrorCode,
    pub maced_public_key: Vec<u8>,
    pub key_blob: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GenerateCsrRequest {
    pub test_mode: bool,
    pub keys_to_sign: Vec<MacedPublicKey>,
    /// CBOR array of COSE_Sign1 certificates ending in the endpoint
    /// encryption key.
    pub endpoint_enc_cert_chain: Vec<u8>,
    pub challenge: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GenerateCsrResponse {
    pub message_version: i32,
    pub error: ErrorCode,
    pub keys_to_sign_mac: Vec<u8>,
    pub device_info_blob: Vec<u8>,
    pub protected_data_blob: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GetKeyCharacteristicsRequest {
    pub key_blob: Vec<u8>,
    pub additional_params: Vec<KeyParam>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GetKeyCharacteristicsResponse {
    pub message_version: i32,
    pub error: ErrorCode,
    pub hw_enforced: Vec<KeyParam>,
    pub sw_enforced: Vec<KeyParam>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BeginOperationRequest {
    pub purpose: KeyPurpose,
    pub key_blob: Vec<u8>,
    pub additional_params: Vec<KeyParam>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BeginOperationResponse {
    pub message_version: i32,
    pub error: ErrorCode,
    /// Zero when the operation failed to start.
    pub op_handle: u64,
    pub output_params: Vec<KeyParam>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UpdateOperationRequest {
    pub op_handle: u64,
    pub input: Vec<u8>,
    pub additional_params: Vec<KeyParam>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UpdateOperationResponse {
    pub message_version: i32,
    pub error: ErrorCode,
    pub input_consumed: usize,
    pub output: Vec<u8>,
    pub output_params: Vec<KeyParam>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FinishOperationRequest {
    pub op_handle: u64,
    pub input: Vec<u8>,
    pub signature: Vec<u8>,
    pub additional_params: Vec<KeyParam>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FinishOperationResponse {
    pub message_version: i32,
    pub error: ErrorCode,
    pub output: Vec<u8>,
    pub output_params: Vec<KeyParam>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AbortOperationRequest {
    pub op_handle: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AbortOperationResponse {
    pub message_version: i32,
    pub error: ErrorCode,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExportKeyRequest {
    pub key_format: KeyFormat,
    pub key_blob: Vec<u8>,
    pub additional_params: Vec<KeyParam>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExportKeyResponse {
    pub message_version: i32,
    pub error: ErrorCode,
    pub key_data: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AttestKeyRequest {
    pub key_blob: Vec<u8>,
    pub attest_params: Vec<KeyParam>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AttestKeyResponse {
    pub message_version: i32,
    pub error: ErrorCode,
    pub certificate_chain: Vec<Certificate>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UpgradeKeyRequest {
    pub key_blob: Vec<u8>,
    pub upgrade_params: Vec<KeyParam>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UpgradeKeyResponse {
    pub message_version: i32,
    pub error: ErrorCode,
    pub upgraded_key: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImportKeyRequest {
    pub key_description: Vec<KeyParam>,
    pub key_format: KeyFormat,
    pub key_data: Vec<u8>,
    pub attestation_signing_key_blob: Vec<u8>,
    pub attest_key_params: Vec<KeyParam>,
    pub issuer_subject: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImportKeyResponse {
    pub message_version: i32,
    pub error: ErrorCode,
    pub key_blob: Vec<u8>,
    pub hw_enforced: Vec<KeyParam>,
    pub sw_enforced: Vec<KeyParam>,
    pub certificate_chain: Vec<Certificate>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeleteKeyRequest {
    pub key_blob: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeleteKeyResponse {
    pub message_version: i32,
    pub error: ErrorCode,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeleteAllKeysResponse {
    pub message_version: i32,
    pub error: ErrorCode,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConfigureRequest {
    pub os_version: u32,
    pub os_patchlevel: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConfigureResponse {
    pub message_version: i32,
    pub error: ErrorCode,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImportWrappedKeyRequest {
    pub wrapped_key: Vec<u8>,
    pub wrapping_key_blob: Vec<u8>,
    pub masking_key: Vec<u8>,
    pub additional_params: Vec<KeyParam>,
    pub password_sid: u64,
    pub biometric_sid: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImportWrappedKeyResponse {
    pub message_version: i32,
    pub error: ErrorCode,
    pub key_blob: Vec<u8>,
    pub hw_enforced: Vec<KeyParam>,
    pub sw_enforced: Vec<KeyParam>,
    pub certificate_chain: Vec<Certificate>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EarlyBootEndedResponse {
    pub message_version: i32,
    pub error: ErrorCode,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceLockedRequest {
    pub password_only: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceLockedResponse {
    pub message_version: i32,
    pub error: ErrorCode,
}
