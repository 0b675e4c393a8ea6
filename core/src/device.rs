//! Traits representing the dispatcher's view of the outside world: the
//! context it runs against, the per-algorithm factories, and the optional
//! policy collaborators.  Implementations are supplied at construction.

use alloc::{boxed::Box, vec::Vec};

use keystone_common::{cbor, crypto::RawKeyMaterial, AuthorizationSet, Error};
use keystone_wire::types::{
    Algorithm, BlockMode, Certificate, Digest, HmacSharingParameters, KeyFormat, KeyParam,
    KeyPurpose, PaddingMode, TimestampToken, VerificationToken,
};
use keystone_wire::version::KmVersion;
use keystone_wire::{CONFIRMATION_TOKEN_SIZE, X25519_PUBLIC_VALUE_LEN};

use crate::keys::Key;

/// Identifier computed for a key blob by the enforcement policy.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct KeyId(pub u64);

/// Results of creating a key, whether generated or imported.
#[derive(Debug)]
pub struct KeyCreation {
    pub key_blob: Vec<u8>,
    pub hw_enforced: AuthorizationSet,
    pub sw_enforced: AuthorizationSet,
    /// DER certificates, leaf first.
    pub certificate_chain: Vec<Certificate>,
}

/// Results of unwrapping a wrapped key blob.
pub struct UnwrappedKey {
    pub key_description: Vec<KeyParam>,
    pub key_format: KeyFormat,
    pub secret_key: RawKeyMaterial,
}

/// Data emitted by one `update` step of an operation.
#[derive(Debug, Default)]
pub struct UpdateOutput {
    pub output: Vec<u8>,
    pub input_consumed: usize,
    pub output_params: Vec<KeyParam>,
}

/// Data emitted by the final step of an operation.
#[derive(Debug, Default)]
pub struct FinishOutput {
    pub output: Vec<u8>,
    pub output_params: Vec<KeyParam>,
}

/// Environment the dispatcher runs against.  A context may be shared by
/// several dispatchers; the mutating entry points take `&self` and
/// implementations use interior mutability, with the caller serializing
/// access.
pub trait Context {
    /// Current `(os_version, os_patchlevel)` as configured.
    fn system_version(&self) -> (u32, u32);

    /// Record the userspace OS version and patch level.
    fn set_system_version(&self, os_version: u32, os_patchlevel: u32) -> Result<(), Error>;

    /// Interface version implemented by this context.
    fn km_version(&self) -> KmVersion;

    /// Factory handling key creation for `algorithm`, if supported.
    fn key_factory(&self, algorithm: Algorithm) -> Option<&dyn KeyFactory>;

    /// Factory handling operations on `algorithm` keys for `purpose`, if
    /// supported.
    fn operation_factory(
        &self,
        algorithm: Algorithm,
        purpose: KeyPurpose,
    ) -> Option<&dyn OperationFactory>;

    /// The algorithms this context has factories for.
    fn supported_algorithms(&self) -> &[Algorithm];

    /// Parse (and decrypt) a key blob, recovering the key material and both
    /// authorization sets.  The blob is opaque to everything but the
    /// context.
    fn parse_key_blob(&self, key_blob: &[u8], params: &[KeyParam]) -> Result<Key<'_>, Error>;

    /// Re-wrap a key blob so that it binds to the current system version.
    fn upgrade_key_blob(&self, key_blob: &[u8], upgrade_params: &[KeyParam])
        -> Result<Vec<u8>, Error>;

    /// Delete any stored state for the given key blob.
    fn delete_key(&self, key_blob: &[u8]) -> Result<(), Error> {
        let _ = key_blob;
        Ok(())
    }

    /// Delete any stored state for all keys.
    fn delete_all_keys(&self) -> Result<(), Error> {
        Ok(())
    }

    /// Unwrap a key that was wrapped for secure import, yielding its
    /// description, format and secret material.
    fn unwrap_key(
        &self,
        wrapped_key: &[u8],
        wrapping_key_blob: &[u8],
        params: &[KeyParam],
        masking_key: &[u8],
    ) -> Result<UnwrappedKey, Error>;

    /// Build an attestation certificate chain for `key`.
    fn generate_attestation(
        &self,
        key: &Key,
        params: &[KeyParam],
        signing_key: Option<&Key>,
        issuer_subject: &[u8],
    ) -> Result<Vec<Certificate>, Error>;

    /// Check a trusted confirmation token against the message it should
    /// cover.
    fn check_confirmation_token(
        &self,
        message: &[u8],
        token: &[u8; CONFIRMATION_TOKEN_SIZE],
    ) -> Result<(), Error>;

    /// Authorization enforcement, if this context has any.
    fn enforcement_policy(&self) -> Option<&dyn EnforcementPolicy> {
        None
    }

    /// Secure storage for use-limited keys, if available.
    fn secure_key_storage(&self) -> Option<&dyn SecureKeyStorage> {
        None
    }

    /// Remote key provisioning support, if available.
    fn remote_provisioning_context(&self) -> Option<&dyn RemoteProvisioningContext> {
        None
    }
}

/// Per-algorithm key creation and export.
pub trait KeyFactory {
    /// Generate a fresh key described by `key_description`, wrapping it into
    /// a blob and splitting its characteristics into the two enforcement
    /// sets.
    fn generate_key(
        &self,
        key_description: &[KeyParam],
        attest_key: Option<Key<'_>>,
        issuer_subject: &[u8],
    ) -> Result<KeyCreation, Error>;

    /// Import caller-provided key material.
    fn import_key(
        &self,
        key_description: &[KeyParam],
        key_format: KeyFormat,
        key_data: &[u8],
        attest_key: Option<Key<'_>>,
        issuer_subject: &[u8],
    ) -> Result<KeyCreation, Error>;

    /// Export `key` in `key_format`.
    fn formatted_key_material(&self, key_format: KeyFormat, key: &Key) -> Result<Vec<u8>, Error> {
        let _ = key;
        Err(keystone_common::ks_err!(
            UnsupportedKeyFormat,
            "export in format {:?} not supported",
            key_format
        ))
    }

    fn supported_import_formats(&self) -> &[KeyFormat] {
        &[]
    }

    fn supported_export_formats(&self) -> &[KeyFormat] {
        &[]
    }
}

/// Per-(algorithm, purpose) construction of operation state machines.
pub trait OperationFactory {
    /// Build the operation state machine for `key`, consuming it.
    fn create_operation(
        &self,
        key: Key<'_>,
        params: &[KeyParam],
    ) -> Result<Box<dyn CryptoOperation>, Error>;

    fn supported_block_modes(&self) -> &[BlockMode] {
        &[]
    }

    fn supported_padding_modes(&self) -> &[PaddingMode] {
        &[]
    }

    fn supported_digests(&self) -> &[Digest] {
        &[]
    }
}

/// A factory-supplied in-flight operation.  The engine drives it through
/// `begin`, zero or more `update`s, and one `finish` or `abort`.
pub trait CryptoOperation {
    /// Start the operation, returning any output parameters (for example a
    /// generated nonce).
    fn begin(&mut self, params: &[KeyParam]) -> Result<Vec<KeyParam>, Error>;

    /// Feed input data through the operation.
    fn update(&mut self, params: &[KeyParam], input: &[u8]) -> Result<UpdateOutput, Error>;

    /// Consume any remaining input and complete the operation.
    fn finish(
        &mut self,
        params: &[KeyParam],
        input: &[u8],
        signature: &[u8],
    ) -> Result<FinishOutput, Error>;

    /// Give up on the operation.  Best-effort.
    fn abort(&mut self) -> Result<(), Error> {
        Ok(())
    }
}

/// Authorization enforcement over key use.
pub trait EnforcementPolicy {
    /// Compute a stable identifier for a key blob.
    fn create_key_id(&self, key_blob: &[u8]) -> Result<KeyId, Error>;

    /// Check that an operation step is permitted by the key's
    /// authorizations.  Called with `is_begin` set and a zero handle when
    /// the operation starts, and again with the real handle on every
    /// subsequent step.
    fn authorize_operation(
        &self,
        purpose: KeyPurpose,
        key_id: KeyId,
        auths: &[KeyParam],
        params: &[KeyParam],
        op_handle: u64,
        is_begin: bool,
    ) -> Result<(), Error>;

    fn hmac_sharing_parameters(&self) -> Result<HmacSharingParameters, Error>;

    fn compute_shared_hmac(
        &self,
        params_array: &[HmacSharingParameters],
    ) -> Result<Vec<u8>, Error>;

    fn verify_authorization(
        &self,
        challenge: u64,
        params: &[KeyParam],
    ) -> Result<VerificationToken, Error>;

    fn generate_timestamp_token(&self, challenge: i64) -> Result<TimestampToken, Error>;

    /// Whether the device is still in early boot.
    fn in_early_boot(&self) -> bool;

    fn early_boot_ended(&self);

    fn device_locked(&self, password_only: bool);
}

/// Secure storage holding state for use-limited keys.
pub trait SecureKeyStorage {
    /// Remove the stored state for `key_id`.
    fn delete_key(&self, key_id: KeyId) -> Result<(), Error>;
}

/// Device support for remote key provisioning.
pub trait RemoteProvisioningContext {
    /// HMAC-SHA256 under the device's provisioning MAC key.
    fn generate_hmac_sha256(&self, input: &[u8]) -> Result<Vec<u8>, Error>;

    /// Generate a fresh signing key and boot certificate chain for test
    /// mode.
    fn generate_bcc(&self) -> Result<(RawKeyMaterial, cbor::value::Value), Error>;

    /// The device's stored private signing key.
    fn device_private_key(&self) -> &[u8];

    /// A copy of the device's stored boot certificate chain.
    fn bcc(&self) -> Result<cbor::value::Value, Error>;

    /// Map describing the device, in canonical CBOR form.
    fn create_device_info(&self) -> Result<cbor::value::Value, Error>;

    /// Sign `data` with `private_key` for CSR assembly.
    fn sign_data(&self, private_key: &[u8], data: &[u8]) -> Result<Vec<u8>, Error>;

    /// X25519 public values that endpoint encryption key chains must be
    /// rooted in for production requests.
    fn authorized_eek_roots(&self) -> &[[u8; X25519_PUBLIC_VALUE_LEN]] {
        &[]
    }
}
