//! Key lifecycle: loading keys with version binding, plus the
//! generate/import/export/attest/upgrade/delete entry points.

use alloc::vec::Vec;
use core::cmp::Ordering;

use keystone_common::crypto::RawKeyMaterial;
use keystone_common::{get_opt_tag_value, ks_err, AuthorizationSet, Error};
use keystone_wire::ops::*;
use keystone_wire::types::{DateTime, ErrorCode, KeyFormat, KeyParam, Tag};
use keystone_wire::version::KmVersion;
use keystone_wire::{HW_AUTH_FINGERPRINT, HW_AUTH_PASSWORD, UNDEFINED_EXPIRATION_DATETIME};

use crate::device::{Context, KeyCreation, KeyFactory};
use crate::{response_error, Keystone};

/// A key recovered from a key blob: both authorization sets, the raw key
/// material, and the factory that handles its algorithm.  Keys are
/// transient; they live for a single request or until handed to an
/// operation factory.
pub struct Key<'a> {
    pub hw_enforced: AuthorizationSet,
    pub sw_enforced: AuthorizationSet,
    pub key_material: RawKeyMaterial,
    pub factory: &'a dyn KeyFactory,
}

impl Key<'_> {
    /// Return the value of `tag`, looking in the hardware-enforced set
    /// first.
    pub fn authorization(&self, tag: Tag) -> Option<&KeyParam> {
        self.hw_enforced.get_tag_value(tag).or_else(|| self.sw_enforced.get_tag_value(tag))
    }

    /// Export the key material in `key_format`.
    pub fn formatted_key_material(&self, key_format: KeyFormat) -> Result<Vec<u8>, Error> {
        self.factory.formatted_key_material(key_format, self)
    }
}

/// Check the patch-level binding of a key against the current system
/// version: a key bound to an older patch level must be upgraded before
/// use, and a key bound to a future patch level cannot be genuine.
pub(crate) fn check_version_info(
    hw_enforced: &[KeyParam],
    sw_enforced: &[KeyParam],
    context: &dyn Context,
) -> Result<(), Error> {
    let (_os_version, os_patchlevel) = context.system_version();

    let key_patchlevel = match get_opt_tag_value!(hw_enforced, OsPatchlevel)? {
        Some(p) => Some(*p),
        None => get_opt_tag_value!(sw_enforced, OsPatchlevel)?.copied(),
    };
    if let Some(p) = key_patchlevel {
        match p.cmp(&os_patchlevel) {
            Ordering::Less => {
                return Err(ks_err!(
                    KeyRequiresUpgrade,
                    "keyblob with old patchlevel {} needs upgrade to current {}",
                    p,
                    os_patchlevel
                ))
            }
            Ordering::Greater => {
                return Err(ks_err!(
                    InvalidKeyBlob,
                    "keyblob with future patchlevel {} (current {})",
                    p,
                    os_patchlevel
                ))
            }
            Ordering::Equal => {}
        }
    }
    Ok(())
}

/// Find the key factory named by `Tag::Algorithm` in a key description.
fn key_factory<'c>(
    context: &'c dyn Context,
    key_description: &[KeyParam],
) -> Result<&'c dyn KeyFactory, Error> {
    let algorithm = get_opt_tag_value!(key_description, Algorithm)?
        .ok_or_else(|| ks_err!(UnsupportedAlgorithm, "no algorithm in key description"))?;
    context
        .key_factory(*algorithm)
        .ok_or_else(|| ks_err!(UnsupportedAlgorithm, "no factory for {:?}", algorithm))
}

impl<'a> Keystone<'a> {
    /// Parse a key blob and verify its version binding.
    pub(crate) fn load_key(
        &self,
        key_blob: &[u8],
        additional_params: &[KeyParam],
    ) -> Result<Key<'a>, Error> {
        let key = self.context.parse_key_blob(key_blob, additional_params)?;
        check_version_info(&key.hw_enforced, &key.sw_enforced, self.context)?;
        Ok(key)
    }

    pub fn generate_key(&mut self, request: &GenerateKeyRequest) -> GenerateKeyResponse {
        match self.generate_key_inner(request) {
            Ok(creation) => GenerateKeyResponse {
                message_version: self.message_version,
                error: ErrorCode::Ok,
                key_blob: creation.key_blob,
                hw_enforced: creation.hw_enforced.into_vec(),
                sw_enforced: creation.sw_enforced.into_vec(),
                certificate_chain: creation.certificate_chain,
            },
            Err(e) => GenerateKeyResponse {
                message_version: self.message_version,
                error: response_error("GenerateKey", e),
                key_blob: Vec::new(),
                hw_enforced: Vec::new(),
                sw_enforced: Vec::new(),
                certificate_chain: Vec::new(),
            },
        }
    }

    pub(crate) fn generate_key_inner(
        &mut self,
        request: &GenerateKeyRequest,
    ) -> Result<KeyCreation, Error> {
        let factory = key_factory(self.context, &request.key_description)?;

        let attest_key = if !request.attestation_signing_key_blob.is_empty() {
            Some(self.load_key(&request.attestation_signing_key_blob, &request.attest_key_params)?)
        } else {
            None
        };

        factory.generate_key(&request.key_description, attest_key, &request.issuer_subject)
    }

    pub fn import_key(&mut self, request: &ImportKeyRequest) -> ImportKeyResponse {
        match self.import_key_inner(request) {
            Ok(creation) => ImportKeyResponse {
                message_version: self.message_version,
                error: ErrorCode::Ok,
                key_blob: creation.key_blob,
                hw_enforced: creation.hw_enforced.into_vec(),
                sw_enforced: creation.sw_enforced.into_vec(),
                certificate_chain: creation.certificate_chain,
            },
            Err(e) => ImportKeyResponse {
                message_version: self.message_version,
                error: response_error("ImportKey", e),
                key_blob: Vec::new(),
                hw_enforced: Vec::new(),
                sw_enforced: Vec::new(),
                certificate_chain: Vec::new(),
            },
        }
    }

    fn import_key_inner(&mut self, request: &ImportKeyRequest) -> Result<KeyCreation, Error> {
        let factory = key_factory(self.context, &request.key_description)?;

        if let Some(policy) = self.context.enforcement_policy() {
            let early_boot_only =
                keystone_common::get_bool_tag_value!(&request.key_description, EarlyBootOnly)?;
            if early_boot_only && !policy.in_early_boot() {
                return Err(ks_err!(EarlyBootEnded, "early-boot key imported after early boot"));
            }
        }

        let attest_key = if !request.attestation_signing_key_blob.is_empty() {
            Some(self.load_key(&request.attestation_signing_key_blob, &request.attest_key_params)?)
        } else {
            None
        };

        factory.import_key(
            &request.key_description,
            request.key_format,
            &request.key_data,
            attest_key,
            &request.issuer_subject,
        )
    }

    pub fn import_wrapped_key(
        &mut self,
        request: &ImportWrappedKeyRequest,
    ) -> ImportWrappedKeyResponse {
        match self.import_wrapped_key_inner(request) {
            Ok(creation) => ImportWrappedKeyResponse {
                message_version: self.message_version,
                error: ErrorCode::Ok,
                key_blob: creation.key_blob,
                hw_enforced: creation.hw_enforced.into_vec(),
                sw_enforced: creation.sw_enforced.into_vec(),
                certificate_chain: creation.certificate_chain,
            },
            Err(e) => ImportWrappedKeyResponse {
                message_version: self.message_version,
                error: response_error("ImportWrappedKey", e),
                key_blob: Vec::new(),
                hw_enforced: Vec::new(),
                sw_enforced: Vec::new(),
                certificate_chain: Vec::new(),
            },
        }
    }

    fn import_wrapped_key_inner(
        &mut self,
        request: &ImportWrappedKeyRequest,
    ) -> Result<KeyCreation, Error> {
        let unwrapped = self.context.unwrap_key(
            &request.wrapped_key,
            &request.wrapping_key_blob,
            &request.additional_params,
            &request.masking_key,
        )?;
        let mut key_description = AuthorizationSet::from(unwrapped.key_description);

        // The wrapped key's UserSecureId value is an authenticator bitmask,
        // not a real secure ID; replace it with the caller's concrete IDs
        // for each set authenticator bit.  Bits beyond password and
        // fingerprint are dropped.
        if let Some(sid_idx) = key_description.find(Tag::UserSecureId) {
            let sids = match &key_description[sid_idx] {
                KeyParam::UserSecureId(sid) => *sid as u8,
                _ => 0,
            };
            key_description
                .erase(sid_idx)
                .ok_or_else(|| ks_err!(UnknownError, "failed to erase UserSecureId"))?;
            if sids & HW_AUTH_PASSWORD != 0 {
                key_description.try_push(KeyParam::UserSecureId(request.password_sid))?;
            }
            if sids & HW_AUTH_FINGERPRINT != 0 {
                key_description.try_push(KeyParam::UserSecureId(request.biometric_sid))?;
            }
        }

        if self.context.km_version() >= KmVersion::KeyMint1 {
            key_description
                .try_push(KeyParam::CertificateNotBefore(DateTime { ms_since_epoch: 0 }))?;
            key_description.try_push(KeyParam::CertificateNotAfter(DateTime {
                ms_since_epoch: UNDEFINED_EXPIRATION_DATETIME,
            }))?;
        }

        let factory = key_factory(self.context, &key_description)?;
        factory.import_key(
            &key_description,
            unwrapped.key_format,
            &unwrapped.secret_key.0,
            None,
            &[],
        )
    }

    pub fn export_key(&mut self, request: &ExportKeyRequest) -> ExportKeyResponse {
        let result = self
            .context
            .parse_key_blob(&request.key_blob, &request.additional_params)
            .and_then(|key| key.formatted_key_material(request.key_format));
        match result {
            Ok(key_data) => ExportKeyResponse {
                message_version: self.message_version,
                error: ErrorCode::Ok,
                key_data,
            },
            Err(e) => ExportKeyResponse {
                message_version: self.message_version,
                error: response_error("ExportKey", e),
                key_data: Vec::new(),
            },
        }
    }

    pub fn attest_key(&mut self, request: &AttestKeyRequest) -> AttestKeyResponse {
        match self.attest_key_inner(request) {
            Ok(certificate_chain) => AttestKeyResponse {
                message_version: self.message_version,
                error: ErrorCode::Ok,
                certificate_chain,
            },
            Err(e) => AttestKeyResponse {
                message_version: self.message_version,
                error: response_error("AttestKey", e),
                certificate_chain: Vec::new(),
            },
        }
    }

    fn attest_key_inner(
        &mut self,
        request: &AttestKeyRequest,
    ) -> Result<Vec<keystone_wire::types::Certificate>, Error> {
        let mut key = self.load_key(&request.key_blob, &request.attest_params)?;

        if let Some(app_id) = get_opt_tag_value!(&request.attest_params, AttestationApplicationId)? {
            key.sw_enforced
                .try_push(KeyParam::AttestationApplicationId(keystone_common::try_to_vec(
                    app_id,
                )?))?;
        }

        self.context.generate_attestation(&key, &request.attest_params, None, &[])
    }

    pub fn upgrade_key(&mut self, request: &UpgradeKeyRequest) -> UpgradeKeyResponse {
        match self.context.upgrade_key_blob(&request.key_blob, &request.upgrade_params) {
            Ok(upgraded_key) => UpgradeKeyResponse {
                message_version: self.message_version,
                error: ErrorCode::Ok,
                upgraded_key,
            },
            Err(e) => UpgradeKeyResponse {
                message_version: self.message_version,
                error: response_error("UpgradeKey", e),
                upgraded_key: Vec::new(),
            },
        }
    }

    pub fn delete_key(&mut self, request: &DeleteKeyRequest) -> DeleteKeyResponse {
        let error = match self.context.delete_key(&request.key_blob) {
            Ok(()) => ErrorCode::Ok,
            Err(e) => response_error("DeleteKey", e),
        };
        DeleteKeyResponse { message_version: self.message_version, error }
    }

    pub fn delete_all_keys(&mut self) -> DeleteAllKeysResponse {
        let error = match self.context.delete_all_keys() {
            Ok(()) => ErrorCode::Ok,
            Err(e) => response_error("DeleteAllKeys", e),
        };
        DeleteAllKeysResponse { message_version: self.message_version, error }
    }

    pub fn get_key_characteristics(
        &mut self,
        request: &GetKeyCharacteristicsRequest,
    ) -> GetKeyCharacteristicsResponse {
        let result = self
            .context
            .parse_key_blob(&request.key_blob, &request.additional_params)
            .and_then(|key| {
                check_version_info(&key.hw_enforced, &key.sw_enforced, self.context)?;
                Ok((key.hw_enforced, key.sw_enforced))
            });
        match result {
            Ok((hw_enforced, sw_enforced)) => GetKeyCharacteristicsResponse {
                message_version: self.message_version,
                error: ErrorCode::Ok,
                hw_enforced: hw_enforced.into_vec(),
                sw_enforced: sw_enforced.into_vec(),
            },
            Err(e) => GetKeyCharacteristicsResponse {
                message_version: self.message_version,
                error: response_error("GetKeyCharacteristics", e),
                hw_enforced: Vec::new(),
                sw_enforced: Vec::new(),
            },
        }
    }
}
