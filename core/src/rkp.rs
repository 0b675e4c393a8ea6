//! Remote key provisioning: MACed public key and CSR assembly.

use alloc::vec::Vec;

use keystone_common::cbor::value::Value;
use keystone_common::coset::{
    iana, AsCborValue, CborSerializable, CoseEncryptBuilder, CoseKey, CoseMac0, CoseMac0Builder,
    CoseRecipient, CoseRecipientBuilder, CoseSign1, CoseSign1Builder, HeaderBuilder, KeyType,
    Label,
};
use keystone_common::crypto::{ConstTimeEq, Hkdf, Hmac, RawKeyMaterial, X25519};
use keystone_common::{
    read_to_value, rkp_err, serialize_cbor, try_to_vec, Error, FallibleAllocExt,
};
use keystone_wire::ops::*;
use keystone_wire::rkp::{
    MacedPublicKey, COSE_ALG_ES256, COSE_CURVE_P256, COSE_KEY_ALGORITHM, COSE_KEY_CURVE,
    COSE_KEY_PUBKEY_X, COSE_KEY_PUBKEY_Y, COSE_KEY_TEST_KEY, COSE_KEY_TYPE, COSE_KEY_TYPE_EC2,
};
use keystone_wire::types::{
    Algorithm, Certificate, DateTime, Digest, EcCurve, ErrorCode, KeyParam, KeyPurpose,
    KeySizeInBits,
};
use keystone_wire::{
    AES_GCM_NONCE_LENGTH, P256_AFFINE_POINT_SIZE, SHA256_DIGEST_LENGTH, X25519_PUBLIC_VALUE_LEN,
};

use keystone_common::vec_try;

use crate::device::RemoteProvisioningContext;
use crate::{response_error, Keystone};

/// Parameters for the P-256 signing keypair that backs a provisioned
/// attestation key.
const ATTEST_KEYGEN_PARAMS: [KeyParam; 8] = [
    KeyParam::Purpose(KeyPurpose::AttestKey),
    KeyParam::Algorithm(Algorithm::Ec),
    KeyParam::KeySize(KeySizeInBits(256)),
    KeyParam::Digest(Digest::Sha256),
    KeyParam::EcCurve(EcCurve::P256),
    KeyParam::NoAuthRequired,
    // The certificate is discarded after key extraction; its dates don't
    // matter.
    KeyParam::CertificateNotBefore(DateTime { ms_since_epoch: 0 }),
    KeyParam::CertificateNotAfter(DateTime { ms_since_epoch: 0 }),
];

/// Where MACs over public keys come from: a fixed all-zero key in test
/// mode, the device provisioning key otherwise.
enum MacSource<'a> {
    TestKey(&'a dyn Hmac),
    Device(&'a dyn RemoteProvisioningContext),
}

impl MacSource<'_> {
    fn mac(&self, data: &[u8]) -> Result<Vec<u8>, Error> {
        match self {
            MacSource::TestKey(hmac) => hmac.hmac_sha256(&[0; SHA256_DIGEST_LENGTH], data),
            MacSource::Device(rpc) => rpc.generate_hmac_sha256(data),
        }
    }
}

impl<'a> Keystone<'a> {
    pub fn generate_rkp_key(&mut self, request: &GenerateRkpKeyRequest) -> GenerateRkpKeyResponse {
        match self.generate_rkp_key_inner(request.test_mode) {
            Ok((maced_public_key, key_blob)) => GenerateRkpKeyResponse {
                message_version: self.message_version,
                error: ErrorCode::Ok,
                maced_public_key,
                key_blob,
            },
            Err(e) => GenerateRkpKeyResponse {
                message_version: self.message_version,
                error: response_error("GenerateRkpKey", e),
                maced_public_key: Vec::new(),
                key_blob: Vec::new(),
            },
        }
    }

    fn generate_rkp_key_inner(&mut self, test_mode: bool) -> Result<(Vec<u8>, Vec<u8>), Error> {
        let rpc = self
            .context
            .remote_provisioning_context()
            .ok_or_else(|| rkp_err!(Failed, "no remote provisioning context available"))?;
        let hmac = self.imp.hmac;

        // Generate the keypair that will become the attestation key.
        let gen_request = GenerateKeyRequest {
            key_description: try_to_vec(&ATTEST_KEYGEN_PARAMS)?,
            attestation_signing_key_blob: Vec::new(),
            attest_key_params: Vec::new(),
            issuer_subject: Vec::new(),
        };
        let creation = self
            .generate_key_inner(&gen_request)
            .map_err(|e| rkp_err!(Failed, "failed to generate attestation keypair: {:?}", e))?;

        // The single non-signed certificate carries the public key.
        if creation.certificate_chain.len() != 1 {
            return Err(rkp_err!(
                Failed,
                "expected exactly one certificate, got {}",
                creation.certificate_chain.len()
            ));
        }
        let (x, y) = ecdsa_p256_key_from_cert(&creation.certificate_chain[0])?;

        let mut entries = vec_try![
            (
                Value::Integer(COSE_KEY_TYPE.into()),
                Value::Integer(COSE_KEY_TYPE_EC2.into())
            ),
            (
                Value::Integer(COSE_KEY_ALGORITHM.into()),
                Value::Integer(COSE_ALG_ES256.into())
            ),
            (
                Value::Integer(COSE_KEY_CURVE.into()),
                Value::Integer(COSE_CURVE_P256.into())
            ),
            (Value::Integer(COSE_KEY_PUBKEY_X.into()), Value::Bytes(try_to_vec(&x)?)),
        ]?;
        entries.try_push((Value::Integer(COSE_KEY_PUBKEY_Y.into()), Value::Bytes(try_to_vec(&y)?)))?;
        if test_mode {
            entries.try_push((Value::Integer(COSE_KEY_TEST_KEY.into()), Value::Null))?;
        }
        let cose_public_key = serialize_cbor(&canonical_map(entries)?)?;

        let mac = if test_mode { MacSource::TestKey(hmac) } else { MacSource::Device(rpc) };
        let maced_public_key = build_maced_pub_key(cose_public_key, |data| mac.mac(data))
            .map_err(|e| rkp_err!(Failed, "failed to MAC public key: {:?}", e))?;

        Ok((maced_public_key, creation.key_blob))
    }

    pub fn generate_csr(&mut self, request: &GenerateCsrRequest) -> GenerateCsrResponse {
        match self.generate_csr_inner(request) {
            Ok((keys_to_sign_mac, device_info_blob, protected_data_blob)) => GenerateCsrResponse {
                message_version: self.message_version,
                error: ErrorCode::Ok,
                keys_to_sign_mac,
                device_info_blob,
                protected_data_blob,
            },
            Err(e) => GenerateCsrResponse {
                message_version: self.message_version,
                error: response_error("GenerateCsr", e),
                keys_to_sign_mac: Vec::new(),
                device_info_blob: Vec::new(),
                protected_data_blob: Vec::new(),
            },
        }
    }

    fn generate_csr_inner(
        &mut self,
        request: &GenerateCsrRequest,
    ) -> Result<(Vec<u8>, Vec<u8>, Vec<u8>), Error> {
        let rpc = self
            .context
            .remote_provisioning_context()
            .ok_or_else(|| rkp_err!(Failed, "no remote provisioning context available"))?;
        let hmac = self.imp.hmac;
        let compare = self.imp.compare;
        let x25519 = self.imp.x25519;
        let hkdf = self.imp.hkdf;
        let aes_gcm = self.imp.aes_gcm;

        let mac = if request.test_mode { MacSource::TestKey(hmac) } else { MacSource::Device(rpc) };
        let pub_keys =
            validate_and_extract_pubkeys(request.test_mode, &request.keys_to_sign, &mac, compare)?;

        // Fresh MAC key covering the keys-to-sign list; it is disclosed to
        // the server inside the encrypted payload below.
        let mut ephemeral_mac_key = vec_try![0u8; SHA256_DIGEST_LENGTH]?;
        self.imp.rng.fill_bytes(&mut ephemeral_mac_key);

        let pub_keys_payload = serialize_cbor(&Value::Array(pub_keys))?;
        let keys_to_sign_mac =
            cose_mac0_tag(|data| hmac.hmac_sha256(&ephemeral_mac_key, data), pub_keys_payload)
                .map_err(|e| rkp_err!(Failed, "failed to MAC the keys to sign: {:?}", e))?;

        let (device_private_key, bcc) = if request.test_mode {
            rpc.generate_bcc()
                .map_err(|e| rkp_err!(Failed, "failed to generate test BCC: {:?}", e))?
        } else {
            let bcc =
                rpc.bcc().map_err(|e| rkp_err!(Failed, "failed to fetch the BCC: {:?}", e))?;
            (RawKeyMaterial(try_to_vec(rpc.device_private_key())?), bcc)
        };

        let device_info_map = rpc
            .create_device_info()
            .map_err(|e| rkp_err!(Failed, "failed to build device info: {:?}", e))?;
        let device_info_blob = serialize_cbor(&device_info_map)?;

        let aad = serialize_cbor(&Value::Array(vec_try![
            Value::Bytes(try_to_vec(&request.challenge)?),
            device_info_map,
            Value::Bytes(try_to_vec(&keys_to_sign_mac)?),
        ]?))?;

        // COSE_Sign1 over the ephemeral MAC key, bound to the challenge and
        // device info via the AAD.
        let protected = HeaderBuilder::new().algorithm(iana::Algorithm::EdDSA).build();
        let signed_mac = CoseSign1Builder::new()
            .protected(protected)
            .payload(try_to_vec(&ephemeral_mac_key)?)
            .try_create_signature(&aad, |input| rpc.sign_data(&device_private_key.0, input))
            .map_err(|e| rkp_err!(Failed, "failed to sign the ephemeral MAC key: {:?}", e))?
            .build();
        let signed_mac_value = signed_mac.to_cbor_value()?;

        let (ephemeral_pub_key, ephemeral_priv_key) = x25519
            .generate_keypair(&mut *self.imp.rng)
            .map_err(|e| rkp_err!(Failed, "failed to generate an ephemeral keypair: {:?}", e))?;
        let (eek_pub, eek_id) = validate_and_extract_eek_pub_and_id(
            request.test_mode,
            &request.endpoint_enc_cert_chain,
            rpc.authorized_eek_roots(),
        )?;

        let session_key = x25519_hkdf_derive_key(
            x25519,
            hkdf,
            &ephemeral_pub_key,
            &ephemeral_priv_key.0,
            &eek_pub,
            true,
        )
        .map_err(|e| rkp_err!(Failed, "failed to derive the session key: {:?}", e))?;

        let mut nonce = [0u8; AES_GCM_NONCE_LENGTH];
        self.imp.rng.fill_bytes(&mut nonce);

        let payload = serialize_cbor(&Value::Array(vec_try![signed_mac_value, bcc]?))?;
        let protected = HeaderBuilder::new().algorithm(iana::Algorithm::A256GCM).build();
        let unprotected = HeaderBuilder::new().iv(try_to_vec(&nonce)?).build();
        let mut builder = CoseEncryptBuilder::new()
            .protected(protected)
            .unprotected(unprotected)
            .try_create_ciphertext(&payload, &[], |plaintext, enc_aad| {
                aes_gcm.encrypt(&session_key, &nonce, enc_aad, plaintext)
            })
            .map_err(|e| rkp_err!(Failed, "failed to encrypt the protected data: {:?}", e))?;
        for recipient in build_cert_req_recipients(&ephemeral_pub_key, &eek_id)? {
            builder = builder.add_recipient(recipient);
        }
        let protected_data_blob = builder.build().to_vec()?;

        Ok((keys_to_sign_mac, device_info_blob, protected_data_blob))
    }
}

/// Extract the affine coordinates of a P-256 public key from a DER
/// certificate's subject public key info.
fn ecdsa_p256_key_from_cert(
    cert: &Certificate,
) -> Result<([u8; P256_AFFINE_POINT_SIZE], [u8; P256_AFFINE_POINT_SIZE]), Error> {
    const EC_PUBLIC_KEY_OID: der::asn1::ObjectIdentifier =
        der::asn1::ObjectIdentifier::new_unwrap("1.2.840.10045.2.1");

    use der::Decode;
    let cert = x509_cert::Certificate::from_der(&cert.encoded_certificate)
        .map_err(|e| rkp_err!(Failed, "failed to parse certificate: {:?}", e))?;
    let spki = &cert.tbs_certificate.subject_public_key_info;
    if spki.algorithm.oid != EC_PUBLIC_KEY_OID {
        return Err(rkp_err!(Failed, "certificate does not hold an EC key"));
    }
    let point = spki
        .subject_public_key
        .as_bytes()
        .ok_or_else(|| rkp_err!(Failed, "public key is not octet-aligned"))?;
    // Uncompressed SEC1 point.
    if point.len() != 1 + 2 * P256_AFFINE_POINT_SIZE || point[0] != 0x04 {
        return Err(rkp_err!(Failed, "unexpected public key encoding"));
    }
    let mut x = [0u8; P256_AFFINE_POINT_SIZE];
    let mut y = [0u8; P256_AFFINE_POINT_SIZE];
    x.copy_from_slice(&point[1..1 + P256_AFFINE_POINT_SIZE]);
    y.copy_from_slice(&point[1 + P256_AFFINE_POINT_SIZE..]);
    Ok((x, y))
}

/// Sort map entries into RFC 7049 canonical order: shorter encoded key
/// first, then lexicographic.
fn canonical_map(entries: Vec<(Value, Value)>) -> Result<Value, Error> {
    let mut encoded: Vec<(Vec<u8>, (Value, Value))> = Vec::new();
    encoded.try_reserve(entries.len())?;
    for entry in entries {
        let key_enc = serialize_cbor(&entry.0)?;
        encoded.push((key_enc, entry));
    }
    encoded.sort_by(|a, b| a.0.len().cmp(&b.0.len()).then_with(|| a.0.cmp(&b.0)));
    Ok(Value::Map(encoded.into_iter().map(|(_key_enc, entry)| entry).collect()))
}

/// Wrap an encoded COSE_Key into a COSE_Mac0 message.
fn build_maced_pub_key<F>(pub_cose_key: Vec<u8>, compute_mac: F) -> Result<Vec<u8>, Error>
where
    F: FnOnce(&[u8]) -> Result<Vec<u8>, Error>,
{
    let protected = HeaderBuilder::new().algorithm(iana::Algorithm::HMAC_256_256).build();
    let cose_mac0 = CoseMac0Builder::new()
        .protected(protected)
        .payload(pub_cose_key)
        .try_create_tag(&[], compute_mac)?
        .build();
    Ok(cose_mac0.to_vec()?)
}

/// Compute just the MAC value of a COSE_Mac0 over `payload`.
fn cose_mac0_tag<F>(compute_mac: F, payload: Vec<u8>) -> Result<Vec<u8>, Error>
where
    F: FnOnce(&[u8]) -> Result<Vec<u8>, Error>,
{
    let protected = HeaderBuilder::new().algorithm(iana::Algorithm::HMAC_256_256).build();
    let cose_mac0 = CoseMac0Builder::new()
        .protected(protected)
        .payload(payload)
        .try_create_tag(&[], compute_mac)?
        .build();
    Ok(cose_mac0.tag)
}

/// Verify the MAC on each key to sign and collect the encoded COSE_Key
/// payloads, enforcing the test-key marker rules.
fn validate_and_extract_pubkeys(
    test_mode: bool,
    keys_to_sign: &[MacedPublicKey],
    mac: &MacSource,
    compare: &dyn ConstTimeEq,
) -> Result<Vec<Value>, Error> {
    let mut pub_keys = Vec::new();
    for key_to_sign in keys_to_sign {
        let cose_mac0 = CoseMac0::from_slice(&key_to_sign.maced_key)
            .map_err(|e| rkp_err!(Failed, "failed to parse MACed public key: {:?}", e))?;
        let payload = cose_mac0
            .payload
            .as_ref()
            .ok_or_else(|| rkp_err!(Failed, "no payload in a MACed public key"))?;
        let cose_key = read_to_value(payload)
            .map_err(|e| rkp_err!(Failed, "MACed payload is not valid CBOR: {:?}", e))?;
        let is_test_key = cose_key_has_label(&cose_key, COSE_KEY_TEST_KEY)?;
        if test_mode && !is_test_key {
            return Err(rkp_err!(
                ProductionKeyInTestRequest,
                "production key in a test-mode request"
            ));
        }
        if !test_mode && is_test_key {
            return Err(rkp_err!(TestKeyInProductionRequest, "test key in a production request"));
        }
        cose_mac0.verify_tag(&[], |expected_tag, data| {
            let computed = mac.mac(data)?;
            if compare.eq(expected_tag, &computed) {
                Ok(())
            } else {
                Err(rkp_err!(InvalidMac, "invalid tag on a MACed public key"))
            }
        })?;
        pub_keys.try_push(Value::Bytes(try_to_vec(payload)?))?;
    }
    Ok(pub_keys)
}

fn cose_key_has_label(cose_key: &Value, label: i64) -> Result<bool, Error> {
    match cose_key {
        Value::Map(entries) => {
            Ok(entries.iter().any(|(key, _value)| *key == Value::Integer(label.into())))
        }
        _ => Err(rkp_err!(Failed, "COSE_Key payload is not a map")),
    }
}

/// Walk the endpoint encryption key chain and extract the leaf X25519
/// public value and key ID.  Chain signatures are checked by the
/// provisioning server; in production mode the chain root must match one of
/// the pinned roots.
fn validate_and_extract_eek_pub_and_id(
    test_mode: bool,
    eek_chain: &[u8],
    authorized_roots: &[[u8; X25519_PUBLIC_VALUE_LEN]],
) -> Result<(Vec<u8>, Vec<u8>), Error> {
    let chain = read_to_value(eek_chain)
        .map_err(|e| rkp_err!(InvalidEek, "EEK chain is not valid CBOR: {:?}", e))?;
    let certs = match chain {
        Value::Array(certs) if !certs.is_empty() => certs,
        _ => return Err(rkp_err!(InvalidEek, "EEK chain is not a non-empty array")),
    };

    let mut leaf = None;
    for (idx, cert) in certs.into_iter().enumerate() {
        let sign1 = CoseSign1::from_cbor_value(cert)
            .map_err(|e| rkp_err!(InvalidEek, "EEK chain entry {} is not a COSE_Sign1: {:?}", idx, e))?;
        let payload = sign1
            .payload
            .as_ref()
            .ok_or_else(|| rkp_err!(InvalidEek, "EEK chain entry {} has no payload", idx))?;
        let cose_key = CoseKey::from_slice(payload)
            .map_err(|e| rkp_err!(InvalidEek, "EEK chain entry {} payload is not a COSE_Key: {:?}", idx, e))?;
        if idx == 0 && !test_mode {
            let root = okp_public_value(&cose_key)?;
            if !authorized_roots.iter().any(|authorized| authorized[..] == root[..]) {
                return Err(rkp_err!(InvalidEek, "EEK chain root is not authorized"));
            }
        }
        leaf = Some(cose_key);
    }
    let leaf = leaf.unwrap(/* safe: chain checked non-empty */);

    let crv = leaf.params.iter().find_map(|(label, value)| {
        if *label == Label::Int(iana::OkpKeyParameter::Crv as i64) {
            Some(value)
        } else {
            None
        }
    });
    let is_x25519 = leaf.kty == KeyType::Assigned(iana::KeyType::OKP)
        && matches!(crv, Some(Value::Integer(i)) if *i == (iana::EllipticCurve::X25519 as i64).into());
    if !is_x25519 {
        return Err(rkp_err!(InvalidEek, "EEK leaf is not an X25519 key"));
    }
    let eek_pub = okp_public_value(&leaf)?;
    if leaf.key_id.is_empty() {
        return Err(rkp_err!(InvalidEek, "EEK leaf has no key ID"));
    }
    Ok((eek_pub, leaf.key_id))
}

/// The `x` parameter of an OKP COSE_Key.
fn okp_public_value(cose_key: &CoseKey) -> Result<Vec<u8>, Error> {
    cose_key
        .params
        .iter()
        .find_map(|(label, value)| match (label, value) {
            (Label::Int(l), Value::Bytes(data))
                if *l == iana::OkpKeyParameter::X as i64 =>
            {
                Some(try_to_vec(data))
            }
            _ => None,
        })
        .ok_or_else(|| rkp_err!(InvalidEek, "COSE_Key has no public value"))?
}

/// Derive the CSR encryption session key: X25519 agreement followed by
/// HKDF-SHA256 with the party public values (sender first) as context.
fn x25519_hkdf_derive_key(
    x25519: &dyn X25519,
    hkdf: &dyn Hkdf,
    sender_pub_key: &[u8],
    private_key: &[u8],
    recipient_pub_key: &[u8],
    sender_is_a: bool,
) -> Result<Vec<u8>, Error> {
    let raw_shared_key = x25519.agree(private_key, recipient_pub_key)?;
    let mut context = Vec::new();
    let (first, second) = if sender_is_a {
        (sender_pub_key, recipient_pub_key)
    } else {
        (recipient_pub_key, sender_pub_key)
    };
    context.try_extend_from_slice(first)?;
    context.try_extend_from_slice(second)?;
    hkdf.hkdf(&[], &raw_shared_key, &context, SHA256_DIGEST_LENGTH)
}

/// Build the single COSE recipient of a CSR: ECDH-ES+HKDF-256 with the
/// ephemeral public key and the EEK ID in the unprotected header.
fn build_cert_req_recipients(
    ephemeral_pub_key: &[u8],
    eek_id: &[u8],
) -> Result<Vec<CoseRecipient>, Error> {
    let cose_key = CoseKey {
        kty: KeyType::Assigned(iana::KeyType::OKP),
        params: vec_try![
            (
                Label::Int(iana::OkpKeyParameter::Crv as i64),
                Value::Integer((iana::EllipticCurve::X25519 as i64).into()),
            ),
            (
                Label::Int(iana::OkpKeyParameter::X as i64),
                Value::Bytes(try_to_vec(ephemeral_pub_key)?),
            ),
        ]?,
        ..Default::default()
    };
    let protected = HeaderBuilder::new().algorithm(iana::Algorithm::ECDH_ES_HKDF_256).build();
    let unprotected = HeaderBuilder::new()
        .key_id(try_to_vec(eek_id)?)
        .value(
            iana::HeaderAlgorithmParameter::EphemeralKey as i64,
            cose_key.to_cbor_value()?,
        )
        .build();
    Ok(vec_try![CoseRecipientBuilder::new()
        .protected(protected)
        .unprotected(unprotected)
        .build()]?)
}
