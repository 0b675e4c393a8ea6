//! Keystone: a request-dispatching key management service core.
//!
//! Clients hold opaque key blobs; the dispatcher parses them through the
//! context, enforces the per-key authorization policy, and drives the
//! algorithm-specific factories through multi-step operations.  The
//! dispatcher is single-threaded: every entry point runs to completion
//! before the next begins.

#![no_std]
extern crate alloc;

use log::{error, info};

use keystone_common::{crypto, ks_err, try_to_vec, Error};
use keystone_wire::ops::*;
use keystone_wire::types::{Algorithm, ErrorCode, KeyFormat, KeyPurpose};
use keystone_wire::version::{message_version, KM_DATE};

pub mod attest;
pub mod device;
pub mod keys;
pub mod operation;
pub mod rkp;


use device::{Context, EnforcementPolicy, OperationFactory};
use operation::{OpHandle, OperationTable};

/// Key management service dispatcher.  Holds the context, the table of
/// in-flight operations and the negotiated message version.
pub struct Keystone<'a> {
    /// Implementations of the abstract crypto primitives.
    pub(crate) imp: crypto::Implementation<'a>,

    /// Interface to the environment.
    pub(crate) context: &'a dyn Context,

    /// Table of in-flight operations.
    pub(crate) operations: OperationTable,

    /// Wire message version negotiated with the client; stamped into every
    /// response.
    pub(crate) message_version: i32,
}

impl<'a> Keystone<'a> {
    /// Create a new dispatcher with an operation table of the given
    /// capacity.
    pub fn new(
        imp: crypto::Implementation<'a>,
        context: &'a dyn Context,
        operation_table_size: usize,
        message_version: i32,
    ) -> Self {
        Self {
            imp,
            context,
            operations: OperationTable::new(operation_table_size),
            message_version,
        }
    }

    /// The message version that responses are currently stamped with.
    pub fn message_version(&self) -> i32 {
        self.message_version
    }

    /// Indicate whether an operation with the given handle is in flight.
    pub fn has_operation(&self, op_handle: u64) -> bool {
        self.operations.find(OpHandle(op_handle)).is_some()
    }

    pub fn get_version(&self) -> GetVersionResponse {
        GetVersionResponse { error: ErrorCode::Ok, major_ver: 2, minor_ver: 0, subminor_ver: 0 }
    }

    /// Report the supported message version range and latch the negotiated
    /// version for all future responses.
    pub fn get_version2(&mut self, request: &GetVersion2Request) -> GetVersion2Response {
        let km_version = self.context.km_version();
        let max_message_version = message_version(km_version, KM_DATE);
        self.message_version = core::cmp::min(request.max_message_version, max_message_version);
        info!(
            "negotiated message version {} (client max {}, our max {})",
            self.message_version, request.max_message_version, max_message_version
        );
        GetVersion2Response {
            error: ErrorCode::Ok,
            km_version,
            km_date: KM_DATE,
            max_message_version,
        }
    }

    pub fn supported_algorithms(&self) -> SupportedAlgorithmsResponse {
        match try_to_vec(self.context.supported_algorithms()) {
            Ok(algorithms) => SupportedAlgorithmsResponse {
                message_version: self.message_version,
                error: ErrorCode::Ok,
                algorithms,
            },
            Err(e) => SupportedAlgorithmsResponse {
                message_version: self.message_version,
                error: response_error("SupportedAlgorithms", e),
                algorithms: alloc::vec::Vec::new(),
            },
        }
    }

    pub fn supported_block_modes(
        &self,
        request: &SupportedBlockModesRequest,
    ) -> SupportedBlockModesResponse {
        match self
            .op_factory(request.algorithm, request.purpose)
            .and_then(|factory| try_to_vec(factory.supported_block_modes()))
        {
            Ok(block_modes) => SupportedBlockModesResponse {
                message_version: self.message_version,
                error: ErrorCode::Ok,
                block_modes,
            },
            Err(e) => SupportedBlockModesResponse {
                message_version: self.message_version,
                error: response_error("SupportedBlockModes", e),
                block_modes: alloc::vec::Vec::new(),
            },
        }
    }

    pub fn supported_padding_modes(
        &self,
        request: &SupportedPaddingModesRequest,
    ) -> SupportedPaddingModesResponse {
        match self
            .op_factory(request.algorithm, request.purpose)
            .and_then(|factory| try_to_vec(factory.supported_padding_modes()))
        {
            Ok(padding_modes) => SupportedPaddingModesResponse {
                message_version: self.message_version,
                error: ErrorCode::Ok,
                padding_modes,
            },
            Err(e) => SupportedPaddingModesResponse {
                message_version: self.message_version,
                error: response_error("SupportedPaddingModes", e),
                padding_modes: alloc::vec::Vec::new(),
            },
        }
    }

    pub fn supported_digests(&self, request: &SupportedDigestsRequest) -> SupportedDigestsResponse {
        match self
            .op_factory(request.algorithm, request.purpose)
            .and_then(|factory| try_to_vec(factory.supported_digests()))
        {
            Ok(digests) => SupportedDigestsResponse {
                message_version: self.message_version,
                error: ErrorCode::Ok,
                digests,
            },
            Err(e) => SupportedDigestsResponse {
                message_version: self.message_version,
                error: response_error("SupportedDigests", e),
                digests: alloc::vec::Vec::new(),
            },
        }
    }

    pub fn supported_import_formats(
        &self,
        request: &SupportedImportFormatsRequest,
    ) -> SupportedImportFormatsResponse {
        match self.key_formats(request.algorithm, true) {
            Ok(formats) => SupportedImportFormatsResponse {
                message_version: self.message_version,
                error: ErrorCode::Ok,
                formats,
            },
            Err(e) => SupportedImportFormatsResponse {
                message_version: self.message_version,
                error: response_error("SupportedImportFormats", e),
                formats: alloc::vec::Vec::new(),
            },
        }
    }

    pub fn supported_export_formats(
        &self,
        request: &SupportedExportFormatsRequest,
    ) -> SupportedExportFormatsResponse {
        match self.key_formats(request.algorithm, false) {
            Ok(formats) => SupportedExportFormatsResponse {
                message_version: self.message_version,
                error: ErrorCode::Ok,
                formats,
            },
            Err(e) => SupportedExportFormatsResponse {
                message_version: self.message_version,
                error: response_error("SupportedExportFormats", e),
                formats: alloc::vec::Vec::new(),
            },
        }
    }

    pub fn get_hmac_sharing_parameters(&self) -> GetHmacSharingParametersResponse {
        match self.policy().and_then(|policy| policy.hmac_sharing_parameters()) {
            Ok(params) => GetHmacSharingParametersResponse {
                message_version: self.message_version,
                error: ErrorCode::Ok,
                params: Some(params),
            },
            Err(e) => GetHmacSharingParametersResponse {
                message_version: self.message_version,
                error: response_error("GetHmacSharingParameters", e),
                params: None,
            },
        }
    }

    pub fn compute_shared_hmac(&self, request: &ComputeSharedHmacRequest) -> ComputeSharedHmacResponse {
        match self.policy().and_then(|policy| policy.compute_shared_hmac(&request.params_array)) {
            Ok(sharing_check) => ComputeSharedHmacResponse {
                message_version: self.message_version,
                error: ErrorCode::Ok,
                sharing_check,
            },
            Err(e) => ComputeSharedHmacResponse {
                message_version: self.message_version,
                error: response_error("ComputeSharedHmac", e),
                sharing_check: alloc::vec::Vec::new(),
            },
        }
    }

    pub fn verify_authorization(
        &self,
        request: &VerifyAuthorizationRequest,
    ) -> VerifyAuthorizationResponse {
        match self.policy().and_then(|policy| {
            policy.verify_authorization(request.challenge, &request.parameters_to_verify)
        }) {
            Ok(token) => VerifyAuthorizationResponse {
                message_version: self.message_version,
                error: ErrorCode::Ok,
                token: Some(token),
            },
            Err(e) => VerifyAuthorizationResponse {
                message_version: self.message_version,
                error: response_error("VerifyAuthorization", e),
                token: None,
            },
        }
    }

    pub fn generate_timestamp_token(
        &self,
        request: &GenerateTimestampTokenRequest,
    ) -> GenerateTimestampTokenResponse {
        match self.policy().and_then(|policy| policy.generate_timestamp_token(request.challenge)) {
            Ok(token) => GenerateTimestampTokenResponse {
                message_version: self.message_version,
                error: ErrorCode::Ok,
                token: Some(token),
            },
            Err(e) => GenerateTimestampTokenResponse {
                message_version: self.message_version,
                error: response_error("GenerateTimestampToken", e),
                token: None,
            },
        }
    }

    /// Mix caller-provided entropy into the RNG.
    pub fn add_rng_entropy(&mut self, request: &AddRngEntropyRequest) -> AddRngEntropyResponse {
        self.imp.rng.add_entropy(&request.random_data);
        AddRngEntropyResponse { message_version: self.message_version, error: ErrorCode::Ok }
    }

    pub fn early_boot_ended(&mut self) -> EarlyBootEndedResponse {
        if let Some(policy) = self.context.enforcement_policy() {
            policy.early_boot_ended();
        }
        EarlyBootEndedResponse { message_version: self.message_version, error: ErrorCode::Ok }
    }

    pub fn device_locked(&mut self, request: &DeviceLockedRequest) -> DeviceLockedResponse {
        if let Some(policy) = self.context.enforcement_policy() {
            policy.device_locked(request.password_only);
        }
        DeviceLockedResponse { message_version: self.message_version, error: ErrorCode::Ok }
    }

    pub fn configure(&mut self, request: &ConfigureRequest) -> ConfigureResponse {
        let error = match self
            .context
            .set_system_version(request.os_version, request.os_patchlevel)
        {
            Ok(()) => ErrorCode::Ok,
            Err(e) => response_error("Configure", e),
        };
        ConfigureResponse { message_version: self.message_version, error }
    }

    /// The enforcement policy, or `Unimplemented` if the context has none.
    pub(crate) fn policy(&self) -> Result<&dyn EnforcementPolicy, Error> {
        self.context
            .enforcement_policy()
            .ok_or_else(|| ks_err!(Unimplemented, "no enforcement policy configured"))
    }

    fn op_factory(
        &self,
        algorithm: Algorithm,
        purpose: KeyPurpose,
    ) -> Result<&dyn OperationFactory, Error> {
        if self.context.key_factory(algorithm).is_none() {
            return Err(ks_err!(UnsupportedAlgorithm, "no factory for {:?}", algorithm));
        }
        self.context.operation_factory(algorithm, purpose).ok_or_else(|| {
            ks_err!(UnsupportedPurpose, "purpose {:?} not available for {:?}", purpose, algorithm)
        })
    }

    fn key_formats(&self, algorithm: Algorithm, import: bool) -> Result<alloc::vec::Vec<KeyFormat>, Error> {
        let factory = self
            .context
            .key_factory(algorithm)
            .ok_or_else(|| ks_err!(UnsupportedAlgorithm, "no factory for {:?}", algorithm))?;
        try_to_vec(if import {
            factory.supported_import_formats()
        } else {
            factory.supported_export_formats()
        })
    }
}

/// Log a failed request and collapse its error for the response.
pub(crate) fn response_error(op: &'static str, e: Error) -> ErrorCode {
    error!("{} failed: {:?}", op, e);
    e.into()
}
