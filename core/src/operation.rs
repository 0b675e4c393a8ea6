//! In-flight operations: the bounded handle-addressed table and the
//! Begin/Update/Finish/Abort engine.

use alloc::{boxed::Box, vec::Vec};
use log::{error, warn};

use keystone_common::crypto::Rng;
use keystone_common::{get_opt_tag_value, ks_err, AuthorizationSet, Error};
use keystone_wire::ops::*;
use keystone_wire::types::{ErrorCode, KeyParam, KeyPurpose, Tag};
use keystone_wire::{
    CONFIRMATION_MESSAGE_MAX_SIZE, CONFIRMATION_TOKEN_MESSAGE_TAG_SIZE, CONFIRMATION_TOKEN_SIZE,
};

use crate::device::{CryptoOperation, FinishOutput, KeyId, UpdateOutput};
use crate::{response_error, Keystone};

/// Newtype for operation handles.  Zero is reserved as "no operation".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct OpHandle(pub u64);

/// Handles stay within the positive `i64` range.
const HANDLE_RANGE_MASK: u64 = u64::MAX >> 1;

/// Append-only buffer accumulating the data that a trusted confirmation
/// token must cover.
pub(crate) struct ConfirmationVerifier {
    buffer: Vec<u8>,
}

impl ConfirmationVerifier {
    /// The message size limit plus the wire overhead of the prompt framing.
    const MAX_SIZE: usize = CONFIRMATION_MESSAGE_MAX_SIZE + CONFIRMATION_TOKEN_MESSAGE_TAG_SIZE;

    fn new() -> Result<Self, Error> {
        let mut buffer = Vec::new();
        buffer
            .try_reserve_exact(Self::MAX_SIZE)
            .map_err(|_e| Error::Alloc("confirmation verifier buffer"))?;
        Ok(Self { buffer })
    }

    /// Append `input`, enforcing the size bound on every call.
    fn try_append(&mut self, input: &[u8]) -> Result<(), Error> {
        if self.buffer.len() + input.len() > Self::MAX_SIZE {
            return Err(ks_err!(
                InvalidArgument,
                "confirmation data of size {} + {} too big",
                self.buffer.len(),
                input.len()
            ));
        }
        self.buffer
            .try_reserve(input.len())
            .map_err(|_e| Error::Alloc("confirmation verifier grow"))?;
        self.buffer.extend_from_slice(input);
        Ok(())
    }

    fn data(&self) -> &[u8] {
        &self.buffer
    }
}

/// A live multi-step operation: the factory-supplied state machine plus the
/// metadata the engine needs for policy re-checks and finish post-actions.
pub(crate) struct Operation {
    pub handle: OpHandle,
    pub purpose: KeyPurpose,
    pub key_id: KeyId,
    /// Hardware-enforced subset of the key's authorizations.
    pub hw_enforced: AuthorizationSet,
    /// All of the key's authorizations (hardware-enforced first), passed to
    /// the policy on every step.
    pub authorizations: AuthorizationSet,
    /// Present only for keys that require trusted confirmation.
    pub confirmation_verifier: Option<ConfirmationVerifier>,
    /// Factory-supplied state machine.
    pub inner: Box<dyn CryptoOperation>,
}

struct Entry {
    /// Insertion sequence number; lowest is evicted first.
    seq: u64,
    op: Operation,
}

/// Fixed-capacity table of live operations.  Exactly one entry per handle;
/// lookups are linear scans.
pub(crate) struct OperationTable {
    entries: Vec<Option<Entry>>,
    next_seq: u64,
}

impl OperationTable {
    pub fn new(size: usize) -> Self {
        assert!(size > 0, "operation table must have capacity");
        // Work around Rust limitation that `vec![None; n]` doesn't work.
        Self { entries: (0..size).map(|_| None).collect(), next_seq: 0 }
    }

    /// Insert `op`, assigning it a fresh random non-zero handle.  When the
    /// table is full the longest-resident operation is evicted, with a
    /// best-effort abort of its state machine.
    pub fn add(&mut self, mut op: Operation, rng: &mut dyn Rng) -> OpHandle {
        let handle = self.new_handle(rng);
        op.handle = handle;
        let idx = match self.entries.iter().position(Option::is_none) {
            Some(idx) => idx,
            None => {
                let idx = self.oldest_index();
                if let Some(mut evicted) = self.entries[idx].take() {
                    warn!("operation table full, evicting operation {:?}", evicted.op.handle);
                    if let Err(e) = evicted.op.inner.abort() {
                        error!("failed to abort evicted operation: {:?}", e);
                    }
                }
                idx
            }
        };
        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries[idx] = Some(Entry { seq, op });
        handle
    }

    pub fn find(&self, handle: OpHandle) -> Option<&Operation> {
        self.entries.iter().flatten().map(|entry| &entry.op).find(|op| op.handle == handle)
    }

    /// Remove and return the operation for `handle`.
    pub fn take(&mut self, handle: OpHandle) -> Option<Operation> {
        let idx = self.index_of(handle)?;
        self.entries[idx].take().map(|entry| entry.op)
    }

    /// Remove and drop the operation for `handle`; absent handles are a
    /// no-op.
    pub fn delete(&mut self, handle: OpHandle) {
        if let Some(idx) = self.index_of(handle) {
            self.entries[idx] = None;
        }
    }

    pub fn index_of(&self, handle: OpHandle) -> Option<usize> {
        self.entries.iter().position(|entry| match entry {
            Some(entry) => entry.op.handle == handle,
            None => false,
        })
    }

    pub fn op_at_mut(&mut self, idx: usize) -> &mut Operation {
        &mut self.entries[idx].as_mut().unwrap(/* safe: caller got idx from index_of */).op
    }

    fn oldest_index(&self) -> usize {
        let mut oldest = 0;
        let mut oldest_seq = u64::MAX;
        for (idx, entry) in self.entries.iter().enumerate() {
            if let Some(entry) = entry {
                if entry.seq < oldest_seq {
                    oldest_seq = entry.seq;
                    oldest = idx;
                }
            }
        }
        oldest
    }

    /// Return a handle value not currently in the table.  Handles are
    /// random, non-zero, and unique among live operations.
    fn new_handle(&self, rng: &mut dyn Rng) -> OpHandle {
        loop {
            let handle = OpHandle(rng.next_u64() & HANDLE_RANGE_MASK);
            if handle.0 != 0 && self.find(handle).is_none() {
                return handle;
            }
            // Zero or already in use, go around again.
        }
    }
}

impl<'a> Keystone<'a> {
    pub fn begin_operation(&mut self, request: &BeginOperationRequest) -> BeginOperationResponse {
        match self.begin_operation_inner(request) {
            Ok((op_handle, output_params)) => BeginOperationResponse {
                message_version: self.message_version,
                error: ErrorCode::Ok,
                op_handle: op_handle.0,
                output_params,
            },
            Err(e) => BeginOperationResponse {
                message_version: self.message_version,
                error: response_error("BeginOperation", e),
                op_handle: 0,
                output_params: Vec::new(),
            },
        }
    }

    fn begin_operation_inner(
        &mut self,
        request: &BeginOperationRequest,
    ) -> Result<(OpHandle, Vec<KeyParam>), Error> {
        let key = self.load_key(&request.key_blob, &request.additional_params)?;

        let algorithm = match key.authorization(Tag::Algorithm) {
            Some(KeyParam::Algorithm(algorithm)) => *algorithm,
            _ => return Err(ks_err!(UnknownError, "key has no algorithm authorization")),
        };
        let factory = self.context.operation_factory(algorithm, request.purpose).ok_or_else(|| {
            ks_err!(
                UnsupportedPurpose,
                "no {:?} operations for {:?} keys",
                request.purpose,
                algorithm
            )
        })?;

        let hw_enforced = key.hw_enforced.clone();
        let mut authorizations = hw_enforced.clone();
        authorizations.try_extend_from_slice(&key.sw_enforced)?;

        let mut inner = factory.create_operation(key, &request.additional_params)?;

        let confirmation_verifier = if authorizations.contains_tag(Tag::TrustedConfirmationRequired)
        {
            Some(ConfirmationVerifier::new()?)
        } else {
            None
        };

        let mut key_id = KeyId::default();
        if let Some(policy) = self.context.enforcement_policy() {
            key_id = policy
                .create_key_id(&request.key_blob)
                .map_err(|_e| ks_err!(UnknownError, "failed to create key id"))?;
            policy.authorize_operation(
                request.purpose,
                key_id,
                &authorizations,
                &request.additional_params,
                0,
                true,
            )?;
        }

        let output_params = inner.begin(&request.additional_params)?;

        let op = Operation {
            handle: OpHandle(0),
            purpose: request.purpose,
            key_id,
            hw_enforced,
            authorizations,
            confirmation_verifier,
            inner,
        };
        let op_handle = self.operations.add(op, &mut *self.imp.rng);
        Ok((op_handle, output_params))
    }

    pub fn update_operation(&mut self, request: &UpdateOperationRequest) -> UpdateOperationResponse {
        match self.update_operation_inner(request) {
            Ok(out) => UpdateOperationResponse {
                message_version: self.message_version,
                error: ErrorCode::Ok,
                input_consumed: out.input_consumed,
                output: out.output,
                output_params: out.output_params,
            },
            Err(e) => UpdateOperationResponse {
                message_version: self.message_version,
                error: response_error("UpdateOperation", e),
                input_consumed: 0,
                output: Vec::new(),
                output_params: Vec::new(),
            },
        }
    }

    fn update_operation_inner(
        &mut self,
        request: &UpdateOperationRequest,
    ) -> Result<UpdateOutput, Error> {
        let context = self.context;
        self.with_operation(OpHandle(request.op_handle), |op| {
            if let Some(verifier) = &mut op.confirmation_verifier {
                verifier.try_append(&request.input)?;
            }
            if let Some(policy) = context.enforcement_policy() {
                policy.authorize_operation(
                    op.purpose,
                    op.key_id,
                    &op.authorizations,
                    &request.additional_params,
                    request.op_handle,
                    false,
                )?;
            }
            op.inner.update(&request.additional_params, &request.input)
        })
    }

    pub fn finish_operation(&mut self, request: &FinishOperationRequest) -> FinishOperationResponse {
        match self.finish_operation_inner(request) {
            Ok(out) => FinishOperationResponse {
                message_version: self.message_version,
                error: ErrorCode::Ok,
                output: out.output,
                output_params: out.output_params,
            },
            Err(e) => FinishOperationResponse {
                message_version: self.message_version,
                error: response_error("FinishOperation", e),
                output: Vec::new(),
                output_params: Vec::new(),
            },
        }
    }

    fn finish_operation_inner(
        &mut self,
        request: &FinishOperationRequest,
    ) -> Result<FinishOutput, Error> {
        // The operation is consumed whatever happens below.
        let mut op = self
            .operations
            .take(OpHandle(request.op_handle))
            .ok_or_else(|| ks_err!(InvalidOperationHandle, "operation not found"))?;

        if let Some(verifier) = &mut op.confirmation_verifier {
            verifier.try_append(&request.input)?;
        }

        if let Some(policy) = self.context.enforcement_policy() {
            policy.authorize_operation(
                op.purpose,
                op.key_id,
                &op.authorizations,
                &request.additional_params,
                request.op_handle,
                false,
            )?;
        }

        let result =
            op.inner.finish(&request.additional_params, &request.input, &request.signature)?;

        // A successful use of a single-use key invalidates it in secure
        // storage; a failure there takes precedence over the confirmation
        // check below.
        if op.hw_enforced.contains(&KeyParam::UsageCountLimit(1)) {
            if let Some(storage) = self.context.secure_key_storage() {
                warn!("deleting single-use key after use");
                storage.delete_key(op.key_id)?;
            }
        }

        if let Some(verifier) = &op.confirmation_verifier {
            let token = get_opt_tag_value!(&request.additional_params, ConfirmationToken)?
                .ok_or_else(|| ks_err!(NoUserConfirmation, "no confirmation token provided"))?;
            let token: &[u8; CONFIRMATION_TOKEN_SIZE] =
                token.as_slice().try_into().map_err(|_e| {
                    ks_err!(InvalidArgument, "confirmation token wrong length {}", token.len())
                })?;
            self.context.check_confirmation_token(verifier.data(), token)?;
        }

        Ok(result)
    }

    pub fn abort_operation(&mut self, request: &AbortOperationRequest) -> AbortOperationResponse {
        let result = match self.operations.take(OpHandle(request.op_handle)) {
            Some(mut op) => op.inner.abort(),
            None => Err(ks_err!(InvalidOperationHandle, "operation not found")),
        };
        let error = match result {
            Ok(()) => ErrorCode::Ok,
            Err(e) => response_error("AbortOperation", e),
        };
        AbortOperationResponse { message_version: self.message_version, error }
    }

    /// Run `f` over the operation for `op_handle`; any failure (including a
    /// missing handle) invalidates the operation.
    fn with_operation<T>(
        &mut self,
        op_handle: OpHandle,
        f: impl FnOnce(&mut Operation) -> Result<T, Error>,
    ) -> Result<T, Error> {
        let idx = self
            .operations
            .index_of(op_handle)
            .ok_or_else(|| ks_err!(InvalidOperationHandle, "operation not found"))?;
        let result = f(self.operations.op_at_mut(idx));
        if result.is_err() {
            self.operations.delete(op_handle);
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::KeyId;
    use keystone_common::AuthorizationSet;

    struct NoopOperation;
    impl CryptoOperation for NoopOperation {
        fn begin(&mut self, _params: &[KeyParam]) -> Result<Vec<KeyParam>, Error> {
            Ok(Vec::new())
        }
        fn update(&mut self, _params: &[KeyParam], input: &[u8]) -> Result<UpdateOutput, Error> {
            Ok(UpdateOutput {
                output: Vec::new(),
                input_consumed: input.len(),
                output_params: Vec::new(),
            })
        }
        fn finish(
            &mut self,
            _params: &[KeyParam],
            _input: &[u8],
            _signature: &[u8],
        ) -> Result<FinishOutput, Error> {
            Ok(FinishOutput::default())
        }
    }

    struct FixedRng(u64);
    impl Rng for FixedRng {
        fn add_entropy(&mut self, _data: &[u8]) {}
        fn fill_bytes(&mut self, dest: &mut [u8]) {
            for byte in dest {
                self.0 = self.0.wrapping_mul(6364136223846793005).wrapping_add(1);
                *byte = (self.0 >> 33) as u8;
            }
        }
    }

    fn noop_op() -> Operation {
        Operation {
            handle: OpHandle(0),
            purpose: KeyPurpose::Encrypt,
            key_id: KeyId::default(),
            hw_enforced: AuthorizationSet::new(),
            authorizations: AuthorizationSet::new(),
            confirmation_verifier: None,
            inner: Box::new(NoopOperation),
        }
    }

    #[test]
    fn test_table_add_find_delete() {
        let mut rng = FixedRng(1);
        let mut table = OperationTable::new(2);
        let h1 = table.add(noop_op(), &mut rng);
        assert_ne!(h1.0, 0);
        assert!(h1.0 < 1u64 << 63);
        assert!(table.find(h1).is_some());

        table.delete(h1);
        assert!(table.find(h1).is_none());
        // Deleting an absent handle is a no-op.
        table.delete(h1);

        let h2 = table.add(noop_op(), &mut rng);
        let op = table.take(h2).unwrap();
        assert_eq!(op.handle, h2);
        assert!(table.take(h2).is_none());
    }

    #[test]
    fn test_table_eviction_order() {
        let mut rng = FixedRng(2);
        let mut table = OperationTable::new(2);
        let h1 = table.add(noop_op(), &mut rng);
        let h2 = table.add(noop_op(), &mut rng);
        let h3 = table.add(noop_op(), &mut rng);
        assert!(table.find(h1).is_none());
        assert!(table.find(h2).is_some());
        assert!(table.find(h3).is_some());

        // Dropping the older survivor means the next eviction hits the
        // younger one.
        table.delete(h2);
        let h4 = table.add(noop_op(), &mut rng);
        let h5 = table.add(noop_op(), &mut rng);
        assert!(table.find(h3).is_none());
        assert!(table.find(h4).is_some());
        assert!(table.find(h5).is_some());
    }

    #[test]
    fn test_confirmation_verifier_bounds() {
        let mut verifier = ConfirmationVerifier::new().unwrap();
        verifier.try_append(&[0; 6144]).unwrap();
        verifier.try_append(&[0; 11]).unwrap();
        let result = verifier.try_append(&[0]);
        assert!(result.is_err());
        assert_eq!(verifier.data().len(), 6144 + 11);
    }
}
