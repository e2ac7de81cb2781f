// SPDX-License-Identifier: LGPL-3.0-only
//
// This file is provided WITHOUT ANY WARRANTY;
// without even the implied warranty of MERCHANTABILITY
// or FITNESS FOR A PARTICULAR PURPOSE.

mod bfv;

pub use bfv::BfvBackend;

use crate::error::{Error, Result};
use crate::types::{CiphertextHandle, NetworkId, ValidityProof, Width};
use alloy::primitives::Address;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Largest batch a single proof can describe
pub const MAX_BATCH_SIZE: usize = u8::MAX as usize;

/// A typed plaintext value waiting to be encrypted
pub struct PlaintextInput {
    field: String,
    width: Width,
    value: u64,
}

impl PlaintextInput {
    /// Fails with [`Error::InputOutOfRange`] when `value` does not fit in `width`
    pub fn new(field: &str, width: Width, value: u128) -> Result<Self> {
        if value > width.max() as u128 {
            return Err(Error::out_of_range(
                field,
                format!("value does not fit in {width}"),
            ));
        }
        Ok(Self {
            field: field.to_string(),
            width,
            value: value as u64,
        })
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    pub fn width(&self) -> Width {
        self.width
    }

    pub fn value(&self) -> u64 {
        self.value
    }
}

impl fmt::Debug for PlaintextInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlaintextInput")
            .field("field", &self.field)
            .field("width", &self.width)
            .field("value", &"<redacted>")
            .finish()
    }
}

/// The context every handle and proof of a batch is bound to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputBinding {
    pub chain_id: NetworkId,
    pub target: Address,
    pub submitter: Address,
}

/// Turns a batch of plaintexts into handles and one proof covering all of them
pub trait EncryptionBackend: Send + Sync {
    fn encrypt_batch(
        &self,
        binding: &InputBinding,
        inputs: &[PlaintextInput],
    ) -> Result<(Vec<CiphertextHandle>, ValidityProof)>;
}

/// Handles in input order plus the proof that covers them
#[derive(Debug)]
pub struct EncryptedBatch {
    binding: InputBinding,
    handles: Vec<CiphertextHandle>,
    proof: ValidityProof,
}

impl EncryptedBatch {
    pub fn binding(&self) -> &InputBinding {
        &self.binding
    }

    pub fn handles(&self) -> &[CiphertextHandle] {
        &self.handles
    }

    pub fn proof(&self) -> &ValidityProof {
        &self.proof
    }

    pub fn into_parts(self) -> (InputBinding, Vec<CiphertextHandle>, ValidityProof) {
        (self.binding, self.handles, self.proof)
    }
}

/// Entry point for building encrypted inputs on one network
#[derive(Clone)]
pub struct InputBuilder {
    backend: Arc<dyn EncryptionBackend>,
    chain_id: NetworkId,
}

impl InputBuilder {
    pub fn new(backend: Arc<dyn EncryptionBackend>, chain_id: NetworkId) -> Self {
        Self { backend, chain_id }
    }

    /// Start a batch bound to `target` and `submitter`
    pub fn create(&self, target: Address, submitter: Address) -> EncryptedInput {
        EncryptedInput {
            backend: self.backend.clone(),
            binding: InputBinding {
                chain_id: self.chain_id,
                target,
                submitter,
            },
            inputs: Vec::new(),
        }
    }

    pub fn build(
        &self,
        target: Address,
        submitter: Address,
        inputs: Vec<PlaintextInput>,
    ) -> Result<EncryptedBatch> {
        let mut input = self.create(target, submitter);
        for value in inputs {
            input.add(value);
        }
        input.encrypt()
    }
}

/// An ordered batch of plaintexts being assembled
pub struct EncryptedInput {
    backend: Arc<dyn EncryptionBackend>,
    binding: InputBinding,
    inputs: Vec<PlaintextInput>,
}

impl EncryptedInput {
    pub fn add(&mut self, input: PlaintextInput) -> &mut Self {
        self.inputs.push(input);
        self
    }

    pub fn add16(&mut self, field: &str, value: u128) -> Result<&mut Self> {
        Ok(self.add(PlaintextInput::new(field, Width::U16, value)?))
    }

    pub fn add32(&mut self, field: &str, value: u128) -> Result<&mut Self> {
        Ok(self.add(PlaintextInput::new(field, Width::U32, value)?))
    }

    pub fn add64(&mut self, field: &str, value: u128) -> Result<&mut Self> {
        Ok(self.add(PlaintextInput::new(field, Width::U64, value)?))
    }

    pub fn len(&self) -> usize {
        self.inputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty()
    }

    pub fn binding(&self) -> &InputBinding {
        &self.binding
    }

    /// Encrypt everything added so far. CPU bound, run it off the async executor.
    pub fn encrypt(self) -> Result<EncryptedBatch> {
        if self.inputs.is_empty() {
            return Err(Error::EncryptionFailure("no inputs to encrypt".to_string()));
        }
        if self.inputs.len() > MAX_BATCH_SIZE {
            return Err(Error::EncryptionFailure(format!(
                "a batch holds at most {MAX_BATCH_SIZE} inputs, got {}",
                self.inputs.len()
            )));
        }

        let (handles, proof) = self.backend.encrypt_batch(&self.binding, &self.inputs)?;
        if handles.len() != self.inputs.len() {
            return Err(Error::EncryptionFailure(format!(
                "backend returned {} handles for {} inputs",
                handles.len(),
                self.inputs.len()
            )));
        }

        debug!(
            inputs = self.inputs.len(),
            proof_len = proof.len(),
            target = %self.binding.target,
            "encrypted input batch"
        );

        Ok(EncryptedBatch {
            binding: self.binding,
            handles,
            proof,
        })
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::types::CiphertextHandle;

    /// Handles carry the input index and width so tests can check ordering
    pub struct TransparentBackend;

    impl EncryptionBackend for TransparentBackend {
        fn encrypt_batch(
            &self,
            binding: &InputBinding,
            inputs: &[PlaintextInput],
        ) -> Result<(Vec<CiphertextHandle>, ValidityProof)> {
            let handles = inputs
                .iter()
                .enumerate()
                .map(|(index, input)| {
                    let mut bytes = [0u8; 32];
                    bytes[0] = 0xee;
                    bytes[21] = index as u8;
                    bytes[22..30].copy_from_slice(&binding.chain_id.to_be_bytes());
                    bytes[30] = input.width().fhe_type().code();
                    CiphertextHandle::new(bytes)
                })
                .collect();
            Ok((handles, ValidityProof::new(vec![1, inputs.len() as u8])))
        }
    }
}
