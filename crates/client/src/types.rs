// SPDX-License-Identifier: LGPL-3.0-only
//
// This file is provided WITHOUT ANY WARRANTY;
// without even the implied warranty of MERCHANTABILITY
// or FITNESS FOR A PARTICULAR PURPOSE.

use alloy::primitives::{Bytes, B256};
use std::fmt;

/// Chain id of the ledger a value belongs to
pub type NetworkId = u64;

/// Handle layout version produced by this client
pub const HANDLE_VERSION: u8 = 0;

const HANDLE_INDEX_BYTE: usize = 21;
const HANDLE_CHAIN_ID: std::ops::Range<usize> = 22..30;
const HANDLE_TYPE_BYTE: usize = 30;

/// Bit-size class of an encrypted input
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Width {
    U16,
    U32,
    U64,
}

impl Width {
    pub fn bits(&self) -> u32 {
        match self {
            Width::U16 => 16,
            Width::U32 => 32,
            Width::U64 => 64,
        }
    }

    pub fn max(&self) -> u64 {
        match self {
            Width::U16 => u16::MAX as u64,
            Width::U32 => u32::MAX as u64,
            Width::U64 => u64::MAX,
        }
    }

    pub fn fhe_type(&self) -> FheType {
        match self {
            Width::U16 => FheType::Uint16,
            Width::U32 => FheType::Uint32,
            Width::U64 => FheType::Uint64,
        }
    }
}

impl fmt::Display for Width {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-bit", self.bits())
    }
}

/// Encrypted type codes as they appear in byte 30 of a handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FheType {
    Bool = 0,
    Uint8 = 2,
    Uint16 = 3,
    Uint32 = 4,
    Uint64 = 5,
}

impl FheType {
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(FheType::Bool),
            2 => Some(FheType::Uint8),
            3 => Some(FheType::Uint16),
            4 => Some(FheType::Uint32),
            5 => Some(FheType::Uint64),
            _ => None,
        }
    }

    pub fn code(&self) -> u8 {
        *self as u8
    }
}

/// Opaque reference to one freshly encrypted input.
///
/// Only meaningful together with the [`ValidityProof`] of its batch, so it is consumed by the
/// submission rather than copied around.
#[derive(PartialEq, Eq)]
pub struct CiphertextHandle([u8; 32]);

impl CiphertextHandle {
    pub(crate) fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn index(&self) -> u8 {
        self.0[HANDLE_INDEX_BYTE]
    }

    pub fn fhe_type(&self) -> Option<FheType> {
        FheType::from_code(self.0[HANDLE_TYPE_BYTE])
    }

    pub fn into_b256(self) -> B256 {
        B256::from(self.0)
    }
}

impl fmt::Debug for CiphertextHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CiphertextHandle(0x{})", hex::encode(self.0))
    }
}

/// Aggregate proof that a batch of handles was honestly built for one target and submitter
pub struct ValidityProof(Vec<u8>);

impl ValidityProof {
    pub(crate) fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_bytes(self) -> Bytes {
        Bytes::from(self.0)
    }
}

impl fmt::Debug for ValidityProof {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ValidityProof({} bytes)", self.0.len())
    }
}

/// Reference to an encrypted output kept by the remote computation.
///
/// The all-zero handle means there is no result yet.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ResultHandle(B256);

impl ResultHandle {
    pub const EMPTY: ResultHandle = ResultHandle(B256::ZERO);

    pub fn new(value: B256) -> Self {
        Self(value)
    }

    pub fn is_empty(&self) -> bool {
        self.0 == B256::ZERO
    }

    pub fn as_b256(&self) -> B256 {
        self.0
    }

    pub fn fhe_type(&self) -> Option<FheType> {
        FheType::from_code(self.0[HANDLE_TYPE_BYTE])
    }

    pub fn chain_id(&self) -> NetworkId {
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&self.0[HANDLE_CHAIN_ID]);
        u64::from_be_bytes(bytes)
    }
}

impl From<B256> for ResultHandle {
    fn from(value: B256) -> Self {
        Self(value)
    }
}

impl fmt::Display for ResultHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for ResultHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ResultHandle({})", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClearValue {
    Bool(bool),
    Uint(u64),
}

impl ClearValue {
    pub fn as_u64(&self) -> u64 {
        match self {
            ClearValue::Bool(b) => *b as u64,
            ClearValue::Uint(v) => *v,
        }
    }
}

impl fmt::Display for ClearValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClearValue::Bool(b) => write!(f, "{b}"),
            ClearValue::Uint(v) => write!(f, "{v}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecryptedValue {
    pub handle: ResultHandle,
    pub value: ClearValue,
}

/// Proof of inclusion for a submission
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionReceipt {
    pub tx_hash: B256,
    pub block_number: Option<u64>,
}

#[cfg(test)]
pub(crate) fn result_handle(seed: u8, fhe_type: FheType, chain_id: NetworkId) -> ResultHandle {
    let mut bytes = [seed; 32];
    bytes[HANDLE_INDEX_BYTE] = 0;
    bytes[HANDLE_CHAIN_ID].copy_from_slice(&chain_id.to_be_bytes());
    bytes[HANDLE_TYPE_BYTE] = fhe_type.code();
    bytes[31] = HANDLE_VERSION;
    ResultHandle::new(B256::from(bytes))
}
