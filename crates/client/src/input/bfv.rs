// SPDX-License-Identifier: LGPL-3.0-only
//
// This file is provided WITHOUT ANY WARRANTY;
// without even the implied warranty of MERCHANTABILITY
// or FITNESS FOR A PARTICULAR PURPOSE.

use super::{EncryptionBackend, InputBinding, PlaintextInput};
use crate::error::{Error, Result};
use crate::types::{CiphertextHandle, ValidityProof, HANDLE_VERSION};
use alloy::primitives::{keccak256, B256};
use fhe::bfv::{BfvParameters, BfvParametersBuilder, Encoding, Plaintext, PublicKey};
use fhe::Error as FheError;
use fhe_traits::{DeserializeParametrized, FheEncoder, FheEncrypter, Serialize};
use rand::thread_rng;
use std::sync::Arc;
use veil_config::BfvPreset;

const PROOF_VERSION: u8 = 1;
const LIMB_BITS: u32 = 32;
const LIMB_MASK: u64 = u32::MAX as u64;

/// Encrypts inputs with BFV under the network public key.
///
/// Each value is split into two 32 bit limbs placed in the first polynomial coefficients.
/// The proof is laid out as
///
/// ```text
/// [version: u8][count: u8][handle; count][binding: 32 bytes]([len: u32 BE][ciphertext]){count}
/// ```
///
/// where `binding = keccak256(chain_id BE || target || submitter || handles...)`.
pub struct BfvBackend {
    params: Arc<BfvParameters>,
    public_key: PublicKey,
}

impl BfvBackend {
    pub fn new(preset: BfvPreset, public_key: &[u8]) -> Result<Self> {
        let params = build_params(preset)?;
        let public_key = PublicKey::from_bytes(public_key, &params)
            .map_err(|e| Error::EncryptionFailure(format!("Error deserializing public key: {e}")))?;
        Ok(Self { params, public_key })
    }

    fn encrypt_value(&self, value: u64) -> Result<Vec<u8>> {
        let limbs = vec![value & LIMB_MASK, value >> LIMB_BITS];
        let pt = Plaintext::try_encode(&limbs, Encoding::poly(), &self.params)
            .map_err(|e: FheError| Error::EncryptionFailure(format!("Error encoding plaintext: {e}")))?;
        let ct = self
            .public_key
            .try_encrypt(&pt, &mut thread_rng())
            .map_err(|e| Error::EncryptionFailure(format!("Error encrypting data: {e}")))?;
        Ok(ct.to_bytes())
    }
}

pub(crate) fn build_params(preset: BfvPreset) -> Result<Arc<BfvParameters>> {
    let mut builder = BfvParametersBuilder::new();
    builder
        .set_degree(preset.degree())
        .set_plaintext_modulus(preset.plaintext_modulus())
        .set_moduli(preset.moduli());
    if let Some(variance) = preset.variance() {
        builder.set_variance(variance);
    }
    builder
        .build_arc()
        .map_err(|e| Error::EncryptionFailure(format!("Invalid BFV parameters: {e}")))
}

fn derive_handle(
    ciphertext: &[u8],
    binding: &InputBinding,
    index: u8,
    input: &PlaintextInput,
) -> CiphertextHandle {
    let mut preimage = Vec::with_capacity(ciphertext.len() + 49);
    preimage.extend_from_slice(ciphertext);
    preimage.extend_from_slice(&binding.chain_id.to_be_bytes());
    preimage.extend_from_slice(binding.target.as_slice());
    preimage.extend_from_slice(binding.submitter.as_slice());
    preimage.push(index);
    let digest = keccak256(&preimage);

    let mut handle = [0u8; 32];
    handle[..21].copy_from_slice(&digest[..21]);
    handle[21] = index;
    handle[22..30].copy_from_slice(&binding.chain_id.to_be_bytes());
    handle[30] = input.width().fhe_type().code();
    handle[31] = HANDLE_VERSION;
    CiphertextHandle::new(handle)
}

pub(crate) fn binding_digest(binding: &InputBinding, handles: &[CiphertextHandle]) -> B256 {
    let mut preimage = Vec::with_capacity(48 + handles.len() * 32);
    preimage.extend_from_slice(&binding.chain_id.to_be_bytes());
    preimage.extend_from_slice(binding.target.as_slice());
    preimage.extend_from_slice(binding.submitter.as_slice());
    for handle in handles {
        preimage.extend_from_slice(handle.as_bytes());
    }
    keccak256(&preimage)
}

impl EncryptionBackend for BfvBackend {
    fn encrypt_batch(
        &self,
        binding: &InputBinding,
        inputs: &[PlaintextInput],
    ) -> Result<(Vec<CiphertextHandle>, ValidityProof)> {
        let count = u8::try_from(inputs.len())
            .map_err(|_| Error::EncryptionFailure("too many inputs".to_string()))?;

        let mut handles = Vec::with_capacity(inputs.len());
        let mut ciphertexts = Vec::with_capacity(inputs.len());
        for (index, input) in inputs.iter().enumerate() {
            let ciphertext = self.encrypt_value(input.value())?;
            handles.push(derive_handle(&ciphertext, binding, index as u8, input));
            ciphertexts.push(ciphertext);
        }

        let mut proof = vec![PROOF_VERSION, count];
        for handle in &handles {
            proof.extend_from_slice(handle.as_bytes());
        }
        proof.extend_from_slice(binding_digest(binding, &handles).as_slice());
        for ciphertext in &ciphertexts {
            let len = u32::try_from(ciphertext.len())
                .map_err(|_| Error::EncryptionFailure("ciphertext too large".to_string()))?;
            proof.extend_from_slice(&len.to_be_bytes());
            proof.extend_from_slice(ciphertext);
        }

        Ok((handles, ValidityProof::new(proof)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::InputBuilder;
    use crate::types::FheType;
    use alloy::primitives::address;
    use anyhow::{ensure, Result};
    use fhe::bfv::{Ciphertext, SecretKey};
    use fhe_traits::{FheDecoder, FheDecrypter};

    struct ParsedProof {
        handles: Vec<[u8; 32]>,
        binding: [u8; 32],
        ciphertexts: Vec<Vec<u8>>,
    }

    fn take<'a>(bytes: &'a [u8], cursor: &mut usize, n: usize) -> Result<&'a [u8]> {
        ensure!(bytes.len() >= *cursor + n, "truncated proof");
        let slice = &bytes[*cursor..*cursor + n];
        *cursor += n;
        Ok(slice)
    }

    fn parse_proof(bytes: &[u8]) -> Result<ParsedProof> {
        ensure!(bytes.len() >= 2 && bytes[0] == PROOF_VERSION, "bad header");
        let count = bytes[1] as usize;
        let mut cursor = 2;

        let mut handles = Vec::new();
        for _ in 0..count {
            handles.push(<[u8; 32]>::try_from(take(bytes, &mut cursor, 32)?)?);
        }
        let binding = <[u8; 32]>::try_from(take(bytes, &mut cursor, 32)?)?;
        let mut ciphertexts = Vec::new();
        for _ in 0..count {
            let len = u32::from_be_bytes(<[u8; 4]>::try_from(take(bytes, &mut cursor, 4)?)?);
            ciphertexts.push(take(bytes, &mut cursor, len as usize)?.to_vec());
        }
        ensure!(cursor == bytes.len(), "trailing bytes");
        Ok(ParsedProof {
            handles,
            binding,
            ciphertexts,
        })
    }

    #[test]
    fn test_bfv_batch_decrypts_to_inputs() -> Result<()> {
        let preset = BfvPreset::Insecure512;
        let params = build_params(preset)?;
        let mut rng = thread_rng();
        let sk = SecretKey::random(&params, &mut rng);
        let pk = PublicKey::new(&sk, &mut rng);

        let backend = Arc::new(BfvBackend::new(preset, &pk.to_bytes())?);
        let target = address!("9fE46736679d2D9a65F0992F2272dE9f3c7fa6e0");
        let submitter = address!("f39Fd6e51aad88F6F4ce6aB8827279cffFb92266");

        let mut input = InputBuilder::new(backend, 31337).create(target, submitter);
        input
            .add16("creditScore", 750)?
            .add64("income", 120_000_000_000)?
            .add32("debtRatioBps", 1500)?;
        let batch = input.encrypt()?;

        let parsed = parse_proof(batch.proof().as_bytes())?;
        assert_eq!(parsed.handles.len(), 3);
        for (handle, raw) in batch.handles().iter().zip(&parsed.handles) {
            assert_eq!(handle.as_bytes(), raw);
        }
        assert_eq!(
            B256::from(parsed.binding),
            binding_digest(batch.binding(), batch.handles())
        );
        assert_eq!(batch.handles()[1].fhe_type(), Some(FheType::Uint64));
        assert_eq!(batch.handles()[2].index(), 2);
        assert_eq!(&batch.handles()[0].as_bytes()[22..30], &31337u64.to_be_bytes());

        let decrypted: Vec<u64> = parsed
            .ciphertexts
            .iter()
            .map(|bytes| -> Result<u64> {
                let ct = Ciphertext::from_bytes(bytes, &params)?;
                let pt = sk.try_decrypt(&ct)?;
                let limbs = Vec::<u64>::try_decode(&pt, Encoding::poly())?;
                Ok(limbs[0] | (limbs[1] << LIMB_BITS))
            })
            .collect::<Result<_>>()?;
        assert_eq!(decrypted, vec![750, 120_000_000_000, 1500]);
        Ok(())
    }

    #[test]
    fn test_bad_public_key_is_an_encryption_failure() {
        assert!(matches!(
            BfvBackend::new(BfvPreset::Insecure512, &[1, 2, 3]),
            Err(Error::EncryptionFailure(_))
        ));
    }
}
