// SPDX-License-Identifier: LGPL-3.0-only
//
// This file is provided WITHOUT ANY WARRANTY;
// without even the implied warranty of MERCHANTABILITY
// or FITNESS FOR A PARTICULAR PURPOSE.

use crate::cancel::{until_cancelled, CancelSignal};
use crate::error::{Error, Result};
use crate::input::EncryptedBatch;
use crate::types::{CiphertextHandle, TransactionReceipt};
use alloy::primitives::{Address, B256};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use veil_evm::{ComputeTarget, LedgerError};

/// Plain parameters sent alongside the encrypted inputs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AuxiliaryParams {
    /// Another identity allowed to read the results, eg. a lender
    pub secondary_identity: Option<Address>,
}

pub(crate) fn submission_error(err: LedgerError) -> Error {
    match err {
        LedgerError::Reverted { reason } => Error::SubmissionRejected { reason },
        LedgerError::Rpc { message, .. } => Error::SubmissionRejected { reason: message },
        LedgerError::UserRejected(message) => Error::UserCancelled(message),
        LedgerError::Transport(message) => Error::NetworkUnavailable(message),
        LedgerError::UnknownOutput(output) => Error::InvalidHandle(output),
        LedgerError::Other(message) => Error::Failed(message),
    }
}

/// Sends encrypted batches to a computation target.
///
/// A submission is not idempotent and is never retried here. Cancelling stops waiting but
/// cannot recall a transaction that was already broadcast.
pub struct SubmissionClient {
    target: Arc<dyn ComputeTarget>,
}

impl SubmissionClient {
    pub fn new(target: Arc<dyn ComputeTarget>) -> Self {
        Self { target }
    }

    pub fn target(&self) -> Address {
        self.target.address()
    }

    #[instrument(skip_all, fields(target = %self.target.address()))]
    pub async fn submit(
        &self,
        batch: EncryptedBatch,
        aux: AuxiliaryParams,
        cancel: Option<&CancelSignal>,
    ) -> Result<TransactionReceipt> {
        let (binding, handles, proof) = batch.into_parts();
        if binding.target != self.target.address() {
            return Err(Error::InvalidHandle(format!(
                "inputs were encrypted for {} but are being sent to {}",
                binding.target,
                self.target.address()
            )));
        }

        let count = handles.len();
        let handles: [B256; 3] = handles
            .into_iter()
            .map(CiphertextHandle::into_b256)
            .collect::<Vec<_>>()
            .try_into()
            .map_err(|_| Error::InvalidHandle(format!("expected 3 handles, got {count}")))?;
        let lender = aux.secondary_identity.unwrap_or(Address::ZERO);

        info!(submitter = %binding.submitter, %lender, "submitting encrypted inputs");
        let receipt = until_cancelled(
            cancel,
            self.target
                .submit_and_compute(handles, proof.into_bytes(), lender),
        )
        .await?
        .map_err(submission_error)?;

        if !receipt.computed {
            warn!(tx = %receipt.transaction_hash, "receipt carries no Computed event");
        }
        info!(
            tx = %receipt.transaction_hash,
            block = ?receipt.block_number,
            "submission included"
        );
        Ok(TransactionReceipt {
            tx_hash: receipt.transaction_hash,
            block_number: receipt.block_number,
        })
    }
}


#[cfg(test)]
mod tests {
    use super::testing::RecordingTarget;
    use super::*;
    use crate::input::testing::TransparentBackend;
    use crate::input::InputBuilder;
    use alloy::primitives::address;

    const TARGET: Address = address!("9fE46736679d2D9a65F0992F2272dE9f3c7fa6e0");
    const SUBMITTER: Address = address!("f39Fd6e51aad88F6F4ce6aB8827279cffFb92266");

    fn batch(target: Address, values: &[u128]) -> Result<EncryptedBatch> {
        let mut input = InputBuilder::new(Arc::new(TransparentBackend), 31337).create(target, SUBMITTER);
        for value in values {
            input.add32("value", *value)?;
        }
        input.encrypt()
    }

    #[tokio::test]
    async fn test_submits_handles_proof_and_zero_lender() -> Result<()> {
        let target = Arc::new(RecordingTarget::new(TARGET));
        let client = SubmissionClient::new(target.clone());

        let receipt = client
            .submit(batch(TARGET, &[750, 120, 1500])?, AuxiliaryParams::default(), None)
            .await?;
        assert_eq!(receipt.block_number, Some(42));

        let submitted = target.submitted.lock().unwrap();
        assert_eq!(submitted.len(), 1);
        assert_eq!(submitted[0].lender, Address::ZERO);
        assert_eq!(submitted[0].handles[2][21], 2);
        assert_eq!(submitted[0].proof.as_ref(), &[1, 3]);
        Ok(())
    }

    #[tokio::test]
    async fn test_wrong_arity_or_target_is_refused_locally() -> Result<()> {
        let target = Arc::new(RecordingTarget::new(TARGET));
        let client = SubmissionClient::new(target.clone());

        let err = client
            .submit(batch(TARGET, &[1, 2])?, AuxiliaryParams::default(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidHandle(_)));

        let err = client
            .submit(batch(SUBMITTER, &[1, 2, 3])?, AuxiliaryParams::default(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidHandle(_)));
        assert!(target.submitted.lock().unwrap().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_ledger_errors_map_to_the_taxonomy() -> Result<()> {
        let cases = [
            (
                LedgerError::Reverted {
                    reason: "ZamaProtocolUnsupported".into(),
                },
                "Submission rejected: ZamaProtocolUnsupported",
            ),
            (
                LedgerError::UserRejected("denied".into()),
                "Cancelled by the user: denied",
            ),
            (
                LedgerError::Transport("connection refused".into()),
                "Network unavailable: connection refused",
            ),
        ];
        for (ledger_error, expected) in cases {
            let mut target = RecordingTarget::new(TARGET);
            target.fail_with = Some(ledger_error);
            let client = SubmissionClient::new(Arc::new(target));
            let err = client
                .submit(batch(TARGET, &[1, 2, 3])?, AuxiliaryParams::default(), None)
                .await
                .unwrap_err();
            assert_eq!(err.to_string(), expected);
        }
        Ok(())
    }
}
