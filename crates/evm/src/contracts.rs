// SPDX-License-Identifier: LGPL-3.0-only
//
// This file is provided WITHOUT ANY WARRANTY;
// without even the implied warranty of MERCHANTABILITY
// or FITNESS FOR A PARTICULAR PURPOSE.

use crate::errors::LedgerError;
use alloy::{
    network::{EthereumWallet, ReceiptResponse},
    primitives::{Address, Bytes, B256, U256},
    providers::{DynProvider, Provider, ProviderBuilder},
    rpc::types::TransactionReceipt,
    signers::local::PrivateKeySigner,
    sol,
    sol_types::SolEvent,
};
use async_trait::async_trait;
use eyre::Result;
use once_cell::sync::Lazy;
use std::marker::PhantomData;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Serializes nonce selection and broadcast for every writer in the process
static NONCE_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

pub const RISK_LEVEL: &str = "riskLevel";
pub const LOAN_RATE_BPS: &str = "loanRateBps";
pub const RISK_FACTOR: &str = "riskFactor";

/// Every encrypted output the loan-risk contract keeps per borrower
pub const LOAN_RISK_OUTPUTS: &[&str] = &[RISK_LEVEL, LOAN_RATE_BPS, RISK_FACTOR];

sol! {
    #[derive(Debug)]
    #[sol(rpc)]
    contract LoanRisk {
        event Submitted(address indexed borrower, address indexed lender);
        event Computed(address indexed borrower);

        error ZamaProtocolUnsupported();

        function confidentialProtocolId() external view returns (uint256);
        function getRiskLevel(address borrower) external view returns (bytes32);
        function getLoanRateBps(address borrower) external view returns (bytes32);
        function getRiskFactor(address borrower) external view returns (bytes32);
        function grantAccess(address to) external;
        function submitAndCompute(
            bytes32 creditScore,
            bytes32 income,
            bytes32 debtRatioBps,
            bytes calldata inputProof,
            address lender
        ) external;
    }
}

/// Message for a broadcast transaction whose receipt never arrived. Carries the hash so the
/// caller can look it up before sending again.
fn unconfirmed(tx_hash: B256, err: impl std::fmt::Display) -> String {
    format!("transaction {tx_hash} was broadcast but its receipt is unknown: {err}")
}

async fn next_pending_nonce<P>(provider: &P, from: Address) -> Result<u64, LedgerError>
where
    P: Provider + Send + Sync,
{
    Ok(provider.get_transaction_count(from).pending().await?)
}

/// Confirmation that a transaction was included
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerReceipt {
    pub transaction_hash: B256,
    pub block_number: Option<u64>,
    /// Whether the receipt carries a `Computed` event
    pub computed: bool,
}

impl LedgerReceipt {
    fn from_receipt(receipt: TransactionReceipt) -> Result<Self, LedgerError> {
        if !receipt.status() {
            return Err(LedgerError::Reverted {
                reason: format!("transaction {} reverted", receipt.transaction_hash),
            });
        }
        let computed = receipt
            .inner
            .logs()
            .iter()
            .any(|log| log.topics().first() == Some(&LoanRisk::Computed::SIGNATURE_HASH));

        Ok(Self {
            transaction_hash: receipt.transaction_hash,
            block_number: receipt.block_number,
            computed,
        })
    }
}

/// A contract that accepts encrypted inputs and runs its computation on them
#[async_trait]
pub trait ComputeTarget: Send + Sync {
    fn address(&self) -> Address;

    /// Submit the encrypted inputs together with their proof in one transaction and wait
    /// for it to be included
    async fn submit_and_compute(
        &self,
        handles: [B256; 3],
        proof: Bytes,
        lender: Address,
    ) -> Result<LedgerReceipt, LedgerError>;
}

/// Read access to the encrypted result handles a contract keeps per subject
#[async_trait]
pub trait ResultReader: Send + Sync {
    fn address(&self) -> Address;

    /// Names of the outputs `result_handle` understands
    fn outputs(&self) -> &'static [&'static str];

    async fn result_handle(&self, output: &str, subject: Address) -> Result<B256, LedgerError>;
}

/// Marker type for read-only contracts
#[derive(Clone)]
pub struct ReadOnly;

/// Marker type for contracts that can sign and send transactions
#[derive(Clone)]
pub struct ReadWrite;

#[derive(Clone)]
pub struct LoanRiskContract<T> {
    provider: Arc<DynProvider>,
    address: Address,
    sender: Option<Address>,
    _marker: PhantomData<T>,
}

pub type LoanRiskReadContract = LoanRiskContract<ReadOnly>;
pub type LoanRiskWriteContract = LoanRiskContract<ReadWrite>;

impl<T> LoanRiskContract<T> {
    pub fn provider(&self) -> Arc<DynProvider> {
        self.provider.clone()
    }

    /// Identifier of the confidential protocol the deployment was configured for
    pub async fn protocol_id(&self) -> Result<U256, LedgerError> {
        let contract = LoanRisk::new(self.address, &*self.provider);
        Ok(contract.confidentialProtocolId().call().await?)
    }
}

impl LoanRiskContract<ReadWrite> {
    pub fn sender(&self) -> Option<Address> {
        self.sender
    }

    /// Allow `grantee` to decrypt the caller's results
    pub async fn grant_access(&self, grantee: Address) -> Result<LedgerReceipt, LedgerError> {
        let contract = LoanRisk::new(self.address, &*self.provider);
        let pending = {
            let _guard = NONCE_LOCK.lock().await;
            let nonce = next_pending_nonce(&*self.provider, self.signing_account()?).await?;
            contract.grantAccess(grantee).nonce(nonce).send().await?
        };
        debug!(tx = %pending.tx_hash(), grantee = %grantee, "grantAccess sent");
        let receipt = pending
            .get_receipt()
            .await
            .map_err(|e| LedgerError::Transport(e.to_string()))?;
        LedgerReceipt::from_receipt(receipt)
    }

    fn signing_account(&self) -> Result<Address, LedgerError> {
        self.sender
            .ok_or_else(|| LedgerError::Other("contract has no signing account".to_string()))
    }
}

pub struct LoanRiskContractFactory;

impl LoanRiskContractFactory {
    /// Create a contract that signs with `private_key`
    pub async fn create_write(
        rpc_url: &str,
        contract_address: Address,
        private_key: &str,
    ) -> Result<LoanRiskWriteContract> {
        let signer: PrivateKeySigner = private_key.parse()?;
        let sender = signer.address();
        let provider = ProviderBuilder::new()
            .wallet(EthereumWallet::from(signer))
            .connect(rpc_url)
            .await?
            .erased();

        Ok(LoanRiskContract {
            provider: Arc::new(provider),
            address: contract_address,
            sender: Some(sender),
            _marker: PhantomData,
        })
    }

    pub async fn create_read(
        rpc_url: &str,
        contract_address: Address,
    ) -> Result<LoanRiskReadContract> {
        let provider = ProviderBuilder::new().connect(rpc_url).await?.erased();

        Ok(LoanRiskContract {
            provider: Arc::new(provider),
            address: contract_address,
            sender: None,
            _marker: PhantomData,
        })
    }
}

#[async_trait]
impl ComputeTarget for LoanRiskContract<ReadWrite> {
    fn address(&self) -> Address {
        self.address
    }

    async fn submit_and_compute(
        &self,
        handles: [B256; 3],
        proof: Bytes,
        lender: Address,
    ) -> Result<LedgerReceipt, LedgerError> {
        let [credit_score, income, debt_ratio] = handles;
        let contract = LoanRisk::new(self.address, &*self.provider);

        // The lock only covers nonce selection and broadcast, waiting for inclusion happens
        // without it
        let pending = {
            let _guard = NONCE_LOCK.lock().await;
            let nonce = next_pending_nonce(&*self.provider, self.signing_account()?).await?;
            contract
                .submitAndCompute(credit_score, income, debt_ratio, proof, lender)
                .nonce(nonce)
                .send()
                .await?
        };
        let tx_hash = *pending.tx_hash();
        info!(tx = %tx_hash, "submitAndCompute sent, waiting for inclusion");

        // The transaction is already broadcast, so the hash travels with the error
        let receipt = pending
            .get_receipt()
            .await
            .map_err(|e| LedgerError::Transport(unconfirmed(tx_hash, e)))?;
        LedgerReceipt::from_receipt(receipt)
    }
}

#[async_trait]
impl<T: Send + Sync> ResultReader for LoanRiskContract<T> {
    fn address(&self) -> Address {
        self.address
    }

    fn outputs(&self) -> &'static [&'static str] {
        LOAN_RISK_OUTPUTS
    }

    async fn result_handle(&self, output: &str, subject: Address) -> Result<B256, LedgerError> {
        let contract = LoanRisk::new(self.address, &*self.provider);
        let handle = match output {
            RISK_LEVEL => contract.getRiskLevel(subject).call().await?,
            LOAN_RATE_BPS => contract.getLoanRateBps(subject).call().await?,
            RISK_FACTOR => contract.getRiskFactor(subject).call().await?,
            other => return Err(LedgerError::UnknownOutput(other.to_string())),
        };
        Ok(handle)
    }
}
