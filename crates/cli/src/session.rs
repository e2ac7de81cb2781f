// SPDX-License-Identifier: LGPL-3.0-only
//
// This file is provided WITHOUT ANY WARRANTY;
// without even the implied warranty of MERCHANTABILITY
// or FITNESS FOR A PARTICULAR PURPOSE.

use crate::helpers::secrets::{private_key, store_cipher};
use alloy::primitives::Address;
use alloy::providers::Provider;
use anyhow::{anyhow, bail, Context, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};
use veil_client::input::{InputBinding, PlaintextInput};
use veil_client::{
    cancel_channel, AuthorizationCache, AuthorizationSettings, AuthorizationStore, BfvBackend,
    CancelSignal, CiphertextHandle, ContextTracker, DecryptionOrchestrator, EncryptionBackend,
    ExecutionContext, HandleFetcher, InMemoryAuthorizationStore, InputBuilder,
    LocalAuthorizationSigner, LoanRiskFlow, RelayerOracle, SignerCapability,
    SledAuthorizationStore, SubmissionClient, SystemClock, TargetProfile, ValidityProof,
};
use veil_config::{AppConfig, ChainConfig};
use veil_evm::{LoanRiskContractFactory, LoanRiskWriteContract};

/// Stands in for the BFV backend when no network public key is configured
struct MissingPublicKey;

impl EncryptionBackend for MissingPublicKey {
    fn encrypt_batch(
        &self,
        _binding: &InputBinding,
        _inputs: &[PlaintextInput],
    ) -> veil_client::Result<(Vec<CiphertextHandle>, ValidityProof)> {
        Err(veil_client::Error::EncryptionFailure(
            "fhe.public_key_file is not configured".to_string(),
        ))
    }
}

fn encryption_backend(config: &AppConfig) -> Result<Arc<dyn EncryptionBackend>> {
    let Some(path) = config.public_key_file() else {
        return Ok(Arc::new(MissingPublicKey));
    };
    let public_key = std::fs::read(&path)
        .with_context(|| format!("Could not read the network public key at {}", path.display()))?;
    Ok(Arc::new(BfvBackend::new(config.fhe.preset, &public_key)?))
}

fn authorization_store(config: &AppConfig) -> Result<Arc<dyn AuthorizationStore>> {
    match config.store_dir() {
        Some(dir) => {
            let cipher = Arc::new(store_cipher()?);
            Ok(Arc::new(SledAuthorizationStore::open(&dir, cipher)?))
        }
        None => Ok(Arc::new(InMemoryAuthorizationStore::default())),
    }
}

fn authorization_settings(config: &AppConfig) -> AuthorizationSettings {
    AuthorizationSettings {
        validity_days: config.authorization.validity_days,
        signer_timeout: config.signer_timeout(),
        verifying_contracts: config
            .chains
            .iter()
            .map(|chain| (chain.chain_id, chain.contracts.decryption_verifier))
            .collect::<HashMap<_, _>>(),
    }
}

/// Everything a command needs, wired from the configuration
pub struct Session {
    pub chain: ChainConfig,
    pub contract: Arc<LoanRiskWriteContract>,
    pub signer: LocalAuthorizationSigner,
    pub flow: LoanRiskFlow,
    cancel: CancelSignal,
    _cancel_tx: Arc<watch::Sender<bool>>,
}

impl Session {
    pub async fn connect(config: &AppConfig) -> Result<Self> {
        let chain = config.active_chain()?.clone();
        let rpc_url = chain.rpc_url()?.as_http_url()?;
        let key = private_key()?;

        let contract = Arc::new(
            LoanRiskContractFactory::create_write(&rpc_url, chain.contracts.loan_risk, &key)
                .await
                .map_err(|e| anyhow!("Could not connect to chain {}: {e}", chain.name))?,
        );
        let signer = LocalAuthorizationSigner::from_private_key(&key)?;

        let reported = contract
            .provider()
            .get_chain_id()
            .await
            .with_context(|| format!("Could not reach {}", chain.name))?;
        if reported != chain.chain_id {
            bail!(
                "Chain {} reports chain id {reported} but {} is configured",
                chain.name,
                chain.chain_id
            );
        }

        let context = Arc::new(ContextTracker::new(Some(ExecutionContext {
            network: chain.chain_id,
            identity: signer.address(),
        })));
        let cache = Arc::new(AuthorizationCache::new(
            authorization_store(config)?,
            Arc::new(SystemClock),
            authorization_settings(config),
        ));
        cache.follow_context(context.subscribe());
        let decryption = Arc::new(
            DecryptionOrchestrator::new(
                Arc::new(RelayerOracle::new(&config.relayer.url)),
                cache,
                context,
            )
            .with_deadline(config.decrypt_timeout()),
        );
        let flow = LoanRiskFlow::new(
            InputBuilder::new(encryption_backend(config)?, chain.chain_id),
            SubmissionClient::new(contract.clone()),
            HandleFetcher::new(contract.clone()),
            decryption,
            TargetProfile {
                income_prescale: config.target.income_prescale,
            },
        );

        let (cancel_tx, cancel) = cancel_channel();
        let cancel_tx = Arc::new(cancel_tx);
        let on_interrupt = cancel_tx.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupted, cancelling");
                on_interrupt.send_replace(true);
            }
        });

        info!(chain = %chain.name, account = %signer.address(), "session ready");
        Ok(Self {
            chain,
            contract,
            signer,
            flow,
            cancel,
            _cancel_tx: cancel_tx,
        })
    }

    pub fn account(&self) -> Address {
        self.signer.address()
    }

    /// Fires on Ctrl-C
    pub fn cancel(&self) -> Option<&CancelSignal> {
        Some(&self.cancel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::address;
    use veil_config::ContractAddresses;

    #[test]
    fn test_every_chain_gets_its_verifier() {
        let chain = |name: &str, chain_id: u64, verifier: Address| ChainConfig {
            name: name.to_string(),
            rpc_url: "http://localhost:8545".to_string(),
            chain_id,
            contracts: ContractAddresses {
                loan_risk: Address::ZERO,
                decryption_verifier: verifier,
            },
        };
        let hardhat = address!("Cf7Ed3AccA5a467e9e704C703E8D87F634fB0Fc9");
        let sepolia = address!("5FbDB2315678afecb367f032d93F642f64180aa3");
        let mut config = AppConfig::default();
        config.chains = vec![
            chain("hardhat", 31337, hardhat),
            chain("sepolia", 11155111, sepolia),
        ];

        let settings = authorization_settings(&config);
        assert_eq!(settings.verifying_contracts.get(&31337), Some(&hardhat));
        assert_eq!(settings.verifying_contracts.get(&11155111), Some(&sepolia));
        assert_eq!(settings.validity_days, 365);
    }

    #[test]
    fn test_missing_public_key_fails_on_encrypt() -> Result<()> {
        let backend = encryption_backend(&AppConfig::default())?;
        let mut input = InputBuilder::new(backend, 1).create(Address::ZERO, Address::ZERO);
        input.add16("creditScore", 700)?;
        assert!(matches!(
            input.encrypt(),
            Err(veil_client::Error::EncryptionFailure(_))
        ));
        Ok(())
    }
}
