// SPDX-License-Identifier: LGPL-3.0-only
//
// This file is provided WITHOUT ANY WARRANTY;
// without even the implied warranty of MERCHANTABILITY
// or FITNESS FOR A PARTICULAR PURPOSE.

use crate::error::{Error, Result};
use crate::types::NetworkId;
use alloy::{
    primitives::{Address, Bytes, B256, U256},
    signers::{local::PrivateKeySigner, Signer},
    sol,
    sol_types::{eip712_domain, SolStruct},
};
use async_trait::async_trait;

/// EIP-712 domain name of the decryption verifier
const DOMAIN_NAME: &str = "Decryption";
const DOMAIN_VERSION: &str = "1";

sol! {
    #[derive(Debug)]
    struct UserDecryptRequestVerification {
        bytes publicKey;
        address[] contractAddresses;
        uint256 startTimestamp;
        uint256 durationDays;
    }
}

/// Everything the identity signs to allow decryption of its results
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationRequest {
    pub network: NetworkId,
    pub verifying_contract: Address,
    pub public_key: Vec<u8>,
    pub targets: Vec<Address>,
    pub start_timestamp: u64,
    pub duration_days: u32,
}

impl AuthorizationRequest {
    pub fn signing_hash(&self) -> B256 {
        let domain = eip712_domain! {
            name: DOMAIN_NAME,
            version: DOMAIN_VERSION,
            chain_id: self.network,
            verifying_contract: self.verifying_contract,
        };
        UserDecryptRequestVerification {
            publicKey: Bytes::from(self.public_key.clone()),
            contractAddresses: self.targets.clone(),
            startTimestamp: U256::from(self.start_timestamp),
            durationDays: U256::from(self.duration_days),
        }
        .eip712_signing_hash(&domain)
    }
}

/// Something that can sign on behalf of an identity, usually a wallet
#[async_trait]
pub trait SignerCapability: Send + Sync {
    fn address(&self) -> Address;

    async fn sign_authorization(&self, request: &AuthorizationRequest) -> Result<Vec<u8>>;
}

/// Signs with a private key held by this process
pub struct LocalAuthorizationSigner {
    signer: PrivateKeySigner,
}

impl LocalAuthorizationSigner {
    pub fn new(signer: PrivateKeySigner) -> Self {
        Self { signer }
    }

    pub fn from_private_key(private_key: &str) -> Result<Self> {
        let signer = private_key
            .parse::<PrivateKeySigner>()
            .map_err(|e| Error::AuthorizationDenied(format!("Invalid private key: {e}")))?;
        Ok(Self::new(signer))
    }
}

#[async_trait]
impl SignerCapability for LocalAuthorizationSigner {
    fn address(&self) -> Address {
        self.signer.address()
    }

    async fn sign_authorization(&self, request: &AuthorizationRequest) -> Result<Vec<u8>> {
        let signature = self
            .signer
            .sign_hash(&request.signing_hash())
            .await
            .map_err(|e| Error::AuthorizationDenied(e.to_string()))?;
        Ok(signature.as_bytes().to_vec())
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::{address, Signature};
    use anyhow::Result;

    fn request() -> AuthorizationRequest {
        AuthorizationRequest {
            network: 11155111,
            verifying_contract: address!("5FbDB2315678afecb367f032d93F642f64180aa3"),
            public_key: vec![2; 33],
            targets: vec![address!("9fE46736679d2D9a65F0992F2272dE9f3c7fa6e0")],
            start_timestamp: 1_760_000_000,
            duration_days: 365,
        }
    }

    #[tokio::test]
    async fn test_signature_recovers_to_signer() -> Result<()> {
        let signer = LocalAuthorizationSigner::new(PrivateKeySigner::random());
        let request = request();
        let raw = signer.sign_authorization(&request).await?;
        assert_eq!(raw.len(), 65);

        let signature = Signature::from_raw(&raw)?;
        let recovered = signature.recover_address_from_prehash(&request.signing_hash())?;
        assert_eq!(recovered, signer.address());
        Ok(())
    }

    #[test]
    fn test_hash_depends_on_every_field() {
        let base = request();
        let mut other = base.clone();
        other.duration_days = 1;
        assert_ne!(base.signing_hash(), other.signing_hash());

        let mut other = base.clone();
        other.network = 1;
        assert_ne!(base.signing_hash(), other.signing_hash());
    }
}
