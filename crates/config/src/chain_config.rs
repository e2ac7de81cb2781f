// SPDX-License-Identifier: LGPL-3.0-only
//
// This file is provided WITHOUT ANY WARRANTY;
// without even the implied warranty of MERCHANTABILITY
// or FITNESS FOR A PARTICULAR PURPOSE.

use crate::rpc::RpcUrl;
use alloy_primitives::Address;
use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

/// Deployed contracts the client talks to on a chain
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ContractAddresses {
    /// The confidential loan-risk computation
    pub loan_risk: Address,
    /// Verifying contract of the EIP-712 domain used for decryption authorizations
    pub decryption_verifier: Address,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ChainConfig {
    pub name: String,
    pub rpc_url: String,
    pub chain_id: u64,
    pub contracts: ContractAddresses,
}

impl ChainConfig {
    pub fn rpc_url(&self) -> Result<RpcUrl> {
        RpcUrl::parse(&self.rpc_url)
            .map_err(|e| anyhow!("Failed to parse RPC URL for chain {}: {}", self.name, e))
    }
}
