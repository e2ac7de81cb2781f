// SPDX-License-Identifier: LGPL-3.0-only
//
// This file is provided WITHOUT ANY WARRANTY;
// without even the implied warranty of MERCHANTABILITY
// or FITNESS FOR A PARTICULAR PURPOSE.

use crate::authorization::Authorization;
use crate::error::{Error, Result};
use crate::types::{ClearValue, FheType, ResultHandle};
use alloy::primitives::{Address, B256};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

/// A result handle together with the contract that owns it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandleTarget {
    pub handle: ResultHandle,
    pub target: Address,
}

/// Resolves encrypted handles to clear values for the holder of an authorization
#[async_trait]
pub trait DecryptionOracle: Send + Sync {
    async fn resolve(
        &self,
        handles: &[HandleTarget],
        authorization: &Authorization,
    ) -> Result<BTreeMap<ResultHandle, ClearValue>>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HandleContractPair {
    handle: String,
    contract_address: Address,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct UserDecryptRequest {
    handle_contract_pairs: Vec<HandleContractPair>,
    contracts_chain_id: u64,
    contract_addresses: Vec<Address>,
    user_address: Address,
    public_key: String,
    signature: String,
    start_timestamp: String,
    duration_days: String,
}

#[derive(Debug, Deserialize)]
struct UserDecryptResponse {
    /// Decimal clear values keyed by hex handle
    values: HashMap<String, String>,
}

/// Talks to the relayer's user decryption endpoint
pub struct RelayerOracle {
    client: reqwest::Client,
    endpoint: String,
}

impl RelayerOracle {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: format!("{}/v1/user-decrypt", base_url.trim_end_matches('/')),
        }
    }
}

fn decode_value(handle: &ResultHandle, raw: &str) -> Result<ClearValue> {
    let value: u64 = raw
        .trim()
        .parse()
        .map_err(|_| Error::Failed(format!("oracle returned a malformed value for {handle}")))?;
    match handle.fhe_type() {
        Some(FheType::Bool) => Ok(ClearValue::Bool(value != 0)),
        Some(_) => Ok(ClearValue::Uint(value)),
        None => Err(Error::InvalidHandle(format!(
            "{handle} has an unknown encrypted type"
        ))),
    }
}

fn decode_response(response: UserDecryptResponse) -> Result<BTreeMap<ResultHandle, ClearValue>> {
    response
        .values
        .iter()
        .map(|(key, raw)| {
            let handle: B256 = key
                .parse()
                .map_err(|_| Error::Failed(format!("oracle returned a malformed handle {key}")))?;
            let handle = ResultHandle::from(handle);
            Ok((handle, decode_value(&handle, raw)?))
        })
        .collect()
}

#[async_trait]
impl DecryptionOracle for RelayerOracle {
    async fn resolve(
        &self,
        handles: &[HandleTarget],
        authorization: &Authorization,
    ) -> Result<BTreeMap<ResultHandle, ClearValue>> {
        let request = UserDecryptRequest {
            handle_contract_pairs: handles
                .iter()
                .map(|h| HandleContractPair {
                    handle: h.handle.to_string(),
                    contract_address: h.target,
                })
                .collect(),
            contracts_chain_id: authorization.network(),
            contract_addresses: authorization.targets().to_vec(),
            user_address: authorization.subject(),
            public_key: hex::encode(authorization.public_key()),
            signature: hex::encode(authorization.signature()),
            start_timestamp: authorization.issued_at().to_string(),
            duration_days: authorization.validity_days().to_string(),
        };

        debug!(handles = handles.len(), endpoint = %self.endpoint, "user decrypt request");
        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::NetworkUnavailable(e.to_string()))?;

        match response.status() {
            status if status.is_success() => {}
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                let body = response.text().await.unwrap_or_default();
                return Err(Error::AuthorizationDenied(format!(
                    "relayer refused the authorization: {body}"
                )));
            }
            status if status.is_server_error() => {
                return Err(Error::NetworkUnavailable(format!("relayer answered {status}")));
            }
            status => {
                let body = response.text().await.unwrap_or_default();
                return Err(Error::Failed(format!("relayer answered {status}: {body}")));
            }
        }

        let body: UserDecryptResponse = response
            .json()
            .await
            .map_err(|e| Error::Failed(format!("Could not parse relayer response: {e}")))?;
        decode_response(body)
    }
}
