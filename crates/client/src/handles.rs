// SPDX-License-Identifier: LGPL-3.0-only
//
// This file is provided WITHOUT ANY WARRANTY;
// without even the implied warranty of MERCHANTABILITY
// or FITNESS FOR A PARTICULAR PURPOSE.

use crate::error::{Error, Result};
use crate::types::ResultHandle;
use alloy::primitives::Address;
use futures::future::try_join_all;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, instrument};
use veil_evm::{LedgerError, ResultReader};

fn read_error(err: LedgerError) -> Error {
    match err {
        LedgerError::Transport(message) => Error::NetworkUnavailable(message),
        LedgerError::Rpc { code, message } => {
            Error::NetworkUnavailable(format!("({code}) {message}"))
        }
        LedgerError::UnknownOutput(output) => Error::InvalidHandle(format!("unknown output {output}")),
        LedgerError::UserRejected(message) => Error::UserCancelled(message),
        LedgerError::Reverted { reason } => Error::Failed(reason),
        LedgerError::Other(message) => Error::Failed(message),
    }
}

/// Result handles of one subject keyed by output name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedHandles {
    subject: Address,
    target: Address,
    handles: BTreeMap<String, ResultHandle>,
}

impl FetchedHandles {
    pub fn subject(&self) -> Address {
        self.subject
    }

    /// The contract the handles belong to
    pub fn target(&self) -> Address {
        self.target
    }

    /// False while every handle is still the empty sentinel
    pub fn is_ready(&self) -> bool {
        self.handles.values().any(|h| !h.is_empty())
    }

    /// True once every handle holds a result
    pub fn is_complete(&self) -> bool {
        !self.handles.is_empty() && self.handles.values().all(|h| !h.is_empty())
    }

    pub fn get(&self, output: &str) -> Option<ResultHandle> {
        self.handles.get(output).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, ResultHandle)> {
        self.handles.iter().map(|(name, h)| (name.as_str(), *h))
    }
}

/// Reads result handles. Read-only and safe to repeat.
pub struct HandleFetcher {
    reader: Arc<dyn ResultReader>,
}

impl HandleFetcher {
    pub fn new(reader: Arc<dyn ResultReader>) -> Self {
        Self { reader }
    }

    #[instrument(skip_all, fields(%subject))]
    pub async fn fetch(&self, subject: Address, outputs: &[&str]) -> Result<FetchedHandles> {
        let outputs: BTreeSet<&str> = outputs.iter().copied().collect();
        if let Some(unknown) = outputs
            .iter()
            .find(|name| !self.reader.outputs().contains(*name))
        {
            return Err(Error::InvalidHandle(format!("unknown output {unknown}")));
        }

        let reads = outputs.iter().map(|name| async move {
            let handle = self.reader.result_handle(name, subject).await?;
            Ok::<_, LedgerError>((name.to_string(), ResultHandle::from(handle)))
        });
        let handles: BTreeMap<String, ResultHandle> = try_join_all(reads)
            .await
            .map_err(read_error)?
            .into_iter()
            .collect();

        let fetched = FetchedHandles {
            subject,
            target: self.reader.address(),
            handles,
        };
        debug!(ready = fetched.is_ready(), "fetched result handles");
        Ok(fetched)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use alloy::primitives::B256;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Serves handles from a map, every unknown subject reads as empty
    pub struct MapReader {
        pub address: Address,
        pub handles: Mutex<HashMap<(Address, String), B256>>,
        pub offline: bool,
    }

    impl MapReader {
        pub fn new(address: Address) -> Self {
            Self {
                address,
                handles: Mutex::new(HashMap::new()),
                offline: false,
            }
        }

        pub fn set(&self, subject: Address, output: &str, handle: ResultHandle) {
            self.handles
                .lock()
                .unwrap()
                .insert((subject, output.to_string()), handle.as_b256());
        }
    }

    #[async_trait]
    impl ResultReader for MapReader {
        fn address(&self) -> Address {
            self.address
        }

        fn outputs(&self) -> &'static [&'static str] {
            veil_evm::LOAN_RISK_OUTPUTS
        }

        async fn result_handle(
            &self,
            output: &str,
            subject: Address,
        ) -> std::result::Result<B256, LedgerError> {
            if self.offline {
                return Err(LedgerError::Transport("connection refused".into()));
            }
            Ok(self
                .handles
                .lock()
                .unwrap()
                .get(&(subject, output.to_string()))
                .copied()
                .unwrap_or(B256::ZERO))
        }
    }
}
