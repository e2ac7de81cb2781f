// SPDX-License-Identifier: LGPL-3.0-only
//
// This file is provided WITHOUT ANY WARRANTY;
// without even the implied warranty of MERCHANTABILITY
// or FITNESS FOR A PARTICULAR PURPOSE.

use crate::contracts::LoanRisk;
use alloy::{
    contract,
    sol_types::{decode_revert_reason, Panic, Revert, SolError},
    transports::{RpcError, TransportError},
};
use thiserror::Error;

/// EIP-1193 "User Rejected Request"
const USER_REJECTED_CODE: i64 = 4001;
/// Code used by geth style nodes for `execution reverted`
const EXECUTION_REVERTED_CODE: i64 = 3;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("Transaction reverted: {reason}")]
    Reverted { reason: String },

    #[error("User rejected the request: {0}")]
    UserRejected(String),

    #[error("Node refused the request ({code}): {message}")]
    Rpc { code: i64, message: String },

    #[error("Transport failure: {0}")]
    Transport(String),

    #[error("Unknown output '{0}'")]
    UnknownOutput(String),

    #[error("{0}")]
    Other(String),
}

impl LedgerError {
    pub fn is_transport(&self) -> bool {
        matches!(self, LedgerError::Transport(_))
    }
}

/// Turn raw revert data into the reason a user should see
pub fn revert_reason(data: &[u8]) -> String {
    if data.starts_with(&LoanRisk::ZamaProtocolUnsupported::SELECTOR) {
        return "ZamaProtocolUnsupported".to_string();
    }
    if let Ok(revert) = Revert::abi_decode(data) {
        return revert.reason;
    }
    if let Ok(panic) = Panic::abi_decode(data) {
        return format!("panic code {}", panic.code);
    }
    decode_revert_reason(data).unwrap_or_else(|| format!("0x{}", hex::encode(data)))
}

/// Classify a JSON-RPC error response
pub fn classify_rpc(code: i64, message: &str, revert_data: Option<&[u8]>) -> LedgerError {
    let lowered = message.to_lowercase();
    if code == USER_REJECTED_CODE
        || lowered.contains("user rejected")
        || lowered.contains("user denied")
    {
        return LedgerError::UserRejected(message.to_string());
    }

    if let Some(data) = revert_data.filter(|d| !d.is_empty()) {
        return LedgerError::Reverted {
            reason: revert_reason(data),
        };
    }

    if code == EXECUTION_REVERTED_CODE || lowered.starts_with("execution reverted") {
        let reason = message
            .strip_prefix("execution reverted: ")
            .or_else(|| message.strip_prefix("execution reverted"))
            .unwrap_or(message)
            .trim();
        return LedgerError::Reverted {
            reason: if reason.is_empty() {
                "execution reverted".to_string()
            } else {
                reason.to_string()
            },
        };
    }

    LedgerError::Rpc {
        code,
        message: message.to_string(),
    }
}

fn classify_transport(err: TransportError) -> LedgerError {
    match err {
        RpcError::ErrorResp(payload) => {
            let data = payload.as_revert_data();
            classify_rpc(payload.code, &payload.message, data.as_deref())
        }
        other => LedgerError::Transport(other.to_string()),
    }
}

impl From<contract::Error> for LedgerError {
    fn from(err: contract::Error) -> Self {
        if let Some(data) = err.as_revert_data() {
            return LedgerError::Reverted {
                reason: revert_reason(&data),
            };
        }
        match err {
            contract::Error::TransportError(e) => classify_transport(e),
            contract::Error::PendingTransactionError(e) => LedgerError::Transport(e.to_string()),
            other => LedgerError::Other(other.to_string()),
        }
    }
}

impl From<TransportError> for LedgerError {
    fn from(err: TransportError) -> Self {
        classify_transport(err)
    }
}
