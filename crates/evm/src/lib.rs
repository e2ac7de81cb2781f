// SPDX-License-Identifier: LGPL-3.0-only
//
// This file is provided WITHOUT ANY WARRANTY;
// without even the implied warranty of MERCHANTABILITY
// or FITNESS FOR A PARTICULAR PURPOSE.

pub mod contracts;
mod errors;

pub use contracts::{
    ComputeTarget, LedgerReceipt, LoanRiskContract, LoanRiskContractFactory, LoanRiskReadContract,
    LoanRiskWriteContract, ReadOnly, ReadWrite, ResultReader, LOAN_RISK_OUTPUTS,
};
pub use errors::{classify_rpc, revert_reason, LedgerError};
