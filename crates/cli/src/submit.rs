// SPDX-License-Identifier: LGPL-3.0-only
//
// This file is provided WITHOUT ANY WARRANTY;
// without even the implied warranty of MERCHANTABILITY
// or FITNESS FOR A PARTICULAR PURPOSE.

use crate::decrypt::print_assessment;
use crate::session::Session;
use alloy::primitives::Address;
use anyhow::Result;
use veil_client::{LoanApplication, SignerCapability};

pub fn application(
    credit_score: u16,
    income: &str,
    debt_ratio_bps: u32,
    lender: Option<Address>,
) -> Result<LoanApplication> {
    Ok(LoanApplication {
        credit_score,
        income_wei: LoanApplication::parse_income(income)?,
        debt_ratio_bps,
        lender,
    })
}

pub async fn execute(session: &Session, application: &LoanApplication) -> Result<()> {
    let receipt = session
        .flow
        .submit(session.signer.address(), application, session.cancel())
        .await?;
    println!("Application submitted in transaction {}", receipt.tx_hash);
    if let Some(block) = receipt.block_number {
        println!("Included in block {block}");
    }
    Ok(())
}

pub async fn run(session: &Session, application: &LoanApplication) -> Result<()> {
    let (receipt, assessment) = session
        .flow
        .run(application, &session.signer, session.cancel())
        .await?;
    println!("Application submitted in transaction {}", receipt.tx_hash);
    print_assessment(assessment)
}
