// SPDX-License-Identifier: LGPL-3.0-only
//
// This file is provided WITHOUT ANY WARRANTY;
// without even the implied warranty of MERCHANTABILITY
// or FITNESS FOR A PARTICULAR PURPOSE.

use crate::session::Session;
use alloy::primitives::Address;
use anyhow::{bail, Result};
use veil_client::RiskAssessment;

pub fn print_assessment(assessment: RiskAssessment) -> Result<()> {
    match assessment {
        RiskAssessment::Decrypted(report) => println!("{report}"),
        RiskAssessment::NotReady => {
            println!("Results are not ready yet. Submit an application or try again shortly.")
        }
        RiskAssessment::TimedOut { deadline } => {
            bail!("The relayer did not answer within {deadline:?}. Please try again.")
        }
        RiskAssessment::Stale => {
            bail!("The network or account changed while decrypting. The results were discarded.")
        }
        RiskAssessment::Failed(err) => return Err(err.into()),
    }
    Ok(())
}

pub async fn execute(session: &Session, borrower: Option<Address>) -> Result<()> {
    let fetched = session
        .flow
        .fetch(borrower.unwrap_or_else(|| session.account()))
        .await?;
    let assessment = session
        .flow
        .decrypt(&fetched, &session.signer, session.cancel())
        .await;
    print_assessment(assessment)
}
