// SPDX-License-Identifier: LGPL-3.0-only
//
// This file is provided WITHOUT ANY WARRANTY;
// without even the implied warranty of MERCHANTABILITY
// or FITNESS FOR A PARTICULAR PURPOSE.

use crate::session::Session;
use alloy::primitives::Address;
use anyhow::Result;

pub async fn execute(session: &Session, grantee: Address) -> Result<()> {
    let receipt = session.contract.grant_access(grantee).await?;
    println!(
        "{grantee} may now decrypt the results of {} (transaction {})",
        session.account(),
        receipt.transaction_hash
    );
    Ok(())
}
