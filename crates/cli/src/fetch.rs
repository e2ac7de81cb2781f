// SPDX-License-Identifier: LGPL-3.0-only
//
// This file is provided WITHOUT ANY WARRANTY;
// without even the implied warranty of MERCHANTABILITY
// or FITNESS FOR A PARTICULAR PURPOSE.

use crate::session::Session;
use alloy::primitives::Address;
use anyhow::Result;

pub async fn execute(session: &Session, subject: Option<Address>) -> Result<()> {
    let subject = subject.unwrap_or_else(|| session.account());
    let fetched = session.flow.fetch(subject).await?;
    if !fetched.is_ready() {
        println!("No results for {subject} on {} yet.", session.chain.name);
        return Ok(());
    }
    for (output, handle) in fetched.iter() {
        if handle.is_empty() {
            println!("{output:<12} pending");
        } else {
            println!("{output:<12} {handle}");
        }
    }
    Ok(())
}
