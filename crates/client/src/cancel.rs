// SPDX-License-Identifier: LGPL-3.0-only
//
// This file is provided WITHOUT ANY WARRANTY;
// without even the implied warranty of MERCHANTABILITY
// or FITNESS FOR A PARTICULAR PURPOSE.

use crate::error::{Error, Result};
use std::future::Future;
use tokio::sync::watch;

/// Flips to `true` when the user abandons the operation
pub type CancelSignal = watch::Receiver<bool>;

pub fn cancel_channel() -> (watch::Sender<bool>, CancelSignal) {
    watch::channel(false)
}

async fn cancelled(signal: &mut CancelSignal) {
    // A dropped sender can never cancel
    if signal.wait_for(|cancelled| *cancelled).await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// Drive `fut` unless the signal fires first, in which case `fut` is dropped
pub(crate) async fn until_cancelled<F: Future>(
    signal: Option<&CancelSignal>,
    fut: F,
) -> Result<F::Output> {
    let Some(signal) = signal else {
        return Ok(fut.await);
    };
    let mut signal = signal.clone();
    tokio::select! {
        output = fut => Ok(output),
        _ = cancelled(&mut signal) => Err(Error::UserCancelled("operation cancelled".to_string())),
    }
}
