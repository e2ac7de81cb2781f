// SPDX-License-Identifier: LGPL-3.0-only
//
// This file is provided WITHOUT ANY WARRANTY;
// without even the implied warranty of MERCHANTABILITY
// or FITNESS FOR A PARTICULAR PURPOSE.

use crate::types::NetworkId;
use alloy::primitives::Address;
use tokio::sync::watch;
use tracing::info;

/// The network and signing identity a flow runs under
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExecutionContext {
    pub network: NetworkId,
    pub identity: Address,
}

/// Anything that can report the current execution context
pub trait ContextSource: Send + Sync {
    /// `None` while no identity is connected
    fn snapshot(&self) -> Option<ExecutionContext>;
}

/// Holds the current context and lets observers follow changes
pub struct ContextTracker {
    current: watch::Sender<Option<ExecutionContext>>,
}

impl ContextTracker {
    pub fn new(initial: Option<ExecutionContext>) -> Self {
        let (current, _) = watch::channel(initial);
        Self { current }
    }

    pub fn set(&self, context: Option<ExecutionContext>) {
        let previous = self.current.send_replace(context);
        if previous != context {
            info!(?previous, ?context, "execution context changed");
        }
    }

    pub fn switch_network(&self, network: NetworkId) {
        let next = self.snapshot().map(|ctx| ExecutionContext { network, ..ctx });
        self.set(next);
    }

    pub fn switch_identity(&self, identity: Address) {
        let next = self.snapshot().map(|ctx| ExecutionContext { identity, ..ctx });
        self.set(next);
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<ExecutionContext>> {
        self.current.subscribe()
    }
}

impl ContextSource for ContextTracker {
    fn snapshot(&self) -> Option<ExecutionContext> {
        *self.current.borrow()
    }
}
