// SPDX-License-Identifier: LGPL-3.0-only
//
// This file is provided WITHOUT ANY WARRANTY;
// without even the implied warranty of MERCHANTABILITY
// or FITNESS FOR A PARTICULAR PURPOSE.

use crate::authorization::{Authorization, AuthorizationCache};
use crate::cancel::{until_cancelled, CancelSignal};
use crate::context::{ContextSource, ExecutionContext};
use crate::error::{Error, Result};
use crate::oracle::{DecryptionOracle, HandleTarget};
use crate::signer::SignerCapability;
use crate::types::{DecryptedValue, ResultHandle};
use alloy::primitives::Address;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// How long the oracle gets before a request counts as timed out
pub const DEFAULT_DECRYPT_DEADLINE: Duration = Duration::from_secs(45);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecryptState {
    Idle,
    AwaitingAuthorization,
    AwaitingOracle,
    Succeeded,
    TimedOut,
    Stale,
    Failed,
}

impl fmt::Display for DecryptState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DecryptState::Idle => "idle",
            DecryptState::AwaitingAuthorization => "awaiting authorization",
            DecryptState::AwaitingOracle => "awaiting oracle",
            DecryptState::Succeeded => "succeeded",
            DecryptState::TimedOut => "timed out",
            DecryptState::Stale => "stale",
            DecryptState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Terminal result of one decryption round trip
#[derive(Debug)]
pub enum DecryptOutcome {
    Succeeded(BTreeMap<ResultHandle, DecryptedValue>),
    /// The oracle did not answer within `deadline`
    TimedOut { deadline: Duration },
    /// The network or identity changed while the oracle was working. Nothing is returned.
    Stale {
        started: ExecutionContext,
        current: Option<ExecutionContext>,
    },
    Failed(Error),
}

impl DecryptOutcome {
    pub fn state(&self) -> DecryptState {
        match self {
            DecryptOutcome::Succeeded(_) => DecryptState::Succeeded,
            DecryptOutcome::TimedOut { .. } => DecryptState::TimedOut,
            DecryptOutcome::Stale { .. } => DecryptState::Stale,
            DecryptOutcome::Failed(_) => DecryptState::Failed,
        }
    }

    pub fn into_result(self) -> Result<BTreeMap<ResultHandle, DecryptedValue>> {
        match self {
            DecryptOutcome::Succeeded(values) => Ok(values),
            DecryptOutcome::TimedOut { deadline } => Err(Error::TimedOut(deadline)),
            DecryptOutcome::Stale { .. } => Err(Error::Stale),
            DecryptOutcome::Failed(err) => Err(err),
        }
    }
}

/// Tracks the state of a single round trip
struct Transitions {
    state: DecryptState,
}

impl Transitions {
    fn new() -> Self {
        Self {
            state: DecryptState::Idle,
        }
    }

    fn enter(&mut self, next: DecryptState) {
        debug!(from = %self.state, to = %next, "decrypt state");
        self.state = next;
    }

    fn finish(mut self, outcome: DecryptOutcome) -> DecryptOutcome {
        self.enter(outcome.state());
        outcome
    }
}

/// Obtains clear values for result handles under a decryption authorization
pub struct DecryptionOrchestrator {
    oracle: Arc<dyn DecryptionOracle>,
    cache: Arc<AuthorizationCache>,
    context: Arc<dyn ContextSource>,
    deadline: Duration,
}

impl DecryptionOrchestrator {
    pub fn new(
        oracle: Arc<dyn DecryptionOracle>,
        cache: Arc<AuthorizationCache>,
        context: Arc<dyn ContextSource>,
    ) -> Self {
        Self {
            oracle,
            cache,
            context,
            deadline: DEFAULT_DECRYPT_DEADLINE,
        }
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    pub fn cache(&self) -> &Arc<AuthorizationCache> {
        &self.cache
    }

    /// Fetch or create the authorization for the current context, then decrypt
    #[instrument(skip_all, fields(handles = handles.len()))]
    pub async fn decrypt(
        &self,
        handles: &[HandleTarget],
        signer: &dyn SignerCapability,
        cancel: Option<&CancelSignal>,
    ) -> DecryptOutcome {
        let mut transitions = Transitions::new();
        let Some(started) = self.context.snapshot() else {
            return transitions.finish(DecryptOutcome::Failed(Error::AuthorizationDenied(
                "no identity is connected".to_string(),
            )));
        };
        if let Err(err) = check_handles(handles) {
            return transitions.finish(DecryptOutcome::Failed(err));
        }

        transitions.enter(DecryptState::AwaitingAuthorization);
        let targets: Vec<Address> = handles
            .iter()
            .map(|h| h.target)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let authorization =
            match until_cancelled(cancel, self.cache.load_or_create(&started, &targets, signer))
                .await
                .and_then(|created| created)
            {
                Ok(authorization) => authorization,
                Err(Error::Stale) => {
                    let current = self.context.snapshot();
                    return transitions.finish(DecryptOutcome::Stale { started, current });
                }
                Err(err) => return transitions.finish(DecryptOutcome::Failed(err)),
            };

        self.resolve(transitions, started, handles, &authorization, cancel)
            .await
    }

    /// Decrypt with an authorization the caller already holds
    #[instrument(skip_all, fields(handles = handles.len()))]
    pub async fn decrypt_with(
        &self,
        handles: &[HandleTarget],
        authorization: &Authorization,
        cancel: Option<&CancelSignal>,
    ) -> DecryptOutcome {
        let transitions = Transitions::new();
        let Some(started) = self.context.snapshot() else {
            return transitions.finish(DecryptOutcome::Failed(Error::AuthorizationDenied(
                "no identity is connected".to_string(),
            )));
        };
        if let Err(err) = check_handles(handles) {
            return transitions.finish(DecryptOutcome::Failed(err));
        }
        self.resolve(transitions, started, handles, authorization, cancel)
            .await
    }

    async fn resolve(
        &self,
        mut transitions: Transitions,
        started: ExecutionContext,
        handles: &[HandleTarget],
        authorization: &Authorization,
        cancel: Option<&CancelSignal>,
    ) -> DecryptOutcome {
        if let Err(err) = self.check_authorization(&started, handles, authorization) {
            return transitions.finish(DecryptOutcome::Failed(err));
        }

        transitions.enter(DecryptState::AwaitingOracle);
        let request = tokio::time::timeout(
            self.deadline,
            self.oracle.resolve(handles, authorization),
        );
        let values = match until_cancelled(cancel, request).await {
            Err(cancelled) => return transitions.finish(DecryptOutcome::Failed(cancelled)),
            Ok(Err(_elapsed)) => {
                warn!(deadline = ?self.deadline, "decryption oracle did not answer in time");
                return transitions.finish(DecryptOutcome::TimedOut {
                    deadline: self.deadline,
                });
            }
            Ok(Ok(Err(err))) => return transitions.finish(DecryptOutcome::Failed(err)),
            Ok(Ok(Ok(values))) => values,
        };

        let current = self.context.snapshot();
        if current != Some(started) {
            warn!(?started, ?current, "context changed during decryption, discarding values");
            return transitions.finish(DecryptOutcome::Stale { started, current });
        }

        let mut decrypted = BTreeMap::new();
        for requested in handles {
            let Some(value) = values.get(&requested.handle) else {
                return transitions.finish(DecryptOutcome::Failed(Error::Failed(format!(
                    "oracle returned no value for {}",
                    requested.handle
                ))));
            };
            decrypted.insert(
                requested.handle,
                DecryptedValue {
                    handle: requested.handle,
                    value: *value,
                },
            );
        }

        info!(values = decrypted.len(), "decryption succeeded");
        transitions.finish(DecryptOutcome::Succeeded(decrypted))
    }

    fn check_authorization(
        &self,
        context: &ExecutionContext,
        handles: &[HandleTarget],
        authorization: &Authorization,
    ) -> Result<()> {
        if authorization.network() != context.network
            || authorization.subject() != context.identity
        {
            return Err(Error::AuthorizationDenied(format!(
                "authorization belongs to {} on network {}",
                authorization.subject(),
                authorization.network()
            )));
        }
        if !authorization.is_valid_at(self.cache.now()) {
            return Err(Error::AuthorizationDenied(
                "authorization has expired".to_string(),
            ));
        }
        if let Some(uncovered) = handles.iter().find(|h| !authorization.covers(&h.target)) {
            return Err(Error::InvalidHandle(format!(
                "{} belongs to {} which the authorization does not cover",
                uncovered.handle, uncovered.target
            )));
        }
        Ok(())
    }
}

fn check_handles(handles: &[HandleTarget]) -> Result<()> {
    if handles.is_empty() {
        return Err(Error::InvalidHandle("nothing to decrypt".to_string()));
    }
    if handles.iter().any(|h| h.handle.is_empty()) {
        return Err(Error::InvalidHandle(
            "the empty handle has no value to decrypt".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::types::ClearValue;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Answers from a fixed table after `delay`, optionally running `during` first
    pub struct ScriptedOracle {
        pub values: HashMap<ResultHandle, ClearValue>,
        pub delay: Duration,
        pub calls: AtomicUsize,
        pub during: Mutex<Option<Box<dyn FnOnce() + Send>>>,
    }

    impl ScriptedOracle {
        pub fn new(values: impl IntoIterator<Item = (ResultHandle, ClearValue)>) -> Self {
            Self {
                values: values.into_iter().collect(),
                delay: Duration::ZERO,
                calls: AtomicUsize::new(0),
                during: Mutex::new(None),
            }
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl DecryptionOracle for ScriptedOracle {
        async fn resolve(
            &self,
            handles: &[HandleTarget],
            _authorization: &Authorization,
        ) -> Result<BTreeMap<ResultHandle, ClearValue>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let during = self.during.lock().unwrap().take();
            if let Some(during) = during {
                during();
            }
            tokio::time::sleep(self.delay).await;
            Ok(handles
                .iter()
                .filter_map(|h| self.values.get(&h.handle).map(|v| (h.handle, *v)))
                .collect())
        }
    }
}
