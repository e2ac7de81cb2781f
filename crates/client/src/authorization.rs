// SPDX-License-Identifier: LGPL-3.0-only
//
// This file is provided WITHOUT ANY WARRANTY;
// without even the implied warranty of MERCHANTABILITY
// or FITNESS FOR A PARTICULAR PURPOSE.

use crate::clock::Clock;
use crate::context::ExecutionContext;
use crate::error::{Error, Result};
use crate::signer::{AuthorizationRequest, SignerCapability};
use crate::store::AuthorizationStore;
use crate::types::NetworkId;
use alloy::primitives::Address;
use alloy::signers::local::PrivateKeySigner;
use chrono::{DateTime, TimeZone, Utc};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{watch, OnceCell};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};
use zeroize::Zeroizing;

const SECONDS_PER_DAY: i64 = 86_400;

pub const DEFAULT_VALIDITY_DAYS: u32 = 365;
pub const DEFAULT_SIGNER_TIMEOUT: Duration = Duration::from_secs(120);

/// A signed, time-bound permission to decrypt results of `targets` on behalf of `subject`.
///
/// Carries the ephemeral keypair the oracle re-encrypts results for. The private half is
/// zeroized on drop and never printed.
pub struct Authorization {
    private_key: Zeroizing<Vec<u8>>,
    public_key: Vec<u8>,
    signature: Vec<u8>,
    targets: Vec<Address>,
    subject: Address,
    network: NetworkId,
    issued_at: i64,
    validity_days: u32,
}

impl Authorization {
    /// `targets` are stored sorted and deduplicated
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        private_key: Zeroizing<Vec<u8>>,
        public_key: Vec<u8>,
        signature: Vec<u8>,
        mut targets: Vec<Address>,
        subject: Address,
        network: NetworkId,
        issued_at: i64,
        validity_days: u32,
    ) -> Self {
        targets.sort();
        targets.dedup();
        Self {
            private_key,
            public_key,
            signature,
            targets,
            subject,
            network,
            issued_at,
            validity_days,
        }
    }

    pub fn private_key(&self) -> &[u8] {
        &self.private_key
    }

    pub fn public_key(&self) -> &[u8] {
        &self.public_key
    }

    pub fn signature(&self) -> &[u8] {
        &self.signature
    }

    pub fn targets(&self) -> &[Address] {
        &self.targets
    }

    pub fn subject(&self) -> Address {
        self.subject
    }

    pub fn network(&self) -> NetworkId {
        self.network
    }

    /// Unix seconds
    pub fn issued_at(&self) -> i64 {
        self.issued_at
    }

    pub fn validity_days(&self) -> u32 {
        self.validity_days
    }

    pub fn expires_at(&self) -> i64 {
        self.issued_at + self.validity_days as i64 * SECONDS_PER_DAY
    }

    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        now.timestamp() < self.expires_at()
    }

    pub fn covers(&self, target: &Address) -> bool {
        self.targets.binary_search(target).is_ok()
    }

    pub fn key(&self) -> CacheKey {
        CacheKey::new(self.network, self.subject, &self.targets)
    }
}

impl fmt::Debug for Authorization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let expires = Utc.timestamp_opt(self.expires_at(), 0).single();
        f.debug_struct("Authorization")
            .field("subject", &self.subject)
            .field("network", &self.network)
            .field("targets", &self.targets)
            .field("expires", &expires)
            .field("private_key", &"<redacted>")
            .finish()
    }
}

/// One cached authorization per network, subject and sorted target set
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
    network: NetworkId,
    subject: Address,
    targets: Vec<Address>,
}

impl CacheKey {
    pub fn new(network: NetworkId, subject: Address, targets: &[Address]) -> Self {
        let mut targets = targets.to_vec();
        targets.sort();
        targets.dedup();
        Self {
            network,
            subject,
            targets,
        }
    }

    pub fn network(&self) -> NetworkId {
        self.network
    }

    pub fn subject(&self) -> Address {
        self.subject
    }

    pub fn targets(&self) -> &[Address] {
        &self.targets
    }

    /// Stable string form used by persisted stores
    pub fn storage_key(&self) -> String {
        let targets: Vec<String> = self.targets.iter().map(|t| format!("{t:#x}")).collect();
        format!(
            "authorization:{}:{:#x}:{}",
            self.network,
            self.subject,
            targets.join(",")
        )
    }
}

#[derive(Debug, Clone)]
pub struct AuthorizationSettings {
    pub validity_days: u32,
    pub signer_timeout: Duration,
    /// The decryption verifier each network's signatures are bound to
    pub verifying_contracts: HashMap<NetworkId, Address>,
}

impl Default for AuthorizationSettings {
    fn default() -> Self {
        Self {
            validity_days: DEFAULT_VALIDITY_DAYS,
            signer_timeout: DEFAULT_SIGNER_TIMEOUT,
            verifying_contracts: HashMap::new(),
        }
    }
}

type Slot = Arc<OnceCell<Arc<Authorization>>>;

/// Caches decryption authorizations and makes sure only one is created per key at a time.
///
/// The map lock only decides hit or miss and hands out the slot. Creation runs inside the
/// slot's `OnceCell`, so concurrent callers for one key share a single signer interaction
/// while other keys proceed independently. A failed or abandoned creation leaves the slot
/// empty for the next caller.
pub struct AuthorizationCache {
    slots: Mutex<HashMap<CacheKey, Slot>>,
    store: Arc<dyn AuthorizationStore>,
    clock: Arc<dyn Clock>,
    settings: AuthorizationSettings,
}

impl AuthorizationCache {
    pub fn new(
        store: Arc<dyn AuthorizationStore>,
        clock: Arc<dyn Clock>,
        settings: AuthorizationSettings,
    ) -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            store,
            clock,
            settings,
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<CacheKey, Slot>> {
        self.slots
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Return the cached authorization for `context` and `targets`, creating one with
    /// `signer` when there is none or it expired
    #[instrument(skip_all, fields(network = context.network, subject = %context.identity))]
    pub async fn load_or_create(
        &self,
        context: &ExecutionContext,
        targets: &[Address],
        signer: &dyn SignerCapability,
    ) -> Result<Arc<Authorization>> {
        if targets.is_empty() {
            return Err(Error::AuthorizationDenied(
                "an authorization needs at least one target".to_string(),
            ));
        }
        if signer.address() != context.identity {
            return Err(Error::AuthorizationDenied(format!(
                "signer {} is not the connected identity {}",
                signer.address(),
                context.identity
            )));
        }

        let key = CacheKey::new(context.network, context.identity, targets);
        let slot = {
            let now = self.now();
            let mut slots = self.slots();
            let slot = slots.entry(key.clone()).or_default();
            if let Some(existing) = slot.get() {
                if existing.is_valid_at(now) {
                    debug!("authorization cache hit");
                    return Ok(existing.clone());
                }
                debug!("cached authorization expired");
            }
            if slot.initialized() {
                *slot = Slot::default();
            }
            slot.clone()
        };

        let authorization = slot
            .get_or_try_init(|| self.create(&key, &slot, signer))
            .await?;
        Ok(authorization.clone())
    }

    /// Whether `slot` is still the one the map holds for `key`. Invalidation removes the
    /// slot, so a creation that lost it must not hand out or persist its result.
    fn is_current(&self, key: &CacheKey, slot: &Slot) -> bool {
        self.slots()
            .get(key)
            .is_some_and(|current| Arc::ptr_eq(current, slot))
    }

    async fn create(
        &self,
        key: &CacheKey,
        slot: &Slot,
        signer: &dyn SignerCapability,
    ) -> Result<Arc<Authorization>> {
        let now = self.now();
        match self.store.get(key).await {
            Ok(Some(stored)) if stored.is_valid_at(now) && stored.key() == *key => {
                if !self.is_current(key, slot) {
                    return Err(Error::Stale);
                }
                info!("adopted stored authorization");
                return Ok(Arc::new(stored));
            }
            Ok(Some(_)) => debug!("stored authorization is expired"),
            Ok(None) => {}
            Err(e) => warn!(error = ?e, "could not read the authorization store"),
        }

        let verifying_contract = self
            .settings
            .verifying_contracts
            .get(&key.network)
            .copied()
            .ok_or_else(|| {
                Error::AuthorizationDenied(format!(
                    "no decryption verifier configured for network {}",
                    key.network
                ))
            })?;

        let ephemeral = PrivateKeySigner::random();
        let private_key = Zeroizing::new(ephemeral.to_bytes().to_vec());
        let public_key = ephemeral
            .credential()
            .verifying_key()
            .to_encoded_point(true)
            .as_bytes()
            .to_vec();

        let request = AuthorizationRequest {
            network: key.network,
            verifying_contract,
            public_key: public_key.clone(),
            targets: key.targets.clone(),
            start_timestamp: now.timestamp().max(0) as u64,
            duration_days: self.settings.validity_days,
        };

        info!(targets = key.targets.len(), "requesting a decryption authorization");
        let signature = tokio::time::timeout(
            self.settings.signer_timeout,
            signer.sign_authorization(&request),
        )
        .await
        .map_err(|_| {
            Error::AuthorizationDenied(format!(
                "signer did not answer within {:?}",
                self.settings.signer_timeout
            ))
        })?
        .map_err(|e| match e {
            Error::AuthorizationDenied(_) => e,
            other => Error::AuthorizationDenied(other.to_string()),
        })?;

        if signature.is_empty() {
            return Err(Error::AuthorizationDenied(
                "signer returned an empty signature".to_string(),
            ));
        }

        let authorization = Authorization::new(
            private_key,
            public_key,
            signature,
            key.targets.clone(),
            key.subject,
            key.network,
            now.timestamp(),
            self.settings.validity_days,
        );

        if !self.is_current(key, slot) {
            info!("authorization was invalidated while the signer was asked, discarding it");
            return Err(Error::Stale);
        }
        if let Err(e) = self.store.put(key, &authorization).await {
            warn!(error = ?e, "could not persist the authorization, keeping it in memory only");
        }
        // An invalidation that landed during the write has already cleared the store
        if !self.is_current(key, slot) {
            if let Err(e) = self.store.remove(key).await {
                warn!(error = ?e, "could not remove the discarded authorization");
            }
            return Err(Error::Stale);
        }
        info!(expires_at = authorization.expires_at(), "decryption authorization created");
        Ok(Arc::new(authorization))
    }

    /// Forget the authorization for `key`, here and in the store
    pub async fn invalidate(&self, key: &CacheKey) {
        self.slots().remove(key);
        if let Err(e) = self.store.remove(key).await {
            warn!(error = ?e, "could not remove the stored authorization");
        }
    }

    /// Forget every authorization of `identity`
    pub async fn invalidate_identity(&self, identity: Address) {
        let keys: Vec<CacheKey> = {
            let mut slots = self.slots();
            let keys = slots
                .keys()
                .filter(|key| key.subject == identity)
                .cloned()
                .collect::<Vec<_>>();
            for key in &keys {
                slots.remove(key);
            }
            keys
        };
        for key in &keys {
            if let Err(e) = self.store.remove(key).await {
                warn!(error = ?e, "could not remove the stored authorization");
            }
        }
        debug!(%identity, removed = keys.len(), "invalidated authorizations");
    }

    /// Drop every in-memory authorization. Persisted ones stay.
    pub fn clear(&self) {
        self.slots().clear();
    }

    /// Invalidate the previous identity's authorizations whenever the execution context
    /// changes. Runs until the context sender is dropped.
    pub fn follow_context(
        self: &Arc<Self>,
        mut changes: watch::Receiver<Option<ExecutionContext>>,
    ) -> JoinHandle<()> {
        let cache = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut previous = *changes.borrow_and_update();
            while changes.changed().await.is_ok() {
                let current = *changes.borrow_and_update();
                let Some(cache) = cache.upgrade() else {
                    break;
                };
                if let Some(old) = previous.filter(|old| Some(*old) != current) {
                    cache.invalidate_identity(old.identity).await;
                }
                previous = current;
            }
        })
    }
}
