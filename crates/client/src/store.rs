// SPDX-License-Identifier: LGPL-3.0-only
//
// This file is provided WITHOUT ANY WARRANTY;
// without even the implied warranty of MERCHANTABILITY
// or FITNESS FOR A PARTICULAR PURPOSE.

use crate::authorization::{Authorization, CacheKey};
use alloy::primitives::Address;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::debug;
use veil_crypto::Cipher;
use zeroize::{Zeroize, Zeroizing};

/// Where authorizations survive a restart of the cache
#[async_trait]
pub trait AuthorizationStore: Send + Sync {
    async fn get(&self, key: &CacheKey) -> Result<Option<Authorization>>;
    async fn put(&self, key: &CacheKey, authorization: &Authorization) -> Result<()>;
    async fn remove(&self, key: &CacheKey) -> Result<()>;
}

/// Serialized form of an [`Authorization`]
#[derive(Serialize, Deserialize)]
struct AuthorizationRecord {
    network: u64,
    subject: [u8; 20],
    targets: Vec<[u8; 20]>,
    private_key: Vec<u8>,
    public_key: Vec<u8>,
    signature: Vec<u8>,
    issued_at: i64,
    validity_days: u32,
}

impl Drop for AuthorizationRecord {
    fn drop(&mut self) {
        self.private_key.zeroize();
    }
}

impl From<&Authorization> for AuthorizationRecord {
    fn from(value: &Authorization) -> Self {
        Self {
            network: value.network(),
            subject: value.subject().into_array(),
            targets: value.targets().iter().map(|t| t.into_array()).collect(),
            private_key: value.private_key().to_vec(),
            public_key: value.public_key().to_vec(),
            signature: value.signature().to_vec(),
            issued_at: value.issued_at(),
            validity_days: value.validity_days(),
        }
    }
}

impl From<&AuthorizationRecord> for Authorization {
    fn from(record: &AuthorizationRecord) -> Self {
        Authorization::new(
            Zeroizing::new(record.private_key.clone()),
            record.public_key.clone(),
            record.signature.clone(),
            record.targets.iter().map(|t| Address::from(*t)).collect(),
            Address::from(record.subject),
            record.network,
            record.issued_at,
            record.validity_days,
        )
    }
}

/// Keeps authorizations for the lifetime of the process
#[derive(Default)]
pub struct InMemoryAuthorizationStore {
    records: Mutex<HashMap<CacheKey, AuthorizationRecord>>,
}

impl InMemoryAuthorizationStore {
    fn records(&self) -> std::sync::MutexGuard<'_, HashMap<CacheKey, AuthorizationRecord>> {
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl AuthorizationStore for InMemoryAuthorizationStore {
    async fn get(&self, key: &CacheKey) -> Result<Option<Authorization>> {
        Ok(self.records().get(key).map(Authorization::from))
    }

    async fn put(&self, key: &CacheKey, authorization: &Authorization) -> Result<()> {
        self.records()
            .insert(key.clone(), AuthorizationRecord::from(authorization));
        Ok(())
    }

    async fn remove(&self, key: &CacheKey) -> Result<()> {
        self.records().remove(key);
        Ok(())
    }
}

/// Persists authorizations in a sled database, each record encrypted with a password
/// derived key
pub struct SledAuthorizationStore {
    db: sled::Db,
    cipher: Arc<Cipher>,
}

impl SledAuthorizationStore {
    pub fn open(path: &Path, cipher: Arc<Cipher>) -> Result<Self> {
        let db = sled::open(path)
            .with_context(|| format!("Could not open authorization store at {}", path.display()))?;
        Ok(Self { db, cipher })
    }
}

#[async_trait]
impl AuthorizationStore for SledAuthorizationStore {
    async fn get(&self, key: &CacheKey) -> Result<Option<Authorization>> {
        let Some(encrypted) = self.db.get(key.storage_key())? else {
            return Ok(None);
        };
        let bytes = self
            .cipher
            .decrypt_data(&encrypted)
            .context("Could not decrypt stored authorization")?;
        let record: AuthorizationRecord = bincode::deserialize(&bytes)?;
        Ok(Some(Authorization::from(&record)))
    }

    async fn put(&self, key: &CacheKey, authorization: &Authorization) -> Result<()> {
        let mut bytes = bincode::serialize(&AuthorizationRecord::from(authorization))?;
        let encrypted = self.cipher.encrypt_data(&mut bytes)?;
        self.db.insert(key.storage_key(), encrypted)?;
        self.db.flush_async().await?;
        debug!(key = %key.storage_key(), "persisted authorization");
        Ok(())
    }

    async fn remove(&self, key: &CacheKey) -> Result<()> {
        self.db.remove(key.storage_key())?;
        self.db.flush_async().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::address;
    use tempfile::tempdir;

    fn authorization() -> Authorization {
        Authorization::new(
            Zeroizing::new(vec![0x42; 32]),
            vec![2; 33],
            vec![7; 65],
            vec![address!("9fE46736679d2D9a65F0992F2272dE9f3c7fa6e0")],
            address!("f39Fd6e51aad88F6F4ce6aB8827279cffFb92266"),
            11155111,
            1_760_000_000,
            365,
        )
    }

    #[tokio::test]
    async fn test_sled_store_round_trip() -> Result<()> {
        let dir = tempdir()?;
        let auth = authorization();
        let key = auth.key();

        {
            let store = SledAuthorizationStore::open(
                dir.path(),
                Arc::new(Cipher::from_password("store password")?),
            )?;
            assert!(store.get(&key).await?.is_none());
            store.put(&key, &auth).await?;
        }

        let reopened = SledAuthorizationStore::open(
            dir.path(),
            Arc::new(Cipher::from_password("store password")?),
        )?;
        let loaded = reopened.get(&key).await?.context("record expected")?;
        assert_eq!(loaded.private_key(), auth.private_key());
        assert_eq!(loaded.signature(), auth.signature());
        assert_eq!(loaded.key(), key);

        reopened.remove(&key).await?;
        assert!(reopened.get(&key).await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_records_are_encrypted_at_rest() -> Result<()> {
        let dir = tempdir()?;
        let auth = authorization();
        let key = auth.key();
        let store =
            SledAuthorizationStore::open(dir.path(), Arc::new(Cipher::from_password("one")?))?;
        store.put(&key, &auth).await?;

        let raw = store.db.get(key.storage_key())?.context("record expected")?;
        assert!(!raw.windows(32).any(|w| w == [0x42; 32]));
        drop(store);

        let wrong =
            SledAuthorizationStore::open(dir.path(), Arc::new(Cipher::from_password("two")?))?;
        assert!(wrong.get(&key).await.is_err());
        Ok(())
    }
}
