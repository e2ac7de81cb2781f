// SPDX-License-Identifier: LGPL-3.0-only
//
// This file is provided WITHOUT ANY WARRANTY;
// without even the implied warranty of MERCHANTABILITY
// or FITNESS FOR A PARTICULAR PURPOSE.

use crate::chain_config::ChainConfig;
use crate::fhe_config::FheConfig;
use crate::load_config::{find_in_parent, resolve_config_path, DEFAULT_CONFIG_NAME};
use anyhow::{anyhow, bail, Context, Result};
use figment::{
    providers::{Env, Format, Serialized, Yaml},
    Figment,
};
use path_clean::clean;
use serde::{Deserialize, Serialize};
use std::{
    env,
    path::{Path, PathBuf},
    time::Duration,
};
use tracing::debug;

/// Environment variables carrying secrets. They share the `VEIL_` prefix but are never
/// configuration keys.
const SECRET_ENV_KEYS: &[&str] = &["private_key", "store_password"];

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct RelayerConfig {
    /// Base url of the decryption relayer
    pub url: String,
    /// Wall-clock budget for a single decryption round-trip
    pub decrypt_timeout_secs: u64,
}

impl Default for RelayerConfig {
    fn default() -> Self {
        Self {
            url: "https://relayer.testnet.zama.cloud".to_string(),
            decrypt_timeout_secs: 45,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct AuthorizationConfig {
    /// How long a freshly signed decryption authorization stays valid
    pub validity_days: u32,
    /// How long to wait for the signer before giving up on an authorization
    pub signer_timeout_secs: u64,
    /// Directory of the persisted authorization store. Authorizations only live in memory
    /// when this is not set.
    pub store: Option<PathBuf>,
}

impl Default for AuthorizationConfig {
    fn default() -> Self {
        Self {
            validity_days: 365,
            signer_timeout_secs: 120,
            store: None,
        }
    }
}

/// Parameters that belong to the deployed computation rather than to the client
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct TargetConfig {
    /// Divisor applied to income (in wei) before encryption so the contract's own scaling
    /// cannot overflow its 32 bit intermediate
    pub income_prescale: u64,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            income_prescale: 1_000_000_000,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct AppConfig {
    /// All chains the client knows about
    pub chains: Vec<ChainConfig>,
    /// Name of the chain to use. Defaults to the first configured chain.
    pub chain: Option<String>,
    pub relayer: RelayerConfig,
    pub authorization: AuthorizationConfig,
    pub fhe: FheConfig,
    pub target: TargetConfig,
    /// Open Telemetry collector grpc endpoint. Eg. http://127.0.0.1:4317
    pub otel: Option<String>,
    #[serde(skip)]
    config_file: Option<PathBuf>,
}

impl AppConfig {
    /// The active chain
    pub fn active_chain(&self) -> Result<&ChainConfig> {
        match &self.chain {
            Some(name) => self
                .chains
                .iter()
                .find(|chain| &chain.name == name)
                .ok_or_else(|| anyhow!("Chain '{name}' is not configured")),
            None => self
                .chains
                .first()
                .ok_or_else(|| anyhow!("No chains configured")),
        }
    }

    pub fn decrypt_timeout(&self) -> Duration {
        Duration::from_secs(self.relayer.decrypt_timeout_secs)
    }

    pub fn signer_timeout(&self) -> Duration {
        Duration::from_secs(self.authorization.signer_timeout_secs)
    }

    pub fn config_file(&self) -> Option<&Path> {
        self.config_file.as_deref()
    }

    /// Resolve a configured path relative to the directory of the loaded config file
    pub fn resolve_path(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            return path.to_path_buf();
        }
        let base = self
            .config_file
            .as_deref()
            .and_then(Path::parent)
            .map(Path::to_path_buf)
            .unwrap_or_default();
        clean(base.join(path))
    }

    pub fn public_key_file(&self) -> Option<PathBuf> {
        self.fhe
            .public_key_file
            .as_deref()
            .map(|p| self.resolve_path(p))
    }

    pub fn store_dir(&self) -> Option<PathBuf> {
        self.authorization
            .store
            .as_deref()
            .map(|p| self.resolve_path(p))
    }

    fn validate(&self) -> Result<()> {
        for chain in &self.chains {
            chain.rpc_url()?;
        }
        if self.target.income_prescale == 0 {
            bail!("target.income_prescale must be greater than zero");
        }
        if self.authorization.validity_days == 0 {
            bail!("authorization.validity_days must be greater than zero");
        }
        if self.relayer.decrypt_timeout_secs == 0 {
            bail!("relayer.decrypt_timeout_secs must be greater than zero");
        }
        if self.authorization.signer_timeout_secs == 0 {
            bail!("authorization.signer_timeout_secs must be greater than zero");
        }
        Ok(())
    }
}

pub struct OsDirs;

impl OsDirs {
    pub fn config_dir() -> Result<PathBuf> {
        dirs::config_dir()
            .map(|dir| dir.join("veil"))
            .ok_or_else(|| anyhow!("Could not determine the OS config directory"))
    }
}

/// Load the config file given on the command line, or the nearest `veil.config.yaml`, and
/// apply `VEIL_` environment overrides (nested keys are split on `__`,
/// eg. `VEIL_RELAYER__URL`).
pub fn load_config(explicit: Option<&Path>) -> Result<AppConfig> {
    let cwd = env::current_dir()?;
    let path = resolve_config_path(
        find_in_parent,
        &cwd,
        &OsDirs::config_dir()?,
        DEFAULT_CONFIG_NAME,
        explicit,
    );

    // Surface a missing file as an io error so callers can tell it apart from a bad file
    std::fs::metadata(&path)?;
    debug!(path = %path.display(), "loading configuration");

    let mut config: AppConfig = Figment::from(Serialized::defaults(AppConfig::default()))
        .merge(Yaml::file(&path))
        .merge(Env::prefixed("VEIL_").split("__").ignore(SECRET_ENV_KEYS))
        .extract()
        .context("Could not parse configuration")?;

    config.config_file = Some(path);
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::BfvPreset;
    use alloy_primitives::address;
    use figment::Jail;

    const CONFIG: &str = r#"
chains:
  - name: "hardhat"
    rpc_url: "ws://localhost:8545"
    chain_id: 31337
    contracts:
      loan_risk: "0x9fE46736679d2D9a65F0992F2272dE9f3c7fa6e0"
      decryption_verifier: "0xCf7Ed3AccA5a467e9e704C703E8D87F634fB0Fc9"
  - name: "sepolia"
    rpc_url: "https://rpc.sepolia.org"
    chain_id: 11155111
    contracts:
      loan_risk: "0xDc64a140Aa3E981100a9becA4E685f962f0cF6C9"
      decryption_verifier: "0x5FbDB2315678afecb367f032d93F642f64180aa3"
fhe:
  preset: insecure-512
  public_key_file: "./keys/network.pk"
authorization:
  store: "./auth"
"#;

    #[test]
    fn test_deserialization() -> Result<()> {
        let config: AppConfig = serde_yaml::from_str(CONFIG)?;
        let chain = config.active_chain()?;
        assert_eq!(chain.name, "hardhat");
        assert_eq!(chain.chain_id, 31337);
        assert_eq!(
            chain.contracts.loan_risk,
            address!("9fE46736679d2D9a65F0992F2272dE9f3c7fa6e0")
        );
        assert_eq!(config.fhe.preset, BfvPreset::Insecure512);
        assert_eq!(config.relayer.decrypt_timeout_secs, 45);
        assert_eq!(config.authorization.validity_days, 365);
        assert_eq!(config.target.income_prescale, 1_000_000_000);
        Ok(())
    }

    #[test]
    fn test_unknown_fields_are_rejected() {
        let broken = "relayer:\n  url: \"http://localhost\"\n  retries: 3\n";
        assert!(serde_yaml::from_str::<AppConfig>(broken).is_err());
    }

    #[test]
    fn test_load_with_env_overrides() {
        Jail::expect_with(|jail| {
            jail.create_file(DEFAULT_CONFIG_NAME, CONFIG)?;
            jail.set_env("VEIL_CHAIN", "sepolia");
            jail.set_env("VEIL_RELAYER__DECRYPT_TIMEOUT_SECS", "30");
            jail.set_env("VEIL_PRIVATE_KEY", "0xdeadbeef");

            let config = load_config(None).map_err(|e| e.to_string())?;
            let chain = config.active_chain().map_err(|e| e.to_string())?;
            assert_eq!(chain.chain_id, 11155111);
            assert_eq!(config.decrypt_timeout(), Duration::from_secs(30));

            let dir = env::current_dir().map_err(|e| e.to_string())?;
            assert_eq!(config.public_key_file(), Some(dir.join("keys/network.pk")));
            assert_eq!(config.store_dir(), Some(dir.join("auth")));
            Ok(())
        });
    }

    #[test]
    fn test_file_not_found() -> Result<()> {
        let Err(err) = load_config(Some(Path::new("/nope/veil.config.yaml"))) else {
            bail!("error expected");
        };
        let Some(e) = err.downcast_ref::<std::io::Error>() else {
            bail!("io error expected");
        };
        assert_eq!(e.kind(), std::io::ErrorKind::NotFound);
        Ok(())
    }

    #[test]
    fn test_unknown_chain() -> Result<()> {
        let mut config: AppConfig = serde_yaml::from_str(CONFIG)?;
        config.chain = Some("mainnet".to_string());
        assert!(config.active_chain().is_err());
        Ok(())
    }

    #[test]
    fn test_zero_timeouts_are_rejected() -> Result<()> {
        let mut config: AppConfig = serde_yaml::from_str(CONFIG)?;
        config.validate()?;

        config.relayer.decrypt_timeout_secs = 0;
        assert!(config.validate().is_err());

        config.relayer.decrypt_timeout_secs = 45;
        config.authorization.signer_timeout_secs = 0;
        assert!(config.validate().is_err());
        Ok(())
    }
}
