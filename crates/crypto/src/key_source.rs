// SPDX-License-Identifier: LGPL-3.0-only
//
// This file is provided WITHOUT ANY WARRANTY;
// without even the implied warranty of MERCHANTABILITY
// or FITNESS FOR A PARTICULAR PURPOSE.

use anyhow::{bail, Context, Result};
use std::env;
use zeroize::Zeroizing;

/// Where the password protecting stored secrets comes from
pub enum KeySource {
    /// A password held in process memory
    Password(Zeroizing<Vec<u8>>),
    /// The name of an environment variable holding the password
    Env(String),
}

impl KeySource {
    pub fn password(value: &str) -> Self {
        KeySource::Password(Zeroizing::new(value.as_bytes().to_vec()))
    }

    pub fn env(name: &str) -> Self {
        KeySource::Env(name.to_string())
    }

    pub(crate) fn read(&self) -> Result<Zeroizing<Vec<u8>>> {
        let key = match self {
            KeySource::Password(value) => value.clone(),
            KeySource::Env(name) => Zeroizing::new(
                env::var(name)
                    .with_context(|| format!("Environment variable {name} is not set"))?
                    .into_bytes(),
            ),
        };
        if key.is_empty() {
            bail!("Refusing to use an empty password");
        }
        Ok(key)
    }
}
