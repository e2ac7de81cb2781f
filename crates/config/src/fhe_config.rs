// SPDX-License-Identifier: LGPL-3.0-only
//
// This file is provided WITHOUT ANY WARRANTY;
// without even the implied warranty of MERCHANTABILITY
// or FITNESS FOR A PARTICULAR PURPOSE.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// BFV parameter presets used to encrypt submission inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum BfvPreset {
    /// Degree 512 - DO NOT USE IN PRODUCTION
    Insecure512,
    /// Degree 8192
    #[default]
    Secure8192,
}

impl BfvPreset {
    pub fn degree(&self) -> usize {
        match self {
            BfvPreset::Insecure512 => 512,
            BfvPreset::Secure8192 => 8192,
        }
    }

    pub fn plaintext_modulus(&self) -> u64 {
        match self {
            BfvPreset::Insecure512 => 0xffffee001,
            BfvPreset::Secure8192 => 18014398509481984,
        }
    }

    pub fn moduli(&self) -> &'static [u64] {
        match self {
            BfvPreset::Insecure512 => &[0x7fffffffe0001],
            BfvPreset::Secure8192 => &[0x0100000002a20001, 0x0100000001760001],
        }
    }

    /// Error variance override, `None` keeps the library default
    pub fn variance(&self) -> Option<usize> {
        match self {
            BfvPreset::Insecure512 => Some(3),
            BfvPreset::Secure8192 => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct FheConfig {
    pub preset: BfvPreset,
    /// The network's serialized BFV public key. Relative paths resolve against the config file.
    pub public_key_file: Option<PathBuf>,
}
