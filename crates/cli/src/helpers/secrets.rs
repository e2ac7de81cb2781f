// SPDX-License-Identifier: LGPL-3.0-only
//
// This file is provided WITHOUT ANY WARRANTY;
// without even the implied warranty of MERCHANTABILITY
// or FITNESS FOR A PARTICULAR PURPOSE.

use super::ensure_hex_zeroizing;
use anyhow::{Context, Result};
use dialoguer::{theme::ColorfulTheme, Password};
use std::env;
use veil_crypto::Cipher;
use zeroize::Zeroizing;

pub const PRIVATE_KEY_ENV: &str = "VEIL_PRIVATE_KEY";
pub const STORE_PASSWORD_ENV: &str = "VEIL_STORE_PASSWORD";

/// Wallet key from the environment, or asked for interactively
pub fn private_key() -> Result<Zeroizing<String>> {
    if let Ok(value) = env::var(PRIVATE_KEY_ENV) {
        let value = Zeroizing::new(value);
        return ensure_hex_zeroizing(value.trim())
            .with_context(|| format!("{PRIVATE_KEY_ENV} is not a valid private key"));
    }

    let input = Zeroizing::new(
        Password::with_theme(&ColorfulTheme::default())
            .with_prompt("Enter your Ethereum private key")
            .validate_with(|s: &String| ensure_hex_zeroizing(s.trim()).map(|_| ()))
            .interact()?,
    );
    ensure_hex_zeroizing(input.trim())
}

/// Cipher protecting the persisted authorization store
pub fn store_cipher() -> Result<Cipher> {
    if env::var_os(STORE_PASSWORD_ENV).is_some() {
        return Cipher::from_env(STORE_PASSWORD_ENV);
    }
    let password = Zeroizing::new(
        Password::with_theme(&ColorfulTheme::default())
            .with_prompt("Enter the authorization store password")
            .interact()?,
    );
    Cipher::from_password(&password)
}
