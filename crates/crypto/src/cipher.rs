// SPDX-License-Identifier: LGPL-3.0-only
//
// This file is provided WITHOUT ANY WARRANTY;
// without even the implied warranty of MERCHANTABILITY
// or FITNESS FOR A PARTICULAR PURPOSE.

use crate::key_source::KeySource;
use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use anyhow::{anyhow, bail, Result};
use argon2::{Algorithm, Argon2, Params, Version};
use rand::{rngs::OsRng, RngCore};
use zeroize::{Zeroize, Zeroizing};

// https://cheatsheetseries.owasp.org/cheatsheets/Password_Storage_Cheat_Sheet.html
const ARGON2_M_COST: u32 = 19 * 1024; // 19 MiB
const ARGON2_T_COST: u32 = 2;
const ARGON2_P_COST: u32 = 1;
const ARGON2_OUTPUT_LEN: usize = 32;

const SALT_LEN: usize = 32;
const NONCE_LEN: usize = 12;
const HEADER_LEN: usize = SALT_LEN + NONCE_LEN;

fn derive_key(password: &[u8], salt: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
    let params = Params::new(
        ARGON2_M_COST,
        ARGON2_T_COST,
        ARGON2_P_COST,
        Some(ARGON2_OUTPUT_LEN),
    )
    .map_err(|_| anyhow!("Could not create argon2 params"))?;

    let mut key = Zeroizing::new(vec![0u8; ARGON2_OUTPUT_LEN]);
    Argon2::new(Algorithm::Argon2id, Version::V0x13, params)
        .hash_password_into(password, salt, &mut key)
        .map_err(|_| anyhow!("Key derivation error"))?;
    Ok(key)
}

/// Password based authenticated encryption for secrets kept at rest.
///
/// Records are laid out as `[32 byte salt][12 byte nonce][AES-256-GCM ciphertext]`. Every
/// record gets a fresh salt and nonce, and the AES key is derived per record with Argon2id.
pub struct Cipher {
    password: Zeroizing<Vec<u8>>,
}

impl Cipher {
    pub fn new(source: KeySource) -> Result<Self> {
        Ok(Self {
            password: source.read()?,
        })
    }

    pub fn from_password(value: &str) -> Result<Self> {
        Self::new(KeySource::password(value))
    }

    pub fn from_env(name: &str) -> Result<Self> {
        Self::new(KeySource::env(name))
    }

    /// Encrypt `data` and zeroize it afterwards
    pub fn encrypt_data(&self, data: &mut Vec<u8>) -> Result<Vec<u8>> {
        let mut salt = [0u8; SALT_LEN];
        OsRng.fill_bytes(&mut salt);
        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);

        let key = derive_key(&self.password, &salt)?;
        let cipher = Aes256Gcm::new_from_slice(&key)?;
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce), data.as_ref())
            .map_err(|_| anyhow!("Could not AES encrypt given plaintext"))?;
        data.zeroize();

        let mut output = Vec::with_capacity(HEADER_LEN + ciphertext.len());
        output.extend_from_slice(&salt);
        output.extend_from_slice(&nonce);
        output.extend_from_slice(&ciphertext);
        Ok(output)
    }

    pub fn decrypt_data(&self, encrypted: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
        if encrypted.len() < HEADER_LEN {
            bail!("Invalid encrypted data length");
        }
        let (salt, rest) = encrypted.split_at(SALT_LEN);
        let (nonce, ciphertext) = rest.split_at(NONCE_LEN);

        let key = derive_key(&self.password, salt)?;
        let cipher = Aes256Gcm::new_from_slice(&key)?;
        let plaintext = cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| anyhow!("Could not decrypt data"))?;
        Ok(Zeroizing::new(plaintext))
    }
}

impl Drop for Cipher {
    fn drop(&mut self) {
        self.password.zeroize();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encrypt_then_decrypt() -> Result<()> {
        let cipher = Cipher::from_password("correct horse battery staple")?;
        let mut data = b"authorization record".to_vec();
        let encrypted = cipher.encrypt_data(&mut data)?;

        assert!(data.iter().all(|b| *b == 0), "input must be zeroized");
        assert_ne!(&encrypted[HEADER_LEN..], b"authorization record");
        assert_eq!(&cipher.decrypt_data(&encrypted)?[..], b"authorization record");
        Ok(())
    }

    #[test]
    fn test_wrong_password_fails() -> Result<()> {
        let encrypted = Cipher::from_password("one")?.encrypt_data(&mut b"secret".to_vec())?;
        assert!(Cipher::from_password("two")?
            .decrypt_data(&encrypted)
            .is_err());
        Ok(())
    }

    #[test]
    fn test_tampering_is_detected() -> Result<()> {
        let cipher = Cipher::from_password("pw")?;
        let mut encrypted = cipher.encrypt_data(&mut b"secret".to_vec())?;
        let last = encrypted.len() - 1;
        encrypted[last] ^= 0x01;
        assert!(cipher.decrypt_data(&encrypted).is_err());
        assert!(cipher.decrypt_data(&encrypted[..10]).is_err());
        Ok(())
    }
}
