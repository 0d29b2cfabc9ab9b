use aes_gcm::{
    aead::{Aead, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use rand::RngCore;

use super::{SecretMap, VaultError};

/// AES-GCM standard nonce size.
pub const NONCE_LEN: usize = 12;

/// AES-256-GCM sealing of credential payloads.
///
/// Ciphertext layout is `nonce || sealed`, so every blob carries what it needs
/// to be opened again. No associated data is bound.
#[derive(Clone)]
pub struct VaultCrypto {
    cipher: Aes256Gcm,
}

impl VaultCrypto {
    pub fn new(master_key_hex: &str) -> Result<Self, VaultError> {
        let key = parse_master_key(master_key_hex)?;
        Self::from_key(&key)
    }

    pub fn from_key(key: &[u8; 32]) -> Result<Self, VaultError> {
        let cipher = Aes256Gcm::new_from_slice(key)
            .map_err(|e| VaultError::InvalidKey(format!("{:?}", e)))?;
        Ok(Self { cipher })
    }

    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, VaultError> {
        let nonce_bytes = generate_nonce();
        let sealed = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), plaintext)
            .map_err(|_| VaultError::Encryption)?;

        let mut out = Vec::with_capacity(NONCE_LEN + sealed.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&sealed);
        Ok(out)
    }

    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, VaultError> {
        if ciphertext.len() < NONCE_LEN {
            return Err(VaultError::AuthenticationFailed);
        }
        let (nonce, sealed) = ciphertext.split_at(NONCE_LEN);
        self.cipher
            .decrypt(Nonce::from_slice(nonce), sealed)
            .map_err(|_| VaultError::AuthenticationFailed)
    }

    /// Serializes a secret map to JSON and seals it.
    pub fn seal_secrets(&self, secrets: &SecretMap) -> Result<Vec<u8>, VaultError> {
        let mut json = serde_json::to_vec(secrets)
            .map_err(|e| VaultError::Malformed(e.to_string()))?;
        let sealed = self.encrypt(&json);
        json.fill(0);
        sealed
    }

    pub fn open_secrets(&self, ciphertext: &[u8]) -> Result<SecretMap, VaultError> {
        let mut plain = self.decrypt(ciphertext)?;
        let parsed = serde_json::from_slice::<SecretMap>(&plain)
            .map_err(|e| VaultError::Malformed(e.to_string()));
        plain.fill(0);
        parsed
    }
}

fn generate_nonce() -> [u8; NONCE_LEN] {
    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);
    nonce
}

/// Parses a 64-character hex master key into 32 bytes.
pub fn parse_master_key(hex_str: &str) -> Result<[u8; 32], VaultError> {
    let hex_str = hex_str.trim();
    if hex_str.len() != 64 {
        return Err(VaultError::InvalidKey(format!(
            "expected 64 hex characters, got {}",
            hex_str.len()
        )));
    }
    let bytes = hex::decode(hex_str).map_err(|e| VaultError::InvalidKey(e.to_string()))?;
    let mut key = [0u8; 32];
    key.copy_from_slice(&bytes);
    Ok(key)
}

/// Fresh random key, hex encoded. Used by `chathub keygen`.
pub fn generate_master_key_hex() -> String {
    let mut key = [0u8; 32];
    OsRng.fill_bytes(&mut key);
    let encoded = hex::encode(key);
    key.fill(0);
    encoded
}
