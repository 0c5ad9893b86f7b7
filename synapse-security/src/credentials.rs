//! Channel-scoped encryption for common-tool credentials. A treasury-funded
//! tool's API key or password is encrypted with a key derived from the
//! channel id, never stored in plaintext in replicated state.

use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use hkdf::Hkdf;
use rand::RngCore;
use sha2::Sha256;
use thiserror::Error;

const NONCE_LEN: usize = 12;

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("encryption failed")]
    Encrypt,
    #[error("decryption failed")]
    Decrypt,
    #[error("malformed ciphertext envelope")]
    Malformed,
}

/// Derives a 256-bit symmetric key for `channel_id` from a fixed salt via
/// HKDF-SHA256, so every node can independently re-derive the same key
/// without the key itself ever crossing the network.
pub fn derive_channel_key(channel_id: &str, salt: &[u8]) -> [u8; 32] {
    let hk = Hkdf::<Sha256>::new(Some(salt), channel_id.as_bytes());
    let mut key = [0u8; 32];
    hk.expand(b"synapse-ng-common-tool-credentials", &mut key)
        .expect("32 bytes is a valid HKDF-SHA256 output length");
    key
}

/// Encrypts `plaintext` under `key`, returning `base64(nonce || ciphertext)`.
pub fn encrypt(key: &[u8; 32], plaintext: &str) -> Result<String, CredentialError> {
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| CredentialError::Encrypt)?;
    let mut nonce_bytes = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext.as_bytes())
        .map_err(|_| CredentialError::Encrypt)?;

    let mut envelope = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    envelope.extend_from_slice(&nonce_bytes);
    envelope.extend_from_slice(&ciphertext);
    Ok(BASE64.encode(envelope))
}

/// Reverses [`encrypt`].
pub fn decrypt(key: &[u8; 32], encoded: &str) -> Result<String, CredentialError> {
    let envelope = BASE64.decode(encoded).map_err(|_| CredentialError::Malformed)?;
    if envelope.len() < NONCE_LEN {
        return Err(CredentialError::Malformed);
    }
    let (nonce_bytes, ciphertext) = envelope.split_at(NONCE_LEN);
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| CredentialError::Decrypt)?;
    let nonce = Nonce::from_slice(nonce_bytes);

    let plaintext = cipher
        .decrypt(nonce, ciphertext)
        .map_err(|_| CredentialError::Decrypt)?;
    String::from_utf8(plaintext).map_err(|_| CredentialError::Decrypt)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_encrypt_decrypt() {
        let key = derive_channel_key("engineering", b"channel-salt");
        let encrypted = encrypt(&key, "api-key-12345").unwrap();
        let decrypted = decrypt(&key, &encrypted).unwrap();
        assert_eq!(decrypted, "api-key-12345");
    }

    #[test]
    fn different_channels_derive_different_keys() {
        let a = derive_channel_key("engineering", b"channel-salt");
        let b = derive_channel_key("marketing", b"channel-salt");
        assert_ne!(a, b);
    }

    #[test]
    fn wrong_key_fails_decryption() {
        let key = derive_channel_key("engineering", b"channel-salt");
        let other = derive_channel_key("marketing", b"channel-salt");
        let encrypted = encrypt(&key, "secret").unwrap();
        assert!(decrypt(&other, &encrypted).is_err());
    }
}
