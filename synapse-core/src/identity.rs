//! Cryptographic node identity: an Ed25519 signing keypair plus an X25519
//! key-exchange keypair, persisted atomically to a data directory and
//! reloaded across restarts. The node id is derived from the signing public
//! key, never stored separately.

use std::path::{Path, PathBuf};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand_core::OsRng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use x25519_dalek::{PublicKey as XPublicKey, StaticSecret as XSecretKey};

use crate::types::NodeId;

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("failed to read key material at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("key file at {0} is corrupt")]
    Corrupt(PathBuf),
    #[error("signature verification failed")]
    InvalidSignature,
    #[error("malformed base64 in signature or public key")]
    Encoding,
    #[error("canonicalization failed: {0}")]
    Canonicalize(#[from] serde_json::Error),
}

const SIGNING_KEY_FILE: &str = "node_signing.key";
const KX_KEY_FILE: &str = "node_kx.key";

/// The node's persistent cryptographic identity.
pub struct NodeIdentity {
    signing_key: SigningKey,
    kx_secret: XSecretKey,
    node_id: NodeId,
}

#[derive(Serialize, Deserialize)]
struct StoredSigningKey {
    secret_bytes: [u8; 32],
}

#[derive(Serialize, Deserialize)]
struct StoredKxKey {
    secret_bytes: [u8; 32],
}

impl NodeIdentity {
    /// Load identity from `key_dir` if present, otherwise generate a fresh
    /// one and persist it. Corrupt key material is a fatal error: the node
    /// must never silently regenerate over an existing identity.
    pub async fn load_or_create(key_dir: &Path) -> Result<Self, IdentityError> {
        let signing_path = key_dir.join(SIGNING_KEY_FILE);
        let kx_path = key_dir.join(KX_KEY_FILE);

        if signing_path.exists() && kx_path.exists() {
            Self::load(&signing_path, &kx_path).await
        } else if signing_path.exists() || kx_path.exists() {
            // Half a keypair on disk is never a valid "missing" state.
            Err(IdentityError::Corrupt(key_dir.to_path_buf()))
        } else {
            let identity = Self::generate();
            identity.persist(key_dir).await?;
            Ok(identity)
        }
    }

    /// Generate a fresh, unpersisted identity. `load_or_create` is what the
    /// process actually uses so identity survives restarts; this is for
    /// tests and any ephemeral, throwaway identity.
    pub fn generate() -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        let kx_secret = XSecretKey::random_from_rng(OsRng);
        let node_id = node_id_from_verifying_key(&signing_key.verifying_key());
        Self {
            signing_key,
            kx_secret,
            node_id,
        }
    }

    async fn load(signing_path: &Path, kx_path: &Path) -> Result<Self, IdentityError> {
        let signing_bytes = tokio::fs::read(signing_path)
            .await
            .map_err(|e| IdentityError::Io {
                path: signing_path.to_path_buf(),
                source: e,
            })?;
        let stored: StoredSigningKey = serde_json::from_slice(&signing_bytes)
            .map_err(|_| IdentityError::Corrupt(signing_path.to_path_buf()))?;
        let signing_key = SigningKey::from_bytes(&stored.secret_bytes);

        let kx_bytes = tokio::fs::read(kx_path)
            .await
            .map_err(|e| IdentityError::Io {
                path: kx_path.to_path_buf(),
                source: e,
            })?;
        let stored_kx: StoredKxKey = serde_json::from_slice(&kx_bytes)
            .map_err(|_| IdentityError::Corrupt(kx_path.to_path_buf()))?;
        let kx_secret = XSecretKey::from(stored_kx.secret_bytes);

        let node_id = node_id_from_verifying_key(&signing_key.verifying_key());
        Ok(Self {
            signing_key,
            kx_secret,
            node_id,
        })
    }

    async fn persist(&self, key_dir: &Path) -> Result<(), IdentityError> {
        tokio::fs::create_dir_all(key_dir)
            .await
            .map_err(|e| IdentityError::Io {
                path: key_dir.to_path_buf(),
                source: e,
            })?;

        write_atomic(
            &key_dir.join(SIGNING_KEY_FILE),
            &StoredSigningKey {
                secret_bytes: self.signing_key.to_bytes(),
            },
        )
        .await?;
        write_atomic(
            &key_dir.join(KX_KEY_FILE),
            &StoredKxKey {
                secret_bytes: self.kx_secret.to_bytes(),
            },
        )
        .await?;
        Ok(())
    }

    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    pub fn kx_public_key(&self) -> XPublicKey {
        XPublicKey::from(&self.kx_secret)
    }

    pub fn kx_public_key_b64(&self) -> String {
        URL_SAFE_NO_PAD.encode(self.kx_public_key().as_bytes())
    }

    pub fn kx_secret(&self) -> &XSecretKey {
        &self.kx_secret
    }

    /// `SHA256(signing private key)`, used to derive ZKP nullifiers without
    /// ever exposing the raw signing key to the voting protocol.
    pub fn node_secret(&self) -> String {
        use sha2::{Digest, Sha256};
        let mut hasher = Sha256::new();
        hasher.update(self.signing_key.to_bytes());
        hex_encode(&hasher.finalize())
    }

    /// Canonicalize `data` (sorted keys, compact separators) and sign the
    /// resulting UTF-8 bytes, returning an unpadded URL-safe base64 signature.
    pub fn sign_value(&self, data: &serde_json::Value) -> Result<String, IdentityError> {
        let canonical = canonicalize(data)?;
        let signature = self.signing_key.sign(canonical.as_bytes());
        Ok(URL_SAFE_NO_PAD.encode(signature.to_bytes()))
    }

    pub fn sign_bytes(&self, bytes: &[u8]) -> String {
        let signature = self.signing_key.sign(bytes);
        URL_SAFE_NO_PAD.encode(signature.to_bytes())
    }
}

/// Verify a signature over canonicalized `data` against the public key
/// encoded in `sender_id`. Any decoding or cryptographic failure is a
/// verification failure, never a panic.
pub fn verify_value(
    sender_id: &NodeId,
    data: &serde_json::Value,
    signature_b64: &str,
) -> Result<(), IdentityError> {
    let canonical = canonicalize(data)?;
    verify_bytes(sender_id, canonical.as_bytes(), signature_b64)
}

pub fn verify_bytes(
    sender_id: &NodeId,
    bytes: &[u8],
    signature_b64: &str,
) -> Result<(), IdentityError> {
    let pub_bytes = URL_SAFE_NO_PAD
        .decode(sender_id.0.as_bytes())
        .map_err(|_| IdentityError::Encoding)?;
    let pub_array: [u8; 32] = pub_bytes.try_into().map_err(|_| IdentityError::Encoding)?;
    let verifying_key =
        VerifyingKey::from_bytes(&pub_array).map_err(|_| IdentityError::Encoding)?;

    let sig_bytes = URL_SAFE_NO_PAD
        .decode(signature_b64.as_bytes())
        .map_err(|_| IdentityError::Encoding)?;
    let sig_array: [u8; 64] = sig_bytes.try_into().map_err(|_| IdentityError::Encoding)?;
    let signature = Signature::from_bytes(&sig_array);

    verifying_key
        .verify(bytes, &signature)
        .map_err(|_| IdentityError::InvalidSignature)
}

fn node_id_from_verifying_key(key: &VerifyingKey) -> NodeId {
    NodeId(URL_SAFE_NO_PAD.encode(key.as_bytes()))
}

fn canonicalize(data: &serde_json::Value) -> Result<String, IdentityError> {
    // serde_json's map type is a BTreeMap for Value::Object when the
    // `preserve_order` feature is off, which gives us sorted keys and
    // matches the canonical `json.dumps(..., sort_keys=True)` wire format.
    Ok(serde_json::to_string(data)?)
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

async fn write_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), IdentityError> {
    let tmp_path = path.with_extension("tmp");
    let bytes = serde_json::to_vec(value).map_err(IdentityError::Canonicalize)?;
    tokio::fs::write(&tmp_path, &bytes)
        .await
        .map_err(|e| IdentityError::Io {
            path: tmp_path.clone(),
            source: e,
        })?;
    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| IdentityError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        tokio::fs::set_permissions(path, perms)
            .await
            .map_err(|e| IdentityError::Io {
                path: path.to_path_buf(),
                source: e,
            })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn generate_persist_reload_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let identity = NodeIdentity::generate();
        identity.persist(dir.path()).await.unwrap();

        let reloaded = NodeIdentity::load_or_create(dir.path()).await.unwrap();
        assert_eq!(identity.node_id(), reloaded.node_id());
        assert_eq!(identity.kx_public_key_b64(), reloaded.kx_public_key_b64());
    }

    #[tokio::test]
    async fn sign_and_verify_roundtrip() {
        let identity = NodeIdentity::generate();
        let payload = json!({"b": 2, "a": 1});
        let sig = identity.sign_value(&payload).unwrap();
        verify_value(identity.node_id(), &payload, &sig).unwrap();
    }

    #[tokio::test]
    async fn verify_rejects_tampered_payload() {
        let identity = NodeIdentity::generate();
        let payload = json!({"amount": 10});
        let sig = identity.sign_value(&payload).unwrap();
        let tampered = json!({"amount": 11});
        assert!(verify_value(identity.node_id(), &tampered, &sig).is_err());
    }

    #[tokio::test]
    async fn half_written_keypair_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join(SIGNING_KEY_FILE), b"{}")
            .await
            .unwrap();
        let result = NodeIdentity::load_or_create(dir.path()).await;
        assert!(matches!(result, Err(IdentityError::Corrupt(_))));
    }
}
