use crate::config::KeySource;
use crate::error::{Error, Result};
use crate::store::atomic_write;
use base64::{Engine as _, engine::general_purpose};
use chacha20poly1305::{
    XChaCha20Poly1305, XNonce,
    aead::{Aead, AeadCore, KeyInit, OsRng},
};
use rand::RngCore;
use std::path::Path;
use totp_rs::Secret;
use zeroize::Zeroizing;

pub const KEYRING_SERVICE: &str = "totp-store";
const KEYRING_USER: &str = "protection-key";
pub const KEY_FILE: &str = "protection.key";

// XChaCha20 uses a 24-byte nonce, stored in front of the ciphertext.
const NONCE_LEN: usize = 24;

pub type ProtectionKey = [u8; 32];

/// Reversible encryption of secret keys under a per-user protection key.
///
/// The blob format is `base64(nonce || ciphertext)`. A blob produced under a
/// different key fails authentication and is reported as [`Error::Decrypt`].
#[derive(Clone)]
pub struct Transcoder {
    key: Zeroizing<ProtectionKey>,
}

impl std::fmt::Debug for Transcoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Transcoder { .. }")
    }
}

impl Transcoder {
    pub fn with_key(key: ProtectionKey) -> Self {
        Transcoder {
            key: Zeroizing::new(key),
        }
    }

    /// Fresh random key, nothing persisted.
    pub fn generate() -> Self {
        let mut key = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut key);
        Self::with_key(key)
    }

    /// Load the protection key for the current OS user, creating it on first use.
    pub fn from_source(source: KeySource, app_dir: &Path) -> Result<Self> {
        match source {
            KeySource::Keyring => Self::from_keyring(),
            KeySource::File => Self::from_key_file(&app_dir.join(KEY_FILE)),
        }
    }

    fn from_keyring() -> Result<Self> {
        let entry = keyring::Entry::new(KEYRING_SERVICE, KEYRING_USER)?;
        match entry.get_password() {
            Ok(stored) => Ok(Self::with_key(decode_key(&stored)?)),
            Err(keyring::Error::NoEntry) => {
                tracing::info!("no protection key in keyring, generating a new one");
                let transcoder = Self::generate();
                entry.set_password(&general_purpose::STANDARD.encode(&*transcoder.key))?;
                Ok(transcoder)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn from_key_file(path: &Path) -> Result<Self> {
        if path.exists() {
            let stored = Zeroizing::new(std::fs::read_to_string(path)?);
            // an empty file never held a key, nothing can be encrypted under it
            if !stored.trim().is_empty() {
                return Ok(Self::with_key(decode_key(stored.trim())?));
            }
            tracing::warn!(path = %path.display(), "protection key file is empty, replacing it");
        }

        tracing::info!(path = %path.display(), "generating protection key file");
        let transcoder = Self::generate();
        let encoded = Zeroizing::new(general_purpose::STANDARD.encode(&*transcoder.key));
        atomic_write(path, encoded.as_bytes())?;
        Ok(transcoder)
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        let cipher = XChaCha20Poly1305::new(chacha20poly1305::Key::from_slice(&*self.key));
        let nonce = XChaCha20Poly1305::generate_nonce(&mut OsRng);

        let ciphertext = cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|e| Error::Protect(e.to_string()))?;

        let mut blob = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        blob.extend_from_slice(&nonce);
        blob.extend_from_slice(&ciphertext);
        Ok(general_purpose::STANDARD.encode(blob))
    }

    pub fn decrypt(&self, blob: &str) -> Result<Zeroizing<String>> {
        let bytes = general_purpose::STANDARD
            .decode(blob)
            .map_err(|e| Error::Decrypt(format!("bad base64: {e}")))?;
        if bytes.len() < NONCE_LEN {
            return Err(Error::Decrypt("blob too short".to_string()));
        }
        let (nonce, ciphertext) = bytes.split_at(NONCE_LEN);

        let cipher = XChaCha20Poly1305::new(chacha20poly1305::Key::from_slice(&*self.key));
        let plaintext = cipher
            .decrypt(XNonce::from_slice(nonce), ciphertext)
            .map_err(|_| Error::Decrypt("authentication failed".to_string()))?;

        String::from_utf8(plaintext)
            .map(Zeroizing::new)
            .map_err(|_| Error::Decrypt("plaintext is not UTF-8".to_string()))
    }
}

fn decode_key(stored: &str) -> Result<ProtectionKey> {
    let bytes = Zeroizing::new(
        general_purpose::STANDARD
            .decode(stored)
            .map_err(|e| Error::Decrypt(format!("stored protection key: {e}")))?,
    );
    if bytes.len() != 32 {
        return Err(Error::Decrypt("invalid protection key length".to_string()));
    }
    let mut key = [0u8; 32];
    key.copy_from_slice(&bytes);
    Ok(key)
}

#[cfg(unix)]
pub(crate) fn set_perms_restrictive(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
}

#[cfg(not(unix))]
pub(crate) fn set_perms_restrictive(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

/// Decode a base32 TOTP secret the way the code generator will.
///
/// Case-insensitive, trailing `=` padding tolerated. Returns `None` for
/// anything that does not decode to at least one byte.
pub fn decode_secret(secret: &str) -> Option<Vec<u8>> {
    let normalized = secret.trim_end_matches('=').to_ascii_uppercase();
    if normalized.is_empty() {
        return None;
    }
    match Secret::Encoded(normalized).to_bytes() {
        Ok(bytes) if !bytes.is_empty() => Some(bytes),
        _ => None,
    }
}

/// True when `secret` decodes to at least one byte. Short inputs such as `"A"`
/// that decode to nothing are rejected, since no code can be derived from them.
pub fn is_valid_secret(secret: &str) -> bool {
    decode_secret(secret).is_some()
}

/// Unpadded RFC 4648 base32, the canonical secret text of the store.
pub fn encode_secret(bytes: &[u8]) -> String {
    Secret::Raw(bytes.to_vec()).to_encoded().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let t = Transcoder::generate();
        for s in ["JBSWY3DPEHPK3PXP", "", "ключ ✓"] {
            let blob = t.encrypt(s).unwrap();
            assert_ne!(blob, s);
            assert_eq!(t.decrypt(&blob).unwrap().as_str(), s);
        }
    }

    #[test]
    fn test_nonce_differs_per_call() {
        let t = Transcoder::generate();
        assert_ne!(t.encrypt("A").unwrap(), t.encrypt("A").unwrap());
    }

    #[test]
    fn test_corrupted_ciphertext_fails() {
        let t = Transcoder::generate();
        let blob = t.encrypt("JBSWY3DPEHPK3PXP").unwrap();
        let mut bytes = general_purpose::STANDARD.decode(&blob).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0x01;
        let corrupted = general_purpose::STANDARD.encode(bytes);
        assert!(matches!(t.decrypt(&corrupted), Err(Error::Decrypt(_))));
    }

    #[test]
    fn test_other_key_fails() {
        let blob = Transcoder::with_key([1u8; 32]).encrypt("secret").unwrap();
        let other = Transcoder::with_key([2u8; 32]);
        assert!(matches!(other.decrypt(&blob), Err(Error::Decrypt(_))));
    }

    #[test]
    fn test_malformed_blob_fails() {
        let t = Transcoder::generate();
        assert!(matches!(t.decrypt("not base64!!"), Err(Error::Decrypt(_))));
        assert!(matches!(t.decrypt("AAAA"), Err(Error::Decrypt(_))));
    }

    #[test]
    fn test_key_file_is_reused() {
        let dir = tempfile::TempDir::new().unwrap();
        let first = Transcoder::from_source(KeySource::File, dir.path()).unwrap();
        let blob = first.encrypt("JBSWY3DPEHPK3PXP").unwrap();

        let second = Transcoder::from_source(KeySource::File, dir.path()).unwrap();
        assert_eq!(second.decrypt(&blob).unwrap().as_str(), "JBSWY3DPEHPK3PXP");
    }

    #[cfg(unix)]
    #[test]
    fn test_key_file_is_private() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::TempDir::new().unwrap();
        Transcoder::from_source(KeySource::File, dir.path()).unwrap();
        let mode = std::fs::metadata(dir.path().join(KEY_FILE))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_empty_key_file_is_replaced() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join(KEY_FILE);
        std::fs::write(&path, "").unwrap();

        let first = Transcoder::from_source(KeySource::File, dir.path()).unwrap();
        let stored = std::fs::read_to_string(&path).unwrap();
        assert_eq!(decode_key(stored.trim()).unwrap(), *first.key);

        let blob = first.encrypt("JBSWY3DPEHPK3PXP").unwrap();
        let second = Transcoder::from_source(KeySource::File, dir.path()).unwrap();
        assert_eq!(second.decrypt(&blob).unwrap().as_str(), "JBSWY3DPEHPK3PXP");
    }

    #[test]
    fn test_truncated_key_file_is_an_error() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join(KEY_FILE), "AAAA").unwrap();
        let err = Transcoder::from_source(KeySource::File, dir.path()).unwrap_err();
        assert!(matches!(err, Error::Decrypt(_)));
    }

    #[test]
    fn test_secret_validation() {
        assert!(is_valid_secret("JBSWY3DPEHPK3PXP"));
        assert!(is_valid_secret("jbswy3dpehpk3pxp"));
        assert!(is_valid_secret("JBSWY3DPEHPK3PXP===="));
        assert!(!is_valid_secret("not-base32!"));
        assert!(!is_valid_secret(""));
        assert!(!is_valid_secret("A"));
    }

    #[test]
    fn test_encode_secret() {
        assert_eq!(encode_secret(b"Hello!\xde\xad\xbe\xef"), "JBSWY3DPEHPK3PXP");
    }
}
