//! Authenticated encryption for credentials/CA material at rest (§5, §7):
//! ChaCha20-Poly1305 with a fresh 96-bit nonce per seal. The master key is
//! supplied by the caller from configuration — this module never sources or
//! stores one itself.

use chacha20poly1305::aead::{Aead, AeadCore, KeyInit, OsRng};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};

use crate::error::{Error, Result};
use crate::node::EncryptedBlob;

/// A 256-bit symmetric key used to seal/open [`EncryptedBlob`]s.
pub struct MasterKey(Key);

impl MasterKey {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(Key::from(bytes))
    }

    /// Decodes a base64-encoded 32-byte key, as read from configuration.
    pub fn from_base64(encoded: &str) -> Result<Self> {
        use base64::Engine;
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|e| Error::InvalidInput(format!("master key is not valid base64: {e}")))?;
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| Error::InvalidInput("master key must decode to 32 bytes".to_string()))?;
        Ok(Self::from_bytes(bytes))
    }

    pub fn seal(&self, plaintext: &[u8]) -> Result<EncryptedBlob> {
        let cipher = ChaCha20Poly1305::new(&self.0);
        let nonce = ChaCha20Poly1305::generate_nonce(&mut OsRng);
        let ciphertext = cipher
            .encrypt(&nonce, plaintext)
            .map_err(|_| Error::Unavailable("credential encryption failed".to_string()))?;
        Ok(EncryptedBlob { nonce: nonce.to_vec(), ciphertext })
    }

    pub fn open(&self, blob: &EncryptedBlob) -> Result<Vec<u8>> {
        let cipher = ChaCha20Poly1305::new(&self.0);
        let nonce = Nonce::from_slice(&blob.nonce);
        cipher
            .decrypt(nonce, blob.ciphertext.as_slice())
            .map_err(|_| Error::InvalidInput("credential decryption failed".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seal_then_open_round_trips() {
        let key = MasterKey::from_bytes([7u8; 32]);
        let blob = key.seal(b"super-secret-private-key").unwrap();
        assert_eq!(key.open(&blob).unwrap(), b"super-secret-private-key");
    }

    #[test]
    fn open_rejects_tampered_ciphertext() {
        let key = MasterKey::from_bytes([3u8; 32]);
        let mut blob = key.seal(b"payload").unwrap();
        blob.ciphertext[0] ^= 0xff;
        assert!(matches!(key.open(&blob), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn from_base64_rejects_wrong_length() {
        assert!(MasterKey::from_base64("dG9vc2hvcnQ=").is_err());
    }
}
