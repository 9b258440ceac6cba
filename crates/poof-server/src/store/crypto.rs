use base64::{engine::general_purpose::STANDARD, Engine as _};
use chacha20poly1305::{
    aead::{Aead, KeyInit, OsRng},
    ChaCha20Poly1305, Key, Nonce,
};
use rand::RngCore;
use sha2::{Digest, Sha256};
use zeroize::ZeroizeOnDrop;

use crate::error::{VaultError, VaultResult};

/// ChaCha20Poly1305 nonce length in bytes.
pub const NONCE_LEN: usize = 12;

/// 32-byte encryption key derived from the operator passphrase.
#[derive(ZeroizeOnDrop)]
pub struct EncryptionKey([u8; 32]);

impl EncryptionKey {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

/// Derive the process-wide key as the SHA-256 digest of `passphrase`.
/// An empty passphrase is a configuration error, never a weak key.
pub fn derive_key(passphrase: &str) -> VaultResult<EncryptionKey> {
    if passphrase.is_empty() {
        return Err(VaultError::MissingKey);
    }
    let digest = Sha256::digest(passphrase.as_bytes());
    let mut key = [0u8; 32];
    key.copy_from_slice(&digest);
    Ok(EncryptionKey(key))
}

/// Seal `plaintext` under a fresh random nonce.
/// Returns `base64(nonce ‖ ciphertext ‖ tag)`, the form kept in the store.
pub fn encrypt(key: &EncryptionKey, plaintext: &str) -> VaultResult<String> {
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key.as_bytes()));

    let mut nonce_bytes = [0u8; NONCE_LEN];
    OsRng
        .try_fill_bytes(&mut nonce_bytes)
        .map_err(|e| VaultError::Encryption(format!("nonce: {e}")))?;
    let nonce = Nonce::from(nonce_bytes);

    let sealed = cipher
        .encrypt(&nonce, plaintext.as_bytes())
        .map_err(|e| VaultError::Encryption(e.to_string()))?;

    let mut blob = Vec::with_capacity(NONCE_LEN + sealed.len());
    blob.extend_from_slice(&nonce_bytes);
    blob.extend_from_slice(&sealed);
    Ok(STANDARD.encode(blob))
}

/// Open a blob produced by [`encrypt`].
pub fn decrypt(key: &EncryptionKey, blob: &str) -> VaultResult<String> {
    let data = STANDARD
        .decode(blob)
        .map_err(|e| VaultError::DecryptionFailed(format!("base64: {e}")))?;

    if data.len() < NONCE_LEN {
        return Err(VaultError::DecryptionFailed(format!(
            "ciphertext too short: {} bytes",
            data.len()
        )));
    }

    let (nonce_bytes, sealed) = data.split_at(NONCE_LEN);
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key.as_bytes()));
    let plaintext = cipher
        .decrypt(Nonce::from_slice(nonce_bytes), sealed)
        .map_err(|e| VaultError::DecryptionFailed(e.to_string()))?;

    String::from_utf8(plaintext)
        .map_err(|_| VaultError::DecryptionFailed("plaintext is not valid UTF-8".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn round_trip() {
        let key = derive_key("test-passphrase").unwrap();
        let blob = encrypt(&key, "hello, poof!").unwrap();
        assert_eq!(decrypt(&key, &blob).unwrap(), "hello, poof!");
    }

    #[test]
    fn wrong_key_fails() {
        let key1 = derive_key("key-one").unwrap();
        let key2 = derive_key("key-two").unwrap();
        let blob = encrypt(&key1, "secret").unwrap();
        assert!(matches!(
            decrypt(&key2, &blob),
            Err(VaultError::DecryptionFailed(_))
        ));
    }

    #[test]
    fn derivation_is_deterministic() {
        let a = derive_key("same").unwrap();
        let b = derive_key("same").unwrap();
        assert_eq!(a.as_bytes(), b.as_bytes());
        assert_ne!(a.as_bytes(), derive_key("other").unwrap().as_bytes());
    }

    #[test]
    fn empty_passphrase_is_rejected() {
        assert!(matches!(derive_key(""), Err(VaultError::MissingKey)));
    }

    #[test]
    fn nonce_is_fresh_per_call() {
        let key = derive_key("k").unwrap();
        let a = encrypt(&key, "same text").unwrap();
        let b = encrypt(&key, "same text").unwrap();
        assert_ne!(a, b);
        let raw_a = STANDARD.decode(&a).unwrap();
        let raw_b = STANDARD.decode(&b).unwrap();
        assert_ne!(raw_a[..NONCE_LEN], raw_b[..NONCE_LEN]);
    }

    #[test]
    fn any_flipped_byte_is_detected() {
        let key = derive_key("k").unwrap();
        let raw = STANDARD.decode(encrypt(&key, "do not touch").unwrap()).unwrap();
        for i in 0..raw.len() {
            let mut tampered = raw.clone();
            tampered[i] ^= 0x01;
            let result = decrypt(&key, &STANDARD.encode(&tampered));
            assert!(
                matches!(result, Err(VaultError::DecryptionFailed(_))),
                "flip at byte {i} was not detected"
            );
        }
    }

    #[test]
    fn short_blob_fails() {
        let key = derive_key("k").unwrap();
        let short = STANDARD.encode([0u8; NONCE_LEN - 1]);
        assert!(matches!(
            decrypt(&key, &short),
            Err(VaultError::DecryptionFailed(_))
        ));
        // Nonce only, no tag.
        let nonce_only = STANDARD.encode([0u8; NONCE_LEN]);
        assert!(decrypt(&key, &nonce_only).is_err());
    }

    #[test]
    fn invalid_base64_fails() {
        let key = derive_key("k").unwrap();
        assert!(matches!(
            decrypt(&key, "not base64!!"),
            Err(VaultError::DecryptionFailed(_))
        ));
    }

    proptest! {
        #[test]
        fn decrypt_inverts_encrypt(text in ".*", pass in ".+") {
            let key = derive_key(&pass).unwrap();
            let blob = encrypt(&key, &text).unwrap();
            prop_assert_eq!(decrypt(&key, &blob).unwrap(), text);
        }
    }
}
