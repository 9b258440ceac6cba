use chacha20poly1305::aead::OsRng;
use rand::RngCore;

use crate::error::{VaultError, VaultResult};

/// Number of symbols in a drop id.
pub const ID_LEN: usize = 12;

const ALPHABET: &[u8; 62] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

// Largest multiple of 62 that fits in a byte; bytes at or above it are
// rejected so every symbol is equally likely.
const ACCEPT_BELOW: u8 = 248;

/// Generate a fresh id from the OS random source.
pub fn generate_id() -> VaultResult<String> {
    let mut id = String::with_capacity(ID_LEN);
    let mut buf = [0u8; ID_LEN * 2];
    while id.len() < ID_LEN {
        OsRng
            .try_fill_bytes(&mut buf)
            .map_err(|e| VaultError::IdGeneration(e.to_string()))?;
        for &b in buf.iter().filter(|&&b| b < ACCEPT_BELOW) {
            if id.len() == ID_LEN {
                break;
            }
            id.push(ALPHABET[(b % 62) as usize] as char);
        }
    }
    Ok(id)
}

/// Whether `s` has the shape of an id produced by [`generate_id`].
pub fn is_valid_id(s: &str) -> bool {
    s.len() == ID_LEN && s.bytes().all(|b| b.is_ascii_alphanumeric())
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn ids_have_fixed_length_and_alphabet() {
        for _ in 0..200 {
            let id = generate_id().unwrap();
            assert_eq!(id.len(), ID_LEN);
            assert!(is_valid_id(&id), "bad id {id}");
        }
    }

    #[test]
    fn ids_do_not_repeat() {
        let ids: HashSet<String> = (0..1000).map(|_| generate_id().unwrap()).collect();
        assert_eq!(ids.len(), 1000);
    }

    #[test]
    fn validation_rejects_other_shapes() {
        assert!(is_valid_id("Ab3kP9qT2xLz"));
        assert!(!is_valid_id(""));
        assert!(!is_valid_id("Ab3kP9qT2xL"));
        assert!(!is_valid_id("Ab3kP9qT2xLzz"));
        assert!(!is_valid_id("Ab3kP9qT2x-z"));
        assert!(!is_valid_id("stats:total_"));
    }
}
