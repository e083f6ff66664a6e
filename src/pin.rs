//! PIN hashing for the lock screen.
//!
//! Hashes are unsalted hex SHA-256 of the PIN text so files written by
//! earlier installs keep verifying. This is a known weakness: a short PIN
//! space is trivially brute-forced from the stored hash.

use crate::error::ValidationError;
use sha2::{Digest, Sha256};

pub const MIN_PIN_LEN: usize = 4;

pub fn hash_pin(pin: &str) -> String {
    hex::encode(Sha256::digest(pin.as_bytes()))
}

pub fn validate_new_pin(pin: &str) -> Result<(), ValidationError> {
    if pin.chars().count() < MIN_PIN_LEN {
        return Err(ValidationError::PinTooShort { min: MIN_PIN_LEN });
    }
    Ok(())
}

/// Compares the hash of `pin` against `stored_hash`, touching every byte
/// regardless of where the first mismatch is.
pub fn verify_pin(pin: &str, stored_hash: &str) -> bool {
    let candidate = hash_pin(pin);
    let (a, b) = (candidate.as_bytes(), stored_hash.as_bytes());
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::{hash_pin, validate_new_pin, verify_pin};
    use crate::error::ValidationError;

    #[test]
    fn hash_is_plain_sha256_hex() {
        assert_eq!(
            hash_pin("1234"),
            "03ac674216f3e15c761ee1a5e255f067953623c8b388b4459e13f978d7c846f4"
        );
    }

    #[test]
    fn verifies_only_matching_pin() {
        let stored = hash_pin("2468");
        assert!(verify_pin("2468", &stored));
        assert!(!verify_pin("2469", &stored));
        assert!(!verify_pin("2468", "short"));
    }

    #[test]
    fn rejects_pins_below_minimum_length() {
        assert_eq!(
            validate_new_pin("123"),
            Err(ValidationError::PinTooShort { min: 4 })
        );
        assert!(validate_new_pin("1234").is_ok());
    }
}
