// src/auth/password.rs — Password hashing and strength rules

use crate::infra::crypto::{constant_time_eq, pbkdf2_sha256, random_bytes, sha256_hex};
use crate::infra::errors::DeskError;

const SCHEME: &str = "pbkdf2-sha256";

/// Encode as `pbkdf2-sha256$<iterations>$<salt hex>$<hash hex>`.
pub fn hash_password(password: &str, iterations: u32) -> anyhow::Result<String> {
    let salt = random_bytes::<16>()?;
    let hash = pbkdf2_sha256(password.as_bytes(), &salt, iterations);
    Ok(format!(
        "{SCHEME}${iterations}${}${}",
        hex::encode(salt),
        hex::encode(hash)
    ))
}

/// False for any malformed encoding.
pub fn verify_password(password: &str, encoded: &str) -> bool {
    let parts: Vec<&str> = encoded.split('$').collect();
    let [scheme, iterations, salt, hash] = parts.as_slice() else {
        return false;
    };
    if *scheme != SCHEME {
        return false;
    }
    let (Ok(iterations), Ok(salt), Ok(hash)) =
        (iterations.parse::<u32>(), hex::decode(salt), hex::decode(hash))
    else {
        return false;
    };
    let computed = pbkdf2_sha256(password.as_bytes(), &salt, iterations);
    constant_time_eq(&computed, &hash)
}

/// At least 8 characters with an upper-case letter, a lower-case letter and a digit.
pub fn check_strength(password: &str) -> Result<(), DeskError> {
    let mut missing = Vec::new();
    if password.chars().count() < 8 {
        missing.push("at least 8 characters");
    }
    if !password.chars().any(|c| c.is_ascii_uppercase()) {
        missing.push("an upper-case letter");
    }
    if !password.chars().any(|c| c.is_ascii_lowercase()) {
        missing.push("a lower-case letter");
    }
    if !password.chars().any(|c| c.is_ascii_digit()) {
        missing.push("a digit");
    }
    if missing.is_empty() {
        Ok(())
    } else {
        Err(DeskError::Validation(format!(
            "password needs {}",
            missing.join(", ")
        )))
    }
}

/// Short digest of a stored hash. Reset tokens carry it, so a token stops
/// working once the password changes.
pub fn fingerprint(encoded_hash: &str) -> String {
    sha256_hex(encoded_hash.as_bytes())[..16].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_and_verify() {
        let encoded = hash_password("Secret123", 1_000).unwrap();
        assert!(encoded.starts_with("pbkdf2-sha256$1000$"));
        assert!(verify_password("Secret123", &encoded));
        assert!(!verify_password("secret123", &encoded));
    }

    #[test]
    fn test_salts_differ() {
        let a = hash_password("Secret123", 10).unwrap();
        let b = hash_password("Secret123", 10).unwrap();
        assert_ne!(a, b);
        assert_ne!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn test_malformed_hash_never_verifies() {
        assert!(!verify_password("x", ""));
        assert!(!verify_password("x", "bcrypt$10$aa$bb"));
        assert!(!verify_password("x", "pbkdf2-sha256$ten$aa$bb"));
        assert!(!verify_password("x", "pbkdf2-sha256$10$zz$bb"));
    }

    #[test]
    fn test_strength() {
        assert!(check_strength("Abcdefg1").is_ok());
        assert!(check_strength("abcdefg1").is_err());
        assert!(check_strength("ABCDEFG1").is_err());
        assert!(check_strength("Abcdefgh").is_err());
        let err = check_strength("Ab1").unwrap_err().to_string();
        assert!(err.contains("at least 8 characters"));
    }
}
