use pbkdf2::pbkdf2_hmac_array;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use uuid::Uuid;

/// PBKDF2 iterations for newly stored passwords.
pub const HASH_ROUNDS: u32 = 100_000;

/// Hash a password with a fresh random salt.
/// The stored form is `<rounds>$<salt>$<hex pbkdf2-hmac-sha256>`.
pub fn hash_password(password: &str) -> String {
    let salt = Uuid::new_v4().simple().to_string();
    let key = derive(password, &salt, HASH_ROUNDS);
    format!("{}${}${}", HASH_ROUNDS, salt, hex::encode(key))
}

/// Check a password against a stored hash. Malformed values never match.
pub fn verify_password(password: &str, stored: &str) -> bool {
    let mut parts = stored.splitn(3, '$');
    let (Some(rounds), Some(salt), Some(expected)) = (parts.next(), parts.next(), parts.next())
    else {
        return false;
    };
    let Ok(rounds) = rounds.parse::<u32>() else {
        return false;
    };
    let Ok(expected) = hex::decode(expected) else {
        return false;
    };
    if rounds == 0 || salt.is_empty() {
        return false;
    }

    let actual = derive(password, salt, rounds);
    actual.as_slice().ct_eq(expected.as_slice()).into()
}

fn derive(password: &str, salt: &str, rounds: u32) -> [u8; 32] {
    pbkdf2_hmac_array::<Sha256, 32>(password.as_bytes(), salt.as_bytes(), rounds)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_and_verify() {
        let stored = hash_password("hunter2");
        assert!(verify_password("hunter2", &stored));
        assert!(!verify_password("hunter3", &stored));
        assert!(!stored.contains("hunter2"));
        assert!(stored.starts_with(&format!("{}$", HASH_ROUNDS)));
    }

    #[test]
    fn test_salts_differ() {
        assert_ne!(hash_password("same"), hash_password("same"));
    }

    #[test]
    fn test_rounds_are_read_from_stored_value() {
        let key = derive("pw", "salt", 10);
        let stored = format!("10$salt${}", hex::encode(key));
        assert!(verify_password("pw", &stored));
        assert!(!verify_password("pw", &format!("11$salt${}", hex::encode(key))));
    }

    #[test]
    fn test_malformed_stored_value() {
        assert!(!verify_password("x", "no-separator"));
        assert!(!verify_password("x", "salt$abcd"));
        assert!(!verify_password("x", "ten$salt$abcd"));
        assert!(!verify_password("x", "10$salt$not-hex"));
        assert!(!verify_password("x", "0$salt$abcd"));
        assert!(!verify_password("x", "10$salt$"));
    }
}
