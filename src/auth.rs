use argon2::{
    Argon2,
    PasswordHash,
    PasswordVerifier,
    PasswordHasher,
};
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::{RngCore, rngs::OsRng};
use serde::Serialize;
use sha2::{Digest, Sha256};

use argon2::password_hash::{SaltString, rand_core::OsRng as PHOsRng};

use crate::error::ApiError;

pub const MIN_PASSWORD_LEN: usize = 6;

/// Account role as stored in `app_user.roles`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[repr(i16)]
pub enum Role {
    Patient = 0,
    Doctor = 1,
    Hospital = 2,
    Admin = 3,
}

impl Role {
    pub fn from_i16(v: i16) -> Option<Self> {
        match v {
            0 => Some(Role::Patient),
            1 => Some(Role::Doctor),
            2 => Some(Role::Hospital),
            3 => Some(Role::Admin),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Patient => "patient",
            Role::Doctor => "doctor",
            Role::Hospital => "hospital",
            Role::Admin => "admin",
        }
    }
}

/// Verify password against the Argon2 PHC string stored for the account.
pub fn verify_password(password: &str, stored_hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(stored_hash) else {
        return false;
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}

/// Hash a new password using Argon2id with a random salt.
pub fn hash_password(password: &str) -> Result<String, ApiError> {
    let salt = SaltString::generate(&mut PHOsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|phc| phc.to_string())
        .map_err(|e| ApiError::Internal(format!("argon2 hash error: {e}")))
}

/// Opaque bearer token handed to the client. Only its digest is persisted.
pub fn generate_access_token() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// SHA-256 hex digest of a bearer token, as stored in session_token.
pub fn hash_access_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// `local@domain.tld` with no whitespace and a single `@`.
pub fn is_valid_email(email: &str) -> bool {
    if email.chars().any(char::is_whitespace) {
        return false;
    }
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    if local.is_empty() || domain.contains('@') {
        return false;
    }
    domain
        .char_indices()
        .any(|(i, c)| c == '.' && i > 0 && i + 1 < domain.len())
}

/// Digits with optional leading `+`, spaces, dashes and parentheses.
pub fn is_valid_phone(phone: &str) -> bool {
    let rest = phone.strip_prefix('+').unwrap_or(phone);
    !rest.is_empty()
        && rest
            .chars()
            .all(|c| c.is_ascii_digit() || c.is_whitespace() || matches!(c, '-' | '(' | ')'))
}

pub fn validate_password(password: &str) -> Result<(), ApiError> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(ApiError::validation(format!(
            "Password must be at least {MIN_PASSWORD_LEN} characters long"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_hash_roundtrip_and_rejects_wrong_password() {
        let phc = hash_password("s3cret!").unwrap();
        assert!(verify_password("s3cret!", &phc));
        assert!(!verify_password("other", &phc));
        assert!(!verify_password("s3cret!", "not-a-phc-string"));
    }

    #[test]
    fn tokens_are_unique_and_digest_is_stable() {
        let a = generate_access_token();
        let b = generate_access_token();
        assert_ne!(a, b);
        assert_eq!(hash_access_token(&a), hash_access_token(&a));
        assert_eq!(hash_access_token(&a).len(), 64);
    }

    #[test]
    fn email_format() {
        assert!(is_valid_email("asha@city-hospital.in"));
        assert!(!is_valid_email("asha@localhost"));
        assert!(!is_valid_email("asha city@x.in"));
        assert!(!is_valid_email("@x.in"));
        assert!(!is_valid_email("a@b@c.in"));
        assert!(!is_valid_email("a@.in"));
        assert_eq!(normalize_email("  Asha@X.IN "), "asha@x.in");
    }

    #[test]
    fn phone_format() {
        assert!(is_valid_phone("+91 (22) 555-0101"));
        assert!(is_valid_phone("0225550101"));
        assert!(!is_valid_phone("+"));
        assert!(!is_valid_phone("call me"));
    }

    #[test]
    fn password_policy() {
        assert!(validate_password("123456").is_ok());
        assert!(validate_password("12345").is_err());
    }

    #[test]
    fn role_codes() {
        assert_eq!(Role::from_i16(2), Some(Role::Hospital));
        assert_eq!(Role::from_i16(9), None);
        assert_eq!(Role::Doctor.as_str(), "doctor");
    }
}
