//! Argon2 password hashing and password strength rules.

use std::fmt;

use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use serde::Serialize;

use bulwark_core::AppError;
use bulwark_core::ports::PasswordService;

/// Argon2-based password service.
pub struct Argon2PasswordService {
    argon2: Argon2<'static>,
}

impl Argon2PasswordService {
    pub fn new() -> Self {
        Self {
            argon2: Argon2::default(),
        }
    }
}

impl Default for Argon2PasswordService {
    fn default() -> Self {
        Self::new()
    }
}

impl PasswordService for Argon2PasswordService {
    fn hash(&self, password: &str) -> Result<String, AppError> {
        let salt = SaltString::generate(&mut OsRng);

        self.argon2
            .hash_password(password.as_bytes(), &salt)
            .map(|h| h.to_string())
            .map_err(|e| AppError::internal(format!("Password hashing failed: {}", e)))
    }

    fn verify(&self, password: &str, hash: &str) -> Result<bool, AppError> {
        let parsed_hash = PasswordHash::new(hash)
            .map_err(|e| AppError::internal(format!("Stored password hash is invalid: {}", e)))?;

        Ok(self
            .argon2
            .verify_password(password.as_bytes(), &parsed_hash)
            .is_ok())
    }
}

/// The first strength rule a password fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum PasswordRule {
    TooShort { min_length: usize },
    MissingUppercase,
    MissingLowercase,
    MissingDigit,
    MissingSpecial,
}

impl PasswordRule {
    pub fn code(&self) -> &'static str {
        match self {
            PasswordRule::TooShort { .. } => "PASSWORD_TOO_SHORT",
            PasswordRule::MissingUppercase => "PASSWORD_MISSING_UPPERCASE",
            PasswordRule::MissingLowercase => "PASSWORD_MISSING_LOWERCASE",
            PasswordRule::MissingDigit => "PASSWORD_MISSING_DIGIT",
            PasswordRule::MissingSpecial => "PASSWORD_MISSING_SPECIAL",
        }
    }
}

impl fmt::Display for PasswordRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PasswordRule::TooShort { min_length } => {
                write!(f, "Password must be at least {} characters", min_length)
            }
            PasswordRule::MissingUppercase => {
                f.write_str("Password must contain at least one uppercase letter")
            }
            PasswordRule::MissingLowercase => {
                f.write_str("Password must contain at least one lowercase letter")
            }
            PasswordRule::MissingDigit => f.write_str("Password must contain at least one digit"),
            PasswordRule::MissingSpecial => {
                f.write_str("Password must contain at least one special character")
            }
        }
    }
}

impl From<PasswordRule> for AppError {
    fn from(rule: PasswordRule) -> Self {
        let err = AppError::validation(rule.to_string()).with_code(rule.code());
        match rule {
            PasswordRule::TooShort { min_length } => err.with_detail("min_length", min_length),
            _ => err,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PasswordPolicy {
    pub min_length: usize,
    pub require_uppercase: bool,
    pub require_lowercase: bool,
    pub require_digit: bool,
    pub require_special: bool,
}

impl Default for PasswordPolicy {
    fn default() -> Self {
        Self {
            min_length: 8,
            require_uppercase: true,
            require_lowercase: true,
            require_digit: true,
            require_special: true,
        }
    }
}

impl PasswordPolicy {
    /// Length is counted in characters; special means ASCII punctuation.
    pub fn check(&self, password: &str) -> Result<(), PasswordRule> {
        if password.chars().count() < self.min_length {
            return Err(PasswordRule::TooShort {
                min_length: self.min_length,
            });
        }

        let has = |pred: fn(&char) -> bool| password.chars().any(|c| pred(&c));

        if self.require_uppercase && !has(char::is_ascii_uppercase) {
            return Err(PasswordRule::MissingUppercase);
        }
        if self.require_lowercase && !has(char::is_ascii_lowercase) {
            return Err(PasswordRule::MissingLowercase);
        }
        if self.require_digit && !has(char::is_ascii_digit) {
            return Err(PasswordRule::MissingDigit);
        }
        if self.require_special && !has(char::is_ascii_punctuation) {
            return Err(PasswordRule::MissingSpecial);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_and_verify() {
        let service = Argon2PasswordService::new();
        let password = "secure_password_123";

        let hash = service.hash(password).unwrap();
        assert!(service.verify(password, &hash).unwrap());
        assert!(!service.verify("wrong_password", &hash).unwrap());
    }

    #[test]
    fn test_verify_rejects_garbage_hash() {
        let service = Argon2PasswordService::new();
        assert!(service.verify("x", "not-a-phc-string").is_err());
    }

    #[test]
    fn test_policy_reports_first_failed_rule() {
        let policy = PasswordPolicy::default();

        assert_eq!(policy.check("Ab1!"), Err(PasswordRule::TooShort { min_length: 8 }));
        assert_eq!(policy.check("abcdefg1!"), Err(PasswordRule::MissingUppercase));
        assert_eq!(policy.check("ABCDEFG1!"), Err(PasswordRule::MissingLowercase));
        assert_eq!(policy.check("Abcdefgh!"), Err(PasswordRule::MissingDigit));
        assert_eq!(policy.check("Abcdefgh1"), Err(PasswordRule::MissingSpecial));
        assert_eq!(policy.check("Abcdefg1!"), Ok(()));
    }

    #[test]
    fn test_relaxed_policy() {
        let policy = PasswordPolicy {
            min_length: 4,
            require_uppercase: false,
            require_lowercase: true,
            require_digit: false,
            require_special: false,
        };
        assert!(policy.check("abcd").is_ok());
    }

    #[test]
    fn test_rule_into_app_error() {
        let err: AppError = PasswordRule::TooShort { min_length: 12 }.into();
        assert_eq!(err.status_code(), 400);
        assert_eq!(err.code, "PASSWORD_TOO_SHORT");
        assert_eq!(err.details["min_length"], 12);
    }
}
