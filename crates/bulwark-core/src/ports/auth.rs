//! Credential hashing and MFA ports.

use crate::error::AppError;

/// Password hashing service.
pub trait PasswordService: Send + Sync {
    /// Hash a plain text password.
    fn hash(&self, password: &str) -> Result<String, AppError>;

    /// Verify a password against a hash.
    fn verify(&self, password: &str, hash: &str) -> Result<bool, AppError>;
}

/// One-time token verification for second-factor checks.
///
/// The algorithm (code length, time step, drift window) belongs to the
/// implementation; callers only hand over the enrolled secret and the token.
pub trait MfaVerifier: Send + Sync {
    fn verify(&self, secret: &str, token: &str) -> bool;

    fn name(&self) -> &'static str;
}
