//! MFA enrollment material and the token-verifier boundary.

use data_encoding::BASE32_NOPAD;
use rand::RngCore;
use rand::rngs::OsRng;

use bulwark_core::ports::MfaVerifier;

/// Enrollment material, shown to the user once.
#[derive(Debug, Clone)]
pub struct MfaSetup {
    pub secret: String,
    pub enrollment_uri: String,
    pub backup_codes: Vec<String>,
}

pub(crate) fn generate_secret(length: usize) -> String {
    let mut bytes = vec![0u8; length.max(10)];
    OsRng.fill_bytes(&mut bytes);
    BASE32_NOPAD.encode(&bytes)
}

pub(crate) fn enrollment_uri(issuer: &str, username: &str, secret: &str) -> String {
    format!(
        "otpauth://totp/{}:{}?secret={}&issuer={}",
        issuer, username, secret, issuer
    )
}

/// Eight lowercase hex characters each.
pub(crate) fn backup_codes(count: usize) -> Vec<String> {
    (0..count)
        .map(|_| {
            let mut bytes = [0u8; 4];
            OsRng.fill_bytes(&mut bytes);
            hex::encode(bytes)
        })
        .collect()
}

/// Verifier installed until a real one-time-password check is plugged in.
/// Rejects every token.
#[derive(Debug, Default, Clone, Copy)]
pub struct RejectAllVerifier;

impl MfaVerifier for RejectAllVerifier {
    fn verify(&self, _secret: &str, _token: &str) -> bool {
        false
    }

    fn name(&self) -> &'static str {
        "reject-all"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secret_is_base32_of_requested_length() {
        let secret = generate_secret(20);
        assert_eq!(secret.len(), 32);
        assert!(BASE32_NOPAD.decode(secret.as_bytes()).is_ok());
        assert_ne!(secret, generate_secret(20));
    }

    #[test]
    fn test_enrollment_uri() {
        assert_eq!(
            enrollment_uri("Bulwark", "alice", "ABC"),
            "otpauth://totp/Bulwark:alice?secret=ABC&issuer=Bulwark"
        );
    }

    #[test]
    fn test_backup_codes() {
        let codes = backup_codes(10);
        assert_eq!(codes.len(), 10);
        assert!(codes.iter().all(|c| c.len() == 8 && c.chars().all(|ch| ch.is_ascii_hexdigit())));
    }

    #[test]
    fn test_reject_all() {
        assert!(!RejectAllVerifier.verify("SECRET", "123456"));
    }
}
