//! Login lockout, sessions, password policy and MFA enrollment.

mod config;
mod directory;
mod hardener;
mod mfa;
mod password;

pub use config::AuthConfig;
pub use directory::InMemoryUserDirectory;
pub use hardener::{AuthHardener, AuthStats, secure_compare};
pub use mfa::{MfaSetup, RejectAllVerifier};
pub use password::{Argon2PasswordService, PasswordPolicy, PasswordRule};
