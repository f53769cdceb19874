use std::time::Duration;

use bulwark_core::ports::LockoutPolicy;

use super::password::PasswordPolicy;
use crate::env;

/// Auth hardener configuration.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Idle time after which a session expires.
    pub session_timeout: Duration,
    pub max_active_sessions: usize,
    pub max_login_attempts: u32,
    pub lockout_duration: Duration,
    /// Failures older than this stop counting toward a lockout.
    pub lockout_window: Duration,
    pub password: PasswordPolicy,
    pub mfa_enabled: bool,
    pub mfa_issuer: String,
    /// Raw secret bytes before base32 encoding.
    pub mfa_secret_length: usize,
    pub backup_code_count: usize,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            session_timeout: Duration::from_secs(24 * 60 * 60),
            max_active_sessions: 5,
            max_login_attempts: 5,
            lockout_duration: Duration::from_secs(15 * 60),
            lockout_window: Duration::from_secs(15 * 60),
            password: PasswordPolicy::default(),
            mfa_enabled: false,
            mfa_issuer: "Bulwark".to_string(),
            mfa_secret_length: 20,
            backup_code_count: 10,
        }
    }
}

impl AuthConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let password = PasswordPolicy {
            min_length: env::parse_or("PASSWORD_MIN_LENGTH", defaults.password.min_length),
            require_uppercase: env::flag_or(
                "PASSWORD_REQUIRE_UPPERCASE",
                defaults.password.require_uppercase,
            ),
            require_lowercase: env::flag_or(
                "PASSWORD_REQUIRE_LOWERCASE",
                defaults.password.require_lowercase,
            ),
            require_digit: env::flag_or("PASSWORD_REQUIRE_DIGIT", defaults.password.require_digit),
            require_special: env::flag_or(
                "PASSWORD_REQUIRE_SPECIAL",
                defaults.password.require_special,
            ),
        };

        Self {
            session_timeout: env::secs_or("SESSION_TIMEOUT_SECS", defaults.session_timeout),
            max_active_sessions: env::parse_or("MAX_ACTIVE_SESSIONS", defaults.max_active_sessions),
            max_login_attempts: env::parse_or("MAX_LOGIN_ATTEMPTS", defaults.max_login_attempts),
            lockout_duration: env::secs_or("LOCKOUT_DURATION_SECS", defaults.lockout_duration),
            lockout_window: env::secs_or("LOCKOUT_WINDOW_SECS", defaults.lockout_window),
            password,
            mfa_enabled: env::flag_or("MFA_ENABLED", defaults.mfa_enabled),
            mfa_issuer: std::env::var("MFA_ISSUER").unwrap_or(defaults.mfa_issuer),
            mfa_secret_length: defaults.mfa_secret_length,
            backup_code_count: defaults.backup_code_count,
        }
    }

    pub fn lockout_policy(&self) -> LockoutPolicy {
        LockoutPolicy {
            max_attempts: self.max_login_attempts,
            window: self.lockout_window,
            lockout: self.lockout_duration,
        }
    }
}
