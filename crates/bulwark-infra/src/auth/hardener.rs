//! Login lockout, session lifecycle, password policy and MFA enrollment.

use std::sync::Arc;

use chrono::Utc;
use rand::RngCore;
use rand::rngs::OsRng;
use serde::Serialize;
use subtle::ConstantTimeEq;
use uuid::Uuid;

use bulwark_core::AppError;
use bulwark_core::domain::{Identity, Session};
use bulwark_core::ports::{
    LoginAttemptStore, MfaVerifier, PasswordService, SessionStore, UserDirectory,
};

use super::config::AuthConfig;
use super::mfa::{self, MfaSetup, RejectAllVerifier};

const LOCKED_MESSAGE: &str = "Account temporarily locked due to too many failed attempts";
const INVALID_CREDENTIALS: &str = "Invalid username or password";

fn session_not_found() -> AppError {
    AppError::authentication("Session not found").with_code("SESSION_NOT_FOUND")
}

fn session_expired() -> AppError {
    AppError::authentication("Session expired").with_code("SESSION_EXPIRED")
}

/// Counters reported by [`AuthHardener::stats`].
#[derive(Debug, Clone, Serialize)]
pub struct AuthStats {
    pub active_sessions: usize,
    pub locked_accounts: usize,
    pub session_backend: &'static str,
    pub attempt_backend: &'static str,
    pub mfa_enabled: bool,
    pub mfa_verifier: &'static str,
}

pub struct AuthHardener {
    config: AuthConfig,
    sessions: Arc<dyn SessionStore>,
    attempts: Arc<dyn LoginAttemptStore>,
    passwords: Arc<dyn PasswordService>,
    mfa: Arc<dyn MfaVerifier>,
    /// Verified against when the username is unknown so both paths cost
    /// the same.
    decoy_hash: Option<String>,
}

impl AuthHardener {
    pub fn new(
        config: AuthConfig,
        sessions: Arc<dyn SessionStore>,
        attempts: Arc<dyn LoginAttemptStore>,
        passwords: Arc<dyn PasswordService>,
    ) -> Self {
        let decoy_hash = passwords.hash(&Uuid::new_v4().to_string()).ok();
        Self {
            config,
            sessions,
            attempts,
            passwords,
            mfa: Arc::new(RejectAllVerifier),
            decoy_hash,
        }
    }

    pub fn with_mfa_verifier(mut self, verifier: Arc<dyn MfaVerifier>) -> Self {
        self.mfa = verifier;
        self
    }

    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    /// Fails closed with a generic lock error while the (username, IP) pair
    /// is locked. Must run before credentials are checked.
    pub async fn check_attempts(&self, username: &str, ip: &str) -> Result<(), AppError> {
        let now = Utc::now();
        let Some(counter) = self.attempts.get(username, ip).await? else {
            return Ok(());
        };

        match counter.locked_until {
            Some(until) if until > now => {
                let retry_after = (until - now).to_std().unwrap_or_default();
                Err(AppError::authentication(LOCKED_MESSAGE)
                    .with_code("ACCOUNT_LOCKED")
                    .with_detail("retry_after", retry_after.as_secs().max(1)))
            }
            _ => Ok(()),
        }
    }

    /// Success clears the counter; failure counts toward a lockout.
    pub async fn record_attempt(
        &self,
        username: &str,
        ip: &str,
        success: bool,
    ) -> Result<(), AppError> {
        if success {
            self.attempts.clear(username, ip).await?;
            return Ok(());
        }

        let counter = self
            .attempts
            .record_failure(username, ip, &self.config.lockout_policy())
            .await?;

        if counter.is_locked(Utc::now()) {
            tracing::warn!(
                event = "login_locked",
                username = %username,
                ip = %ip,
                attempts = counter.attempts,
                "Login locked after repeated failures"
            );
        } else {
            tracing::info!(
                username = %username,
                ip = %ip,
                attempts = counter.attempts,
                "Failed login"
            );
        }
        Ok(())
    }

    /// Full login: lockout check, credential check, attempt bookkeeping and
    /// session creation. Unknown users and wrong passwords fail alike.
    pub async fn login(
        &self,
        users: &dyn UserDirectory,
        username: &str,
        password: &str,
        ip: &str,
        user_agent: &str,
    ) -> Result<Session, AppError> {
        self.check_attempts(username, ip).await?;

        let user = users.find_by_username(username).await?;
        let verified = match &user {
            Some(user) => self.passwords.verify(password, &user.password_hash)?,
            None => {
                if let Some(decoy) = &self.decoy_hash {
                    let _ = self.passwords.verify(password, decoy);
                }
                false
            }
        };

        self.record_attempt(username, ip, verified).await?;

        match user {
            Some(user) if verified => self.create_session(&user.identity(), ip, user_agent).await,
            _ => Err(
                AppError::authentication(INVALID_CREDENTIALS).with_code("INVALID_CREDENTIALS"),
            ),
        }
    }

    /// Persist a new session and evict the user's oldest sessions beyond
    /// the active-session cap.
    pub async fn create_session(
        &self,
        identity: &Identity,
        ip: &str,
        user_agent: &str,
    ) -> Result<Session, AppError> {
        let session = Session::new(generate_session_id(), identity, ip, user_agent);
        self.sessions
            .save(&session, self.config.session_timeout)
            .await?;

        let existing = self.sessions.list_for_user(identity.user_id).await?;
        let excess = existing.len().saturating_sub(self.config.max_active_sessions);
        for old in existing.iter().filter(|s| s.id != session.id).take(excess) {
            self.sessions.remove(&old.id).await?;
            tracing::debug!(
                user_id = %identity.user_id,
                session_id = %old.id,
                "Evicted oldest session"
            );
        }

        tracing::info!(user_id = %identity.user_id, ip = %ip, "Session created");
        Ok(session)
    }

    /// Resolve a session and refresh its last activity.
    pub async fn get_session(&self, id: &str) -> Result<Session, AppError> {
        let mut session = match self.sessions.get(id).await? {
            Some(session) if session.is_active => session,
            _ => return Err(session_not_found()),
        };

        let now = Utc::now();
        if session.is_idle(self.session_timeout_delta(), now) {
            self.sessions.remove(id).await?;
            return Err(session_expired());
        }

        session.last_activity = now;
        self.sessions
            .save(&session, self.config.session_timeout)
            .await?;
        Ok(session)
    }

    pub async fn invalidate_session(&self, id: &str) -> Result<bool, AppError> {
        let removed = self.sessions.remove(id).await?;
        if let Some(session) = &removed {
            tracing::info!(user_id = %session.user_id, "Session invalidated");
        }
        Ok(removed.is_some())
    }

    pub async fn active_sessions(&self, user_id: Uuid) -> Result<Vec<Session>, AppError> {
        let now = Utc::now();
        let timeout = self.session_timeout_delta();
        Ok(self
            .sessions
            .list_for_user(user_id)
            .await?
            .into_iter()
            .filter(|s| s.is_active && !s.is_idle(timeout, now))
            .collect())
    }

    pub async fn invalidate_all_sessions(&self, user_id: Uuid) -> Result<usize, AppError> {
        let sessions = self.sessions.list_for_user(user_id).await?;
        for session in &sessions {
            self.sessions.remove(&session.id).await?;
        }
        tracing::info!(user_id = %user_id, count = sessions.len(), "All sessions invalidated");
        Ok(sessions.len())
    }

    pub fn validate_password_strength(&self, password: &str) -> Result<(), AppError> {
        self.config.password.check(password).map_err(AppError::from)
    }

    pub fn hash_password(&self, password: &str) -> Result<String, AppError> {
        self.passwords.hash(password)
    }

    pub fn verify_password(&self, password: &str, hash: &str) -> Result<bool, AppError> {
        self.passwords.verify(password, hash)
    }

    pub fn secure_compare(&self, a: &str, b: &str) -> bool {
        secure_compare(a, b)
    }

    pub fn setup_mfa(&self, identity: &Identity) -> Result<MfaSetup, AppError> {
        if !self.config.mfa_enabled {
            return Err(AppError::validation("MFA is not enabled").with_code("MFA_DISABLED"));
        }

        let secret = mfa::generate_secret(self.config.mfa_secret_length);
        let enrollment_uri =
            mfa::enrollment_uri(&self.config.mfa_issuer, &identity.username, &secret);
        tracing::info!(user_id = %identity.user_id, "MFA enrollment started");

        Ok(MfaSetup {
            secret,
            enrollment_uri,
            backup_codes: mfa::backup_codes(self.config.backup_code_count),
        })
    }

    /// With MFA disabled every token passes; otherwise the installed
    /// verifier decides.
    pub fn verify_mfa(&self, secret: &str, token: &str) -> Result<(), AppError> {
        if !self.config.mfa_enabled || self.mfa.verify(secret, token) {
            return Ok(());
        }
        Err(AppError::authentication("Invalid MFA token").with_code("MFA_INVALID"))
    }

    /// Evict idle sessions and lapsed lockout counters.
    pub async fn cleanup(&self) -> usize {
        let sessions = self.sessions.purge_idle(self.config.session_timeout).await;
        let attempts = self
            .attempts
            .purge_stale(&self.config.lockout_policy())
            .await;
        tracing::debug!(sessions, attempts, "Auth cleanup");
        sessions + attempts
    }

    pub async fn stats(&self) -> AuthStats {
        AuthStats {
            active_sessions: self.sessions.count().await,
            locked_accounts: self.attempts.locked_count().await,
            session_backend: self.sessions.backend(),
            attempt_backend: self.attempts.backend(),
            mfa_enabled: self.config.mfa_enabled,
            mfa_verifier: self.mfa.name(),
        }
    }

    fn session_timeout_delta(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.config.session_timeout)
            .unwrap_or_else(|_| chrono::Duration::days(36_500))
    }
}

/// 32 random bytes from the OS RNG, hex-encoded.
fn generate_session_id() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Constant-time string comparison.
pub fn secure_compare(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::auth::{Argon2PasswordService, InMemoryUserDirectory};
    use crate::store::{InMemoryLoginAttemptStore, InMemorySessionStore};
    use bulwark_core::domain::User;

    struct FixedToken;

    impl MfaVerifier for FixedToken {
        fn verify(&self, _secret: &str, token: &str) -> bool {
            token == "000000"
        }

        fn name(&self) -> &'static str {
            "fixed"
        }
    }

    fn hardener(config: AuthConfig) -> AuthHardener {
        AuthHardener::new(
            config,
            Arc::new(InMemorySessionStore::new()),
            Arc::new(InMemoryLoginAttemptStore::new()),
            Arc::new(Argon2PasswordService::new()),
        )
    }

    async fn directory_with_alice(hardener: &AuthHardener) -> InMemoryUserDirectory {
        let users = InMemoryUserDirectory::new();
        let hash = hardener.hash_password("Correct#Horse1").unwrap();
        users.insert(User::new("alice".to_string(), hash, "user".to_string()));
        users
    }

    fn alice() -> Identity {
        Identity::new(Uuid::new_v4(), "alice", "user")
    }

    #[tokio::test]
    async fn test_lockout_after_max_failures_even_with_correct_password() {
        let hardener = hardener(AuthConfig::default());
        let users = directory_with_alice(&hardener).await;

        for _ in 0..5 {
            let err = hardener
                .login(&users, "alice", "wrong", "1.2.3.4", "ua")
                .await
                .unwrap_err();
            assert_eq!(err.code, "INVALID_CREDENTIALS");
        }

        let err = hardener
            .login(&users, "alice", "Correct#Horse1", "1.2.3.4", "ua")
            .await
            .unwrap_err();
        assert_eq!(err.code, "ACCOUNT_LOCKED");
        assert_eq!(err.status_code(), 401);
        assert_eq!(err.message, "Account temporarily locked due to too many failed attempts");
        assert!(err.retry_after().unwrap() > 0);

        // Another IP is unaffected.
        assert!(
            hardener
                .login(&users, "alice", "Correct#Horse1", "5.6.7.8", "ua")
                .await
                .is_ok()
        );
    }

    #[tokio::test]
    async fn test_lock_message_does_not_reveal_unknown_users() {
        let hardener = hardener(AuthConfig {
            max_login_attempts: 2,
            ..AuthConfig::default()
        });
        let users = directory_with_alice(&hardener).await;

        for name in ["alice", "ghost"] {
            for _ in 0..2 {
                let _ = hardener.login(&users, name, "nope", "9.9.9.9", "ua").await;
            }
        }

        let known = hardener.login(&users, "alice", "nope", "9.9.9.9", "ua").await.unwrap_err();
        let unknown = hardener.login(&users, "ghost", "nope", "9.9.9.9", "ua").await.unwrap_err();
        assert_eq!(known.message, unknown.message);
        assert_eq!(known.code, unknown.code);
    }

    #[tokio::test]
    async fn test_success_clears_counter() {
        let hardener = hardener(AuthConfig::default());
        let users = directory_with_alice(&hardener).await;

        for _ in 0..4 {
            let _ = hardener.login(&users, "alice", "wrong", "1.2.3.4", "ua").await;
        }
        hardener
            .login(&users, "alice", "Correct#Horse1", "1.2.3.4", "ua")
            .await
            .unwrap();
        assert!(hardener.attempts.get("alice", "1.2.3.4").await.unwrap().is_none());

        // Counter starts over: four more failures do not lock.
        for _ in 0..4 {
            let _ = hardener.login(&users, "alice", "wrong", "1.2.3.4", "ua").await;
        }
        assert!(hardener.check_attempts("alice", "1.2.3.4").await.is_ok());
    }

    #[tokio::test]
    async fn test_lockout_lapses() {
        let hardener = hardener(AuthConfig {
            max_login_attempts: 1,
            lockout_duration: Duration::from_millis(30),
            ..AuthConfig::default()
        });

        hardener.record_attempt("bob", "ip", false).await.unwrap();
        assert!(hardener.check_attempts("bob", "ip").await.is_err());

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(hardener.check_attempts("bob", "ip").await.is_ok());
    }

    #[tokio::test]
    async fn test_session_lifecycle() {
        let hardener = hardener(AuthConfig::default());
        let user = alice();

        let session = hardener.create_session(&user, "10.0.0.1", "ua").await.unwrap();
        assert_eq!(session.id.len(), 64);

        let fetched = hardener.get_session(&session.id).await.unwrap();
        assert!(fetched.last_activity >= session.last_activity);

        assert!(hardener.invalidate_session(&session.id).await.unwrap());
        let err = hardener.get_session(&session.id).await.unwrap_err();
        assert_eq!(err.code, "SESSION_NOT_FOUND");
    }

    #[tokio::test]
    async fn test_idle_session_expires_distinctly() {
        let hardener = hardener(AuthConfig::default());
        let user = alice();

        let mut session = hardener.create_session(&user, "ip", "ua").await.unwrap();
        session.last_activity = Utc::now() - chrono::Duration::hours(25);
        hardener
            .sessions
            .save(&session, Duration::from_secs(60))
            .await
            .unwrap();

        let err = hardener.get_session(&session.id).await.unwrap_err();
        assert_eq!(err.code, "SESSION_EXPIRED");
        assert_eq!(err.message, "Session expired");

        // Expired sessions are removed.
        assert_eq!(
            hardener.get_session(&session.id).await.unwrap_err().code,
            "SESSION_NOT_FOUND"
        );
    }

    #[tokio::test]
    async fn test_oldest_sessions_evicted_past_cap() {
        let hardener = hardener(AuthConfig {
            max_active_sessions: 2,
            ..AuthConfig::default()
        });
        let user = alice();

        let mut ids = Vec::new();
        for _ in 0..3 {
            ids.push(hardener.create_session(&user, "ip", "ua").await.unwrap().id);
            tokio::time::sleep(Duration::from_millis(2)).await;
        }

        let active: Vec<String> = hardener
            .active_sessions(user.user_id)
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.id)
            .collect();
        assert_eq!(active, ids[1..].to_vec());

        assert_eq!(hardener.invalidate_all_sessions(user.user_id).await.unwrap(), 2);
        assert!(hardener.active_sessions(user.user_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_mfa_setup_and_verify() {
        let disabled = hardener(AuthConfig::default());
        assert_eq!(disabled.setup_mfa(&alice()).unwrap_err().code, "MFA_DISABLED");
        assert!(disabled.verify_mfa("secret", "anything").is_ok());

        let enabled = hardener(AuthConfig {
            mfa_enabled: true,
            ..AuthConfig::default()
        });
        let setup = enabled.setup_mfa(&alice()).unwrap();
        assert_eq!(setup.backup_codes.len(), 10);
        assert!(setup.enrollment_uri.starts_with("otpauth://totp/Bulwark:alice?secret="));

        // Default verifier rejects everything.
        assert_eq!(
            enabled.verify_mfa(&setup.secret, "123456").unwrap_err().code,
            "MFA_INVALID"
        );

        let pluggable = enabled.with_mfa_verifier(Arc::new(FixedToken));
        assert!(pluggable.verify_mfa(&setup.secret, "000000").is_ok());
        assert!(pluggable.verify_mfa(&setup.secret, "123456").is_err());
    }

    #[tokio::test]
    async fn test_password_and_compare_helpers() {
        let hardener = hardener(AuthConfig::default());
        assert_eq!(
            hardener.validate_password_strength("short").unwrap_err().code,
            "PASSWORD_TOO_SHORT"
        );
        assert!(hardener.validate_password_strength("Str0ng!pass").is_ok());

        assert!(hardener.secure_compare("abc", "abc"));
        assert!(!hardener.secure_compare("abc", "abd"));
        assert!(!hardener.secure_compare("abc", "abcd"));
    }

    #[tokio::test]
    async fn test_cleanup_and_stats() {
        let hardener = hardener(AuthConfig {
            max_login_attempts: 1,
            ..AuthConfig::default()
        });
        hardener.create_session(&alice(), "ip", "ua").await.unwrap();
        hardener.record_attempt("eve", "ip", false).await.unwrap();

        let stats = hardener.stats().await;
        assert_eq!(stats.active_sessions, 1);
        assert_eq!(stats.locked_accounts, 1);
        assert_eq!(stats.session_backend, "memory");
        assert_eq!(stats.mfa_verifier, "reject-all");

        assert_eq!(hardener.cleanup().await, 0);
    }
}
