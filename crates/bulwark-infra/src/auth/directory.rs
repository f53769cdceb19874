use async_trait::async_trait;
use dashmap::DashMap;

use bulwark_core::domain::User;
use bulwark_core::error::RepoError;
use bulwark_core::ports::{PasswordService, UserDirectory};

/// Credential directory held in process, keyed by lowercase username.
#[derive(Default)]
pub struct InMemoryUserDirectory {
    users: DashMap<String, User>,
}

impl InMemoryUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from `username:password:role` entries, hashing each password.
    /// A missing role defaults to `user`.
    pub fn seeded(entries: &[String], passwords: &dyn PasswordService) -> Result<Self, RepoError> {
        let directory = Self::new();
        for entry in entries {
            let mut parts = entry.splitn(3, ':');
            let (Some(username), Some(password)) = (parts.next(), parts.next()) else {
                return Err(RepoError::Constraint(format!(
                    "seed entry '{}' must be username:password[:role]",
                    entry.split(':').next().unwrap_or_default()
                )));
            };
            let role = parts.next().filter(|r| !r.is_empty()).unwrap_or("user");

            let hash = passwords
                .hash(password)
                .map_err(|e| RepoError::Query(e.message))?;
            directory.insert(User::new(username.to_string(), hash, role.to_string()));
        }
        Ok(directory)
    }

    pub fn insert(&self, user: User) {
        self.users.insert(user.username.to_lowercase(), user);
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

#[async_trait]
impl UserDirectory for InMemoryUserDirectory {
    async fn find_by_username(&self, username: &str) -> Result<Option<User>, RepoError> {
        Ok(self
            .users
            .get(&username.to_lowercase())
            .map(|u| u.clone()))
    }

    async fn save(&self, user: User) -> Result<User, RepoError> {
        self.insert(user.clone());
        Ok(user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Argon2PasswordService;

    #[tokio::test]
    async fn test_seeded_directory() {
        let passwords = Argon2PasswordService::new();
        let entries = vec!["alice:Secr3t!pass:admin".to_string(), "bob:hunter2".to_string()];
        let directory = InMemoryUserDirectory::seeded(&entries, &passwords).unwrap();

        let alice = directory.find_by_username("ALICE").await.unwrap().unwrap();
        assert_eq!(alice.role, "admin");
        assert!(passwords.verify("Secr3t!pass", &alice.password_hash).unwrap());

        let bob = directory.find_by_username("bob").await.unwrap().unwrap();
        assert_eq!(bob.role, "user");
        assert!(directory.find_by_username("carol").await.unwrap().is_none());
    }

    #[test]
    fn test_malformed_seed_is_rejected() {
        let passwords = Argon2PasswordService::new();
        let entries = vec!["just-a-name".to_string()];
        assert!(InMemoryUserDirectory::seeded(&entries, &passwords).is_err());
    }
}
