use async_trait::async_trait;

use crate::domain::User;
use crate::error::RepoError;

/// Lookup of login credentials. User management itself lives elsewhere.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn find_by_username(&self, username: &str) -> Result<Option<User>, RepoError>;

    async fn save(&self, user: User) -> Result<User, RepoError>;
}
