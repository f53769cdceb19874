use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Long-lived API credential. Only the hash of the secret is stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiKey {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub name: String,
    pub key_hash: String,
    pub prefix: String,
    pub permissions: Vec<String>,
    pub rate_limit: u32,
    pub allowed_ips: Vec<String>,
    pub allowed_referers: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub usage_count: u64,
    pub is_active: bool,
}

impl ApiKey {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|exp| exp <= now)
    }

    pub fn has_permission(&self, permission: &str) -> bool {
        self.permissions.iter().any(|p| p == permission || p == "*")
    }

    /// Copy safe to hand back to the owner.
    pub fn redacted(&self) -> Self {
        Self {
            key_hash: String::new(),
            ..self.clone()
        }
    }
}

/// Append-only record of one authenticated call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiKeyUsage {
    pub id: Uuid,
    pub api_key_id: Uuid,
    pub ip_address: String,
    pub user_agent: String,
    pub endpoint: String,
    pub method: String,
    pub timestamp: DateTime<Utc>,
    pub success: bool,
}

/// Issuance parameters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IssueApiKey {
    pub name: String,
    #[serde(default)]
    pub permissions: Vec<String>,
    /// Zero selects the configured default.
    #[serde(default)]
    pub rate_limit: u32,
    #[serde(default)]
    pub allowed_ips: Vec<String>,
    #[serde(default)]
    pub allowed_referers: Vec<String>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

/// The only place the plaintext key ever appears.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssuedApiKey {
    pub id: Uuid,
    pub name: String,
    pub key: String,
    pub prefix: String,
    pub message: String,
}

/// Partial update. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApiKeyUpdate {
    pub name: Option<String>,
    pub permissions: Option<Vec<String>>,
    pub rate_limit: Option<u32>,
    pub allowed_ips: Option<Vec<String>>,
    pub allowed_referers: Option<Vec<String>>,
    pub is_active: Option<bool>,
}

impl ApiKeyUpdate {
    pub fn apply(self, key: &mut ApiKey) {
        if let Some(name) = self.name {
            key.name = name;
        }
        if let Some(permissions) = self.permissions {
            key.permissions = permissions;
        }
        if let Some(rate_limit) = self.rate_limit {
            key.rate_limit = rate_limit;
        }
        if let Some(ips) = self.allowed_ips {
            key.allowed_ips = ips;
        }
        if let Some(referers) = self.allowed_referers {
            key.allowed_referers = referers;
        }
        if let Some(active) = self.is_active {
            key.is_active = active;
        }
        key.updated_at = Utc::now();
    }
}
