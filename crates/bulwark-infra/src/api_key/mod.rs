//! API key issuance, verification and usage accounting.

mod config;
mod manager;
mod memory;
mod usage;

pub use config::ApiKeyConfig;
pub use manager::{ApiKeyManager, ApiKeyStats};
pub use memory::InMemoryApiKeyRepository;
pub use usage::{UsageRecorder, UsageStats};
