//! Input validation and sanitization.

mod config;
mod sanitize;
mod validator;

pub use config::ValidatorConfig;
pub use sanitize::{clean_input, is_valid_email, is_valid_username, normalize_input, sanitize_html};
pub use validator::{InputValidator, ScanResult};
