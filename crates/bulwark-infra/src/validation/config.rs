use std::collections::HashMap;

use crate::env;

/// Input validator configuration.
#[derive(Debug, Clone)]
pub struct ValidatorConfig {
    /// Case-insensitive SQL injection signatures.
    pub sql_patterns: Vec<String>,
    /// Case-insensitive XSS signatures.
    pub xss_patterns: Vec<String>,
    /// Maximum length in characters, keyed by field name.
    pub max_field_lengths: HashMap<String, usize>,
    /// Lowercase extensions including the dot.
    pub allowed_file_extensions: Vec<String>,
    pub max_file_size: usize,
    /// Rewrite HTML-bearing fields instead of rejecting them.
    pub sanitize_html: bool,
    /// Reject every XSS finding, even when sanitization is on.
    pub strict: bool,
    /// Exact paths and path prefixes that bypass validation.
    pub skip_paths: Vec<String>,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        let sql_patterns = [
            r"\b(SELECT|INSERT|UPDATE|DELETE|DROP|CREATE|ALTER|EXEC|UNION|SCRIPT)\b",
            r"\b(OR|AND)\s+\d+\s*=\s*\d+",
            r#"\b(OR|AND)\s+['"]?\w+['"]?\s*=\s*['"]?\w+['"]?"#,
            r"(--|#|/\*|\*/)",
            r"\b(INFORMATION_SCHEMA|SYSOBJECTS|SYSCOLUMNS)\b",
            r"\bxp_cmdshell\b",
            r"\bsp_executesql\b",
        ];

        let xss_patterns = [
            r"<\s*script[^>]*>.*?<\s*/\s*script\s*>",
            r"<\s*iframe[^>]*>.*?<\s*/\s*iframe\s*>",
            r"<\s*object[^>]*>.*?<\s*/\s*object\s*>",
            r"<\s*embed[^>]*>.*?<\s*/\s*embed\s*>",
            r"<\s*link[^>]*>",
            r"<\s*meta[^>]*>",
            r"javascript:",
            r"vbscript:",
            r"on\w+\s*=",
            r"expression\s*\(",
        ];

        let max_field_lengths = [
            ("email", 255),
            ("username", 50),
            ("password", 255),
            ("name", 100),
            ("title", 255),
            ("description", 5000),
            ("comment", 2000),
            ("url", 2048),
        ];

        let extensions = [
            ".jpg", ".jpeg", ".png", ".gif", ".pdf", ".doc", ".docx", ".txt", ".csv", ".zip",
            ".tar", ".gz",
        ];

        let skip_paths = [
            "/health",
            "/metrics",
            "/status",
            "/favicon.ico",
            "/static/",
            "/css/",
            "/js/",
            "/img/",
            "/assets/",
        ];

        Self {
            sql_patterns: sql_patterns.iter().map(|p| p.to_string()).collect(),
            xss_patterns: xss_patterns.iter().map(|p| p.to_string()).collect(),
            max_field_lengths: max_field_lengths
                .iter()
                .map(|(field, len)| (field.to_string(), *len))
                .collect(),
            allowed_file_extensions: extensions.iter().map(|e| e.to_string()).collect(),
            max_file_size: 10 * 1024 * 1024,
            sanitize_html: true,
            strict: false,
            skip_paths: skip_paths.iter().map(|p| p.to_string()).collect(),
        }
    }
}

impl ValidatorConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_file_size: env::parse_or("VALIDATION_MAX_FILE_SIZE", defaults.max_file_size),
            sanitize_html: env::flag_or("VALIDATION_SANITIZE_HTML", defaults.sanitize_html),
            strict: env::flag_or("VALIDATION_STRICT", defaults.strict),
            allowed_file_extensions: env::list("VALIDATION_ALLOWED_EXTENSIONS")
                .map(|exts| exts.into_iter().map(|e| e.to_lowercase()).collect())
                .unwrap_or(defaults.allowed_file_extensions),
            ..defaults
        }
    }
}
