//! Signature-based input validation.
//!
//! Detection is a heuristic tripwire over case-insensitive signature lists;
//! false positives are accepted.

use regex::RegexSet;
use serde::Serialize;
use serde_json::Value;

use bulwark_core::AppError;
use bulwark_core::domain::RequestDescriptor;

use super::config::ValidatorConfig;
use super::sanitize::sanitize_html;

/// Findings for one value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ScanResult {
    pub sql_injection: bool,
    pub xss: bool,
}

impl ScanResult {
    pub fn is_clean(&self) -> bool {
        !self.sql_injection && !self.xss
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Location {
    Query,
    Body,
}

impl Location {
    fn noun(&self) -> &'static str {
        match self {
            Location::Query => "parameter",
            Location::Body => "field",
        }
    }
}

fn sql_error(field: &str, location: Location) -> AppError {
    AppError::validation(format!(
        "Potential SQL injection detected in {}: {}",
        location.noun(),
        field
    ))
    .with_code("SQL_INJECTION_DETECTED")
    .with_detail("field", field)
    .with_detail("category", "sql_injection")
}

fn xss_error(field: &str, location: Location) -> AppError {
    AppError::validation(format!(
        "Potential XSS detected in {}: {}",
        location.noun(),
        field
    ))
    .with_code("XSS_DETECTED")
    .with_detail("field", field)
    .with_detail("category", "xss")
}

fn length_error(field: &str, max: usize, location: Location) -> AppError {
    AppError::validation(format!(
        "{} {} exceeds maximum length of {}",
        if location == Location::Query { "Parameter" } else { "Field" },
        field,
        max
    ))
    .with_code("INPUT_TOO_LONG")
    .with_detail("field", field)
    .with_detail("category", "length")
    .with_detail("max_length", max)
}

pub struct InputValidator {
    config: ValidatorConfig,
    sql: RegexSet,
    xss: RegexSet,
}

impl InputValidator {
    /// Compile the signature lists. Fails on an invalid pattern.
    pub fn new(config: ValidatorConfig) -> Result<Self, regex::Error> {
        let sql = RegexSet::new(config.sql_patterns.iter().map(|p| format!("(?i){}", p)))?;
        let xss = RegexSet::new(config.xss_patterns.iter().map(|p| format!("(?i){}", p)))?;
        Ok(Self { config, sql, xss })
    }

    pub fn config(&self) -> &ValidatorConfig {
        &self.config
    }

    pub fn scan(&self, value: &str) -> ScanResult {
        ScanResult {
            sql_injection: self.sql.is_match(value),
            xss: self.xss.is_match(value),
        }
    }

    pub fn sanitize(&self, value: &str) -> String {
        sanitize_html(value)
    }

    pub fn should_skip(&self, path: &str) -> bool {
        self.config
            .skip_paths
            .iter()
            .any(|skip| path.starts_with(skip.as_str()))
    }

    /// Validate query parameters and, for methods that carry one, the body.
    ///
    /// Returns the rewritten body when sanitization changed it.
    pub fn validate_request(
        &self,
        request: &RequestDescriptor,
        body: &[u8],
    ) -> Result<Option<Vec<u8>>, AppError> {
        if self.should_skip(&request.path) {
            return Ok(None);
        }

        self.validate_query(&request.query)?;

        if matches!(request.method.as_str(), "GET" | "DELETE") {
            return Ok(None);
        }
        self.validate_body(body)
    }

    pub fn validate_query(&self, query: &[(String, String)]) -> Result<(), AppError> {
        for (name, value) in query {
            self.check_value(name, value, Location::Query)?;
        }
        Ok(())
    }

    /// JSON bodies are walked field by field; anything else is scanned as one
    /// raw value named `body`.
    pub fn validate_body(&self, body: &[u8]) -> Result<Option<Vec<u8>>, AppError> {
        if body.is_empty() {
            return Ok(None);
        }

        let Ok(mut json) = serde_json::from_slice::<Value>(body) else {
            let raw = String::from_utf8_lossy(body);
            self.check_value("body", &raw, Location::Body)?;
            return Ok(None);
        };

        if self.validate_json(&mut json)? == 0 {
            return Ok(None);
        }

        serde_json::to_vec(&json)
            .map(Some)
            .map_err(|e| AppError::internal("Failed to re-encode sanitized body").with_source(e))
    }

    /// Walk nested objects and arrays, rejecting injection and length
    /// violations and sanitizing HTML in place. Returns how many fields were
    /// rewritten.
    pub fn validate_json(&self, value: &mut Value) -> Result<usize, AppError> {
        self.walk(None, value)
    }

    fn walk(&self, field: Option<&str>, value: &mut Value) -> Result<usize, AppError> {
        match value {
            Value::Object(map) => {
                let mut rewritten = 0;
                for (key, child) in map.iter_mut() {
                    rewritten += self.walk(Some(key.as_str()), child)?;
                }
                Ok(rewritten)
            }
            Value::Array(items) => {
                let mut rewritten = 0;
                for item in items.iter_mut() {
                    rewritten += self.walk(field, item)?;
                }
                Ok(rewritten)
            }
            Value::String(text) => {
                let name = field.unwrap_or("body");
                match self.check_field(name, text)? {
                    Some(clean) => {
                        *text = clean;
                        Ok(1)
                    }
                    None => Ok(0),
                }
            }
            _ => Ok(0),
        }
    }

    /// Query parameters and raw bodies are never rewritten.
    fn check_value(&self, field: &str, value: &str, location: Location) -> Result<(), AppError> {
        self.check_length(field, value, location)?;

        let scan = self.scan(value);
        if scan.sql_injection {
            log_attempt("sql_injection_attempt", field, value);
            return Err(sql_error(field, location));
        }
        if scan.xss {
            log_attempt("xss_attempt", field, value);
            return Err(xss_error(field, location));
        }
        Ok(())
    }

    /// `Some(sanitized)` when the field should be rewritten.
    fn check_field(&self, field: &str, value: &str) -> Result<Option<String>, AppError> {
        self.check_length(field, value, Location::Body)?;

        let scan = self.scan(value);
        if scan.sql_injection {
            log_attempt("sql_injection_attempt", field, value);
            return Err(sql_error(field, Location::Body));
        }

        let rewrite_allowed = self.config.sanitize_html && !self.config.strict;
        if scan.xss && !rewrite_allowed {
            log_attempt("xss_attempt", field, value);
            return Err(xss_error(field, Location::Body));
        }

        if !self.config.sanitize_html {
            return Ok(None);
        }

        let sanitized = sanitize_html(value);
        if sanitized == value {
            if scan.xss {
                // Nothing to strip, e.g. a bare `javascript:` URL.
                log_attempt("xss_attempt", field, value);
                return Err(xss_error(field, Location::Body));
            }
            return Ok(None);
        }

        if self.scan(&sanitized).xss {
            log_attempt("xss_attempt", field, value);
            return Err(xss_error(field, Location::Body));
        }

        tracing::info!(
            event = "html_sanitized",
            field,
            original_len = value.len(),
            sanitized_len = sanitized.len(),
            "Sanitized HTML in request field"
        );
        Ok(Some(sanitized))
    }

    fn check_length(&self, field: &str, value: &str, location: Location) -> Result<(), AppError> {
        match self.config.max_field_lengths.get(field) {
            Some(&max) if value.chars().count() > max => Err(length_error(field, max, location)),
            _ => Ok(()),
        }
    }

    /// Check an uploaded file's extension, size, and content.
    pub fn validate_file(&self, filename: &str, content: &[u8]) -> Result<(), AppError> {
        if content.len() > self.config.max_file_size {
            return Err(AppError::validation(format!(
                "File size exceeds maximum allowed size of {} bytes",
                self.config.max_file_size
            ))
            .with_code("FILE_TOO_LARGE")
            .with_detail("max_size", self.config.max_file_size));
        }

        let lower = filename.to_lowercase();
        let allowed = self
            .config
            .allowed_file_extensions
            .iter()
            .any(|ext| lower.ends_with(ext.as_str()));
        if !allowed {
            return Err(
                AppError::validation(format!("File type not allowed: {}", filename))
                    .with_code("FILE_TYPE_NOT_ALLOWED")
                    .with_detail("filename", filename),
            );
        }

        let text = String::from_utf8_lossy(content);
        if !self.scan(&text).is_clean() {
            tracing::warn!(
                event = "malicious_upload",
                filename = %filename,
                size = content.len(),
                "Malicious content detected in upload"
            );
            return Err(AppError::validation("Malicious content detected in file")
                .with_code("MALICIOUS_FILE_CONTENT")
                .with_detail("filename", filename));
        }

        Ok(())
    }
}

fn log_attempt(event: &'static str, field: &str, value: &str) {
    let preview: String = value.chars().take(100).collect();
    tracing::warn!(event, field = %field, value = %preview, "Suspicious input rejected");
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn validator() -> InputValidator {
        InputValidator::new(ValidatorConfig::default()).unwrap()
    }

    #[test]
    fn test_scan_detects_each_category() {
        let v = validator();
        assert!(v.scan("1 OR 1=1").sql_injection);
        assert!(v.scan("x'; DROP TABLE users").sql_injection);
        assert!(v.scan("admin' --").sql_injection);
        assert!(v.scan("<IFRAME src=x></iframe>").xss);
        assert!(v.scan("JavaScript:alert(1)").xss);
        assert!(v.scan("<img onerror = steal()>").xss);
        assert!(v.scan("Hello there, friend").is_clean());
    }

    #[test]
    fn test_nested_sql_injection_reports_field() {
        let v = validator();
        let mut body = json!({"project": {"meta": {"note": "1' OR '1'='1"}}});

        let err = v.validate_json(&mut body).unwrap_err();
        assert_eq!(err.status_code(), 400);
        assert_eq!(err.code, "SQL_INJECTION_DETECTED");
        assert_eq!(err.details["field"], "note");
        assert_eq!(err.details["category"], "sql_injection");
    }

    #[test]
    fn test_field_length_limits() {
        let v = validator();
        let mut body = json!({"username": "a".repeat(51)});

        let err = v.validate_json(&mut body).unwrap_err();
        assert_eq!(err.code, "INPUT_TOO_LONG");
        assert_eq!(err.details["max_length"], 50);

        let mut ok = json!({"username": "a".repeat(50), "unlisted": "b".repeat(10_000)});
        assert_eq!(v.validate_json(&mut ok).unwrap(), 0);
    }

    #[test]
    fn test_html_fields_are_sanitized_in_place() {
        let v = validator();
        let mut body = json!({
            "comment": "Nice <b>work</b> <img src=x onerror=alert(1)>!",
            "tags": ["<i class=x>a</i>", "plain"],
        });

        assert_eq!(v.validate_json(&mut body).unwrap(), 2);
        assert_eq!(body["comment"], "Nice <b>work</b> !");
        assert_eq!(body["tags"][0], "<i>a</i>");
        assert_eq!(body["tags"][1], "plain");
    }

    #[test]
    fn test_strict_mode_rejects_xss() {
        let v = InputValidator::new(ValidatorConfig {
            strict: true,
            ..ValidatorConfig::default()
        })
        .unwrap();
        let mut body = json!({"comment": "<img src=x onerror=alert(1)>"});

        let err = v.validate_json(&mut body).unwrap_err();
        assert_eq!(err.code, "XSS_DETECTED");
    }

    #[test]
    fn test_unstrippable_xss_is_rejected() {
        let v = validator();
        let mut body = json!({"url": "javascript:alert(1)"});
        assert_eq!(v.validate_json(&mut body).unwrap_err().code, "XSS_DETECTED");
    }

    #[test]
    fn test_request_skips_and_methods() {
        let v = validator();
        let evil = br#"{"q": "1 OR 1=1"}"#;

        let health = RequestDescriptor::new("POST", "/health");
        assert!(v.validate_request(&health, evil).is_ok());

        let get = RequestDescriptor::new("GET", "/api/items");
        assert!(v.validate_request(&get, evil).is_ok());

        let post = RequestDescriptor::new("POST", "/api/items");
        assert!(v.validate_request(&post, evil).is_err());

        let query = RequestDescriptor::new("GET", "/api/items")
            .with_query("q", "<meta http-equiv=refresh>");
        let err = v.validate_request(&query, b"").unwrap_err();
        assert_eq!(err.message, "Potential XSS detected in parameter: q");
    }

    #[test]
    fn test_raw_body_and_rewrite() {
        let v = validator();
        let post = RequestDescriptor::new("POST", "/api/items");

        assert!(v.validate_request(&post, b"name=x; DROP TABLE t").is_err());
        assert!(v.validate_request(&post, b"just some words").unwrap().is_none());

        let rewritten = v
            .validate_request(&post, br#"{"comment": "<p style=\"x\">hi</p>"}"#)
            .unwrap()
            .unwrap();
        let value: Value = serde_json::from_slice(&rewritten).unwrap();
        assert_eq!(value["comment"], "<p>hi</p>");
    }

    #[test]
    fn test_file_validation() {
        let v = validator();
        assert!(v.validate_file("report.PDF", b"%PDF-1.4 plain").is_ok());
        assert_eq!(
            v.validate_file("run.exe", b"MZ").unwrap_err().code,
            "FILE_TYPE_NOT_ALLOWED"
        );
        assert_eq!(
            v.validate_file("notes.txt", b"<script>alert(1)</script>")
                .unwrap_err()
                .code,
            "MALICIOUS_FILE_CONTENT"
        );

        let small = InputValidator::new(ValidatorConfig {
            max_file_size: 4,
            ..ValidatorConfig::default()
        })
        .unwrap();
        assert_eq!(small.validate_file("a.txt", b"12345").unwrap_err().code, "FILE_TOO_LARGE");
    }

    #[test]
    fn test_invalid_pattern_is_an_error() {
        let config = ValidatorConfig {
            sql_patterns: vec!["(unclosed".to_string()],
            ..ValidatorConfig::default()
        };
        assert!(InputValidator::new(config).is_err());
    }
}
