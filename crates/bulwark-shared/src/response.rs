//! Standardized API response types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Standard successful API response wrapper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
        }
    }

    pub fn ok_with_message(data: T, message: impl Into<String>) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: Some(message.into()),
        }
    }
}

/// JSON body of every error response.
///
/// ```json
/// {"error":"rate_limit","message":"IP rate limit exceeded","code":"RATE_LIMIT_EXCEEDED",
///  "details":{"limit":200,"retry_after":1},"timestamp":"...","request_id":"..."}
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Taxonomy category, e.g. `validation` or `circuit_breaker`.
    pub error: String,

    pub message: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Map<String, Value>>,

    pub timestamp: DateTime<Utc>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
            code: None,
            details: None,
            timestamp: Utc::now(),
            request_id: None,
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    /// Attach details; an empty map is omitted from the body.
    pub fn with_details(mut self, details: Map<String, Value>) -> Self {
        self.details = (!details.is_empty()).then_some(details);
        self
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_optional_fields_are_omitted() {
        let body = ErrorResponse::new("internal", "An internal error occurred");
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["error"], "internal");
        assert!(json.get("code").is_none());
        assert!(json.get("details").is_none());
        assert!(json.get("request_id").is_none());
        assert!(json.get("timestamp").is_some());
    }

    #[test]
    fn test_empty_details_dropped() {
        let body = ErrorResponse::new("validation", "bad").with_details(Map::new());
        assert!(body.details.is_none());
    }
}
