use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An already-authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: Uuid,
    pub username: String,
    pub role: String,
}

impl Identity {
    pub fn new(user_id: Uuid, username: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            user_id,
            username: username.into(),
            role: role.into(),
        }
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.role == role
    }
}

/// Transport-neutral view of an inbound request.
///
/// Header names are stored lowercased so lookups are case-insensitive.
#[derive(Debug, Clone, Default)]
pub struct RequestDescriptor {
    pub method: String,
    pub path: String,
    pub query: Vec<(String, String)>,
    headers: HashMap<String, String>,
    pub peer_addr: Option<String>,
    pub identity: Option<Identity>,
}

impl RequestDescriptor {
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into().to_uppercase(),
            path: path.into(),
            ..Default::default()
        }
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.insert_header(name, value);
        self
    }

    pub fn with_query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    pub fn with_peer_addr(mut self, addr: impl Into<String>) -> Self {
        self.peer_addr = Some(addr.into());
        self
    }

    pub fn with_identity(mut self, identity: Identity) -> Self {
        self.identity = Some(identity);
        self
    }

    pub fn insert_header(&mut self, name: &str, value: impl Into<String>) {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    /// Client address: first `X-Forwarded-For` hop, then `X-Real-IP`, then the
    /// socket peer.
    pub fn client_ip(&self) -> String {
        if let Some(forwarded) = self.header("x-forwarded-for") {
            if let Some(first) = forwarded.split(',').map(str::trim).find(|s| !s.is_empty()) {
                return first.to_string();
            }
        }

        if let Some(real_ip) = self.header("x-real-ip") {
            return real_ip.trim().to_string();
        }

        self.peer_addr
            .as_deref()
            .map(strip_port)
            .unwrap_or("unknown")
            .to_string()
    }

    pub fn user_agent(&self) -> &str {
        self.header("user-agent").unwrap_or_default()
    }

    pub fn referer(&self) -> Option<&str> {
        self.header("referer")
    }
}

fn strip_port(addr: &str) -> &str {
    // [::1]:8080 / 1.2.3.4:8080 / bare address
    if let Some(rest) = addr.strip_prefix('[') {
        return rest.split(']').next().unwrap_or(rest);
    }
    match addr.rsplit_once(':') {
        Some((host, port)) if !host.contains(':') && port.parse::<u16>().is_ok() => host,
        _ => addr,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_ip_prefers_forwarded_for() {
        let req = RequestDescriptor::new("get", "/")
            .with_header("X-Forwarded-For", "203.0.113.7, 10.0.0.1")
            .with_header("X-Real-IP", "198.51.100.2")
            .with_peer_addr("127.0.0.1:5000");
        assert_eq!(req.client_ip(), "203.0.113.7");
    }

    #[test]
    fn test_client_ip_falls_back_to_real_ip_then_peer() {
        let req = RequestDescriptor::new("GET", "/").with_header("x-real-ip", "198.51.100.2");
        assert_eq!(req.client_ip(), "198.51.100.2");

        let req = RequestDescriptor::new("GET", "/").with_peer_addr("127.0.0.1:5000");
        assert_eq!(req.client_ip(), "127.0.0.1");

        let req = RequestDescriptor::new("GET", "/").with_peer_addr("[::1]:5000");
        assert_eq!(req.client_ip(), "::1");

        assert_eq!(RequestDescriptor::new("GET", "/").client_ip(), "unknown");
    }

    #[test]
    fn test_headers_are_case_insensitive() {
        let req = RequestDescriptor::new("GET", "/").with_header("User-Agent", "curl/8");
        assert_eq!(req.header("user-agent"), Some("curl/8"));
        assert_eq!(req.user_agent(), "curl/8");
        assert_eq!(req.method, "GET");
    }
}
