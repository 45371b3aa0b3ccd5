//! Credential handling with secure memory.
//!
//! Uses the `secrecy` crate so the backend API key never ends up in logs,
//! debug output, or stored error messages.

use secrecy::{ExposeSecret, SecretBox};
use std::fmt;

/// A secret string that won't be logged or displayed.
pub struct ApiKey(SecretBox<str>);

impl ApiKey {
    /// Wrap a raw key.
    pub fn new(value: impl Into<String>) -> Self {
        Self(SecretBox::new(Box::from(value.into().as_str())))
    }

    /// Expose the secret value for use in an outgoing request.
    pub fn expose(&self) -> &str {
        self.0.expose_secret()
    }

    /// Empty or whitespace-only keys count as missing.
    pub fn is_blank(&self) -> bool {
        self.expose().trim().is_empty()
    }

    /// Replace every occurrence of the key in `text` with `[REDACTED]`.
    pub fn scrub(&self, text: &str) -> String {
        if self.is_blank() {
            return text.to_string();
        }
        text.replace(self.expose(), "[REDACTED]")
    }
}

impl Clone for ApiKey {
    fn clone(&self) -> Self {
        Self::new(self.expose().to_string())
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

impl fmt::Display for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

impl From<String> for ApiKey {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<&str> for ApiKey {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_and_display_are_redacted() {
        let key = ApiKey::new("sk-live-123");
        assert_eq!(format!("{:?}", key), "[REDACTED]");
        assert_eq!(format!("{}", key), "[REDACTED]");
    }

    #[test]
    fn scrub_removes_key_from_text() {
        let key = ApiKey::new("sk-live-123");
        let scrubbed = key.scrub("bad auth header: Bearer sk-live-123");
        assert_eq!(scrubbed, "bad auth header: Bearer [REDACTED]");
    }

    #[test]
    fn blank_keys_are_detected() {
        assert!(ApiKey::new("   ").is_blank());
        assert!(!ApiKey::new("k").is_blank());
    }
}
