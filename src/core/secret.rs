//! Credential wrapper that never prints its contents.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Replacement text printed instead of secret values
pub const REDACTED: &str = "[REDACTED]";

/// A string that only reveals itself through [`Secret::expose`].
///
/// `Debug`, `Display` and `Serialize` all print [`REDACTED`], so the value
/// can sit inside configuration structs that get logged or reported.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    /// Wraps a value
    pub fn new(value: impl Into<String>) -> Self {
        Secret(value.into())
    }

    /// Returns the wrapped value. Only the transport should call this.
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// True when no value was supplied
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Length of the wrapped value
    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(REDACTED)
    }
}

impl fmt::Display for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(REDACTED)
    }
}

impl From<String> for Secret {
    fn from(value: String) -> Self {
        Secret(value)
    }
}

impl From<&str> for Secret {
    fn from(value: &str) -> Self {
        Secret(value.to_string())
    }
}

impl Serialize for Secret {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(REDACTED)
    }
}

impl<'de> Deserialize<'de> for Secret {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(Secret)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secret_is_redacted_everywhere() {
        let secret = Secret::new("hunter2");

        assert_eq!(format!("{:?}", secret), REDACTED);
        assert_eq!(secret.to_string(), REDACTED);
        assert_eq!(serde_json::to_string(&secret).unwrap(), "\"[REDACTED]\"");
        assert_eq!(secret.expose(), "hunter2");
    }

    #[test]
    fn test_secret_deserializes_plain_string() {
        let secret: Secret = serde_yaml::from_str("s3cr3t").unwrap();
        assert_eq!(secret.expose(), "s3cr3t");
        assert_eq!(secret.len(), 6);
        assert!(!secret.is_empty());
    }
}
