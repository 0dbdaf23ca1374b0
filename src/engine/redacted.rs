//! Secret handling for configured credentials.
//!
//! `RedactedString` stores the database password, SMTP password, and encryption
//! passphrase without ever echoing them back through `Debug`, logs, or
//! re-serialized configuration.

use bon::Builder;
use derive_more::From;
use getset::Getters;
use serde::de::Visitor;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt::{Debug, Formatter};
use std::result;
use validator::Validate;
use zeroize::Zeroize;

/// Placeholder emitted instead of the actual secret in logs and serialization
pub static REDACTED_SECRET: &str = "###REDACTED_SECRET###";

/// A string that is redacted in debug output and serialization
///
/// Deserializes the real value from the config file, but always serializes
/// and debug-prints the placeholder. Memory is zeroed on drop.
#[derive(Validate, Clone, Zeroize, From, Builder, PartialEq, Eq, Getters)]
#[getset(get = "pub")]
pub struct RedactedString {
    /// Minimum 8 characters for basic security
    #[validate(length(min = 8))]
    #[builder(into)]
    inner: String,
}

impl Debug for RedactedString {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", REDACTED_SECRET)
    }
}

impl Serialize for RedactedString {
    fn serialize<S: Serializer>(&self, serializer: S) -> result::Result<S::Ok, S::Error> {
        serializer.serialize_str(REDACTED_SECRET)
    }
}

impl<'de> Deserialize<'de> for RedactedString {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> result::Result<Self, D::Error> {
        deserializer.deserialize_str(RedactedStringVisitor)
    }
}

impl Drop for RedactedString {
    fn drop(&mut self) {
        self.zeroize();
    }
}

pub struct RedactedStringVisitor;

impl Visitor<'_> for RedactedStringVisitor {
    type Value = RedactedString;

    fn expecting(&self, formatter: &mut Formatter) -> std::fmt::Result {
        formatter.write_str("a string")
    }

    fn visit_str<E>(self, v: &str) -> result::Result<Self::Value, E>
    where
        E: serde::de::Error,
    {
        Ok(RedactedString::builder().inner(v).build())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_is_redacted() {
        let secret = RedactedString::builder().inner("hunter22hunter22").build();
        assert_eq!(format!("{:?}", secret), REDACTED_SECRET);
    }

    #[test]
    fn test_serialize_is_redacted_deserialize_is_not() {
        let secret: RedactedString = serde_json::from_str("\"actual_secret_value\"").unwrap();
        assert_eq!(secret.inner(), "actual_secret_value");
        let serialized = serde_json::to_string(&secret).unwrap();
        assert_eq!(serialized, format!("\"{}\"", REDACTED_SECRET));
    }

    #[test]
    fn test_validation_rejects_short_secrets() {
        assert!(RedactedString::builder()
            .inner("long_enough_secret")
            .build()
            .validate()
            .is_ok());
        assert!(RedactedString::builder()
            .inner("short")
            .build()
            .validate()
            .is_err());
    }
}
