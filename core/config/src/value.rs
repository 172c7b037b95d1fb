//! Values held in a configuration section.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use flextk_common::{Error, Result};

/// A named bundle of settings, e.g. the `gcs` section.
pub type Section = BTreeMap<String, SettingValue>;

/// A single setting value.
///
/// Serialized untagged, so a section reads naturally as a JSON object once
/// decrypted. Variant order matters for deserialization: integers are tried
/// before floats so `3` stays an integer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SettingValue {
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
    List(Vec<String>),
}

impl SettingValue {
    /// Borrow the value as text, if it is text.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            SettingValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Get the value as a bool, if it is one.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            SettingValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Get the value as an integer, if it is one.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            SettingValue::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Reject values that cannot survive a JSON round trip.
    pub(crate) fn validate(&self, key: &str) -> Result<()> {
        if let SettingValue::Float(f) = self {
            if !f.is_finite() {
                return Err(Error::InvalidInput(format!(
                    "Setting '{}' must be a finite number",
                    key
                )));
            }
        }
        Ok(())
    }
}

impl fmt::Display for SettingValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SettingValue::Bool(b) => write!(f, "{}", b),
            SettingValue::Integer(i) => write!(f, "{}", i),
            SettingValue::Float(x) => write!(f, "{}", x),
            SettingValue::Text(s) => write!(f, "{}", s),
            SettingValue::List(items) => write!(f, "{}", items.join(",")),
        }
    }
}

impl From<&str> for SettingValue {
    fn from(value: &str) -> Self {
        SettingValue::Text(value.to_string())
    }
}

impl From<String> for SettingValue {
    fn from(value: String) -> Self {
        SettingValue::Text(value)
    }
}

impl From<bool> for SettingValue {
    fn from(value: bool) -> Self {
        SettingValue::Bool(value)
    }
}

impl From<i64> for SettingValue {
    fn from(value: i64) -> Self {
        SettingValue::Integer(value)
    }
}

impl From<f64> for SettingValue {
    fn from(value: f64) -> Self {
        SettingValue::Float(value)
    }
}

impl From<Vec<String>> for SettingValue {
    fn from(value: Vec<String>) -> Self {
        SettingValue::List(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_untagged_json_shape() {
        let mut section = Section::new();
        section.insert("bucket_name".to_string(), "b".into());
        section.insert("public".to_string(), true.into());
        section.insert("retries".to_string(), 3i64.into());

        let json = serde_json::to_string(&section).unwrap();
        assert_eq!(json, r#"{"bucket_name":"b","public":true,"retries":3}"#);
    }

    #[test]
    fn test_integer_not_read_back_as_float() {
        let value: SettingValue = serde_json::from_str("3").unwrap();
        assert_eq!(value, SettingValue::Integer(3));

        let value: SettingValue = serde_json::from_str("3.5").unwrap();
        assert_eq!(value, SettingValue::Float(3.5));
    }

    #[test]
    fn test_non_finite_float_rejected() {
        assert!(SettingValue::Float(f64::NAN).validate("x").is_err());
        assert!(SettingValue::Float(1.25).validate("x").is_ok());
    }
}
