//! Command groups and their handlers.

pub mod cloud;
pub mod config;
#[cfg(feature = "onnx")]
pub mod detect;
pub mod media;
pub mod services;

use anyhow::{Context as _, Result};
use serde_json::Value;

use flextk_common::Error;

/// Print a value as indented JSON.
pub fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value).context("Failed to format output")?;
    println!("{}", text);
    Ok(())
}

/// Parse a `--data` argument into a JSON object.
pub fn parse_object(data: &str) -> Result<serde_json::Map<String, Value>> {
    match serde_json::from_str::<Value>(data) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(Error::InvalidInput("Data must be a JSON object".to_string()).into()),
        Err(e) => Err(Error::InvalidInput(format!("Data is not valid JSON: {}", e)).into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_object() {
        let map = parse_object(r#"{"name": "Ada", "age": 36}"#).unwrap();
        assert_eq!(map["age"], 36);
        assert!(parse_object("[1, 2]").is_err());
        assert!(parse_object("{not json").is_err());
    }
}
