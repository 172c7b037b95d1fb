//! Common types used throughout flextk.

use serde::{Deserialize, Serialize};
use std::fmt;
use zeroize::Zeroize;

/// A remote object key, independent of the provider that stores it.
///
/// Object stores have flat key spaces; the components here are the
/// `/`-separated segments of the key. The root path is the empty key and
/// stands for "the whole bucket" in listings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectPath {
    components: Vec<String>,
}

impl ObjectPath {
    /// Create a root path.
    pub fn root() -> Self {
        Self {
            components: Vec::new(),
        }
    }

    /// Create a path from string components.
    ///
    /// # Preconditions
    /// - Components must not contain path separators
    /// - Components must not be empty strings, `.` or `..`
    ///
    /// # Errors
    /// - Returns error if any component is invalid
    pub fn from_components(components: Vec<String>) -> crate::Result<Self> {
        for comp in &components {
            validate_component(comp)?;
        }
        Ok(Self { components })
    }

    /// Parse a key string into an ObjectPath.
    ///
    /// Leading and trailing `/` are ignored, so `"/a/b"` and `"a/b/"` both
    /// name the key `a/b`.
    pub fn parse(path: &str) -> crate::Result<Self> {
        let path = path.trim_start_matches('/').trim_end_matches('/');
        if path.is_empty() {
            return Ok(Self::root());
        }

        let components: Vec<String> = path.split('/').map(String::from).collect();
        Self::from_components(components)
    }

    /// Check if this is the root path.
    pub fn is_root(&self) -> bool {
        self.components.is_empty()
    }

    /// Get the parent path, if any.
    pub fn parent(&self) -> Option<Self> {
        if self.is_root() {
            None
        } else {
            let mut components = self.components.clone();
            components.pop();
            Some(Self { components })
        }
    }

    /// Get the object name (last component).
    pub fn name(&self) -> Option<&str> {
        self.components.last().map(|s| s.as_str())
    }

    /// Extension of the last component, without the dot.
    pub fn extension(&self) -> Option<&str> {
        let name = self.name()?;
        match name.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => Some(ext),
            _ => None,
        }
    }

    /// Join this path with a child component.
    pub fn join(&self, child: &str) -> crate::Result<Self> {
        validate_component(child)?;
        let mut components = self.components.clone();
        components.push(child.to_string());
        Ok(Self { components })
    }

    /// Get the path components.
    pub fn components(&self) -> &[String] {
        &self.components
    }

    /// The provider-facing key, without a leading slash.
    pub fn key(&self) -> String {
        self.components.join("/")
    }

    /// Key used as a listing prefix: the key plus a trailing slash, or the
    /// empty string for the root.
    pub fn prefix(&self) -> String {
        if self.is_root() {
            String::new()
        } else {
            format!("{}/", self.key())
        }
    }
}

fn validate_component(comp: &str) -> crate::Result<()> {
    if comp.is_empty() {
        return Err(crate::Error::InvalidInput(
            "Path component cannot be empty".to_string(),
        ));
    }
    if comp.contains('/') || comp.contains('\\') {
        return Err(crate::Error::InvalidInput(
            "Path component cannot contain separators".to_string(),
        ));
    }
    if comp == "." || comp == ".." {
        return Err(crate::Error::InvalidInput(format!(
            "Path component '{}' is not allowed",
            comp
        )));
    }
    Ok(())
}

impl fmt::Display for ObjectPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_root() {
            write!(f, "/")
        } else {
            write!(f, "{}", self.key())
        }
    }
}

/// Sensitive data wrapper that zeroizes on drop.
#[derive(Clone, Zeroize)]
#[zeroize(drop)]
pub struct SensitiveBytes(Vec<u8>);

impl SensitiveBytes {
    /// Create new sensitive bytes.
    pub fn new(data: Vec<u8>) -> Self {
        Self(data)
    }

    /// Get a reference to the inner bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Get the length.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for SensitiveBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SensitiveBytes([REDACTED; {} bytes])", self.0.len())
    }
}

/// A credential string (API key, app key, password) that never shows up in
/// `Debug` output and is wiped from memory on drop.
#[derive(Clone, PartialEq, Eq, Zeroize, Serialize, Deserialize)]
#[zeroize(drop)]
#[serde(transparent)]
pub struct SecretString(String);

impl SecretString {
    /// Wrap a secret value.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Borrow the secret. Callers should pass it straight to the consumer.
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<String> for SecretString {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for SecretString {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Debug for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretString([REDACTED])")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_path_root() {
        let path = ObjectPath::root();
        assert!(path.is_root());
        assert_eq!(path.key(), "");
        assert_eq!(path.prefix(), "");
        assert_eq!(path.to_string(), "/");
    }

    #[test]
    fn test_object_path_parse() {
        let path = ObjectPath::parse("/photos/2024/cat.jpg").unwrap();
        assert_eq!(path.components(), &["photos", "2024", "cat.jpg"]);
        assert_eq!(path.key(), "photos/2024/cat.jpg");
        assert_eq!(path.to_string(), "photos/2024/cat.jpg");
    }

    #[test]
    fn test_object_path_trailing_slash() {
        let path = ObjectPath::parse("docs/").unwrap();
        assert_eq!(path.key(), "docs");
        assert_eq!(path.prefix(), "docs/");
    }

    #[test]
    fn test_object_path_rejects_empty_segment() {
        assert!(ObjectPath::parse("a//b").is_err());
        assert!(ObjectPath::parse("a/../b").is_err());
    }

    #[test]
    fn test_object_path_join_and_parent() {
        let path = ObjectPath::root().join("foo").unwrap().join("bar.txt").unwrap();
        assert_eq!(path.key(), "foo/bar.txt");
        assert_eq!(path.parent().unwrap().key(), "foo");
        assert_eq!(path.name(), Some("bar.txt"));
        assert!(path.join("a/b").is_err());
    }

    #[test]
    fn test_object_path_extension() {
        assert_eq!(ObjectPath::parse("a/movie.mkv").unwrap().extension(), Some("mkv"));
        assert_eq!(ObjectPath::parse("a/.hidden").unwrap().extension(), None);
        assert_eq!(ObjectPath::parse("README").unwrap().extension(), None);
    }

    const COMPONENT: &str = "[a-zA-Z0-9_-][a-zA-Z0-9_.-]{0,11}";

    proptest::proptest! {
        #[test]
        fn prop_key_reparses_to_same_path(
            parts in proptest::collection::vec(COMPONENT, 0..6)
        ) {
            let parts: Vec<String> =
                parts.into_iter().filter(|p| p != "." && p != "..").collect();
            let path = ObjectPath::from_components(parts).unwrap();
            let reparsed = ObjectPath::parse(&path.key()).unwrap();
            proptest::prop_assert_eq!(reparsed, path);
        }
    }

    #[test]
    fn test_secret_string_redacted() {
        let secret = SecretString::new("sk_live_123");
        assert_eq!(format!("{:?}", secret), "SecretString([REDACTED])");
        assert_eq!(secret.expose(), "sk_live_123");
    }

    #[test]
    fn test_secret_string_serializes_transparently() {
        let secret = SecretString::new("abc");
        assert_eq!(serde_json::to_string(&secret).unwrap(), "\"abc\"");
    }
}
