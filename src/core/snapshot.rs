//! Flat key/value view of the merged namespace.

use crate::error::{ConfigError, Result};
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;

/// One complete merged observation: normalized key to value.
///
/// Snapshots are plain owned data. The session hands subscribers their own
/// copy, so nothing a subscriber does can reach session state.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct Snapshot {
    entries: BTreeMap<String, String>,
}

impl Snapshot {
    /// Create an empty snapshot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a value by normalized key.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    /// Whether `key` is present.
    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Set a value, returning the one it replaced.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.entries.insert(key.into(), value.into())
    }

    /// Remove a key, returning its value.
    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.entries.remove(key)
    }

    /// Number of keys.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the snapshot has no keys.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over keys in sorted order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Iterate over key/value pairs in sorted key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Deserialize the snapshot into a typed configuration struct.
    ///
    /// Values are strings on the wire; the `config` crate converts them to
    /// numbers and booleans where the target type asks for them.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot cannot be represented as `T`.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use kvwatch_config::core::Snapshot;
    /// use serde::Deserialize;
    ///
    /// #[derive(Deserialize)]
    /// struct Server {
    ///     port: u16,
    /// }
    ///
    /// let snapshot: Snapshot = [("port", "8080")].into_iter().collect();
    /// let server: Server = snapshot.try_deserialize().unwrap();
    /// assert_eq!(server.port, 8080);
    /// ```
    pub fn try_deserialize<T>(&self) -> Result<T>
    where
        T: DeserializeOwned,
    {
        // Built as a raw table so keys keep their case; `Config` lowercases them.
        let table = config::ValueKind::Table(
            self.entries
                .iter()
                .map(|(key, value)| {
                    let value = config::Value::new(None, config::ValueKind::String(value.clone()));
                    (key.clone(), value)
                })
                .collect(),
        );

        config::Value::new(None, table)
            .try_deserialize::<T>()
            .map_err(|e| {
                ConfigError::DeserializationError(format!("Failed to deserialize snapshot: {}", e))
            })
    }
}

impl<K, V> FromIterator<(K, V)> for Snapshot
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }
}

impl IntoIterator for Snapshot {
    type Item = (String, String);
    type IntoIter = std::collections::btree_map::IntoIter<String, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

impl From<BTreeMap<String, String>> for Snapshot {
    fn from(entries: BTreeMap<String, String>) -> Self {
        Self { entries }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct TestConfig {
        port: u16,
        host: String,
        debug: bool,
    }

    #[test]
    fn test_insert_and_get() {
        let mut snapshot = Snapshot::new();
        assert!(snapshot.is_empty());
        assert_eq!(snapshot.insert("foo", "bar"), None);
        assert_eq!(snapshot.insert("foo", "baz"), Some("bar".to_string()));
        assert_eq!(snapshot.get("foo"), Some("baz"));
        assert_eq!(snapshot.len(), 1);
    }

    #[test]
    fn test_keys_sorted() {
        let snapshot: Snapshot = [("b", "2"), ("a", "1"), ("c", "3")].into_iter().collect();
        let keys: Vec<_> = snapshot.keys().collect();
        assert_eq!(keys, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_try_deserialize() {
        let snapshot: Snapshot = [("port", "8080"), ("host", "localhost"), ("debug", "true")]
            .into_iter()
            .collect();

        let config: TestConfig = snapshot.try_deserialize().unwrap();
        assert_eq!(
            config,
            TestConfig {
                port: 8080,
                host: "localhost".to_string(),
                debug: true,
            }
        );
    }

    #[test]
    fn test_try_deserialize_missing_field() {
        let snapshot: Snapshot = [("port", "8080")].into_iter().collect();
        let result: Result<TestConfig> = snapshot.try_deserialize();
        assert!(matches!(result, Err(ConfigError::DeserializationError(_))));
    }

    #[test]
    fn test_try_deserialize_keeps_key_case() {
        #[derive(Debug, Deserialize, PartialEq)]
        #[serde(rename_all = "camelCase")]
        struct Database {
            db_host: String,
            max_connections: u32,
        }

        let snapshot: Snapshot = [("dbHost", "db.internal"), ("maxConnections", "16")]
            .into_iter()
            .collect();

        let database: Database = snapshot.try_deserialize().unwrap();
        assert_eq!(
            database,
            Database {
                db_host: "db.internal".to_string(),
                max_connections: 16,
            }
        );
    }

    #[test]
    fn test_serializes_as_map() {
        let snapshot: Snapshot = [("foo", "bar")].into_iter().collect();
        let json = serde_json::to_string(&snapshot).unwrap();
        assert_eq!(json, r#"{"foo":"bar"}"#);
    }
}
