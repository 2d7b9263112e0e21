//! Session settings and how they are loaded.

use crate::core::MissingKeyPolicy;
use crate::error::{ConfigError, Result};
use std::collections::BTreeMap;
use std::path::Path;

/// Environment prefix used by [`WatchSettings::load`].
pub const SETTINGS_ENV_PREFIX: &str = "KVWATCH";

/// Everything a watch session needs to know at construction.
///
/// # Examples
///
/// ```rust,no_run
/// use kvwatch_config::core::WatchSettings;
///
/// # fn example() -> kvwatch_config::error::Result<()> {
/// // kvwatch.yaml, then KVWATCH_NAMESPACE_PREFIX, KVWATCH_REQUIRED_KEYS=a,b, ...
/// let settings = WatchSettings::load(Some("kvwatch.yaml".as_ref()))?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct WatchSettings {
    /// Namespace root watched on the coordination service, stripped from keys.
    pub namespace_prefix: String,
    /// Keys every accepted snapshot must contain.
    #[serde(default)]
    pub required_keys: Vec<String>,
    /// Prefix for environment overrides; none disables them.
    #[serde(default)]
    pub env_prefix: Option<String>,
    /// Policy for the first observation.
    #[serde(default)]
    pub on_missing_keys_at_startup: MissingKeyPolicy,
    /// Policy for every later observation.
    #[serde(default)]
    pub on_missing_keys_on_update: MissingKeyPolicy,
    /// Values seeded under every source.
    #[serde(default)]
    pub default_values: BTreeMap<String, String>,
    /// Do not log reports; they still reach error subscribers.
    #[serde(default)]
    pub suppress_errors: bool,
}

impl WatchSettings {
    /// Settings for `namespace_prefix` with everything else defaulted.
    pub fn new(namespace_prefix: impl Into<String>) -> Self {
        Self {
            namespace_prefix: namespace_prefix.into(),
            ..Self::default()
        }
    }

    /// Load settings from an optional file layered under `KVWATCH_*` variables.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, the result cannot be
    /// deserialized, or the settings fail [`WatchSettings::validate`].
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with_env_prefix(path, SETTINGS_ENV_PREFIX)
    }

    /// Like [`WatchSettings::load`], with a custom environment prefix.
    ///
    /// Nested names use `__`; `<PREFIX>_REQUIRED_KEYS` is a comma-separated list.
    ///
    /// # Errors
    ///
    /// See [`WatchSettings::load`].
    pub fn load_with_env_prefix(path: Option<&Path>, env_prefix: &str) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }

        builder = builder.add_source(
            config::Environment::with_prefix(env_prefix)
                .prefix_separator("_")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("required_keys")
                .try_parsing(true),
        );

        let config = builder
            .build()
            .map_err(|e| ConfigError::LoadError(format!("Failed to build settings: {}", e)))?;

        let mut settings: Self = config.try_deserialize().map_err(|e| {
            ConfigError::DeserializationError(format!("Failed to deserialize settings: {}", e))
        })?;

        // `config` lowercases table keys, but default keys must match
        // normalized (camelCase) keys exactly.
        if let Some(path) = path {
            if let Some(defaults) = read_file_default_values(path)? {
                settings.default_values = defaults;
            }
        }

        settings.validate()?;
        Ok(settings)
    }

    /// Check the settings are usable.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidConfig`] when no namespace prefix is set.
    pub fn validate(&self) -> Result<()> {
        if self.namespace_prefix.is_empty() {
            return Err(ConfigError::InvalidConfig(
                "namespace_prefix not defined".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(serde::Deserialize)]
struct FileDefaults {
    #[serde(default)]
    default_values: Option<BTreeMap<String, DefaultScalar>>,
}

/// A scalar default as written in a settings file.
#[derive(serde::Deserialize)]
#[serde(untagged)]
enum DefaultScalar {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

impl DefaultScalar {
    fn into_string(self) -> String {
        match self {
            Self::Bool(b) => b.to_string(),
            Self::Int(i) => i.to_string(),
            Self::Float(f) => f.to_string(),
            Self::String(s) => s,
        }
    }
}

/// Read `default_values` from a settings file with key case intact.
///
/// Returns `None` when the file has no `default_values` table or its format
/// is not enabled.
fn read_file_default_values(path: &Path) -> Result<Option<BTreeMap<String, String>>> {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();

    let contents = std::fs::read_to_string(path).map_err(|e| {
        ConfigError::LoadError(format!("Failed to read {}: {}", path.display(), e))
    })?;

    let parse_error = |e: &dyn std::fmt::Display| {
        ConfigError::DeserializationError(format!("Failed to parse default_values: {}", e))
    };

    let parsed: FileDefaults = match extension.as_str() {
        #[cfg(feature = "yaml")]
        "yaml" | "yml" => serde_yaml::from_str(&contents).map_err(|e| parse_error(&e))?,
        #[cfg(feature = "toml")]
        "toml" => toml::from_str(&contents).map_err(|e| parse_error(&e))?,
        #[cfg(feature = "json")]
        "json" => serde_json::from_str(&contents).map_err(|e| parse_error(&e))?,
        _ => return Ok(None),
    };

    Ok(parsed.default_values.map(|values| {
        values
            .into_iter()
            .map(|(key, value)| (key, value.into_string()))
            .collect()
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = WatchSettings::new("cfg/");
        assert_eq!(settings.namespace_prefix, "cfg/");
        assert_eq!(settings.on_missing_keys_at_startup, MissingKeyPolicy::Exit);
        assert_eq!(settings.on_missing_keys_on_update, MissingKeyPolicy::Exit);
        assert!(settings.env_prefix.is_none());
        assert!(!settings.suppress_errors);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_empty_prefix_rejected() {
        let settings = WatchSettings::default();
        assert!(matches!(settings.validate(), Err(ConfigError::InvalidConfig(_))));
    }

    #[test]
    fn test_deserialize_policies() {
        let settings: WatchSettings = serde_json::from_str(
            r#"{
                "namespace_prefix": "cfg/app/",
                "required_keys": ["foo"],
                "on_missing_keys_at_startup": "warn",
                "on_missing_keys_on_update": "lastGoodValue"
            }"#,
        )
        .unwrap();
        assert_eq!(settings.on_missing_keys_at_startup, MissingKeyPolicy::Warn);
        assert_eq!(settings.on_missing_keys_on_update, MissingKeyPolicy::LastGoodValue);
        assert_eq!(settings.required_keys, vec!["foo"]);
    }
}
