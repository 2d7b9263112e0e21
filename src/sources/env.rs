//! Environment variable override source.

use std::collections::HashMap;

/// Environment variable override source.
///
/// Captures variables once at construction so every observation merges the
/// same overrides. Only variables named `<PREFIX>_<KEY>` are merged.
///
/// # Examples
///
/// ```rust
/// use kvwatch_config::sources::EnvSource;
///
/// // APP_LOG_LEVEL=debug -> logLevel = debug
/// let source = EnvSource::from_process("APP");
/// ```
#[derive(Debug, Clone, Default)]
pub struct EnvSource {
    prefix: Option<String>,
    vars: HashMap<String, String>,
}

impl EnvSource {
    /// A source that contributes nothing.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Capture the current process environment.
    ///
    /// Variables whose name or value is not valid unicode are ignored.
    pub fn from_process(prefix: impl Into<String>) -> Self {
        Self {
            prefix: Some(prefix.into()),
            vars: std::env::vars_os()
                .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?)))
                .collect(),
        }
    }

    /// Use an explicit variable map instead of the process environment.
    pub fn from_vars(prefix: impl Into<String>, vars: HashMap<String, String>) -> Self {
        Self {
            prefix: Some(prefix.into()),
            vars,
        }
    }

    /// The configured prefix, without the trailing `_`.
    pub fn prefix(&self) -> Option<&str> {
        self.prefix.as_deref()
    }

    /// All captured variables, including ones outside the prefix.
    pub fn vars(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Look up a captured variable by its full name.
    pub fn var(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }

    /// Get a human-readable name for this source (for logging/debugging).
    pub fn name(&self) -> String {
        match &self.prefix {
            Some(prefix) => format!("env:{}_*", prefix),
            None => "env:disabled".to_string(),
        }
    }
}

#[cfg(test)]
#[allow(unsafe_code)] // For env var manipulation in tests
mod tests {
    use super::*;
    use std::env;

    #[test]
    fn test_empty_source() {
        let source = EnvSource::empty();
        assert_eq!(source.prefix(), None);
        assert_eq!(source.vars().count(), 0);
        assert_eq!(source.name(), "env:disabled");
    }

    #[test]
    fn test_name() {
        let source = EnvSource::from_vars("APP", HashMap::new());
        assert_eq!(source.name(), "env:APP_*");
    }

    #[test]
    fn test_from_vars() {
        let vars: HashMap<String, String> = [("APP_FOO".to_string(), "bar".to_string())].into();
        let source = EnvSource::from_vars("APP", vars);
        assert_eq!(source.var("APP_FOO"), Some("bar"));
        assert_eq!(source.prefix(), Some("APP"));
    }

    #[test]
    fn test_from_process_captures_environment() {
        unsafe {
            env::set_var("KVWATCH_ENV_TEST_CAPTURE", "captured");
        }

        let source = EnvSource::from_process("KVWATCH_ENV_TEST");
        assert_eq!(source.var("KVWATCH_ENV_TEST_CAPTURE"), Some("captured"));

        unsafe {
            env::remove_var("KVWATCH_ENV_TEST_CAPTURE");
        }
        // Captured values survive later environment changes
        assert_eq!(source.var("KVWATCH_ENV_TEST_CAPTURE"), Some("captured"));
    }
}
