//! Source mergers and the loader that applies them in precedence order.

use crate::core::{Snapshot, normalize_key};
use crate::sources::{ArgsSource, EnvSource, RawEntry};

/// Fold remote entries into `data`.
///
/// Entries without a value are directory nodes and are skipped, as are entries
/// whose key normalizes to nothing once `prefix` is stripped.
pub fn merge_remote(mut data: Snapshot, entries: &[RawEntry], prefix: &str) -> Snapshot {
    for entry in entries {
        let Some(value) = &entry.value else {
            continue;
        };

        let key = normalize_key(&entry.key, prefix);
        if !key.is_empty() {
            data.insert(key, value.clone());
        }
    }
    data
}

/// Fold environment variables named `<prefix>_<KEY>` into `data`.
///
/// Nothing is merged when no prefix is configured.
pub fn merge_env<I, K, V>(mut data: Snapshot, vars: I, prefix: Option<&str>) -> Snapshot
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: AsRef<str>,
{
    let Some(prefix) = prefix else {
        return data;
    };
    let prefix = format!("{}_", prefix);

    for (name, value) in vars {
        if let Some(rest) = name.as_ref().strip_prefix(prefix.as_str()) {
            let key = normalize_key(rest, "");
            if !key.is_empty() {
                data.insert(key, value.as_ref());
            }
        }
    }
    data
}

/// Fold `--key=value` argument tokens into `data`.
///
/// The token is split once, on the first `=`, so values may contain `=`.
/// Tokens without the `--` marker or without a value are ignored.
pub fn merge_args<I, S>(mut data: Snapshot, args: I) -> Snapshot
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    for token in args {
        let Some(body) = token.as_ref().strip_prefix("--") else {
            continue;
        };
        let Some((name, value)) = body.split_once('=') else {
            continue;
        };

        let key = normalize_key(name, "");
        if !key.is_empty() {
            data.insert(key, value);
        }
    }
    data
}

/// Builds snapshots from a remote observation plus the local override sources.
///
/// Precedence is fixed: defaults, then remote, then environment, then
/// arguments. Later layers overwrite keys set by earlier ones.
#[derive(Debug, Clone)]
pub struct SnapshotLoader {
    remote_prefix: String,
    defaults: Snapshot,
    env: EnvSource,
    args: ArgsSource,
}

impl SnapshotLoader {
    /// Create a loader for a namespace prefix with no local overrides.
    pub fn new(remote_prefix: impl Into<String>) -> Self {
        Self {
            remote_prefix: remote_prefix.into(),
            defaults: Snapshot::new(),
            env: EnvSource::empty(),
            args: ArgsSource::empty(),
        }
    }

    /// Seed every snapshot with these values before any source is applied.
    pub fn with_defaults(mut self, defaults: Snapshot) -> Self {
        self.defaults = defaults;
        self
    }

    /// Use this environment source.
    pub fn with_env(mut self, env: EnvSource) -> Self {
        self.env = env;
        self
    }

    /// Use this argument source.
    pub fn with_args(mut self, args: ArgsSource) -> Self {
        self.args = args;
        self
    }

    /// The namespace prefix stripped from remote keys.
    pub fn remote_prefix(&self) -> &str {
        &self.remote_prefix
    }

    /// Merge a remote observation with the local sources.
    pub fn load(&self, entries: &[RawEntry]) -> Snapshot {
        let data = self.defaults.clone();
        let data = merge_remote(data, entries, &self.remote_prefix);
        let data = merge_env(data, self.env.vars(), self.env.prefix());
        merge_args(data, self.args.tokens())
    }

    /// Get the names of the merged layers in precedence order.
    pub fn source_names(&self) -> Vec<String> {
        vec![
            "defaults".to_string(),
            format!("remote:{}", self.remote_prefix),
            self.env.name(),
            self.args.name(),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn entry(key: &str, value: &str) -> RawEntry {
        RawEntry::new(key, value)
    }

    #[test]
    fn test_remote_strips_prefix() {
        let entries = vec![entry("cfg/app/foo", "bar"), entry("cfg/app/long-name", "x")];
        let data = merge_remote(Snapshot::new(), &entries, "cfg/app/");
        assert_eq!(data.get("foo"), Some("bar"));
        assert_eq!(data.get("longName"), Some("x"));
    }

    #[test]
    fn test_remote_drops_directories() {
        let entries = vec![
            entry("cfg/", "ignored"),
            RawEntry::directory("cfg/sub/"),
            entry("cfg/sub/key", "v"),
        ];
        let data = merge_remote(Snapshot::new(), &entries, "cfg/");
        assert_eq!(data.len(), 1);
        assert_eq!(data.get("subKey"), Some("v"));
    }

    #[test]
    fn test_env_requires_prefix() {
        let vars = vec![("APP_BIZ", "baz")];
        let data = merge_env(Snapshot::new(), vars.clone(), None);
        assert!(data.is_empty());

        let data = merge_env(Snapshot::new(), vars, Some("APP"));
        assert_eq!(data.get("biz"), Some("baz"));
    }

    #[test]
    fn test_env_ignores_other_variables() {
        let vars = vec![("APPLE", "1"), ("APP", "2"), ("PATH", "/bin"), ("APP_LOG_LEVEL", "debug")];
        let data = merge_env(Snapshot::new(), vars, Some("APP"));
        assert_eq!(data.len(), 1);
        assert_eq!(data.get("logLevel"), Some("debug"));
    }

    #[test]
    fn test_args_split_on_first_equals() {
        let args = vec!["--qaz=true", "--url=http://h/?a=b", "--flag", "positional", "-x=1"];
        let data = merge_args(Snapshot::new(), args);
        assert_eq!(data.len(), 2);
        assert_eq!(data.get("qaz"), Some("true"));
        assert_eq!(data.get("url"), Some("http://h/?a=b"));
    }

    #[test]
    fn test_merged_example() {
        let env: HashMap<String, String> = [("APP_BIZ".to_string(), "baz".to_string())].into();
        let loader = SnapshotLoader::new("cfg/app/")
            .with_env(EnvSource::from_vars("APP", env))
            .with_args(ArgsSource::from_tokens(["--qaz=true"]));

        let data = loader.load(&[entry("cfg/app/foo", "bar")]);
        let expected: Snapshot = [("foo", "bar"), ("biz", "baz"), ("qaz", "true")]
            .into_iter()
            .collect();
        assert_eq!(data, expected);
    }

    #[test]
    fn test_precedence() {
        let env: HashMap<String, String> = [
            ("APP_SHARED".to_string(), "env".to_string()),
            ("APP_ENV_ONLY".to_string(), "env".to_string()),
        ]
        .into();
        let loader = SnapshotLoader::new("cfg/")
            .with_defaults([("shared", "default"), ("fallback", "default")].into_iter().collect())
            .with_env(EnvSource::from_vars("APP", env))
            .with_args(ArgsSource::from_tokens(["--shared=arg"]));

        let data = loader.load(&[entry("cfg/shared", "remote"), entry("cfg/remote-only", "remote")]);
        assert_eq!(data.get("shared"), Some("arg"));
        assert_eq!(data.get("envOnly"), Some("env"));
        assert_eq!(data.get("remoteOnly"), Some("remote"));
        assert_eq!(data.get("fallback"), Some("default"));
    }

    #[test]
    fn test_defaults_not_mutated_between_loads() {
        let loader = SnapshotLoader::new("cfg/").with_defaults([("a", "1")].into_iter().collect());
        let first = loader.load(&[entry("cfg/b", "2")]);
        let second = loader.load(&[]);
        assert_eq!(first.len(), 2);
        assert_eq!(second.len(), 1);
    }

    #[test]
    fn test_source_names() {
        let loader = SnapshotLoader::new("cfg/")
            .with_env(EnvSource::from_vars("APP", HashMap::new()));
        let names = loader.source_names();
        assert_eq!(names, vec!["defaults", "remote:cfg/", "env:APP_*", "args"]);
    }
}
