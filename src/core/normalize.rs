//! Key normalization shared by every source.

use heck::ToLowerCamelCase;

/// Normalize a raw key into its flat snapshot identifier.
///
/// Strips `prefix` when it matches at the start of `raw_key`, then folds the
/// remaining separator-delimited segments into lower camel case. An empty
/// return value marks a directory node that must not enter a snapshot.
///
/// # Examples
///
/// ```rust
/// use kvwatch_config::core::normalize_key;
///
/// assert_eq!(normalize_key("service/long-name", "service/"), "longName");
/// assert_eq!(normalize_key("cfg/", "cfg/"), "");
/// ```
pub fn normalize_key(raw_key: &str, prefix: &str) -> String {
    let stripped = raw_key.strip_prefix(prefix).unwrap_or(raw_key);
    stripped.to_lower_camel_case()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strips_prefix() {
        assert_eq!(normalize_key("cfg/app/foo", "cfg/app/"), "foo");
    }

    #[test]
    fn test_prefix_only_at_start() {
        assert_eq!(normalize_key("other/cfg/foo", "cfg/"), "otherCfgFoo");
    }

    #[test]
    fn test_directory_node_is_empty() {
        assert_eq!(normalize_key("cfg/", "cfg/"), "");
        assert_eq!(normalize_key("cfg/app/", "cfg/app/"), "");
    }

    #[test]
    fn test_camel_case_segments() {
        assert_eq!(normalize_key("long-name", ""), "longName");
        assert_eq!(normalize_key("db/max_connections", ""), "dbMaxConnections");
        assert_eq!(normalize_key("BIZ", ""), "biz");
        assert_eq!(normalize_key("LOG_LEVEL", ""), "logLevel");
    }

    #[test]
    fn test_deterministic() {
        let first = normalize_key("cfg/app/Some.Key", "cfg/app/");
        let second = normalize_key("cfg/app/Some.Key", "cfg/app/");
        assert_eq!(first, second);
    }
}
