//! Builder for constructing WatchSession instances.

use crate::core::session::SessionParts;
use crate::core::{
    MissingKeyPolicy, RequiredKeySet, Snapshot, SnapshotLoader, WatchSession, WatchSettings,
};
use crate::error::{ConfigError, Result};
use crate::sources::{ArgsSource, EnvSource, WatchFeed};
use std::collections::HashMap;
use std::sync::Arc;

#[cfg(feature = "metrics")]
use crate::metrics::SessionMetrics;

/// Builder for constructing a `WatchSession`.
///
/// Provides a fluent interface over [`WatchSettings`] plus the runtime pieces
/// that cannot come from a settings file: the watch feed and, optionally,
/// explicit environment and argument sources.
///
/// # Examples
///
/// ```rust
/// use kvwatch_config::prelude::*;
/// use kvwatch_config::sources::ChannelFeed;
///
/// # fn example() -> Result<()> {
/// let (feed, _sender) = ChannelFeed::new();
/// let session = WatchSession::builder()
///     .with_prefix("cfg/app/")
///     .with_required_keys(["foo", "bar"])
///     .with_env_prefix("APP")
///     .on_missing_keys_at_startup("exit")
///     .on_missing_keys_on_update("lastGoodValue")
///     .with_feed(feed)
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct WatchSessionBuilder {
    settings: WatchSettings,
    env_vars: Option<HashMap<String, String>>,
    args: Option<Vec<String>>,
    feed: Option<Arc<dyn WatchFeed>>,
    #[cfg(feature = "metrics")]
    metrics: Option<SessionMetrics>,
}

impl WatchSessionBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self {
            settings: WatchSettings::default(),
            env_vars: None,
            args: None,
            feed: None,
            #[cfg(feature = "metrics")]
            metrics: None,
        }
    }

    /// Start from previously loaded settings.
    pub fn with_settings(mut self, settings: WatchSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Set the namespace root to watch. Required.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.settings.namespace_prefix = prefix.into();
        self
    }

    /// Keys every accepted snapshot must contain.
    pub fn with_required_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.settings.required_keys = keys.into_iter().map(Into::into).collect();
        self
    }

    /// Enable environment overrides for variables named `<prefix>_<KEY>`.
    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.settings.env_prefix = Some(prefix.into());
        self
    }

    /// Read overrides from `vars` instead of the process environment.
    ///
    /// Only takes effect together with an env prefix.
    pub fn with_env_vars(mut self, vars: HashMap<String, String>) -> Self {
        self.env_vars = Some(vars);
        self
    }

    /// Read overrides from `tokens` instead of the process arguments.
    pub fn with_args<I, S>(mut self, tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = Some(tokens.into_iter().map(Into::into).collect());
        self
    }

    /// Policy for missing keys on the first observation.
    pub fn on_missing_keys_at_startup(mut self, policy: impl Into<MissingKeyPolicy>) -> Self {
        self.settings.on_missing_keys_at_startup = policy.into();
        self
    }

    /// Policy for missing keys on every later observation.
    pub fn on_missing_keys_on_update(mut self, policy: impl Into<MissingKeyPolicy>) -> Self {
        self.settings.on_missing_keys_on_update = policy.into();
        self
    }

    /// Seed every snapshot with these values; any source overrides them.
    pub fn with_default_values<I, K, V>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.settings.default_values = values
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        self
    }

    /// Stop logging reports. Error subscribers still receive them.
    pub fn suppress_errors(mut self, suppress: bool) -> Self {
        self.settings.suppress_errors = suppress;
        self
    }

    /// Watch this feed.
    pub fn with_feed<F: WatchFeed + 'static>(mut self, feed: F) -> Self {
        self.feed = Some(Arc::new(feed));
        self
    }

    /// Watch a feed shared with other owners.
    pub fn with_shared_feed(mut self, feed: Arc<dyn WatchFeed>) -> Self {
        self.feed = Some(feed);
        self
    }

    /// Record session metrics with the provided meter.
    #[cfg(feature = "metrics")]
    pub fn with_metrics(mut self, meter: opentelemetry::metrics::Meter) -> Self {
        self.metrics = Some(SessionMetrics::new(meter));
        self
    }

    /// Build the session.
    ///
    /// The session is returned stopped; call [`WatchSession::start`].
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - No namespace prefix is set
    /// - No watch feed is set
    pub fn build(self) -> Result<WatchSession> {
        self.settings.validate()?;

        let feed = self
            .feed
            .ok_or_else(|| ConfigError::InvalidConfig("No watch feed configured".to_string()))?;

        let env = match (&self.settings.env_prefix, self.env_vars) {
            (Some(prefix), Some(vars)) => EnvSource::from_vars(prefix.clone(), vars),
            (Some(prefix), None) => EnvSource::from_process(prefix.clone()),
            (None, _) => EnvSource::empty(),
        };

        let args = match self.args {
            Some(tokens) => ArgsSource::from_tokens(tokens),
            None => ArgsSource::from_process(),
        };

        let defaults: Snapshot = self.settings.default_values.clone().into();
        let loader = SnapshotLoader::new(self.settings.namespace_prefix.clone())
            .with_defaults(defaults)
            .with_env(env)
            .with_args(args);

        let required = RequiredKeySet::new(self.settings.required_keys.iter().cloned());

        Ok(WatchSession::from_parts(SessionParts {
            settings: self.settings,
            loader,
            required,
            feed,
            #[cfg(feature = "metrics")]
            metrics: self.metrics,
        }))
    }
}

impl Default for WatchSessionBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl WatchSession {
    /// Create a new builder for constructing a watch session.
    pub fn builder() -> WatchSessionBuilder {
        WatchSessionBuilder::new()
    }
}
