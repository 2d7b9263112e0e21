//! Consul KV watch feed using blocking queries.

use super::{EnvSource, FeedEvent, Observation, RawEntry, WatchFeed, WatchRequest};
use crate::error::{ConfigError, Result};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::{Client, StatusCode};
use std::time::Duration;
use tokio::sync::mpsc;

/// Environment variable holding the agent address, e.g. `https://consul:8500`.
pub const CONSUL_HTTP_ADDR: &str = "CONSUL_HTTP_ADDR";

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 8500;
const FEED_CAPACITY: usize = 16;
const INITIAL_BACKOFF: Duration = Duration::from_millis(500);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Where and how to reach the Consul agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsulClientConfig {
    /// Agent host name.
    pub host: String,
    /// Agent HTTP port.
    pub port: u16,
    /// Use `https`.
    pub secure: bool,
    /// ACL token sent as `X-Consul-Token`.
    pub token: Option<String>,
}

impl Default for ConsulClientConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            secure: false,
            token: None,
        }
    }
}

impl ConsulClientConfig {
    /// Defaults overridden by `CONSUL_HTTP_ADDR` from `env`, if set.
    ///
    /// # Errors
    ///
    /// Returns an error if the address carries a port that is not a number.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use kvwatch_config::sources::{ConsulClientConfig, EnvSource};
    /// use std::collections::HashMap;
    ///
    /// let vars = HashMap::from([(
    ///     "CONSUL_HTTP_ADDR".to_string(),
    ///     "https://consul.internal:8501".to_string(),
    /// )]);
    /// let config = ConsulClientConfig::from_env(&EnvSource::from_vars("APP", vars)).unwrap();
    /// assert!(config.secure);
    /// assert_eq!(config.port, 8501);
    /// ```
    pub fn from_env(env: &EnvSource) -> Result<Self> {
        let mut config = Self::default();
        if let Some(addr) = env.var(CONSUL_HTTP_ADDR) {
            config.apply_http_addr(addr)?;
        }
        Ok(config)
    }

    /// Like [`ConsulClientConfig::from_env`], reading the process environment.
    ///
    /// # Errors
    ///
    /// See [`ConsulClientConfig::from_env`].
    pub fn from_process_env() -> Result<Self> {
        match std::env::var(CONSUL_HTTP_ADDR) {
            Ok(addr) => {
                let mut config = Self::default();
                config.apply_http_addr(&addr)?;
                Ok(config)
            }
            Err(_) => Ok(Self::default()),
        }
    }

    /// Override scheme, host and port from an address like `http://host:port`.
    ///
    /// Parts absent from `addr` keep their current value.
    ///
    /// # Errors
    ///
    /// Returns an error if the port is not a number.
    pub fn apply_http_addr(&mut self, addr: &str) -> Result<()> {
        self.secure = addr.starts_with("https");
        let rest = addr
            .strip_prefix("https://")
            .or_else(|| addr.strip_prefix("http://"))
            .unwrap_or(addr);

        let (host, port) = match rest.split_once(':') {
            Some((host, port)) => (host, Some(port)),
            None => (rest, None),
        };

        if !host.is_empty() {
            self.host = host.to_string();
        }
        if let Some(port) = port.filter(|p| !p.is_empty()) {
            self.port = port.parse().map_err(|_| {
                ConfigError::InvalidConfig(format!("Invalid port in {}: {}", CONSUL_HTTP_ADDR, port))
            })?;
        }
        Ok(())
    }

    /// Set the ACL token.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Base URL of the agent's HTTP API.
    pub fn base_url(&self) -> String {
        let scheme = if self.secure { "https" } else { "http" };
        format!("{}://{}:{}", scheme, self.host, self.port)
    }
}

/// One entry of a `/v1/kv` response.
#[derive(Debug, serde::Deserialize)]
struct KvPair {
    #[serde(rename = "Key")]
    key: String,
    #[serde(rename = "Value")]
    value: Option<String>,
}

/// Watch feed backed by Consul KV blocking queries.
///
/// Each subscription spawns a task on the current tokio runtime that long-polls
/// `GET /v1/kv/<prefix>?recurse=true&index=<n>` and emits an observation
/// whenever the index moves. Connection failures are reported as
/// [`FeedEvent::Error`] and retried with exponential backoff. The task ends
/// when the receiver is dropped.
///
/// # Examples
///
/// ```rust,no_run
/// use kvwatch_config::prelude::*;
/// use kvwatch_config::sources::{ConsulClientConfig, ConsulKvFeed};
///
/// # fn example() -> Result<()> {
/// let feed = ConsulKvFeed::new(ConsulClientConfig::from_process_env()?)?;
/// let session = WatchSession::builder()
///     .with_prefix("cfg/app/")
///     .with_feed(feed)
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct ConsulKvFeed {
    config: ConsulClientConfig,
    client: Client,
    wait: Duration,
}

impl ConsulKvFeed {
    /// Create a feed with a five minute blocking-query wait.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(config: ConsulClientConfig) -> Result<Self> {
        Self::with_wait(config, Duration::from_secs(300))
    }

    /// Create a feed with a custom blocking-query wait.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn with_wait(config: ConsulClientConfig, wait: Duration) -> Result<Self> {
        // Consul may add up to wait/16 of jitter before answering.
        let timeout = wait + wait / 16 + Duration::from_secs(10);
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ConfigError::LoadError(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            config,
            client,
            wait,
        })
    }

    /// The agent this feed talks to.
    pub fn config(&self) -> &ConsulClientConfig {
        &self.config
    }
}

impl WatchFeed for ConsulKvFeed {
    fn subscribe(&self, request: WatchRequest) -> Result<mpsc::Receiver<FeedEvent>> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|e| {
            ConfigError::TransportError(format!("Consul feed requires a tokio runtime: {}", e))
        })?;

        let (tx, rx) = mpsc::channel(FEED_CAPACITY);
        let poller = KvPoller {
            client: self.client.clone(),
            url: kv_url(&self.config.base_url(), &request),
            token: self.config.token.clone(),
            wait: self.wait,
        };
        runtime.spawn(async move {
            tokio::select! {
                _ = tx.closed() => {}
                _ = poller.run(&tx) => {}
            }
        });

        Ok(rx)
    }

    fn name(&self) -> String {
        format!("consul:{}", self.config.base_url())
    }
}

fn kv_url(base_url: &str, request: &WatchRequest) -> String {
    let key = request.namespace_key.trim_start_matches('/');
    if request.recurse {
        format!("{}/v1/kv/{}?recurse=true", base_url, key)
    } else {
        format!("{}/v1/kv/{}", base_url, key)
    }
}

struct KvPoller {
    client: Client,
    url: String,
    token: Option<String>,
    wait: Duration,
}

enum Poll {
    Changed(Observation, u64),
    Unchanged(u64),
    Failed(Observation),
}

impl KvPoller {
    async fn run(&self, tx: &mpsc::Sender<FeedEvent>) {
        let mut index = 0u64;
        let mut backoff = INITIAL_BACKOFF;

        loop {
            let event = match self.poll(index).await {
                Ok(Poll::Unchanged(next)) => {
                    index = next;
                    backoff = INITIAL_BACKOFF;
                    continue;
                }
                Ok(Poll::Changed(observation, next)) => {
                    index = next;
                    backoff = INITIAL_BACKOFF;
                    FeedEvent::Observation(observation)
                }
                Ok(Poll::Failed(observation)) => {
                    index = 0;
                    FeedEvent::Observation(observation)
                }
                Err(message) => {
                    index = 0;
                    FeedEvent::Error(message)
                }
            };

            let failed = !matches!(&event, FeedEvent::Observation(o) if o.status.is_success());
            if tx.send(event).await.is_err() {
                return;
            }

            if failed {
                tracing::debug!(backoff_ms = backoff.as_millis() as u64, "consul watch backing off");
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(MAX_BACKOFF);
            }
        }
    }

    async fn poll(&self, index: u64) -> std::result::Result<Poll, String> {
        let separator = if self.url.contains('?') { '&' } else { '?' };
        let url = format!(
            "{}{}index={}&wait={}s",
            self.url,
            separator,
            index,
            self.wait.as_secs()
        );

        let mut request = self.client.get(&url);
        if let Some(token) = &self.token {
            request = request.header("X-Consul-Token", token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| format!("Consul request failed: {}", e))?;

        let status = response.status();
        let next_index = response
            .headers()
            .get("X-Consul-Index")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(0);

        // An index going backwards means the agent's state was reset.
        let next_index = if next_index < index { 0 } else { next_index };

        if status != StatusCode::OK {
            return Ok(Poll::Failed(failed_observation(status)));
        }

        let pairs: Vec<KvPair> = response
            .json()
            .await
            .map_err(|e| format!("Failed to parse Consul response: {}", e))?;

        Ok(changed_or_not(Observation::ok(decode_pairs(pairs)), index, next_index))
    }
}

/// Every status but 200 is a failed observation, 404 included: Consul answers
/// 404 for a prefix that is missing or hidden by the token's ACL.
fn failed_observation(status: StatusCode) -> Observation {
    Observation::failed(status.as_u16(), status.canonical_reason().unwrap_or("Unknown"))
}

fn changed_or_not(observation: Observation, index: u64, next_index: u64) -> Poll {
    if index != 0 && next_index == index {
        Poll::Unchanged(next_index)
    } else {
        Poll::Changed(observation, next_index)
    }
}

fn decode_pairs(pairs: Vec<KvPair>) -> Vec<RawEntry> {
    pairs
        .into_iter()
        .map(|pair| match pair.value {
            Some(encoded) => match STANDARD.decode(encoded.as_bytes()) {
                Ok(bytes) => RawEntry::new(pair.key, String::from_utf8_lossy(&bytes)),
                Err(e) => {
                    tracing::warn!(key = %pair.key, error = %e, "skipping undecodable Consul value");
                    RawEntry::directory(pair.key)
                }
            },
            None => RawEntry::directory(pair.key),
        })
        .collect()
}
