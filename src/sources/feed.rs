//! Watch feed abstraction consumed by the session.

use crate::error::{ConfigError, Result};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;

/// One key/value pair as delivered by the watch feed.
///
/// A missing value marks a directory node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEntry {
    /// Hierarchical key, still carrying the namespace prefix.
    pub key: String,
    /// Opaque payload, decoded to text.
    pub value: Option<String>,
}

impl RawEntry {
    /// A leaf entry.
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: Some(value.into()),
        }
    }

    /// A directory node with no value.
    pub fn directory(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: None,
        }
    }
}

/// Status attached to every observation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusInfo {
    /// HTTP-style status code.
    pub code: u16,
    /// Status message.
    pub message: String,
}

impl StatusInfo {
    /// A `200 OK` status.
    pub fn ok() -> Self {
        Self {
            code: 200,
            message: "OK".to_string(),
        }
    }

    /// Any other status.
    pub fn new(code: u16, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Whether the observation can be processed.
    pub fn is_success(&self) -> bool {
        self.code == 200
    }
}

/// A complete read of the watched namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observation {
    /// Every entry under the namespace, in feed order.
    pub entries: Vec<RawEntry>,
    /// Status reported alongside the entries.
    pub status: StatusInfo,
}

impl Observation {
    /// A successful observation.
    pub fn ok(entries: Vec<RawEntry>) -> Self {
        Self {
            entries,
            status: StatusInfo::ok(),
        }
    }

    /// An observation that failed with `code`.
    pub fn failed(code: u16, message: impl Into<String>) -> Self {
        Self {
            entries: Vec::new(),
            status: StatusInfo::new(code, message),
        }
    }
}

/// Events yielded by a feed subscription.
#[derive(Debug, Clone)]
pub enum FeedEvent {
    /// The namespace was (re)read.
    Observation(Observation),
    /// A transport-level failure; the feed keeps retrying on its own.
    Error(String),
}

/// What to watch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchRequest {
    /// Namespace root key.
    pub namespace_key: String,
    /// Recurse into every descendant.
    pub recurse: bool,
}

/// A source of namespace observations.
///
/// Implementations own their polling and retry loop. Dropping the returned
/// receiver ends the subscription.
pub trait WatchFeed: Send + Sync {
    /// Open a subscription.
    ///
    /// # Errors
    ///
    /// Returns an error if the subscription cannot be opened.
    fn subscribe(&self, request: WatchRequest) -> Result<mpsc::Receiver<FeedEvent>>;

    /// Get a human-readable name for this feed (for logging/debugging).
    fn name(&self) -> String;
}

/// In-process feed driven by a [`FeedSender`].
///
/// Useful for embedding the session behind a custom client, and for tests.
/// Each `subscribe` replaces the previous subscription.
///
/// # Examples
///
/// ```rust
/// use kvwatch_config::sources::{ChannelFeed, Observation, RawEntry};
///
/// let (feed, sender) = ChannelFeed::new();
/// // Nothing is subscribed yet, so the event is not delivered.
/// assert!(!sender.send_observation(Observation::ok(vec![RawEntry::new("cfg/a", "1")])));
/// ```
pub struct ChannelFeed {
    slot: Arc<Mutex<Option<mpsc::Sender<FeedEvent>>>>,
    requests: Arc<Mutex<Vec<WatchRequest>>>,
}

/// Producer side of a [`ChannelFeed`].
#[derive(Clone)]
pub struct FeedSender {
    slot: Arc<Mutex<Option<mpsc::Sender<FeedEvent>>>>,
    requests: Arc<Mutex<Vec<WatchRequest>>>,
}

const CHANNEL_FEED_CAPACITY: usize = 64;

impl ChannelFeed {
    /// Create a feed and its producer handle.
    pub fn new() -> (Self, FeedSender) {
        let slot = Arc::new(Mutex::new(None));
        let requests = Arc::new(Mutex::new(Vec::new()));
        (
            Self {
                slot: Arc::clone(&slot),
                requests: Arc::clone(&requests),
            },
            FeedSender { slot, requests },
        )
    }
}

impl WatchFeed for ChannelFeed {
    fn subscribe(&self, request: WatchRequest) -> Result<mpsc::Receiver<FeedEvent>> {
        let (tx, rx) = mpsc::channel(CHANNEL_FEED_CAPACITY);
        *self.slot.lock() = Some(tx);
        self.requests.lock().push(request);
        Ok(rx)
    }

    fn name(&self) -> String {
        "channel".to_string()
    }
}

impl FeedSender {
    /// Deliver an observation. Returns `false` if nobody is subscribed.
    pub fn send_observation(&self, observation: Observation) -> bool {
        self.send(FeedEvent::Observation(observation))
    }

    /// Deliver a transport error. Returns `false` if nobody is subscribed.
    pub fn send_error(&self, message: impl Into<String>) -> bool {
        self.send(FeedEvent::Error(message.into()))
    }

    /// Deliver an event without waiting. Returns `false` if nobody is
    /// subscribed or the subscriber is not keeping up.
    pub fn send(&self, event: FeedEvent) -> bool {
        let slot = self.slot.lock();
        match slot.as_ref() {
            Some(tx) => tx.try_send(event).is_ok(),
            None => false,
        }
    }

    /// Deliver an event, waiting for channel capacity.
    ///
    /// # Errors
    ///
    /// Returns an error if nobody is subscribed.
    pub async fn send_async(&self, event: FeedEvent) -> Result<()> {
        let tx = self.slot.lock().clone();
        let tx = tx.ok_or_else(|| ConfigError::TransportError("no active subscription".to_string()))?;
        tx.send(event)
            .await
            .map_err(|_| ConfigError::TransportError("subscription closed".to_string()))
    }

    /// Whether a subscriber is currently attached.
    pub fn is_subscribed(&self) -> bool {
        self.slot.lock().as_ref().is_some_and(|tx| !tx.is_closed())
    }

    /// Every request the feed has received, oldest first.
    pub fn requests(&self) -> Vec<WatchRequest> {
        self.requests.lock().clone()
    }
}
