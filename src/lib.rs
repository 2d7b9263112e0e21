//! # kvwatch-config
//!
//! Watch a key/value namespace on a coordination service, layer defaults,
//! environment and command-line overrides on top, and notify subscribers when
//! the effective configuration changes.
//!
//! ## Overview
//!
//! For every observation of the watched namespace a [`WatchSession`](core::WatchSession):
//! - Builds a snapshot with precedence defaults < remote < environment < arguments
//! - Normalizes keys to lowerCamelCase once, on ingestion
//! - Diffs the snapshot against the last-good baseline
//! - Applies the missing-key policy for the current stage (startup or update)
//! - Fires `ready` once, then `update` with the changed keys
//!
//! Fatal conditions are returned as [`ConfigError`](error::ConfigError) values;
//! the library never exits the process.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use kvwatch_config::prelude::*;
//! use kvwatch_config::sources::ChannelFeed;
//!
//! # async fn example() -> Result<()> {
//! let (feed, _sender) = ChannelFeed::new();
//! let session = WatchSession::builder()
//!     .with_prefix("cfg/app/")
//!     .with_required_keys(["databaseUrl"])
//!     .with_env_prefix("APP")
//!     .on_missing_keys_on_update("lastGoodValue")
//!     .with_feed(feed)
//!     .build()?;
//!
//! let _updates = session.on_update(|snapshot, meta| {
//!     println!("{:?} changed, now {} keys", meta.changed_keys, snapshot.len());
//! });
//!
//! session.start()?;
//! session.wait_ready().await?;
//!
//! // Lock-free read of the latest snapshot
//! let url = session.get().get("databaseUrl").map(str::to_owned);
//! # Ok(())
//! # }
//! ```
//!
//! ## Feature Flags
//!
//! - `yaml`, `toml`, `json` (default): settings file formats
//! - `consul`: [`ConsulKvFeed`](sources::ConsulKvFeed), a blocking-query feed for Consul KV
//! - `metrics`: OpenTelemetry session metrics

#![warn(missing_docs, rust_2024_compatibility)]
#![deny(unsafe_code)]

pub mod core;
pub mod error;
pub mod notify;
pub mod sources;

#[cfg(feature = "metrics")]
pub mod metrics;

/// Convenient re-exports for common usage patterns.
pub mod prelude {
    pub use crate::core::{
        MissingKeyPolicy, Snapshot, WatchSession, WatchSessionBuilder, WatchSettings,
    };
    pub use crate::error::{ConfigError, ErrorInfo, Result};
    pub use crate::notify::UpdateMetadata;
}
