//! Built-in metrics for watch sessions.
//!
//! Provides OpenTelemetry metrics tracking:
//! - Observations received and their outcome
//! - Processing duration
//! - Feed errors
//! - Snapshot age
//! - Active subscribers
//!
//! # Examples
//!
//! ```rust,no_run
//! use kvwatch_config::prelude::*;
//! use kvwatch_config::sources::ChannelFeed;
//! use opentelemetry::global;
//!
//! # fn example() -> Result<()> {
//! let meter = global::meter("my-app");
//! let (feed, _sender) = ChannelFeed::new();
//!
//! let session = WatchSession::builder()
//!     .with_prefix("cfg/app/")
//!     .with_feed(feed)
//!     .with_metrics(meter)
//!     .build()?;
//! # Ok(())
//! # }
//! ```

mod session_metrics;

pub use session_metrics::SessionMetrics;
