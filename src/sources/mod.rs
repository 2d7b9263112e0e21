//! Inputs to a watch session: the remote feed and local overrides.

mod args;
mod env;
mod feed;

#[cfg(feature = "consul")]
mod consul;

pub use args::ArgsSource;
pub use env::EnvSource;
pub use feed::{
    ChannelFeed, FeedEvent, FeedSender, Observation, RawEntry, StatusInfo, WatchFeed,
    WatchRequest,
};

#[cfg(feature = "consul")]
pub use consul::{CONSUL_HTTP_ADDR, ConsulClientConfig, ConsulKvFeed};
