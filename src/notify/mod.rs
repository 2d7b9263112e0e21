//! Change notification for watch sessions.
//!
//! Subscribers register typed callbacks for the three channels a session
//! emits on: `ready`, `update`, and `error`.

pub mod subscriber;

pub use subscriber::{SubscriberRegistry, SubscriptionHandle, UpdateMetadata};
