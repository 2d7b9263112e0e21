//! Snapshot assembly, change detection, and missing-key policy.

mod builder;
mod diff;
mod merge;
mod normalize;
mod policy;
pub(crate) mod session;
mod settings;
mod snapshot;

pub use builder::WatchSessionBuilder;
pub use diff::changed_keys;
pub use merge::{SnapshotLoader, merge_args, merge_env, merge_remote};
pub use normalize::normalize_key;
pub use policy::{
    MissingKeyPolicy, PolicyDecision, PolicyOutcome, PolicyStage, RequiredKeySet, evaluate_policy,
};
pub use session::{ObservationOutcome, SessionState, WatchSession};
pub use settings::{SETTINGS_ENV_PREFIX, WatchSettings};
pub use snapshot::Snapshot;
