//! Subscriber-based notifications for snapshot changes.

use crate::core::Snapshot;
use crate::error::ErrorInfo;
use parking_lot::RwLock;
use std::sync::Arc;

/// Metadata delivered with every `update` notification.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateMetadata {
    /// Keys that were added, removed, or changed since the last-good snapshot.
    pub changed_keys: Vec<String>,
    /// Whether this is the first observation delivered by the session.
    pub initial_load: bool,
}

type ReadyCallback = Arc<dyn Fn(&Snapshot) + Send + Sync>;
type UpdateCallback = Arc<dyn Fn(&Snapshot, &UpdateMetadata) + Send + Sync>;
type ErrorCallback = Arc<dyn Fn(&ErrorInfo) + Send + Sync>;
type CountObserver = Arc<dyn Fn(usize) + Send + Sync>;

/// Handle for a subscription that can be dropped to unsubscribe.
///
/// When the handle is dropped, the subscription is removed immediately.
pub struct SubscriptionHandle {
    id: usize,
    registry: Arc<RwLock<SubscriberRegistryInner>>,
}

impl SubscriptionHandle {
    /// Keep the subscription for the lifetime of the registry.
    pub fn detach(self) {
        std::mem::forget(self);
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        let id = self.id;
        let (count, observer) = {
            let mut inner = self.registry.write();
            inner.ready.retain(|(sub_id, _)| *sub_id != id);
            inner.update.retain(|(sub_id, _)| *sub_id != id);
            inner.error.retain(|(sub_id, _)| *sub_id != id);
            (inner.count(), inner.count_observer.clone())
        };
        if let Some(observer) = observer {
            observer(count);
        }
    }
}

/// Internal subscriber registry state.
#[derive(Default)]
struct SubscriberRegistryInner {
    ready: Vec<(usize, ReadyCallback)>,
    update: Vec<(usize, UpdateCallback)>,
    error: Vec<(usize, ErrorCallback)>,
    next_id: usize,
    count_observer: Option<CountObserver>,
}

impl SubscriberRegistryInner {
    fn next_id(&mut self) -> usize {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn count(&self) -> usize {
        self.ready.len() + self.update.len() + self.error.len()
    }
}

/// Registry for managing session subscribers.
///
/// Callbacks run synchronously on the notifying thread, in subscription
/// order. The registry lock is released before any callback runs, so a
/// callback may subscribe or drop handles.
///
/// # Examples
///
/// ```rust
/// use kvwatch_config::core::Snapshot;
/// use kvwatch_config::notify::{SubscriberRegistry, UpdateMetadata};
///
/// let registry = SubscriberRegistry::new();
///
/// let handle = registry.on_update(|snapshot, meta| {
///     println!("{} keys changed, {} total", meta.changed_keys.len(), snapshot.len());
/// });
///
/// let meta = UpdateMetadata { changed_keys: vec![], initial_load: true };
/// registry.notify_update(&Snapshot::new(), &meta);
///
/// // Unsubscribe by dropping the handle
/// drop(handle);
/// ```
pub struct SubscriberRegistry {
    inner: Arc<RwLock<SubscriberRegistryInner>>,
}

impl SubscriberRegistry {
    /// Create a new subscriber registry.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(SubscriberRegistryInner::default())),
        }
    }

    /// Subscribe to the one-time `ready` notification.
    pub fn on_ready<F>(&self, callback: F) -> SubscriptionHandle
    where
        F: Fn(&Snapshot) + Send + Sync + 'static,
    {
        let id = {
            let mut inner = self.inner.write();
            let id = inner.next_id();
            inner.ready.push((id, Arc::new(callback)));
            id
        };
        self.handle(id)
    }

    /// Subscribe to `update` notifications.
    pub fn on_update<F>(&self, callback: F) -> SubscriptionHandle
    where
        F: Fn(&Snapshot, &UpdateMetadata) + Send + Sync + 'static,
    {
        let id = {
            let mut inner = self.inner.write();
            let id = inner.next_id();
            inner.update.push((id, Arc::new(callback)));
            id
        };
        self.handle(id)
    }

    /// Subscribe to `error` notifications.
    pub fn on_error<F>(&self, callback: F) -> SubscriptionHandle
    where
        F: Fn(&ErrorInfo) + Send + Sync + 'static,
    {
        let id = {
            let mut inner = self.inner.write();
            let id = inner.next_id();
            inner.error.push((id, Arc::new(callback)));
            id
        };
        self.handle(id)
    }

    fn handle(&self, id: usize) -> SubscriptionHandle {
        self.report_count();
        SubscriptionHandle {
            id,
            registry: Arc::clone(&self.inner),
        }
    }

    /// Call `observer` with the subscriber count after every subscribe and
    /// unsubscribe, and once now.
    ///
    /// Replaces any previous observer.
    pub fn observe_count<F>(&self, observer: F)
    where
        F: Fn(usize) + Send + Sync + 'static,
    {
        self.inner.write().count_observer = Some(Arc::new(observer));
        self.report_count();
    }

    fn report_count(&self) {
        let (count, observer) = {
            let inner = self.inner.read();
            (inner.count(), inner.count_observer.clone())
        };
        if let Some(observer) = observer {
            observer(count);
        }
    }

    /// Notify every `ready` subscriber.
    pub fn notify_ready(&self, snapshot: &Snapshot) {
        let callbacks: Vec<_> = self.inner.read().ready.iter().map(|(_, cb)| Arc::clone(cb)).collect();
        for callback in callbacks {
            callback(snapshot);
        }
    }

    /// Notify every `update` subscriber.
    pub fn notify_update(&self, snapshot: &Snapshot, metadata: &UpdateMetadata) {
        let callbacks: Vec<_> = self.inner.read().update.iter().map(|(_, cb)| Arc::clone(cb)).collect();
        for callback in callbacks {
            callback(snapshot, metadata);
        }
    }

    /// Notify every `error` subscriber.
    pub fn notify_error(&self, error: &ErrorInfo) {
        let callbacks: Vec<_> = self.inner.read().error.iter().map(|(_, cb)| Arc::clone(cb)).collect();
        for callback in callbacks {
            callback(error);
        }
    }

    /// Get the number of active subscribers across all channels.
    pub fn subscriber_count(&self) -> usize {
        self.inner.read().count()
    }
}

impl Default for SubscriberRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for SubscriberRegistry {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}
