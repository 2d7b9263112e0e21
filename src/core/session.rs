//! The watch session: merge, diff, policy check and notify per observation.

use crate::core::{
    MissingKeyPolicy, PolicyDecision, PolicyStage, RequiredKeySet, Snapshot, SnapshotLoader,
    WatchSettings, changed_keys, evaluate_policy,
};
use crate::error::{ConfigError, ErrorInfo, Result, Severity};
use crate::notify::{SubscriberRegistry, SubscriptionHandle, UpdateMetadata};
use crate::sources::{FeedEvent, Observation, WatchFeed, WatchRequest};
use arc_swap::ArcSwap;
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread::ThreadId;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

#[cfg(feature = "metrics")]
use crate::metrics::SessionMetrics;

/// Lifecycle of a watch session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Not subscribed to the feed.
    Stopped,
    /// Subscribed and processing observations.
    Watching,
    /// Stopped by a fatal error; cannot be restarted.
    Halted,
}

/// What happened to one observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObservationOutcome {
    /// The feed reported a non-success status; nothing changed.
    Dropped,
    /// Required keys were missing under the `skip` policy; nothing was emitted.
    Skipped,
    /// Subscribers were notified.
    Delivered {
        /// Whether this was the first delivery, which also fired `ready`.
        initial_load: bool,
    },
}

#[derive(Debug, Clone)]
enum Readiness {
    Pending,
    Ready,
    Halted(ConfigError),
}

/// State that only the observation path writes.
struct SessionCore {
    initial_load: bool,
}

struct WatchTask {
    shutdown: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

pub(crate) struct SessionParts {
    pub(crate) settings: WatchSettings,
    pub(crate) loader: SnapshotLoader,
    pub(crate) required: RequiredKeySet,
    pub(crate) feed: Arc<dyn WatchFeed>,
    #[cfg(feature = "metrics")]
    pub(crate) metrics: Option<SessionMetrics>,
}

struct SessionInner {
    settings: WatchSettings,
    loader: SnapshotLoader,
    required: RequiredKeySet,
    feed: Arc<dyn WatchFeed>,
    subscribers: SubscriberRegistry,
    /// Held for the whole of one observation, so only one is ever in flight.
    core: Mutex<SessionCore>,
    /// Thread currently inside `process_observation`, to catch re-entry from callbacks.
    processing_on: Mutex<Option<ThreadId>>,
    current: ArcSwap<Snapshot>,
    last_good: ArcSwap<Snapshot>,
    readiness: watch::Sender<Readiness>,
    state: Mutex<SessionState>,
    halt_reason: Mutex<Option<ConfigError>>,
    task: Mutex<Option<WatchTask>>,
    #[cfg(feature = "metrics")]
    metrics: Option<SessionMetrics>,
}

/// A long-running observer of one namespace.
///
/// Every observation from the feed is merged with the defaults, environment
/// and argument overrides, diffed against the last-good snapshot, checked
/// against the required keys, and then delivered to subscribers. `ready` fires
/// once, before the `update` of the first delivered observation.
///
/// Cloning is cheap and every clone controls the same session.
///
/// # Examples
///
/// ```rust,no_run
/// use kvwatch_config::prelude::*;
/// use kvwatch_config::sources::ChannelFeed;
///
/// # async fn example() -> Result<()> {
/// let (feed, _sender) = ChannelFeed::new();
/// let session = WatchSession::builder()
///     .with_prefix("cfg/app/")
///     .with_required_keys(["foo"])
///     .with_feed(feed)
///     .build()?;
///
/// let _handle = session.on_update(|snapshot, meta| {
///     println!("changed: {:?} ({} keys)", meta.changed_keys, snapshot.len());
/// });
///
/// session.start()?;
/// session.wait_ready().await?;
/// println!("foo = {:?}", session.get().get("foo"));
/// session.stop().await;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct WatchSession {
    inner: Arc<SessionInner>,
}

impl WatchSession {
    pub(crate) fn from_parts(parts: SessionParts) -> Self {
        let (readiness, _) = watch::channel(Readiness::Pending);
        let subscribers = SubscriberRegistry::new();

        #[cfg(feature = "metrics")]
        if let Some(metrics) = parts.metrics.clone() {
            subscribers.observe_count(move |count| metrics.update_subscriber_count(count as i64));
        }

        Self {
            inner: Arc::new(SessionInner {
                settings: parts.settings,
                loader: parts.loader,
                required: parts.required,
                feed: parts.feed,
                subscribers,
                core: Mutex::new(SessionCore { initial_load: true }),
                processing_on: Mutex::new(None),
                current: ArcSwap::from_pointee(Snapshot::new()),
                last_good: ArcSwap::from_pointee(Snapshot::new()),
                readiness,
                state: Mutex::new(SessionState::Stopped),
                halt_reason: Mutex::new(None),
                task: Mutex::new(None),
                #[cfg(feature = "metrics")]
                metrics: parts.metrics,
            }),
        }
    }

    /// The settings this session was built from.
    pub fn settings(&self) -> &WatchSettings {
        &self.inner.settings
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        *self.inner.state.lock()
    }

    /// The most recently delivered snapshot.
    ///
    /// Empty until the first delivery. Lock-free.
    pub fn get(&self) -> Arc<Snapshot> {
        self.inner.current.load_full()
    }

    /// The current fallback baseline.
    pub fn last_good(&self) -> Arc<Snapshot> {
        self.inner.last_good.load_full()
    }

    /// Whether `ready` has fired.
    pub fn is_ready(&self) -> bool {
        matches!(*self.inner.readiness.borrow(), Readiness::Ready)
    }

    /// The fatal error that halted the session, if any.
    pub fn halt_reason(&self) -> Option<ConfigError> {
        self.inner.halt_reason.lock().clone()
    }

    /// Wait until `ready` has fired.
    ///
    /// Returns immediately if it already has.
    ///
    /// # Errors
    ///
    /// Returns the fatal error if the session halts before becoming ready.
    pub async fn wait_ready(&self) -> Result<()> {
        let mut rx = self.inner.readiness.subscribe();
        let readiness = rx
            .wait_for(|r| !matches!(r, Readiness::Pending))
            .await
            .map_err(|_| ConfigError::Halted)?;

        match &*readiness {
            Readiness::Halted(err) => Err(err.clone()),
            _ => Ok(()),
        }
    }

    /// Subscribe to the one-time `ready` notification.
    ///
    /// Callbacks run on the thread processing the observation. Calling
    /// [`WatchSession::process_observation`] from one returns
    /// [`ConfigError::ReentrantObservation`].
    pub fn on_ready<F>(&self, callback: F) -> SubscriptionHandle
    where
        F: Fn(&Snapshot) + Send + Sync + 'static,
    {
        self.inner.subscribers.on_ready(callback)
    }

    /// Subscribe to `update` notifications.
    ///
    /// Same threading rules as [`WatchSession::on_ready`].
    pub fn on_update<F>(&self, callback: F) -> SubscriptionHandle
    where
        F: Fn(&Snapshot, &UpdateMetadata) + Send + Sync + 'static,
    {
        self.inner.subscribers.on_update(callback)
    }

    /// Subscribe to `error` notifications.
    ///
    /// Same threading rules as [`WatchSession::on_ready`].
    pub fn on_error<F>(&self, callback: F) -> SubscriptionHandle
    where
        F: Fn(&ErrorInfo) + Send + Sync + 'static,
    {
        self.inner.subscribers.on_error(callback)
    }

    /// Subscribe to the feed and start processing observations.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The session is already watching
    /// - The session halted after a fatal error
    /// - The feed refuses the subscription
    pub fn start(&self) -> Result<()> {
        let mut task = self.inner.task.lock();
        {
            let mut state = self.inner.state.lock();
            match *state {
                SessionState::Halted => return Err(ConfigError::Halted),
                SessionState::Watching => return Err(ConfigError::AlreadyWatching),
                SessionState::Stopped => {}
            }

            let request = WatchRequest {
                namespace_key: self.inner.settings.namespace_prefix.clone(),
                recurse: true,
            };
            let events = self.inner.feed.subscribe(request)?;

            *state = SessionState::Watching;
            let (shutdown, shutdown_rx) = oneshot::channel();
            let handle = tokio::spawn(run_watch_loop(Arc::clone(&self.inner), events, shutdown_rx));
            *task = Some(WatchTask { shutdown, handle });
        }

        tracing::info!(
            namespace = %self.inner.settings.namespace_prefix,
            feed = %self.inner.feed.name(),
            sources = ?self.inner.loader.source_names(),
            "watch session started"
        );
        Ok(())
    }

    /// Close the subscription and stop processing.
    ///
    /// Safe to call at any time. When this returns, no further observation
    /// will be handled; an observation already in flight completes first.
    pub async fn stop(&self) {
        let task = self.inner.task.lock().take();

        if let Some(task) = task {
            let _ = task.shutdown.send(());
            if let Err(e) = task.handle.await {
                if e.is_panic() {
                    tracing::error!(error = %e, "watch loop panicked");
                }
            }
        }

        let mut state = self.inner.state.lock();
        if *state == SessionState::Watching {
            *state = SessionState::Stopped;
            tracing::info!(namespace = %self.inner.settings.namespace_prefix, "watch session stopped");
        }
    }

    /// Process one observation synchronously.
    ///
    /// This is what the watch loop calls for each feed event. It is public so
    /// callers driving their own feed loop can use the session directly.
    ///
    /// # Errors
    ///
    /// Returns a fatal error (see [`ConfigError::is_fatal`]) when the
    /// missing-key policy rejects the observation. The session is halted
    /// and every later call returns [`ConfigError::Halted`].
    ///
    /// Returns [`ConfigError::ReentrantObservation`] when called from one of
    /// this session's subscriber callbacks.
    pub fn process_observation(&self, observation: Observation) -> Result<ObservationOutcome> {
        self.inner.process_observation(observation)
    }

    /// Report a transport-level feed failure.
    pub fn handle_feed_error(&self, message: &str) {
        self.inner.handle_feed_error(message);
    }
}

impl SessionInner {
    fn process_observation(&self, observation: Observation) -> Result<ObservationOutcome> {
        let thread = std::thread::current().id();
        if *self.processing_on.lock() == Some(thread) {
            return Err(ConfigError::ReentrantObservation);
        }

        let mut core = self.core.lock();
        let _processing = ProcessingMark::new(&self.processing_on, thread);

        if *self.state.lock() == SessionState::Halted {
            return Err(ConfigError::Halted);
        }

        if !observation.status.is_success() {
            #[cfg(feature = "metrics")]
            if let Some(metrics) = &self.metrics {
                metrics.record_dropped();
            }
            let err = ConfigError::TransportStatus {
                code: observation.status.code,
                message: observation.status.message,
                namespace: self.settings.namespace_prefix.clone(),
            };
            self.report(&ErrorInfo::from(&err));
            return Ok(ObservationOutcome::Dropped);
        }

        #[cfg(feature = "metrics")]
        let timer = self.metrics.as_ref().map(|m| m.start_observation());

        let last_good = self.last_good.load_full();
        let mut snapshot = self.loader.load(&observation.entries);
        let changed = changed_keys(&last_good, &snapshot);

        let stage = if core.initial_load {
            PolicyStage::StartUp
        } else {
            PolicyStage::Update
        };
        let outcome = evaluate_policy(
            &mut snapshot,
            &self.required,
            &last_good,
            self.policy_for(stage),
            stage,
        );

        tracing::debug!(
            keys = snapshot.len(),
            changed = changed.len(),
            decision = ?outcome.decision,
            "processed observation"
        );

        for report in &outcome.reports {
            self.report(report);
        }

        let decision = match outcome.decision {
            PolicyDecision::Fatal(err) => {
                #[cfg(feature = "metrics")]
                if let (Some(metrics), Some(timer)) = (&self.metrics, timer) {
                    metrics.record_fatal(timer);
                }
                self.halt(&err);
                return Err(err);
            }
            PolicyDecision::SkipEmit(_) => {
                #[cfg(feature = "metrics")]
                if let (Some(metrics), Some(timer)) = (&self.metrics, timer) {
                    metrics.record_skipped(timer);
                }
                return Ok(ObservationOutcome::Skipped);
            }
            decision => decision,
        };

        let snapshot = Arc::new(snapshot);
        if decision.replaces_last_good() {
            self.last_good.store(Arc::clone(&snapshot));
        }
        self.current.store(Arc::clone(&snapshot));

        let initial_load = core.initial_load;
        core.initial_load = false;

        if initial_load {
            tracing::info!(keys = snapshot.len(), "watch session ready");
            self.readiness.send_replace(Readiness::Ready);
            self.subscribers.notify_ready(&snapshot);
        }

        let metadata = UpdateMetadata {
            changed_keys: changed,
            initial_load,
        };
        self.subscribers.notify_update(&snapshot, &metadata);

        #[cfg(feature = "metrics")]
        if let (Some(metrics), Some(timer)) = (&self.metrics, timer) {
            metrics.record_delivered(timer);
        }

        Ok(ObservationOutcome::Delivered { initial_load })
    }

    fn handle_feed_error(&self, message: &str) {
        #[cfg(feature = "metrics")]
        if let Some(metrics) = &self.metrics {
            metrics.record_feed_error();
        }
        let err = ConfigError::TransportError(message.to_string());
        self.report(&ErrorInfo::from(&err));
    }

    fn policy_for(&self, stage: PolicyStage) -> &MissingKeyPolicy {
        match stage {
            PolicyStage::StartUp => &self.settings.on_missing_keys_at_startup,
            PolicyStage::Update => &self.settings.on_missing_keys_on_update,
        }
    }

    fn report(&self, info: &ErrorInfo) {
        if !self.settings.suppress_errors {
            match info.severity {
                Severity::Warn => tracing::warn!(code = %info.code, "{}", info.message),
                Severity::Fatal => tracing::error!(code = %info.code, "{}", info.message),
            }
        }
        self.subscribers.notify_error(info);
    }

    fn halt(&self, err: &ConfigError) {
        *self.state.lock() = SessionState::Halted;
        *self.halt_reason.lock() = Some(err.clone());
        self.readiness.send_if_modified(|readiness| {
            if matches!(readiness, Readiness::Pending) {
                *readiness = Readiness::Halted(err.clone());
                true
            } else {
                false
            }
        });
    }
}

/// Records the processing thread for as long as it lives.
struct ProcessingMark<'a> {
    slot: &'a Mutex<Option<ThreadId>>,
}

impl<'a> ProcessingMark<'a> {
    fn new(slot: &'a Mutex<Option<ThreadId>>, thread: ThreadId) -> Self {
        *slot.lock() = Some(thread);
        Self { slot }
    }
}

impl Drop for ProcessingMark<'_> {
    fn drop(&mut self) {
        *self.slot.lock() = None;
    }
}

async fn run_watch_loop(
    inner: Arc<SessionInner>,
    mut events: mpsc::Receiver<FeedEvent>,
    mut shutdown: oneshot::Receiver<()>,
) {
    loop {
        tokio::select! {
            biased;
            _ = &mut shutdown => break,
            event = events.recv() => match event {
                Some(FeedEvent::Observation(observation)) => {
                    if let Err(err) = inner.process_observation(observation) {
                        tracing::error!(error = %err, "watch session halted");
                        break;
                    }
                }
                Some(FeedEvent::Error(message)) => inner.handle_feed_error(&message),
                None => {
                    tracing::debug!("watch feed closed");
                    let mut state = inner.state.lock();
                    if *state == SessionState::Watching {
                        *state = SessionState::Stopped;
                    }
                    break;
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use crate::sources::{ChannelFeed, RawEntry};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn session(startup: &str, update: &str) -> WatchSession {
        let (feed, _sender) = ChannelFeed::new();
        WatchSession::builder()
            .with_prefix("cfg/")
            .with_required_keys(["foo"])
            .on_missing_keys_at_startup(startup)
            .on_missing_keys_on_update(update)
            .with_args(Vec::<String>::new())
            .with_feed(feed)
            .build()
            .unwrap()
    }

    fn observation(pairs: &[(&str, &str)]) -> Observation {
        Observation::ok(pairs.iter().map(|(k, v)| RawEntry::new(*k, *v)).collect())
    }

    #[test]
    fn test_create_and_read() {
        let session = session("exit", "exit");
        assert_eq!(session.state(), SessionState::Stopped);
        assert!(session.get().is_empty());
        assert!(!session.is_ready());
    }

    #[test]
    fn test_first_delivery_is_initial_load() {
        let session = session("exit", "exit");
        let outcome = session.process_observation(observation(&[("cfg/foo", "1")])).unwrap();
        assert_eq!(outcome, ObservationOutcome::Delivered { initial_load: true });
        assert!(session.is_ready());

        let outcome = session.process_observation(observation(&[("cfg/foo", "2")])).unwrap();
        assert_eq!(outcome, ObservationOutcome::Delivered { initial_load: false });
        assert_eq!(session.get().get("foo"), Some("2"));
        assert_eq!(session.last_good().get("foo"), Some("2"));
    }

    #[test]
    fn test_non_success_status_dropped() {
        let session = session("exit", "exit");
        let errors = Arc::new(AtomicUsize::new(0));
        let errors_clone = Arc::clone(&errors);
        let _handle = session.on_error(move |info| {
            assert_eq!(info.code, ErrorCode::NonHttp200);
            assert!(info.message.ends_with("unauthorized prefix: cfg/"));
            errors_clone.fetch_add(1, Ordering::SeqCst);
        });

        let outcome = session.process_observation(Observation::failed(403, "Forbidden")).unwrap();
        assert_eq!(outcome, ObservationOutcome::Dropped);
        assert_eq!(errors.load(Ordering::SeqCst), 1);
        assert!(!session.is_ready());
        assert!(session.last_good().is_empty());
    }

    #[test]
    fn test_fatal_halts_session() {
        let session = session("exit", "exit");
        let err = session.process_observation(observation(&[])).unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(session.state(), SessionState::Halted);
        assert_eq!(session.halt_reason(), Some(err));

        let again = session.process_observation(observation(&[("cfg/foo", "1")]));
        assert_eq!(again, Err(ConfigError::Halted));
        assert!(session.start().is_err());
    }

    #[test]
    fn test_skip_does_not_consume_startup() {
        let session = session("skip", "exit");
        let outcome = session.process_observation(observation(&[])).unwrap();
        assert_eq!(outcome, ObservationOutcome::Skipped);
        assert!(!session.is_ready());

        let outcome = session.process_observation(observation(&[("cfg/foo", "1")])).unwrap();
        assert_eq!(outcome, ObservationOutcome::Delivered { initial_load: true });
    }

    #[test]
    fn test_feed_error_reported() {
        let session = session("exit", "exit");
        let errors = Arc::new(AtomicUsize::new(0));
        let errors_clone = Arc::clone(&errors);
        let _handle = session.on_error(move |info| {
            assert_eq!(info.code, ErrorCode::ClientErr);
            assert_eq!(info.severity, Severity::Warn);
            errors_clone.fetch_add(1, Ordering::SeqCst);
        });

        session.handle_feed_error("connection refused");
        assert_eq!(errors.load(Ordering::SeqCst), 1);
        assert_eq!(session.state(), SessionState::Stopped);
    }

    #[test]
    fn test_callback_cannot_reenter() {
        let session = session("exit", "exit");
        let slot: Arc<Mutex<Option<WatchSession>>> = Arc::new(Mutex::new(Some(session.clone())));
        let nested = Arc::new(Mutex::new(None));

        let slot_clone = Arc::clone(&slot);
        let nested_clone = Arc::clone(&nested);
        let _handle = session.on_update(move |_, _| {
            if let Some(inner) = slot_clone.lock().as_ref() {
                let result = inner.process_observation(observation(&[("cfg/foo", "2")]));
                *nested_clone.lock() = Some(result);
            }
        });

        let outcome = session.process_observation(observation(&[("cfg/foo", "1")])).unwrap();
        assert_eq!(outcome, ObservationOutcome::Delivered { initial_load: true });
        assert_eq!(*nested.lock(), Some(Err(ConfigError::ReentrantObservation)));
        assert_eq!(session.get().get("foo"), Some("1"));

        // Outside a callback the session accepts observations again.
        slot.lock().take();
        session.process_observation(observation(&[("cfg/foo", "3")])).unwrap();
        assert_eq!(session.get().get("foo"), Some("3"));
    }

    #[test]
    fn test_clone_shares_state() {
        let session = session("exit", "exit");
        let clone = session.clone();
        session.process_observation(observation(&[("cfg/foo", "1")])).unwrap();
        assert!(clone.is_ready());
        assert_eq!(clone.get().get("foo"), Some("1"));
    }
}
