//! Watcher service
//!
//! A single task owns every [`WatcherInstance`]. Callers talk to it through
//! the cloneable [`Watcher`] handle; backends, timers and polling tasks post
//! [`Signal`]s tagged with the instance they belong to. Signals of instances
//! that were stopped or replaced in the meantime are dropped.
//!
//! Pipeline per watcher:
//! raw events -> path rewrite -> include filter -> batch worker (coalesce
//! delay) -> coalescer -> filter -> throttled emitter -> event stream

use crate::backend::{BackendSink, NotifyBackend, WatchBackend};
use crate::coalesce::coalesce_events;
use crate::config::WatcherConfig;
use crate::dedupe::remove_duplicate_requests;
use crate::error::{BackendError, WatcherError};
use crate::filter::filter_events;
use crate::instance::{InstanceState, PathCallback, PathEvent, WatchResource, WatcherInstance, WatcherStatus};
use crate::normalize::normalize_path;
use crate::platform;
use crate::polling::start_polling;
use crate::reconcile::{plan_reconcile, ActiveWatcher, ReconcileReport};
use crate::supervisor::{FailureReason, Recovery, RestartSupervisor};
use crate::throttle::ThrottledEmitter;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};
use tw_core::path::{is_equal, is_equal_or_parent, rebase, IGNORE_CASE};
use tw_core::{FileChangeEvent, PatternSet, RawEvent, RawEventKind, WatchRequest, WatcherKey};

/// Identity of one watcher incarnation; a restart gets a new id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InstanceId(pub(crate) u64);

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Internal messages posted back to the service task
#[derive(Debug)]
pub(crate) enum Signal {
    /// Raw events from a backend or polling task
    Events {
        instance: InstanceId,
        events: Vec<RawEvent>,
    },
    /// A backend error after the subscription succeeded
    Error {
        instance: InstanceId,
        error: BackendError,
    },
    /// First polling snapshot written
    Ready { instance: InstanceId },
    /// Coalesce delay of a watcher elapsed
    Flush { instance: InstanceId },
    /// Restart delay of a watcher elapsed
    Restart { instance: InstanceId },
    /// Throttle cooldown elapsed
    ThrottleTick,
    /// A path subscription was dropped
    Unsubscribe { id: u64 },
}

enum Command {
    Watch {
        requests: Vec<WatchRequest>,
        reply: oneshot::Sender<ReconcileReport>,
    },
    Subscribe {
        path: PathBuf,
        callback: PathCallback,
        reply: oneshot::Sender<Option<u64>>,
    },
    Status {
        reply: oneshot::Sender<Vec<WatcherStatus>>,
    },
    Rearm {
        reply: oneshot::Sender<usize>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Output streams of a watcher service
#[derive(Debug)]
pub struct WatcherStreams {
    /// Coalesced, filtered and throttled change events
    pub events: mpsc::UnboundedReceiver<Vec<FileChangeEvent>>,
    /// Requests whose watcher failed permanently or could not be started
    pub failures: mpsc::UnboundedReceiver<WatchRequest>,
}

/// Handle to a running watcher service
///
/// Cheap to clone. The service shuts down once every handle is dropped or
/// [`Watcher::shutdown`] is called.
#[derive(Debug, Clone)]
pub struct Watcher {
    commands: mpsc::UnboundedSender<Command>,
    signals: mpsc::UnboundedSender<Signal>,
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Command::Watch { .. } => "Watch",
            Command::Subscribe { .. } => "Subscribe",
            Command::Status { .. } => "Status",
            Command::Rearm { .. } => "Rearm",
            Command::Shutdown { .. } => "Shutdown",
        };
        f.write_str(name)
    }
}

impl Watcher {
    /// Start a service on the current tokio runtime
    ///
    /// Without a backend every request is served by polling at
    /// `fallback_polling_interval_ms`.
    pub fn spawn(
        config: WatcherConfig,
        backend: Option<Arc<dyn WatchBackend>>,
    ) -> Result<(Self, WatcherStreams), WatcherError> {
        config.validate()?;

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (failures_tx, failures_rx) = mpsc::unbounded_channel();

        if let Some(backend) = &backend {
            info!("Starting file watcher service (backend: {})", backend.name());
        } else {
            info!(
                "Starting file watcher service (polling every {}ms)",
                config.fallback_polling_interval_ms
            );
        }

        let service = WatcherService::new(config, backend, signal_tx.clone(), events_tx, failures_tx);
        tokio::spawn(service.run(command_rx, signal_rx));

        Ok((
            Self {
                commands: command_tx,
                signals: signal_tx,
            },
            WatcherStreams {
                events: events_rx,
                failures: failures_rx,
            },
        ))
    }

    /// Start a service using the native backend of this platform
    pub fn with_native_backend(config: WatcherConfig) -> Result<(Self, WatcherStreams), WatcherError> {
        Self::spawn(config, Some(Arc::new(NotifyBackend::new())))
    }

    /// Make the set of running watchers match `requests`
    ///
    /// Idempotent: watchers whose request did not change keep running.
    pub async fn watch(&self, requests: Vec<WatchRequest>) -> Result<ReconcileReport, WatcherError> {
        let (reply, rx) = oneshot::channel();
        self.commands.send(Command::Watch { requests, reply })?;
        Ok(rx.await?)
    }

    /// Listen to changes of one path on the watcher covering it
    ///
    /// Returns `None` when no running watcher covers the path. The callback
    /// gets [`PathEvent::Stopped`] once if that watcher fails or stops.
    pub async fn subscribe(
        &self,
        path: impl Into<PathBuf>,
        callback: impl FnMut(PathEvent) + Send + 'static,
    ) -> Result<Option<PathSubscription>, WatcherError> {
        let (reply, rx) = oneshot::channel();
        self.commands.send(Command::Subscribe {
            path: path.into(),
            callback: Box::new(callback),
            reply,
        })?;

        Ok(rx.await?.map(|id| PathSubscription {
            id,
            signals: self.signals.clone(),
        }))
    }

    /// State of every watcher, ordered by key
    pub async fn status(&self) -> Result<Vec<WatcherStatus>, WatcherError> {
        let (reply, rx) = oneshot::channel();
        self.commands.send(Command::Status { reply })?;
        Ok(rx.await?)
    }

    /// Retry watchers that failed on resource exhaustion
    ///
    /// Also lets the exhaustion error be logged again. Returns the number of
    /// restarted watchers.
    pub async fn rearm(&self) -> Result<usize, WatcherError> {
        let (reply, rx) = oneshot::channel();
        self.commands.send(Command::Rearm { reply })?;
        Ok(rx.await?)
    }

    /// Stop every watcher and end the service
    pub async fn shutdown(&self) -> Result<(), WatcherError> {
        let (reply, rx) = oneshot::channel();
        self.commands.send(Command::Shutdown { reply })?;
        Ok(rx.await?)
    }
}

/// Registration of a path subscriber; dropping it unsubscribes
#[derive(Debug)]
pub struct PathSubscription {
    id: u64,
    signals: mpsc::UnboundedSender<Signal>,
}

impl PathSubscription {
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Drop for PathSubscription {
    fn drop(&mut self) {
        let _ = self.signals.send(Signal::Unsubscribe { id: self.id });
    }
}

struct WatcherService {
    config: WatcherConfig,
    backend: Option<Arc<dyn WatchBackend>>,
    /// One instance per key, failed ones included
    watchers: BTreeMap<WatcherKey, WatcherInstance>,
    keys: HashMap<InstanceId, WatcherKey>,
    next_instance: u64,
    next_subscription: u64,
    supervisor: RestartSupervisor,
    emitter: ThrottledEmitter<FileChangeEvent>,
    signal_tx: mpsc::UnboundedSender<Signal>,
    failures_tx: mpsc::UnboundedSender<WatchRequest>,
    token: CancellationToken,
}

impl WatcherService {
    fn new(
        config: WatcherConfig,
        backend: Option<Arc<dyn WatchBackend>>,
        signal_tx: mpsc::UnboundedSender<Signal>,
        events_tx: mpsc::UnboundedSender<Vec<FileChangeEvent>>,
        failures_tx: mpsc::UnboundedSender<WatchRequest>,
    ) -> Self {
        let supervisor = RestartSupervisor::new(config.restart_delay(), config.max_restarts);
        let emitter = ThrottledEmitter::new(config.throttle.clone(), move |events| {
            let _ = events_tx.send(events);
        });

        Self {
            config,
            backend,
            watchers: BTreeMap::new(),
            keys: HashMap::new(),
            next_instance: 0,
            next_subscription: 0,
            supervisor,
            emitter,
            signal_tx,
            failures_tx,
            token: CancellationToken::new(),
        }
    }

    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut signals: mpsc::UnboundedReceiver<Signal>,
    ) {
        loop {
            tokio::select! {
                biased;

                command = commands.recv() => match command {
                    Some(Command::Shutdown { reply }) => {
                        self.shutdown().await;
                        let _ = reply.send(());
                        break;
                    }
                    Some(command) => self.handle_command(command).await,
                    // Every handle is gone
                    None => {
                        self.shutdown().await;
                        break;
                    }
                },

                Some(signal) = signals.recv() => self.handle_signal(signal).await,
            }
        }

        debug!("File watcher service stopped");
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Watch { requests, reply } => {
                let report = self.watch(requests).await;
                let _ = reply.send(report);
            }
            Command::Subscribe { path, callback, reply } => {
                let _ = reply.send(self.subscribe(&path, callback));
            }
            Command::Status { reply } => {
                let _ = reply.send(self.watchers.values().map(WatcherInstance::status).collect());
            }
            Command::Rearm { reply } => {
                let restarted = self.rearm().await;
                let _ = reply.send(restarted);
            }
            // Handled by the run loop
            Command::Shutdown { reply } => {
                let _ = reply.send(());
            }
        }
    }

    async fn handle_signal(&mut self, signal: Signal) {
        match signal {
            Signal::Events { instance, events } => self.on_events(instance, events),
            Signal::Error { instance, error } => self.on_error(instance, error).await,
            Signal::Ready { instance } => {
                if let Some(watcher) = self.live_instance_mut(instance) {
                    watcher.ready = true;
                }
            }
            Signal::Flush { instance } => self.on_flush(instance).await,
            Signal::Restart { instance } => self.on_restart(instance).await,
            Signal::ThrottleTick => {
                if let Some(cooldown) = self.emitter.resume() {
                    self.schedule(self.token.clone(), cooldown, Signal::ThrottleTick);
                }
            }
            Signal::Unsubscribe { id } => {
                for watcher in self.watchers.values_mut() {
                    if watcher.unsubscribe(id) {
                        break;
                    }
                }
            }
        }
    }

    fn verbose(&self) -> bool {
        self.config.verbose
    }

    fn live_instance_mut(&mut self, id: InstanceId) -> Option<&mut WatcherInstance> {
        let key = self.keys.get(&id)?;
        self.watchers.get_mut(key).filter(|watcher| watcher.id == id && watcher.is_live())
    }

    /// Post `signal` after `delay` unless `token` is cancelled first
    fn schedule(&self, token: CancellationToken, delay: Duration, signal: Signal) {
        let tx = self.signal_tx.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    let _ = tx.send(signal);
                }
            }
        });
    }

    // Reconciliation

    async fn watch(&mut self, requests: Vec<WatchRequest>) -> ReconcileReport {
        let deduplicated =
            remove_duplicate_requests(requests, self.config.validate_paths, self.verbose()).await;
        let mut unwatchable = deduplicated.unwatchable;

        // One watcher per correlation id: the shortest path wins
        let mut requests = deduplicated.requests;
        requests.sort_by_key(|request| request.path.as_os_str().len());
        let mut seen = HashSet::new();
        let mut unique = Vec::with_capacity(requests.len());
        for request in requests {
            if seen.insert(request.key()) {
                unique.push(request);
            } else {
                warn!(
                    path = %request.path.display(),
                    correlation = ?request.correlation_id,
                    "ignoring a request for watching that shares its correlation with another path"
                );
                unwatchable.push(request);
            }
        }

        let plan = plan_reconcile(
            self.watchers.iter().map(|(key, watcher)| {
                (
                    key,
                    ActiveWatcher {
                        request: &watcher.request,
                        failed: watcher.is_failed(),
                    },
                )
            }),
            unique,
        );

        if self.verbose() {
            if !plan.to_start.is_empty() {
                let requests: Vec<String> = plan.to_start.iter().map(ToString::to_string).collect();
                trace!("Request to start watching: {}", requests.join(","));
            }
            if !plan.to_stop.is_empty() {
                let requests: Vec<String> = plan
                    .to_stop
                    .iter()
                    .filter_map(|key| self.watchers.get(key))
                    .map(|watcher| watcher.request.to_string())
                    .collect();
                trace!("Request to stop watching: {}", requests.join(","));
            }
        }

        for request in plan.to_update {
            if let Some(watcher) = self.watchers.get_mut(&request.key()) {
                watcher.request = request;
            }
        }

        let mut report = ReconcileReport {
            started: plan.to_start.len(),
            stopped: 0,
            unwatchable: unwatchable.len(),
        };

        for key in plan.to_stop {
            if let Some(mut watcher) = self.remove_instance(&key) {
                // Failed watchers were torn down when they failed
                if !watcher.is_failed() {
                    report.stopped += 1;
                }
                self.stop_instance(&mut watcher).await;
                watcher.notify_stopped();
            }
        }

        for request in plan.to_start {
            self.start_instance(request, 0).await;
        }

        for request in unwatchable {
            let _ = self.failures_tx.send(request);
        }

        report
    }

    async fn start_instance(&mut self, request: WatchRequest, restarts: u32) {
        self.next_instance += 1;
        let id = InstanceId(self.next_instance);
        let key = request.key();
        let mut watcher = WatcherInstance::new(
            id,
            request,
            restarts,
            self.config.coalesce_delay(),
            self.token.child_token(),
        );

        match watcher.compile_patterns() {
            Ok(()) => self.subscribe_instance(&mut watcher).await,
            Err(e) => {
                error!(
                    path = %watcher.request.path.display(),
                    correlation = ?watcher.request.correlation_id,
                    "Invalid watch pattern: {:#}",
                    e
                );
                watcher.state = InstanceState::Failed(FailureReason::InvalidPattern);
            }
        }

        if let InstanceState::Failed(_) = watcher.state {
            watcher.token.cancel();
            watcher.worker.dispose();
            watcher.resource = WatchResource::Released;
            let _ = self.failures_tx.send(watcher.request.clone());
        }

        self.keys.insert(id, key.clone());
        if let Some(previous) = self.watchers.insert(key, watcher) {
            // Plans never start a key that is still running
            self.keys.remove(&previous.id);
        }
    }

    /// Attach a backend subscription or polling task to a new instance
    async fn subscribe_instance(&mut self, watcher: &mut WatcherInstance) {
        watcher.normalized = normalize_path(&watcher.request.path, self.verbose()).await;
        let real_path = watcher.normalized.real_path.clone();
        let excludes = self.backend_excludes(watcher);
        let sink = BackendSink::new(watcher.id, self.signal_tx.clone());

        let polling_interval = match (&self.backend, watcher.request.polling_interval) {
            (_, Some(interval)) => Some(interval),
            (None, None) => Some(self.config.fallback_polling_interval()),
            (Some(_), None) => None,
        };

        if let Some(interval) = polling_interval {
            let result = PatternSet::new(&real_path, &excludes).and_then(|patterns| {
                let patterns = (!patterns.is_empty()).then_some(patterns);
                start_polling(real_path.clone(), patterns, interval, sink, watcher.token.child_token())
            });
            match result {
                Ok(handle) => {
                    watcher.resource = WatchResource::Polling(handle);
                    if self.verbose() {
                        trace!(
                            path = %watcher.request.path.display(),
                            correlation = ?watcher.request.correlation_id,
                            "Started watching: '{}' with polling interval '{}'",
                            real_path.display(),
                            interval.as_millis()
                        );
                    }
                }
                Err(e) => {
                    error!(
                        path = %watcher.request.path.display(),
                        correlation = ?watcher.request.correlation_id,
                        "Failed to start polling: {:#}",
                        e
                    );
                    watcher.state = InstanceState::Failed(FailureReason::SubscribeFailed);
                }
            }
            return;
        }

        let Some(backend) = self.backend.clone() else {
            return;
        };
        match backend.subscribe(&real_path, &excludes, sink).await {
            Ok(handle) => {
                watcher.resource = WatchResource::Backend(handle);
                watcher.ready = true;
                if self.verbose() {
                    trace!(
                        path = %watcher.request.path.display(),
                        correlation = ?watcher.request.correlation_id,
                        "Started watching: '{}' with backend '{}'",
                        real_path.display(),
                        backend.name()
                    );
                }
            }
            Err(e) => {
                let reason = self.supervisor.on_subscribe_error(&e, &watcher.request);
                watcher.state = InstanceState::Failed(reason);
            }
        }
    }

    /// Request excludes in real-path form plus the predefined ones
    fn backend_excludes(&self, watcher: &WatcherInstance) -> Vec<String> {
        let normalized = &watcher.normalized;
        let excludes: Vec<String> = watcher
            .request
            .excludes
            .iter()
            .map(|exclude| {
                let path = Path::new(exclude);
                if normalized.differs && path.is_absolute() {
                    if let Some(rebased) =
                        rebase(path, &watcher.request.path, &normalized.real_path, IGNORE_CASE)
                    {
                        return rebased.to_string_lossy().into_owned();
                    }
                }
                exclude.clone()
            })
            .collect();

        platform::with_predefined_excludes(&excludes, &self.config.predefined_excludes)
    }

    fn remove_instance(&mut self, key: &WatcherKey) -> Option<WatcherInstance> {
        let watcher = self.watchers.remove(key)?;
        self.keys.remove(&watcher.id);
        Some(watcher)
    }

    /// Cancel, flush and release an instance
    ///
    /// Subscribers are not notified here, callers decide when.
    async fn stop_instance(&mut self, watcher: &mut WatcherInstance) {
        if self.verbose() {
            trace!(
                path = %watcher.request.path.display(),
                correlation = ?watcher.request.correlation_id,
                "stopping file watcher"
            );
        }

        let was_live = watcher.is_live();
        watcher.token.cancel();

        if was_live {
            let pending = watcher.worker.take();
            if !pending.is_empty() {
                // Root deletion no longer matters for a watcher going away
                let outcome = filter_events(coalesce_events(pending), watcher, self.verbose());
                self.emit_events(outcome.events, &watcher.request);
            }
        }
        watcher.worker.dispose();

        match std::mem::replace(&mut watcher.resource, WatchResource::Released) {
            WatchResource::Backend(handle) => {
                if let Err(e) = handle.unsubscribe().await {
                    error!(
                        path = %watcher.request.path.display(),
                        correlation = ?watcher.request.correlation_id,
                        "Unexpected error stopping watcher: {}",
                        e
                    );
                }
            }
            WatchResource::Polling(handle) => handle.stop().await,
            WatchResource::Pending | WatchResource::Released => {}
        }

        if watcher.state == InstanceState::Active {
            watcher.state = InstanceState::Stopped;
        }
    }

    /// Stop an instance for good and report its request
    async fn fail_instance(&mut self, key: &WatcherKey, reason: FailureReason) {
        let Some(mut watcher) = self.remove_instance(key) else {
            return;
        };

        self.stop_instance(&mut watcher).await;
        watcher.state = InstanceState::Failed(reason);
        watcher.notify_stopped();
        let _ = self.failures_tx.send(watcher.request.clone());

        // Failed instances stay visible until a later watch call replaces them
        self.keys.insert(watcher.id, key.clone());
        self.watchers.insert(key.clone(), watcher);
    }

    async fn shutdown(&mut self) {
        let keys: Vec<WatcherKey> = self.watchers.keys().cloned().collect();
        for key in keys {
            if let Some(mut watcher) = self.remove_instance(&key) {
                self.stop_instance(&mut watcher).await;
                watcher.notify_stopped();
            }
        }
        self.token.cancel();
        self.emitter.dispose();
    }

    // Path subscriptions

    fn subscribe(&mut self, path: &Path, callback: PathCallback) -> Option<u64> {
        let watcher = self.watchers.values_mut().find(|watcher| {
            !watcher.is_failed()
                && is_equal_or_parent(path, &watcher.request.path, IGNORE_CASE)
                && !watcher.exclude(path)
                && watcher.include(path)
        })?;

        self.next_subscription += 1;
        let id = self.next_subscription;
        watcher.subscribe(id, path, callback);
        Some(id)
    }

    // Event pipeline

    fn on_events(&mut self, id: InstanceId, events: Vec<RawEvent>) {
        let verbose = self.verbose();
        let Some(watcher) = self.live_instance_mut(id) else {
            return;
        };

        let mut schedule_flush = false;
        for raw in events {
            let path = platform::normalize_event_path(raw.path, &watcher.request.path);
            let path = watcher.normalized.rewrite(path, &watcher.request.path);
            let event = FileChangeEvent::new(raw.kind.into(), path, watcher.request.correlation_id);

            if verbose {
                trace!(
                    path = %watcher.request.path.display(),
                    correlation = ?watcher.request.correlation_id,
                    "{}",
                    event
                );
            }

            // Deletion of the root must reach the filter whatever the includes say
            let root_deleted = raw.kind == RawEventKind::Deleted
                && is_equal(&event.resource, &watcher.request.path, IGNORE_CASE);
            if !root_deleted && !watcher.include(&event.resource) {
                if verbose {
                    trace!(
                        path = %watcher.request.path.display(),
                        correlation = ?watcher.request.correlation_id,
                        " >> ignored (not included) {}",
                        event.resource.display()
                    );
                }
                continue;
            }

            schedule_flush |= watcher.worker.work(event);
        }

        if schedule_flush {
            let token = watcher.token.clone();
            let delay = watcher.worker.delay();
            self.schedule(token, delay, Signal::Flush { instance: id });
        }
    }

    async fn on_flush(&mut self, id: InstanceId) {
        let verbose = self.verbose();
        let Some(watcher) = self.live_instance_mut(id) else {
            return;
        };

        let batch = watcher.worker.take();
        if batch.is_empty() {
            return;
        }

        let outcome = filter_events(coalesce_events(batch), watcher, verbose);
        let request = watcher.request.clone();
        self.emit_events(outcome.events, &request);

        if outcome.root_deleted {
            if let Recovery::Fail(reason) = self.supervisor.on_root_deleted(&request) {
                self.fail_instance(&request.key(), reason).await;
            }
        }
    }

    fn emit_events(&mut self, events: Vec<FileChangeEvent>, request: &WatchRequest) {
        let Some(first) = events.first() else {
            return;
        };
        let count = events.len();
        let sample = first.resource.clone();

        let result = self.emitter.work(events);
        if !result.accepted {
            warn!(
                path = %request.path.display(),
                correlation = ?request.correlation_id,
                "started ignoring events due to too many file change events at once (incoming: {}, most recent change: {}). Exclude folders with lots of changing files (e.g. compilation output).",
                count,
                sample.display()
            );
            return;
        }

        if self.emitter.pending() > 0 && self.verbose() {
            trace!(
                path = %request.path.display(),
                correlation = ?request.correlation_id,
                "started throttling events due to large amount of file change events at once (pending: {}, most recent change: {}). Exclude folders with lots of changing files (e.g. compilation output).",
                self.emitter.pending(),
                sample.display()
            );
        }

        if let Some(cooldown) = result.cooldown {
            self.schedule(self.token.clone(), cooldown, Signal::ThrottleTick);
        }
    }

    // Failure handling

    async fn on_error(&mut self, id: InstanceId, error: BackendError) {
        let Some(watcher) = self.live_instance_mut(id) else {
            return;
        };
        let request = watcher.request.clone();
        let restarts = watcher.restarts;

        match self.supervisor.on_error(&error, &request, restarts) {
            Recovery::Ignore => {}
            Recovery::Restart { delay } => {
                let Some(watcher) = self.live_instance_mut(id) else {
                    return;
                };
                if watcher.restart_scheduled {
                    return;
                }
                watcher.restart_scheduled = true;
                let token = watcher.token.clone();
                self.schedule(token, delay, Signal::Restart { instance: id });
            }
            Recovery::Fail(reason) => self.fail_instance(&request.key(), reason).await,
        }
    }

    async fn on_restart(&mut self, id: InstanceId) {
        let Some(watcher) = self.live_instance_mut(id) else {
            return;
        };
        let key = watcher.request.key();
        let Some(mut old) = self.remove_instance(&key) else {
            return;
        };

        info!(
            path = %old.request.path.display(),
            correlation = ?old.request.correlation_id,
            "Restarting watcher (restarts: {})",
            old.restarts + 1
        );

        // The old handle is released before the replacement subscribes
        self.stop_instance(&mut old).await;
        self.start_instance(old.request.clone(), old.restarts + 1).await;
        old.notify_stopped();
    }

    async fn rearm(&mut self) -> usize {
        self.supervisor.rearm();

        let exhausted: Vec<WatcherKey> = self
            .watchers
            .iter()
            .filter(|(_, watcher)| {
                watcher.state == InstanceState::Failed(FailureReason::ResourceExhausted)
            })
            .map(|(key, _)| key.clone())
            .collect();

        for key in &exhausted {
            if let Some(watcher) = self.remove_instance(key) {
                info!(
                    path = %watcher.request.path.display(),
                    correlation = ?watcher.request.correlation_id,
                    "Re-arming watcher after resource exhaustion"
                );
                self.start_instance(watcher.request, watcher.restarts).await;
            }
        }

        exhausted.len()
    }
}
