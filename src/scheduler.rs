//! Event driven evaluation of a rule set
//!
//! Three lanes: the host pushes notifications into a [`NotificationQueue`] without blocking,
//! a worker task drains it and runs at most one evaluation pass at a time on the blocking pool,
//! and a separate action task performs the actions passes decide on, so slow actions never
//! hold up the next pass.

mod engine;
mod identity;
mod queue;

use std::{collections::HashSet, fmt::Debug, hash::Hash, sync::Arc};

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::Serialize;
use slog::{debug, info, o, warn, Logger};
use thiserror::Error;
use tokio::{
    sync::mpsc::{self, UnboundedReceiver, UnboundedSender},
    task::{JoinError, JoinHandle},
    time::Instant,
};
use tokio_util::sync::CancellationToken;

pub use engine::{ActionRequest, Effect, Engine, PassReport, PassTrigger};
pub use identity::{ActivityTable, AppIdCache, IdentityTracker, TopActivity};
pub use queue::{coalesce, Batch, ChangeNotification, ContentThrottle, EventKind, NotificationQueue};

use crate::{
    config::{EngineConfig, RuleAction, SchedulerOptions},
    schema::Schema,
    transform::TreeAdapter,
};

/// Why an action could not be performed
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(rename_all = "camelCase", tag = "kind", content = "detail")]
pub enum ActionError {
    #[error("target node is no longer attached")]
    NodeGone,
    #[error("host rejected the action: {0}")]
    Rejected(String),
    #[error("action is not supported by the host")]
    Unsupported,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionReport {
    pub rule: String,
    pub action: RuleAction,
    pub generation: u64,
    pub result: Result<(), ActionError>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SchedulerEvent {
    PassCompleted(PassReport),
    Action(ActionReport),
}

/// What the scheduler needs from its embedding
#[async_trait]
pub trait Host: Send + Sync + 'static {
    type Node: Clone + Eq + Hash + Debug + Send + Sync + 'static;
    type Adapter: TreeAdapter<Node = Self::Node> + Send + Sync + 'static;

    /// The tree as it is now
    fn adapter(&self) -> Arc<Self::Adapter>;

    /// Cheap, possibly lagging, answer to which app is in front
    fn active_app_id(&self) -> Option<String>;

    /// Authoritative answer, may be slow; the scheduler bounds the wait
    async fn top_activity(&self) -> Option<TopActivity>;

    fn is_activity(&self, app_id: &str, class_name: &str) -> bool;

    async fn perform_action(&self, node: Self::Node, action: RuleAction) -> Result<(), ActionError>;
}

enum Command {
    UpdateConfig(EngineConfig),
    ResetRule(String),
}

/// Builder for a running scheduler
pub struct Scheduler<H: Host> {
    host: Arc<H>,
    config: EngineConfig,
    schema: Schema,
    options: SchedulerOptions,
    activities: Option<Arc<ActivityTable>>,
    logger: Logger,
}

impl<H: Host> Scheduler<H> {
    pub fn new(host: Arc<H>, config: EngineConfig, logger: Logger) -> Self {
        Scheduler {
            host,
            config,
            schema: Schema::standard(),
            options: SchedulerOptions::default(),
            activities: None,
            logger,
        }
    }

    pub fn with_options(mut self, options: SchedulerOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_schema(mut self, schema: Schema) -> Self {
        self.schema = schema;
        self
    }

    /// Share an activity table with other schedulers of the process
    pub fn with_activities(mut self, activities: Arc<ActivityTable>) -> Self {
        self.activities = Some(activities);
        self
    }

    /// Start the worker and action lanes on the current tokio runtime
    pub fn spawn(self) -> (SchedulerHandle<H::Node>, UnboundedReceiver<SchedulerEvent>) {
        let queue = Arc::new(NotificationQueue::new());
        let throttle = Arc::new(ContentThrottle::new());
        let ignored = Arc::new(RwLock::new(ignored_apps(&self.config)));
        let shutdown = CancellationToken::new();
        let (commands_tx, commands) = mpsc::unbounded_channel();
        let (events, events_rx) = mpsc::unbounded_channel();
        let (actions, action_requests) = mpsc::unbounded_channel();
        let (action_results_tx, action_results) = mpsc::unbounded_channel();
        let (rechecks_tx, rechecks) = mpsc::unbounded_channel();

        let activities = self
            .activities
            .unwrap_or_else(|| Arc::new(ActivityTable::with_capacity(self.options.activity_capacity)));
        let engine = Engine::new(
            &self.config,
            self.schema.clone(),
            self.options.clone(),
            Instant::now(),
            self.logger.new(o!("lane" => "query")),
        );

        let action_lane = tokio::spawn(action_lane(
            self.host.clone(),
            action_requests,
            action_results_tx,
            self.logger.new(o!("lane" => "action")),
        ));

        let worker = Worker {
            host: self.host,
            queue: queue.clone(),
            throttle: throttle.clone(),
            front_app: None,
            engine: Some(engine),
            config: self.config,
            schema: self.schema,
            app_ids: AppIdCache::new(self.options.app_id_ttl()),
            options: self.options,
            activities,
            tracker: IdentityTracker::default(),
            force_lookup: false,
            pending: None,
            deferred: Vec::new(),
            events,
            actions,
            rechecks: rechecks_tx,
            generation: 0,
            generation_timers: CancellationToken::new(),
            logger: self.logger,
        };
        let worker = tokio::spawn(worker.run(commands, rechecks, action_results, shutdown.clone()));

        let handle = SchedulerHandle {
            queue,
            throttle,
            ignored,
            commands: commands_tx,
            shutdown,
            tasks: vec![worker, action_lane],
        };
        (handle, events_rx)
    }
}

fn ignored_apps(config: &EngineConfig) -> HashSet<String> {
    config.ignored_app_ids.iter().cloned().collect()
}

/// Producer side of a running scheduler
pub struct SchedulerHandle<N> {
    queue: Arc<NotificationQueue<N>>,
    throttle: Arc<ContentThrottle>,
    ignored: Arc<RwLock<HashSet<String>>>,
    commands: UnboundedSender<Command>,
    shutdown: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl<N> SchedulerHandle<N> {
    /// Queue a notification; `false` when it was dropped, for an ignored app or a throttled
    /// content burst
    pub fn submit(&self, notification: ChangeNotification<N>) -> bool {
        if self.ignored.read().contains(&notification.app_id) {
            return false;
        }
        if !self.throttle.admit(&notification) {
            return false;
        }
        self.queue.push(notification);
        true
    }

    pub fn update_config(&self, config: EngineConfig) {
        *self.ignored.write() = ignored_apps(&config);
        let _ = self.commands.send(Command::UpdateConfig(config));
    }

    pub fn reset_rule(&self, key: impl Into<String>) {
        let _ = self.commands.send(Command::ResetRule(key.into()));
    }

    pub async fn shutdown(self) {
        self.shutdown.cancel();
        drop(self.commands);
        for task in self.tasks {
            let _ = task.await;
        }
    }
}

async fn action_lane<H: Host>(
    host: Arc<H>,
    mut requests: UnboundedReceiver<ActionRequest<H::Node>>,
    results: UnboundedSender<ActionReport>,
    logger: Logger,
) {
    while let Some(request) = requests.recv().await {
        let result = host.perform_action(request.node, request.action).await;
        match &result {
            Ok(()) => info!(logger, "action performed"; "rule" => &request.rule, "action" => ?request.action),
            Err(e) => info!(logger, "action failed"; "rule" => &request.rule, "error" => %e),
        }
        let report = ActionReport {
            rule: request.rule,
            action: request.action,
            generation: request.generation,
            result,
        };
        if results.send(report).is_err() {
            break;
        }
    }
}

struct PassOutcome<N> {
    engine: Engine,
    report: PassReport,
    effects: Vec<Effect<N>>,
}

/// Work that needs the engine while a pass holds it
enum Deferred {
    Command(Command),
    ActionFinished(ActionReport),
}

struct Worker<H: Host> {
    host: Arc<H>,
    queue: Arc<NotificationQueue<H::Node>>,
    throttle: Arc<ContentThrottle>,
    /// App of the last completed pass
    front_app: Option<String>,
    /// Out on the blocking pool while a pass runs
    engine: Option<Engine>,
    config: EngineConfig,
    schema: Schema,
    options: SchedulerOptions,
    activities: Arc<ActivityTable>,
    tracker: IdentityTracker,
    app_ids: AppIdCache,
    /// Skip the cheap app id source on the next identity check
    force_lookup: bool,
    /// A pass requested while another one runs
    pending: Option<PassTrigger>,
    deferred: Vec<Deferred>,
    events: UnboundedSender<SchedulerEvent>,
    actions: UnboundedSender<ActionRequest<H::Node>>,
    rechecks: UnboundedSender<PassTrigger>,
    generation: u64,
    /// Cancelled when the identity generation moves on
    generation_timers: CancellationToken,
    logger: Logger,
}

impl<H: Host> Worker<H> {
    async fn run(
        mut self,
        mut commands: UnboundedReceiver<Command>,
        mut rechecks: UnboundedReceiver<PassTrigger>,
        mut action_results: UnboundedReceiver<ActionReport>,
        shutdown: CancellationToken,
    ) {
        let mut in_flight: Option<JoinHandle<PassOutcome<H::Node>>> = None;
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                Some(command) = commands.recv() => self.command(command),
                _ = self.queue.notified() => self.request(PassTrigger::Notification),
                Some(trigger) = rechecks.recv() => self.request(trigger),
                Some(report) = action_results.recv() => self.action_finished(report),
                outcome = join(&mut in_flight), if in_flight.is_some() => {
                    in_flight = None;
                    self.pass_finished(outcome);
                }
            }
            if in_flight.is_none() {
                if let Some(trigger) = self.pending.take() {
                    in_flight = self.start_pass(trigger).await;
                }
            }
        }
        self.generation_timers.cancel();
        if let Some(pass) = in_flight {
            let _ = pass.await;
        }
        debug!(self.logger, "scheduler stopped");
    }

    /// Coalesce pass requests: one runs, at most one more waits
    fn request(&mut self, trigger: PassTrigger) {
        if self.pending.is_none() {
            self.pending = Some(trigger);
        } else {
            debug!(self.logger, "coalescing pass request"; "trigger" => ?trigger);
        }
    }

    fn command(&mut self, command: Command) {
        let Some(engine) = self.engine.as_mut() else {
            self.deferred.push(Deferred::Command(command));
            return;
        };
        let now = Instant::now();
        match command {
            Command::UpdateConfig(config) => {
                engine.update_config(&config, now);
                self.config = config;
                self.request(PassTrigger::Config);
            }
            Command::ResetRule(key) => {
                if engine.reset_rule(&key, now) {
                    info!(self.logger, "rule reset"; "rule" => &key);
                    self.request(PassTrigger::Config);
                }
            }
        }
    }

    fn action_finished(&mut self, report: ActionReport) {
        if report.result.is_ok() {
            self.throttle.triggered(Instant::now());
        }
        match self.engine.as_mut() {
            Some(engine) => engine.action_finished(&report.rule, report.generation, report.result.is_ok()),
            None => {
                self.deferred.push(Deferred::ActionFinished(report.clone()));
            }
        }
        let _ = self.events.send(SchedulerEvent::Action(report));
    }

    fn apply_deferred(&mut self) {
        for deferred in std::mem::take(&mut self.deferred) {
            match deferred {
                Deferred::Command(command) => self.command(command),
                Deferred::ActionFinished(report) => {
                    if let Some(engine) = self.engine.as_mut() {
                        engine.action_finished(&report.rule, report.generation, report.result.is_ok());
                    }
                }
            }
        }
    }

    async fn resolve_identity(&mut self, batch: Option<&Batch<H::Node>>) -> Option<TopActivity> {
        let now = Instant::now();
        if let Some((app, class)) = batch.and_then(|b| b.activity.as_ref()) {
            let host = &self.host;
            if self.activities.is_activity(app, class, || host.is_activity(app, class)) {
                self.tracker.enter_activity(app, Some(class), now);
            }
        }

        let host = &self.host;
        let cheap = self.app_ids.get(now, || host.active_app_id());
        let tracked = self.tracker.current().map(|c| c.app_id.clone());
        let stale = self.force_lookup || cheap.is_none() || cheap != tracked;
        if stale {
            self.force_lookup = false;
            let lookup = tokio::time::timeout(self.options.identity_timeout(), self.host.top_activity());
            match lookup.await {
                Ok(Some(top)) => {
                    self.tracker
                        .confirm(&top.app_id, top.activity_id.as_deref(), now);
                }
                Ok(None) | Err(_) => {
                    debug!(self.logger, "authoritative identity unavailable, using app id");
                    if let Some(app) = &cheap {
                        self.tracker.observe_app(app, now);
                    }
                }
            }
        }
        self.tracker.current().cloned()
    }

    async fn start_pass(&mut self, trigger: PassTrigger) -> Option<JoinHandle<PassOutcome<H::Node>>> {
        let batch = self.queue.drain();
        let identity = self.resolve_identity(batch.as_ref()).await?;
        let mut engine = self.engine.take()?;
        let adapter = self.host.adapter();
        let now = Instant::now();
        Some(tokio::task::spawn_blocking(move || {
            let (report, effects) = engine.run_pass(&*adapter, batch.as_ref(), &identity, trigger, now);
            PassOutcome {
                engine,
                report,
                effects,
            }
        }))
    }

    fn pass_finished(&mut self, outcome: Result<PassOutcome<H::Node>, JoinError>) {
        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(self.logger, "evaluation pass failed, rebuilding engine"; "error" => %e);
                self.engine = Some(Engine::new(
                    &self.config,
                    self.schema.clone(),
                    self.options.clone(),
                    Instant::now(),
                    self.logger.new(o!("lane" => "query")),
                ));
                self.apply_deferred();
                return;
            }
        };

        let PassOutcome {
            engine,
            report,
            effects,
        } = outcome;
        if engine.generation() != self.generation {
            self.generation = engine.generation();
            self.generation_timers.cancel();
            self.generation_timers = CancellationToken::new();
        }
        if self.front_app.as_deref() != Some(report.identity.app_id.as_str()) {
            self.front_app = Some(report.identity.app_id.clone());
            self.throttle.app_changed(Instant::now());
        }
        self.engine = Some(engine);
        self.apply_deferred();

        for effect in effects {
            self.apply(effect);
        }
        let _ = self.events.send(SchedulerEvent::PassCompleted(report));
    }

    fn apply(&mut self, effect: Effect<H::Node>) {
        match effect {
            Effect::ArmMatchDelay { rule, at, timers } | Effect::ArmActionDelay { rule, at, timers } => {
                debug!(self.logger, "arming delayed check"; "rule" => rule);
                self.arm(at, Some(timers), PassTrigger::Delay);
            }
            Effect::Recheck => {
                let at = Instant::now() + self.options.recheck_delay();
                self.arm(at, None, PassTrigger::Recheck);
            }
            Effect::IdentityMismatch { expected, found } => {
                debug!(self.logger, "re-deriving identity"; "expected" => expected, "found" => found);
                self.force_lookup = true;
                self.app_ids.invalidate();
                self.request(PassTrigger::IdentityMismatch);
            }
            Effect::Act(request) => {
                if self.actions.send(request).is_err() {
                    warn!(self.logger, "action lane is gone");
                }
            }
        }
    }

    /// Single-shot deferred pass request, void once the rule or the generation moves on
    fn arm(&self, at: Instant, timers: Option<CancellationToken>, trigger: PassTrigger) {
        let generation = self.generation_timers.clone();
        let timers = timers.unwrap_or_else(|| generation.clone());
        let rechecks = self.rechecks.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep_until(at) => {
                    let _ = rechecks.send(trigger);
                }
                _ = timers.cancelled() => {}
                _ = generation.cancelled() => {}
            }
        });
    }
}

async fn join<T>(handle: &mut Option<JoinHandle<T>>) -> Result<T, JoinError> {
    match handle {
        Some(handle) => handle.await,
        None => std::future::pending().await,
    }
}
