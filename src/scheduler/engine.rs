//! One evaluation pass: the synchronous core run on the query lane

use serde::Serialize;
use slog::{debug, info, o, Logger};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::{
    identity::TopActivity,
    queue::{Batch, EventKind},
};
use crate::{
    config::{EngineConfig, RuleAction, SchedulerOptions},
    rule::{RuleMatch, RuleSet, RuleStatus},
    schema::Schema,
    transform::{CachedTransform, DirectTransform, Transform, TreeAdapter},
};

/// What asked for a pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum PassTrigger {
    Notification,
    /// A match or action delay ran out
    Delay,
    /// Trailing recheck after an action or a forced miss
    Recheck,
    Config,
    /// A previous pass matched a node of another app
    IdentityMismatch,
}

/// Work for the asynchronous side, produced by a pass
#[derive(Debug)]
pub enum Effect<N> {
    ArmMatchDelay {
        rule: String,
        at: Instant,
        timers: CancellationToken,
    },
    ArmActionDelay {
        rule: String,
        at: Instant,
        timers: CancellationToken,
    },
    /// The tracked identity is wrong, re-derive it before the next pass
    IdentityMismatch {
        expected: String,
        found: String,
    },
    Act(ActionRequest<N>),
    Recheck,
}

#[derive(Debug, Clone)]
pub struct ActionRequest<N> {
    pub rule: String,
    pub node: N,
    pub action: RuleAction,
    pub generation: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PassReport {
    pub pass: u64,
    pub trigger: PassTrigger,
    pub identity: TopActivity,
    pub generation: u64,
    pub events: usize,
    pub sources: usize,
    pub from_root: bool,
    /// Rules whose selectors were run
    pub evaluated: Vec<String>,
    pub matched: Vec<String>,
    pub acted: Option<String>,
    pub mismatch: bool,
}

pub struct Engine {
    rules: RuleSet,
    schema: Schema,
    options: SchedulerOptions,
    identity: Option<TopActivity>,
    /// Bumped on every identity change; timers and actions of older generations are void
    generation: u64,
    /// Indices of rules that apply to the current identity, in order
    applicable: Vec<usize>,
    passes: u64,
    logger: Logger,
}

impl Engine {
    pub fn new(
        config: &EngineConfig,
        schema: Schema,
        options: SchedulerOptions,
        now: Instant,
        logger: Logger,
    ) -> Self {
        Engine {
            rules: RuleSet::compile(config, &schema, now, &logger),
            schema,
            options,
            identity: None,
            generation: 0,
            applicable: Vec::new(),
            passes: 0,
            logger,
        }
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn identity(&self) -> Option<&TopActivity> {
        self.identity.as_ref()
    }

    /// Swap in a new configuration snapshot, keeping the current identity
    pub fn update_config(&mut self, config: &EngineConfig, now: Instant) {
        for rule in self.rules.rules() {
            rule.timers().cancel();
        }
        self.rules = RuleSet::compile(config, &self.schema, now, &self.logger);
        self.refresh_applicable();
    }

    /// Explicit reset of one rule, re-enabling it after its trigger cap
    pub fn reset_rule(&mut self, key: &str, now: Instant) -> bool {
        match self.rules.get_mut(key) {
            Some(rule) => {
                rule.reset(now);
                true
            }
            None => false,
        }
    }

    /// An action reported back; outcomes of older generations are ignored
    pub fn action_finished(&mut self, key: &str, generation: u64, succeeded: bool) {
        if generation != self.generation {
            debug!(self.logger, "ignoring action outcome of an older identity"; "rule" => key);
            return;
        }
        let Some(rule) = self.rules.get_mut(key) else {
            return;
        };
        if rule.action_finished(succeeded) {
            info!(self.logger, "rule triggered"; "rule" => key, "count" => rule.action_count());
        } else if !succeeded {
            debug!(self.logger, "action failed, rule stays eligible"; "rule" => key);
        }
    }

    fn refresh_applicable(&mut self) {
        self.applicable = match &self.identity {
            Some(identity) => self
                .rules
                .rules()
                .iter()
                .enumerate()
                .filter(|(_, r)| r.matches_activity(identity))
                .map(|(i, _)| i)
                .collect(),
            None => Vec::new(),
        };
    }

    fn set_identity<N>(&mut self, identity: &TopActivity, now: Instant, effects: &mut Vec<Effect<N>>) {
        let app_changed = self
            .identity
            .as_ref()
            .map_or(true, |i| i.app_id != identity.app_id);
        self.generation += 1;
        for rule in self.rules.rules_mut() {
            rule.on_identity_change(now, app_changed);
        }
        self.identity = Some(identity.clone());
        self.refresh_applicable();

        debug!(self.logger, "identity changed";
            "app" => &identity.app_id,
            "activity" => identity.activity_id.as_deref().unwrap_or("-"),
            "generation" => self.generation,
            "applicable" => self.applicable.len());

        for &i in &self.applicable {
            let rule = &self.rules.rules()[i];
            if rule.status(now) == RuleStatus::PendingMatchDelay {
                effects.push(Effect::ArmMatchDelay {
                    rule: rule.key().to_string(),
                    at: rule.match_ready_at(),
                    timers: rule.timers(),
                });
            }
        }
    }

    /// Nodes to query from: the refreshed source of an unmixed content change, else the root
    fn query_roots<A: TreeAdapter>(
        &self,
        adapter: &A,
        batch: Option<&Batch<A::Node>>,
        direct: &DirectTransform<'_, A>,
        logger: &Logger,
    ) -> (Vec<A::Node>, bool) {
        let source = batch
            .filter(|b| !b.mixed && b.kind == EventKind::ContentChanged)
            .and_then(|b| match b.sources.as_slice() {
                [only] => Some(only),
                [older, latest] if older == latest => Some(latest),
                _ => None,
            });
        if let Some(source) = source {
            if matches!(adapter.refresh(source), Ok(true)) {
                return (vec![source.clone()], false);
            }
            debug!(logger, "source node went stale, querying from the root"; "node" => ?source);
        }
        (direct.root().into_iter().collect(), true)
    }

    pub fn run_pass<A: TreeAdapter>(
        &mut self,
        adapter: &A,
        batch: Option<&Batch<A::Node>>,
        identity: &TopActivity,
        trigger: PassTrigger,
        now: Instant,
    ) -> (PassReport, Vec<Effect<A::Node>>) {
        self.passes += 1;
        let logger = self.logger.new(o!("pass" => self.passes));
        let mut effects = Vec::new();

        if self.identity.as_ref() != Some(identity) {
            self.set_identity(identity, now, &mut effects);
        }

        let mut report = PassReport {
            pass: self.passes,
            trigger,
            identity: identity.clone(),
            generation: self.generation,
            events: batch.map_or(0, |b| b.events),
            sources: batch.map_or(0, |b| b.sources.len()),
            from_root: false,
            evaluated: Vec::new(),
            matched: Vec::new(),
            acted: None,
            mismatch: false,
        };

        if !self.rules.enable_match() || self.applicable.is_empty() {
            return (report, effects);
        }

        let cached = CachedTransform::new(adapter, logger.clone());
        let direct = DirectTransform::new(adapter, logger.clone());
        let (roots, from_root) = self.query_roots(adapter, batch, &direct, &logger);
        report.from_root = from_root;
        if roots.is_empty() {
            return (report, effects);
        }

        let mut forced = false;
        let mut settling = false;
        for &i in &self.applicable {
            let rule = &mut self.rules.rules_mut()[i];
            if rule
                .last_trigger()
                .map_or(false, |at| now < at + self.options.trigger_recheck_window())
            {
                settling = true;
            }

            let status = rule.status(now);
            if status != RuleStatus::Ready {
                debug!(logger, "skipping rule"; "rule" => rule.key(), "status" => ?status);
                continue;
            }

            report.evaluated.push(rule.key().to_string());
            let found = if rule.use_cache() {
                rule.query(&roots, &cached)
            } else {
                rule.query(&roots, &direct)
            };

            let node = match found {
                RuleMatch::Hit(node) => node,
                miss => {
                    if rule.is_action_due(now) {
                        debug!(logger, "selector no longer matches after action delay"; "rule" => rule.key());
                        rule.abandon_action_delay();
                    }
                    if matches!(miss, RuleMatch::Excluded) {
                        debug!(logger, "exclude selector matched"; "rule" => rule.key());
                    }
                    forced |= rule.is_forced(now);
                    continue;
                }
            };

            if let Ok(Some(app)) = adapter.app_id(&node) {
                if app != identity.app_id {
                    debug!(logger, "matched node belongs to another app";
                        "rule" => rule.key(), "expected" => &identity.app_id, "found" => &app);
                    report.mismatch = true;
                    effects.push(Effect::IdentityMismatch {
                        expected: identity.app_id.clone(),
                        found: app,
                    });
                    break;
                }
            }

            report.matched.push(rule.key().to_string());
            if rule.needs_action_delay() {
                if let Some(at) = rule.begin_action_delay(now) {
                    debug!(logger, "match, waiting out action delay"; "rule" => rule.key());
                    effects.push(Effect::ArmActionDelay {
                        rule: rule.key().to_string(),
                        at,
                        timers: rule.timers(),
                    });
                }
                continue;
            }

            rule.dispatch(now);
            debug!(logger, "dispatching action"; "rule" => rule.key(), "action" => ?rule.action());
            effects.push(Effect::Act(ActionRequest {
                rule: rule.key().to_string(),
                node,
                action: rule.action(),
                generation: self.generation,
            }));
            report.acted = Some(rule.key().to_string());
            break;
        }

        if report.acted.is_some() || forced || settling {
            effects.push(Effect::Recheck);
        }
        (report, effects)
    }
}
