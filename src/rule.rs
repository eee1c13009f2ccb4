//! Rules: a selector bound to its scheduling state

use std::time::Duration;

use slog::{info, o, warn, Logger};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::{
    config::{EngineConfig, ResetMatch, RuleAction, RuleConfig},
    parser::SelectorError,
    schema::Schema,
    scheduler::TopActivity,
    selector::{MatchOption, Selector},
    transform::Transform,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisabledReason {
    /// Switched off by the configuration
    Excluded,
    /// The selector does not type check
    CheckFailed,
    /// `actionMaximum` triggers happened since the last reset
    CapReached,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleStatus {
    Disabled(DisabledReason),
    /// `matchTime` has passed since the activity became current
    Expired,
    PendingMatchDelay,
    /// An action was handed to the action lane and has not reported back
    Acting,
    PendingActionDelay,
    /// Cooling down after a trigger
    Triggered,
    Ready,
}

/// Outcome of querying one rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleMatch<N> {
    Miss,
    /// The selector matched but an exclude selector did too
    Excluded,
    Hit(N),
}

pub struct ResolvedRule {
    config: RuleConfig,
    selector: Selector,
    exclude_selectors: Vec<Selector>,
    option: MatchOption,
    check_error: Option<SelectorError>,
    excluded: bool,

    /// When the current activity (or app, see `resetMatch`) became current
    match_changed_at: Instant,
    action_delay_started: Option<Instant>,
    action_count: u32,
    last_trigger: Option<Instant>,
    /// Dispatch time of the action the action lane has not reported back yet
    acting: Option<Instant>,
    timers: CancellationToken,
}

impl ResolvedRule {
    /// Compile a rule; only a syntax error rejects it outright
    pub fn compile(
        config: RuleConfig,
        engine: &EngineConfig,
        schema: &Schema,
        now: Instant,
    ) -> Result<Self, SelectorError> {
        let selector = Selector::parse(&config.selector)?;
        let exclude_selectors = config
            .exclude_selectors
            .iter()
            .map(|s| Selector::parse(s))
            .collect::<Result<Vec<_>, _>>()?;

        let check_error = std::iter::once(&selector)
            .chain(&exclude_selectors)
            .find_map(|s| s.check_type(schema).err());

        Ok(ResolvedRule {
            option: MatchOption {
                quick_find: config.quick_find,
                fast_query: config.fast_query,
            },
            excluded: engine.is_excluded(&config),
            config,
            selector,
            exclude_selectors,
            check_error,
            match_changed_at: now,
            action_delay_started: None,
            action_count: 0,
            last_trigger: None,
            acting: None,
            timers: CancellationToken::new(),
        })
    }

    pub fn key(&self) -> &str {
        &self.config.key
    }

    pub fn config(&self) -> &RuleConfig {
        &self.config
    }

    pub fn selector(&self) -> &Selector {
        &self.selector
    }

    pub fn action(&self) -> RuleAction {
        self.config.action
    }

    pub fn check_error(&self) -> Option<&SelectorError> {
        self.check_error.as_ref()
    }

    pub fn action_count(&self) -> u32 {
        self.action_count
    }

    pub fn use_cache(&self) -> bool {
        self.selector.use_cache() || self.exclude_selectors.iter().any(Selector::use_cache)
    }

    /// Cancelled whenever the rule's pending delays become meaningless
    pub fn timers(&self) -> CancellationToken {
        self.timers.clone()
    }

    pub fn status(&self, now: Instant) -> RuleStatus {
        if self.excluded {
            return RuleStatus::Disabled(DisabledReason::Excluded);
        }
        if self.check_error.is_some() {
            return RuleStatus::Disabled(DisabledReason::CheckFailed);
        }
        if let Some(max) = self.config.action_maximum {
            if self.action_count >= max {
                return RuleStatus::Disabled(DisabledReason::CapReached);
            }
        }
        if let Some(window) = self.config.match_time {
            if now >= self.match_changed_at + millis(window) {
                return RuleStatus::Expired;
            }
        }
        if now < self.match_ready_at() {
            return RuleStatus::PendingMatchDelay;
        }
        if self.acting.is_some() {
            return RuleStatus::Acting;
        }
        if let Some(deadline) = self.action_deadline() {
            if now < deadline {
                return RuleStatus::PendingActionDelay;
            }
        }
        if let (Some(at), Some(cd)) = (self.last_trigger, self.config.action_cd) {
            if now < at + millis(cd) {
                return RuleStatus::Triggered;
            }
        }
        RuleStatus::Ready
    }

    pub fn match_ready_at(&self) -> Instant {
        self.match_changed_at + millis(self.config.match_delay.unwrap_or(0))
    }

    pub fn action_deadline(&self) -> Option<Instant> {
        let started = self.action_delay_started?;
        Some(started + millis(self.config.action_delay.unwrap_or(0)))
    }

    /// A started action delay has run out and the selector must be re-checked before acting
    pub fn is_action_due(&self, now: Instant) -> bool {
        self.action_deadline().map_or(false, |d| now >= d)
    }

    pub fn needs_action_delay(&self) -> bool {
        self.config.action_delay.map_or(false, |d| d > 0) && self.action_delay_started.is_none()
    }

    /// Misses inside the forced window keep rechecks coming
    pub fn is_forced(&self, now: Instant) -> bool {
        self.config
            .forced_time
            .map_or(false, |f| now < self.match_changed_at + millis(f))
    }

    pub fn matches_activity(&self, identity: &TopActivity) -> bool {
        if let Some(app) = &self.config.app_id {
            if app != &identity.app_id {
                return false;
            }
        }
        if self.config.exclude_app_ids.contains(&identity.app_id) {
            return false;
        }
        let Some(activity) = &identity.activity_id else {
            return true;
        };
        let app = self.config.app_id.as_deref().unwrap_or(&identity.app_id);
        let applies = |prefix: &String| {
            if prefix.starts_with('.') {
                activity.starts_with(&format!("{}{}", app, prefix))
            } else {
                activity.starts_with(prefix.as_str())
            }
        };
        if self.config.exclude_activity_ids.iter().any(applies) {
            return false;
        }
        self.config.activity_ids.is_empty() || self.config.activity_ids.iter().any(applies)
    }

    /// First hit among `roots`, unless an exclude selector also matches there
    pub fn query<T: Transform>(&self, roots: &[T::Node], t: &T) -> RuleMatch<T::Node> {
        for root in roots {
            if let Some(node) = self.selector.query(root, t, self.option) {
                let excluded = self
                    .exclude_selectors
                    .iter()
                    .any(|s| s.query(root, t, self.option).is_some());
                return if excluded {
                    RuleMatch::Excluded
                } else {
                    RuleMatch::Hit(node)
                };
            }
        }
        RuleMatch::Miss
    }

    /// Start the action delay, returning when it runs out
    pub fn begin_action_delay(&mut self, now: Instant) -> Option<Instant> {
        self.action_delay_started = Some(now);
        self.action_deadline()
    }

    /// The re-check at the end of an action delay missed; the next match starts over
    pub fn abandon_action_delay(&mut self) {
        self.action_delay_started = None;
    }

    /// Hand the action over; counters only move once it reports success
    pub fn dispatch(&mut self, now: Instant) {
        self.action_delay_started = None;
        self.acting = Some(now);
    }

    /// The action lane reported back. Returns whether the outcome counted as a trigger.
    pub fn action_finished(&mut self, succeeded: bool) -> bool {
        let Some(dispatched) = self.acting.take() else {
            return false;
        };
        if succeeded {
            self.action_count += 1;
            self.last_trigger = Some(dispatched);
        }
        succeeded
    }

    pub fn last_trigger(&self) -> Option<Instant> {
        self.last_trigger
    }

    /// React to a new app or activity becoming current
    pub fn on_identity_change(&mut self, now: Instant, app_changed: bool) {
        let pending = matches!(
            self.status(now),
            RuleStatus::PendingMatchDelay | RuleStatus::PendingActionDelay
        );
        if app_changed || pending || self.config.reset_match == ResetMatch::Activity {
            self.reset(now);
        }
    }

    /// Cancel pending delays and start counting from `now`
    pub fn reset(&mut self, now: Instant) {
        self.timers.cancel();
        self.timers = CancellationToken::new();
        self.match_changed_at = now;
        self.action_delay_started = None;
        self.action_count = 0;
        self.last_trigger = None;
        self.acting = None;
    }
}

fn millis(ms: u64) -> Duration {
    Duration::from_millis(ms)
}

/// A rule whose selector could not be parsed
pub struct RejectedRule {
    pub key: String,
    pub error: SelectorError,
}

/// The compiled rules of one configuration snapshot, in evaluation order
pub struct RuleSet {
    rules: Vec<ResolvedRule>,
    rejected: Vec<RejectedRule>,
    enable_match: bool,
}

impl RuleSet {
    pub fn compile(config: &EngineConfig, schema: &Schema, now: Instant, logger: &Logger) -> Self {
        let mut rules = Vec::with_capacity(config.rules.len());
        let mut rejected = Vec::new();

        for rule_config in &config.rules {
            let logger = logger.new(o!("rule" => rule_config.key.clone()));
            match ResolvedRule::compile(rule_config.clone(), config, schema, now) {
                Ok(rule) => {
                    if let Some(e) = rule.check_error() {
                        warn!(logger, "rule disabled, selector does not type check"; "error" => %e);
                    }
                    rules.push(rule);
                }
                Err(error) => {
                    warn!(logger, "rule rejected, selector does not parse"; "error" => %error);
                    rejected.push(RejectedRule {
                        key: rule_config.key.clone(),
                        error,
                    });
                }
            }
        }
        rules.sort_by_key(|r| r.config.order);

        info!(logger, "compiled rule set";
            "rules" => rules.len(),
            "rejected" => rejected.len(),
            "disabled" => rules.iter().filter(|r| matches!(r.status(now), RuleStatus::Disabled(_))).count());

        RuleSet {
            rules,
            rejected,
            enable_match: config.enable_match,
        }
    }

    pub fn enable_match(&self) -> bool {
        self.enable_match
    }

    pub fn rules(&self) -> &[ResolvedRule] {
        &self.rules
    }

    pub fn rules_mut(&mut self) -> &mut [ResolvedRule] {
        &mut self.rules
    }

    pub fn get(&self, key: &str) -> Option<&ResolvedRule> {
        self.rules.iter().find(|r| r.key() == key)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut ResolvedRule> {
        self.rules.iter_mut().find(|r| r.key() == key)
    }

    pub fn rejected(&self) -> &[RejectedRule] {
        &self.rejected
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}
