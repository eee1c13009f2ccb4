use std::time::Duration;

use nodesel::config::{EngineConfig, ResetMatch, RuleConfig, SchedulerOptions};
use nodesel::rule::{DisabledReason, RuleSet, RuleStatus};
use nodesel::scheduler::{Effect, Engine, PassReport, PassTrigger, TopActivity};
use nodesel::snapshot::{NodeId, SnapshotNode, SnapshotTree};
use nodesel::{ErrorKind, Schema};
use slog::{o, Discard, Logger};
use tokio::time::Instant;

const APP: &str = "com.example";

fn logger() -> Logger {
    Logger::root(Discard, o!())
}

fn ms(n: u64) -> Duration {
    Duration::from_millis(n)
}

fn screen(app: &str, texts: &[&str]) -> SnapshotTree {
    let mut root = SnapshotNode::with_id("root");
    root.app_id = Some(app.to_string());
    for text in texts {
        root = root.child(SnapshotNode::with_id("button").text(text).clickable());
    }
    SnapshotTree::new(root)
}

fn main_activity() -> TopActivity {
    TopActivity::new(APP, Some(format!("{APP}.MainActivity")))
}

fn engine(rules: Vec<RuleConfig>, now: Instant) -> Engine {
    let config = EngineConfig {
        rules,
        ..Default::default()
    };
    Engine::new(&config, Schema::standard(), SchedulerOptions::default(), now, logger())
}

fn pass(
    engine: &mut Engine,
    tree: &SnapshotTree,
    identity: &TopActivity,
    now: Instant,
) -> (PassReport, Vec<Effect<NodeId>>) {
    engine.run_pass(tree, None, identity, PassTrigger::Notification, now)
}

fn status(engine: &Engine, key: &str, now: Instant) -> RuleStatus {
    engine.rules().get(key).unwrap().status(now)
}

fn acted(effects: &[Effect<NodeId>]) -> Option<(String, NodeId)> {
    effects.iter().find_map(|e| match e {
        Effect::Act(request) => Some((request.rule.clone(), request.node)),
        _ => None,
    })
}

fn skip_rule() -> RuleConfig {
    RuleConfig::new("skip", "[text=\"Skip\" && clickable=true]")
}

#[test]
fn test_rule_set_compile() {
    let mut late = RuleConfig::new("late", "[id=\"a\"]");
    late.order = 10;
    let mut category = RuleConfig::new("category", "[id=\"a\"]");
    category.category = Some("ads".to_string());
    let mut off = RuleConfig::new("off", "[id=\"a\"]");
    off.enable = false;

    let config = EngineConfig {
        disabled_categories: vec!["ads".to_string()],
        rules: vec![
            late,
            RuleConfig::new("broken", "[id=\"a\""),
            RuleConfig::new("untyped", "[nope=1]"),
            category,
            off,
            RuleConfig::new("fine", "[id=\"a\"]"),
        ],
        ..Default::default()
    };
    let now = Instant::now();
    let rules = RuleSet::compile(&config, &Schema::standard(), now, &logger());

    assert_eq!(rules.rejected().len(), 1);
    assert_eq!(rules.rejected()[0].key, "broken");
    assert_eq!(rules.rejected()[0].error.kind(), ErrorKind::Syntax);

    let keys: Vec<_> = rules.rules().iter().map(|r| r.key()).collect();
    assert_eq!(keys, vec!["untyped", "category", "off", "fine", "late"]);

    let untyped = rules.get("untyped").unwrap();
    assert_eq!(untyped.check_error().map(|e| e.kind()), Some(ErrorKind::TypeCheck));
    assert_eq!(untyped.status(now), RuleStatus::Disabled(DisabledReason::CheckFailed));
    assert_eq!(
        rules.get("category").unwrap().status(now),
        RuleStatus::Disabled(DisabledReason::Excluded)
    );
    assert_eq!(
        rules.get("off").unwrap().status(now),
        RuleStatus::Disabled(DisabledReason::Excluded)
    );
    assert_eq!(rules.get("fine").unwrap().status(now), RuleStatus::Ready);
}

#[test]
fn test_rule_config_from_json() {
    let config = EngineConfig::from_json_str(
        r#"{
            "enableMatch": true,
            "rules": [{
                "key": "splash",
                "appId": "com.example",
                "activityIds": [".ad.SplashActivity"],
                "selector": "[text^=\"Skip\"]",
                "excludeSelectors": ["[text=\"VIP\"]"],
                "matchDelay": 500,
                "actionMaximum": 1,
                "resetMatch": "app",
                "action": "longClick",
                "quickFind": true
            }]
        }"#,
    )
    .unwrap();
    let rule = &config.rules[0];
    assert_eq!(rule.match_delay, Some(500));
    assert_eq!(rule.reset_match, ResetMatch::App);
    assert!(rule.quick_find);
    assert_eq!(rule.exclude_selectors.len(), 1);
}

#[test]
fn test_activity_filters() {
    let mut config = RuleConfig::new("splash", "[id=\"a\"]");
    config.app_id = Some(APP.to_string());
    config.activity_ids = vec![".ad.Splash".to_string(), "com.sdk.AdActivity".to_string()];
    config.exclude_activity_ids = vec![".ad.SplashVip".to_string()];
    let rules = RuleSet::compile(
        &EngineConfig {
            rules: vec![config],
            ..Default::default()
        },
        &Schema::standard(),
        Instant::now(),
        &logger(),
    );
    let rule = rules.get("splash").unwrap();

    let at = |app: &str, activity: Option<&str>| {
        rule.matches_activity(&TopActivity::new(app, activity.map(str::to_string)))
    };
    assert!(at(APP, Some("com.example.ad.SplashActivity")));
    assert!(at(APP, Some("com.sdk.AdActivity")));
    assert!(!at(APP, Some("com.example.MainActivity")));
    assert!(!at(APP, Some("com.example.ad.SplashVipActivity")));
    // nothing known about the activity yet
    assert!(at(APP, None));
    assert!(!at("com.other", Some("com.example.ad.SplashActivity")));
}

#[test]
fn test_match_delay_restarts_on_activity_change() {
    let t0 = Instant::now();
    let mut rule = skip_rule();
    rule.match_delay = Some(2000);
    let mut engine = engine(vec![rule], t0);
    let tree = screen(APP, &["Skip"]);

    let (report, effects) = pass(&mut engine, &tree, &main_activity(), t0);
    assert!(report.evaluated.is_empty());
    let first_timer = match &effects[..] {
        [Effect::ArmMatchDelay { rule, at, timers }] => {
            assert_eq!(rule, "skip");
            assert_eq!(*at, t0 + ms(2000));
            timers.clone()
        }
        other => panic!("unexpected effects {other:?}"),
    };
    assert_eq!(status(&engine, "skip", t0 + ms(500)), RuleStatus::PendingMatchDelay);

    let second = TopActivity::new(APP, Some(format!("{APP}.DetailActivity")));
    let (_, effects) = pass(&mut engine, &tree, &second, t0 + ms(1000));
    assert!(first_timer.is_cancelled());
    assert!(effects
        .iter()
        .any(|e| matches!(e, Effect::ArmMatchDelay { at, .. } if *at == t0 + ms(3000))));

    let (report, effects) = pass(&mut engine, &tree, &second, t0 + ms(2000));
    assert!(report.evaluated.is_empty());
    assert_eq!(acted(&effects), None);

    let (report, effects) = pass(&mut engine, &tree, &second, t0 + ms(3000));
    assert_eq!(report.evaluated, vec!["skip".to_string()]);
    assert_eq!(acted(&effects), Some(("skip".to_string(), NodeId(1))));
}

#[test]
fn test_trigger_cap_disables_until_reset() {
    let t0 = Instant::now();
    let mut rule = skip_rule();
    rule.action_maximum = Some(1);
    let mut engine = engine(vec![rule], t0);
    let tree = screen(APP, &["Skip"]);
    let identity = main_activity();

    let (report, effects) = pass(&mut engine, &tree, &identity, t0);
    assert_eq!(report.acted.as_deref(), Some("skip"));
    assert!(effects.iter().any(|e| matches!(e, Effect::Recheck)));
    assert_eq!(status(&engine, "skip", t0), RuleStatus::Acting);

    engine.action_finished("skip", report.generation, true);
    assert_eq!(
        status(&engine, "skip", t0),
        RuleStatus::Disabled(DisabledReason::CapReached)
    );

    let (report, effects) = pass(&mut engine, &tree, &identity, t0 + ms(100));
    assert!(report.evaluated.is_empty());
    assert_eq!(acted(&effects), None);

    assert!(engine.reset_rule("skip", t0 + ms(200)));
    assert!(!engine.reset_rule("missing", t0 + ms(200)));
    let (report, _) = pass(&mut engine, &tree, &identity, t0 + ms(300));
    assert_eq!(report.acted.as_deref(), Some("skip"));
}

#[test]
fn test_stale_action_outcome_is_ignored() {
    let t0 = Instant::now();
    let mut engine = engine(vec![skip_rule()], t0);
    let tree = screen(APP, &["Skip"]);

    let (report, _) = pass(&mut engine, &tree, &main_activity(), t0);
    let generation = report.generation;
    assert_eq!(status(&engine, "skip", t0), RuleStatus::Acting);

    engine.action_finished("skip", generation + 1, true);
    assert_eq!(status(&engine, "skip", t0), RuleStatus::Acting);
    engine.action_finished("skip", generation, true);
    assert_eq!(status(&engine, "skip", t0), RuleStatus::Ready);
}

#[test]
fn test_action_delay_rechecks_before_acting() {
    let t0 = Instant::now();
    let mut rule = skip_rule();
    rule.action_delay = Some(500);
    let mut engine = engine(vec![rule], t0);
    let tree = screen(APP, &["Skip"]);
    let identity = main_activity();

    let (report, effects) = pass(&mut engine, &tree, &identity, t0);
    assert_eq!(report.matched, vec!["skip".to_string()]);
    assert_eq!(report.acted, None);
    assert!(effects
        .iter()
        .any(|e| matches!(e, Effect::ArmActionDelay { at, .. } if *at == t0 + ms(500))));
    assert_eq!(status(&engine, "skip", t0 + ms(100)), RuleStatus::PendingActionDelay);

    // the node went away while waiting: the rule starts over
    let gone = screen(APP, &["Next"]);
    let (report, effects) =
        engine.run_pass(&gone, None, &identity, PassTrigger::Delay, t0 + ms(500));
    assert_eq!(report.evaluated, vec!["skip".to_string()]);
    assert_eq!(acted(&effects), None);
    assert_eq!(status(&engine, "skip", t0 + ms(500)), RuleStatus::Ready);

    let (_, effects) = pass(&mut engine, &tree, &identity, t0 + ms(600));
    assert!(effects
        .iter()
        .any(|e| matches!(e, Effect::ArmActionDelay { at, .. } if *at == t0 + ms(1100))));
    let (report, effects) =
        engine.run_pass(&tree, None, &identity, PassTrigger::Delay, t0 + ms(1100));
    assert_eq!(report.acted.as_deref(), Some("skip"));
    assert_eq!(acted(&effects), Some(("skip".to_string(), NodeId(1))));
}

#[test]
fn test_cooldown_after_trigger() {
    let t0 = Instant::now();
    let mut rule = skip_rule();
    rule.action_cd = Some(1000);
    let mut engine = engine(vec![rule], t0);
    let tree = screen(APP, &["Skip"]);
    let identity = main_activity();

    let (report, _) = pass(&mut engine, &tree, &identity, t0);
    engine.action_finished("skip", report.generation, true);
    assert_eq!(status(&engine, "skip", t0 + ms(500)), RuleStatus::Triggered);

    let (report, _) = pass(&mut engine, &tree, &identity, t0 + ms(500));
    assert!(report.evaluated.is_empty());
    let (report, _) = pass(&mut engine, &tree, &identity, t0 + ms(1000));
    assert_eq!(report.acted.as_deref(), Some("skip"));
    assert_eq!(engine.rules().get("skip").unwrap().action_count(), 1);
    engine.action_finished("skip", report.generation, true);
    assert_eq!(engine.rules().get("skip").unwrap().action_count(), 2);
}

#[test]
fn test_match_time_expires() {
    let t0 = Instant::now();
    let mut rule = skip_rule();
    rule.match_time = Some(1000);
    let mut engine = engine(vec![rule], t0);
    let tree = screen(APP, &["Next"]);

    pass(&mut engine, &tree, &main_activity(), t0);
    assert_eq!(status(&engine, "skip", t0 + ms(999)), RuleStatus::Ready);
    assert_eq!(status(&engine, "skip", t0 + ms(1000)), RuleStatus::Expired);
}

#[test]
fn test_reset_policy() {
    let t0 = Instant::now();
    let mut per_app = skip_rule();
    per_app.key = "per_app".to_string();
    per_app.reset_match = ResetMatch::App;
    per_app.action_maximum = Some(1);
    let mut per_activity = skip_rule();
    per_activity.key = "per_activity".to_string();
    per_activity.reset_match = ResetMatch::Activity;
    per_activity.action_maximum = Some(1);
    per_activity.order = 1;
    let mut engine = engine(vec![per_app, per_activity], t0);
    let tree = screen(APP, &["Skip"]);

    // one action per pass, so two passes to trigger both
    let (report, _) = pass(&mut engine, &tree, &main_activity(), t0);
    engine.action_finished("per_app", report.generation, true);
    let (report, _) = pass(&mut engine, &tree, &main_activity(), t0 + ms(10));
    assert_eq!(report.acted.as_deref(), Some("per_activity"));
    engine.action_finished("per_activity", report.generation, true);

    // a new activity restarts only the rule that resets per activity
    let detail = TopActivity::new(APP, Some(format!("{APP}.DetailActivity")));
    let (report, _) = pass(&mut engine, &tree, &detail, t0 + ms(20));
    assert_eq!(report.acted.as_deref(), Some("per_activity"));
    assert_eq!(
        status(&engine, "per_app", t0 + ms(20)),
        RuleStatus::Disabled(DisabledReason::CapReached)
    );

    let other = screen("com.other", &["Next"]);
    pass(&mut engine, &other, &TopActivity::new("com.other", None), t0 + ms(30));
    assert_eq!(status(&engine, "per_app", t0 + ms(30)), RuleStatus::Ready);
    assert_eq!(status(&engine, "per_activity", t0 + ms(30)), RuleStatus::Ready);
}

#[test]
fn test_exclude_selector_blocks_match() {
    let t0 = Instant::now();
    let mut rule = skip_rule();
    rule.exclude_selectors = vec!["[text=\"VIP\"]".to_string()];
    let mut engine = engine(vec![rule], t0);

    let (report, _) = pass(&mut engine, &screen(APP, &["Skip", "VIP"]), &main_activity(), t0);
    assert_eq!(report.evaluated, vec!["skip".to_string()]);
    assert!(report.matched.is_empty());

    let (report, _) = pass(&mut engine, &screen(APP, &["Skip"]), &main_activity(), t0);
    assert_eq!(report.acted.as_deref(), Some("skip"));
}

#[test]
fn test_foreign_node_reports_identity_mismatch() {
    let t0 = Instant::now();
    let mut engine = engine(vec![skip_rule()], t0);
    let tree = screen("com.overlay", &["Skip"]);

    let (report, effects) = pass(&mut engine, &tree, &main_activity(), t0);
    assert!(report.mismatch);
    assert_eq!(report.acted, None);
    assert!(effects.iter().any(|e| matches!(
        e,
        Effect::IdentityMismatch { expected, found } if expected == APP && found == "com.overlay"
    )));
}

#[test]
fn test_forced_misses_keep_rechecking() {
    let t0 = Instant::now();
    let mut forced = skip_rule();
    forced.forced_time = Some(2000);
    let mut engine = engine(vec![forced], t0);
    let tree = screen(APP, &["Next"]);

    let (_, effects) = pass(&mut engine, &tree, &main_activity(), t0);
    assert!(effects.iter().any(|e| matches!(e, Effect::Recheck)));
    let (_, effects) = pass(&mut engine, &tree, &main_activity(), t0 + ms(2000));
    assert!(!effects.iter().any(|e| matches!(e, Effect::Recheck)));
}

#[test]
fn test_rules_for_other_apps_are_not_evaluated() {
    let t0 = Instant::now();
    let mut rule = skip_rule();
    rule.app_id = Some("com.other".to_string());
    let mut engine = engine(vec![rule], t0);

    let (report, _) = pass(&mut engine, &screen(APP, &["Skip"]), &main_activity(), t0);
    assert!(report.evaluated.is_empty());
}

#[test]
fn test_global_switch() {
    let t0 = Instant::now();
    let config = EngineConfig {
        enable_match: false,
        rules: vec![skip_rule()],
        ..Default::default()
    };
    let mut engine = Engine::new(&config, Schema::standard(), SchedulerOptions::default(), t0, logger());
    let (report, effects) = pass(&mut engine, &screen(APP, &["Skip"]), &main_activity(), t0);
    assert!(report.evaluated.is_empty());
    assert!(effects.is_empty());

    engine.update_config(
        &EngineConfig {
            rules: vec![skip_rule()],
            ..Default::default()
        },
        t0,
    );
    let (report, _) = pass(&mut engine, &screen(APP, &["Skip"]), &main_activity(), t0);
    assert_eq!(report.acted.as_deref(), Some("skip"));
}

#[test]
fn test_failed_action_keeps_rule_eligible() {
    let t0 = Instant::now();
    let mut rule = skip_rule();
    rule.action_maximum = Some(1);
    rule.action_cd = Some(1000);
    let mut engine = engine(vec![rule], t0);
    let tree = screen(APP, &["Skip"]);
    let identity = main_activity();

    let (report, _) = pass(&mut engine, &tree, &identity, t0);
    assert_eq!(report.acted.as_deref(), Some("skip"));
    assert_eq!(status(&engine, "skip", t0), RuleStatus::Acting);

    // neither the cap nor the cooldown is charged for a failed attempt
    engine.action_finished("skip", report.generation, false);
    let rule = engine.rules().get("skip").unwrap();
    assert_eq!(rule.action_count(), 0);
    assert_eq!(rule.last_trigger(), None);
    assert_eq!(status(&engine, "skip", t0 + ms(10)), RuleStatus::Ready);

    let (report, _) = pass(&mut engine, &tree, &identity, t0 + ms(10));
    assert_eq!(report.acted.as_deref(), Some("skip"));
    engine.action_finished("skip", report.generation, true);
    let rule = engine.rules().get("skip").unwrap();
    assert_eq!(rule.action_count(), 1);
    assert_eq!(rule.last_trigger(), Some(t0 + ms(10)));
    assert_eq!(
        status(&engine, "skip", t0 + ms(20)),
        RuleStatus::Disabled(DisabledReason::CapReached)
    );
}

#[test]
fn test_reentering_activity_keeps_cap_by_default() {
    let t0 = Instant::now();
    let mut capped = skip_rule();
    capped.key = "capped".to_string();
    capped.action_maximum = Some(1);
    let mut per_activity = skip_rule();
    per_activity.key = "per_activity".to_string();
    per_activity.reset_match = ResetMatch::Activity;
    per_activity.action_maximum = Some(1);
    per_activity.order = 1;
    let mut engine = engine(vec![capped, per_activity], t0);
    let tree = screen(APP, &["Skip"]);

    let (report, _) = pass(&mut engine, &tree, &main_activity(), t0);
    engine.action_finished("capped", report.generation, true);
    let (report, _) = pass(&mut engine, &tree, &main_activity(), t0 + ms(10));
    engine.action_finished("per_activity", report.generation, true);

    // the same activity entered again
    let again = TopActivity {
        number: 1,
        ..main_activity()
    };
    let (report, _) = pass(&mut engine, &tree, &again, t0 + ms(2000));
    assert_eq!(report.evaluated, vec!["per_activity".to_string()]);
    assert_eq!(report.acted.as_deref(), Some("per_activity"));
    assert_eq!(
        status(&engine, "capped", t0 + ms(2000)),
        RuleStatus::Disabled(DisabledReason::CapReached)
    );
}
