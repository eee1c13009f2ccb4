//! Configuration snapshots consumed by the rule engine

use std::{path::Path, time::Duration};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid configuration: {0}")]
    Json(#[from] serde_json::Error),
}

/// Everything the engine needs to know about which rules exist and whether they may run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    /// Global switch; when off no rule is evaluated
    pub enable_match: bool,
    pub disabled_categories: Vec<String>,
    pub disabled_rules: Vec<String>,
    /// Notifications from these apps are dropped on arrival
    pub ignored_app_ids: Vec<String>,
    pub rules: Vec<RuleConfig>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            enable_match: true,
            disabled_categories: Vec::new(),
            disabled_rules: Vec::new(),
            ignored_app_ids: Vec::new(),
            rules: Vec::new(),
        }
    }
}

impl EngineConfig {
    pub fn from_json_str(s: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(s)?)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let s = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&s)
    }

    /// Whether the configuration switches the rule off, independent of its selector
    pub fn is_excluded(&self, rule: &RuleConfig) -> bool {
        !rule.enable
            || self.disabled_rules.contains(&rule.key)
            || rule
                .category
                .as_ref()
                .map_or(false, |c| self.disabled_categories.contains(c))
    }

    pub fn is_ignored_app(&self, app_id: &str) -> bool {
        self.ignored_app_ids.iter().any(|a| a == app_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleConfig {
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    /// Absent for rules that apply to every app
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_id: Option<String>,
    pub selector: String,
    #[serde(default)]
    pub exclude_selectors: Vec<String>,
    /// Activity prefixes; a leading `.` is relative to `appId`
    #[serde(default)]
    pub activity_ids: Vec<String>,
    #[serde(default)]
    pub exclude_activity_ids: Vec<String>,
    #[serde(default)]
    pub exclude_app_ids: Vec<String>,

    /// Milliseconds after the activity becomes current before the rule is eligible
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_delay: Option<u64>,
    /// Milliseconds between a match and the action, the selector is re-checked at the end
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_delay: Option<u64>,
    /// Cooldown in milliseconds after a trigger
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_cd: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_maximum: Option<u32>,
    /// Milliseconds after the activity becomes current during which the rule may match at all
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_time: Option<u64>,
    /// Milliseconds after the activity becomes current during which misses schedule rechecks
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub forced_time: Option<u64>,
    #[serde(default)]
    pub reset_match: ResetMatch,

    #[serde(default)]
    pub quick_find: bool,
    #[serde(default)]
    pub fast_query: bool,
    #[serde(default)]
    pub action: RuleAction,
    #[serde(default)]
    pub order: i32,
    #[serde(default = "enabled")]
    pub enable: bool,
}

fn enabled() -> bool {
    true
}

impl RuleConfig {
    /// A rule with only the required fields set
    pub fn new(key: impl Into<String>, selector: impl Into<String>) -> Self {
        RuleConfig {
            key: key.into(),
            name: None,
            category: None,
            app_id: None,
            selector: selector.into(),
            exclude_selectors: Vec::new(),
            activity_ids: Vec::new(),
            exclude_activity_ids: Vec::new(),
            exclude_app_ids: Vec::new(),
            match_delay: None,
            action_delay: None,
            action_cd: None,
            action_maximum: None,
            match_time: None,
            forced_time: None,
            reset_match: ResetMatch::default(),
            quick_find: false,
            fast_query: false,
            action: RuleAction::default(),
            order: 0,
            enable: true,
        }
    }
}

/// Which identity change restarts a rule's counters and windows
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ResetMatch {
    #[default]
    App,
    /// Also on every activity change within the app, including re-entering the same activity
    Activity,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RuleAction {
    #[default]
    Click,
    LongClick,
    Back,
    None,
}

/// Timing knobs of the scheduler, in milliseconds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SchedulerOptions {
    /// Delay of the trailing recheck after an action or a forced miss
    pub recheck_delay: u64,
    /// Bound on the wait for the authoritative top activity
    pub identity_timeout: u64,
    /// How long a cheap app id lookup is reused
    pub app_id_ttl: u64,
    /// Window after a trigger during which trailing rechecks are armed
    pub trigger_recheck_window: u64,
    pub activity_capacity: usize,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        SchedulerOptions {
            recheck_delay: 300,
            identity_timeout: 100,
            app_id_ttl: 50,
            trigger_recheck_window: 3000,
            activity_capacity: 128,
        }
    }
}

impl SchedulerOptions {
    pub fn recheck_delay(&self) -> Duration {
        Duration::from_millis(self.recheck_delay)
    }

    pub fn identity_timeout(&self) -> Duration {
        Duration::from_millis(self.identity_timeout)
    }

    pub fn app_id_ttl(&self) -> Duration {
        Duration::from_millis(self.app_id_ttl)
    }

    pub fn trigger_recheck_window(&self) -> Duration {
        Duration::from_millis(self.trigger_recheck_window)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::from_json_str(r#"{"rules": [{"key": "a", "selector": "[id=\"x\"]"}]}"#)
            .unwrap();
        assert!(config.enable_match);
        let rule = &config.rules[0];
        assert!(rule.enable);
        assert_eq!(rule.action, RuleAction::Click);
        assert_eq!(rule.reset_match, ResetMatch::App);
        assert_eq!(rule, &RuleConfig::new("a", "[id=\"x\"]"));
    }

    #[test]
    fn test_camel_case_fields() {
        let config = EngineConfig::from_json_str(
            r#"{
                "enableMatch": false,
                "disabledCategories": ["ads"],
                "rules": [{
                    "key": "skip",
                    "category": "ads",
                    "appId": "com.example",
                    "selector": "[text=\"Skip\"]",
                    "matchDelay": 2000,
                    "actionMaximum": 1,
                    "resetMatch": "activity",
                    "action": "longClick"
                }]
            }"#,
        )
        .unwrap();
        assert!(!config.enable_match);
        let rule = &config.rules[0];
        assert_eq!(rule.match_delay, Some(2000));
        assert_eq!(rule.action_maximum, Some(1));
        assert_eq!(rule.reset_match, ResetMatch::Activity);
        assert_eq!(rule.action, RuleAction::LongClick);
        assert!(config.is_excluded(rule));
    }

    #[test]
    fn test_missing_selector_is_an_error() {
        assert!(matches!(
            EngineConfig::from_json_str(r#"{"rules": [{"key": "a"}]}"#),
            Err(ConfigError::Json(_))
        ));
    }
}
