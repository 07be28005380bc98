//! Auto-approval rule engine.
//!
//! Rules are evaluated in order against every permission request before it is
//! forwarded to the relay; the first match wins. File tools glob the path,
//! `execute_bash` matches the command as substring or prefix.

use std::sync::RwLock;

use globset::GlobBuilder;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RuleAction {
    AutoApprove,
    Ask,
    Deny,
}

impl RuleAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AutoApprove => "auto-approve",
            Self::Ask => "ask",
            Self::Deny => "deny",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoApprovalRule {
    #[serde(default)]
    pub id: String,
    /// Tool name the rule applies to; "" or "*" matches any tool.
    #[serde(default)]
    pub tool: String,
    /// Glob for `fs_*` paths, substring/prefix for `execute_bash` commands;
    /// "" or "*" matches anything.
    #[serde(default)]
    pub pattern: String,
    pub action: RuleAction,
}

#[derive(Default)]
pub struct RulesEngine {
    rules: RwLock<Vec<AutoApprovalRule>>,
}

impl RulesEngine {
    pub fn new(rules: Vec<AutoApprovalRule>) -> Self {
        Self {
            rules: RwLock::new(rules),
        }
    }

    pub fn update_rules(&self, rules: Vec<AutoApprovalRule>) {
        *self.rules.write().expect("rules lock") = rules;
    }

    pub fn rules(&self) -> Vec<AutoApprovalRule> {
        self.rules.read().expect("rules lock").clone()
    }

    /// Evaluate a permission request. Returns the action of the first
    /// matching rule and its id; no match means ask.
    pub fn evaluate(&self, tool: &str, path: &str, command: &str) -> (RuleAction, Option<String>) {
        let rules = self.rules.read().expect("rules lock");
        for rule in rules.iter() {
            if rule_matches(rule, tool, path, command) {
                return (rule.action, Some(rule.id.clone()));
            }
        }
        (RuleAction::Ask, None)
    }
}

fn rule_matches(rule: &AutoApprovalRule, tool: &str, path: &str, command: &str) -> bool {
    if !rule.tool.is_empty() && rule.tool != "*" && rule.tool != tool {
        return false;
    }

    if rule.pattern.is_empty() || rule.pattern == "*" {
        return true;
    }

    if tool.starts_with("fs_") && !path.is_empty() {
        if glob_match(&rule.pattern, path) {
            return true;
        }
        // `**` collapses to `*` for the fallback match; deliberately simpler
        // than full POSIX globbing.
        if rule.pattern.contains("**") && glob_match(&rule.pattern.replace("**", "*"), path) {
            return true;
        }
    }

    if tool == "execute_bash" && !command.is_empty() {
        if command.contains(&rule.pattern) || command.starts_with(&rule.pattern) {
            return true;
        }
    }

    false
}

fn glob_match(pattern: &str, path: &str) -> bool {
    GlobBuilder::new(pattern)
        .literal_separator(true)
        .build()
        .map(|glob| glob.compile_matcher().is_match(path))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(tool: &str, pattern: &str, action: RuleAction) -> AutoApprovalRule {
        AutoApprovalRule {
            id: format!("rule-{tool}-{pattern}"),
            tool: tool.to_string(),
            pattern: pattern.to_string(),
            action,
        }
    }

    #[test]
    fn first_match_wins() {
        let engine = RulesEngine::new(vec![
            rule("fs_write", "/tmp/**", RuleAction::AutoApprove),
            rule("*", "*", RuleAction::Ask),
        ]);

        let (action, matched) = engine.evaluate("fs_write", "/tmp/x.log", "");
        assert_eq!(action, RuleAction::AutoApprove);
        assert!(matched.is_some());

        let (action, _) = engine.evaluate("fs_write", "/etc/hosts", "");
        assert_eq!(action, RuleAction::Ask);
    }

    #[test]
    fn no_match_defaults_to_ask() {
        let engine = RulesEngine::new(vec![rule("fs_read", "/srv/**", RuleAction::Deny)]);
        let (action, matched) = engine.evaluate("execute_bash", "", "ls");
        assert_eq!(action, RuleAction::Ask);
        assert!(matched.is_none());
    }

    #[test]
    fn tool_wildcards_match_any_tool() {
        let engine = RulesEngine::new(vec![rule("", "*", RuleAction::Deny)]);
        let (action, _) = engine.evaluate("fs_write", "/anywhere", "");
        assert_eq!(action, RuleAction::Deny);
    }

    #[test]
    fn bash_patterns_match_substring_and_prefix() {
        let engine = RulesEngine::new(vec![rule("execute_bash", "git ", RuleAction::AutoApprove)]);

        let (action, _) = engine.evaluate("execute_bash", "", "git status");
        assert_eq!(action, RuleAction::AutoApprove);

        let (action, _) = engine.evaluate("execute_bash", "", "cd repo && git pull");
        assert_eq!(action, RuleAction::AutoApprove);

        let (action, _) = engine.evaluate("execute_bash", "", "rm -rf /");
        assert_eq!(action, RuleAction::Ask);
    }

    #[test]
    fn single_star_does_not_cross_directories() {
        let engine = RulesEngine::new(vec![rule("fs_write", "/tmp/*", RuleAction::AutoApprove)]);

        let (action, _) = engine.evaluate("fs_write", "/tmp/file.txt", "");
        assert_eq!(action, RuleAction::AutoApprove);

        let (action, _) = engine.evaluate("fs_write", "/tmp/nested/file.txt", "");
        assert_eq!(action, RuleAction::Ask);
    }

    #[test]
    fn double_star_crosses_directories() {
        let engine = RulesEngine::new(vec![rule("fs_write", "/tmp/**", RuleAction::AutoApprove)]);
        let (action, _) = engine.evaluate("fs_write", "/tmp/nested/deep/file.txt", "");
        assert_eq!(action, RuleAction::AutoApprove);
    }

    #[test]
    fn update_replaces_rule_set() {
        let engine = RulesEngine::new(vec![rule("*", "*", RuleAction::Deny)]);
        engine.update_rules(vec![rule("*", "*", RuleAction::AutoApprove)]);
        let (action, _) = engine.evaluate("fs_write", "/x", "");
        assert_eq!(action, RuleAction::AutoApprove);
    }
}
