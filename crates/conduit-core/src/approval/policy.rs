//! Policy evaluation — ordered glob rules, first match wins.
//!
//! Grounded in the teacher's `tools::registry::ToolCategory` coarse `ReadOnly`/`Write`/
//! `Interactive` split (SPEC_FULL.md §4.3.1), generalized into explicit glob rules rather than a
//! hardcoded category match.

use glob::Pattern;
use serde::{Deserialize, Serialize};

use crate::storage::RequestType;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyRule {
    pub request_type: RequestType,
    pub subject_pattern: String,
    pub requires_approval: bool,
    pub reason: Option<String>,
}

impl PolicyRule {
    fn matches(&self, request_type: RequestType, subject: &str) -> bool {
        if self.request_type != request_type {
            return false;
        }
        Pattern::new(&self.subject_pattern.to_lowercase())
            .map(|p| p.matches(&subject.to_lowercase()))
            .unwrap_or(false)
    }
}

/// An ordered set of rules plus the fallback used when nothing matches.
#[derive(Debug, Clone)]
pub struct ApprovalPolicy {
    rules: Vec<PolicyRule>,
    default_requires_approval: bool,
}

impl ApprovalPolicy {
    pub fn new(rules: Vec<PolicyRule>, default_requires_approval: bool) -> Self {
        Self {
            rules,
            default_requires_approval,
        }
    }

    /// SPEC_FULL.md §4.3.1's built-in default: read-ish tools skip approval, mutating tools and
    /// any plan confirmation require it.
    pub fn default_policy() -> Self {
        let rule = |request_type: RequestType, subject_pattern: &str, requires_approval: bool, reason: Option<&str>| {
            PolicyRule {
                request_type,
                subject_pattern: subject_pattern.to_string(),
                requires_approval,
                reason: reason.map(ToString::to_string),
            }
        };
        Self::new(
            vec![
                rule(RequestType::Tool, "read*", false, None),
                rule(RequestType::Tool, "glob", false, None),
                rule(RequestType::Tool, "grep", false, None),
                rule(RequestType::Tool, "write*", true, Some("file mutation")),
                rule(RequestType::Tool, "edit*", true, Some("file mutation")),
                rule(RequestType::Tool, "bash", true, Some("shell execution")),
                rule(RequestType::Plan, "*", true, Some("plan confirmation")),
            ],
            true,
        )
    }

    /// Replaces the rule set wholesale — the hot-reload path named in SPEC_FULL.md §4.3.1.
    pub fn reload(&mut self, rules: Vec<PolicyRule>, default_requires_approval: bool) {
        self.rules = rules;
        self.default_requires_approval = default_requires_approval;
    }

    /// Pure function of the current policy: first matching rule wins.
    pub fn should_require(&self, request_type: RequestType, subject: &str) -> (bool, Option<String>) {
        for rule in &self.rules {
            if rule.matches(request_type, subject) {
                return (rule.requires_approval, rule.reason.clone());
            }
        }
        (self.default_requires_approval, None)
    }
}

impl Default for ApprovalPolicy {
    fn default() -> Self {
        Self::default_policy()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_file_does_not_require_approval() {
        let policy = ApprovalPolicy::default_policy();
        let (requires, _) = policy.should_require(RequestType::Tool, "read_file");
        assert!(!requires);
    }

    #[test]
    fn bash_requires_approval_with_reason() {
        let policy = ApprovalPolicy::default_policy();
        let (requires, reason) = policy.should_require(RequestType::Tool, "bash");
        assert!(requires);
        assert_eq!(reason.as_deref(), Some("shell execution"));
    }

    #[test]
    fn unknown_tool_falls_back_to_default_requires_approval() {
        let policy = ApprovalPolicy::default_policy();
        let (requires, _) = policy.should_require(RequestType::Tool, "some_future_tool");
        assert!(requires);
    }

    #[test]
    fn plan_confirmation_always_requires_approval() {
        let policy = ApprovalPolicy::default_policy();
        let (requires, reason) = policy.should_require(RequestType::Plan, "anything");
        assert!(requires);
        assert_eq!(reason.as_deref(), Some("plan confirmation"));
    }

    #[test]
    fn matching_is_case_insensitive() {
        let policy = ApprovalPolicy::default_policy();
        let (requires, _) = policy.should_require(RequestType::Tool, "READ_FILE");
        assert!(!requires);
    }
}
