//! Request-time authorization over a table of `(subject, object, action)` rules.
//!
//! A request is allowed when any rule whose subject is the principal id or one
//! of its roles matches both the path and the method. There is no deny rule.
//!
//! Resource patterns are matched segment by segment: `*` or `:name` stands
//! for exactly one non-empty segment, everything else is literal, and both
//! sides must have the same number of segments. `/users/*` therefore matches
//! `/users/42` but neither `/users` nor `/users/42/roles`.

use regex::Regex;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use super::error::PolicyError;
use crate::repositories::PolicyRepository;

pub use crate::models::PolicyRule;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Any,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourcePattern {
    segments: Vec<Segment>,
}

/// Split an absolute path into segments, ignoring one trailing slash.
/// Returns `None` for relative paths and empty interior segments.
fn split_path(path: &str) -> Option<Vec<&str>> {
    let rest = path.strip_prefix('/')?;
    let rest = rest.strip_suffix('/').unwrap_or(rest);
    if rest.is_empty() {
        return Some(Vec::new());
    }
    let segments: Vec<&str> = rest.split('/').collect();
    if segments.iter().any(|s| s.is_empty()) {
        return None;
    }
    Some(segments)
}

impl ResourcePattern {
    pub fn parse(pattern: &str) -> Result<Self, PolicyError> {
        let segments = split_path(pattern)
            .ok_or_else(|| PolicyError::InvalidPattern(pattern.to_string()))?
            .into_iter()
            .map(|s| {
                if s == "*" || (s.starts_with(':') && s.len() > 1) {
                    Segment::Any
                } else {
                    Segment::Literal(s.to_string())
                }
            })
            .collect();
        Ok(Self { segments })
    }

    pub fn matches(&self, path: &str) -> bool {
        let Some(parts) = split_path(path) else {
            return false;
        };
        parts.len() == self.segments.len()
            && self
                .segments
                .iter()
                .zip(parts)
                .all(|(segment, part)| match segment {
                    Segment::Any => true,
                    Segment::Literal(lit) => lit == part,
                })
    }
}

#[derive(Debug, Clone)]
enum ActionMatcher {
    Exact(String),
    Pattern(Regex),
}

const REGEX_META: &[char] = &[
    '.', '*', '+', '?', '(', ')', '[', ']', '{', '}', '|', '^', '$', '\\',
];

impl ActionMatcher {
    fn parse(action: &str) -> Result<Self, PolicyError> {
        if action.is_empty() {
            return Err(PolicyError::InvalidAction(action.to_string()));
        }
        if !action.contains(REGEX_META) {
            return Ok(ActionMatcher::Exact(action.to_string()));
        }
        Regex::new(&format!("^(?:{})$", action))
            .map(ActionMatcher::Pattern)
            .map_err(|_| PolicyError::InvalidAction(action.to_string()))
    }

    fn matches(&self, action: &str) -> bool {
        match self {
            ActionMatcher::Exact(expected) => expected == action,
            ActionMatcher::Pattern(re) => re.is_match(action),
        }
    }
}

#[derive(Debug, Clone)]
struct CompiledRule {
    resource: ResourcePattern,
    action: ActionMatcher,
}

impl CompiledRule {
    fn compile(rule: &PolicyRule) -> Result<Self, PolicyError> {
        Ok(Self {
            resource: ResourcePattern::parse(&rule.object)?,
            action: ActionMatcher::parse(&rule.action)?,
        })
    }
}

#[derive(Debug, Default)]
struct PolicyTable {
    by_subject: HashMap<String, Vec<CompiledRule>>,
    len: usize,
}

impl PolicyTable {
    fn build(rules: &[PolicyRule]) -> Self {
        let mut table = PolicyTable::default();
        for rule in rules {
            match CompiledRule::compile(rule) {
                Ok(compiled) => {
                    table
                        .by_subject
                        .entry(rule.subject.clone())
                        .or_default()
                        .push(compiled);
                    table.len += 1;
                }
                Err(e) => {
                    tracing::warn!(
                        subject = %rule.subject,
                        object = %rule.object,
                        action = %rule.action,
                        error = %e,
                        "Dropping unusable policy rule"
                    );
                }
            }
        }
        table
    }

    fn allows(&self, subject: &str, path: &str, action: &str) -> bool {
        self.by_subject.get(subject).is_some_and(|rules| {
            rules
                .iter()
                .any(|r| r.resource.matches(path) && r.action.matches(action))
        })
    }
}

/// Shared, read-mostly policy table. Clones share the same table.
#[derive(Clone, Default)]
pub struct PolicyEvaluator {
    table: Arc<RwLock<Arc<PolicyTable>>>,
}

impl PolicyEvaluator {
    pub fn new(rules: &[PolicyRule]) -> Self {
        Self {
            table: Arc::new(RwLock::new(Arc::new(PolicyTable::build(rules)))),
        }
    }

    pub async fn load(repository: &dyn PolicyRepository) -> Result<Self, anyhow::Error> {
        let evaluator = Self::default();
        evaluator.reload(repository).await?;
        Ok(evaluator)
    }

    /// Swap in a new table built from `rules`. In-flight checks finish against
    /// the table they started with. Returns the number of usable rules.
    pub fn replace_rules(&self, rules: &[PolicyRule]) -> usize {
        let table = Arc::new(PolicyTable::build(rules));
        let len = table.len;
        match self.table.write() {
            Ok(mut slot) => *slot = table,
            Err(poisoned) => *poisoned.into_inner() = table,
        }
        len
    }

    pub async fn reload(&self, repository: &dyn PolicyRepository) -> Result<usize, anyhow::Error> {
        let rules = repository.load_rules().await?;
        let loaded = self.replace_rules(&rules);
        tracing::info!(
            rules = loaded,
            dropped = rules.len() - loaded,
            "Policy table loaded"
        );
        Ok(loaded)
    }

    pub fn rule_count(&self) -> usize {
        self.snapshot().map(|t| t.len).unwrap_or(0)
    }

    fn snapshot(&self) -> Option<Arc<PolicyTable>> {
        self.table.read().ok().map(|t| Arc::clone(&t))
    }

    /// Whether `principal_id` or any of `roles` may perform `action` on `path`.
    ///
    /// An unreadable table denies.
    pub fn check<'a>(
        &self,
        principal_id: &str,
        roles: impl IntoIterator<Item = &'a str>,
        path: &str,
        action: &str,
    ) -> bool {
        let Some(table) = self.snapshot() else {
            tracing::error!("Policy table unavailable, denying");
            return false;
        };

        table.allows(principal_id, path, action)
            || roles
                .into_iter()
                .any(|role| table.allows(role, path, action))
    }
}
