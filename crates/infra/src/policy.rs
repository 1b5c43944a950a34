//! File-backed RBAC policy.
//!
//! One rule per line, comma separated:
//!
//! ```text
//! # permission: role, resource pattern, action(s)
//! p, viewer, /reports/*, GET
//! p, editor, /reports/:id, (GET)|(PATCH)
//! p, admin, *, *
//! # inheritance: role, inherited role
//! g, admin, editor
//! ```
//!
//! Resource patterns: `*` matches any run of characters (including `/`),
//! `:name` matches one path segment. Actions are matched case-insensitively;
//! `|` separates alternatives and `*` matches every action.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;

use keystone_auth::{PolicyEngine, PolicyError, PolicyRequest};

#[derive(Debug, Error)]
pub enum PolicyLoadError {
    #[error("could not read policy file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("line {line}: {reason}")]
    Parse { line: usize, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Rule {
    role: String,
    resource: String,
    actions: Vec<String>,
}

impl Rule {
    fn matches(&self, resource: &str, action: &str) -> bool {
        action_matches(&self.actions, action) && resource_matches(&self.resource, resource)
    }
}

/// RBAC policy parsed from CSV rules.
#[derive(Debug, Clone, Default)]
pub struct CsvPolicy {
    rules: Vec<Rule>,
    parents: HashMap<String, Vec<String>>,
}

impl CsvPolicy {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, PolicyLoadError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| PolicyLoadError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let policy = Self::parse(&text)?;
        tracing::info!(path = %path.display(), rules = policy.rules.len(), "loaded rbac policy");
        Ok(policy)
    }

    pub fn parse(text: &str) -> Result<Self, PolicyLoadError> {
        let mut policy = CsvPolicy::default();

        for (index, raw) in text.lines().enumerate() {
            let line = index + 1;
            let trimmed = raw.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }

            let fields: Vec<&str> = trimmed.split(',').map(str::trim).collect();
            let parse_err = |reason: &str| PolicyLoadError::Parse {
                line,
                reason: reason.to_owned(),
            };
            if fields.iter().any(|f| f.is_empty()) {
                return Err(parse_err("empty field"));
            }

            match fields.as_slice() {
                ["p", role, resource, action] => policy.rules.push(Rule {
                    role: (*role).to_owned(),
                    resource: (*resource).to_owned(),
                    actions: parse_actions(action),
                }),
                ["p", ..] => return Err(parse_err("permission rules take a role, a resource and an action")),
                ["g", role, parent] => policy
                    .parents
                    .entry((*role).to_owned())
                    .or_default()
                    .push((*parent).to_owned()),
                ["g", ..] => return Err(parse_err("inheritance rules take a role and a parent role")),
                [kind, ..] => return Err(parse_err(&format!("unknown rule type '{kind}'"))),
                [] => return Err(parse_err("empty rule")),
            }
        }
        Ok(policy)
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    /// The role plus every role it inherits, transitively.
    fn effective_roles<'a>(&'a self, role: &'a str) -> HashSet<&'a str> {
        let mut seen: HashSet<&str> = HashSet::new();
        let mut pending = vec![role];
        while let Some(current) = pending.pop() {
            if !seen.insert(current) {
                continue;
            }
            if let Some(parents) = self.parents.get(current) {
                pending.extend(parents.iter().map(String::as_str));
            }
        }
        seen
    }

    pub fn allows(&self, role: &str, resource: &str, action: &str) -> bool {
        let roles = self.effective_roles(role);
        self.rules
            .iter()
            .any(|rule| roles.contains(rule.role.as_str()) && rule.matches(resource, action))
    }
}

#[async_trait]
impl PolicyEngine for CsvPolicy {
    async fn enforce(&self, request: &PolicyRequest) -> Result<bool, PolicyError> {
        Ok(self.allows(request.role.as_str(), &request.resource, &request.action))
    }
}

fn parse_actions(raw: &str) -> Vec<String> {
    raw.split('|')
        .map(|a| a.trim().trim_start_matches('(').trim_end_matches(')').trim().to_ascii_uppercase())
        .filter(|a| !a.is_empty())
        .collect()
}

fn action_matches(allowed: &[String], action: &str) -> bool {
    allowed.iter().any(|a| a == "*" || a.eq_ignore_ascii_case(action))
}

fn resource_matches(pattern: &str, resource: &str) -> bool {
    glob(pattern.as_bytes(), resource.as_bytes())
}

fn glob(pattern: &[u8], input: &[u8]) -> bool {
    match pattern.split_first() {
        None => input.is_empty(),
        Some((b'*', rest)) => (0..=input.len()).any(|skip| glob(rest, &input[skip..])),
        Some((b':', rest)) => {
            // `:name` consumes one non-empty segment.
            let name_len = rest.iter().position(|c| *c == b'/').unwrap_or(rest.len());
            let rest = &rest[name_len..];
            let segment_len = input.iter().position(|c| *c == b'/').unwrap_or(input.len());
            segment_len > 0 && glob(rest, &input[segment_len..])
        }
        Some((c, rest)) => input.split_first().is_some_and(|(i, tail)| i == c && glob(rest, tail)),
    }
}
