//! `Permission` scope strings and grant records (spec.md §3, §4.3).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Permission {
    pub domain: String,
    pub action: String,
    pub target: String,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ScopeParseError {
    #[error("scope '{0}' must have at least 3 colon-separated parts")]
    TooFewParts(String),
    #[error("scope '{0}' has an empty domain or action")]
    EmptyComponent(String),
}

impl Permission {
    /// `domain:action:target`, where target may itself contain colons
    /// (to permit URLs) — everything after the second colon is the target.
    pub fn parse(scope: &str) -> Result<Self, ScopeParseError> {
        let mut parts = scope.splitn(3, ':');
        let domain = parts.next().unwrap_or("");
        let action = parts.next().ok_or_else(|| ScopeParseError::TooFewParts(scope.to_string()))?;
        let target = parts.next().ok_or_else(|| ScopeParseError::TooFewParts(scope.to_string()))?;
        if domain.is_empty() || action.is_empty() {
            return Err(ScopeParseError::EmptyComponent(scope.to_string()));
        }
        Ok(Self {
            domain: domain.to_string(),
            action: action.to_string(),
            target: target.to_string(),
        })
    }

    pub fn scope(&self) -> String {
        format!("{}:{}:{}", self.domain, self.action, self.target)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantTtl {
    Step,
    Session,
    Global,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionGrant {
    pub scope: String,
    pub decision: String,
    pub granted_by: String,
    pub granted_at: DateTime<Utc>,
    pub ttl: GrantTtl,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_three_part_scope() {
        let p = Permission::parse("filesystem:read:workspace").unwrap();
        assert_eq!(p.domain, "filesystem");
        assert_eq!(p.action, "read");
        assert_eq!(p.target, "workspace");
    }

    #[test]
    fn target_may_contain_colons() {
        let p = Permission::parse("network:fetch:https://example.com:8080/x").unwrap();
        assert_eq!(p.target, "https://example.com:8080/x");
    }

    #[test]
    fn rejects_fewer_than_three_parts() {
        assert!(Permission::parse("domain:action").is_err());
        assert!(Permission::parse("domain").is_err());
    }

    /// Property 7 from spec.md §8: `parse` round-trips through `scope()`.
    #[test]
    fn parse_round_trips() {
        for scope in [
            "filesystem:read:workspace",
            "network:browser:https://a.b/c:d",
            "command:exec:ls",
        ] {
            let parsed = Permission::parse(scope).unwrap();
            assert_eq!(parsed.scope(), scope);
        }
    }
}
