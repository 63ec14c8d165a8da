//! Certificate identity policy.
//!
//! Compiles the ordered rule list from [`PortalConfig`] and evaluates a
//! [`CertIdentity`] against it. The first rule whose `match` block applies
//! decides; if no rule applies the identity is denied.
//!
//! # Glob patterns
//!
//! | Pattern | Semantics |
//! |---------|-----------|
//! | `"*"` | matches everything |
//! | `"prefix*"` | prefix match |
//! | `"*suffix"` | suffix match |
//! | `"*contains*"` | contains match |
//! | `"exact"` | exact match |

use crate::config::{IdentityMatchConfig, IdentityRuleConfig, PortalConfig, RuleAction};
use crate::credentials::CertIdentity;

/// Outcome of evaluating an identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyDecision {
    /// The identity may log in.
    Allow,
    /// The identity is refused.
    Deny,
}

/// Compiled identity policy.
#[derive(Debug, Clone)]
pub struct IdentityPolicy {
    rules: Vec<CompiledRule>,
}

impl IdentityPolicy {
    /// Compile the rules from portal configuration.
    #[must_use]
    pub fn from_config(config: &PortalConfig) -> Self {
        Self {
            rules: config.rules.iter().map(CompiledRule::from_config).collect(),
        }
    }

    /// Decide whether `identity` may log in.
    #[must_use]
    pub fn evaluate(&self, identity: &CertIdentity) -> PolicyDecision {
        self.rules
            .iter()
            .find(|rule| rule.criteria.matches(identity))
            .map_or(PolicyDecision::Deny, |rule| rule.decision)
    }

    /// Number of compiled rules.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Returns `true` when no rule is configured (every identity is denied).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

#[derive(Debug, Clone)]
struct CompiledRule {
    criteria: CompiledCriteria,
    decision: PolicyDecision,
}

impl CompiledRule {
    fn from_config(rule: &IdentityRuleConfig) -> Self {
        Self {
            criteria: CompiledCriteria::from_config(&rule.match_criteria),
            decision: match rule.action {
                RuleAction::Allow => PolicyDecision::Allow,
                RuleAction::Deny => PolicyDecision::Deny,
            },
        }
    }
}

#[derive(Debug, Clone)]
struct CompiledCriteria {
    cn: Option<GlobPattern>,
    ou: Option<GlobPattern>,
    san_uri: Option<GlobPattern>,
    san_dns: Option<GlobPattern>,
    fingerprint: Option<String>,
    any: bool,
}

impl CompiledCriteria {
    fn from_config(cfg: &IdentityMatchConfig) -> Self {
        Self {
            cn: cfg.cn.as_deref().map(GlobPattern::new),
            ou: cfg.ou.as_deref().map(GlobPattern::new),
            san_uri: cfg.san_uri.as_deref().map(GlobPattern::new),
            san_dns: cfg.san_dns.as_deref().map(GlobPattern::new),
            fingerprint: cfg.fingerprint.as_deref().map(normalize_fingerprint),
            any: cfg.any.unwrap_or(false),
        }
    }

    fn matches(&self, identity: &CertIdentity) -> bool {
        if self.any {
            return true;
        }

        let checks = [
            self.cn.as_ref().map(|p| {
                identity
                    .common_name
                    .as_deref()
                    .is_some_and(|cn| p.matches(cn))
            }),
            self.ou.as_ref().map(|p| {
                identity
                    .organizational_unit
                    .as_deref()
                    .is_some_and(|ou| p.matches(ou))
            }),
            self.san_uri
                .as_ref()
                .map(|p| identity.san_uris.iter().any(|u| p.matches(u))),
            self.san_dns
                .as_ref()
                .map(|p| identity.san_dns_names.iter().any(|d| p.matches(d))),
            self.fingerprint
                .as_ref()
                .map(|fp| *fp == identity.fingerprint),
        ];

        // An empty match block matches nothing.
        checks.iter().any(Option::is_some) && checks.iter().flatten().all(|ok| *ok)
    }
}

/// Accept `AB:CD:..` and `abcd..` spellings.
fn normalize_fingerprint(fp: &str) -> String {
    fp.chars()
        .filter(|c| *c != ':')
        .collect::<String>()
        .to_ascii_lowercase()
}

#[derive(Debug, Clone)]
enum GlobPattern {
    Wildcard,
    Exact(String),
    Prefix(String),
    Suffix(String),
    Contains(String),
}

impl GlobPattern {
    fn new(s: &str) -> Self {
        if s == "*" {
            return Self::Wildcard;
        }
        match (s.strip_prefix('*'), s.strip_suffix('*')) {
            (Some(rest), Some(_)) => match rest.strip_suffix('*') {
                Some("") | None => Self::Wildcard,
                Some(inner) => Self::Contains(inner.to_owned()),
            },
            (Some(suffix), None) => Self::Suffix(suffix.to_owned()),
            (None, Some(prefix)) => Self::Prefix(prefix.to_owned()),
            (None, None) => Self::Exact(s.to_owned()),
        }
    }

    fn matches(&self, name: &str) -> bool {
        match self {
            Self::Wildcard => true,
            Self::Exact(e) => name == e,
            Self::Prefix(p) => name.starts_with(p.as_str()),
            Self::Suffix(s) => name.ends_with(s.as_str()),
            Self::Contains(c) => name.contains(c.as_str()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(cn: Option<&str>, ou: Option<&str>, san_uris: &[&str]) -> CertIdentity {
        CertIdentity {
            common_name: cn.map(str::to_owned),
            organizational_unit: ou.map(str::to_owned),
            san_uris: san_uris.iter().map(|s| (*s).to_owned()).collect(),
            san_dns_names: vec![],
            fingerprint: "ab".repeat(32),
            display_name: cn.unwrap_or("<unknown>").to_owned(),
        }
    }

    fn rule(criteria: IdentityMatchConfig, action: RuleAction) -> IdentityRuleConfig {
        IdentityRuleConfig {
            match_criteria: criteria,
            action,
        }
    }

    fn policy(rules: Vec<IdentityRuleConfig>) -> IdentityPolicy {
        IdentityPolicy::from_config(&PortalConfig {
            rules,
            ..PortalConfig::default()
        })
    }

    #[test]
    fn empty_policy_denies() {
        let p = policy(vec![]);
        assert!(p.is_empty());
        assert_eq!(p.evaluate(&identity(Some("a"), None, &[])), PolicyDecision::Deny);
    }

    #[test]
    fn cn_exact_match_allows() {
        let p = policy(vec![rule(
            IdentityMatchConfig {
                cn: Some("alice".into()),
                ..Default::default()
            },
            RuleAction::Allow,
        )]);
        assert_eq!(p.evaluate(&identity(Some("alice"), None, &[])), PolicyDecision::Allow);
        assert_eq!(p.evaluate(&identity(Some("bob"), None, &[])), PolicyDecision::Deny);
    }

    #[test]
    fn first_matching_rule_wins() {
        let p = policy(vec![
            rule(
                IdentityMatchConfig {
                    cn: Some("mallory".into()),
                    ..Default::default()
                },
                RuleAction::Deny,
            ),
            rule(
                IdentityMatchConfig {
                    any: Some(true),
                    ..Default::default()
                },
                RuleAction::Allow,
            ),
        ]);
        assert_eq!(p.evaluate(&identity(Some("mallory"), None, &[])), PolicyDecision::Deny);
        assert_eq!(p.evaluate(&identity(Some("alice"), None, &[])), PolicyDecision::Allow);
    }

    #[test]
    fn all_specified_criteria_must_match() {
        let p = policy(vec![rule(
            IdentityMatchConfig {
                cn: Some("device-*".into()),
                ou: Some("phones".into()),
                ..Default::default()
            },
            RuleAction::Allow,
        )]);
        assert_eq!(
            p.evaluate(&identity(Some("device-1"), Some("phones"), &[])),
            PolicyDecision::Allow
        );
        assert_eq!(
            p.evaluate(&identity(Some("device-1"), Some("tablets"), &[])),
            PolicyDecision::Deny
        );
        assert_eq!(
            p.evaluate(&identity(Some("device-1"), None, &[])),
            PolicyDecision::Deny
        );
    }

    #[test]
    fn san_uri_glob_matches_any_entry() {
        let p = policy(vec![rule(
            IdentityMatchConfig {
                san_uri: Some("spiffe://example.org/*".into()),
                ..Default::default()
            },
            RuleAction::Allow,
        )]);
        let id = identity(None, None, &["https://x", "spiffe://example.org/device/7"]);
        assert_eq!(p.evaluate(&id), PolicyDecision::Allow);
    }

    #[test]
    fn fingerprint_match_ignores_colons_and_case() {
        let colon_upper = "AB:".repeat(31) + "AB";
        let p = policy(vec![rule(
            IdentityMatchConfig {
                fingerprint: Some(colon_upper),
                ..Default::default()
            },
            RuleAction::Allow,
        )]);
        assert_eq!(p.evaluate(&identity(None, None, &[])), PolicyDecision::Allow);
    }

    #[test]
    fn empty_match_block_matches_nothing() {
        let p = policy(vec![rule(IdentityMatchConfig::default(), RuleAction::Allow)]);
        assert_eq!(p.evaluate(&identity(Some("a"), None, &[])), PolicyDecision::Deny);
    }

    #[test]
    fn glob_variants() {
        assert!(GlobPattern::new("*").matches("anything"));
        assert!(GlobPattern::new("**").matches("anything"));
        assert!(GlobPattern::new("dev*").matches("device"));
        assert!(GlobPattern::new("*.example").matches("a.example"));
        assert!(GlobPattern::new("*mid*").matches("amidst"));
        assert!(GlobPattern::new("exact").matches("exact"));
        assert!(!GlobPattern::new("exact").matches("exactly"));
    }
}
