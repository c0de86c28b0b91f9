//! Declarative policies attached to an artifact and checked at decrypt time.
//!
//! A policy never touches key material. Once the data key is recovered,
//! every active policy must allow the request context or decryption is
//! refused.

use std::fmt;

use chrono::{DateTime, TimeDelta, Utc};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::artifact::{EncryptionPolicy, PolicyType};
use crate::errors::{AetherVaultError, Result};

/// A typed policy rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyRule {
    /// Artifact may be decrypted until `created_at + duration`.
    Ttl { duration: String },
    Environment(String),
    Instance(String),
    Region(String),
    MultiFactor { required: bool },
}

impl PolicyRule {
    pub fn policy_type(&self) -> PolicyType {
        match self {
            Self::Ttl { .. } => PolicyType::Ttl,
            Self::Environment(_) => PolicyType::Environment,
            Self::Instance(_) => PolicyType::Instance,
            Self::Region(_) => PolicyType::Region,
            Self::MultiFactor { .. } => PolicyType::MultiFactor,
        }
    }

    /// Build a rule from its type and the single caller-supplied value.
    pub fn from_value(policy_type: PolicyType, value: &str) -> Result<Self> {
        let value = value.trim();
        if value.is_empty() {
            return Err(AetherVaultError::InvalidInput(format!(
                "policy '{policy_type}' requires a value"
            )));
        }

        Ok(match policy_type {
            PolicyType::Ttl => {
                parse_duration(value)?;
                Self::Ttl {
                    duration: value.to_string(),
                }
            }
            PolicyType::Environment => Self::Environment(value.to_string()),
            PolicyType::Instance => Self::Instance(value.to_string()),
            PolicyType::Region => Self::Region(value.to_string()),
            PolicyType::MultiFactor => Self::MultiFactor {
                required: parse_flag(value)?,
            },
        })
    }

    fn to_rules(&self) -> Value {
        match self {
            Self::Ttl { duration } => json!({ "duration": duration }),
            Self::Environment(v) => json!({ "environment": v }),
            Self::Instance(v) => json!({ "instance": v }),
            Self::Region(v) => json!({ "region": v }),
            Self::MultiFactor { required } => json!({ "required": required }),
        }
    }

    /// Read the typed rule back out of a stored policy record.
    pub fn from_policy(policy: &EncryptionPolicy) -> Result<Self> {
        let rules: Value = serde_json::from_str(&policy.rules).map_err(|e| {
            AetherVaultError::MalformedMetadata(format!("policy '{}': {e}", policy.name))
        })?;

        let field = |key: &str| {
            rules.get(key).and_then(Value::as_str).ok_or_else(|| {
                AetherVaultError::MalformedMetadata(format!(
                    "policy '{}' is missing '{key}'",
                    policy.name
                ))
            })
        };

        match policy.policy_type {
            PolicyType::Ttl => Self::from_value(PolicyType::Ttl, field("duration")?),
            PolicyType::Environment => Ok(Self::Environment(field("environment")?.to_string())),
            PolicyType::Instance => Ok(Self::Instance(field("instance")?.to_string())),
            PolicyType::Region => Ok(Self::Region(field("region")?.to_string())),
            PolicyType::MultiFactor => Ok(Self::MultiFactor {
                required: rules.get("required").and_then(Value::as_bool).unwrap_or(true),
            }),
        }
    }

    /// Check this rule against `ctx` for an artifact created at `created_at`.
    pub fn evaluate(&self, created_at: DateTime<Utc>, ctx: &RequestContext) -> PolicyDecision {
        match self {
            Self::Ttl { duration } => {
                let expires = parse_duration(duration)
                    .ok()
                    .and_then(|d| created_at.checked_add_signed(d));
                match expires {
                    Some(expires) if ctx.now <= expires => PolicyDecision::Allowed,
                    Some(expires) => PolicyDecision::Denied(format!(
                        "artifact expired at {}",
                        expires.to_rfc3339()
                    )),
                    None => PolicyDecision::Denied(format!("unusable ttl '{duration}'")),
                }
            }
            Self::Environment(want) => matches_context("environment", want, &ctx.environment),
            Self::Instance(want) => matches_context("instance", want, &ctx.instance),
            Self::Region(want) => matches_context("region", want, &ctx.region),
            Self::MultiFactor { required } => {
                if !required || ctx.mfa_verified {
                    PolicyDecision::Allowed
                } else {
                    PolicyDecision::Denied("multi-factor verification required".into())
                }
            }
        }
    }
}

fn matches_context(what: &str, want: &str, have: &Option<String>) -> PolicyDecision {
    match have {
        Some(have) if have == want => PolicyDecision::Allowed,
        Some(have) => PolicyDecision::Denied(format!("{what} '{have}' does not match '{want}'")),
        None => PolicyDecision::Denied(format!("{what} '{want}' required but none supplied")),
    }
}

fn parse_flag(value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "yes" | "required" | "1" => Ok(true),
        "false" | "no" | "optional" | "0" => Ok(false),
        other => Err(AetherVaultError::InvalidInput(format!(
            "multi_factor expects true or false, got '{other}'"
        ))),
    }
}

/// Parse a duration such as `30s`, `15m`, `24h`, `7d` or `1h30m`.
pub fn parse_duration(text: &str) -> Result<TimeDelta> {
    let invalid = || AetherVaultError::InvalidInput(format!("invalid duration '{text}'"));

    let mut total: i64 = 0;
    let mut digits = String::new();
    for c in text.chars() {
        if c.is_ascii_digit() {
            digits.push(c);
            continue;
        }
        let unit: i64 = match c {
            's' => 1,
            'm' => 60,
            'h' => 3_600,
            'd' => 86_400,
            _ => return Err(invalid()),
        };
        let n: i64 = digits.parse().map_err(|_| invalid())?;
        total = n
            .checked_mul(unit)
            .and_then(|secs| total.checked_add(secs))
            .ok_or_else(invalid)?;
        digits.clear();
    }

    if !digits.is_empty() || total == 0 {
        return Err(invalid());
    }
    TimeDelta::try_seconds(total).ok_or_else(invalid)
}

/// One policy to attach during `Encrypt`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyRequest {
    pub name: String,
    pub rule: PolicyRule,
}

impl PolicyRequest {
    /// A request named after its policy type.
    pub fn new(rule: PolicyRule) -> Self {
        Self {
            name: rule.policy_type().to_string(),
            rule,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Parse the `type=value` shorthand, e.g. `ttl=24h` or `region=eu-west-1`.
    pub fn parse(text: &str) -> Result<Self> {
        let (kind, value) = text.split_once('=').ok_or_else(|| {
            AetherVaultError::InvalidInput(format!(
                "policy '{text}' must be in the form type=value"
            ))
        })?;
        let policy_type: PolicyType = kind.trim().parse()?;
        Ok(Self::new(PolicyRule::from_value(policy_type, value)?))
    }
}

/// Materialize the stored record for `request`.
pub(crate) fn create_policy(
    request: &PolicyRequest,
    artifact_id: Uuid,
    now: DateTime<Utc>,
) -> EncryptionPolicy {
    EncryptionPolicy {
        id: Uuid::new_v4(),
        artifact_id,
        name: request.name.clone(),
        policy_type: request.rule.policy_type(),
        rules: request.rule.to_rules().to_string(),
        is_active: true,
        created_at: now,
        updated_at: now,
    }
}

/// Facts about the decrypting caller that policies are checked against.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub now: DateTime<Utc>,
    pub environment: Option<String>,
    pub instance: Option<String>,
    pub region: Option<String>,
    pub mfa_verified: bool,
}

impl Default for RequestContext {
    fn default() -> Self {
        Self {
            now: Utc::now(),
            environment: None,
            instance: None,
            region: None,
            mfa_verified: false,
        }
    }
}

impl RequestContext {
    pub fn at(now: DateTime<Utc>) -> Self {
        Self {
            now,
            ..Self::default()
        }
    }

    pub fn with_environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = Some(environment.into());
        self
    }

    pub fn with_instance(mut self, instance: impl Into<String>) -> Self {
        self.instance = Some(instance.into());
        self
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    pub fn with_mfa(mut self, verified: bool) -> Self {
        self.mfa_verified = verified;
        self
    }
}

/// Outcome of checking policies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyDecision {
    Allowed,
    Denied(String),
}

impl fmt::Display for PolicyDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Allowed => f.write_str("allowed"),
            Self::Denied(reason) => write!(f, "denied: {reason}"),
        }
    }
}

/// Check every active policy; the first denial wins.
///
/// A stored policy whose rules cannot be read denies.
pub fn validate(
    policies: &[EncryptionPolicy],
    created_at: DateTime<Utc>,
    ctx: &RequestContext,
) -> PolicyDecision {
    for policy in policies.iter().filter(|p| p.is_active) {
        let decision = match PolicyRule::from_policy(policy) {
            Ok(rule) => rule.evaluate(created_at, ctx),
            Err(e) => PolicyDecision::Denied(e.to_string()),
        };
        if let PolicyDecision::Denied(reason) = decision {
            return PolicyDecision::Denied(format!("policy '{}': {reason}", policy.name));
        }
    }
    PolicyDecision::Allowed
}

/// `validate`, surfaced as a `PolicyViolation` error.
pub fn enforce(
    policies: &[EncryptionPolicy],
    created_at: DateTime<Utc>,
    ctx: &RequestContext,
) -> Result<()> {
    match validate(policies, created_at, ctx) {
        PolicyDecision::Allowed => Ok(()),
        PolicyDecision::Denied(reason) => Err(AetherVaultError::PolicyViolation(reason)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stored(text: &str, created: DateTime<Utc>) -> EncryptionPolicy {
        create_policy(&PolicyRequest::parse(text).unwrap(), Uuid::new_v4(), created)
    }

    #[test]
    fn parse_durations() {
        assert_eq!(parse_duration("30s").unwrap(), TimeDelta::seconds(30));
        assert_eq!(parse_duration("15m").unwrap(), TimeDelta::minutes(15));
        assert_eq!(parse_duration("24h").unwrap(), TimeDelta::hours(24));
        assert_eq!(parse_duration("7d").unwrap(), TimeDelta::days(7));
        assert_eq!(parse_duration("1h30m").unwrap(), TimeDelta::minutes(90));
    }

    #[test]
    fn reject_bad_durations() {
        for bad in ["", "24", "h", "3x", "0s", "1.5h", "-1h"] {
            assert!(parse_duration(bad).is_err(), "{bad} should be rejected");
        }
    }

    #[test]
    fn parse_policy_strings() {
        let p = PolicyRequest::parse("ttl=24h").unwrap();
        assert_eq!(p.name, "ttl");
        assert_eq!(
            p.rule,
            PolicyRule::Ttl {
                duration: "24h".into()
            }
        );

        let p = PolicyRequest::parse("environment=prod").unwrap();
        assert_eq!(p.rule, PolicyRule::Environment("prod".into()));

        let p = PolicyRequest::parse("multi_factor=true").unwrap();
        assert_eq!(p.name, "multi_factor");
        assert_eq!(p.rule, PolicyRule::MultiFactor { required: true });
    }

    #[test]
    fn reject_bad_policy_strings() {
        for bad in ["ttl", "ttl=", "ttl=forever", "color=blue", "multi_factor=maybe"] {
            let err = PolicyRequest::parse(bad).unwrap_err();
            assert!(matches!(err, AetherVaultError::InvalidInput(_)), "{bad}");
        }
    }

    #[test]
    fn stored_rules_use_named_fields() {
        let policy = stored("region=eu-west-1", Utc::now());
        assert_eq!(policy.policy_type, PolicyType::Region);
        assert_eq!(policy.rules, r#"{"region":"eu-west-1"}"#);
        assert_eq!(
            PolicyRule::from_policy(&policy).unwrap(),
            PolicyRule::Region("eu-west-1".into())
        );
    }

    #[test]
    fn ttl_allows_until_expiry() {
        let created = Utc::now();
        let policies = vec![stored("ttl=1h", created)];

        let inside = RequestContext::at(created + TimeDelta::minutes(59));
        assert_eq!(validate(&policies, created, &inside), PolicyDecision::Allowed);

        let edge = RequestContext::at(created + TimeDelta::hours(1));
        assert_eq!(validate(&policies, created, &edge), PolicyDecision::Allowed);

        let after = RequestContext::at(created + TimeDelta::minutes(61));
        assert!(matches!(
            validate(&policies, created, &after),
            PolicyDecision::Denied(_)
        ));
    }

    #[test]
    fn context_values_must_match() {
        let created = Utc::now();
        let policies = vec![stored("environment=prod", created)];

        let ok = RequestContext::at(created).with_environment("prod");
        assert_eq!(validate(&policies, created, &ok), PolicyDecision::Allowed);

        let wrong = RequestContext::at(created).with_environment("staging");
        assert!(matches!(
            validate(&policies, created, &wrong),
            PolicyDecision::Denied(_)
        ));

        let missing = RequestContext::at(created);
        assert!(matches!(
            validate(&policies, created, &missing),
            PolicyDecision::Denied(_)
        ));
    }

    #[test]
    fn multi_factor_requires_verification() {
        let created = Utc::now();
        let policies = vec![stored("multi_factor=true", created)];
        let ctx = RequestContext::at(created);
        assert!(enforce(&policies, created, &ctx).is_err());
        assert!(enforce(&policies, created, &ctx.with_mfa(true)).is_ok());
    }

    #[test]
    fn inactive_policies_are_skipped() {
        let created = Utc::now();
        let mut policy = stored("instance=i-123", created);
        policy.is_active = false;
        let ctx = RequestContext::at(created);
        assert_eq!(validate(&[policy], created, &ctx), PolicyDecision::Allowed);
    }

    #[test]
    fn unreadable_rules_deny() {
        let created = Utc::now();
        let mut policy = stored("ttl=1h", created);
        policy.rules = "{not json".into();
        let err = enforce(&[policy], created, &RequestContext::at(created)).unwrap_err();
        assert!(matches!(err, AetherVaultError::PolicyViolation(_)));
    }
}
