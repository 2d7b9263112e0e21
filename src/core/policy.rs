//! Missing-key policy evaluation.

use crate::core::Snapshot;
use crate::error::{ConfigError, ErrorCode, ErrorInfo};
use std::fmt;

/// What to do when an observation lacks required keys.
///
/// Names are parsed leniently: an unrecognized name is kept and only turns
/// into a fatal configuration error when a key is actually missing.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MissingKeyPolicy {
    /// Halt the session.
    #[default]
    Exit,
    /// Report, then deliver the incomplete snapshot.
    Warn,
    /// Report, and deliver nothing for this observation.
    Skip,
    /// Fill missing keys from the last-good snapshot; halt if that is impossible.
    LastGoodValue,
    /// A name this version does not understand.
    Unrecognized(String),
}

impl MissingKeyPolicy {
    /// Parse a policy name.
    pub fn parse(name: &str) -> Self {
        match name {
            "exit" => Self::Exit,
            "warn" => Self::Warn,
            "skip" => Self::Skip,
            "lastGoodValue" => Self::LastGoodValue,
            other => Self::Unrecognized(other.to_string()),
        }
    }

    /// The configuration name of this policy.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Exit => "exit",
            Self::Warn => "warn",
            Self::Skip => "skip",
            Self::LastGoodValue => "lastGoodValue",
            Self::Unrecognized(name) => name,
        }
    }
}

impl From<&str> for MissingKeyPolicy {
    fn from(name: &str) -> Self {
        Self::parse(name)
    }
}

impl From<String> for MissingKeyPolicy {
    fn from(name: String) -> Self {
        Self::parse(&name)
    }
}

impl From<MissingKeyPolicy> for String {
    fn from(policy: MissingKeyPolicy) -> Self {
        policy.as_str().to_string()
    }
}

impl fmt::Display for MissingKeyPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which rule applies: the first observation or a later one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyStage {
    /// No observation has been delivered yet.
    StartUp,
    /// At least one observation has been delivered.
    Update,
}

impl PolicyStage {
    /// Name of the configuration rule for this stage.
    pub fn rule_name(&self) -> &'static str {
        match self {
            Self::StartUp => "ifMissingKeysOnStartUp",
            Self::Update => "ifMissingKeysOnUpdate",
        }
    }
}

/// Keys that every accepted snapshot must contain.
///
/// Membership is exact normalized-key match.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequiredKeySet {
    keys: Vec<String>,
}

impl RequiredKeySet {
    /// Create a set, keeping the given order.
    pub fn new<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            keys: keys.into_iter().map(Into::into).collect(),
        }
    }

    /// The required keys, in configuration order.
    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    /// Whether no keys are required.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Required keys absent from `snapshot`, in configuration order.
    pub fn missing_from(&self, snapshot: &Snapshot) -> Vec<String> {
        self.keys
            .iter()
            .filter(|key| !snapshot.contains_key(key))
            .cloned()
            .collect()
    }
}

/// Outcome of checking one snapshot against the required keys.
#[derive(Debug, Clone, PartialEq)]
pub enum PolicyDecision {
    /// Nothing was missing.
    Accept,
    /// Missing keys were filled from the last-good snapshot.
    AcceptWithSubstitutions(Vec<String>),
    /// Keys are missing but the snapshot is delivered anyway.
    WarnAndAccept(Vec<String>),
    /// Keys are missing and nothing is delivered.
    SkipEmit(Vec<String>),
    /// The session must halt.
    Fatal(ConfigError),
}

impl PolicyDecision {
    /// Whether subscribers hear about this observation.
    pub fn emits(&self) -> bool {
        matches!(
            self,
            Self::Accept | Self::AcceptWithSubstitutions(_) | Self::WarnAndAccept(_)
        )
    }

    /// Whether the evaluated snapshot becomes the new last-good baseline.
    ///
    /// A snapshot still missing required keys never does.
    pub fn replaces_last_good(&self) -> bool {
        matches!(self, Self::Accept | Self::AcceptWithSubstitutions(_))
    }

    /// Whether the session must halt.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal(_))
    }
}

/// Decision plus every event the evaluation wants reported, in order.
#[derive(Debug, Clone, PartialEq)]
pub struct PolicyOutcome {
    /// The decision.
    pub decision: PolicyDecision,
    /// Reports to deliver to error subscribers.
    pub reports: Vec<ErrorInfo>,
}

impl PolicyOutcome {
    fn new(decision: PolicyDecision) -> Self {
        Self {
            decision,
            reports: Vec::new(),
        }
    }

    fn with_report(mut self, report: ErrorInfo) -> Self {
        self.reports.push(report);
        self
    }
}

/// Check `snapshot` against `required` under `policy`.
///
/// Under [`MissingKeyPolicy::LastGoodValue`] the snapshot is modified in place
/// with the substituted values. It is left untouched by every other policy.
///
/// # Examples
///
/// ```rust
/// use kvwatch_config::core::{
///     MissingKeyPolicy, PolicyDecision, PolicyStage, RequiredKeySet, Snapshot, evaluate_policy,
/// };
///
/// let required = RequiredKeySet::new(["foo", "bar"]);
/// let last_good: Snapshot = [("foo", "old"), ("bar", "old")].into_iter().collect();
/// let mut snapshot: Snapshot = [("foo", "new")].into_iter().collect();
///
/// let outcome = evaluate_policy(
///     &mut snapshot,
///     &required,
///     &last_good,
///     &MissingKeyPolicy::LastGoodValue,
///     PolicyStage::Update,
/// );
/// assert_eq!(outcome.decision, PolicyDecision::AcceptWithSubstitutions(vec!["bar".into()]));
/// assert_eq!(snapshot.get("bar"), Some("old"));
/// ```
pub fn evaluate_policy(
    snapshot: &mut Snapshot,
    required: &RequiredKeySet,
    last_good: &Snapshot,
    policy: &MissingKeyPolicy,
    stage: PolicyStage,
) -> PolicyOutcome {
    let missing = required.missing_from(snapshot);
    if missing.is_empty() {
        return PolicyOutcome::new(PolicyDecision::Accept);
    }

    let missing_list = missing.join(", ");
    match policy {
        MissingKeyPolicy::Exit => {
            PolicyOutcome::new(PolicyDecision::Fatal(ConfigError::MissingRequiredKeys(missing)))
                .with_report(ErrorInfo::fatal(
                    ErrorCode::MissingKeyExit,
                    format!("Exiting, found keys missing: {}", missing_list),
                ))
        }
        MissingKeyPolicy::Warn => PolicyOutcome::new(PolicyDecision::WarnAndAccept(missing))
            .with_report(ErrorInfo::warn(
                ErrorCode::MissingKeyWarn,
                format!("Warning, found keys missing: {}", missing_list),
            )),
        MissingKeyPolicy::Skip => PolicyOutcome::new(PolicyDecision::SkipEmit(missing))
            .with_report(ErrorInfo::warn(
                ErrorCode::MissingKeySkip,
                format!("Warning, found keys missing, skipping update: {}", missing_list),
            )),
        MissingKeyPolicy::LastGoodValue => substitute_last_good(snapshot, last_good, missing),
        MissingKeyPolicy::Unrecognized(name) => {
            let err = ConfigError::UnknownPolicy {
                rule: stage.rule_name(),
                value: name.clone(),
            };
            let message = format!("Exiting, unknown config: {}={}", stage.rule_name(), name);
            PolicyOutcome::new(PolicyDecision::Fatal(err))
                .with_report(ErrorInfo::fatal(ErrorCode::UnknownConfig, message))
        }
    }
}

fn substitute_last_good(
    snapshot: &mut Snapshot,
    last_good: &Snapshot,
    missing: Vec<String>,
) -> PolicyOutcome {
    let mut reports = Vec::with_capacity(missing.len());

    for key in &missing {
        match last_good.get(key) {
            Some(value) => {
                snapshot.insert(key.as_str(), value);
                reports.push(ErrorInfo::warn(
                    ErrorCode::MissingKeyUsedPrevVal,
                    format!("Warning, found key missing, using old value: {}", key),
                ));
            }
            None => {
                reports.push(ErrorInfo::fatal(
                    ErrorCode::MissingKeyNoPrevVal,
                    format!("Exiting, found key missing with no previous value: {}", key),
                ));
                return PolicyOutcome {
                    decision: PolicyDecision::Fatal(ConfigError::MissingKeyNoPreviousValue(
                        key.clone(),
                    )),
                    reports,
                };
            }
        }
    }

    PolicyOutcome {
        decision: PolicyDecision::AcceptWithSubstitutions(missing),
        reports,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Severity;

    fn snapshot(pairs: &[(&str, &str)]) -> Snapshot {
        pairs.iter().copied().collect()
    }

    fn evaluate(
        current: &mut Snapshot,
        last_good: &Snapshot,
        policy: &str,
    ) -> PolicyOutcome {
        let required = RequiredKeySet::new(["foo", "bar"]);
        evaluate_policy(
            current,
            &required,
            last_good,
            &MissingKeyPolicy::parse(policy),
            PolicyStage::Update,
        )
    }

    #[test]
    fn test_parse_policy_names() {
        assert_eq!(MissingKeyPolicy::parse("exit"), MissingKeyPolicy::Exit);
        assert_eq!(MissingKeyPolicy::parse("warn"), MissingKeyPolicy::Warn);
        assert_eq!(MissingKeyPolicy::parse("skip"), MissingKeyPolicy::Skip);
        assert_eq!(MissingKeyPolicy::parse("lastGoodValue"), MissingKeyPolicy::LastGoodValue);
        assert_eq!(
            MissingKeyPolicy::parse("LastGoodValue"),
            MissingKeyPolicy::Unrecognized("LastGoodValue".into())
        );
        assert_eq!(MissingKeyPolicy::default(), MissingKeyPolicy::Exit);
    }

    #[test]
    fn test_missing_in_order() {
        let required = RequiredKeySet::new(["c", "a", "b"]);
        let data = snapshot(&[("a", "1")]);
        assert_eq!(required.missing_from(&data), vec!["c", "b"]);
    }

    #[test]
    fn test_exact_match_only() {
        let required = RequiredKeySet::new(["db"]);
        let data = snapshot(&[("dbHost", "h"), ("Db", "x")]);
        assert_eq!(required.missing_from(&data), vec!["db"]);
    }

    #[test]
    fn test_nothing_missing_accepts() {
        let mut current = snapshot(&[("foo", "1"), ("bar", "2")]);
        let outcome = evaluate(&mut current, &Snapshot::new(), "exit");
        assert_eq!(outcome.decision, PolicyDecision::Accept);
        assert!(outcome.reports.is_empty());
        assert!(outcome.decision.replaces_last_good());
    }

    #[test]
    fn test_exit_is_fatal() {
        let mut current = snapshot(&[("foo", "x")]);
        let outcome = evaluate(&mut current, &Snapshot::new(), "exit");
        assert!(matches!(
            outcome.decision,
            PolicyDecision::Fatal(ConfigError::MissingRequiredKeys(ref keys)) if keys == &["bar"]
        ));
        assert_eq!(outcome.reports.len(), 1);
        assert_eq!(outcome.reports[0].code, ErrorCode::MissingKeyExit);
        assert_eq!(outcome.reports[0].severity, Severity::Fatal);
    }

    #[test]
    fn test_warn_accepts_without_baseline() {
        let mut current = snapshot(&[("foo", "x")]);
        let outcome = evaluate(&mut current, &Snapshot::new(), "warn");
        assert_eq!(outcome.decision, PolicyDecision::WarnAndAccept(vec!["bar".into()]));
        assert!(outcome.decision.emits());
        assert!(!outcome.decision.replaces_last_good());
        assert_eq!(outcome.reports[0].code, ErrorCode::MissingKeyWarn);
        assert_eq!(current, snapshot(&[("foo", "x")]));
    }

    #[test]
    fn test_skip_emits_nothing() {
        let mut current = snapshot(&[("foo", "x")]);
        let outcome = evaluate(&mut current, &Snapshot::new(), "skip");
        assert_eq!(outcome.decision, PolicyDecision::SkipEmit(vec!["bar".into()]));
        assert!(!outcome.decision.emits());
        assert!(!outcome.decision.replaces_last_good());
        assert_eq!(outcome.reports[0].code, ErrorCode::MissingKeySkip);
    }

    #[test]
    fn test_last_good_value_substitutes() {
        let last_good = snapshot(&[("foo", "old-foo"), ("bar", "old-bar")]);
        let mut current = snapshot(&[("foo", "new-foo")]);
        let outcome = evaluate(&mut current, &last_good, "lastGoodValue");

        assert_eq!(
            outcome.decision,
            PolicyDecision::AcceptWithSubstitutions(vec!["bar".into()])
        );
        assert!(outcome.decision.replaces_last_good());
        assert_eq!(current.get("foo"), Some("new-foo"));
        assert_eq!(current.get("bar"), Some("old-bar"));
        assert_eq!(outcome.reports.len(), 1);
        assert_eq!(outcome.reports[0].code, ErrorCode::MissingKeyUsedPrevVal);
    }

    #[test]
    fn test_last_good_value_without_previous_is_fatal() {
        let last_good = snapshot(&[("foo", "old-foo")]);
        let mut current = Snapshot::new();
        let outcome = evaluate(&mut current, &last_good, "lastGoodValue");

        assert!(matches!(
            outcome.decision,
            PolicyDecision::Fatal(ConfigError::MissingKeyNoPreviousValue(ref key)) if key == "bar"
        ));
        let codes: Vec<_> = outcome.reports.iter().map(|r| r.code).collect();
        assert_eq!(
            codes,
            vec![ErrorCode::MissingKeyUsedPrevVal, ErrorCode::MissingKeyNoPrevVal]
        );
    }

    #[test]
    fn test_unrecognized_policy_is_fatal() {
        let mut current = Snapshot::new();
        let required = RequiredKeySet::new(["foo"]);
        let outcome = evaluate_policy(
            &mut current,
            &required,
            &Snapshot::new(),
            &MissingKeyPolicy::parse("retry"),
            PolicyStage::StartUp,
        );
        match outcome.decision {
            PolicyDecision::Fatal(ConfigError::UnknownPolicy { rule, value }) => {
                assert_eq!(rule, "ifMissingKeysOnStartUp");
                assert_eq!(value, "retry");
            }
            other => panic!("unexpected decision: {:?}", other),
        }
        assert_eq!(outcome.reports[0].code, ErrorCode::UnknownConfig);
    }

    #[test]
    fn test_unrecognized_policy_unused_when_complete() {
        let mut current = snapshot(&[("foo", "1"), ("bar", "2")]);
        let outcome = evaluate(&mut current, &Snapshot::new(), "retry");
        assert_eq!(outcome.decision, PolicyDecision::Accept);
    }

    #[test]
    fn test_policy_serde_round_names() {
        let policy: MissingKeyPolicy = serde_json::from_str("\"lastGoodValue\"").unwrap();
        assert_eq!(policy, MissingKeyPolicy::LastGoodValue);
        assert_eq!(serde_json::to_string(&MissingKeyPolicy::Skip).unwrap(), "\"skip\"");
    }
}
