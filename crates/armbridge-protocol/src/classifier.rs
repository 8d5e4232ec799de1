//! [`StatusClassifier`] – maps free-text controller output to [`ArmStatus`].
//!
//! The firmware does not speak a structured status protocol; it prints
//! human-readable lines. Classification is therefore tolerant: a rule fires
//! when every one of its substrings occurs somewhere in the line.
//!
//! Rules are held in an ordered table and evaluated top to bottom:
//!
//! - [`RuleKind::Keyword`] rules form an if/else chain. Only the first
//!   matching keyword rule contributes a status.
//! - [`RuleKind::Override`] rules always apply when they match and replace
//!   whatever an earlier rule produced for the same line.
//!
//! The default table, [`StatusClassifier::firmware`], is:
//!
//! | # | Kind | Substrings | Status |
//! |---|---|---|---|
//! | 1 | Keyword | `IDLE` | `IDLE` |
//! | 2 | Keyword | `MOVING` | `MOVING` |
//! | 3 | Keyword | `RUNNING_MACRO` | `RUNNING_MACRO` |
//! | 4 | Override | `Macro '` and `concluida` | `IDLE` |
//! | 5 | Override | `Macro interrompida` | `IDLE` |

use armbridge_types::ArmStatus;

// ────────────────────────────────────────────────────────────────────────────
// Rules
// ────────────────────────────────────────────────────────────────────────────

/// How a matching rule combines with the rules before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleKind {
    /// Applies only if no earlier keyword rule matched the line.
    Keyword,
    /// Applies whenever it matches, overwriting earlier results.
    Override,
}

/// One row of the classification table.
#[derive(Debug, Clone)]
pub struct StatusRule {
    /// Short name used in trace output.
    pub name: &'static str,
    /// Every substring must be present for the rule to match.
    pub all_of: Vec<&'static str>,
    pub status: ArmStatus,
    pub kind: RuleKind,
}

impl StatusRule {
    pub fn keyword(name: &'static str, needle: &'static str, status: ArmStatus) -> Self {
        Self {
            name,
            all_of: vec![needle],
            status,
            kind: RuleKind::Keyword,
        }
    }

    pub fn override_all(name: &'static str, all_of: &[&'static str], status: ArmStatus) -> Self {
        Self {
            name,
            all_of: all_of.to_vec(),
            status,
            kind: RuleKind::Override,
        }
    }

    /// `true` when `line` contains every substring of this rule.
    pub fn matches(&self, line: &str) -> bool {
        self.all_of.iter().all(|needle| line.contains(needle))
    }
}

// ────────────────────────────────────────────────────────────────────────────
// StatusClassifier
// ────────────────────────────────────────────────────────────────────────────

/// Ordered rule table turning one received line into at most one status.
///
/// # Example
///
/// ```
/// use armbridge_protocol::StatusClassifier;
/// use armbridge_types::ArmStatus;
///
/// let classifier = StatusClassifier::firmware();
/// assert_eq!(classifier.classify("Status: IDLE"), Some(ArmStatus::Idle));
/// assert_eq!(classifier.classify("Macro 'wave' concluida"), Some(ArmStatus::Idle));
/// assert_eq!(classifier.classify("Servo 3 -> 45"), None);
/// ```
#[derive(Debug, Clone, Default)]
pub struct StatusClassifier {
    rules: Vec<StatusRule>,
}

impl StatusClassifier {
    /// Create an empty classifier that never produces a status.
    pub fn new() -> Self {
        Self::default()
    }

    /// The rule table matching the arm firmware's status output.
    pub fn firmware() -> Self {
        let mut classifier = Self::new();
        classifier.add_rule(StatusRule::keyword("idle", "IDLE", ArmStatus::Idle));
        classifier.add_rule(StatusRule::keyword("moving", "MOVING", ArmStatus::Moving));
        classifier.add_rule(StatusRule::keyword(
            "running_macro",
            "RUNNING_MACRO",
            ArmStatus::RunningMacro,
        ));
        classifier.add_rule(StatusRule::override_all(
            "macro_concluded",
            &["Macro '", "concluida"],
            ArmStatus::Idle,
        ));
        classifier.add_rule(StatusRule::override_all(
            "macro_interrupted",
            &["Macro interrompida"],
            ArmStatus::Idle,
        ));
        classifier
    }

    /// Append a rule. Rules are evaluated in insertion order.
    pub fn add_rule(&mut self, rule: StatusRule) {
        self.rules.push(rule);
    }

    pub fn rules(&self) -> &[StatusRule] {
        &self.rules
    }

    /// Classify one received line.
    ///
    /// Returns `None` when no rule matches, leaving the current status as is.
    pub fn classify(&self, line: &str) -> Option<ArmStatus> {
        let mut status = None;
        let mut keyword_matched = false;

        for rule in &self.rules {
            if !rule.matches(line) {
                continue;
            }
            match rule.kind {
                RuleKind::Keyword if keyword_matched => {}
                RuleKind::Keyword => {
                    keyword_matched = true;
                    status = Some(rule.status);
                }
                RuleKind::Override => status = Some(rule.status),
            }
            tracing::trace!(rule = rule.name, line, "status rule matched");
        }

        status
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify(line: &str) -> Option<ArmStatus> {
        StatusClassifier::firmware().classify(line)
    }

    #[test]
    fn plain_keywords() {
        assert_eq!(classify("Status: IDLE"), Some(ArmStatus::Idle));
        assert_eq!(classify("state=MOVING"), Some(ArmStatus::Moving));
        assert_eq!(classify("RUNNING_MACRO wave"), Some(ArmStatus::RunningMacro));
    }

    #[test]
    fn keyword_chain_prefers_earlier_rule() {
        assert_eq!(classify("RUNNING_MACRO then IDLE"), Some(ArmStatus::Idle));
        assert_eq!(classify("MOVING / RUNNING_MACRO"), Some(ArmStatus::Moving));
    }

    #[test]
    fn macro_concluded_overrides_keywords() {
        assert_eq!(classify("Macro 'wave' concluida"), Some(ArmStatus::Idle));
        assert_eq!(
            classify("RUNNING_MACRO: Macro 'wave' concluida"),
            Some(ArmStatus::Idle)
        );
    }

    #[test]
    fn macro_concluded_needs_both_substrings() {
        assert_eq!(classify("Macro 'wave' iniciada"), None);
        assert_eq!(classify("Pose concluida"), None);
    }

    #[test]
    fn macro_interrupted_forces_idle() {
        assert_eq!(classify("Macro interrompida"), Some(ArmStatus::Idle));
        assert_eq!(
            classify("MOVING... Macro interrompida pelo usuario"),
            Some(ArmStatus::Idle)
        );
    }

    #[test]
    fn unrelated_lines_yield_nothing() {
        assert_eq!(classify("--- Comandos Disponíveis ---"), None);
        assert_eq!(classify("Servo 2 movido para 45"), None);
        assert_eq!(classify(""), None);
    }

    #[test]
    fn matching_is_case_sensitive() {
        assert_eq!(classify("idle"), None);
        assert_eq!(classify("macro interrompida"), None);
    }

    #[test]
    fn empty_classifier_matches_nothing() {
        assert_eq!(StatusClassifier::new().classify("IDLE"), None);
    }

    #[test]
    fn later_override_wins_over_earlier_override() {
        let mut c = StatusClassifier::new();
        c.add_rule(StatusRule::override_all("first", &["X"], ArmStatus::Moving));
        c.add_rule(StatusRule::override_all("second", &["X"], ArmStatus::RunningMacro));
        assert_eq!(c.classify("X"), Some(ArmStatus::RunningMacro));
    }

    #[test]
    fn firmware_table_has_five_rules_in_order() {
        let c = StatusClassifier::firmware();
        let names: Vec<_> = c.rules().iter().map(|r| r.name).collect();
        assert_eq!(
            names,
            [
                "idle",
                "moving",
                "running_macro",
                "macro_concluded",
                "macro_interrupted"
            ]
        );
    }
}
