//! Escalation policy: a deterministic "does a human need to see this?" check.
//!
//! Pure function over the in-memory [`Ticket`]. The outcome is an OR of
//! independent conditions; the order below only decides which reason is
//! reported when several hold:
//!
//! ```text
//! 1. requires_escalation already set   → handler's stated reason
//! 2. account snapshot says blocked      → account_blocked
//! 3. knowledge ran and confidence < 0.5 → low_confidence
//! 4. urgency == critical                → critical_urgency
//! 5. billing category + "refund"        → refund_request
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ticket::{Ticket, Urgency};

/// Default confidence below which knowledge answers are not trusted.
pub const DEFAULT_CONFIDENCE_THRESHOLD: f64 = 0.5;

/// Why a ticket must be handed to a human.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationReason {
    /// A handler set `requires_escalation` explicitly.
    Flagged { reason: String },
    AccountBlocked,
    LowConfidence { confidence: f64 },
    CriticalUrgency,
    RefundRequest,
}

impl EscalationReason {
    /// Stable machine-readable label recorded on the ticket.
    pub fn label(&self) -> &str {
        match self {
            Self::Flagged { reason } => reason.as_str(),
            Self::AccountBlocked => "account_blocked",
            Self::LowConfidence { .. } => "low_confidence",
            Self::CriticalUrgency => "critical_urgency",
            Self::RefundRequest => "refund_request",
        }
    }
}

impl fmt::Display for EscalationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Decision produced by [`EscalationPolicy::decide`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscalationDecision {
    pub escalate: bool,
    /// First matching condition, in check order.
    pub reason: Option<EscalationReason>,
}

impl EscalationDecision {
    fn from_reason(reason: Option<EscalationReason>) -> Self {
        Self {
            escalate: reason.is_some(),
            reason,
        }
    }
}

/// Configuration for the Escalation Policy.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Knowledge confidence strictly below this escalates.
    pub confidence_threshold: f64,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct EscalationPolicy {
    config: PolicyConfig,
}

impl EscalationPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: PolicyConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PolicyConfig {
        &self.config
    }

    /// Evaluate the ticket. Never fails.
    pub fn decide(&self, ticket: &Ticket) -> EscalationDecision {
        EscalationDecision::from_reason(self.matching_reasons(ticket).into_iter().next())
    }

    /// Convenience form of [`decide`](Self::decide).
    pub fn should_escalate(&self, ticket: &Ticket) -> bool {
        self.decide(ticket).escalate
    }

    /// Every condition that currently holds, in check order.
    pub fn matching_reasons(&self, ticket: &Ticket) -> Vec<EscalationReason> {
        let mut reasons = Vec::new();

        if ticket.requires_escalation {
            reasons.push(EscalationReason::Flagged {
                reason: ticket
                    .escalation_reason
                    .clone()
                    .unwrap_or_else(|| "escalation_requested".to_string()),
            });
        }

        if ticket.account_snapshot.as_ref().is_some_and(|a| a.blocked) {
            reasons.push(EscalationReason::AccountBlocked);
        }

        if let Some(confidence) = ticket.confidence {
            if confidence < self.config.confidence_threshold {
                reasons.push(EscalationReason::LowConfidence { confidence });
            }
        }

        if ticket.urgency == Some(Urgency::Critical) {
            reasons.push(EscalationReason::CriticalUrgency);
        }

        if ticket.category.is_some_and(|c| c.is_billing_related()) && ticket.has_keyword("refund")
        {
            reasons.push(EscalationReason::RefundRequest);
        }

        reasons
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ticket::{AccountSnapshot, Category, Channel};

    fn ticket() -> Ticket {
        Ticket::new("t-1", "u-1", Channel::Chat, "help").unwrap()
    }

    fn blocked() -> AccountSnapshot {
        AccountSnapshot {
            blocked: true,
            subscription_status: Some("active".into()),
            reservation_count: 2,
        }
    }

    #[test]
    fn test_fresh_ticket_does_not_escalate() {
        let decision = EscalationPolicy::new().decide(&ticket());
        assert!(!decision.escalate);
        assert!(decision.reason.is_none());
    }

    #[test]
    fn test_flag_uses_handler_reason() {
        let mut t = ticket();
        t.flag_escalation("legal_threat");
        let decision = EscalationPolicy::new().decide(&t);
        assert!(decision.escalate);
        assert_eq!(decision.reason.unwrap().label(), "legal_threat");
    }

    #[test]
    fn test_flag_without_reason_has_default_label() {
        let mut t = ticket();
        t.requires_escalation = true;
        let reason = EscalationPolicy::new().decide(&t).reason.unwrap();
        assert_eq!(reason.to_string(), "escalation_requested");
    }

    #[test]
    fn test_blocked_wins_over_high_confidence() {
        let mut t = ticket();
        t.confidence = Some(0.95);
        t.account_snapshot = Some(blocked());
        let reason = EscalationPolicy::new().decide(&t).reason.unwrap();
        assert_eq!(reason, EscalationReason::AccountBlocked);
    }

    #[test]
    fn test_low_confidence_only_after_knowledge_ran() {
        let policy = EscalationPolicy::new();
        let mut t = ticket();
        assert!(!policy.should_escalate(&t));

        t.confidence = Some(0.49);
        assert_eq!(policy.decide(&t).reason.unwrap().label(), "low_confidence");

        t.confidence = Some(0.5);
        assert!(!policy.should_escalate(&t));
    }

    #[test]
    fn test_custom_threshold() {
        let policy = EscalationPolicy::with_config(PolicyConfig {
            confidence_threshold: 0.8,
        });
        let mut t = ticket();
        t.confidence = Some(0.7);
        assert!(policy.should_escalate(&t));
    }

    #[test]
    fn test_critical_urgency() {
        let mut t = ticket();
        t.urgency = Some(Urgency::High);
        assert!(!EscalationPolicy::new().should_escalate(&t));
        t.urgency = Some(Urgency::Critical);
        assert_eq!(
            EscalationPolicy::new().decide(&t).reason,
            Some(EscalationReason::CriticalUrgency)
        );
    }

    #[test]
    fn test_refund_requires_billing_and_keyword() {
        let policy = EscalationPolicy::new();
        let mut t = ticket();
        t.keywords = vec!["refund".into()];
        t.category = Some(Category::General);
        assert!(!policy.should_escalate(&t));

        t.category = Some(Category::Billing);
        assert_eq!(
            policy.decide(&t).reason,
            Some(EscalationReason::RefundRequest)
        );

        t.keywords = vec!["charge".into()];
        assert!(!policy.should_escalate(&t));
    }

    #[test]
    fn test_reason_order_when_several_hold() {
        let mut t = ticket();
        t.urgency = Some(Urgency::Critical);
        t.category = Some(Category::Billing);
        t.keywords = vec!["Refund".into()];
        t.confidence = Some(0.1);
        let reasons = EscalationPolicy::new().matching_reasons(&t);
        let labels: Vec<&str> = reasons.iter().map(|r| r.label()).collect();
        assert_eq!(labels, ["low_confidence", "critical_urgency", "refund_request"]);
    }

    #[test]
    fn test_reason_serde() {
        let json = serde_json::to_string(&EscalationReason::AccountBlocked).unwrap();
        assert_eq!(json, "\"account_blocked\"");
    }
}
