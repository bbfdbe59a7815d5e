//! Ticket data model.
//!
//! A [`Ticket`] is created at the start of a processing run, mutated in place
//! by each stage and handed to persistence at the terminal transition.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{TriageError, TriageResult};

/// Channel the request arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    #[default]
    Chat,
    Email,
    Phone,
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Chat => write!(f, "chat"),
            Self::Email => write!(f, "email"),
            Self::Phone => write!(f, "phone"),
        }
    }
}

impl FromStr for Channel {
    type Err = TriageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "chat" => Ok(Self::Chat),
            "email" => Ok(Self::Email),
            "phone" => Ok(Self::Phone),
            other => Err(TriageError::Validation(format!("unknown channel `{other}`"))),
        }
    }
}

/// Author of a conversation message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// A single message in the ticket conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            created_at: Utc::now(),
        }
    }
}

/// Issue category assigned by the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Technical,
    Billing,
    Account,
    Reservation,
    General,
}

impl Category {
    /// Categories where money changes hands.
    pub fn is_billing_related(self) -> bool {
        matches!(self, Self::Billing)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Technical => write!(f, "technical"),
            Self::Billing => write!(f, "billing"),
            Self::Account => write!(f, "account"),
            Self::Reservation => write!(f, "reservation"),
            Self::General => write!(f, "general"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Urgency {
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for Urgency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

/// Handler family a ticket is directed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Route {
    Knowledge,
    AccountOps,
    Escalation,
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Knowledge => write!(f, "knowledge"),
            Self::AccountOps => write!(f, "account_ops"),
            Self::Escalation => write!(f, "escalation"),
        }
    }
}

/// Lifecycle status.
///
/// Only `Processing → {Resolved, Escalated, Failed}` is permitted; terminal
/// statuses never change again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    Processing,
    Resolved,
    Escalated,
    Failed,
}

impl TicketStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Processing)
    }

    pub fn can_transition_to(self, to: TicketStatus) -> bool {
        self == Self::Processing && to.is_terminal()
    }
}

impl fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Processing => write!(f, "processing"),
            Self::Resolved => write!(f, "resolved"),
            Self::Escalated => write!(f, "escalated"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// A knowledge article that was scored for this ticket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArticleScore {
    pub article_id: String,
    pub title: String,
    /// Relevance in `[0, 1]`.
    pub score: f64,
}

/// Account state returned by the account handler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountSnapshot {
    pub blocked: bool,
    pub subscription_status: Option<String>,
    pub reservation_count: u32,
}

impl AccountSnapshot {
    /// Alert labels worth surfacing to a human or in logs.
    pub fn alerts(&self) -> Vec<&'static str> {
        let mut alerts = Vec::new();
        if self.blocked {
            alerts.push("user_is_blocked");
        }
        if self
            .subscription_status
            .as_deref()
            .is_some_and(|s| s.eq_ignore_ascii_case("cancelled"))
        {
            alerts.push("subscription_cancelled");
        }
        alerts
    }
}

/// One customer request and its processing state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ticket {
    pub ticket_id: String,
    pub user_id: String,
    pub channel: Channel,
    pub messages: Vec<Message>,

    // Classification
    pub category: Option<Category>,
    pub urgency: Option<Urgency>,
    pub keywords: Vec<String>,
    pub recommended_route: Option<Route>,

    // Knowledge outcome
    pub articles_considered: Vec<ArticleScore>,
    /// `None` until the knowledge stage has run.
    pub confidence: Option<f64>,

    // Account outcome
    pub account_snapshot: Option<AccountSnapshot>,

    // Decision flags
    pub requires_escalation: bool,
    pub escalation_reason: Option<String>,
    pub can_auto_resolve: bool,

    // Lifecycle
    status: TicketStatus,
    pub current_step: String,
    agents_called: Vec<String>,
    tools_used: Vec<String>,

    // Resolution
    pub final_response: Option<String>,
    pub escalation_id: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Ticket {
    /// Build a fresh ticket in `processing`, rejecting malformed input.
    pub fn new(
        ticket_id: &str,
        user_id: &str,
        channel: Channel,
        user_message: &str,
    ) -> TriageResult<Self> {
        if ticket_id.trim().is_empty() {
            return Err(TriageError::Validation("ticket_id is empty".into()));
        }
        if user_id.trim().is_empty() {
            return Err(TriageError::Validation("user_id is empty".into()));
        }
        if user_message.trim().is_empty() {
            return Err(TriageError::Validation("user message is empty".into()));
        }

        Ok(Self {
            ticket_id: ticket_id.to_string(),
            user_id: user_id.to_string(),
            channel,
            messages: vec![Message::new(Role::User, user_message)],
            category: None,
            urgency: None,
            keywords: Vec::new(),
            recommended_route: None,
            articles_considered: Vec::new(),
            confidence: None,
            account_snapshot: None,
            requires_escalation: false,
            escalation_reason: None,
            can_auto_resolve: true,
            status: TicketStatus::Processing,
            current_step: "initialized".to_string(),
            agents_called: Vec::new(),
            tools_used: Vec::new(),
            final_response: None,
            escalation_id: None,
            error_message: None,
            created_at: Utc::now(),
        })
    }

    pub fn status(&self) -> TicketStatus {
        self.status
    }

    /// Move to a terminal status. Fails if the ticket is already terminal.
    pub fn set_status(&mut self, to: TicketStatus) -> TriageResult<()> {
        if !self.status.can_transition_to(to) {
            return Err(TriageError::IllegalTransition {
                scope: "status",
                from: self.status.to_string(),
                to: to.to_string(),
            });
        }
        self.status = to;
        Ok(())
    }

    /// Text of the first user message, the request being triaged.
    pub fn request_text(&self) -> &str {
        self.messages
            .iter()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
            .unwrap_or_default()
    }

    pub fn push_message(&mut self, role: Role, content: impl Into<String>) {
        self.messages.push(Message::new(role, content));
    }

    /// Insert a system message right after the opening user message.
    pub fn insert_context(&mut self, content: impl Into<String>) {
        let at = self.messages.len().min(1);
        self.messages.insert(at, Message::new(Role::System, content));
    }

    pub fn has_keyword(&self, keyword: &str) -> bool {
        self.keywords.iter().any(|k| k.eq_ignore_ascii_case(keyword))
    }

    /// Record a handler invocation. Duplicates are ignored.
    pub fn record_agent(&mut self, agent: &str) {
        if !self.agents_called.iter().any(|a| a == agent) {
            self.agents_called.push(agent.to_string());
        }
    }

    /// Record a tool invocation. Duplicates are ignored.
    pub fn record_tool(&mut self, tool: &str) {
        if !self.tools_used.iter().any(|t| t == tool) {
            self.tools_used.push(tool.to_string());
        }
    }

    pub fn agents_called(&self) -> &[String] {
        &self.agents_called
    }

    pub fn tools_used(&self) -> &[String] {
        &self.tools_used
    }

    /// Flag the ticket for escalation with the given reason.
    pub fn flag_escalation(&mut self, reason: impl Into<String>) {
        self.requires_escalation = true;
        self.can_auto_resolve = false;
        self.escalation_reason = Some(reason.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ticket() -> Ticket {
        Ticket::new("t-1", "u-1", Channel::Chat, "How do I reset my password?").unwrap()
    }

    #[test]
    fn test_new_ticket_defaults() {
        let t = ticket();
        assert_eq!(t.status(), TicketStatus::Processing);
        assert_eq!(t.current_step, "initialized");
        assert!(t.can_auto_resolve);
        assert!(t.confidence.is_none());
        assert_eq!(t.request_text(), "How do I reset my password?");
    }

    #[test]
    fn test_validation_rejects_blank_fields() {
        assert!(Ticket::new(" ", "u", Channel::Chat, "hi").is_err());
        assert!(Ticket::new("t", "", Channel::Chat, "hi").is_err());
        assert!(Ticket::new("t", "u", Channel::Email, "   ").is_err());
    }

    #[test]
    fn test_status_only_leaves_processing_once() {
        let mut t = ticket();
        t.set_status(TicketStatus::Resolved).unwrap();
        assert!(t.set_status(TicketStatus::Escalated).is_err());
        assert!(t.set_status(TicketStatus::Failed).is_err());
        assert_eq!(t.status(), TicketStatus::Resolved);
    }

    #[test]
    fn test_processing_is_not_a_target() {
        let mut t = ticket();
        assert!(t.set_status(TicketStatus::Processing).is_err());
    }

    #[test]
    fn test_audit_sets_dedupe_and_keep_order() {
        let mut t = ticket();
        t.record_agent("classifier");
        t.record_agent("knowledge");
        t.record_agent("classifier");
        assert_eq!(t.agents_called(), ["classifier", "knowledge"]);
    }

    #[test]
    fn test_insert_context_after_user_message() {
        let mut t = ticket();
        t.push_message(Role::Assistant, "answer");
        t.insert_context("history");
        assert_eq!(t.messages[0].role, Role::User);
        assert_eq!(t.messages[1].role, Role::System);
        assert_eq!(t.messages[2].role, Role::Assistant);
    }

    #[test]
    fn test_account_alerts() {
        let snap = AccountSnapshot {
            blocked: true,
            subscription_status: Some("Cancelled".into()),
            reservation_count: 0,
        };
        assert_eq!(snap.alerts(), ["user_is_blocked", "subscription_cancelled"]);
    }

    #[test]
    fn test_channel_parse() {
        assert_eq!("Email".parse::<Channel>().unwrap(), Channel::Email);
        assert!("fax".parse::<Channel>().is_err());
    }

    #[test]
    fn test_status_serde() {
        let json = serde_json::to_string(&TicketStatus::Escalated).unwrap();
        assert_eq!(json, "\"escalated\"");
        let route: Route = serde_json::from_str("\"account_ops\"").unwrap();
        assert_eq!(route, Route::AccountOps);
    }
}
