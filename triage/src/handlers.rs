//! Collaborator interfaces consumed by the orchestrator.
//!
//! Every call here may suspend. Implementations decide the transport; the
//! core only relies on the structured shapes below.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::HandlerError;
use crate::memory::UserHistorySummary;
use crate::router::KnowledgeArticle;
use crate::ticket::{AccountSnapshot, Category, Route, TicketStatus, Urgency};

/// Structured output of the classifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub category: Category,
    pub urgency: Urgency,
    #[serde(default)]
    pub keywords: Vec<String>,
    pub recommended_route: Route,
    /// Set when the classifier itself wants a human to take over.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub escalation_reason: Option<String>,
}

/// What gets written to the record store at a terminal transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TerminalRecord {
    pub ticket_id: String,
    pub user_id: String,
    pub status: TicketStatus,
    pub final_text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<Category>,
    /// Escalation or failure reason.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub escalation_id: Option<String>,
    /// Captured internal error for failed tickets. Never shown to the user.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Reference quoted back to the user on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_id: Option<String>,
}

#[async_trait]
pub trait ClassifierHandler: Send + Sync {
    async fn classify(&self, ticket_text: &str) -> Result<ClassificationResult, HandlerError>;
}

/// Knowledge search. Returns unscored candidates; scoring is done by the core.
#[async_trait]
pub trait KnowledgeHandler: Send + Sync {
    async fn search(
        &self,
        query: &str,
        tags: Option<&str>,
    ) -> Result<Vec<KnowledgeArticle>, HandlerError>;
}

#[async_trait]
pub trait AccountHandler: Send + Sync {
    async fn lookup(&self, user_id: &str) -> Result<AccountSnapshot, HandlerError>;
}

#[async_trait]
pub trait EscalationHandler: Send + Sync {
    /// Create a human-handled escalation record; returns its id.
    async fn create_ticket(
        &self,
        user_id: &str,
        summary: &str,
        reason: &str,
    ) -> Result<String, HandlerError>;
}

/// Durable record store.
#[async_trait]
pub trait PersistenceClient: Send + Sync {
    /// Most recent tickets for a user, newest first.
    async fn fetch_ticket_history(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<UserHistorySummary>, HandlerError>;

    async fn persist_terminal_state(&self, record: &TerminalRecord) -> Result<(), HandlerError>;

    /// Previously persisted terminal record, if the store keeps them.
    async fn fetch_terminal_state(
        &self,
        _ticket_id: &str,
    ) -> Result<Option<TerminalRecord>, HandlerError> {
        Ok(None)
    }
}
