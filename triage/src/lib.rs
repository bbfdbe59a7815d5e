//! Triage: the deterministic core of support ticket processing.
//!
//! Holds the ticket model, relevance scoring, the escalation policy, the user
//! history cache, the collaborator traits and the per-ticket state machine.

pub mod error;
pub mod escalation;
pub mod handlers;
pub mod memory;
pub mod router;
pub mod state_machine;
pub mod ticket;

pub use error::{ErrorKind, HandlerError, TriageError, TriageResult};
pub use escalation::{EscalationDecision, EscalationPolicy, EscalationReason, PolicyConfig};
pub use handlers::{
    AccountHandler, ClassificationResult, ClassifierHandler, EscalationHandler, KnowledgeHandler,
    PersistenceClient, TerminalRecord,
};
pub use memory::{HistoryCache, UserHistory, UserHistorySummary, UserPatterns};
pub use router::{KnowledgeArticle, RankedArticle, RelevanceScorer};
pub use state_machine::{RankingConfig, TicketState, TicketStateMachine, TransitionRecord};
pub use ticket::{Category, Channel, Route, Ticket, TicketStatus, Urgency};
