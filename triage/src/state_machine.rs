//! Ticket State Machine: explicit stages and legal transition guards.
//!
//! Owns one [`Ticket`] for the length of a processing run so that:
//! 1. Every stage change is checked against the transition table and logged.
//! 2. Decisions (routing, escalation, composition) stay deterministic; handler
//!    calls happen outside, and their results are fed back through the
//!    `apply_*` methods.
//! 3. The transition log can be replayed for diagnostics.
//!
//! ```text
//! initialized → classifying → routing → knowledge_lookup ─┐
//!                                     → account_lookup ───┼→ resolving → resolved
//!                                     → escalating ←──────┘
//!                                        escalating → escalated
//! any non-terminal state → failed
//! ```

use std::fmt;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::error::{TriageError, TriageResult};
use crate::escalation::EscalationPolicy;
use crate::handlers::{ClassificationResult, TerminalRecord};
use crate::router::{KnowledgeArticle, RankedArticle, RelevanceScorer};
use crate::ticket::{AccountSnapshot, Role, Route, Ticket, TicketStatus};

/// Shown to the user for every failed ticket, followed by a reference id.
pub const FAILURE_MESSAGE: &str =
    "We're sorry, something went wrong while handling your request. Our team has been notified.";

/// Escalation label used when the route alone sends a ticket to a human.
pub const ROUTED_TO_ESCALATION: &str = "escalation_requested";

const EXCERPT_CHARS: usize = 240;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketState {
    Initialized,
    Classifying,
    Routing,
    KnowledgeLookup,
    AccountLookup,
    Escalating,
    Resolving,
    /// Answered automatically. Terminal.
    Resolved,
    /// Handed to a human. Terminal.
    Escalated,
    /// Terminal.
    Failed,
}

impl TicketState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Resolved | Self::Escalated | Self::Failed)
    }

    /// Ticket status implied by a terminal state.
    pub fn terminal_status(self) -> Option<TicketStatus> {
        match self {
            Self::Resolved => Some(TicketStatus::Resolved),
            Self::Escalated => Some(TicketStatus::Escalated),
            Self::Failed => Some(TicketStatus::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for TicketState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Initialized => write!(f, "initialized"),
            Self::Classifying => write!(f, "classifying"),
            Self::Routing => write!(f, "routing"),
            Self::KnowledgeLookup => write!(f, "knowledge_lookup"),
            Self::AccountLookup => write!(f, "account_lookup"),
            Self::Escalating => write!(f, "escalating"),
            Self::Resolving => write!(f, "resolving"),
            Self::Resolved => write!(f, "resolved"),
            Self::Escalated => write!(f, "escalated"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

fn is_legal_transition(from: TicketState, to: TicketState) -> bool {
    use TicketState::*;

    if to == Failed && !from.is_terminal() {
        return true;
    }

    matches!(
        (from, to),
        (Initialized, Classifying)
            | (Classifying, Routing)
            | (Routing, KnowledgeLookup)
            | (Routing, AccountLookup)
            | (Routing, Escalating)
            // Policy can redirect after a lookup
            | (KnowledgeLookup, Resolving)
            | (KnowledgeLookup, Escalating)
            | (AccountLookup, Resolving)
            | (AccountLookup, Escalating)
            | (Escalating, Escalated)
            | (Resolving, Resolved)
    )
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub from: TicketState,
    pub to: TicketState,
    /// Milliseconds since the state machine was created.
    pub elapsed_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Knobs for turning search candidates into a confidence value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RankingConfig {
    pub max_articles: usize,
    /// Candidates scoring at or below this are discarded.
    pub min_score: f64,
    /// Wording hint only. Never changes the outcome.
    pub strong_match_threshold: f64,
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            max_articles: 3,
            min_score: 0.1,
            strong_match_threshold: 0.7,
        }
    }
}

pub struct TicketStateMachine {
    ticket: Ticket,
    current: TicketState,
    created_at: Instant,
    transitions: Vec<TransitionRecord>,
    policy: EscalationPolicy,
    scorer: RelevanceScorer,
    ranking: RankingConfig,
    top_article: Option<RankedArticle>,
    failure_reason: Option<String>,
    reference_id: Option<String>,
}

impl TicketStateMachine {
    /// Take ownership of a fresh ticket, starting at `Initialized`.
    pub fn new(ticket: Ticket, policy: EscalationPolicy) -> Self {
        Self {
            ticket,
            current: TicketState::Initialized,
            created_at: Instant::now(),
            transitions: Vec::new(),
            policy,
            scorer: RelevanceScorer::new(),
            ranking: RankingConfig::default(),
            top_article: None,
            failure_reason: None,
            reference_id: None,
        }
    }

    pub fn with_ranking(mut self, ranking: RankingConfig) -> Self {
        self.ranking = ranking;
        self
    }

    pub fn current(&self) -> TicketState {
        self.current
    }

    pub fn ticket(&self) -> &Ticket {
        &self.ticket
    }

    pub fn ticket_mut(&mut self) -> &mut Ticket {
        &mut self.ticket
    }

    pub fn is_terminal(&self) -> bool {
        self.current.is_terminal()
    }

    pub fn transitions(&self) -> &[TransitionRecord] {
        &self.transitions
    }

    /// Move to `to` if the table allows it.
    ///
    /// Keeps `current_step` in sync and settles the ticket status on terminal
    /// states.
    pub fn advance(&mut self, to: TicketState, reason: Option<&str>) -> TriageResult<()> {
        if !is_legal_transition(self.current, to) {
            return Err(TriageError::IllegalTransition {
                scope: "state",
                from: self.current.to_string(),
                to: to.to_string(),
            });
        }

        if let Some(status) = to.terminal_status() {
            self.ticket.set_status(status)?;
        }

        tracing::debug!(
            ticket_id = %self.ticket.ticket_id,
            from = %self.current,
            to = %to,
            reason = reason.unwrap_or_default(),
            "State transition"
        );

        self.transitions.push(TransitionRecord {
            from: self.current,
            to,
            elapsed_ms: self.created_at.elapsed().as_millis() as u64,
            reason: reason.map(String::from),
        });
        self.current = to;
        self.ticket.current_step = to.to_string();
        Ok(())
    }

    /// Enter `Classifying`. The classifier is about to be called.
    pub fn begin(&mut self) -> TriageResult<()> {
        self.advance(TicketState::Classifying, None)?;
        self.ticket.record_agent("classifier");
        Ok(())
    }

    /// Record the classifier output, then pick the next stage.
    ///
    /// Returns the state entered after `Routing`: a lookup stage or
    /// `Escalating`.
    pub fn apply_classification(&mut self, result: ClassificationResult) -> TriageResult<TicketState> {
        self.ticket.category = Some(result.category);
        self.ticket.urgency = Some(result.urgency);
        self.ticket.keywords = result.keywords;
        self.ticket.recommended_route = Some(result.recommended_route);
        if let Some(reason) = result.escalation_reason {
            self.ticket.flag_escalation(reason);
        }
        self.advance(TicketState::Routing, Some(&result.recommended_route.to_string()))?;

        let decision = self.policy.decide(&self.ticket);
        let next = match (decision.reason, result.recommended_route) {
            (Some(reason), _) => {
                let label = reason.label().to_string();
                self.ticket.flag_escalation(label.as_str());
                self.advance(TicketState::Escalating, Some(&label))?;
                TicketState::Escalating
            }
            (None, Route::Escalation) => {
                self.ticket.flag_escalation(ROUTED_TO_ESCALATION);
                self.advance(TicketState::Escalating, Some(ROUTED_TO_ESCALATION))?;
                TicketState::Escalating
            }
            (None, Route::Knowledge) => {
                self.advance(TicketState::KnowledgeLookup, None)?;
                self.ticket.record_agent("knowledge");
                TicketState::KnowledgeLookup
            }
            (None, Route::AccountOps) => {
                self.advance(TicketState::AccountLookup, None)?;
                self.ticket.record_agent("account_ops");
                TicketState::AccountLookup
            }
        };
        Ok(next)
    }

    /// Score search candidates and set `confidence` from the best one.
    ///
    /// No surviving candidate means confidence `0.0`.
    pub fn apply_knowledge(&mut self, candidates: &[KnowledgeArticle]) -> TriageResult<TicketState> {
        self.ticket.record_tool("knowledge_search");

        let ranked = self.scorer.rank(
            self.ticket.request_text(),
            candidates,
            self.ranking.min_score,
            self.ranking.max_articles,
        );
        self.ticket.articles_considered = ranked.iter().map(RankedArticle::to_article_score).collect();
        self.ticket.confidence = Some(ranked.first().map_or(0.0, |r| r.score));
        self.top_article = ranked.into_iter().next();

        self.after_lookup()
    }

    /// Record the account snapshot; `None` when the account was not found.
    pub fn apply_account(&mut self, snapshot: Option<AccountSnapshot>) -> TriageResult<TicketState> {
        self.ticket.record_tool("account_lookup");
        if let Some(snapshot) = &snapshot {
            let alerts = snapshot.alerts();
            if !alerts.is_empty() {
                tracing::info!(ticket_id = %self.ticket.ticket_id, ?alerts, "Account alerts");
            }
        }
        self.ticket.account_snapshot = snapshot;

        self.after_lookup()
    }

    fn after_lookup(&mut self) -> TriageResult<TicketState> {
        match self.policy.decide(&self.ticket).reason {
            Some(reason) => {
                let label = reason.label().to_string();
                self.ticket.flag_escalation(label.as_str());
                self.advance(TicketState::Escalating, Some(&label))?;
                Ok(TicketState::Escalating)
            }
            None => {
                self.advance(TicketState::Resolving, None)?;
                Ok(TicketState::Resolving)
            }
        }
    }

    /// Summary handed to the escalation queue.
    pub fn escalation_summary(&self) -> String {
        let t = &self.ticket;
        let category = t.category.map_or_else(|| "unclassified".to_string(), |c| c.to_string());
        let urgency = t.urgency.map_or_else(|| "unknown".to_string(), |u| u.to_string());
        format!("[{category}/{urgency}] {}", t.request_text())
    }

    /// Reason recorded for the escalation, if one was decided.
    pub fn escalation_reason(&self) -> Option<&str> {
        self.ticket.escalation_reason.as_deref()
    }

    /// The escalation record exists; finish as `Escalated`.
    pub fn apply_escalation_created(&mut self, escalation_id: String) -> TriageResult<()> {
        self.ticket.record_agent("escalation");
        self.ticket.record_tool("create_escalation");
        let text = format!(
            "I've passed your request to a member of our support team, who will follow up with you shortly. \
             Your escalation reference is {escalation_id}."
        );
        self.ticket.escalation_id = Some(escalation_id);
        self.finish(TicketState::Escalated, text)
    }

    /// Compose the answer locally and finish as `Resolved`.
    pub fn resolve(&mut self) -> TriageResult<()> {
        let text = self.compose_resolution();
        self.finish(TicketState::Resolved, text)
    }

    fn compose_resolution(&self) -> String {
        if let Some(top) = &self.top_article {
            let lead = if top.score >= self.ranking.strong_match_threshold {
                "Here's what our help center says"
            } else {
                "This help article may answer your question"
            };
            return format!(
                "{lead} (\"{}\"):\n\n{}",
                top.article.title,
                excerpt(&top.article.content, EXCERPT_CHARS)
            );
        }

        if let Some(account) = &self.ticket.account_snapshot {
            let subscription = account.subscription_status.as_deref().unwrap_or("none");
            return format!(
                "I checked your account. Your subscription status is {subscription} and you have {} active reservation(s).",
                account.reservation_count
            );
        }

        if self.ticket.recommended_route == Some(Route::AccountOps) {
            return "I couldn't find an account linked to your user id. \
                    Please reply with the email address you signed up with."
                .to_string();
        }

        "Thanks for reaching out. Your request has been recorded.".to_string()
    }

    /// Finish as `Failed` with a generic apology.
    ///
    /// `error` is kept for the record store and logs; the user only ever sees
    /// [`FAILURE_MESSAGE`] and `reference_id`.
    pub fn fail(&mut self, reason: &str, error: Option<String>, reference_id: &str) -> TriageResult<()> {
        self.advance(TicketState::Failed, Some(reason))?;
        self.ticket.error_message = error;
        self.ticket.can_auto_resolve = false;
        self.failure_reason = Some(reason.to_string());
        self.reference_id = Some(reference_id.to_string());
        let text = format!("{FAILURE_MESSAGE} Reference: {reference_id}.");
        self.ticket.final_response = Some(text.clone());
        self.ticket.push_message(Role::Assistant, text);
        Ok(())
    }

    fn finish(&mut self, to: TicketState, text: String) -> TriageResult<()> {
        self.advance(to, None)?;
        self.ticket.final_response = Some(text.clone());
        self.ticket.push_message(Role::Assistant, text);
        Ok(())
    }

    /// Escalation reason for `Escalated`, failure reason for `Failed`.
    pub fn terminal_reason(&self) -> Option<&str> {
        match self.current {
            TicketState::Escalated => self.ticket.escalation_reason.as_deref(),
            TicketState::Failed => self.failure_reason.as_deref(),
            _ => None,
        }
    }

    pub fn reference_id(&self) -> Option<&str> {
        self.reference_id.as_deref()
    }

    /// Record for the store. `None` until a terminal state is reached.
    pub fn terminal_record(&self) -> Option<TerminalRecord> {
        let status = self.current.terminal_status()?;
        Some(TerminalRecord {
            ticket_id: self.ticket.ticket_id.clone(),
            user_id: self.ticket.user_id.clone(),
            status,
            final_text: self.ticket.final_response.clone().unwrap_or_default(),
            category: self.ticket.category,
            reason: self.terminal_reason().map(String::from),
            escalation_id: self.ticket.escalation_id.clone(),
            error: self.ticket.error_message.clone(),
            reference_id: self.reference_id.clone(),
        })
    }

    pub fn summary(&self) -> String {
        let states: Vec<String> = self.transitions.iter().map(|t| t.to.to_string()).collect();
        let mut out = format!(
            "{} → {} ({}ms, {} transitions)",
            TicketState::Initialized,
            self.current,
            self.created_at.elapsed().as_millis(),
            self.transitions.len(),
        );
        if !states.is_empty() {
            out.push_str(&format!(" [{}]", states.join(" → ")));
        }
        out
    }
}

fn excerpt(content: &str, max_chars: usize) -> String {
    let trimmed = content.trim();
    if trimmed.chars().count() <= max_chars {
        return trimmed.to_string();
    }
    let cut: String = trimmed.chars().take(max_chars).collect();
    format!("{}...", cut.trim_end())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ticket::{Category, Channel, Urgency};

    fn machine(text: &str) -> TicketStateMachine {
        let ticket = Ticket::new("t-1", "u-1", Channel::Chat, text).unwrap();
        TicketStateMachine::new(ticket, EscalationPolicy::new())
    }

    fn classification(category: Category, route: Route, keywords: &[&str]) -> ClassificationResult {
        ClassificationResult {
            category,
            urgency: Urgency::Medium,
            keywords: keywords.iter().map(|k| k.to_string()).collect(),
            recommended_route: route,
            escalation_reason: None,
        }
    }

    fn password_article() -> KnowledgeArticle {
        KnowledgeArticle {
            id: "kb-1".into(),
            title: "Password Reset".into(),
            content: "How do I reset my password? Open Settings, choose Security and follow the reset link we email you.".into(),
            tags: Some("password, reset, login".into()),
        }
    }

    #[test]
    fn test_initial_state() {
        let sm = machine("hello");
        assert_eq!(sm.current(), TicketState::Initialized);
        assert_eq!(sm.ticket().current_step, "initialized");
        assert!(!sm.is_terminal());
        assert!(sm.terminal_record().is_none());
    }

    #[test]
    fn test_knowledge_happy_path() {
        let mut sm = machine("How do I reset my password?");
        sm.begin().unwrap();
        let next = sm
            .apply_classification(classification(Category::General, Route::Knowledge, &["password"]))
            .unwrap();
        assert_eq!(next, TicketState::KnowledgeLookup);

        let next = sm.apply_knowledge(&[password_article()]).unwrap();
        assert_eq!(next, TicketState::Resolving);
        assert!(sm.ticket().confidence.unwrap() >= 0.7);

        sm.resolve().unwrap();
        assert_eq!(sm.current(), TicketState::Resolved);
        assert_eq!(sm.ticket().status(), TicketStatus::Resolved);
        let text = sm.ticket().final_response.as_deref().unwrap();
        assert!(text.contains("Password Reset"));
        assert!(text.starts_with("Here's what our help center says"));
        assert_eq!(sm.transitions().len(), 5);
        assert_eq!(sm.ticket().agents_called(), ["classifier", "knowledge"]);
    }

    #[test]
    fn test_no_candidates_escalates_low_confidence() {
        let mut sm = machine("Where is the unicorn?");
        sm.begin().unwrap();
        sm.apply_classification(classification(Category::General, Route::Knowledge, &[]))
            .unwrap();
        let next = sm.apply_knowledge(&[]).unwrap();
        assert_eq!(next, TicketState::Escalating);
        assert_eq!(sm.ticket().confidence, Some(0.0));
        assert_eq!(sm.escalation_reason(), Some("low_confidence"));
    }

    #[test]
    fn test_refund_escalates_at_routing_regardless_of_route() {
        for route in [Route::Knowledge, Route::AccountOps, Route::Escalation] {
            let mut sm = machine("I was charged twice and need a refund");
            sm.begin().unwrap();
            let next = sm
                .apply_classification(classification(Category::Billing, route, &["refund"]))
                .unwrap();
            assert_eq!(next, TicketState::Escalating);
            assert_eq!(sm.escalation_reason(), Some("refund_request"));
        }
    }

    #[test]
    fn test_escalation_route_without_policy_reason() {
        let mut sm = machine("I want to talk to a person");
        sm.begin().unwrap();
        let next = sm
            .apply_classification(classification(Category::General, Route::Escalation, &[]))
            .unwrap();
        assert_eq!(next, TicketState::Escalating);
        assert_eq!(sm.escalation_reason(), Some(ROUTED_TO_ESCALATION));
    }

    #[test]
    fn test_classifier_requested_escalation() {
        let mut sm = machine("My lawyer will contact you");
        sm.begin().unwrap();
        let mut result = classification(Category::General, Route::Knowledge, &[]);
        result.escalation_reason = Some("legal_threat".into());
        assert_eq!(sm.apply_classification(result).unwrap(), TicketState::Escalating);
        assert_eq!(sm.escalation_reason(), Some("legal_threat"));
    }

    #[test]
    fn test_blocked_account_redirects_to_escalating() {
        let mut sm = machine("Why can't I book?");
        sm.begin().unwrap();
        sm.apply_classification(classification(Category::Account, Route::AccountOps, &[]))
            .unwrap();
        let next = sm
            .apply_account(Some(AccountSnapshot {
                blocked: true,
                subscription_status: Some("active".into()),
                reservation_count: 1,
            }))
            .unwrap();
        assert_eq!(next, TicketState::Escalating);

        sm.apply_escalation_created("ESC-1".into()).unwrap();
        let record = sm.terminal_record().unwrap();
        assert_eq!(record.status, TicketStatus::Escalated);
        assert_eq!(record.reason.as_deref(), Some("account_blocked"));
        assert_eq!(record.escalation_id.as_deref(), Some("ESC-1"));
        assert!(record.final_text.contains("ESC-1"));
    }

    #[test]
    fn test_account_resolution_text() {
        let mut sm = machine("What is my subscription status?");
        sm.begin().unwrap();
        sm.apply_classification(classification(Category::Account, Route::AccountOps, &[]))
            .unwrap();
        sm.apply_account(Some(AccountSnapshot {
            blocked: false,
            subscription_status: Some("active".into()),
            reservation_count: 2,
        }))
        .unwrap();
        sm.resolve().unwrap();
        let text = sm.ticket().final_response.clone().unwrap();
        assert!(text.contains("active"));
        assert!(text.contains("2 active reservation"));
    }

    #[test]
    fn test_missing_account_still_resolves() {
        let mut sm = machine("What is my subscription status?");
        sm.begin().unwrap();
        sm.apply_classification(classification(Category::Account, Route::AccountOps, &[]))
            .unwrap();
        assert_eq!(sm.apply_account(None).unwrap(), TicketState::Resolving);
        sm.resolve().unwrap();
        assert!(sm.ticket().final_response.as_deref().unwrap().contains("couldn't find an account"));
    }

    #[test]
    fn test_fail_hides_internal_error() {
        let mut sm = machine("hello");
        sm.begin().unwrap();
        sm.fail("classification_unavailable", Some("timed out after 30s".into()), "ref-1")
            .unwrap();
        let record = sm.terminal_record().unwrap();
        assert_eq!(record.status, TicketStatus::Failed);
        assert_eq!(record.reason.as_deref(), Some("classification_unavailable"));
        assert_eq!(record.error.as_deref(), Some("timed out after 30s"));
        assert!(record.final_text.starts_with(FAILURE_MESSAGE));
        assert!(record.final_text.contains("ref-1"));
        assert!(!record.final_text.contains("timed out"));
    }

    #[test]
    fn test_failure_from_any_non_terminal_state() {
        for state in [
            TicketState::Initialized,
            TicketState::Classifying,
            TicketState::Routing,
            TicketState::KnowledgeLookup,
            TicketState::AccountLookup,
            TicketState::Escalating,
            TicketState::Resolving,
        ] {
            assert!(is_legal_transition(state, TicketState::Failed), "{state}");
        }
    }

    #[test]
    fn test_terminal_states_are_final() {
        let all = [
            TicketState::Initialized,
            TicketState::Classifying,
            TicketState::Routing,
            TicketState::KnowledgeLookup,
            TicketState::AccountLookup,
            TicketState::Escalating,
            TicketState::Resolving,
            TicketState::Resolved,
            TicketState::Escalated,
            TicketState::Failed,
        ];
        for from in [TicketState::Resolved, TicketState::Escalated, TicketState::Failed] {
            for to in all {
                assert!(!is_legal_transition(from, to), "{from} -> {to}");
            }
        }
    }

    #[test]
    fn test_illegal_skip_is_rejected() {
        let mut sm = machine("hello");
        let err = sm.advance(TicketState::Resolved, None).unwrap_err();
        assert!(matches!(err, TriageError::IllegalTransition { .. }));
        assert_eq!(sm.current(), TicketState::Initialized);
        assert_eq!(sm.ticket().status(), TicketStatus::Processing);
    }

    #[test]
    fn test_summary_lists_path() {
        let mut sm = machine("hello");
        sm.begin().unwrap();
        sm.fail("cancelled", None, "ref-2").unwrap();
        let summary = sm.summary();
        assert!(summary.contains("initialized → failed"));
        assert!(summary.contains("[classifying → failed]"));
    }

    #[test]
    fn test_excerpt_truncates_on_char_boundary() {
        let text = "é".repeat(10);
        assert_eq!(excerpt(&text, 4), "éééé...");
        assert_eq!(excerpt("  short  ", 10), "short");
    }
}
