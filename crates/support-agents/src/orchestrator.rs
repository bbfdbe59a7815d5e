//! Orchestrator: drives one ticket through the state machine to a terminal
//! state.
//!
//! Flow per call:
//!   1. Validate input and take the per-ticket lock
//!   2. Return the stored result if the ticket already finished
//!   3. Enrich with user history (best effort)
//!   4. Classify → route → knowledge / account lookup → escalate or resolve
//!   5. Persist the terminal record once, then invalidate the user's history
//!
//! Every handler call runs under a deadline. Cancellation is observed between
//! calls: an in-flight call completes, no further transition is taken and
//! nothing is persisted.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use triage::memory::{history_context, UserPatterns};
use triage::state_machine::ROUTED_TO_ESCALATION;
use triage::ticket::Category;
use triage::{
    AccountHandler, Channel, ClassifierHandler, EscalationHandler, HandlerError, HistoryCache,
    KnowledgeHandler, PersistenceClient, TerminalRecord, Ticket, TicketState, TicketStateMachine,
    TicketStatus, TriageError, TriageResult,
};
use uuid::Uuid;

use crate::config::OrchestratorConfig;

/// Failure reason for a cancelled run.
pub const CANCELLED: &str = "cancelled";

/// The five external collaborators.
#[derive(Clone)]
pub struct Collaborators {
    pub classifier: Arc<dyn ClassifierHandler>,
    pub knowledge: Arc<dyn KnowledgeHandler>,
    pub account: Arc<dyn AccountHandler>,
    pub escalation: Arc<dyn EscalationHandler>,
    pub persistence: Arc<dyn PersistenceClient>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessRequest {
    pub ticket_id: String,
    pub user_id: String,
    pub user_message: String,
    #[serde(default)]
    pub channel: Channel,
}

impl ProcessRequest {
    pub fn new(
        ticket_id: impl Into<String>,
        user_id: impl Into<String>,
        user_message: impl Into<String>,
    ) -> Self {
        Self {
            ticket_id: ticket_id.into(),
            user_id: user_id.into(),
            user_message: user_message.into(),
            channel: Channel::default(),
        }
    }

    pub fn with_channel(mut self, channel: Channel) -> Self {
        self.channel = channel;
        self
    }
}

/// What a caller gets back for a ticket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessOutcome {
    pub ticket_id: String,
    pub status: TicketStatus,
    /// User-facing text. Never carries internal error detail.
    pub final_text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<Category>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub escalation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_id: Option<String>,
    /// Whether the terminal record reached the store.
    pub persisted: bool,
}

impl ProcessOutcome {
    fn from_machine(sm: &TicketStateMachine, persisted: bool) -> Self {
        let ticket = sm.ticket();
        Self {
            ticket_id: ticket.ticket_id.clone(),
            status: ticket.status(),
            final_text: ticket.final_response.clone().unwrap_or_default(),
            reason: sm.terminal_reason().map(String::from),
            category: ticket.category,
            escalation_id: ticket.escalation_id.clone(),
            reference_id: sm.reference_id().map(String::from),
            persisted,
        }
    }

    fn from_record(record: TerminalRecord) -> Self {
        Self {
            ticket_id: record.ticket_id,
            status: record.status,
            final_text: record.final_text,
            reason: record.reason,
            category: record.category,
            escalation_id: record.escalation_id,
            reference_id: record.reference_id,
            persisted: true,
        }
    }
}

type TicketLocks = Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>;

/// Per-ticket lock handed out by [`Orchestrator::ticket_lock`]. The map entry
/// is dropped with the last lease for that ticket.
struct TicketLease<'a> {
    locks: &'a TicketLocks,
    ticket_id: String,
    lock: Arc<tokio::sync::Mutex<()>>,
}

impl Drop for TicketLease<'_> {
    fn drop(&mut self) {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        // One reference in the map, one here: nobody else is waiting.
        if Arc::strong_count(&self.lock) == 2 {
            locks.remove(&self.ticket_id);
        }
    }
}

/// Recently finished outcomes, oldest evicted first.
///
/// Older tickets are answered by the record store's `fetch_terminal_state`.
struct CompletedOutcomes {
    outcomes: HashMap<String, ProcessOutcome>,
    order: VecDeque<String>,
    capacity: usize,
}

impl CompletedOutcomes {
    fn new(capacity: usize) -> Self {
        Self {
            outcomes: HashMap::new(),
            order: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    fn get(&self, ticket_id: &str) -> Option<ProcessOutcome> {
        self.outcomes.get(ticket_id).cloned()
    }

    fn insert(&mut self, outcome: ProcessOutcome) {
        let ticket_id = outcome.ticket_id.clone();
        if self.outcomes.insert(ticket_id.clone(), outcome).is_some() {
            return;
        }
        self.order.push_back(ticket_id);
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.outcomes.remove(&oldest);
            }
        }
    }

    fn len(&self) -> usize {
        self.outcomes.len()
    }
}

pub struct Orchestrator {
    collaborators: Collaborators,
    config: OrchestratorConfig,
    policy: triage::EscalationPolicy,
    history: HistoryCache,
    ticket_locks: TicketLocks,
    completed: Mutex<CompletedOutcomes>,
}

impl Orchestrator {
    pub fn new(collaborators: Collaborators, config: OrchestratorConfig) -> Self {
        let history =
            HistoryCache::with_ttl(collaborators.persistence.clone(), config.history_ttl());
        let completed = CompletedOutcomes::new(config.completed_capacity);
        Self {
            policy: triage::EscalationPolicy::with_config(config.policy()),
            history,
            collaborators,
            config,
            ticket_locks: Mutex::new(HashMap::new()),
            completed: Mutex::new(completed),
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn history(&self) -> &HistoryCache {
        &self.history
    }

    pub async fn process(&self, request: ProcessRequest) -> TriageResult<ProcessOutcome> {
        self.process_with_cancel(request, CancellationToken::new())
            .await
    }

    /// Process one ticket to a terminal state.
    ///
    /// Only malformed input is returned as `Err`; handler trouble ends up as a
    /// `failed` outcome with a generic apology.
    pub async fn process_with_cancel(
        &self,
        request: ProcessRequest,
        cancel: CancellationToken,
    ) -> TriageResult<ProcessOutcome> {
        let ticket = Ticket::new(
            &request.ticket_id,
            &request.user_id,
            request.channel,
            &request.user_message,
        )?;

        let lease = self.ticket_lock(&ticket.ticket_id);
        let _guard = lease.lock.lock().await;

        if let Some(outcome) = self.stored_outcome(&ticket.ticket_id).await {
            info!(
                ticket_id = %ticket.ticket_id,
                status = %outcome.status,
                "Ticket already terminal, returning stored result"
            );
            return Ok(outcome);
        }

        let started = tokio::time::Instant::now();
        info!(
            ticket_id = %ticket.ticket_id,
            user_id = %ticket.user_id,
            channel = %ticket.channel,
            "ticket_start"
        );

        let mut sm =
            TicketStateMachine::new(ticket, self.policy).with_ranking(self.config.ranking());
        let reference_id = Uuid::new_v4().to_string();

        match self.drive(&mut sm, &cancel).await {
            Ok(()) => {}
            Err(TriageError::Cancelled) => {
                if !sm.is_terminal() {
                    sm.fail(CANCELLED, None, &reference_id)?;
                }
                warn!(
                    ticket_id = %sm.ticket().ticket_id,
                    summary = %sm.summary(),
                    "Processing cancelled, nothing persisted"
                );
                return Ok(ProcessOutcome::from_machine(&sm, false));
            }
            Err(e) => {
                let reason = failure_reason(&e);
                error!(
                    ticket_id = %sm.ticket().ticket_id,
                    step = %sm.current(),
                    reason,
                    kind = %e.kind(),
                    recoverable = e.is_recoverable(),
                    error = %e,
                    "Ticket failed"
                );
                if !sm.is_terminal() {
                    sm.fail(reason, Some(e.to_string()), &reference_id)?;
                }
            }
        }

        let persisted = self.persist(&mut sm).await;
        if matches!(
            sm.ticket().status(),
            TicketStatus::Resolved | TicketStatus::Escalated
        ) {
            self.history.invalidate(&sm.ticket().user_id);
        }
        let purged = self.history.purge_expired();
        if purged > 0 {
            debug!(purged, "Purged expired history entries");
        }

        let outcome = ProcessOutcome::from_machine(&sm, persisted);
        self.remember(outcome.clone());

        info!(
            ticket_id = %outcome.ticket_id,
            status = %outcome.status,
            reason = outcome.reason.as_deref().unwrap_or_default(),
            agents = ?sm.ticket().agents_called(),
            tools = ?sm.ticket().tools_used(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            summary = %sm.summary(),
            "ticket_end"
        );
        Ok(outcome)
    }

    fn ticket_lock(&self, ticket_id: &str) -> TicketLease<'_> {
        let mut locks = self.ticket_locks.lock().unwrap_or_else(|e| e.into_inner());
        let lock = locks.entry(ticket_id.to_string()).or_default().clone();
        TicketLease {
            locks: &self.ticket_locks,
            ticket_id: ticket_id.to_string(),
            lock,
        }
    }

    fn remember(&self, outcome: ProcessOutcome) {
        self.completed
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(outcome);
    }

    async fn stored_outcome(&self, ticket_id: &str) -> Option<ProcessOutcome> {
        let remembered = self
            .completed
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(ticket_id);
        if remembered.is_some() {
            return remembered;
        }

        let fetch = self
            .collaborators
            .persistence
            .fetch_terminal_state(ticket_id);
        match with_deadline(self.config.persistence_timeout(), fetch).await {
            Ok(Some(record)) => {
                let outcome = ProcessOutcome::from_record(record);
                self.remember(outcome.clone());
                Some(outcome)
            }
            Ok(None) => None,
            Err(e) => {
                warn!(ticket_id, error = %e, "Terminal state lookup failed, processing afresh");
                None
            }
        }
    }

    async fn drive(
        &self,
        sm: &mut TicketStateMachine,
        cancel: &CancellationToken,
    ) -> TriageResult<()> {
        checkpoint(cancel)?;
        self.enrich_with_history(sm).await;
        checkpoint(cancel)?;

        sm.begin()?;
        let classification = with_deadline(
            self.config.classifier_timeout(),
            self.collaborators
                .classifier
                .classify(sm.ticket().request_text()),
        )
        .await
        .map_err(|source| unavailable("classifier", source))?;
        checkpoint(cancel)?;

        let mut next = sm.apply_classification(classification)?;
        loop {
            match next {
                TicketState::KnowledgeLookup => {
                    let tags = sm.ticket().category.map(|c| c.to_string());
                    let search = self
                        .collaborators
                        .knowledge
                        .search(sm.ticket().request_text(), tags.as_deref());
                    let result = with_deadline(self.config.knowledge_timeout(), search).await;
                    let candidates = or_not_found("knowledge", result)?.unwrap_or_default();
                    checkpoint(cancel)?;
                    next = sm.apply_knowledge(&candidates)?;
                }
                TicketState::AccountLookup => {
                    let lookup = self.collaborators.account.lookup(&sm.ticket().user_id);
                    let result = with_deadline(self.config.account_timeout(), lookup).await;
                    let snapshot = or_not_found("account_ops", result)?;
                    checkpoint(cancel)?;
                    next = sm.apply_account(snapshot)?;
                }
                TicketState::Escalating => {
                    let summary = sm.escalation_summary();
                    let reason = sm
                        .escalation_reason()
                        .unwrap_or(ROUTED_TO_ESCALATION)
                        .to_string();
                    let create = self.collaborators.escalation.create_ticket(
                        &sm.ticket().user_id,
                        &summary,
                        &reason,
                    );
                    let escalation_id = with_deadline(self.config.escalation_timeout(), create)
                        .await
                        .map_err(|source| unavailable("escalation", source))?;
                    checkpoint(cancel)?;
                    return sm.apply_escalation_created(escalation_id);
                }
                TicketState::Resolving => return sm.resolve(),
                other => {
                    return Err(TriageError::IllegalTransition {
                        scope: "pipeline",
                        from: sm.current().to_string(),
                        to: other.to_string(),
                    })
                }
            }
        }
    }

    async fn enrich_with_history(&self, sm: &mut TicketStateMachine) {
        let user_id = sm.ticket().user_id.clone();
        sm.ticket_mut().record_tool("ticket_history");

        let lookup = self.history.get(&user_id, self.config.history_limit);
        let history = match tokio::time::timeout(self.config.persistence_timeout(), lookup).await {
            Ok(history) => history,
            Err(_) => {
                warn!(user_id = %user_id, "History lookup timed out, proceeding without it");
                return;
            }
        };

        let patterns = UserPatterns::analyze(&history.tickets);
        debug!(
            user_id = %user_id,
            found = history.found,
            from_cache = history.from_cache,
            total = patterns.total_tickets,
            frequent = patterns.is_frequent_user,
            recurring = patterns.has_recurring_issues,
            "User history"
        );

        if let Some(context) = history_context(&history) {
            sm.ticket_mut().insert_context(context);
        }
    }

    async fn persist(&self, sm: &mut TicketStateMachine) -> bool {
        let Some(record) = sm.terminal_record() else {
            return false;
        };
        sm.ticket_mut().record_tool("persist_terminal_state");

        let write = self.collaborators.persistence.persist_terminal_state(&record);
        match with_deadline(self.config.persistence_timeout(), write).await {
            Ok(()) => true,
            Err(e) => {
                error!(
                    ticket_id = %record.ticket_id,
                    status = %record.status,
                    error = %e,
                    "Failed to persist terminal state"
                );
                false
            }
        }
    }
}

async fn with_deadline<T>(
    deadline: Duration,
    call: impl Future<Output = Result<T, HandlerError>>,
) -> Result<T, HandlerError> {
    tokio::time::timeout(deadline, call)
        .await
        .unwrap_or(Err(HandlerError::Timeout(deadline)))
}

fn checkpoint(cancel: &CancellationToken) -> TriageResult<()> {
    if cancel.is_cancelled() {
        return Err(TriageError::Cancelled);
    }
    Ok(())
}

fn unavailable(handler: &'static str, source: HandlerError) -> TriageError {
    TriageError::HandlerUnavailable { handler, source }
}

/// Lookups where `NotFound` means "no data": `Ok(None)` instead of an error.
fn or_not_found<T>(
    handler: &'static str,
    result: Result<T, HandlerError>,
) -> TriageResult<Option<T>> {
    match result.map_err(|e| TriageError::from_handler(handler, e)) {
        Ok(value) => Ok(Some(value)),
        Err(TriageError::NotFound(what)) => {
            debug!(handler, what = %what, "Nothing found, continuing without it");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

/// Stable reason label for a ticket that ends `failed`.
fn failure_reason(error: &TriageError) -> &'static str {
    match error {
        TriageError::HandlerUnavailable { handler, .. } => match *handler {
            "classifier" => "classification_unavailable",
            "knowledge" => "knowledge_unavailable",
            "account_ops" => "account_unavailable",
            "escalation" => "escalation_unavailable",
            _ => "handler_unavailable",
        },
        TriageError::Cancelled => CANCELLED,
        _ => "internal_error",
    }
}
