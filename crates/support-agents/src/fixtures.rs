//! In-memory collaborators.
//!
//! Deterministic stand-ins for the model-backed handlers and the record store.
//! The binary's demo runs on these, and tests use them wherever a scripted
//! handler is not needed.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use triage::memory::UserHistorySummary;
use triage::router::tokenize;
use triage::ticket::AccountSnapshot;
use triage::{
    AccountHandler, Category, ClassificationResult, ClassifierHandler, EscalationHandler,
    HandlerError, KnowledgeArticle, KnowledgeHandler, PersistenceClient, Route, TerminalRecord,
    Urgency,
};

use crate::orchestrator::Collaborators;

const BILLING_WORDS: &[&str] = &["refund", "charge", "charged", "billing", "invoice", "payment"];
const ACCOUNT_WORDS: &[&str] = &["subscription", "account", "reservation", "reservations", "booking"];
const TECHNICAL_WORDS: &[&str] = &["error", "crash", "bug", "broken", "app"];
const LOGIN_WORDS: &[&str] = &["password", "reset", "login"];
const CRITICAL_WORDS: &[&str] = &["emergency", "fraud", "hacked"];
const HIGH_WORDS: &[&str] = &["urgent", "asap", "immediately"];
const HUMAN_WORDS: &[&str] = &["human", "agent", "manager", "complaint"];

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

fn in_vocab(vocab: &[&str], word: &str) -> bool {
    vocab.iter().any(|v| *v == word)
}

/// Words of `text` stripped of surrounding punctuation.
fn words(text: &str) -> Vec<String> {
    text.split_whitespace()
        .map(|w| {
            w.trim_matches(|c: char| !c.is_alphanumeric())
                .to_lowercase()
        })
        .filter(|w| !w.is_empty())
        .collect()
}

/// Rule-based classifier over a fixed vocabulary.
#[derive(Debug, Default)]
pub struct KeywordClassifier;

#[async_trait]
impl ClassifierHandler for KeywordClassifier {
    async fn classify(&self, ticket_text: &str) -> Result<ClassificationResult, HandlerError> {
        let words = words(ticket_text);
        let any = |vocab: &[&str]| words.iter().any(|w| in_vocab(vocab, w));

        let (category, route) = if any(BILLING_WORDS) {
            (Category::Billing, Route::AccountOps)
        } else if any(ACCOUNT_WORDS) {
            (Category::Account, Route::AccountOps)
        } else if any(TECHNICAL_WORDS) {
            (Category::Technical, Route::Knowledge)
        } else {
            (Category::General, Route::Knowledge)
        };
        let route = if any(HUMAN_WORDS) { Route::Escalation } else { route };

        let urgency = if any(CRITICAL_WORDS) {
            Urgency::Critical
        } else if any(HIGH_WORDS) {
            Urgency::High
        } else {
            Urgency::Medium
        };

        let keywords = words
            .iter()
            .filter(|w| {
                [BILLING_WORDS, ACCOUNT_WORDS, TECHNICAL_WORDS, LOGIN_WORDS]
                    .iter()
                    .any(|vocab| in_vocab(vocab, w))
            })
            .cloned()
            .collect();

        Ok(ClassificationResult {
            category,
            urgency,
            keywords,
            recommended_route: route,
            escalation_reason: None,
        })
    }
}

/// Fixed article list. Returns every article sharing a word with the query.
#[derive(Debug, Default)]
pub struct ArticleCatalogue {
    articles: Vec<KnowledgeArticle>,
}

impl ArticleCatalogue {
    pub fn new(articles: Vec<KnowledgeArticle>) -> Self {
        Self { articles }
    }

    pub fn sample() -> Self {
        Self::new(vec![
            KnowledgeArticle {
                id: "kb-001".into(),
                title: "Password Reset".into(),
                content: "How do I reset my password? Open Settings, choose Security and select \
                          'Reset password'. We email you a link that stays valid for 30 minutes."
                    .into(),
                tags: Some("password, reset, login".into()),
            },
            KnowledgeArticle {
                id: "kb-002".into(),
                title: "Managing your subscription".into(),
                content: "You can upgrade, pause or cancel your subscription from the Billing page."
                    .into(),
                tags: Some("subscription, billing".into()),
            },
            KnowledgeArticle {
                id: "kb-003".into(),
                title: "Changing a reservation".into(),
                content: "Reservations can be changed up to 24 hours before the start time."
                    .into(),
                tags: Some("reservation, booking".into()),
            },
        ])
    }
}

#[async_trait]
impl KnowledgeHandler for ArticleCatalogue {
    async fn search(
        &self,
        query: &str,
        _tags: Option<&str>,
    ) -> Result<Vec<KnowledgeArticle>, HandlerError> {
        let query_words = words(query);
        Ok(self
            .articles
            .iter()
            .filter(|a| {
                let haystack = tokenize(&format!(
                    "{} {} {}",
                    a.title,
                    a.content,
                    a.tags.as_deref().unwrap_or_default().replace(',', " ")
                ));
                query_words.iter().any(|w| haystack.contains(w))
            })
            .cloned()
            .collect())
    }
}

/// Account snapshots keyed by user id. Unknown users are `NotFound`.
#[derive(Debug, Default)]
pub struct AccountTable {
    accounts: HashMap<String, AccountSnapshot>,
}

impl AccountTable {
    pub fn with_account(mut self, user_id: &str, snapshot: AccountSnapshot) -> Self {
        self.accounts.insert(user_id.to_string(), snapshot);
        self
    }
}

#[async_trait]
impl AccountHandler for AccountTable {
    async fn lookup(&self, user_id: &str) -> Result<AccountSnapshot, HandlerError> {
        self.accounts
            .get(user_id)
            .cloned()
            .ok_or_else(|| HandlerError::NotFound(format!("account for user {user_id}")))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EscalationRecord {
    pub escalation_id: String,
    pub user_id: String,
    pub summary: String,
    pub reason: String,
}

/// Queue of escalations handed to humans.
#[derive(Debug, Default)]
pub struct EscalationQueue {
    next_id: AtomicU64,
    records: Mutex<Vec<EscalationRecord>>,
}

impl EscalationQueue {
    pub fn records(&self) -> Vec<EscalationRecord> {
        lock(&self.records).clone()
    }
}

#[async_trait]
impl EscalationHandler for EscalationQueue {
    async fn create_ticket(
        &self,
        user_id: &str,
        summary: &str,
        reason: &str,
    ) -> Result<String, HandlerError> {
        let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let escalation_id = format!("ESC-{n:05}");
        lock(&self.records).push(EscalationRecord {
            escalation_id: escalation_id.clone(),
            user_id: user_id.to_string(),
            summary: summary.to_string(),
            reason: reason.to_string(),
        });
        Ok(escalation_id)
    }
}

/// Record store holding per-user history and terminal records.
#[derive(Debug, Default)]
pub struct TicketStore {
    history: Mutex<HashMap<String, Vec<UserHistorySummary>>>,
    records: Mutex<Vec<TerminalRecord>>,
}

impl TicketStore {
    /// Seed a past ticket for `user_id`.
    pub fn with_history(self, user_id: &str, summary: UserHistorySummary) -> Self {
        lock(&self.history)
            .entry(user_id.to_string())
            .or_default()
            .push(summary);
        self
    }

    pub fn records(&self) -> Vec<TerminalRecord> {
        lock(&self.records).clone()
    }
}

#[async_trait]
impl PersistenceClient for TicketStore {
    async fn fetch_ticket_history(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<UserHistorySummary>, HandlerError> {
        let history = lock(&self.history);
        let mut tickets = history.get(user_id).cloned().unwrap_or_default();
        tickets.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        tickets.truncate(limit);
        Ok(tickets)
    }

    async fn persist_terminal_state(&self, record: &TerminalRecord) -> Result<(), HandlerError> {
        lock(&self.history)
            .entry(record.user_id.clone())
            .or_default()
            .push(UserHistorySummary {
                ticket_id: record.ticket_id.clone(),
                issue_type: record.category.map(|c| c.to_string()),
                status: record.status.to_string(),
                created_at: Utc::now(),
            });
        lock(&self.records).push(record.clone());
        Ok(())
    }

    async fn fetch_terminal_state(
        &self,
        ticket_id: &str,
    ) -> Result<Option<TerminalRecord>, HandlerError> {
        Ok(lock(&self.records)
            .iter()
            .rev()
            .find(|r| r.ticket_id == ticket_id)
            .cloned())
    }
}

/// Handles to the demo collaborators, kept for inspection after a run.
pub struct DemoEnvironment {
    pub escalations: Arc<EscalationQueue>,
    pub store: Arc<TicketStore>,
    pub collaborators: Collaborators,
}

/// Collaborators seeded with the demo users and articles.
pub fn demo_environment() -> DemoEnvironment {
    let escalations = Arc::new(EscalationQueue::default());
    let store = Arc::new(TicketStore::default());
    let accounts = AccountTable::default()
        .with_account(
            "user-001",
            AccountSnapshot {
                blocked: false,
                subscription_status: Some("active".into()),
                reservation_count: 2,
            },
        )
        .with_account(
            "user-002",
            AccountSnapshot {
                blocked: false,
                subscription_status: Some("active".into()),
                reservation_count: 0,
            },
        );

    let collaborators = Collaborators {
        classifier: Arc::new(KeywordClassifier),
        knowledge: Arc::new(ArticleCatalogue::sample()),
        account: Arc::new(accounts),
        escalation: escalations.clone(),
        persistence: store.clone(),
    };
    DemoEnvironment {
        escalations,
        store,
        collaborators,
    }
}
