//! Pattern analysis over a user's past tickets.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use super::history_cache::UserHistory;
use super::UserHistorySummary;

/// Above this many past tickets a user counts as frequent.
const FREQUENT_USER_TICKETS: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserPatterns {
    pub total_tickets: usize,
    pub issue_counts: BTreeMap<String, usize>,
    pub most_common_issue: Option<String>,
    /// Share of past tickets that ended escalated, in `[0, 1]`.
    pub escalation_rate: f64,
    pub is_frequent_user: bool,
    pub has_recurring_issues: bool,
}

impl UserPatterns {
    pub fn analyze(tickets: &[UserHistorySummary]) -> Self {
        let issues: Vec<&str> = tickets
            .iter()
            .filter_map(|t| t.issue_type.as_deref())
            .collect();

        let mut issue_counts: BTreeMap<String, usize> = BTreeMap::new();
        for issue in &issues {
            *issue_counts.entry(issue.to_string()).or_insert(0) += 1;
        }

        // Highest count; ties go to the lexicographically first issue.
        let most_common_issue = issue_counts
            .iter()
            .max_by(|a, b| a.1.cmp(b.1).then_with(|| b.0.cmp(a.0)))
            .map(|(issue, _)| issue.clone());

        let escalated = tickets
            .iter()
            .filter(|t| t.status.eq_ignore_ascii_case("escalated"))
            .count();
        let escalation_rate = if tickets.is_empty() {
            0.0
        } else {
            escalated as f64 / tickets.len() as f64
        };

        Self {
            total_tickets: tickets.len(),
            has_recurring_issues: has_recurring(&issues),
            issue_counts,
            most_common_issue,
            escalation_rate,
            is_frequent_user: tickets.len() > FREQUENT_USER_TICKETS,
        }
    }
}

fn has_recurring(issues: &[&str]) -> bool {
    let distinct: HashSet<&&str> = issues.iter().collect();
    issues.len() > 1 && distinct.len() < issues.len()
}

/// System message summarising history for downstream handlers.
///
/// `None` when there is nothing worth saying.
pub fn history_context(history: &UserHistory) -> Option<String> {
    if !history.found || history.tickets.is_empty() {
        return None;
    }

    let mut lines = vec![
        format!("User history context for {}:", history.user_id),
        format!("- Total previous tickets: {}", history.tickets.len()),
    ];
    for (i, ticket) in history.tickets.iter().enumerate() {
        lines.push(format!(
            "- Ticket {}: {} ({} on {})",
            i + 1,
            ticket.issue_type.as_deref().unwrap_or("unknown"),
            ticket.status,
            ticket.created_at.format("%Y-%m-%d"),
        ));
    }

    let issues: Vec<&str> = history
        .tickets
        .iter()
        .filter_map(|t| t.issue_type.as_deref())
        .collect();
    if has_recurring(&issues) {
        lines.push("Recurring issue detected".to_string());
    }

    Some(lines.join("\n"))
}
