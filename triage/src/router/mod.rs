//! Knowledge routing support.
//!
//! Scoring is done here rather than by the search collaborator so that the
//! escalation decision depends only on deterministic code.

pub mod relevance;

pub use relevance::{tokenize, KnowledgeArticle, RankedArticle, RelevanceScorer};
