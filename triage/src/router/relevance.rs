//! Knowledge relevance scoring.
//!
//! Additive, capped keyword scheme. Exact title matches and tag hits dominate
//! diffuse content overlap:
//!
//! ```text
//! +0.50  whole query is a substring of the title
//! +0.15  per query word that is also a tag
//! +0.08  per query word found in the content
//! +0.20  per query word found in the title
//! clamp to [0, 1]
//! ```
//!
//! Query words are whitespace-delimited and lower-cased; punctuation is kept.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::ticket::ArticleScore;

const EXACT_TITLE_WEIGHT: f64 = 0.5;
const TAG_WEIGHT: f64 = 0.15;
const CONTENT_WEIGHT: f64 = 0.08;
const TITLE_WORD_WEIGHT: f64 = 0.2;

/// A candidate article as returned by the knowledge search collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnowledgeArticle {
    pub id: String,
    pub title: String,
    pub content: String,
    /// Comma and/or whitespace separated tag list.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<String>,
}

/// A candidate paired with its score and its position in the input.
#[derive(Debug, Clone, PartialEq)]
pub struct RankedArticle {
    pub index: usize,
    pub article: KnowledgeArticle,
    pub score: f64,
}

impl RankedArticle {
    pub fn to_article_score(&self) -> ArticleScore {
        ArticleScore {
            article_id: self.article.id.clone(),
            title: self.article.title.clone(),
            score: self.score,
        }
    }
}

/// Lower-cased set of whitespace-delimited words.
pub fn tokenize(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split_whitespace()
        .map(str::to_string)
        .collect()
}

fn tag_set(tags: &str) -> HashSet<String> {
    tags.to_lowercase()
        .replace(',', " ")
        .split_whitespace()
        .map(str::to_string)
        .collect()
}

/// Stateless scorer. Total over all inputs; never fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct RelevanceScorer;

impl RelevanceScorer {
    pub fn new() -> Self {
        Self
    }

    /// Score `article` against `query`, in `[0, 1]`.
    ///
    /// The exact-title weight is a plain substring test, so an empty or
    /// whitespace query matches any title that contains it. Callers reject
    /// blank messages before scoring.
    pub fn score(&self, query: &str, article: &KnowledgeArticle) -> f64 {
        let query_lower = query.to_lowercase();
        let words = tokenize(query);
        let title = article.title.to_lowercase();
        let content = article.content.to_lowercase();

        let mut score = 0.0;

        if title.contains(query_lower.as_str()) {
            score += EXACT_TITLE_WEIGHT;
        }

        if let Some(tags) = article.tags.as_deref() {
            let tags = tag_set(tags);
            score += TAG_WEIGHT * words.intersection(&tags).count() as f64;
        }

        let content_hits = words.iter().filter(|w| content.contains(w.as_str())).count();
        score += CONTENT_WEIGHT * content_hits as f64;

        let title_hits = words.iter().filter(|w| title.contains(w.as_str())).count();
        score += TITLE_WORD_WEIGHT * title_hits as f64;

        score.clamp(0.0, 1.0)
    }

    /// Score every candidate, drop those at or below `min_score`, and keep the
    /// best `limit` ordered by `(score desc, input index asc)`.
    pub fn rank(
        &self,
        query: &str,
        candidates: &[KnowledgeArticle],
        min_score: f64,
        limit: usize,
    ) -> Vec<RankedArticle> {
        let mut ranked: Vec<RankedArticle> = candidates
            .iter()
            .enumerate()
            .map(|(index, article)| RankedArticle {
                index,
                article: article.clone(),
                score: self.score(query, article),
            })
            .filter(|r| r.score > min_score)
            .collect();

        ranked.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.index.cmp(&b.index))
        });
        ranked.truncate(limit);
        ranked
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn article(id: &str, title: &str, content: &str, tags: Option<&str>) -> KnowledgeArticle {
        KnowledgeArticle {
            id: id.into(),
            title: title.into(),
            content: content.into(),
            tags: tags.map(String::from),
        }
    }

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_exact_title_match() {
        let scorer = RelevanceScorer::new();
        // "password reset": exact (0.5) + 2 title words (0.4) + 0 content
        let a = article("a1", "Password Reset Guide", "", None);
        assert!(approx(scorer.score("password reset", &a), 0.9));
    }

    #[test]
    fn test_tag_matches_split_on_commas_and_spaces() {
        let scorer = RelevanceScorer::new();
        let a = article("a1", "", "", Some("login,Password  billing"));
        assert!(approx(scorer.score("password login", &a), 0.3));
    }

    #[test]
    fn test_content_words_count_once() {
        let scorer = RelevanceScorer::new();
        let a = article("a1", "", "refund refund refund policy", None);
        assert!(approx(scorer.score("refund policy", &a), 0.16));
    }

    #[test]
    fn test_blank_query_is_a_title_substring() {
        let scorer = RelevanceScorer::new();
        let a = article("a1", "Password Reset", "", None);
        assert!(approx(scorer.score("", &a), 0.5));
        assert!(approx(scorer.score(" ", &a), 0.5));
        // no space in the title, no match
        assert!(approx(scorer.score(" ", &article("a2", "Password", "", None)), 0.0));
    }

    #[test]
    fn test_punctuation_is_kept_in_tokens() {
        let scorer = RelevanceScorer::new();
        let a = article("a1", "Password", "", None);
        // "password?" is not a substring of "password"
        assert!(approx(scorer.score("password?", &a), 0.0));
    }

    #[test]
    fn test_score_is_capped() {
        let scorer = RelevanceScorer::new();
        let a = article(
            "a1",
            "cancel my subscription",
            "cancel my subscription today",
            Some("cancel, subscription, my"),
        );
        assert!(approx(scorer.score("cancel my subscription", &a), 1.0));
    }

    #[test]
    fn test_rank_filters_sorts_and_truncates() {
        let scorer = RelevanceScorer::new();
        let candidates = vec![
            article("low", "Unrelated", "nothing here", None),
            article("mid", "", "reset steps", None),
            article("top", "Reset", "reset", None),
            article("mid2", "", "reset steps", None),
            article("mid3", "", "reset", None),
        ];
        let ranked = scorer.rank("reset", &candidates, 0.0, 3);
        let ids: Vec<&str> = ranked.iter().map(|r| r.article.id.as_str()).collect();
        // ties (0.08) keep input order
        assert_eq!(ids, ["top", "mid", "mid2"]);
        assert!(ranked.iter().all(|r| r.article.id != "low"));
    }

    #[test]
    fn test_rank_min_score_is_exclusive() {
        let scorer = RelevanceScorer::new();
        let candidates = vec![article("a", "", "reset", None)];
        assert_eq!(scorer.rank("reset", &candidates, 0.08, 3).len(), 0);
        assert_eq!(scorer.rank("reset", &candidates, 0.079, 3).len(), 1);
    }
}
