//! External collaborator boundary
//!
//! Extraction, answering, and judging are opaque collaborators reached
//! through these traits. The mock implementations are deterministic so the
//! whole pipeline runs offline in demos and tests. None of these calls is
//! ever made while a store lock is held.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::model::Candidate;

/// Judge verdict on a generated answer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Accept,
    Reject,
    Abstain,
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Verdict::Accept => write!(f, "accept"),
            Verdict::Reject => write!(f, "reject"),
            Verdict::Abstain => write!(f, "abstain"),
        }
    }
}

/// A judge's verdict with its supporting notes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Judgement {
    pub verdict: Verdict,
    pub notes: String,
}

/// Turns raw event text into candidate entities
#[async_trait]
pub trait Extractor: Send + Sync {
    async fn extract(&self, text: &str) -> Result<Vec<Candidate>>;
}

/// Produces an answer grounded in a context pack
#[async_trait]
pub trait Worker: Send + Sync {
    async fn answer(&self, context: &str, question: &str) -> Result<String>;
}

/// Verifies an answer against the context it was grounded in
#[async_trait]
pub trait Judge: Send + Sync {
    async fn judge(&self, goal: &str, answer: &str, context: &str) -> Result<Judgement>;
}

/// Deterministic extractor: title-cased words become entities.
///
/// Crude on purpose; it stands in for the LLM extractor in demos and tests
/// where reproducibility matters more than quality.
pub struct MockExtractor;

#[async_trait]
impl Extractor for MockExtractor {
    async fn extract(&self, text: &str) -> Result<Vec<Candidate>> {
        let mut names: Vec<&str> = text
            .split_whitespace()
            .map(|w| w.trim_matches(|c: char| c.is_ascii_punctuation()))
            .filter(|w| w.len() > 2 && w.chars().next().is_some_and(|c| c.is_uppercase()))
            .collect();
        names.sort_unstable();
        names.dedup();

        Ok(names
            .into_iter()
            .map(|name| Candidate::new(name, "entity", 1.0))
            .collect())
    }
}

/// Deterministic worker: restates how much context it was grounded in.
pub struct MockWorker;

#[async_trait]
impl Worker for MockWorker {
    async fn answer(&self, context: &str, question: &str) -> Result<String> {
        let facts = context.lines().filter(|l| !l.trim().is_empty()).count();
        Ok(format!(
            "Working from {facts} remembered fact(s), here is what I can say about: {question}"
        ))
    }
}

/// Deterministic judge: accepts everything, with a disclaimer in the notes.
pub struct MockJudge;

#[async_trait]
impl Judge for MockJudge {
    async fn judge(&self, _goal: &str, _answer: &str, _context: &str) -> Result<Judgement> {
        Ok(Judgement {
            verdict: Verdict::Accept,
            notes: "mock judge; no factual verification performed".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_extractor_is_deterministic_and_deduped() {
        let extractor = MockExtractor;
        let a = extractor
            .extract("Dhiraj and Jay are building OpenClaw, and Jay likes it.")
            .await
            .unwrap();
        let b = extractor
            .extract("Dhiraj and Jay are building OpenClaw, and Jay likes it.")
            .await
            .unwrap();

        let names: Vec<&str> = a.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["Dhiraj", "Jay", "OpenClaw"]);
        assert_eq!(names, b.iter().map(|c| c.name.as_str()).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn mock_extractor_ignores_short_and_lowercase_words() {
        let extractor = MockExtractor;
        let candidates = extractor.extract("we met at the office").await.unwrap();
        assert!(candidates.is_empty());
    }
}
