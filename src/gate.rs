//! Write-back gate
//!
//! Decides how extractor output is committed to the graph. Mentions are raw
//! provenance, not claims, so write-back never consults the judge's verdict
//! on the previous answer; answer acceptance is a separate concern handled
//! in the service layer.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::model::{Candidate, EntityId, SourceId};
use crate::storage::GraphStore;

/// Result of committing one (deduplicated) candidate
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateOutcome {
    pub name: String,

    #[serde(rename = "type")]
    pub entity_type: String,

    /// Accumulated mention weight for this batch
    pub weight: f64,

    /// Set when the candidate was committed
    pub entity_id: Option<EntityId>,

    /// Set when the candidate failed; other candidates are unaffected
    pub error: Option<String>,
}

impl CandidateOutcome {
    pub fn succeeded(&self) -> bool {
        self.entity_id.is_some()
    }
}

/// Per-batch commit report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchReport {
    pub source_id: SourceId,
    pub outcomes: Vec<CandidateOutcome>,
}

impl BatchReport {
    /// Ids of candidates that were committed.
    pub fn committed(&self) -> Vec<EntityId> {
        self.outcomes
            .iter()
            .filter_map(|o| o.entity_id.clone())
            .collect()
    }

    pub fn has_failures(&self) -> bool {
        self.outcomes.iter().any(|o| o.error.is_some())
    }
}

/// Commits candidate entities extracted from a source
pub struct WriteBackGate {
    store: Arc<dyn GraphStore>,
}

impl WriteBackGate {
    pub fn new(store: Arc<dyn GraphStore>) -> Self {
        Self { store }
    }

    /// Commit a batch of candidates against an already-created source.
    ///
    /// Duplicate candidates within the batch collapse to one upsert with
    /// summed weight. Candidates are applied independently; a failure on
    /// one is recorded in its outcome and does not roll back the rest.
    /// An empty batch is a no-op.
    pub async fn commit(
        &self,
        source_id: &SourceId,
        candidates: &[Candidate],
        now: DateTime<Utc>,
    ) -> Result<BatchReport> {
        let mut outcomes = Vec::new();

        for candidate in dedup_candidates(candidates) {
            let mut outcome = CandidateOutcome {
                name: candidate.name.clone(),
                entity_type: candidate.entity_type.clone(),
                weight: candidate.confidence,
                entity_id: None,
                error: None,
            };

            let committed = async {
                let entity_id = self
                    .store
                    .upsert_entity(&candidate.name, &candidate.entity_type, now)
                    .await?;
                self.store
                    .add_mention(&entity_id, source_id, candidate.confidence, now)
                    .await?;
                Ok::<_, crate::error::Error>(entity_id)
            }
            .await;

            match committed {
                Ok(entity_id) => outcome.entity_id = Some(entity_id),
                Err(err) => {
                    tracing::warn!(
                        name = %candidate.name,
                        source = %source_id,
                        error = %err,
                        "candidate rejected by write-back"
                    );
                    outcome.error = Some(err.to_string());
                }
            }
            outcomes.push(outcome);
        }

        Ok(BatchReport {
            source_id: source_id.clone(),
            outcomes,
        })
    }
}

/// Collapse duplicate (name, type) candidates into one, summing confidence.
/// First-seen order is preserved.
fn dedup_candidates(candidates: &[Candidate]) -> Vec<Candidate> {
    let mut order: Vec<(String, String)> = Vec::new();
    let mut merged: std::collections::HashMap<(String, String), Candidate> =
        std::collections::HashMap::new();

    for candidate in candidates {
        let key = (
            candidate.name.trim().to_lowercase(),
            candidate.entity_type.trim().to_lowercase(),
        );
        match merged.get_mut(&key) {
            Some(existing) => existing.confidence += candidate.confidence,
            None => {
                order.push(key.clone());
                merged.insert(key, candidate.clone());
            }
        }
    }

    order
        .into_iter()
        .filter_map(|key| merged.remove(&key))
        .collect()
}
