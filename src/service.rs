//! Orchestration facade
//!
//! Wires the collaborators and the graph memory layer into the boundary
//! surface: ingest, context queries, housekeeping, export, and the full
//! extract/answer/judge turn. Write-back and answer acceptance share only
//! the judge's verdict as a signal; the verdict never gates what is
//! remembered.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::context::{ContextPack, ContextPackBuilder};
use crate::error::Result;
use crate::gate::{BatchReport, WriteBackGate};
use crate::housekeeping::{Housekeeper, HousekeepingReport};
use crate::llm::{Extractor, Judge, Judgement, MockExtractor, MockJudge, MockWorker, Verdict, Worker};
use crate::model::{Candidate, EventType, GraphExport, SourceId};
use crate::storage::{open_store, GraphStore};

const WORKER_GOAL: &str = "Respond to the user without hallucinating; be helpful.";

const ABSTENTION: &str =
    "I can't give a grounded answer to that yet; tell me more and I will remember it.";

/// Result of ingesting one event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestReport {
    pub source_id: SourceId,

    /// What the extractor proposed
    pub candidates: Vec<Candidate>,

    /// What the gate committed
    pub report: BatchReport,
}

/// Result of a full conversational turn
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnOutcome {
    pub ingest: IngestReport,

    /// The pack the worker was grounded in
    pub context: ContextPack,

    /// Final answer after the acceptance policy was applied
    pub answer: String,

    pub judgement: Judgement,
}

/// The graph memory system behind one store
pub struct MemoryService {
    config: Config,
    store: Arc<dyn GraphStore>,
    gate: WriteBackGate,
    context: ContextPackBuilder,
    housekeeper: Housekeeper,
    extractor: Arc<dyn Extractor>,
    worker: Arc<dyn Worker>,
    judge: Arc<dyn Judge>,
}

impl MemoryService {
    /// Open the configured backend with the deterministic mock collaborators.
    pub async fn open(config: Config) -> Result<Self> {
        let store = open_store(&config).await?;
        Ok(Self::with_collaborators(
            config,
            store,
            Arc::new(MockExtractor),
            Arc::new(MockWorker),
            Arc::new(MockJudge),
        ))
    }

    /// Wire an explicit store and collaborator set.
    pub fn with_collaborators(
        config: Config,
        store: Arc<dyn GraphStore>,
        extractor: Arc<dyn Extractor>,
        worker: Arc<dyn Worker>,
        judge: Arc<dyn Judge>,
    ) -> Self {
        let gate = WriteBackGate::new(store.clone());
        let context = ContextPackBuilder::new(store.clone(), &config);
        let housekeeper = Housekeeper::new(store.clone(), &config);
        Self {
            config,
            store,
            gate,
            context,
            housekeeper,
            extractor,
            worker,
            judge,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> Arc<dyn GraphStore> {
        self.store.clone()
    }

    /// Ingest one event: record the source, extract candidates, commit them
    /// through the write-back gate.
    pub async fn submit_event(
        &self,
        event_type: EventType,
        source_id: &str,
        payload: &str,
    ) -> Result<IngestReport> {
        let source_id = SourceId::new(source_id)?;
        let now = Utc::now();

        self.store
            .create_source(&source_id, payload, event_type, now)
            .await?;

        // Extraction runs strictly outside any store call.
        let candidates = self.extractor.extract(payload).await?;
        tracing::debug!(source = %source_id, candidates = candidates.len(), "extracted candidates");

        let report = self.gate.commit(&source_id, &candidates, now).await?;
        tracing::info!(
            source = %source_id,
            committed = report.committed().len(),
            failed = report.outcomes.iter().filter(|o| o.error.is_some()).count(),
            "event ingested"
        );

        Ok(IngestReport {
            source_id,
            candidates,
            report,
        })
    }

    /// Run a full turn: ingest, build context, answer, judge, and apply the
    /// answer-acceptance policy. Write-back has already happened by the time
    /// the judge runs; a rejected answer costs the caller the reply, never
    /// the memory.
    pub async fn handle(
        &self,
        text: &str,
        source_id: &str,
        event_type: EventType,
    ) -> Result<TurnOutcome> {
        let ingest = self.submit_event(event_type, source_id, text).await?;

        let context = self
            .context
            .build(self.context.query(None, None, None))
            .await?;
        let context_text = context.format_for_prompt();

        let answer = self.worker.answer(&context_text, text).await?;
        let judgement = self.judge.judge(WORKER_GOAL, &answer, &context_text).await?;

        let answer = match judgement.verdict {
            Verdict::Accept | Verdict::Abstain => answer,
            Verdict::Reject => {
                tracing::info!(source = %ingest.source_id, "answer rejected by judge; abstaining");
                ABSTENTION.to_string()
            }
        };

        Ok(TurnOutcome {
            ingest,
            context,
            answer,
            judgement,
        })
    }

    /// Build a context pack; `None` limit uses the configured default.
    pub async fn get_context(
        &self,
        limit: Option<usize>,
        since: Option<DateTime<Utc>>,
        min_importance: Option<f64>,
    ) -> Result<ContextPack> {
        self.context
            .build(self.context.query(limit, since, min_importance))
            .await
    }

    /// Cancellable variant of `get_context`.
    pub async fn get_context_with_cancel(
        &self,
        limit: Option<usize>,
        since: Option<DateTime<Utc>>,
        min_importance: Option<f64>,
        cancel: &CancellationToken,
    ) -> Result<ContextPack> {
        self.context
            .build_with_cancel(self.context.query(limit, since, min_importance), cancel)
            .await
    }

    /// Trigger one housekeeping pass.
    pub async fn run_housekeeping(&self) -> Result<HousekeepingReport> {
        self.housekeeper.run(&CancellationToken::new()).await
    }

    /// Cancellable housekeeping pass; partial progress is retained.
    pub async fn run_housekeeping_with_cancel(
        &self,
        cancel: &CancellationToken,
    ) -> Result<HousekeepingReport> {
        self.housekeeper.run(cancel).await
    }

    /// Full graph dump for inspection and audit.
    pub async fn export_graph(&self) -> Result<GraphExport> {
        self.store.export_graph().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BackendKind;
    use crate::llm::Verdict;
    use async_trait::async_trait;

    fn memory_service() -> MemoryService {
        let config = Config {
            backend: BackendKind::Memory,
            ..Config::default()
        };
        MemoryService::with_collaborators(
            config,
            Arc::new(crate::storage::InMemoryStore::new()),
            Arc::new(MockExtractor),
            Arc::new(MockWorker),
            Arc::new(MockJudge),
        )
    }

    struct RejectingJudge;

    #[async_trait]
    impl Judge for RejectingJudge {
        async fn judge(&self, _goal: &str, _answer: &str, _context: &str) -> Result<Judgement> {
            Ok(Judgement {
                verdict: Verdict::Reject,
                notes: "not grounded".to_string(),
            })
        }
    }

    #[tokio::test]
    async fn turn_ingests_and_answers() {
        let service = memory_service();
        let outcome = service
            .handle("Dhiraj and Jay are building OpenClaw", "demo:1", EventType::Text)
            .await
            .unwrap();

        assert_eq!(outcome.ingest.report.committed().len(), 3);
        assert_eq!(outcome.context.entries.len(), 3);
        assert!(outcome.answer.contains("3 remembered fact(s)"));
        assert_eq!(outcome.judgement.verdict, Verdict::Accept);
    }

    #[tokio::test]
    async fn rejected_answer_becomes_abstention_but_memory_sticks() {
        let config = Config {
            backend: BackendKind::Memory,
            ..Config::default()
        };
        let service = MemoryService::with_collaborators(
            config,
            Arc::new(crate::storage::InMemoryStore::new()),
            Arc::new(MockExtractor),
            Arc::new(MockWorker),
            Arc::new(RejectingJudge),
        );

        let outcome = service
            .handle("Dhiraj likes OpenClaw", "demo:1", EventType::Text)
            .await
            .unwrap();

        assert_eq!(outcome.answer, ABSTENTION);
        // The rejection governed the answer only; the facts were committed.
        assert_eq!(outcome.ingest.report.committed().len(), 2);
        let pack = service.get_context(Some(10), None, None).await.unwrap();
        assert_eq!(pack.entries.len(), 2);
    }

    #[tokio::test]
    async fn duplicate_source_id_is_a_conflict() {
        let service = memory_service();
        service
            .submit_event(EventType::Text, "demo:1", "Dhiraj exists")
            .await
            .unwrap();
        let err = service
            .submit_event(EventType::Text, "demo:1", "Jay exists")
            .await
            .unwrap_err();
        assert!(matches!(err, crate::error::Error::Conflict(_)));
    }
}
