//! Storage backends for engram-memory
//!
//! Every backend implements the same `GraphStore` primitive set; ranking
//! semantics live in the provided `query_context` method so they cannot
//! drift between backends.

use std::cmp::Ordering;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::{BackendKind, Config};
use crate::error::Result;
use crate::model::{Entity, EntityId, EventType, GraphExport, MentionStats, Source, SourceId};

mod memory;
mod remote;
mod sqlite;

pub use memory::InMemoryStore;
pub use remote::RemoteStore;
pub use sqlite::SqliteStore;

/// Parameters for a context query
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextQuery {
    /// Max entities in the result
    pub limit: usize,

    /// Only include entities seen at or after this time
    pub since: Option<DateTime<Utc>>,

    /// Only include entities at or above this importance
    pub min_importance: Option<f64>,

    /// Max source references attached per entity
    pub provenance: usize,
}

impl ContextQuery {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            since: None,
            min_importance: None,
            provenance: 3,
        }
    }

    pub fn since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }

    pub fn min_importance(mut self, min: f64) -> Self {
        self.min_importance = Some(min);
        self
    }

    pub fn provenance(mut self, provenance: usize) -> Self {
        self.provenance = provenance;
        self
    }
}

/// One ranked entity with its attached provenance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextEntry {
    pub entity: Entity,

    /// Most recent sources first, at most `ContextQuery::provenance` of them
    pub sources: Vec<Source>,
}

/// Raw result of a context query, before the builder wraps it into a pack
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextSlice {
    pub entries: Vec<ContextEntry>,

    /// Set when a partial read failure dropped entries; the slice is still
    /// usable, just not exhaustive
    pub incomplete: bool,
}

/// Composite ranking: importance desc, recency desc, id asc.
/// The id tie-break makes the ordering reproducible for identical inputs.
pub fn rank_entities(entities: &mut [Entity]) {
    entities.sort_by(|a, b| {
        b.importance
            .partial_cmp(&a.importance)
            .unwrap_or(Ordering::Equal)
            .then_with(|| b.last_seen_at.cmp(&a.last_seen_at))
            .then_with(|| a.id.cmp(&b.id))
    });
}

/// Backend-agnostic graph store contract.
///
/// All mutating primitives take an explicit `now` so callers (and tests)
/// control the timeline; production code passes `Utc::now()`.
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Idempotent create-or-touch on the (name, type) key. Updates
    /// `last_seen_at` and clears `archived` on fresh evidence.
    async fn upsert_entity(
        &self,
        name: &str,
        entity_type: &str,
        now: DateTime<Utc>,
    ) -> Result<EntityId>;

    /// Append a mention edge. Fails with `NotFound` if either end is absent.
    /// Prior edges are never overwritten.
    async fn add_mention(
        &self,
        entity_id: &EntityId,
        source_id: &SourceId,
        weight: f64,
        now: DateTime<Utc>,
    ) -> Result<()>;

    /// Record a source. Fails with `Conflict` if the caller-chosen id
    /// already exists; the first payload is never rewritten.
    async fn create_source(
        &self,
        id: &SourceId,
        payload: &str,
        event_type: EventType,
        now: DateTime<Utc>,
    ) -> Result<SourceId>;

    async fn get_entity(&self, id: &EntityId) -> Result<Option<Entity>>;

    async fn get_source(&self, id: &SourceId) -> Result<Option<Source>>;

    /// All entities, optionally including archived ones. Archived entities
    /// stay queryable here for audit even though context packs exclude them.
    async fn list_entities(&self, include_archived: bool) -> Result<Vec<Entity>>;

    /// Most recent sources that mentioned the entity, newest first.
    async fn sources_for(&self, entity_id: &EntityId, limit: usize) -> Result<Vec<Source>>;

    /// Aggregate mention statistics for one entity.
    async fn mention_stats(&self, entity_id: &EntityId) -> Result<MentionStats>;

    /// Housekeeping primitive: atomically set both scores on one entity.
    async fn update_scores(&self, entity_id: &EntityId, decay: f64, importance: f64)
        -> Result<()>;

    /// Housekeeping primitive: flip the archived flag on one entity.
    async fn set_archived(&self, entity_id: &EntityId, archived: bool) -> Result<()>;

    /// Full snapshot of nodes and edges, canonically ordered.
    async fn export_graph(&self) -> Result<GraphExport>;

    /// Ranked, bounded context query. Defined once against the primitives;
    /// backends inherit identical semantics.
    ///
    /// A failure while attaching provenance for one entity degrades the
    /// slice to `incomplete` instead of failing the whole query.
    async fn query_context(&self, query: &ContextQuery) -> Result<ContextSlice> {
        let mut entities = self.list_entities(false).await?;
        if let Some(since) = query.since {
            entities.retain(|e| e.last_seen_at >= since);
        }
        if let Some(min) = query.min_importance {
            entities.retain(|e| e.importance >= min);
        }
        rank_entities(&mut entities);
        entities.truncate(query.limit);

        let mut entries = Vec::with_capacity(entities.len());
        let mut incomplete = false;
        for entity in entities {
            match self.sources_for(&entity.id, query.provenance).await {
                Ok(sources) => {
                    // An entity with no provenance never enters a pack.
                    if !sources.is_empty() {
                        entries.push(ContextEntry { entity, sources });
                    }
                }
                Err(err) => {
                    tracing::warn!(entity = %entity.id, error = %err, "provenance read failed; context degraded");
                    incomplete = true;
                }
            }
        }

        Ok(ContextSlice {
            entries,
            incomplete,
        })
    }
}

/// Open the backend selected by the config. Resolved once at startup; the
/// rest of the system only sees `Arc<dyn GraphStore>`.
pub async fn open_store(config: &Config) -> Result<Arc<dyn GraphStore>> {
    let store: Arc<dyn GraphStore> = match config.backend {
        BackendKind::Memory => Arc::new(InMemoryStore::new()),
        BackendKind::Sqlite => {
            config.ensure_dirs()?;
            Arc::new(SqliteStore::new(config)?)
        }
        BackendKind::Remote => Arc::new(RemoteStore::new(config)?),
    };
    Ok(store)
}
