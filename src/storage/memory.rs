//! In-process graph backend
//!
//! Nothing is persisted; exists so the system runs without a database file
//! or a remote server. Maps are guarded by `tokio::sync::RwLock` with short
//! critical sections, so readers see snapshot-consistent state and are never
//! starved by a housekeeping pass.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::error::{Error, Result};
use crate::model::{
    EdgeRecord, Entity, EntityId, EventType, GraphExport, Mention, MentionStats, NodeKind,
    NodeRecord, Source, SourceId,
};

use super::GraphStore;

#[derive(Default)]
struct GraphData {
    entities: HashMap<EntityId, Entity>,
    sources: HashMap<SourceId, Source>,
    mentions: Vec<Mention>,
}

/// In-memory graph store
pub struct InMemoryStore {
    data: RwLock<GraphData>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            data: RwLock::new(GraphData::default()),
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl GraphStore for InMemoryStore {
    async fn upsert_entity(
        &self,
        name: &str,
        entity_type: &str,
        now: DateTime<Utc>,
    ) -> Result<EntityId> {
        let id = EntityId::derive(name, entity_type)?;
        let mut data = self.data.write().await;
        match data.entities.get_mut(&id) {
            Some(entity) => entity.touch(now),
            None => {
                let entity = Entity::new(name, entity_type, now)?;
                data.entities.insert(id.clone(), entity);
            }
        }
        Ok(id)
    }

    async fn add_mention(
        &self,
        entity_id: &EntityId,
        source_id: &SourceId,
        weight: f64,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let mut data = self.data.write().await;
        if !data.sources.contains_key(source_id) {
            return Err(Error::not_found(format!("source {source_id}")));
        }
        let seq = data
            .mentions
            .iter()
            .filter(|m| &m.entity_id == entity_id && &m.source_id == source_id)
            .count() as u32;
        let entity = data
            .entities
            .get_mut(entity_id)
            .ok_or_else(|| Error::not_found(format!("entity {entity_id}")))?;
        if now > entity.last_seen_at {
            entity.last_seen_at = now;
        }
        data.mentions.push(Mention {
            entity_id: entity_id.clone(),
            source_id: source_id.clone(),
            weight,
            asserted_at: now,
            seq,
        });
        Ok(())
    }

    async fn create_source(
        &self,
        id: &SourceId,
        payload: &str,
        event_type: EventType,
        now: DateTime<Utc>,
    ) -> Result<SourceId> {
        let mut data = self.data.write().await;
        if data.sources.contains_key(id) {
            return Err(Error::conflict(format!("source {id} already exists")));
        }
        data.sources.insert(
            id.clone(),
            Source {
                id: id.clone(),
                payload: payload.to_string(),
                event_type,
                received_at: now,
            },
        );
        Ok(id.clone())
    }

    async fn get_entity(&self, id: &EntityId) -> Result<Option<Entity>> {
        Ok(self.data.read().await.entities.get(id).cloned())
    }

    async fn get_source(&self, id: &SourceId) -> Result<Option<Source>> {
        Ok(self.data.read().await.sources.get(id).cloned())
    }

    async fn list_entities(&self, include_archived: bool) -> Result<Vec<Entity>> {
        let data = self.data.read().await;
        Ok(data
            .entities
            .values()
            .filter(|e| include_archived || !e.archived)
            .cloned()
            .collect())
    }

    async fn sources_for(&self, entity_id: &EntityId, limit: usize) -> Result<Vec<Source>> {
        let data = self.data.read().await;
        let mut mentions: Vec<&Mention> = data
            .mentions
            .iter()
            .filter(|m| &m.entity_id == entity_id)
            .collect();
        mentions.sort_by(|a, b| {
            b.asserted_at
                .cmp(&a.asserted_at)
                .then_with(|| a.source_id.cmp(&b.source_id))
        });

        let mut seen = std::collections::HashSet::new();
        let mut sources = Vec::new();
        for mention in mentions {
            if sources.len() >= limit {
                break;
            }
            if seen.insert(&mention.source_id) {
                if let Some(source) = data.sources.get(&mention.source_id) {
                    sources.push(source.clone());
                }
            }
        }
        Ok(sources)
    }

    async fn mention_stats(&self, entity_id: &EntityId) -> Result<MentionStats> {
        let data = self.data.read().await;
        let mut stats = MentionStats::default();
        for mention in data.mentions.iter().filter(|m| &m.entity_id == entity_id) {
            stats.count += 1;
            stats.total_weight += mention.weight;
            if let Some(source) = data.sources.get(&mention.source_id) {
                stats.event_weight_sum += mention.weight * source.event_type.weight();
            }
            stats.last_asserted_at = match stats.last_asserted_at {
                Some(t) if t >= mention.asserted_at => Some(t),
                _ => Some(mention.asserted_at),
            };
        }
        Ok(stats)
    }

    async fn update_scores(
        &self,
        entity_id: &EntityId,
        decay: f64,
        importance: f64,
    ) -> Result<()> {
        let mut data = self.data.write().await;
        let entity = data
            .entities
            .get_mut(entity_id)
            .ok_or_else(|| Error::not_found(format!("entity {entity_id}")))?;
        entity.decay_score = decay;
        entity.importance = importance;
        Ok(())
    }

    async fn set_archived(&self, entity_id: &EntityId, archived: bool) -> Result<()> {
        let mut data = self.data.write().await;
        let entity = data
            .entities
            .get_mut(entity_id)
            .ok_or_else(|| Error::not_found(format!("entity {entity_id}")))?;
        entity.archived = archived;
        Ok(())
    }

    async fn export_graph(&self) -> Result<GraphExport> {
        let data = self.data.read().await;

        let mut nodes = Vec::with_capacity(data.entities.len() + data.sources.len());
        for entity in data.entities.values() {
            nodes.push(NodeRecord {
                id: entity.id.to_string(),
                label: entity.name.clone(),
                kind: NodeKind::Entity,
                props: serde_json::to_value(entity)?,
            });
        }
        for source in data.sources.values() {
            nodes.push(NodeRecord {
                id: source.id.to_string(),
                label: source.id.to_string(),
                kind: NodeKind::Source,
                props: serde_json::to_value(source)?,
            });
        }

        let edges = data
            .mentions
            .iter()
            .map(|m| EdgeRecord {
                id: m.edge_id(),
                from: m.entity_id.to_string(),
                to: m.source_id.to_string(),
                label: "mentioned_in".to_string(),
                weight: m.weight,
                asserted_at: m.asserted_at,
            })
            .collect();

        Ok(GraphExport { nodes, edges }.normalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mention_requires_both_endpoints() {
        let store = InMemoryStore::new();
        let now = Utc::now();

        let entity = store.upsert_entity("Dhiraj", "person", now).await.unwrap();
        let ghost = SourceId::new("missing:1").unwrap();
        let err = store.add_mention(&entity, &ghost, 1.0, now).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));

        let source = SourceId::new("demo:1").unwrap();
        store
            .create_source(&source, "hello", EventType::Text, now)
            .await
            .unwrap();
        let ghost_entity = EntityId::derive("Nobody", "person").unwrap();
        let err = store
            .add_mention(&ghost_entity, &source, 1.0, now)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn repeated_mentions_accumulate_seq() {
        let store = InMemoryStore::new();
        let now = Utc::now();

        let entity = store.upsert_entity("OpenClaw", "project", now).await.unwrap();
        let source = SourceId::new("demo:1").unwrap();
        store
            .create_source(&source, "x", EventType::Text, now)
            .await
            .unwrap();

        store.add_mention(&entity, &source, 1.0, now).await.unwrap();
        store.add_mention(&entity, &source, 0.5, now).await.unwrap();

        let export = store.export_graph().await.unwrap();
        assert_eq!(export.edges.len(), 2);
        assert!(export.edges.iter().any(|e| e.id.ends_with("#0")));
        assert!(export.edges.iter().any(|e| e.id.ends_with("#1")));
    }
}
