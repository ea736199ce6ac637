//! Entity, Source, and Mention types stored in the graph

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Stable entity identifier, derived from the normalized (name, type) key.
///
/// Two mentions of the same name/type pair always map to the same id, which
/// is what makes `upsert_entity` idempotent. The lexicographic order of ids
/// is also the deterministic tie-break in context ranking.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(String);

impl EntityId {
    /// Derive the id for a (name, type) pair.
    ///
    /// Fails with `Validation` if either part is empty after trimming.
    pub fn derive(name: &str, entity_type: &str) -> Result<Self> {
        let name = name.trim();
        let entity_type = entity_type.trim();
        if name.is_empty() {
            return Err(Error::validation("entity name must not be empty"));
        }
        if entity_type.is_empty() {
            return Err(Error::validation("entity type must not be empty"));
        }
        Ok(Self(format!(
            "{}:{}",
            entity_type.to_lowercase(),
            name.to_lowercase()
        )))
    }

    /// Wrap an id string already in derived form (wire format from a
    /// backend). Only validates non-emptiness.
    pub fn from_raw(raw: impl Into<String>) -> Result<Self> {
        let raw = raw.into();
        if raw.trim().is_empty() {
            return Err(Error::validation("entity id must not be empty"));
        }
        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Caller-supplied provenance token identifying a source event, e.g. "demo:1".
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceId(String);

impl SourceId {
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(Error::validation("source id must not be empty"));
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kind of event a source was captured from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Text,
    Decision,
    Preference,
    Pattern,
    GitCommit,
    Revert,
    CodeIndex,
}

impl EventType {
    /// Weight of a mention carried by a source of this kind when importance
    /// is recomputed. Decisions and preferences outrank transient text.
    pub fn weight(&self) -> f64 {
        match self {
            EventType::Decision => 2.0,
            EventType::Preference => 2.0,
            EventType::Revert => 1.5,
            EventType::Pattern => 1.2,
            EventType::GitCommit => 1.0,
            EventType::CodeIndex => 0.8,
            EventType::Text => 0.5,
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventType::Text => write!(f, "text"),
            EventType::Decision => write!(f, "decision"),
            EventType::Preference => write!(f, "preference"),
            EventType::Pattern => write!(f, "pattern"),
            EventType::GitCommit => write!(f, "git_commit"),
            EventType::Revert => write!(f, "revert"),
            EventType::CodeIndex => write!(f, "code_index"),
        }
    }
}

impl std::str::FromStr for EventType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "text" => Ok(EventType::Text),
            "decision" => Ok(EventType::Decision),
            "preference" => Ok(EventType::Preference),
            "pattern" => Ok(EventType::Pattern),
            "git_commit" => Ok(EventType::GitCommit),
            "revert" => Ok(EventType::Revert),
            "code_index" => Ok(EventType::CodeIndex),
            other => Err(Error::validation(format!("unknown event type: {other}"))),
        }
    }
}

/// An entity node in the graph
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    /// Stable id derived from (name, type)
    pub id: EntityId,

    /// Display name as first asserted
    pub name: String,

    /// Open type tag, e.g. "person", "project", "goal"
    pub entity_type: String,

    /// When the entity was first created
    pub created_at: DateTime<Utc>,

    /// When the entity was last mentioned
    pub last_seen_at: DateTime<Utc>,

    /// Importance score maintained by the housekeeper
    #[serde(default)]
    pub importance: f64,

    /// Decay score maintained by the housekeeper
    #[serde(default)]
    pub decay_score: f64,

    /// Soft-deleted by the housekeeper; excluded from context packs
    #[serde(default)]
    pub archived: bool,
}

impl Entity {
    /// Create a fresh entity at `now`.
    pub fn new(name: impl Into<String>, entity_type: impl Into<String>, now: DateTime<Utc>) -> Result<Self> {
        let name = name.into();
        let entity_type = entity_type.into();
        let id = EntityId::derive(&name, &entity_type)?;
        Ok(Self {
            id,
            name: name.trim().to_string(),
            entity_type: entity_type.trim().to_string(),
            created_at: now,
            last_seen_at: now,
            importance: 0.0,
            decay_score: 0.0,
            archived: false,
        })
    }

    /// Record fresh evidence: bump `last_seen_at` and reactivate if archived.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        if now > self.last_seen_at {
            self.last_seen_at = now;
        }
        self.archived = false;
    }
}

/// A source node: the provenance record for one inbound event.
/// Immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Source {
    /// Caller-supplied provenance token
    pub id: SourceId,

    /// Raw text or payload reference
    pub payload: String,

    /// Kind of event this source was captured from
    pub event_type: EventType,

    /// When the source was recorded
    pub received_at: DateTime<Utc>,
}

/// A mention edge: one assertion of an entity by a source.
///
/// Mentions accumulate; a repeated (entity, source) pair gets a new edge
/// with the next `seq`, never an overwrite.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mention {
    pub entity_id: EntityId,
    pub source_id: SourceId,

    /// Confidence/weight inherited from the write-back decision
    pub weight: f64,

    pub asserted_at: DateTime<Utc>,

    /// Occurrence counter within the (entity, source) pair, starting at 0
    pub seq: u32,
}

impl Mention {
    /// Deterministic edge id, identical across backends for the same
    /// mutation sequence.
    pub fn edge_id(&self) -> String {
        format!(
            "{}::mentioned_in::{}#{}",
            self.entity_id, self.source_id, self.seq
        )
    }
}

/// Aggregate mention statistics for one entity, used by the housekeeper.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MentionStats {
    /// Total number of mention edges
    pub count: u64,

    /// Sum of mention weights
    pub total_weight: f64,

    /// Sum of mention weight * source event-type weight
    pub event_weight_sum: f64,

    /// Most recent assertion, if any
    pub last_asserted_at: Option<DateTime<Utc>>,
}

/// A candidate entity proposed by the extractor for one source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candidate {
    pub name: String,

    #[serde(rename = "type")]
    pub entity_type: String,

    /// Extractor confidence in [0, 1]; becomes the mention weight
    #[serde(default = "default_confidence")]
    pub confidence: f64,
}

fn default_confidence() -> f64 {
    1.0
}

impl Candidate {
    pub fn new(name: impl Into<String>, entity_type: impl Into<String>, confidence: f64) -> Self {
        Self {
            name: name.into(),
            entity_type: entity_type.into(),
            confidence,
        }
    }
}

/// Kind of node in an exported snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Entity,
    Source,
}

/// One node in an exported snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeRecord {
    pub id: String,
    pub label: String,
    pub kind: NodeKind,
    pub props: serde_json::Value,
}

/// One edge in an exported snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeRecord {
    pub id: String,
    pub from: String,
    pub to: String,
    pub label: String,
    pub weight: f64,
    pub asserted_at: DateTime<Utc>,
}

/// Full read-only dump of the graph for inspection and audit.
///
/// Nodes and edges are sorted by id so exports from different backends
/// compare directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphExport {
    pub nodes: Vec<NodeRecord>,
    pub edges: Vec<EdgeRecord>,
}

impl GraphExport {
    /// Sort nodes and edges into the canonical order.
    pub fn normalize(mut self) -> Self {
        self.nodes.sort_by(|a, b| a.id.cmp(&b.id));
        self.edges.sort_by(|a, b| a.id.cmp(&b.id));
        self
    }

    /// Check that every edge endpoint exists among the nodes.
    pub fn is_referentially_complete(&self) -> bool {
        let ids: std::collections::HashSet<&str> =
            self.nodes.iter().map(|n| n.id.as_str()).collect();
        self.edges
            .iter()
            .all(|e| ids.contains(e.from.as_str()) && ids.contains(e.to.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_id_is_a_pure_function_of_key() {
        let a = EntityId::derive("Dhiraj", "person").unwrap();
        let b = EntityId::derive("  dhiraj ", "Person").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "person:dhiraj");
    }

    #[test]
    fn empty_key_parts_are_rejected() {
        assert!(EntityId::derive("", "person").is_err());
        assert!(EntityId::derive("Dhiraj", "  ").is_err());
        assert!(SourceId::new("").is_err());
    }

    #[test]
    fn event_type_round_trips_through_str() {
        for raw in ["text", "decision", "preference", "pattern", "git_commit", "revert", "code_index"] {
            let parsed: EventType = raw.parse().unwrap();
            assert_eq!(parsed.to_string(), raw);
        }
        assert!("commit".parse::<EventType>().is_err());
    }

    #[test]
    fn touch_reactivates_and_never_rewinds() {
        let t0 = Utc::now();
        let mut entity = Entity::new("OpenClaw", "project", t0).unwrap();
        entity.archived = true;

        let t1 = t0 + chrono::Duration::hours(1);
        entity.touch(t1);
        assert!(!entity.archived);
        assert_eq!(entity.last_seen_at, t1);

        entity.touch(t0);
        assert_eq!(entity.last_seen_at, t1);
    }

    #[test]
    fn mention_edge_ids_are_deterministic() {
        let mention = Mention {
            entity_id: EntityId::derive("Jay", "person").unwrap(),
            source_id: SourceId::new("demo:1").unwrap(),
            weight: 1.0,
            asserted_at: Utc::now(),
            seq: 2,
        };
        assert_eq!(mention.edge_id(), "person:jay::mentioned_in::demo:1#2");
    }
}
