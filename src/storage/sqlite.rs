//! Embedded-file graph backend on SQLite

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::model::{
    EdgeRecord, Entity, EntityId, EventType, GraphExport, MentionStats, NodeKind, NodeRecord,
    Source, SourceId,
};

use super::GraphStore;

/// SQLite graph store
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (or create) the database at the configured path.
    pub fn new(config: &Config) -> Result<Self> {
        let conn = Connection::open(config.sqlite_path())?;
        conn.execute_batch(include_str!("schema.sql"))?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-file database at an explicit path (test fixtures).
    pub fn open_path(path: &std::path::Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch(include_str!("schema.sql"))?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|e| Error::storage(e.to_string()))
    }
}

fn parse_ts(raw: &str) -> Result<DateTime<Utc>> {
    chrono::DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::storage(format!("bad timestamp {raw}: {e}")))
}

fn entity_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<EntityRow> {
    Ok(EntityRow {
        id: row.get(0)?,
        name: row.get(1)?,
        entity_type: row.get(2)?,
        created_at: row.get(3)?,
        last_seen_at: row.get(4)?,
        importance: row.get(5)?,
        decay_score: row.get(6)?,
        archived: row.get(7)?,
    })
}

const ENTITY_COLS: &str = "id, name, entity_type, created_at, last_seen_at, importance, decay_score, archived";

/// Intermediate struct for reading from SQLite
struct EntityRow {
    id: String,
    name: String,
    entity_type: String,
    created_at: String,
    last_seen_at: String,
    importance: f64,
    decay_score: f64,
    archived: bool,
}

impl EntityRow {
    fn into_entity(self) -> Result<Entity> {
        Ok(Entity {
            id: EntityId::from_raw(self.id)?,
            name: self.name,
            entity_type: self.entity_type,
            created_at: parse_ts(&self.created_at)?,
            last_seen_at: parse_ts(&self.last_seen_at)?,
            importance: self.importance,
            decay_score: self.decay_score,
            archived: self.archived,
        })
    }
}

struct SourceRow {
    id: String,
    payload: String,
    event_type: String,
    received_at: String,
}

impl SourceRow {
    fn into_source(self) -> Result<Source> {
        Ok(Source {
            id: SourceId::new(self.id)?,
            payload: self.payload,
            event_type: self.event_type.parse()?,
            received_at: parse_ts(&self.received_at)?,
        })
    }
}

#[async_trait]
impl GraphStore for SqliteStore {
    async fn upsert_entity(
        &self,
        name: &str,
        entity_type: &str,
        now: DateTime<Utc>,
    ) -> Result<EntityId> {
        let id = EntityId::derive(name, entity_type)?;
        let conn = self.lock()?;

        let updated = conn.execute(
            r#"
            UPDATE entities
            SET last_seen_at = MAX(last_seen_at, ?1), archived = 0
            WHERE id = ?2
            "#,
            params![now.to_rfc3339(), id.as_str()],
        )?;

        if updated == 0 {
            conn.execute(
                r#"
                INSERT INTO entities (id, name, entity_type, created_at, last_seen_at)
                VALUES (?1, ?2, ?3, ?4, ?4)
                "#,
                params![
                    id.as_str(),
                    name.trim(),
                    entity_type.trim(),
                    now.to_rfc3339(),
                ],
            )?;
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
        let conn = self.lock()?;

        let entity_exists: bool = conn.query_row(
            "SELECT 1 FROM entities WHERE id = ?1",
            params![entity_id.as_str()],
            |_| Ok(true),
        )
        .optional()?
        .unwrap_or(false);
        if !entity_exists {
            return Err(Error::not_found(format!("entity {entity_id}")));
        }

        let source_exists: bool = conn.query_row(
            "SELECT 1 FROM sources WHERE id = ?1",
            params![source_id.as_str()],
            |_| Ok(true),
        )
        .optional()?
        .unwrap_or(false);
        if !source_exists {
            return Err(Error::not_found(format!("source {source_id}")));
        }

        let seq: u32 = conn.query_row(
            "SELECT COUNT(*) FROM mentions WHERE entity_id = ?1 AND source_id = ?2",
            params![entity_id.as_str(), source_id.as_str()],
            |row| row.get(0),
        )?;

        conn.execute(
            r#"
            INSERT INTO mentions (id, entity_id, source_id, weight, asserted_at, seq)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                format!("{}::mentioned_in::{}#{}", entity_id, source_id, seq),
                entity_id.as_str(),
                source_id.as_str(),
                weight,
                now.to_rfc3339(),
                seq,
            ],
        )?;

        conn.execute(
            "UPDATE entities SET last_seen_at = MAX(last_seen_at, ?1) WHERE id = ?2",
            params![now.to_rfc3339(), entity_id.as_str()],
        )?;

        Ok(())
    }

    async fn create_source(
        &self,
        id: &SourceId,
        payload: &str,
        event_type: EventType,
        now: DateTime<Utc>,
    ) -> Result<SourceId> {
        let conn = self.lock()?;

        let inserted = conn.execute(
            r#"
            INSERT OR IGNORE INTO sources (id, payload, event_type, received_at)
            VALUES (?1, ?2, ?3, ?4)
            "#,
            params![id.as_str(), payload, event_type.to_string(), now.to_rfc3339()],
        )?;
        if inserted == 0 {
            return Err(Error::conflict(format!("source {id} already exists")));
        }

        Ok(id.clone())
    }

    async fn get_entity(&self, id: &EntityId) -> Result<Option<Entity>> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                &format!("SELECT {ENTITY_COLS} FROM entities WHERE id = ?1"),
                params![id.as_str()],
                entity_from_row,
            )
            .optional()?;
        row.map(|r| r.into_entity()).transpose()
    }

    async fn get_source(&self, id: &SourceId) -> Result<Option<Source>> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                "SELECT id, payload, event_type, received_at FROM sources WHERE id = ?1",
                params![id.as_str()],
                |row| {
                    Ok(SourceRow {
                        id: row.get(0)?,
                        payload: row.get(1)?,
                        event_type: row.get(2)?,
                        received_at: row.get(3)?,
                    })
                },
            )
            .optional()?;
        row.map(|r| r.into_source()).transpose()
    }

    async fn list_entities(&self, include_archived: bool) -> Result<Vec<Entity>> {
        let conn = self.lock()?;
        let sql = if include_archived {
            format!("SELECT {ENTITY_COLS} FROM entities")
        } else {
            format!("SELECT {ENTITY_COLS} FROM entities WHERE archived = 0")
        };

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([], entity_from_row)?;

        let mut entities = Vec::new();
        for row in rows {
            entities.push(row?.into_entity()?);
        }
        Ok(entities)
    }

    async fn sources_for(&self, entity_id: &EntityId, limit: usize) -> Result<Vec<Source>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT s.id, s.payload, s.event_type, s.received_at
            FROM mentions m
            JOIN sources s ON s.id = m.source_id
            WHERE m.entity_id = ?1
            GROUP BY s.id
            ORDER BY MAX(m.asserted_at) DESC, s.id ASC
            LIMIT ?2
            "#,
        )?;

        let rows = stmt.query_map(params![entity_id.as_str(), limit as i64], |row| {
            Ok(SourceRow {
                id: row.get(0)?,
                payload: row.get(1)?,
                event_type: row.get(2)?,
                received_at: row.get(3)?,
            })
        })?;

        let mut sources = Vec::new();
        for row in rows {
            sources.push(row?.into_source()?);
        }
        Ok(sources)
    }

    async fn mention_stats(&self, entity_id: &EntityId) -> Result<MentionStats> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT m.weight, s.event_type, m.asserted_at
            FROM mentions m
            JOIN sources s ON s.id = m.source_id
            WHERE m.entity_id = ?1
            "#,
        )?;

        let rows = stmt.query_map(params![entity_id.as_str()], |row| {
            Ok((
                row.get::<_, f64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;

        let mut stats = MentionStats::default();
        for row in rows {
            let (weight, event_type, asserted_at) = row?;
            let event_type: EventType = event_type.parse()?;
            let asserted_at = parse_ts(&asserted_at)?;
            stats.count += 1;
            stats.total_weight += weight;
            stats.event_weight_sum += weight * event_type.weight();
            stats.last_asserted_at = match stats.last_asserted_at {
                Some(t) if t >= asserted_at => Some(t),
                _ => Some(asserted_at),
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
        let conn = self.lock()?;
        let updated = conn.execute(
            "UPDATE entities SET decay_score = ?1, importance = ?2 WHERE id = ?3",
            params![decay, importance, entity_id.as_str()],
        )?;
        if updated == 0 {
            return Err(Error::not_found(format!("entity {entity_id}")));
        }
        Ok(())
    }

    async fn set_archived(&self, entity_id: &EntityId, archived: bool) -> Result<()> {
        let conn = self.lock()?;
        let updated = conn.execute(
            "UPDATE entities SET archived = ?1 WHERE id = ?2",
            params![archived, entity_id.as_str()],
        )?;
        if updated == 0 {
            return Err(Error::not_found(format!("entity {entity_id}")));
        }
        Ok(())
    }

    async fn export_graph(&self) -> Result<GraphExport> {
        let conn = self.lock()?;

        let mut nodes = Vec::new();
        {
            let mut stmt = conn.prepare(&format!("SELECT {ENTITY_COLS} FROM entities"))?;
            let rows = stmt.query_map([], entity_from_row)?;
            for row in rows {
                let entity = row?.into_entity()?;
                nodes.push(NodeRecord {
                    id: entity.id.to_string(),
                    label: entity.name.clone(),
                    kind: NodeKind::Entity,
                    props: serde_json::to_value(&entity)?,
                });
            }
        }
        {
            let mut stmt =
                conn.prepare("SELECT id, payload, event_type, received_at FROM sources")?;
            let rows = stmt.query_map([], |row| {
                Ok(SourceRow {
                    id: row.get(0)?,
                    payload: row.get(1)?,
                    event_type: row.get(2)?,
                    received_at: row.get(3)?,
                })
            })?;
            for row in rows {
                let source = row?.into_source()?;
                nodes.push(NodeRecord {
                    id: source.id.to_string(),
                    label: source.id.to_string(),
                    kind: NodeKind::Source,
                    props: serde_json::to_value(&source)?,
                });
            }
        }

        let mut edges = Vec::new();
        {
            let mut stmt = conn.prepare(
                "SELECT id, entity_id, source_id, weight, asserted_at FROM mentions",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, f64>(3)?,
                    row.get::<_, String>(4)?,
                ))
            })?;
            for row in rows {
                let (id, from, to, weight, asserted_at) = row?;
                edges.push(EdgeRecord {
                    id,
                    from,
                    to,
                    label: "mentioned_in".to_string(),
                    weight,
                    asserted_at: parse_ts(&asserted_at)?,
                });
            }
        }

        Ok(GraphExport { nodes, edges }.normalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_store() -> (tempfile::TempDir, SqliteStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::open_path(&dir.path().join("graph.db")).unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn duplicate_source_conflicts_and_keeps_first_payload() {
        let (_dir, store) = temp_store();
        let now = Utc::now();
        let id = SourceId::new("demo:1").unwrap();

        store
            .create_source(&id, "first", EventType::Text, now)
            .await
            .unwrap();
        let err = store
            .create_source(&id, "second", EventType::Text, now)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));

        let source = store.get_source(&id).await.unwrap().unwrap();
        assert_eq!(source.payload, "first");
    }

    #[tokio::test]
    async fn upsert_twice_yields_one_entity() {
        let (_dir, store) = temp_store();
        let t0 = Utc::now();
        let t1 = t0 + chrono::Duration::minutes(5);

        let a = store.upsert_entity("Jay", "person", t0).await.unwrap();
        let b = store.upsert_entity("jay", "Person", t1).await.unwrap();
        assert_eq!(a, b);

        let entities = store.list_entities(true).await.unwrap();
        assert_eq!(entities.len(), 1);
        assert_eq!(entities[0].last_seen_at, t1);
        assert_eq!(entities[0].created_at, t0);
    }
}
