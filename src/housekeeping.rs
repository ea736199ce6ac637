//! Decay, importance, and archival maintenance
//!
//! The pass is per-entity: one store call at a time, no lock held across
//! entities, so readers and writers are never starved while it runs. At a
//! fixed reference time the pass is idempotent, which also makes it safe to
//! cancel and resume; per-entity failures are logged and skipped.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::model::{Entity, EntityId, MentionStats};
use crate::storage::GraphStore;

/// Summary of one housekeeping pass, for observability.
///
/// Lists record state *transitions*: a second pass with no intervening
/// mutations archives nothing new and reports empty lists while leaving
/// scores and the archive set unchanged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HousekeepingReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,

    /// Entities examined
    pub scanned: usize,

    /// Entities newly archived by this pass
    pub archived: Vec<EntityId>,

    /// Entities whose decay score decreased this pass
    pub decayed: Vec<EntityId>,

    /// Archived entities brought back by fresh evidence
    pub reactivated: Vec<EntityId>,

    /// Entities skipped because a store call failed
    pub skipped: usize,
}

/// Runs the decay/importance/archive cycle over the graph
pub struct Housekeeper {
    store: Arc<dyn GraphStore>,
    config: Config,
}

impl Housekeeper {
    pub fn new(store: Arc<dyn GraphStore>, config: &Config) -> Self {
        Self {
            store,
            config: config.clone(),
        }
    }

    /// Decay is mention frequency discounted by time since last evidence.
    /// Monotone non-increasing absent new mentions; a new mention raises it
    /// through both the count and the refreshed `last_seen_at`.
    fn decay_score(&self, entity: &Entity, stats: &MentionStats, now: DateTime<Utc>) -> f64 {
        let age = (now - entity.last_seen_at).num_seconds().max(0) as f64;
        let half_life = self.config.decay_half_life_secs as f64;
        let freq = (1.0 + stats.count as f64).ln();
        freq * (-age / half_life).exp()
    }

    /// Importance combines mention volume, the event kinds that asserted the
    /// entity, and the entity's own type weight, discounted by recency. The
    /// floor factor keeps durable knowledge (decisions, preferences) above
    /// the archive line far longer than transient text mentions.
    fn importance(&self, entity: &Entity, stats: &MentionStats, now: DateTime<Utc>) -> f64 {
        let age = (now - entity.last_seen_at).num_seconds().max(0) as f64;
        let half_life = self.config.decay_half_life_secs as f64;
        let recency = (-age / half_life).exp();
        let freq = (1.0 + stats.count as f64).ln();
        let base = self.config.entity_type_weight(&entity.entity_type) * freq
            + stats.event_weight_sum;
        base * (0.3 + 0.7 * recency)
    }

    fn should_archive(&self, decay: f64, importance: f64) -> bool {
        decay < self.config.archive_decay_threshold
            && importance < self.config.archive_importance_floor
    }

    /// Run a full pass at the current wall clock.
    pub async fn run(&self, cancel: &CancellationToken) -> Result<HousekeepingReport> {
        self.run_at(Utc::now(), cancel).await
    }

    /// Run a full pass at an explicit reference time.
    ///
    /// Cancellation between entities surfaces `Cancelled`; updates already
    /// applied are retained and the next run picks up where this one left
    /// off.
    pub async fn run_at(
        &self,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<HousekeepingReport> {
        let entities = self.store.list_entities(true).await?;

        let mut report = HousekeepingReport {
            run_id: Uuid::new_v4(),
            started_at: now,
            scanned: entities.len(),
            archived: Vec::new(),
            decayed: Vec::new(),
            reactivated: Vec::new(),
            skipped: 0,
        };

        for entity in entities {
            if cancel.is_cancelled() {
                tracing::info!(
                    run_id = %report.run_id,
                    archived = report.archived.len(),
                    "housekeeping cancelled; partial progress retained"
                );
                return Err(Error::Cancelled);
            }

            if let Err(err) = self.process_entity(&entity, now, &mut report).await {
                tracing::warn!(entity = %entity.id, error = %err, "housekeeping skipped entity");
                report.skipped += 1;
            }
        }

        tracing::info!(
            run_id = %report.run_id,
            scanned = report.scanned,
            archived = report.archived.len(),
            reactivated = report.reactivated.len(),
            skipped = report.skipped,
            "housekeeping pass complete"
        );
        Ok(report)
    }

    async fn process_entity(
        &self,
        entity: &Entity,
        now: DateTime<Utc>,
        report: &mut HousekeepingReport,
    ) -> Result<()> {
        let stats = self.store.mention_stats(&entity.id).await?;

        let decay = self.decay_score(entity, &stats, now);
        let importance = self.importance(entity, &stats, now);
        self.store.update_scores(&entity.id, decay, importance).await?;

        if decay < entity.decay_score {
            report.decayed.push(entity.id.clone());
        }

        let archive = self.should_archive(decay, importance);
        if archive && !entity.archived {
            self.store.set_archived(&entity.id, true).await?;
            report.archived.push(entity.id.clone());
        } else if !archive && entity.archived {
            // Fresh evidence arrived while archived (e.g. a mention recorded
            // without an upsert); bring the entity back.
            self.store.set_archived(&entity.id, false).await?;
            report.reactivated.push(entity.id.clone());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{EventType, SourceId};
    use crate::storage::InMemoryStore;
    use chrono::Duration;

    fn fixture() -> (Arc<dyn GraphStore>, Housekeeper, DateTime<Utc>) {
        let store: Arc<dyn GraphStore> = Arc::new(InMemoryStore::new());
        let housekeeper = Housekeeper::new(store.clone(), &Config::default());
        (store, housekeeper, Utc::now())
    }

    async fn seed_mentioned_entity(
        store: &Arc<dyn GraphStore>,
        name: &str,
        at: DateTime<Utc>,
    ) -> EntityId {
        let source = SourceId::new(format!("seed:{name}")).unwrap();
        store
            .create_source(&source, "seed", EventType::Text, at)
            .await
            .unwrap();
        let id = store.upsert_entity(name, "person", at).await.unwrap();
        store.add_mention(&id, &source, 1.0, at).await.unwrap();
        id
    }

    #[tokio::test]
    async fn stale_unmentioned_entity_is_archived_and_revivable() {
        let (store, housekeeper, t0) = fixture();
        let id = store.upsert_entity("Ghost", "person", t0).await.unwrap();

        let later = t0 + Duration::days(30);
        let report = housekeeper
            .run_at(later, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.archived, vec![id.clone()]);

        let entity = store.get_entity(&id).await.unwrap().unwrap();
        assert!(entity.archived);

        // Fresh evidence through the write path reactivates immediately.
        store.upsert_entity("Ghost", "person", later).await.unwrap();
        let entity = store.get_entity(&id).await.unwrap().unwrap();
        assert!(!entity.archived);
    }

    #[tokio::test]
    async fn pass_is_idempotent_at_a_fixed_time() {
        let (store, housekeeper, t0) = fixture();
        seed_mentioned_entity(&store, "Dhiraj", t0).await;
        seed_mentioned_entity(&store, "Jay", t0).await;

        let at = t0 + Duration::days(3);
        let first = housekeeper.run_at(at, &CancellationToken::new()).await.unwrap();
        let mut snapshot_one = store.list_entities(true).await.unwrap();
        snapshot_one.sort_by(|a, b| a.id.cmp(&b.id));

        let second = housekeeper.run_at(at, &CancellationToken::new()).await.unwrap();
        let mut snapshot_two = store.list_entities(true).await.unwrap();
        snapshot_two.sort_by(|a, b| a.id.cmp(&b.id));

        assert_eq!(first.scanned, second.scanned);
        assert!(second.archived.is_empty());
        for (a, b) in snapshot_one.iter().zip(snapshot_two.iter()) {
            assert_eq!(a.decay_score, b.decay_score);
            assert_eq!(a.importance, b.importance);
            assert_eq!(a.archived, b.archived);
        }
    }

    #[tokio::test]
    async fn decay_is_monotone_without_new_mentions() {
        let (store, housekeeper, t0) = fixture();
        let id = seed_mentioned_entity(&store, "Dhiraj", t0).await;

        housekeeper
            .run_at(t0 + Duration::days(1), &CancellationToken::new())
            .await
            .unwrap();
        let after_one = store.get_entity(&id).await.unwrap().unwrap().decay_score;

        housekeeper
            .run_at(t0 + Duration::days(2), &CancellationToken::new())
            .await
            .unwrap();
        let after_two = store.get_entity(&id).await.unwrap().unwrap().decay_score;

        assert!(after_two <= after_one);
        assert!(after_one > 0.0);
    }

    #[tokio::test]
    async fn archived_entity_with_fresh_mention_is_reactivated_by_pass() {
        let (store, housekeeper, t0) = fixture();
        let id = seed_mentioned_entity(&store, "Dhiraj", t0).await;

        let stale = t0 + Duration::days(60);
        housekeeper
            .run_at(stale, &CancellationToken::new())
            .await
            .unwrap();
        assert!(store.get_entity(&id).await.unwrap().unwrap().archived);

        // Mention recorded without an upsert: archived flag stays until the
        // next pass sees the fresh evidence.
        let source = SourceId::new("revive:1").unwrap();
        store
            .create_source(&source, "back", EventType::Decision, stale)
            .await
            .unwrap();
        store.add_mention(&id, &source, 1.0, stale).await.unwrap();

        let report = housekeeper
            .run_at(stale, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.reactivated, vec![id.clone()]);
        assert!(!store.get_entity(&id).await.unwrap().unwrap().archived);
    }

    #[tokio::test]
    async fn durable_types_outlive_transient_ones() {
        let (store, housekeeper, t0) = fixture();

        let source = SourceId::new("mix:1").unwrap();
        store
            .create_source(&source, "mixed", EventType::Decision, t0)
            .await
            .unwrap();

        let decision = store.upsert_entity("UseSqlite", "decision", t0).await.unwrap();
        store.add_mention(&decision, &source, 1.0, t0).await.unwrap();
        let task = store.upsert_entity("WipeLogs", "task", t0).await.unwrap();
        store.add_mention(&task, &source, 0.2, t0).await.unwrap();

        let later = t0 + Duration::days(21);
        housekeeper
            .run_at(later, &CancellationToken::new())
            .await
            .unwrap();

        let decision = store.get_entity(&decision).await.unwrap().unwrap();
        let task = store.get_entity(&task).await.unwrap().unwrap();
        assert!(decision.importance > task.importance);
    }

    #[tokio::test]
    async fn cancellation_surfaces_and_keeps_progress() {
        let (store, housekeeper, t0) = fixture();
        seed_mentioned_entity(&store, "Dhiraj", t0).await;

        let token = CancellationToken::new();
        token.cancel();
        let err = housekeeper.run_at(t0, &token).await.unwrap_err();
        assert!(matches!(err, Error::Cancelled));
    }
}
