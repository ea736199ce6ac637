//! Context pack assembly
//!
//! Builds the bounded, deterministically ranked snapshot of the graph that
//! the worker receives as its sole factual grounding.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::storage::{ContextEntry, ContextQuery, GraphStore};

/// A ranked, size-bounded snapshot of the graph with provenance attached.
///
/// Archived entities never appear; every entry carries at least one source
/// reference.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextPack {
    pub entries: Vec<ContextEntry>,

    /// When the pack was assembled
    pub generated_at: DateTime<Utc>,

    /// Set when a partial backend failure dropped entries; a stale or
    /// partial context is more useful to the worker than none
    pub incomplete: bool,
}

impl ContextPack {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Format the pack for injection into a prompt, one entity per line:
    /// `- Dhiraj (person) [src: demo:1, demo:2]`
    pub fn format_for_prompt(&self) -> String {
        let mut lines = Vec::with_capacity(self.entries.len());
        for entry in &self.entries {
            let srcs = entry
                .sources
                .iter()
                .map(|s| s.id.to_string())
                .collect::<Vec<_>>()
                .join(", ");
            let mut line = format!("- {} ({})", entry.entity.name, entry.entity.entity_type);
            if !srcs.is_empty() {
                line.push_str(&format!(" [src: {srcs}]"));
            }
            lines.push(line);
        }
        lines.join("\n")
    }
}

/// Assembles context packs from the store
pub struct ContextPackBuilder {
    store: Arc<dyn GraphStore>,
    default_limit: usize,
    provenance_limit: usize,
}

impl ContextPackBuilder {
    pub fn new(store: Arc<dyn GraphStore>, config: &Config) -> Self {
        Self {
            store,
            default_limit: config.default_context_limit,
            provenance_limit: config.provenance_limit,
        }
    }

    /// Build the query for a context request, filling defaults from config.
    pub fn query(
        &self,
        limit: Option<usize>,
        since: Option<DateTime<Utc>>,
        min_importance: Option<f64>,
    ) -> ContextQuery {
        ContextQuery {
            limit: limit.unwrap_or(self.default_limit),
            since,
            min_importance,
            provenance: self.provenance_limit,
        }
    }

    pub async fn build(&self, query: ContextQuery) -> Result<ContextPack> {
        self.build_with_cancel(query, &CancellationToken::new())
            .await
    }

    /// Build a pack, aborting with `Cancelled` if the caller's token fires
    /// before the store query completes.
    pub async fn build_with_cancel(
        &self,
        query: ContextQuery,
        cancel: &CancellationToken,
    ) -> Result<ContextPack> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let slice = tokio::select! {
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            slice = self.store.query_context(&query) => slice?,
        };

        if slice.incomplete {
            tracing::warn!(entries = slice.entries.len(), "context pack degraded to incomplete");
        }

        Ok(ContextPack {
            entries: slice.entries,
            generated_at: Utc::now(),
            incomplete: slice.incomplete,
        })
    }
}
