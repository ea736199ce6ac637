//! Negative-signal advisories
//!
//! Revert sources record why something was undone. Before acting on a plan,
//! callers can ask whether it matches any recorded revert reason and surface
//! the warning instead of repeating the mistake.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::model::{EventType, NodeKind, Source};
use crate::storage::GraphStore;

/// One advisory raised against a plan
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyWarning {
    pub kind: String,
    pub message: String,

    /// Source ids backing the warning
    pub evidence: Vec<String>,
}

/// Case-insensitive containment check against a set of needles.
pub fn simple_match(query: &str, needles: &[&str]) -> bool {
    let q = query.to_lowercase();
    needles
        .iter()
        .filter(|n| !n.trim().is_empty())
        .any(|n| q.contains(&n.to_lowercase()))
}

/// Scan recorded revert sources and warn when the plan text matches a
/// recorded reason.
pub async fn warnings_for_plan(
    store: &Arc<dyn GraphStore>,
    plan: &str,
) -> Result<Vec<PolicyWarning>> {
    let export = store.export_graph().await?;

    let mut warnings = Vec::new();
    for node in export.nodes.iter().filter(|n| n.kind == NodeKind::Source) {
        let source: Source = match serde_json::from_value(node.props.clone()) {
            Ok(source) => source,
            Err(err) => {
                tracing::debug!(node = %node.id, error = %err, "skipping unparseable source node");
                continue;
            }
        };
        if source.event_type != EventType::Revert {
            continue;
        }
        let reason = source.payload.trim();
        if reason.is_empty() {
            continue;
        }
        if simple_match(plan, &[reason]) {
            warnings.push(PolicyWarning {
                kind: "negative_learning:revert".to_string(),
                message: format!("This plan matches a past negative-learning signal: {reason}"),
                evidence: vec![source.id.to_string()],
            });
        }
    }

    Ok(warnings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SourceId;
    use crate::storage::InMemoryStore;
    use chrono::Utc;

    #[test]
    fn matching_is_case_insensitive_and_skips_blanks() {
        assert!(simple_match("Force-push to MAIN", &["force-push to main"]));
        assert!(!simple_match("deploy to staging", &["force-push to main"]));
        assert!(!simple_match("anything", &["", "  "]));
    }

    #[tokio::test]
    async fn revert_reasons_raise_warnings() {
        let store: Arc<dyn GraphStore> = Arc::new(InMemoryStore::new());
        let now = Utc::now();

        let revert = SourceId::new("revert:42").unwrap();
        store
            .create_source(&revert, "bumping the schema without a backup", EventType::Revert, now)
            .await
            .unwrap();
        let unrelated = SourceId::new("demo:1").unwrap();
        store
            .create_source(&unrelated, "bumping the schema without a backup", EventType::Text, now)
            .await
            .unwrap();

        let warnings =
            warnings_for_plan(&store, "Plan: bumping the schema without a backup, then migrate")
                .await
                .unwrap();
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].evidence, vec!["revert:42".to_string()]);

        let clean = warnings_for_plan(&store, "Plan: take a backup first").await.unwrap();
        assert!(clean.is_empty());
    }
}
