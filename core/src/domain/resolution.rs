// Copyright (c) 2026 Guidepost AI
// SPDX-License-Identifier: AGPL-3.0

// Conflict resolution for collaboration sessions.
//
// `resolve` is a pure function of the completed sub-results: given the same
// set of inputs it produces the same resolution regardless of sub-dispatch
// arrival order. Tie-break policy, in order:
//   1. narrower capability match (worker declaring fewer capabilities)
//   2. most recently revised guidance source
//   3. surface all options as unresolved — correctness over false confidence

use crate::domain::capability::Capability;
use crate::domain::worker::{GuidanceItem, WorkerId};
use serde::Serialize;
use std::collections::BTreeMap;

/// One completed sub-dispatch, as seen by conflict resolution.
#[derive(Debug, Clone, Serialize)]
pub struct SubResult {
    pub capability: Capability,
    pub worker_id: WorkerId,
    /// Total number of capabilities the contributing worker declares.
    /// Fewer means a narrower, more specific match.
    pub worker_capability_count: usize,
    pub payload: serde_json::Value,
    pub guidance: Vec<GuidanceItem>,
}

/// A guidance item that survived conflict resolution.
#[derive(Debug, Clone, Serialize)]
pub struct ResolvedItem {
    pub entity: String,
    pub field: String,
    pub recommendation: serde_json::Value,
    pub source_capability: Capability,
    pub source_worker: WorkerId,
}

/// One candidate recommendation inside an unresolved conflict.
#[derive(Debug, Clone, Serialize)]
pub struct ConflictOption {
    pub recommendation: serde_json::Value,
    pub source_capability: Capability,
    pub source_worker: WorkerId,
}

/// A conflict the tie-break rules could not settle; all options are
/// surfaced to the caller rather than silently picking one.
#[derive(Debug, Clone, Serialize)]
pub struct UnresolvedConflict {
    pub entity: String,
    pub field: String,
    pub options: Vec<ConflictOption>,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct Resolution {
    pub accepted: Vec<ResolvedItem>,
    pub unresolved: Vec<UnresolvedConflict>,
}

impl Resolution {
    pub fn has_unresolved(&self) -> bool {
        !self.unresolved.is_empty()
    }
}

struct Contribution<'a> {
    sub: &'a SubResult,
    item: &'a GuidanceItem,
}

/// Reconcile the guidance items of all completed sub-results.
pub fn resolve(results: &[SubResult]) -> Resolution {
    // Group contributions by (entity, field). BTreeMap keeps the output
    // ordering independent of input order.
    let mut groups: BTreeMap<(String, String), Vec<Contribution<'_>>> = BTreeMap::new();
    for sub in results {
        for item in &sub.guidance {
            groups
                .entry((item.entity.clone(), item.field.clone()))
                .or_default()
                .push(Contribution { sub, item });
        }
    }

    let mut resolution = Resolution::default();

    for ((entity, field), mut contributions) in groups {
        contributions.sort_by(|a, b| {
            a.sub
                .capability
                .as_str()
                .cmp(b.sub.capability.as_str())
                .then(a.sub.worker_id.0.cmp(&b.sub.worker_id.0))
        });

        let conflicting = contributions
            .iter()
            .any(|c| c.item.recommendation != contributions[0].item.recommendation);

        if !conflicting {
            let winner = &contributions[0];
            resolution.accepted.push(ResolvedItem {
                entity,
                field,
                recommendation: winner.item.recommendation.clone(),
                source_capability: winner.sub.capability.clone(),
                source_worker: winner.sub.worker_id,
            });
            continue;
        }

        // Rule 1: narrower capability match wins outright.
        let narrowest = contributions
            .iter()
            .map(|c| c.sub.worker_capability_count)
            .min()
            .unwrap_or(0);
        let narrow: Vec<&Contribution<'_>> = contributions
            .iter()
            .filter(|c| c.sub.worker_capability_count == narrowest)
            .collect();
        if let Some(winner) = sole_recommendation(&narrow) {
            resolution.accepted.push(ResolvedItem {
                entity,
                field,
                recommendation: winner.item.recommendation.clone(),
                source_capability: winner.sub.capability.clone(),
                source_worker: winner.sub.worker_id,
            });
            continue;
        }

        // Rule 2: most recently revised guidance source.
        let Some(freshest) = narrow.iter().map(|c| c.item.revised_at).max() else {
            continue;
        };
        let fresh: Vec<&Contribution<'_>> = narrow
            .iter()
            .filter(|c| c.item.revised_at == freshest)
            .copied()
            .collect();
        if let Some(winner) = sole_recommendation(&fresh) {
            resolution.accepted.push(ResolvedItem {
                entity,
                field,
                recommendation: winner.item.recommendation.clone(),
                source_capability: winner.sub.capability.clone(),
                source_worker: winner.sub.worker_id,
            });
            continue;
        }

        // Rule 3: still tied, surface every option.
        resolution.unresolved.push(UnresolvedConflict {
            entity,
            field,
            options: fresh
                .iter()
                .map(|c| ConflictOption {
                    recommendation: c.item.recommendation.clone(),
                    source_capability: c.sub.capability.clone(),
                    source_worker: c.sub.worker_id,
                })
                .collect(),
        });
    }

    resolution
}

/// The single surviving contribution if all remaining candidates agree,
/// otherwise `None`.
fn sole_recommendation<'a, 'b>(
    candidates: &'b [&'a Contribution<'a>],
) -> Option<&'b Contribution<'a>> {
    let first = candidates.first()?;
    if candidates
        .iter()
        .all(|c| c.item.recommendation == first.item.recommendation)
    {
        Some(first)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn item(entity: &str, field: &str, value: &str, revised: i64) -> GuidanceItem {
        GuidanceItem {
            entity: entity.to_string(),
            field: field.to_string(),
            recommendation: serde_json::json!(value),
            revised_at: Utc.timestamp_opt(revised, 0).unwrap(),
        }
    }

    fn sub(capability: &str, cap_count: usize, guidance: Vec<GuidanceItem>) -> SubResult {
        SubResult {
            capability: Capability::parse(capability).unwrap(),
            worker_id: WorkerId::new(),
            worker_capability_count: cap_count,
            payload: serde_json::json!({}),
            guidance,
        }
    }

    #[test]
    fn test_no_conflict_passes_through() {
        let results = vec![
            sub("security-guidance", 1, vec![item("orders", "auth", "mfa", 100)]),
            sub("entity-guidance", 2, vec![item("orders", "layout", "grid", 100)]),
        ];
        let resolution = resolve(&results);
        assert_eq!(resolution.accepted.len(), 2);
        assert!(resolution.unresolved.is_empty());
    }

    #[test]
    fn test_narrower_capability_wins() {
        let specialist = sub("security-guidance", 1, vec![item("orders", "auth", "mfa", 100)]);
        let generalist = sub("entity-guidance", 4, vec![item("orders", "auth", "basic", 200)]);
        let resolution = resolve(&[specialist.clone(), generalist]);

        assert_eq!(resolution.accepted.len(), 1);
        assert_eq!(resolution.accepted[0].recommendation, serde_json::json!("mfa"));
        assert_eq!(resolution.accepted[0].source_worker, specialist.worker_id);
    }

    #[test]
    fn test_fresher_revision_breaks_specificity_tie() {
        let older = sub("security-guidance", 2, vec![item("orders", "auth", "basic", 100)]);
        let newer = sub("entity-guidance", 2, vec![item("orders", "auth", "mfa", 500)]);
        let resolution = resolve(&[older, newer]);

        assert_eq!(resolution.accepted.len(), 1);
        assert_eq!(resolution.accepted[0].recommendation, serde_json::json!("mfa"));
    }

    #[test]
    fn test_full_tie_surfaces_both_options() {
        let a = sub("security-guidance", 2, vec![item("orders", "auth", "mfa", 100)]);
        let b = sub("entity-guidance", 2, vec![item("orders", "auth", "basic", 100)]);
        let resolution = resolve(&[a, b]);

        assert!(resolution.accepted.is_empty());
        assert_eq!(resolution.unresolved.len(), 1);
        assert_eq!(resolution.unresolved[0].options.len(), 2);
    }

    #[test]
    fn test_resolution_is_order_independent() {
        let a = sub("security-guidance", 1, vec![item("orders", "auth", "mfa", 100)]);
        let b = sub("entity-guidance", 3, vec![item("orders", "auth", "basic", 300)]);

        let forward = resolve(&[a.clone(), b.clone()]);
        let backward = resolve(&[b, a]);

        assert_eq!(
            serde_json::to_value(&forward).unwrap(),
            serde_json::to_value(&backward).unwrap()
        );
    }
}
