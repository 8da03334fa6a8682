use std::collections::{BinaryHeap, HashMap, HashSet};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::PropagationConfig;
use crate::error::{Result, RiskError};
use crate::events::{EventKind, EventLog, EventStatus, RiskEvent};
use crate::graph::SupplyGraph;
use crate::types::{Date, EventId, NodeId};

/// One propagated effect: the audit trail linking a node's risk back to the
/// originating event and the length of the best path that carried it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PropagationRecord {
    pub origin_event_id: EventId,
    pub affected_node_id: NodeId,
    pub hop_distance: u32,
    pub propagated_score: f64,
    pub computed_at: Date,
}

/// Batch outcome — skipped units are reported, never silently dropped.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchSummary {
    pub propagated: usize,
    pub resolutions: usize,
    pub skipped: usize,
    pub records_written: usize,
    pub truncated_branches: usize,
}

/// Search frontier entry, ordered by score so the first time a node is
/// settled it is settled via its best path (a deeper path through heavier
/// edge weights can beat a shallower one).
#[derive(Debug, Clone, Copy)]
struct Frontier {
    score: f64,
    hops: u32,
    node: NodeId,
}

impl PartialEq for Frontier {
    fn eq(&self, other: &Self) -> bool {
        self.score == other.score && self.node == other.node
    }
}
impl Eq for Frontier {}
impl Ord for Frontier {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.score.total_cmp(&other.score)
    }
}
impl PartialOrd for Frontier {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Pushes severity-scored events across the supply graph with geometric
/// decay, and owns the append-only propagation trail. The single writer of
/// node risk state.
pub struct RiskPropagator {
    config: PropagationConfig,
    /// Full append-only audit trail in write order.
    trail: Vec<PropagationRecord>,
    /// Latest record per (origin event, node) — the in-effect contribution.
    latest: HashMap<(EventId, NodeId), PropagationRecord>,
    /// Origin events with a contribution at each node, for score recompute.
    origins_by_node: HashMap<NodeId, HashSet<EventId>>,
    /// Running count of branches cut at the hop bound (non-fatal, logged).
    truncated_branches: usize,
}

impl RiskPropagator {
    pub fn new(config: PropagationConfig) -> Self {
        RiskPropagator {
            config,
            trail: Vec::new(),
            latest: HashMap::new(),
            origins_by_node: HashMap::new(),
            truncated_branches: 0,
        }
    }

    pub fn trail(&self) -> &[PropagationRecord] {
        &self.trail
    }

    /// Propagate one event. Returns the in-effect records for this event
    /// (origin included at hop 0). Re-propagating an identical event changes
    /// nothing: contributions are keyed by (origin, node) and kept at the
    /// maximum, never summed.
    pub fn propagate(
        &mut self,
        graph: &mut SupplyGraph,
        log: &EventLog,
        event: &RiskEvent,
    ) -> Result<Vec<PropagationRecord>> {
        if !(0.0..=10.0).contains(&event.severity) {
            return Err(RiskError::InvalidSeverity { severity: event.severity });
        }
        if !graph.contains(event.source_entity_id) {
            return Err(RiskError::UnknownEntity(event.source_entity_id));
        }

        let reached = self.best_paths(graph, event);

        let mut touched = Vec::with_capacity(reached.len());
        for (&node, &(score, hops)) in &reached {
            let record = PropagationRecord {
                origin_event_id: event.id,
                affected_node_id: node,
                hop_distance: hops,
                propagated_score: score,
                computed_at: event.observed_at,
            };
            let key = (event.id, node);
            let unchanged = self.latest.get(&key).map(|r| *r == record).unwrap_or(false);
            if !unchanged {
                self.trail.push(record.clone());
                self.latest.insert(key, record);
                self.origins_by_node.entry(node).or_default().insert(event.id);
            }
            touched.push(node);
        }

        for node in touched {
            self.refresh_node_score(graph, log, node, event.observed_at)?;
        }

        debug!(event = event.id.0, reached = reached.len(), "propagation complete");
        Ok(reached
            .keys()
            .map(|n| self.latest[&(event.id, *n)].clone())
            .collect())
    }

    /// Best-path search outward from the origin. Score at hop d along a path
    /// is `severity * base^d * Π edge_weights`; per node only the maximum
    /// survives. Branches stop below the decay floor or past the hop bound.
    fn best_paths(&mut self, graph: &SupplyGraph, event: &RiskEvent) -> HashMap<NodeId, (f64, u32)> {
        let cfg = &self.config;
        let base = event.decay.map(|d| d.base).unwrap_or(cfg.decay_base);
        let as_of = event.observed_at;
        let mut best: HashMap<NodeId, (f64, u32)> = HashMap::new();
        let mut heap = BinaryHeap::new();
        let mut truncated = 0usize;

        best.insert(event.source_entity_id, (event.severity, 0));
        heap.push(Frontier { score: event.severity, hops: 0, node: event.source_entity_id });

        while let Some(Frontier { score, hops, node }) = heap.pop() {
            // Stale entry — a better path already settled this node.
            if best.get(&node).map(|&(s, _)| s > score).unwrap_or(false) {
                continue;
            }
            if hops >= cfg.max_hops {
                if graph.outgoing(node, as_of).next().is_some() {
                    truncated += 1;
                }
                continue;
            }
            for edge in graph.outgoing(node, as_of) {
                let child_score = score * base * edge.weight;
                if child_score < cfg.decay_floor {
                    continue; // negligible signal; branch ends here
                }
                let improves = best
                    .get(&edge.to)
                    .map(|&(s, _)| child_score > s)
                    .unwrap_or(true);
                if improves {
                    best.insert(edge.to, (child_score, hops + 1));
                    heap.push(Frontier { score: child_score, hops: hops + 1, node: edge.to });
                }
            }
        }

        if truncated > 0 {
            warn!(
                event = event.id.0,
                truncated, max_hops = cfg.max_hops,
                "propagation truncated at hop bound"
            );
            self.truncated_branches += truncated;
        }
        best
    }

    /// Recompute one node's risk as the max contribution over origin events
    /// not resolved at `as_of`. Resolved origins drop out of the max; their
    /// trail records remain. A directly-injected origin absent from the log
    /// has no resolution record and therefore stays in.
    fn refresh_node_score(
        &self,
        graph: &mut SupplyGraph,
        log: &EventLog,
        node: NodeId,
        as_of: Date,
    ) -> Result<()> {
        let score = self
            .origins_by_node
            .get(&node)
            .map(|origins| {
                origins
                    .iter()
                    .filter(|&&origin| {
                        !matches!(
                            log.status_as_of(origin, as_of),
                            Some(EventStatus::Resolved { .. })
                        )
                    })
                    .filter_map(|&origin| self.latest.get(&(origin, node)))
                    .map(|r| r.propagated_score)
                    .fold(0.0_f64, f64::max)
            })
            .unwrap_or(0.0);
        graph.record_risk(node, as_of, score)
    }

    /// Apply a resolution event: every node carrying risk from the resolved
    /// entity's events gets its score recomputed without those contributions.
    pub fn apply_resolution(
        &mut self,
        graph: &mut SupplyGraph,
        log: &EventLog,
        resolution: &RiskEvent,
    ) -> Result<usize> {
        let resolved_origins: HashSet<EventId> = log
            .iter()
            .filter(|e| {
                e.source_entity_id == resolution.source_entity_id
                    && e.kind.is_resolvable()
                    && e.observed_at <= resolution.observed_at
            })
            .map(|e| e.id)
            .collect();

        let affected: Vec<NodeId> = self
            .origins_by_node
            .iter()
            .filter(|(_, origins)| !origins.is_disjoint(&resolved_origins))
            .map(|(&node, _)| node)
            .collect();

        for &node in &affected {
            self.refresh_node_score(graph, log, node, resolution.observed_at)?;
        }
        Ok(affected.len())
    }

    /// Process a batch in observation order. Per-event failures are isolated:
    /// a bad event is skipped and counted, the rest of the batch proceeds.
    pub fn propagate_batch(
        &mut self,
        graph: &mut SupplyGraph,
        log: &EventLog,
        events: &[RiskEvent],
    ) -> BatchSummary {
        let mut summary = BatchSummary::default();
        let trail_before = self.trail.len();
        let truncated_before = self.truncated_branches;

        for event in events {
            let outcome = if event.kind == EventKind::Resolved {
                self.apply_resolution(graph, log, event).map(|_| ())
            } else {
                self.propagate(graph, log, event).map(|_| ())
            };
            match outcome {
                Ok(()) => {
                    if event.kind == EventKind::Resolved {
                        summary.resolutions += 1;
                    } else {
                        summary.propagated += 1;
                    }
                }
                Err(err) => {
                    warn!(event = event.id.0, %err, "event skipped");
                    summary.skipped += 1;
                }
            }
        }

        summary.records_written = self.trail.len() - trail_before;
        summary.truncated_branches = self.truncated_branches - truncated_before;
        info!(
            propagated = summary.propagated,
            resolutions = summary.resolutions,
            skipped = summary.skipped,
            records = summary.records_written,
            "propagation batch complete"
        );
        summary
    }
}
