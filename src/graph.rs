use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{Result, RiskError};
use crate::types::{Date, NodeId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeType {
    Corporation,
    Facility,
    Ingredient,
    Product,
}

/// Directed relation along which risk flows. OWNS points parent → subsidiary,
/// so corporate risk reaches subsidiaries but not the other way around.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Relation {
    Owns,
    Operates,
    Makes,
    Contains,
}

#[derive(Debug, Clone, Serialize)]
pub struct GraphNode {
    pub id: NodeId,
    pub node_type: NodeType,
    pub name: String,
    /// 0–10; written solely by the propagation engine.
    pub current_risk_score: f64,
    pub risk_score_updated_at: Option<Date>,
    /// Bumped on every risk write — the optimistic-concurrency stamp a
    /// concurrent wrapper compares-and-sets against.
    pub version: u64,
}

/// A directed edge with a validity interval `[valid_from, valid_to)`.
/// Topology changes never overwrite: an ownership transfer closes the old
/// edge and opens a new one, so any historical view is reconstructible.
#[derive(Debug, Clone, Serialize)]
pub struct GraphEdge {
    pub from: NodeId,
    pub to: NodeId,
    pub relation: Relation,
    /// Propagation strength modifier (partial ownership, minor-ingredient
    /// share). 0–1, default 1.0.
    pub weight: f64,
    pub valid_from: Date,
    pub valid_to: Option<Date>,
}

impl GraphEdge {
    pub fn active_at(&self, date: Date) -> bool {
        self.valid_from <= date && self.valid_to.map(|end| date < end).unwrap_or(true)
    }
}

/// The supply-chain topology plus per-node risk state. A directed, possibly
/// cyclic multigraph — cross-holdings can make a corporation indirectly own
/// itself, so traversals must never rely on acyclicity.
#[derive(Debug, Default)]
pub struct SupplyGraph {
    nodes: HashMap<NodeId, GraphNode>,
    /// All edges ever recorded, keyed by source for traversal.
    out_edges: HashMap<NodeId, Vec<GraphEdge>>,
    in_edges: HashMap<NodeId, Vec<GraphEdge>>,
    /// Appended (date, score) per node — historical risk state is a lookup
    /// here, never a reconstruction from mutable fields.
    risk_history: HashMap<NodeId, Vec<(Date, f64)>>,
}

impl SupplyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, id: NodeId, node_type: NodeType, name: impl Into<String>) {
        self.nodes.insert(
            id,
            GraphNode {
                id,
                node_type,
                name: name.into(),
                current_risk_score: 0.0,
                risk_score_updated_at: None,
                version: 0,
            },
        );
    }

    /// Open a new edge valid from `valid_from` onward.
    pub fn add_edge(
        &mut self,
        from: NodeId,
        to: NodeId,
        relation: Relation,
        weight: f64,
        valid_from: Date,
    ) -> Result<()> {
        if !self.nodes.contains_key(&from) {
            return Err(RiskError::UnknownEntity(from));
        }
        if !self.nodes.contains_key(&to) {
            return Err(RiskError::UnknownEntity(to));
        }
        let edge = GraphEdge { from, to, relation, weight: weight.clamp(0.0, 1.0), valid_from, valid_to: None };
        self.out_edges.entry(from).or_default().push(edge.clone());
        self.in_edges.entry(to).or_default().push(edge);
        Ok(())
    }

    /// Close every currently open (from, to, relation) edge at `valid_to`.
    /// The closed record stays in place for historical views.
    pub fn end_edge(&mut self, from: NodeId, to: NodeId, relation: Relation, valid_to: Date) {
        let close = |edges: Option<&mut Vec<GraphEdge>>| {
            if let Some(edges) = edges {
                for e in edges.iter_mut() {
                    if e.to == to && e.from == from && e.relation == relation && e.valid_to.is_none() {
                        e.valid_to = Some(valid_to);
                    }
                }
            }
        };
        close(self.out_edges.get_mut(&from));
        close(self.in_edges.get_mut(&to));
    }

    pub fn node(&self, id: NodeId) -> Option<&GraphNode> {
        self.nodes.get(&id)
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes.keys().copied()
    }

    /// Outgoing edges active at `as_of`.
    pub fn outgoing(&self, from: NodeId, as_of: Date) -> impl Iterator<Item = &GraphEdge> {
        self.out_edges
            .get(&from)
            .into_iter()
            .flatten()
            .filter(move |e| e.active_at(as_of))
    }

    /// Incoming edges active at `as_of` (supplier-side structural metrics).
    pub fn incoming(&self, to: NodeId, as_of: Date) -> impl Iterator<Item = &GraphEdge> {
        self.in_edges
            .get(&to)
            .into_iter()
            .flatten()
            .filter(move |e| e.active_at(as_of))
    }

    /// Write a node's risk score. Appends to the history, updates the
    /// current fields, and bumps the version stamp. Only the propagation
    /// engine calls this.
    pub fn record_risk(&mut self, id: NodeId, date: Date, score: f64) -> Result<()> {
        let node = self.nodes.get_mut(&id).ok_or(RiskError::UnknownEntity(id))?;
        node.current_risk_score = score.clamp(0.0, 10.0);
        node.risk_score_updated_at = Some(date);
        node.version += 1;
        self.risk_history.entry(id).or_default().push((date, node.current_risk_score));
        Ok(())
    }

    /// Latest recorded risk score at or before `as_of`; None when the node
    /// had no recorded risk yet (distinct from a recorded zero).
    pub fn risk_as_of(&self, id: NodeId, as_of: Date) -> Option<f64> {
        self.risk_history
            .get(&id)?
            .iter()
            .rev()
            .find(|(d, _)| *d <= as_of)
            .map(|(_, s)| *s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_node_graph() -> SupplyGraph {
        let mut g = SupplyGraph::new();
        g.add_node(NodeId(1), NodeType::Facility, "Plant A");
        g.add_node(NodeId(2), NodeType::Product, "Amoxicillin 500mg");
        g
    }

    #[test]
    fn add_edge_rejects_unknown_endpoints() {
        let mut g = two_node_graph();
        let err = g.add_edge(NodeId(1), NodeId(99), Relation::Makes, 1.0, Date(0)).unwrap_err();
        assert_eq!(err, RiskError::UnknownEntity(NodeId(99)));
    }

    #[test]
    fn edge_validity_interval_is_half_open() {
        let mut g = two_node_graph();
        g.add_edge(NodeId(1), NodeId(2), Relation::Makes, 1.0, Date(10)).unwrap();
        g.end_edge(NodeId(1), NodeId(2), Relation::Makes, Date(20));

        assert_eq!(g.outgoing(NodeId(1), Date(9)).count(), 0);
        assert_eq!(g.outgoing(NodeId(1), Date(10)).count(), 1);
        assert_eq!(g.outgoing(NodeId(1), Date(19)).count(), 1);
        assert_eq!(g.outgoing(NodeId(1), Date(20)).count(), 0, "valid_to is exclusive");
    }

    #[test]
    fn historical_view_sees_replaced_ownership() {
        // Corp 1 sells the facility to Corp 3 on day 50. The day-49 view
        // must still show the old owner; the day-50 view only the new one.
        let mut g = two_node_graph();
        g.add_node(NodeId(3), NodeType::Corporation, "OldCo");
        g.add_node(NodeId(4), NodeType::Corporation, "NewCo");
        g.add_edge(NodeId(3), NodeId(1), Relation::Owns, 1.0, Date(0)).unwrap();
        g.end_edge(NodeId(3), NodeId(1), Relation::Owns, Date(50));
        g.add_edge(NodeId(4), NodeId(1), Relation::Owns, 1.0, Date(50)).unwrap();

        let owners_at = |d: i64| -> Vec<NodeId> {
            g.incoming(NodeId(1), Date(d)).map(|e| e.from).collect()
        };
        assert_eq!(owners_at(49), vec![NodeId(3)]);
        assert_eq!(owners_at(50), vec![NodeId(4)]);
    }

    #[test]
    fn record_risk_bumps_version_and_history() {
        let mut g = two_node_graph();
        g.record_risk(NodeId(2), Date(5), 4.0).unwrap();
        g.record_risk(NodeId(2), Date(9), 2.5).unwrap();

        let node = g.node(NodeId(2)).unwrap();
        assert_eq!(node.version, 2);
        assert_eq!(node.current_risk_score, 2.5);
        assert_eq!(node.risk_score_updated_at, Some(Date(9)));

        assert_eq!(g.risk_as_of(NodeId(2), Date(4)), None);
        assert_eq!(g.risk_as_of(NodeId(2), Date(7)), Some(4.0));
        assert_eq!(g.risk_as_of(NodeId(2), Date(100)), Some(2.5));
    }

    #[test]
    fn record_risk_clamps_to_scale() {
        let mut g = two_node_graph();
        g.record_risk(NodeId(1), Date(0), 14.0).unwrap();
        assert_eq!(g.node(NodeId(1)).unwrap().current_risk_score, 10.0);
    }

    #[test]
    fn multigraph_allows_parallel_edges() {
        // An ingredient can appear twice in one product at different shares.
        let mut g = two_node_graph();
        g.add_edge(NodeId(1), NodeId(2), Relation::Makes, 1.0, Date(0)).unwrap();
        g.add_edge(NodeId(1), NodeId(2), Relation::Makes, 0.4, Date(0)).unwrap();
        assert_eq!(g.outgoing(NodeId(1), Date(1)).count(), 2);
    }
}
