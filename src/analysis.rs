use std::collections::HashMap;

use serde::Serialize;

use crate::forecast::ForecastDistribution;
use crate::graph::SupplyGraph;
use crate::simulation::{Portfolio, SimulationResult};
use crate::types::NodeId;

/// One row of the ranked watchlist: where the money is at risk and why.
#[derive(Debug, Clone, Serialize)]
pub struct WatchlistEntry {
    pub entity_id: NodeId,
    pub name: String,
    pub current_risk_score: f64,
    /// P90 forecast price minus current price (0 when the forecast sits
    /// below current — no upside priced in).
    pub forecast_upside: f64,
    pub expected_loss_contribution: f64,
    /// Share of portfolio expected loss, 0..1.
    pub loss_share: f64,
}

/// The exposure report artifact: the run plus the ranked watchlist.
/// Downstream rendering (CSV, plots) happens elsewhere.
#[derive(Debug, Clone, Serialize)]
pub struct ExposureReport {
    pub result: SimulationResult,
    pub watchlist: Vec<WatchlistEntry>,
}

/// Rank portfolio entities by expected loss contribution, descending.
/// Entities skipped in the run (no forecast) carry no exposure entry and
/// do not appear — the run's `skipped` list is the record of them.
pub fn build_watchlist(
    graph: &SupplyGraph,
    portfolio: &Portfolio,
    forecasts: &HashMap<NodeId, ForecastDistribution>,
    result: &SimulationResult,
) -> Vec<WatchlistEntry> {
    let total: f64 = result.item_exposures.iter().map(|e| e.expected_loss).sum();

    let mut entries: Vec<WatchlistEntry> = result
        .item_exposures
        .iter()
        .map(|exposure| {
            let item = portfolio
                .items
                .iter()
                .find(|i| i.entity_id == exposure.entity_id);
            let upside = match (forecasts.get(&exposure.entity_id), item) {
                (Some(dist), Some(item)) => (dist.p90() - item.current_price).max(0.0),
                _ => 0.0,
            };
            let node = graph.node(exposure.entity_id);
            WatchlistEntry {
                entity_id: exposure.entity_id,
                name: node.map(|n| n.name.clone()).unwrap_or_default(),
                current_risk_score: node.map(|n| n.current_risk_score).unwrap_or(0.0),
                forecast_upside: upside,
                expected_loss_contribution: exposure.expected_loss,
                loss_share: if total > 0.0 { exposure.expected_loss / total } else { 0.0 },
            }
        })
        .collect();

    entries.sort_by(|a, b| {
        b.expected_loss_contribution
            .total_cmp(&a.expected_loss_contribution)
    });
    entries
}
