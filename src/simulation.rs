use std::collections::HashMap;

use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use rayon::prelude::*;
use serde::Serialize;
use tracing::{info, warn};

use crate::config::SimulationConfig;
use crate::error::{Result, RiskError};
use crate::forecast::ForecastDistribution;
use crate::types::{Date, NodeId, PortfolioId};

#[derive(Debug, Clone, Serialize)]
pub struct PortfolioItem {
    pub entity_id: NodeId,
    /// Current unit price in dollars.
    pub current_price: f64,
    /// Held volume in units over the exposure horizon.
    pub volume: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Portfolio {
    pub id: PortfolioId,
    pub items: Vec<PortfolioItem>,
}

impl Portfolio {
    /// All-or-nothing coverage check for callers that treat a missing
    /// forecast as fatal instead of the run's default skip-and-continue.
    pub fn require_full_coverage(
        &self,
        forecasts: &HashMap<NodeId, ForecastDistribution>,
    ) -> Result<()> {
        for item in &self.items {
            if !forecasts.contains_key(&item.entity_id) {
                return Err(RiskError::MissingForecast(item.entity_id));
            }
        }
        Ok(())
    }
}

/// Per-item contribution to the portfolio loss distribution.
#[derive(Debug, Clone, Serialize)]
pub struct ItemExposure {
    pub entity_id: NodeId,
    pub expected_loss: f64,
}

/// Report artifact of one valuation run — recomputed per run, never a
/// source of truth. Cross-item correlation is not imposed here: items are
/// sampled independently, and correlation enters only through correlated
/// forecasts produced upstream (documented limitation).
#[derive(Debug, Clone, Serialize)]
pub struct SimulationResult {
    pub portfolio_id: PortfolioId,
    pub run_at: Date,
    pub num_scenarios: usize,
    /// Portfolio loss per scenario, index-aligned across items.
    pub per_scenario_losses: Vec<f64>,
    pub expected_loss: f64,
    pub value_at_risk: f64,
    pub item_exposures: Vec<ItemExposure>,
    /// Items excluded for lack of a forecast — a warning, not a failure;
    /// the exposure estimate is valid but a lower bound.
    pub skipped: Vec<NodeId>,
}

/// Nearest-rank percentile over an unsorted sample.
pub fn percentile(samples: &[f64], pct: f64) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let mut sorted = samples.to_vec();
    sorted.sort_by(f64::total_cmp);
    let rank = ((pct / 100.0) * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}

/// Run the Monte Carlo valuation: for each item, draw a simulated future
/// price per scenario and take the one-sided procurement loss
/// `max(0, simulated - current) * volume`; per-scenario portfolio loss is
/// the sum across items at that scenario index.
///
/// Deterministic under a fixed seed regardless of rayon scheduling: every
/// item draws from its own ChaCha20 stream keyed by entity id, and the
/// percentile is computed after all draws complete.
pub fn simulate(
    portfolio: &Portfolio,
    forecasts: &HashMap<NodeId, ForecastDistribution>,
    run_at: Date,
    config: &SimulationConfig,
) -> SimulationResult {
    let n = config.num_scenarios;

    let mut priced = Vec::new();
    let mut skipped = Vec::new();
    for item in &portfolio.items {
        match forecasts.get(&item.entity_id) {
            Some(dist) => priced.push((item, dist)),
            None => {
                warn!(entity = item.entity_id.0, "no forecast; item excluded from run");
                skipped.push(item.entity_id);
            }
        }
    }

    let per_item: Vec<(NodeId, Vec<f64>)> = priced
        .par_iter()
        .map(|(item, dist)| {
            let mut rng = ChaCha20Rng::seed_from_u64(config.seed);
            rng.set_stream(item.entity_id.0);
            let losses: Vec<f64> = (0..n)
                .map(|_| {
                    let simulated = dist.sample(&mut rng);
                    (simulated - item.current_price).max(0.0) * item.volume
                })
                .collect();
            (item.entity_id, losses)
        })
        .collect();

    let mut per_scenario_losses = vec![0.0_f64; n];
    let mut item_exposures = Vec::with_capacity(per_item.len());
    for (entity_id, losses) in &per_item {
        for (total, loss) in per_scenario_losses.iter_mut().zip(losses) {
            *total += loss;
        }
        let expected = if n == 0 { 0.0 } else { losses.iter().sum::<f64>() / n as f64 };
        item_exposures.push(ItemExposure { entity_id: *entity_id, expected_loss: expected });
    }

    let expected_loss = if n == 0 {
        0.0
    } else {
        per_scenario_losses.iter().sum::<f64>() / n as f64
    };
    let value_at_risk = percentile(&per_scenario_losses, config.var_percentile);

    info!(
        portfolio = portfolio.id.0,
        items = per_item.len(),
        skipped = skipped.len(),
        expected_loss,
        value_at_risk,
        "simulation run complete"
    );

    SimulationResult {
        portfolio_id: portfolio.id,
        run_at,
        num_scenarios: n,
        per_scenario_losses,
        expected_loss,
        value_at_risk,
        item_exposures,
        skipped,
    }
}
