use std::collections::HashMap;

use rayon::prelude::*;
use serde::Serialize;
use tracing::{info, warn};

use crate::error::{Result, RiskError};
use crate::graph::{Relation, SupplyGraph};
use crate::types::{Date, NodeId};

/// Per-entity price observations, appended in date order. The time axis for
/// every as-of join.
#[derive(Debug, Default)]
pub struct PriceHistory {
    series: HashMap<NodeId, Vec<(Date, f64)>>,
}

impl PriceHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, entity: NodeId, date: Date, price: f64) {
        let series = self.series.entry(entity).or_default();
        debug_assert!(
            series.last().map(|(d, _)| *d <= date).unwrap_or(true),
            "price series must be appended in date order"
        );
        series.push((date, price));
    }

    pub fn series(&self, entity: NodeId) -> &[(Date, f64)] {
        self.series.get(&entity).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// Forward-only cursor over a date-sorted series. For ascending target
/// dates the cursor only ever advances, which is both what makes the join
/// O(n + m) and what makes forward leakage structurally impossible: the
/// match is always the latest source record not later than the target.
pub struct AsOfCursor<'a, T> {
    series: &'a [(Date, T)],
    pos: usize,
}

impl<'a, T> AsOfCursor<'a, T> {
    pub fn new(series: &'a [(Date, T)]) -> Self {
        AsOfCursor { series, pos: 0 }
    }

    /// Latest record with date ≤ `target`, advancing (never rewinding) the
    /// cursor. Returns None when no record exists yet at `target`.
    pub fn advance_to(&mut self, target: Date) -> Option<&'a T> {
        while self.pos < self.series.len() && self.series[self.pos].0 <= target {
            self.pos += 1;
        }
        if self.pos == 0 { None } else { Some(&self.series[self.pos - 1].1) }
    }

    /// Number of records at or before the last target — the as-of prefix
    /// length of the series.
    pub fn matched(&self) -> usize {
        self.pos
    }
}

/// One (entity, date) snapshot handed to the forecasting model. Every field
/// reflects information observed at or before `as_of`; a feature with no
/// history is `None`, never a silent zero.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureRow {
    pub entity_id: NodeId,
    pub as_of: Date,
    pub price: f64,
    /// Propagated risk at `as_of`; None when no propagation ever reached
    /// this entity (distinct from a recorded zero after resolution).
    pub risk_score: Option<f64>,
    /// Distinct upstream suppliers (MAKES/CONTAINS in-edges) at `as_of`.
    pub supplier_count: usize,
    /// Herfindahl concentration of inbound edge weights, 1/n..1; None when
    /// there are no suppliers in the as-of view.
    pub supplier_concentration: Option<f64>,
    /// Relative price change vs. the observation 4 steps back.
    pub price_velocity: Option<f64>,
    /// Coefficient of variation over the trailing 12 observations.
    pub price_volatility: Option<f64>,
}

const VELOCITY_LAG: usize = 4;
const VOLATILITY_WINDOW: usize = 12;

/// Batch result: completed rows plus the rows excluded and why. Callers see
/// counts, never a silent partial success.
#[derive(Debug, Default)]
pub struct AssemblyBatch {
    pub rows: Vec<FeatureRow>,
    pub excluded: Vec<(NodeId, Date, RiskError)>,
}

impl AssemblyBatch {
    pub fn summary(&self) -> (usize, usize) {
        (self.rows.len(), self.excluded.len())
    }
}

/// Joins price history, propagated risk, and structural graph metrics as of
/// a cutoff date. Read-only over the graph, so batch assembly parallelizes
/// across entities without coordination.
pub struct FeatureAssembler<'a> {
    graph: &'a SupplyGraph,
    prices: &'a PriceHistory,
}

impl<'a> FeatureAssembler<'a> {
    pub fn new(graph: &'a SupplyGraph, prices: &'a PriceHistory) -> Self {
        FeatureAssembler { graph, prices }
    }

    /// Assemble one row. `InsufficientHistory` when the entity has no price
    /// observation at or before `as_of` — the row is for excluding, not
    /// zero-filling.
    pub fn assemble(&self, entity: NodeId, as_of: Date) -> Result<FeatureRow> {
        if !self.graph.contains(entity) {
            return Err(RiskError::UnknownEntity(entity));
        }
        let series = self.prices.series(entity);
        // Index of the first observation after as_of == count observed so far.
        let observed = series.partition_point(|(d, _)| *d <= as_of);
        self.row_from_prefix(entity, as_of, series, observed)
    }

    /// Build a row given the as-of prefix length of the price series. Both
    /// the single-row path (binary search) and the batch path (forward
    /// cursor) funnel through here.
    fn row_from_prefix(
        &self,
        entity: NodeId,
        as_of: Date,
        series: &[(Date, f64)],
        observed: usize,
    ) -> Result<FeatureRow> {
        if observed == 0 {
            return Err(RiskError::InsufficientHistory { entity, as_of });
        }
        let price = series[observed - 1].1;

        let price_velocity = (observed > VELOCITY_LAG).then(|| {
            let then = series[observed - 1 - VELOCITY_LAG].1;
            if then == 0.0 { 0.0 } else { (price - then) / then }
        });

        let price_volatility = (observed >= VOLATILITY_WINDOW).then(|| {
            let window = &series[observed - VOLATILITY_WINDOW..observed];
            let mean = window.iter().map(|(_, p)| p).sum::<f64>() / window.len() as f64;
            if mean == 0.0 {
                0.0
            } else {
                let var = window.iter().map(|(_, p)| (p - mean).powi(2)).sum::<f64>()
                    / window.len() as f64;
                var.sqrt() / mean
            }
        });

        let (supplier_count, supplier_concentration) = self.supplier_structure(entity, as_of);

        Ok(FeatureRow {
            entity_id: entity,
            as_of,
            price,
            risk_score: self.graph.risk_as_of(entity, as_of),
            supplier_count,
            supplier_concentration,
            price_velocity,
            price_volatility,
        })
    }

    /// Supplier count and weight concentration against the graph's topology
    /// as of the cutoff — a historical view over edge validity intervals,
    /// not the current adjacency.
    fn supplier_structure(&self, entity: NodeId, as_of: Date) -> (usize, Option<f64>) {
        let mut weight_by_supplier: HashMap<NodeId, f64> = HashMap::new();
        for edge in self.graph.incoming(entity, as_of) {
            if matches!(edge.relation, Relation::Makes | Relation::Contains) {
                *weight_by_supplier.entry(edge.from).or_insert(0.0) += edge.weight;
            }
        }
        let count = weight_by_supplier.len();
        if count == 0 {
            return (0, None);
        }
        let total: f64 = weight_by_supplier.values().sum();
        if total == 0.0 {
            return (count, None);
        }
        let hhi = weight_by_supplier
            .values()
            .map(|w| (w / total).powi(2))
            .sum::<f64>();
        (count, Some(hhi))
    }

    /// Assemble rows for many (entity, date) targets, parallel across
    /// entities. Within an entity the targets are processed in ascending
    /// date order through a forward-only cursor. Per-row failures are
    /// collected, not fatal.
    pub fn assemble_batch(&self, targets: &[(NodeId, Date)]) -> AssemblyBatch {
        let mut by_entity: HashMap<NodeId, Vec<Date>> = HashMap::new();
        for &(entity, date) in targets {
            by_entity.entry(entity).or_default().push(date);
        }
        let mut entities: Vec<(NodeId, Vec<Date>)> = by_entity.into_iter().collect();
        entities.sort_by_key(|(id, _)| *id);

        let per_entity: Vec<AssemblyBatch> = entities
            .into_par_iter()
            .map(|(entity, mut dates)| {
                dates.sort_unstable();
                let series = self.prices.series(entity);
                let mut cursor = AsOfCursor::new(series);
                let mut batch = AssemblyBatch::default();
                for date in dates {
                    cursor.advance_to(date);
                    let result = if self.graph.contains(entity) {
                        self.row_from_prefix(entity, date, series, cursor.matched())
                    } else {
                        Err(RiskError::UnknownEntity(entity))
                    };
                    match result {
                        Ok(row) => batch.rows.push(row),
                        Err(err) => {
                            warn!(entity = entity.0, date = date.0, %err, "feature row excluded");
                            batch.excluded.push((entity, date, err));
                        }
                    }
                }
                batch
            })
            .collect();

        let mut merged = AssemblyBatch::default();
        for mut b in per_entity {
            merged.rows.append(&mut b.rows);
            merged.excluded.append(&mut b.excluded);
        }
        let (ok, excluded) = merged.summary();
        info!(rows = ok, excluded, "feature assembly batch complete");
        merged
    }

    /// Assemble a regular date grid over `[from, to]` in `step_days` strides,
    /// chunked so a failure in one date chunk never discards completed ones.
    pub fn assemble_window(
        &self,
        entities: &[NodeId],
        from: Date,
        to: Date,
        step_days: i64,
        chunk_days: i64,
    ) -> Vec<AssemblyBatch> {
        let mut chunks = Vec::new();
        let mut chunk_start = from;
        // Grid points stride from the global `from`, not per chunk, so the
        // step stays aligned when chunk_days is not a multiple of step_days.
        let mut d = from;
        while chunk_start <= to {
            let chunk_end = Date((chunk_start.0 + chunk_days - 1).min(to.0));
            let mut targets = Vec::new();
            while d <= chunk_end {
                for &e in entities {
                    targets.push((e, d));
                }
                d = d.offset(step_days);
            }
            chunks.push(self.assemble_batch(&targets));
            chunk_start = chunk_end.offset(1);
        }
        chunks
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::NodeType;

    fn graph_with_product() -> SupplyGraph {
        let mut g = SupplyGraph::new();
        g.add_node(NodeId(1), NodeType::Product, "Tablet X");
        g.add_node(NodeId(2), NodeType::Ingredient, "API-A");
        g.add_node(NodeId(3), NodeType::Ingredient, "API-B");
        g.add_edge(NodeId(2), NodeId(1), Relation::Contains, 0.75, Date(0)).unwrap();
        g.add_edge(NodeId(3), NodeId(1), Relation::Contains, 0.25, Date(0)).unwrap();
        g
    }

    fn weekly_prices(entity: NodeId, n: usize, start_price: f64) -> PriceHistory {
        let mut h = PriceHistory::new();
        for i in 0..n {
            h.record(entity, Date(i as i64 * 7), start_price + i as f64);
        }
        h
    }

    #[test]
    fn cursor_matches_latest_not_later() {
        let series = vec![(Date(10), "a"), (Date(20), "b"), (Date(30), "c")];
        let mut cursor = AsOfCursor::new(&series);
        assert_eq!(cursor.advance_to(Date(5)), None);
        assert_eq!(cursor.advance_to(Date(20)), Some(&"b"));
        assert_eq!(cursor.advance_to(Date(29)), Some(&"b"));
        assert_eq!(cursor.advance_to(Date(300)), Some(&"c"));
    }

    #[test]
    fn no_price_history_is_insufficient_not_zero() {
        let g = graph_with_product();
        let prices = PriceHistory::new();
        let assembler = FeatureAssembler::new(&g, &prices);
        let err = assembler.assemble(NodeId(1), Date(100)).unwrap_err();
        assert!(matches!(err, RiskError::InsufficientHistory { .. }));
    }

    #[test]
    fn future_price_never_leaks_into_row() {
        let g = graph_with_product();
        let mut prices = PriceHistory::new();
        prices.record(NodeId(1), Date(10), 5.0);
        prices.record(NodeId(1), Date(20), 9.0); // future relative to as_of

        let assembler = FeatureAssembler::new(&g, &prices);
        let row = assembler.assemble(NodeId(1), Date(15)).unwrap();
        assert_eq!(row.price, 5.0);
    }

    #[test]
    fn future_risk_update_is_absent_not_zero() {
        let mut g = graph_with_product();
        g.record_risk(NodeId(1), Date(50), 7.0).unwrap();
        let mut prices = PriceHistory::new();
        prices.record(NodeId(1), Date(0), 5.0);

        let assembler = FeatureAssembler::new(&g, &prices);
        let row = assembler.assemble(NodeId(1), Date(49)).unwrap();
        assert_eq!(row.risk_score, None, "day-50 propagation must be invisible on day 49");
        let later = assembler.assemble(NodeId(1), Date(50)).unwrap();
        assert_eq!(later.risk_score, Some(7.0));
    }

    #[test]
    fn structural_features_follow_historical_topology() {
        let mut g = graph_with_product();
        // Supplier 3 drops out on day 60.
        g.end_edge(NodeId(3), NodeId(1), Relation::Contains, Date(60));
        let mut prices = PriceHistory::new();
        prices.record(NodeId(1), Date(0), 5.0);
        let assembler = FeatureAssembler::new(&g, &prices);

        let before = assembler.assemble(NodeId(1), Date(59)).unwrap();
        assert_eq!(before.supplier_count, 2);
        // HHI over shares 0.75/0.25: 0.5625 + 0.0625 = 0.625
        assert!((before.supplier_concentration.unwrap() - 0.625).abs() < 1e-12);

        let after = assembler.assemble(NodeId(1), Date(60)).unwrap();
        assert_eq!(after.supplier_count, 1);
        assert_eq!(after.supplier_concentration, Some(1.0), "sole supplier is a monopoly");
    }

    #[test]
    fn velocity_and_volatility_use_only_prior_observations() {
        let g = graph_with_product();
        let prices = weekly_prices(NodeId(1), 16, 10.0);
        let assembler = FeatureAssembler::new(&g, &prices);

        // At observation index 3 (day 21) there is no 4-back observation.
        let early = assembler.assemble(NodeId(1), Date(21)).unwrap();
        assert_eq!(early.price_velocity, None);
        assert_eq!(early.price_volatility, None);

        // At day 105 (index 15) both windows are filled.
        let late = assembler.assemble(NodeId(1), Date(105)).unwrap();
        let expected_velocity = (25.0 - 21.0) / 21.0;
        assert!((late.price_velocity.unwrap() - expected_velocity).abs() < 1e-12);
        assert!(late.price_volatility.unwrap() > 0.0);
    }

    #[test]
    fn batch_excludes_failures_and_keeps_the_rest() {
        let g = graph_with_product();
        let mut prices = PriceHistory::new();
        prices.record(NodeId(1), Date(10), 5.0);

        let assembler = FeatureAssembler::new(&g, &prices);
        let batch = assembler.assemble_batch(&[
            (NodeId(1), Date(5)),  // before first observation → excluded
            (NodeId(1), Date(15)), // fine
            (NodeId(9), Date(15)), // unknown entity → excluded
        ]);
        let (ok, excluded) = batch.summary();
        assert_eq!(ok, 1);
        assert_eq!(excluded, 2);
        assert_eq!(batch.rows[0].price, 5.0);
    }

    #[test]
    fn window_chunks_cover_grid_without_overlap() {
        let g = graph_with_product();
        let mut prices = PriceHistory::new();
        for d in 0..20 {
            prices.record(NodeId(1), Date(d * 7), 5.0);
        }
        let assembler = FeatureAssembler::new(&g, &prices);
        let chunks = assembler.assemble_window(&[NodeId(1)], Date(0), Date(139), 7, 70);
        assert_eq!(chunks.len(), 2);
        let total: usize = chunks.iter().map(|c| c.rows.len()).sum();
        assert_eq!(total, 20);
    }

    #[test]
    fn window_stride_stays_aligned_across_chunk_boundaries() {
        // step 7 with chunk 10: without a global anchor the second chunk
        // would restart its grid at day 10 instead of continuing at day 14.
        let g = graph_with_product();
        let mut prices = PriceHistory::new();
        prices.record(NodeId(1), Date(0), 5.0);
        let assembler = FeatureAssembler::new(&g, &prices);

        let chunks = assembler.assemble_window(&[NodeId(1)], Date(0), Date(29), 7, 10);
        let days: Vec<i64> = chunks
            .iter()
            .flat_map(|c| c.rows.iter().map(|r| r.as_of.0))
            .collect();
        assert_eq!(days, vec![0, 7, 14, 21, 28]);
    }

    mod properties {
        use proptest::prelude::*;

        use super::*;

        proptest! {
            /// The as-of match must equal a naive backward scan for any
            /// history and any cutoff — leakage is impossible by construction.
            #[test]
            fn as_of_join_never_leaks(
                days in proptest::collection::vec(0i64..500, 1..40),
                as_of in 0i64..600,
            ) {
                let mut days = days;
                days.sort_unstable();
                let g = graph_with_product();
                let mut prices = PriceHistory::new();
                for (i, d) in days.iter().enumerate() {
                    prices.record(NodeId(1), Date(*d), i as f64 + 1.0);
                }
                let assembler = FeatureAssembler::new(&g, &prices);

                let expected = days
                    .iter()
                    .enumerate()
                    .filter(|(_, d)| **d <= as_of)
                    .map(|(i, _)| i as f64 + 1.0)
                    .next_back();

                match (assembler.assemble(NodeId(1), Date(as_of)), expected) {
                    (Ok(row), Some(p)) => prop_assert_eq!(row.price, p),
                    (Err(RiskError::InsufficientHistory { .. }), None) => {}
                    (got, want) => prop_assert!(false, "mismatch: {got:?} vs {want:?}"),
                }
            }
        }
    }
}
