use std::time::Duration;

use rand::Rng;
use rand_distr::{Distribution, LogNormal};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::RetryConfig;
use crate::error::{Result, RiskError};
use crate::types::NodeId;

/// One point of a quantile forecast: `price` at cumulative probability
/// `probability` (0.1 / 0.5 / 0.9 for the standard P10/P50/P90 set).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QuantilePoint {
    pub probability: f64,
    pub price: f64,
}

/// A per-entity probabilistic price forecast. Either the quantile set the
/// external model emits, or a parametric log-normal for callers that fit a
/// distribution instead — both sample through the same interface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ForecastDistribution {
    /// Piecewise-linear inverse CDF through the given points, clamped to the
    /// first/last price outside the covered probability range.
    Quantiles(Vec<QuantilePoint>),
    /// Log-normal in ln-space; E[X] = exp(mu + sigma²/2).
    LogNormal { mu: f64, sigma: f64 },
}

impl ForecastDistribution {
    /// Standard P10/P50/P90 forecast.
    pub fn from_p10_p50_p90(p10: f64, p50: f64, p90: f64) -> Self {
        ForecastDistribution::Quantiles(vec![
            QuantilePoint { probability: 0.1, price: p10 },
            QuantilePoint { probability: 0.5, price: p50 },
            QuantilePoint { probability: 0.9, price: p90 },
        ])
    }

    /// Degenerate single-point forecast — every draw returns `price`.
    pub fn point(price: f64) -> Self {
        ForecastDistribution::Quantiles(vec![QuantilePoint { probability: 0.5, price }])
    }

    /// The P90 price — the watchlist's "forecast upside" reference point.
    pub fn p90(&self) -> f64 {
        match self {
            ForecastDistribution::Quantiles(points) => Self::inverse_cdf(points, 0.9),
            ForecastDistribution::LogNormal { mu, sigma } => {
                // z-score of the 90th percentile of the standard normal.
                const Z90: f64 = 1.281_551_565_544_600_5;
                (mu + Z90 * sigma).exp()
            }
        }
    }

    pub fn sample(&self, rng: &mut impl Rng) -> f64 {
        match self {
            ForecastDistribution::Quantiles(points) => {
                let u: f64 = rng.random();
                Self::inverse_cdf(points, u)
            }
            ForecastDistribution::LogNormal { mu, sigma } => {
                let dist = LogNormal::new(*mu, *sigma).expect("invalid LogNormal params");
                dist.sample(rng)
            }
        }
    }

    /// Piecewise-linear interpolation between quantile points; flat beyond
    /// the ends (no tail extrapolation — the model's P10/P90 are taken as
    /// the practical bounds it committed to).
    fn inverse_cdf(points: &[QuantilePoint], u: f64) -> f64 {
        debug_assert!(!points.is_empty(), "quantile forecast must have at least one point");
        let first = points[0];
        if u <= first.probability {
            return first.price;
        }
        for pair in points.windows(2) {
            let (lo, hi) = (pair[0], pair[1]);
            if u <= hi.probability {
                let span = hi.probability - lo.probability;
                if span <= 0.0 {
                    return hi.price;
                }
                let t = (u - lo.probability) / span;
                return lo.price + t * (hi.price - lo.price);
            }
        }
        points[points.len() - 1].price
    }
}

/// Seam to the external forecasting model. Implementations wrap whatever
/// artifact serves the versioned model; errors are transient by definition
/// and retried by `forecast_with_retry`.
pub trait Forecaster {
    fn forecast(
        &self,
        entity: NodeId,
        horizon_days: i64,
    ) -> std::result::Result<ForecastDistribution, String>;
}

/// In-memory forecaster over a fixed table — test double and offline-batch
/// adapter in one.
#[derive(Debug, Default)]
pub struct StaticForecaster {
    table: std::collections::HashMap<NodeId, ForecastDistribution>,
}

impl StaticForecaster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, entity: NodeId, dist: ForecastDistribution) {
        self.table.insert(entity, dist);
    }
}

impl Forecaster for StaticForecaster {
    fn forecast(
        &self,
        entity: NodeId,
        _horizon_days: i64,
    ) -> std::result::Result<ForecastDistribution, String> {
        self.table
            .get(&entity)
            .cloned()
            .ok_or_else(|| format!("no forecast for entity {}", entity.0))
    }
}

/// Call the external model with bounded exponential backoff. Exhausted
/// retries fail this unit of work only — batch callers skip and continue.
pub fn forecast_with_retry(
    forecaster: &impl Forecaster,
    entity: NodeId,
    horizon_days: i64,
    retry: &RetryConfig,
) -> Result<ForecastDistribution> {
    let mut last_err = String::new();
    for attempt in 0..retry.max_attempts {
        match forecaster.forecast(entity, horizon_days) {
            Ok(dist) => return Ok(dist),
            Err(err) => {
                warn!(entity = entity.0, attempt, %err, "forecast call failed");
                last_err = err;
                if attempt + 1 < retry.max_attempts {
                    let delay = retry.base_delay_ms.saturating_mul(1 << attempt);
                    std::thread::sleep(Duration::from_millis(delay));
                }
            }
        }
    }
    Err(RiskError::ExternalServiceTimeout {
        attempts: retry.max_attempts,
        reason: last_err,
    })
}
