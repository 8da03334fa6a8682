use serde::{Deserialize, Serialize};

/// Propagation tuning. Defaults match the calibration of the production
/// contagion model: geometric decay with base 0.7, a floor below which a
/// branch contributes negligible signal, and a hop bound as a hard stop on
/// dense corporate cross-holdings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PropagationConfig {
    /// Geometric decay base per hop.
    pub decay_base: f64,
    /// Contributions below this score are neither recorded nor expanded.
    pub decay_floor: f64,
    /// Hard traversal bound; deeper reach is truncated and logged, not fatal.
    pub max_hops: u32,
}

impl Default for PropagationConfig {
    fn default() -> Self {
        PropagationConfig { decay_base: 0.7, decay_floor: 1.0, max_hops: 6 }
    }
}

/// Monte Carlo valuation tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    pub seed: u64,
    pub num_scenarios: usize,
    /// VaR confidence level in percent (95 → the loss exceeded in 5% of runs).
    pub var_percentile: f64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        SimulationConfig { seed: 42, num_scenarios: 1_000, var_percentile: 95.0 }
    }
}

/// Retry policy for external collaborators (graph store, model inference).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_attempts: u32,
    /// First backoff delay in milliseconds; doubles per attempt.
    pub base_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig { max_attempts: 3, base_delay_ms: 250 }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    pub propagation: PropagationConfig,
    pub simulation: SimulationConfig,
    pub retry: RetryConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_calibration() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.propagation.decay_base, 0.7);
        assert_eq!(cfg.propagation.decay_floor, 1.0);
        assert_eq!(cfg.propagation.max_hops, 6);
        assert_eq!(cfg.simulation.num_scenarios, 1_000);
        assert_eq!(cfg.simulation.var_percentile, 95.0);
    }

    #[test]
    fn config_round_trips_through_json() {
        let cfg = EngineConfig::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let back: EngineConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.propagation.max_hops, cfg.propagation.max_hops);
        assert_eq!(back.simulation.seed, cfg.simulation.seed);
    }
}
