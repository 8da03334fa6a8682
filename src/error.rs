use thiserror::Error;

use crate::types::{Date, NodeId};

/// Failure taxonomy for the risk core. Batch entry points never surface
/// these directly for a single bad unit — they isolate the unit, count it
/// in the batch summary, and keep going.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RiskError {
    /// Event references an entity that does not exist in the supply graph.
    #[error("unknown entity {0:?}")]
    UnknownEntity(NodeId),

    /// Event severity outside the [0, 10] scale.
    #[error("severity {severity} outside [0, 10]")]
    InvalidSeverity { severity: f64 },

    /// Entity has no price observation at or before the cutoff; the feature
    /// row must be excluded from training, never zero-filled.
    #[error("no price history for {entity:?} at or before {as_of:?}")]
    InsufficientHistory { entity: NodeId, as_of: Date },

    /// Portfolio item has no forecast; the item is skipped, the run continues.
    #[error("no forecast for {0:?}")]
    MissingForecast(NodeId),

    /// External call (graph store, model inference) failed after exhausting
    /// bounded-backoff retries. Fatal for this unit of work only.
    #[error("external service call failed after {attempts} attempts: {reason}")]
    ExternalServiceTimeout { attempts: u32, reason: String },
}

pub type Result<T> = std::result::Result<T, RiskError>;
