pub mod analysis;
pub mod config;
pub mod error;
pub mod events;
pub mod features;
pub mod forecast;
pub mod graph;
pub mod propagation;
pub mod simulation;
pub mod types;
