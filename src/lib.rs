//! ETF Strategy Orchestrator
//!
//! A conversational engine that:
//! - Collects investment elements across turns of a staged business flow
//! - Plans each turn as an ordered set of deterministic tool calls
//! - Derives ETF classification, valuation, news relevance and virtual sectors
//! - Generates, backtests and optimizes allocation strategies
//! - Reviews every reply for compliance before it leaves the engine
//! - Records every turn in a hash-verified audit log
//!
//! UNIFIED LOOP:
//! INPUT → VERIFY → PLAN → EXECUTE → OBSERVE → VERIFY → COMMIT

pub mod agent;
pub mod api;
pub mod audit;
pub mod classifier;
pub mod config;
pub mod data;
pub mod derivation;
pub mod error;
pub mod execution;
pub mod extraction;
pub mod flow;
pub mod models;
pub mod planner;
pub mod safety;
pub mod state;
pub mod status;
pub mod strategy;
pub mod tools;

pub use error::{EngineError, Result};

// Re-export common types
pub use agent::Orchestrator;
pub use classifier::{IntentClassifier, TurnIntent};
pub use config::EngineConfig;
pub use models::*;
