//! Trading Engine
//!
//! Signal dispatch, crash-safe two-phase trade execution, the signal worker
//! and expiry sweeper, and the position monitor/reconciler.

pub mod engine;
pub mod execution;
pub mod position_monitor;
pub mod worker;

pub use engine::{CopyTradeEngine, EngineDeps, FollowerOutcome, ProcessOutcome};
pub use position_monitor::PositionMonitor;
pub use worker::SignalWorker;
