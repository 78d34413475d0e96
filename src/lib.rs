//! Whalecopy: whale observation and copy-trade execution platform.
//!
//! This is the root crate that provides benchmark access to the internal
//! modules. For actual functionality, use the individual crates directly:
//!
//! - `copytrade-core`: Domain types, venue adapters, repositories, events
//! - `whale-tracker`: Tiered polling, snapshot diffing, signal generation
//! - `risk-manager`: Sizing/leverage precedence, pre-trade policy
//! - `trading-engine`: Two-phase execution, workers, position monitor
//! - `api-server`: Thin command/query API and process wiring

// Re-export for benchmarks
pub use copytrade_core as core;
pub use risk_manager as risk;
pub use trading_engine as trading;
pub use whale_tracker as tracker;
