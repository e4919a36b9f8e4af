//! Strategy module
//!
//! Strategies are owned by the `Trader` and driven through the node lifecycle:
//! `on_start` once the engines are ready, `on_stop` when the node stops,
//! `on_dispose` on teardown. State can be saved to and restored from the
//! execution database between runs.

pub mod traits;

pub use traits::{Strategy, StrategyContext};
