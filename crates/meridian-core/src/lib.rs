pub mod data;
pub mod engine;
pub mod error;
pub mod performance;
pub mod portfolio;
pub mod report;
pub mod strategy;
pub mod types;

pub use engine::backtest;
pub use engine::optimize;
pub use error::BacktestError;

pub fn engine_name() -> &'static str {
    "meridian"
}
