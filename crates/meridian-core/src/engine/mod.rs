pub mod backtest;
pub mod optimize;
