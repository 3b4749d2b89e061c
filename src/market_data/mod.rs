pub mod bar;

// Re-export the bar types for convenient access (e.g. `use crate::market_data::Bar`).
pub use bar::{Bar, BarTime, ChronologicalBars, OrderError};
