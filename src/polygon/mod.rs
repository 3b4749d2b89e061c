pub mod client;
pub mod throttle;
pub mod types;

pub use client::PolygonClient;
pub use throttle::{RequestPriority, RequestThrottler};
pub use types::{MarketStatus, Quote};
