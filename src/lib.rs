pub mod app;
pub mod cache;
pub mod config;
pub mod error;
pub mod indicators;
pub mod market_data;
pub mod signals;
pub mod throttle;

#[cfg(test)]
mod tests;

pub use error::{AppError, Result};
