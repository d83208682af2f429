pub mod app;
pub mod cache;
pub mod cli;
pub mod clock;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod feed;
pub mod fetch;
pub mod limiter;
pub mod queue;
pub mod utils;

#[cfg(test)]
mod test_support;

pub use coordinator::{FetchCoordinator, FetchSource, Fetched};
pub use error::{AppError, Result};
