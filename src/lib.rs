pub mod cli;
pub mod client;
pub mod config;
pub mod context;
pub mod crawler;
pub mod executor;
pub mod filter;
pub mod harvest;
pub mod model;
pub mod sources;
pub mod traits;

#[cfg(test)]
mod testing;

// Re-export common types for convenience
pub use context::{Commit, RunContext, Tally};
pub use executor::*;
pub use model::*;
pub use traits::*;
