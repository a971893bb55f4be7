//! Contract configuration.

pub mod project;

pub use project::{ContractConfig, CONFIG_FILE};
