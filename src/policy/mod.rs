//! Policy definitions and the storage they are loaded from.

mod model;
mod store;

pub use model::*;
pub use store::*;

/// Errors raised while loading or validating policies.
#[derive(Debug, thiserror::Error)]
pub enum PolicyError {
    #[error("Policy not found: {0}")]
    NotFound(String),

    #[error("Invalid policy: {0}")]
    Invalid(String),

    #[error("Failed to read policy file {1}: {0}")]
    Io(std::io::Error, std::path::PathBuf),

    #[error("Failed to parse policy file: {0}")]
    Parse(#[from] toml::de::Error),
}
