//! Backend provider implementations

pub mod azure;

// Re-export for convenience
pub use azure::{AzureClient, AzureExecutor};
