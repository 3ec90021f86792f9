// CLI command implementations

pub mod analyze;
pub mod export;
pub mod stats;
