// External tool clients: prediction models and report generation

pub mod prediction;
pub mod report;

pub use prediction::*;
pub use report::*;
