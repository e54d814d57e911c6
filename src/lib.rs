// Medroute - multi-agent orchestration core for a medical risk-assessment assistant

pub mod config;
pub mod types;
pub mod payload;
pub mod llm;
pub mod tools;
pub mod agents;
pub mod utils;

// Re-exports for convenience
pub use agents::{AssessmentOutcome, Orchestrator};
pub use config::Config;
pub use payload::{FieldValue, Payload};
// Note: Import specific items from types module instead of glob to avoid name conflicts
// e.g., use medroute::types::{LLMRequest, LLMResponse, AppResult};
