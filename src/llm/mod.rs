// LLM abstraction layer

pub mod provider;
pub mod openai;
pub mod groq;
pub mod gemini;

pub use provider::*;
pub use crate::types::*;
