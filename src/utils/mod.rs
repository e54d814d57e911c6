// Utility functions

pub mod json_extract;

pub use json_extract::*;
