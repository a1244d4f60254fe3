//! Shared types for the fabriq workspace.
//!
//! Holds the pieces both the daemon and the CLI need: the ask-endpoint wire
//! types, the pipeline error taxonomy, and the LLM client layer.

pub mod error;
pub mod llm;
pub mod types;

pub use error::AskError;
pub use types::{AnswerRole, AskRequest, AskResponse, PlanSource};
