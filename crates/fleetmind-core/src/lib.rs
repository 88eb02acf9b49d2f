//! Core types and infrastructure for FleetMind.
//!
//! FleetMind turns free-form natural language (emails, direct commands)
//! into structured, validated calls against a fleet-management HTTP API,
//! gated by human approval. This crate holds what every other crate
//! shares:
//!
//! - the domain data model (interpretations, reasoning steps, templates)
//! - the error taxonomy surfaced across crate boundaries
//! - the abstract LLM runtime interface
//! - the broadcast event bus the application shell wires together
//! - configuration defaults and environment overrides

pub mod config;
pub mod error;
pub mod eventbus;
pub mod interpretation;
pub mod llm;
pub mod reasoning;
pub mod template;
pub mod validation;

pub use error::{CoreError, ErrorKind};
pub use eventbus::{EventBus, FleetEvent};
pub use interpretation::{EntityKind, IntentTag, Interpretation};
pub use llm::{
    DownloadProgress, GenerateRequest, LlmRuntime, ModelIdentifier, ModelRecord, ServerEvent,
    ServerState, TokenChunk,
};
pub use reasoning::{ApiCallDraft, ReasoningResult, ReasoningStep};
pub use template::{ConfidenceBand, TemplateChoice, TemplateMetadata};
pub use validation::{Severity, ValidationFinding};
