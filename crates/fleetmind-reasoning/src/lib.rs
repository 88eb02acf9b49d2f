//! Streaming chain-of-thought pipeline.
//!
//! The model is instructed to answer with a JSON envelope containing an
//! ordered `chain_of_thought` and a `summary`. This crate owns the path
//! from input text to a validated [`fleetmind_core::ReasoningResult`]:
//!
//! - [`envelope`] — tolerant parsing of (possibly partial) model output
//! - [`stream`] — incremental parsing of a live token stream with paced
//!   UI updates
//! - [`prompt`] — deterministic prompt construction and the pure entity
//!   validators
//! - [`engine`] — request orchestration, confidence scoring, history

pub mod engine;
pub mod envelope;
pub mod prompt;
pub mod stream;

pub use engine::{EngineConfig, EngineState, ReasoningEngine, ResultQuery, SubmitOptions};
pub use envelope::{Envelope, ModelOutput, Summary};
pub use prompt::PromptBuilder;
pub use stream::{StreamOutcome, StreamProcessor, UiUpdate};
