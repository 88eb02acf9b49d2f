//! Managed local LLM runtime.
//!
//! This crate makes an LLM inference endpoint available to the rest of
//! FleetMind regardless of whether the model runtime is already running,
//! not yet running, or not installed:
//!
//! - [`discovery`] locates the runtime binary across platforms
//! - [`spawn`] starts it detached from the console / in its own process
//!   group so the whole tree can be terminated as a unit
//! - [`OllamaClient`] speaks the runtime's native HTTP API
//! - [`ServerManager`] ties it together: lifecycle state machine,
//!   background health monitoring, on-demand model downloads with
//!   progress events

pub mod client;
pub mod discovery;
pub mod manager;
pub mod spawn;

pub use client::OllamaClient;
pub use manager::{ServerManager, ServerStats};
pub use spawn::SpawnOptions;
