//! Request validation, approval workflow, and execution.
//!
//! A filled request passes through the [`FieldValidator`] (per-field
//! rules plus cross-field checks), then the [`ApprovalFlow`] state
//! machine gates it behind a human decision and records every terminal
//! decision in an audit ring. Approved requests go to the
//! [`FleetApiClient`] for execution.

pub mod executor;
pub mod rules;
pub mod state;

pub use executor::{AuthCredentials, ExecutionOutcome, FleetApiClient};
pub use rules::{FieldRule, FieldType, FieldValidator};
pub use state::{ApprovalAction, ApprovalDecision, ApprovalFlow, ApprovalState, ApprovalStats};
