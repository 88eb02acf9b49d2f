//! Approval lifecycle state machine and audit trail.
//!
//! ```text
//! Pending ──approve──► Approved
//! Pending ──edit──► Editing ──save/approve──► Approved (modified)
//! Pending ──regenerate(feedback)──► closed; caller re-runs the engine
//! Pending ──reject──► Rejected
//! Approved ──execute(ok|fail)──► Executed
//! ```
//!
//! The state machine is not re-entrant per interpretation: decisions
//! for one loaded interpretation are totally ordered through `&mut`.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use fleetmind_core::{CoreError, Interpretation, ValidationFinding};

use crate::rules::FieldValidator;

/// Audit ring capacity.
const AUDIT_CAPACITY: usize = 100;
/// Entries kept when the audit ring overflows.
const AUDIT_TRIM_TO: usize = 50;

/// What the user chose to do with a generated request.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalAction {
    Approve,
    EditApprove,
    Regenerate,
    Reject,
}

impl ApprovalAction {
    /// Action label.
    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalAction::Approve => "approve",
            ApprovalAction::EditApprove => "edit_approve",
            ApprovalAction::Regenerate => "regenerate",
            ApprovalAction::Reject => "reject",
        }
    }
}

/// States of one loaded interpretation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalState {
    /// Awaiting a decision.
    Pending,
    /// The request is being edited.
    Editing,
    /// Approved, ready to execute.
    Approved,
    /// Rejected by the user.
    Rejected,
    /// Executed against the fleet API.
    Executed {
        /// Whether execution succeeded.
        success: bool,
    },
}

/// Terminal record of one decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalDecision {
    /// The action taken.
    pub action: ApprovalAction,
    /// When the decision was taken.
    pub timestamp: DateTime<Utc>,
    /// Who took it.
    pub user_id: String,
    /// The original request object.
    pub original_request: serde_json::Value,
    /// The edited request, for edit-approve decisions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modified_request: Option<serde_json::Value>,
    /// User feedback, for regenerate/reject decisions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feedback: Option<String>,
}

/// Aggregate decision statistics.
#[derive(Debug, Clone, Default)]
pub struct ApprovalStats {
    /// Total decisions recorded.
    pub total: usize,
    /// Decisions per action label.
    pub by_action: HashMap<&'static str, usize>,
    /// Fraction of decisions that approved (plain or edited).
    pub approval_rate: f64,
}

struct Session {
    interpretation: Interpretation,
    state: ApprovalState,
    findings: Vec<ValidationFinding>,
    edited: bool,
}

/// Approval workflow over one interpretation at a time.
pub struct ApprovalFlow {
    validator: FieldValidator,
    session: Option<Session>,
    audit: VecDeque<ApprovalDecision>,
}

impl ApprovalFlow {
    /// Create a flow with the standard field rules.
    pub fn new() -> Self {
        Self::with_validator(FieldValidator::new())
    }

    /// Create a flow with a custom rule registry.
    pub fn with_validator(validator: FieldValidator) -> Self {
        Self {
            validator,
            session: None,
            audit: VecDeque::with_capacity(AUDIT_CAPACITY.min(64)),
        }
    }

    /// Load an interpretation; enters `Pending` and validates the
    /// request immediately.
    pub fn load(&mut self, interpretation: Interpretation) -> &[ValidationFinding] {
        let findings = self.validator.validate(&interpretation.request);
        tracing::info!(
            target: "fleetmind::approval",
            interpretation = %interpretation.id,
            findings = findings.len(),
            "loaded interpretation for approval"
        );
        self.session = Some(Session {
            interpretation,
            state: ApprovalState::Pending,
            findings,
            edited: false,
        });
        self.findings()
    }

    /// Current state, if an interpretation is loaded.
    pub fn state(&self) -> Option<ApprovalState> {
        self.session.as_ref().map(|s| s.state)
    }

    /// Current findings.
    pub fn findings(&self) -> &[ValidationFinding] {
        self.session.as_ref().map(|s| s.findings.as_slice()).unwrap_or(&[])
    }

    /// The loaded interpretation.
    pub fn interpretation(&self) -> Option<&Interpretation> {
        self.session.as_ref().map(|s| &s.interpretation)
    }

    /// Approve the current request.
    ///
    /// Blocked while any error-severity finding exists.
    pub fn approve(&mut self, user_id: &str) -> Result<(), CoreError> {
        let session = self.require_session()?;
        if !matches!(session.state, ApprovalState::Pending | ApprovalState::Editing) {
            return Err(CoreError::internal("interpretation is not awaiting approval"));
        }

        let errors: Vec<ValidationFinding> = session
            .findings
            .iter()
            .filter(|f| f.is_blocking())
            .cloned()
            .collect();
        if !errors.is_empty() {
            return Err(CoreError::ValidationBlocked { findings: errors });
        }

        let action = if session.edited {
            ApprovalAction::EditApprove
        } else {
            ApprovalAction::Approve
        };
        session.state = ApprovalState::Approved;

        let decision = ApprovalDecision {
            action,
            timestamp: Utc::now(),
            user_id: user_id.to_string(),
            original_request: session.interpretation.request.clone(),
            modified_request: session
                .edited
                .then(|| session.interpretation.request.clone()),
            feedback: None,
        };
        self.record(decision);
        Ok(())
    }

    /// Replace the request object and re-validate.
    ///
    /// Returns the new findings; the flow moves to `Editing` until the
    /// next `approve`.
    pub fn edit<F>(&mut self, mutator: F) -> Result<&[ValidationFinding], CoreError>
    where
        F: FnOnce(&mut serde_json::Value),
    {
        let session = self
            .session
            .as_mut()
            .ok_or_else(|| CoreError::internal("no interpretation loaded"))?;
        if !matches!(session.state, ApprovalState::Pending | ApprovalState::Editing) {
            return Err(CoreError::internal("interpretation is not editable"));
        }

        mutator(&mut session.interpretation.request);
        session.findings = self.validator.validate(&session.interpretation.request);
        session.edited = true;
        session.state = ApprovalState::Editing;
        Ok(self.findings())
    }

    /// Close the current approval for regeneration.
    ///
    /// Returns the input text the caller should re-submit to the
    /// reasoning engine: the original text plus the feedback.
    pub fn regenerate(&mut self, user_id: &str, feedback: &str) -> Result<String, CoreError> {
        let session = self.require_session()?;
        if !matches!(session.state, ApprovalState::Pending | ApprovalState::Editing) {
            return Err(CoreError::internal("interpretation is not awaiting approval"));
        }

        let retry_text = format!("{} {}", session.interpretation.input_text, feedback);
        let decision = ApprovalDecision {
            action: ApprovalAction::Regenerate,
            timestamp: Utc::now(),
            user_id: user_id.to_string(),
            original_request: session.interpretation.request.clone(),
            modified_request: None,
            feedback: Some(feedback.to_string()),
        };
        self.session = None;
        self.record(decision);
        Ok(retry_text)
    }

    /// Reject the current request. Feedback is optional.
    pub fn reject(&mut self, user_id: &str, feedback: Option<&str>) -> Result<(), CoreError> {
        let session = self.require_session()?;
        if !matches!(session.state, ApprovalState::Pending | ApprovalState::Editing) {
            return Err(CoreError::internal("interpretation is not awaiting approval"));
        }

        session.state = ApprovalState::Rejected;
        let decision = ApprovalDecision {
            action: ApprovalAction::Reject,
            timestamp: Utc::now(),
            user_id: user_id.to_string(),
            original_request: session.interpretation.request.clone(),
            modified_request: None,
            feedback: feedback.map(str::to_string),
        };
        self.record(decision);
        Ok(())
    }

    /// Record the execution outcome of an approved request.
    pub fn mark_executed(&mut self, success: bool) -> Result<(), CoreError> {
        let session = self.require_session()?;
        if session.state != ApprovalState::Approved {
            return Err(CoreError::internal("only approved requests execute"));
        }
        session.state = ApprovalState::Executed { success };
        Ok(())
    }

    fn require_session(&mut self) -> Result<&mut Session, CoreError> {
        self.session
            .as_mut()
            .ok_or_else(|| CoreError::internal("no interpretation loaded"))
    }

    fn record(&mut self, decision: ApprovalDecision) {
        if self.audit.len() >= AUDIT_CAPACITY {
            let excess = self.audit.len() - AUDIT_TRIM_TO + 1;
            self.audit.drain(..excess);
        }
        tracing::info!(
            target: "fleetmind::approval",
            action = decision.action.as_str(),
            user = %decision.user_id,
            "recorded approval decision"
        );
        self.audit.push_back(decision);
    }

    /// Snapshot of the audit trail, oldest first.
    pub fn audit_log(&self) -> Vec<ApprovalDecision> {
        self.audit.iter().cloned().collect()
    }

    /// Export the audit trail as a JSON array.
    pub fn export_audit_json(&self) -> Result<String, CoreError> {
        let log = self.audit_log();
        Ok(serde_json::to_string_pretty(&log)?)
    }

    /// Aggregate decision statistics.
    pub fn stats(&self) -> ApprovalStats {
        let mut stats = ApprovalStats {
            total: self.audit.len(),
            ..ApprovalStats::default()
        };

        let mut approvals = 0usize;
        for decision in &self.audit {
            *stats.by_action.entry(decision.action.as_str()).or_default() += 1;
            if matches!(
                decision.action,
                ApprovalAction::Approve | ApprovalAction::EditApprove
            ) {
                approvals += 1;
            }
        }
        if stats.total > 0 {
            stats.approval_rate = approvals as f64 / stats.total as f64;
        }
        stats
    }
}

impl Default for ApprovalFlow {
    fn default() -> Self {
        Self::new()
    }
}
