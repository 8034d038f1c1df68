use crate::shared::ids::{WorkflowId, WorkflowType};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Active,
    Paused,
    Completed,
    Failed,
}

impl WorkflowStatus {
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (WorkflowStatus::Active, WorkflowStatus::Active)
                | (WorkflowStatus::Active, WorkflowStatus::Paused)
                | (WorkflowStatus::Active, WorkflowStatus::Completed)
                | (WorkflowStatus::Active, WorkflowStatus::Failed)
                | (WorkflowStatus::Paused, WorkflowStatus::Active)
                | (WorkflowStatus::Paused, WorkflowStatus::Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, WorkflowStatus::Completed | WorkflowStatus::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            WorkflowStatus::Active => "active",
            WorkflowStatus::Paused => "paused",
            WorkflowStatus::Completed => "completed",
            WorkflowStatus::Failed => "failed",
        }
    }

    pub fn parse(raw: &str) -> Result<Self, String> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "active" => Ok(WorkflowStatus::Active),
            "paused" => Ok(WorkflowStatus::Paused),
            "completed" => Ok(WorkflowStatus::Completed),
            "failed" => Ok(WorkflowStatus::Failed),
            _ => Err("status must be one of: active, paused, completed, failed".to_string()),
        }
    }
}

impl std::fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    Timeout,
    Denied,
    Cancelled,
    MaxRetriesExhausted,
    StepFailed,
}

impl FailureReason {
    pub fn as_str(self) -> &'static str {
        match self {
            FailureReason::Timeout => "timeout",
            FailureReason::Denied => "denied",
            FailureReason::Cancelled => "cancelled",
            FailureReason::MaxRetriesExhausted => "max_retries_exhausted",
            FailureReason::StepFailed => "step_failed",
        }
    }
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Success,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepRecord {
    pub step_index: u32,
    pub step_name: String,
    pub started_at: i64,
    pub completed_at: i64,
    #[serde(default)]
    pub result: Value,
    pub status: StepStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PendingActionKind {
    HumanApproval,
    AsyncCallback,
}

impl std::fmt::Display for PendingActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PendingActionKind::HumanApproval => f.write_str("human_approval"),
            PendingActionKind::AsyncCallback => f.write_str("async_callback"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingAction {
    pub kind: PendingActionKind,
    pub step_index: u32,
    pub submitted_at: i64,
    pub timeout_at: i64,
    pub resume_token: String,
    #[serde(default)]
    pub details: Value,
}

/// Outcome of an approved wait, handed to the step that requested it when it re-runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedWait {
    pub step_index: u32,
    pub kind: PendingActionKind,
    pub resolved_at: i64,
    #[serde(default)]
    pub payload: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowRecord {
    pub workflow_id: WorkflowId,
    pub workflow_type: WorkflowType,
    pub status: WorkflowStatus,
    pub current_step_index: u32,
    #[serde(default)]
    pub steps_completed: Vec<StepRecord>,
    #[serde(default)]
    pub pending_action: Option<PendingAction>,
    #[serde(default)]
    pub context: Map<String, Value>,
    pub retry_count: u32,
    pub max_retries: u32,
    #[serde(default)]
    pub next_attempt_at: Option<i64>,
    #[serde(default)]
    pub last_error: Option<String>,
    #[serde(default)]
    pub resolved_wait: Option<ResolvedWait>,
    #[serde(default)]
    pub consumed_resume_tokens: Vec<String>,
    #[serde(default)]
    pub failure_reason: Option<FailureReason>,
    #[serde(default)]
    pub error_details: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
    #[serde(default)]
    pub completed_at: Option<i64>,
    pub version: u64,
}

impl WorkflowRecord {
    pub fn new(
        workflow_id: WorkflowId,
        workflow_type: WorkflowType,
        context: Map<String, Value>,
        max_retries: u32,
        now: i64,
    ) -> Self {
        Self {
            workflow_id,
            workflow_type,
            status: WorkflowStatus::Active,
            current_step_index: 0,
            steps_completed: Vec::new(),
            pending_action: None,
            context,
            retry_count: 0,
            max_retries,
            next_attempt_at: None,
            last_error: None,
            resolved_wait: None,
            consumed_resume_tokens: Vec::new(),
            failure_reason: None,
            error_details: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
            version: 0,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn has_applied(&self, step_index: u32) -> bool {
        self.steps_completed
            .iter()
            .any(|step| step.step_index == step_index)
    }

    pub fn has_consumed(&self, resume_token: &str) -> bool {
        self.consumed_resume_tokens
            .iter()
            .any(|token| token == resume_token)
    }

    /// Moves the record to `failed`, consuming any outstanding resume token.
    pub fn mark_failed(&mut self, reason: FailureReason, details: Option<String>, now: i64) {
        if let Some(pending) = self.pending_action.take() {
            self.consumed_resume_tokens.push(pending.resume_token);
        }
        self.status = WorkflowStatus::Failed;
        self.failure_reason = Some(reason);
        self.error_details = details;
        self.next_attempt_at = None;
        self.completed_at = Some(now);
        self.updated_at = now;
    }

    /// Checks the per-record invariants that must hold after every write.
    pub fn validate(&self) -> Result<(), String> {
        if self.pending_action.is_some() != (self.status == WorkflowStatus::Paused) {
            return Err(format!(
                "pending action must be present iff paused (status {})",
                self.status
            ));
        }
        if self.failure_reason.is_some() != (self.status == WorkflowStatus::Failed) {
            return Err(format!(
                "failure reason must be present iff failed (status {})",
                self.status
            ));
        }
        if self.completed_at.is_some() != self.status.is_terminal() {
            return Err(format!(
                "completed_at must be present iff terminal (status {})",
                self.status
            ));
        }
        if self.steps_completed.len() != self.current_step_index as usize {
            return Err(format!(
                "cursor {} does not match {} completed steps",
                self.current_step_index,
                self.steps_completed.len()
            ));
        }
        for (position, step) in self.steps_completed.iter().enumerate() {
            if step.step_index as usize != position {
                return Err(format!(
                    "step `{}` recorded at position {position} with index {}",
                    step.step_name, step.step_index
                ));
            }
            if step.started_at > step.completed_at {
                return Err(format!(
                    "step `{}` completed before it started",
                    step.step_name
                ));
            }
        }
        if let Some(pending) = &self.pending_action {
            if pending.step_index != self.current_step_index {
                return Err(format!(
                    "pending action targets step {} but cursor is {}",
                    pending.step_index, self.current_step_index
                ));
            }
        }
        Ok(())
    }

    /// Checks that `next` is a legal successor of `self`.
    pub fn validate_successor(&self, next: &WorkflowRecord) -> Result<(), String> {
        if next.workflow_id != self.workflow_id || next.workflow_type != self.workflow_type {
            return Err("workflow id and type are immutable".to_string());
        }
        if next.created_at != self.created_at {
            return Err("created_at is immutable".to_string());
        }
        if !self.status.can_transition_to(next.status) {
            return Err(format!(
                "status transition `{}` -> `{}` is invalid",
                self.status, next.status
            ));
        }
        if next.current_step_index < self.current_step_index {
            return Err(format!(
                "cursor moved backwards from {} to {}",
                self.current_step_index, next.current_step_index
            ));
        }
        if next.steps_completed.len() < self.steps_completed.len()
            || next.steps_completed[..self.steps_completed.len()] != self.steps_completed[..]
        {
            return Err("completed steps are append-only".to_string());
        }
        if next.consumed_resume_tokens.len() < self.consumed_resume_tokens.len() {
            return Err("consumed resume tokens are append-only".to_string());
        }
        next.validate()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchivedStep {
    pub step_index: u32,
    pub step_name: String,
    pub started_at: i64,
    pub completed_at: i64,
    pub status: StepStatus,
}

/// Compacted terminal record handed to cold storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchivedWorkflow {
    pub workflow_id: WorkflowId,
    pub workflow_type: WorkflowType,
    pub status: WorkflowStatus,
    #[serde(default)]
    pub failure_reason: Option<FailureReason>,
    #[serde(default)]
    pub error_details: Option<String>,
    #[serde(default)]
    pub steps: Vec<ArchivedStep>,
    #[serde(default)]
    pub context: Map<String, Value>,
    pub created_at: i64,
    #[serde(default)]
    pub completed_at: Option<i64>,
    pub archived_at: i64,
    pub version: u64,
}

impl ArchivedWorkflow {
    pub fn from_record(record: &WorkflowRecord, archived_at: i64) -> Self {
        Self {
            workflow_id: record.workflow_id.clone(),
            workflow_type: record.workflow_type.clone(),
            status: record.status,
            failure_reason: record.failure_reason,
            error_details: record.error_details.clone(),
            steps: record
                .steps_completed
                .iter()
                .map(|step| ArchivedStep {
                    step_index: step.step_index,
                    step_name: step.step_name.clone(),
                    started_at: step.started_at,
                    completed_at: step.completed_at,
                    status: step.status,
                })
                .collect(),
            context: record.context.clone(),
            created_at: record.created_at,
            completed_at: record.completed_at,
            archived_at,
            version: record.version,
        }
    }
}
