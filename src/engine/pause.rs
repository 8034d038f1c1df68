use crate::engine::audit::{AuditEvent, AuditSink};
use crate::engine::error::EngineError;
use crate::engine::step::PendingActionSpec;
use crate::shared::ids::generate_resume_token;
use crate::store::{
    FailureReason, PendingAction, ResolvedWait, StateStore, StoreError, WorkflowRecord,
    WorkflowStatus,
};
use serde_json::Value;
use std::sync::Arc;

/// External event delivered against a pending action.
#[derive(Debug, Clone, PartialEq)]
pub enum ResumeOutcome {
    Approved(Value),
    Success(Value),
    Denied(String),
    Timeout,
}

impl ResumeOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResumeOutcome::Approved(_) => "approved",
            ResumeOutcome::Success(_) => "success",
            ResumeOutcome::Denied(_) => "denied",
            ResumeOutcome::Timeout => "timeout",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ResumeDelivery {
    /// The event moved the workflow out of `paused`.
    Applied(WorkflowRecord),
    /// The token was already consumed; the stored record is returned unchanged.
    Duplicate(WorkflowRecord),
    /// The event no longer matches the workflow and was dropped.
    Ignored { reason: String },
}

impl ResumeDelivery {
    pub fn record(&self) -> Option<&WorkflowRecord> {
        match self {
            ResumeDelivery::Applied(record) | ResumeDelivery::Duplicate(record) => Some(record),
            ResumeDelivery::Ignored { .. } => None,
        }
    }
}

#[derive(Clone)]
pub struct PauseController {
    store: Arc<dyn StateStore>,
    audit: Arc<dyn AuditSink>,
    default_timeout_seconds: u64,
    conflict_retry_limit: u32,
}

impl PauseController {
    pub fn new(
        store: Arc<dyn StateStore>,
        audit: Arc<dyn AuditSink>,
        default_timeout_seconds: u64,
        conflict_retry_limit: u32,
    ) -> Self {
        Self {
            store,
            audit,
            default_timeout_seconds,
            conflict_retry_limit: conflict_retry_limit.max(1),
        }
    }

    pub fn pause(
        &self,
        workflow_id: &str,
        action: &PendingActionSpec,
        expected_version: u64,
        now: i64,
    ) -> Result<WorkflowRecord, EngineError> {
        let resume_token = generate_resume_token().map_err(EngineError::Randomness)?;
        let timeout_seconds = action
            .timeout_seconds
            .unwrap_or(self.default_timeout_seconds);
        let timeout_at = now.saturating_add(i64::try_from(timeout_seconds).unwrap_or(i64::MAX));

        let record = self.store.update(
            workflow_id,
            &mut |record: &mut WorkflowRecord| {
                if record.status != WorkflowStatus::Active {
                    return Err(StoreError::InvalidState {
                        workflow_id: record.workflow_id.to_string(),
                        status: record.status,
                        reason: "only active workflows can pause".to_string(),
                    });
                }
                record.status = WorkflowStatus::Paused;
                record.pending_action = Some(PendingAction {
                    kind: action.kind,
                    step_index: record.current_step_index,
                    submitted_at: now,
                    timeout_at,
                    resume_token: resume_token.clone(),
                    details: action.details.clone(),
                });
                record.retry_count = 0;
                record.next_attempt_at = None;
                record.last_error = None;
                record.resolved_wait = None;
                record.updated_at = now;
                Ok(())
            },
            expected_version,
        )?;

        self.audit.record(
            &AuditEvent::new("workflow.paused", workflow_id, now)
                .with("step_index", record.current_step_index)
                .with("kind", action.kind.to_string())
                .with("timeout_at", timeout_at),
        );
        Ok(record)
    }

    /// Applies `outcome` if `resume_token` is the pending one. A consumed token is a no-op;
    /// any other mismatch is `StaleResume`.
    pub fn resume(
        &self,
        workflow_id: &str,
        resume_token: &str,
        outcome: ResumeOutcome,
        now: i64,
    ) -> Result<ResumeDelivery, EngineError> {
        let mut attempts = 0_u32;
        loop {
            let current = self.store.get(workflow_id)?;
            if current.has_consumed(resume_token) {
                return Ok(ResumeDelivery::Duplicate(current));
            }
            let pending = match (&current.status, &current.pending_action) {
                (WorkflowStatus::Paused, Some(pending)) => pending,
                _ => {
                    return Err(EngineError::StaleResume {
                        workflow_id: workflow_id.to_string(),
                        reason: format!("workflow is {}", current.status),
                    })
                }
            };
            if pending.resume_token != resume_token {
                return Err(EngineError::StaleResume {
                    workflow_id: workflow_id.to_string(),
                    reason: "resume token does not match the pending action".to_string(),
                });
            }

            let mut apply = |record: &mut WorkflowRecord| {
                apply_resume(record, resume_token, &outcome, now)
            };
            match self.store.update(workflow_id, &mut apply, current.version) {
                Ok(record) => {
                    self.record_resume(&record, &outcome, now);
                    return Ok(ResumeDelivery::Applied(record));
                }
                Err(StoreError::VersionConflict { .. } | StoreError::InvalidState { .. }) => {
                    attempts += 1;
                    if attempts >= self.conflict_retry_limit {
                        return Err(EngineError::ContentionExhausted {
                            workflow_id: workflow_id.to_string(),
                            attempts,
                        });
                    }
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// Fails an active or paused workflow with `cancelled`. Repeating a cancel returns the
    /// stored record.
    pub fn cancel(&self, workflow_id: &str, now: i64) -> Result<WorkflowRecord, EngineError> {
        let mut attempts = 0_u32;
        loop {
            let current = self.store.get(workflow_id)?;
            if current.failure_reason == Some(FailureReason::Cancelled) {
                return Ok(current);
            }
            if current.is_terminal() {
                return Err(StoreError::InvalidState {
                    workflow_id: workflow_id.to_string(),
                    status: current.status,
                    reason: "terminal workflows cannot be cancelled".to_string(),
                }
                .into());
            }

            let previous = current.status;
            let mut apply = |record: &mut WorkflowRecord| -> Result<(), StoreError> {
                record.mark_failed(FailureReason::Cancelled, None, now);
                Ok(())
            };
            match self.store.update(workflow_id, &mut apply, current.version) {
                Ok(record) => {
                    self.audit.record(
                        &AuditEvent::new("workflow.cancelled", workflow_id, now)
                            .with("previous_status", previous.as_str())
                            .with("step_index", record.current_step_index),
                    );
                    return Ok(record);
                }
                Err(StoreError::VersionConflict { .. } | StoreError::InvalidState { .. }) => {
                    attempts += 1;
                    if attempts >= self.conflict_retry_limit {
                        return Err(EngineError::ContentionExhausted {
                            workflow_id: workflow_id.to_string(),
                            attempts,
                        });
                    }
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    fn record_resume(&self, record: &WorkflowRecord, outcome: &ResumeOutcome, now: i64) {
        let event = match record.status {
            WorkflowStatus::Active => "workflow.resumed",
            _ => "workflow.failed",
        };
        let mut audit = AuditEvent::new(event, record.workflow_id.as_str(), now)
            .with("outcome", outcome.as_str())
            .with("step_index", record.current_step_index);
        if let Some(reason) = record.failure_reason {
            audit = audit.with("reason", reason.as_str());
        }
        self.audit.record(&audit);
    }
}

fn apply_resume(
    record: &mut WorkflowRecord,
    resume_token: &str,
    outcome: &ResumeOutcome,
    now: i64,
) -> Result<(), StoreError> {
    let matches = record.status == WorkflowStatus::Paused
        && record
            .pending_action
            .as_ref()
            .is_some_and(|pending| pending.resume_token == resume_token);
    let Some(pending) = record.pending_action.take().filter(|_| matches) else {
        return Err(StoreError::InvalidState {
            workflow_id: record.workflow_id.to_string(),
            status: record.status,
            reason: "pending action changed".to_string(),
        });
    };
    record.consumed_resume_tokens.push(pending.resume_token.clone());

    match outcome {
        ResumeOutcome::Approved(payload) | ResumeOutcome::Success(payload) => {
            record.status = WorkflowStatus::Active;
            record.resolved_wait = Some(ResolvedWait {
                step_index: pending.step_index,
                kind: pending.kind,
                resolved_at: now,
                payload: payload.clone(),
            });
            record.next_attempt_at = None;
            record.updated_at = now;
        }
        ResumeOutcome::Denied(reason) => {
            record.mark_failed(FailureReason::Denied, Some(reason.clone()), now);
        }
        ResumeOutcome::Timeout => {
            record.mark_failed(
                FailureReason::Timeout,
                Some(format!(
                    "{} for step {} expired at {}",
                    pending.kind, pending.step_index, pending.timeout_at
                )),
                now,
            );
        }
    }
    Ok(())
}
