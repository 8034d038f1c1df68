use crate::engine::audit::{AuditEvent, AuditSink};
use crate::engine::error::EngineError;
use crate::engine::step::StepError;
use crate::store::{
    FailureReason, StateStore, StepRecord, StepStatus, StoreError, WorkflowRecord,
    WorkflowStatus,
};
use serde_json::{Map, Value};
use std::sync::Arc;

/// A finished step, ready to be persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct StepResult {
    pub step_index: u32,
    pub step_name: String,
    pub started_at: i64,
    pub completed_at: i64,
    pub result: Value,
    pub context_updates: Map<String, Value>,
}

/// Persists step progress and the executor-driven terminal transitions.
#[derive(Clone)]
pub struct CheckpointManager {
    store: Arc<dyn StateStore>,
    audit: Arc<dyn AuditSink>,
    conflict_retry_limit: u32,
}

impl CheckpointManager {
    pub fn new(
        store: Arc<dyn StateStore>,
        audit: Arc<dyn AuditSink>,
        conflict_retry_limit: u32,
    ) -> Self {
        Self {
            store,
            audit,
            conflict_retry_limit: conflict_retry_limit.max(1),
        }
    }

    /// Appends `step` and advances the cursor. Re-checkpointing an applied index is a no-op
    /// that returns the stored record.
    pub fn checkpoint(
        &self,
        workflow_id: &str,
        step: &StepResult,
        expected_version: u64,
        now: i64,
    ) -> Result<WorkflowRecord, EngineError> {
        let mut expected = expected_version;
        let mut attempts = 0_u32;

        loop {
            let mut apply = |record: &mut WorkflowRecord| apply_step(record, step, now);
            match self.store.update(workflow_id, &mut apply, expected) {
                Ok(record) => {
                    self.audit.record(
                        &AuditEvent::new("step.checkpointed", workflow_id, now)
                            .with("step_index", step.step_index)
                            .with("step_name", step.step_name.clone())
                            .with("version", record.version),
                    );
                    return Ok(record);
                }
                Err(StoreError::AlreadyApplied { .. }) => {
                    return Ok(self.store.get(workflow_id)?);
                }
                Err(
                    StoreError::VersionConflict { .. }
                    | StoreError::InvalidState { .. },
                ) => {
                    let current = self.store.get(workflow_id)?;
                    if current.has_applied(step.step_index) {
                        return Ok(current);
                    }
                    if current.status != WorkflowStatus::Active
                        || current.current_step_index != step.step_index
                    {
                        return Err(EngineError::Superseded {
                            workflow_id: workflow_id.to_string(),
                            step_index: step.step_index,
                            reason: format!(
                                "workflow is {} at step {}",
                                current.status, current.current_step_index
                            ),
                        });
                    }
                    attempts += 1;
                    if attempts >= self.conflict_retry_limit {
                        return Err(EngineError::ContentionExhausted {
                            workflow_id: workflow_id.to_string(),
                            attempts,
                        });
                    }
                    expected = current.version;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    pub fn complete(
        &self,
        workflow_id: &str,
        expected_version: u64,
        now: i64,
    ) -> Result<WorkflowRecord, EngineError> {
        let record = self.store.update(
            workflow_id,
            &mut |record: &mut WorkflowRecord| {
                require_active(record)?;
                record.status = WorkflowStatus::Completed;
                record.next_attempt_at = None;
                record.resolved_wait = None;
                record.completed_at = Some(now);
                record.updated_at = now;
                Ok(())
            },
            expected_version,
        )?;
        self.audit.record(
            &AuditEvent::new("workflow.completed", workflow_id, now)
                .with("steps", record.steps_completed.len()),
        );
        Ok(record)
    }

    pub fn fail(
        &self,
        workflow_id: &str,
        reason: FailureReason,
        details: Option<String>,
        expected_version: u64,
        now: i64,
    ) -> Result<WorkflowRecord, EngineError> {
        let record = self.store.update(
            workflow_id,
            &mut |record: &mut WorkflowRecord| {
                require_active(record)?;
                record.mark_failed(reason, details.clone(), now);
                Ok(())
            },
            expected_version,
        )?;
        self.audit.record(
            &AuditEvent::new("workflow.failed", workflow_id, now)
                .with("reason", reason.as_str())
                .with("step_index", record.current_step_index)
                .with("details", details.unwrap_or_default()),
        );
        Ok(record)
    }

    pub fn schedule_retry(
        &self,
        workflow_id: &str,
        retry_at: i64,
        error: &StepError,
        expected_version: u64,
        now: i64,
    ) -> Result<WorkflowRecord, EngineError> {
        let record = self.store.update(
            workflow_id,
            &mut |record: &mut WorkflowRecord| {
                require_active(record)?;
                record.retry_count = record.retry_count.saturating_add(1);
                record.next_attempt_at = Some(retry_at);
                record.last_error = Some(error.to_string());
                record.updated_at = now;
                Ok(())
            },
            expected_version,
        )?;
        self.audit.record(
            &AuditEvent::new("step.retry_scheduled", workflow_id, now)
                .with("step_index", record.current_step_index)
                .with("retry_count", record.retry_count)
                .with("retry_at", retry_at)
                .with("error_kind", error.kind.as_str()),
        );
        Ok(record)
    }

    /// Parks an active workflow whose tick failed before any step outcome was persisted, so
    /// pollers move on to other records. `retry_count` is left untouched.
    pub fn defer(
        &self,
        workflow_id: &str,
        retry_at: i64,
        reason: &str,
        expected_version: u64,
        now: i64,
    ) -> Result<WorkflowRecord, EngineError> {
        let record = self.store.update(
            workflow_id,
            &mut |record: &mut WorkflowRecord| {
                require_active(record)?;
                record.next_attempt_at = Some(retry_at);
                record.last_error = Some(reason.to_string());
                record.updated_at = now;
                Ok(())
            },
            expected_version,
        )?;
        self.audit.record(
            &AuditEvent::new("workflow.deferred", workflow_id, now)
                .with("step_index", record.current_step_index)
                .with("retry_at", retry_at)
                .with("error", reason),
        );
        Ok(record)
    }
}

fn require_active(record: &WorkflowRecord) -> Result<(), StoreError> {
    if record.status == WorkflowStatus::Active {
        return Ok(());
    }
    Err(StoreError::InvalidState {
        workflow_id: record.workflow_id.to_string(),
        status: record.status,
        reason: "workflow is not active".to_string(),
    })
}

fn apply_step(record: &mut WorkflowRecord, step: &StepResult, now: i64) -> Result<(), StoreError> {
    if record.has_applied(step.step_index) {
        return Err(StoreError::AlreadyApplied {
            workflow_id: record.workflow_id.to_string(),
            step_index: step.step_index,
        });
    }
    require_active(record)?;
    if record.current_step_index != step.step_index {
        return Err(StoreError::InvalidState {
            workflow_id: record.workflow_id.to_string(),
            status: record.status,
            reason: format!(
                "cannot checkpoint step {} while cursor is at {}",
                step.step_index, record.current_step_index
            ),
        });
    }

    record.steps_completed.push(StepRecord {
        step_index: step.step_index,
        step_name: step.step_name.clone(),
        started_at: step.started_at,
        completed_at: step.completed_at.max(step.started_at),
        result: step.result.clone(),
        status: StepStatus::Success,
    });
    record.current_step_index = step.step_index.saturating_add(1);
    record.retry_count = 0;
    record.next_attempt_at = None;
    record.last_error = None;
    record.resolved_wait = None;
    for (key, value) in &step.context_updates {
        record.context.insert(key.clone(), value.clone());
    }
    record.updated_at = now;
    Ok(())
}
