use crate::config::Settings;
use crate::engine::checkpoint::{CheckpointManager, StepResult};
use crate::engine::error::EngineError;
use crate::engine::pause::PauseController;
use crate::engine::retry::{RetryPolicy, StepErrorKind};
use crate::engine::step::{
    step_idempotency_key, StepContext, StepError, StepHandler, StepOutcome, WorkflowRegistry,
};
use crate::shared::time::elapsed_now;
use crate::store::{FailureReason, StateStore, StoreError, WorkflowRecord, WorkflowStatus};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    Completed,
    Paused { resume_token: String, timeout_at: i64 },
    RetryScheduled { retry_at: i64 },
    Failed { reason: FailureReason },
    /// The workflow is not active; nothing ran.
    Idle { status: WorkflowStatus },
    /// Another writer moved the workflow first.
    Yielded,
    /// The per-tick step budget ran out with the workflow still active.
    Progressed { steps_run: u32 },
}

/// Drives one workflow forward from its persisted cursor.
#[derive(Clone)]
pub struct WorkflowExecutor {
    store: Arc<dyn StateStore>,
    registry: Arc<WorkflowRegistry>,
    checkpoints: CheckpointManager,
    pauses: PauseController,
    policy: RetryPolicy,
    settings: Arc<Settings>,
}

impl WorkflowExecutor {
    pub fn new(
        store: Arc<dyn StateStore>,
        registry: Arc<WorkflowRegistry>,
        checkpoints: CheckpointManager,
        pauses: PauseController,
        settings: Arc<Settings>,
    ) -> Self {
        Self {
            store,
            registry,
            checkpoints,
            pauses,
            policy: RetryPolicy::from_config(&settings.retry),
            settings,
        }
    }

    pub fn tick(&self, workflow_id: &str, now: i64) -> Result<TickOutcome, EngineError> {
        let mut record = self.store.get(workflow_id)?;
        if record.status != WorkflowStatus::Active {
            return Ok(TickOutcome::Idle {
                status: record.status,
            });
        }
        if let Some(retry_at) = record.next_attempt_at.filter(|at| *at > now) {
            return Ok(TickOutcome::RetryScheduled { retry_at });
        }

        let steps = self
            .registry
            .steps_for(record.workflow_type.as_str())
            .ok_or_else(|| EngineError::UnknownWorkflowType {
                workflow_type: record.workflow_type.to_string(),
            })?;
        let limits = self
            .settings
            .resolve_execution_limits(record.workflow_type.as_str());
        let max_steps = self.settings.execution.max_steps_per_tick.max(1);
        let clock = Instant::now();
        let mut steps_run = 0_u32;

        loop {
            let Some(handler) = steps.get(record.current_step_index as usize) else {
                let completed_at = elapsed_now(now, clock);
                return settle(
                    self.checkpoints
                        .complete(workflow_id, record.version, completed_at)
                        .map(|_| TickOutcome::Completed),
                );
            };
            if steps_run >= max_steps {
                return Ok(TickOutcome::Progressed { steps_run });
            }

            let started_at = elapsed_now(now, clock);
            let context = step_context(&record, handler.name());
            let outcome = run_step_with_timeout(Arc::clone(handler), context, limits.step_timeout);
            let finished_at = elapsed_now(now, clock);

            match outcome {
                StepOutcome::Success {
                    result,
                    context_updates,
                } => {
                    let step = StepResult {
                        step_index: record.current_step_index,
                        step_name: handler.name().to_string(),
                        started_at,
                        completed_at: finished_at,
                        result,
                        context_updates,
                    };
                    match self
                        .checkpoints
                        .checkpoint(workflow_id, &step, record.version, finished_at)
                    {
                        Ok(next) => {
                            record = next;
                            steps_run += 1;
                            if record.status != WorkflowStatus::Active {
                                return Ok(TickOutcome::Idle {
                                    status: record.status,
                                });
                            }
                        }
                        Err(err) => return settle(Err(err)),
                    }
                }
                StepOutcome::RequiresWait(action) => {
                    return settle(
                        self.pauses
                            .pause(workflow_id, &action, record.version, finished_at)
                            .map(|paused| match paused.pending_action {
                                Some(pending) => TickOutcome::Paused {
                                    resume_token: pending.resume_token,
                                    timeout_at: pending.timeout_at,
                                },
                                None => TickOutcome::Idle {
                                    status: paused.status,
                                },
                            }),
                    );
                }
                StepOutcome::RecoverableError(error) => {
                    return settle(self.handle_recoverable(&record, &error, finished_at));
                }
                StepOutcome::FatalError(error) => {
                    return settle(
                        self.checkpoints
                            .fail(
                                workflow_id,
                                FailureReason::StepFailed,
                                Some(describe_failure(&record, handler.name(), &error)),
                                record.version,
                                finished_at,
                            )
                            .map(|_| TickOutcome::Failed {
                                reason: FailureReason::StepFailed,
                            }),
                    );
                }
            }
        }
    }

    fn handle_recoverable(
        &self,
        record: &WorkflowRecord,
        error: &StepError,
        now: i64,
    ) -> Result<TickOutcome, EngineError> {
        let workflow_id = record.workflow_id.as_str();
        if self
            .policy
            .should_retry(record.retry_count, record.max_retries, error.kind)
        {
            let delay = self.policy.next_retry_delay(record.retry_count);
            let retry_at = now.saturating_add(i64::try_from(delay.as_secs()).unwrap_or(i64::MAX));
            self.checkpoints
                .schedule_retry(workflow_id, retry_at, error, record.version, now)?;
            return Ok(TickOutcome::RetryScheduled { retry_at });
        }

        let reason = if error.kind.is_retryable() {
            FailureReason::MaxRetriesExhausted
        } else {
            FailureReason::StepFailed
        };
        let step_name = self
            .registry
            .steps_for(record.workflow_type.as_str())
            .and_then(|steps| steps.get(record.current_step_index as usize))
            .map(|handler| handler.name().to_string())
            .unwrap_or_default();
        self.checkpoints.fail(
            workflow_id,
            reason,
            Some(describe_failure(record, &step_name, error)),
            record.version,
            now,
        )?;
        Ok(TickOutcome::Failed { reason })
    }
}

/// Maps a lost version race into `Yielded`; everything else passes through.
fn settle(result: Result<TickOutcome, EngineError>) -> Result<TickOutcome, EngineError> {
    match result {
        Err(EngineError::Store(
            StoreError::VersionConflict { .. } | StoreError::InvalidState { .. },
        ))
        | Err(EngineError::Superseded { .. }) => Ok(TickOutcome::Yielded),
        other => other,
    }
}

fn step_context(record: &WorkflowRecord, step_name: &str) -> StepContext {
    StepContext {
        workflow_id: record.workflow_id.clone(),
        workflow_type: record.workflow_type.clone(),
        step_index: record.current_step_index,
        step_name: step_name.to_string(),
        attempt: record.retry_count,
        context: record.context.clone(),
        resolved_wait: record
            .resolved_wait
            .clone()
            .filter(|wait| wait.step_index == record.current_step_index),
        idempotency_key: step_idempotency_key(
            record.workflow_id.as_str(),
            record.current_step_index,
            step_name,
        ),
    }
}

fn describe_failure(record: &WorkflowRecord, step_name: &str, error: &StepError) -> String {
    format!(
        "step {} `{}` failed after {} attempt(s): {}",
        record.current_step_index,
        step_name,
        record.retry_count.saturating_add(1),
        error
    )
}

/// Runs `handler` on its own thread. A handler that overruns `timeout` is abandoned and
/// reported as a recoverable timeout; a handler that panics is fatal.
pub fn run_step_with_timeout(
    handler: Arc<dyn StepHandler>,
    context: StepContext,
    timeout: Duration,
) -> StepOutcome {
    let step_name = context.step_name.clone();
    let (tx, rx) = mpsc::channel::<StepOutcome>();
    let spawned = thread::Builder::new()
        .name(format!("step-{}", context.step_index))
        .spawn(move || {
            let _ = tx.send(handler.run(&context));
        });
    if let Err(err) = spawned {
        return StepOutcome::RecoverableError(StepError::transient(format!(
            "failed to start step `{step_name}`: {err}"
        )));
    }

    match rx.recv_timeout(timeout) {
        Ok(outcome) => outcome,
        Err(RecvTimeoutError::Timeout) => StepOutcome::RecoverableError(StepError::timeout(
            format!("step `{step_name}` exceeded {}ms", timeout.as_millis()),
        )),
        Err(RecvTimeoutError::Disconnected) => StepOutcome::FatalError(StepError::new(
            StepErrorKind::Panicked,
            format!("step `{step_name}` panicked"),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::step::FnStep;
    use crate::shared::ids::{WorkflowId, WorkflowType};
    use serde_json::{json, Map};

    fn context() -> StepContext {
        StepContext {
            workflow_id: WorkflowId::parse("wf-1").expect("id"),
            workflow_type: WorkflowType::parse("demo").expect("type"),
            step_index: 0,
            step_name: "only".to_string(),
            attempt: 0,
            context: Map::new(),
            resolved_wait: None,
            idempotency_key: String::new(),
        }
    }

    #[test]
    fn fast_steps_return_their_outcome() {
        let handler = FnStep::shared("only", |_: &StepContext| StepOutcome::success(json!(1)));
        let outcome = run_step_with_timeout(handler, context(), Duration::from_secs(5));
        assert_eq!(outcome, StepOutcome::success(json!(1)));
    }

    #[test]
    fn slow_steps_time_out_as_recoverable() {
        let handler = FnStep::shared("only", |_: &StepContext| {
            thread::sleep(Duration::from_millis(500));
            StepOutcome::success(json!(1))
        });
        let outcome = run_step_with_timeout(handler, context(), Duration::from_millis(20));
        match outcome {
            StepOutcome::RecoverableError(error) => {
                assert_eq!(error.kind, StepErrorKind::Timeout)
            }
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[test]
    fn panicking_steps_are_fatal() {
        let handler = FnStep::shared("only", |_: &StepContext| panic!("boom"));
        let outcome = run_step_with_timeout(handler, context(), Duration::from_secs(5));
        match outcome {
            StepOutcome::FatalError(error) => {
                assert_eq!(error.kind, StepErrorKind::Panicked);
                assert_eq!(error.to_string(), "panicked: step `only` panicked");
            }
            other => panic!("expected fatal panic, got {other:?}"),
        }
    }
}
