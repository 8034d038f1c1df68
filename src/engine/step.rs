use crate::engine::retry::StepErrorKind;
use crate::shared::ids::{to_hex, WorkflowId, WorkflowType};
use crate::store::{PendingActionKind, ResolvedWait};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::Arc;

/// What a step asks for when it cannot finish without an external event.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingActionSpec {
    pub kind: PendingActionKind,
    pub timeout_seconds: Option<u64>,
    pub details: Value,
}

impl PendingActionSpec {
    pub fn human_approval(details: Value) -> Self {
        Self {
            kind: PendingActionKind::HumanApproval,
            timeout_seconds: None,
            details,
        }
    }

    pub fn async_callback(details: Value) -> Self {
        Self {
            kind: PendingActionKind::AsyncCallback,
            timeout_seconds: None,
            details,
        }
    }

    pub fn with_timeout_seconds(mut self, timeout_seconds: u64) -> Self {
        self.timeout_seconds = Some(timeout_seconds);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepError {
    pub kind: StepErrorKind,
    pub detail: String,
}

impl StepError {
    pub fn new(kind: StepErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }

    pub fn transient(detail: impl Into<String>) -> Self {
        Self::new(StepErrorKind::Transient, detail)
    }

    pub fn timeout(detail: impl Into<String>) -> Self {
        Self::new(StepErrorKind::Timeout, detail)
    }

    pub fn rate_limited(detail: impl Into<String>) -> Self {
        Self::new(StepErrorKind::RateLimited, detail)
    }

    pub fn validation(detail: impl Into<String>) -> Self {
        Self::new(StepErrorKind::Validation, detail)
    }
}

impl std::fmt::Display for StepError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.detail)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    Success {
        result: Value,
        context_updates: Map<String, Value>,
    },
    RequiresWait(PendingActionSpec),
    RecoverableError(StepError),
    FatalError(StepError),
}

impl StepOutcome {
    pub fn success(result: Value) -> Self {
        Self::Success {
            result,
            context_updates: Map::new(),
        }
    }

    pub fn success_with_context(result: Value, context_updates: Map<String, Value>) -> Self {
        Self::Success {
            result,
            context_updates,
        }
    }
}

/// Everything a step handler sees for one attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct StepContext {
    pub workflow_id: WorkflowId,
    pub workflow_type: WorkflowType,
    pub step_index: u32,
    pub step_name: String,
    /// Zero for the first attempt, incremented per scheduled retry.
    pub attempt: u32,
    pub context: Map<String, Value>,
    pub resolved_wait: Option<ResolvedWait>,
    pub idempotency_key: String,
}

impl StepContext {
    /// Payload of the approved wait this step requested, if it is re-running after one.
    pub fn approval(&self) -> Option<&Value> {
        self.resolved_wait
            .as_ref()
            .filter(|wait| wait.step_index == self.step_index)
            .map(|wait| &wait.payload)
    }
}

pub trait StepHandler: Send + Sync {
    fn name(&self) -> &str;

    fn run(&self, context: &StepContext) -> StepOutcome;
}

/// Adapts a closure into a named `StepHandler`.
pub struct FnStep<F> {
    name: String,
    run: F,
}

impl<F> FnStep<F>
where
    F: Fn(&StepContext) -> StepOutcome + Send + Sync + 'static,
{
    pub fn new(name: impl Into<String>, run: F) -> Self {
        Self {
            name: name.into(),
            run,
        }
    }

    pub fn shared(name: impl Into<String>, run: F) -> Arc<dyn StepHandler> {
        Arc::new(Self::new(name, run))
    }
}

impl<F> StepHandler for FnStep<F>
where
    F: Fn(&StepContext) -> StepOutcome + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&self, context: &StepContext) -> StepOutcome {
        (self.run)(context)
    }
}

/// Ordered step lists keyed by workflow type.
#[derive(Clone, Default)]
pub struct WorkflowRegistry {
    workflows: BTreeMap<WorkflowType, Vec<Arc<dyn StepHandler>>>,
}

impl WorkflowRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, workflow_type: WorkflowType, steps: Vec<Arc<dyn StepHandler>>) {
        self.workflows.insert(workflow_type, steps);
    }

    pub fn with_workflow(
        mut self,
        workflow_type: &str,
        steps: Vec<Arc<dyn StepHandler>>,
    ) -> Result<Self, String> {
        self.register(WorkflowType::parse(workflow_type)?, steps);
        Ok(self)
    }

    pub fn steps_for(&self, workflow_type: &str) -> Option<&[Arc<dyn StepHandler>]> {
        self.workflows.get(workflow_type).map(Vec::as_slice)
    }

    pub fn contains(&self, workflow_type: &str) -> bool {
        self.workflows.contains_key(workflow_type)
    }

    pub fn workflow_types(&self) -> impl Iterator<Item = &WorkflowType> {
        self.workflows.keys()
    }
}

impl std::fmt::Debug for WorkflowRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut map = f.debug_map();
        for (workflow_type, steps) in &self.workflows {
            let names = steps.iter().map(|s| s.name()).collect::<Vec<_>>();
            map.entry(&workflow_type.as_str(), &names);
        }
        map.finish()
    }
}

/// Stable across retries and workers for the same step of the same workflow.
pub fn step_idempotency_key(workflow_id: &str, step_index: u32, step_name: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(workflow_id.as_bytes());
    hasher.update([0]);
    hasher.update(step_index.to_be_bytes());
    hasher.update([0]);
    hasher.update(step_name.as_bytes());
    to_hex(&hasher.finalize())
}
