use crate::config::Settings;
use crate::engine::audit::{AuditEvent, AuditSink, JsonlAuditLog};
use crate::engine::checkpoint::CheckpointManager;
use crate::engine::error::EngineError;
use crate::engine::executor::{TickOutcome, WorkflowExecutor};
use crate::engine::pause::{PauseController, ResumeDelivery, ResumeOutcome};
use crate::engine::step::WorkflowRegistry;
use crate::engine::sweep::{SweepReport, Sweeper};
use crate::runtime::StatePaths;
use crate::shared::ids::{generate_workflow_id, WorkflowId, WorkflowType};
use crate::store::{
    ArchiveSink, ArchivedWorkflow, FileArchiveSink, SqliteStateStore, StateStore, StoreError,
    WorkflowRecord, WorkflowStatus,
};
use serde_json::{Map, Value};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

const ID_ALLOCATION_ATTEMPTS: usize = 16;

/// Entry point tying the store, executor, pause controller and sweeps together.
#[derive(Clone)]
pub struct WorkflowEngine {
    store: Arc<dyn StateStore>,
    archive: Arc<dyn ArchiveSink>,
    audit: Arc<dyn AuditSink>,
    registry: Arc<WorkflowRegistry>,
    settings: Arc<Settings>,
    checkpoints: CheckpointManager,
    executor: WorkflowExecutor,
    pauses: PauseController,
    sweeper: Sweeper,
}

impl WorkflowEngine {
    /// Opens the SQLite store, file archive and audit log under `state_root`.
    pub fn open(
        state_root: &Path,
        settings: Settings,
        registry: WorkflowRegistry,
    ) -> Result<Self, EngineError> {
        settings.validate()?;
        let store = SqliteStateStore::open(
            &settings.db_path(state_root),
            Duration::from_millis(settings.store.busy_timeout_ms),
        )?;
        let archive = FileArchiveSink::new(settings.archive_dir(state_root));
        let audit = JsonlAuditLog::new(StatePaths::new(state_root).audit_log_path());
        Ok(Self::with_components(
            Arc::new(store),
            Arc::new(archive),
            Arc::new(audit),
            settings,
            registry,
        ))
    }

    pub fn with_components(
        store: Arc<dyn StateStore>,
        archive: Arc<dyn ArchiveSink>,
        audit: Arc<dyn AuditSink>,
        settings: Settings,
        registry: WorkflowRegistry,
    ) -> Self {
        let settings = Arc::new(settings);
        let registry = Arc::new(registry);
        let conflict_limit = settings.execution.conflict_retry_limit;
        let checkpoints = CheckpointManager::new(store.clone(), audit.clone(), conflict_limit);
        let pauses = PauseController::new(
            store.clone(),
            audit.clone(),
            settings.pause.default_timeout_seconds,
            conflict_limit,
        );
        let executor = WorkflowExecutor::new(
            store.clone(),
            registry.clone(),
            checkpoints.clone(),
            pauses.clone(),
            settings.clone(),
        );
        let sweeper = Sweeper::new(
            store.clone(),
            pauses.clone(),
            archive.clone(),
            audit.clone(),
            settings.retention.archive_after_seconds,
        );
        Self {
            store,
            archive,
            audit,
            registry,
            settings,
            checkpoints,
            executor,
            pauses,
            sweeper,
        }
    }

    pub fn store(&self) -> &Arc<dyn StateStore> {
        &self.store
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn registry(&self) -> &WorkflowRegistry {
        &self.registry
    }

    /// Creates a workflow under a freshly generated id.
    pub fn start_workflow(
        &self,
        workflow_type: &str,
        context: Map<String, Value>,
        now: i64,
    ) -> Result<WorkflowRecord, EngineError> {
        for _ in 0..ID_ALLOCATION_ATTEMPTS {
            let workflow_id = generate_workflow_id(now).map_err(EngineError::Randomness)?;
            let started = self.start_workflow_with_id(
                workflow_id.as_str(),
                workflow_type,
                context.clone(),
                now,
            );
            match started {
                Err(EngineError::Store(StoreError::DuplicateId { .. })) => continue,
                other => return other,
            }
        }
        Err(EngineError::Randomness(format!(
            "failed to allocate a unique workflow id after {ID_ALLOCATION_ATTEMPTS} attempts"
        )))
    }

    pub fn start_workflow_with_id(
        &self,
        workflow_id: &str,
        workflow_type: &str,
        context: Map<String, Value>,
        now: i64,
    ) -> Result<WorkflowRecord, EngineError> {
        let workflow_id = WorkflowId::parse(workflow_id).map_err(EngineError::InvalidId)?;
        let workflow_type = WorkflowType::parse(workflow_type).map_err(EngineError::InvalidId)?;
        if !self.registry.contains(workflow_type.as_str()) {
            return Err(EngineError::UnknownWorkflowType {
                workflow_type: workflow_type.to_string(),
            });
        }

        let limits = self
            .settings
            .resolve_execution_limits(workflow_type.as_str());
        let record =
            WorkflowRecord::new(workflow_id, workflow_type, context, limits.max_retries, now);
        self.store.create(&record)?;
        self.audit.record(
            &AuditEvent::new("workflow.started", record.workflow_id.as_str(), now)
                .with("workflow_type", record.workflow_type.as_str())
                .with("max_retries", record.max_retries),
        );
        Ok(record)
    }

    pub fn get(&self, workflow_id: &str) -> Result<WorkflowRecord, EngineError> {
        Ok(self.store.get(workflow_id)?)
    }

    pub fn tick(&self, workflow_id: &str, now: i64) -> Result<TickOutcome, EngineError> {
        self.executor.tick(workflow_id, now)
    }

    /// Delivers an external event. Events that no longer match the workflow come back as
    /// `ResumeDelivery::Ignored` instead of an error.
    pub fn resume(
        &self,
        workflow_id: &str,
        resume_token: &str,
        outcome: ResumeOutcome,
        now: i64,
    ) -> Result<ResumeDelivery, EngineError> {
        let outcome_name = outcome.as_str();
        match self.pauses.resume(workflow_id, resume_token, outcome, now) {
            Err(EngineError::StaleResume { reason, .. }) => {
                self.audit.record(
                    &AuditEvent::new("resume.ignored", workflow_id, now)
                        .with("outcome", outcome_name)
                        .with("reason", reason.clone()),
                );
                Ok(ResumeDelivery::Ignored { reason })
            }
            other => other,
        }
    }

    /// Parks a workflow whose tick returned `error` so it stops heading the runnable queue.
    /// Unknown workflow types wait `retry.max_delay_seconds`, anything else
    /// `retry.base_delay_seconds`. Returns `None` when another writer already moved the record.
    pub fn defer_failed_tick(
        &self,
        workflow_id: &str,
        error: &EngineError,
        now: i64,
    ) -> Result<Option<WorkflowRecord>, EngineError> {
        let record = self.store.get(workflow_id)?;
        if record.status != WorkflowStatus::Active {
            return Ok(None);
        }
        let delay_seconds = match error {
            EngineError::UnknownWorkflowType { .. } => self.settings.retry.max_delay_seconds,
            _ => self.settings.retry.base_delay_seconds,
        };
        let retry_at = now.saturating_add(i64::try_from(delay_seconds).unwrap_or(i64::MAX));
        match self
            .checkpoints
            .defer(workflow_id, retry_at, &error.to_string(), record.version, now)
        {
            Ok(record) => Ok(Some(record)),
            Err(EngineError::Store(
                StoreError::VersionConflict { .. } | StoreError::InvalidState { .. },
            )) => Ok(None),
            Err(err) => Err(err),
        }
    }

    pub fn cancel(&self, workflow_id: &str, now: i64) -> Result<WorkflowRecord, EngineError> {
        self.pauses.cancel(workflow_id, now)
    }

    pub fn sweep_timeouts(&self, now: i64) -> Result<SweepReport, EngineError> {
        self.sweeper.sweep_timeouts(now)
    }

    pub fn sweep_retention(&self, now: i64) -> Result<SweepReport, EngineError> {
        self.sweeper.sweep_retention(now)
    }

    pub fn archive(&self, workflow_id: &str, now: i64) -> Result<ArchivedWorkflow, EngineError> {
        let archived = self.store.archive(workflow_id, self.archive.as_ref(), now)?;
        self.audit.record(
            &AuditEvent::new("workflow.archived", workflow_id, now)
                .with("status", archived.status.as_str())
                .with("steps", archived.steps.len()),
        );
        Ok(archived)
    }

    pub fn runnable(&self, now: i64, limit: usize) -> Result<Vec<WorkflowId>, EngineError> {
        Ok(self.store.query_runnable(now, limit)?)
    }

    pub fn list(
        &self,
        status: Option<WorkflowStatus>,
        limit: usize,
    ) -> Result<Vec<WorkflowRecord>, EngineError> {
        Ok(self.store.list(status, limit)?)
    }
}
