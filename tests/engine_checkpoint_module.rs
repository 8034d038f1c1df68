use serde_json::{json, Map, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::tempdir;
use tether::engine::{
    AuditEvent, AuditSink, CheckpointManager, EngineError, StepError, StepResult,
};
use tether::shared::ids::{WorkflowId, WorkflowType};
use tether::store::{FailureReason, SqliteStateStore, StateStore, WorkflowRecord, WorkflowStatus};

#[derive(Default)]
struct RecordingAudit {
    events: Mutex<Vec<AuditEvent>>,
}

impl AuditSink for RecordingAudit {
    fn record(&self, event: &AuditEvent) {
        self.events.lock().expect("audit lock").push(event.clone());
    }
}

fn setup(
    root: &std::path::Path,
) -> (Arc<dyn StateStore>, Arc<RecordingAudit>, CheckpointManager) {
    let store: Arc<dyn StateStore> = Arc::new(
        SqliteStateStore::open(&root.join("workflows.db"), Duration::from_secs(5))
            .expect("open store"),
    );
    let audit = Arc::new(RecordingAudit::default());
    let manager = CheckpointManager::new(store.clone(), audit.clone(), 4);
    let record = WorkflowRecord::new(
        WorkflowId::parse("wf-1").expect("id"),
        WorkflowType::parse("billing").expect("type"),
        Map::new(),
        3,
        100,
    );
    store.create(&record).expect("create");
    (store, audit, manager)
}

fn step(index: u32, name: &str) -> StepResult {
    let mut context_updates = Map::new();
    context_updates.insert(format!("{name}_done"), Value::Bool(true));
    StepResult {
        step_index: index,
        step_name: name.to_string(),
        started_at: 100 + i64::from(index),
        completed_at: 101 + i64::from(index),
        result: json!({ "index": index }),
        context_updates,
    }
}

#[test]
fn checkpoint_module_appends_steps_in_order_and_audits() {
    let temp = tempdir().expect("tempdir");
    let (_store, audit, manager) = setup(temp.path());

    let first = manager
        .checkpoint("wf-1", &step(0, "invoice"), 0, 101)
        .expect("checkpoint 0");
    let second = manager
        .checkpoint("wf-1", &step(1, "charge"), first.version, 102)
        .expect("checkpoint 1");

    assert_eq!(second.current_step_index, 2);
    assert_eq!(second.steps_completed.len(), 2);
    assert_eq!(second.steps_completed[1].step_name, "charge");
    assert_eq!(second.context.get("invoice_done"), Some(&Value::Bool(true)));

    let events = audit.events.lock().expect("audit lock");
    assert_eq!(events.len(), 2);
    assert_eq!(events[1].event, "step.checkpointed");
    assert_eq!(events[1].field("step_name"), Some(&json!("charge")));
}

#[test]
fn checkpoint_module_reapplying_a_step_appends_nothing() {
    let temp = tempdir().expect("tempdir");
    let (store, _audit, manager) = setup(temp.path());

    let applied = manager
        .checkpoint("wf-1", &step(0, "invoice"), 0, 101)
        .expect("checkpoint");

    let current_version = manager
        .checkpoint("wf-1", &step(0, "invoice"), applied.version, 105)
        .expect("replay with current version");
    let stale_version = manager
        .checkpoint("wf-1", &step(0, "invoice"), 0, 106)
        .expect("replay with stale version");

    assert_eq!(current_version, applied);
    assert_eq!(stale_version, applied);
    assert_eq!(store.get("wf-1").expect("get").steps_completed.len(), 1);
}

#[test]
fn checkpoint_module_retries_against_unrelated_version_bumps() {
    let temp = tempdir().expect("tempdir");
    let (store, _audit, manager) = setup(temp.path());
    store
        .update(
            "wf-1",
            &mut |r: &mut WorkflowRecord| {
                r.context.insert("note".to_string(), json!("operator edit"));
                Ok(())
            },
            0,
        )
        .expect("concurrent edit");

    let record = manager
        .checkpoint("wf-1", &step(0, "invoice"), 0, 101)
        .expect("checkpoint after conflict");
    assert_eq!(record.version, 2);
    assert_eq!(record.steps_completed.len(), 1);
    assert_eq!(record.context.get("note"), Some(&json!("operator edit")));
}

#[test]
fn checkpoint_module_reports_superseded_when_workflow_moved_on() {
    let temp = tempdir().expect("tempdir");
    let (_store, _audit, manager) = setup(temp.path());
    manager
        .fail("wf-1", FailureReason::Cancelled, None, 0, 101)
        .expect("fail");

    let err = manager
        .checkpoint("wf-1", &step(0, "invoice"), 0, 102)
        .expect_err("superseded");
    assert!(matches!(err, EngineError::Superseded { step_index: 0, .. }));
}

#[test]
fn checkpoint_module_schedules_retries_and_completes() {
    let temp = tempdir().expect("tempdir");
    let (_store, audit, manager) = setup(temp.path());

    let retried = manager
        .schedule_retry("wf-1", 140, &StepError::rate_limited("429"), 0, 120)
        .expect("schedule retry");
    assert_eq!(retried.retry_count, 1);
    assert_eq!(retried.next_attempt_at, Some(140));
    assert_eq!(retried.last_error.as_deref(), Some("rate_limited: 429"));

    let advanced = manager
        .checkpoint("wf-1", &step(0, "invoice"), retried.version, 141)
        .expect("checkpoint");
    assert_eq!(advanced.retry_count, 0);
    assert!(advanced.next_attempt_at.is_none());
    assert!(advanced.last_error.is_none());

    let completed = manager
        .complete("wf-1", advanced.version, 150)
        .expect("complete");
    assert_eq!(completed.status, WorkflowStatus::Completed);
    assert_eq!(completed.completed_at, Some(150));

    let names = audit
        .events
        .lock()
        .expect("audit lock")
        .iter()
        .map(|e| e.event)
        .collect::<Vec<_>>();
    assert_eq!(
        names,
        vec!["step.retry_scheduled", "step.checkpointed", "workflow.completed"]
    );
}
