use serde_json::{json, Map};
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;
use tether::engine::{
    EngineError, NoopAuditSink, PauseController, PendingActionSpec, ResumeDelivery,
    ResumeOutcome,
};
use tether::shared::ids::{WorkflowId, WorkflowType};
use tether::store::{
    FailureReason, PendingActionKind, SqliteStateStore, StateStore, StoreError, WorkflowRecord,
    WorkflowStatus,
};

fn setup(root: &std::path::Path) -> (Arc<dyn StateStore>, PauseController) {
    let store: Arc<dyn StateStore> = Arc::new(
        SqliteStateStore::open(&root.join("workflows.db"), Duration::from_secs(5))
            .expect("open store"),
    );
    let controller = PauseController::new(store.clone(), Arc::new(NoopAuditSink), 900, 8);
    (store, controller)
}

fn create(store: &Arc<dyn StateStore>, id: &str) -> WorkflowRecord {
    let record = WorkflowRecord::new(
        WorkflowId::parse(id).expect("id"),
        WorkflowType::parse("review").expect("type"),
        Map::new(),
        3,
        100,
    );
    store.create(&record).expect("create");
    record
}

#[test]
fn pause_module_stores_pending_action_with_default_timeout() {
    let temp = tempdir().expect("tempdir");
    let (store, controller) = setup(temp.path());
    create(&store, "wf-1");

    let paused = controller
        .pause(
            "wf-1",
            &PendingActionSpec::async_callback(json!({ "job": 7 })),
            0,
            200,
        )
        .expect("pause");
    assert_eq!(paused.status, WorkflowStatus::Paused);
    assert_eq!(paused.version, 1);
    let pending = paused.pending_action.expect("pending");
    assert_eq!(pending.kind, PendingActionKind::AsyncCallback);
    assert_eq!(pending.timeout_at, 1_100);
    assert_eq!(pending.resume_token.len(), 32);

    let err = controller
        .pause("wf-1", &PendingActionSpec::human_approval(json!({})), 0, 201)
        .expect_err("stale version");
    assert!(err.is_version_conflict());
}

#[test]
fn pause_module_duplicate_resume_is_a_single_transition() {
    let temp = tempdir().expect("tempdir");
    let (store, controller) = setup(temp.path());
    create(&store, "wf-1");
    let paused = controller
        .pause(
            "wf-1",
            &PendingActionSpec::human_approval(json!({})).with_timeout_seconds(60),
            0,
            200,
        )
        .expect("pause");
    let token = paused.pending_action.expect("pending").resume_token;

    let first = controller
        .resume("wf-1", &token, ResumeOutcome::Success(json!({ "ok": true })), 210)
        .expect("first resume");
    let applied = match first {
        ResumeDelivery::Applied(record) => record,
        other => panic!("expected applied, got {other:?}"),
    };
    assert_eq!(applied.status, WorkflowStatus::Active);

    let second = controller
        .resume("wf-1", &token, ResumeOutcome::Success(json!({ "ok": true })), 220)
        .expect("second resume");
    match second {
        ResumeDelivery::Duplicate(record) => assert_eq!(record, applied),
        other => panic!("expected duplicate, got {other:?}"),
    }
    assert_eq!(store.get("wf-1").expect("get").version, applied.version);
}

#[test]
fn pause_module_rejects_mismatched_tokens_and_unpaused_workflows() {
    let temp = tempdir().expect("tempdir");
    let (store, controller) = setup(temp.path());
    create(&store, "wf-1");

    let err = controller
        .resume("wf-1", "nope", ResumeOutcome::Timeout, 150)
        .expect_err("not paused");
    assert!(matches!(err, EngineError::StaleResume { .. }));

    controller
        .pause("wf-1", &PendingActionSpec::human_approval(json!({})), 0, 200)
        .expect("pause");
    let err = controller
        .resume("wf-1", "wrong-token", ResumeOutcome::Approved(json!({})), 210)
        .expect_err("wrong token");
    assert!(matches!(err, EngineError::StaleResume { .. }));
    assert_eq!(
        store.get("wf-1").expect("get").status,
        WorkflowStatus::Paused
    );
}

#[test]
fn pause_module_cancel_is_idempotent_and_preempts_resume() {
    let temp = tempdir().expect("tempdir");
    let (store, controller) = setup(temp.path());
    create(&store, "wf-1");
    let paused = controller
        .pause("wf-1", &PendingActionSpec::human_approval(json!({})), 0, 200)
        .expect("pause");
    let token = paused.pending_action.expect("pending").resume_token;

    let cancelled = controller.cancel("wf-1", 250).expect("cancel");
    assert_eq!(cancelled.status, WorkflowStatus::Failed);
    assert_eq!(cancelled.failure_reason, Some(FailureReason::Cancelled));
    assert!(cancelled.has_consumed(&token));

    let again = controller.cancel("wf-1", 260).expect("cancel again");
    assert_eq!(again, cancelled);

    let late = controller
        .resume("wf-1", &token, ResumeOutcome::Approved(json!({})), 270)
        .expect("late resume");
    assert!(matches!(late, ResumeDelivery::Duplicate(_)));
    assert_eq!(
        store.get("wf-1").expect("get").failure_reason,
        Some(FailureReason::Cancelled)
    );
}

#[test]
fn pause_module_cancel_rejects_other_terminal_states() {
    let temp = tempdir().expect("tempdir");
    let (store, controller) = setup(temp.path());
    create(&store, "wf-1");
    store
        .update(
            "wf-1",
            &mut |r: &mut WorkflowRecord| {
                r.status = WorkflowStatus::Completed;
                r.completed_at = Some(300);
                Ok(())
            },
            0,
        )
        .expect("complete");

    let err = controller.cancel("wf-1", 310).expect_err("completed");
    assert!(matches!(
        err,
        EngineError::Store(StoreError::InvalidState {
            status: WorkflowStatus::Completed,
            ..
        })
    ));
}
