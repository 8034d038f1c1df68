use serde_json::{json, Map};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tempfile::tempdir;
use tether::config::{Settings, WorkerConfig};
use tether::engine::{FnStep, StepContext, StepOutcome, WorkflowEngine, WorkflowRegistry};
use tether::runtime::{bootstrap_state_root, spawn_workers, StatePaths};
use tether::shared::ids::{WorkflowId, WorkflowType};
use tether::shared::time::now_secs;
use tether::store::{WorkflowRecord, WorkflowStatus};

fn wait_until(deadline: Duration, mut done: impl FnMut() -> bool) -> bool {
    let started = Instant::now();
    while started.elapsed() < deadline {
        if done() {
            return true;
        }
        thread::sleep(Duration::from_millis(20));
    }
    done()
}

#[test]
fn worker_module_pool_drives_runnable_workflows_to_completion() {
    let temp = tempdir().expect("tempdir");
    let paths = StatePaths::new(temp.path());
    bootstrap_state_root(&paths).expect("bootstrap");

    let runs = Arc::new(AtomicU32::new(0));
    let counted = runs.clone();
    let registry = WorkflowRegistry::new()
        .with_workflow(
            "sync",
            vec![
                FnStep::shared("pull", move |_ctx: &StepContext| {
                    counted.fetch_add(1, Ordering::SeqCst);
                    StepOutcome::success(json!({ "pulled": true }))
                }),
                FnStep::shared("push", |_ctx: &StepContext| {
                    StepOutcome::success(json!({ "pushed": true }))
                }),
            ],
        )
        .expect("register");
    let engine = Arc::new(
        WorkflowEngine::open(temp.path(), Settings::default(), registry).expect("open engine"),
    );

    let ids = (0..4)
        .map(|i| {
            engine
                .start_workflow_with_id(&format!("wf-sync-{i}"), "sync", Map::new(), now_secs())
                .expect("start")
                .workflow_id
        })
        .collect::<Vec<_>>();

    let pool = spawn_workers(
        engine.clone(),
        paths.clone(),
        WorkerConfig {
            count: 2,
            poll_interval_ms: 20,
            sweep_interval_seconds: 60,
        },
        Arc::new(AtomicBool::new(false)),
    )
    .expect("spawn workers");
    assert_eq!(pool.worker_ids(), vec!["worker-0", "worker-1"]);

    let finished = wait_until(Duration::from_secs(10), || {
        ids.iter().all(|id| {
            engine
                .get(id.as_str())
                .map(|r| r.status == WorkflowStatus::Completed)
                .unwrap_or(false)
        })
    });
    pool.join().expect("join workers");

    assert!(finished, "workers did not finish every workflow");
    assert_eq!(runs.load(Ordering::SeqCst), 4);

    let log = std::fs::read_to_string(paths.runtime_log_path()).expect("runtime log");
    assert!(log.contains("worker.started"));
    assert!(log.contains("worker.stopped"));
    assert!(log.contains("sweep.timeouts"));
}

#[test]
fn worker_module_failing_ticks_do_not_starve_the_runnable_batch() {
    let temp = tempdir().expect("tempdir");
    let paths = StatePaths::new(temp.path());
    let registry = WorkflowRegistry::new()
        .with_workflow(
            "good",
            vec![FnStep::shared("work", |_ctx: &StepContext| {
                StepOutcome::success(json!({ "ok": true }))
            })],
        )
        .expect("register");
    let engine = Arc::new(
        WorkflowEngine::open(temp.path(), Settings::default(), registry).expect("open engine"),
    );

    // Records of a type that is no longer registered, older than everything else.
    let stale_at = now_secs() - 100;
    for i in 0..64 {
        let record = WorkflowRecord::new(
            WorkflowId::parse(&format!("wf-ghost-{i}")).expect("id"),
            WorkflowType::parse("ghost").expect("type"),
            Map::new(),
            3,
            stale_at,
        );
        engine.store().create(&record).expect("create ghost");
    }
    engine
        .start_workflow_with_id("wf-good", "good", Map::new(), now_secs())
        .expect("start good");

    let pool = spawn_workers(
        engine.clone(),
        paths,
        WorkerConfig {
            count: 1,
            poll_interval_ms: 20,
            sweep_interval_seconds: 60,
        },
        Arc::new(AtomicBool::new(false)),
    )
    .expect("spawn workers");
    let finished = wait_until(Duration::from_secs(10), || {
        engine
            .get("wf-good")
            .map(|r| r.status == WorkflowStatus::Completed)
            .unwrap_or(false)
    });
    pool.join().expect("join workers");

    assert!(finished, "good workflow stayed behind failing records");
    let ghost = engine.get("wf-ghost-0").expect("ghost");
    assert_eq!(ghost.status, WorkflowStatus::Active);
    assert_eq!(ghost.retry_count, 0);
    assert!(ghost.next_attempt_at.expect("deferred") > now_secs());
    assert!(ghost
        .last_error
        .as_deref()
        .expect("last error")
        .contains("unknown workflow type"));
}

#[test]
fn worker_module_stop_flag_halts_idle_workers() {
    let temp = tempdir().expect("tempdir");
    let paths = StatePaths::new(temp.path());
    let engine = Arc::new(
        WorkflowEngine::open(temp.path(), Settings::default(), WorkflowRegistry::new())
            .expect("open engine"),
    );
    let stop = Arc::new(AtomicBool::new(false));
    let pool = spawn_workers(
        engine,
        paths,
        WorkerConfig {
            count: 3,
            poll_interval_ms: 1_000,
            sweep_interval_seconds: 60,
        },
        stop.clone(),
    )
    .expect("spawn workers");

    stop.store(true, Ordering::SeqCst);
    let started = Instant::now();
    pool.join().expect("join workers");
    assert!(started.elapsed() < Duration::from_secs(5));
}
