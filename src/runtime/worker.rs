use super::{append_runtime_log, RuntimeError, StatePaths};
use crate::config::WorkerConfig;
use crate::engine::{TickOutcome, WorkflowEngine};
use crate::shared::time::now_secs;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

const RUNNABLE_BATCH: usize = 64;
const STOP_POLL_SLICE_MS: u64 = 50;

/// Running worker threads sharing one stop flag.
pub struct WorkerPool {
    stop: Arc<AtomicBool>,
    handles: Vec<(String, JoinHandle<()>)>,
}

impl WorkerPool {
    pub fn worker_ids(&self) -> Vec<String> {
        self.handles.iter().map(|(id, _)| id.clone()).collect()
    }

    pub fn signal_stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }

    /// Signals stop and waits for every worker to exit.
    pub fn join(self) -> Result<(), RuntimeError> {
        self.signal_stop();
        let mut panicked = None;
        for (worker_id, handle) in self.handles {
            if handle.join().is_err() && panicked.is_none() {
                panicked = Some(worker_id);
            }
        }
        match panicked {
            Some(worker_id) => Err(RuntimeError::WorkerPanicked { worker_id }),
            None => Ok(()),
        }
    }
}

struct WorkerContext {
    worker_id: String,
    index: usize,
    count: usize,
    engine: Arc<WorkflowEngine>,
    paths: StatePaths,
    config: WorkerConfig,
    stop: Arc<AtomicBool>,
}

/// Starts `config.count` polling workers. Worker 0 also runs the timeout and retention sweeps.
pub fn spawn_workers(
    engine: Arc<WorkflowEngine>,
    paths: StatePaths,
    config: WorkerConfig,
    stop: Arc<AtomicBool>,
) -> Result<WorkerPool, RuntimeError> {
    let count = config.count.max(1);
    let mut pool = WorkerPool {
        stop: stop.clone(),
        handles: Vec::with_capacity(count),
    };

    for index in 0..count {
        let worker_id = format!("worker-{index}");
        let context = WorkerContext {
            worker_id: worker_id.clone(),
            index,
            count,
            engine: engine.clone(),
            paths: paths.clone(),
            config,
            stop: stop.clone(),
        };
        let spawned = thread::Builder::new()
            .name(worker_id.clone())
            .spawn(move || run_worker(context));
        match spawned {
            Ok(handle) => pool.handles.push((worker_id, handle)),
            Err(source) => {
                // Unwind the workers already started before reporting.
                let _ = pool.join();
                return Err(RuntimeError::Spawn { worker_id, source });
            }
        }
    }
    Ok(pool)
}

fn run_worker(ctx: WorkerContext) {
    append_runtime_log(&ctx.paths, "info", "worker.started", &ctx.worker_id);
    let poll = Duration::from_millis(ctx.config.poll_interval_ms);
    let sweep_interval = Duration::from_secs(ctx.config.sweep_interval_seconds);
    let mut last_sweep: Option<Instant> = None;

    while !ctx.stop.load(Ordering::Relaxed) {
        if ctx.index == 0 && last_sweep.map_or(true, |at| at.elapsed() >= sweep_interval) {
            run_sweeps(&ctx);
            last_sweep = Some(Instant::now());
        }

        match ctx.engine.runnable(now_secs(), RUNNABLE_BATCH) {
            Ok(workflow_ids) => {
                for workflow_id in workflow_ids {
                    if ctx.stop.load(Ordering::Relaxed) {
                        break;
                    }
                    if !owns_workflow(ctx.index, ctx.count, workflow_id.as_str()) {
                        continue;
                    }
                    tick_one(&ctx, workflow_id.as_str());
                }
            }
            Err(err) => append_runtime_log(
                &ctx.paths,
                "error",
                "worker.poll.failed",
                &format!("{}: {err}", ctx.worker_id),
            ),
        }

        if !sleep_with_stop(&ctx.stop, poll) {
            break;
        }
    }
    append_runtime_log(&ctx.paths, "info", "worker.stopped", &ctx.worker_id);
}

fn tick_one(ctx: &WorkerContext, workflow_id: &str) {
    let now = now_secs();
    match ctx.engine.tick(workflow_id, now) {
        Ok(TickOutcome::Idle { .. }) => {}
        Ok(outcome) => append_runtime_log(
            &ctx.paths,
            "info",
            "workflow.tick",
            &format!("{} workflow_id={workflow_id} outcome={outcome:?}", ctx.worker_id),
        ),
        Err(err) => {
            append_runtime_log(
                &ctx.paths,
                "warn",
                "workflow.tick.failed",
                &format!("{} workflow_id={workflow_id} error={err}", ctx.worker_id),
            );
            // A failed tick wrote nothing; park the record or it heads every later batch.
            if let Err(defer_err) = ctx.engine.defer_failed_tick(workflow_id, &err, now) {
                append_runtime_log(
                    &ctx.paths,
                    "error",
                    "workflow.defer.failed",
                    &format!("{} workflow_id={workflow_id} error={defer_err}", ctx.worker_id),
                );
            }
        }
    }
}

fn run_sweeps(ctx: &WorkerContext) {
    let now = now_secs();
    match ctx.engine.sweep_timeouts(now) {
        Ok(report) => append_runtime_log(&ctx.paths, "info", "sweep.timeouts", &report.summary()),
        Err(err) => append_runtime_log(
            &ctx.paths,
            "error",
            "sweep.timeouts.failed",
            &err.to_string(),
        ),
    }
    match ctx.engine.sweep_retention(now) {
        Ok(report) => append_runtime_log(&ctx.paths, "info", "sweep.retention", &report.summary()),
        Err(err) => append_runtime_log(
            &ctx.paths,
            "error",
            "sweep.retention.failed",
            &err.to_string(),
        ),
    }
}

/// Spreads workflows across in-process workers so two threads rarely tick the same id.
fn owns_workflow(index: usize, count: usize, workflow_id: &str) -> bool {
    let bucket = workflow_id
        .bytes()
        .fold(0_usize, |acc, byte| acc.wrapping_mul(31).wrapping_add(byte as usize));
    bucket % count.max(1) == index
}

pub(crate) fn sleep_with_stop(stop: &AtomicBool, total: Duration) -> bool {
    let mut remaining = total;
    while remaining > Duration::ZERO {
        if stop.load(Ordering::Relaxed) {
            return false;
        }
        let step = remaining.min(Duration::from_millis(STOP_POLL_SLICE_MS));
        thread::sleep(step);
        remaining = remaining.saturating_sub(step);
    }
    !stop.load(Ordering::Relaxed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_workflow_has_exactly_one_owner() {
        for id in ["wf-a", "wf-b", "wf-abc-0001", "x"] {
            let owners = (0..3).filter(|i| owns_workflow(*i, 3, id)).count();
            assert_eq!(owners, 1, "{id}");
        }
    }

    #[test]
    fn sleep_with_stop_returns_early_when_stopped() {
        let stop = AtomicBool::new(true);
        let started = Instant::now();
        assert!(!sleep_with_stop(&stop, Duration::from_secs(5)));
        assert!(started.elapsed() < Duration::from_secs(1));
    }
}
