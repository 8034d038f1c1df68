use crate::engine::audit::{AuditEvent, AuditSink};
use crate::engine::error::EngineError;
use crate::engine::pause::{PauseController, ResumeDelivery, ResumeOutcome};
use crate::store::{ArchiveSink, StateStore};
use std::sync::Arc;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub examined: usize,
    pub transitioned: usize,
    pub skipped: usize,
    pub errors: Vec<String>,
}

impl SweepReport {
    pub fn summary(&self) -> String {
        format!(
            "examined={} transitioned={} skipped={} errors={}",
            self.examined,
            self.transitioned,
            self.skipped,
            self.errors.len()
        )
    }
}

/// Periodic maintenance: expires overdue pauses and moves old terminal records to cold storage.
#[derive(Clone)]
pub struct Sweeper {
    store: Arc<dyn StateStore>,
    pauses: PauseController,
    archive: Arc<dyn ArchiveSink>,
    audit: Arc<dyn AuditSink>,
    archive_after_seconds: u64,
}

impl Sweeper {
    pub fn new(
        store: Arc<dyn StateStore>,
        pauses: PauseController,
        archive: Arc<dyn ArchiveSink>,
        audit: Arc<dyn AuditSink>,
        archive_after_seconds: u64,
    ) -> Self {
        Self {
            store,
            pauses,
            archive,
            audit,
            archive_after_seconds,
        }
    }

    pub fn sweep_timeouts(&self, now: i64) -> Result<SweepReport, EngineError> {
        let mut report = SweepReport::default();
        for workflow_id in self.store.query_expired(now)? {
            report.examined += 1;
            // Re-read so a resume or cancel that landed after the query wins.
            let token = match self.store.get(workflow_id.as_str()) {
                Ok(record) => match record.pending_action {
                    Some(pending) if pending.timeout_at <= now => pending.resume_token,
                    _ => {
                        report.skipped += 1;
                        continue;
                    }
                },
                Err(err) => {
                    report.errors.push(format!("{workflow_id}: {err}"));
                    continue;
                }
            };

            match self
                .pauses
                .resume(workflow_id.as_str(), &token, ResumeOutcome::Timeout, now)
            {
                Ok(ResumeDelivery::Applied(_)) => report.transitioned += 1,
                Ok(_) | Err(EngineError::StaleResume { .. }) => report.skipped += 1,
                Err(err) => report.errors.push(format!("{workflow_id}: {err}")),
            }
        }
        Ok(report)
    }

    pub fn sweep_retention(&self, now: i64) -> Result<SweepReport, EngineError> {
        let retention = i64::try_from(self.archive_after_seconds).unwrap_or(i64::MAX);
        let cutoff = now.saturating_sub(retention);
        let mut report = SweepReport::default();
        for workflow_id in self.store.query_terminal_before(cutoff)? {
            report.examined += 1;
            match self
                .store
                .archive(workflow_id.as_str(), self.archive.as_ref(), now)
            {
                Ok(archived) => {
                    report.transitioned += 1;
                    self.audit.record(
                        &AuditEvent::new("workflow.archived", workflow_id.as_str(), now)
                            .with("status", archived.status.as_str())
                            .with("steps", archived.steps.len()),
                    );
                }
                Err(err) => report.errors.push(format!("{workflow_id}: {err}")),
            }
        }
        Ok(report)
    }
}
