use super::{
    ArchiveSink, ArchivedWorkflow, Mutator, StateStore, StoreError, WorkflowRecord,
    WorkflowStatus,
};
use crate::shared::ids::WorkflowId;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// SQLite-backed `StateStore`. Each call opens its own connection, so one store value can
/// be shared across worker threads and several processes may point at the same file.
#[derive(Debug, Clone)]
pub struct SqliteStateStore {
    db_path: PathBuf,
    busy_timeout: Duration,
}

impl SqliteStateStore {
    pub fn open(db_path: &Path, busy_timeout: Duration) -> Result<Self, StoreError> {
        if let Some(parent) = db_path.parent() {
            fs::create_dir_all(parent).map_err(|source| StoreError::CreateParent {
                path: parent.display().to_string(),
                source,
            })?;
        }

        let store = Self {
            db_path: db_path.to_path_buf(),
            busy_timeout,
        };
        let connection = store.connect()?;
        connection
            .pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))
            .map_err(|source| StoreError::Sql { source })?;
        store.ensure_schema(&connection)?;
        Ok(store)
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn connect(&self) -> Result<Connection, StoreError> {
        let connection = Connection::open(&self.db_path).map_err(|source| StoreError::Open {
            path: self.db_path.display().to_string(),
            source,
        })?;
        connection
            .busy_timeout(self.busy_timeout)
            .map_err(|source| StoreError::Sql { source })?;
        Ok(connection)
    }

    fn ensure_schema(&self, connection: &Connection) -> Result<(), StoreError> {
        connection
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS workflows (
                    workflow_id TEXT PRIMARY KEY,
                    workflow_type TEXT NOT NULL,
                    status TEXT NOT NULL,
                    version INTEGER NOT NULL,
                    timeout_at INTEGER,
                    next_attempt_at INTEGER,
                    completed_at INTEGER,
                    created_at INTEGER NOT NULL,
                    updated_at INTEGER NOT NULL,
                    body TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS archived_workflows (
                    workflow_id TEXT PRIMARY KEY,
                    workflow_type TEXT NOT NULL,
                    archived_at INTEGER NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_workflows_status_timeout
                    ON workflows(status, timeout_at);
                CREATE INDEX IF NOT EXISTS idx_workflows_status_next_attempt
                    ON workflows(status, next_attempt_at);
                CREATE INDEX IF NOT EXISTS idx_workflows_status_completed
                    ON workflows(status, completed_at);
                ",
            )
            .map_err(|source| StoreError::Sql { source })
    }
}

impl StateStore for SqliteStateStore {
    fn create(&self, record: &WorkflowRecord) -> Result<WorkflowId, StoreError> {
        record
            .validate()
            .map_err(|reason| StoreError::InvariantViolation {
                workflow_id: record.workflow_id.to_string(),
                reason,
            })?;
        let body = encode_record(record)?;

        let mut connection = self.connect()?;
        let tx = connection
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|source| StoreError::Sql { source })?;

        let archived = tx
            .query_row(
                "SELECT 1 FROM archived_workflows WHERE workflow_id = ?1",
                params![record.workflow_id.as_str()],
                |_| Ok(()),
            )
            .optional()
            .map_err(|source| StoreError::Sql { source })?;
        if archived.is_some() {
            return Err(StoreError::DuplicateId {
                workflow_id: record.workflow_id.to_string(),
            });
        }

        let inserted = tx
            .execute(
                "
                INSERT INTO workflows (
                    workflow_id, workflow_type, status, version, timeout_at,
                    next_attempt_at, completed_at, created_at, updated_at, body
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                ON CONFLICT(workflow_id) DO NOTHING
                ",
                params![
                    record.workflow_id.as_str(),
                    record.workflow_type.as_str(),
                    record.status.as_str(),
                    version_to_db(record.version),
                    record.pending_action.as_ref().map(|p| p.timeout_at),
                    record.next_attempt_at,
                    record.completed_at,
                    record.created_at,
                    record.updated_at,
                    body,
                ],
            )
            .map_err(|source| StoreError::Sql { source })?;
        if inserted == 0 {
            return Err(StoreError::DuplicateId {
                workflow_id: record.workflow_id.to_string(),
            });
        }

        tx.commit().map_err(|source| StoreError::Sql { source })?;
        Ok(record.workflow_id.clone())
    }

    fn get(&self, workflow_id: &str) -> Result<WorkflowRecord, StoreError> {
        let connection = self.connect()?;
        load_record(&connection, workflow_id)?.ok_or_else(|| StoreError::NotFound {
            workflow_id: workflow_id.to_string(),
        })
    }

    fn update(
        &self,
        workflow_id: &str,
        mutator: &mut Mutator<'_>,
        expected_version: u64,
    ) -> Result<WorkflowRecord, StoreError> {
        let mut connection = self.connect()?;
        let tx = connection
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|source| StoreError::Sql { source })?;

        let current = load_record(&tx, workflow_id)?.ok_or_else(|| StoreError::NotFound {
            workflow_id: workflow_id.to_string(),
        })?;
        if current.version != expected_version {
            return Err(StoreError::VersionConflict {
                workflow_id: workflow_id.to_string(),
                expected: expected_version,
                actual: current.version,
            });
        }
        if current.is_terminal() {
            return Err(StoreError::InvalidState {
                workflow_id: workflow_id.to_string(),
                status: current.status,
                reason: "terminal workflows are immutable".to_string(),
            });
        }

        let mut next = current.clone();
        mutator(&mut next)?;
        next.version = current.version.saturating_add(1);
        current
            .validate_successor(&next)
            .map_err(|reason| StoreError::InvariantViolation {
                workflow_id: workflow_id.to_string(),
                reason,
            })?;

        let body = encode_record(&next)?;
        let changed = tx
            .execute(
                "
                UPDATE workflows
                SET status = ?3, version = ?4, timeout_at = ?5, next_attempt_at = ?6,
                    completed_at = ?7, updated_at = ?8, body = ?9
                WHERE workflow_id = ?1 AND version = ?2
                ",
                params![
                    workflow_id,
                    version_to_db(expected_version),
                    next.status.as_str(),
                    version_to_db(next.version),
                    next.pending_action.as_ref().map(|p| p.timeout_at),
                    next.next_attempt_at,
                    next.completed_at,
                    next.updated_at,
                    body,
                ],
            )
            .map_err(|source| StoreError::Sql { source })?;
        if changed == 0 {
            return Err(StoreError::VersionConflict {
                workflow_id: workflow_id.to_string(),
                expected: expected_version,
                actual: current.version,
            });
        }

        tx.commit().map_err(|source| StoreError::Sql { source })?;
        Ok(next)
    }

    fn query_expired(&self, now: i64) -> Result<Vec<WorkflowId>, StoreError> {
        let connection = self.connect()?;
        query_ids(
            &connection,
            "
            SELECT workflow_id FROM workflows
            WHERE status = 'paused' AND timeout_at IS NOT NULL AND timeout_at <= ?1
            ORDER BY timeout_at ASC, workflow_id ASC
            ",
            params![now],
        )
    }

    fn query_runnable(&self, now: i64, limit: usize) -> Result<Vec<WorkflowId>, StoreError> {
        let connection = self.connect()?;
        query_ids(
            &connection,
            "
            SELECT workflow_id FROM workflows
            WHERE status = 'active' AND (next_attempt_at IS NULL OR next_attempt_at <= ?1)
            ORDER BY updated_at ASC, workflow_id ASC
            LIMIT ?2
            ",
            params![now, limit_to_db(limit)],
        )
    }

    fn query_terminal_before(&self, cutoff: i64) -> Result<Vec<WorkflowId>, StoreError> {
        let connection = self.connect()?;
        query_ids(
            &connection,
            "
            SELECT workflow_id FROM workflows
            WHERE status IN ('completed', 'failed') AND completed_at <= ?1
            ORDER BY completed_at ASC, workflow_id ASC
            ",
            params![cutoff],
        )
    }

    fn list(
        &self,
        status: Option<WorkflowStatus>,
        limit: usize,
    ) -> Result<Vec<WorkflowRecord>, StoreError> {
        let connection = self.connect()?;
        let mut statement = connection
            .prepare(
                "
                SELECT workflow_id, body FROM workflows
                WHERE ?1 IS NULL OR status = ?1
                ORDER BY created_at DESC, workflow_id ASC
                LIMIT ?2
                ",
            )
            .map_err(|source| StoreError::Sql { source })?;
        let rows = statement
            .query_map(
                params![status.map(|s| s.as_str()), limit_to_db(limit)],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
            )
            .map_err(|source| StoreError::Sql { source })?;

        let mut records = Vec::new();
        for row in rows {
            let (workflow_id, body) = row.map_err(|source| StoreError::Sql { source })?;
            records.push(decode_record(&workflow_id, &body)?);
        }
        Ok(records)
    }

    fn archive(
        &self,
        workflow_id: &str,
        sink: &dyn ArchiveSink,
        now: i64,
    ) -> Result<ArchivedWorkflow, StoreError> {
        let record = self.get(workflow_id)?;
        if !record.is_terminal() {
            return Err(StoreError::InvalidState {
                workflow_id: workflow_id.to_string(),
                status: record.status,
                reason: "only terminal workflows can be archived".to_string(),
            });
        }

        // Cold storage first; the hot row stays put if the sink fails.
        let archived = ArchivedWorkflow::from_record(&record, now);
        sink.write(&archived)
            .map_err(|source| StoreError::Archive {
                workflow_id: workflow_id.to_string(),
                source,
            })?;

        let mut connection = self.connect()?;
        let tx = connection
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|source| StoreError::Sql { source })?;
        let removed = tx
            .execute(
                "DELETE FROM workflows WHERE workflow_id = ?1 AND version = ?2",
                params![workflow_id, version_to_db(record.version)],
            )
            .map_err(|source| StoreError::Sql { source })?;
        if removed == 0 {
            return Err(StoreError::NotFound {
                workflow_id: workflow_id.to_string(),
            });
        }
        tx.execute(
            "
            INSERT INTO archived_workflows (workflow_id, workflow_type, archived_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(workflow_id) DO UPDATE SET archived_at = excluded.archived_at
            ",
            params![workflow_id, record.workflow_type.as_str(), now],
        )
        .map_err(|source| StoreError::Sql { source })?;
        tx.commit().map_err(|source| StoreError::Sql { source })?;

        Ok(archived)
    }
}

fn load_record(
    connection: &Connection,
    workflow_id: &str,
) -> Result<Option<WorkflowRecord>, StoreError> {
    let body = connection
        .query_row(
            "SELECT body FROM workflows WHERE workflow_id = ?1",
            params![workflow_id],
            |row| row.get::<_, String>(0),
        )
        .optional()
        .map_err(|source| StoreError::Sql { source })?;
    body.map(|body| decode_record(workflow_id, &body)).transpose()
}

fn query_ids(
    connection: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> Result<Vec<WorkflowId>, StoreError> {
    let mut statement = connection
        .prepare(sql)
        .map_err(|source| StoreError::Sql { source })?;
    let rows = statement
        .query_map(params, |row| row.get::<_, String>(0))
        .map_err(|source| StoreError::Sql { source })?;

    let mut ids = Vec::new();
    for row in rows {
        let raw = row.map_err(|source| StoreError::Sql { source })?;
        let id = WorkflowId::parse(&raw).map_err(|reason| StoreError::InvalidRow {
            column: "workflow_id",
            value: raw.clone(),
            reason,
        })?;
        ids.push(id);
    }
    Ok(ids)
}

fn encode_record(record: &WorkflowRecord) -> Result<String, StoreError> {
    serde_json::to_string(record).map_err(|source| StoreError::Json {
        workflow_id: record.workflow_id.to_string(),
        source,
    })
}

fn decode_record(workflow_id: &str, body: &str) -> Result<WorkflowRecord, StoreError> {
    serde_json::from_str(body).map_err(|source| StoreError::Json {
        workflow_id: workflow_id.to_string(),
        source,
    })
}

fn version_to_db(version: u64) -> i64 {
    i64::try_from(version).unwrap_or(i64::MAX)
}

fn limit_to_db(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}
