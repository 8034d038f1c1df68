use crate::app::command_support::{
    ensure_state_root, format_optional_timestamp, format_timestamp, now_secs, open_engine,
};
use crate::engine::{EngineError, ResumeDelivery, ResumeOutcome};
use crate::shared::ids::WorkflowId;
use crate::store::{
    ArchivedWorkflow, FileArchiveSink, StoreError, WorkflowRecord, WorkflowStatus,
};
use serde_json::json;

const LIST_LIMIT: usize = 200;

pub fn cmd_show(args: &[String]) -> Result<String, String> {
    if args.len() != 1 {
        return Err("usage: show <workflow_id>".to_string());
    }
    let workflow_id = parse_workflow_id(&args[0])?;
    let paths = ensure_state_root()?;
    let (settings, engine) = open_engine(&paths)?;
    match engine.get(workflow_id.as_str()) {
        Ok(record) => Ok(render_record(&record)),
        Err(EngineError::Store(StoreError::NotFound { .. })) => {
            let sink = FileArchiveSink::new(settings.archive_dir(&paths.root));
            match sink.load(workflow_id.as_str()).map_err(|e| e.to_string())? {
                Some(archived) => Ok(render_archived(&archived)),
                None => Err(format!("unknown workflow `{workflow_id}`")),
            }
        }
        Err(err) => Err(err.to_string()),
    }
}

pub fn cmd_list(args: &[String]) -> Result<String, String> {
    if args.len() > 1 {
        return Err("usage: list [active|paused|completed|failed]".to_string());
    }
    let status = args
        .first()
        .map(|raw| WorkflowStatus::parse(raw))
        .transpose()?;
    let paths = ensure_state_root()?;
    let (_, engine) = open_engine(&paths)?;
    let records = engine
        .list(status, LIST_LIMIT)
        .map_err(|e| e.to_string())?;
    if records.is_empty() {
        return Ok("no workflows".to_string());
    }
    Ok(records
        .iter()
        .map(|record| {
            format!(
                "{} type={} status={} step={} updated_at={}",
                record.workflow_id,
                record.workflow_type,
                record.status,
                record.current_step_index,
                format_timestamp(record.updated_at)
            )
        })
        .collect::<Vec<_>>()
        .join("\n"))
}

pub fn cmd_resume(args: &[String]) -> Result<String, String> {
    if args.len() < 3 {
        return Err(
            "usage: resume <workflow_id> <resume_token> approve|deny [reason]".to_string(),
        );
    }
    let note = args[3..].join(" ");
    let outcome = match args[2].as_str() {
        "approve" => ResumeOutcome::Approved(if note.is_empty() {
            json!({ "source": "cli" })
        } else {
            json!({ "source": "cli", "note": note })
        }),
        "deny" => ResumeOutcome::Denied(if note.is_empty() {
            "denied by operator".to_string()
        } else {
            note
        }),
        other => return Err(format!("unknown resume decision `{other}`")),
    };
    let workflow_id = parse_workflow_id(&args[0])?;

    let paths = ensure_state_root()?;
    let (_, engine) = open_engine(&paths)?;
    let delivery = engine
        .resume(workflow_id.as_str(), &args[1], outcome, now_secs())
        .map_err(|e| e.to_string())?;
    Ok(match delivery {
        ResumeDelivery::Applied(record) => format!(
            "resume applied\nworkflow_id={}\nstatus={}",
            record.workflow_id, record.status
        ),
        ResumeDelivery::Duplicate(record) => format!(
            "resume already applied\nworkflow_id={}\nstatus={}",
            record.workflow_id, record.status
        ),
        ResumeDelivery::Ignored { reason } => {
            format!("resume ignored\nworkflow_id={workflow_id}\nreason={reason}")
        }
    })
}

pub fn cmd_cancel(args: &[String]) -> Result<String, String> {
    if args.len() != 1 {
        return Err("usage: cancel <workflow_id>".to_string());
    }
    let workflow_id = parse_workflow_id(&args[0])?;
    let paths = ensure_state_root()?;
    let (_, engine) = open_engine(&paths)?;
    let record = engine
        .cancel(workflow_id.as_str(), now_secs())
        .map_err(|e| e.to_string())?;
    Ok(format!(
        "workflow cancelled\nworkflow_id={}\nstatus={}",
        record.workflow_id, record.status
    ))
}

pub fn cmd_archive(args: &[String]) -> Result<String, String> {
    if args.len() != 1 {
        return Err("usage: archive <workflow_id>".to_string());
    }
    let workflow_id = parse_workflow_id(&args[0])?;
    let paths = ensure_state_root()?;
    let (settings, engine) = open_engine(&paths)?;
    let archived = engine
        .archive(workflow_id.as_str(), now_secs())
        .map_err(|e| e.to_string())?;
    let sink = FileArchiveSink::new(settings.archive_dir(&paths.root));
    Ok(format!(
        "workflow archived\nworkflow_id={}\npath={}",
        archived.workflow_id,
        sink.path_for(archived.workflow_id.as_str()).display()
    ))
}

/// Ids double as archive file names, so they are checked before any lookup.
fn parse_workflow_id(raw: &str) -> Result<WorkflowId, String> {
    WorkflowId::parse(raw).map_err(|err| format!("invalid workflow id `{raw}`: {err}"))
}

fn render_record(record: &WorkflowRecord) -> String {
    let mut lines = vec![
        format!("workflow_id={}", record.workflow_id),
        format!("workflow_type={}", record.workflow_type),
        format!("status={}", record.status),
        format!("current_step={}", record.current_step_index),
        format!("retries={}/{}", record.retry_count, record.max_retries),
        format!(
            "next_attempt_at={}",
            format_optional_timestamp(record.next_attempt_at)
        ),
    ];
    if let Some(error) = &record.last_error {
        lines.push(format!("last_error={error}"));
    }
    if let Some(pending) = &record.pending_action {
        lines.push(format!("pending_kind={}", pending.kind));
        lines.push(format!("resume_token={}", pending.resume_token));
        lines.push(format!("timeout_at={}", format_timestamp(pending.timeout_at)));
    }
    if let Some(reason) = record.failure_reason {
        lines.push(format!("failure_reason={reason}"));
    }
    if let Some(details) = &record.error_details {
        lines.push(format!("error_details={details}"));
    }
    lines.push(format!("created_at={}", format_timestamp(record.created_at)));
    lines.push(format!("updated_at={}", format_timestamp(record.updated_at)));
    lines.push(format!(
        "completed_at={}",
        format_optional_timestamp(record.completed_at)
    ));
    lines.push(format!("version={}", record.version));
    for step in &record.steps_completed {
        lines.push(format!(
            "step[{}]={} completed_at={}",
            step.step_index,
            step.step_name,
            format_timestamp(step.completed_at)
        ));
    }
    lines.join("\n")
}

fn render_archived(archived: &ArchivedWorkflow) -> String {
    let mut lines = vec![
        format!("workflow_id={}", archived.workflow_id),
        format!("workflow_type={}", archived.workflow_type),
        format!("status={}", archived.status),
        "archived=true".to_string(),
        format!("archived_at={}", format_timestamp(archived.archived_at)),
    ];
    if let Some(reason) = archived.failure_reason {
        lines.push(format!("failure_reason={reason}"));
    }
    lines.push(format!(
        "completed_at={}",
        format_optional_timestamp(archived.completed_at)
    ));
    for step in &archived.steps {
        lines.push(format!(
            "step[{}]={} completed_at={}",
            step.step_index,
            step.step_name,
            format_timestamp(step.completed_at)
        ));
    }
    lines.join("\n")
}
