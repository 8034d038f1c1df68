use serde_json::{json, Map};
use std::path::Path;
use std::sync::Mutex;
use tempfile::tempdir;
use tether::app::cli::{cli_help_lines, parse_cli_verb, CliVerb};
use tether::app::command_handlers::run_cli;
use tether::config::Settings;
use tether::engine::{
    FnStep, PendingActionSpec, StepContext, StepOutcome, TickOutcome, WorkflowEngine,
    WorkflowRegistry,
};
use tether::shared::time::now_secs;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn with_state_root<T>(root: &Path, run: impl FnOnce() -> T) -> T {
    let _guard = ENV_LOCK.lock().expect("env lock");
    let old = std::env::var_os("TETHER_HOME");
    std::env::set_var("TETHER_HOME", root);
    let out = run();
    if let Some(value) = old {
        std::env::set_var("TETHER_HOME", value);
    } else {
        std::env::remove_var("TETHER_HOME");
    }
    out
}

fn args(raw: &[&str]) -> Vec<String> {
    raw.iter().map(|v| v.to_string()).collect()
}

fn field<'a>(output: &'a str, key: &str) -> Option<&'a str> {
    output
        .lines()
        .find_map(|line| line.strip_prefix(&format!("{key}=")))
}

fn seed_paused_workflow(root: &Path, workflow_id: &str) -> String {
    let registry = WorkflowRegistry::new()
        .with_workflow(
            "purchase",
            vec![FnStep::shared("approve", |ctx: &StepContext| {
                match ctx.approval() {
                    Some(_) => StepOutcome::success(json!({ "approved": true })),
                    None => StepOutcome::RequiresWait(PendingActionSpec::human_approval(
                        json!({ "amount": 120 }),
                    )),
                }
            })],
        )
        .expect("register");
    let engine = WorkflowEngine::open(root, Settings::default(), registry).expect("open engine");
    let now = now_secs();
    engine
        .start_workflow_with_id(workflow_id, "purchase", Map::new(), now)
        .expect("start");
    match engine.tick(workflow_id, now).expect("tick") {
        TickOutcome::Paused { resume_token, .. } => resume_token,
        other => panic!("expected pause, got {other:?}"),
    }
}

#[test]
fn cli_module_parses_verbs_and_lists_help() {
    assert_eq!(parse_cli_verb("init"), CliVerb::Init);
    assert_eq!(parse_cli_verb("resume"), CliVerb::Resume);
    assert_eq!(parse_cli_verb("-h"), CliVerb::Help);
    assert_eq!(parse_cli_verb("launch"), CliVerb::Unknown);

    let help = cli_help_lines().join("\n");
    for verb in ["init", "show", "list", "resume", "cancel", "sweep", "archive"] {
        assert!(help.contains(verb), "help is missing `{verb}`");
    }
}

#[test]
fn cli_module_init_writes_config_and_lists_nothing() {
    let temp = tempdir().expect("tempdir");
    let root = temp.path().join("state");

    let (init, list, second_init) = with_state_root(&root, || {
        (
            run_cli(args(&["init"])),
            run_cli(args(&["list"])),
            run_cli(args(&["init"])),
        )
    });

    let init = init.expect("init");
    assert_eq!(field(&init, "config_created"), Some("true"));
    assert!(root.join("config.yaml").is_file());
    assert!(root.join("workflows.db").is_file());
    assert_eq!(list.expect("list"), "no workflows");
    assert_eq!(
        field(&second_init.expect("second init"), "config_created"),
        Some("false")
    );
}

#[test]
fn cli_module_resume_show_and_archive_a_workflow() {
    let temp = tempdir().expect("tempdir");
    let root = temp.path().to_path_buf();
    let token = seed_paused_workflow(&root, "wf-cli-1");

    let outputs = with_state_root(&root, || {
        vec![
            run_cli(args(&["list", "paused"])),
            run_cli(args(&["show", "wf-cli-1"])),
            run_cli(args(&["resume", "wf-cli-1", "stale-token", "approve"])),
            run_cli(args(&["resume", "wf-cli-1", &token, "deny", "over", "budget"])),
            run_cli(args(&["resume", "wf-cli-1", &token, "deny"])),
            run_cli(args(&["archive", "wf-cli-1"])),
            run_cli(args(&["show", "wf-cli-1"])),
        ]
    });
    let outputs = outputs
        .into_iter()
        .map(|out| out.expect("command succeeds"))
        .collect::<Vec<_>>();

    assert!(outputs[0].starts_with("wf-cli-1 type=purchase status=paused"));
    assert_eq!(field(&outputs[1], "status"), Some("paused"));
    assert_eq!(field(&outputs[1], "resume_token"), Some(token.as_str()));
    assert!(outputs[2].starts_with("resume ignored"));
    assert!(outputs[3].starts_with("resume applied"));
    assert_eq!(field(&outputs[3], "status"), Some("failed"));
    assert!(outputs[4].starts_with("resume already applied"));
    assert!(outputs[5].starts_with("workflow archived"));
    assert_eq!(field(&outputs[6], "archived"), Some("true"));
    assert_eq!(field(&outputs[6], "failure_reason"), Some("denied"));
}

#[test]
fn cli_module_cancel_and_error_paths() {
    let temp = tempdir().expect("tempdir");
    let root = temp.path().to_path_buf();
    seed_paused_workflow(&root, "wf-cli-2");

    let (cancel, again, unknown, missing, bad_status) = with_state_root(&root, || {
        (
            run_cli(args(&["cancel", "wf-cli-2"])),
            run_cli(args(&["cancel", "wf-cli-2"])),
            run_cli(args(&["launch"])),
            run_cli(args(&["show", "wf-nope"])),
            run_cli(args(&["list", "sleeping"])),
        )
    });

    assert_eq!(field(&cancel.expect("cancel"), "status"), Some("failed"));
    assert!(again.expect("cancel again").starts_with("workflow cancelled"));
    assert_eq!(unknown.expect_err("unknown"), "unknown command `launch`");
    assert!(missing.expect_err("missing").contains("wf-nope"));
    assert!(bad_status.is_err());
}

#[test]
fn cli_module_rejects_path_like_workflow_ids_before_touching_state() {
    let temp = tempdir().expect("tempdir");
    let root = temp.path().join("state");
    std::fs::write(temp.path().join("secret.json"), "{}").expect("write decoy");

    let (show, cancel, archive, resume) = with_state_root(&root, || {
        (
            run_cli(args(&["show", "../../secret"])),
            run_cli(args(&["cancel", "wf/1"])),
            run_cli(args(&["archive", ".."])),
            run_cli(args(&["resume", "../wf", "token", "approve"])),
        )
    });

    let show = show.expect_err("show rejects traversal");
    assert!(show.starts_with("invalid workflow id `../../secret`"), "{show}");
    for err in [cancel, archive, resume] {
        assert!(err.expect_err("rejected").starts_with("invalid workflow id"));
    }
    assert!(!root.exists());
}
