#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CliVerb {
    Init,
    Show,
    List,
    Resume,
    Cancel,
    Sweep,
    Archive,
    Help,
    Unknown,
}

pub fn parse_cli_verb(input: &str) -> CliVerb {
    match input {
        "init" => CliVerb::Init,
        "show" => CliVerb::Show,
        "list" => CliVerb::List,
        "resume" => CliVerb::Resume,
        "cancel" => CliVerb::Cancel,
        "sweep" => CliVerb::Sweep,
        "archive" => CliVerb::Archive,
        "help" | "--help" | "-h" => CliVerb::Help,
        _ => CliVerb::Unknown,
    }
}

pub fn cli_help_lines() -> Vec<String> {
    vec![
        "Commands:".to_string(),
        "  init                                 Create the state root, config and database"
            .to_string(),
        "  show <workflow_id>                   Show a workflow (falls back to the archive)"
            .to_string(),
        "  list [active|paused|completed|failed] List workflows, newest first".to_string(),
        "  resume <workflow_id> <token> approve|deny [reason]".to_string(),
        "                                       Deliver a decision for a paused workflow"
            .to_string(),
        "  cancel <workflow_id>                 Cancel an active or paused workflow".to_string(),
        "  sweep                                Expire overdue pauses and archive old workflows"
            .to_string(),
        "  archive <workflow_id>                Move a finished workflow to the archive"
            .to_string(),
        "  help                                 Show this help".to_string(),
    ]
}

pub(crate) fn help_text() -> String {
    let mut lines = vec![
        "tether: durable workflow state engine".to_string(),
        String::new(),
    ];
    lines.extend(cli_help_lines());
    lines.push(String::new());
    lines.push("State root: $TETHER_HOME, or ~/.tether when unset.".to_string());
    lines.join("\n")
}
