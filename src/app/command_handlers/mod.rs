use crate::app::cli::{help_text, parse_cli_verb, CliVerb};

pub mod maintenance;
pub mod workflows;

pub fn run_cli(args: Vec<String>) -> Result<String, String> {
    if args.is_empty() {
        return Ok(help_text());
    }

    match parse_cli_verb(args[0].as_str()) {
        CliVerb::Init => maintenance::cmd_init(&args[1..]),
        CliVerb::Show => workflows::cmd_show(&args[1..]),
        CliVerb::List => workflows::cmd_list(&args[1..]),
        CliVerb::Resume => workflows::cmd_resume(&args[1..]),
        CliVerb::Cancel => workflows::cmd_cancel(&args[1..]),
        CliVerb::Sweep => maintenance::cmd_sweep(&args[1..]),
        CliVerb::Archive => workflows::cmd_archive(&args[1..]),
        CliVerb::Help => Ok(help_text()),
        CliVerb::Unknown => Err(format!("unknown command `{}`", args[0])),
    }
}
