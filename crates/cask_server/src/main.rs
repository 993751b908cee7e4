use anyhow::{Context, Result};
use clap::Command;
use tracing::info;

mod cli;
mod config;
mod log;

const NAME: &str = "cask";
const BIN_NAME: &str = "cask";
const VERSION: &str = env!("CARGO_PKG_VERSION");
const ABOUT: &str = "Content-addressed file store with chunk-level dedup";

pub fn main() -> Result<()> {
    let about_text = format!("{} {}\n{}", NAME, VERSION, ABOUT);
    let usage_text = format!("{} <command> [options]", BIN_NAME);
    let after_help_text = format!(
        "See '{} help <command>' for more information on a command",
        BIN_NAME
    );

    let cask = Command::new(NAME)
        .bin_name(BIN_NAME)
        .version(VERSION)
        .about(about_text)
        .override_usage(usage_text)
        .after_help(after_help_text)
        .args(cli::args::common_args())
        .arg_required_else_help(true)
        .subcommands(cli::builtin())
        .subcommand_required(true);

    let matches = cask.get_matches();

    // CLI values take precedence over settings.toml
    let config_file = matches.get_one::<String>("config").map(String::as_str);
    let settings = config::Settings::new(config_file).context("Failed to load settings")?;

    let log_level = matches
        .get_one::<String>("log_level")
        .unwrap_or(&settings.log_level);
    log::init(log_level)?;
    info!("Initialised logger with log level {log_level}");

    match matches.subcommand() {
        Some(("serve", cmd)) => cli::serve::exec(cmd, &settings)?,
        _ => unreachable!(),
    }

    Ok(())
}
