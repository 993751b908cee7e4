use anyhow::Result;
use cask_server::{Backend, ServerConfig};
use clap::{ArgMatches, Command};

use crate::config::Settings;
use crate::get_config_value;

pub fn cli() -> Command {
    Command::new("serve").about("Run the cask HTTP server")
}

pub fn exec(args: &ArgMatches, settings: &Settings) -> Result<()> {
    let api_port = *get_config_value!(args, "api_port", u16, settings.api_port);
    let data_dir = get_config_value!(args, "data_dir", String, settings.data_dir).clone();
    let backend: Backend = get_config_value!(args, "backend", String, settings.backend)
        .parse()
        .map_err(anyhow::Error::msg)?;

    cask_server::run(ServerConfig {
        api_port,
        data_dir: data_dir.into(),
        backend,
    })
}
