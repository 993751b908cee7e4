//! Arguments shared by the subcommands.

use clap::{value_parser, Arg, ArgAction};

pub fn common_args() -> Vec<Arg> {
    vec![
        Arg::new("config")
            .long("config")
            .value_name("path")
            .help("Path to the settings file")
            .action(ArgAction::Set)
            .global(true),
        Arg::new("log_level")
            .long("log-level")
            .value_name("level")
            .help("Set the log level")
            .action(ArgAction::Set)
            .global(true),
        Arg::new("api_port")
            .long("api-port")
            .value_name("port")
            .value_parser(value_parser!(u16))
            .help("HTTP port for the server")
            .action(ArgAction::Set)
            .global(true),
        Arg::new("data_dir")
            .long("data-dir")
            .value_name("directory")
            .help("Root directory of the object store")
            .action(ArgAction::Set)
            .global(true),
        Arg::new("backend")
            .long("backend")
            .value_name("kind")
            .help("Storage backend: dedup or plain")
            .action(ArgAction::Set)
            .global(true),
    ]
}
