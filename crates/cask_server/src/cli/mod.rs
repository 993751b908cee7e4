use clap::Command;

pub mod args;
pub mod serve;

pub fn builtin() -> Vec<Command> {
    vec![serve::cli()]
}
