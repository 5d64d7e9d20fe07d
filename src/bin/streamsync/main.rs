use clap::Parser;
use log::LevelFilter;

mod cli;
mod commands;
mod exit_codes;
mod output;

use cli::{Cli, Command};

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    // RUST_LOG, when set, refines the -v level
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .format_timestamp(None)
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = cli.config.as_deref();
    std::process::exit(match cli.command {
        Command::Normalize(args) => commands::normalize::execute(args, config),
        Command::Bindings(args) => commands::bindings::execute(args, config),
        Command::Demo(args) => commands::demo::execute(args, config),
    });
}
