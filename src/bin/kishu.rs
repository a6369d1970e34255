//! `kishu` CLI entry point.

use clap::Parser;

use kishu::cli::{self, Cli};
use kishu::config::Config;
use kishu::logging;

fn main() {
    let cli = Cli::parse();
    let config = Config::from_env();
    logging::init_logging(if cli.verbose { "debug" } else { "info" });

    if let Err(err) = cli::run(&cli, &config) {
        if config.cli.verbose || cli.verbose {
            eprintln!("kishu error: {err:#?}");
        } else {
            eprintln!("kishu: {err}");
        }
        std::process::exit(1);
    }
}
