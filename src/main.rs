use std::process::ExitCode;

use clap::Parser;
use colored::Colorize;

use otterpgo::cli::{self, Cli};

fn main() -> ExitCode {
    let cli = Cli::parse();
    otterpgo_utils::init_logging(cli.verbose);

    match cli::run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{} {err:#}", "error:".red().bold());
            ExitCode::FAILURE
        }
    }
}
