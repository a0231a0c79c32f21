//! `story`: compile, check, and interactively run Script sources from the
//! command line (`SPEC_FULL.md` §6.5).

mod cli;
mod manifest;
mod run;

use clap::Parser;

use cli::{Cli, Commands};

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Check { file } => run::check(&file),
        Commands::Run { file, manifest } => run::run(&file, manifest.as_deref()),
    };

    match result {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(1);
        }
    }
}
