//! `story` CLI surface (`SPEC_FULL.md` §6.5; ambient, not a core component).

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "story")]
#[command(about = "Compile and run stories written in the Script", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Load, start, and interactively drive a story on stdin/stdout.
    Run {
        /// Path to a `.story` source file or a pre-compiled `.json` story.
        file: PathBuf,
        /// Optional `story.toml` manifest overriding defaults.
        #[arg(long)]
        manifest: Option<PathBuf>,
    },
    /// Parse and lower a story, printing any diagnostics found.
    ///
    /// Exits non-zero if a fatal diagnostic prevented lowering.
    Check {
        /// Path to a `.story` source file.
        file: PathBuf,
    },
}
