//! Clap derive structures for the `marquee` CLI.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// marquee -- keep a fleet of Cast receivers on their configured content
#[derive(Debug, Parser)]
#[command(
    name = "marquee",
    version,
    about = "Keep a fleet of Cast receivers showing their configured content",
    long_about = "Discovers Cast receivers on the local network, launches the configured\n\
        receiver application on every device listed in the device config, and\n\
        reconnects with backoff whenever a session drops.",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Path to marquee.toml (defaults to the platform config directory)
    #[arg(long, env = "MARQUEE_CONFIG", global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

impl GlobalOpts {
    pub fn config_path(&self) -> PathBuf {
        self.config
            .clone()
            .unwrap_or_else(marquee_config::config_path)
    }
}

// ── Commands ─────────────────────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Supervise every configured device until interrupted
    Run,

    /// Load both config files and print the resolved devices
    Validate,

    /// Generate shell completions
    Completions(CompletionsArgs),
}

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}
