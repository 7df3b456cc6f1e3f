//! Command-line interface for reg-chxr
//!
//! ChRIS invokes plugins as `<exec> [options] <inputdir> <outputdir>`, so
//! there are no subcommands; `--json` prints the plugin descriptor instead.

use anyhow::Result;
use clap::{CommandFactory, FromArgMatches, Parser};
use std::path::PathBuf;
use tracing::Level;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::descriptor;

mod verify;

pub use verify::VerifyArgs;

/// Verify PACS file registration in CUBE and schedule the anonymize-and-push workflow
#[derive(Parser)]
#[command(name = "reg-chxr")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Directory containing the PACS series JSON files
    #[arg(value_name = "INPUTDIR", required_unless_present = "json")]
    pub inputdir: Option<PathBuf>,

    /// Directory where reports are written
    #[arg(value_name = "OUTPUTDIR", required_unless_present = "json")]
    pub outputdir: Option<PathBuf>,

    #[command(flatten)]
    pub verify: VerifyArgs,

    /// Path to config file (reg-chxr.toml or .reg-chxr.yml)
    #[arg(short = 'c', long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Print the ChRIS plugin descriptor as JSON and exit
    #[arg(long)]
    pub json: bool,

    /// Enable verbose logging (sets log level to DEBUG)
    #[arg(short, long)]
    pub verbose: bool,
}

pub fn run() -> Result<()> {
    let matches = Cli::command().get_matches();
    let cli = Cli::from_arg_matches(&matches).unwrap_or_else(|e| e.exit());

    // RUST_LOG in the environment always takes precedence; --verbose falls back to DEBUG.
    let filter = if cli.verbose {
        EnvFilter::from_default_env().add_directive(Level::DEBUG.into())
    } else {
        EnvFilter::from_default_env().add_directive(Level::INFO.into())
    };
    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .try_init();

    if cli.json {
        let desc = descriptor::build(&Cli::command());
        println!("{}", serde_json::to_string_pretty(&desc)?);
        return Ok(());
    }

    verify::run(cli, &matches)
}
