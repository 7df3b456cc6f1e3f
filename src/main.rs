//! reg-chxr: verify PACS file registration in CUBE
//!
//! A ChRIS plugin that checks every series listed in its input JSON files has
//! been registered in CUBE, then schedules the anonymize-and-push workflow.

use anyhow::Result;

mod check;
mod cli;
mod config;
mod cube;
mod descriptor;
mod domain;
mod error;
mod report;
mod scan;

fn main() -> Result<()> {
    cli::run()
}
