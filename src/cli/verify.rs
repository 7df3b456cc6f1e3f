//! Registration check command implementation

use anyhow::{Context, Result};
use clap::parser::ValueSource;
use clap::{ArgMatches, Args};
use console::{style, Term};
use indicatif::{ProgressBar, ProgressStyle};
use std::fs;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use super::Cli;
use crate::check::{FollowUp, PollPolicy, ThreadSleeper, Verifier};
use crate::config::{
    self, load_config, merge_cli_with_config, resolve_plugin_instance_id, CliOverrides,
};
use crate::cube::{pipeline, CubeApi, CubeClient};
use crate::domain::{
    default_cube_password, default_cube_url, default_cube_user, default_input_glob,
    default_orthanc_password, default_orthanc_url, default_orthanc_username, default_poll_count,
    default_poll_interval_secs, CheckStatus, FileReport, RunStats, SeriesOutcome,
};
use crate::report::{write_file_report, write_summary};
use crate::scan::discover_inputs;

/// Failed series listed in the console summary before truncating.
const MAX_LISTED_FAILURES: usize = 10;

#[derive(Args, Debug)]
pub struct VerifyArgs {
    /// CUBE URL
    #[arg(long = "CUBEurl", value_name = "URL", default_value_t = default_cube_url())]
    pub cube_url: String,

    /// Plugin instance ID from which to start analysis
    #[arg(long = "pluginInstanceID", value_name = "ID", default_value = "")]
    pub plugin_instance_id: String,

    /// CUBE/ChRIS username
    #[arg(long = "CUBEuser", value_name = "USER", default_value_t = default_cube_user())]
    pub cube_user: String,

    /// CUBE/ChRIS password
    #[arg(
        long = "CUBEpassword",
        value_name = "PASSWORD",
        default_value_t = default_cube_password()
    )]
    pub cube_password: String,

    /// Glob selecting the JSON files with the DICOM series to verify
    #[arg(long = "inputJSONfile", value_name = "GLOB", default_value_t = default_input_glob())]
    pub input_json_file: String,

    /// Directive to use to anonymize DICOMs
    #[arg(long = "tagStruct", value_name = "JSON", default_value = "")]
    pub tag_struct: String,

    /// Orthanc server url
    #[arg(
        short = 'o',
        long = "orthancUrl",
        value_name = "URL",
        default_value_t = default_orthanc_url()
    )]
    pub orthanc_url: String,

    /// Orthanc server username
    #[arg(
        short = 'u',
        long = "orthancUsername",
        value_name = "USER",
        default_value_t = default_orthanc_username()
    )]
    pub orthanc_username: String,

    /// Orthanc server password
    #[arg(
        short = 'p',
        long = "orthancPassword",
        value_name = "PASSWORD",
        default_value_t = default_orthanc_password()
    )]
    pub orthanc_password: String,

    /// Remote modality
    #[arg(short = 'r', long = "pushToRemote", value_name = "AET", default_value = "")]
    pub push_to_remote: String,

    /// Extra registration polls before giving up
    #[arg(long = "pollCount", value_name = "N", default_value_t = default_poll_count())]
    pub poll_count: u32,

    /// Seconds to wait between registration polls
    #[arg(
        long = "pollInterval",
        value_name = "SECONDS",
        default_value_t = default_poll_interval_secs()
    )]
    pub poll_interval: u64,

    /// Only verify registration; do not schedule the anonymize-and-push workflow
    #[arg(long = "noWorkflow")]
    pub no_workflow: bool,

    /// Omit timestamps from reports for reproducible output
    #[arg(long)]
    pub no_timestamp: bool,
}

impl VerifyArgs {
    /// Only flags given on the command line override the config file and environment.
    pub fn overrides(&self, matches: &ArgMatches) -> CliOverrides {
        let given = |id: &str| matches!(matches.value_source(id), Some(ValueSource::CommandLine));
        let pick = |id: &str, value: &String| given(id).then(|| value.clone());

        CliOverrides {
            cube_url: pick("cube_url", &self.cube_url),
            cube_user: pick("cube_user", &self.cube_user),
            cube_password: pick("cube_password", &self.cube_password),
            plugin_instance_id: pick("plugin_instance_id", &self.plugin_instance_id),
            input_glob: pick("input_json_file", &self.input_json_file),
            tag_struct: pick("tag_struct", &self.tag_struct),
            orthanc_url: pick("orthanc_url", &self.orthanc_url),
            orthanc_username: pick("orthanc_username", &self.orthanc_username),
            orthanc_password: pick("orthanc_password", &self.orthanc_password),
            push_to_remote: pick("push_to_remote", &self.push_to_remote),
            poll_count: given("poll_count").then_some(self.poll_count),
            poll_interval_secs: given("poll_interval").then_some(self.poll_interval),
            schedule_workflow: self.no_workflow.then_some(false),
        }
    }
}

pub fn run(cli: Cli, matches: &ArgMatches) -> Result<()> {
    let start_time = Instant::now();
    let input_dir = cli.inputdir.context("INPUTDIR is required")?;
    let output_dir = cli.outputdir.context("OUTPUTDIR is required")?;
    let args = cli.verify;

    println!(
        "{} {}",
        style(env!("CARGO_PKG_NAME")).cyan().bold(),
        style(concat!("v", env!("CARGO_PKG_VERSION"))).dim()
    );
    println!("{}", style(crate::descriptor::TITLE).dim());
    println!();

    let cwd = std::env::current_dir()?;
    let file_config = load_config(&cwd, cli.config.as_deref())?;
    let mut merged =
        config::normalize(merge_cli_with_config(file_config, args.overrides(matches)));

    let inputs = discover_inputs(&input_dir, &output_dir, &merged.input_glob)?;
    if inputs.is_empty() {
        anyhow::bail!(
            "No input files matching '{}' found in {}",
            merged.input_glob,
            input_dir.display()
        );
    }
    tracing::info!(
        "found {} input file(s) in {}",
        inputs.len(),
        input_dir.display()
    );

    let follow_up = if merged.schedule_workflow {
        let previous_id = resolve_plugin_instance_id(&mut merged)?;
        FollowUp::Workflow {
            previous_id,
            overrides: pipeline::anonymize_and_push_overrides(
                &merged.tag_struct,
                &merged.send_params(),
            ),
        }
    } else {
        FollowUp::None
    };

    let cube = CubeClient::from_config(&merged)?;
    cube.health_check()?;
    tracing::info!("connected to CUBE at {}", cube.base_url());

    fs::create_dir_all(&output_dir)
        .with_context(|| format!("Failed to create output directory {}", output_dir.display()))?;

    let policy = PollPolicy {
        max_polls: merged.poll_count,
        interval: Duration::from_secs(merged.poll_interval_secs),
    };
    let progress = spinner();
    let verifier = Verifier::new(&cube, &ThreadSleeper, policy, follow_up)
        .with_progress(progress.clone());

    let mut reports: Vec<(PathBuf, FileReport)> = Vec::with_capacity(inputs.len());
    for input in &inputs {
        let report = verifier.verify_file(input);
        write_file_report(&input.report_path, &report, !args.no_timestamp)?;
        reports.push((input.report_path.clone(), report));
    }
    progress.finish_and_clear();

    let summary_path = write_summary(&output_dir, &reports, &merged, !args.no_timestamp)?;

    let file_reports: Vec<FileReport> = reports.iter().map(|(_, r)| r.clone()).collect();
    let stats = RunStats::from_reports(&file_reports);

    // --- Print check summary ---
    println!("Registration check complete!");
    println!();
    println!("Statistics:");
    println!("  CUBE:            {}", merged.cube_url);
    println!("  Files checked:   {}", stats.files_checked);
    println!("  Series checked:  {}", stats.series_checked);
    println!("  Series passed:   {}", stats.series_passed);
    println!("  Series failed:   {}", stats.series_failed);
    if stats.files_failed > 0 {
        println!("  Files failed:    {}", stats.files_failed);
    }
    println!(
        "  Processing time: {:.2}s",
        start_time.elapsed().as_secs_f64()
    );
    println!("  Status:          {}", status_label(stats.status()));

    let failures = failure_lines(&file_reports);
    if !failures.is_empty() {
        println!();
        println!("Failures:");
        for line in failures.iter().take(MAX_LISTED_FAILURES) {
            println!("  {line}");
        }
        if failures.len() > MAX_LISTED_FAILURES {
            println!(
                "  ... and {} more (see {})",
                failures.len() - MAX_LISTED_FAILURES,
                summary_path.display()
            );
        }
    }

    println!();
    println!("Output files:");
    for (path, _) in &reports {
        println!("  {}", path.display());
    }
    println!("  {}", summary_path.display());

    if stats.status() == CheckStatus::Failed {
        anyhow::bail!(
            "Registration check failed: {} of {} series, {} of {} file(s)",
            stats.series_failed,
            stats.series_checked,
            stats.files_failed,
            stats.files_checked
        );
    }
    Ok(())
}

fn spinner() -> ProgressBar {
    if !Term::stderr().is_term() {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.enable_steady_tick(Duration::from_millis(120));
    pb
}

fn status_label(status: CheckStatus) -> String {
    match status {
        CheckStatus::Passed => style("PASSED").green().bold().to_string(),
        CheckStatus::Failed => style("FAILED").red().bold().to_string(),
    }
}

fn failure_lines(reports: &[FileReport]) -> Vec<String> {
    let mut lines = Vec::new();
    for report in reports {
        if let Some(error) = report.error.as_deref() {
            lines.push(format!("{}: {error}", report.input));
        }
        lines.extend(
            report
                .series
                .iter()
                .filter(|s| !s.status.is_passed())
                .map(|s| describe_failure(&report.input, s)),
        );
    }
    lines
}

fn describe_failure(input: &str, outcome: &SeriesOutcome) -> String {
    let stage = serde_json::to_value(outcome.stage)
        .ok()
        .and_then(|v| v.as_str().map(ToString::to_string))
        .unwrap_or_default();
    format!(
        "{input}: {} failed at {stage}: {}",
        outcome.series_instance_uid,
        outcome.message.as_deref().unwrap_or("unknown error")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{SeriesRecord, Stage};
    use clap::{CommandFactory, FromArgMatches};
    use insta::assert_snapshot;

    fn parse(args: &[&str]) -> (Cli, ArgMatches) {
        let matches = Cli::command()
            .try_get_matches_from(args)
            .expect("parse args");
        let cli = Cli::from_arg_matches(&matches).expect("from matches");
        (cli, matches)
    }

    #[test]
    fn only_explicit_flags_become_overrides() {
        let (cli, matches) = parse(&[
            "reg-chxr",
            "in",
            "out",
            "--CUBEurl",
            "http://cube/api/v1/",
            "--pollCount",
            "3",
        ]);
        let overrides = cli.verify.overrides(&matches);
        assert_eq!(overrides.cube_url.as_deref(), Some("http://cube/api/v1/"));
        assert_eq!(overrides.poll_count, Some(3));
        assert!(overrides.cube_user.is_none());
        assert!(overrides.poll_interval_secs.is_none());
        assert!(overrides.schedule_workflow.is_none());
    }

    #[test]
    fn short_flags_and_switches_map_to_overrides() {
        let (cli, matches) = parse(&[
            "reg-chxr",
            "in",
            "out",
            "-o",
            "http://orthanc:8042",
            "-r",
            "REMOTE",
            "--noWorkflow",
        ]);
        let overrides = cli.verify.overrides(&matches);
        assert_eq!(overrides.orthanc_url.as_deref(), Some("http://orthanc:8042"));
        assert_eq!(overrides.push_to_remote.as_deref(), Some("REMOTE"));
        assert_eq!(overrides.schedule_workflow, Some(false));
    }

    #[test]
    fn positional_dirs_are_optional_only_with_json() {
        let parses = |args: &[&str]| Cli::command().try_get_matches_from(args).is_ok();
        assert!(parses(&["reg-chxr", "--json"]));
        assert!(!parses(&["reg-chxr", "in"]));
    }

    #[test]
    fn failure_line_names_file_series_and_stage() {
        let record = SeriesRecord {
            series_instance_uid: "1.2.840.1".to_string(),
            study_instance_uid: "1.2.840".to_string(),
            number_of_instances: 4,
            series_description: None,
            patient_id: None,
        };
        let mut outcome = SeriesOutcome::new(&record);
        outcome.fail(
            Stage::Registration,
            "PACS file registration unsuccessful. Please try again.",
        );

        assert_snapshot!(
            describe_failure("sub/b.json", &outcome),
            @"sub/b.json: 1.2.840.1 failed at registration: PACS file registration unsuccessful. Please try again."
        );
    }

    #[test]
    fn failure_lines_include_file_errors() {
        let reports = vec![FileReport::from_error(
            "empty.json".to_string(),
            "Cannot verify registration for empty pacs data.",
        )];
        assert_eq!(
            failure_lines(&reports),
            vec!["empty.json: Cannot verify registration for empty pacs data.".to_string()]
        );
    }
}
