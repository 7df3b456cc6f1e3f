//! Registration verification
//!
//! For every series in an input file: wait for CUBE to report it registered,
//! then (optionally) copy its DICOM directory into a new plugin instance and
//! schedule the anonymize-and-push workflow off that instance. A failing
//! series is recorded and the remaining series are still checked.

pub mod poll;
#[cfg(test)]
mod testing;

use indicatif::ProgressBar;
use std::fs;
use std::path::Path;

use crate::cube::{CubeApi, PluginOverrides};
use crate::domain::{FileReport, SearchParams, SeriesOutcome, SeriesRecord, Stage};
use crate::error::{RegChxrError, Result};
use crate::scan::InputFile;
pub use poll::{PollPolicy, PollResult, Sleeper, ThreadSleeper};

/// What to do once a series is confirmed registered.
#[derive(Debug, Clone)]
pub enum FollowUp {
    /// Stop after the registration check.
    None,
    /// Run dircopy off `previous_id`, then schedule the workflow with `overrides`.
    Workflow {
        previous_id: String,
        overrides: PluginOverrides,
    },
}

pub struct Verifier<'a, C: CubeApi + ?Sized, S: Sleeper + ?Sized> {
    cube: &'a C,
    sleeper: &'a S,
    policy: PollPolicy,
    follow_up: FollowUp,
    progress: ProgressBar,
}

impl<'a, C: CubeApi + ?Sized, S: Sleeper + ?Sized> Verifier<'a, C, S> {
    pub fn new(cube: &'a C, sleeper: &'a S, policy: PollPolicy, follow_up: FollowUp) -> Self {
        Self {
            cube,
            sleeper,
            policy,
            follow_up,
            progress: ProgressBar::hidden(),
        }
    }

    /// Report polling progress on `progress` (hidden by default).
    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = progress;
        self
    }

    /// Check every series in one input file. File-level problems (unreadable,
    /// malformed, empty) become a failed report rather than an error.
    pub fn verify_file(&self, input: &InputFile) -> FileReport {
        let records = match read_series(&input.path) {
            Ok(records) => records,
            Err(err) => {
                tracing::warn!("{}: {err}", input.relative_path);
                return FileReport::from_error(input.relative_path.clone(), err.to_string());
            }
        };

        tracing::info!(
            "{}: checking {} series",
            input.relative_path,
            records.len()
        );
        let outcomes = records
            .iter()
            .map(|record| self.verify_series(record))
            .collect();
        FileReport::from_series(input.relative_path.clone(), outcomes)
    }

    pub fn verify_series(&self, record: &SeriesRecord) -> SeriesOutcome {
        let mut outcome = SeriesOutcome::new(record);
        let params = record.search_params();
        self.progress
            .set_message(format!("waiting for {}", params.series_instance_uid));

        let polled = poll::wait_for_registration(
            self.cube,
            &params,
            self.policy,
            self.sleeper,
            |n, count| {
                self.progress.set_message(format!(
                    "{}: poll {n}/{} ({count} registered)",
                    params.series_instance_uid,
                    self.policy.max_polls.saturating_add(1)
                ));
                self.progress.tick();
            },
        );

        match polled {
            Ok(PollResult { registered, polls }) => {
                outcome.registered = registered;
                outcome.polls = polls;
            }
            Err(err) => {
                tracing::warn!("registration query failed for {params}: {err}");
                outcome.fail(Stage::Registration, err.to_string());
                return outcome;
            }
        }

        if outcome.registered == 0 {
            tracing::warn!(
                "registration not found for {params} after {} polls",
                outcome.polls
            );
            outcome.fail(
                Stage::Registration,
                "PACS file registration unsuccessful. Please try again.",
            );
            return outcome;
        }
        tracing::info!(
            "{} files successfully registered to CUBE.",
            record.number_of_instances
        );

        match &self.follow_up {
            FollowUp::None => outcome.pass(Stage::Registration),
            FollowUp::Workflow {
                previous_id,
                overrides,
            } => {
                self.run_follow_up(&mut outcome, &params, previous_id, overrides);
            }
        }
        outcome
    }

    fn run_follow_up(
        &self,
        outcome: &mut SeriesOutcome,
        params: &SearchParams,
        previous_id: &str,
        overrides: &PluginOverrides,
    ) {
        let dicom_dir = match self.cube.series_dicom_dir(params) {
            Ok(dir) => dir,
            Err(err) => return outcome.fail(Stage::Locate, err.to_string()),
        };
        outcome.dicom_dir = Some(dicom_dir.clone());

        let dircopy_id = match self.cube.run_dircopy(&dicom_dir, previous_id) {
            Ok(id) => id,
            Err(err) => {
                tracing::warn!("Error occurred while creating dsdircopy instance: {err}");
                return outcome.fail(Stage::Dircopy, err.to_string());
            }
        };
        outcome.dircopy_instance_id = Some(dircopy_id);

        match self.cube.schedule_workflow(dircopy_id, overrides) {
            Ok(workflow) => {
                tracing::info!(
                    "scheduled workflow {} ({} plugin instances) for {}",
                    workflow.id,
                    workflow.plugin_instance_ids.len(),
                    dicom_dir
                );
                outcome.workflow_id = Some(workflow.id);
                outcome.workflow_instance_ids = workflow.plugin_instance_ids;
                outcome.pass(Stage::Done);
            }
            Err(err) => outcome.fail(Stage::Workflow, err.to_string()),
        }
    }
}

/// Read the series list from an input file.
pub fn read_series(path: &Path) -> Result<Vec<SeriesRecord>> {
    let invalid = |reason: String| RegChxrError::Input {
        path: path.display().to_string(),
        reason,
    };
    let raw = fs::read_to_string(path).map_err(|e| invalid(e.to_string()))?;
    let records: Vec<SeriesRecord> =
        serde_json::from_str(&raw).map_err(|e| invalid(e.to_string()))?;
    if records.is_empty() {
        return Err(RegChxrError::EmptySeries);
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::testing::{FakeCube, RecordingSleeper};
    use super::*;
    use crate::domain::CheckStatus;
    use serde_json::Value;
    use std::path::PathBuf;
    use std::time::Duration;
    use tempfile::TempDir;

    fn record(uid: &str) -> SeriesRecord {
        SeriesRecord {
            series_instance_uid: uid.to_string(),
            study_instance_uid: "1.2".to_string(),
            number_of_instances: 12,
            series_description: None,
            patient_id: None,
        }
    }

    fn quick() -> PollPolicy {
        PollPolicy {
            max_polls: 2,
            interval: Duration::ZERO,
        }
    }

    fn workflow() -> FollowUp {
        FollowUp::Workflow {
            previous_id: "7".to_string(),
            overrides: vec![(
                "dicom-anonymization".to_string(),
                vec![("tagStruct".to_string(), Value::from("{}"))],
            )],
        }
    }

    fn input_with(dir: &TempDir, name: &str, body: &str) -> InputFile {
        let path = dir.path().join(name);
        fs::write(&path, body).expect("write input");
        InputFile {
            path,
            relative_path: name.to_string(),
            report_path: PathBuf::from(format!("out/{name}")),
        }
    }

    #[test]
    fn registered_series_runs_dircopy_and_workflow() {
        let cube = FakeCube::registered_after(1, 1);
        let sleeper = RecordingSleeper::default();
        let verifier = Verifier::new(&cube, &sleeper, quick(), workflow());

        let outcome = verifier.verify_series(&record("1.2.3"));
        assert_eq!(outcome.status, CheckStatus::Passed);
        assert_eq!(outcome.stage, Stage::Done);
        assert_eq!(outcome.polls, 1);
        assert_eq!(
            outcome.dicom_dir.as_deref(),
            Some("SERVICES/PACS/ORTHANC/series-1")
        );
        assert_eq!(outcome.dircopy_instance_id, Some(41));
        assert_eq!(outcome.workflow_id, Some(9));
        assert_eq!(outcome.workflow_instance_ids, vec![42, 43]);

        let dircopy = cube.dircopy_calls.borrow();
        assert_eq!(
            dircopy.as_slice(),
            &[(
                "SERVICES/PACS/ORTHANC/series-1".to_string(),
                "7".to_string()
            )]
        );
        let workflows = cube.workflow_calls.borrow();
        assert_eq!(workflows.len(), 1);
        assert_eq!(workflows[0].0, 41);
    }

    #[test]
    fn unregistered_series_fails_without_follow_up() {
        let cube = FakeCube::never_registered();
        let sleeper = RecordingSleeper::default();
        let verifier = Verifier::new(&cube, &sleeper, quick(), workflow());

        let outcome = verifier.verify_series(&record("1.2.3"));
        assert_eq!(outcome.status, CheckStatus::Failed);
        assert_eq!(outcome.stage, Stage::Registration);
        assert_eq!(outcome.polls, 3);
        assert_eq!(
            outcome.message.as_deref(),
            Some("PACS file registration unsuccessful. Please try again.")
        );
        assert!(cube.dircopy_calls.borrow().is_empty());
    }

    #[test]
    fn no_follow_up_passes_at_registration() {
        let cube = FakeCube::registered_after(0, 3);
        let sleeper = RecordingSleeper::default();
        let verifier = Verifier::new(&cube, &sleeper, quick(), FollowUp::None);

        let outcome = verifier.verify_series(&record("1.2.3"));
        assert_eq!(outcome.status, CheckStatus::Passed);
        assert_eq!(outcome.stage, Stage::Registration);
        assert_eq!(outcome.registered, 3);
        assert!(cube.dircopy_calls.borrow().is_empty());
    }

    #[test]
    fn largest_poll_count_does_not_overflow_progress() {
        let cube = FakeCube::registered_after(1, 1);
        let sleeper = RecordingSleeper::default();
        let policy = PollPolicy {
            max_polls: u32::MAX,
            interval: Duration::ZERO,
        };

        let outcome =
            Verifier::new(&cube, &sleeper, policy, FollowUp::None).verify_series(&record("a"));
        assert_eq!(outcome.status, CheckStatus::Passed);
        assert_eq!(outcome.polls, 1);
    }

    #[test]
    fn failures_are_attributed_to_their_stage() {
        let sleeper = RecordingSleeper::default();

        let mut cube = FakeCube::registered_after(0, 1);
        cube.dicom_dir = None;
        let outcome =
            Verifier::new(&cube, &sleeper, quick(), workflow()).verify_series(&record("a"));
        assert_eq!(outcome.stage, Stage::Locate);
        assert!(outcome
            .message
            .unwrap_or_default()
            .contains("No directory found"));

        let mut cube = FakeCube::registered_after(0, 1);
        cube.dircopy_id = None;
        let outcome =
            Verifier::new(&cube, &sleeper, quick(), workflow()).verify_series(&record("b"));
        assert_eq!(outcome.stage, Stage::Dircopy);
        assert!(cube.workflow_calls.borrow().is_empty());

        let mut cube = FakeCube::registered_after(0, 1);
        cube.workflow = None;
        let outcome =
            Verifier::new(&cube, &sleeper, quick(), workflow()).verify_series(&record("c"));
        assert_eq!(outcome.stage, Stage::Workflow);
        assert_eq!(outcome.status, CheckStatus::Failed);
        assert_eq!(outcome.dircopy_instance_id, Some(41));
    }

    #[test]
    fn empty_series_file_fails_the_file() {
        let dir = TempDir::new().expect("temp");
        let input = input_with(&dir, "empty.json", "[]");
        let cube = FakeCube::registered_after(0, 1);
        let sleeper = RecordingSleeper::default();

        let report = Verifier::new(&cube, &sleeper, quick(), FollowUp::None).verify_file(&input);
        assert_eq!(report.status, CheckStatus::Failed);
        assert_eq!(
            report.error.as_deref(),
            Some("Cannot verify registration for empty pacs data.")
        );
        assert_eq!(cube.count_queries(), 0);
    }

    #[test]
    fn malformed_file_names_the_file() {
        let dir = TempDir::new().expect("temp");
        let input = input_with(&dir, "bad.json", r#"{"SeriesInstanceUID": "1"}"#);
        let cube = FakeCube::registered_after(0, 1);
        let sleeper = RecordingSleeper::default();

        let report = Verifier::new(&cube, &sleeper, quick(), FollowUp::None).verify_file(&input);
        assert_eq!(report.status, CheckStatus::Failed);
        assert!(report.error.unwrap_or_default().contains("bad.json"));
    }

    #[test]
    fn unreadable_file_names_the_file() {
        let dir = TempDir::new().expect("temp");
        let path = dir.path().join("binary.json");
        fs::write(&path, [0xff_u8, 0xfe, 0x00]).expect("write input");

        let err = read_series(&path).unwrap_err();
        assert!(matches!(err, RegChxrError::Input { .. }));
        assert!(err.to_string().contains("binary.json"));
    }

    #[test]
    fn every_series_is_checked_even_after_a_failure() {
        let dir = TempDir::new().expect("temp");
        let input = input_with(
            &dir,
            "two.json",
            r#"[
                {"SeriesInstanceUID": "1", "StudyInstanceUID": "9", "NumberOfSeriesRelatedInstances": "3"},
                {"SeriesInstanceUID": "2", "StudyInstanceUID": "9", "NumberOfSeriesRelatedInstances": "4"}
            ]"#,
        );
        // The first series consumes all four zero answers (one query plus three polls).
        let cube = FakeCube::registered_after(4, 1);
        let sleeper = RecordingSleeper::default();

        let report = Verifier::new(&cube, &sleeper, quick(), FollowUp::None).verify_file(&input);
        assert_eq!(report.series.len(), 2);
        assert_eq!(report.series[0].status, CheckStatus::Failed);
        assert_eq!(report.series[1].status, CheckStatus::Passed);
        assert_eq!(report.status, CheckStatus::Failed);
    }
}
