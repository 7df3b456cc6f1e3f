//! In-memory CUBE and sleeper used by the check tests

use std::cell::{Cell, RefCell};
use std::time::Duration;

use super::poll::Sleeper;
use crate::cube::{CubeApi, PluginOverrides, ScheduledWorkflow};
use crate::domain::SearchParams;
use crate::error::{RegChxrError, Result};

pub struct FakeCube {
    /// Queries answered with zero before `registered` is reported
    zero_queries: usize,
    registered: u64,
    queries: Cell<usize>,
    pub dicom_dir: Option<String>,
    pub dircopy_id: Option<u64>,
    pub workflow: Option<ScheduledWorkflow>,
    pub dircopy_calls: RefCell<Vec<(String, String)>>,
    pub workflow_calls: RefCell<Vec<(u64, PluginOverrides)>>,
}

impl FakeCube {
    pub fn registered_after(zero_queries: usize, registered: u64) -> Self {
        Self {
            zero_queries,
            registered,
            queries: Cell::new(0),
            dicom_dir: Some("SERVICES/PACS/ORTHANC/series-1".to_string()),
            dircopy_id: Some(41),
            workflow: Some(ScheduledWorkflow {
                id: 9,
                plugin_instance_ids: vec![42, 43],
            }),
            dircopy_calls: RefCell::new(Vec::new()),
            workflow_calls: RefCell::new(Vec::new()),
        }
    }

    pub fn never_registered() -> Self {
        Self::registered_after(usize::MAX, 0)
    }

    pub fn count_queries(&self) -> usize {
        self.queries.get()
    }
}

impl CubeApi for FakeCube {
    fn health_check(&self) -> Result<()> {
        Ok(())
    }

    fn registered_series_count(&self, _params: &SearchParams) -> Result<u64> {
        let n = self.queries.get();
        self.queries.set(n + 1);
        Ok(if n < self.zero_queries {
            0
        } else {
            self.registered
        })
    }

    fn series_dicom_dir(&self, params: &SearchParams) -> Result<String> {
        self.dicom_dir.clone().ok_or_else(|| {
            RegChxrError::NotFound(format!(
                "No directory found in CUBE containing files for search: {params}"
            ))
        })
    }

    fn run_dircopy(&self, dicom_dir: &str, previous_id: &str) -> Result<u64> {
        self.dircopy_calls
            .borrow_mut()
            .push((dicom_dir.to_string(), previous_id.to_string()));
        self.dircopy_id.ok_or_else(|| {
            RegChxrError::NotFound("Plugin instance could not be scheduled.".to_string())
        })
    }

    fn schedule_workflow(
        &self,
        previous_instance_id: u64,
        overrides: &PluginOverrides,
    ) -> Result<ScheduledWorkflow> {
        self.workflow_calls
            .borrow_mut()
            .push((previous_instance_id, overrides.clone()));
        self.workflow.clone().ok_or(RegChxrError::Cube {
            status: 400,
            url: "workflows".to_string(),
        })
    }
}

#[derive(Default)]
pub struct RecordingSleeper {
    calls: RefCell<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn calls(&self) -> Vec<Duration> {
        self.calls.borrow().clone()
    }
}

impl Sleeper for RecordingSleeper {
    fn sleep(&self, duration: Duration) {
        self.calls.borrow_mut().push(duration);
    }
}
