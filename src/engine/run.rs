//! Run and step records.
//!
//! A [`Run`] is mutated only through its transition methods, which enforce
//! `queued -> running -> success | failed` and strictly ordered step updates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use super::error::EngineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Queued,
    Running,
    Success,
    Failed,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Success | RunStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Queued => "queued",
            RunStatus::Running => "running",
            RunStatus::Success => "success",
            RunStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a status poll. Unknown ids yield `NotFound` rather than an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolledStatus {
    Queued,
    Running,
    Success,
    Failed,
    NotFound,
}

impl From<RunStatus> for PolledStatus {
    fn from(status: RunStatus) -> Self {
        match status {
            RunStatus::Queued => PolledStatus::Queued,
            RunStatus::Running => PolledStatus::Running,
            RunStatus::Success => PolledStatus::Success,
            RunStatus::Failed => PolledStatus::Failed,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Pending,
    Running,
    Success,
    Failed,
}

// ---------------------------------------------------------------------------
// StepSpec
// ---------------------------------------------------------------------------

/// A step as submitted: a verb and an unvalidated parameter bag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepSpec {
    pub command: String,
    #[serde(default)]
    pub params: Map<String, Value>,
}

impl StepSpec {
    /// Non-object `params` are treated as an empty bag.
    pub fn new(command: impl Into<String>, params: Value) -> Self {
        let params = match params {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self {
            command: command.into(),
            params,
        }
    }

    /// Validate one element of a submitted `steps` array.
    ///
    /// The element must be an object with a string `command`; `params`, when
    /// present, must be an object. Emptiness is checked when the run is submitted.
    pub fn from_value(index: usize, value: &Value) -> Result<Self, EngineError> {
        let object = value.as_object().ok_or_else(|| {
            EngineError::InvalidRequest(format!("step {} is not an object", index))
        })?;

        let command = object
            .get("command")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                EngineError::InvalidRequest(format!("step {} has no command", index))
            })?;

        let params = match object.get("params") {
            None | Some(Value::Null) => Map::new(),
            Some(Value::Object(map)) => map.clone(),
            Some(_) => {
                return Err(EngineError::InvalidRequest(format!(
                    "step {} params must be an object",
                    index
                )))
            }
        };

        Ok(Self {
            command: command.to_string(),
            params,
        })
    }
}

// ---------------------------------------------------------------------------
// Step / Run
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub command: String,
    pub params: Map<String, Value>,
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Mutable execution record of one submission.
#[derive(Debug, Clone)]
pub struct Run {
    id: String,
    name: String,
    status: RunStatus,
    start_time: Option<DateTime<Utc>>,
    end_time: Option<DateTime<Utc>>,
    steps: Vec<Step>,
    result: Option<Value>,
}

impl Run {
    pub fn new(name: impl Into<String>, specs: Vec<StepSpec>) -> Self {
        let steps = specs
            .into_iter()
            .map(|spec| Step {
                command: spec.command,
                params: spec.params,
                status: StepStatus::Pending,
                error: None,
            })
            .collect();

        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            status: RunStatus::Queued,
            start_time: None,
            end_time: None,
            steps,
            result: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn status(&self) -> RunStatus {
        self.status
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// `queued -> running`. Returns `false` if the run was not queued.
    pub fn start(&mut self) -> bool {
        if self.status != RunStatus::Queued {
            return false;
        }
        self.status = RunStatus::Running;
        self.start_time = Some(Utc::now());
        true
    }

    pub fn step_started(&mut self, index: usize) {
        if let Some(step) = self.steps.get_mut(index) {
            step.status = StepStatus::Running;
        }
    }

    pub fn step_succeeded(&mut self, index: usize) {
        if let Some(step) = self.steps.get_mut(index) {
            step.status = StepStatus::Success;
        }
    }

    /// Mark the step failed. The run itself fails at the same instant.
    pub fn step_failed(&mut self, index: usize, error: impl Into<String>) {
        if let Some(step) = self.steps.get_mut(index) {
            step.status = StepStatus::Failed;
            step.error = Some(error.into());
        }
        self.status = RunStatus::Failed;
    }

    /// Fail whichever step is still marked running.
    pub fn fail_running_step(&mut self, error: impl Into<String>) {
        if let Some(index) = self
            .steps
            .iter()
            .position(|s| s.status == StepStatus::Running)
        {
            self.step_failed(index, error);
        }
    }

    /// Terminal transition; stamps `end_time` exactly once.
    pub fn finish(&mut self, succeeded: bool) {
        if self.end_time.is_some() {
            return;
        }
        self.status = if succeeded {
            RunStatus::Success
        } else {
            RunStatus::Failed
        };
        self.end_time = Some(Utc::now());
    }

    pub fn snapshot(&self) -> RunSnapshot {
        RunSnapshot {
            id: self.id.clone(),
            name: self.name.clone(),
            status: self.status,
            start_time: self.start_time,
            end_time: self.end_time,
            steps: self.steps.clone(),
            result: self.result.clone(),
        }
    }
}

/// Immutable copy of a run, as returned by `results`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSnapshot {
    pub id: String,
    pub name: String,
    pub status: RunStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    pub steps: Vec<Step>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn two_step_run() -> Run {
        Run::new(
            "checkout",
            vec![
                StepSpec::new("visit", json!({ "url": "https://x" })),
                StepSpec::new("click", json!({ "selector": "#buy" })),
            ],
        )
    }

    #[test]
    fn test_new_run_is_queued_with_pending_steps() {
        let run = two_step_run();
        assert_eq!(run.status(), RunStatus::Queued);
        assert!(!run.id().is_empty());
        assert!(run.steps().iter().all(|s| s.status == StepStatus::Pending));

        let snap = run.snapshot();
        assert!(snap.start_time.is_none());
        assert!(snap.end_time.is_none());
        assert!(snap.result.is_none());
    }

    #[test]
    fn test_start_only_from_queued() {
        let mut run = two_step_run();
        assert!(run.start());
        let started = run.snapshot().start_time;
        assert!(started.is_some());
        assert!(!run.start());
        assert_eq!(run.snapshot().start_time, started);
    }

    #[test]
    fn test_step_failure_fails_run() {
        let mut run = two_step_run();
        run.start();
        run.step_started(0);
        run.step_failed(0, "boom");
        assert_eq!(run.status(), RunStatus::Failed);
        assert_eq!(run.steps()[0].error.as_deref(), Some("boom"));
        assert_eq!(run.steps()[1].status, StepStatus::Pending);
    }

    #[test]
    fn test_fail_running_step() {
        let mut run = two_step_run();
        run.start();
        run.step_started(0);
        run.step_succeeded(0);
        run.step_started(1);
        run.fail_running_step("run aborted: panic");
        assert_eq!(run.steps()[0].status, StepStatus::Success);
        assert_eq!(run.steps()[1].status, StepStatus::Failed);
        assert_eq!(run.status(), RunStatus::Failed);
    }

    #[test]
    fn test_finish_stamps_end_once() {
        let mut run = two_step_run();
        run.start();
        run.finish(true);
        let ended = run.snapshot().end_time;
        assert_eq!(run.status(), RunStatus::Success);
        run.finish(false);
        assert_eq!(run.status(), RunStatus::Success);
        assert_eq!(run.snapshot().end_time, ended);
    }

    #[test]
    fn test_step_spec_from_value() {
        let spec = StepSpec::from_value(0, &json!({ "command": "wait" })).unwrap();
        assert_eq!(spec.command, "wait");
        assert!(spec.params.is_empty());

        let spec =
            StepSpec::from_value(0, &json!({ "command": "click", "params": { "selector": "a" } }))
                .unwrap();
        assert_eq!(spec.params["selector"], "a");

        for bad in [
            json!("visit"),
            json!({ "params": {} }),
            json!({ "command": 3 }),
            json!({ "command": "visit", "params": [1, 2] }),
        ] {
            assert!(matches!(
                StepSpec::from_value(0, &bad),
                Err(EngineError::InvalidRequest(_))
            ));
        }
    }

    #[test]
    fn test_snapshot_wire_shape() {
        let mut run = two_step_run();
        run.start();
        run.step_started(0);
        run.step_failed(0, "Unknown command: visit");
        run.finish(false);

        let value = serde_json::to_value(run.snapshot()).unwrap();
        assert_eq!(value["status"], "failed");
        assert_eq!(value["name"], "checkout");
        assert!(value["startTime"].is_string());
        assert!(value["endTime"].is_string());
        assert!(value.get("result").is_none());
        assert_eq!(value["steps"][0]["status"], "failed");
        assert_eq!(value["steps"][0]["params"]["url"], "https://x");
        assert_eq!(value["steps"][1]["status"], "pending");
        assert!(value["steps"][1].get("error").is_none());
    }

    #[test]
    fn test_polled_status_strings() {
        assert_eq!(PolledStatus::from(RunStatus::Queued), PolledStatus::Queued);
        assert_eq!(
            serde_json::to_value(PolledStatus::from(RunStatus::Failed)).unwrap(),
            json!("failed")
        );
        assert_eq!(
            serde_json::to_value(PolledStatus::NotFound).unwrap(),
            json!("not_found")
        );
    }
}
