//! Execution engine: run lifecycle, step sequencing and failure containment.
//!
//! `submit` only records a queued run. `execute` (normally spawned through
//! [`Engine::dispatch`]) drives it to a terminal state. The two sides share
//! nothing but the [`RunStore`] and [`LogRegistry`].

pub mod command;
pub mod error;
pub mod run;
pub mod store;

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use serde_json::{json, Value};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

pub use self::command::Command;
pub use self::error::EngineError;
pub use self::run::{PolledStatus, Run, RunSnapshot, RunStatus, Step, StepSpec, StepStatus};
pub use self::store::RunStore;

use crate::config::EngineConfig;
use crate::driver::{Driver, Session};
use crate::logs::{LogLevel, LogRegistry};

// ---------------------------------------------------------------------------
// Submission
// ---------------------------------------------------------------------------

/// A validated `{ testName, steps }` request body.
#[derive(Debug, Clone, PartialEq)]
pub struct Submission {
    pub name: String,
    pub steps: Vec<StepSpec>,
}

impl Submission {
    pub fn from_json(body: &Value) -> Result<Self, EngineError> {
        let name = body
            .get("testName")
            .and_then(Value::as_str)
            .ok_or_else(|| EngineError::InvalidRequest("testName is required".to_string()))?;

        let steps = body
            .get("steps")
            .and_then(Value::as_array)
            .ok_or_else(|| EngineError::InvalidRequest("steps must be a list".to_string()))?
            .iter()
            .enumerate()
            .map(|(index, step)| StepSpec::from_value(index, step))
            .collect::<Result<Vec<_>, _>>()?;

        validate(name, &steps)?;
        Ok(Self {
            name: name.to_string(),
            steps,
        })
    }
}

/// Checks shared by every entry point that creates a run.
fn validate(name: &str, steps: &[StepSpec]) -> Result<(), EngineError> {
    if name.is_empty() {
        return Err(EngineError::InvalidRequest("testName is required".to_string()));
    }
    if steps.is_empty() {
        return Err(EngineError::InvalidRequest(
            "steps must not be empty".to_string(),
        ));
    }
    if let Some(index) = steps.iter().position(|s| s.command.is_empty()) {
        return Err(EngineError::InvalidRequest(format!(
            "step {} has no command",
            index
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

struct Inner {
    runs: RunStore,
    logs: LogRegistry,
    driver: Arc<dyn Driver>,
    config: EngineConfig,
}

/// Cloneable handle; clones drive the same store.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<Inner>,
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "task panicked".to_string()
    }
}

impl Engine {
    pub fn new(
        runs: RunStore,
        logs: LogRegistry,
        driver: Arc<dyn Driver>,
        config: EngineConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                runs,
                logs,
                driver,
                config,
            }),
        }
    }

    pub fn logs(&self) -> &LogRegistry {
        &self.inner.logs
    }

    /// Record a queued run. Nothing executes until [`Engine::execute`].
    pub async fn submit(&self, name: &str, steps: Vec<StepSpec>) -> Result<String, EngineError> {
        validate(name, &steps)?;

        let count = steps.len();
        let id = self.inner.runs.insert(Run::new(name, steps)).await;
        let total = self.inner.runs.len().await;
        info!(run_id = %id, name, steps = count, runs = total, "run queued");
        Ok(id)
    }

    /// Spawn `execute` for the run as a detached task.
    pub fn dispatch(&self, run_id: String) -> JoinHandle<()> {
        let engine = self.clone();
        tokio::spawn(async move {
            engine.execute(&run_id).await;
        })
    }

    /// `submit` followed by `dispatch`; returns as soon as the run is queued.
    pub async fn submit_and_dispatch(
        &self,
        name: &str,
        steps: Vec<StepSpec>,
    ) -> Result<String, EngineError> {
        let id = self.submit(name, steps).await?;
        self.dispatch(id.clone());
        Ok(id)
    }

    /// Drive a queued run to a terminal state.
    ///
    /// Failures end up on the run, its steps and its log; nothing is returned.
    /// Unknown or already started runs are ignored.
    pub async fn execute(&self, run_id: &str) {
        match self.inner.runs.update(run_id, |run| run.start()).await {
            Ok(true) => {}
            Ok(false) => {
                warn!(run_id, "run is not queued, ignoring execute");
                return;
            }
            Err(e) => {
                warn!(run_id, error = %e, "cannot execute run");
                return;
            }
        }

        let logs = &self.inner.logs;
        logs.append(run_id, LogLevel::Info, "Starting test execution", None)
            .await;

        let outcome = match AssertUnwindSafe(self.drive(run_id)).catch_unwind().await {
            Ok(outcome) => outcome,
            Err(payload) => {
                let reason = panic_message(payload.as_ref());
                Err(self.abort(run_id, reason).await)
            }
        };
        let succeeded = match &outcome {
            Ok(()) => true,
            Err(e) => {
                debug!(run_id, error = %e, "run aborted");
                false
            }
        };

        if let Err(e) = self
            .inner
            .runs
            .update(run_id, |run| run.finish(succeeded))
            .await
        {
            error!(run_id, error = %e, "failed to record run outcome");
        }

        if succeeded {
            logs.append(run_id, LogLevel::Success, "Test finished successfully", None)
                .await;
        } else {
            logs.append(run_id, LogLevel::Error, "Test finished with error", None)
                .await;
        }
    }

    /// Record a panic caught inside a run: the running step (if any) fails
    /// with the panic message, which is also logged.
    async fn abort(&self, run_id: &str, reason: String) -> EngineError {
        let err = EngineError::Aborted(reason);
        let message = err.to_string();
        error!(run_id, error = %message, "run task panicked");
        if let Err(e) = self
            .inner
            .runs
            .update(run_id, |run| run.fail_running_step(message.clone()))
            .await
        {
            error!(run_id, error = %e, "failed to record aborted step");
        }
        self.inner
            .logs
            .append(run_id, LogLevel::Error, message, None)
            .await;
        err
    }

    /// Hold one session for the whole run; it is closed on every path that
    /// acquired it, step panics included. Panics while opening or closing
    /// the session are caught by `execute`.
    async fn drive(&self, run_id: &str) -> Result<(), EngineError> {
        let mut session = match self.inner.driver.open().await {
            Ok(session) => session,
            Err(e) => {
                self.inner
                    .logs
                    .append(
                        run_id,
                        LogLevel::Error,
                        format!("Failed to open driver session: {}", e),
                        Some(json!({ "driver": self.inner.driver.name() })),
                    )
                    .await;
                return Err(e.into());
            }
        };
        debug!(run_id, driver = self.inner.driver.name(), "driver session opened");

        let result = match AssertUnwindSafe(self.run_steps(run_id, session.as_mut()))
            .catch_unwind()
            .await
        {
            Ok(result) => result,
            Err(payload) => {
                let reason = panic_message(payload.as_ref());
                Err(self.abort(run_id, reason).await)
            }
        };

        if let Err(e) = session.close().await {
            warn!(run_id, error = %e, "failed to close driver session");
        }
        result
    }

    async fn run_steps(&self, run_id: &str, session: &mut dyn Session) -> Result<(), EngineError> {
        let steps = self
            .inner
            .runs
            .update(run_id, |run| run.steps().to_vec())
            .await?;
        let logs = &self.inner.logs;

        for (index, step) in steps.iter().enumerate() {
            self.inner
                .runs
                .update(run_id, |run| run.step_started(index))
                .await?;
            logs.append(
                run_id,
                LogLevel::Info,
                format!("Executing command: {}", step.command),
                Some(json!({
                    "step": index + 1,
                    "command": step.command,
                    "params": step.params,
                })),
            )
            .await;

            let outcome = match Command::parse(&step.command, &step.params, &self.inner.config) {
                Ok(command) => {
                    debug!(run_id, step = index + 1, command = command.verb(), "dispatching");
                    command.run(session).await
                }
                Err(e) => Err(e),
            };

            match outcome {
                Ok(()) => {
                    self.inner
                        .runs
                        .update(run_id, |run| run.step_succeeded(index))
                        .await?;
                    logs.append(
                        run_id,
                        LogLevel::Success,
                        format!("Command {} executed successfully", step.command),
                        None,
                    )
                    .await;
                }
                Err(e) => {
                    let message = e.to_string();
                    self.inner
                        .runs
                        .update(run_id, |run| run.step_failed(index, message.clone()))
                        .await?;
                    logs.append(
                        run_id,
                        LogLevel::Error,
                        format!("Error executing command {}: {}", step.command, message),
                        Some(json!({ "step": index + 1, "command": step.command })),
                    )
                    .await;
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    /// Current status, or `NotFound` for unknown ids.
    pub async fn status(&self, run_id: &str) -> PolledStatus {
        self.inner
            .runs
            .status(run_id)
            .await
            .map(PolledStatus::from)
            .unwrap_or(PolledStatus::NotFound)
    }

    pub async fn results(&self, run_id: &str) -> Option<RunSnapshot> {
        self.inner.runs.snapshot(run_id).await
    }

    pub async fn list_runs(&self) -> Vec<RunSnapshot> {
        self.inner.runs.list().await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
