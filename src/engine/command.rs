//! Command interpreter.
//!
//! Each step's verb and raw parameter bag are parsed into a [`Command`]
//! right before dispatch, then executed as one or more driver calls.

use std::time::Duration;

use serde_json::{Map, Value};

use super::error::EngineError;
use crate::config::EngineConfig;
use crate::driver::Session;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Visit {
        url: String,
    },
    Click {
        selector: String,
    },
    Type {
        selector: String,
        text: String,
    },
    Contains {
        selector: String,
        text: String,
    },
    Check {
        selector: String,
    },
    Uncheck {
        selector: String,
    },
    Select {
        selector: String,
        value: String,
    },
    Wait {
        duration: Duration,
    },
    Submit {
        selector: String,
    },
    Assert {
        selector: String,
        text: Option<String>,
    },
    Login {
        username_selector: String,
        username: String,
        password_selector: String,
        password: String,
        submit_selector: String,
    },
}

/// Render a scalar parameter as text. Objects, arrays and null yield `None`.
fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn required(
    params: &Map<String, Value>,
    command: &'static str,
    param: &'static str,
) -> Result<String, EngineError> {
    params
        .get(param)
        .and_then(scalar_text)
        .ok_or(EngineError::MissingParameter { command, param })
}

/// Optional text parameter; empty strings count as absent.
fn optional(params: &Map<String, Value>, param: &str) -> Option<String> {
    params
        .get(param)
        .and_then(scalar_text)
        .filter(|s| !s.is_empty())
}

/// Milliseconds from a number or numeric string. Zero and garbage yield `None`.
fn millis(value: Option<&Value>) -> Option<u64> {
    let ms = match value? {
        Value::Number(n) => n.as_u64().or_else(|| n.as_f64().map(|f| f.max(0.0) as u64)),
        Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    }?;
    (ms > 0).then_some(ms)
}

impl Command {
    /// Interpret `verb` and its parameters. Only the verb decides the variant;
    /// any other mismatch surfaces as a missing parameter.
    pub fn parse(
        verb: &str,
        params: &Map<String, Value>,
        defaults: &EngineConfig,
    ) -> Result<Self, EngineError> {
        let command = match verb {
            "visit" => Command::Visit {
                url: required(params, "visit", "url")?,
            },
            "click" => Command::Click {
                selector: required(params, "click", "selector")?,
            },
            "type" => Command::Type {
                selector: required(params, "type", "selector")?,
                text: required(params, "type", "text")?,
            },
            "contains" => Command::Contains {
                selector: required(params, "contains", "selector")?,
                text: required(params, "contains", "text")?,
            },
            "check" => Command::Check {
                selector: required(params, "check", "selector")?,
            },
            "uncheck" => Command::Uncheck {
                selector: required(params, "uncheck", "selector")?,
            },
            "select" => Command::Select {
                selector: required(params, "select", "selector")?,
                value: required(params, "select", "value")?,
            },
            "wait" => Command::Wait {
                duration: Duration::from_millis(
                    millis(params.get("timeout")).unwrap_or(defaults.default_wait_ms),
                ),
            },
            "submit" => Command::Submit {
                selector: optional(params, "selector")
                    .unwrap_or_else(|| defaults.default_submit_selector.clone()),
            },
            "assert" => Command::Assert {
                selector: required(params, "assert", "selector")?,
                text: optional(params, "text"),
            },
            "login" => Command::Login {
                username_selector: required(params, "login", "usernameSelector")?,
                username: required(params, "login", "username")?,
                password_selector: required(params, "login", "passwordSelector")?,
                password: required(params, "login", "password")?,
                submit_selector: optional(params, "submitSelector")
                    .unwrap_or_else(|| defaults.default_submit_selector.clone()),
            },
            other => return Err(EngineError::UnknownCommand(other.to_string())),
        };
        Ok(command)
    }

    pub fn verb(&self) -> &'static str {
        match self {
            Command::Visit { .. } => "visit",
            Command::Click { .. } => "click",
            Command::Type { .. } => "type",
            Command::Contains { .. } => "contains",
            Command::Check { .. } => "check",
            Command::Uncheck { .. } => "uncheck",
            Command::Select { .. } => "select",
            Command::Wait { .. } => "wait",
            Command::Submit { .. } => "submit",
            Command::Assert { .. } => "assert",
            Command::Login { .. } => "login",
        }
    }

    /// Perform the command against an open session.
    pub async fn run(&self, session: &mut dyn Session) -> Result<(), EngineError> {
        match self {
            Command::Visit { url } => session.navigate(url).await?,
            Command::Click { selector } => session.click(selector).await?,
            Command::Type { selector, text } => session.fill(selector, text).await?,
            Command::Contains { selector, text } => {
                let content = session.read_text(selector).await?;
                if !content.is_some_and(|c| c.contains(text.as_str())) {
                    return Err(EngineError::AssertionFailed(format!(
                        "Text \"{}\" not found in selector \"{}\"",
                        text, selector
                    )));
                }
            }
            Command::Check { selector } => session.set_checked(selector, true).await?,
            Command::Uncheck { selector } => session.set_checked(selector, false).await?,
            Command::Select { selector, value } => session.select_option(selector, value).await?,
            Command::Wait { duration } => session.sleep(*duration).await?,
            Command::Submit { selector } => session.click(selector).await?,
            Command::Assert { selector, text } => {
                session.wait_visible(selector).await?;
                if let Some(expected) = text {
                    let actual = session.read_text(selector).await?.unwrap_or_default();
                    if !actual.contains(expected.as_str()) {
                        return Err(EngineError::AssertionFailed(format!(
                            "Assertion failed: expected \"{}\" but got \"{}\"",
                            expected, actual
                        )));
                    }
                }
            }
            Command::Login {
                username_selector,
                username,
                password_selector,
                password,
                submit_selector,
            } => {
                session.fill(username_selector, username).await?;
                session.fill(password_selector, password).await?;
                session.click(submit_selector).await?;
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
