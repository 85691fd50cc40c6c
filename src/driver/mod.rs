//! Browser automation capability consumed by the execution engine.
//!
//! A [`Driver`] opens one [`Session`] per run. The session exposes exactly
//! the primitives the command interpreter needs; everything else about the
//! browser is the backend's business.

pub mod memory;
pub mod webdriver;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use thiserror::Error;

use crate::config::{DriverBackend, DriverConfig};

/// Errors raised by a driver backend.
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("no element matches selector \"{selector}\"")]
    ElementNotFound { selector: String },

    #[error("navigation to {url} failed: {reason}")]
    Navigation { url: String, reason: String },

    #[error("timed out after {timeout_ms}ms waiting for \"{selector}\" to become visible")]
    Timeout { selector: String, timeout_ms: u64 },

    #[error("option \"{value}\" not available in \"{selector}\"")]
    OptionNotAvailable { selector: String, value: String },

    #[error("driver session error: {0}")]
    Session(String),

    #[error("webdriver error ({error}): {message}")]
    Protocol { error: String, message: String },

    #[error("webdriver transport error: {0}")]
    Http(#[from] reqwest::Error),
}

/// One browser/page instance, scoped to a single run.
///
/// Every call suspends until the browser has finished the action.
#[async_trait::async_trait]
pub trait Session: Send {
    async fn navigate(&mut self, url: &str) -> Result<(), DriverError>;

    async fn click(&mut self, selector: &str) -> Result<(), DriverError>;

    /// Replace the contents of an input with `text`.
    async fn fill(&mut self, selector: &str, text: &str) -> Result<(), DriverError>;

    /// Text content of the first match, `None` when the element has none.
    async fn read_text(&mut self, selector: &str) -> Result<Option<String>, DriverError>;

    async fn set_checked(&mut self, selector: &str, checked: bool) -> Result<(), DriverError>;

    async fn select_option(&mut self, selector: &str, value: &str) -> Result<(), DriverError>;

    async fn sleep(&mut self, duration: Duration) -> Result<(), DriverError>;

    /// Block until the element is visible or the backend's visibility timeout elapses.
    async fn wait_visible(&mut self, selector: &str) -> Result<(), DriverError>;

    /// Release the page and browser. Consumes the session.
    async fn close(self: Box<Self>) -> Result<(), DriverError>;
}

/// Factory for sessions. Shared by every run.
#[async_trait::async_trait]
pub trait Driver: Send + Sync {
    /// Short backend name for logs.
    fn name(&self) -> &'static str;

    async fn open(&self) -> Result<Box<dyn Session>, DriverError>;
}

/// Build the driver backend selected in the configuration.
pub fn from_config(config: &DriverConfig) -> Result<Arc<dyn Driver>> {
    match config.backend {
        DriverBackend::Webdriver => {
            let driver = webdriver::WebDriver::new(config.clone())
                .context("failed to build webdriver client")?;
            Ok(Arc::new(driver))
        }
        DriverBackend::Memory => {
            let site = match &config.fixture_path {
                Some(path) => memory::Site::load(path)?,
                None => memory::Site::default(),
            };
            Ok(Arc::new(memory::MemoryDriver::new(site)))
        }
    }
}
