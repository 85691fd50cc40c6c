//! TOML configuration for steprunner.
//!
//! Layered model: compiled-in defaults, overridden by a TOML file found via
//! an explicit path, the `STEPRUNNER_CONFIG` environment variable, or the
//! standard system location.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Environment variable naming the config file.
pub const CONFIG_ENV: &str = "STEPRUNNER_CONFIG";

const SYSTEM_CONFIG_PATH: &str = "/etc/steprunner/steprunner.toml";

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Root configuration for the process.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub driver: DriverConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load configuration from a TOML file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        info!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    /// Resolve the configuration.
    ///
    /// An explicit `path` must load. Otherwise tries `STEPRUNNER_CONFIG`, then
    /// `/etc/steprunner/steprunner.toml`, then falls back to defaults.
    pub fn resolve(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::load(path);
        }
        Ok(Self::load_or_default())
    }

    pub fn load_or_default() -> Self {
        if let Ok(env_path) = std::env::var(CONFIG_ENV) {
            let path = Path::new(&env_path);
            match Self::load(path) {
                Ok(cfg) => return cfg,
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "STEPRUNNER_CONFIG set but file could not be loaded, trying fallback"
                    );
                }
            }
        }

        let system_path = Path::new(SYSTEM_CONFIG_PATH);
        if system_path.exists() {
            match Self::load(system_path) {
                Ok(cfg) => return cfg,
                Err(e) => {
                    warn!(
                        path = %system_path.display(),
                        error = %e,
                        "system config file exists but could not be loaded, using defaults"
                    );
                }
            }
        }

        debug!("no config file found, using compiled-in defaults");
        Self::default()
    }
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

/// HTTP listener configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address and port for the HTTP API.
    pub bind: String,
    /// Allow any origin; the presentation layer is usually served elsewhere.
    pub cors_permissive: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:3001".to_string(),
            cors_permissive: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Driver
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriverBackend {
    /// A W3C WebDriver endpoint (chromedriver, geckodriver).
    Webdriver,
    /// Scripted in-memory site, for dry runs.
    Memory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Browser {
    Chrome,
    Firefox,
}

/// Browser automation backend configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    pub backend: DriverBackend,
    /// Base URL of the WebDriver endpoint.
    pub webdriver_url: String,
    pub browser: Browser,
    pub headless: bool,
    /// Per-request HTTP timeout towards the WebDriver endpoint.
    pub request_timeout_ms: u64,
    /// How long `assert` waits for an element to become visible.
    pub visibility_timeout_ms: u64,
    /// Polling interval while waiting for visibility.
    pub poll_interval_ms: u64,
    /// JSON site fixture for the memory backend.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fixture_path: Option<PathBuf>,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            backend: DriverBackend::Webdriver,
            webdriver_url: "http://localhost:9515".to_string(),
            browser: Browser::Chrome,
            headless: false,
            request_timeout_ms: 30_000,
            visibility_timeout_ms: 30_000,
            poll_interval_ms: 100,
            fixture_path: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Defaults applied by the command interpreter.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Pause used by `wait` when no timeout is given.
    pub default_wait_ms: u64,
    /// Control clicked by `submit` and `login` when no selector is given.
    pub default_submit_selector: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_wait_ms: 1000,
            default_submit_selector: r#"button[type="submit"]"#.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Minimum tracing level (`trace`, `debug`, `info`, `warn`, `error`).
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_sane() {
        let cfg = AppConfig::default();

        assert_eq!(cfg.server.bind, "0.0.0.0:3001");
        assert!(cfg.server.cors_permissive);

        assert_eq!(cfg.driver.backend, DriverBackend::Webdriver);
        assert_eq!(cfg.driver.webdriver_url, "http://localhost:9515");
        assert_eq!(cfg.driver.browser, Browser::Chrome);
        assert!(!cfg.driver.headless);
        assert_eq!(cfg.driver.visibility_timeout_ms, 30_000);
        assert!(cfg.driver.fixture_path.is_none());

        assert_eq!(cfg.engine.default_wait_ms, 1000);
        assert_eq!(cfg.engine.default_submit_selector, r#"button[type="submit"]"#);

        assert_eq!(cfg.logging.level, "info");
        assert!(!cfg.logging.json);
    }

    #[test]
    fn test_parse_example_toml() {
        let toml_str = r##"
[server]
bind = "127.0.0.1:8080"
cors_permissive = false

[driver]
backend = "memory"
webdriver_url = "http://grid:4444"
browser = "firefox"
headless = true
request_timeout_ms = 5000
visibility_timeout_ms = 2000
poll_interval_ms = 50
fixture_path = "/srv/site.json"

[engine]
default_wait_ms = 250
default_submit_selector = "#go"

[logging]
level = "debug"
json = true
"##;

        let cfg: AppConfig = toml::from_str(toml_str).unwrap();

        assert_eq!(cfg.server.bind, "127.0.0.1:8080");
        assert!(!cfg.server.cors_permissive);
        assert_eq!(cfg.driver.backend, DriverBackend::Memory);
        assert_eq!(cfg.driver.webdriver_url, "http://grid:4444");
        assert_eq!(cfg.driver.browser, Browser::Firefox);
        assert!(cfg.driver.headless);
        assert_eq!(cfg.driver.request_timeout_ms, 5000);
        assert_eq!(cfg.driver.visibility_timeout_ms, 2000);
        assert_eq!(cfg.driver.poll_interval_ms, 50);
        assert_eq!(cfg.driver.fixture_path, Some(PathBuf::from("/srv/site.json")));
        assert_eq!(cfg.engine.default_wait_ms, 250);
        assert_eq!(cfg.engine.default_submit_selector, "#go");
        assert_eq!(cfg.logging.level, "debug");
        assert!(cfg.logging.json);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let toml_str = r#"
[driver]
headless = true
"#;

        let cfg: AppConfig = toml::from_str(toml_str).unwrap();

        assert!(cfg.driver.headless);
        assert_eq!(cfg.driver.webdriver_url, "http://localhost:9515");
        assert_eq!(cfg.server.bind, "0.0.0.0:3001");
        assert_eq!(cfg.engine.default_wait_ms, 1000);
    }

    #[test]
    fn test_empty_toml_uses_all_defaults() {
        let cfg: AppConfig = toml::from_str("").unwrap();
        let defaults = AppConfig::default();

        assert_eq!(cfg.server.bind, defaults.server.bind);
        assert_eq!(cfg.driver.backend, defaults.driver.backend);
        assert_eq!(
            cfg.engine.default_submit_selector,
            defaults.engine.default_submit_selector
        );
    }

    #[test]
    fn test_unknown_backend_rejected() {
        let result: Result<AppConfig, _> = toml::from_str("[driver]\nbackend = \"selenium-rc\"\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("steprunner.toml");
        std::fs::write(
            &path,
            r#"
[server]
bind = "0.0.0.0:9999"
"#,
        )
        .unwrap();

        let cfg = AppConfig::load(&path).unwrap();
        assert_eq!(cfg.server.bind, "0.0.0.0:9999");

        let cfg = AppConfig::resolve(Some(&path)).unwrap();
        assert_eq!(cfg.server.bind, "0.0.0.0:9999");
    }

    #[test]
    fn test_load_missing_file_errors() {
        let missing = Path::new("/nonexistent/path/steprunner.toml");
        assert!(AppConfig::load(missing).is_err());
        assert!(AppConfig::resolve(Some(missing)).is_err());
    }

    #[test]
    fn test_serialization_roundtrip() {
        let cfg = AppConfig::default();
        let toml_str = toml::to_string_pretty(&cfg).unwrap();
        let roundtripped: AppConfig = toml::from_str(&toml_str).unwrap();

        assert_eq!(cfg.server.bind, roundtripped.server.bind);
        assert_eq!(cfg.driver.browser, roundtripped.driver.browser);
        assert_eq!(cfg.engine.default_wait_ms, roundtripped.engine.default_wait_ms);
    }
}
