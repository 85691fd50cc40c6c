//! Scripted in-memory browser.
//!
//! A [`Site`] maps URLs to [`Page`] fixtures. Sessions navigate between them,
//! mutate element state, and append every primitive they perform to a shared
//! [`Journal`]. Used for dry runs (`backend = "memory"`) and by the tests.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use super::{Driver, DriverError, Session};

/// Default visibility timeout reported when an element never appears.
const DEFAULT_VISIBILITY_TIMEOUT_MS: u64 = 30_000;

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

/// A set of pages keyed by URL.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Site {
    #[serde(default)]
    pub pages: HashMap<String, Page>,
}

impl Site {
    /// Load a site fixture from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read site fixture: {}", path.display()))?;
        let site: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse site fixture: {}", path.display()))?;
        Ok(site)
    }

    /// Builder-style page registration.
    pub fn with_page(mut self, url: impl Into<String>, page: Page) -> Self {
        self.pages.insert(url.into(), page);
        self
    }
}

/// Elements of one page keyed by the exact selector used to address them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Page {
    #[serde(default)]
    pub elements: HashMap<String, Element>,
}

impl Page {
    pub fn with_element(mut self, selector: impl Into<String>, element: Element) -> Self {
        self.elements.insert(selector.into(), element);
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Element {
    pub text: Option<String>,
    pub visible: bool,
    pub value: String,
    pub checked: bool,
    /// Values offered by a `<select>`.
    pub options: Vec<String>,
    pub selected: Option<String>,
    /// URL loaded when the element is clicked.
    pub navigates_to: Option<String>,
    /// Artificial latency applied to clicks.
    pub delay_ms: u64,
}

impl Default for Element {
    fn default() -> Self {
        Self {
            text: None,
            visible: true,
            value: String::new(),
            checked: false,
            options: Vec::new(),
            selected: None,
            navigates_to: None,
            delay_ms: 0,
        }
    }
}

impl Element {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::default()
        }
    }

    pub fn hidden(mut self) -> Self {
        self.visible = false;
        self
    }

    pub fn with_options<I, S>(mut self, options: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.options = options.into_iter().map(Into::into).collect();
        self
    }

    pub fn navigates_to(mut self, url: impl Into<String>) -> Self {
        self.navigates_to = Some(url.into());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay_ms = delay.as_millis() as u64;
        self
    }
}

// ---------------------------------------------------------------------------
// Journal
// ---------------------------------------------------------------------------

/// A primitive performed against the in-memory browser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Open,
    Navigate(String),
    Click(String),
    Fill(String, String),
    ReadText(String),
    SetChecked(String, bool),
    SelectOption(String, String),
    Sleep(u64),
    WaitVisible(String),
    Close,
}

/// Ordered record of actions shared by all sessions of one driver.
#[derive(Debug, Clone, Default)]
pub struct Journal {
    actions: Arc<Mutex<Vec<Action>>>,
}

impl Journal {
    async fn record(&self, action: Action) {
        self.actions.lock().await.push(action);
    }

    pub async fn actions(&self) -> Vec<Action> {
        self.actions.lock().await.clone()
    }
}

// ---------------------------------------------------------------------------
// MemoryDriver
// ---------------------------------------------------------------------------

pub struct MemoryDriver {
    site: Arc<Site>,
    journal: Journal,
    open_failure: Option<String>,
    visibility_timeout_ms: u64,
    opened: Arc<AtomicUsize>,
    closed: Arc<AtomicUsize>,
}

impl MemoryDriver {
    pub fn new(site: Site) -> Self {
        Self {
            site: Arc::new(site),
            journal: Journal::default(),
            open_failure: None,
            visibility_timeout_ms: DEFAULT_VISIBILITY_TIMEOUT_MS,
            opened: Arc::new(AtomicUsize::new(0)),
            closed: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Make every `open` fail with `reason`.
    pub fn failing_open(mut self, reason: impl Into<String>) -> Self {
        self.open_failure = Some(reason.into());
        self
    }

    pub fn journal(&self) -> Journal {
        self.journal.clone()
    }

    pub fn sessions_opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn sessions_closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Driver for MemoryDriver {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn open(&self) -> Result<Box<dyn Session>, DriverError> {
        if let Some(reason) = &self.open_failure {
            return Err(DriverError::Session(reason.clone()));
        }
        self.journal.record(Action::Open).await;
        self.opened.fetch_add(1, Ordering::SeqCst);
        debug!("memory session opened");

        Ok(Box::new(MemorySession {
            site: Arc::clone(&self.site),
            journal: self.journal.clone(),
            page: None,
            visibility_timeout_ms: self.visibility_timeout_ms,
            closed: Arc::clone(&self.closed),
        }))
    }
}

struct MemorySession {
    site: Arc<Site>,
    journal: Journal,
    /// Private copy of the current page; element mutations stay per session.
    page: Option<Page>,
    visibility_timeout_ms: u64,
    closed: Arc<AtomicUsize>,
}

impl MemorySession {
    fn element(&mut self, selector: &str) -> Result<&mut Element, DriverError> {
        self.page
            .as_mut()
            .and_then(|page| page.elements.get_mut(selector))
            .ok_or_else(|| DriverError::ElementNotFound {
                selector: selector.to_string(),
            })
    }

    fn load(&mut self, url: &str) -> Result<(), DriverError> {
        let page = self
            .site
            .pages
            .get(url)
            .cloned()
            .ok_or_else(|| DriverError::Navigation {
                url: url.to_string(),
                reason: "no page registered for url".to_string(),
            })?;
        self.page = Some(page);
        Ok(())
    }
}

#[async_trait::async_trait]
impl Session for MemorySession {
    async fn navigate(&mut self, url: &str) -> Result<(), DriverError> {
        self.journal.record(Action::Navigate(url.to_string())).await;
        self.load(url)
    }

    async fn click(&mut self, selector: &str) -> Result<(), DriverError> {
        self.journal.record(Action::Click(selector.to_string())).await;
        let timeout_ms = self.visibility_timeout_ms;
        let element = self.element(selector)?;
        if !element.visible {
            return Err(DriverError::Timeout {
                selector: selector.to_string(),
                timeout_ms,
            });
        }
        let delay = element.delay_ms;
        let target = element.navigates_to.clone();

        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if let Some(url) = target {
            self.load(&url)?;
        }
        Ok(())
    }

    async fn fill(&mut self, selector: &str, text: &str) -> Result<(), DriverError> {
        self.journal
            .record(Action::Fill(selector.to_string(), text.to_string()))
            .await;
        self.element(selector)?.value = text.to_string();
        Ok(())
    }

    async fn read_text(&mut self, selector: &str) -> Result<Option<String>, DriverError> {
        self.journal.record(Action::ReadText(selector.to_string())).await;
        Ok(self.element(selector)?.text.clone())
    }

    async fn set_checked(&mut self, selector: &str, checked: bool) -> Result<(), DriverError> {
        self.journal
            .record(Action::SetChecked(selector.to_string(), checked))
            .await;
        self.element(selector)?.checked = checked;
        Ok(())
    }

    async fn select_option(&mut self, selector: &str, value: &str) -> Result<(), DriverError> {
        self.journal
            .record(Action::SelectOption(selector.to_string(), value.to_string()))
            .await;
        let element = self.element(selector)?;
        if !element.options.iter().any(|o| o == value) {
            return Err(DriverError::OptionNotAvailable {
                selector: selector.to_string(),
                value: value.to_string(),
            });
        }
        element.selected = Some(value.to_string());
        Ok(())
    }

    async fn sleep(&mut self, duration: Duration) -> Result<(), DriverError> {
        self.journal
            .record(Action::Sleep(duration.as_millis() as u64))
            .await;
        tokio::time::sleep(duration).await;
        Ok(())
    }

    async fn wait_visible(&mut self, selector: &str) -> Result<(), DriverError> {
        self.journal
            .record(Action::WaitVisible(selector.to_string()))
            .await;
        let timeout_ms = self.visibility_timeout_ms;
        match self.element(selector) {
            Ok(element) if element.visible => Ok(()),
            _ => Err(DriverError::Timeout {
                selector: selector.to_string(),
                timeout_ms,
            }),
        }
    }

    async fn close(self: Box<Self>) -> Result<(), DriverError> {
        self.journal.record(Action::Close).await;
        self.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn site() -> Site {
        Site::default()
            .with_page(
                "https://shop.test/",
                Page::default()
                    .with_element("h1", Element::text("Shop"))
                    .with_element("#size", Element::default().with_options(["s", "m"]))
                    .with_element("#banner", Element::text("Sale").hidden())
                    .with_element("a.cart", Element::default().navigates_to("https://shop.test/cart")),
            )
            .with_page(
                "https://shop.test/cart",
                Page::default().with_element("h1", Element::text("Cart")),
            )
    }

    #[tokio::test]
    async fn test_navigate_unknown_url_fails() {
        let driver = MemoryDriver::new(site());
        let mut session = driver.open().await.unwrap();
        let err = session.navigate("https://elsewhere.test").await.unwrap_err();
        assert!(matches!(err, DriverError::Navigation { .. }));
    }

    #[tokio::test]
    async fn test_click_follows_link() {
        let driver = MemoryDriver::new(site());
        let mut session = driver.open().await.unwrap();
        session.navigate("https://shop.test/").await.unwrap();
        session.click("a.cart").await.unwrap();
        let heading = session.read_text("h1").await.unwrap();
        assert_eq!(heading.as_deref(), Some("Cart"));
    }

    #[tokio::test]
    async fn test_select_rejects_unknown_option() {
        let driver = MemoryDriver::new(site());
        let mut session = driver.open().await.unwrap();
        session.navigate("https://shop.test/").await.unwrap();
        session.select_option("#size", "m").await.unwrap();
        let err = session.select_option("#size", "xl").await.unwrap_err();
        assert!(matches!(err, DriverError::OptionNotAvailable { .. }));
    }

    #[tokio::test]
    async fn test_hidden_element_times_out() {
        let driver = MemoryDriver::new(site());
        let mut session = driver.open().await.unwrap();
        session.navigate("https://shop.test/").await.unwrap();
        let err = session.wait_visible("#banner").await.unwrap_err();
        assert!(matches!(err, DriverError::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_journal_and_counters() {
        let driver = MemoryDriver::new(site());
        let journal = driver.journal();
        let mut session = driver.open().await.unwrap();
        session.navigate("https://shop.test/").await.unwrap();
        session.fill("#size", "m").await.unwrap();
        session.close().await.unwrap();

        assert_eq!(driver.sessions_opened(), 1);
        assert_eq!(driver.sessions_closed(), 1);
        assert_eq!(
            journal.actions().await,
            vec![
                Action::Open,
                Action::Navigate("https://shop.test/".into()),
                Action::Fill("#size".into(), "m".into()),
                Action::Close,
            ]
        );
    }

    #[tokio::test]
    async fn test_failing_open() {
        let driver = MemoryDriver::new(Site::default()).failing_open("no browser");
        assert!(matches!(driver.open().await, Err(DriverError::Session(_))));
        assert_eq!(driver.sessions_opened(), 0);
    }

    #[test]
    fn test_site_fixture_parses() {
        let json = r##"
        {
          "pages": {
            "https://x": {
              "elements": {
                "body": { "text": "hello" },
                "#agree": { "checked": true, "visible": false }
              }
            }
          }
        }
        "##;
        let site: Site = serde_json::from_str(json).unwrap();
        let page = &site.pages["https://x"];
        assert_eq!(page.elements["body"].text.as_deref(), Some("hello"));
        assert!(page.elements["body"].visible);
        assert!(page.elements["#agree"].checked);
        assert!(!page.elements["#agree"].visible);
    }
}
