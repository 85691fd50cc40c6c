//! W3C WebDriver backend.
//!
//! Talks to a chromedriver / geckodriver endpoint over the JSON wire protocol.
//! Elements are located with CSS selectors; each primitive maps onto one or
//! two WebDriver commands.

use std::time::{Duration, Instant};

use reqwest::{Client, Method};
use serde_json::{json, Value};
use tracing::{debug, info};

use super::{Driver, DriverError, Session};
use crate::config::{Browser, DriverConfig};

/// Key under which the W3C protocol returns element references.
const ELEMENT_KEY: &str = "element-6066-11e4-a52e-4f735466cecf";

/// Error code the protocol uses for a failed element lookup.
const NO_SUCH_ELEMENT: &str = "no such element";

pub struct WebDriver {
    client: Client,
    config: DriverConfig,
}

impl WebDriver {
    pub fn new(config: DriverConfig) -> Result<Self, DriverError> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()?;
        Ok(Self { client, config })
    }

    fn base_url(&self) -> &str {
        self.config.webdriver_url.trim_end_matches('/')
    }
}

/// Capabilities payload for a new session.
fn capabilities(browser: Browser, headless: bool) -> Value {
    let always_match = match browser {
        Browser::Chrome => {
            let args: Vec<&str> = if headless { vec!["--headless=new"] } else { vec![] };
            json!({ "browserName": "chrome", "goog:chromeOptions": { "args": args } })
        }
        Browser::Firefox => {
            let args: Vec<&str> = if headless { vec!["-headless"] } else { vec![] };
            json!({ "browserName": "firefox", "moz:firefoxOptions": { "args": args } })
        }
    };
    json!({ "capabilities": { "alwaysMatch": always_match } })
}

/// Extract `value` from a protocol response, turning error payloads into
/// [`DriverError::Protocol`].
fn unwrap_value(success: bool, mut payload: Value) -> Result<Value, DriverError> {
    let value = payload
        .get_mut("value")
        .map(Value::take)
        .unwrap_or(Value::Null);

    if let Some(error) = value.get("error").and_then(Value::as_str) {
        let message = value
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or_default();
        return Err(DriverError::Protocol {
            error: error.to_string(),
            message: message.to_string(),
        });
    }
    if !success {
        return Err(DriverError::Protocol {
            error: "unknown error".to_string(),
            message: value.to_string(),
        });
    }
    Ok(value)
}

fn element_id(value: &Value) -> Option<String> {
    value
        .get(ELEMENT_KEY)
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// Quote a string for use inside a CSS attribute selector.
fn css_string(raw: &str) -> String {
    let escaped = raw.replace('\\', "\\\\").replace('"', "\\\"");
    format!("\"{}\"", escaped)
}

async fn send(
    client: &Client,
    method: Method,
    url: &str,
    body: Option<Value>,
) -> Result<Value, DriverError> {
    let mut request = client.request(method, url);
    if let Some(body) = body {
        request = request.json(&body);
    }
    let response = request.send().await?;
    let success = response.status().is_success();
    let payload: Value = response.json().await?;
    unwrap_value(success, payload)
}

#[async_trait::async_trait]
impl Driver for WebDriver {
    fn name(&self) -> &'static str {
        "webdriver"
    }

    async fn open(&self) -> Result<Box<dyn Session>, DriverError> {
        let url = format!("{}/session", self.base_url());
        let body = capabilities(self.config.browser, self.config.headless);
        let value = send(&self.client, Method::POST, &url, Some(body)).await?;

        let session_id = value
            .get("sessionId")
            .and_then(Value::as_str)
            .ok_or_else(|| DriverError::Session("response carried no sessionId".to_string()))?
            .to_string();

        info!(session_id = %session_id, browser = ?self.config.browser, "webdriver session opened");

        Ok(Box::new(WebDriverSession {
            client: self.client.clone(),
            session_url: format!("{}/session/{}", self.base_url(), session_id),
            visibility_timeout: Duration::from_millis(self.config.visibility_timeout_ms),
            poll_interval: Duration::from_millis(self.config.poll_interval_ms.max(1)),
        }))
    }
}

struct WebDriverSession {
    client: Client,
    session_url: String,
    visibility_timeout: Duration,
    poll_interval: Duration,
}

impl WebDriverSession {
    async fn command(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Value, DriverError> {
        let url = format!("{}{}", self.session_url, path);
        send(&self.client, method, &url, body).await
    }

    async fn find(&self, scope: &str, selector: &str) -> Result<String, DriverError> {
        let body = json!({ "using": "css selector", "value": selector });
        let value = match self.command(Method::POST, scope, Some(body)).await {
            Err(DriverError::Protocol { error, .. }) if error == NO_SUCH_ELEMENT => {
                return Err(DriverError::ElementNotFound {
                    selector: selector.to_string(),
                })
            }
            other => other?,
        };
        element_id(&value).ok_or_else(|| DriverError::Protocol {
            error: "invalid element reference".to_string(),
            message: value.to_string(),
        })
    }

    async fn find_element(&self, selector: &str) -> Result<String, DriverError> {
        self.find("/element", selector).await
    }

    async fn click_element(&self, id: &str) -> Result<(), DriverError> {
        self.command(Method::POST, &format!("/element/{}/click", id), Some(json!({})))
            .await?;
        Ok(())
    }

    async fn is_displayed(&self, selector: &str) -> Result<bool, DriverError> {
        let id = self.find_element(selector).await?;
        let value = self
            .command(Method::GET, &format!("/element/{}/displayed", id), None)
            .await?;
        Ok(value.as_bool().unwrap_or(false))
    }
}

#[async_trait::async_trait]
impl Session for WebDriverSession {
    async fn navigate(&mut self, url: &str) -> Result<(), DriverError> {
        match self
            .command(Method::POST, "/url", Some(json!({ "url": url })))
            .await
        {
            Ok(_) => Ok(()),
            Err(DriverError::Protocol { error, message }) => Err(DriverError::Navigation {
                url: url.to_string(),
                reason: format!("{}: {}", error, message),
            }),
            Err(e) => Err(e),
        }
    }

    async fn click(&mut self, selector: &str) -> Result<(), DriverError> {
        let id = self.find_element(selector).await?;
        self.click_element(&id).await
    }

    async fn fill(&mut self, selector: &str, text: &str) -> Result<(), DriverError> {
        let id = self.find_element(selector).await?;
        self.command(Method::POST, &format!("/element/{}/clear", id), Some(json!({})))
            .await?;
        self.command(
            Method::POST,
            &format!("/element/{}/value", id),
            Some(json!({ "text": text })),
        )
        .await?;
        Ok(())
    }

    async fn read_text(&mut self, selector: &str) -> Result<Option<String>, DriverError> {
        let id = self.find_element(selector).await?;
        let value = self
            .command(Method::GET, &format!("/element/{}/text", id), None)
            .await?;
        Ok(value.as_str().map(str::to_string))
    }

    async fn set_checked(&mut self, selector: &str, checked: bool) -> Result<(), DriverError> {
        let id = self.find_element(selector).await?;
        let value = self
            .command(Method::GET, &format!("/element/{}/selected", id), None)
            .await?;
        if value.as_bool().unwrap_or(false) != checked {
            self.click_element(&id).await?;
        }
        Ok(())
    }

    async fn select_option(&mut self, selector: &str, value: &str) -> Result<(), DriverError> {
        let select = self.find_element(selector).await?;
        let option_selector = format!("option[value={}]", css_string(value));
        let option = match self
            .find(&format!("/element/{}/element", select), &option_selector)
            .await
        {
            Err(DriverError::ElementNotFound { .. }) => {
                return Err(DriverError::OptionNotAvailable {
                    selector: selector.to_string(),
                    value: value.to_string(),
                })
            }
            other => other?,
        };
        self.click_element(&option).await
    }

    async fn sleep(&mut self, duration: Duration) -> Result<(), DriverError> {
        tokio::time::sleep(duration).await;
        Ok(())
    }

    async fn wait_visible(&mut self, selector: &str) -> Result<(), DriverError> {
        let deadline = Instant::now() + self.visibility_timeout;
        loop {
            match self.is_displayed(selector).await {
                Ok(true) => return Ok(()),
                Ok(false) | Err(DriverError::ElementNotFound { .. }) => {}
                Err(e) => return Err(e),
            }
            if Instant::now() >= deadline {
                return Err(DriverError::Timeout {
                    selector: selector.to_string(),
                    timeout_ms: self.visibility_timeout.as_millis() as u64,
                });
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn close(self: Box<Self>) -> Result<(), DriverError> {
        self.command(Method::DELETE, "", None).await?;
        debug!(session = %self.session_url, "webdriver session closed");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
