// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! Mock collaborators for unit and integration tests: a scriptable
//! [`MockLlmClient`] and an in-memory [`MockBrowserContext`]/
//! [`MockBrowserPage`] pair. Gated behind `#[cfg(any(test, feature =
//! "test-support"))]` so integration tests outside this crate can depend on
//! the `test-support` feature instead of duplicating these.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use crate::browser::{BrowserContext, BrowserPage, Screenshot};
use crate::error::Result;
use crate::llm::LlmClient;
use crate::schema::Schema;

/// An in-memory page recording every `act` instruction and returning
/// caller-configured `extract`/`observe` payloads.
#[derive(Default)]
pub struct MockBrowserPage {
    url: Mutex<String>,
    extract_response: Mutex<Value>,
    observe_response: Mutex<Value>,
    actions: Mutex<Vec<String>>,
}

impl MockBrowserPage {
    /// A fresh page at the empty URL, returning `null` from `extract`/`observe`
    /// until configured otherwise.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures the value `extract` returns on every call.
    pub fn set_extract_response(&self, value: Value) {
        *self.extract_response.lock() = value;
    }

    /// Configures the value `observe` returns on every call.
    pub fn set_observe_response(&self, value: Value) {
        *self.observe_response.lock() = value;
    }

    /// Every `act` instruction recorded so far, in order.
    #[must_use]
    pub fn actions(&self) -> Vec<String> {
        self.actions.lock().clone()
    }
}

#[async_trait]
impl BrowserPage for MockBrowserPage {
    async fn navigate(&self, url: &str, _timeout: Duration) -> Result<()> {
        *self.url.lock() = url.to_string();
        Ok(())
    }

    async fn wait_network_idle(&self, _timeout: Duration) -> Result<()> {
        Ok(())
    }

    async fn act(&self, instruction: &str) -> Result<()> {
        self.actions.lock().push(instruction.to_string());
        Ok(())
    }

    async fn extract(&self, _instruction: &str, _schema: Option<&Schema>) -> Result<Value> {
        Ok(self.extract_response.lock().clone())
    }

    async fn observe(&self, _instruction: &str) -> Result<Value> {
        Ok(self.observe_response.lock().clone())
    }

    async fn screenshot(
        &self,
        _selector: Option<&str>,
        _full_page: bool,
        path: Option<&str>,
    ) -> Result<Screenshot> {
        Ok(Screenshot {
            path: path.unwrap_or("screenshot.png").to_string(),
            byte_len: 0,
        })
    }

    async fn go_back(&self) -> Result<()> {
        Ok(())
    }

    async fn go_forward(&self) -> Result<()> {
        Ok(())
    }

    async fn reload(&self) -> Result<()> {
        Ok(())
    }

    async fn url(&self) -> Result<String> {
        Ok(self.url.lock().clone())
    }

    async fn bring_to_front(&self) -> Result<()> {
        Ok(())
    }
}

/// A context that hands out fresh [`MockBrowserPage`]s and remembers every
/// page it created.
#[derive(Default)]
pub struct MockBrowserContext {
    pages: Mutex<Vec<Arc<MockBrowserPage>>>,
}

impl MockBrowserContext {
    /// Every page created so far, in creation order.
    #[must_use]
    pub fn pages(&self) -> Vec<Arc<MockBrowserPage>> {
        self.pages.lock().clone()
    }
}

#[async_trait]
impl BrowserContext for MockBrowserContext {
    async fn new_page(&self) -> Result<Arc<dyn BrowserPage>> {
        let page = Arc::new(MockBrowserPage::new());
        self.pages.lock().push(page.clone());
        Ok(page)
    }
}

/// A scriptable LLM client: returns queued responses in order, falling back
/// to a default once the queue drains, and records every `(system, user)`
/// call it received.
pub struct MockLlmClient {
    responses: Mutex<VecDeque<String>>,
    default_response: String,
    calls: Mutex<Vec<(String, String)>>,
}

impl Default for MockLlmClient {
    fn default() -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            default_response: "{}".to_string(),
            calls: Mutex::new(Vec::new()),
        }
    }
}

impl MockLlmClient {
    /// A client that returns each of `responses` in order, then repeats `{}`.
    #[must_use]
    pub fn with_responses(responses: impl IntoIterator<Item = String>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().collect()),
            ..Self::default()
        }
    }

    /// Every `(system, user)` message pair sent so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn chat(
        &self,
        system: &str,
        user: &str,
        _model: Option<&str>,
        _temperature: f32,
    ) -> Result<String> {
        self.calls.lock().push((system.to_string(), user.to_string()));
        let next = self.responses.lock().pop_front();
        Ok(next.unwrap_or_else(|| self.default_response.clone()))
    }
}
