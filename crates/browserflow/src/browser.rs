// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! The browser-automation façade contract.
//!
//! Treats the browser-automation library as an external
//! collaborator: "Any implementation satisfying that contract is
//! acceptable." This module defines that contract as two traits
//! ([`BrowserPage`], [`BrowserContext`]); `browserflow-playwright` provides
//! one concrete implementation, but tests and other integrations can
//! supply their own.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;
use crate::schema::Schema;

/// Result of a `screenshot` browser action.
#[derive(Debug, Clone)]
pub struct Screenshot {
    /// Where the PNG was written.
    pub path: String,
    /// Size of the encoded image, in bytes.
    pub byte_len: usize,
}

/// One browser tab/page, AI-assisted for `act`/`extract`/`observe`.
#[async_trait]
pub trait BrowserPage: Send + Sync {
    /// Loads `url`, waiting up to `timeout` for the DOM-loaded event.
    async fn navigate(&self, url: &str, timeout: Duration) -> Result<()>;

    /// Best-effort wait for network-idle; callers treat a timeout here as
    /// non-fatal.
    async fn wait_network_idle(&self, timeout: Duration) -> Result<()>;

    /// Performs an AI-assisted interaction described in natural language,
    /// e.g. `"click on the Compose button"` or
    /// `"type \"hello\" into the search box"`.
    async fn act(&self, instruction: &str) -> Result<()>;

    /// Performs an AI-assisted, schema-validated structured extraction.
    async fn extract(&self, instruction: &str, schema: Option<&Schema>) -> Result<Value>;

    /// Performs an AI-assisted, read-only observation, returning a list of
    /// candidate elements/facts.
    async fn observe(&self, instruction: &str) -> Result<Value>;

    /// Captures a screenshot, optionally scoped to `selector`.
    async fn screenshot(
        &self,
        selector: Option<&str>,
        full_page: bool,
        path: Option<&str>,
    ) -> Result<Screenshot>;

    /// Browser history back, waiting for DOM-loaded.
    async fn go_back(&self) -> Result<()>;
    /// Browser history forward, waiting for DOM-loaded.
    async fn go_forward(&self) -> Result<()>;
    /// Reloads the current page, waiting for DOM-loaded.
    async fn reload(&self) -> Result<()>;
    /// The page's current URL.
    async fn url(&self) -> Result<String>;
    /// Brings this page to the foreground (used by `switchTab`).
    async fn bring_to_front(&self) -> Result<()>;
}

/// A browsing context capable of creating new pages/tabs.
#[async_trait]
pub trait BrowserContext: Send + Sync {
    /// Creates a fresh page/tab in this context.
    async fn new_page(&self) -> Result<Arc<dyn BrowserPage>>;
}
