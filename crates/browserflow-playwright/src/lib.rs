// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! A [`BrowserPage`]/[`BrowserContext`] façade backed by headless Chromium
//! (via the `playwright` crate) and an injected [`LlmClient`] that powers
//! the AI-assisted `act`/`extract`/`observe` methods this contract describes as
//! "an AI-assisted automation library".
//!
//! Playwright owns DOM manipulation and navigation; the LLM is asked to
//! translate a natural-language instruction into a concrete action (for
//! `act`) or a structured answer (for `extract`/`observe`), grounded on a
//! compact textual snapshot of the page we build ourselves.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use browserflow::browser::{BrowserContext, BrowserPage, Screenshot};
use browserflow::error::{Error, Result};
use browserflow::llm::LlmClient;
use browserflow::schema::{self, Schema};
use playwright::api::{BrowserContext as PwContext, Page};
use playwright::Playwright;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::Mutex as AsyncMutex;

const ACT_TEMPERATURE: f32 = 0.0;
const QUERY_TEMPERATURE: f32 = 0.2;
const INTERACTIVE_ELEMENTS_SCRIPT: &str = r#"
() => {
    const nodes = Array.from(document.querySelectorAll(
        'a, button, input, textarea, select, [role="button"], [onclick]'
    ));
    return nodes.slice(0, 200).map((el, i) => {
        el.setAttribute('data-browserflow-id', String(i));
        const text = (el.innerText || el.value || el.placeholder || '').trim().slice(0, 80);
        return `[${i}] <${el.tagName.toLowerCase()}> ${text}`;
    }).join('\n');
}
"#;

fn page_text_script() -> &'static str {
    "() => document.body.innerText"
}

fn io_err(context: &str, e: impl std::fmt::Display) -> Error {
    Error::Collaborator(format!("{context}: {e}"))
}

/// Playwright surfaces a timed-out navigation as an error whose message
/// names the timeout; everything else is an opaque collaborator failure.
fn navigation_error(e: impl std::fmt::Display, timeout: Duration) -> Error {
    let message = e.to_string();
    if message.to_lowercase().contains("timeout") {
        Error::NavigationTimeout(timeout)
    } else {
        io_err("navigation failed", message)
    }
}

fn clean_llm_output(raw: &str) -> &str {
    let trimmed = raw.trim();
    let trimmed = trimmed.strip_prefix("```json").unwrap_or(trimmed);
    let trimmed = trimmed.strip_prefix("```").unwrap_or(trimmed);
    trimmed.strip_suffix("```").unwrap_or(trimmed).trim()
}

fn find_balanced(s: &str) -> Option<&str> {
    let bytes = s.as_bytes();
    let start = bytes.iter().position(|b| *b == b'{' || *b == b'[')?;
    let (open, close) = match bytes[start] {
        b'{' => (b'{', b'}'),
        _ => (b'[', b']'),
    };
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escaped = false;
    for (i, &b) in bytes.iter().enumerate().skip(start) {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            _ if b == open => depth += 1,
            _ if b == close => {
                depth -= 1;
                if depth == 0 {
                    return Some(&s[start..=i]);
                }
            }
            _ => {}
        }
    }
    None
}

fn parse_json_lenient(raw: &str) -> Result<Value> {
    let cleaned = clean_llm_output(raw);
    if let Ok(v) = serde_json::from_str(cleaned) {
        return Ok(v);
    }
    let candidate = find_balanced(cleaned)
        .ok_or_else(|| Error::Collaborator(format!("model response was not JSON: {cleaned}")))?;
    serde_json::from_str(candidate)
        .map_err(|e| Error::Collaborator(format!("failed to parse model JSON: {e}")))
}

#[derive(Debug, Deserialize)]
struct ActPlan {
    action: String,
    #[serde(default)]
    selector: Option<String>,
    #[serde(default)]
    value: Option<String>,
}

/// One browser tab, driving a Playwright [`Page`] and consulting `llm` for
/// every `act`/`extract`/`observe` call.
pub struct StagehandPage {
    page: Arc<AsyncMutex<Page>>,
    llm: Arc<dyn LlmClient>,
}

impl StagehandPage {
    fn new(page: Page, llm: Arc<dyn LlmClient>) -> Self {
        Self {
            page: Arc::new(AsyncMutex::new(page)),
            llm,
        }
    }

    async fn interactive_elements(&self) -> Result<String> {
        let page = self.page.lock().await;
        page.eval::<String>(INTERACTIVE_ELEMENTS_SCRIPT)
            .await
            .map_err(|e| io_err("failed to enumerate interactive elements", e))
    }

    async fn visible_text(&self) -> Result<String> {
        let page = self.page.lock().await;
        page.eval::<String>(page_text_script())
            .await
            .map_err(|e| io_err("failed to read page text", e))
    }
}

#[async_trait]
impl BrowserPage for StagehandPage {
    async fn navigate(&self, url: &str, timeout: Duration) -> Result<()> {
        let page = self.page.lock().await;
        page.goto_builder(url)
            .timeout(timeout.as_millis() as f64)
            .goto()
            .await
            .map_err(|e| navigation_error(e, timeout))?;
        Ok(())
    }

    async fn wait_network_idle(&self, timeout: Duration) -> Result<()> {
        let page = self.page.lock().await;
        page.wait_for_load_state(
            Some(playwright::api::page::DocumentLoadState::NetworkIdle),
            Some(timeout.as_millis() as f64),
        )
        .await
        .map_err(|e| io_err("network-idle wait failed", e))
    }

    async fn act(&self, instruction: &str) -> Result<()> {
        let elements = self.interactive_elements().await?;
        let system = "You control a web page through a list of interactive elements. \
                      Respond with exactly one JSON object: \
                      {\"action\": \"click\"|\"type\"|\"press\", \"selector\": \"[data-browserflow-id='<id>']\", \"value\": \"<text, only for type/press>\"}. \
                      No prose, no markdown.";
        let user = format!("Instruction: {instruction}\n\nInteractive elements:\n{elements}");
        let raw = self.llm.chat(system, &user, None, ACT_TEMPERATURE).await?;
        let plan: ActPlan = serde_json::from_value(parse_json_lenient(&raw)?)
            .map_err(|e| Error::Collaborator(format!("malformed action plan: {e}")))?;

        let selector = plan
            .selector
            .ok_or_else(|| Error::Collaborator("action plan named no selector".to_string()))?;
        let page = self.page.lock().await;
        match plan.action.as_str() {
            "click" => {
                page.click_builder(&selector)
                    .click()
                    .await
                    .map_err(|e| io_err("click failed", e))?;
            }
            "type" => {
                let value = plan.value.unwrap_or_default();
                page.fill_builder(&selector, &value)
                    .fill()
                    .await
                    .map_err(|e| io_err("type failed", e))?;
            }
            "press" => {
                let key = plan.value.unwrap_or_else(|| "Enter".to_string());
                page.press_builder(&selector, &key)
                    .press()
                    .await
                    .map_err(|e| io_err("key press failed", e))?;
            }
            other => return Err(Error::UnknownAction(other.to_string())),
        }
        Ok(())
    }

    async fn extract(&self, instruction: &str, schema: Option<&Schema>) -> Result<Value> {
        let text = self.visible_text().await?;
        let schema_description = schema
            .map(schema::describe)
            .unwrap_or_else(|| "any JSON object that answers the instruction".to_string());
        let system = format!(
            "You extract structured data from rendered web page text. Respond with exactly one \
             JSON object matching this shape:\n{schema_description}\nNo prose, no markdown."
        );
        let user = format!("Instruction: {instruction}\n\nPage text:\n{text}");
        let raw = self.llm.chat(&system, &user, None, QUERY_TEMPERATURE).await?;
        let value = parse_json_lenient(&raw)?;
        if let Some(schema) = schema {
            schema::validate(schema, &value).map_err(Error::SchemaMismatch)?;
        }
        Ok(value)
    }

    async fn observe(&self, instruction: &str) -> Result<Value> {
        let elements = self.interactive_elements().await?;
        let system = "You inspect a web page's interactive elements without acting on them. \
                      Respond with exactly one JSON array of matching observations, each an \
                      object with \"description\" and \"selector\" fields. No prose, no markdown.";
        let user = format!("Instruction: {instruction}\n\nInteractive elements:\n{elements}");
        let raw = self.llm.chat(system, &user, None, QUERY_TEMPERATURE).await?;
        parse_json_lenient(&raw)
    }

    async fn screenshot(
        &self,
        selector: Option<&str>,
        full_page: bool,
        path: Option<&str>,
    ) -> Result<Screenshot> {
        let page = self.page.lock().await;
        let out_path = path.unwrap_or("screenshot.png").to_string();
        let bytes = if let Some(selector) = selector {
            let locator = page
                .query_selector(selector)
                .await
                .map_err(|e| io_err("selector lookup failed", e))?
                .ok_or_else(|| Error::Collaborator(format!("no element matched {selector}")))?;
            locator
                .screenshot_builder()
                .path(out_path.clone().into())
                .screenshot()
                .await
                .map_err(|e| io_err("element screenshot failed", e))?
        } else {
            page.screenshot_builder()
                .path(out_path.clone().into())
                .full_page(full_page)
                .screenshot()
                .await
                .map_err(|e| io_err("page screenshot failed", e))?
        };
        Ok(Screenshot {
            path: out_path,
            byte_len: bytes.len(),
        })
    }

    async fn go_back(&self) -> Result<()> {
        let page = self.page.lock().await;
        page.go_back_builder()
            .go_back()
            .await
            .map_err(|e| io_err("go back failed", e))?;
        Ok(())
    }

    async fn go_forward(&self) -> Result<()> {
        let page = self.page.lock().await;
        page.go_forward_builder()
            .go_forward()
            .await
            .map_err(|e| io_err("go forward failed", e))?;
        Ok(())
    }

    async fn reload(&self) -> Result<()> {
        let page = self.page.lock().await;
        page.reload_builder()
            .reload()
            .await
            .map_err(|e| io_err("reload failed", e))?;
        Ok(())
    }

    async fn url(&self) -> Result<String> {
        let page = self.page.lock().await;
        page.url().map_err(|e| io_err("failed to read URL", e))
    }

    async fn bring_to_front(&self) -> Result<()> {
        let page = self.page.lock().await;
        page.bring_to_front()
            .await
            .map_err(|e| io_err("bring-to-front failed", e))
    }
}

/// A Playwright browsing context that hands out [`StagehandPage`]s, each
/// sharing the same injected [`LlmClient`].
pub struct StagehandContext {
    // Held alive for the lifetime of every page it created; Playwright pages
    // are only valid while their owning context is alive.
    context: Arc<AsyncMutex<PwContext>>,
    llm: Arc<dyn LlmClient>,
}

impl StagehandContext {
    /// Launches headless Chromium and returns a context ready to create
    /// pages. `llm` is shared by every page this context creates.
    ///
    /// # Errors
    ///
    /// Returns an error if Playwright, Chromium, or the browser context
    /// fail to initialize.
    pub async fn launch(llm: Arc<dyn LlmClient>) -> Result<Self> {
        let playwright = Playwright::initialize()
            .await
            .map_err(|e| io_err("failed to initialize Playwright", e))?;
        playwright
            .install_chromium()
            .map_err(|e| io_err("failed to install Chromium", e))?;
        let chromium = playwright.chromium();
        let browser = chromium
            .launcher()
            .headless(true)
            .launch()
            .await
            .map_err(|e| io_err("failed to launch browser", e))?;
        let context = browser
            .context_builder()
            .build()
            .await
            .map_err(|e| io_err("failed to create browser context", e))?;

        Ok(Self {
            context: Arc::new(AsyncMutex::new(context)),
            llm,
        })
    }
}

#[async_trait]
impl BrowserContext for StagehandContext {
    async fn new_page(&self) -> Result<Arc<dyn BrowserPage>> {
        let context = self.context.lock().await;
        let page = context
            .new_page()
            .await
            .map_err(|e| io_err("failed to create new page", e))?;
        Ok(Arc::new(StagehandPage::new(page, self.llm.clone())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_llm_output_strips_fenced_json() {
        assert_eq!(clean_llm_output("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(clean_llm_output("{\"a\":1}"), "{\"a\":1}");
    }

    #[test]
    fn find_balanced_skips_braces_inside_strings() {
        let text = r#"noise {"note": "uses {braces} in text", "ok": true} trailing"#;
        let found = find_balanced(text).unwrap();
        assert!(serde_json::from_str::<Value>(found).is_ok());
    }

    #[test]
    fn parse_json_lenient_extracts_from_prose() {
        let raw = "Sure thing! Here you go: {\"action\": \"click\"}\nHope that helps.";
        let value = parse_json_lenient(raw).unwrap();
        assert_eq!(value["action"], "click");
    }

    #[test]
    fn act_plan_deserializes_minimal_shape() {
        let plan: ActPlan = serde_json::from_value(serde_json::json!({
            "action": "type",
            "selector": "[data-browserflow-id='3']",
            "value": "hello"
        }))
        .unwrap();
        assert_eq!(plan.action, "type");
        assert_eq!(plan.value.as_deref(), Some("hello"));
    }
}
