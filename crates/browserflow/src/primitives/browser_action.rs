// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! `browser_action`: the imperative browser sub-actions.
//! Every action except `navigate`/`goto`/`openNewTab` requires `currentPage`
//! to already be set.

use serde_json::{json, Value};

use crate::dispatcher::{Dispatcher, DOM_LOADED_TIMEOUT, NETWORK_IDLE_TIMEOUT};
use crate::error::{Error, Result};
use crate::workflow::BrowserActionNode;

/// Default sleep duration for `wait`, in milliseconds.
const DEFAULT_WAIT_MS: u64 = 1000;

fn resolve_str(dispatcher: &Dispatcher, s: &Option<String>) -> Option<String> {
    s.as_ref().map(|v| match dispatcher.resolve(&Value::String(v.clone())) {
        Value::String(resolved) => resolved,
        other => other.to_string(),
    })
}

/// Executes one `browser_action` node.
pub async fn execute(dispatcher: &Dispatcher, node: &BrowserActionNode) -> Result<Value> {
    let action = node.action.to_lowercase();
    let target = resolve_str(dispatcher, &node.target);
    let url = resolve_str(dispatcher, &node.url);
    let name = resolve_str(dispatcher, &node.name);
    let selector = resolve_str(dispatcher, &node.selector);
    let path = resolve_str(dispatcher, &node.path);

    match action.as_str() {
        "navigate" | "goto" => {
            let url = url.ok_or_else(|| {
                Error::InvalidWorkflow("browser_action.navigate requires `url`".to_string())
            })?;
            let page = dispatcher.ensure_main_page().await?;
            page.navigate(&url, DOM_LOADED_TIMEOUT).await?;
            if let Err(e) = page.wait_network_idle(NETWORK_IDLE_TIMEOUT).await {
                dispatcher
                    .sink()
                    .line(&format!("network-idle wait after navigate did not settle: {e}"));
            }
            Ok(json!({"success": true, "url": url}))
        }
        "click" => {
            let page = dispatcher.current_page()?;
            let target = target.ok_or_else(|| {
                Error::InvalidWorkflow("browser_action.click requires `target`".to_string())
            })?;
            page.act(&format!("click on {target}")).await?;
            Ok(json!({"success": true, "target": target}))
        }
        "type" => {
            let page = dispatcher.current_page()?;
            let target = target.ok_or_else(|| {
                Error::InvalidWorkflow("browser_action.type requires `target`".to_string())
            })?;
            let data = node.data.as_ref().map(|v| dispatcher.resolve(v)).unwrap_or(Value::Null);
            let value = match &data {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            page.act(&format!("type \"{value}\" into {target}")).await?;
            Ok(json!({"success": true, "target": target, "value": value}))
        }
        "wait" => {
            let duration = node.duration.unwrap_or(DEFAULT_WAIT_MS);
            dispatcher.cancellation().check()?;
            tokio::time::sleep(std::time::Duration::from_millis(duration)).await;
            dispatcher.cancellation().check()?;
            Ok(json!({"success": true, "duration": duration}))
        }
        "opennewtab" => {
            let tab_name = dispatcher.open_new_tab(name, url.as_deref()).await?;
            Ok(json!({"success": true, "name": tab_name}))
        }
        "switchtab" => {
            let name = name.ok_or_else(|| {
                Error::InvalidWorkflow("browser_action.switchTab requires `name`".to_string())
            })?;
            let page = dispatcher.switch_tab(&name)?;
            page.bring_to_front().await?;
            Ok(json!({"success": true, "name": name}))
        }
        "back" => {
            dispatcher.current_page()?.go_back().await?;
            Ok(json!({"success": true}))
        }
        "forward" => {
            dispatcher.current_page()?.go_forward().await?;
            Ok(json!({"success": true}))
        }
        "refresh" => {
            dispatcher.current_page()?.reload().await?;
            Ok(json!({"success": true}))
        }
        "screenshot" => {
            let page = dispatcher.current_page()?;
            let shot = page
                .screenshot(selector.as_deref(), node.full_page.unwrap_or(false), path.as_deref())
                .await?;
            Ok(json!({"success": true, "path": shot.path, "byteLen": shot.byte_len}))
        }
        "listtabs" => {
            let tabs: Vec<Value> = dispatcher
                .list_tabs()
                .into_iter()
                .map(|(name, active)| json!({"name": name, "active": active}))
                .collect();
            Ok(json!({"success": true, "tabs": tabs}))
        }
        "getcurrenttab" => {
            Ok(json!({"success": true, "name": dispatcher.current_tab_name()}))
        }
        other => Err(Error::UnknownAction(other.to_string())),
    }
}
