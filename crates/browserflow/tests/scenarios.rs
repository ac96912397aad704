// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! End-to-end scenarios exercising the dispatcher/executor against the
//! mock browser/LLM collaborators rather than any single primitive in
//! isolation.

#![cfg(feature = "test-support")]

use std::sync::Arc;

use async_trait::async_trait;
use browserflow::browser::{BrowserContext, BrowserPage};
use browserflow::error::Result as BfResult;
use browserflow::executor::{RunOptions, UnifiedExecutor};
use browserflow::test_support::{MockBrowserContext, MockBrowserPage, MockLlmClient};
use browserflow::workflow::Workflow;
use serde_json::json;

fn workflow_from(value: serde_json::Value) -> Workflow {
    serde_json::from_value(value).expect("well-formed workflow fixture")
}

/// A [`BrowserContext`] that always hands back the same pre-configured
/// page, so a test can set up `extract`/`observe` responses before the
/// dispatcher lazily creates the `main` tab.
struct SinglePageContext {
    page: Arc<MockBrowserPage>,
}

#[async_trait]
impl BrowserContext for SinglePageContext {
    async fn new_page(&self) -> BfResult<Arc<dyn BrowserPage>> {
        Ok(self.page.clone())
    }
}

#[tokio::test]
async fn extract_then_filter_preserves_full_extract_alongside_filtered_output() {
    let workflow = workflow_from(json!({
        "id": "extract-and-filter",
        "flow": [
            {"type": "browser_action", "action": "navigate", "url": "https://mail.example"},
            {
                "type": "browser_query",
                "method": "extract",
                "instruction": "extract visible emails",
                "schema": {"emails": "array"}
            },
            {
                "type": "transform",
                "input": "state.emails",
                "function": "filter(unread)",
                "output": "unread"
            }
        ]
    }));

    let page = Arc::new(MockBrowserPage::new());
    page.set_extract_response(json!({
        "emails": [
            {"unread": true},
            {"unread": false},
            {"unread": true}
        ]
    }));
    let browser_context = Arc::new(SinglePageContext { page });
    let llm = Arc::new(MockLlmClient::default());
    let executor = UnifiedExecutor::new(workflow, llm, browser_context);

    executor.run(RunOptions::default()).await.unwrap();

    let state = executor.state();
    assert_eq!(state["lastExtract"]["emails"].as_array().unwrap().len(), 3);
    assert_eq!(state["unread"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn cognition_retries_once_on_format_error_then_succeeds() {
    let workflow = workflow_from(json!({
        "id": "classify",
        "flow": {
            "type": "cognition",
            "prompt": "classify",
            "schema": {"label": "string"},
            "output": "label"
        }
    }));

    let llm = Arc::new(MockLlmClient::with_responses([
        "```json\n{\"label\": 42}\n```".to_string(),
        "{\"label\": \"investor\"}".to_string(),
    ]));
    let browser_context = Arc::new(MockBrowserContext::default());
    let executor = UnifiedExecutor::new(workflow, llm.clone(), browser_context);

    executor.run(RunOptions::default()).await.unwrap();

    assert_eq!(executor.state()["label"], json!("investor"));
    assert_eq!(llm.calls().len(), 2);
}

#[tokio::test]
async fn route_by_condition_runs_only_the_matching_branch() {
    let workflow = workflow_from(json!({
        "id": "route-by-status",
        "nodes": {
            "ok_branch": {"type": "context", "operation": "set", "data": {"ranOk": true}},
            "err_branch": {"type": "context", "operation": "set", "data": {"ranErr": true}}
        },
        "flow": {
            "type": "route",
            "conditions": [
                {"path": "status", "operator": "equals", "value": "ok", "branch": "node:ok_branch"},
                {"path": "status", "operator": "equals", "value": "err", "branch": "node:err_branch"}
            ]
        }
    }));

    let llm = Arc::new(MockLlmClient::default());
    let browser_context = Arc::new(MockBrowserContext::default());
    let executor = UnifiedExecutor::new(workflow, llm, browser_context);

    let mut options = RunOptions::default();
    options.state.insert("status".to_string(), json!("ok"));
    executor.run(options).await.unwrap();

    let state = executor.state();
    assert_eq!(state["ranOk"], json!(true));
    assert!(state.get("ranErr").is_none());
}

#[tokio::test]
async fn iterate_continues_past_errors_and_cleans_up_bindings() {
    // `route` with no `default` branch fails with `NoRouteMatched` whenever
    // the bound `item` is even, giving us an error-iff-even body without
    // a dedicated test-only primitive.
    let workflow = workflow_from(json!({
        "id": "iterate-with-errors",
        "nodes": {
            "noop": {"type": "context", "operation": "set", "data": {}},
            "fail_on_even": {
                "type": "route",
                "conditions": [
                    {"path": "item", "operator": "equals", "value": 1, "branch": "node:noop"},
                    {"path": "item", "operator": "equals", "value": 3, "branch": "node:noop"}
                ]
            }
        },
        "flow": {
            "type": "iterate",
            "over": [1, 2, 3, 4],
            "variable": "item",
            "body": "node:fail_on_even",
            "continueOnError": true
        }
    }));

    let llm = Arc::new(MockLlmClient::default());
    let browser_context = Arc::new(MockBrowserContext::default());
    let executor = UnifiedExecutor::new(workflow, llm, browser_context);

    let result = executor.run(RunOptions::default()).await.unwrap();
    // `processed` counts every iteration that ran to completion, whether it
    // succeeded or was absorbed by `continueOnError`; only a genuinely
    // skipped iteration (past a non-continuing error) would be excluded.
    assert_eq!(result["processed"], json!(4));
    assert_eq!(result["errors"].as_array().unwrap().len(), 2);

    let state = executor.state();
    assert!(state.get("item").is_none());
    assert!(state.get("itemIndex").is_none());
}

#[tokio::test]
async fn tab_multiplex_keeps_independent_urls_and_reports_current_tab() {
    let workflow = workflow_from(json!({
        "id": "tab-multiplex",
        "flow": [
            {"type": "browser_action", "action": "navigate", "url": "https://mail.example/inbox"},
            {"type": "browser_action", "action": "openNewTab", "name": "sheet", "url": "https://sheet.example"},
            {"type": "browser_action", "action": "switchTab", "name": "main"},
            {"type": "browser_action", "action": "navigate", "url": "https://mail.example"},
            {"type": "browser_action", "action": "listTabs"}
        ]
    }));

    let llm = Arc::new(MockLlmClient::default());
    let browser_context = Arc::new(MockBrowserContext::default());
    let executor = UnifiedExecutor::new(workflow, llm, browser_context);

    let result = executor.run(RunOptions::default()).await.unwrap();
    let tabs = result["tabs"].as_array().unwrap();
    assert_eq!(tabs.len(), 2);
    assert!(tabs.iter().any(|t| t["name"] == "main" && t["active"] == true));
    assert!(tabs.iter().any(|t| t["name"] == "sheet"));

    assert_eq!(executor.state()["currentPage"], json!("main"));
}

#[tokio::test]
async fn list_tabs_reports_creation_order_not_alphabetical_order() {
    // "alpha" sorts before "main" alphabetically but is created second, so
    // this only passes if `listTabs` tracks creation order explicitly.
    let workflow = workflow_from(json!({
        "id": "tab-creation-order",
        "flow": [
            {"type": "browser_action", "action": "navigate", "url": "https://mail.example/inbox"},
            {"type": "browser_action", "action": "openNewTab", "name": "alpha", "url": "https://alpha.example"},
            {"type": "browser_action", "action": "listTabs"}
        ]
    }));

    let llm = Arc::new(MockLlmClient::default());
    let browser_context = Arc::new(MockBrowserContext::default());
    let executor = UnifiedExecutor::new(workflow, llm, browser_context);

    let result = executor.run(RunOptions::default()).await.unwrap();
    let tabs = result["tabs"].as_array().unwrap();
    let names: Vec<&str> = tabs.iter().map(|t| t["name"].as_str().unwrap()).collect();
    assert_eq!(names, vec!["main", "alpha"]);
}

#[tokio::test]
async fn dry_run_reports_a_missing_phase_reference_without_executing() {
    let workflow = workflow_from(json!({
        "id": "dry-run-broken-ref",
        "phases": {
            "setup": {"name": "setup", "nodes": []}
        },
        "flow": ["phase:setup", "phase:missing"]
    }));

    let llm = Arc::new(MockLlmClient::default());
    let browser_context = Arc::new(MockBrowserContext::default());
    let executor = UnifiedExecutor::new(workflow, llm, browser_context);

    let mut options = RunOptions::default();
    options.dry_run = true;
    let report = executor.run(options).await.unwrap();

    assert_eq!(report["valid"], json!(false));
    assert!(report["errors"]
        .as_array()
        .unwrap()
        .iter()
        .any(|e| e.as_str().unwrap().contains("missing")));
    assert!(executor.history().is_empty());
}
