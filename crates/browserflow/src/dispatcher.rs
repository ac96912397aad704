// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! The dispatcher: owns the state store, the tab table, and the
//! collaborators (browser context, LLM client, execution sink,
//! cancellation signal), and routes a decoded [`Node`] to the primitive
//! module that executes it.
//!
//! Dispatch is a pattern match over the closed node enum
//! here rather than a `Primitive` trait object per node type — there are
//! exactly eight cases and they don't grow at runtime.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;

use crate::browser::{BrowserContext, BrowserPage};
use crate::cancellation::CancellationSignal;
use crate::error::{Error, Result};
use crate::llm::LlmClient;
use crate::log::ExecutionSink;
use crate::primitives;
use crate::state::StateStore;
use crate::workflow::{parse_reference, Node, Reference, SubNode, Workflow};

/// Name of the tab created lazily by the first `navigate`/`goto`.
pub const MAIN_TAB: &str = "main";
/// Ceiling for a DOM-loaded wait.
pub const DOM_LOADED_TIMEOUT: Duration = Duration::from_secs(60);
/// Ceiling for the best-effort network-idle wait that follows `navigate`.
pub const NETWORK_IDLE_TIMEOUT: Duration = Duration::from_secs(10);

/// Routes decoded nodes to primitive implementations, and owns every piece
/// of shared runtime state a primitive might need.
pub struct Dispatcher {
    state: Arc<StateStore>,
    workflow: Arc<Workflow>,
    llm: Arc<dyn LlmClient>,
    browser_context: Arc<dyn BrowserContext>,
    tabs: Mutex<BTreeMap<String, Arc<dyn BrowserPage>>>,
    tab_order: Mutex<Vec<String>>,
    current_tab: Mutex<Option<String>>,
    sink: Arc<dyn ExecutionSink>,
    cancel: CancellationSignal,
}

impl Dispatcher {
    /// Builds a dispatcher sharing `state` with its caller (the executor
    /// reads it back after a run completes).
    pub fn new(
        state: Arc<StateStore>,
        workflow: Arc<Workflow>,
        llm: Arc<dyn LlmClient>,
        browser_context: Arc<dyn BrowserContext>,
        sink: Arc<dyn ExecutionSink>,
        cancel: CancellationSignal,
    ) -> Self {
        Self {
            state,
            workflow,
            llm,
            browser_context,
            tabs: Mutex::new(BTreeMap::new()),
            tab_order: Mutex::new(Vec::new()),
            current_tab: Mutex::new(None),
            sink,
            cancel,
        }
    }

    /// The shared state store.
    #[must_use]
    pub fn state(&self) -> &StateStore {
        &self.state
    }

    /// The workflow document, for resolving `node:`/`phase:` references.
    #[must_use]
    pub fn workflow(&self) -> &Workflow {
        &self.workflow
    }

    /// The execution log sink.
    #[must_use]
    pub fn sink(&self) -> &dyn ExecutionSink {
        &*self.sink
    }

    /// The LLM client collaborator.
    #[must_use]
    pub fn llm(&self) -> &dyn LlmClient {
        &*self.llm
    }

    /// The cancellation signal.
    #[must_use]
    pub fn cancellation(&self) -> &CancellationSignal {
        &self.cancel
    }

    /// The single recursive dispatch entry point.
    pub async fn dispatch(&self, node: &Node) -> Result<Value> {
        self.cancel.check()?;
        self.sink.line(&format!("-> {}", node.type_name()));
        let result = match node {
            Node::BrowserAction(n) => primitives::browser_action::execute(self, n).await,
            Node::BrowserQuery(n) => primitives::browser_query::execute(self, n).await,
            Node::Transform(n) => primitives::transform::execute(self, n),
            Node::Cognition(n) => primitives::cognition::execute(self, n).await,
            Node::Context(n) => primitives::context::execute(self, n),
            Node::Route(n) => primitives::route::execute(self, n).await,
            Node::Iterate(n) => primitives::iterate::execute(self, n).await,
            Node::Handle(n) => primitives::handle::execute(self, n).await,
        };
        match &result {
            Ok(_) => self.sink.line(&format!("<- {} ok", node.type_name())),
            Err(e) => self.sink.line(&format!("<- {} error: {e}", node.type_name())),
        }
        result
    }

    /// Dispatches a `SubNode`: an inline node, or a `node:`-prefixed
    /// reference resolved against [`Workflow::nodes`]. A `phase:` reference
    /// is malformed in this position — a phase is an ordered bundle, not a
    /// single node.
    pub async fn dispatch_subnode(&self, sub: &SubNode) -> Result<Value> {
        match sub {
            SubNode::Inline(node) => self.dispatch(node).await,
            SubNode::Reference(s) => match parse_reference(s)? {
                Reference::Node(name) => {
                    let node = self
                        .workflow
                        .nodes
                        .get(&name)
                        .ok_or_else(|| Error::ReferenceNotFound(s.clone()))?;
                    self.dispatch(node).await
                }
                Reference::Phase(_) => Err(Error::ReferenceNotFound(s.clone())),
            },
        }
    }

    /// Resolves a field value the way every primitive's "resolve" step
    /// works: a `{{...}}`-bearing string is template-
    /// expanded; a bare `state.<path>` string is read directly off the
    /// store; anything else passes through unchanged.
    #[must_use]
    pub fn resolve(&self, v: &Value) -> Value {
        match v {
            Value::String(s) if s.starts_with("state.") => {
                self.state.get(&s["state.".len()..]).unwrap_or(Value::Null)
            }
            Value::String(s) if s.contains("{{") => Value::String(self.state.resolve_template(s)),
            other => other.clone(),
        }
    }

    /// [`StateStore::resolve_templates`], forwarded for primitives that
    /// only have a `&Dispatcher` in hand.
    #[must_use]
    pub fn resolve_templates(&self, v: &Value) -> Value {
        self.state.resolve_templates(v)
    }

    /// Writes `value` at an `output`/`path` field, stripping a leading
    /// `state.` prefix if present (both forms appear across node kinds).
    pub fn set_by_path(&self, path: &str, value: Value) {
        let path = path.strip_prefix("state.").unwrap_or(path);
        self.state.set(path, value);
    }

    /// The page bound to the current tab. `Err(Error::NotInitialized)` if
    /// no browser-producing primitive has run yet.
    pub fn current_page(&self) -> Result<Arc<dyn BrowserPage>> {
        let current = self.current_tab.lock();
        let name = current.as_ref().ok_or(Error::NotInitialized)?;
        self.tabs
            .lock()
            .get(name)
            .cloned()
            .ok_or(Error::NotInitialized)
    }

    /// Returns the current page if one exists, otherwise lazily creates the
    /// `main` tab. Only `navigate`/`goto` call this; every other browser
    /// action requires `currentPage` to already be set.
    pub async fn ensure_main_page(&self) -> Result<Arc<dyn BrowserPage>> {
        if let Ok(page) = self.current_page() {
            return Ok(page);
        }
        let page = self.browser_context.new_page().await?;
        self.insert_tab(MAIN_TAB.to_string(), page.clone());
        *self.current_tab.lock() = Some(MAIN_TAB.to_string());
        self.state.set("currentPage", Value::String(MAIN_TAB.to_string()));
        Ok(page)
    }

    /// Records a tab under `name`, tracking creation order separately from
    /// the lookup table (`BTreeMap::keys()` would yield alphabetical order).
    fn insert_tab(&self, name: String, page: Arc<dyn BrowserPage>) {
        let is_new = !self.tabs.lock().contains_key(&name);
        self.tabs.lock().insert(name.clone(), page);
        if is_new {
            self.tab_order.lock().push(name);
        }
    }

    /// Creates and switches to a new tab, optionally navigating it.
    pub async fn open_new_tab(&self, name: Option<String>, url: Option<&str>) -> Result<String> {
        let page = self.browser_context.new_page().await?;
        let name = name.unwrap_or_else(|| format!("tab{}", self.tabs.lock().len()));
        self.insert_tab(name.clone(), page.clone());
        *self.current_tab.lock() = Some(name.clone());
        self.state.set("currentPage", Value::String(name.clone()));
        if let Some(url) = url {
            page.navigate(url, DOM_LOADED_TIMEOUT).await?;
        }
        Ok(name)
    }

    /// Switches the current tab pointer to an already-open tab.
    pub fn switch_tab(&self, name: &str) -> Result<Arc<dyn BrowserPage>> {
        let page = self
            .tabs
            .lock()
            .get(name)
            .cloned()
            .ok_or_else(|| Error::TabUnknown(name.to_string()))?;
        *self.current_tab.lock() = Some(name.to_string());
        self.state.set("currentPage", Value::String(name.to_string()));
        Ok(page)
    }

    /// `(name, is_current)` for every open tab, in creation order.
    #[must_use]
    pub fn list_tabs(&self) -> Vec<(String, bool)> {
        let current = self.current_tab.lock().clone();
        self.tab_order
            .lock()
            .iter()
            .map(|name| (name.clone(), Some(name.clone()) == current))
            .collect()
    }

    /// The current tab's name, if any.
    #[must_use]
    pub fn current_tab_name(&self) -> Option<String> {
        self.current_tab.lock().clone()
    }
}
