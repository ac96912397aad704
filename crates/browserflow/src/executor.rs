// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! `UnifiedExecutor`: the top-level runner. Flattens a workflow's `flow`
//! (expanding `phase:` references into their member nodes), dispatches each
//! step through a fresh [`Dispatcher`], and records one execution-history
//! entry per top-level step. Also hosts the dry-run validator and
//! breakpoint bookkeeping used in `debug` mode.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;

use crate::browser::BrowserContext;
use crate::cancellation::CancellationSignal;
use crate::dispatcher::Dispatcher;
use crate::error::{Error, Result};
use crate::llm::LlmClient;
use crate::log::{ExecutionSink, TracingSink};
use crate::state::StateStore;
use crate::workflow::{parse_reference, Flow, FlowItem, IterateBody, Node, Reference, SubNode, Workflow};

/// Options accepted by [`UnifiedExecutor::run`].
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Initial key/value pairs seeded into state before the run starts.
    pub state: serde_json::Map<String, Value>,
    /// Restrict execution to these top-level references (`"node:..."` /
    /// `"phase:..."`); steps not named here are skipped. `None` runs
    /// everything.
    pub only: Option<Vec<String>>,
    /// Skip steps until this reference is reached (inclusive).
    pub start_at: Option<String>,
    /// Stop after this reference runs (inclusive).
    pub stop_at: Option<String>,
    /// Emit a sink line when a step matching a registered breakpoint runs.
    pub debug: bool,
    /// Validate the workflow instead of running it; returns a
    /// [`ValidationReport`] as the run's result value.
    pub dry_run: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            state: serde_json::Map::new(),
            only: None,
            start_at: None,
            stop_at: None,
            debug: false,
            dry_run: false,
        }
    }
}

/// Outcome of one flattened top-level step.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum HistoryOutcome {
    /// The step dispatched successfully.
    Ok {
        /// The step's return value.
        value: Value,
    },
    /// The step raised an error.
    Err {
        /// `Display` text of the error.
        message: String,
    },
}

/// One row of the run's execution history.
#[derive(Debug, Clone, Serialize)]
pub struct HistoryEntry {
    /// The node's canonical primitive type, or `"inline"` for an anonymous
    /// top-level step with no reference name.
    pub r#type: String,
    /// The reference string this step resolved from, if any.
    pub name: Option<String>,
    /// When this step started.
    pub timestamp: DateTime<Utc>,
    /// Deep clone of the whole state tree immediately before this step ran.
    pub state_before: Value,
    /// This step's outcome.
    pub result: HistoryOutcome,
}

/// Result of [`UnifiedExecutor::validate`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct ValidationReport {
    /// `true` iff `errors` is empty.
    pub valid: bool,
    /// Structural problems: dangling references, empty id, malformed
    /// reference strings.
    pub errors: Vec<String>,
    /// Non-fatal observations (e.g. an empty workflow).
    pub warnings: Vec<String>,
}

/// The top-level workflow runner.
pub struct UnifiedExecutor {
    workflow: Arc<Workflow>,
    llm: Arc<dyn LlmClient>,
    browser_context: Arc<dyn BrowserContext>,
    sink: Arc<dyn ExecutionSink>,
    breakpoints: Mutex<HashSet<String>>,
    history: Mutex<Vec<HistoryEntry>>,
    state: Arc<StateStore>,
}

impl UnifiedExecutor {
    /// Builds a runner for `workflow` against the given collaborators,
    /// logging to the default [`TracingSink`].
    pub fn new(workflow: Workflow, llm: Arc<dyn LlmClient>, browser_context: Arc<dyn BrowserContext>) -> Self {
        Self {
            workflow: Arc::new(workflow),
            llm,
            browser_context,
            sink: Arc::new(TracingSink),
            breakpoints: Mutex::new(HashSet::new()),
            history: Mutex::new(Vec::new()),
            state: Arc::new(StateStore::new()),
        }
    }

    /// Overrides the default execution-log sink, e.g. with a [`crate::log::VecSink`]
    /// in tests.
    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn ExecutionSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Registers a breakpoint on a `"node:..."` / `"phase:..."` reference.
    /// Only observed when `RunOptions::debug` is set.
    pub fn set_breakpoint(&self, reference: impl Into<String>) {
        self.breakpoints.lock().insert(reference.into());
    }

    /// Clears every registered breakpoint.
    pub fn clear_breakpoints(&self) {
        self.breakpoints.lock().clear();
    }

    /// The history recorded by the most recent [`Self::run`] call.
    #[must_use]
    pub fn history(&self) -> Vec<HistoryEntry> {
        self.history.lock().clone()
    }

    /// A deep clone of the current state tree.
    #[must_use]
    pub fn state(&self) -> Value {
        self.state.get_all()
    }

    /// Validates the workflow document without running it: every
    /// `phase.nodes` entry and every `node:`/`phase:` reference (nested
    /// inside `route`/`iterate`/`handle`, or at the top level) must resolve.
    #[must_use]
    pub fn validate(&self) -> ValidationReport {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        if self.workflow.id.trim().is_empty() {
            errors.push("workflow `id` is empty".to_string());
        }

        for (phase_name, phase) in &self.workflow.phases {
            for node_name in &phase.nodes {
                if !self.workflow.nodes.contains_key(node_name) {
                    errors.push(format!(
                        "phase `{phase_name}` references unknown node `{node_name}`"
                    ));
                }
            }
        }

        for node in self.workflow.nodes.values() {
            walk_nested_references(node, &mut |s| check_node_reference(&self.workflow, s, &mut errors));
        }

        match &self.workflow.flow {
            Flow::Single(node) => {
                walk_nested_references(node, &mut |s| check_node_reference(&self.workflow, s, &mut errors));
            }
            Flow::Sequence(items) => {
                for item in items {
                    match item {
                        FlowItem::Reference(s) => check_top_level_reference(&self.workflow, s, &mut errors),
                        FlowItem::Inline(node) => walk_nested_references(node, &mut |s| {
                            check_node_reference(&self.workflow, s, &mut errors)
                        }),
                    }
                }
            }
        }

        let flow_is_empty = matches!(&self.workflow.flow, Flow::Sequence(items) if items.is_empty());
        if self.workflow.nodes.is_empty() && self.workflow.phases.is_empty() && flow_is_empty {
            warnings.push("workflow has an empty flow and no named nodes".to_string());
        }

        ValidationReport {
            valid: errors.is_empty(),
            errors,
            warnings,
        }
    }

    /// Runs the workflow. With `dry_run` set, returns the serialized
    /// [`ValidationReport`] instead of dispatching anything.
    pub async fn run(&self, options: RunOptions) -> Result<Value> {
        if options.dry_run {
            return Ok(serde_json::to_value(self.validate())?);
        }

        self.state.seed(options.state.clone());
        self.history.lock().clear();

        let dispatcher = Dispatcher::new(
            self.state.clone(),
            self.workflow.clone(),
            self.llm.clone(),
            self.browser_context.clone(),
            self.sink.clone(),
            CancellationSignal::new(),
        );

        let steps = self.flatten_flow()?;

        for (option_name, reference) in [("startAt", &options.start_at), ("stopAt", &options.stop_at)] {
            if let Some(reference) = reference {
                if !steps.iter().any(|(name, _)| name.as_deref() == Some(reference.as_str())) {
                    return Err(Error::InvalidWorkflow(format!(
                        "{option_name} `{reference}` does not match any step in the flattened flow"
                    )));
                }
            }
        }

        let mut started = options.start_at.is_none();
        let mut last = Value::Null;

        for (name, sub) in steps {
            if !started {
                if name.as_deref() == options.start_at.as_deref() {
                    started = true;
                } else {
                    continue;
                }
            }

            if let Some(only) = &options.only {
                match &name {
                    Some(name) if only.iter().any(|o| o == name) => {}
                    _ => continue,
                }
            }

            if options.debug {
                if let Some(name) = &name {
                    if self.breakpoints.lock().contains(name) {
                        self.sink.line(&format!("breakpoint hit: {name}"));
                    }
                }
            }

            let state_before = self.state.get_all();
            let timestamp = Utc::now();
            let outcome = dispatcher.dispatch_subnode(&sub).await;

            self.history.lock().push(HistoryEntry {
                r#type: step_type_name(&sub, &self.workflow),
                name: name.clone(),
                timestamp,
                state_before,
                result: match &outcome {
                    Ok(value) => HistoryOutcome::Ok { value: value.clone() },
                    Err(e) => HistoryOutcome::Err { message: e.to_string() },
                },
            });

            let should_stop_after = name.is_some() && name.as_deref() == options.stop_at.as_deref();
            last = outcome?;
            if should_stop_after {
                break;
            }
        }

        Ok(last)
    }

    /// Expands `flow` into an ordered list of `(reference, SubNode)` steps,
    /// inlining each `phase:` member node as its own named step.
    fn flatten_flow(&self) -> Result<Vec<(Option<String>, SubNode)>> {
        match &self.workflow.flow {
            Flow::Single(node) => Ok(vec![(None, SubNode::Inline(Box::new(node.clone())))]),
            Flow::Sequence(items) => {
                let mut steps = Vec::new();
                for item in items {
                    match item {
                        FlowItem::Reference(s) => match parse_reference(s)? {
                            Reference::Phase(phase_name) => {
                                let phase = self
                                    .workflow
                                    .phases
                                    .get(&phase_name)
                                    .ok_or_else(|| Error::ReferenceNotFound(s.clone()))?;
                                for node_name in &phase.nodes {
                                    let node_ref = format!("node:{node_name}");
                                    steps.push((Some(node_ref.clone()), SubNode::Reference(node_ref)));
                                }
                            }
                            Reference::Node(_) => {
                                steps.push((Some(s.clone()), SubNode::Reference(s.clone())));
                            }
                        },
                        FlowItem::Inline(node) => {
                            steps.push((None, SubNode::Inline(Box::new(node.clone()))));
                        }
                    }
                }
                Ok(steps)
            }
        }
    }
}

fn step_type_name(sub: &SubNode, workflow: &Workflow) -> String {
    match sub {
        SubNode::Inline(node) => node.type_name().to_string(),
        SubNode::Reference(s) => match parse_reference(s) {
            Ok(Reference::Node(name)) => workflow
                .nodes
                .get(&name)
                .map(|n| n.type_name().to_string())
                .unwrap_or_else(|| "unknown".to_string()),
            _ => "unknown".to_string(),
        },
    }
}

fn check_node_reference(workflow: &Workflow, s: &str, errors: &mut Vec<String>) {
    match parse_reference(s) {
        Ok(Reference::Node(name)) => {
            if !workflow.nodes.contains_key(&name) {
                errors.push(format!("reference `{s}` does not resolve to any node"));
            }
        }
        Ok(Reference::Phase(_)) => {
            errors.push(format!(
                "`{s}` is a phase reference where only a node reference is valid"
            ));
        }
        Err(e) => errors.push(e.to_string()),
    }
}

fn check_top_level_reference(workflow: &Workflow, s: &str, errors: &mut Vec<String>) {
    match parse_reference(s) {
        Ok(Reference::Node(name)) => {
            if !workflow.nodes.contains_key(&name) {
                errors.push(format!("reference `{s}` does not resolve to any node"));
            }
        }
        Ok(Reference::Phase(name)) => {
            if !workflow.phases.contains_key(&name) {
                errors.push(format!("reference `{s}` does not resolve to any phase"));
            }
        }
        Err(e) => errors.push(e.to_string()),
    }
}

/// Walks every `SubNode` reachable from `node`'s control-flow fields
/// (`route` branches, `iterate` body, `handle` clauses), calling `visit`
/// with each reference string found.
fn walk_nested_references(node: &Node, visit: &mut impl FnMut(&str)) {
    match node {
        Node::Route(route) => {
            if let Some(conditions) = &route.conditions {
                for condition in conditions {
                    visit_subnode(&condition.branch, visit);
                }
            }
            if let Some(paths) = &route.paths {
                for sub in paths.values() {
                    visit_subnode(sub, visit);
                }
            }
            if let Some(default) = &route.default {
                visit_subnode(default, visit);
            }
        }
        Node::Iterate(iterate) => match &iterate.body {
            IterateBody::Single(sub) => visit_subnode(sub, visit),
            IterateBody::Sequence(subs) => {
                for sub in subs {
                    visit_subnode(sub, visit);
                }
            }
        },
        Node::Handle(handle) => {
            visit_subnode(&handle.r#try, visit);
            if let Some(catch) = &handle.r#catch {
                visit_subnode(catch, visit);
            }
            if let Some(finally) = &handle.r#finally {
                visit_subnode(finally, visit);
            }
        }
        _ => {}
    }
}

fn visit_subnode(sub: &SubNode, visit: &mut impl FnMut(&str)) {
    match sub {
        SubNode::Reference(s) => visit(s),
        SubNode::Inline(node) => walk_nested_references(node, visit),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{MockBrowserContext, MockLlmClient};
    use serde_json::json;

    fn workflow_from(json_value: Value) -> Workflow {
        serde_json::from_value(json_value).unwrap()
    }

    #[test]
    fn validate_flags_dangling_node_reference() {
        let workflow = workflow_from(json!({
            "id": "wf",
            "flow": ["node:missing"]
        }));
        let executor = UnifiedExecutor::new(
            workflow,
            Arc::new(MockLlmClient::default()),
            Arc::new(MockBrowserContext::default()),
        );
        let report = executor.validate();
        assert!(!report.valid);
        assert!(report.errors.iter().any(|e| e.contains("missing")));
    }

    #[test]
    fn validate_accepts_well_formed_workflow() {
        let workflow = workflow_from(json!({
            "id": "wf",
            "nodes": {
                "step": {"type": "context", "operation": "set", "data": {"a": 1}}
            },
            "flow": ["node:step"]
        }));
        let executor = UnifiedExecutor::new(
            workflow,
            Arc::new(MockLlmClient::default()),
            Arc::new(MockBrowserContext::default()),
        );
        assert!(executor.validate().valid);
    }

    #[tokio::test]
    async fn run_executes_a_single_inline_node() {
        let workflow = workflow_from(json!({
            "id": "wf",
            "flow": {"type": "context", "operation": "set", "data": {"a": 1}}
        }));
        let executor = UnifiedExecutor::new(
            workflow,
            Arc::new(MockLlmClient::default()),
            Arc::new(MockBrowserContext::default()),
        );
        let result = executor.run(RunOptions::default()).await.unwrap();
        assert_eq!(result, json!({"success": true}));
        assert_eq!(executor.state()["a"], json!(1));
        assert_eq!(executor.history().len(), 1);
    }

    #[tokio::test]
    async fn run_expands_phase_into_member_nodes() {
        let workflow = workflow_from(json!({
            "id": "wf",
            "phases": {"setup": {"name": "setup", "nodes": ["a", "b"]}},
            "nodes": {
                "a": {"type": "context", "operation": "set", "data": {"x": 1}},
                "b": {"type": "context", "operation": "set", "data": {"y": 2}}
            },
            "flow": ["phase:setup"]
        }));
        let executor = UnifiedExecutor::new(
            workflow,
            Arc::new(MockLlmClient::default()),
            Arc::new(MockBrowserContext::default()),
        );
        executor.run(RunOptions::default()).await.unwrap();
        let state = executor.state();
        assert_eq!(state["x"], json!(1));
        assert_eq!(state["y"], json!(2));
        assert_eq!(executor.history().len(), 2);
    }

    #[tokio::test]
    async fn run_honors_only_filter() {
        let workflow = workflow_from(json!({
            "id": "wf",
            "nodes": {
                "a": {"type": "context", "operation": "set", "data": {"x": 1}},
                "b": {"type": "context", "operation": "set", "data": {"y": 2}}
            },
            "flow": ["node:a", "node:b"]
        }));
        let executor = UnifiedExecutor::new(
            workflow,
            Arc::new(MockLlmClient::default()),
            Arc::new(MockBrowserContext::default()),
        );
        executor
            .run(RunOptions {
                only: Some(vec!["node:b".to_string()]),
                ..RunOptions::default()
            })
            .await
            .unwrap();
        let state = executor.state();
        assert!(state.get("x").is_none());
        assert_eq!(state["y"], json!(2));
    }

    #[tokio::test]
    async fn dry_run_returns_validation_report_without_executing() {
        let workflow = workflow_from(json!({
            "id": "wf",
            "nodes": {"a": {"type": "context", "operation": "set", "data": {"x": 1}}},
            "flow": ["node:missing"]
        }));
        let executor = UnifiedExecutor::new(
            workflow,
            Arc::new(MockLlmClient::default()),
            Arc::new(MockBrowserContext::default()),
        );
        let result = executor
            .run(RunOptions {
                dry_run: true,
                ..RunOptions::default()
            })
            .await
            .unwrap();
        assert_eq!(result["valid"], json!(false));
        assert!(executor.state().as_object().unwrap().is_empty());
    }
}
