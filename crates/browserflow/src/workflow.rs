// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! The workflow document model: phases, named nodes, the top-level flow,
//! and the tagged-union decoding of primitive invocations.
//!
//! Nodes are decoded once, here, into well-typed variants (one per
//! primitive) rather than carried around as loose JSON and re-interpreted
//! at every dispatch. `wait` and `memory` are legacy aliases resolved at
//! decode time: `wait` becomes a `browser_action` with `action: "wait"`
//! injected, `memory` becomes `context`.

use std::collections::BTreeMap;

use serde::de::{self, Deserializer};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// The top-level workflow document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    /// Unique identifier for the workflow.
    pub id: String,
    /// Display name.
    #[serde(default)]
    pub name: Option<String>,
    /// Longer-form description.
    #[serde(default)]
    pub description: Option<String>,
    /// Named, reusable bundles of node references.
    #[serde(default)]
    pub phases: BTreeMap<String, Phase>,
    /// Named, reusable node invocations.
    #[serde(default)]
    pub nodes: BTreeMap<String, Node>,
    /// The top-level execution order.
    pub flow: Flow,
}

/// A named, ordered bundle of node references.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Phase {
    /// Display name.
    pub name: String,
    /// Longer-form description.
    #[serde(default)]
    pub description: Option<String>,
    /// Ordered names into `Workflow::nodes`.
    pub nodes: Vec<String>,
}

/// The top-level flow: either one primitive invocation or an ordered
/// sequence of references / inline invocations.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Flow {
    /// A single primitive invocation with no surrounding sequence.
    Single(Node),
    /// An ordered sequence of flow items.
    Sequence(Vec<FlowItem>),
}

/// One item of a flow sequence.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FlowItem {
    /// A `"phase:<name>"` / `"node:<name>"` reference string.
    Reference(String),
    /// An anonymous, inline primitive invocation.
    Inline(Node),
}

/// A sub-node used inside control-flow primitives (route branches, iterate
/// bodies, handle clauses): either a reference string or an inline node.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SubNode {
    /// A `"phase:<name>"` / `"node:<name>"` reference string.
    Reference(String),
    /// An anonymous, inline primitive invocation.
    Inline(Box<Node>),
}

/// A resolved `phase:<name>` / `node:<name>` reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reference {
    /// `phase:<name>`
    Phase(String),
    /// `node:<name>`
    Node(String),
}

/// Parses a `"phase:<name>"` / `"node:<name>"` string. Does not check that
/// the named phase/node actually exists — callers resolve that against the
/// workflow document.
pub fn parse_reference(s: &str) -> Result<Reference> {
    if let Some(name) = s.strip_prefix("phase:") {
        Ok(Reference::Phase(name.to_string()))
    } else if let Some(name) = s.strip_prefix("node:") {
        Ok(Reference::Node(name.to_string()))
    } else {
        Err(Error::ReferenceMalformed(s.to_string()))
    }
}

/// `browser_action` invocation fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowserActionNode {
    /// One of the recognized sub-actions, case-insensitive.
    pub action: String,
    /// Natural-language target description for `click`/`type`.
    #[serde(default)]
    pub target: Option<String>,
    /// Value to type, for `type`.
    #[serde(default)]
    pub data: Option<Value>,
    /// URL for `navigate`/`goto`/`openNewTab`.
    #[serde(default)]
    pub url: Option<String>,
    /// Tab name, for `openNewTab`/`switchTab`.
    #[serde(default)]
    pub name: Option<String>,
    /// Sleep duration in ms, for `wait` (default 1000).
    #[serde(default)]
    pub duration: Option<u64>,
    /// CSS selector scoping a `screenshot`.
    #[serde(default)]
    pub selector: Option<String>,
    /// Output file path for `screenshot`.
    #[serde(default)]
    pub path: Option<String>,
    /// Whether `screenshot` should capture the full scrollable page.
    #[serde(default)]
    pub full_page: Option<bool>,
}

/// `browser_query` invocation fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowserQueryNode {
    /// `"extract"` or `"observe"`.
    pub method: String,
    /// Natural-language instruction passed to the façade.
    pub instruction: String,
    /// Compact or JSON-Schema-like shape the extraction must match.
    #[serde(default)]
    pub schema: Option<Value>,
    /// State path to store the full result under (defaults to
    /// `lastExtract`/`lastObserve` per method).
    #[serde(default)]
    pub output: Option<String>,
}

/// `transform` invocation fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransformNode {
    /// A value, a state-ref string, or an array of such.
    pub input: Value,
    /// The named-transform expression text (see [`crate::transform_lang`]).
    pub function: String,
    /// State path to store the result at.
    #[serde(default)]
    pub output: Option<String>,
}

/// `cognition` invocation fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CognitionNode {
    /// The prompt text (templates resolve against state).
    pub prompt: String,
    /// Value or state-ref passed alongside the prompt.
    #[serde(default)]
    pub input: Option<Value>,
    /// Compact or JSON-Schema-like shape the response must match.
    #[serde(default)]
    pub schema: Option<Value>,
    /// Model identifier; the `LlmClient` implementation defines defaults.
    #[serde(default)]
    pub model: Option<String>,
    /// State path to store the parsed result at.
    #[serde(default)]
    pub output: Option<String>,
}

/// `context`/`memory` invocation fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextNode {
    /// `"set"`, `"get"`, or `"delete"`.
    pub operation: String,
    /// Path/value pairs to merge into state, for `set`.
    #[serde(default)]
    pub data: Option<serde_json::Map<String, Value>>,
    /// State path, for `get`/`delete`.
    #[serde(default)]
    pub path: Option<String>,
}

/// One ordered condition in the condition form of `route`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteCondition {
    /// State path to read.
    pub path: String,
    /// Comparison operator.
    pub operator: String,
    /// Right-hand side of the comparison (unused for `exists`).
    #[serde(default)]
    pub value: Option<Value>,
    /// Sub-node to dispatch if this condition matches.
    pub branch: SubNode,
}

/// `route` invocation fields. Exactly one of `paths` /
/// `conditions` is expected to be present; which determines the form.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteNode {
    /// Value-form discriminant: resolved and stringified, then looked up
    /// in `paths`.
    #[serde(default)]
    pub value: Option<Value>,
    /// Value-form branch table, keyed by stringified value
    /// (`"default"` is the fallback key).
    #[serde(default)]
    pub paths: Option<BTreeMap<String, SubNode>>,
    /// Condition-form ordered predicate list.
    #[serde(default)]
    pub conditions: Option<Vec<RouteCondition>>,
    /// Fallback branch for either form.
    #[serde(default)]
    pub default: Option<SubNode>,
}

/// `iterate`'s body: a single sub-node or an ordered sequence of them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IterateBody {
    /// A single sub-node, dispatched once per item.
    Single(Box<SubNode>),
    /// An ordered sequence, each dispatched once per item.
    Sequence(Vec<SubNode>),
}

fn default_true() -> bool {
    true
}

/// `iterate` invocation fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IterateNode {
    /// State-ref or literal array to loop over.
    pub over: Value,
    /// Name under which the current item is bound.
    pub variable: String,
    /// Name under which the current index is bound
    /// (defaults to `<variable>Index`).
    #[serde(default)]
    pub index: Option<String>,
    /// The loop body.
    pub body: IterateBody,
    /// Maximum number of iterations.
    #[serde(default)]
    pub limit: Option<usize>,
    /// Whether a body error aborts the loop (default `true`: continue).
    #[serde(default = "default_true")]
    pub continue_on_error: bool,
}

/// `handle` invocation fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandleNode {
    /// The body to attempt.
    pub r#try: Box<SubNode>,
    /// Dispatched if `try` throws.
    #[serde(default)]
    pub r#catch: Option<Box<SubNode>>,
    /// Dispatched regardless of outcome.
    #[serde(default)]
    pub r#finally: Option<Box<SubNode>>,
}

/// A decoded primitive invocation. Constructed only via [`Node`]'s
/// `Deserialize` impl, which resolves the `wait`/`memory` aliases and
/// rejects any `type` outside the closed set at load time.
#[derive(Debug, Clone)]
pub enum Node {
    /// `browser_action`
    BrowserAction(BrowserActionNode),
    /// `browser_query`
    BrowserQuery(BrowserQueryNode),
    /// `transform`
    Transform(TransformNode),
    /// `cognition`
    Cognition(CognitionNode),
    /// `context` (alias `memory`)
    Context(ContextNode),
    /// `route`
    Route(RouteNode),
    /// `iterate`
    Iterate(IterateNode),
    /// `handle`
    Handle(HandleNode),
}

impl Node {
    /// The canonical (non-alias) type name, for logging and diagnostics.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Node::BrowserAction(_) => "browser_action",
            Node::BrowserQuery(_) => "browser_query",
            Node::Transform(_) => "transform",
            Node::Cognition(_) => "cognition",
            Node::Context(_) => "context",
            Node::Route(_) => "route",
            Node::Iterate(_) => "iterate",
            Node::Handle(_) => "handle",
        }
    }
}

impl<'de> Deserialize<'de> for Node {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let mut value = Value::deserialize(deserializer)?;
        let obj = value
            .as_object_mut()
            .ok_or_else(|| de::Error::custom("node must be a JSON object"))?;
        let raw_type = obj
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| de::Error::custom("node is missing required field `type`"))?
            .to_string();

        let canonical: &str = match raw_type.as_str() {
            "wait" => {
                obj.entry("action".to_string())
                    .or_insert_with(|| Value::String("wait".to_string()));
                "browser_action"
            }
            "memory" => "context",
            other => other,
        };
        obj.remove("type");
        let rest = Value::Object(obj.clone());

        match canonical {
            "browser_action" => Ok(Node::BrowserAction(
                serde_json::from_value(rest).map_err(de::Error::custom)?,
            )),
            "browser_query" => Ok(Node::BrowserQuery(
                serde_json::from_value(rest).map_err(de::Error::custom)?,
            )),
            "transform" => Ok(Node::Transform(
                serde_json::from_value(rest).map_err(de::Error::custom)?,
            )),
            "cognition" => Ok(Node::Cognition(
                serde_json::from_value(rest).map_err(de::Error::custom)?,
            )),
            "context" => Ok(Node::Context(
                serde_json::from_value(rest).map_err(de::Error::custom)?,
            )),
            "route" => Ok(Node::Route(
                serde_json::from_value(rest).map_err(de::Error::custom)?,
            )),
            "iterate" => Ok(Node::Iterate(
                serde_json::from_value(rest).map_err(de::Error::custom)?,
            )),
            "handle" => Ok(Node::Handle(
                serde_json::from_value(rest).map_err(de::Error::custom)?,
            )),
            other => Err(de::Error::custom(format!(
                "unknown primitive type: {other}"
            ))),
        }
    }
}

impl Serialize for Node {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut value = match self {
            Node::BrowserAction(n) => serde_json::to_value(n),
            Node::BrowserQuery(n) => serde_json::to_value(n),
            Node::Transform(n) => serde_json::to_value(n),
            Node::Cognition(n) => serde_json::to_value(n),
            Node::Context(n) => serde_json::to_value(n),
            Node::Route(n) => serde_json::to_value(n),
            Node::Iterate(n) => serde_json::to_value(n),
            Node::Handle(n) => serde_json::to_value(n),
        }
        .map_err(serde::ser::Error::custom)?;
        if let Some(obj) = value.as_object_mut() {
            obj.insert(
                "type".to_string(),
                Value::String(self.type_name().to_string()),
            );
        }
        value.serialize(serializer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_browser_action() {
        let node: Node = serde_json::from_value(json!({
            "type": "browser_action",
            "action": "navigate",
            "url": "https://example.com"
        }))
        .unwrap();
        assert!(matches!(node, Node::BrowserAction(_)));
        assert_eq!(node.type_name(), "browser_action");
    }

    #[test]
    fn wait_alias_injects_action() {
        let node: Node = serde_json::from_value(json!({"type": "wait", "duration": 500})).unwrap();
        match node {
            Node::BrowserAction(n) => {
                assert_eq!(n.action, "wait");
                assert_eq!(n.duration, Some(500));
            }
            _ => panic!("expected browser_action"),
        }
    }

    #[test]
    fn memory_alias_maps_to_context() {
        let node: Node =
            serde_json::from_value(json!({"type": "memory", "operation": "get", "path": "a"}))
                .unwrap();
        assert!(matches!(node, Node::Context(_)));
    }

    #[test]
    fn unknown_type_is_rejected() {
        let err = serde_json::from_value::<Node>(json!({"type": "not_a_primitive"})).unwrap_err();
        assert!(err.to_string().contains("unknown primitive type"));
    }

    #[test]
    fn reference_parsing() {
        assert_eq!(
            parse_reference("phase:setup").unwrap(),
            Reference::Phase("setup".to_string())
        );
        assert_eq!(
            parse_reference("node:login").unwrap(),
            Reference::Node("login".to_string())
        );
        assert!(parse_reference("bogus:x").is_err());
    }

    #[test]
    fn round_trips_through_serde_json() {
        let node: Node = serde_json::from_value(json!({
            "type": "cognition",
            "prompt": "classify",
            "schema": {"label": "string"}
        }))
        .unwrap();
        let back = serde_json::to_value(&node).unwrap();
        assert_eq!(back["type"], json!("cognition"));
        assert_eq!(back["prompt"], json!("classify"));
    }
}
