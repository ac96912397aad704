// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! `route`: branches on either an ordered condition list or a
//! resolved value looked up in a branch table.

use regex::Regex;
use serde_json::Value;

use crate::dispatcher::Dispatcher;
use crate::error::{Error, Result};
use crate::workflow::RouteCondition;
use crate::workflow::RouteNode;

fn stringify(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn values_equal(left: Option<&Value>, right: Option<&Value>) -> bool {
    left.unwrap_or(&Value::Null) == right.unwrap_or(&Value::Null)
}

fn contains(left: Option<&Value>, right: Option<&Value>) -> bool {
    match (left, right) {
        (Some(Value::Array(items)), Some(needle)) => items.contains(needle),
        (Some(Value::String(haystack)), Some(Value::String(needle))) => haystack.contains(needle.as_str()),
        _ => false,
    }
}

fn evaluate_condition(dispatcher: &Dispatcher, condition: &RouteCondition) -> Result<bool> {
    let left = dispatcher.state().get(&condition.path);
    let right = condition.value.as_ref();
    match condition.operator.as_str() {
        "exists" => Ok(left.is_some()),
        "equals" => Ok(values_equal(left.as_ref(), right)),
        "notEquals" => Ok(!values_equal(left.as_ref(), right)),
        "contains" => Ok(contains(left.as_ref(), right)),
        "matches" => {
            let (Some(left), Some(pattern)) = (left.as_ref(), right.and_then(Value::as_str)) else {
                return Ok(false);
            };
            let re = Regex::new(pattern)
                .map_err(|e| Error::InvalidWorkflow(format!("invalid regex in route condition: {e}")))?;
            Ok(re.is_match(&stringify(left)))
        }
        op @ ("greater" | "less" | "greaterOrEqual" | "lessOrEqual") => {
            let (Some(l), Some(r)) = (
                left.as_ref().and_then(Value::as_f64),
                right.and_then(Value::as_f64),
            ) else {
                return Ok(false);
            };
            Ok(match op {
                "greater" => l > r,
                "less" => l < r,
                "greaterOrEqual" => l >= r,
                "lessOrEqual" => l <= r,
                _ => unreachable!(),
            })
        }
        other => Err(Error::InvalidWorkflow(format!(
            "unknown route operator: {other}"
        ))),
    }
}

/// Executes one `route` node.
pub async fn execute(dispatcher: &Dispatcher, node: &RouteNode) -> Result<Value> {
    if let Some(conditions) = &node.conditions {
        for condition in conditions {
            if evaluate_condition(dispatcher, condition)? {
                return dispatcher.dispatch_subnode(&condition.branch).await;
            }
        }
        return match &node.default {
            Some(default) => dispatcher.dispatch_subnode(default).await,
            None => Err(Error::NoRouteMatched),
        };
    }

    if let Some(paths) = &node.paths {
        let resolved = node
            .value
            .as_ref()
            .map(|v| dispatcher.resolve(v))
            .unwrap_or(Value::Null);
        let key = stringify(&resolved);
        // Fallback order (pinned here and recorded in DESIGN.md): the
        // stringified value, then the literal
        // key `"false"`, then the literal key `"default"`, then the node's
        // own `default` field.
        if let Some(branch) = paths.get(&key) {
            return dispatcher.dispatch_subnode(branch).await;
        }
        if let Some(branch) = paths.get("false") {
            return dispatcher.dispatch_subnode(branch).await;
        }
        if let Some(branch) = paths.get("default") {
            return dispatcher.dispatch_subnode(branch).await;
        }
        return match &node.default {
            Some(default) => dispatcher.dispatch_subnode(default).await,
            None => Err(Error::NoRouteMatched),
        };
    }

    Err(Error::InvalidWorkflow(
        "route requires either `conditions` or `value` + `paths`".to_string(),
    ))
}
