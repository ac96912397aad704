// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! `transform`: applies a named-transform expression to a
//! resolved input, via [`crate::transform_lang`].

use serde_json::Value;

use crate::dispatcher::Dispatcher;
use crate::error::Result;
use crate::transform_lang;
use crate::workflow::TransformNode;

/// Resolves `input`: a single state-ref/literal resolves directly; an array
/// of state-refs/literals resolves element-wise.
fn resolve_input(dispatcher: &Dispatcher, input: &Value) -> Value {
    match input {
        Value::Array(items) => {
            Value::Array(items.iter().map(|item| dispatcher.resolve(item)).collect())
        }
        other => dispatcher.resolve(other),
    }
}

/// Executes one `transform` node.
pub fn execute(dispatcher: &Dispatcher, node: &TransformNode) -> Result<Value> {
    let input = resolve_input(dispatcher, &node.input);
    let op = transform_lang::parse(&node.function)?;
    let result = transform_lang::apply(&op, &input)?;
    if let Some(output) = &node.output {
        dispatcher.set_by_path(output, result.clone());
    }
    Ok(result)
}
