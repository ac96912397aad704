// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! `iterate`: loops a body over a resolved array, binding the
//! current item and index, with an optional per-iteration cap and a policy
//! for whether a body error aborts the loop.

use serde_json::{json, Value};

use crate::dispatcher::Dispatcher;
use crate::error::{Error, Result};
use crate::workflow::{IterateBody, IterateNode, SubNode};

fn bodies(body: &IterateBody) -> Vec<&SubNode> {
    match body {
        IterateBody::Single(sub) => vec![sub.as_ref()],
        IterateBody::Sequence(subs) => subs.iter().collect(),
    }
}

fn unbind(dispatcher: &Dispatcher, variable: &str, index_var: &str, total_var: &str) {
    dispatcher.state().delete(variable);
    dispatcher.state().delete(index_var);
    dispatcher.state().delete(total_var);
}

/// Executes one `iterate` node.
pub async fn execute(dispatcher: &Dispatcher, node: &IterateNode) -> Result<Value> {
    let over = dispatcher.resolve(&node.over);
    let items = match over {
        Value::Array(items) => items,
        _ => Vec::new(),
    };
    let total = items.len();
    let limit = node.limit.map_or(total, |l| l.min(total));
    let index_var = node.index.clone().unwrap_or_else(|| format!("{}Index", node.variable));
    let total_var = format!("{}Total", node.variable);
    let body = bodies(&node.body);

    dispatcher.state().set(&total_var, json!(total));

    let mut results = Vec::with_capacity(limit);
    let mut errors = Vec::new();
    let mut processed = 0usize;

    for (index, item) in items.iter().take(limit).enumerate() {
        if let Err(e) = dispatcher.cancellation().check() {
            unbind(dispatcher, &node.variable, &index_var, &total_var);
            return Err(e);
        }
        dispatcher.state().set(&node.variable, item.clone());
        dispatcher.state().set(&index_var, json!(index));

        let mut outcome = Ok(Value::Null);
        for sub in &body {
            outcome = dispatcher.dispatch_subnode(sub).await;
            match &outcome {
                Ok(value) => dispatcher.state().set("lastResult", value.clone()),
                Err(_) => break,
            }
        }

        match outcome {
            Ok(value) => {
                results.push(value);
                processed += 1;
            }
            Err(e) => {
                errors.push(json!({"index": index, "error": e.to_string()}));
                if !node.continue_on_error {
                    dispatcher.state().set("lastIterationErrors", json!(errors));
                    unbind(dispatcher, &node.variable, &index_var, &total_var);
                    return Err(Error::IterationError {
                        index,
                        source: Box::new(e),
                    });
                }
                processed += 1;
            }
        }
    }

    unbind(dispatcher, &node.variable, &index_var, &total_var);
    if !errors.is_empty() {
        dispatcher.state().set("lastIterationErrors", json!(errors));
    }
    Ok(json!({
        "results": results,
        "errors": errors,
        "processed": processed,
        "total": total,
    }))
}
