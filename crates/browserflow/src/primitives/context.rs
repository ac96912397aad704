// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! `context` (alias `memory`): direct state reads/writes that
//! bypass the template-resolution every other primitive's fields go through
//! implicitly, except for `set`'s `data` values, which are template-expanded
//! before being written.

use serde_json::{json, Value};

use crate::dispatcher::Dispatcher;
use crate::error::{Error, Result};
use crate::workflow::ContextNode;

/// Executes one `context` node.
pub fn execute(dispatcher: &Dispatcher, node: &ContextNode) -> Result<Value> {
    match node.operation.as_str() {
        "set" => {
            let data = node.data.clone().unwrap_or_default();
            for (path, value) in &data {
                let resolved = dispatcher.resolve_templates(value);
                dispatcher.set_by_path(path, resolved);
            }
            Ok(json!({"success": true}))
        }
        "get" => {
            let path = node.path.clone().unwrap_or_default();
            let value = dispatcher.state().get(&path).unwrap_or(Value::Null);
            dispatcher.state().set("lastGet", value.clone());
            Ok(value)
        }
        "delete" => {
            let path = node.path.clone().unwrap_or_default();
            dispatcher.state().delete(&path);
            Ok(json!({"success": true}))
        }
        other => Err(Error::UnknownAction(other.to_string())),
    }
}
