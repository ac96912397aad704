// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! `browser_query`: read-only, AI-assisted `extract`/`observe`.

use serde_json::Value;

use crate::dispatcher::Dispatcher;
use crate::error::{Error, Result};
use crate::schema::{self, Schema};
use crate::workflow::BrowserQueryNode;

/// Executes one `browser_query` node.
pub async fn execute(dispatcher: &Dispatcher, node: &BrowserQueryNode) -> Result<Value> {
    let page = dispatcher.current_page()?;
    let instruction = match dispatcher.resolve(&Value::String(node.instruction.clone())) {
        Value::String(resolved) => resolved,
        other => other.to_string(),
    };

    match node.method.to_lowercase().as_str() {
        "extract" => {
            let parsed_schema = node.schema.as_ref().map(Schema::from_value);
            let result = page.extract(&instruction, parsed_schema.as_ref()).await?;
            if let Some(parsed_schema) = &parsed_schema {
                schema::validate(parsed_schema, &result).map_err(Error::SchemaMismatch)?;
            }
            // Deliberately additive (see DESIGN.md): a successful
            // extraction writes every top-level field into state as a
            // sibling key, in addition to the full payload at `output`.
            if let Value::Object(fields) = &result {
                for (key, value) in fields {
                    dispatcher.state().set(key, value.clone());
                }
            }
            let output = node.output.clone().unwrap_or_else(|| "lastExtract".to_string());
            dispatcher.set_by_path(&output, result.clone());
            Ok(result)
        }
        "observe" => {
            let result = page.observe(&instruction).await?;
            let output = node.output.clone().unwrap_or_else(|| "lastObserve".to_string());
            dispatcher.set_by_path(&output, result.clone());
            Ok(result)
        }
        other => Err(Error::UnknownAction(other.to_string())),
    }
}
