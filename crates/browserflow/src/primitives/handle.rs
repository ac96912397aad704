// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! `handle`: the only primitive permitted to suppress an
//! `Error`. `try` is attempted; a failure routes to `catch` (if present,
//! otherwise the error propagates); `finally` always runs, and an error it
//! raises wins only if `try`/`catch` didn't already fail.

use chrono::Utc;
use serde_json::{json, Value};

use crate::dispatcher::Dispatcher;
use crate::error::{Error, Result};
use crate::workflow::HandleNode;

/// Executes one `handle` node.
pub async fn execute(dispatcher: &Dispatcher, node: &HandleNode) -> Result<Value> {
    let mut pending_error: Option<Error> = None;
    let mut value = Value::Null;

    match dispatcher.dispatch_subnode(&node.r#try).await {
        Ok(v) => value = v,
        Err(e) => {
            dispatcher.state().set(
                "lastError",
                json!({
                    "message": e.to_string(),
                    "stack": format!("{e:?}"),
                    "timestamp": Utc::now().to_rfc3339(),
                }),
            );
            match &node.r#catch {
                Some(catch) => match dispatcher.dispatch_subnode(catch).await {
                    Ok(v) => value = v,
                    Err(catch_err) => pending_error = Some(catch_err),
                },
                None => pending_error = Some(e),
            }
        }
    }

    if let Some(finally) = &node.r#finally {
        if let Err(finally_err) = dispatcher.dispatch_subnode(finally).await {
            if pending_error.is_none() {
                pending_error = Some(finally_err);
            }
        }
    }

    match pending_error {
        Some(e) => Err(e),
        None => Ok(value),
    }
}
