// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! Error taxonomy for the workflow execution engine.
//!
//! Every variant here corresponds to one row of the error taxonomy table in
//! the engine's design notes. `handle` is the only primitive allowed to
//! suppress an `Error`; everything else propagates it to the dispatcher.

use thiserror::Error;

/// Result alias used throughout the engine.
pub type Result<T> = std::result::Result<T, Error>;

/// The closed set of error kinds the engine can produce.
#[derive(Debug, Error)]
pub enum Error {
    /// A browser primitive ran before any browser-producing primitive had
    /// established `currentPage`.
    #[error("browser not initialized: no current page")]
    NotInitialized,

    /// A node's `type` is not one of the eight closed primitive names (or
    /// the `wait`/`memory` aliases).
    #[error("unknown primitive type: {0}")]
    UnknownPrimitive(String),

    /// A `browser_action`/`browser_query`/`context` node named a
    /// sub-action or method we don't recognize.
    #[error("unknown action: {0}")]
    UnknownAction(String),

    /// A `phase:` or `node:` reference did not resolve.
    #[error("reference not found: {0}")]
    ReferenceNotFound(String),

    /// A reference string didn't start with `phase:` or `node:`.
    #[error("malformed reference: {0}")]
    ReferenceMalformed(String),

    /// A structured value failed schema validation (`cognition` or
    /// `browser_query.extract`). Carries a human-readable diagnostic.
    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),

    /// The LLM's output could not be parsed as JSON even after stripping
    /// code fences and applying the balanced-brace fallback, or it failed
    /// schema validation on the retry attempt too.
    #[error("cognition format error: {0}")]
    CognitionFormatError(String),

    /// The LLM call exceeded its ambient deadline.
    #[error("cognition timed out")]
    CognitionTimeout,

    /// DOM-loaded wait exceeded 60 seconds.
    #[error("navigation timed out after {0:?}")]
    NavigationTimeout(std::time::Duration),

    /// `switchTab` named a tab that doesn't exist.
    #[error("unknown tab: {0}")]
    TabUnknown(String),

    /// A `transform` expression failed to parse or evaluate.
    #[error("transform evaluation error: {message} (function: {function:?}, input: {input})")]
    TransformEvalError {
        /// Human-readable diagnostic.
        message: String,
        /// The `function` field text that failed, verbatim.
        function: String,
        /// The resolved input the function was applied to.
        input: serde_json::Value,
    },

    /// `iterate` body failed with `continueOnError: false`.
    #[error("iteration failed at index {index}: {source}")]
    IterationError {
        /// Index of the failing item.
        index: usize,
        /// Underlying failure.
        #[source]
        source: Box<Error>,
    },

    /// `route` had no matching branch and no `default`.
    #[error("no route matched")]
    NoRouteMatched,

    /// An external cancellation signal fired while a primitive was
    /// suspended.
    #[error("execution cancelled")]
    Cancelled,

    /// The workflow document itself is malformed: a dangling reference, an
    /// unknown node type, or a structurally invalid node, caught once at
    /// load/dry-run time rather than repeated ad hoc at every use site.
    #[error("invalid workflow: {0}")]
    InvalidWorkflow(String),

    /// Propagated from `serde_json` while decoding a workflow document or a
    /// cognition/extract payload.
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// Opaque failure surfaced by a browser-automation façade or LLM client
    /// implementation that doesn't map onto a more specific variant here.
    #[error("collaborator error: {0}")]
    Collaborator(String),
}

impl Error {
    /// The variant name, as a stable identifier distinct from the
    /// human-readable `Display` message.
    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        match self {
            Error::NotInitialized => "NotInitialized",
            Error::UnknownPrimitive(_) => "UnknownPrimitive",
            Error::UnknownAction(_) => "UnknownAction",
            Error::ReferenceNotFound(_) => "ReferenceNotFound",
            Error::ReferenceMalformed(_) => "ReferenceMalformed",
            Error::SchemaMismatch(_) => "SchemaMismatch",
            Error::CognitionFormatError(_) => "CognitionFormatError",
            Error::CognitionTimeout => "CognitionTimeout",
            Error::NavigationTimeout(_) => "NavigationTimeout",
            Error::TabUnknown(_) => "TabUnknown",
            Error::TransformEvalError { .. } => "TransformEvalError",
            Error::IterationError { .. } => "IterationError",
            Error::NoRouteMatched => "NoRouteMatched",
            Error::Cancelled => "Cancelled",
            Error::InvalidWorkflow(_) => "InvalidWorkflow",
            Error::Serde(_) => "Serde",
            Error::Collaborator(_) => "Collaborator",
        }
    }
}
