// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! Core execution engine for browser-automation workflows: a path-addressed
//! state store, a closed-tagged-union node model, eight primitive
//! executors, and the `UnifiedExecutor` that runs a whole workflow document
//! against an injected browser-automation facade and LLM client.
//!
//! `browserflow-playwright` and `browserflow-anthropic` provide concrete
//! collaborators; this crate only depends on the [`browser::BrowserPage`]/
//! [`browser::BrowserContext`] and [`llm::LlmClient`] trait contracts.

pub mod browser;
pub mod cancellation;
pub mod dispatcher;
pub mod error;
pub mod executor;
pub mod llm;
pub mod log;
pub mod primitives;
pub mod schema;
pub mod state;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod transform_lang;
pub mod workflow;

pub use dispatcher::Dispatcher;
pub use error::{Error, Result};
pub use executor::{HistoryEntry, HistoryOutcome, RunOptions, UnifiedExecutor, ValidationReport};
pub use state::StateStore;
pub use workflow::{Node, Workflow};
