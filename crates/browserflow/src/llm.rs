// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! The LLM client contract `cognition` invokes.
//!
//! Stateless from the engine's perspective: one request, one
//! response, no shared conversation history. `browserflow-anthropic`
//! provides a concrete implementation against Anthropic's Messages API.

use async_trait::async_trait;

use crate::error::Result;

/// A single chat-style LLM request/response round trip.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Sends `system` and `user` messages to `model` (or the client's
    /// default, if `None`) at the given `temperature`, returning the raw
    /// response text.
    async fn chat(
        &self,
        system: &str,
        user: &str,
        model: Option<&str>,
        temperature: f32,
    ) -> Result<String>;
}
