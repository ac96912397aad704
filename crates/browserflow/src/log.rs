// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! The execution log side channel: human-readable progress
//! lines emitted through an injectable sink, independent of `tracing`.

use parking_lot::Mutex;

/// A sink for human-readable progress lines.
pub trait ExecutionSink: Send + Sync {
    /// Emits one progress line.
    fn line(&self, text: &str);
}

/// The default sink: forwards every line through `tracing::info!`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl ExecutionSink for TracingSink {
    fn line(&self, text: &str) {
        tracing::info!(target: "browserflow::execution_log", "{text}");
    }
}

/// An in-memory sink tests can assert against.
#[derive(Default)]
pub struct VecSink {
    lines: Mutex<Vec<String>>,
}

impl VecSink {
    /// An empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A snapshot of every line emitted so far, in order.
    #[must_use]
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().clone()
    }
}

impl ExecutionSink for VecSink {
    fn line(&self, text: &str) {
        self.lines.lock().push(text.to_string());
    }
}
