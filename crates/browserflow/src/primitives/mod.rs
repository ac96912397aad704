// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! One module per primitive type. Each exposes a single
//! `execute` function the dispatcher calls after matching on [`crate::workflow::Node`].

pub mod browser_action;
pub mod browser_query;
pub mod context;
pub mod cognition;
pub mod handle;
pub mod iterate;
pub mod route;
pub mod transform;
