//! chromesync command-line interface.
//!
//! Loads the URL-prefix mappings, discovers the browser's tabs over its
//! remote-debugging HTTP endpoint and runs a [`chromesync_runtime::ChromeWatch`]
//! until interrupted.

pub mod cli;
pub mod commands;
pub mod config;
pub mod discovery;
pub mod error;
pub mod logging;
pub mod output;
