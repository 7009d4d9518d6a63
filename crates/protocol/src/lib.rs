//! Wire types for the browser debugging protocol.
//!
//! This crate contains the serde-serializable types exchanged with a browser
//! tab over its debugger WebSocket, plus the tab descriptors served by the
//! browser's `/json` HTTP endpoint.
//!
//! # Design Philosophy
//!
//! Types in this crate are:
//! - **Pure data**: No behavior beyond serialization/deserialization
//! - **1:1 with protocol**: Field names match the wire format
//! - **Typed methods**: Each command and notification is a type carrying its
//!   method name, so callers never spell method strings by hand
//!
//! Connection handling, correlation and dispatch live in `chromesync-runtime`.

pub mod debugger;
pub mod message;
pub mod target;

pub use debugger::*;
pub use message::*;
pub use target::*;
