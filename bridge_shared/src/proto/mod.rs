//! Management-protocol line grammar.
//!
//! The bridge exchanges LF-terminated text directives with the VPN engine
//! over a local socket. This module classifies incoming lines into typed
//! directives and builds the reply text the engine expects.

pub mod line;

pub use line::{parse_line, reply, Directive, NeedKind};
