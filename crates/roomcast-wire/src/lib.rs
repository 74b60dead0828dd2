//! # roomcast-wire
//!
//! Wire grammar for the roomcast message router.
//!
//! Every message on a room's bus is a newline-terminated text line of the
//! shape `sender:payload`. This crate owns the two halves of that
//! protocol:
//!
//! - **Grammar** - envelope parsing and payload classification
//!   (roster query, directed delivery, broadcast), plus the synthetic
//!   messages a room emits on its own (`roommates:`, `leavingroommate:`)
//! - **Codec** - incremental newline-delimited decoding over a byte
//!   buffer, with a line-length guard
//!
//! The prefixes `Repeater:`, `Intruder:` and `To:` and the literals
//! `newroommates\n`, `roommates:<names>\n` and `leavingroommate:<name>\n`
//! are the de facto protocol between room members and are preserved
//! byte-for-byte.

pub mod codec;
pub mod grammar;

pub use codec::{decode_from, encode_into, WireError};
pub use grammar::{Directive, Envelope, ToolKind};
