//! Core primitives for the rill dataflow runtime.
//!
//! This crate holds the pieces of the runtime that know nothing about
//! components, graphs, or scheduling:
//!
//! | Concept | Type |
//! |---------|------|
//! | Information packet | [`Packet`] / [`ControlKind`] |
//! | Bounded connection queue | [`PacketQueue`] |
//! | Substream / map-stream discipline | [`BracketStack`] |
//!
//! The execution layer lives in `rill-runtime`, which builds on these
//! primitives. The dependency only ever points that way: this crate must
//! never depend on the runtime.

pub mod bracket;
pub mod error;
pub mod packet;
pub mod queue;

pub use bracket::{BracketFrame, BracketStack, MAX_BRACKET_DEPTH};
pub use error::{ProtocolError, QueueClosed};
pub use packet::{ControlKind, Packet, DEFAULT_CHANNEL};
pub use queue::PacketQueue;
