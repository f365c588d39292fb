//! Error types for the kernel primitives.

use thiserror::Error;

/// A violation of the bracket discipline on a component's subscribed channel.
///
/// These errors are raised while applying a control packet to a
/// [`BracketStack`](crate::BracketStack); the runtime attributes them to the
/// offending component and terminates it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ProtocolError {
    #[error("substream close without a matching open")]
    UnbalancedClose,

    #[error("map close without a matching map open")]
    UnbalancedMapClose,

    #[error("switch to namespace '{0}' outside of a map")]
    SwitchOutsideMap(String),

    #[error("{0} bracket(s) still open at end of stream")]
    UnclosedBrackets(usize),

    #[error("bracket nesting exceeds the maximum depth of {0}")]
    DepthExceeded(usize),
}

/// Send-side failure: the queue was closed by its receiver or by the
/// scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("queue is closed")]
pub struct QueueClosed;
