//! Flow-level error types.

use crate::component::WaitKind;
use rill_kernel::ProtocolError;
use std::fmt;
use thiserror::Error;

/// Result alias for flow operations.
pub type FlowResult<T> = Result<T, FlowError>;

/// Errors raised while building or executing a graph.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum FlowError {
    /// Graph construction: a component with this name already exists.
    #[error("component '{0}' is already defined in the graph")]
    DuplicateComponent(String),

    /// Graph construction: no component with this name.
    #[error("unknown component '{0}'")]
    UnknownComponent(String),

    /// Graph construction: the component does not declare this port.
    #[error("component '{component}' has no port named '{port}'")]
    UnknownPort { component: String, port: String },

    /// Graph construction: a port may carry at most one connection.
    #[error("port '{0}' already has a connection")]
    PortAlreadyConnected(String),

    /// Graph construction: a port name declared twice on one component.
    #[error("component '{component}' declares port '{port}' more than once")]
    DuplicatePort { component: String, port: String },

    /// Graph construction: a pass-through pair references an undeclared
    /// output.
    #[error("input '{input}' of component '{component}' pairs with undeclared output '{pair}'")]
    InvalidPair {
        component: String,
        input: String,
        pair: String,
    },

    /// A send hit a connection that was closed by the receiver or the
    /// scheduler. Propagating this out of `run` ends the component
    /// gracefully.
    #[error("connection {0} is closed")]
    ConnectionClosed(String),

    /// A bracket-discipline violation on the component's subscribed channel.
    #[error("stream protocol violation in component '{component}': {source}")]
    Protocol {
        component: String,
        #[source]
        source: ProtocolError,
    },

    /// A component's `run` failed (including panics contained by the task
    /// boundary).
    #[error("component '{component}' failed: {message}")]
    ComponentFailed { component: String, message: String },

    /// No runnable component, no pending event, and at least one component
    /// still live.
    #[error("deadlock detected: {0}")]
    Deadlock(DeadlockInfo),

    /// Hard shutdown: components still running when the grace period
    /// expired.
    #[error("shutdown grace period expired with components still running: {}", components.join(", "))]
    ShutdownTimedOut { components: Vec<String> },

    /// `execute` was called a second time on the same executor.
    #[error("executor has already run its graph")]
    AlreadyExecuted,

    /// Anything else; also the escape hatch for component authors.
    #[error("{0}")]
    Internal(String),
}

/// One component stuck at a suspension point when deadlock was declared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadlockWaiter {
    pub component: String,
    pub connection: String,
    pub kind: WaitKind,
}

/// The set of components a deadlock was declared over.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeadlockInfo {
    pub waiters: Vec<DeadlockWaiter>,
}

impl DeadlockInfo {
    /// Names of the stuck components.
    pub fn components(&self) -> Vec<&str> {
        self.waiters.iter().map(|w| w.component.as_str()).collect()
    }
}

impl fmt::Display for DeadlockInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for waiter in &self.waiters {
            if !first {
                write!(f, ", ")?;
            }
            first = false;
            let verb = match waiter.kind {
                WaitKind::Send => "send",
                WaitKind::Recv => "receive",
            };
            write!(f, "{} ({} on {})", waiter.component, verb, waiter.connection)?;
        }
        Ok(())
    }
}
