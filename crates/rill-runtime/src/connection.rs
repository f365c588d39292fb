//! Connections: the directed edges of a graph.
//!
//! A [`Connection`] is the static description (two port references and a
//! capacity); the executor realizes each one as a [`Link`] around a bounded
//! [`PacketQueue`] shared by exactly one sender and one receiver.

use rill_kernel::PacketQueue;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// A `component.port` reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PortRef {
    pub component: String,
    pub port: String,
}

impl PortRef {
    pub fn new(component: impl Into<String>, port: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            port: port.into(),
        }
    }
}

impl fmt::Display for PortRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.component, self.port)
    }
}

/// A directed edge from one output port to one input port.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Connection {
    pub source: PortRef,
    pub target: PortRef,
    pub capacity: usize,
}

impl Connection {
    /// The identity used in logs and errors, e.g. `GEN.OUT -> SINK.IN`.
    pub fn label(&self) -> String {
        format!("{} -> {}", self.source, self.target)
    }
}

/// A realized connection: the shared queue plus its label.
#[derive(Clone)]
pub(crate) struct Link {
    pub id: String,
    pub queue: Arc<PacketQueue>,
}

impl Link {
    pub fn new(connection: &Connection) -> Self {
        Self {
            id: connection.label(),
            queue: Arc::new(PacketQueue::new(connection.capacity)),
        }
    }
}
