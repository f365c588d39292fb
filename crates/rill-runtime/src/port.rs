//! Port declarations, receive outcomes, and the runtime bindings behind
//! them.
//!
//! Ports are declared by name in [`Component::initialize`] and wired by the
//! graph; at execution time each declared port becomes a binding that the
//! [`ComponentContext`](crate::ComponentContext) drives. An input binding
//! yields its initial packets first, in registration order, then packets
//! from its connection, then end-of-stream.

use crate::connection::Link;
use rill_kernel::Packet;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;
use std::time::Duration;

/// Declaration of an input port.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputPortSpec {
    pub name: String,
    /// The output port that foreign-channel control packets arriving here
    /// are passed through on. Without a pair, the sole output is used if the
    /// component has exactly one.
    pub pair: Option<String>,
}

/// Declaration of an output port.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputPortSpec {
    pub name: String,
}

/// Collects port declarations during [`Component::initialize`].
///
/// [`Component::initialize`]: crate::Component::initialize
#[derive(Debug, Default)]
pub struct PortRegistry {
    pub(crate) inputs: Vec<InputPortSpec>,
    pub(crate) outputs: Vec<OutputPortSpec>,
}

impl PortRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Declare an input port.
    pub fn input(&mut self, name: impl Into<String>) -> &mut Self {
        self.inputs.push(InputPortSpec {
            name: name.into(),
            pair: None,
        });
        self
    }

    /// Declare an input port with an explicit pass-through partner for
    /// foreign-channel control packets.
    pub fn input_paired(&mut self, name: impl Into<String>, pair: impl Into<String>) -> &mut Self {
        self.inputs.push(InputPortSpec {
            name: name.into(),
            pair: Some(pair.into()),
        });
        self
    }

    /// Declare an output port.
    pub fn output(&mut self, name: impl Into<String>) -> &mut Self {
        self.outputs.push(OutputPortSpec { name: name.into() });
        self
    }

    pub fn input_names(&self) -> impl Iterator<Item = &str> {
        self.inputs.iter().map(|p| p.name.as_str())
    }

    pub fn output_names(&self) -> impl Iterator<Item = &str> {
        self.outputs.iter().map(|p| p.name.as_str())
    }
}

/// Outcome of a receive operation.
#[derive(Debug, Clone, PartialEq)]
pub enum Received<T> {
    /// The next item of interest.
    Item(T),
    /// The upstream side is closed and drained; nothing more will arrive.
    EndOfStream,
    /// The deadline elapsed before anything arrived; the component stays
    /// active and may retry.
    TimedOut,
}

impl<T> Received<T> {
    pub fn into_item(self) -> Option<T> {
        match self {
            Self::Item(item) => Some(item),
            _ => None,
        }
    }

    pub fn is_end_of_stream(&self) -> bool {
        matches!(self, Self::EndOfStream)
    }

    pub fn is_timed_out(&self) -> bool {
        matches!(self, Self::TimedOut)
    }
}

/// Runtime state of one input port.
pub(crate) struct InputBinding {
    pub name: String,
    pub pair: Option<String>,
    /// Connection label, or `component.port` when unconnected; used in wait
    /// points and errors.
    pub label: String,
    pub iips: VecDeque<Value>,
    pub link: Option<Link>,
    /// Set once end-of-stream has been yielded.
    pub exhausted: bool,
}

impl InputBinding {
    /// The next raw packet: initial packets first, then the connection.
    ///
    /// No channel filtering happens here; that is the context's job.
    pub async fn next(&mut self, deadline: Option<Duration>) -> Received<Packet> {
        if let Some(value) = self.iips.pop_front() {
            return Received::Item(Packet::data(value));
        }

        let Some(link) = &self.link else {
            self.exhausted = true;
            return Received::EndOfStream;
        };

        let polled = match deadline {
            None => link.queue.recv().await,
            Some(deadline) => match tokio::time::timeout(deadline, link.queue.recv()).await {
                Ok(polled) => polled,
                Err(_) => return Received::TimedOut,
            },
        };

        match polled {
            Some(packet) => Received::Item(packet),
            None => {
                self.exhausted = true;
                Received::EndOfStream
            }
        }
    }
}

/// Runtime state of one output port.
pub(crate) struct OutputBinding {
    pub name: String,
    pub link: Option<Link>,
    /// Brackets opened through the helper calls and not yet closed.
    pub open_brackets: usize,
}
