//! Cooperative flow-based programming runtime.
//!
//! A graph of black-box components exchanges immutable packets over bounded
//! point-to-point connections. Components run as cooperative tasks whose
//! only suspension points are the blocking port operations: a send suspends
//! on a full connection, a receive suspends on an empty one, and closure
//! propagates end-of-stream through the network. Control packets overlay
//! substream and map structure on the data stream, scoped to named channels
//! so that independent overlays coexist.
//!
//! | Concept | Type |
//! |---------|------|
//! | Network description | [`Graph`] |
//! | Processing unit | [`Component`] + [`ComponentSpec`] |
//! | Port surface inside `run` | [`ComponentContext`] |
//! | Scheduler | [`Executor`] / [`ExecutorHandle`] |
//!
//! # Getting started
//!
//! ```ignore
//! use rill_runtime::{ComponentSpec, Executor, Graph};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> anyhow::Result<()> {
//!     let mut graph = Graph::new("pipeline");
//!     graph.add_component(ComponentSpec::new("GEN"), Generator::default())?;
//!     graph.add_component(ComponentSpec::new("SINK").keepalive(), Sink::default())?;
//!     graph.connect("GEN", "OUT", "SINK", "IN")?;
//!     graph.set_initial_packet("GEN", "LIMIT", 5)?;
//!
//!     Executor::new(graph).execute().await?;
//!     Ok(())
//! }
//! ```

pub mod component;
pub mod connection;
pub mod context;
pub mod error;
pub mod executor;
pub mod graph;
pub mod port;

pub use component::{Component, ComponentSpec, ComponentState, WaitKind};
pub use connection::{Connection, PortRef};
pub use context::ComponentContext;
pub use error::{DeadlockInfo, DeadlockWaiter, FlowError, FlowResult};
pub use executor::{Executor, ExecutorConfig, ExecutorHandle};
pub use graph::{Graph, DEFAULT_CONNECTION_CAPACITY};
pub use port::{PortRegistry, Received};

pub use rill_kernel::{ControlKind, Packet, ProtocolError, DEFAULT_CHANNEL};
