//! Static graph description: components, connections, and initial packets.
//!
//! A [`Graph`] is pure description. Components are registered with a
//! [`ComponentSpec`], their ports are declared during registration, and
//! connections and initial packets reference those ports by name — every
//! construction error surfaces synchronously, at build time. Execution
//! freezes the graph: the executor consumes it by value and no structural
//! mutation is possible afterwards.

use crate::component::{Component, ComponentSpec};
use crate::connection::{Connection, PortRef};
use crate::error::{FlowError, FlowResult};
use crate::port::PortRegistry;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// Default capacity for connections created by [`Graph::connect`].
pub const DEFAULT_CONNECTION_CAPACITY: usize = 16;

pub(crate) struct ComponentEntry {
    pub spec: ComponentSpec,
    pub ports: PortRegistry,
    pub component: Box<dyn Component>,
}

/// An initial packet: a value pre-seeded onto an input port, delivered
/// before any packet from the port's connection.
pub(crate) struct InitialPacket {
    pub component: String,
    pub port: String,
    pub value: Value,
}

/// A static network of components.
pub struct Graph {
    name: String,
    entries: Vec<ComponentEntry>,
    index: HashMap<String, usize>,
    connections: Vec<Connection>,
    initial_packets: Vec<InitialPacket>,
    default_capacity: usize,
}

impl Graph {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries: Vec::new(),
            index: HashMap::new(),
            connections: Vec::new(),
            initial_packets: Vec::new(),
            default_capacity: DEFAULT_CONNECTION_CAPACITY,
        }
    }

    /// Build a graph with a construction closure and validate the result.
    pub fn assemble(
        name: impl Into<String>,
        build: impl FnOnce(&mut Graph) -> FlowResult<()>,
    ) -> FlowResult<Graph> {
        let mut graph = Graph::new(name);
        build(&mut graph)?;
        graph.validate()?;
        Ok(graph)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn component_count(&self) -> usize {
        self.entries.len()
    }

    pub fn component_names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.spec.name.as_str())
    }

    pub fn connections(&self) -> &[Connection] {
        &self.connections
    }

    /// Override the capacity used by [`connect`](Self::connect).
    pub fn set_default_capacity(&mut self, capacity: usize) -> FlowResult<()> {
        if capacity == 0 {
            return Err(FlowError::Internal(
                "connection capacity must be at least 1".into(),
            ));
        }
        self.default_capacity = capacity;
        Ok(())
    }

    /// Register a component. Its `initialize` runs here, once, declaring the
    /// ports that `connect` and `set_initial_packet` validate against.
    pub fn add_component(
        &mut self,
        spec: ComponentSpec,
        component: impl Component + 'static,
    ) -> FlowResult<()> {
        if self.index.contains_key(&spec.name) {
            return Err(FlowError::DuplicateComponent(spec.name));
        }

        let mut component: Box<dyn Component> = Box::new(component);
        let mut ports = PortRegistry::new();
        component.initialize(&mut ports);
        Self::check_ports(&spec.name, &ports)?;

        debug!(
            graph = %self.name,
            component = %spec.name,
            channel = %spec.channel,
            keepalive = spec.keepalive,
            "registered component"
        );
        self.index.insert(spec.name.clone(), self.entries.len());
        self.entries.push(ComponentEntry {
            spec,
            ports,
            component,
        });
        Ok(())
    }

    /// Connect an output port to an input port with the default capacity.
    pub fn connect(
        &mut self,
        source_component: &str,
        source_port: &str,
        target_component: &str,
        target_port: &str,
    ) -> FlowResult<()> {
        self.connect_with_capacity(
            source_component,
            source_port,
            target_component,
            target_port,
            self.default_capacity,
        )
    }

    /// Connect an output port to an input port with an explicit capacity.
    /// Capacity 1 gives the strictest hand-off behavior: the sender suspends
    /// until the receiver takes each packet.
    pub fn connect_with_capacity(
        &mut self,
        source_component: &str,
        source_port: &str,
        target_component: &str,
        target_port: &str,
        capacity: usize,
    ) -> FlowResult<()> {
        if capacity == 0 {
            return Err(FlowError::Internal(
                "connection capacity must be at least 1".into(),
            ));
        }

        let source = self.resolve_output(source_component, source_port)?;
        let target = self.resolve_input(target_component, target_port)?;

        if self.connections.iter().any(|c| c.source == source) {
            return Err(FlowError::PortAlreadyConnected(source.to_string()));
        }
        if self.connections.iter().any(|c| c.target == target) {
            return Err(FlowError::PortAlreadyConnected(target.to_string()));
        }

        debug!(graph = %self.name, connection = %format!("{source} -> {target}"), capacity, "connected");
        self.connections.push(Connection {
            source,
            target,
            capacity,
        });
        Ok(())
    }

    /// Seed an initial packet onto an input port. May be called repeatedly;
    /// values are delivered in registration order, before anything from the
    /// port's connection.
    pub fn set_initial_packet(
        &mut self,
        component: &str,
        port: &str,
        value: impl Into<Value>,
    ) -> FlowResult<()> {
        let target = self.resolve_input(component, port)?;
        self.initial_packets.push(InitialPacket {
            component: target.component,
            port: target.port,
            value: value.into(),
        });
        Ok(())
    }

    /// Re-check referential integrity. `connect` and `set_initial_packet`
    /// already validate incrementally; this is the executor's entry check.
    pub fn validate(&self) -> FlowResult<()> {
        let mut seen_sources = HashSet::new();
        let mut seen_targets = HashSet::new();
        for connection in &self.connections {
            self.resolve_output(&connection.source.component, &connection.source.port)?;
            self.resolve_input(&connection.target.component, &connection.target.port)?;
            if !seen_sources.insert(&connection.source) {
                return Err(FlowError::PortAlreadyConnected(connection.source.to_string()));
            }
            if !seen_targets.insert(&connection.target) {
                return Err(FlowError::PortAlreadyConnected(connection.target.to_string()));
            }
        }
        for iip in &self.initial_packets {
            self.resolve_input(&iip.component, &iip.port)?;
        }
        Ok(())
    }

    pub(crate) fn into_parts(self) -> (String, Vec<ComponentEntry>, Vec<Connection>, Vec<InitialPacket>) {
        (self.name, self.entries, self.connections, self.initial_packets)
    }

    fn check_ports(component: &str, ports: &PortRegistry) -> FlowResult<()> {
        let mut names = HashSet::new();
        for input in &ports.inputs {
            if !names.insert(input.name.as_str()) {
                return Err(FlowError::DuplicatePort {
                    component: component.to_string(),
                    port: input.name.clone(),
                });
            }
        }
        let mut names = HashSet::new();
        for output in &ports.outputs {
            if !names.insert(output.name.as_str()) {
                return Err(FlowError::DuplicatePort {
                    component: component.to_string(),
                    port: output.name.clone(),
                });
            }
        }
        for input in &ports.inputs {
            if let Some(pair) = &input.pair {
                if !ports.outputs.iter().any(|o| &o.name == pair) {
                    return Err(FlowError::InvalidPair {
                        component: component.to_string(),
                        input: input.name.clone(),
                        pair: pair.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    fn resolve_output(&self, component: &str, port: &str) -> FlowResult<PortRef> {
        let entry = self.entry(component)?;
        if !entry.ports.outputs.iter().any(|o| o.name == port) {
            return Err(FlowError::UnknownPort {
                component: component.to_string(),
                port: port.to_string(),
            });
        }
        Ok(PortRef::new(component, port))
    }

    fn resolve_input(&self, component: &str, port: &str) -> FlowResult<PortRef> {
        let entry = self.entry(component)?;
        if !entry.ports.inputs.iter().any(|i| i.name == port) {
            return Err(FlowError::UnknownPort {
                component: component.to_string(),
                port: port.to_string(),
            });
        }
        Ok(PortRef::new(component, port))
    }

    fn entry(&self, component: &str) -> FlowResult<&ComponentEntry> {
        self.index
            .get(component)
            .map(|&i| &self.entries[i])
            .ok_or_else(|| FlowError::UnknownComponent(component.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::{Component, ComponentSpec};
    use crate::context::ComponentContext;
    use crate::error::{FlowError, FlowResult};
    use crate::port::PortRegistry;
    use async_trait::async_trait;
    use serde_json::json;

    struct Passthrough;

    #[async_trait]
    impl Component for Passthrough {
        fn initialize(&mut self, ports: &mut PortRegistry) {
            ports.input_paired("IN", "OUT").output("OUT");
        }

        async fn run(&mut self, _ctx: &mut ComponentContext) -> FlowResult<()> {
            Ok(())
        }
    }

    struct BadPair;

    #[async_trait]
    impl Component for BadPair {
        fn initialize(&mut self, ports: &mut PortRegistry) {
            ports.input_paired("IN", "MISSING");
        }

        async fn run(&mut self, _ctx: &mut ComponentContext) -> FlowResult<()> {
            Ok(())
        }
    }

    fn two_node_graph() -> Graph {
        let mut graph = Graph::new("g");
        graph
            .add_component(ComponentSpec::new("A"), Passthrough)
            .unwrap();
        graph
            .add_component(ComponentSpec::new("B"), Passthrough)
            .unwrap();
        graph
    }

    #[test]
    fn duplicate_component_name_is_rejected() {
        let mut graph = two_node_graph();
        let err = graph
            .add_component(ComponentSpec::new("A"), Passthrough)
            .unwrap_err();
        assert!(matches!(err, FlowError::DuplicateComponent(name) if name == "A"));
    }

    #[test]
    fn connect_validates_components_and_ports() {
        let mut graph = two_node_graph();
        assert!(matches!(
            graph.connect("A", "OUT", "MISSING", "IN"),
            Err(FlowError::UnknownComponent(_))
        ));
        assert!(matches!(
            graph.connect("A", "NOPE", "B", "IN"),
            Err(FlowError::UnknownPort { .. })
        ));
        assert!(matches!(
            graph.connect("A", "OUT", "B", "NOPE"),
            Err(FlowError::UnknownPort { .. })
        ));
        graph.connect("A", "OUT", "B", "IN").unwrap();
    }

    #[test]
    fn ports_carry_at_most_one_connection() {
        let mut graph = two_node_graph();
        graph
            .add_component(ComponentSpec::new("C"), Passthrough)
            .unwrap();
        graph.connect("A", "OUT", "B", "IN").unwrap();

        assert!(matches!(
            graph.connect("A", "OUT", "C", "IN"),
            Err(FlowError::PortAlreadyConnected(port)) if port == "A.OUT"
        ));
        assert!(matches!(
            graph.connect("C", "OUT", "B", "IN"),
            Err(FlowError::PortAlreadyConnected(port)) if port == "B.IN"
        ));
    }

    #[test]
    fn initial_packets_target_known_input_ports() {
        let mut graph = two_node_graph();
        graph.set_initial_packet("B", "IN", json!("x")).unwrap();
        assert!(matches!(
            graph.set_initial_packet("B", "OUT", json!("x")),
            Err(FlowError::UnknownPort { .. })
        ));
    }

    #[test]
    fn pair_must_reference_a_declared_output() {
        let mut graph = Graph::new("g");
        let err = graph
            .add_component(ComponentSpec::new("X"), BadPair)
            .unwrap_err();
        assert!(matches!(err, FlowError::InvalidPair { pair, .. } if pair == "MISSING"));
    }

    #[test]
    fn zero_capacity_is_rejected() {
        let mut graph = two_node_graph();
        assert!(graph
            .connect_with_capacity("A", "OUT", "B", "IN", 0)
            .is_err());
    }

    #[test]
    fn assemble_builds_and_validates() {
        let graph = Graph::assemble("g", |g| {
            g.add_component(ComponentSpec::new("A"), Passthrough)?;
            g.add_component(ComponentSpec::new("B"), Passthrough)?;
            g.connect("A", "OUT", "B", "IN")
        })
        .unwrap();
        assert_eq!(graph.component_count(), 2);
        assert_eq!(graph.connections().len(), 1);
        assert_eq!(graph.connections()[0].label(), "A.OUT -> B.IN");
    }
}
