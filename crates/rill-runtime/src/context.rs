//! The runtime surface a component sees while running.
//!
//! [`ComponentContext`] routes every port operation through the scheduler's
//! bookkeeping: state transitions around each blocking call, the bracket
//! stack for the subscribed channel, and the channel filtering rule for
//! everything dequeued from an input:
//!
//! 1. data packets are delivered;
//! 2. control packets on the subscribed channel update the bracket stack
//!    and are delivered;
//! 3. control packets on any other channel are never delivered — they are
//!    passed through unchanged on the input's paired output (or the sole
//!    output, if exactly one exists), preserving their order.

use crate::component::{ComponentState, StateCell, WaitKind, WaitPoint};
use crate::error::{FlowError, FlowResult};
use crate::port::{InputBinding, OutputBinding, Received};
use rill_kernel::{BracketStack, ControlKind, Packet};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub struct ComponentContext {
    name: String,
    channel: String,
    inputs: Vec<InputBinding>,
    outputs: Vec<OutputBinding>,
    brackets: BracketStack,
    cell: Arc<StateCell>,
    terminated: bool,
    finished: bool,
}

impl ComponentContext {
    pub(crate) fn new(
        name: String,
        channel: String,
        inputs: Vec<InputBinding>,
        outputs: Vec<OutputBinding>,
        cell: Arc<StateCell>,
    ) -> Self {
        Self {
            name,
            channel,
            inputs,
            outputs,
            brackets: BracketStack::new(),
            cell,
            terminated: false,
            finished: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The channel this component subscribes to.
    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn input_names(&self) -> impl Iterator<Item = &str> {
        self.inputs.iter().map(|b| b.name.as_str())
    }

    pub fn output_names(&self) -> impl Iterator<Item = &str> {
        self.outputs.iter().map(|b| b.name.as_str())
    }

    /// Depth of the currently open brackets on the subscribed channel.
    pub fn bracket_depth(&self) -> usize {
        self.brackets.depth()
    }

    /// The active namespace of the innermost open map on the subscribed
    /// channel.
    pub fn active_namespace(&self) -> Option<&str> {
        self.brackets.active_namespace()
    }

    /// Mark the component finished. Subsequent receives yield end-of-stream;
    /// `run` is expected to return promptly.
    pub fn terminate(&mut self) {
        if !self.terminated {
            debug!(component = %self.name, "terminate requested");
            self.terminated = true;
        }
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    /// Yield control back to the scheduler without waiting on a port.
    pub async fn suspend(&mut self) {
        self.cell.bump();
        tokio::task::yield_now().await;
    }

    // -----------------------------------------------------------------
    // Receiving
    // -----------------------------------------------------------------

    /// The next data payload on `port`.
    ///
    /// Control packets on the subscribed channel are applied to the bracket
    /// stack and skipped; use [`receive_packet`](Self::receive_packet) to
    /// observe them.
    pub async fn receive(&mut self, port: &str) -> FlowResult<Received<Value>> {
        self.receive_value(port, None).await
    }

    /// Like [`receive`](Self::receive), but each dequeue waits at most
    /// `deadline`.
    pub async fn receive_timeout(
        &mut self,
        port: &str,
        deadline: Duration,
    ) -> FlowResult<Received<Value>> {
        self.receive_value(port, Some(deadline)).await
    }

    /// The next packet of interest on `port`: data, or a control packet on
    /// the subscribed channel.
    pub async fn receive_packet(&mut self, port: &str) -> FlowResult<Received<Packet>> {
        self.receive_filtered(port, None).await
    }

    /// Like [`receive_packet`](Self::receive_packet) with a deadline per
    /// dequeue.
    pub async fn receive_packet_timeout(
        &mut self,
        port: &str,
        deadline: Duration,
    ) -> FlowResult<Received<Packet>> {
        self.receive_filtered(port, Some(deadline)).await
    }

    async fn receive_value(
        &mut self,
        port: &str,
        deadline: Option<Duration>,
    ) -> FlowResult<Received<Value>> {
        loop {
            match self.receive_filtered(port, deadline).await? {
                Received::Item(packet) => {
                    if let Packet::Data { payload, .. } = packet {
                        return Ok(Received::Item(payload));
                    }
                    // Subscribed-channel control: already applied to the
                    // bracket stack; keep looking for data.
                }
                Received::EndOfStream => return Ok(Received::EndOfStream),
                Received::TimedOut => return Ok(Received::TimedOut),
            }
        }
    }

    async fn receive_filtered(
        &mut self,
        port: &str,
        deadline: Option<Duration>,
    ) -> FlowResult<Received<Packet>> {
        let index = self.input_index(port)?;
        loop {
            if self.terminated {
                return Ok(Received::EndOfStream);
            }

            self.cell.begin_wait(WaitPoint {
                connection: self.inputs[index].label.clone(),
                kind: WaitKind::Recv,
                has_deadline: deadline.is_some(),
            });
            self.cell.set(ComponentState::SuspRecv);
            let polled = self.inputs[index].next(deadline).await;
            self.cell.set(ComponentState::Active);
            self.cell.end_wait();

            match polled {
                Received::Item(packet) => {
                    if packet.is_data() {
                        return Ok(Received::Item(packet));
                    }
                    if packet.channel() == self.channel {
                        if let Packet::Control { kind, .. } = &packet {
                            self.brackets.apply(kind).map_err(|source| {
                                FlowError::Protocol {
                                    component: self.name.clone(),
                                    source,
                                }
                            })?;
                        }
                        return Ok(Received::Item(packet));
                    }
                    // Foreign-channel control: pass through, never deliver.
                    self.forward_foreign(index, packet).await?;
                }
                Received::EndOfStream => {
                    if self.inputs.iter().all(|b| b.exhausted) {
                        self.brackets.finish().map_err(|source| FlowError::Protocol {
                            component: self.name.clone(),
                            source,
                        })?;
                    }
                    return Ok(Received::EndOfStream);
                }
                Received::TimedOut => return Ok(Received::TimedOut),
            }
        }
    }

    async fn forward_foreign(&mut self, input: usize, packet: Packet) -> FlowResult<()> {
        let target = match &self.inputs[input].pair {
            Some(pair) => Some(pair.clone()),
            None if self.outputs.len() == 1 => Some(self.outputs[0].name.clone()),
            None => None,
        };
        match target {
            Some(port) => {
                debug!(
                    component = %self.name,
                    channel = %packet.channel(),
                    port = %port,
                    "passing through foreign control packet"
                );
                self.send_packet(&port, packet).await
            }
            None => {
                warn!(
                    component = %self.name,
                    channel = %packet.channel(),
                    "no pass-through port for foreign control packet; dropping"
                );
                Ok(())
            }
        }
    }

    // -----------------------------------------------------------------
    // Sending
    // -----------------------------------------------------------------

    /// Send a data packet on the subscribed channel.
    pub async fn send(&mut self, port: &str, payload: impl Into<Value> + Send) -> FlowResult<()> {
        let channel = self.channel.clone();
        self.send_packet(port, Packet::data_on(payload, channel)).await
    }

    /// Send any packet as-is, preserving its channel tag.
    ///
    /// A send on an unconnected output drops the packet silently, so
    /// components can be wired partially. A send on a closed connection
    /// fails with [`FlowError::ConnectionClosed`].
    pub async fn send_packet(&mut self, port: &str, packet: Packet) -> FlowResult<()> {
        let index = self.output_index(port)?;
        let Some(link) = self.outputs[index].link.clone() else {
            debug!(component = %self.name, port, "output not connected; dropping packet");
            return Ok(());
        };

        self.cell.begin_wait(WaitPoint {
            connection: link.id.clone(),
            kind: WaitKind::Send,
            has_deadline: false,
        });
        self.cell.set(ComponentState::SuspSend);
        let sent = link.queue.send(packet).await;
        self.cell.set(ComponentState::Active);
        self.cell.end_wait();

        sent.map_err(|_| FlowError::ConnectionClosed(link.id))
    }

    // -----------------------------------------------------------------
    // Bracket helpers (subscribed channel)
    // -----------------------------------------------------------------

    /// Emit a substream-open marker on `port`.
    pub async fn open_substream(&mut self, port: &str) -> FlowResult<()> {
        self.open_bracket(port, ControlKind::Open).await
    }

    /// Emit a substream-close marker on `port`.
    pub async fn close_substream(&mut self, port: &str) -> FlowResult<()> {
        self.close_bracket(port, ControlKind::Close).await
    }

    /// Emit a map-open marker on `port`.
    pub async fn open_map(&mut self, port: &str) -> FlowResult<()> {
        self.open_bracket(port, ControlKind::MapOpen).await
    }

    /// Emit a map-close marker on `port`.
    pub async fn close_map(&mut self, port: &str) -> FlowResult<()> {
        self.close_bracket(port, ControlKind::MapClose).await
    }

    /// Emit a namespace switch on `port`.
    pub async fn switch_namespace(&mut self, port: &str, namespace: &str) -> FlowResult<()> {
        let channel = self.channel.clone();
        self.send_packet(
            port,
            Packet::control_on(ControlKind::Switch(namespace.to_string()), channel),
        )
        .await
    }

    async fn open_bracket(&mut self, port: &str, kind: ControlKind) -> FlowResult<()> {
        let index = self.output_index(port)?;
        self.outputs[index].open_brackets += 1;
        let channel = self.channel.clone();
        self.send_packet(port, Packet::control_on(kind, channel)).await
    }

    async fn close_bracket(&mut self, port: &str, kind: ControlKind) -> FlowResult<()> {
        let index = self.output_index(port)?;
        if self.outputs[index].open_brackets == 0 {
            let source = match kind {
                ControlKind::MapClose => rill_kernel::ProtocolError::UnbalancedMapClose,
                _ => rill_kernel::ProtocolError::UnbalancedClose,
            };
            return Err(FlowError::Protocol {
                component: self.name.clone(),
                source,
            });
        }
        self.outputs[index].open_brackets -= 1;
        let channel = self.channel.clone();
        self.send_packet(port, Packet::control_on(kind, channel)).await
    }

    // -----------------------------------------------------------------
    // Internal
    // -----------------------------------------------------------------

    pub(crate) fn cell(&self) -> &Arc<StateCell> {
        &self.cell
    }

    /// Close every connection this component touches and record the final
    /// state. Idempotent; also invoked from `Drop` so that a panicking
    /// component still propagates closure.
    pub(crate) fn finish(&mut self, state: ComponentState) {
        self.close_links();
        self.cell.set(state);
    }

    fn close_links(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        for binding in &self.inputs {
            if let Some(link) = &binding.link {
                link.queue.close();
            }
        }
        for binding in &self.outputs {
            if binding.open_brackets != 0 {
                warn!(
                    component = %self.name,
                    port = %binding.name,
                    open = binding.open_brackets,
                    "output closed with open brackets"
                );
            }
            if let Some(link) = &binding.link {
                link.queue.close();
            }
        }
        self.cell.bump();
    }

    fn input_index(&self, port: &str) -> FlowResult<usize> {
        self.inputs
            .iter()
            .position(|b| b.name == port)
            .ok_or_else(|| FlowError::UnknownPort {
                component: self.name.clone(),
                port: port.to_string(),
            })
    }

    fn output_index(&self, port: &str) -> FlowResult<usize> {
        self.outputs
            .iter()
            .position(|b| b.name == port)
            .ok_or_else(|| FlowError::UnknownPort {
                component: self.name.clone(),
                port: port.to_string(),
            })
    }
}

impl Drop for ComponentContext {
    fn drop(&mut self) {
        self.close_links();
        if !self.cell.state().is_terminal() {
            self.cell.set(ComponentState::Error);
        }
    }
}
