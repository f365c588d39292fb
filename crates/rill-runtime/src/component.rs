//! Components: the black-box processing units of a graph.
//!
//! A component implements [`Component`]: `initialize` declares its ports
//! once, at graph-build time, and `run` is dispatched exactly once by the
//! executor. A `keepalive` component loops on receives inside `run` and
//! exits when it has seen end-of-stream on its inputs (or calls
//! `terminate`); a one-shot component just does its work and returns. In
//! both cases the executor closes the component's connections when `run`
//! returns.

use crate::context::ComponentContext;
use crate::error::FlowResult;
use crate::port::PortRegistry;
use async_trait::async_trait;
use rill_kernel::DEFAULT_CHANNEL;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::trace;

/// Behavior supplied by the component author.
#[async_trait]
pub trait Component: Send {
    /// Declare the component's input and output ports.
    ///
    /// Called exactly once, when the component is added to a graph, and
    /// always before `run`.
    fn initialize(&mut self, ports: &mut PortRegistry);

    /// The component body.
    ///
    /// Blocking port operations on `ctx` are the suspension points; the
    /// component must not block the thread any other way.
    async fn run(&mut self, ctx: &mut ComponentContext) -> FlowResult<()>;
}

/// Declarative registration record for a component.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentSpec {
    /// Name, unique within the graph.
    pub name: String,
    /// The single channel whose control packets this component consumes.
    pub channel: String,
    /// `true` for long-running components that loop on receives; `false`
    /// (the default) for one-shot bodies. Purely declarative: both modes are
    /// dispatched once and terminated on return.
    pub keepalive: bool,
}

impl ComponentSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            channel: DEFAULT_CHANNEL.to_string(),
            keepalive: false,
        }
    }

    /// Subscribe to a channel other than `"default"`.
    pub fn on_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = channel.into();
        self
    }

    /// Mark the component as long-running.
    pub fn keepalive(mut self) -> Self {
        self.keepalive = true;
        self
    }
}

/// Lifecycle state of a component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ComponentState {
    /// Constructed, ports not yet declared.
    NotInitialized,
    /// Ports declared; waiting for the first dispatch.
    Initialized,
    /// Running between suspension points.
    Active,
    /// Suspended in a send on a full connection.
    SuspSend,
    /// Suspended in a receive on an empty connection.
    SuspRecv,
    /// Finished normally (final).
    Terminated,
    /// Finished with an error (final).
    Error,
}

impl ComponentState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Terminated | Self::Error)
    }

    pub fn is_suspended(self) -> bool {
        matches!(self, Self::SuspSend | Self::SuspRecv)
    }

    /// The valid lifecycle transitions.
    pub fn can_move_to(self, next: ComponentState) -> bool {
        use ComponentState::*;
        if next == Error {
            // Any live component can fail.
            return !self.is_terminal();
        }
        matches!(
            (self, next),
            (NotInitialized, Initialized)
                | (Initialized, Active)
                | (Active, SuspSend)
                | (Active, SuspRecv)
                | (SuspSend, Active)
                | (SuspRecv, Active)
                | (Active, Terminated)
                | (SuspSend, Terminated)
                | (SuspRecv, Terminated)
        )
    }
}

/// What a suspended component is waiting for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitKind {
    Send,
    Recv,
}

/// Where a suspended component is parked.
#[derive(Debug, Clone)]
pub(crate) struct WaitPoint {
    pub connection: String,
    pub kind: WaitKind,
    /// A receive with a deadline cannot deadlock: the timer is its wakeup.
    pub has_deadline: bool,
}

/// Shared lifecycle cell, observed by the executor's monitor.
///
/// Every state change bumps the shared progress counter, which is what the
/// deadlock monitor watches for stalls.
#[derive(Debug)]
pub(crate) struct StateCell {
    name: String,
    state: Mutex<ComponentState>,
    wait: Mutex<Option<WaitPoint>>,
    progress: Arc<AtomicU64>,
}

impl StateCell {
    pub fn new(name: impl Into<String>, progress: Arc<AtomicU64>) -> Self {
        Self {
            name: name.into(),
            // Ports are declared at registration, so cells begin life
            // already initialized.
            state: Mutex::new(ComponentState::Initialized),
            wait: Mutex::new(None),
            progress,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> ComponentState {
        *self.state.lock().unwrap()
    }

    pub fn set(&self, next: ComponentState) {
        let mut current = self.state.lock().unwrap();
        if *current == next {
            return;
        }
        debug_assert!(
            current.can_move_to(next),
            "invalid state transition for '{}': {:?} -> {:?}",
            self.name,
            *current,
            next
        );
        trace!(component = %self.name, from = ?*current, to = ?next, "state transition");
        *current = next;
        drop(current);
        self.bump();
    }

    pub fn begin_wait(&self, point: WaitPoint) {
        *self.wait.lock().unwrap() = Some(point);
    }

    pub fn end_wait(&self) {
        *self.wait.lock().unwrap() = None;
    }

    pub fn wait_point(&self) -> Option<WaitPoint> {
        self.wait.lock().unwrap().clone()
    }

    pub fn bump(&self) {
        self.progress.fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::ComponentState::*;
    use super::*;

    #[test]
    fn lifecycle_transitions() {
        assert!(NotInitialized.can_move_to(Initialized));
        assert!(Initialized.can_move_to(Active));
        assert!(Active.can_move_to(SuspSend));
        assert!(Active.can_move_to(SuspRecv));
        assert!(SuspSend.can_move_to(Active));
        assert!(SuspRecv.can_move_to(Active));
        assert!(Active.can_move_to(Terminated));
        assert!(SuspRecv.can_move_to(Terminated));

        assert!(!NotInitialized.can_move_to(Active));
        assert!(!SuspSend.can_move_to(SuspRecv));
        assert!(!Terminated.can_move_to(Active));
    }

    #[test]
    fn any_live_state_can_fail() {
        for state in [NotInitialized, Initialized, Active, SuspSend, SuspRecv] {
            assert!(state.can_move_to(Error), "{state:?} -> Error");
        }
        assert!(!Terminated.can_move_to(Error));
        assert!(!Error.can_move_to(Terminated));
    }

    #[test]
    fn spec_builder_defaults() {
        let spec = ComponentSpec::new("GEN");
        assert_eq!(spec.channel, rill_kernel::DEFAULT_CHANNEL);
        assert!(!spec.keepalive);

        let spec = ComponentSpec::new("SINK").on_channel("alphanum").keepalive();
        assert_eq!(spec.channel, "alphanum");
        assert!(spec.keepalive);
    }
}
