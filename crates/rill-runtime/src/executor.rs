//! Cooperative executor: drives a graph of components to quiescence.
//!
//! Every component runs as its own task; the only suspension points are the
//! blocking port operations (plus explicit `suspend`), so execution is
//! cooperative. Wakeups come from the connection queues themselves: a
//! receive frees a slot for a suspended sender, a send wakes a suspended
//! receiver, a close wakes both sides. When a component finishes — normally,
//! with an error, or by panicking — all of its connections close, which is
//! how end-of-stream propagates downstream and how upstream producers learn
//! to stop.
//!
//! A monitor task watches a global progress counter (bumped by every
//! lifecycle transition). If all live components sit suspended
//! with no timeout pending and the counter stalls across consecutive ticks,
//! the monitor declares deadlock and the executor aborts, naming the stuck
//! components and the connections they were blocked on.

use crate::component::{Component, ComponentSpec, ComponentState, StateCell};
use crate::connection::{Link, PortRef};
use crate::context::ComponentContext;
use crate::error::{DeadlockInfo, DeadlockWaiter, FlowError, FlowResult};
use crate::graph::Graph;
use crate::port::{InputBinding, OutputBinding};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Tuning knobs for the executor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// How often the deadlock monitor samples progress.
    pub monitor_interval: Duration,
    /// How long a hard shutdown waits before abandoning components.
    pub grace_period: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            monitor_interval: Duration::from_millis(20),
            grace_period: Duration::from_secs(5),
        }
    }
}

/// Shared control surface between the executor, its monitor, and handles.
struct Control {
    progress: Arc<AtomicU64>,
    cells: Mutex<Vec<Arc<StateCell>>>,
    links: Mutex<Vec<Link>>,
    /// 0 = running, 1 = soft shutdown requested, >= 2 = hard shutdown.
    cancel: AtomicU8,
    escalate: Notify,
    deadlock: Mutex<Option<DeadlockInfo>>,
    deadlocked: Notify,
}

impl Control {
    fn new() -> Self {
        Self {
            progress: Arc::new(AtomicU64::new(0)),
            cells: Mutex::new(Vec::new()),
            links: Mutex::new(Vec::new()),
            cancel: AtomicU8::new(0),
            escalate: Notify::new(),
            deadlock: Mutex::new(None),
            deadlocked: Notify::new(),
        }
    }

    fn close_all_links(&self) {
        for link in self.links.lock().unwrap().iter() {
            link.queue.close();
        }
    }
}

/// Clonable handle for requesting shutdown from outside `execute`.
#[derive(Clone)]
pub struct ExecutorHandle {
    control: Arc<Control>,
}

impl ExecutorHandle {
    /// Request shutdown.
    ///
    /// The first call closes every connection: components observe
    /// end-of-stream or a closed-connection send failure at their next port
    /// operation and are expected to finish. A second call escalates — after
    /// the configured grace period, components still running are aborted and
    /// marked failed.
    pub fn shutdown(&self) {
        let level = self.control.cancel.fetch_add(1, Ordering::AcqRel) + 1;
        match level {
            1 => {
                info!("shutdown requested; closing all connections");
                self.control.close_all_links();
            }
            2 => {
                warn!("second shutdown request; escalating to hard termination");
                self.control.escalate.notify_one();
            }
            _ => {}
        }
    }
}

/// Executes one graph to completion.
pub struct Executor {
    graph: Option<Graph>,
    config: ExecutorConfig,
    control: Arc<Control>,
}

impl Executor {
    pub fn new(graph: Graph) -> Self {
        Self::with_config(graph, ExecutorConfig::default())
    }

    pub fn with_config(graph: Graph, config: ExecutorConfig) -> Self {
        Self {
            graph: Some(graph),
            config,
            control: Arc::new(Control::new()),
        }
    }

    /// A handle for requesting shutdown while `execute` runs.
    pub fn handle(&self) -> ExecutorHandle {
        ExecutorHandle {
            control: self.control.clone(),
        }
    }

    /// Run the graph until every component has finished.
    ///
    /// Returns `Ok(())` when all components terminated normally; otherwise
    /// the first component error, or a deadlock report when no component
    /// could ever run again.
    pub async fn execute(&mut self) -> FlowResult<()> {
        let graph = self.graph.take().ok_or(FlowError::AlreadyExecuted)?;
        graph.validate()?;
        let (graph_name, entries, connections, initial_packets) = graph.into_parts();
        info!(
            graph = %graph_name,
            components = entries.len(),
            connections = connections.len(),
            "starting graph execution"
        );

        // Realize connections.
        let mut by_source: HashMap<PortRef, Link> = HashMap::new();
        let mut by_target: HashMap<PortRef, Link> = HashMap::new();
        {
            let mut links = self.control.links.lock().unwrap();
            for connection in &connections {
                let link = Link::new(connection);
                by_source.insert(connection.source.clone(), link.clone());
                by_target.insert(connection.target.clone(), link.clone());
                links.push(link);
            }
        }
        // A shutdown requested before the links existed still applies.
        if self.control.cancel.load(Ordering::Acquire) > 0 {
            self.control.close_all_links();
        }

        // Group initial packets per input port, preserving order.
        let mut iips: HashMap<(String, String), VecDeque<Value>> = HashMap::new();
        for packet in initial_packets {
            iips.entry((packet.component, packet.port))
                .or_default()
                .push_back(packet.value);
        }

        // Spawn one task per component.
        let mut tasks: JoinSet<(String, FlowResult<()>)> = JoinSet::new();
        let mut task_names: HashMap<tokio::task::Id, String> = HashMap::new();
        for entry in entries {
            let name = entry.spec.name.clone();
            let cell = Arc::new(StateCell::new(&name, self.control.progress.clone()));
            self.control.cells.lock().unwrap().push(cell.clone());

            let inputs = entry
                .ports
                .inputs
                .iter()
                .map(|spec| {
                    let link = by_target.remove(&PortRef::new(&name, &spec.name));
                    let label = link
                        .as_ref()
                        .map(|l| l.id.clone())
                        .unwrap_or_else(|| format!("{}.{}", name, spec.name));
                    InputBinding {
                        name: spec.name.clone(),
                        pair: spec.pair.clone(),
                        label,
                        iips: iips.remove(&(name.clone(), spec.name.clone())).unwrap_or_default(),
                        link,
                        exhausted: false,
                    }
                })
                .collect();
            let outputs = entry
                .ports
                .outputs
                .iter()
                .map(|spec| OutputBinding {
                    name: spec.name.clone(),
                    link: by_source.remove(&PortRef::new(&name, &spec.name)),
                    open_brackets: 0,
                })
                .collect();

            let ctx = ComponentContext::new(
                name.clone(),
                entry.spec.channel.clone(),
                inputs,
                outputs,
                cell,
            );
            let handle = tasks.spawn(drive(entry.spec, entry.component, ctx));
            task_names.insert(handle.id(), name);
        }

        let monitor = tokio::spawn(monitor_loop(
            self.control.clone(),
            self.config.monitor_interval,
        ));

        let mut first_error: Option<FlowError> = None;
        loop {
            tokio::select! {
                joined = tasks.join_next() => match joined {
                    None => break,
                    Some(Ok((name, Ok(())))) => {
                        debug!(component = %name, "component finished");
                    }
                    Some(Ok((name, Err(error)))) => {
                        warn!(component = %name, %error, "component failed");
                        first_error.get_or_insert(error);
                    }
                    Some(Err(join_error)) => {
                        if join_error.is_panic() {
                            let name = task_names
                                .get(&join_error.id())
                                .cloned()
                                .unwrap_or_else(|| "<unknown>".to_string());
                            error!(component = %name, "component panicked");
                            first_error.get_or_insert(FlowError::ComponentFailed {
                                component: name,
                                message: join_error.to_string(),
                            });
                        }
                    }
                },
                _ = self.control.deadlocked.notified() => {
                    let report = self.control.deadlock.lock().unwrap().take().unwrap_or_default();
                    error!(stuck = %report, "deadlock detected; aborting remaining components");
                    tasks.abort_all();
                    while tasks.join_next().await.is_some() {}
                    return Err(first_error.unwrap_or(FlowError::Deadlock(report)));
                },
                _ = self.control.escalate.notified() => {
                    tokio::time::sleep(self.config.grace_period).await;
                    let lingering: Vec<String> = self
                        .control
                        .cells
                        .lock()
                        .unwrap()
                        .iter()
                        .filter(|cell| !cell.state().is_terminal())
                        .map(|cell| cell.name().to_string())
                        .collect();
                    tasks.abort_all();
                    while tasks.join_next().await.is_some() {}
                    if !lingering.is_empty() {
                        warn!(components = ?lingering, "abandoned after grace period");
                        first_error.get_or_insert(FlowError::ShutdownTimedOut {
                            components: lingering,
                        });
                    }
                    break;
                }
            }
        }

        monitor.abort();
        info!(graph = %graph_name, success = first_error.is_none(), "graph execution finished");
        match first_error {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

/// Run one component to completion and record the outcome.
async fn drive(
    spec: ComponentSpec,
    mut component: Box<dyn Component>,
    mut ctx: ComponentContext,
) -> (String, FlowResult<()>) {
    let name = spec.name;
    ctx.cell().set(ComponentState::Active);
    debug!(component = %name, keepalive = spec.keepalive, "dispatched");

    match component.run(&mut ctx).await {
        Ok(()) => {
            ctx.finish(ComponentState::Terminated);
            (name, Ok(()))
        }
        // A closed downstream is a stop signal, not a failure.
        Err(FlowError::ConnectionClosed(connection)) => {
            debug!(component = %name, %connection, "downstream closed; terminating");
            ctx.finish(ComponentState::Terminated);
            (name, Ok(()))
        }
        Err(error) => {
            ctx.finish(ComponentState::Error);
            (name, Err(error))
        }
    }
}

/// Watch for the no-runnable-component condition.
async fn monitor_loop(control: Arc<Control>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    let mut last_progress = u64::MAX;
    let mut stable_ticks = 0u32;

    loop {
        ticker.tick().await;

        let progress = control.progress.load(Ordering::Relaxed);
        if progress != last_progress {
            last_progress = progress;
            stable_ticks = 0;
            continue;
        }

        let cells: Vec<Arc<StateCell>> = control.cells.lock().unwrap().clone();
        let mut waiters = Vec::new();
        let mut blocked = true;
        let mut live = false;
        for cell in &cells {
            let state = cell.state();
            if state.is_terminal() {
                continue;
            }
            live = true;
            if !state.is_suspended() {
                blocked = false;
                break;
            }
            match cell.wait_point() {
                // A pending deadline is a wakeup of its own.
                Some(point) if !point.has_deadline => waiters.push(DeadlockWaiter {
                    component: cell.name().to_string(),
                    connection: point.connection,
                    kind: point.kind,
                }),
                _ => {
                    blocked = false;
                    break;
                }
            }
        }

        if live && blocked && !waiters.is_empty() {
            stable_ticks += 1;
            if stable_ticks >= 2 {
                *control.deadlock.lock().unwrap() = Some(DeadlockInfo { waiters });
                control.deadlocked.notify_one();
                return;
            }
        } else {
            stable_ticks = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::ExecutorConfig;
    use std::time::Duration;

    #[test]
    fn config_defaults() {
        let config = ExecutorConfig::default();
        assert_eq!(config.monitor_interval, Duration::from_millis(20));
        assert_eq!(config.grace_period, Duration::from_secs(5));
    }
}
