// Context - Step execution state machine
//
// One context drives one graph. Progress is made one node at a time by
// `step`, either from the caller (`run`, manual stepping) or from a single
// background thread (`execute`). Control flags are atomics shared with that
// thread; the bookkeeping lives in `ExecState` behind a mutex.
//
// Lock order is always graph, then state.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::{Condvar, Mutex, RwLock};
use tracing::{debug, error, info, warn};

use blueprint_types::{IdType, INVALID_ID, PinValue, StepResult};

use crate::executor::{DevicePolicy, NodeContext, Services, resolve_pin_value};
use crate::graph::Graph;
use crate::monitor::ContextMonitor;
use crate::node::StepFlow;
use crate::pin::FlowPin;

// ─────────────────────────────────────────────────────────────────────────────
// Options & State
// ─────────────────────────────────────────────────────────────────────────────

/// Tunables for a context
#[derive(Debug, Clone)]
pub struct ContextOptions {
    /// How long the paused stepping thread sleeps between checks
    pub step_poll: Duration,
    pub device: DevicePolicy,
}

impl Default for ContextOptions {
    fn default() -> Self {
        Self {
            step_poll: Duration::from_millis(10),
            device: DevicePolicy::default(),
        }
    }
}

/// Context lifecycle events fanned out to every node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Reset,
    Stop,
    Pause,
    Resume,
    StepNext,
    StepCurrent,
}

/// Bookkeeping of the run in progress
#[derive(Debug, Default)]
pub struct ExecState {
    /// Resumption entry pins, innermost last
    pub(crate) callstack: Vec<FlowPin>,
    pub(crate) current_node: IdType,
    pub(crate) prev_node: IdType,
    /// Output flow pin the run continues from
    pub(crate) current_flow_pin: FlowPin,
    pub(crate) prev_flow_pin: FlowPin,
    /// Input flow pin the current node was entered through
    pub(crate) current_entry: FlowPin,
    pub(crate) last_result: StepResult,
    pub(crate) step_count: u64,
    /// Resolved pin values, cleared every step
    pub(crate) values: HashMap<IdType, PinValue>,
    /// Break point node the thread stopped at and may now pass
    pub(crate) break_node: IdType,
}

// ─────────────────────────────────────────────────────────────────────────────
// Shared Core
// ─────────────────────────────────────────────────────────────────────────────

struct Shared {
    graph: Arc<Mutex<Graph>>,
    state: Mutex<ExecState>,

    executing: AtomicBool,
    paused: AtomicBool,
    step_to_next: AtomicBool,
    step_current: AtomicBool,
    thread_running: AtomicBool,
    pause_event: AtomicBool,

    gate: Mutex<()>,
    wake: Condvar,

    monitor: RwLock<Option<Arc<dyn ContextMonitor>>>,
    services: Services,
    step_poll: Duration,
}

impl Shared {
    fn monitor(&self) -> Option<Arc<dyn ContextMonitor>> {
        self.monitor.read().clone()
    }

    fn wake_thread(&self) {
        let _gate = self.gate.lock();
        self.wake.notify_all();
    }

    /// Advance by one node
    ///
    /// Monitor callbacks are delivered with no lock held, so a monitor may
    /// query the context from inside them.
    fn step(&self, restep: bool, threading: bool) -> StepResult {
        if !self.executing.load(Ordering::SeqCst) {
            return self.state.lock().last_result;
        }
        let _span = self.services.span.enter();
        let monitor = self.monitor();
        let mut notices = Vec::new();

        let entered = self.enter_next(restep, &mut notices);
        notify(monitor.as_deref(), notices.drain(..));
        let (node_id, entry) = match entered {
            Ok(target) => target,
            Err(result) => return result,
        };

        let result = self.execute_node(node_id, entry, restep, threading, &mut notices);
        notify(monitor.as_deref(), notices.drain(..));
        result
    }

    /// Resolve the node the next step enters; `Err` carries the result ending the step
    fn enter_next(&self, restep: bool, notices: &mut Vec<Notice>) -> Result<(IdType, FlowPin), StepResult> {
        let graph = self.graph.lock();
        let mut state = self.state.lock();

        let entry = if restep {
            if !state.current_entry.is_valid() {
                warn!("restep requested before any node executed");
                return Err(state.last_result);
            }
            state.current_entry
        } else {
            match graph.pins.link_target(state.current_flow_pin.id()).map(|p| p.id) {
                Some(id) => FlowPin(id),
                None => match state.callstack.pop() {
                    Some(ret) => {
                        debug!(pin_id = ret.id(), depth = state.callstack.len(), "resuming from callstack");
                        ret
                    }
                    None => return Err(self.finish(&mut state, StepResult::Done, None, notices)),
                },
            }
        };

        let owner = graph
            .pins
            .get(entry.id())
            .map(|p| p.node)
            .filter(|id| graph.contains_node(*id));
        let Some(node_id) = owner else {
            let message = format!("flow pin {} does not resolve to a node", entry.id());
            return Err(self.finish(&mut state, StepResult::Error, Some(message), notices));
        };
        notices.push(Notice::PreStep(node_id, entry));
        Ok((node_id, entry))
    }

    /// Execute the entered node and interpret its continuation
    fn execute_node(
        &self,
        node_id: IdType,
        entry: FlowPin,
        restep: bool,
        threading: bool,
        notices: &mut Vec<Notice>,
    ) -> StepResult {
        let mut graph = self.graph.lock();
        let mut state = self.state.lock();
        let Graph { nodes, pins, .. } = &mut *graph;

        let Some(node) = nodes.iter_mut().find(|n| n.id() == node_id) else {
            let message = format!("node {} was removed before it could execute", node_id);
            return self.finish(&mut state, StepResult::Error, Some(message), notices);
        };

        state.values.clear();
        let flow = {
            let mut ctx = NodeContext::new(pins, &mut *state, &self.services, node_id, threading);
            node.execute(&mut ctx, entry, threading)
        };
        state.step_count += 1;

        if restep {
            if let StepFlow::Fail(message) = flow {
                return self.finish(&mut state, StepResult::Error, Some(message), notices);
            }
            debug!(step = state.step_count, node_id, "restep");
            notices.push(Notice::PostStep(node_id, StepResult::Success));
            state.last_result = StepResult::Success;
            return StepResult::Success;
        }

        state.break_node = INVALID_ID;
        state.prev_node = state.current_node;
        state.current_node = node_id;
        state.prev_flow_pin = state.current_flow_pin;
        state.current_entry = entry;

        let (result, message) = match flow {
            StepFlow::Continue(next) => {
                state.current_flow_pin = next;
                let more = pins.link_target(next.id()).is_some() || !state.callstack.is_empty();
                (if more { StepResult::Success } else { StepResult::Done }, None)
            }
            StepFlow::Return => {
                state.current_flow_pin = FlowPin::NONE;
                let more = !state.callstack.is_empty();
                (if more { StepResult::Success } else { StepResult::Done }, None)
            }
            StepFlow::Exit => {
                state.callstack.clear();
                state.current_flow_pin = FlowPin::NONE;
                (StepResult::Done, None)
            }
            StepFlow::Fail(message) => (StepResult::Error, Some(message)),
        };

        debug!(step = state.step_count, node_id, result = ?result, "step");
        notices.push(Notice::PostStep(node_id, result));
        self.finish(&mut state, result, message, notices)
    }

    /// Record the result and leave the executing state when it is terminal
    fn finish(
        &self,
        state: &mut ExecState,
        result: StepResult,
        message: Option<String>,
        notices: &mut Vec<Notice>,
    ) -> StepResult {
        state.last_result = result;
        match result {
            StepResult::Done => {
                self.executing.store(false, Ordering::SeqCst);
                info!(steps = state.step_count, "execution done");
                notices.push(Notice::Done(state.step_count));
            }
            StepResult::Error => {
                self.executing.store(false, Ordering::SeqCst);
                let message = message.unwrap_or_else(|| "execution error".to_string());
                error!(steps = state.step_count, error = %message, "execution failed");
                notices.push(Notice::Error(message));
            }
            StepResult::Success | StepResult::None => {}
        }
        result
    }

    /// Whether the node the run is about to enter has a break point to stop at
    fn take_break_point(&self) -> Option<IdType> {
        let graph = self.graph.lock();
        let mut state = self.state.lock();
        let target = graph.pins.link_target(state.current_flow_pin.id())?;
        let node = graph.node(target.node)?;
        if !node.base().break_point {
            return None;
        }
        if state.break_node == node.id() {
            // Stopped here already; let it run this time
            state.break_node = INVALID_ID;
            return None;
        }
        state.break_node = node.id();
        Some(node.id())
    }

    fn pause(&self) -> bool {
        if !self.executing.load(Ordering::SeqCst) || self.paused.swap(true, Ordering::SeqCst) {
            return false;
        }
        if let Some(m) = self.monitor() {
            m.on_pause();
        }
        self.relay(Lifecycle::Pause);
        true
    }

    /// Fan a lifecycle event out to every node
    fn relay(&self, event: Lifecycle) {
        let mut graph = self.graph.lock();
        let mut state = self.state.lock();
        let Graph { nodes, pins, .. } = &mut *graph;
        for node in nodes.iter_mut() {
            let id = node.id();
            let mut ctx = NodeContext::new(pins, &mut *state, &self.services, id, false);
            match event {
                Lifecycle::Reset => node.reset(&mut ctx),
                Lifecycle::Stop => node.on_stop(&mut ctx),
                Lifecycle::Pause => node.on_pause(&mut ctx),
                Lifecycle::Resume => node.on_resume(&mut ctx),
                Lifecycle::StepNext => node.on_step_next(&mut ctx),
                Lifecycle::StepCurrent => node.on_step_current(&mut ctx),
            }
        }
        debug!(event = ?event, nodes = nodes.len(), "relayed context event");
    }
}

/// Monitor callback recorded under the locks, delivered once they are released
enum Notice {
    PreStep(IdType, FlowPin),
    PostStep(IdType, StepResult),
    Done(u64),
    Error(String),
}

fn notify(monitor: Option<&dyn ContextMonitor>, notices: impl Iterator<Item = Notice>) {
    let Some(m) = monitor else {
        return;
    };
    for notice in notices {
        match notice {
            Notice::PreStep(node, entry) => m.on_pre_step(node, entry),
            Notice::PostStep(node, result) => m.on_post_step(node, result),
            Notice::Done(steps) => m.on_done(steps),
            Notice::Error(message) => m.on_error(&message),
        }
    }
}

/// Body of the background stepping thread
fn thread_main(shared: Arc<Shared>) {
    debug!("stepping thread started");
    while shared.thread_running.load(Ordering::SeqCst) {
        let restep = shared.step_current.swap(false, Ordering::SeqCst);
        let next = shared.step_to_next.swap(false, Ordering::SeqCst);

        if shared.paused.load(Ordering::SeqCst) && !restep && !next {
            let mut gate = shared.gate.lock();
            // Re-check under the gate so a wake-up between the check and the wait is not lost
            let idle = shared.thread_running.load(Ordering::SeqCst)
                && shared.paused.load(Ordering::SeqCst)
                && !shared.step_to_next.load(Ordering::SeqCst)
                && !shared.step_current.load(Ordering::SeqCst);
            if idle {
                shared.wake.wait_for(&mut gate, shared.step_poll);
            }
            continue;
        }

        if !restep && !next {
            if let Some(node_id) = shared.take_break_point() {
                info!(node_id, "break point hit");
                shared.pause_event.store(true, Ordering::SeqCst);
                shared.pause();
                continue;
            }
        }

        let result = shared.step(restep, true);
        if result.is_terminal() {
            break;
        }
    }
    shared.thread_running.store(false, Ordering::SeqCst);
    debug!("stepping thread finished");
}

// ─────────────────────────────────────────────────────────────────────────────
// Context
// ─────────────────────────────────────────────────────────────────────────────

/// Execution state machine of one graph
pub struct Context {
    shared: Arc<Shared>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Context {
    pub fn new(graph: Arc<Mutex<Graph>>, options: ContextOptions) -> Self {
        Self {
            shared: Arc::new(Shared {
                graph,
                state: Mutex::new(ExecState::default()),
                executing: AtomicBool::new(false),
                paused: AtomicBool::new(false),
                step_to_next: AtomicBool::new(false),
                step_current: AtomicBool::new(false),
                thread_running: AtomicBool::new(false),
                pause_event: AtomicBool::new(false),
                gate: Mutex::new(()),
                wake: Condvar::new(),
                monitor: RwLock::new(None),
                services: Services::new(options.device),
                step_poll: options.step_poll,
            }),
            thread: Mutex::new(None),
        }
    }

    pub fn set_monitor(&self, monitor: Option<Arc<dyn ContextMonitor>>) {
        *self.shared.monitor.write() = monitor;
    }

    pub fn monitor(&self) -> Option<Arc<dyn ContextMonitor>> {
        self.shared.monitor()
    }

    pub fn services(&self) -> &Services {
        &self.shared.services
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Driving
    // ─────────────────────────────────────────────────────────────────────────

    /// Arm execution at the output flow pin `entry` without stepping
    pub fn start(&self, entry: FlowPin) -> StepResult {
        let shared = &self.shared;
        if !entry.is_valid() {
            let message = "cannot start from an invalid flow pin";
            error!(message);
            if let Some(m) = shared.monitor() {
                m.on_error(message);
            }
            return self.set_step_result(StepResult::Error);
        }
        {
            let mut state = shared.state.lock();
            state.current_flow_pin = entry;
            state.current_entry = FlowPin::NONE;
            state.break_node = INVALID_ID;
            state.last_result = StepResult::Success;
        }
        shared.paused.store(false, Ordering::SeqCst);
        shared.pause_event.store(false, Ordering::SeqCst);
        shared.step_to_next.store(false, Ordering::SeqCst);
        shared.step_current.store(false, Ordering::SeqCst);
        shared.executing.store(true, Ordering::SeqCst);

        info!(entry = entry.id(), "execution started");
        if let Some(m) = shared.monitor() {
            m.on_start(entry);
        }
        StepResult::Success
    }

    /// Execute the next node
    pub fn step(&self) -> StepResult {
        self.shared.step(false, false)
    }

    /// Execute the current node again without advancing
    pub fn restep(&self) -> StepResult {
        self.shared.step(true, false)
    }

    /// Run from `entry` until the flow is done or fails, blocking the caller
    pub fn run(&self, entry: FlowPin) -> StepResult {
        if self.is_thread_running() {
            warn!("run requested while the stepping thread is active");
            return self.last_result();
        }
        let mut result = self.start(entry);
        while !result.is_terminal() && self.is_executing() {
            result = self.step();
        }
        result
    }

    /// Start execution on the background stepping thread and return immediately
    pub fn execute(&self, entry: FlowPin) -> StepResult {
        if self.is_thread_running() {
            warn!("stepping thread already running");
            return self.last_result();
        }
        // Reap a thread that finished on its own
        self.join_thread();

        let result = self.start(entry);
        if result == StepResult::Error {
            return result;
        }

        self.shared.thread_running.store(true, Ordering::SeqCst);
        let shared = Arc::clone(&self.shared);
        let span = self.shared.services.span.clone();
        let spawned = thread::Builder::new()
            .name("blueprint-step".into())
            .spawn(move || span.in_scope(|| thread_main(shared)));
        match spawned {
            Ok(handle) => {
                *self.thread.lock() = Some(handle);
                result
            }
            Err(e) => {
                error!(error = %e, "failed to spawn stepping thread");
                self.shared.thread_running.store(false, Ordering::SeqCst);
                self.shared.executing.store(false, Ordering::SeqCst);
                self.set_step_result(StepResult::Error)
            }
        }
    }

    /// Pause a running execution
    pub fn pause(&self) -> bool {
        let paused = self.shared.pause();
        if paused {
            info!("execution paused");
        }
        paused
    }

    /// Resume a paused execution
    pub fn resume(&self) -> bool {
        let shared = &self.shared;
        if !shared.paused.swap(false, Ordering::SeqCst) {
            return false;
        }
        shared.pause_event.store(false, Ordering::SeqCst);
        if let Some(m) = shared.monitor() {
            m.on_resume();
        }
        shared.relay(Lifecycle::Resume);
        shared.wake_thread();
        info!("execution resumed");
        true
    }

    /// Let the paused stepping thread perform exactly one step
    pub fn thread_step(&self) -> bool {
        let shared = &self.shared;
        if !shared.thread_running.load(Ordering::SeqCst) {
            return false;
        }
        shared.step_to_next.store(true, Ordering::SeqCst);
        if let Some(m) = shared.monitor() {
            m.on_step_next();
        }
        shared.relay(Lifecycle::StepNext);
        shared.wake_thread();
        true
    }

    /// Let the paused stepping thread execute the current node again
    pub fn thread_restep(&self) -> bool {
        let shared = &self.shared;
        if !shared.thread_running.load(Ordering::SeqCst) {
            return false;
        }
        shared.step_current.store(true, Ordering::SeqCst);
        if let Some(m) = shared.monitor() {
            m.on_step_current();
        }
        shared.relay(Lifecycle::StepCurrent);
        shared.wake_thread();
        true
    }

    /// Stop execution; the stepping thread is joined before this returns
    pub fn stop(&self) {
        let shared = &self.shared;
        let was_executing = shared.executing.swap(false, Ordering::SeqCst);
        shared.thread_running.store(false, Ordering::SeqCst);
        shared.wake_thread();
        self.join_thread();

        shared.paused.store(false, Ordering::SeqCst);
        shared.step_to_next.store(false, Ordering::SeqCst);
        shared.step_current.store(false, Ordering::SeqCst);
        shared.pause_event.store(false, Ordering::SeqCst);
        let steps = {
            let mut state = shared.state.lock();
            state.callstack.clear();
            state.step_count
        };

        shared.relay(Lifecycle::Stop);
        if was_executing {
            info!(steps, "execution stopped");
            if let Some(m) = shared.monitor() {
                m.on_done(steps);
            }
        }
    }

    fn join_thread(&self) {
        let Some(handle) = self.thread.lock().take() else {
            return;
        };
        if handle.thread().id() == thread::current().id() {
            warn!("stop called from the stepping thread; not joining");
            return;
        }
        if handle.join().is_err() {
            error!("stepping thread panicked");
        }
    }

    /// Fan a lifecycle event out to every node of the graph
    pub fn relay(&self, event: Lifecycle) {
        self.shared.relay(event);
    }

    // ─────────────────────────────────────────────────────────────────────────
    // State
    // ─────────────────────────────────────────────────────────────────────────

    pub fn push_return_point(&self, pin: FlowPin) {
        self.shared.state.lock().callstack.push(pin);
    }

    /// Resolved value of a pin as a node would see it
    pub fn pin_value(&self, pin: IdType) -> PinValue {
        let graph = self.shared.graph.lock();
        resolve_pin_value(&graph.pins, &mut HashMap::new(), pin)
    }

    pub fn set_step_result(&self, result: StepResult) -> StepResult {
        self.shared.state.lock().last_result = result;
        result
    }

    /// Clear the callstack, positions, step count and result
    pub fn reset_state(&self) {
        *self.shared.state.lock() = ExecState::default();
    }

    pub fn step_count(&self) -> u64 {
        self.shared.state.lock().step_count
    }

    pub fn last_result(&self) -> StepResult {
        self.shared.state.lock().last_result
    }

    pub fn current_node(&self) -> IdType {
        self.shared.state.lock().current_node
    }

    pub fn prev_node(&self) -> IdType {
        self.shared.state.lock().prev_node
    }

    pub fn current_flow_pin(&self) -> FlowPin {
        self.shared.state.lock().current_flow_pin
    }

    pub fn prev_flow_pin(&self) -> FlowPin {
        self.shared.state.lock().prev_flow_pin
    }

    pub fn callstack_depth(&self) -> usize {
        self.shared.state.lock().callstack.len()
    }

    pub fn is_executing(&self) -> bool {
        self.shared.executing.load(Ordering::SeqCst)
    }

    pub fn is_paused(&self) -> bool {
        self.shared.paused.load(Ordering::SeqCst)
    }

    pub fn is_thread_running(&self) -> bool {
        self.shared.thread_running.load(Ordering::SeqCst)
    }

    /// Whether a break point paused the thread since the last call
    pub fn take_pause_event(&self) -> bool {
        self.shared.pause_event.swap(false, Ordering::SeqCst)
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        self.shared.thread_running.store(false, Ordering::SeqCst);
        self.shared.executing.store(false, Ordering::SeqCst);
        self.shared.wake_thread();
        self.join_thread();
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("executing", &self.is_executing())
            .field("paused", &self.is_paused())
            .field("thread_running", &self.is_thread_running())
            .field("step_count", &self.step_count())
            .field("last_result", &self.last_result())
            .finish()
    }
}
