//! One render from start to close.
//!
//! A [`Request`] owns every segment, boundary and task of a render. All entry
//! points (starting work, attaching a destination, pulling after backpressure,
//! aborting and the pings fired by settling deferreds) are queued and drained
//! by a single loop, so calling back into the request from a lifecycle
//! callback or settling a deferred while a component renders is safe.

use alloc::collections::{BTreeMap, BTreeSet, VecDeque};
use alloc::rc::{Rc, Weak};
use core::cell::{Cell, RefCell};
use core::fmt::{self, Debug};

use cascade_core::{ContextSnapshot, ContextTable, Node, TreeContext};
use tracing::debug;

use crate::boundary::{BoundaryArena, BoundaryKey, BoundaryStats};
use crate::destination::Destination;
use crate::error::RenderError;
use crate::format::FormatContext;
use crate::instructions::ResponseState;
use crate::markup::{HtmlMarkup, Markup};
use crate::options::RenderOptions;
use crate::segment::{SegmentArena, SegmentKey, SegmentStatus};
use crate::task::{AbortSet, Task, TaskKey};

/// Reason used when [`Request::abort`] is called without one.
pub const DEFAULT_ABORT_REASON: &str = "The render was aborted by the server without a reason.";

/// Lifecycle of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestStatus {
    /// Rendering or streaming.
    Open,
    /// Failed before a destination was attached; the next
    /// [`Request::start_flowing`] closes it with the error.
    Closing,
    /// The destination was closed.
    Closed,
}

/// Counters describing a request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequestStats {
    /// Tasks not yet finished, root tasks included.
    pub pending_tasks: usize,
    /// Tasks the shell still waits on.
    pub pending_root_tasks: usize,
    /// Every task ever created.
    pub tasks_created: usize,
    /// How many times a component render function was invoked.
    pub component_renders: usize,
    /// Segments ever created.
    pub segments: usize,
    /// Segments that ended up aborted.
    pub aborted_segments: usize,
    /// Boundaries ever created.
    pub boundaries: usize,
}

pub(crate) type ErrorHandler = dyn FnMut(&RenderError) -> Option<String>;
type Notify = Box<dyn FnOnce()>;
type NotifyError = Box<dyn FnOnce(&RenderError)>;

/// Hooks into a request's lifecycle.
///
/// `on_error` runs for every recoverable and fatal error and may return a
/// digest that is sent to the client with a client-rendered boundary. It
/// runs while the request is busy and must not call back into it. The other
/// callbacks run once the request released its state.
#[derive(Default)]
pub struct Callbacks {
    pub(crate) on_error: Option<Box<ErrorHandler>>,
    pub(crate) on_shell_ready: Option<Notify>,
    pub(crate) on_shell_error: Option<NotifyError>,
    pub(crate) on_all_ready: Option<Notify>,
    pub(crate) on_fatal_error: Option<NotifyError>,
}

impl Debug for Callbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callbacks")
            .field("on_error", &self.on_error.is_some())
            .field("on_shell_ready", &self.on_shell_ready.is_some())
            .field("on_shell_error", &self.on_shell_error.is_some())
            .field("on_all_ready", &self.on_all_ready.is_some())
            .field("on_fatal_error", &self.on_fatal_error.is_some())
            .finish()
    }
}

impl Callbacks {
    /// No callbacks; errors are logged.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Called for each error. The returned digest is attached to the
    /// boundary the error was recovered at.
    #[must_use]
    pub fn on_error(mut self, f: impl FnMut(&RenderError) -> Option<String> + 'static) -> Self {
        self.on_error = Some(Box::new(f));
        self
    }

    /// Called once every task the shell depends on finished.
    #[must_use]
    pub fn on_shell_ready(mut self, f: impl FnOnce() + 'static) -> Self {
        self.on_shell_ready = Some(Box::new(f));
        self
    }

    /// Called if the render fails before the shell is ready.
    #[must_use]
    pub fn on_shell_error(mut self, f: impl FnOnce(&RenderError) + 'static) -> Self {
        self.on_shell_error = Some(Box::new(f));
        self
    }

    /// Called once every task finished.
    #[must_use]
    pub fn on_all_ready(mut self, f: impl FnOnce() + 'static) -> Self {
        self.on_all_ready = Some(Box::new(f));
        self
    }

    /// Called when the render fails as a whole.
    #[must_use]
    pub fn on_fatal_error(mut self, f: impl FnOnce(&RenderError) + 'static) -> Self {
        self.on_fatal_error = Some(Box::new(f));
        self
    }
}

fn log_error(error: &RenderError) -> Option<String> {
    tracing::error!(%error, "render error");
    None
}

#[derive(Debug)]
pub(crate) enum Event {
    ShellReady,
    ShellError(RenderError),
    AllReady,
    Fatal(RenderError),
}

enum Command {
    Work,
    Flow(Box<dyn Destination>),
    Pull,
    Abort(Option<String>),
}

/// Everything one render owns. Only ever touched through the drive loop.
pub(crate) struct RequestState {
    pub(crate) handle: Weak<Shared>,
    pub(crate) status: RequestStatus,
    pub(crate) started: bool,
    pub(crate) flowing: bool,
    pub(crate) shell_ready: bool,
    pub(crate) markup: Box<dyn Markup>,
    pub(crate) response: ResponseState,
    pub(crate) progressive_chunk_size: usize,
    pub(crate) segments: SegmentArena,
    pub(crate) boundaries: BoundaryArena,
    pub(crate) tasks: BTreeMap<TaskKey, Task>,
    pub(crate) next_task: u64,
    pub(crate) abortable: BTreeSet<TaskKey>,
    pub(crate) pinged: VecDeque<TaskKey>,
    pub(crate) all_pending: usize,
    pub(crate) pending_root: usize,
    pub(crate) completed_root: Option<SegmentKey>,
    pub(crate) next_segment_id: u32,
    pub(crate) client_rendered: Vec<BoundaryKey>,
    pub(crate) completed: Vec<BoundaryKey>,
    pub(crate) partial: Vec<BoundaryKey>,
    pub(crate) contexts: ContextTable,
    pub(crate) destination: Option<Box<dyn Destination>>,
    pub(crate) fatal: Option<RenderError>,
    pub(crate) on_error: Box<ErrorHandler>,
    pub(crate) events: Vec<Event>,
    pub(crate) tasks_created: usize,
    pub(crate) component_renders: usize,
}

impl RequestState {
    fn apply(&mut self, command: Command, pings: &RefCell<VecDeque<TaskKey>>) {
        match command {
            Command::Work => {
                self.started = true;
                self.perform_work(pings);
            }
            Command::Flow(destination) => self.start_flowing(destination),
            Command::Pull => {
                if self.destination.is_some() && self.status == RequestStatus::Open {
                    self.flowing = true;
                    self.flush_or_fail();
                }
            }
            Command::Abort(reason) => self.abort(reason),
        }
    }

    pub(crate) fn perform_work(&mut self, pings: &RefCell<VecDeque<TaskKey>>) {
        self.pinged.extend(pings.borrow_mut().drain(..));
        if !self.started || self.status == RequestStatus::Closed {
            return;
        }
        while let Some(key) = self.pinged.pop_front() {
            if let Err(error) = self.retry_task(key) {
                self.report_error(&error);
                self.fatal_error(error);
                return;
            }
            self.pinged.extend(pings.borrow_mut().drain(..));
        }
        if self.flowing {
            self.flush_or_fail();
        }
    }

    fn start_flowing(&mut self, mut destination: Box<dyn Destination>) {
        match self.status {
            RequestStatus::Closing => {
                self.status = RequestStatus::Closed;
                if let Some(error) = self.fatal.take() {
                    destination.close_with_error(&error);
                }
            }
            RequestStatus::Closed => {}
            RequestStatus::Open => {
                if self.destination.is_some() {
                    return;
                }
                self.destination = Some(destination);
                self.flowing = true;
                self.flush_or_fail();
            }
        }
    }

    pub(crate) fn flush_or_fail(&mut self) {
        if let Err(error) = self.flush_completed_queues() {
            self.report_error(&error);
            self.fatal_error(error);
        }
    }

    fn abort(&mut self, reason: Option<String>) {
        if self.status == RequestStatus::Closed {
            return;
        }
        let reason = RenderError::Aborted(reason.unwrap_or_else(|| DEFAULT_ABORT_REASON.into()));
        debug!(tasks = self.abortable.len(), %reason, "aborting render");
        let tasks = core::mem::take(&mut self.abortable);
        for key in tasks {
            self.abort_task(key, &reason);
        }
        self.abort_fallback_tasks(&reason);
        if self.flowing {
            self.flush_or_fail();
        }
    }

    pub(crate) fn stats(&self) -> RequestStats {
        RequestStats {
            pending_tasks: self.all_pending,
            pending_root_tasks: self.pending_root,
            tasks_created: self.tasks_created,
            component_renders: self.component_renders,
            segments: self.segments.len(),
            aborted_segments: self.segments.count(SegmentStatus::Aborted),
            boundaries: self.boundaries.len(),
        }
    }
}

#[derive(Default)]
struct Lifecycle {
    on_shell_ready: Option<Notify>,
    on_shell_error: Option<NotifyError>,
    on_all_ready: Option<Notify>,
    on_fatal_error: Option<NotifyError>,
}

pub(crate) struct Shared {
    state: RefCell<RequestState>,
    pings: RefCell<VecDeque<TaskKey>>,
    commands: RefCell<VecDeque<Command>>,
    busy: Cell<bool>,
    lifecycle: RefCell<Lifecycle>,
}

impl Shared {
    /// Marks a suspended task as ready to retry.
    pub(crate) fn ping(&self, key: TaskKey) {
        self.pings.borrow_mut().push_back(key);
        self.drive();
    }

    fn submit(&self, command: Command) {
        self.commands.borrow_mut().push_back(command);
        self.drive();
    }

    fn drive(&self) {
        if self.busy.replace(true) {
            return;
        }
        loop {
            let command = self.commands.borrow_mut().pop_front();
            if let Some(command) = command {
                self.state.borrow_mut().apply(command, &self.pings);
                continue;
            }
            if self.pings.borrow().is_empty() {
                break;
            }
            self.state.borrow_mut().perform_work(&self.pings);
        }
        self.busy.set(false);

        let events = core::mem::take(&mut self.state.borrow_mut().events);
        for event in events {
            self.dispatch(event);
        }
    }

    fn dispatch(&self, event: Event) {
        match event {
            Event::ShellReady => {
                let callback = {
                    let mut lifecycle = self.lifecycle.borrow_mut();
                    lifecycle.on_shell_error = None;
                    lifecycle.on_shell_ready.take()
                };
                if let Some(callback) = callback {
                    callback();
                }
            }
            Event::ShellError(error) => {
                let callback = self.lifecycle.borrow_mut().on_shell_error.take();
                if let Some(callback) = callback {
                    callback(&error);
                }
            }
            Event::AllReady => {
                let callback = self.lifecycle.borrow_mut().on_all_ready.take();
                if let Some(callback) = callback {
                    callback();
                }
            }
            Event::Fatal(error) => {
                let callback = self.lifecycle.borrow_mut().on_fatal_error.take();
                if let Some(callback) = callback {
                    callback(&error);
                }
            }
        }
    }
}

/// A single streaming render.
///
/// Cloning yields another handle to the same render.
///
/// ```
/// use cascade::{await_node, element, suspense, Deferred};
/// use cascade::{Callbacks, MemoryDestination, RenderOptions, Request};
///
/// let data = Deferred::new();
/// let page = element("main").child(suspense("Loading", await_node(&data)));
///
/// let request = Request::new(page, RenderOptions::default(), Callbacks::new());
/// let output = MemoryDestination::new();
/// request.start_work();
/// request.start_flowing(output.clone());
/// assert!(output.text().contains("Loading"));
///
/// data.resolve("Ready".into());
/// assert!(output.text().contains("$RC"));
/// assert!(output.is_closed());
/// ```
#[derive(Clone)]
pub struct Request {
    shared: Rc<Shared>,
}

impl Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.shared.state.try_borrow() {
            Ok(state) => f
                .debug_struct("Request")
                .field("status", &state.status)
                .field("stats", &state.stats())
                .finish(),
            Err(_) => f.debug_struct("Request").finish_non_exhaustive(),
        }
    }
}

impl Request {
    /// Prepares a render of `node` with HTML markup.
    pub fn new(node: impl Into<Node>, options: RenderOptions, callbacks: Callbacks) -> Self {
        Self::with_markup(node, options, callbacks, HtmlMarkup)
    }

    /// Prepares a render of `node` with a custom serializer.
    pub fn with_markup(
        node: impl Into<Node>,
        options: RenderOptions,
        callbacks: Callbacks,
        markup: impl Markup + 'static,
    ) -> Self {
        let node = node.into();
        let Callbacks {
            on_error,
            on_shell_ready,
            on_shell_error,
            on_all_ready,
            on_fatal_error,
        } = callbacks;

        let shared = Rc::new_cyclic(|handle: &Weak<Shared>| {
            let mut state = RequestState {
                handle: handle.clone(),
                status: RequestStatus::Open,
                started: false,
                flowing: false,
                shell_ready: false,
                markup: Box::new(markup),
                response: ResponseState::new(&options),
                progressive_chunk_size: options.progressive_chunk_size,
                segments: SegmentArena::new(),
                boundaries: BoundaryArena::new(),
                tasks: BTreeMap::new(),
                next_task: 0,
                abortable: BTreeSet::new(),
                pinged: VecDeque::new(),
                all_pending: 0,
                pending_root: 0,
                completed_root: None,
                next_segment_id: 0,
                client_rendered: Vec::new(),
                completed: Vec::new(),
                partial: Vec::new(),
                contexts: ContextTable::new(),
                destination: None,
                fatal: None,
                on_error: on_error.unwrap_or_else(|| Box::new(log_error)),
                events: Vec::new(),
                tasks_created: 0,
                component_renders: 0,
            };

            let root = state.segments.create_pending(
                0,
                None,
                FormatContext::root(options.namespace),
                false,
                false,
            );
            state.segments[root].parent_flushed = true;
            let task = state.create_task(
                node,
                None,
                root,
                AbortSet::Request,
                ContextSnapshot::root(),
                TreeContext::root(),
                None,
            );
            state.pinged.push_back(task);

            Shared {
                state: RefCell::new(state),
                pings: RefCell::new(VecDeque::new()),
                commands: RefCell::new(VecDeque::new()),
                busy: Cell::new(false),
                lifecycle: RefCell::new(Lifecycle {
                    on_shell_ready,
                    on_shell_error,
                    on_all_ready,
                    on_fatal_error,
                }),
            }
        });
        Self { shared }
    }

    /// Renders everything that can be rendered synchronously.
    pub fn start_work(&self) {
        self.shared.submit(Command::Work);
    }

    /// Attaches the destination and writes whatever is ready.
    ///
    /// Only the first destination is used.
    pub fn start_flowing(&self, destination: impl Destination + 'static) {
        self.shared.submit(Command::Flow(Box::new(destination)));
    }

    /// Resumes writing after the destination asked to pause.
    pub fn pull(&self) {
        self.shared.submit(Command::Pull);
    }

    /// Cancels every outstanding task.
    ///
    /// Pending boundaries switch to client rendering with `reason` reported
    /// through `on_error`; if the shell is still incomplete the render fails.
    pub fn abort(&self, reason: Option<&str>) {
        self.shared.submit(Command::Abort(reason.map(Into::into)));
    }

    /// Current lifecycle state.
    ///
    /// # Panics
    ///
    /// Panics if called from inside a component render or `on_error`.
    #[must_use]
    pub fn status(&self) -> RequestStatus {
        self.shared.state.borrow().status
    }

    /// Current counters.
    ///
    /// # Panics
    ///
    /// Panics if called from inside a component render or `on_error`.
    #[must_use]
    pub fn stats(&self) -> RequestStats {
        self.shared.state.borrow().stats()
    }

    /// Per-boundary counters, in creation order.
    ///
    /// # Panics
    ///
    /// Panics if called from inside a component render or `on_error`.
    #[must_use]
    pub fn boundary_stats(&self) -> Vec<BoundaryStats> {
        self.shared.state.borrow().boundaries.stats()
    }

    /// Whether every task the shell depends on finished.
    ///
    /// # Panics
    ///
    /// Panics if called from inside a component render or `on_error`.
    #[must_use]
    pub fn is_shell_ready(&self) -> bool {
        self.shared.state.borrow().shell_ready
    }
}
