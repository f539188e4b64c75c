//! The task scheduler: walking nodes into segments, suspending, retrying and
//! the completion accounting that follows.

use alloc::collections::BTreeSet;
use alloc::rc::Rc;

use cascade_core::{
    Component, ContextSnapshot, Element, Interrupt, Node, Scope, Suspense, ThenableState,
    TreeContext, Wakeable,
};
use tracing::{debug, trace};

use crate::boundary::BoundaryKey;
use crate::error::RenderError;
use crate::instructions::{DOCTYPE, TEXT_SEPARATOR};
use crate::request::{Event, RequestState, RequestStatus};
use crate::segment::{SegmentKey, SegmentStatus};
use crate::task::{AbortSet, Cursor, Halt, Suspension, Task, TaskKey};

impl RequestState {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn create_task(
        &mut self,
        node: Node,
        boundary: Option<BoundaryKey>,
        segment: SegmentKey,
        abort_set: AbortSet,
        context: ContextSnapshot,
        tree: TreeContext,
        thenables: Option<ThenableState>,
    ) -> TaskKey {
        let key = TaskKey(self.next_task);
        self.next_task += 1;
        self.tasks_created += 1;
        self.all_pending += 1;
        match boundary {
            None => self.pending_root += 1,
            Some(boundary) => self.boundaries[boundary].pending_tasks += 1,
        }
        self.abort_set_mut(abort_set).insert(key);
        self.tasks.insert(
            key,
            Task {
                node,
                boundary,
                segment,
                abort_set,
                context,
                tree,
                thenables,
            },
        );
        key
    }

    fn abort_set_mut(&mut self, set: AbortSet) -> &mut BTreeSet<TaskKey> {
        match set {
            AbortSet::Request => &mut self.abortable,
            AbortSet::Fallback(boundary) => &mut self.boundaries[boundary].fallback_tasks,
        }
    }

    fn subscribe(&self, wakeable: &dyn Wakeable, key: TaskKey) {
        let handle = self.handle.clone();
        wakeable.subscribe(Box::new(move || {
            if let Some(shared) = handle.upgrade() {
                shared.ping(key);
            }
        }));
    }

    /// Runs a pinged task again from the node it suspended on.
    pub(crate) fn retry_task(&mut self, key: TaskKey) -> Result<(), RenderError> {
        let Some(mut task) = self.tasks.remove(&key) else {
            return Ok(());
        };
        let segment = task.segment;
        if self.segments[segment].status != SegmentStatus::Pending {
            return Ok(());
        }
        trace!(task = key.0, "retrying task");

        self.contexts.switch_to(&task.context);
        let mut cursor = Cursor::for_task(&mut task);
        let node = task.node.clone();
        match self.render_node_destructive(&mut cursor, &node) {
            Ok(()) => {
                self.push_segment_finale(segment);
                self.abort_set_mut(task.abort_set).remove(&key);
                self.segments[segment].status = SegmentStatus::Completed;
                self.finished_task(task.boundary, segment)
            }
            Err(Halt::Suspend(suspension)) => {
                let Suspension {
                    wakeable,
                    node,
                    context,
                    tree,
                    thenables,
                } = *suspension;
                task.node = node;
                task.context = context;
                task.tree = tree;
                task.thenables = thenables;
                self.tasks.insert(key, task);
                self.subscribe(wakeable.as_ref(), key);
                Ok(())
            }
            Err(Halt::Fail(error)) => {
                self.abort_set_mut(task.abort_set).remove(&key);
                self.segments[segment].status = SegmentStatus::Errored;
                self.errored_task(task.boundary, error);
                Ok(())
            }
        }
    }

    /// Renders `node`, turning a suspension into a new task so the caller
    /// can carry on with the next sibling.
    pub(crate) fn render_node(
        &mut self,
        cursor: &mut Cursor,
        node: &Node,
    ) -> Result<(), RenderError> {
        let format = self.segments[cursor.segment].format;
        let context = self.contexts.active().clone();
        let tree = cursor.tree.clone();

        let halt = match self.render_node_destructive(cursor, node) {
            Ok(()) => return Ok(()),
            Err(halt) => halt,
        };
        self.segments[cursor.segment].format = format;
        self.contexts.switch_to(&context);
        cursor.tree = tree;

        match halt {
            Halt::Suspend(suspension) => {
                self.spawn_suspended_task(cursor, *suspension);
                Ok(())
            }
            Halt::Fail(error) => Err(error),
        }
    }

    /// Renders `node` without catching anything; state is left where the
    /// failure happened.
    fn render_node_destructive(&mut self, cursor: &mut Cursor, node: &Node) -> Result<(), Halt> {
        match node {
            Node::Empty => Ok(()),
            Node::Text(text) => {
                self.push_text(cursor.segment, text);
                Ok(())
            }
            Node::Element(element) => self.render_element(cursor, element),
            Node::Fragment(children) => self.render_children(cursor, children),
            Node::Component(component) => self.render_component(cursor, node, component),
            Node::Provider(provider) => {
                self.contexts.push_erased(provider.context(), provider.value());
                self.render_node_destructive(cursor, provider.child())?;
                self.contexts.pop();
                Ok(())
            }
            Node::Suspense(suspense) => {
                self.render_suspense_boundary(cursor, suspense);
                Ok(())
            }
            Node::Await(deferred) => match deferred.peek() {
                Some(Ok(resolved)) => self.render_node_destructive(cursor, &resolved),
                Some(Err(error)) => Err(Halt::Fail(error.into())),
                None => Err(self.suspension(cursor, node.clone(), Rc::new(deferred.clone()), None)),
            },
        }
    }

    fn suspension(
        &self,
        cursor: &Cursor,
        node: Node,
        wakeable: Rc<dyn Wakeable>,
        thenables: Option<ThenableState>,
    ) -> Halt {
        Halt::Suspend(Box::new(Suspension {
            wakeable,
            node,
            context: self.contexts.active().clone(),
            tree: cursor.tree.clone(),
            thenables,
        }))
    }

    fn render_component(
        &mut self,
        cursor: &mut Cursor,
        node: &Node,
        component: &Component,
    ) -> Result<(), Halt> {
        let mut thenables = cursor.thenables.take().unwrap_or_default();
        self.component_renders += 1;
        let (result, did_use_id) = {
            let mut scope = Scope::new(
                &cursor.tree,
                &self.contexts,
                self.response.identifier_prefix(),
                &mut thenables,
            );
            let result = component.render(&mut scope);
            (result, scope.did_use_id())
        };

        let child = match result {
            Ok(child) => child,
            Err(Interrupt::Suspend(wakeable)) => {
                trace!(component = component.name(), "component suspended");
                return Err(self.suspension(cursor, node.clone(), wakeable, Some(thenables)));
            }
            Err(Interrupt::Fail(error)) => return Err(Halt::Fail(error.into())),
        };

        if did_use_id {
            let parent = cursor.tree.clone();
            cursor.tree = parent.fork(1, 0);
            self.render_node_destructive(cursor, &child)?;
            cursor.tree = parent;
            Ok(())
        } else {
            self.render_node_destructive(cursor, &child)
        }
    }

    fn render_children(&mut self, cursor: &mut Cursor, children: &[Node]) -> Result<(), Halt> {
        let total = children.len();
        for (index, child) in children.iter().enumerate() {
            let parent = cursor.tree.clone();
            cursor.tree = parent.fork(total, index);
            let result = self.render_node(cursor, child);
            cursor.tree = parent;
            result?;
        }
        Ok(())
    }

    fn render_element(&mut self, cursor: &mut Cursor, element: &Element) -> Result<(), Halt> {
        let key = cursor.segment;
        let tag = element.tag();
        let children = element.child_node();
        let void = self.markup.is_void(tag);
        if void && (!children.is_empty() || element.raw_html().is_some()) {
            return Err(RenderError::InvalidContent(format!("<{tag}> is a void element")).into());
        }
        if element.raw_html().is_some() && !children.is_empty() {
            return Err(
                RenderError::InvalidContent(format!("<{tag}> has both children and inner html"))
                    .into(),
            );
        }

        let format = self.segments[key].format;
        let segment = &mut self.segments[key];
        if tag == "html" && format.is_root() {
            segment.chunks.extend_from_slice(DOCTYPE);
        }
        self.markup
            .write_open_tag(&mut segment.chunks, tag, element.attributes())?;
        segment.last_pushed_text = false;

        if let Some(html) = element.raw_html() {
            segment.chunks.extend_from_slice(html.as_bytes());
        } else if let Node::Text(text) = children {
            self.markup.write_text(&mut segment.chunks, text);
        } else if !children.is_empty() {
            segment.format = format.child(tag);
            self.render_node(cursor, children)?;
            self.segments[key].format = format;
        }

        let segment = &mut self.segments[key];
        if !void {
            self.markup.write_close_tag(&mut segment.chunks, tag);
        }
        segment.last_pushed_text = false;
        Ok(())
    }

    fn push_text(&mut self, key: SegmentKey, text: &str) {
        if text.is_empty() {
            return;
        }
        let segment = &mut self.segments[key];
        if segment.last_pushed_text {
            segment.chunks.extend_from_slice(TEXT_SEPARATOR);
        }
        self.markup.write_text(&mut segment.chunks, text);
        segment.last_pushed_text = true;
    }

    fn push_segment_finale(&mut self, key: SegmentKey) {
        let segment = &mut self.segments[key];
        if segment.last_pushed_text && segment.text_embedded {
            segment.chunks.extend_from_slice(TEXT_SEPARATOR);
        }
    }

    fn spawn_suspended_task(&mut self, cursor: &Cursor, suspension: Suspension) {
        let parent = &mut self.segments[cursor.segment];
        let index = parent.chunks.len();
        let format = parent.format;
        let last_pushed_text = parent.last_pushed_text;
        parent.last_pushed_text = false;

        let child = self
            .segments
            .create_pending(index, None, format, last_pushed_text, true);
        self.segments[cursor.segment].children.push(child);

        let Suspension {
            wakeable,
            node,
            context,
            tree,
            thenables,
        } = suspension;
        let key = self.create_task(
            node,
            cursor.boundary,
            child,
            cursor.abort_set,
            context,
            tree,
            thenables,
        );
        debug!(task = key.0, "spawned suspended task");
        self.subscribe(wakeable.as_ref(), key);
    }

    /// Renders the content inline and schedules the fallback only if the
    /// content could not finish.
    fn render_suspense_boundary(&mut self, cursor: &mut Cursor, suspense: &Suspense) {
        let parent_boundary = cursor.boundary;
        let parent_segment = cursor.segment;
        let boundary = self.boundaries.create(parent_boundary);

        let parent = &mut self.segments[parent_segment];
        let index = parent.chunks.len();
        let format = parent.format;
        parent.last_pushed_text = false;
        let boundary_segment = self
            .segments
            .create_pending(index, Some(boundary), format, false, false);
        self.segments[parent_segment].children.push(boundary_segment);

        let content_root = self.segments.create_pending(0, None, format, false, false);
        self.segments[content_root].parent_flushed = true;

        cursor.boundary = Some(boundary);
        cursor.segment = content_root;
        let result = self.render_node(cursor, &suspense.content);
        cursor.boundary = parent_boundary;
        cursor.segment = parent_segment;

        match result {
            Ok(()) => {
                self.push_segment_finale(content_root);
                self.segments[content_root].status = SegmentStatus::Completed;
                self.queue_completed_segment(boundary, content_root);
                if self.boundaries[boundary].pending_tasks == 0 {
                    trace!("boundary content rendered without suspending");
                    return;
                }
            }
            Err(error) => {
                self.segments[content_root].status = SegmentStatus::Errored;
                let digest = self.report_error(&error);
                let state = &mut self.boundaries[boundary];
                state.force_client_render = true;
                state.error_digest = digest;
                debug!(%error, "boundary content failed, falling back to client render");
                self.cancel_content_tasks(boundary);
            }
        }

        let context = self.contexts.active().clone();
        let task = self.create_task(
            suspense.fallback.clone(),
            parent_boundary,
            boundary_segment,
            AbortSet::Fallback(boundary),
            context,
            cursor.tree.clone(),
            None,
        );
        self.boundaries[boundary].fallback_tasks_scheduled += 1;
        self.pinged.push_back(task);
    }

    /// Records a completed segment of `boundary`, collapsing empty wrappers
    /// around a single child into that child.
    pub(crate) fn queue_completed_segment(&mut self, boundary: BoundaryKey, segment: SegmentKey) {
        let mut current = segment;
        loop {
            let state = &self.segments[current];
            let only_child = match state.children.as_slice() {
                [child] if state.chunks.is_empty() => Some(*child),
                _ => None,
            };
            let only_child =
                only_child.filter(|child| self.segments[*child].boundary.is_none());
            if let Some(child) = only_child {
                let id = state.id;
                let child_state = &mut self.segments[child];
                child_state.id = id;
                child_state.parent_flushed = true;
                if child_state.status != SegmentStatus::Completed {
                    return;
                }
                current = child;
                continue;
            }

            let size = state.chunks.len();
            let boundary = &mut self.boundaries[boundary];
            boundary.completed_segments.push(current);
            boundary.byte_size += size;
            return;
        }
    }

    fn finished_task(
        &mut self,
        boundary: Option<BoundaryKey>,
        segment: SegmentKey,
    ) -> Result<(), RenderError> {
        match boundary {
            None => {
                if self.segments[segment].parent_flushed {
                    if self.completed_root.is_some() {
                        return Err(RenderError::Invariant("only one root segment can complete"));
                    }
                    self.completed_root = Some(segment);
                }
                self.pending_root = self.pending_root.saturating_sub(1);
                if self.pending_root == 0 && !self.shell_ready {
                    debug!("shell ready");
                    self.shell_ready = true;
                    self.events.push(Event::ShellReady);
                }
            }
            Some(key) => {
                let state = &mut self.boundaries[key];
                state.pending_tasks = state.pending_tasks.saturating_sub(1);
                if state.force_client_render {
                    // Already handed to the client.
                } else if state.pending_tasks == 0 {
                    let parent_flushed = state.parent_flushed;
                    let fallback = core::mem::take(&mut state.fallback_tasks);
                    let segment_state = &self.segments[segment];
                    if segment_state.parent_flushed
                        && segment_state.status == SegmentStatus::Completed
                    {
                        self.queue_completed_segment(key, segment);
                    }
                    if parent_flushed {
                        self.completed.push(key);
                    }
                    debug!(
                        boundary = ?key,
                        cancelled_fallbacks = fallback.len(),
                        "boundary completed"
                    );
                    for task in fallback {
                        self.abort_task_soft(task)?;
                    }
                } else {
                    let segment_state = &self.segments[segment];
                    if segment_state.parent_flushed
                        && segment_state.status == SegmentStatus::Completed
                    {
                        self.queue_completed_segment(key, segment);
                        let state = &self.boundaries[key];
                        if state.completed_segments.len() == 1 && state.parent_flushed {
                            self.partial.push(key);
                        }
                    }
                }
            }
        }
        self.finish_pending();
        Ok(())
    }

    fn finish_pending(&mut self) {
        self.all_pending = self.all_pending.saturating_sub(1);
        if self.all_pending == 0 {
            debug!("all tasks finished");
            self.events.push(Event::AllReady);
        }
    }

    fn errored_task(&mut self, boundary: Option<BoundaryKey>, error: RenderError) {
        let digest = self.report_error(&error);
        match boundary {
            None => self.fatal_error(error),
            Some(key) => {
                let state = &mut self.boundaries[key];
                state.pending_tasks = state.pending_tasks.saturating_sub(1);
                if !state.force_client_render {
                    debug!(boundary = ?key, %error, "task failed, falling back to client render");
                    state.force_client_render = true;
                    state.error_digest = digest;
                    if state.parent_flushed {
                        self.client_rendered.push(key);
                    }
                    self.cancel_content_tasks(key);
                }
            }
        }
        self.finish_pending();
    }

    /// Drops every task rendering into the content of a client-rendered
    /// `boundary`, nested boundaries and their fallbacks included. The
    /// boundary's own fallback keeps running.
    fn cancel_content_tasks(&mut self, boundary: BoundaryKey) {
        let doomed: Vec<TaskKey> = self
            .tasks
            .iter()
            .filter(|(_, task)| {
                task.boundary
                    .is_some_and(|owner| self.boundaries.is_within(owner, boundary))
            })
            .map(|(key, _)| *key)
            .collect();
        if doomed.is_empty() {
            return;
        }
        debug!(boundary = ?boundary, tasks = doomed.len(), "cancelling content tasks");
        for key in doomed {
            let Some(task) = self.tasks.remove(&key) else {
                continue;
            };
            self.abort_set_mut(task.abort_set).remove(&key);
            self.segments[task.segment].status = SegmentStatus::Aborted;
            if let Some(owner) = task.boundary {
                let state = &mut self.boundaries[owner];
                state.pending_tasks = state.pending_tasks.saturating_sub(1);
            }
            self.finish_pending();
        }
    }

    /// Cancels a fallback whose content already completed.
    fn abort_task_soft(&mut self, key: TaskKey) -> Result<(), RenderError> {
        let Some(task) = self.tasks.remove(&key) else {
            return Ok(());
        };
        self.segments[task.segment].status = SegmentStatus::Aborted;
        self.finished_task(task.boundary, task.segment)
    }

    /// Aborts fallback tasks that no content task leads to, such as the
    /// fallback of a boundary whose content failed outright.
    pub(crate) fn abort_fallback_tasks(&mut self, reason: &RenderError) {
        for boundary in self.boundaries.keys() {
            let fallback = core::mem::take(&mut self.boundaries[boundary].fallback_tasks);
            for task in fallback {
                self.abort_task(task, reason);
            }
        }
    }

    pub(crate) fn abort_task(&mut self, key: TaskKey, reason: &RenderError) {
        let Some(task) = self.tasks.remove(&key) else {
            return;
        };
        self.segments[task.segment].status = SegmentStatus::Aborted;
        match task.boundary {
            None => {
                self.all_pending = self.all_pending.saturating_sub(1);
                if !matches!(self.status, RequestStatus::Closing | RequestStatus::Closed) {
                    self.report_error(reason);
                    self.fatal_error(reason.clone());
                }
            }
            Some(boundary) => {
                let state = &mut self.boundaries[boundary];
                state.pending_tasks = state.pending_tasks.saturating_sub(1);
                if !state.force_client_render {
                    state.force_client_render = true;
                    let digest = (self.on_error)(reason);
                    let state = &mut self.boundaries[boundary];
                    state.error_digest = digest;
                    if state.parent_flushed {
                        self.client_rendered.push(boundary);
                    }
                }
                let fallback = core::mem::take(&mut self.boundaries[boundary].fallback_tasks);
                for task in fallback {
                    self.abort_task(task, reason);
                }
                self.finish_pending();
            }
        }
    }

    pub(crate) fn report_error(&mut self, error: &RenderError) -> Option<String> {
        (self.on_error)(error)
    }

    pub(crate) fn fatal_error(&mut self, error: RenderError) {
        debug!(%error, "fatal render error");
        if !self.shell_ready {
            self.events.push(Event::ShellError(error.clone()));
        }
        self.events.push(Event::Fatal(error.clone()));
        match self.destination.as_mut() {
            Some(destination) => {
                if self.status != RequestStatus::Closed {
                    self.status = RequestStatus::Closed;
                    destination.close_with_error(&error);
                }
            }
            None => {
                if self.status == RequestStatus::Open {
                    self.status = RequestStatus::Closing;
                    self.fatal = Some(error);
                }
            }
        }
    }
}
