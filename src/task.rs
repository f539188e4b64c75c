//! Resumable units of rendering work.

use alloc::rc::Rc;

use cascade_core::{ContextSnapshot, Node, ThenableState, TreeContext, Wakeable};

use crate::boundary::BoundaryKey;
use crate::error::RenderError;
use crate::segment::SegmentKey;

/// Identifier of a live task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) struct TaskKey(pub(crate) u64);

/// The set a task is cancelled through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AbortSet {
    /// Cancelled only when the whole request is aborted.
    Request,
    /// Fallback work, dropped as soon as the boundary's content completes.
    Fallback(BoundaryKey),
}

/// A node still to be rendered into a segment, plus everything needed to
/// resume it exactly where it stopped.
#[derive(Debug)]
pub(crate) struct Task {
    pub(crate) node: Node,
    pub(crate) boundary: Option<BoundaryKey>,
    pub(crate) segment: SegmentKey,
    pub(crate) abort_set: AbortSet,
    pub(crate) context: ContextSnapshot,
    pub(crate) tree: TreeContext,
    pub(crate) thenables: Option<ThenableState>,
}

/// Where the render walk currently writes.
///
/// A boundary swaps `boundary` and `segment` while its content renders and
/// restores them afterwards.
#[derive(Debug)]
pub(crate) struct Cursor {
    pub(crate) boundary: Option<BoundaryKey>,
    pub(crate) segment: SegmentKey,
    pub(crate) abort_set: AbortSet,
    pub(crate) tree: TreeContext,
    /// Handed to the first component rendered, which is the one that
    /// suspended when this is a retry.
    pub(crate) thenables: Option<ThenableState>,
}

impl Cursor {
    pub(crate) fn for_task(task: &mut Task) -> Self {
        Self {
            boundary: task.boundary,
            segment: task.segment,
            abort_set: task.abort_set,
            tree: task.tree.clone(),
            thenables: task.thenables.take(),
        }
    }
}

/// A suspension captured at the innermost node that could not finish.
pub(crate) struct Suspension {
    pub(crate) wakeable: Rc<dyn Wakeable>,
    pub(crate) node: Node,
    pub(crate) context: ContextSnapshot,
    pub(crate) tree: TreeContext,
    pub(crate) thenables: Option<ThenableState>,
}

impl core::fmt::Debug for Suspension {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Suspension")
            .field("node", &self.node)
            .field("tree", &self.tree)
            .finish_non_exhaustive()
    }
}

/// Why a render walk stopped early.
#[derive(Debug)]
pub(crate) enum Halt {
    Suspend(Box<Suspension>),
    Fail(RenderError),
}

impl From<RenderError> for Halt {
    fn from(error: RenderError) -> Self {
        Self::Fail(error)
    }
}
