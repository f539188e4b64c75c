//! Suspense boundaries and their completion accounting.

use alloc::collections::BTreeSet;
use core::ops::{Index, IndexMut};

use crate::segment::SegmentKey;
use crate::task::TaskKey;

/// Identifier of a boundary inside a [`BoundaryArena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BoundaryKey(usize);

/// Where a boundary stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BoundaryState {
    /// Content tasks are still running.
    Pending,
    /// All content rendered.
    Complete,
    /// Rendering failed or was aborted; the client takes over.
    ClientRendered,
}

/// One async gate between a fallback and its content.
#[derive(Debug, Default)]
pub struct Boundary {
    /// Wire id, assigned the first time the boundary is written as pending.
    pub(crate) id: Option<String>,
    /// Id the content root segment is streamed under.
    pub(crate) root_segment_id: Option<u32>,
    /// Boundary whose content this boundary is rendered in.
    pub(crate) parent: Option<BoundaryKey>,
    pub(crate) parent_flushed: bool,
    pub(crate) pending_tasks: usize,
    pub(crate) force_client_render: bool,
    pub(crate) completed_segments: Vec<SegmentKey>,
    pub(crate) byte_size: usize,
    /// Fallback tasks that become useless once the content completes.
    pub(crate) fallback_tasks: BTreeSet<TaskKey>,
    pub(crate) error_digest: Option<String>,
    pub(crate) fallback_tasks_scheduled: usize,
}

impl Boundary {
    /// Current state, derived from the counters.
    #[must_use]
    pub const fn state(&self) -> BoundaryState {
        if self.force_client_render {
            BoundaryState::ClientRendered
        } else if self.pending_tasks > 0 {
            BoundaryState::Pending
        } else {
            BoundaryState::Complete
        }
    }
}

/// Snapshot of one boundary, in creation order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundaryStats {
    /// Wire id, if one was assigned.
    pub id: Option<String>,
    /// Current state.
    pub state: BoundaryState,
    /// Content tasks still running.
    pub pending_tasks: usize,
    /// How many fallback tasks were ever scheduled for this boundary.
    pub fallback_tasks_scheduled: usize,
    /// Bytes of completed content accounted so far.
    pub byte_size: usize,
    /// Digest attached to a client-rendered boundary.
    pub error_digest: Option<String>,
}

/// Storage for every boundary of one request.
#[derive(Debug, Default)]
pub struct BoundaryArena {
    boundaries: Vec<Boundary>,
}

impl BoundaryArena {
    /// Creates an empty arena.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            boundaries: Vec::new(),
        }
    }

    /// Allocates a fresh pending boundary nested in `parent`.
    pub fn create(&mut self, parent: Option<BoundaryKey>) -> BoundaryKey {
        let key = BoundaryKey(self.boundaries.len());
        self.boundaries.push(Boundary {
            parent,
            ..Boundary::default()
        });
        key
    }

    /// Every key, in creation order.
    pub fn keys(&self) -> impl Iterator<Item = BoundaryKey> + use<> {
        (0..self.boundaries.len()).map(BoundaryKey)
    }

    /// Whether `key` is `ancestor` or rendered somewhere inside its content.
    #[must_use]
    pub fn is_within(&self, key: BoundaryKey, ancestor: BoundaryKey) -> bool {
        let mut current = Some(key);
        while let Some(boundary) = current {
            if boundary == ancestor {
                return true;
            }
            current = self[boundary].parent;
        }
        false
    }

    /// Number of boundaries ever created.
    #[must_use]
    pub fn len(&self) -> usize {
        self.boundaries.len()
    }

    /// Whether no boundary exists yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.boundaries.is_empty()
    }

    /// Stats for every boundary.
    #[must_use]
    pub fn stats(&self) -> Vec<BoundaryStats> {
        self.boundaries
            .iter()
            .map(|boundary| BoundaryStats {
                id: boundary.id.clone(),
                state: boundary.state(),
                pending_tasks: boundary.pending_tasks,
                fallback_tasks_scheduled: boundary.fallback_tasks_scheduled,
                byte_size: boundary.byte_size,
                error_digest: boundary.error_digest.clone(),
            })
            .collect()
    }
}

impl Index<BoundaryKey> for BoundaryArena {
    type Output = Boundary;

    fn index(&self, key: BoundaryKey) -> &Boundary {
        &self.boundaries[key.0]
    }
}

impl IndexMut<BoundaryKey> for BoundaryArena {
    fn index_mut(&mut self, key: BoundaryKey) -> &mut Boundary {
        &mut self.boundaries[key.0]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forced_client_render_wins_over_counters() {
        let mut arena = BoundaryArena::new();
        let key = arena.create(None);
        assert_eq!(arena[key].state(), BoundaryState::Complete);
        arena[key].pending_tasks = 2;
        assert_eq!(arena[key].state(), BoundaryState::Pending);
        arena[key].force_client_render = true;
        assert_eq!(arena[key].state(), BoundaryState::ClientRendered);
        arena[key].pending_tasks = 0;
        assert_eq!(arena.stats()[0].state, BoundaryState::ClientRendered);
    }

    #[test]
    fn nesting_follows_parent_links() {
        let mut arena = BoundaryArena::new();
        let outer = arena.create(None);
        let inner = arena.create(Some(outer));
        let deepest = arena.create(Some(inner));
        let sibling = arena.create(None);
        assert!(arena.is_within(deepest, outer));
        assert!(arena.is_within(inner, inner));
        assert!(!arena.is_within(outer, inner));
        assert!(!arena.is_within(sibling, outer));
        assert_eq!(arena.keys().count(), 4);
    }
}
