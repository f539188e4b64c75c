//! Output segments.
//!
//! A segment buffers the markup of one uninterrupted stretch of rendering.
//! Wherever rendering forks, because a child suspended or a boundary started,
//! a child segment is recorded together with the byte offset in the parent's
//! buffer where it belongs. Segments live in an arena and refer to each other
//! by [`SegmentKey`].

use core::ops::{Index, IndexMut};

use crate::boundary::BoundaryKey;
use crate::format::FormatContext;

/// Identifier of a segment inside a [`SegmentArena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SegmentKey(usize);

impl SegmentKey {
    /// The raw arena index.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

/// Lifecycle of a segment.
///
/// `Pending` advances to `Completed` and then `Flushed`, or is cut short by
/// `Aborted` or `Errored`. `Flushed`, `Aborted` and `Errored` are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SegmentStatus {
    /// Still being rendered.
    Pending,
    /// Fully rendered, not written yet.
    Completed,
    /// Written to the destination.
    Flushed,
    /// Cancelled.
    Aborted,
    /// Rendering failed.
    Errored,
}

/// One buffered stretch of output.
#[derive(Debug)]
pub struct Segment {
    pub(crate) status: SegmentStatus,
    /// Assigned only once the segment must be referenced out of order.
    pub(crate) id: Option<u32>,
    /// Byte offset in the parent's buffer this segment is written at.
    pub(crate) index: usize,
    pub(crate) parent_flushed: bool,
    pub(crate) chunks: Vec<u8>,
    pub(crate) children: Vec<SegmentKey>,
    pub(crate) format: FormatContext,
    /// Set on the segment that holds a boundary's fallback.
    pub(crate) boundary: Option<BoundaryKey>,
    pub(crate) last_pushed_text: bool,
    pub(crate) text_embedded: bool,
}

impl Segment {
    /// Current lifecycle state.
    #[must_use]
    pub const fn status(&self) -> SegmentStatus {
        self.status
    }

    /// Bytes buffered in this segment alone.
    #[must_use]
    pub fn byte_len(&self) -> usize {
        self.chunks.len()
    }
}

/// Storage for every segment of one request.
#[derive(Debug, Default)]
pub struct SegmentArena {
    segments: Vec<Segment>,
}

impl SegmentArena {
    /// Creates an empty arena.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            segments: Vec::new(),
        }
    }

    /// Allocates a pending segment.
    pub fn create_pending(
        &mut self,
        index: usize,
        boundary: Option<BoundaryKey>,
        format: FormatContext,
        last_pushed_text: bool,
        text_embedded: bool,
    ) -> SegmentKey {
        let key = SegmentKey(self.segments.len());
        self.segments.push(Segment {
            status: SegmentStatus::Pending,
            id: None,
            index,
            parent_flushed: false,
            chunks: Vec::new(),
            children: Vec::new(),
            format,
            boundary,
            last_pushed_text,
            text_embedded,
        });
        key
    }

    /// Number of segments ever created.
    #[must_use]
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    /// Whether no segment exists yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Counts segments currently in `status`.
    #[must_use]
    pub fn count(&self, status: SegmentStatus) -> usize {
        self.segments
            .iter()
            .filter(|segment| segment.status == status)
            .count()
    }
}

impl Index<SegmentKey> for SegmentArena {
    type Output = Segment;

    fn index(&self, key: SegmentKey) -> &Segment {
        &self.segments[key.0]
    }
}

impl IndexMut<SegmentKey> for SegmentArena {
    fn index_mut(&mut self, key: SegmentKey) -> &mut Segment {
        &mut self.segments[key.0]
    }
}
