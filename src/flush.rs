//! Writing completed work to the destination in the order the client can
//! apply it.

use tracing::{debug, trace};

use crate::boundary::BoundaryKey;
use crate::destination::Destination;
use crate::error::RenderError;
use crate::request::{RequestState, RequestStatus};
use crate::segment::{SegmentKey, SegmentStatus};

#[derive(Debug, Clone, Copy)]
enum Queue {
    ClientRendered,
    Completed,
    Partial,
}

type FlushBoundary =
    fn(&mut RequestState, &mut dyn Destination, BoundaryKey) -> Result<bool, RenderError>;

impl RequestState {
    /// Writes everything that became ready, stopping early when the
    /// destination asks for a pause. Closes the destination once nothing is
    /// left.
    pub(crate) fn flush_completed_queues(&mut self) -> Result<(), RenderError> {
        if self.status == RequestStatus::Closed {
            return Ok(());
        }
        let Some(mut destination) = self.destination.take() else {
            return Ok(());
        };

        let result = self.write_queues(destination.as_mut());
        destination.flush();
        let result = match destination.take_error() {
            Some(error) => Err(error),
            None => result,
        };

        let outcome = match result {
            Ok(flowing) => {
                self.flowing = flowing;
                if self.all_pending == 0
                    && self.pinged.is_empty()
                    && self.client_rendered.is_empty()
                    && self.completed.is_empty()
                {
                    debug!("render complete, closing destination");
                    self.status = RequestStatus::Closed;
                    destination.close();
                }
                Ok(())
            }
            Err(error) => Err(error),
        };
        self.destination = Some(destination);
        outcome
    }

    fn write_queues(&mut self, destination: &mut dyn Destination) -> Result<bool, RenderError> {
        if self.pending_root == 0 {
            if let Some(root) = self.completed_root.take() {
                trace!("flushing shell");
                self.flush_segment(destination, root)?;
                self.response.write_bootstrap(destination);
            }
        }

        Ok(self.flush_queue(
            destination,
            Queue::ClientRendered,
            Self::flush_client_rendered_boundary,
        )? && self.flush_queue(destination, Queue::Completed, Self::flush_completed_boundary)?
            && self.flush_queue(destination, Queue::Partial, Self::flush_partial_boundary)?
            && self.flush_queue(destination, Queue::Completed, Self::flush_completed_boundary)?)
    }

    fn queue(&mut self, queue: Queue) -> &mut Vec<BoundaryKey> {
        match queue {
            Queue::ClientRendered => &mut self.client_rendered,
            Queue::Completed => &mut self.completed,
            Queue::Partial => &mut self.partial,
        }
    }

    /// Flushes `queue` front to back. Entries that were handed to the
    /// destination are dropped even when it asked to pause.
    fn flush_queue(
        &mut self,
        destination: &mut dyn Destination,
        queue: Queue,
        flush: FlushBoundary,
    ) -> Result<bool, RenderError> {
        trace!(?queue, len = self.queue(queue).len(), "flushing boundaries");
        let mut index = 0;
        let mut flowing = true;
        while let Some(&boundary) = self.queue(queue).get(index) {
            index += 1;
            if !flush(self, destination, boundary)? {
                flowing = false;
                break;
            }
        }
        self.queue(queue).drain(..index);
        Ok(flowing)
    }

    fn flush_client_rendered_boundary(
        &mut self,
        destination: &mut dyn Destination,
        key: BoundaryKey,
    ) -> Result<bool, RenderError> {
        let boundary = &self.boundaries[key];
        let Some(id) = boundary.id.clone() else {
            return Err(RenderError::Invariant(
                "a client-rendered boundary was queued before it was written",
            ));
        };
        let digest = boundary.error_digest.clone();
        self.response
            .write_client_render_instruction(destination, &id, digest.as_deref())
    }

    fn flush_completed_boundary(
        &mut self,
        destination: &mut dyn Destination,
        key: BoundaryKey,
    ) -> Result<bool, RenderError> {
        let segments = core::mem::take(&mut self.boundaries[key].completed_segments);
        for segment in segments {
            self.flush_partially_completed_segment(destination, key, segment)?;
        }
        let boundary = &self.boundaries[key];
        let (Some(id), Some(segment_id)) = (boundary.id.clone(), boundary.root_segment_id) else {
            return Err(RenderError::Invariant(
                "a completed boundary was queued before it was written",
            ));
        };
        Ok(self
            .response
            .write_completed_boundary_instruction(destination, &id, segment_id))
    }

    fn flush_partial_boundary(
        &mut self,
        destination: &mut dyn Destination,
        key: BoundaryKey,
    ) -> Result<bool, RenderError> {
        if self.boundaries[key].force_client_render {
            self.boundaries[key].completed_segments.clear();
            return Ok(true);
        }
        let mut index = 0;
        let mut flowing = true;
        while let Some(&segment) = self.boundaries[key].completed_segments.get(index) {
            index += 1;
            if !self.flush_partially_completed_segment(destination, key, segment)? {
                flowing = false;
                break;
            }
        }
        self.boundaries[key].completed_segments.drain(..index);
        Ok(flowing)
    }

    fn flush_partially_completed_segment(
        &mut self,
        destination: &mut dyn Destination,
        boundary: BoundaryKey,
        key: SegmentKey,
    ) -> Result<bool, RenderError> {
        let segment = &self.segments[key];
        if segment.status == SegmentStatus::Flushed {
            return Ok(true);
        }
        if let Some(id) = segment.id {
            self.flush_segment_container(destination, key, id)?;
            return Ok(self.response.write_completed_segment_instruction(destination, id));
        }

        // The boundary's root segment takes the id reserved when the
        // boundary was first written.
        let Some(id) = self.boundaries[boundary].root_segment_id else {
            return Err(RenderError::Invariant(
                "a boundary root segment was flushed before its id was reserved",
            ));
        };
        self.segments[key].id = Some(id);
        self.flush_segment_container(destination, key, id)
    }

    fn flush_segment_container(
        &mut self,
        destination: &mut dyn Destination,
        key: SegmentKey,
        id: u32,
    ) -> Result<bool, RenderError> {
        let format = self.segments[key].format;
        let mut flowing = self.response.write_start_segment(destination, format, id);
        flowing &= self.flush_segment(destination, key)?;
        flowing &= self.response.write_end_segment(destination, format);
        Ok(flowing)
    }

    fn flush_segment(
        &mut self,
        destination: &mut dyn Destination,
        key: SegmentKey,
    ) -> Result<bool, RenderError> {
        let Some(boundary_key) = self.segments[key].boundary else {
            return self.flush_subtree(destination, key);
        };

        let boundary = &mut self.boundaries[boundary_key];
        boundary.parent_flushed = true;

        if boundary.force_client_render {
            let digest = boundary.error_digest.clone();
            let mut flowing = self
                .response
                .write_start_client_rendered_boundary(destination, digest.as_deref());
            flowing &= self.flush_fallback(destination, key)?;
            flowing &= self.response.write_end_boundary(destination);
            return Ok(flowing);
        }

        if boundary.pending_tasks > 0 || boundary.byte_size > self.progressive_chunk_size {
            let pending = boundary.pending_tasks > 0;
            let has_partial_content = !boundary.completed_segments.is_empty();
            let segment_id = self.allocate_segment_id();
            let id = self.response.assign_boundary_id();
            let boundary = &mut self.boundaries[boundary_key];
            boundary.root_segment_id = Some(segment_id);
            boundary.id = Some(id.clone());
            if !pending {
                trace!(boundary = %id, "streaming large boundary out of order");
                self.completed.push(boundary_key);
            } else if has_partial_content {
                self.partial.push(boundary_key);
            }

            let mut flowing = self.response.write_start_pending_boundary(destination, &id);
            flowing &= self.flush_fallback(destination, key)?;
            flowing &= self.response.write_end_boundary(destination);
            return Ok(flowing);
        }

        let segments = core::mem::take(&mut boundary.completed_segments);
        let [content] = segments.as_slice() else {
            return Err(RenderError::Invariant(
                "an unwritten completed boundary must have exactly one root segment",
            ));
        };
        let mut flowing = self.response.write_start_completed_boundary(destination);
        flowing &= self.flush_segment(destination, *content)?;
        flowing &= self.response.write_end_boundary(destination);
        Ok(flowing)
    }

    /// Writes a boundary's fallback unless it was cancelled or failed.
    fn flush_fallback(
        &mut self,
        destination: &mut dyn Destination,
        key: SegmentKey,
    ) -> Result<bool, RenderError> {
        match self.segments[key].status {
            SegmentStatus::Pending | SegmentStatus::Completed => {
                self.flush_subtree(destination, key)
            }
            _ => Ok(true),
        }
    }

    fn flush_subtree(
        &mut self,
        destination: &mut dyn Destination,
        key: SegmentKey,
    ) -> Result<bool, RenderError> {
        self.segments[key].parent_flushed = true;
        match self.segments[key].status {
            SegmentStatus::Pending => {
                let id = self.allocate_segment_id();
                let segment = &mut self.segments[key];
                segment.id = Some(id);
                segment.last_pushed_text = false;
                segment.text_embedded = false;
                Ok(self.response.write_placeholder(destination, id))
            }
            SegmentStatus::Completed => {
                let segment = &mut self.segments[key];
                segment.status = SegmentStatus::Flushed;
                let chunks = core::mem::take(&mut segment.chunks);
                let children = core::mem::take(&mut segment.children);

                let mut flowing = true;
                let mut written = 0;
                for child in children {
                    let index = self.segments[child].index;
                    if index > written {
                        flowing &= destination.write(&chunks[written..index]);
                        written = index;
                    }
                    flowing &= self.flush_segment(destination, child)?;
                }
                if written < chunks.len() {
                    flowing &= destination.write(&chunks[written..]);
                }
                Ok(flowing)
            }
            SegmentStatus::Flushed | SegmentStatus::Aborted | SegmentStatus::Errored => {
                Err(RenderError::Invariant(
                    "aborted, errored or already flushed segments cannot be flushed",
                ))
            }
        }
    }

    fn allocate_segment_id(&mut self) -> u32 {
        let id = self.next_segment_id;
        self.next_segment_id += 1;
        id
    }
}
