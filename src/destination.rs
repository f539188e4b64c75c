//! Sinks the renderer writes into.
//!
//! A [`Destination`] accepts every chunk it is given; the return value of
//! [`Destination::write`] only says whether it wants more. Once a write
//! returns `false` the request stops flushing until [`Request::pull`] is
//! called.
//!
//! [`Request::pull`]: crate::Request::pull

use alloc::rc::Rc;
use core::cell::RefCell;
use std::io::{self, Write};

use crate::error::RenderError;

/// Receives rendered bytes.
pub trait Destination {
    /// Appends `chunk`. Returns `false` to ask the writer to pause.
    fn write(&mut self, chunk: &[u8]) -> bool;

    /// Pushes buffered bytes further down, if the sink buffers.
    fn flush(&mut self) {}

    /// Called exactly once when the render finished.
    fn close(&mut self);

    /// Called instead of [`close`](Self::close) when the render failed.
    fn close_with_error(&mut self, error: &RenderError);

    /// Returns a failure the sink ran into since the last call.
    fn take_error(&mut self) -> Option<RenderError> {
        None
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    chunks: Vec<Vec<u8>>,
    budget: Option<usize>,
    written_since_pull: usize,
    flushes: usize,
    closes: usize,
    error: Option<RenderError>,
}

/// An in-memory sink whose contents stay readable through any clone.
///
/// With a budget set, [`write`](Destination::write) returns `false` once that
/// many chunks were written since the last [`refill`](Self::refill).
#[derive(Debug, Clone, Default)]
pub struct MemoryDestination {
    state: Rc<RefCell<MemoryState>>,
}

impl MemoryDestination {
    /// A sink that always asks for more.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A sink that asks to pause after `chunks` writes per refill.
    #[must_use]
    pub fn with_budget(chunks: usize) -> Self {
        let destination = Self::default();
        destination.state.borrow_mut().budget = Some(chunks);
        destination
    }

    /// Resets the write budget, typically right before pulling the request.
    pub fn refill(&self) {
        self.state.borrow_mut().written_since_pull = 0;
    }

    /// Everything written so far.
    #[must_use]
    pub fn snapshot(&self) -> Vec<u8> {
        self.state.borrow().chunks.concat()
    }

    /// Everything written so far, as text.
    #[must_use]
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.snapshot()).into_owned()
    }

    /// The individual writes, in order.
    #[must_use]
    pub fn chunks(&self) -> Vec<Vec<u8>> {
        self.state.borrow().chunks.clone()
    }

    /// Number of writes so far.
    #[must_use]
    pub fn write_count(&self) -> usize {
        self.state.borrow().chunks.len()
    }

    /// How many times [`close`](Destination::close) or
    /// [`close_with_error`](Destination::close_with_error) was called.
    #[must_use]
    pub fn close_count(&self) -> usize {
        self.state.borrow().closes
    }

    /// Whether the sink was closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.close_count() > 0
    }

    /// The error the sink was closed with, if any.
    #[must_use]
    pub fn error(&self) -> Option<RenderError> {
        self.state.borrow().error.clone()
    }
}

impl Destination for MemoryDestination {
    fn write(&mut self, chunk: &[u8]) -> bool {
        let mut state = self.state.borrow_mut();
        state.chunks.push(chunk.to_vec());
        state.written_since_pull += 1;
        state.budget.is_none_or(|budget| state.written_since_pull < budget)
    }

    fn flush(&mut self) {
        self.state.borrow_mut().flushes += 1;
    }

    fn close(&mut self) {
        self.state.borrow_mut().closes += 1;
    }

    fn close_with_error(&mut self, error: &RenderError) {
        let mut state = self.state.borrow_mut();
        state.closes += 1;
        state.error = Some(error.clone());
    }
}

/// Adapts any [`io::Write`] into a destination.
///
/// I/O failures are remembered and reported through
/// [`take_error`](Destination::take_error), which fails the render.
#[derive(Debug)]
pub struct WriterDestination<W: Write> {
    writer: W,
    error: Option<io::Error>,
    failed: bool,
}

impl<W: Write> WriterDestination<W> {
    /// Wraps `writer`.
    pub const fn new(writer: W) -> Self {
        Self {
            writer,
            error: None,
            failed: false,
        }
    }

    /// Returns the wrapped writer.
    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> Destination for WriterDestination<W> {
    fn write(&mut self, chunk: &[u8]) -> bool {
        if self.failed {
            return false;
        }
        match self.writer.write_all(chunk) {
            Ok(()) => true,
            Err(error) => {
                self.failed = true;
                self.error = Some(error);
                false
            }
        }
    }

    fn flush(&mut self) {
        if let Err(error) = self.writer.flush() {
            self.failed = true;
            self.error.get_or_insert(error);
        }
    }

    fn close(&mut self) {
        Destination::flush(self);
    }

    fn close_with_error(&mut self, error: &RenderError) {
        tracing::warn!(%error, "closing output after a fatal render error");
        Destination::flush(self);
    }

    fn take_error(&mut self) -> Option<RenderError> {
        self.error.take().map(RenderError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Broken;

    impl Write for Broken {
        fn write(&mut self, _: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "pipe closed"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn memory_budget_signals_backpressure() {
        let mut destination = MemoryDestination::with_budget(2);
        assert!(destination.write(b"a"));
        assert!(!destination.write(b"b"));
        destination.refill();
        assert!(destination.write(b"c"));
        assert_eq!(destination.text(), "abc");
        assert_eq!(destination.write_count(), 3);
    }

    #[test]
    fn writer_collects_bytes() {
        let mut destination = WriterDestination::new(Vec::new());
        assert!(destination.write(b"<p>"));
        destination.close();
        assert!(destination.take_error().is_none());
        assert_eq!(destination.into_inner(), b"<p>");
    }

    #[test]
    fn writer_reports_io_failure_once() {
        let mut destination = WriterDestination::new(Broken);
        assert!(!destination.write(b"x"));
        assert!(!destination.write(b"y"));
        let error = destination.take_error().expect("failure is reported");
        assert!(matches!(error, RenderError::Destination(_)));
        assert!(destination.take_error().is_none());
    }
}
