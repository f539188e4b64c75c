//! Async adapter: a render as a [`Stream`] of byte chunks.

use core::pin::Pin;
use core::task::{Context, Poll};

use async_channel::{Receiver, Sender};
use cascade_core::Node;
use futures::{Stream, StreamExt};
use pin_project_lite::pin_project;

use crate::destination::Destination;
use crate::error::RenderError;
use crate::options::RenderOptions;
use crate::request::{Callbacks, Request, RequestStatus};

/// Queued chunks at which the stream asks the renderer to pause.
pub const DEFAULT_HIGH_WATER_MARK: usize = 16;

type Chunk = Result<Vec<u8>, RenderError>;

/// Forwards writes into a channel.
#[derive(Debug)]
struct ChannelDestination {
    sender: Sender<Chunk>,
    high_water_mark: usize,
}

impl Destination for ChannelDestination {
    fn write(&mut self, chunk: &[u8]) -> bool {
        if self.sender.try_send(Ok(chunk.to_vec())).is_err() {
            return false;
        }
        self.sender.len() < self.high_water_mark
    }

    fn close(&mut self) {
        self.sender.close();
    }

    fn close_with_error(&mut self, error: &RenderError) {
        let _ = self.sender.try_send(Err(error.clone()));
        self.sender.close();
    }
}

#[derive(Debug)]
struct AbortOnDrop(Request);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        if self.0.status() != RequestStatus::Closed {
            self.0.abort(Some("The render stream was dropped before it finished."));
        }
    }
}

pin_project! {
    /// The output of [`render_to_stream`].
    ///
    /// Each item is one chunk handed to the destination. Polling an empty
    /// stream resumes a render that paused for backpressure. Dropping the
    /// stream before it ends aborts the render.
    #[derive(Debug)]
    pub struct RenderStream {
        #[pin]
        chunks: Receiver<Chunk>,
        all_ready: Receiver<Result<(), RenderError>>,
        request: AbortOnDrop,
    }
}

impl RenderStream {
    /// The underlying request.
    #[must_use]
    pub const fn request(&self) -> &Request {
        &self.request.0
    }

    /// Resolves once every task finished, or fails with the fatal error.
    ///
    /// # Errors
    ///
    /// Returns the error that ended the render, or [`RenderError::Closed`] if
    /// it ended without finishing.
    pub async fn all_ready(&self) -> Result<(), RenderError> {
        match self.all_ready.recv().await {
            Ok(result) => result,
            Err(_) => Err(RenderError::Closed("render ended before all tasks finished".into())),
        }
    }
}

impl Stream for RenderStream {
    type Item = Chunk;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.project();
        if this.chunks.is_empty() && !this.chunks.is_closed() {
            this.request.0.pull();
        }
        this.chunks.poll_next(cx)
    }
}

/// Starts a render and resolves once its shell is ready.
///
/// # Errors
///
/// Fails with the error that prevented the shell from rendering.
pub async fn render_to_stream(
    node: impl Into<Node>,
    options: RenderOptions,
) -> Result<RenderStream, RenderError> {
    render_to_stream_with(node, options, Callbacks::new()).await
}

/// Like [`render_to_stream`], with caller callbacks chained in front of the
/// stream's own.
///
/// # Errors
///
/// Fails with the error that prevented the shell from rendering.
pub async fn render_to_stream_with(
    node: impl Into<Node>,
    options: RenderOptions,
    callbacks: Callbacks,
) -> Result<RenderStream, RenderError> {
    let (shell_sender, shell) = async_channel::bounded::<Result<(), RenderError>>(1);
    let (ready_sender, all_ready) = async_channel::bounded::<Result<(), RenderError>>(1);
    let (chunk_sender, chunks) = async_channel::unbounded();

    let Callbacks {
        on_error,
        on_shell_ready,
        on_shell_error,
        on_all_ready,
        on_fatal_error,
    } = callbacks;

    let shell_ok = shell_sender.clone();
    let ready_ok = ready_sender.clone();
    let callbacks = Callbacks {
        on_error,
        on_shell_ready: Some(Box::new(move || {
            if let Some(callback) = on_shell_ready {
                callback();
            }
            let _ = shell_ok.try_send(Ok(()));
        })),
        on_shell_error: Some(Box::new(move |error: &RenderError| {
            if let Some(callback) = on_shell_error {
                callback(error);
            }
            let _ = shell_sender.try_send(Err(error.clone()));
        })),
        on_all_ready: Some(Box::new(move || {
            if let Some(callback) = on_all_ready {
                callback();
            }
            let _ = ready_ok.try_send(Ok(()));
        })),
        on_fatal_error: Some(Box::new(move |error: &RenderError| {
            if let Some(callback) = on_fatal_error {
                callback(error);
            }
            let _ = ready_sender.try_send(Err(error.clone()));
        })),
    };

    let request = Request::new(node, options, callbacks);
    let guard = AbortOnDrop(request.clone());
    request.start_work();
    request.start_flowing(ChannelDestination {
        sender: chunk_sender,
        high_water_mark: DEFAULT_HIGH_WATER_MARK,
    });

    match shell.recv().await {
        Ok(Ok(())) => Ok(RenderStream {
            chunks,
            all_ready,
            request: guard,
        }),
        Ok(Err(error)) => Err(error),
        Err(_) => Err(RenderError::Closed("render ended before the shell was ready".into())),
    }
}

/// Collects a whole render into one buffer.
///
/// # Errors
///
/// Fails if the shell fails or the render ends with a fatal error.
pub async fn render_to_vec(
    node: impl Into<Node>,
    options: RenderOptions,
) -> Result<Vec<u8>, RenderError> {
    let mut stream = render_to_stream(node, options).await?;
    let mut output = Vec::new();
    while let Some(chunk) = stream.next().await {
        output.extend_from_slice(&chunk?);
    }
    Ok(output)
}
