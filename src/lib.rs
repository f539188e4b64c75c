#![doc = include_str!("../README.md")]
#![allow(clippy::multiple_crate_versions)]
#![allow(clippy::future_not_send)]

extern crate alloc;

pub mod boundary;
pub mod destination;
/// Errors reported while rendering and streaming.
pub mod error;
pub mod format;
pub mod instructions;
pub mod markup;
pub mod options;
pub mod request;
pub mod segment;
pub mod stream;

mod flush;
mod render;
mod task;

#[doc(inline)]
pub use boundary::{BoundaryState, BoundaryStats};
#[doc(inline)]
pub use destination::{Destination, MemoryDestination, WriterDestination};
#[doc(inline)]
pub use error::RenderError;
#[doc(inline)]
pub use markup::{HtmlMarkup, Markup};
#[doc(inline)]
pub use options::{DEFAULT_PROGRESSIVE_CHUNK_SIZE, Namespace, RenderOptions, ScriptSource};
#[doc(inline)]
pub use request::{Callbacks, DEFAULT_ABORT_REASON, Request, RequestStats, RequestStatus};
#[doc(inline)]
pub use stream::{RenderStream, render_to_stream, render_to_stream_with, render_to_vec};

pub use cascade_core::{
    AttrValue, Attribute, Component, Context, ContextId, ContextSnapshot, ContextTable, Deferred,
    Element, Interrupt, Node, Ping, Provider, RenderFn, Scope, Suspense, ThenableState,
    TreeContext, Wakeable, await_node, component, element, fragment, provider, suspense, text,
};

/// Node builders and component helpers in one import.
pub mod prelude {
    pub use cascade_core::{
        Context, Deferred, Interrupt, Node, Scope, await_node, component, element, fragment,
        provider, suspense, text,
    };

    pub use crate::{Callbacks, RenderOptions, Request, render_to_stream};
}
