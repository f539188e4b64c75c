//! # Cascade Core
//!
//! The renderer-independent half of Cascade: the [`Node`] tree users build,
//! the [`Scope`] components render with, context propagation, stable
//! positional ids and the deferred values components suspend on.
//!
//! Nothing here knows about HTML or streaming. The `cascade` crate drives
//! these types to produce markup.
//!
//! ```
//! use cascade_core::{component, element, suspense, text, Node};
//!
//! let page: Node = element("main")
//!     .child(suspense(
//!         text("Loading..."),
//!         component("Greeting", |scope| {
//!             let id = scope.use_id();
//!             Ok(element("p").attr("id", id).child("Hello").into())
//!         }),
//!     ))
//!     .into();
//! assert!(!page.is_empty());
//! ```

#![no_std]
extern crate alloc;

#[cfg(test)]
extern crate std;

pub mod context;
pub mod deferred;
pub mod id;
pub mod node;
pub mod scope;

pub use context::{Context, ContextId, ContextSnapshot, ContextTable};
pub use deferred::{Deferred, Interrupt, Ping, ThenableState, Wakeable};
pub use id::TreeContext;
pub use node::{
    AttrValue, Attribute, Component, Element, Node, Provider, RenderFn, Suspense, await_node,
    component, element, fragment, provider, suspense, text,
};
pub use scope::Scope;
