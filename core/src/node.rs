//! The declarative tree handed to the renderer.
//!
//! A [`Node`] is cheap to clone: every variant holding children is reference
//! counted, so the renderer can keep a node around in a suspended task and
//! re-render it later without copying the subtree.

use alloc::borrow::Cow;
use alloc::rc::Rc;
use alloc::string::{String, ToString};
use alloc::vec::Vec;
use core::any::Any;
use core::fmt::{self, Debug};

use crate::context::{Context, ContextId};
use crate::deferred::{Deferred, Interrupt};
use crate::scope::Scope;

/// Signature of a component's render function.
pub type RenderFn = dyn Fn(&mut Scope<'_>) -> Result<Node, Interrupt>;

/// A renderable tree.
#[derive(Clone, Default)]
pub enum Node {
    /// Renders nothing.
    #[default]
    Empty,
    /// Escaped text.
    Text(Rc<str>),
    /// A host element.
    Element(Rc<Element>),
    /// An ordered list of siblings.
    Fragment(Rc<[Node]>),
    /// A user component.
    Component(Component),
    /// Provides a context value to its child.
    Provider(Rc<Provider>),
    /// A suspense boundary.
    Suspense(Rc<Suspense>),
    /// A node that is still being produced.
    Await(Deferred<Node>),
}

impl Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => f.write_str("Empty"),
            Self::Text(text) => f.debug_tuple("Text").field(text).finish(),
            Self::Element(element) => element.fmt(f),
            Self::Fragment(children) => f.debug_list().entries(children.iter()).finish(),
            Self::Component(component) => component.fmt(f),
            Self::Provider(provider) => provider.fmt(f),
            Self::Suspense(suspense) => suspense.fmt(f),
            Self::Await(deferred) => f.debug_tuple("Await").field(deferred).finish(),
        }
    }
}

impl Node {
    /// Whether this node renders nothing.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }
}

/// An attribute value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttrValue {
    /// Written as `name="value"` after escaping.
    Text(String),
    /// `true` writes the bare attribute name, `false` omits it.
    Bool(bool),
}

impl From<&str> for AttrValue {
    fn from(value: &str) -> Self {
        Self::Text(value.into())
    }
}

impl From<String> for AttrValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<bool> for AttrValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

macro_rules! attr_from_number {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for AttrValue {
                fn from(value: $ty) -> Self {
                    Self::Text(value.to_string())
                }
            }
        )*
    };
}

attr_from_number!(i32, i64, u32, u64, usize, f64);

/// A single `name=value` pair on an element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    /// Attribute name as written.
    pub name: Cow<'static, str>,
    /// Attribute value.
    pub value: AttrValue,
}

/// A host element such as `div` or `svg`.
#[derive(Debug, Clone)]
pub struct Element {
    tag: Cow<'static, str>,
    attributes: Vec<Attribute>,
    children: Node,
    inner_html: Option<String>,
}

impl Element {
    /// Creates an element with no attributes and no children.
    #[must_use]
    pub fn new(tag: impl Into<Cow<'static, str>>) -> Self {
        Self {
            tag: tag.into(),
            attributes: Vec::new(),
            children: Node::Empty,
            inner_html: None,
        }
    }

    /// Adds an attribute.
    #[must_use]
    pub fn attr(mut self, name: impl Into<Cow<'static, str>>, value: impl Into<AttrValue>) -> Self {
        self.attributes.push(Attribute {
            name: name.into(),
            value: value.into(),
        });
        self
    }

    /// Sets a single child.
    #[must_use]
    pub fn child(mut self, child: impl Into<Node>) -> Self {
        self.children = child.into();
        self
    }

    /// Sets a list of children. Each child gets its own identity slot.
    #[must_use]
    pub fn children<I>(mut self, children: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<Node>,
    {
        self.children = fragment(children);
        self
    }

    /// Sets raw markup written verbatim in place of children.
    #[must_use]
    pub fn inner_html(mut self, html: impl Into<String>) -> Self {
        self.inner_html = Some(html.into());
        self
    }

    /// The tag name.
    #[must_use]
    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Attributes in insertion order.
    #[must_use]
    pub fn attributes(&self) -> &[Attribute] {
        &self.attributes
    }

    /// The child node.
    #[must_use]
    pub const fn child_node(&self) -> &Node {
        &self.children
    }

    /// Raw markup, if set.
    #[must_use]
    pub fn raw_html(&self) -> Option<&str> {
        self.inner_html.as_deref()
    }
}

/// A named render function.
#[derive(Clone)]
pub struct Component {
    name: Cow<'static, str>,
    render: Rc<RenderFn>,
}

impl Debug for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Component").field("name", &self.name).finish()
    }
}

impl Component {
    /// Wraps a render function.
    pub fn new<F>(name: impl Into<Cow<'static, str>>, render: F) -> Self
    where
        F: Fn(&mut Scope<'_>) -> Result<Node, Interrupt> + 'static,
    {
        Self {
            name: name.into(),
            render: Rc::new(render),
        }
    }

    /// The name used in logs and error reports.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Runs the render function once.
    ///
    /// # Errors
    ///
    /// Returns whatever interrupt the render function raised.
    pub fn render(&self, scope: &mut Scope<'_>) -> Result<Node, Interrupt> {
        (self.render)(scope)
    }
}

/// Makes a context value visible to a subtree.
pub struct Provider {
    context: ContextId,
    value: Rc<dyn Any>,
    child: Node,
}

impl Debug for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Provider")
            .field("context", &self.context)
            .field("child", &self.child)
            .finish_non_exhaustive()
    }
}

impl Provider {
    /// The provided context.
    #[must_use]
    pub const fn context(&self) -> ContextId {
        self.context
    }

    /// The provided value, type-erased.
    #[must_use]
    pub fn value(&self) -> Rc<dyn Any> {
        self.value.clone()
    }

    /// The subtree that sees the value.
    #[must_use]
    pub const fn child(&self) -> &Node {
        &self.child
    }
}

/// Content that may show a fallback while it is not ready.
#[derive(Debug)]
pub struct Suspense {
    /// Shown until the content is ready.
    pub fallback: Node,
    /// The real content.
    pub content: Node,
}

/// Creates a text node.
#[must_use]
pub fn text(text: impl Into<Rc<str>>) -> Node {
    Node::Text(text.into())
}

/// Creates an element builder.
#[must_use]
pub fn element(tag: impl Into<Cow<'static, str>>) -> Element {
    Element::new(tag)
}

/// Creates a list of siblings.
#[must_use]
pub fn fragment<I>(children: I) -> Node
where
    I: IntoIterator,
    I::Item: Into<Node>,
{
    Node::Fragment(children.into_iter().map(Into::into).collect())
}

/// Creates a component node.
pub fn component<F>(name: impl Into<Cow<'static, str>>, render: F) -> Node
where
    F: Fn(&mut Scope<'_>) -> Result<Node, Interrupt> + 'static,
{
    Node::Component(Component::new(name, render))
}

/// Creates a suspense boundary.
#[must_use]
pub fn suspense(fallback: impl Into<Node>, content: impl Into<Node>) -> Node {
    Node::Suspense(Rc::new(Suspense {
        fallback: fallback.into(),
        content: content.into(),
    }))
}

/// Provides `value` for `context` to `child`.
#[must_use]
pub fn provider<T: 'static>(context: &Context<T>, value: T, child: impl Into<Node>) -> Node {
    Node::Provider(Rc::new(Provider {
        context: context.id(),
        value: Rc::new(value),
        child: child.into(),
    }))
}

/// A node produced later.
#[must_use]
pub fn await_node(deferred: &Deferred<Node>) -> Node {
    Node::Await(deferred.clone())
}

impl From<&str> for Node {
    fn from(value: &str) -> Self {
        Self::Text(Rc::from(value))
    }
}

impl From<String> for Node {
    fn from(value: String) -> Self {
        Self::Text(Rc::from(value))
    }
}

impl From<Element> for Node {
    fn from(value: Element) -> Self {
        Self::Element(Rc::new(value))
    }
}

impl From<Component> for Node {
    fn from(value: Component) -> Self {
        Self::Component(value)
    }
}

impl From<Vec<Self>> for Node {
    fn from(value: Vec<Self>) -> Self {
        Self::Fragment(value.into())
    }
}

impl From<Deferred<Self>> for Node {
    fn from(value: Deferred<Self>) -> Self {
        Self::Await(value)
    }
}

impl<T: Into<Self>> From<Option<T>> for Node {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Empty, Into::into)
    }
}

macro_rules! node_from_number {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for Node {
                fn from(value: $ty) -> Self {
                    Self::Text(Rc::from(value.to_string()))
                }
            }
        )*
    };
}

node_from_number!(i32, i64, u32, u64, usize, f64);
