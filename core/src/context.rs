//! Ambient values that flow down the tree without being passed explicitly.
//!
//! Providers form a persistent chain of frames: pushing a provider creates a
//! new frame pointing at its parent, so any task can keep a cheap
//! [`ContextSnapshot`] of the chain that was active when it was created.
//! The [`ContextTable`] holds the values visible right now and can move from
//! one snapshot to another by popping and pushing only the frames that differ.

use alloc::collections::BTreeMap;
use alloc::rc::Rc;
use core::any::Any;
use core::fmt::{self, Debug};
use core::sync::atomic::{AtomicUsize, Ordering};

static NEXT_CONTEXT_ID: AtomicUsize = AtomicUsize::new(0);

/// Identifies a context independently of its value type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ContextId(usize);

/// A typed context handle with a default value.
///
/// Reading a context that no provider above has set yields the default.
pub struct Context<T> {
    id: ContextId,
    default: Rc<T>,
}

impl<T> Clone for Context<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            default: self.default.clone(),
        }
    }
}

impl<T: Debug> Debug for Context<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("id", &self.id)
            .field("default", &self.default)
            .finish()
    }
}

impl<T: 'static> Context<T> {
    /// Creates a new context, distinct from every other one.
    #[must_use]
    pub fn new(default: T) -> Self {
        Self {
            id: ContextId(NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed)),
            default: Rc::new(default),
        }
    }

    /// The identity of this context.
    #[must_use]
    pub const fn id(&self) -> ContextId {
        self.id
    }

    /// The value seen when no provider is active.
    #[must_use]
    pub fn default_value(&self) -> &T {
        &self.default
    }
}

struct Frame {
    parent: ContextSnapshot,
    depth: usize,
    context: ContextId,
    value: Rc<dyn Any>,
    // Value visible before this frame was pushed, restored on pop.
    previous: Option<Rc<dyn Any>>,
}

/// A handle to a position in the provider chain.
#[derive(Clone, Default)]
pub struct ContextSnapshot(Option<Rc<Frame>>);

impl Debug for ContextSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextSnapshot")
            .field("depth", &self.depth())
            .finish()
    }
}

impl ContextSnapshot {
    /// The empty chain.
    #[must_use]
    pub const fn root() -> Self {
        Self(None)
    }

    /// Number of providers in the chain.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.0.as_ref().map_or(0, |frame| frame.depth)
    }

    /// Whether both handles point at the same frame.
    #[must_use]
    pub fn same_as(&self, other: &Self) -> bool {
        match (&self.0, &other.0) {
            (None, None) => true,
            (Some(a), Some(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }

    fn parent(&self) -> Option<Self> {
        self.0.as_ref().map(|frame| frame.parent.clone())
    }
}

/// The set of context values currently visible to rendering code.
#[derive(Default)]
pub struct ContextTable {
    values: BTreeMap<ContextId, Rc<dyn Any>>,
    active: ContextSnapshot,
}

impl Debug for ContextTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextTable")
            .field("provided", &self.values.len())
            .field("active", &self.active)
            .finish()
    }
}

impl ContextTable {
    /// Creates a table with nothing provided.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads the current value of `context`, falling back to its default.
    #[must_use]
    pub fn read<'a, T: 'static>(&'a self, context: &'a Context<T>) -> &'a T {
        self.values
            .get(&context.id)
            .and_then(|value| value.downcast_ref::<T>())
            .unwrap_or(&context.default)
    }

    /// The chain currently applied to this table.
    #[must_use]
    pub const fn active(&self) -> &ContextSnapshot {
        &self.active
    }

    /// Provides `value` for `context` until the matching [`pop`](Self::pop).
    pub fn push<T: 'static>(&mut self, context: &Context<T>, value: T) -> ContextSnapshot {
        self.push_erased(context.id, Rc::new(value))
    }

    /// Type-erased form of [`push`](Self::push).
    pub fn push_erased(&mut self, context: ContextId, value: Rc<dyn Any>) -> ContextSnapshot {
        let frame = Frame {
            parent: self.active.clone(),
            depth: self.active.depth() + 1,
            context,
            previous: self.values.get(&context).cloned(),
            value,
        };
        self.apply(&frame);
        self.active = ContextSnapshot(Some(Rc::new(frame)));
        self.active.clone()
    }

    /// Removes the innermost provider. Does nothing on the empty chain.
    pub fn pop(&mut self) -> ContextSnapshot {
        if let Some(frame) = self.active.0.clone() {
            Self::unapply(&mut self.values, &frame);
            self.active = frame.parent.clone();
        }
        self.active.clone()
    }

    /// Moves the table to `next`, touching only the frames that differ.
    ///
    /// Returns the number of frames popped plus pushed.
    pub fn switch_to(&mut self, next: &ContextSnapshot) -> usize {
        if self.active.same_as(next) {
            return 0;
        }

        let mut operations = 0;
        let mut current = self.active.clone();
        let mut target = next.clone();
        let mut to_push = alloc::vec::Vec::new();

        while current.depth() > target.depth() {
            if let Some(frame) = &current.0 {
                Self::unapply(&mut self.values, frame);
            }
            current = current.parent().unwrap_or_default();
            operations += 1;
        }
        while target.depth() > current.depth() {
            to_push.push(target.clone());
            target = target.parent().unwrap_or_default();
        }
        while !current.same_as(&target) {
            if let Some(frame) = &current.0 {
                Self::unapply(&mut self.values, frame);
            }
            current = current.parent().unwrap_or_default();
            operations += 1;
            to_push.push(target.clone());
            target = target.parent().unwrap_or_default();
        }
        for snapshot in to_push.iter().rev() {
            if let Some(frame) = &snapshot.0 {
                self.apply(frame);
            }
            operations += 1;
        }

        self.active = next.clone();
        operations
    }

    fn apply(&mut self, frame: &Frame) {
        self.values.insert(frame.context, frame.value.clone());
    }

    fn unapply(values: &mut BTreeMap<ContextId, Rc<dyn Any>>, frame: &Frame) {
        match &frame.previous {
            Some(previous) => {
                values.insert(frame.context, previous.clone());
            }
            None => {
                values.remove(&frame.context);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_when_not_provided() {
        let theme = Context::new("light");
        let table = ContextTable::new();
        assert_eq!(*table.read(&theme), "light");
    }

    #[test]
    fn push_and_pop_restore_previous_value() {
        let theme = Context::new("light");
        let mut table = ContextTable::new();
        table.push(&theme, "dark");
        table.push(&theme, "blue");
        assert_eq!(*table.read(&theme), "blue");
        table.pop();
        assert_eq!(*table.read(&theme), "dark");
        table.pop();
        assert_eq!(*table.read(&theme), "light");
        assert_eq!(table.pop().depth(), 0);
    }

    #[test]
    fn switch_to_sibling_pops_and_pushes_only_the_difference() {
        let a = Context::new(0u32);
        let b = Context::new(0u32);
        let mut table = ContextTable::new();

        let shared = table.push(&a, 1);
        let left = table.push(&b, 2);
        table.pop();
        let right = table.push(&b, 3);
        assert_eq!(*table.read(&b), 3);

        assert_eq!(table.switch_to(&left), 2);
        assert_eq!(*table.read(&a), 1);
        assert_eq!(*table.read(&b), 2);

        assert_eq!(table.switch_to(&shared), 1);
        assert_eq!(*table.read(&b), 0);

        assert_eq!(table.switch_to(&right), 1);
        assert_eq!(*table.read(&b), 3);
        assert_eq!(table.switch_to(&right), 0);
    }

    #[test]
    fn switch_between_unrelated_chains() {
        let a = Context::new("none");
        let mut table = ContextTable::new();
        table.push(&a, "x");
        let deep = table.push(&a, "y");
        table.switch_to(&ContextSnapshot::root());
        assert_eq!(*table.read(&a), "none");

        let other = table.push(&a, "z");
        assert_eq!(table.switch_to(&deep), 3);
        assert_eq!(*table.read(&a), "y");
        assert_eq!(table.switch_to(&other), 3);
        assert_eq!(*table.read(&a), "z");
    }
}
