//! The handle a component receives while it renders.

use alloc::format;
use alloc::string::String;
use core::fmt::{self, Debug};

use crate::context::{Context, ContextTable};
use crate::deferred::{Deferred, Interrupt, ThenableState};
use crate::id::{TreeContext, to_base32};

/// Per-render access to ids, context values and deferred data.
pub struct Scope<'a> {
    tree: &'a TreeContext,
    contexts: &'a ContextTable,
    identifier_prefix: &'a str,
    thenables: &'a mut ThenableState,
    thenable_index: usize,
    local_ids: u32,
}

impl Debug for Scope<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope")
            .field("tree_id", &self.tree.tree_id())
            .field("local_ids", &self.local_ids)
            .field("thenable_index", &self.thenable_index)
            .finish_non_exhaustive()
    }
}

impl<'a> Scope<'a> {
    /// Creates a scope for one render attempt of one component.
    pub const fn new(
        tree: &'a TreeContext,
        contexts: &'a ContextTable,
        identifier_prefix: &'a str,
        thenables: &'a mut ThenableState,
    ) -> Self {
        Self {
            tree,
            contexts,
            identifier_prefix,
            thenables,
            thenable_index: 0,
            local_ids: 0,
        }
    }

    /// Returns an id that is stable for this position in the tree.
    ///
    /// The first call yields `:{prefix}R{tree id}:`, later calls in the same
    /// component append `H{n}` in base 32.
    pub fn use_id(&mut self) -> String {
        let local = self.local_ids;
        self.local_ids += 1;
        let tree_id = self.tree.tree_id();
        if local > 0 {
            format!(":{}R{}H{}:", self.identifier_prefix, tree_id, to_base32(local))
        } else {
            format!(":{}R{}:", self.identifier_prefix, tree_id)
        }
    }

    /// Reads the nearest provided value of `context`.
    #[must_use]
    pub fn read<'s, T: 'static>(&'s self, context: &'s Context<T>) -> &'s T {
        self.contexts.read(context)
    }

    /// Unwraps a deferred value, suspending while it is pending.
    ///
    /// The n-th call keeps returning the handle seen by the n-th call of the
    /// first attempt, so a retry observes the value that woke it.
    ///
    /// # Errors
    ///
    /// Returns [`Interrupt::Suspend`] while pending and [`Interrupt::Fail`]
    /// if the value was rejected.
    pub fn wait<T: Clone + 'static>(&mut self, deferred: &Deferred<T>) -> Result<T, Interrupt> {
        let index = self.thenable_index;
        self.thenable_index += 1;
        let tracked = self.thenables.track(index, deferred);
        match tracked.peek() {
            Some(Ok(value)) => Ok(value),
            Some(Err(error)) => Err(Interrupt::Fail(error)),
            None => Err(Interrupt::suspend(tracked)),
        }
    }

    /// Whether [`use_id`](Self::use_id) was called during this render.
    #[must_use]
    pub const fn did_use_id(&self) -> bool {
        self.local_ids > 0
    }

    /// The tree position this component renders at.
    #[must_use]
    pub const fn tree(&self) -> &TreeContext {
        self.tree
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_prefixed_and_numbered() {
        let tree = TreeContext::root().fork(3, 1);
        let contexts = ContextTable::new();
        let mut thenables = ThenableState::new();
        let mut scope = Scope::new(&tree, &contexts, "app-", &mut thenables);
        assert_eq!(scope.use_id(), ":app-R2:");
        assert_eq!(scope.use_id(), ":app-R2H1:");
        assert!(scope.did_use_id());
    }

    #[test]
    fn wait_suspends_then_returns_value_on_retry() {
        let tree = TreeContext::root();
        let contexts = ContextTable::new();
        let mut thenables = ThenableState::new();
        let data = Deferred::<u32>::new();

        let mut first = Scope::new(&tree, &contexts, "", &mut thenables);
        assert!(matches!(first.wait(&data), Err(Interrupt::Suspend(_))));

        data.resolve(9);
        // A fresh handle on retry still reads the first one.
        let mut retry = Scope::new(&tree, &contexts, "", &mut thenables);
        let value = retry.wait(&Deferred::<u32>::new()).expect("tracked value is settled");
        assert_eq!(value, 9);
    }

    #[test]
    fn read_falls_back_to_default() {
        let tree = TreeContext::root();
        let locale = Context::new("en");
        let mut contexts = ContextTable::new();
        let mut thenables = ThenableState::new();
        {
            let scope = Scope::new(&tree, &contexts, "", &mut thenables);
            assert_eq!(*scope.read(&locale), "en");
        }
        contexts.push(&locale, "fr");
        let scope = Scope::new(&tree, &contexts, "", &mut thenables);
        assert_eq!(*scope.read(&locale), "fr");
    }
}
