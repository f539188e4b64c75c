//! Single-threaded settle-once values and the signals components use to
//! suspend.
//!
//! A [`Deferred`] starts pending and is later fulfilled or rejected exactly
//! once. Anything implementing [`Wakeable`] can be handed to the renderer
//! inside [`Interrupt::Suspend`]; the renderer subscribes a ping and retries
//! the suspended work when the ping fires.

use alloc::boxed::Box;
use alloc::rc::Rc;
use alloc::vec::Vec;
use core::any::Any;
use core::cell::RefCell;
use core::fmt::{self, Debug};
use core::future::Future;

/// Callback fired once when a wakeable settles.
pub type Ping = Box<dyn FnOnce()>;

/// Something that will eventually settle and can notify a listener when it does.
pub trait Wakeable {
    /// Registers `ping`. If already settled, `ping` runs immediately.
    fn subscribe(&self, ping: Ping);
}

/// Why a component stopped before producing output.
pub enum Interrupt {
    /// Waiting on an unsettled value; retry once it settles.
    Suspend(Rc<dyn Wakeable>),
    /// The component failed.
    Fail(anyhow::Error),
}

impl Interrupt {
    /// Suspends on `wakeable`.
    pub fn suspend(wakeable: impl Wakeable + 'static) -> Self {
        Self::Suspend(Rc::new(wakeable))
    }

    /// Fails with a plain message.
    pub fn fail(message: impl fmt::Display + fmt::Debug + Send + Sync + 'static) -> Self {
        Self::Fail(anyhow::Error::msg(message))
    }
}

impl From<anyhow::Error> for Interrupt {
    fn from(error: anyhow::Error) -> Self {
        Self::Fail(error)
    }
}

impl Debug for Interrupt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Suspend(_) => f.write_str("Suspend"),
            Self::Fail(error) => f.debug_tuple("Fail").field(error).finish(),
        }
    }
}

enum State<T> {
    Pending(Vec<Ping>),
    Fulfilled(T),
    Rejected(Rc<anyhow::Error>),
}

/// A value that settles once, shared by every clone of the handle.
pub struct Deferred<T> {
    state: Rc<RefCell<State<T>>>,
}

impl<T> Clone for Deferred<T> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
        }
    }
}

impl<T> Default for Deferred<T> {
    fn default() -> Self {
        Self {
            state: Rc::new(RefCell::new(State::Pending(Vec::new()))),
        }
    }
}

impl<T> Debug for Deferred<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &*self.state.borrow() {
            State::Pending(listeners) => {
                return f
                    .debug_struct("Deferred")
                    .field("state", &"pending")
                    .field("listeners", &listeners.len())
                    .finish();
            }
            State::Fulfilled(_) => "fulfilled",
            State::Rejected(_) => "rejected",
        };
        f.debug_struct("Deferred").field("state", &state).finish()
    }
}

impl<T> Deferred<T> {
    /// Creates a pending value.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a value that is already fulfilled.
    #[must_use]
    pub fn resolved(value: T) -> Self {
        Self {
            state: Rc::new(RefCell::new(State::Fulfilled(value))),
        }
    }

    /// Creates a value that is already rejected.
    #[must_use]
    pub fn rejected(error: anyhow::Error) -> Self {
        Self {
            state: Rc::new(RefCell::new(State::Rejected(Rc::new(error)))),
        }
    }

    /// Fulfills the value. Returns `false` if it had already settled.
    pub fn resolve(&self, value: T) -> bool {
        self.settle(State::Fulfilled(value))
    }

    /// Rejects the value. Returns `false` if it had already settled.
    pub fn reject(&self, error: anyhow::Error) -> bool {
        self.settle(State::Rejected(Rc::new(error)))
    }

    /// Whether the value has settled either way.
    #[must_use]
    pub fn is_settled(&self) -> bool {
        !matches!(&*self.state.borrow(), State::Pending(_))
    }

    /// Whether both handles share the same state.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.state, &other.state)
    }

    fn settle(&self, next: State<T>) -> bool {
        let listeners = {
            let mut state = self.state.borrow_mut();
            if !matches!(&*state, State::Pending(_)) {
                return false;
            }
            match core::mem::replace(&mut *state, next) {
                State::Pending(listeners) => listeners,
                _ => Vec::new(),
            }
        };
        // Listeners may read this value again, so the borrow is released first.
        for listener in listeners {
            listener();
        }
        true
    }

    /// Settles with the output of `future` once it completes.
    pub async fn settle_with<F>(self, future: F)
    where
        F: Future<Output = anyhow::Result<T>>,
    {
        match future.await {
            Ok(value) => {
                self.resolve(value);
            }
            Err(error) => {
                self.reject(error);
            }
        }
    }
}

impl<T: Clone> Deferred<T> {
    /// Returns the outcome if settled.
    ///
    /// A rejection is reported as a fresh error carrying the original chain.
    #[must_use]
    pub fn peek(&self) -> Option<anyhow::Result<T>> {
        match &*self.state.borrow() {
            State::Pending(_) => None,
            State::Fulfilled(value) => Some(Ok(value.clone())),
            State::Rejected(error) => Some(Err(anyhow::anyhow!("{error:#}"))),
        }
    }
}

impl<T: 'static> Wakeable for Deferred<T> {
    fn subscribe(&self, ping: Ping) {
        let mut state = self.state.borrow_mut();
        if let State::Pending(listeners) = &mut *state {
            listeners.push(ping);
        } else {
            drop(state);
            ping();
        }
    }
}

/// Per-component record of the deferred values it waited on, in call order.
///
/// When a suspended component is retried, the n-th wait returns the same
/// handle as in the previous attempt, so values created during render are not
/// recreated on every retry.
#[derive(Default)]
pub struct ThenableState {
    used: Vec<Box<dyn Any>>,
}

impl Debug for ThenableState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThenableState")
            .field("tracked", &self.used.len())
            .finish()
    }
}

impl ThenableState {
    /// Creates an empty record.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the handle tracked at `index`, or records `deferred` there.
    pub fn track<T: 'static>(&mut self, index: usize, deferred: &Deferred<T>) -> Deferred<T> {
        if let Some(previous) = self
            .used
            .get(index)
            .and_then(|slot| slot.downcast_ref::<Deferred<T>>())
        {
            return previous.clone();
        }
        let slot: Box<dyn Any> = Box::new(deferred.clone());
        if index < self.used.len() {
            self.used[index] = slot;
        } else {
            self.used.push(slot);
        }
        deferred.clone()
    }

    /// Number of values tracked so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.used.len()
    }

    /// Whether nothing has been tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.used.is_empty()
    }
}
