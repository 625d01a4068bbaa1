//! Emission context: which dispatcher is currently emitting.
//!
//! Each thread keeps a stack of the dispatchers whose `emit` is in progress.
//! A slot can ask for the innermost one with [`current_emitter`], or for its
//! owning object with [`sender`]. Nested emissions push and pop in order, so
//! once a nested `emit` returns, the outer emitter is visible again.

use std::any::Any;
use std::cell::RefCell;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::dispatcher::Dispatcher;

thread_local! {
    static EMITTERS: RefCell<Vec<Dispatcher>> = const { RefCell::new(Vec::new()) };
}

/// Marks a dispatcher as emitting on this thread until dropped.
///
/// The guard is `!Send`: it must be dropped on the thread that created it.
pub(crate) struct EmittingGuard {
    _thread_bound: PhantomData<*const ()>,
}

impl EmittingGuard {
    pub(crate) fn enter(dispatcher: &Dispatcher) -> Self {
        EMITTERS.with_borrow_mut(|stack| stack.push(dispatcher.clone()));
        Self {
            _thread_bound: PhantomData,
        }
    }
}

impl Drop for EmittingGuard {
    fn drop(&mut self) {
        // Dropped outside the borrow: releasing the last handle may run slot
        // destructors, which are free to emit.
        let popped = EMITTERS
            .try_with(|stack| stack.borrow_mut().pop())
            .ok()
            .flatten();
        drop(popped);
    }
}

/// The dispatcher currently emitting on this thread, if any.
///
/// ```
/// use horizon_signal::{current_emitter, Dispatcher};
///
/// let dispatcher = Dispatcher::new(());
/// let observed = dispatcher.clone();
/// dispatcher
///     .connect(move || assert_eq!(current_emitter().as_ref(), Some(&observed)))
///     .unwrap();
///
/// assert!(current_emitter().is_none());
/// dispatcher.emit(()).unwrap();
/// ```
pub fn current_emitter() -> Option<Dispatcher> {
    EMITTERS.with_borrow(|stack| stack.last().cloned())
}

/// Number of emissions in progress on this thread.
pub fn emission_depth() -> usize {
    EMITTERS.with_borrow(|stack| stack.len())
}

/// The owning object of the dispatcher currently emitting, if any.
///
/// Returns `None` outside of an emission, for standalone dispatchers, and when
/// the owner has already been dropped.
pub fn sender() -> Option<Arc<dyn Any + Send + Sync>> {
    current_emitter()?.owner()
}

/// Like [`sender`], downcast to a concrete owner type.
pub fn sender_as<T: Any + Send + Sync>() -> Option<Arc<T>> {
    sender()?.downcast::<T>().ok()
}
