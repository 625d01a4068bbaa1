//! Per-instance dispatchers.
//!
//! A [`Dispatcher`] holds the live subscriber list for one channel on one
//! owning object. It checks compatibility when a slot connects, delivers
//! emissions in connection order, prunes slots whose receiver has been
//! dropped, and can be temporarily blocked.
//!
//! Dispatchers are usually obtained from a [`Channel`](crate::Channel) bound
//! to an owner, but can also be created standalone:
//!
//! ```
//! use std::sync::Arc;
//! use parking_lot::Mutex;
//! use horizon_signal::{Dispatcher, Signature};
//!
//! let value_changed = Dispatcher::new(Signature::of::<(i32,)>());
//! let log = Arc::new(Mutex::new(Vec::new()));
//!
//! let log_clone = log.clone();
//! value_changed.connect(move || log_clone.lock().push("f()".to_string())).unwrap();
//! let log_clone = log.clone();
//! value_changed.connect(move |x: i32| log_clone.lock().push(format!("g({x})"))).unwrap();
//!
//! value_changed.emit((42,)).unwrap();
//! assert_eq!(*log.lock(), vec!["f()", "g(42)"]);
//! ```
//!
//! # Re-entrancy
//!
//! No lock is held while a slot runs. Slots may connect, disconnect, and emit
//! on any dispatcher, including the one currently delivering to them. The
//! subscriber list is walked live: a slot connected during an emission is
//! reached by that same emission, and a slot disconnected before its turn is
//! not called. Removing the running or an earlier slot never causes a later
//! one to be skipped.

use std::any::Any;
use std::borrow::Cow;
use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use slotmap::{new_key_type, SlotMap};

use crate::args::IntoArgs;
use crate::callback::{Callback, IntoCallback};
use crate::context::EmittingGuard;
use crate::error::{Result, SignalError};
use crate::signature::{
    by_descending_len, IntoSignatures, MismatchList, Signature, SignatureList, SignatureMismatch,
};

new_key_type! {
    /// Identifies one subscription on a dispatcher.
    ///
    /// Returned by [`Dispatcher::connect`]; valid until that subscription is
    /// removed.
    pub struct SubscriptionId;
}

/// How [`Dispatcher::connect`] treats a slot that is already connected.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Unique {
    /// Connect again; the slot will be invoked once per subscription.
    #[default]
    Allow,
    /// Keep the existing subscription and return its id.
    Ignore,
    /// Fail with [`SignalError::DuplicateSubscription`].
    Error,
}

/// Options for [`Dispatcher::connect_with`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ConnectOptions {
    /// Compare the slot's declared parameter types against the signatures.
    pub check_types: bool,
    /// Duplicate handling.
    pub unique: Unique,
}

impl ConnectOptions {
    /// Default options: no type checking, duplicates allowed.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable or disable parameter type checking.
    pub fn check_types(mut self, check_types: bool) -> Self {
        self.check_types = check_types;
        self
    }

    /// Set duplicate handling.
    pub fn unique(mut self, unique: Unique) -> Self {
        self.unique = unique;
        self
    }
}

/// What [`Dispatcher::emit`] does when a slot fails.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum EmitPolicy {
    /// Return the error immediately; later slots are not invoked.
    #[default]
    FailFast,
    /// Log the error, keep delivering, and return the first error once every
    /// slot has run.
    ContinueOnError,
}

struct Subscription {
    callback: Callback,
    /// Maximum number of emitted arguments passed to the callback.
    arity: usize,
}

/// Subscriptions in connection order.
#[derive(Default)]
struct Subscriptions {
    storage: SlotMap<SubscriptionId, Subscription>,
    order: Vec<SubscriptionId>,
}

impl Subscriptions {
    fn push(&mut self, subscription: Subscription) -> SubscriptionId {
        let id = self.storage.insert(subscription);
        self.order.push(id);
        id
    }

    fn position(&self, callback: &Callback) -> Option<usize> {
        self.order
            .iter()
            .position(|id| self.storage[*id].callback == *callback)
    }

    fn remove_at(&mut self, position: usize) -> Option<Subscription> {
        let id = self.order.remove(position);
        self.storage.remove(id)
    }

    fn remove_id(&mut self, id: SubscriptionId) -> Option<Subscription> {
        let removed = self.storage.remove(id)?;
        self.order.retain(|entry| *entry != id);
        Some(removed)
    }

    /// First subscription not yet visited, starting after `last` when it is
    /// still connected. `hint` is where `last` was found previously.
    fn next_unvisited(
        &self,
        last: Option<SubscriptionId>,
        hint: usize,
        visited: &HashSet<SubscriptionId>,
    ) -> Option<(usize, SubscriptionId)> {
        let start = match last {
            None => 0,
            Some(id) if self.order.get(hint) == Some(&id) => hint + 1,
            Some(id) => self
                .order
                .iter()
                .position(|entry| *entry == id)
                .map_or(0, |position| position + 1),
        };
        self.order
            .iter()
            .enumerate()
            .skip(start)
            .find(|(_, id)| !visited.contains(id))
            .map(|(position, id)| (position, *id))
    }
}

struct Inner {
    signatures: Arc<[Signature]>,
    name: Option<Cow<'static, str>>,
    owner: Option<Weak<dyn Any + Send + Sync>>,
    owner_type: Option<&'static str>,
    subscriptions: Mutex<Subscriptions>,
    blocked: AtomicBool,
    continue_on_error: AtomicBool,
}

/// The live subscriber list of one channel on one owner.
///
/// `Dispatcher` is a cheap handle: clones share the same subscriptions.
/// Equality is identity.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<Inner>,
}

static_assertions::assert_impl_all!(Dispatcher: Send, Sync, Clone);

impl Dispatcher {
    /// Create a standalone dispatcher with no owner.
    ///
    /// See [`IntoSignatures`] for how `signatures` is interpreted.
    pub fn new(signatures: impl IntoSignatures) -> Self {
        Self::from_parts(signatures.into_signatures().into(), None, None, None)
    }

    /// Create a standalone dispatcher with a name used in diagnostics.
    pub fn with_name(signatures: impl IntoSignatures, name: impl Into<Cow<'static, str>>) -> Self {
        Self::from_parts(
            signatures.into_signatures().into(),
            Some(name.into()),
            None,
            None,
        )
    }

    pub(crate) fn from_parts(
        signatures: Arc<[Signature]>,
        name: Option<Cow<'static, str>>,
        owner: Option<Weak<dyn Any + Send + Sync>>,
        owner_type: Option<&'static str>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                signatures,
                name,
                owner,
                owner_type,
                subscriptions: Mutex::new(Subscriptions::default()),
                blocked: AtomicBool::new(false),
                continue_on_error: AtomicBool::new(false),
            }),
        }
    }

    /// The channel name, if known.
    pub fn name(&self) -> Option<&str> {
        self.inner.name.as_deref()
    }

    /// The accepted signatures, in declaration order.
    pub fn signatures(&self) -> &[Signature] {
        &self.inner.signatures
    }

    /// The owning object, if this dispatcher is bound and the owner is alive.
    pub fn owner(&self) -> Option<Arc<dyn Any + Send + Sync>> {
        self.inner.owner.as_ref()?.upgrade()
    }

    /// Whether this dispatcher was created for an owner.
    pub fn is_bound(&self) -> bool {
        self.inner.owner.is_some()
    }

    /// The current emission policy.
    pub fn policy(&self) -> EmitPolicy {
        if self.inner.continue_on_error.load(Ordering::Acquire) {
            EmitPolicy::ContinueOnError
        } else {
            EmitPolicy::FailFast
        }
    }

    /// Change the emission policy.
    pub fn set_policy(&self, policy: EmitPolicy) {
        self.inner.continue_on_error.store(
            policy == EmitPolicy::ContinueOnError,
            Ordering::Release,
        );
    }

    /// Connect a slot with default [`ConnectOptions`].
    pub fn connect<M>(&self, slot: impl IntoCallback<M>) -> Result<SubscriptionId> {
        self.connect_with(slot, ConnectOptions::default())
    }

    /// Connect a slot.
    ///
    /// The slot is compatible with a signature when it requires no more
    /// positional arguments than the signature provides and, with
    /// `check_types`, each typed parameter is a subtype of the signature's
    /// type at that position. Signatures are tried from the most parameters to
    /// the fewest, so the slot receives as many arguments as it can take.
    ///
    /// # Errors
    ///
    /// - [`SignalError::InvalidCallback`] for a method slot whose receiver is
    ///   already gone, or a slot with an impossible arity range.
    /// - [`SignalError::DuplicateSubscription`] with [`Unique::Error`] when
    ///   the slot is already connected.
    /// - [`SignalError::IncompatibleSignature`] when no signature accepts the
    ///   slot.
    pub fn connect_with<M>(
        &self,
        slot: impl IntoCallback<M>,
        options: ConnectOptions,
    ) -> Result<SubscriptionId> {
        let callback = slot.into_callback();

        if !callback.arity().is_valid() {
            return Err(SignalError::invalid_callback(
                callback.name(),
                format!(
                    "requires at least {} arguments but accepts at most {:?}",
                    callback.arity().min(),
                    callback.arity().max()
                ),
            ));
        }
        if !callback.is_alive() {
            return Err(SignalError::invalid_callback(
                callback.name(),
                "the receiver has already been dropped",
            ));
        }

        if options.unique != Unique::Allow {
            let subscriptions = self.inner.subscriptions.lock();
            if let Some(position) = subscriptions.position(&callback) {
                if options.unique == Unique::Error {
                    return Err(SignalError::DuplicateSubscription {
                        callback: callback.name().to_string(),
                    });
                }
                return Ok(subscriptions.order[position]);
            }
        }

        let arity = self.match_signature(&callback, options.check_types)?;
        tracing::trace!(
            target: "horizon_signal::dispatcher",
            dispatcher = ?self,
            slot = callback.name(),
            arity,
            "connected slot"
        );
        Ok(self
            .inner
            .subscriptions
            .lock()
            .push(Subscription { callback, arity }))
    }

    /// Connect a slot that is disconnected again when the returned guard drops.
    pub fn connect_scoped<M>(&self, slot: impl IntoCallback<M>) -> Result<ScopedConnection> {
        let id = self.connect(slot)?;
        Ok(ScopedConnection {
            dispatcher: Arc::downgrade(&self.inner),
            id,
        })
    }

    /// Find the first compatible signature and return how many arguments the
    /// callback will receive through it.
    fn match_signature(&self, callback: &Callback, check_types: bool) -> Result<usize> {
        let mut attempts = Vec::new();
        for signature in by_descending_len(&self.inner.signatures) {
            match signature.check(callback.arity(), callback.param_types(), check_types) {
                Ok(()) => return Ok(callback.arity().clamp(signature.len())),
                Err(reason) => attempts.push(SignatureMismatch {
                    signature: signature.clone(),
                    reason,
                }),
            }
        }

        tracing::debug!(
            target: "horizon_signal::dispatcher",
            dispatcher = ?self,
            slot = callback.name(),
            attempts = attempts.len(),
            "rejected incompatible slot"
        );
        Err(SignalError::IncompatibleSignature {
            callback: callback.name().to_string(),
            arity: callback.arity(),
            attempts: MismatchList(attempts),
            accepted: SignatureList(self.inner.signatures.to_vec()),
        })
    }

    /// Disconnect a slot.
    ///
    /// With `None`, every subscription is removed. Otherwise only the first
    /// subscription equal to `slot` is removed, even if it was connected
    /// several times.
    ///
    /// # Errors
    ///
    /// [`SignalError::NotConnected`] when `slot` is not connected and
    /// `missing_ok` is false.
    pub fn disconnect(&self, slot: Option<&Callback>, missing_ok: bool) -> Result<()> {
        let Some(callback) = slot else {
            self.disconnect_all();
            return Ok(());
        };

        let removed = {
            let mut subscriptions = self.inner.subscriptions.lock();
            subscriptions
                .position(callback)
                .and_then(|position| subscriptions.remove_at(position))
        };

        match removed {
            Some(subscription) => {
                tracing::trace!(
                    target: "horizon_signal::dispatcher",
                    dispatcher = ?self,
                    slot = callback.name(),
                    "disconnected slot"
                );
                drop(subscription);
                Ok(())
            }
            None if missing_ok => Ok(()),
            None => Err(SignalError::NotConnected {
                callback: callback.name().to_string(),
            }),
        }
    }

    /// Remove one subscription by id.
    ///
    /// Returns `true` if it was connected.
    pub fn disconnect_id(&self, id: SubscriptionId) -> bool {
        let removed = self.inner.subscriptions.lock().remove_id(id);
        removed.is_some()
    }

    /// Remove every subscription.
    pub fn disconnect_all(&self) {
        let removed = std::mem::take(&mut *self.inner.subscriptions.lock());
        tracing::trace!(
            target: "horizon_signal::dispatcher",
            dispatcher = ?self,
            count = removed.order.len(),
            "disconnected all slots"
        );
        drop(removed);
    }

    /// Whether `slot` is connected.
    pub fn contains(&self, slot: &Callback) -> bool {
        self.inner.subscriptions.lock().position(slot).is_some()
    }

    /// Number of subscriptions, including ones whose receiver has been
    /// dropped but which have not been pruned yet.
    pub fn len(&self) -> usize {
        self.inner.subscriptions.lock().order.len()
    }

    /// Whether there are no subscriptions.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The connected callbacks, in connection order.
    pub fn callbacks(&self) -> Vec<Callback> {
        let subscriptions = self.inner.subscriptions.lock();
        subscriptions
            .order
            .iter()
            .map(|id| subscriptions.storage[*id].callback.clone())
            .collect()
    }

    /// Set or clear suppression of emissions.
    ///
    /// Prefer [`blocked`](Self::blocked), which restores the previous state.
    pub fn block(&self, blocked: bool) {
        self.inner.blocked.store(blocked, Ordering::SeqCst);
    }

    /// Whether emissions are currently suppressed.
    pub fn is_blocked(&self) -> bool {
        self.inner.blocked.load(Ordering::SeqCst)
    }

    /// Suppress emissions until the returned guard is dropped.
    ///
    /// The previous suppression state is restored on drop, also when
    /// unwinding, so guards nest correctly.
    ///
    /// ```
    /// use horizon_signal::Dispatcher;
    ///
    /// let dispatcher = Dispatcher::new(());
    /// {
    ///     let _guard = dispatcher.blocked();
    ///     assert!(dispatcher.is_blocked());
    /// }
    /// assert!(!dispatcher.is_blocked());
    /// ```
    pub fn blocked(&self) -> BlockGuard {
        let previous = self.inner.blocked.swap(true, Ordering::SeqCst);
        BlockGuard {
            dispatcher: self.clone(),
            previous,
        }
    }

    /// Emit, invoking every live slot in connection order.
    ///
    /// Each slot receives the leading arguments it can accept; the rest are
    /// dropped. Method slots whose receiver has been dropped are skipped and
    /// removed once the pass ends. Nothing happens while the dispatcher is
    /// blocked.
    ///
    /// The subscription list may change while slots run. The walk resumes
    /// after the slot that just ran, so disconnecting it (or any earlier slot)
    /// never skips a later one. Slots disconnected before their turn are not
    /// called; slots connected during the pass are called at the end of it.
    /// Each subscription runs at most once per emission.
    ///
    /// While slots run, this dispatcher is the thread's
    /// [`current_emitter`](crate::current_emitter).
    ///
    /// # Errors
    ///
    /// A slot that returns an error, or cannot receive the emitted arguments,
    /// produces [`SignalError::SlotFailed`] or [`SignalError::ArgumentType`].
    /// Under [`EmitPolicy::FailFast`] the remaining slots are skipped; under
    /// [`EmitPolicy::ContinueOnError`] they still run and the first error is
    /// returned at the end. Panics in slots propagate unchanged.
    #[tracing::instrument(skip_all, target = "horizon_signal::dispatcher", level = "trace")]
    pub fn emit(&self, args: impl IntoArgs) -> Result<()> {
        if self.is_blocked() {
            tracing::trace!(target: "horizon_signal::dispatcher", "dispatcher blocked, skipping emit");
            return Ok(());
        }

        let args = args.into_args();
        let policy = self.policy();
        let _emitting = EmittingGuard::enter(self);

        let mut dead = Vec::new();
        let mut first_error = None;
        let mut visited = HashSet::new();
        let mut last = None;
        let mut hint = 0;

        loop {
            let (id, callback, arity) = {
                let subscriptions = self.inner.subscriptions.lock();
                let Some((position, id)) = subscriptions.next_unvisited(last, hint, &visited)
                else {
                    break;
                };
                hint = position;
                let subscription = &subscriptions.storage[id];
                (id, subscription.callback.clone(), subscription.arity)
            };
            visited.insert(id);
            last = Some(id);

            let count = arity.min(args.len());
            match callback.invoke(&args[..count]) {
                None => dead.push(id),
                Some(Ok(())) => {}
                Some(Err(err)) => match policy {
                    EmitPolicy::FailFast => {
                        self.prune(dead);
                        return Err(err);
                    }
                    EmitPolicy::ContinueOnError => {
                        tracing::warn!(
                            target: "horizon_signal::dispatcher",
                            dispatcher = ?self,
                            error = %err,
                            "slot failed during emission"
                        );
                        first_error.get_or_insert(err);
                    }
                },
            }
        }

        self.prune(dead);
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Remove subscriptions whose receiver was found dropped.
    fn prune(&self, dead: Vec<SubscriptionId>) {
        if dead.is_empty() {
            return;
        }
        let removed: Vec<Subscription> = {
            let mut subscriptions = self.inner.subscriptions.lock();
            dead.into_iter()
                .filter_map(|id| subscriptions.remove_id(id))
                .collect()
        };
        tracing::trace!(
            target: "horizon_signal::dispatcher",
            dispatcher = ?self,
            count = removed.len(),
            "pruned dead slots"
        );
    }
}

impl PartialEq for Dispatcher {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Dispatcher {}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("<Dispatcher ")?;
        if let Some(name) = self.name() {
            write!(f, "'{name}' ")?;
        }
        match (self.inner.owner_type, self.owner().is_some()) {
            (Some(owner), true) => write!(f, "on {owner}>"),
            (Some(owner), false) => write!(f, "on dropped {owner}>"),
            (None, _) => f.write_str("standalone>"),
        }
    }
}

/// Restores a dispatcher's previous suppression state when dropped.
///
/// Created by [`Dispatcher::blocked`].
#[must_use = "emissions are only blocked while the guard is alive"]
pub struct BlockGuard {
    dispatcher: Dispatcher,
    previous: bool,
}

impl Drop for BlockGuard {
    fn drop(&mut self) {
        self.dispatcher.block(self.previous);
    }
}

/// A subscription that is removed when this guard is dropped.
///
/// Created by [`Dispatcher::connect_scoped`]. The guard does not keep the
/// dispatcher alive.
///
/// ```
/// use std::sync::Arc;
/// use std::sync::atomic::{AtomicI32, Ordering};
/// use horizon_signal::{Dispatcher, Signature};
///
/// let dispatcher = Dispatcher::new(Signature::of::<(i32,)>());
/// let total = Arc::new(AtomicI32::new(0));
/// {
///     let total_clone = total.clone();
///     let _guard = dispatcher
///         .connect_scoped(move |n: i32| {
///             total_clone.fetch_add(n, Ordering::SeqCst);
///         })
///         .unwrap();
///     dispatcher.emit((42,)).unwrap();
/// }
/// dispatcher.emit((43,)).unwrap();
/// assert_eq!(total.load(Ordering::SeqCst), 42);
/// ```
#[must_use = "the slot is disconnected as soon as the guard is dropped"]
pub struct ScopedConnection {
    dispatcher: Weak<Inner>,
    id: SubscriptionId,
}

impl ScopedConnection {
    /// The id of the guarded subscription.
    pub fn id(&self) -> SubscriptionId {
        self.id
    }
}

impl Drop for ScopedConnection {
    fn drop(&mut self) {
        if let Some(inner) = self.dispatcher.upgrade() {
            let removed = inner.subscriptions.lock().remove_id(self.id);
            drop(removed);
        }
    }
}
