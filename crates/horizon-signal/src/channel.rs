//! Channel descriptors.
//!
//! A [`Channel`] is declared once per event kind, typically as a static
//! generated by `#[derive(Channels)]`, and hands out one [`Dispatcher`] per
//! owning object. Instances never share subscribers.
//!
//! Where the dispatcher lives decides how long its slots (and whatever they
//! capture) stay alive:
//!
//! - A [`ChannelStore`] field inside the owner holds the owner's dispatchers,
//!   so they are dropped together with the owner. `#[derive(Channels)]` uses
//!   this.
//! - [`Channel::bind`] keeps dispatchers in a table on the channel itself, for
//!   owners that cannot carry a store. Entries of dropped owners are released
//!   by [`Channel::purge`] or by the periodic sweep in `bind`.
//!
//! ```
//! use std::sync::Arc;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use horizon_signal::{Channel, Signature};
//!
//! struct Slider;
//!
//! let value_changed = Channel::new(Signature::of::<(i32,)>()).named("value_changed");
//! let a = Arc::new(Slider);
//! let b = Arc::new(Slider);
//!
//! let hits = Arc::new(AtomicUsize::new(0));
//! let hits_clone = hits.clone();
//! value_changed
//!     .bind(&a)
//!     .connect(move |_v: i32| {
//!         hits_clone.fetch_add(1, Ordering::SeqCst);
//!     })
//!     .unwrap();
//!
//! value_changed.bind(&b).emit((1,)).unwrap();
//! assert_eq!(hits.load(Ordering::SeqCst), 0);
//! value_changed.bind(&a).emit((1,)).unwrap();
//! assert_eq!(hits.load(Ordering::SeqCst), 1);
//! ```

use std::any::Any;
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::dispatcher::{Dispatcher, EmitPolicy};
use crate::signature::{IntoSignatures, Signature, SignatureList};

/// Table size below which [`Channel::bind`] does not sweep.
const MIN_SWEEP_LEN: usize = 16;

struct Instance {
    owner: Weak<dyn Any + Send + Sync>,
    dispatcher: Dispatcher,
}

impl Instance {
    fn is_alive(&self) -> bool {
        self.owner.strong_count() > 0
    }
}

/// Dispatchers created by [`Channel::bind`], keyed by owner address.
///
/// A live owner's address is unique among live owners. A dead entry may share
/// its address with a new owner, so lookups check liveness.
#[derive(Default)]
struct Instances {
    map: HashMap<usize, Instance>,
    /// Sweep once the table reaches this size.
    sweep_at: usize,
}

impl Instances {
    /// Remove entries whose owner is gone, returning their dispatchers so they
    /// are dropped after the lock is released.
    fn sweep(&mut self) -> Vec<Dispatcher> {
        let dead: Vec<usize> = self
            .map
            .iter()
            .filter(|(_, instance)| !instance.is_alive())
            .map(|(key, _)| *key)
            .collect();
        let swept = dead
            .into_iter()
            .filter_map(|key| self.map.remove(&key))
            .map(|instance| instance.dispatcher)
            .collect();
        self.sweep_at = (self.map.len() * 2).max(MIN_SWEEP_LEN);
        swept
    }
}

/// Declares an event kind and its accepted signatures.
pub struct Channel {
    signatures: Arc<[Signature]>,
    name: Option<Cow<'static, str>>,
    policy: EmitPolicy,
    instances: Mutex<Instances>,
}

static_assertions::assert_impl_all!(Channel: Send, Sync);

impl Channel {
    /// Create a channel.
    ///
    /// See [`IntoSignatures`] for how `signatures` is interpreted.
    pub fn new(signatures: impl IntoSignatures) -> Self {
        Self {
            signatures: signatures.into_signatures().into(),
            name: None,
            policy: EmitPolicy::default(),
            instances: Mutex::new(Instances::default()),
        }
    }

    /// Set the name shown in diagnostics.
    pub fn named(mut self, name: impl Into<Cow<'static, str>>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the emission policy given to dispatchers created from now on.
    pub fn with_policy(mut self, policy: EmitPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// The channel name, if set.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// The accepted signatures, in declaration order.
    pub fn signatures(&self) -> &[Signature] {
        &self.signatures
    }

    /// The emission policy for new dispatchers.
    pub fn policy(&self) -> EmitPolicy {
        self.policy
    }

    /// The dispatcher for `owner`, created on first access and kept in this
    /// channel's table.
    ///
    /// The channel keeps only a weak reference to `owner`. Repeated calls with
    /// the same owner return handles to the same dispatcher. The table holds
    /// the dispatcher, and with it every connected slot, until the owner is
    /// dropped and the entry is swept; call [`purge`](Self::purge) to release
    /// them promptly. Owners that can carry a [`ChannelStore`] should use it
    /// instead.
    pub fn bind<T: Any + Send + Sync>(&self, owner: &Arc<T>) -> Dispatcher {
        let key = Arc::as_ptr(owner) as *const () as usize;
        let mut instances = self.instances.lock();

        if let Some(instance) = instances.map.get(&key)
            && instance.is_alive()
        {
            return instance.dispatcher.clone();
        }

        // Either absent or left behind by a dropped owner at the same address.
        let stale = instances.map.remove(&key).map(|instance| instance.dispatcher);
        let swept = if instances.map.len() >= instances.sweep_at {
            instances.sweep()
        } else {
            Vec::new()
        };

        let dispatcher = self.instantiate(owner);
        instances.map.insert(
            key,
            Instance {
                owner: dispatcher_owner(owner),
                dispatcher: dispatcher.clone(),
            },
        );
        drop(instances);

        tracing::trace!(
            target: "horizon_signal::channel",
            channel = self.name(),
            owner = std::any::type_name::<T>(),
            swept = swept.len() + usize::from(stale.is_some()),
            "created dispatcher"
        );
        drop(stale);
        drop(swept);
        dispatcher
    }

    /// A new dispatcher for `owner` that this channel does not keep.
    ///
    /// The caller decides where it lives; the subscriptions are dropped with
    /// the last handle. Each call returns a distinct dispatcher.
    pub fn instantiate<T: Any + Send + Sync>(&self, owner: &Arc<T>) -> Dispatcher {
        let dispatcher = Dispatcher::from_parts(
            self.signatures.clone(),
            self.name.clone(),
            Some(dispatcher_owner(owner)),
            Some(crate::callback::short_type_name::<T>()),
        );
        dispatcher.set_policy(self.policy);
        dispatcher
    }

    /// Drop the dispatchers of owners that no longer exist.
    ///
    /// Returns how many were removed. [`bind`](Self::bind) also sweeps, each
    /// time the table has doubled since the previous sweep.
    pub fn purge(&self) -> usize {
        let swept = self.instances.lock().sweep();
        let count = swept.len();
        if count > 0 {
            tracing::trace!(
                target: "horizon_signal::channel",
                channel = self.name(),
                count,
                "purged dispatchers of dropped owners"
            );
        }
        count
    }

    /// Number of owners with a dispatcher in this channel's table, including
    /// dropped ones not yet purged.
    pub fn instance_count(&self) -> usize {
        self.instances.lock().map.len()
    }

    /// See [`crate::current_emitter`].
    pub fn current_emitter() -> Option<Dispatcher> {
        crate::context::current_emitter()
    }

    /// See [`crate::sender`].
    pub fn sender() -> Option<Arc<dyn Any + Send + Sync>> {
        crate::context::sender()
    }
}

fn dispatcher_owner<T: Any + Send + Sync>(owner: &Arc<T>) -> Weak<dyn Any + Send + Sync> {
    let weak = Arc::downgrade(owner);
    let weak: Weak<dyn Any + Send + Sync> = weak;
    weak
}

/// Holds an owner's dispatchers, one per channel, inside the owner.
///
/// Dispatchers are created on first access and dropped with the store, so the
/// slots connected to them never outlive the owner. `#[derive(Channels)]`
/// expects exactly one field of this type and indexes it by channel
/// declaration order.
///
/// ```
/// use std::sync::Arc;
/// use horizon_signal::{Channel, ChannelStore};
///
/// struct Button {
///     channels: ChannelStore,
/// }
///
/// let clicked = Channel::new(()).named("clicked");
/// let button = Arc::new(Button { channels: ChannelStore::new() });
///
/// let dispatcher = button.channels.dispatcher(0, &clicked, &button);
/// assert_eq!(dispatcher, button.channels.dispatcher(0, &clicked, &button));
/// assert_eq!(button.channels.len(), 1);
/// ```
#[derive(Default)]
pub struct ChannelStore {
    slots: Mutex<Vec<Option<Dispatcher>>>,
}

static_assertions::assert_impl_all!(ChannelStore: Send, Sync);

impl ChannelStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// The dispatcher at `index`, created from `channel` for `owner` on first
    /// access.
    ///
    /// `owner` must be the object holding this store, and each index must
    /// always be used with the same channel.
    pub fn dispatcher<T: Any + Send + Sync>(
        &self,
        index: usize,
        channel: &Channel,
        owner: &Arc<T>,
    ) -> Dispatcher {
        let mut slots = self.slots.lock();
        if slots.len() <= index {
            slots.resize(index + 1, None);
        }
        slots[index]
            .get_or_insert_with(|| channel.instantiate(owner))
            .clone()
    }

    /// Number of dispatchers created so far.
    pub fn len(&self) -> usize {
        self.slots.lock().iter().flatten().count()
    }

    /// Whether no dispatcher has been created yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for ChannelStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.slots.lock().iter().flatten())
            .finish()
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("<Channel ")?;
        if let Some(name) = self.name() {
            write!(f, "'{name}' ")?;
        }
        write!(f, "{}>", SignatureList(self.signatures.to_vec()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::Unique;
    use crate::{sender_as, ConnectOptions, SignalError};

    struct Button {
        label: &'static str,
    }

    fn clicked() -> Channel {
        Channel::new(()).named("clicked")
    }

    #[test]
    fn test_bind_is_cached_per_owner() {
        let channel = clicked();
        let a = Arc::new(Button { label: "a" });
        let b = Arc::new(Button { label: "b" });

        assert_eq!(channel.bind(&a), channel.bind(&a));
        assert_ne!(channel.bind(&a), channel.bind(&b));
        assert_eq!(channel.instance_count(), 2);
    }

    #[test]
    fn test_instances_are_isolated() {
        let channel = clicked();
        let a = Arc::new(Button { label: "a" });
        let b = Arc::new(Button { label: "b" });
        let cb = crate::Callback::new(|| {});

        channel.bind(&a).connect(&cb).unwrap();
        assert!(channel.bind(&a).contains(&cb));
        assert!(!channel.bind(&b).contains(&cb));
        assert!(channel.bind(&b).is_empty());
    }

    #[test]
    fn test_dispatcher_does_not_keep_owner_alive() {
        let channel = clicked();
        let owner = Arc::new(Button { label: "a" });
        let dispatcher = channel.bind(&owner);
        assert_eq!(Arc::strong_count(&owner), 1);
        assert!(dispatcher.is_bound());
        assert!(dispatcher.owner().is_some());

        drop(owner);
        assert!(dispatcher.owner().is_none());
        assert_eq!(channel.purge(), 1);
        assert_eq!(channel.instance_count(), 0);
    }

    #[test]
    fn test_reused_address_gets_fresh_dispatcher() {
        let channel = clicked();
        let first = Arc::new(Button { label: "a" });
        let stale = channel.bind(&first);
        stale.connect(|| {}).unwrap();
        drop(first);

        // A new owner may land at the same address; it must not inherit the
        // dropped owner's subscribers.
        let second = Arc::new(Button { label: "b" });
        let fresh = channel.bind(&second);
        assert_ne!(fresh, stale);
        assert!(fresh.is_empty());
        channel.purge();
        assert_eq!(channel.instance_count(), 1);
    }

    #[test]
    fn test_bind_sweeps_dropped_owners() {
        let channel = clicked();
        for _ in 0..100 {
            let owner = Arc::new(Button { label: "short-lived" });
            channel.bind(&owner).connect(|| {}).unwrap();
        }
        assert!(channel.instance_count() <= MIN_SWEEP_LEN);
    }

    #[test]
    fn test_purge_releases_captured_state() {
        let channel = clicked();
        let owner = Arc::new(Button { label: "a" });
        let payload = Arc::new(vec![0_u8; 64]);

        let captured = payload.clone();
        channel
            .bind(&owner)
            .connect(move || {
                let _ = captured.len();
            })
            .unwrap();
        assert_eq!(Arc::strong_count(&payload), 2);

        drop(owner);
        assert_eq!(channel.purge(), 1);
        assert_eq!(Arc::strong_count(&payload), 1);
    }

    struct Stored {
        label: &'static str,
        channels: ChannelStore,
    }

    #[test]
    fn test_store_dispatchers_are_per_index() {
        let clicked = clicked();
        let changed = Channel::new(crate::Signature::of::<(u8,)>()).named("changed");
        let owner = Arc::new(Stored {
            label: "s",
            channels: ChannelStore::new(),
        });
        assert!(owner.channels.is_empty());

        let first = owner.channels.dispatcher(0, &clicked, &owner);
        assert_eq!(first, owner.channels.dispatcher(0, &clicked, &owner));
        let second = owner.channels.dispatcher(1, &changed, &owner);
        assert_ne!(first, second);
        assert_eq!(second.name(), Some("changed"));
        assert_eq!(owner.channels.len(), 2);
        assert_eq!(clicked.instance_count(), 0);
    }

    #[test]
    fn test_store_drops_slots_with_owner() {
        let channel = clicked();
        let owner = Arc::new(Stored {
            label: "s",
            channels: ChannelStore::new(),
        });
        let payload = Arc::new(vec![0_u8; 64]);
        let seen = Arc::new(Mutex::new(None));

        let captured = payload.clone();
        let seen_clone = seen.clone();
        owner
            .channels
            .dispatcher(0, &channel, &owner)
            .connect(move || {
                let _ = captured.len();
                *seen_clone.lock() = sender_as::<Stored>().map(|stored| stored.label);
            })
            .unwrap();
        owner.channels.dispatcher(0, &channel, &owner).emit(()).unwrap();
        assert_eq!(*seen.lock(), Some("s"));
        assert_eq!(Arc::strong_count(&payload), 2);

        drop(owner);
        assert_eq!(Arc::strong_count(&payload), 1);
    }

    #[test]
    fn test_instantiate_is_uncached() {
        let channel = clicked().with_policy(EmitPolicy::ContinueOnError);
        let owner = Arc::new(Button { label: "a" });
        let a = channel.instantiate(&owner);
        let b = channel.instantiate(&owner);

        assert_ne!(a, b);
        assert!(a.is_bound());
        assert_eq!(a.policy(), EmitPolicy::ContinueOnError);
        assert_eq!(channel.instance_count(), 0);
    }

    #[test]
    fn test_sender_is_owner() {
        let channel = clicked();
        let owner = Arc::new(Button { label: "ok" });
        let seen = Arc::new(Mutex::new(None));

        let seen_clone = seen.clone();
        channel
            .bind(&owner)
            .connect(move || {
                *seen_clone.lock() = sender_as::<Button>().map(|button| button.label);
                assert!(Channel::current_emitter().is_some());
                assert!(Channel::sender().is_some());
            })
            .unwrap();

        channel.bind(&owner).emit(()).unwrap();
        assert_eq!(*seen.lock(), Some("ok"));
    }

    #[test]
    fn test_policy_and_name_flow_to_dispatcher() {
        let channel = Channel::new(crate::Signature::of::<(u8,)>())
            .named("changed")
            .with_policy(EmitPolicy::ContinueOnError);
        let owner = Arc::new(Button { label: "a" });
        let dispatcher = channel.bind(&owner);

        assert_eq!(dispatcher.policy(), EmitPolicy::ContinueOnError);
        assert_eq!(dispatcher.name(), Some("changed"));
        assert_eq!(dispatcher.signatures(), channel.signatures());
        assert!(format!("{dispatcher:?}").starts_with("<Dispatcher 'changed' on "));
        assert!(format!("{dispatcher:?}").ends_with("Button>"));
        assert_eq!(format!("{channel:?}"), "<Channel 'changed' (u8)>");
    }

    #[test]
    fn test_unique_per_instance() {
        let channel = clicked();
        let owner = Arc::new(Button { label: "a" });
        let cb = crate::Callback::new(|| {});
        let strict = ConnectOptions::new().unique(Unique::Error);

        channel.bind(&owner).connect_with(&cb, strict).unwrap();
        let err = channel.bind(&owner).connect_with(&cb, strict).unwrap_err();
        assert!(matches!(err, SignalError::DuplicateSubscription { .. }));
    }
}
