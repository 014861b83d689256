//! Bounded table of materialization callbacks.
//!
//! Result records are small fixed-width values, so instead of carrying a
//! factory and a release callback each, they carry the one-byte [`SlotId`] of
//! callbacks registered here.
//!
//! The table only holds callbacks weakly. Whoever still needs a callback
//! (the producer, or a container with candidates pointing at its slot) keeps
//! the `Arc` alive; once every strong reference is gone the slot is handed to
//! the next new callback. Producers that build a fresh closure per query
//! therefore cycle through slots instead of exhausting the table.

use std::any::Any;
use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::RwLock;

/// Number of callbacks a registry can hold at once.
pub const REGISTRY_SLOTS: usize = 64;

/// Producer-owned state captured for one candidate until it is materialized
/// or released.
pub type Payload = Box<dyn Any + Send>;

type FactoryFn<M> = dyn Fn(&(dyn Any + Send)) -> M + Send + Sync;
type ReleaseFn = dyn Fn(Payload) + Send + Sync;

/// Builds the final display object from a candidate's payload.
pub type MatchFactory<M> = Arc<FactoryFn<M>>;

/// Releases a payload that will never be (or has just been) materialized.
pub type PayloadRelease = Arc<ReleaseFn>;

/// Index of a registered callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct SlotId(u8);

impl SlotId {
    #[inline]
    pub fn get(self) -> usize {
        usize::from(self.0)
    }
}

/// A registered callback.
pub enum Callback<M> {
    Factory(MatchFactory<M>),
    Release(PayloadRelease),
}

impl<M> Clone for Callback<M> {
    fn clone(&self) -> Self {
        match self {
            Self::Factory(factory) => Self::Factory(factory.clone()),
            Self::Release(release) => Self::Release(release.clone()),
        }
    }
}

impl<M> Callback<M> {
    fn address(&self) -> *const () {
        match self {
            Self::Factory(factory) => Arc::as_ptr(factory).cast(),
            Self::Release(release) => Arc::as_ptr(release).cast(),
        }
    }

    /// Callbacks are the same when they are the same variant and share an
    /// allocation.
    pub fn same_as(&self, other: &Self) -> bool {
        matches!(
            (self, other),
            (Self::Factory(_), Self::Factory(_)) | (Self::Release(_), Self::Release(_))
        ) && self.address() == other.address()
    }

    fn downgrade(&self) -> WeakCallback<M> {
        match self {
            Self::Factory(factory) => WeakCallback::Factory(Arc::downgrade(factory)),
            Self::Release(release) => WeakCallback::Release(Arc::downgrade(release)),
        }
    }
}

impl<M> fmt::Debug for Callback<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Factory(_) => f.write_str("Factory(<fn>)"),
            Self::Release(_) => f.write_str("Release(<fn>)"),
        }
    }
}

/// What a slot holds. A weak reference keeps the allocation's address
/// reserved, so address comparison stays sound while the slot exists.
enum WeakCallback<M> {
    Factory(Weak<FactoryFn<M>>),
    Release(Weak<ReleaseFn>),
}

impl<M> WeakCallback<M> {
    fn is_live(&self) -> bool {
        match self {
            Self::Factory(factory) => factory.strong_count() > 0,
            Self::Release(release) => release.strong_count() > 0,
        }
    }

    fn holds(&self, callback: &Callback<M>) -> bool {
        match (self, callback) {
            (Self::Factory(slot), Callback::Factory(factory)) => {
                Weak::as_ptr(slot).cast::<()>() == Arc::as_ptr(factory).cast::<()>()
            }
            (Self::Release(slot), Callback::Release(release)) => {
                Weak::as_ptr(slot).cast::<()>() == Arc::as_ptr(release).cast::<()>()
            }
            _ => false,
        }
    }
}

/// Callback slot table shared by all containers of one dispatcher.
pub struct CallbackRegistry<M> {
    slots: RwLock<Vec<WeakCallback<M>>>,
    capacity: usize,
}

impl<M> fmt::Debug for CallbackRegistry<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackRegistry")
            .field("len", &self.len())
            .field("capacity", &self.capacity)
            .finish()
    }
}

impl<M> Default for CallbackRegistry<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M> CallbackRegistry<M> {
    /// Creates a registry with [`REGISTRY_SLOTS`] slots.
    pub fn new() -> Self {
        Self::with_capacity(REGISTRY_SLOTS)
    }

    /// Creates a registry with `capacity` slots (at most 256, the range of
    /// a [`SlotId`]).
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.min(usize::from(u8::MAX) + 1);
        Self {
            slots: RwLock::new(Vec::with_capacity(capacity)),
            capacity,
        }
    }

    /// Registers a factory, returning its slot. `None` when every slot holds
    /// a live callback.
    pub fn register_factory(&self, factory: &MatchFactory<M>) -> Option<SlotId> {
        self.register(&Callback::Factory(factory.clone()))
    }

    /// Registers a release callback, returning its slot. `None` when every
    /// slot holds a live callback.
    pub fn register_release(&self, release: &PayloadRelease) -> Option<SlotId> {
        self.register(&Callback::Release(release.clone()))
    }

    /// Returns the existing slot of `callback`, or assigns a free one: a slot
    /// whose callback has been dropped everywhere, else a new one.
    ///
    /// The slot stays bound to `callback` only while someone holds a strong
    /// reference to it.
    pub fn register(&self, callback: &Callback<M>) -> Option<SlotId> {
        if let Some(slot) = Self::position(&self.slots.read(), callback) {
            return Some(slot);
        }

        let mut slots = self.slots.write();
        // Another thread may have registered it between the two locks.
        if let Some(slot) = Self::position(&slots, callback) {
            return Some(slot);
        }
        if let Some(index) = slots.iter().position(|slot| !slot.is_live()) {
            let slot = SlotId(u8::try_from(index).ok()?);
            if let Some(entry) = slots.get_mut(index) {
                *entry = callback.downgrade();
            }
            log::debug!("callback slot reused slot={}", index);
            return Some(slot);
        }
        if slots.len() >= self.capacity {
            return None;
        }
        let slot = SlotId(u8::try_from(slots.len()).ok()?);
        slots.push(callback.downgrade());
        Some(slot)
    }

    fn position(slots: &[WeakCallback<M>], callback: &Callback<M>) -> Option<SlotId> {
        slots
            .iter()
            .position(|existing| existing.holds(callback))
            .and_then(|index| u8::try_from(index).ok())
            .map(SlotId)
    }

    /// Looks up the factory registered at `slot`, if it is still alive.
    pub fn factory(&self, slot: SlotId) -> Option<MatchFactory<M>> {
        match self.slots.read().get(slot.get()) {
            Some(WeakCallback::Factory(factory)) => factory.upgrade(),
            _ => None,
        }
    }

    /// Looks up the release callback registered at `slot`, if it is still
    /// alive.
    pub fn release(&self, slot: SlotId) -> Option<PayloadRelease> {
        match self.slots.read().get(slot.get()) {
            Some(WeakCallback::Release(release)) => release.upgrade(),
            _ => None,
        }
    }

    /// Slots whose callback is still alive.
    pub fn len(&self) -> usize {
        self.slots.read().iter().filter(|slot| slot.is_live()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_full(&self) -> bool {
        self.len() >= self.capacity
    }
}
