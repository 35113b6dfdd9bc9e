//! Reentrant lock cell used by every composite entity.
//!
//! A [`HierCell`] pairs a reentrant mutex with a `RefCell` so that a thread
//! already holding the lock can call back into the same entity. Besides the
//! scoped accessors it supports *detached* acquisition ([`HierCell::acquire`] /
//! [`HierCell::release`]) which is what the parent-first / children-first
//! `lock()` and `unlock()` cascade is built on.

use std::{
    any::type_name,
    cell::{Cell, Ref, RefCell},
    fmt::Debug,
    ops::Deref,
};

use parking_lot::{ReentrantMutex, ReentrantMutexGuard};

use crate::result::{RegLockErr, RegResult};

pub struct HierCell<T> {
    lock: ReentrantMutex<()>,
    // detached acquisitions by the current owner
    held: Cell<usize>,
    value: RefCell<T>,
}

// SAFETY: `held` and `value` are only touched while `lock` is owned by the
// calling thread, so at most one thread observes them at a time.
unsafe impl<T: Send> Sync for HierCell<T> {}

impl<T> HierCell<T> {
    pub fn new(value: T) -> Self {
        Self {
            lock: ReentrantMutex::new(()),
            held: Cell::new(0),
            value: RefCell::new(value),
        }
    }

    pub fn into_inner(self) -> T {
        self.value.into_inner()
    }

    pub fn get_mut(&mut self) -> &mut T {
        self.value.get_mut()
    }

    /// Runs `f` with shared access under the lock.
    pub fn read<R>(&self, op: &'static str, f: impl FnOnce(&T) -> R) -> RegResult<R> {
        let _guard = self.lock.lock();
        let value = self.value.try_borrow().map_err(|_| RegLockErr::MapBorrowed {
            target: type_name::<T>().to_owned(),
            op,
        })?;
        Ok(f(&value))
    }

    /// Runs `f` with exclusive access under the lock. `f` also receives the
    /// current detached depth so containers can keep new children in step.
    pub fn write<R>(&self, op: &'static str, f: impl FnOnce(&mut T, usize) -> R) -> RegResult<R> {
        let _guard = self.lock.lock();
        let mut value = self
            .value
            .try_borrow_mut()
            .map_err(|_| RegLockErr::MapBorrowed {
                target: type_name::<T>().to_owned(),
                op,
            })?;
        Ok(f(&mut value, self.held.get()))
    }

    /// Locks and keeps a shared borrow alive for as long as the returned entry.
    pub fn entry<U: ?Sized>(
        &self,
        op: &'static str,
        f: impl FnOnce(&T) -> Option<&U>,
    ) -> RegResult<Option<Entry<'_, U>>> {
        let guard = self.lock.lock();
        let value = self.value.try_borrow().map_err(|_| RegLockErr::MapBorrowed {
            target: type_name::<T>().to_owned(),
            op,
        })?;
        Ok(Ref::filter_map(value, f).ok().map(|value| Entry {
            value,
            _guard: guard,
        }))
    }

    /// Holds the lock, without borrowing the value, until the guard drops.
    pub fn guard(&self) -> ReentrantMutexGuard<'_, ()> {
        self.lock.lock()
    }

    /// Acquires the lock without a guard. Returns the new detached depth.
    pub fn acquire(&self) -> usize {
        std::mem::forget(self.lock.lock());
        let depth = self.held.get() + 1;
        self.held.set(depth);
        depth
    }

    /// Releases one detached acquisition made by [`HierCell::acquire`].
    pub fn release(&self) -> RegResult<()> {
        if !self.lock.is_owned_by_current_thread() || self.held.get() == 0 {
            return Err(RegLockErr::NotHeldByCurrentThread {
                target: type_name::<T>().to_owned(),
            }
            .into());
        }
        self.held.set(self.held.get() - 1);
        // SAFETY: the check above proves this thread owns a guard that was
        // forgotten in `acquire`.
        unsafe { self.lock.force_unlock() };
        Ok(())
    }

    /// Detached depth of the current owner, zero if nobody holds it detached.
    pub fn held(&self) -> usize {
        let _guard = self.lock.lock();
        self.held.get()
    }

    pub fn is_locked(&self) -> bool {
        self.lock.is_locked()
    }

    pub fn is_owned_by_current_thread(&self) -> bool {
        self.lock.is_owned_by_current_thread()
    }
}

/// Shared borrow of something inside a [`HierCell`], holding its lock.
pub struct Entry<'a, U: ?Sized> {
    // dropped before the guard
    value: Ref<'a, U>,
    _guard: ReentrantMutexGuard<'a, ()>,
}

impl<U: ?Sized> Deref for Entry<'_, U> {
    type Target = U;

    fn deref(&self) -> &U {
        &self.value
    }
}

impl<U: ?Sized + Debug> Debug for Entry<'_, U> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        (**self).fmt(f)
    }
}

/// Hierarchical lock: parent first on acquire, children first on release.
pub trait HierLock {
    fn lock(&self);

    fn unlock(&self) -> RegResult<()>;

    /// Scoped form of `lock()`; unlocks on drop.
    fn lock_scope(&self) -> HierGuard<'_, Self>
    where
        Self: Sized,
    {
        self.lock();
        HierGuard { target: self }
    }
}

pub struct HierGuard<'a, L: HierLock> {
    target: &'a L,
}

impl<'a, L: HierLock> Deref for HierGuard<'a, L> {
    type Target = L;

    fn deref(&self) -> &L {
        self.target
    }
}

impl<L: HierLock> Drop for HierGuard<'_, L> {
    fn drop(&mut self) {
        if let Err(err) = self.target.unlock() {
            tracing::warn!("hierarchical unlock failed on drop: {:?}", err);
        }
    }
}
