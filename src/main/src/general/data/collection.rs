//! Named map `offsets -> member` shared by [`Data`](super::Data) and
//! [`DataTag`](super::DataTag).
//!
//! The collection's own reentrant lock guards the map. Members are stored
//! behind `Arc`, and lookups hand out a shared handle that does not keep the
//! collection locked. The hierarchical [`HierLock::lock`] additionally takes
//! every member's lock (parent first) and [`HierLock::unlock`] releases them
//! children first. While a thread holds the hierarchical lock, members it adds
//! are locked to the same depth and members it removes are released first, so
//! lock and unlock calls always pair up.

use std::{fmt::Debug, sync::Arc};

use super::offsets::{new_offsets_map, Lengths, Offsets, OffsetsMap};
use crate::{
    general::registry::Named,
    result::{RegDataErr, RegError, RegLockErr, RegResult, RegResultExt},
    util::{
        container::{HierCell, HierLock},
        TryClone,
    },
};

/// Proof that a call comes from a collection's lock cascade. Only this module
/// can build one, so member locks cannot be taken detached from outside.
pub struct Cascade {
    _private: (),
}

const CASCADE: Cascade = Cascade { _private: () };

/// Something a collection can hold.
pub trait Member: TryClone + Send + Sync {
    /// Registry kind of a collection of this member, used in errors and logs.
    const COLLECTION: &'static str;

    fn member_key(&self) -> Offsets;

    /// Takes the member's own lock once. Lockless members do nothing.
    fn lock_member(&self, _: &Cascade) {}

    fn unlock_member(&self, _: &Cascade) -> RegResult<()> {
        Ok(())
    }
}

struct Members<V> {
    map: OffsetsMap<Arc<V>>,
    lengths: Lengths,
}

pub struct Collection<V> {
    name: String,
    members: HierCell<Members<V>>,
}

impl<V: Member> Collection<V> {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_capacity(name, 0)
    }

    /// Pre-sizes the map for `capacity` members.
    pub fn with_capacity(name: impl Into<String>, capacity: usize) -> Self {
        Self {
            name: name.into(),
            members: HierCell::new(Members {
                map: new_offsets_map(capacity),
                lengths: Vec::new(),
            }),
        }
    }

    /// Records the logical extents of the whole array.
    pub fn with_lengths(mut self, lengths: Lengths) -> Self {
        self.members.get_mut().lengths = lengths;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn duplicate_key(&self, offsets: Offsets) -> RegError {
        RegDataErr::ChunkDuplicateKey {
            data: self.name.clone(),
            offsets,
        }
        .into()
    }

    fn not_found(&self, offsets: &[usize]) -> RegError {
        RegDataErr::ChunkNotFound {
            data: self.name.clone(),
            offsets: offsets.to_vec(),
        }
        .into()
    }

    fn insert(
        &self,
        op: &'static str,
        key: Offsets,
        make: impl FnOnce() -> RegResult<V>,
    ) -> RegResult<()> {
        self.members.write(op, |members, held| {
            if members.map.contains_key(&key) {
                return Err(self.duplicate_key(key));
            }
            let member = make()?;
            for _ in 0..held {
                member.lock_member(&CASCADE);
            }
            tracing::debug!(
                "{} {} {:?} added, lock depth {}",
                V::COLLECTION,
                self.name,
                key,
                held
            );
            let _ = members.map.insert(key, Arc::new(member));
            Ok(())
        })?
    }

    /// Inserts `member` keyed by its offsets. A present key is rejected and the
    /// collection is left unchanged.
    pub fn add(&self, member: V) -> RegResult<()> {
        let key = member.member_key();
        self.insert("add", key, move || Ok(member))
    }

    /// Inserts a deep copy of `member`. A present key is rejected before any
    /// copy is made.
    pub fn add_copy(&self, member: &V) -> RegResult<()> {
        let key = member.member_key();
        self.insert("add_copy", key, || member.try_clone())
    }

    /// Erases the member at `offsets` and returns it. Handles obtained
    /// earlier stay usable. If releasing the cascade locks fails the member
    /// stays in the collection.
    pub fn remove(&self, offsets: &[usize]) -> RegResult<Arc<V>> {
        self.members.write("remove", |members, held| {
            let member = members
                .map
                .get(offsets)
                .ok_or_else(|| self.not_found(offsets))?;
            for _ in 0..held {
                member.unlock_member(&CASCADE)?;
            }
            let member = members
                .map
                .remove(offsets)
                .ok_or_else(|| self.not_found(offsets))?;
            tracing::debug!("{} {} {:?} removed", V::COLLECTION, self.name, offsets);
            Ok(member)
        })?
    }

    /// Shared handle to the member at `offsets`. The collection is not kept
    /// locked while the handle lives.
    pub fn get(&self, offsets: &[usize]) -> RegResult<Arc<V>> {
        self.members
            .read("get", |members| members.map.get(offsets).cloned())?
            .ok_or_else(|| self.not_found(offsets))
    }

    pub fn contains(&self, offsets: &[usize]) -> bool {
        self.peek(|members| members.map.contains_key(offsets))
    }

    // Mutable borrows of the map never outlive a call into this module, so a
    // shared read cannot conflict.
    fn peek<R: Default>(&self, f: impl FnOnce(&Members<V>) -> R) -> R {
        self.members.read("peek", f).unwrap_or_default()
    }

    /// Number of members. Takes only the collection's own lock.
    pub fn num_members(&self) -> usize {
        self.peek(|members| members.map.len())
    }

    /// Product of the logical extents, 1 when none were recorded.
    pub fn size(&self) -> usize {
        self.peek(|members| members.lengths.iter().product())
    }

    pub fn lengths(&self) -> Lengths {
        self.peek(|members| members.lengths.clone())
    }

    pub fn set_lengths(&self, lengths: Lengths) -> RegResult<()> {
        self.members
            .write("set_lengths", |members, _| members.lengths = lengths)
    }

    pub fn offsets(&self) -> Vec<Offsets> {
        self.peek(|members| members.map.keys().cloned().collect())
    }

    pub fn reserve(&self, additional: usize) -> RegResult<()> {
        self.members
            .write("reserve", |members, _| members.map.reserve(additional))
    }

    /// Visits every member under the collection's lock, in map order.
    pub fn for_each(&self, mut f: impl FnMut(&Offsets, &V)) -> RegResult<()> {
        self.members.read("for_each", |members| {
            for (key, member) in members.map.iter() {
                f(key, member.as_ref());
            }
        })
    }

    /// True while any thread holds the collection's lock.
    pub fn is_locked(&self) -> bool {
        self.members.is_locked()
    }

    /// Detached depth of the hierarchical lock held by the current thread.
    pub fn lock_depth(&self) -> usize {
        if self.members.is_owned_by_current_thread() {
            self.members.held()
        } else {
            0
        }
    }
}

impl<V: Member> HierLock for Collection<V> {
    fn lock(&self) {
        let depth = self.members.acquire();
        // the collection lock is owned now, so this read cannot block
        self.members
            .read("lock", |members| {
                for member in members.map.values() {
                    member.lock_member(&CASCADE);
                }
                members.map.len()
            })
            .map(|n| {
                tracing::debug!(
                    "{} {} locked with {} members, depth {}",
                    V::COLLECTION,
                    self.name,
                    n,
                    depth
                )
            })
            .todo_handle();
    }

    fn unlock(&self) -> RegResult<()> {
        if self.lock_depth() == 0 {
            return Err(RegLockErr::NotHeldByCurrentThread {
                target: format!("{} {}", V::COLLECTION, self.name),
            }
            .into());
        }
        // every child is released even if one fails; the first error is kept
        let children = self.members.read("unlock", |members| {
            members
                .map
                .values()
                .map(|member| member.unlock_member(&CASCADE))
                .fold(Ok(()), |first, res| first.and(res))
        })?;
        let released = self.members.release();
        children.and(released)
    }
}

impl<V: Member> TryClone for Collection<V> {
    /// Deep copies every member. On failure nothing is returned and `self`
    /// is untouched.
    fn try_clone(&self) -> RegResult<Self> {
        self.members.read("try_clone", |members| {
            let mut map = new_offsets_map(members.map.len());
            for (key, member) in members.map.iter() {
                let _ = map.insert(key.clone(), Arc::new(member.try_clone()?));
            }
            Ok(Collection {
                name: self.name.clone(),
                members: HierCell::new(Members {
                    map,
                    lengths: members.lengths.clone(),
                }),
            })
        })?
    }
}

impl<V: Member> Named for Collection<V> {
    const KIND: &'static str = V::COLLECTION;

    fn name(&self) -> &str {
        &self.name
    }
}

impl<V: Member> Debug for Collection<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct(V::COLLECTION)
            .field("name", &self.name)
            .field("members", &self.num_members())
            .field("lengths", &self.lengths())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::result::ErrorKind;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Member that counts its lock depth and refuses to unlock when `stuck`.
    #[derive(Debug)]
    struct Slot {
        key: Offsets,
        depth: AtomicUsize,
        stuck: bool,
    }

    fn slot(key: usize, stuck: bool) -> Slot {
        Slot {
            key: vec![key],
            depth: AtomicUsize::new(0),
            stuck,
        }
    }

    impl TryClone for Slot {
        fn try_clone(&self) -> RegResult<Self> {
            Ok(slot(self.key[0], self.stuck))
        }
    }

    impl Member for Slot {
        const COLLECTION: &'static str = "slots";

        fn member_key(&self) -> Offsets {
            self.key.clone()
        }

        fn lock_member(&self, _: &Cascade) {
            let _ = self.depth.fetch_add(1, Ordering::SeqCst);
        }

        fn unlock_member(&self, _: &Cascade) -> RegResult<()> {
            if self.stuck {
                return Err(RegLockErr::NotHeldByCurrentThread {
                    target: format!("slot {:?}", self.key),
                }
                .into());
            }
            let _ = self.depth.fetch_sub(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn depth(slots: &Collection<Slot>, key: usize) -> usize {
        slots.get(&[key]).unwrap().depth.load(Ordering::SeqCst)
    }

    #[test]
    fn test_unlock_releases_every_member() {
        let slots = Collection::new("s");
        for (key, stuck) in [(0, false), (1, true), (2, false)] {
            slots.add(slot(key, stuck)).unwrap();
        }
        slots.lock();
        assert_eq!(slots.unlock().unwrap_err().kind(), ErrorKind::LockOrderViolation);
        assert_eq!(depth(&slots, 0), 0);
        assert_eq!(depth(&slots, 2), 0);
        assert_eq!(depth(&slots, 1), 1);
        assert_eq!(slots.lock_depth(), 0);
    }

    #[test]
    fn test_failed_remove_keeps_member() {
        let slots = Collection::new("s");
        slots.add(slot(0, true)).unwrap();
        slots.add(slot(1, false)).unwrap();
        slots.lock();
        let err = slots.remove(&[0]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::LockOrderViolation);
        assert!(slots.contains(&[0]));
        let removed = slots.remove(&[1]).unwrap();
        assert_eq!(removed.depth.load(Ordering::SeqCst), 0);
        assert_eq!(slots.num_members(), 1);
        assert!(slots.unlock().is_err());
        assert_eq!(slots.lock_depth(), 0);
    }
}
