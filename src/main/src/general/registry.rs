//! Name keyed registry backing every manager.

use std::collections::HashMap;

use crate::{
    result::{RegDataErr, RegError, RegLockErr, RegResult, RegResultExt},
    util::{
        container::{Entry, HierCell, HierLock},
        TryClone,
    },
};

/// An entity stored in a [`Registry`] under its name.
pub trait Named {
    /// Registry kind, used in errors and logs.
    const KIND: &'static str;

    fn name(&self) -> &str;
}

pub struct Registry<T> {
    entities: HierCell<HashMap<String, T>>,
}

impl<T> Default for Registry<T> {
    fn default() -> Self {
        Self {
            entities: HierCell::new(HashMap::new()),
        }
    }
}

impl<T: Named + HierLock + Send> Registry<T> {
    pub fn new() -> Self {
        Self::default()
    }

    fn not_found(&self, name: &str) -> RegError {
        RegDataErr::EntityNotFound {
            registry: T::KIND,
            name: name.to_owned(),
        }
        .into()
    }

    /// Registers `entity` under its name. An existing name is rejected and the
    /// registry is left unchanged.
    pub fn add(&self, entity: T) -> RegResult<()> {
        self.entities.write("add", |map, held| {
            if map.contains_key(entity.name()) {
                return Err(RegDataErr::EntityDuplicateKey {
                    registry: T::KIND,
                    name: entity.name().to_owned(),
                }
                .into());
            }
            for _ in 0..held {
                entity.lock();
            }
            tracing::debug!("{} {} registered", T::KIND, entity.name());
            let _ = map.insert(entity.name().to_owned(), entity);
            Ok(())
        })?
    }

    /// Unregisters `name`. If releasing the cascade locks fails the entity
    /// stays registered.
    pub fn remove(&self, name: &str) -> RegResult<T> {
        self.entities.write("remove", |map, held| {
            let entity = map.get(name).ok_or_else(|| self.not_found(name))?;
            for _ in 0..held {
                entity.unlock()?;
            }
            let entity = map.remove(name).ok_or_else(|| self.not_found(name))?;
            tracing::debug!("{} {} unregistered", T::KIND, name);
            Ok(entity)
        })?
    }

    /// Looks up an entity. A miss is a recoverable `NotFound`.
    pub fn get(&self, name: &str) -> RegResult<Entry<'_, T>> {
        self.entities
            .entry("get", |map| map.get(name))?
            .ok_or_else(|| self.not_found(name))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entities
            .read("contains", |map| map.contains_key(name))
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.entities.read("len", |map| map.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names = self
            .entities
            .read("names", |map| map.keys().cloned().collect::<Vec<_>>())
            .unwrap_or_default();
        names.sort();
        names
    }

    pub fn for_each(&self, mut f: impl FnMut(&T)) -> RegResult<()> {
        self.entities.read("for_each", |map| {
            for entity in map.values() {
                f(entity);
            }
        })
    }

    /// Removes every entity, handing each to `f` in name order.
    pub fn drain(&self, mut f: impl FnMut(T)) -> RegResult<()> {
        let mut drained = self.entities.write("drain", |map, held| {
            let mut all: Vec<_> = map.drain().collect();
            for (_, entity) in all.iter() {
                for _ in 0..held {
                    entity.unlock().todo_handle();
                }
            }
            all.sort_by(|a, b| a.0.cmp(&b.0));
            all
        })?;
        for (_, entity) in drained.drain(..) {
            f(entity);
        }
        Ok(())
    }
}

impl<T: Named + HierLock + Send + TryClone> Registry<T> {
    /// Registers a deep copy of `entity`. Move and copy paths share the
    /// duplicate policy.
    pub fn add_copy(&self, entity: &T) -> RegResult<()> {
        if self.contains(entity.name()) {
            return Err(RegDataErr::EntityDuplicateKey {
                registry: T::KIND,
                name: entity.name().to_owned(),
            }
            .into());
        }
        self.add(entity.try_clone()?)
    }
}

impl<T: Named + HierLock + Send> HierLock for Registry<T> {
    fn lock(&self) {
        let depth = self.entities.acquire();
        self.entities
            .read("lock", |map| {
                for entity in map.values() {
                    entity.lock();
                }
                tracing::debug!("{} registry locked, depth {}", T::KIND, depth);
            })
            .todo_handle();
    }

    fn unlock(&self) -> RegResult<()> {
        if !self.entities.is_owned_by_current_thread() || self.entities.held() == 0 {
            return Err(RegLockErr::NotHeldByCurrentThread {
                target: format!("{} registry", T::KIND),
            }
            .into());
        }
        // every child is released even if one fails; the first error is kept
        let children = self.entities.read("unlock", |map| {
            map.values()
                .map(|entity| entity.unlock())
                .fold(Ok(()), |first, res| first.and(res))
        })?;
        let released = self.entities.release();
        children.and(released)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::result::ErrorKind;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Counts lock depth and refuses to unlock while `stuck` is set.
    #[derive(Debug, Default)]
    struct Gate {
        name: String,
        depth: AtomicUsize,
        stuck: bool,
    }

    impl Gate {
        fn new(name: &str, stuck: bool) -> Self {
            Self {
                name: name.to_owned(),
                stuck,
                ..Default::default()
            }
        }
    }

    impl Named for Gate {
        const KIND: &'static str = "gate";

        fn name(&self) -> &str {
            &self.name
        }
    }

    impl HierLock for Gate {
        fn lock(&self) {
            let _ = self.depth.fetch_add(1, Ordering::SeqCst);
        }

        fn unlock(&self) -> RegResult<()> {
            if self.stuck {
                return Err(RegLockErr::NotHeldByCurrentThread {
                    target: self.name.clone(),
                }
                .into());
            }
            let _ = self.depth.fetch_sub(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn depth_of(registry: &Registry<Gate>, name: &str) -> usize {
        registry.get(name).unwrap().depth.load(Ordering::SeqCst)
    }

    #[test]
    fn test_unlock_releases_every_child() {
        let registry = Registry::new();
        for (name, stuck) in [("a", false), ("b", true), ("c", false)] {
            registry.add(Gate::new(name, stuck)).unwrap();
        }
        registry.lock();
        let err = registry.unlock().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::LockOrderViolation);
        assert_eq!(depth_of(&registry, "a"), 0);
        assert_eq!(depth_of(&registry, "c"), 0);
        assert_eq!(depth_of(&registry, "b"), 1);
        // the registry itself was released
        assert!(registry.unlock().is_err());
    }

    #[test]
    fn test_failed_remove_keeps_entity() {
        let registry = Registry::new();
        registry.add(Gate::new("stuck", true)).unwrap();
        registry.add(Gate::new("free", false)).unwrap();
        registry.lock();
        let err = registry.remove("stuck").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::LockOrderViolation);
        assert!(registry.contains("stuck"));
        let free = registry.remove("free").unwrap();
        assert_eq!(free.depth.load(Ordering::SeqCst), 0);
        assert_eq!(registry.remove("free").unwrap_err().kind(), ErrorKind::NotFound);
        assert!(registry.unlock().is_err());
        assert_eq!(registry.names(), vec!["stuck".to_owned()]);
    }
}
