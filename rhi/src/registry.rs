// Copyright (c) 2026 The rhi contributors
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! Named, weakly held objects shared between the users of a context.

use foldhash::HashMap;
use log::debug;
use parking_lot::Mutex;
use std::{
    any::Any,
    fmt,
    sync::{Arc, Weak},
};

type AnyObject = dyn Any + Send + Sync;

/// A registry of objects by name.
///
/// The registry does not keep objects alive. Entries of dropped objects are pruned when the
/// owning context completes its initialization.
#[derive(Default)]
pub struct ObjectRegistry {
    objects: Mutex<HashMap<String, Weak<AnyObject>>>,
}

impl ObjectRegistry {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `object` under `name`.
    ///
    /// Returns `false` if the same object was already registered under that name.
    ///
    /// # Panics
    ///
    /// - Panics if another object that is still alive is registered under `name`.
    pub fn add<T: Any + Send + Sync>(&self, name: impl Into<String>, object: &Arc<T>) -> bool {
        let name = name.into();
        let object: Arc<AnyObject> = object.clone();
        let object = Arc::downgrade(&object);
        let mut objects = self.objects.lock();

        if let Some(existing) = objects.get(&name) {
            if existing.ptr_eq(&object) {
                return false;
            }

            assert!(
                existing.strong_count() == 0,
                "another object is already registered under the name `{name}`",
            );
        }

        objects.insert(name, object);

        true
    }

    /// Returns the object registered under `name`, if it is alive and of type `T`.
    pub fn get<T: Any + Send + Sync>(&self, name: &str) -> Option<Arc<T>> {
        let object = self.objects.lock().get(name)?.upgrade()?;

        object.downcast::<T>().ok()
    }

    /// Returns whether a live object is registered under `name`.
    #[inline]
    pub fn contains(&self, name: &str) -> bool {
        self.objects
            .lock()
            .get(name)
            .is_some_and(|object| object.strong_count() != 0)
    }

    /// Removes the entry under `name`. Returns whether there was one.
    #[inline]
    pub fn remove(&self, name: &str) -> bool {
        self.objects.lock().remove(name).is_some()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.objects.lock().len()
    }

    /// Prunes the entries of dropped objects. Returns the number of pruned entries.
    pub fn complete_initialization(&self) -> usize {
        let mut objects = self.objects.lock();
        let len = objects.len();
        objects.retain(|_, object| object.strong_count() != 0);
        let pruned = len - objects.len();

        if pruned != 0 {
            debug!("pruned {pruned} dropped objects from the registry");
        }

        pruned
    }
}

impl fmt::Debug for ObjectRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.objects.lock().keys()).finish()
    }
}
