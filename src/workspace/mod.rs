use std::collections::BTreeMap;

use crate::features::FeatureCollection;

/// Process-local scratch storage for intermediate feature collections.
///
/// The workspace is owned by a single run and passed explicitly to every
/// stage that needs it. It must be cleared exactly once on every exit path,
/// success or failure, so no run leaves orphaned intermediate state behind.
#[derive(Debug, Default)]
pub struct Workspace {
    collections: BTreeMap<String, FeatureCollection>,
}

impl Workspace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a collection under its own name, replacing any previous
    /// collection with that name.
    pub fn insert(&mut self, collection: FeatureCollection) -> String {
        let name = collection.name.clone();
        self.collections.insert(name.clone(), collection);
        name
    }

    pub fn get(&self, name: &str) -> Option<&FeatureCollection> {
        self.collections.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut FeatureCollection> {
        self.collections.get_mut(name)
    }

    /// Removes and returns a collection, transferring ownership to the
    /// caller.
    pub fn take(&mut self, name: &str) -> Option<FeatureCollection> {
        self.collections.remove(name)
    }

    pub fn delete(&mut self, name: &str) -> bool {
        self.collections.remove(name).is_some()
    }

    pub fn clear(&mut self) {
        self.collections.clear();
    }

    pub fn len(&self) -> usize {
        self.collections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.collections.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.collections.keys().map(|k| k.as_str())
    }
}
