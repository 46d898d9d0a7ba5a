use std::collections::hash_map::{self, HashMap};
use std::collections::HashSet;
use std::hash::Hash;

/// Map decorator tracking its own key set next to a local store.
///
/// Value operations go straight to the backing store. `len`, `is_empty`,
/// `contains_key` and `keys` read the tracked key set instead, which is
/// seeded from the store at construction and kept in step by mutations made
/// through this decorator. Changes made through [`DistributedMap::store_mut`]
/// bypass the key set until [`DistributedMap::resync_keys`] is called.
#[derive(Debug, Clone)]
pub struct DistributedMap<K, V> {
    store: HashMap<K, V>,
    keys: HashSet<K>,
}

impl<K, V> DistributedMap<K, V>
where
    K: Eq + Hash + Clone,
{
    pub fn new() -> Self {
        Self::from_store(HashMap::new())
    }

    /// Decorates an existing store, snapshotting its keys.
    pub fn from_store(store: HashMap<K, V>) -> Self {
        let keys = store.keys().cloned().collect();
        Self { store, keys }
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        self.store.get(key)
    }

    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        self.store.get_mut(key)
    }

    pub fn insert(&mut self, key: K, value: V) -> Option<V> {
        self.keys.insert(key.clone());
        self.store.insert(key, value)
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        self.keys.remove(key);
        self.store.remove(key)
    }

    /// Recomputes the entry for `key`. Returning `None` removes it.
    pub fn compute<F>(&mut self, key: K, f: F) -> Option<&V>
    where
        F: FnOnce(&K, Option<V>) -> Option<V>,
    {
        let current = self.store.remove(&key);
        match f(&key, current) {
            Some(value) => {
                self.keys.insert(key.clone());
                Some(self.store.entry(key).or_insert(value))
            }
            None => {
                self.keys.remove(&key);
                None
            }
        }
    }

    /// Inserts the computed value when `key` has no value yet.
    pub fn compute_if_absent<F>(&mut self, key: K, f: F) -> Option<&V>
    where
        F: FnOnce(&K) -> Option<V>,
    {
        if !self.store.contains_key(&key) {
            let value = f(&key)?;
            self.keys.insert(key.clone());
            self.store.insert(key.clone(), value);
        }
        self.store.get(&key)
    }

    /// Recomputes the value of a present key. Returning `None` removes it.
    pub fn compute_if_present<F>(&mut self, key: &K, f: F) -> Option<&V>
    where
        F: FnOnce(&K, V) -> Option<V>,
    {
        let current = self.store.remove(key)?;
        match f(key, current) {
            Some(value) => {
                self.store.insert(key.clone(), value);
                self.store.get(key)
            }
            None => {
                self.keys.remove(key);
                None
            }
        }
    }

    /// Inserts `value`, or combines it with the existing value through `f`.
    /// `f` returning `None` removes the entry.
    pub fn merge<F>(&mut self, key: K, value: V, f: F) -> Option<&V>
    where
        F: FnOnce(V, V) -> Option<V>,
    {
        self.compute(key, |_, current| match current {
            Some(old) => f(old, value),
            None => Some(value),
        })
    }

    /// Size of the tracked key set.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.keys.contains(key)
    }

    /// The tracked key set.
    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.keys.iter()
    }

    pub fn values(&self) -> hash_map::Values<'_, K, V> {
        self.store.values()
    }

    pub fn values_mut(&mut self) -> hash_map::ValuesMut<'_, K, V> {
        self.store.values_mut()
    }

    pub fn iter(&self) -> hash_map::Iter<'_, K, V> {
        self.store.iter()
    }

    pub fn store(&self) -> &HashMap<K, V> {
        &self.store
    }

    /// Direct access to the backing store. Mutations made here are not
    /// reflected in the key set.
    pub fn store_mut(&mut self) -> &mut HashMap<K, V> {
        &mut self.store
    }

    /// Rebuild the key set from the store's current keys.
    pub fn resync_keys(&mut self) {
        self.keys = self.store.keys().cloned().collect();
    }

    pub fn into_store(self) -> HashMap<K, V> {
        self.store
    }
}

impl<K, V> Default for DistributedMap<K, V>
where
    K: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> From<HashMap<K, V>> for DistributedMap<K, V>
where
    K: Eq + Hash + Clone,
{
    fn from(store: HashMap<K, V>) -> Self {
        Self::from_store(store)
    }
}
