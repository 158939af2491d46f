use super::handle::{MapError, MapHandle, MapProvider, MapResult};
use super::partitioner::{DEFAULT_PARTITIONS, PartitionManager};
use super::predicate::Predicate;

use dashmap::DashMap;
use dashmap::mapref::one::Ref;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::sync::Notify;
use tokio::sync::futures::Notified;

/// Identity that key locks are held under. One per map handle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct OwnerId(pub String);

impl OwnerId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl Default for OwnerId {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone)]
struct KeyLockState {
    owner: OwnerId,
    depth: u32,
}

/// Everything stored under one key. A slot may exist with no value while
/// its key is locked.
#[derive(Debug, Clone, Default)]
struct Slot {
    value: Option<Value>,
    lock: Option<KeyLockState>,
}

impl Slot {
    fn is_vacant(&self) -> bool {
        self.value.is_none() && self.lock.is_none()
    }

    fn writable_by(&self, owner: &OwnerId) -> bool {
        self.lock.as_ref().is_none_or(|lock| lock.owner == *owner)
    }
}

/// One named map, sharded into local partitions.
///
/// Writes to a key locked by another owner wait for the unlock; reads never wait.
pub struct PartitionedMap {
    name: String,
    local_data: DashMap<u32, DashMap<String, Slot>>,
    partitioner: PartitionManager,
    released: Notify,
}

impl PartitionedMap {
    /// An empty map. Partitions are created as keys land in them.
    pub fn new(name: &str, partitioner: PartitionManager) -> Self {
        Self {
            name: name.to_string(),
            local_data: DashMap::new(),
            partitioner,
            released: Notify::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn partition(&self, key: &str) -> Ref<'_, u32, DashMap<String, Slot>> {
        let partition = self.partitioner.get_partition(key);
        if let Some(partition_map) = self.local_data.get(&partition) {
            return partition_map;
        }
        self.local_data.entry(partition).or_default().downgrade()
    }

    fn check_value(&self, value: &Value) -> MapResult<()> {
        if value.is_null() {
            return Err(MapError::NullValue {
                map: self.name.clone(),
            });
        }
        Ok(())
    }

    /// Applies `f` to the key's slot once no other owner holds the key.
    async fn mutate<R, F>(&self, owner: &OwnerId, key: &str, mut f: F) -> R
    where
        F: FnOnce(&mut Slot) -> R,
    {
        loop {
            match self.try_mutate(owner, key, f) {
                Ok(result) => return result,
                Err((returned, released)) => {
                    tracing::debug!("Key '{}' of map '{}' is locked, waiting", key, self.name);
                    released.await;
                    f = returned;
                }
            }
        }
    }

    // The `Notified` is created while the slot guard is held, so an unlock
    // that happens after the check always wakes it.
    fn try_mutate<R, F>(&self, owner: &OwnerId, key: &str, f: F) -> Result<R, (F, Notified<'_>)>
    where
        F: FnOnce(&mut Slot) -> R,
    {
        let partition = self.partition(key);
        let mut slot = partition.entry(key.to_string()).or_default();
        if !slot.writable_by(owner) {
            return Err((f, self.released.notified()));
        }

        let result = f(&mut *slot);
        let vacant = slot.is_vacant();
        drop(slot);

        if vacant {
            partition.remove_if(key, |_, slot| slot.is_vacant());
        }
        Ok(result)
    }

    /// Stores `value` under `key` and returns the previous value. Rejects `null`.
    pub async fn put(&self, owner: &OwnerId, key: &str, value: Value) -> MapResult<Option<Value>> {
        self.check_value(&value)?;
        Ok(self
            .mutate(owner, key, move |slot| slot.value.replace(value))
            .await)
    }

    /// Current value, ignoring locks.
    pub fn get(&self, key: &str) -> Option<Value> {
        let partition = self.partitioner.get_partition(key);
        let partition_map = self.local_data.get(&partition)?;
        let value = partition_map.get(key).and_then(|slot| slot.value.clone());
        value
    }

    /// Present keys only; missing keys are left out of the result.
    pub fn get_all(&self, keys: &BTreeSet<String>) -> BTreeMap<String, Value> {
        keys.iter()
            .filter_map(|key| self.get(key).map(|value| (key.clone(), value)))
            .collect()
    }

    pub async fn remove(&self, owner: &OwnerId, key: &str) -> Option<Value> {
        self.mutate(owner, key, |slot| slot.value.take()).await
    }

    /// Overwrites the value only when the key is present. Returns the old value,
    /// or `None` when nothing was written.
    pub async fn replace(&self, owner: &OwnerId, key: &str, value: Value) -> MapResult<Option<Value>> {
        self.check_value(&value)?;
        Ok(self
            .mutate(owner, key, move |slot| match slot.value {
                Some(_) => slot.value.replace(value),
                None => None,
            })
            .await)
    }

    /// Compare-and-set against the current value. `false` when it differs or is absent.
    pub async fn replace_if(
        &self,
        owner: &OwnerId,
        key: &str,
        expected: Value,
        value: Value,
    ) -> MapResult<bool> {
        self.check_value(&expected)?;
        self.check_value(&value)?;
        Ok(self
            .mutate(owner, key, move |slot| {
                if slot.value.as_ref() != Some(&expected) {
                    return false;
                }
                slot.value = Some(value);
                true
            })
            .await)
    }

    /// Values across all local partitions in no particular order.
    pub fn values(&self, predicate: Option<&Predicate>) -> Vec<Value> {
        let mut values = Vec::new();
        for partition in self.local_data.iter() {
            for slot in partition.iter() {
                if let Some(value) = &slot.value
                    && predicate.is_none_or(|p| p.matches(value))
                {
                    values.push(value.clone());
                }
            }
        }
        values
    }

    /// Drops every value. Locks on locked keys survive.
    pub fn clear(&self) {
        for partition in self.local_data.iter() {
            partition.retain(|_, slot| {
                slot.value = None;
                slot.lock.is_some()
            });
        }
    }

    /// Takes the key lock for `owner`, waiting while another owner holds it.
    /// Locks are reentrant: each `lock` needs a matching `unlock`.
    ///
    /// Dropping the future before it resolves leaves the key untouched.
    pub async fn lock(&self, owner: &OwnerId, key: &str) {
        loop {
            match self.try_lock(owner, key) {
                Ok(()) => return,
                Err(released) => {
                    tracing::debug!("Waiting for lock on key '{}' of map '{}'", key, self.name);
                    released.await;
                }
            }
        }
    }

    fn try_lock(&self, owner: &OwnerId, key: &str) -> Result<(), Notified<'_>> {
        let partition = self.partition(key);
        let mut guard = partition.entry(key.to_string()).or_default();
        let slot = &mut *guard;

        match slot.lock.as_mut() {
            Some(lock) if lock.owner == *owner => {
                lock.depth += 1;
                Ok(())
            }
            Some(_) => Err(self.released.notified()),
            None => {
                slot.lock = Some(KeyLockState {
                    owner: owner.clone(),
                    depth: 1,
                });
                Ok(())
            }
        }
    }

    /// Releases one level of `owner`'s lock and wakes waiting writers once the
    /// key is free. Fails with `NotLockOwner` for anyone else.
    pub fn unlock(&self, owner: &OwnerId, key: &str) -> MapResult<()> {
        let not_owner = || MapError::NotLockOwner {
            map: self.name.clone(),
            key: key.to_string(),
        };

        let partition = self.partition(key);
        let (released, vacant) = {
            let Some(mut guard) = partition.get_mut(key) else {
                return Err(not_owner());
            };
            let slot = &mut *guard;
            match slot.lock.as_mut() {
                Some(lock) if lock.owner == *owner => {
                    lock.depth -= 1;
                    if lock.depth == 0 {
                        slot.lock = None;
                    }
                }
                _ => return Err(not_owner()),
            }
            (slot.lock.is_none(), slot.is_vacant())
        };

        if vacant {
            partition.remove_if(key, |_, slot| slot.is_vacant());
        }
        if released {
            self.released.notify_waiters();
        }
        Ok(())
    }

    pub fn is_locked(&self, key: &str) -> bool {
        let partition = self.partitioner.get_partition(key);
        let Some(partition_map) = self.local_data.get(&partition) else {
            return false;
        };
        let locked = partition_map
            .get(key)
            .is_some_and(|slot| slot.lock.is_some());
        locked
    }

    /// Partitions that currently hold at least one slot.
    pub fn local_partition_count(&self) -> usize {
        self.local_data.len()
    }

    pub fn local_entry_count(&self) -> usize {
        self.local_data
            .iter()
            .map(|partition| {
                partition
                    .iter()
                    .filter(|slot| slot.value.is_some())
                    .count()
            })
            .sum()
    }
}

/// Map and entry totals across a grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridStats {
    pub maps: usize,
    pub entries: usize,
}

/// The embedded grid: named maps created on first use.
pub struct Grid {
    maps: DashMap<String, Arc<PartitionedMap>>,
    num_partitions: u32,
}

impl Grid {
    /// Every map of the grid gets `num_partitions` partitions.
    pub fn new(num_partitions: u32) -> Self {
        Self {
            maps: DashMap::new(),
            num_partitions,
        }
    }

    /// The shared storage behind every handle to `name`.
    pub fn store(&self, name: &str) -> Arc<PartitionedMap> {
        self.maps
            .entry(name.to_string())
            .or_insert_with(|| {
                tracing::info!(
                    "Creating map '{}' with {} partitions",
                    name,
                    self.num_partitions
                );
                Arc::new(PartitionedMap::new(
                    name,
                    PartitionManager::new(self.num_partitions),
                ))
            })
            .clone()
    }

    pub fn map_names(&self) -> Vec<String> {
        self.maps.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Totals over the maps created so far.
    pub fn stats(&self) -> GridStats {
        GridStats {
            maps: self.maps.len(),
            entries: self
                .maps
                .iter()
                .map(|entry| entry.value().local_entry_count())
                .sum(),
        }
    }
}

impl Default for Grid {
    fn default() -> Self {
        Self::new(DEFAULT_PARTITIONS)
    }
}

impl MapProvider for Grid {
    type Map = GridMap;

    /// Every call returns a handle with its own lock owner.
    fn get_map(&self, name: &str) -> GridMap {
        GridMap::new(self.store(name))
    }
}

/// Handle to a map of the embedded grid.
#[derive(Clone)]
pub struct GridMap {
    store: Arc<PartitionedMap>,
    owner: OwnerId,
}

impl GridMap {
    /// A handle with a fresh lock owner.
    pub fn new(store: Arc<PartitionedMap>) -> Self {
        Self::with_owner(store, OwnerId::new())
    }

    pub fn with_owner(store: Arc<PartitionedMap>, owner: OwnerId) -> Self {
        Self { store, owner }
    }

    pub fn owner(&self) -> &OwnerId {
        &self.owner
    }

    pub fn store(&self) -> &Arc<PartitionedMap> {
        &self.store
    }
}

impl MapHandle for GridMap {
    fn name(&self) -> &str {
        self.store.name()
    }

    fn fork(&self) -> Self {
        Self::new(self.store.clone())
    }

    async fn put(&self, key: &str, value: Value) -> MapResult<Option<Value>> {
        self.store.put(&self.owner, key, value).await
    }

    async fn get(&self, key: &str) -> MapResult<Option<Value>> {
        Ok(self.store.get(key))
    }

    async fn get_all(&self, keys: &BTreeSet<String>) -> MapResult<BTreeMap<String, Value>> {
        Ok(self.store.get_all(keys))
    }

    async fn remove(&self, key: &str) -> MapResult<Option<Value>> {
        Ok(self.store.remove(&self.owner, key).await)
    }

    async fn replace(&self, key: &str, value: Value) -> MapResult<Option<Value>> {
        self.store.replace(&self.owner, key, value).await
    }

    async fn replace_if(&self, key: &str, expected: Value, value: Value) -> MapResult<bool> {
        self.store.replace_if(&self.owner, key, expected, value).await
    }

    async fn values(&self) -> MapResult<Vec<Value>> {
        Ok(self.store.values(None))
    }

    async fn values_where(&self, predicate: &Predicate) -> MapResult<Vec<Value>> {
        Ok(self.store.values(Some(predicate)))
    }

    async fn clear(&self) -> MapResult<()> {
        self.store.clear();
        Ok(())
    }

    async fn lock(&self, key: &str) -> MapResult<()> {
        self.store.lock(&self.owner, key).await;
        Ok(())
    }

    async fn unlock(&self, key: &str) -> MapResult<()> {
        self.store.unlock(&self.owner, key)
    }
}
