//! # Table Module
//!
//! Distributed partitioned key/value tables. A table is split into a fixed
//! number of shards at creation; a [`Sharder`] routes every key to its shard,
//! an [`Accumulator`] merges updates into existing values, and an optional
//! [`Selector`] filters values on read.
//!
//! ```text
//!   update(k, v) ──► sharder(k, n) ──► shard i (worker i % lanes)
//!                                         │
//!                               accumulator(current, v)
//! ```
//!
//! Each shard owns its storage exclusively behind its own lock, so updates
//! arriving concurrently at one key are applied one at a time by the owning
//! shard.

pub mod mapper;
pub mod master;
pub mod rpc;

pub use mapper::{fetch, keys, map_inplace, map_into, map_items};
pub use master::{Kernel, Master};
pub use rpc::{FutureGroup, PendingUpdate};

use crate::error::{Error, Result};
use parking_lot::{Mutex, RwLock};
use rustc_hash::{FxHashMap, FxHasher};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use self::master::MasterInner;
use self::rpc::WorkerPool;

/// Stable identity of a table within one master.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TableId(pub u64);

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t{}", self.0)
    }
}

/// Maps a key and a shard count to the owning shard.
pub type Sharder<K> = Arc<dyn Fn(&K, usize) -> usize + Send + Sync>;

/// Merges an incoming update into the current value stored at a key.
///
/// Results are only independent of arrival order when the accumulator is
/// commutative and associative.
pub type Accumulator<V> = Arc<dyn Fn(&mut V, V) -> anyhow::Result<()> + Send + Sync>;

/// Read-side transform applied by [`Table::get`].
pub type Selector<K, V> = Arc<dyn Fn(&K, &V) -> V + Send + Sync>;

pub trait TableKey: Clone + Eq + Hash + Send + Sync + 'static {}
impl<T: Clone + Eq + Hash + Send + Sync + 'static> TableKey for T {}

pub trait TableValue: Clone + Send + Sync + 'static {}
impl<T: Clone + Send + Sync + 'static> TableValue for T {}

/// Hash-modulo sharder.
pub fn mod_sharder<K: Hash>() -> Sharder<K> {
    Arc::new(|key: &K, num_shards: usize| {
        let mut hasher = FxHasher::default();
        key.hash(&mut hasher);
        (hasher.finish() as usize) % num_shards.max(1)
    })
}

/// Accumulator keeping the most recent update.
pub fn replace_accum<V: Send + Sync + 'static>() -> Accumulator<V> {
    Arc::new(|current: &mut V, update: V| {
        *current = update;
        Ok(())
    })
}

/// Accumulator adding updates into the current value.
pub fn sum_accum<V: std::ops::AddAssign + Send + Sync + 'static>() -> Accumulator<V> {
    Arc::new(|current: &mut V, update: V| {
        *current += update;
        Ok(())
    })
}

/// Lifecycle of a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableState {
    Created,
    Populated,
    Destroyed,
}

pub(crate) struct TableInner<K, V> {
    id: TableId,
    shards: Vec<Mutex<FxHashMap<K, V>>>,
    sharder: Sharder<K>,
    accum: Accumulator<V>,
    selector: Option<Selector<K, V>>,
    destroyed: AtomicBool,
    /// Held shared by running dispatches, exclusively by `destroy`.
    dispatch_gate: RwLock<()>,
    workers: Arc<WorkerPool>,
    master: Weak<MasterInner>,
}

impl<K: TableKey, V: TableValue> TableInner<K, V> {
    pub(crate) fn new(
        id: TableId,
        num_shards: usize,
        sharder: Sharder<K>,
        accum: Accumulator<V>,
        selector: Option<Selector<K, V>>,
        workers: Arc<WorkerPool>,
        master: Weak<MasterInner>,
    ) -> Self {
        Self {
            id,
            shards: (0..num_shards.max(1))
                .map(|_| Mutex::new(FxHashMap::default()))
                .collect(),
            sharder,
            accum,
            selector,
            destroyed: AtomicBool::new(false),
            dispatch_gate: RwLock::new(()),
            workers,
            master,
        }
    }

    fn check_live(&self) -> Result<()> {
        if self.destroyed.load(Ordering::Acquire) {
            return Err(Error::TableDestroyed(self.id));
        }
        Ok(())
    }

    fn apply_update(&self, shard: usize, key: K, value: V) -> Result<()> {
        self.check_live()?;
        let mut entries = self.shards[shard].lock();
        match entries.get_mut(&key) {
            Some(current) => (self.accum)(current, value).map_err(|cause| Error::Accumulator {
                table: self.id,
                cause,
            }),
            None => {
                entries.insert(key, value);
                Ok(())
            }
        }
    }

    /// Reclaim all shard storage. Waits for running dispatches to finish.
    pub(crate) fn release(&self) {
        let _exclusive = self.dispatch_gate.write();
        self.destroyed.store(true, Ordering::Release);
        for shard in &self.shards {
            *shard.lock() = FxHashMap::default();
        }
    }

    pub(crate) fn dispatch_gate(&self) -> &RwLock<()> {
        &self.dispatch_gate
    }
}

/// Handle to a distributed table. Cloning shares the same table.
pub struct Table<K, V> {
    inner: Arc<TableInner<K, V>>,
}

impl<K, V> Clone for Table<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K, V> fmt::Debug for Table<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Table")
            .field("id", &self.inner.id)
            .field("num_shards", &self.inner.shards.len())
            .finish()
    }
}

impl<K: TableKey, V: TableValue> Table<K, V> {
    pub(crate) fn from_inner(inner: Arc<TableInner<K, V>>) -> Self {
        Self { inner }
    }

    pub fn id(&self) -> TableId {
        self.inner.id
    }

    pub fn num_shards(&self) -> usize {
        self.inner.shards.len()
    }

    pub fn sharder(&self) -> Sharder<K> {
        Arc::clone(&self.inner.sharder)
    }

    pub fn accum(&self) -> Accumulator<V> {
        Arc::clone(&self.inner.accum)
    }

    pub fn selector(&self) -> Option<Selector<K, V>> {
        self.inner.selector.clone()
    }

    /// Master this table is registered with.
    pub fn master(&self) -> Result<Master> {
        self.inner
            .master
            .upgrade()
            .map(Master::from_inner)
            .ok_or(Error::TableDestroyed(self.inner.id))
    }

    pub fn state(&self) -> TableState {
        if self.inner.destroyed.load(Ordering::Acquire) {
            TableState::Destroyed
        } else if self.inner.shards.iter().any(|s| !s.lock().is_empty()) {
            TableState::Populated
        } else {
            TableState::Created
        }
    }

    /// Shard owning `key`.
    #[inline]
    pub fn shard_for(&self, key: &K) -> usize {
        (self.inner.sharder)(key, self.num_shards()) % self.num_shards()
    }

    /// Value stored at `key`, passed through the selector when one is set.
    pub fn get(&self, key: &K) -> Result<Option<V>> {
        self.inner.check_live()?;
        let shard = self.shard_for(key);
        let entries = self.inner.shards[shard].lock();
        Ok(entries.get(key).map(|value| match &self.inner.selector {
            Some(select) => select(key, value),
            None => value.clone(),
        }))
    }

    /// Blocking update: merge `value` into `key` through the accumulator, or
    /// store it when the key is new.
    pub fn update(&self, key: K, value: V) -> Result<()> {
        let shard = self.shard_for(&key);
        self.inner.apply_update(shard, key, value)
    }

    /// Non-blocking update applied by the worker owning the key's shard.
    pub fn update_async(&self, key: K, value: V) -> Result<PendingUpdate> {
        self.inner.check_live()?;
        let shard = self.shard_for(&key);
        let worker = self.inner.workers.worker_for_shard(shard);
        let (tx, pending) = PendingUpdate::channel(worker);
        let inner = Arc::clone(&self.inner);
        self.inner.workers.submit(
            worker,
            Box::new(move || {
                let _ = tx.send(inner.apply_update(shard, key, value));
            }),
        )?;
        Ok(pending)
    }

    /// Cursor over the pairs stored in one shard.
    pub fn iter(&self, shard: usize) -> Result<TableIter<K, V>> {
        self.inner.check_live()?;
        if shard >= self.num_shards() {
            return Err(Error::InvariantViolation {
                context: "table iterate",
                expected: format!("shard < {}", self.num_shards()),
                actual: format!("shard {shard}"),
            });
        }
        Ok(TableIter::new(self.clone(), shard..shard + 1))
    }

    /// Cursor over every shard in shard order.
    pub fn iter_all(&self) -> Result<TableIter<K, V>> {
        self.inner.check_live()?;
        Ok(TableIter::new(self.clone(), 0..self.num_shards()))
    }

    /// Number of entries held across all shards.
    pub fn len(&self) -> usize {
        self.inner.shards.iter().map(|s| s.lock().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Release storage and unregister the table.
    pub fn destroy(&self) -> Result<()> {
        match self.inner.master.upgrade() {
            Some(master) => Master::from_inner(master).destroy(self.id()),
            None => {
                self.inner.release();
                Ok(())
            }
        }
    }

    fn snapshot(&self, shard: usize) -> Vec<(K, V)> {
        self.inner.shards[shard]
            .lock()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

/// Forward-only cursor over table entries.
///
/// Each shard is read in one step when the cursor reaches it, so the shard
/// lock is never held while the caller consumes pairs.
pub struct TableIter<K, V> {
    table: Table<K, V>,
    shards: std::ops::Range<usize>,
    current: std::vec::IntoIter<(K, V)>,
}

impl<K: TableKey, V: TableValue> TableIter<K, V> {
    fn new(table: Table<K, V>, shards: std::ops::Range<usize>) -> Self {
        Self {
            table,
            shards,
            current: Vec::new().into_iter(),
        }
    }
}

impl<K: TableKey, V: TableValue> Iterator for TableIter<K, V> {
    type Item = (K, V);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(item) = self.current.next() {
                return Some(item);
            }
            let shard = self.shards.next()?;
            self.current = self.table.snapshot(shard).into_iter();
        }
    }
}

/// A table reference that is either a live local handle or a bare id to be
/// resolved against a master on the receiving side.
///
/// Serializes as the table id only.
pub enum TableRef<K, V> {
    Local(Table<K, V>),
    Remote(TableId),
}

impl<K: TableKey, V: TableValue> TableRef<K, V> {
    pub fn id(&self) -> TableId {
        match self {
            TableRef::Local(table) => table.id(),
            TableRef::Remote(id) => *id,
        }
    }

    pub fn resolve(&self, master: &Master) -> Result<Table<K, V>> {
        match self {
            TableRef::Local(table) => Ok(table.clone()),
            TableRef::Remote(id) => master.table(*id),
        }
    }
}

impl<K: TableKey, V: TableValue> From<Table<K, V>> for TableRef<K, V> {
    fn from(table: Table<K, V>) -> Self {
        TableRef::Local(table)
    }
}

impl<K: TableKey, V: TableValue> Serialize for TableRef<K, V> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.id().serialize(serializer)
    }
}

impl<'de, K, V> Deserialize<'de> for TableRef<K, V> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        TableId::deserialize(deserializer).map(TableRef::Remote)
    }
}

impl<K, V> fmt::Debug for TableRef<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TableRef::Local(table) => write!(f, "Local({})", table.inner.id),
            TableRef::Remote(id) => write!(f, "Remote({id})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SpartanConfig;

    fn master() -> Master {
        Master::start(SpartanConfig::for_tests(2, 4)).unwrap()
    }

    #[test]
    fn update_merges_through_accumulator() {
        let master = master();
        let table: Table<u64, i64> = master
            .create_table_with_shards(4, mod_sharder(), sum_accum(), None)
            .unwrap();
        assert_eq!(table.state(), TableState::Created);
        table.update(1, 5).unwrap();
        table.update(1, 7).unwrap();
        table.update(2, 1).unwrap();
        assert_eq!(table.get(&1).unwrap(), Some(12));
        assert_eq!(table.get(&3).unwrap(), None);
        assert_eq!(table.state(), TableState::Populated);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn selector_filters_reads() {
        let master = master();
        let selector: Selector<u64, i64> = Arc::new(|_k, v| v * 10);
        let table: Table<u64, i64> = master
            .create_table(mod_sharder(), replace_accum(), Some(selector))
            .unwrap();
        table.update(4, 2).unwrap();
        assert_eq!(table.get(&4).unwrap(), Some(20));
    }

    #[test]
    fn async_updates_complete_before_group_returns() {
        let master = master();
        let table: Table<u64, i64> = master
            .create_table_with_shards(8, mod_sharder(), sum_accum(), None)
            .unwrap();
        let mut group = FutureGroup::new();
        for i in 0..100u64 {
            group.append(table.update_async(i % 10, 1).unwrap());
        }
        group.wait().unwrap();
        for k in 0..10u64 {
            assert_eq!(table.get(&k).unwrap(), Some(10));
        }
    }

    #[test]
    fn iterate_all_is_ordered_by_shard() {
        let master = master();
        let table: Table<u64, u64> = master
            .create_table_with_shards(4, mod_sharder(), replace_accum(), None)
            .unwrap();
        for i in 0..32u64 {
            table.update(i, i * 2).unwrap();
        }
        let shards: Vec<usize> = table
            .iter_all()
            .unwrap()
            .map(|(k, _)| table.shard_for(&k))
            .collect();
        assert_eq!(shards.len(), 32);
        assert!(shards.windows(2).all(|w| w[0] <= w[1]));

        let first: Vec<_> = table.iter(0).unwrap().collect();
        let again: Vec<_> = table.iter(0).unwrap().collect();
        assert_eq!(first, again);
        assert!(table.iter(4).is_err());
    }

    #[test]
    fn destroy_reclaims_storage() {
        let master = master();
        let table: Table<u64, u64> = master
            .create_table(mod_sharder(), replace_accum(), None)
            .unwrap();
        table.update(1, 1).unwrap();
        let id = table.id();
        table.destroy().unwrap();
        assert_eq!(table.state(), TableState::Destroyed);
        assert_eq!(table.len(), 0);
        assert!(matches!(table.get(&1), Err(Error::TableDestroyed(_))));
        assert!(matches!(table.update(2, 2), Err(Error::TableDestroyed(_))));
        assert!(matches!(master.table::<u64, u64>(id), Err(Error::UnknownTable(_))));
    }

    #[test]
    fn table_ref_serializes_as_id() {
        let master = master();
        let table: Table<u64, u64> = master
            .create_table(mod_sharder(), replace_accum(), None)
            .unwrap();
        table.update(3, 9).unwrap();
        let json = serde_json::to_string(&TableRef::from(table.clone())).unwrap();
        assert_eq!(json, table.id().0.to_string());

        let remote: TableRef<u64, u64> = serde_json::from_str(&json).unwrap();
        assert!(matches!(remote, TableRef::Remote(_)));
        let resolved = remote.resolve(&master).unwrap();
        assert_eq!(resolved.get(&3).unwrap(), Some(9));
        assert!(matches!(
            TableRef::<u64, String>::Remote(table.id()).resolve(&master),
            Err(Error::TableTypeMismatch(_))
        ));
    }
}
