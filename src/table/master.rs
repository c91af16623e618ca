//! Table registry and kernel dispatch.
//!
//! The [`Master`] creates tables, resolves table ids back to typed handles,
//! and fans kernels out across shards. Kernels run on a dedicated rayon pool,
//! one task per shard; non-blocking updates they issue are applied by the
//! worker lanes owning the destination shards.

use super::rpc::WorkerPool;
use super::{Accumulator, Selector, Sharder, Table, TableId, TableInner, TableKey, TableValue};
use crate::config::SpartanConfig;
use crate::error::{Error, Result};
use crate::local::codegen::{Codegen, FunctionCompiler};
use dashmap::DashMap;
use parking_lot::RwLock;
use rayon::prelude::*;
use std::any::Any;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// Type-erased view of a registered table.
pub(crate) trait RegisteredTable: Send + Sync {
    fn num_shards(&self) -> usize;
    fn is_destroyed(&self) -> bool;
    fn gate(&self) -> &RwLock<()>;
    fn release(&self);
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

impl<K: TableKey, V: TableValue> RegisteredTable for TableInner<K, V> {
    fn num_shards(&self) -> usize {
        self.shards.len()
    }

    fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }

    fn gate(&self) -> &RwLock<()> {
        self.dispatch_gate()
    }

    fn release(&self) {
        TableInner::release(self)
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

pub(crate) struct MasterInner {
    config: SpartanConfig,
    next_id: AtomicU64,
    tables: DashMap<TableId, Arc<dyn RegisteredTable>>,
    workers: Arc<WorkerPool>,
    kernels: rayon::ThreadPool,
    codegen: Arc<Codegen>,
}

/// Handle to the runtime. Cheap to clone.
#[derive(Clone)]
pub struct Master {
    inner: Arc<MasterInner>,
}

impl std::fmt::Debug for Master {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Master")
            .field("workers", &self.inner.workers.len())
            .field("tables", &self.inner.tables.len())
            .finish()
    }
}

/// Per-shard dispatch context handed to a kernel.
pub struct Kernel<'a> {
    master: &'a Master,
    table: TableId,
    shard: usize,
}

impl<'a> Kernel<'a> {
    pub fn master(&self) -> &'a Master {
        self.master
    }

    /// Shard this invocation is bound to.
    pub fn current_shard(&self) -> usize {
        self.shard
    }

    /// Table the dispatch was issued against.
    pub fn current_table(&self) -> TableId {
        self.table
    }

    /// Resolve any table; reads go to its local shard storage and writes go
    /// through its update path.
    pub fn table<K: TableKey, V: TableValue>(&self, id: TableId) -> Result<Table<K, V>> {
        self.master.table(id)
    }
}

impl Master {
    /// Start a runtime with the built-in function compiler.
    pub fn start(config: SpartanConfig) -> Result<Self> {
        let codegen = Codegen::builtin();
        Self::build(config, codegen)
    }

    /// Start a runtime with a custom compiled-function provider.
    pub fn with_compiler(
        config: SpartanConfig,
        compiler: Arc<dyn FunctionCompiler>,
    ) -> Result<Self> {
        Self::build(config, Codegen::new(compiler))
    }

    fn build(config: SpartanConfig, codegen: Codegen) -> Result<Self> {
        let workers = config.runtime.workers.max(1);
        let pool = WorkerPool::start(workers, config.runtime.update_queue_capacity)?;
        let kernels = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("spartan-kernel-{i}"))
            .build()
            .map_err(|e| Error::Io(std::io::Error::other(e)))?;
        info!(
            workers,
            default_shards = config.runtime.default_shards,
            tile_dim = config.array.tile_dim,
            "spartan master started"
        );
        Ok(Self {
            inner: Arc::new(MasterInner {
                config,
                next_id: AtomicU64::new(0),
                tables: DashMap::new(),
                workers: Arc::new(pool),
                kernels,
                codegen: Arc::new(codegen),
            }),
        })
    }

    pub(crate) fn from_inner(inner: Arc<MasterInner>) -> Self {
        Self { inner }
    }

    pub fn config(&self) -> &SpartanConfig {
        &self.inner.config
    }

    pub fn codegen(&self) -> &Arc<Codegen> {
        &self.inner.codegen
    }

    pub fn num_workers(&self) -> usize {
        self.inner.workers.len()
    }

    /// Number of live tables.
    pub fn num_tables(&self) -> usize {
        self.inner.tables.len()
    }

    /// Create a table with the configured default shard count.
    pub fn create_table<K: TableKey, V: TableValue>(
        &self,
        sharder: Sharder<K>,
        accum: Accumulator<V>,
        selector: Option<Selector<K, V>>,
    ) -> Result<Table<K, V>> {
        self.create_table_with_shards(
            self.inner.config.runtime.default_shards,
            sharder,
            accum,
            selector,
        )
    }

    pub fn create_table_with_shards<K: TableKey, V: TableValue>(
        &self,
        num_shards: usize,
        sharder: Sharder<K>,
        accum: Accumulator<V>,
        selector: Option<Selector<K, V>>,
    ) -> Result<Table<K, V>> {
        if num_shards == 0 {
            return Err(Error::InvariantViolation {
                context: "create table",
                expected: "at least one shard".to_string(),
                actual: "0 shards".to_string(),
            });
        }
        let id = TableId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let inner = Arc::new(TableInner::new(
            id,
            num_shards,
            sharder,
            accum,
            selector,
            Arc::clone(&self.inner.workers),
            Arc::downgrade(&self.inner),
        ));
        self.inner
            .tables
            .insert(id, Arc::clone(&inner) as Arc<dyn RegisteredTable>);
        debug!(table = %id, num_shards, "created table");
        Ok(Table::from_inner(inner))
    }

    /// Typed handle to a registered table.
    pub fn table<K: TableKey, V: TableValue>(&self, id: TableId) -> Result<Table<K, V>> {
        let entry = self.entry(id)?;
        entry
            .into_any()
            .downcast::<TableInner<K, V>>()
            .map(Table::from_inner)
            .map_err(|_| Error::TableTypeMismatch(id))
    }

    fn entry(&self, id: TableId) -> Result<Arc<dyn RegisteredTable>> {
        self.inner
            .tables
            .get(&id)
            .map(|e| Arc::clone(e.value()))
            .ok_or(Error::UnknownTable(id))
    }

    /// Run `kernel` once per shard of `table` and block until every shard
    /// has finished. The first kernel failure aborts the dispatch.
    #[instrument(skip(self, kernel, args), level = "debug")]
    pub fn foreach_shard<A, F>(&self, table: TableId, kernel: F, args: A) -> Result<()>
    where
        A: Sync,
        F: Fn(&Kernel<'_>, &A) -> anyhow::Result<()> + Sync,
    {
        let entry = self.entry(table)?;
        // Shared: nested dispatches from inside a kernel must not block.
        let _dispatch = entry.gate().read_recursive();
        if entry.is_destroyed() {
            return Err(Error::TableDestroyed(table));
        }
        let shards = entry.num_shards();
        debug!(table = %table, shards, "dispatching kernel");

        self.inner.kernels.install(|| {
            (0..shards).into_par_iter().try_for_each(|shard| {
                let ctx = Kernel {
                    master: self,
                    table,
                    shard,
                };
                kernel(&ctx, &args).map_err(|cause| Error::KernelFailed {
                    table,
                    shard,
                    cause,
                })
            })
        })
    }

    /// Reclaim a table's storage and drop it from the registry. Waits for
    /// dispatches already running against the table.
    pub fn destroy(&self, id: TableId) -> Result<()> {
        let (_, entry) = self
            .inner
            .tables
            .remove(&id)
            .ok_or(Error::UnknownTable(id))?;
        entry.release();
        debug!(table = %id, "destroyed table");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::{mod_sharder, replace_accum, sum_accum, TableState};

    fn master(workers: usize) -> Master {
        Master::start(SpartanConfig::for_tests(workers, 4)).unwrap()
    }

    #[test]
    fn foreach_shard_visits_every_shard_once() {
        let master = master(3);
        let table: Table<u64, u64> = master
            .create_table_with_shards(7, mod_sharder(), replace_accum(), None)
            .unwrap();
        let seen: Table<usize, u64> = master
            .create_table(mod_sharder(), sum_accum(), None)
            .unwrap();
        let seen_id = seen.id();
        master
            .foreach_shard(
                table.id(),
                |k, seen_id: &TableId| {
                    let seen: Table<usize, u64> = k.table(*seen_id)?;
                    seen.update(k.current_shard(), 1)?;
                    Ok(())
                },
                seen_id,
            )
            .unwrap();
        let mut pairs: Vec<_> = seen.iter_all().unwrap().collect();
        pairs.sort();
        assert_eq!(pairs, (0..7).map(|s| (s, 1)).collect::<Vec<_>>());
    }

    #[test]
    fn kernel_failure_is_reported_with_shard() {
        let master = master(2);
        let table: Table<u64, u64> = master
            .create_table_with_shards(4, mod_sharder(), replace_accum(), None)
            .unwrap();
        let err = master
            .foreach_shard(
                table.id(),
                |k, _: &()| {
                    if k.current_shard() == 2 {
                        anyhow::bail!("boom");
                    }
                    Ok(())
                },
                (),
            )
            .unwrap_err();
        match err {
            Error::KernelFailed { table: id, shard, cause } => {
                assert_eq!(id, table.id());
                assert_eq!(shard, 2);
                assert_eq!(cause.to_string(), "boom");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn nested_dispatch_does_not_deadlock() {
        let master = master(2);
        let outer: Table<u64, u64> = master
            .create_table_with_shards(2, mod_sharder(), replace_accum(), None)
            .unwrap();
        let inner: Table<u64, u64> = master
            .create_table_with_shards(2, mod_sharder(), sum_accum(), None)
            .unwrap();
        let inner_id = inner.id();
        master
            .foreach_shard(
                outer.id(),
                |k, inner_id: &TableId| {
                    k.master().foreach_shard(
                        *inner_id,
                        |k2, _: &()| {
                            let t: Table<u64, u64> = k2.table(k2.current_table())?;
                            t.update(0, 1)?;
                            Ok(())
                        },
                        (),
                    )?;
                    Ok(())
                },
                inner_id,
            )
            .unwrap();
        assert_eq!(inner.get(&0).unwrap(), Some(4));
    }

    #[test]
    fn registry_rejects_wrong_types_and_unknown_ids() {
        let master = master(1);
        let table: Table<u64, u64> = master
            .create_table(mod_sharder(), replace_accum(), None)
            .unwrap();
        assert!(matches!(
            master.table::<u64, String>(table.id()),
            Err(Error::TableTypeMismatch(_))
        ));
        assert!(matches!(
            master.table::<u64, u64>(TableId(999)),
            Err(Error::UnknownTable(_))
        ));
        assert!(master
            .create_table_with_shards::<u64, u64>(0, mod_sharder(), replace_accum(), None)
            .is_err());
    }

    #[test]
    fn destroy_after_dispatch_and_dispatch_after_destroy() {
        let master = master(2);
        let table: Table<u64, u64> = master
            .create_table(mod_sharder(), replace_accum(), None)
            .unwrap();
        let id = table.id();
        master.foreach_shard(id, |_, _: &()| Ok(()), ()).unwrap();
        assert_eq!(master.num_tables(), 1);
        master.destroy(id).unwrap();
        assert_eq!(master.num_tables(), 0);
        assert_eq!(table.state(), TableState::Destroyed);
        assert!(matches!(
            master.foreach_shard(id, |_, _: &()| Ok(()), ()),
            Err(Error::UnknownTable(_))
        ));
        assert!(matches!(master.destroy(id), Err(Error::UnknownTable(_))));
    }
}
