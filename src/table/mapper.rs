//! Generic mapper kernels over tables.

use super::{replace_accum, Master, Table, TableId, TableKey, TableValue};
use crate::error::Result;
use tracing::debug;

/// Map every pair of `src` through `f` into `dst`.
///
/// `f` returns `None` for no output, or any number of `(key, value)` pairs,
/// each merged into `dst` through its accumulator.
pub fn map_into<K, V, K2, V2, A, I, F>(
    src: &Table<K, V>,
    dst: &Table<K2, V2>,
    f: F,
    args: A,
) -> Result<()>
where
    K: TableKey,
    V: TableValue,
    K2: TableKey,
    V2: TableValue,
    A: Sync,
    I: IntoIterator<Item = (K2, V2)>,
    F: Fn(&K, &V, &A) -> anyhow::Result<Option<I>> + Sync,
{
    let master = src.master()?;
    let ids = (src.id(), dst.id());
    master.foreach_shard(
        src.id(),
        |kernel, (ids, args): &((TableId, TableId), A)| {
            let src: Table<K, V> = kernel.table(ids.0)?;
            let dst: Table<K2, V2> = kernel.table(ids.1)?;
            for (key, value) in src.iter(kernel.current_shard())? {
                if let Some(out) = f(&key, &value, args)? {
                    for (k, v) in out {
                        dst.update(k, v)?;
                    }
                }
            }
            Ok(())
        },
        (ids, args),
    )
}

/// Map a table into a new table sharing its sharder, accumulator and
/// selector.
pub fn map_items<K, V, A, I, F>(src: &Table<K, V>, f: F, args: A) -> Result<Table<K, V>>
where
    K: TableKey,
    V: TableValue,
    A: Sync,
    I: IntoIterator<Item = (K, V)>,
    F: Fn(&K, &V, &A) -> anyhow::Result<Option<I>> + Sync,
{
    let master = src.master()?;
    let dst = master.create_table_with_shards(
        src.num_shards(),
        src.sharder(),
        src.accum(),
        src.selector(),
    )?;
    map_into(src, &dst, f, args)?;
    debug!(src = %src.id(), dst = %dst.id(), "mapped table");
    Ok(dst)
}

/// Map a table onto itself.
pub fn map_inplace<K, V, A, I, F>(table: &Table<K, V>, f: F, args: A) -> Result<()>
where
    K: TableKey,
    V: TableValue,
    A: Sync,
    I: IntoIterator<Item = (K, V)>,
    F: Fn(&K, &V, &A) -> anyhow::Result<Option<I>> + Sync,
{
    map_into(table, table, f, args)
}

/// Distinct keys of a table, collected through a temporary key table.
pub fn keys<K: TableKey, V: TableValue>(table: &Table<K, V>) -> Result<Vec<K>> {
    let master: Master = table.master()?;
    let scratch: Table<K, u32> = master.create_table_with_shards(
        table.num_shards(),
        table.sharder(),
        replace_accum(),
        None,
    )?;
    let mapped = map_into(
        table,
        &scratch,
        |k: &K, _v: &V, _: &()| Ok(Some([(k.clone(), 1u32)])),
        (),
    );
    let keys = mapped.and_then(|_| Ok(scratch.iter_all()?.map(|(k, _)| k).collect()));
    scratch.destroy()?;
    keys
}

/// Every pair stored in a table.
pub fn fetch<K: TableKey, V: TableValue>(table: &Table<K, V>) -> Result<Vec<(K, V)>> {
    Ok(table.iter_all()?.collect())
}
