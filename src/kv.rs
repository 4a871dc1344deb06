//! Thin wrapper over the embedded transactional key-value engine.
//!
//! Every logical "bucket" the store needs (per-feed logs, the global log,
//! the pointer index, each plug-in's index tables) is a `redb` table keyed
//! by raw bytes. This module owns table name constants and small helpers;
//! callers open write/read transactions directly against the `redb::Database`.

use redb::{Database, ReadableTable, TableDefinition};
use std::path::Path;
use std::sync::Arc;

use crate::error::Result;

pub const FEED_LOG: TableDefinition<&[u8], &[u8]> = TableDefinition::new("feed_log");
pub const GLOBAL_LOG: TableDefinition<u64, &[u8]> = TableDefinition::new("global_log");
pub const POINTER_IDX: TableDefinition<&[u8], &[u8]> = TableDefinition::new("pointer_idx");
pub const FEED_META: TableDefinition<&[u8], &[u8]> = TableDefinition::new("feed_meta");
pub const GRAPH: TableDefinition<&[u8], &[u8]> = TableDefinition::new("graph");
pub const CHANNELS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("channels");
pub const SOCIAL: TableDefinition<&[u8], &[u8]> = TableDefinition::new("social");
pub const GIT: TableDefinition<&[u8], &[u8]> = TableDefinition::new("git");
pub const DNS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("dns");
pub const PUBS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("pubs");
pub const BLOB_META: TableDefinition<&[u8], &[u8]> = TableDefinition::new("blob_meta");

/// Opens (creating if needed) every table the store's components use so a
/// fresh database file is never missing a table a read transaction expects.
pub fn open(path: &Path) -> Result<Arc<Database>> {
    let db = Database::create(path)?;
    {
        let txn = db.begin_write()?;
        for table in [
            FEED_LOG, POINTER_IDX, FEED_META, GRAPH, CHANNELS, SOCIAL, GIT, DNS, PUBS, BLOB_META,
        ] {
            txn.open_table(table)?;
        }
        txn.open_table(GLOBAL_LOG)?;
        txn.commit()?;
    }
    Ok(Arc::new(db))
}

/// Read a single value out of a byte-keyed table, if present.
pub fn get_bytes(
    db: &Database,
    table: TableDefinition<&[u8], &[u8]>,
    key: &[u8],
) -> Result<Option<Vec<u8>>> {
    let txn = db.begin_read()?;
    let t = txn.open_table(table)?;
    let result = t.get(key)?.map(|v| v.value().to_vec());
    Ok(result)
}

/// Insert `value` under `prefix ++ timestamp_ms (BE)`, incrementing the
/// millisecond suffix until an unused key is found. Gives a dense,
/// iteration-order-stable key for a time index even when several messages
/// land in the same millisecond.
pub fn insert_dense_time(
    table: &mut redb::Table<&[u8], &[u8]>,
    prefix: &[u8],
    timestamp_ms: i64,
    value: &[u8],
) -> Result<Vec<u8>> {
    let mut ts = timestamp_ms;
    loop {
        let mut key = prefix.to_vec();
        key.extend_from_slice(&ts.to_be_bytes());
        if table.get(key.as_slice())?.is_none() {
            table.insert(key.as_slice(), value)?;
            return Ok(key);
        }
        ts += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn open_creates_all_tables() {
        let dir = tempdir().unwrap();
        let db = open(&dir.path().join("store.redb")).unwrap();
        assert!(get_bytes(&db, FEED_META, b"missing").unwrap().is_none());
    }
}
