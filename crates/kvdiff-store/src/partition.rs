//! Table layout of a partition and the blocking transactions over it.
//!
//! Everything here runs synchronously against redb. Callers on an async
//! runtime move commits onto the blocking pool; short point reads are served
//! inline.

use bytes::Bytes;
use kvdiff_types::{Key, KeyValue, Value};
use redb::{Database, ReadableTable, ReadableTableMetadata, TableDefinition};
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::{StoreError, StoreResult};

type BaselineTable<'a> = TableDefinition<'a, &'static [u8], &'static [u8]>;
type SeenTable<'a> = TableDefinition<'a, &'static [u8], ()>;

/// A named partition: a baseline table plus a session-scoped seen table.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Partition {
    name: String,
    baseline: String,
    seen: String,
}

impl Partition {
    /// Derive the table names for partition `name`.
    ///
    /// The name must be non-empty and must not contain `':'`, which
    /// separates the partition name from the table role.
    pub fn new(name: &str) -> StoreResult<Self> {
        if name.is_empty() {
            return Err(StoreError::InvalidPartition {
                name: name.to_string(),
                reason: "empty name",
            });
        }
        if name.contains(':') {
            return Err(StoreError::InvalidPartition {
                name: name.to_string(),
                reason: "name must not contain ':'",
            });
        }

        Ok(Self {
            name: name.to_string(),
            baseline: format!("{name}:baseline"),
            seen: format!("{name}:seen"),
        })
    }

    /// The partition name.
    pub fn name(&self) -> &str {
        &self.name
    }

    fn baseline(&self) -> BaselineTable<'_> {
        TableDefinition::new(&self.baseline)
    }

    fn seen(&self) -> SeenTable<'_> {
        TableDefinition::new(&self.seen)
    }

    /// Make sure the baseline exists and start from an empty seen table,
    /// discarding markers left behind by a session that never closed.
    pub(crate) fn begin_session(&self, db: &Database) -> StoreResult<()> {
        let txn = db.begin_write()?;
        txn.open_table(self.baseline())?;
        let stale = txn.delete_table(self.seen())?;
        txn.open_table(self.seen())?;
        txn.commit()?;

        if stale {
            debug!(partition = %self.name, "discarded seen markers of an unfinished session");
        }
        Ok(())
    }

    /// Drop the session's seen table. The baseline is left untouched.
    pub(crate) fn end_session(&self, db: &Database) -> StoreResult<()> {
        let txn = db.begin_write()?;
        txn.delete_table(self.seen())?;
        txn.commit()?;
        Ok(())
    }

    /// Empty both the baseline and the seen table.
    pub(crate) fn clear(&self, db: &Database) -> StoreResult<()> {
        let txn = db.begin_write()?;
        txn.delete_table(self.baseline())?;
        txn.delete_table(self.seen())?;
        txn.open_table(self.baseline())?;
        txn.open_table(self.seen())?;
        txn.commit()?;
        Ok(())
    }

    /// Insert-or-overwrite `batch` in one transaction.
    ///
    /// Values are stored empty when `records_values` is off.
    pub(crate) fn insert_batch(
        &self,
        db: &Database,
        batch: &[KeyValue],
        records_values: bool,
    ) -> StoreResult<()> {
        let txn = db.begin_write()?;
        {
            let mut table = txn.open_table(self.baseline())?;
            for kv in batch {
                let value: &[u8] = if records_values { &kv.value[..] } else { &[] };
                table.insert(&kv.key[..], value)?;
            }
        }
        txn.commit()?;
        Ok(())
    }

    /// Record seen markers for `keys` in one transaction.
    pub(crate) fn mark_batch(&self, db: &Database, keys: &[Key]) -> StoreResult<()> {
        let txn = db.begin_write()?;
        {
            let mut table = txn.open_table(self.seen())?;
            for key in keys {
                table.insert(&key[..], ())?;
            }
        }
        txn.commit()?;
        Ok(())
    }

    /// Point read on the baseline.
    pub(crate) fn get(&self, db: &Database, key: &[u8]) -> StoreResult<Option<Value>> {
        let txn = db.begin_read()?;
        let table = txn.open_table(self.baseline())?;
        let value = table.get(key)?.map(|v| Bytes::copy_from_slice(v.value()));
        Ok(value)
    }

    /// Number of baseline entries.
    pub(crate) fn baseline_len(&self, db: &Database) -> StoreResult<u64> {
        let txn = db.begin_read()?;
        let table = txn.open_table(self.baseline())?;
        Ok(table.len()?)
    }

    /// Number of committed seen markers.
    #[cfg(test)]
    pub(crate) fn seen_len(&self, db: &Database) -> StoreResult<u64> {
        let txn = db.begin_read()?;
        let table = txn.open_table(self.seen())?;
        Ok(table.len()?)
    }

    /// Send every baseline key without a seen marker, in key order.
    ///
    /// Stops quietly once the receiving side is gone.
    pub(crate) fn scan_unseen(&self, db: &Database, tx: mpsc::Sender<Key>) -> StoreResult<()> {
        let txn = db.begin_read()?;
        let baseline = txn.open_table(self.baseline())?;
        let seen = txn.open_table(self.seen())?;

        for entry in baseline.iter()? {
            let (key, _) = entry?;
            let key = key.value();
            if seen.get(key)?.is_some() {
                continue;
            }
            if tx.blocking_send(Bytes::copy_from_slice(key)).is_err() {
                break;
            }
        }
        Ok(())
    }

    /// Send every baseline pair, in key order.
    ///
    /// Stops quietly once the receiving side is gone.
    pub(crate) fn scan_baseline(
        &self,
        db: &Database,
        tx: mpsc::Sender<KeyValue>,
    ) -> StoreResult<()> {
        let txn = db.begin_read()?;
        let table = txn.open_table(self.baseline())?;

        for entry in table.iter()? {
            let (key, value) = entry?;
            let kv = KeyValue::new(
                Bytes::copy_from_slice(key.value()),
                Bytes::copy_from_slice(value.value()),
            );
            if tx.blocking_send(kv).is_err() {
                break;
            }
        }
        Ok(())
    }
}
