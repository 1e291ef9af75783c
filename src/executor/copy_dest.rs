//! The COPY destination writer.
//!
//! Rows produced by the SELECT are sent to the shards of the target table,
//! one row at a time, the way `COPY ... FROM STDIN` would deliver them: each
//! value passes through its column's input conversion, NOT NULL columns are
//! checked, and the distribution value selects the shard.
//!
//! A writer counts the rows it delivered in `tuples_sent`. With
//! `stop_on_failure == false` a row that cannot be delivered is skipped and
//! counted in `rows_rejected`; otherwise the first such row aborts the
//! statement. Rows delivered before an abort stay delivered.

use std::collections::BTreeMap;

use crate::catalog::{Catalog, DistTableMeta, PartitionMethod};
use crate::datum::{Datum, Row};
use crate::error::FunnelError;
use crate::executor::DestReceiver;
use crate::hash::shard_index_for;
use crate::query::Oid;

/// A row destination that reports how many rows it delivered.
pub trait CopyDestReceiver: DestReceiver {
    fn tuples_sent(&self) -> u64;

    /// Rows skipped under a non-strict failure policy.
    fn rows_rejected(&self) -> u64 {
        0
    }
}

/// Creates a writer for one execution.
pub trait CopyDestFactory {
    fn create<'a>(
        &'a mut self,
        relid: Oid,
        columns: &[String],
        stop_on_failure: bool,
    ) -> Result<Box<dyn CopyDestReceiver + 'a>, FunnelError>;
}

/// Rows stored per shard, keyed by `(relation, shard index)`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ShardStore {
    shards: BTreeMap<(Oid, u32), Vec<Row>>,
}

impl ShardStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, relid: Oid, shard: u32, row: Row) {
        self.shards.entry((relid, shard)).or_default().push(row);
    }

    /// Rows of one shard, in delivery order.
    pub fn shard_rows(&self, relid: Oid, shard: u32) -> &[Row] {
        self.shards
            .get(&(relid, shard))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// All rows of a relation, shard by shard.
    pub fn rows(&self, relid: Oid) -> Vec<&Row> {
        self.shards
            .range((relid, 0)..=(relid, u32::MAX))
            .flat_map(|(_, rows)| rows.iter())
            .collect()
    }

    pub fn row_count(&self, relid: Oid) -> usize {
        self.shards
            .range((relid, 0)..=(relid, u32::MAX))
            .map(|(_, rows)| rows.len())
            .sum()
    }
}

/// Factory for [`ShardedCopyDest`] writers over an in-process [`ShardStore`].
pub struct ShardedCopyDestFactory<'c> {
    catalog: &'c dyn Catalog,
    store: ShardStore,
}

impl<'c> ShardedCopyDestFactory<'c> {
    pub fn new(catalog: &'c dyn Catalog) -> Self {
        Self {
            catalog,
            store: ShardStore::new(),
        }
    }

    pub fn store(&self) -> &ShardStore {
        &self.store
    }

    pub fn into_store(self) -> ShardStore {
        self.store
    }
}

impl CopyDestFactory for ShardedCopyDestFactory<'_> {
    fn create<'a>(
        &'a mut self,
        relid: Oid,
        columns: &[String],
        stop_on_failure: bool,
    ) -> Result<Box<dyn CopyDestReceiver + 'a>, FunnelError> {
        let table = self.catalog.table(relid)?;
        let dest = ShardedCopyDest::new(table, columns, stop_on_failure, &mut self.store)?;
        Ok(Box::new(dest))
    }
}

/// Writer that routes each row to its shard.
#[derive(Debug)]
pub struct ShardedCopyDest<'a> {
    table: &'a DistTableMeta,
    columns: Vec<String>,
    /// Table position of each copied column.
    positions: Vec<usize>,
    stop_on_failure: bool,
    store: &'a mut ShardStore,
    tuples_sent: u64,
    rows_rejected: u64,
}

impl<'a> ShardedCopyDest<'a> {
    pub fn new(
        table: &'a DistTableMeta,
        columns: &[String],
        stop_on_failure: bool,
        store: &'a mut ShardStore,
    ) -> Result<Self, FunnelError> {
        let positions = columns
            .iter()
            .map(|name| {
                table.attno(name).map(|attno| attno - 1).ok_or_else(|| {
                    FunnelError::NotFound(format!(
                        "column \"{name}\" of relation \"{}\"",
                        table.name
                    ))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            table,
            columns: columns.to_vec(),
            positions,
            stop_on_failure,
            store,
            tuples_sent: 0,
            rows_rejected: 0,
        })
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Build the full table row and pick its shard.
    fn prepare(&self, row: &Row) -> Result<(u32, Row), FunnelError> {
        let mut full = vec![Datum::Null; self.table.columns.len()];
        for (value, &pos) in row.iter().zip(&self.positions) {
            let column = &self.table.columns[pos];
            full[pos] = value
                .clone()
                .assign(column.type_oid, column.typmod)
                .map_err(|e| FunnelError::ConstraintViolation(e.to_string()))?;
        }

        for (column, value) in self.table.columns.iter().zip(&full) {
            if column.not_null && value.is_null() {
                return Err(FunnelError::ConstraintViolation(format!(
                    "null value in column \"{}\" of relation \"{}\" violates not-null constraint",
                    column.name, self.table.name
                )));
            }
        }

        let shard = self.route(&full)?;
        Ok((shard, full))
    }

    fn distribution_value<'r>(&self, full: &'r Row) -> Result<&'r Datum, FunnelError> {
        let attno = self.table.distribution_column.ok_or_else(|| {
            FunnelError::InternalError(format!(
                "relation \"{}\" has no distribution column",
                self.table.name
            ))
        })?;
        let position = attno.checked_sub(1);
        let (Some(value), Some(column)) = (
            position.and_then(|i| full.get(i)),
            position.and_then(|i| self.table.columns.get(i)),
        ) else {
            return Err(FunnelError::InternalError(format!(
                "invalid distribution column {attno} for relation \"{}\"",
                self.table.name
            )));
        };
        if value.is_null() {
            return Err(FunnelError::ConstraintViolation(format!(
                "cannot copy row with NULL value in partition column \"{}\"",
                column.name
            )));
        }
        Ok(value)
    }

    fn route(&self, full: &Row) -> Result<u32, FunnelError> {
        match self.table.partition_method {
            PartitionMethod::Reference => Ok(0),
            PartitionMethod::Append => Ok(self.table.shard_count.saturating_sub(1)),
            PartitionMethod::Hash => {
                let value = self.distribution_value(full)?;
                shard_index_for(value, self.table.shard_count).ok_or_else(|| {
                    FunnelError::InternalError("NULL distribution value".to_string())
                })
            }
            PartitionMethod::Range => {
                let value = self.distribution_value(full)?;
                self.table
                    .range_lower_bounds
                    .iter()
                    .rposition(|bound| {
                        matches!(
                            bound.compare(value),
                            Some(std::cmp::Ordering::Less | std::cmp::Ordering::Equal)
                        )
                    })
                    .map(|idx| idx as u32)
                    .ok_or_else(|| {
                        FunnelError::ConstraintViolation(format!(
                            "could not find shard for partition column value \"{value}\""
                        ))
                    })
            }
        }
    }
}

impl DestReceiver for ShardedCopyDest<'_> {
    fn startup(&mut self, columns: &[String]) -> Result<(), FunnelError> {
        if columns.len() != self.columns.len() {
            return Err(FunnelError::ExecutionError(format!(
                "SELECT returns {} columns, but {} target columns were given",
                columns.len(),
                self.columns.len()
            )));
        }
        Ok(())
    }

    fn receive(&mut self, row: &Row) -> Result<(), FunnelError> {
        if row.len() != self.columns.len() {
            return Err(FunnelError::ExecutionError(format!(
                "row has {} values, expected {}",
                row.len(),
                self.columns.len()
            )));
        }

        match self.prepare(row) {
            Ok((shard, full)) => {
                self.store.append(self.table.relid, shard, full);
                self.tuples_sent += 1;
                Ok(())
            }
            Err(e @ FunnelError::ConstraintViolation(_)) if !self.stop_on_failure => {
                log::warn!("skipping row for relation \"{}\": {e}", self.table.name);
                self.rows_rejected += 1;
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    fn shutdown(&mut self) -> Result<(), FunnelError> {
        if self.rows_rejected > 0 {
            log::warn!(
                "{} row(s) rejected while copying into \"{}\"",
                self.rows_rejected,
                self.table.name
            );
        }
        Ok(())
    }
}

impl CopyDestReceiver for ShardedCopyDest<'_> {
    fn tuples_sent(&self) -> u64 {
        self.tuples_sent
    }

    fn rows_rejected(&self) -> u64 {
        self.rows_rejected
    }
}
