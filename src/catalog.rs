//! Catalog layer: distribution metadata and column types of target tables.
//!
//! Planning reads the target table's column types and partitioning scheme
//! through the [`Catalog`] trait; the destination writer additionally reads
//! the distribution column and shard layout. [`MemoryCatalog`] is the
//! in-process implementation used by the local engine and the tests.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::datum::Datum;
use crate::error::FunnelError;
use crate::query::{AttrNumber, Oid};
use crate::types::{NO_TYPMOD, TypeOid};

/// How a distributed table spreads its rows across shards, mirrors the
/// `partmethod` column of `pg_dist_partition`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PartitionMethod {
    /// Rows go to the shard owning the hash of the distribution column.
    Hash,
    /// Rows go to the shard whose range contains the distribution value.
    Range,
    /// Unordered bulk-append shards; rows cannot be routed.
    Append,
    /// One logical shard replicated everywhere.
    Reference,
}

impl PartitionMethod {
    /// Serialize to the single-character catalog value.
    pub fn as_char(&self) -> char {
        match self {
            PartitionMethod::Hash => 'h',
            PartitionMethod::Range => 'r',
            PartitionMethod::Append => 'a',
            PartitionMethod::Reference => 'n',
        }
    }

    /// Deserialize from the catalog value.
    pub fn from_char(c: char) -> Option<Self> {
        match c {
            'h' => Some(PartitionMethod::Hash),
            'r' => Some(PartitionMethod::Range),
            'a' => Some(PartitionMethod::Append),
            'n' => Some(PartitionMethod::Reference),
            _ => None,
        }
    }
}

impl fmt::Display for PartitionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PartitionMethod::Hash => "hash",
            PartitionMethod::Range => "range",
            PartitionMethod::Append => "append",
            PartitionMethod::Reference => "reference",
        };
        f.write_str(name)
    }
}

/// Column metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnMeta {
    pub name: String,
    pub type_oid: TypeOid,
    pub typmod: i32,
    pub not_null: bool,
}

/// Metadata of one distributed table.
#[derive(Debug, Clone, PartialEq)]
pub struct DistTableMeta {
    pub relid: Oid,
    pub name: String,
    pub columns: Vec<ColumnMeta>,
    pub partition_method: PartitionMethod,
    /// 1-based distribution column; `None` for reference tables.
    pub distribution_column: Option<AttrNumber>,
    pub shard_count: u32,
    /// Inclusive lower bound of every shard, ascending. Range tables only.
    pub range_lower_bounds: Vec<Datum>,
}

impl DistTableMeta {
    /// A reference table with no columns yet.
    pub fn new(relid: Oid, name: &str) -> Self {
        Self {
            relid,
            name: name.to_string(),
            columns: Vec::new(),
            partition_method: PartitionMethod::Reference,
            distribution_column: None,
            shard_count: 1,
            range_lower_bounds: Vec::new(),
        }
    }

    pub fn column(self, name: &str, type_oid: TypeOid) -> Self {
        self.column_with_typmod(name, type_oid, NO_TYPMOD)
    }

    pub fn column_with_typmod(mut self, name: &str, type_oid: TypeOid, typmod: i32) -> Self {
        self.columns.push(ColumnMeta {
            name: name.to_string(),
            type_oid,
            typmod,
            not_null: false,
        });
        self
    }

    /// Mark an existing column NOT NULL.
    pub fn not_null(mut self, name: &str) -> Self {
        if let Some(col) = self.columns.iter_mut().find(|c| c.name == name) {
            col.not_null = true;
        }
        self
    }

    pub fn distributed_by_hash(mut self, column: &str, shard_count: u32) -> Self {
        self.partition_method = PartitionMethod::Hash;
        self.distribution_column = self.attno(column);
        self.shard_count = shard_count.max(1);
        self
    }

    /// Range distribution; one shard per lower bound.
    pub fn distributed_by_range(mut self, column: &str, lower_bounds: Vec<Datum>) -> Self {
        self.partition_method = PartitionMethod::Range;
        self.distribution_column = self.attno(column);
        self.shard_count = lower_bounds.len().max(1) as u32;
        self.range_lower_bounds = lower_bounds;
        self
    }

    pub fn distributed_by_append(mut self, column: &str) -> Self {
        self.partition_method = PartitionMethod::Append;
        self.distribution_column = self.attno(column);
        self
    }

    /// 1-based attribute number of a column.
    pub fn attno(&self, name: &str) -> Option<AttrNumber> {
        self.columns.iter().position(|c| c.name == name).map(|i| i + 1)
    }

    pub fn column_meta(&self, attno: AttrNumber) -> Option<&ColumnMeta> {
        attno.checked_sub(1).and_then(|i| self.columns.get(i))
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }
}

/// Read-only catalog access needed by the planner and the writer.
pub trait Catalog {
    /// Metadata of a distributed table.
    fn table(&self, relid: Oid) -> Result<&DistTableMeta, FunnelError>;

    /// Declared `(type, typmod)` of a column (`get_atttype`/`get_atttypmod`).
    fn column_type(&self, relid: Oid, attno: AttrNumber) -> Result<(TypeOid, i32), FunnelError> {
        let table = self.table(relid)?;
        table
            .column_meta(attno)
            .map(|c| (c.type_oid, c.typmod))
            .ok_or_else(|| {
                FunnelError::NotFound(format!(
                    "column {attno} of relation \"{}\"",
                    table.name
                ))
            })
    }

    /// Partitioning scheme of a table (`PartitionMethod()`).
    fn partition_method(&self, relid: Oid) -> Result<PartitionMethod, FunnelError> {
        Ok(self.table(relid)?.partition_method)
    }

    fn relation_name(&self, relid: Oid) -> Result<String, FunnelError> {
        Ok(self.table(relid)?.name.clone())
    }

    fn column_names(&self, relid: Oid) -> Result<Vec<String>, FunnelError> {
        Ok(self.table(relid)?.column_names())
    }

    fn distribution_column(&self, relid: Oid) -> Result<Option<AttrNumber>, FunnelError> {
        Ok(self.table(relid)?.distribution_column)
    }

    fn shard_count(&self, relid: Oid) -> Result<u32, FunnelError> {
        Ok(self.table(relid)?.shard_count)
    }
}

/// In-memory catalog keyed by relation OID.
#[derive(Debug, Clone, Default)]
pub struct MemoryCatalog {
    tables: HashMap<Oid, DistTableMeta>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace a table.
    pub fn add_table(&mut self, table: DistTableMeta) {
        self.tables.insert(table.relid, table);
    }

    pub fn with_table(mut self, table: DistTableMeta) -> Self {
        self.add_table(table);
        self
    }

    /// Look up a table by name.
    pub fn table_by_name(&self, name: &str) -> Option<&DistTableMeta> {
        self.tables.values().find(|t| t.name == name)
    }
}

impl Catalog for MemoryCatalog {
    fn table(&self, relid: Oid) -> Result<&DistTableMeta, FunnelError> {
        self.tables
            .get(&relid)
            .ok_or_else(|| FunnelError::NotFound(format!("relation with OID {relid}")))
    }
}
