//! Execution of coordinator INSERT ... SELECT plans.
//!
//! The executor drives the general planner through a short-lived portal and
//! streams every row of the SELECT into a destination writer. The traits in
//! this module are the seams to the rest of the system: whatever plans and
//! runs a SELECT implements [`GeneralPlanner`], whatever consumes rows
//! implements [`DestReceiver`].
//!
//! # Submodules
//! - `portal`: scoped, invisible execution contexts
//! - `transaction`: joining the coordinated transaction
//! - `copy_dest`: the shard-routing COPY writer
//! - `insert_select`: the coordinator itself and its scan node

pub mod copy_dest;
pub mod insert_select;
pub mod portal;
pub mod transaction;

pub use copy_dest::{
    CopyDestFactory, CopyDestReceiver, ShardStore, ShardedCopyDest, ShardedCopyDestFactory,
};
pub use insert_select::{InsertSelectScan, execute_select_into_relation};
pub use portal::{PortalManager, PortalState, ScopedPortal};
pub use transaction::{CoordinatedTransaction, TransactionContext, TransactionState};

use crate::datum::{Datum, Row};
use crate::error::FunnelError;
use crate::query::Query;

/// Values bound to `$1`, `$2`, ... of a statement.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParamList {
    values: Vec<Datum>,
}

impl ParamList {
    pub fn new(values: Vec<Datum>) -> Self {
        Self { values }
    }

    /// The value of `$paramid` (1-based).
    pub fn get(&self, paramid: usize) -> Result<&Datum, FunnelError> {
        paramid
            .checked_sub(1)
            .and_then(|i| self.values.get(i))
            .ok_or_else(|| FunnelError::NotFound(format!("parameter ${paramid}")))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// How many rows a portal run may produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchCount {
    All,
    Count(u64),
}

impl FetchCount {
    /// Whether `produced` rows already satisfy the request.
    pub fn is_satisfied(&self, produced: u64) -> bool {
        match self {
            FetchCount::All => false,
            FetchCount::Count(n) => produced >= *n,
        }
    }
}

/// Consumer of the rows produced by a running statement.
pub trait DestReceiver {
    /// Called once before the first row with the output column names.
    fn startup(&mut self, _columns: &[String]) -> Result<(), FunnelError> {
        Ok(())
    }

    fn receive(&mut self, row: &Row) -> Result<(), FunnelError>;

    /// Called once after the last row.
    fn shutdown(&mut self) -> Result<(), FunnelError> {
        Ok(())
    }
}

/// A destination that keeps every row in memory.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TupleStore {
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
}

impl TupleStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DestReceiver for TupleStore {
    fn startup(&mut self, columns: &[String]) -> Result<(), FunnelError> {
        self.columns = columns.to_vec();
        Ok(())
    }

    fn receive(&mut self, row: &Row) -> Result<(), FunnelError> {
        self.rows.push(row.clone());
        Ok(())
    }
}

/// Plans SELECT queries for execution.
pub trait GeneralPlanner {
    fn plan_query(
        &self,
        query: &Query,
        params: &ParamList,
    ) -> Result<Box<dyn PlannedStatement>, FunnelError>;
}

/// A planned statement, ready to run.
pub trait PlannedStatement {
    /// Output column names.
    fn column_names(&self) -> Vec<String>;

    /// Produce up to `count` rows into `dest`, in order, and return how
    /// many were produced. A later call continues where the previous one
    /// stopped.
    fn run(
        &mut self,
        params: &ParamList,
        count: FetchCount,
        dest: &mut dyn DestReceiver,
    ) -> Result<u64, FunnelError>;
}

/// Per-statement executor state.
#[derive(Debug, Clone, Default)]
pub struct ExecutorState {
    pub params: ParamList,
    /// Rows processed by the statement, reported as the command tag count.
    pub es_processed: u64,
}

impl ExecutorState {
    pub fn new(params: ParamList) -> Self {
        Self {
            params,
            es_processed: 0,
        }
    }
}
