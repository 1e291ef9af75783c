//! Local reference engine.
//!
//! A [`GeneralPlanner`] that evaluates query trees directly over in-memory
//! tables. It covers what the coordinator hands to the general planner in
//! practice: scans of tables, derived tables and CTEs (resolved through
//! their levels-up counter), inner and left joins, WHERE clauses,
//! projections with casts, bound parameters and sublinks.
//!
//! # Submodules
//! - `eval`: query and expression evaluation
//! - `ops`: operators and built-in functions

mod eval;
mod ops;

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::datum::Row;
use crate::error::FunnelError;
use crate::executor::{DestReceiver, FetchCount, GeneralPlanner, ParamList, PlannedStatement};
use crate::query::{Oid, Query};

pub use eval::Evaluator;

/// One in-memory table.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalTable {
    pub name: String,
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
}

/// The tables a [`LocalPlanner`] can scan, keyed by relation OID.
#[derive(Debug, Clone, Default)]
pub struct LocalTables {
    tables: HashMap<Oid, LocalTable>,
}

impl LocalTables {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_table(&mut self, relid: Oid, name: &str, columns: &[&str]) {
        self.tables.insert(
            relid,
            LocalTable {
                name: name.to_string(),
                columns: columns.iter().map(|c| c.to_string()).collect(),
                rows: Vec::new(),
            },
        );
    }

    /// Builder form of [`create_table`](Self::create_table) plus rows.
    pub fn with_table(mut self, relid: Oid, name: &str, columns: &[&str], rows: Vec<Row>) -> Self {
        self.create_table(relid, name, columns);
        if let Some(table) = self.tables.get_mut(&relid) {
            table.rows.extend(rows);
        }
        self
    }

    pub fn insert(&mut self, relid: Oid, row: Row) -> Result<(), FunnelError> {
        let table = self
            .tables
            .get_mut(&relid)
            .ok_or_else(|| FunnelError::NotFound(format!("relation with OID {relid}")))?;
        if row.len() != table.columns.len() {
            return Err(FunnelError::ExecutionError(format!(
                "INSERT has {} values but \"{}\" has {} columns",
                row.len(),
                table.name,
                table.columns.len()
            )));
        }
        table.rows.push(row);
        Ok(())
    }

    pub fn table(&self, relid: Oid) -> Result<&LocalTable, FunnelError> {
        self.tables
            .get(&relid)
            .ok_or_else(|| FunnelError::NotFound(format!("relation with OID {relid}")))
    }
}

/// Plans SELECTs for evaluation over [`LocalTables`].
#[derive(Debug, Clone)]
pub struct LocalPlanner {
    tables: Arc<LocalTables>,
    statement_timestamp: DateTime<Utc>,
}

impl LocalPlanner {
    pub fn new(tables: Arc<LocalTables>) -> Self {
        Self {
            tables,
            statement_timestamp: Utc::now(),
        }
    }

    /// Fix the value `now()` returns.
    pub fn with_statement_timestamp(mut self, ts: DateTime<Utc>) -> Self {
        self.statement_timestamp = ts;
        self
    }

    pub fn statement_timestamp(&self) -> DateTime<Utc> {
        self.statement_timestamp
    }
}

impl GeneralPlanner for LocalPlanner {
    fn plan_query(
        &self,
        query: &Query,
        _params: &ParamList,
    ) -> Result<Box<dyn PlannedStatement>, FunnelError> {
        if query.result_relation.is_some() {
            return Err(FunnelError::rejected(
                "the local engine only runs SELECT queries",
            ));
        }
        Ok(Box::new(LocalStatement {
            query: query.clone(),
            tables: Arc::clone(&self.tables),
            statement_timestamp: self.statement_timestamp,
            pending: None,
        }))
    }
}

/// A SELECT ready to run. Rows are computed on the first run and handed
/// out across runs.
#[derive(Debug)]
pub struct LocalStatement {
    query: Query,
    tables: Arc<LocalTables>,
    statement_timestamp: DateTime<Utc>,
    pending: Option<VecDeque<Row>>,
}

impl PlannedStatement for LocalStatement {
    fn column_names(&self) -> Vec<String> {
        self.query.output_names()
    }

    fn run(
        &mut self,
        params: &ParamList,
        count: FetchCount,
        dest: &mut dyn DestReceiver,
    ) -> Result<u64, FunnelError> {
        if self.pending.is_none() {
            let evaluator = Evaluator::new(&self.tables, params, self.statement_timestamp);
            let rows = evaluator.run(&self.query)?;
            self.pending = Some(rows.into());
        }
        let Some(pending) = self.pending.as_mut() else {
            return Ok(0);
        };

        let mut produced = 0;
        while !count.is_satisfied(produced) {
            let Some(row) = pending.pop_front() else {
                break;
            };
            dest.receive(&row)?;
            produced += 1;
        }
        Ok(produced)
    }
}
