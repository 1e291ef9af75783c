//! Shared test helpers for integration tests.
//!
//! [`Cluster`] bundles a distributed-table catalog with the local tables the
//! SELECT side reads, plans statements and runs them through the scan node
//! exactly as the extension does.

#![allow(dead_code)]

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use pg_funnel::catalog::{DistTableMeta, MemoryCatalog};
use pg_funnel::coerce::CastCoercer;
use pg_funnel::config::FunnelSettings;
use pg_funnel::datum::{Datum, Row};
use pg_funnel::engine::{LocalPlanner, LocalTables};
use pg_funnel::error::FunnelError;
use pg_funnel::executor::insert_select::ExecutionContext;
use pg_funnel::executor::{
    CoordinatedTransaction, ExecutorState, InsertSelectScan, ParamList, PortalManager,
    ShardStore, ShardedCopyDestFactory,
};
use pg_funnel::plan::DistributedPlan;
use pg_funnel::planner::plan_insert_select;
use pg_funnel::query::make::*;
use pg_funnel::query::{CmdType, JoinTreeNode, Oid, Query};
use pg_funnel::types::{INT4OID, NUMERICOID, TEXTOID, numeric_typmod};
use rust_decimal::Decimal;

pub const ORDERS: Oid = 16384;
pub const STAGING: Oid = 16390;

/// Result of running one planned statement.
#[derive(Debug)]
pub struct Outcome {
    pub result: Result<u64, FunnelError>,
    pub es_processed: u64,
    pub transaction_started: bool,
    pub open_portals: usize,
    pub store: ShardStore,
}

impl Outcome {
    /// Rows that landed in `relid`, ordered by their first column.
    pub fn rows(&self, relid: Oid) -> Vec<Row> {
        let mut rows: Vec<Row> = self.store.rows(relid).into_iter().cloned().collect();
        rows.sort_by(|a, b| {
            a[0].compare(&b[0])
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        rows
    }
}

pub struct Cluster {
    pub catalog: MemoryCatalog,
    pub tables: LocalTables,
    pub settings: FunnelSettings,
    pub statement_timestamp: DateTime<Utc>,
}

impl Cluster {
    pub fn new() -> Self {
        Self {
            catalog: MemoryCatalog::new(),
            tables: LocalTables::new(),
            settings: FunnelSettings::default(),
            statement_timestamp: Utc.with_ymd_and_hms(2024, 3, 10, 12, 0, 0).unwrap(),
        }
    }

    /// `orders (id int NOT NULL, amount numeric(10,2))`, hash-distributed on
    /// `id` over 4 shards, fed from `staging (id int, amount numeric)`.
    pub fn orders_and_staging(staging_rows: Vec<Row>) -> Self {
        let mut cluster = Self::new();
        cluster.catalog.add_table(
            DistTableMeta::new(ORDERS, "orders")
                .column("id", INT4OID)
                .column_with_typmod("amount", NUMERICOID, numeric_typmod(10, 2))
                .not_null("id")
                .distributed_by_hash("id", 4),
        );
        cluster.tables = LocalTables::new().with_table(
            STAGING,
            "staging",
            &["id", "amount"],
            staging_rows,
        );
        cluster
    }

    pub fn plan(&self, query: &Query) -> Result<DistributedPlan, FunnelError> {
        plan_insert_select(query, &self.catalog, &CastCoercer, &self.settings)
    }

    pub fn execute(&self, plan: DistributedPlan, params: ParamList) -> Outcome {
        self.execute_in_session(plan, params, &PortalManager::new())
    }

    /// Run against a session's existing portals.
    pub fn execute_in_session(
        &self,
        plan: DistributedPlan,
        params: ParamList,
        portals: &PortalManager,
    ) -> Outcome {
        let planner = LocalPlanner::new(Arc::new(self.tables.clone()))
            .with_statement_timestamp(self.statement_timestamp);
        let mut transaction = CoordinatedTransaction::new();
        let mut factory = ShardedCopyDestFactory::new(&self.catalog);
        let mut executor_state = ExecutorState::new(params);
        let mut scan = InsertSelectScan::new(plan);

        let result = {
            let mut ctx = ExecutionContext {
                planner: &planner,
                portals,
                transaction: &mut transaction,
                dest_factory: &mut factory,
                settings: &self.settings,
            };
            scan.exec_scan(&mut executor_state, &mut ctx)
        };

        Outcome {
            result: result.map(|_| executor_state.es_processed),
            es_processed: executor_state.es_processed,
            transaction_started: transaction.is_started(),
            open_portals: portals.active_count(),
            store: factory.into_store(),
        }
    }

    /// Plan and run without parameters.
    pub fn run(&self, query: &Query) -> Outcome {
        match self.plan(query) {
            Ok(plan) => self.execute(plan, ParamList::default()),
            Err(e) => Outcome {
                result: Err(e),
                es_processed: 0,
                transaction_started: false,
                open_portals: 0,
                store: ShardStore::new(),
            },
        }
    }
}

pub fn staging_row(id: i32, amount: &str) -> Row {
    vec![Datum::Int4(id), Datum::Numeric(amount.parse().unwrap())]
}

pub fn numeric(value: &str) -> Datum {
    Datum::Numeric(value.parse::<Decimal>().unwrap())
}

/// Wrap `select` (two columns: id int, amount of `amount_type`) into
/// `INSERT INTO orders (id, amount) SELECT ...`, the way the analyzer
/// shapes it: the SELECT becomes the only FROM item and the insert target
/// list reads its columns, with an assignment cast for `amount`.
pub fn insert_into_orders(select: Query, amount_type: u32) -> Query {
    let mut q = Query::new(CmdType::Insert);
    let target = q.add_rte(make_relation_rte(ORDERS, "orders", &["id", "amount"]));
    let sub = q.add_rte(make_subquery_rte(select, "subquery"));
    q.result_relation = Some(target);
    q.jointree.fromlist.push(JoinTreeNode::RangeTblRef(sub));
    q.target_list
        .push(make_target_entry(make_var(sub, 1, INT4OID), 1, "id"));
    let amount = if amount_type == NUMERICOID {
        make_var(sub, 2, NUMERICOID)
    } else {
        make_coerce(
            make_var(sub, 2, amount_type),
            NUMERICOID,
            numeric_typmod(10, 2),
        )
    };
    q.target_list.push(make_target_entry(amount, 2, "amount"));
    q
}

/// `SELECT id, amount::text FROM staging`
pub fn select_amount_as_text() -> Query {
    let mut sub = Query::new(CmdType::Select);
    let s = sub.add_rte(make_relation_rte(STAGING, "staging", &["id", "amount"]));
    sub.jointree.fromlist.push(JoinTreeNode::RangeTblRef(s));
    sub.target_list
        .push(make_target_entry(make_var(s, 1, INT4OID), 1, "id"));
    sub.target_list.push(make_target_entry(
        make_coerce(make_var(s, 2, NUMERICOID), TEXTOID, -1),
        2,
        "amount",
    ));
    sub
}

/// `SELECT id, amount FROM staging`
pub fn select_staging() -> Query {
    let mut sub = Query::new(CmdType::Select);
    let s = sub.add_rte(make_relation_rte(STAGING, "staging", &["id", "amount"]));
    sub.jointree.fromlist.push(JoinTreeNode::RangeTblRef(s));
    sub.target_list
        .push(make_target_entry(make_var(s, 1, INT4OID), 1, "id"));
    sub.target_list
        .push(make_target_entry(make_var(s, 2, NUMERICOID), 2, "amount"));
    sub
}
