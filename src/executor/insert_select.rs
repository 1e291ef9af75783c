//! The execution coordinator for INSERT ... SELECT.
//!
//! The SELECT is planned by the general planner, run to completion inside
//! an invisible portal, and every row it produces goes to a COPY writer for
//! the target table. The number of rows the writer delivered becomes the
//! statement's processed-row count.

use std::collections::VecDeque;

use crate::config::FunnelSettings;
use crate::datum::Row;
use crate::error::FunnelError;
use crate::executor::copy_dest::CopyDestFactory;
use crate::executor::portal::PortalManager;
use crate::executor::transaction::TransactionContext;
use crate::executor::{DestReceiver, ExecutorState, FetchCount, GeneralPlanner, ParamList};
use crate::plan::DistributedPlan;
use crate::query::{Oid, Query, TargetEntry};

/// The collaborators an execution needs.
pub struct ExecutionContext<'e> {
    pub planner: &'e dyn GeneralPlanner,
    pub portals: &'e PortalManager,
    pub transaction: &'e mut dyn TransactionContext,
    pub dest_factory: &'e mut dyn CopyDestFactory,
    pub settings: &'e FunnelSettings,
}

/// Run `select_query` and copy its rows into `target_relation_id`.
///
/// Joins the coordinated transaction first. Columns are named after the
/// insert target entries, in order. On success `es_processed` is set to
/// the number of rows the writer delivered, which is also returned.
///
/// On error nothing is reported as processed. Rows the writer already
/// delivered are not taken back here; undoing them is up to the
/// surrounding transaction.
pub fn execute_select_into_relation(
    target_relation_id: Oid,
    insert_target_list: &[TargetEntry],
    select_query: &Query,
    executor_state: &mut ExecutorState,
    ctx: &mut ExecutionContext<'_>,
) -> Result<u64, FunnelError> {
    ctx.transaction.begin_or_continue()?;

    let column_names: Vec<String> = insert_target_list
        .iter()
        .map(|tle| tle.resname.clone().unwrap_or_default())
        .collect();

    let mut dest = ctx.dest_factory.create(
        target_relation_id,
        &column_names,
        ctx.settings.copy_stop_on_failure,
    )?;

    execute_query(
        select_query,
        &executor_state.params,
        dest.as_mut(),
        ctx.planner,
        ctx.portals,
    )?;

    let tuples_sent = dest.tuples_sent();
    executor_state.es_processed = tuples_sent;
    Ok(tuples_sent)
}

/// Plan `query` and send all of its rows to `dest` through a fresh,
/// invisible portal. The portal is dropped before this returns, whether
/// or not an error occurred.
pub fn execute_query(
    query: &Query,
    params: &ParamList,
    dest: &mut dyn DestReceiver,
    planner: &dyn GeneralPlanner,
    portals: &PortalManager,
) -> Result<u64, FunnelError> {
    let mut portal = portals.create_portal();

    let statement = planner.plan_query(query, params)?;
    let columns = statement.column_names();

    portal.define_query("SELECT", statement)?;
    portal.start(params)?;

    dest.startup(&columns)?;
    let produced = portal.run(FetchCount::All, dest)?;
    dest.shutdown()?;

    log::debug!("portal \"{}\" produced {produced} row(s)", portal.name());
    Ok(produced)
}

/// Scan node of a coordinator INSERT ... SELECT.
///
/// The first call to [`exec_scan`](Self::exec_scan) performs the whole
/// insert; every call, including the first, then returns the next row of
/// the local tuple store, `None` once it is drained.
#[derive(Debug)]
pub struct InsertSelectScan {
    plan: DistributedPlan,
    finished_remote_scan: bool,
    tuple_store: VecDeque<Row>,
}

impl InsertSelectScan {
    pub fn new(plan: DistributedPlan) -> Self {
        Self {
            plan,
            finished_remote_scan: false,
            tuple_store: VecDeque::new(),
        }
    }

    pub fn plan(&self) -> &DistributedPlan {
        &self.plan
    }

    pub fn is_finished(&self) -> bool {
        self.finished_remote_scan
    }

    pub fn exec_scan(
        &mut self,
        executor_state: &mut ExecutorState,
        ctx: &mut ExecutionContext<'_>,
    ) -> Result<Option<Row>, FunnelError> {
        if !self.finished_remote_scan {
            // A failed run is not retried: its rows may already be on shards.
            self.finished_remote_scan = true;

            self.plan.check_planning_error()?;
            let select_query = self.plan.insert_select_query.as_ref().ok_or_else(|| {
                FunnelError::InternalError("plan has no SELECT query".to_string())
            })?;
            let target_relation_id = self.plan.target_relation_id.ok_or_else(|| {
                FunnelError::InternalError("plan has no target relation".to_string())
            })?;

            log::debug!("Collecting INSERT ... SELECT results locally");

            execute_select_into_relation(
                target_relation_id,
                &self.plan.insert_target_list,
                select_query,
                executor_state,
                ctx,
            )?;
        }

        Ok(self.tuple_store.pop_front())
    }
}
