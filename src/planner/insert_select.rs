//! Statement splitter for INSERT ... SELECT via the coordinator.
//!
//! Turns `INSERT INTO dist_table [WITH ...] SELECT ...` into a SELECT that
//! the general planner can run on its own, plus the list of destination
//! columns the rows are copied into.
//!
//! Checks that make the strategy inapplicable are recorded on the plan as
//! a [`DeferredError`] rather than raised, so the caller decides whether
//! to fall back or fail. Structural problems that no strategy can handle
//! are raised immediately.

use crate::catalog::{Catalog, PartitionMethod};
use crate::coerce::{Coercer, coerce_to_target_type};
use crate::config::FunnelSettings;
use crate::error::{DeferredError, FunnelError};
use crate::plan::DistributedPlan;
use crate::planner::cte_levels::decrement_cte_levels;
use crate::planner::reorder::reorder_insert_select_target_lists;
use crate::query::make::make_null_const;
use crate::query::{CmdType, Expr, JoinTreeNode, Oid, Query, RtIndex, RteKind};
use crate::types::format_type;

pub const RETURNING_NOT_SUPPORTED: &str =
    "RETURNING is not supported in INSERT ... SELECT via coordinator";
pub const ON_CONFLICT_NOT_SUPPORTED: &str =
    "ON CONFLICT is not supported in INSERT ... SELECT via coordinator";
pub const APPEND_NOT_SUPPORTED: &str =
    "INSERT ... SELECT into an append-distributed table is not supported";
pub const COORDINATOR_INSERT_SELECT_DISABLED: &str =
    "INSERT ... SELECT via coordinator is disabled";

/// Plan an INSERT ... SELECT, honouring
/// `pg_funnel.enable_coordinator_insert_select`.
pub fn plan_insert_select(
    parse: &Query,
    catalog: &dyn Catalog,
    coercer: &dyn Coercer,
    settings: &FunnelSettings,
) -> Result<DistributedPlan, FunnelError> {
    if !settings.enable_coordinator_insert_select {
        return Ok(DistributedPlan::failed(
            DeferredError::feature_not_supported(COORDINATOR_INSERT_SELECT_DISABLED)
                .with_hint("Set pg_funnel.enable_coordinator_insert_select to on."),
        ));
    }
    create_coordinator_insert_select_plan(parse, catalog, coercer)
}

/// Split `parse` into a standalone SELECT and an insert target list.
///
/// `parse` is not modified. The returned plan carries a deferred error for
/// RETURNING (in which case nothing else is populated), ON CONFLICT, and
/// append-distributed targets; when more than one of the latter applies,
/// the last check wins.
pub fn create_coordinator_insert_select_plan(
    parse: &Query,
    catalog: &dyn Catalog,
    coercer: &dyn Coercer,
) -> Result<DistributedPlan, FunnelError> {
    let mut query = parse.clone();

    let subquery_rt_index = subquery_rt_index(&query)?;
    let insert_rt_index = query.result_relation.ok_or_else(|| {
        FunnelError::InternalError("INSERT ... SELECT has no result relation".to_string())
    })?;
    let target_relation_id = target_relation_id(&query, insert_rt_index)?;

    if !query.returning_list.is_empty() {
        return Ok(DistributedPlan::failed(DeferredError::feature_not_supported(
            RETURNING_NOT_SUPPORTED,
        )));
    }

    let mut plan = DistributedPlan::default();

    if query.on_conflict.is_some() {
        plan.planning_error = Some(DeferredError::feature_not_supported(
            ON_CONFLICT_NOT_SUPPORTED,
        ));
    }

    if catalog.partition_method(target_relation_id)? == PartitionMethod::Append {
        plan.planning_error = Some(DeferredError::feature_not_supported(APPEND_NOT_SUPPORTED));
    }

    if !query.cte_list.is_empty() {
        let top_level = std::mem::take(&mut query.cte_list);
        let names: Vec<String> = top_level.iter().map(|cte| cte.ctename.clone()).collect();
        let subquery = subquery_mut(&mut query, subquery_rt_index)?;

        let mut combined = top_level;
        combined.append(&mut subquery.cte_list);
        subquery.cte_list = combined;

        decrement_cte_levels(subquery, &names);
        log::debug!(
            "moved {} top-level CTE(s) into the SELECT: {}",
            names.len(),
            names.join(", ")
        );
    }

    reorder_insert_select_target_lists(&mut query, insert_rt_index, subquery_rt_index)?;

    let insert_target_list = std::mem::take(&mut query.target_list);
    let mut subquery = std::mem::replace(
        subquery_mut(&mut query, subquery_rt_index)?,
        Query::new(CmdType::Select),
    );

    for (insert_tle, select_tle) in insert_target_list.iter().zip(subquery.target_list.iter_mut()) {
        let Expr::Var(column_var) = &insert_tle.expr else {
            return Err(FunnelError::rejected(
                "can only handle regular columns in the target list",
            ));
        };

        let (column_type, column_typmod) =
            catalog.column_type(target_relation_id, column_var.varattno)?;
        let select_output_type = column_var.vartype;

        // The rows go straight to COPY, which does not apply the implicit
        // assignment casts an INSERT would.
        let expr = std::mem::replace(&mut select_tle.expr, make_null_const(select_output_type));
        select_tle.expr = coerce_to_target_type(
            coercer,
            expr,
            select_output_type,
            column_type,
            column_typmod,
        )?;
        if column_type != select_output_type {
            log::debug!(
                "casting column \"{}\" from {} to {}",
                insert_tle.resname.as_deref().unwrap_or("?"),
                format_type(select_output_type, column_var.vartypmod),
                format_type(column_type, column_typmod)
            );
        }
    }

    plan.target_relation_name = catalog.relation_name(target_relation_id).ok();
    plan.insert_select_query = Some(subquery);
    plan.insert_target_list = insert_target_list;
    plan.target_relation_id = Some(target_relation_id);
    Ok(plan)
}

/// Index of the SELECT in the range table: the single FROM item of the
/// combined statement.
fn subquery_rt_index(query: &Query) -> Result<RtIndex, FunnelError> {
    let index = match query.jointree.fromlist.first() {
        Some(JoinTreeNode::RangeTblRef(index)) => *index,
        _ => {
            return Err(FunnelError::InternalError(
                "INSERT ... SELECT has no subquery in its FROM list".to_string(),
            ));
        }
    };
    match query.rt_fetch(index).map(|rte| &rte.kind) {
        Some(RteKind::Subquery { .. }) => Ok(index),
        _ => Err(not_a_subquery(index)),
    }
}

fn target_relation_id(query: &Query, insert_rt_index: RtIndex) -> Result<Oid, FunnelError> {
    match query.rt_fetch(insert_rt_index).map(|rte| &rte.kind) {
        Some(RteKind::Relation { relid }) => Ok(*relid),
        _ => Err(FunnelError::InternalError(format!(
            "result relation {insert_rt_index} is not a table"
        ))),
    }
}

fn subquery_mut(query: &mut Query, index: RtIndex) -> Result<&mut Query, FunnelError> {
    match query.rt_fetch_mut(index).map(|rte| &mut rte.kind) {
        Some(RteKind::Subquery { subquery }) => Ok(subquery.as_mut()),
        _ => Err(not_a_subquery(index)),
    }
}

fn not_a_subquery(index: RtIndex) -> FunnelError {
    FunnelError::InternalError(format!("range table entry {index} is not a subquery"))
}
