//! End-to-end tests for coordinator INSERT ... SELECT.
//!
//! Each test plans an INSERT ... SELECT against an in-memory catalog, runs
//! the SELECT with the local engine and checks what reached the shards:
//! - Casting SELECT output to the declared column type
//! - Top-level CTEs moved into the SELECT
//! - Deferred errors (RETURNING, ON CONFLICT) and immediate ones
//! - Rows-affected accounting, failure policy and portal cleanup
//! - EXPLAIN output

mod common;

use common::*;
use pg_funnel::config::ExplainFormat;
use pg_funnel::datum::Datum;
use pg_funnel::error::{FunnelError, FunnelErrorKind};
use pg_funnel::executor::{ParamList, PortalManager};
use pg_funnel::planner::insert_select::{
    COORDINATOR_INSERT_SELECT_DISABLED, ON_CONFLICT_NOT_SUPPORTED, RETURNING_NOT_SUPPORTED,
};
use pg_funnel::query::make::*;
use pg_funnel::query::{
    CmdType, Expr, JoinTreeNode, JoinType, OnConflictAction, OnConflictExpr, Operator, Query,
    RteKind,
};
use pg_funnel::types::{BOOLOID, INT4OID, NUMERICOID, TEXTOID};

fn three_staging_rows() -> Vec<pg_funnel::datum::Row> {
    vec![
        staging_row(1, "10.005"),
        staging_row(2, "20.5"),
        staging_row(3, "7"),
    ]
}

// ── Scenario: cast to declared column type ─────────────────────────────────

#[test]
fn test_text_output_is_cast_to_numeric_column() {
    let cluster = Cluster::orders_and_staging(three_staging_rows());
    let outcome = cluster.run(&insert_into_orders(select_amount_as_text(), TEXTOID));

    assert_eq!(*outcome.result.as_ref().unwrap(), 3);
    assert_eq!(outcome.es_processed, 3);
    assert_eq!(
        outcome.rows(ORDERS),
        vec![
            vec![Datum::Int4(1), numeric("10.01")],
            vec![Datum::Int4(2), numeric("20.50")],
            vec![Datum::Int4(3), numeric("7")],
        ]
    );
    assert!(outcome.transaction_started);
    assert_eq!(outcome.open_portals, 0);
}

#[test]
fn test_planned_select_carries_the_cast() {
    let cluster = Cluster::orders_and_staging(vec![]);
    let plan = cluster
        .plan(&insert_into_orders(select_amount_as_text(), TEXTOID))
        .unwrap();
    let select = plan.insert_select_query.as_ref().unwrap();
    assert_eq!(select.target_list[1].expr.expr_type(), NUMERICOID);
    assert_eq!(plan.insert_column_names(), vec!["id", "amount"]);
}

// ── Scenario: CTE relocation ───────────────────────────────────────────────

/// `WITH recent AS (SELECT id, amount FROM staging WHERE id >= 2)
///  INSERT INTO orders SELECT id, amount FROM recent`
fn insert_from_recent(reference_depth: u32) -> Query {

    let mut select = Query::new(CmdType::Select);
    let r = if reference_depth == 1 {
        select.add_rte(make_cte_rte("recent", 1, &["id", "amount"]))
    } else {
        // SELECT id, amount FROM (SELECT id, amount FROM recent) d
        let mut derived = Query::new(CmdType::Select);
        let c = derived.add_rte(make_cte_rte("recent", 2, &["id", "amount"]));
        derived.jointree.fromlist.push(JoinTreeNode::RangeTblRef(c));
        derived
            .target_list
            .push(make_target_entry(make_var(c, 1, INT4OID), 1, "id"));
        derived
            .target_list
            .push(make_target_entry(make_var(c, 2, NUMERICOID), 2, "amount"));
        select.add_rte(make_subquery_rte(derived, "d"))
    };
    select.jointree.fromlist.push(JoinTreeNode::RangeTblRef(r));
    select
        .target_list
        .push(make_target_entry(make_var(r, 1, INT4OID), 1, "id"));
    select
        .target_list
        .push(make_target_entry(make_var(r, 2, NUMERICOID), 2, "amount"));

    let mut q = insert_into_orders(select, NUMERICOID);
    q.cte_list.push(make_cte("recent", recent_staging()));
    q
}

/// `SELECT id, amount FROM staging WHERE id >= 2`
fn recent_staging() -> Query {
    let mut recent = select_staging();
    recent.jointree.quals = Some(make_op(
        Operator::Ge,
        make_var(1, 1, INT4OID),
        make_int4_const(2),
        BOOLOID,
    ));
    recent
}

#[test]
fn test_top_level_cte_is_visible_to_the_select() {
    let cluster = Cluster::orders_and_staging(three_staging_rows());
    let outcome = cluster.run(&insert_from_recent(1));

    assert_eq!(*outcome.result.as_ref().unwrap(), 2);
    assert_eq!(
        outcome.rows(ORDERS),
        vec![
            vec![Datum::Int4(2), numeric("20.50")],
            vec![Datum::Int4(3), numeric("7.00")],
        ]
    );
}

#[test]
fn test_cte_referenced_from_derived_table() {
    let cluster = Cluster::orders_and_staging(three_staging_rows());
    let plan = cluster.plan(&insert_from_recent(2)).unwrap();

    let select = plan.insert_select_query.clone().unwrap();
    assert_eq!(select.cte_list[0].ctename, "recent");
    let RteKind::Subquery { subquery } = &select.rtable[0].kind else {
        panic!("expected derived table");
    };
    assert!(matches!(
        subquery.rtable[0].kind,
        RteKind::Cte { levels_up: 1, .. }
    ));

    let outcome = cluster.execute(plan, ParamList::default());
    assert_eq!(outcome.result.unwrap(), 2);
}

/// `WITH recent AS (...) INSERT INTO orders
///  SELECT r.id, s.amount + 1 FROM recent r JOIN staging s ON r.id = s.id`
fn insert_from_recent_join_staging() -> Query {
    let mut select = Query::new(CmdType::Select);
    let r = select.add_rte(make_cte_rte("recent", 1, &["id", "amount"]));
    let s = select.add_rte(make_relation_rte(STAGING, "s", &["id", "amount"]));
    select.jointree.fromlist.push(make_join(
        JoinType::Inner,
        JoinTreeNode::RangeTblRef(r),
        JoinTreeNode::RangeTblRef(s),
        Some(make_op(
            Operator::Eq,
            make_var(r, 1, INT4OID),
            make_var(s, 1, INT4OID),
            BOOLOID,
        )),
    ));
    select
        .target_list
        .push(make_target_entry(make_var(r, 1, INT4OID), 1, "id"));
    select.target_list.push(make_target_entry(
        make_op(
            Operator::Add,
            make_var(s, 2, NUMERICOID),
            make_int4_const(1),
            NUMERICOID,
        ),
        2,
        "amount",
    ));

    let mut q = insert_into_orders(select, NUMERICOID);
    q.cte_list.push(make_cte("recent", recent_staging()));
    q
}

#[test]
fn test_cte_joined_with_base_table() {
    let cluster = Cluster::orders_and_staging(three_staging_rows());
    let plan = cluster.plan(&insert_from_recent_join_staging()).unwrap();

    let select = plan.insert_select_query.clone().unwrap();
    assert_eq!(select.cte_list.len(), 1);
    assert!(matches!(
        select.rtable[0].kind,
        RteKind::Cte { levels_up: 0, .. }
    ));
    assert!(matches!(select.rtable[1].kind, RteKind::Relation { .. }));

    let outcome = cluster.execute(plan, ParamList::default());
    assert_eq!(*outcome.result.as_ref().unwrap(), 2);
    assert_eq!(
        outcome.rows(ORDERS),
        vec![
            vec![Datum::Int4(2), numeric("21.50")],
            vec![Datum::Int4(3), numeric("8.00")],
        ]
    );
}

// ── Deferred and immediate errors ──────────────────────────────────────────

#[test]
fn test_returning_is_deferred_and_never_executed() {
    let cluster = Cluster::orders_and_staging(three_staging_rows());
    let mut q = insert_into_orders(select_staging(), NUMERICOID);
    q.returning_list
        .push(make_target_entry(make_var(1, 1, INT4OID), 1, "id"));

    let plan = cluster.plan(&q).unwrap();
    assert!(plan.insert_select_query.is_none());
    assert_eq!(
        plan.planning_error.as_ref().unwrap().message,
        RETURNING_NOT_SUPPORTED
    );

    let outcome = cluster.execute(plan, ParamList::default());
    let err = outcome.result.unwrap_err();
    assert_eq!(err.kind(), FunnelErrorKind::FeatureNotSupported);
    assert_eq!(err.sqlstate().code(), "0A000");
    assert!(!outcome.transaction_started);
    assert_eq!(outcome.es_processed, 0);
    assert_eq!(outcome.store.row_count(ORDERS), 0);
}

#[test]
fn test_on_conflict_is_deferred_with_full_plan() {
    let cluster = Cluster::orders_and_staging(three_staging_rows());
    let mut q = insert_into_orders(select_staging(), NUMERICOID);
    q.on_conflict = Some(OnConflictExpr {
        action: OnConflictAction::Nothing,
        arbiter_columns: vec!["id".into()],
        set_list: vec![],
        where_clause: None,
    });

    let plan = cluster.plan(&q).unwrap();
    assert_eq!(
        plan.planning_error.as_ref().unwrap().message,
        ON_CONFLICT_NOT_SUPPORTED
    );
    assert!(plan.insert_select_query.is_some());
    assert!(cluster.execute(plan, ParamList::default()).result.is_err());
}

#[test]
fn test_disabled_strategy_fails_at_execution() {
    let mut cluster = Cluster::orders_and_staging(three_staging_rows());
    cluster.settings.enable_coordinator_insert_select = false;
    let plan = cluster
        .plan(&insert_into_orders(select_staging(), NUMERICOID))
        .unwrap();
    assert_eq!(
        plan.planning_error.as_ref().unwrap().message,
        COORDINATOR_INSERT_SELECT_DISABLED
    );
    let outcome = cluster.execute(plan, ParamList::default());
    assert!(outcome.result.unwrap_err().is_deferrable());
}

#[test]
fn test_field_store_is_rejected_while_planning() {
    let cluster = Cluster::orders_and_staging(vec![]);
    let mut q = insert_into_orders(select_staging(), NUMERICOID);
    q.target_list[1].expr = Expr::FieldStore {
        arg: Box::new(make_null_const(NUMERICOID)),
        fieldnames: vec!["x".into()],
        newvals: vec![make_var(2, 2, NUMERICOID)],
        result_type: NUMERICOID,
    };

    let err = cluster.plan(&q).unwrap_err();
    assert!(matches!(err, FunnelError::StatementRejected { .. }));
    assert_eq!(
        err.hint(),
        Some("Do not use array references and field stores on the INSERT target list.")
    );
}

// ── Rows affected ──────────────────────────────────────────────────────────

#[test]
fn test_rows_affected_for_empty_single_and_many() {
    for n in [0, 1, 40] {
        let rows = (1..=n).map(|i| staging_row(i, "1.5")).collect();
        let cluster = Cluster::orders_and_staging(rows);
        let outcome = cluster.run(&insert_into_orders(select_staging(), NUMERICOID));
        assert_eq!(outcome.result.unwrap(), n as u64);
        assert_eq!(outcome.store.row_count(ORDERS), n as usize);
    }
}

#[test]
fn test_rows_are_spread_over_shards() {
    let rows = (1..=64).map(|i| staging_row(i, "1")).collect();
    let cluster = Cluster::orders_and_staging(rows);
    let outcome = cluster.run(&insert_into_orders(select_staging(), NUMERICOID));
    assert_eq!(outcome.result.unwrap(), 64);
    let used = (0..4)
        .filter(|shard| !outcome.store.shard_rows(ORDERS, *shard).is_empty())
        .count();
    assert!(used > 1);
}

#[test]
fn test_bound_parameter_filters_rows() {
    let cluster = Cluster::orders_and_staging(three_staging_rows());
    let mut select = select_staging();
    select.jointree.quals = Some(make_op(
        Operator::Gt,
        make_var(1, 1, INT4OID),
        make_param(1, INT4OID),
        BOOLOID,
    ));
    let plan = cluster
        .plan(&insert_into_orders(select, NUMERICOID))
        .unwrap();
    let outcome = cluster.execute(plan, ParamList::new(vec![Datum::Int4(1)]));
    assert_eq!(outcome.result.unwrap(), 2);
}

// ── Failures ───────────────────────────────────────────────────────────────

#[test]
fn test_select_error_propagates_and_releases_portal() {
    let cluster = Cluster::orders_and_staging(three_staging_rows());
    let mut select = select_staging();
    select.target_list[1].expr = make_op(
        Operator::Div,
        make_var(1, 2, NUMERICOID),
        make_int4_const(0),
        NUMERICOID,
    );
    let outcome = cluster.run(&insert_into_orders(select, NUMERICOID));

    let err = outcome.result.unwrap_err();
    assert!(err.is_execution_error());
    assert_eq!(outcome.open_portals, 0);
    assert_eq!(outcome.es_processed, 0);
}

#[test]
fn test_open_cursor_is_untouched_by_execution() {
    let cluster = Cluster::orders_and_staging(three_staging_rows());
    let portals = PortalManager::new();
    let cursor = portals.create_cursor("c1").unwrap();

    let plan = cluster
        .plan(&insert_into_orders(select_staging(), NUMERICOID))
        .unwrap();
    let outcome = cluster.execute_in_session(plan, ParamList::default(), &portals);

    assert_eq!(outcome.result.unwrap(), 3);
    assert_eq!(outcome.open_portals, 1);
    assert_eq!(portals.visible_portals(), vec!["c1".to_string()]);
    drop(cursor);
    assert_eq!(portals.active_count(), 0);
}

#[test]
fn test_null_distribution_value_is_skipped_by_default() {
    let mut rows = three_staging_rows();
    rows.push(vec![Datum::Null, numeric("1")]);
    let cluster = Cluster::orders_and_staging(rows);
    let outcome = cluster.run(&insert_into_orders(select_staging(), NUMERICOID));
    assert_eq!(outcome.result.unwrap(), 3);
}

#[test]
fn test_null_distribution_value_aborts_when_strict() {
    let mut rows = three_staging_rows();
    rows.push(vec![Datum::Null, numeric("1")]);
    let mut cluster = Cluster::orders_and_staging(rows);
    cluster.settings.copy_stop_on_failure = true;
    let outcome = cluster.run(&insert_into_orders(select_staging(), NUMERICOID));
    assert!(matches!(
        outcome.result,
        Err(FunnelError::ConstraintViolation(_))
    ));
    assert_eq!(outcome.es_processed, 0);
    assert_eq!(outcome.open_portals, 0);
}

// ── EXPLAIN ────────────────────────────────────────────────────────────────

#[test]
fn test_explain_text() {
    let cluster = Cluster::orders_and_staging(vec![]);
    let plan = cluster
        .plan(&insert_into_orders(select_amount_as_text(), TEXTOID))
        .unwrap();
    let text = plan.explain(ExplainFormat::Text).unwrap();
    assert!(text.starts_with("Custom Scan (Funnel INSERT ... SELECT via coordinator)"));
    assert!(text.contains("Target: orders (id, amount)"));
    assert!(text.contains("Query: SELECT"));
    assert!(!text.contains("Planning Error"));
}

#[test]
fn test_explain_json_includes_planning_error() {
    let cluster = Cluster::orders_and_staging(vec![]);
    let mut q = insert_into_orders(select_staging(), NUMERICOID);
    q.returning_list
        .push(make_target_entry(make_var(1, 1, INT4OID), 1, "id"));
    let plan = cluster.plan(&q).unwrap();
    let doc: serde_json::Value =
        serde_json::from_str(&plan.explain(ExplainFormat::Json).unwrap()).unwrap();
    assert_eq!(doc["Node Type"], "Custom Scan");
    assert_eq!(doc["Planning Error"]["message"], RETURNING_NOT_SUPPORTED);
    assert!(doc["Query"].is_null());
}
