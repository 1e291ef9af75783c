//! Query and expression evaluation.
//!
//! Evaluation keeps a stack of frames, one per query level being run. A
//! Var with `levels_up = n` reads the current row of the frame `n` below
//! the top; a CTE reference with `levels_up = n` reads the CTE rows
//! materialized by that frame. This is the same addressing the planner's
//! CTE relocation has to keep intact.

use std::cmp::Ordering;
use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::datum::{Datum, Row};
use crate::engine::LocalTables;
use crate::engine::ops::{apply_operator, call_function};
use crate::error::FunnelError;
use crate::executor::ParamList;
use crate::query::{
    BoolOp, Expr, JoinTreeNode, JoinType, Query, RtIndex, RteKind, SubLinkKind, Var,
};
use crate::types::{NO_TYPMOD, UNKNOWNOID, type_name};

/// Current row of every range table entry of one query level. `None` for
/// entries not (yet) part of the row being built.
type Bindings = Vec<Option<Row>>;

#[derive(Debug, Default)]
struct Frame {
    ctes: HashMap<String, Vec<Row>>,
    widths: Vec<usize>,
    bindings: Bindings,
}

/// Evaluates a query tree over [`LocalTables`].
#[derive(Debug)]
pub struct Evaluator<'a> {
    tables: &'a LocalTables,
    params: &'a ParamList,
    now: DateTime<Utc>,
}

impl<'a> Evaluator<'a> {
    pub fn new(tables: &'a LocalTables, params: &'a ParamList, now: DateTime<Utc>) -> Self {
        Self {
            tables,
            params,
            now,
        }
    }

    /// Run a SELECT and return its visible output rows.
    pub fn run(&self, query: &Query) -> Result<Vec<Row>, FunnelError> {
        let mut stack = Vec::new();
        self.eval_query(query, &mut stack)
    }

    fn eval_query(&self, query: &Query, stack: &mut Vec<Frame>) -> Result<Vec<Row>, FunnelError> {
        stack.push(Frame {
            ctes: HashMap::new(),
            widths: query.rtable.iter().map(|rte| rte.colnames.len()).collect(),
            bindings: vec![None; query.rtable.len()],
        });
        let result = self.eval_query_level(query, stack);
        stack.pop();
        result
    }

    fn eval_query_level(
        &self,
        query: &Query,
        stack: &mut Vec<Frame>,
    ) -> Result<Vec<Row>, FunnelError> {
        for cte in &query.cte_list {
            let rows = self.eval_query(&cte.ctequery, stack)?;
            top(stack)?.ctes.insert(cte.ctename.clone(), rows);
        }

        // FROM a, b, ... is the cross product of its items.
        let mut candidates: Vec<Bindings> = vec![vec![None; query.rtable.len()]];
        for node in &query.jointree.fromlist {
            let item = self.eval_join_node(query, node, stack)?;
            let mut product = Vec::with_capacity(candidates.len() * item.len());
            for left in &candidates {
                for right in &item {
                    product.push(merge(left, right));
                }
            }
            candidates = product;
        }

        let mut out = Vec::new();
        for bindings in candidates {
            top(stack)?.bindings = bindings;
            if let Some(quals) = &query.jointree.quals
                && !self.eval_qual(quals, stack)?
            {
                continue;
            }
            let row = query
                .visible_targets()
                .map(|tle| self.eval_expr(&tle.expr, stack))
                .collect::<Result<Row, _>>()?;
            out.push(row);
        }
        Ok(out)
    }

    fn eval_join_node(
        &self,
        query: &Query,
        node: &JoinTreeNode,
        stack: &mut Vec<Frame>,
    ) -> Result<Vec<Bindings>, FunnelError> {
        match node {
            JoinTreeNode::RangeTblRef(index) => {
                let rows = self.scan_rte(query, *index, stack)?;
                Ok(rows
                    .into_iter()
                    .map(|row| {
                        let mut bindings = vec![None; query.rtable.len()];
                        bindings[*index - 1] = Some(row);
                        bindings
                    })
                    .collect())
            }
            JoinTreeNode::Join(join) => {
                let left = self.eval_join_node(query, &join.larg, stack)?;
                let right = self.eval_join_node(query, &join.rarg, stack)?;
                let mut out = Vec::new();
                for l in &left {
                    let mut matched = false;
                    for r in &right {
                        let merged = merge(l, r);
                        let keep = match &join.quals {
                            Some(quals) => {
                                top(stack)?.bindings = merged.clone();
                                self.eval_qual(quals, stack)?
                            }
                            None => true,
                        };
                        if keep {
                            out.push(merged);
                            matched = true;
                        }
                    }
                    if !matched && join.jointype == JoinType::Left {
                        let mut padded = l.clone();
                        let widths = &top(stack)?.widths;
                        let mut indexes = Vec::new();
                        rt_indexes(&join.rarg, &mut indexes);
                        for index in indexes {
                            padded[index - 1] = Some(vec![Datum::Null; widths[index - 1]]);
                        }
                        out.push(padded);
                    }
                }
                Ok(out)
            }
        }
    }

    fn scan_rte(
        &self,
        query: &Query,
        index: RtIndex,
        stack: &mut Vec<Frame>,
    ) -> Result<Vec<Row>, FunnelError> {
        let rte = query.rt_fetch(index).ok_or_else(|| {
            FunnelError::InternalError(format!("range table index {index} out of bounds"))
        })?;
        match &rte.kind {
            RteKind::Relation { relid } => Ok(self.tables.table(*relid)?.rows.clone()),
            RteKind::Subquery { subquery } => self.eval_query(subquery, stack),
            RteKind::Cte { ctename, levels_up } => {
                let frame = frame_at(stack, *levels_up)?;
                frame.ctes.get(ctename).cloned().ok_or_else(|| {
                    FunnelError::NotFound(format!(
                        "CTE \"{ctename}\" at {levels_up} level(s) up"
                    ))
                })
            }
            RteKind::Values { rows } => rows
                .iter()
                .map(|row| {
                    row.iter()
                        .map(|expr| self.eval_expr(expr, stack))
                        .collect::<Result<Row, _>>()
                })
                .collect(),
        }
    }

    /// WHERE/ON semantics: only TRUE keeps the row.
    fn eval_qual(&self, expr: &Expr, stack: &mut Vec<Frame>) -> Result<bool, FunnelError> {
        Ok(self.eval_bool(expr, stack)?.unwrap_or(false))
    }

    fn eval_bool(&self, expr: &Expr, stack: &mut Vec<Frame>) -> Result<Option<bool>, FunnelError> {
        match self.eval_expr(expr, stack)? {
            Datum::Null => Ok(None),
            Datum::Bool(b) => Ok(Some(b)),
            other => Err(FunnelError::ExecutionError(format!(
                "argument of boolean expression must be type boolean, not type {}",
                other.type_oid().map(type_name).unwrap_or_default()
            ))),
        }
    }

    fn eval_expr(&self, expr: &Expr, stack: &mut Vec<Frame>) -> Result<Datum, FunnelError> {
        match expr {
            Expr::Var(var) => read_var(stack, var),
            Expr::Const { value, .. } => Ok(value.clone()),
            Expr::Param { paramid, paramtype } => {
                let value = self.params.get(*paramid)?.clone();
                if *paramtype == UNKNOWNOID {
                    Ok(value)
                } else {
                    value.cast(*paramtype, NO_TYPMOD)
                }
            }
            Expr::OpExpr {
                op,
                args,
                result_type,
            } => {
                let [left, right] = args.as_slice() else {
                    return Err(FunnelError::InternalError(format!(
                        "operator {} expects 2 arguments, got {}",
                        op.symbol(),
                        args.len()
                    )));
                };
                let left = self.eval_expr(left, stack)?;
                let right = self.eval_expr(right, stack)?;
                apply_operator(*op, left, right, *result_type)
            }
            Expr::FuncExpr {
                funcname,
                args,
                result_type,
            } => {
                let values = args
                    .iter()
                    .map(|a| self.eval_expr(a, stack))
                    .collect::<Result<Vec<_>, _>>()?;
                call_function(funcname, values, *result_type, self.now)
            }
            Expr::BoolExpr { op, args } => self.eval_bool_expr(*op, args, stack),
            Expr::NullTest { arg, is_null } => {
                let value = self.eval_expr(arg, stack)?;
                Ok(Datum::Bool(value.is_null() == *is_null))
            }
            Expr::Coerce {
                arg,
                result_type,
                result_typmod,
            } => self.eval_expr(arg, stack)?.cast(*result_type, *result_typmod),
            Expr::SubLink {
                kind,
                testexpr,
                subselect,
            } => self.eval_sublink(*kind, testexpr.as_deref(), subselect, stack),
            Expr::FieldStore { .. } | Expr::ArrayRef { .. } => Err(FunnelError::ExecutionError(
                "field stores and array subscripts are not supported by the local engine"
                    .to_string(),
            )),
        }
    }

    fn eval_bool_expr(
        &self,
        op: BoolOp,
        args: &[Expr],
        stack: &mut Vec<Frame>,
    ) -> Result<Datum, FunnelError> {
        if op == BoolOp::Not {
            let [arg] = args else {
                return Err(FunnelError::InternalError(
                    "NOT expects exactly one argument".to_string(),
                ));
            };
            return Ok(match self.eval_bool(arg, stack)? {
                Some(b) => Datum::Bool(!b),
                None => Datum::Null,
            });
        }

        // AND stops at the first FALSE, OR at the first TRUE.
        let decisive = op == BoolOp::Or;
        let mut saw_null = false;
        for arg in args {
            match self.eval_bool(arg, stack)? {
                Some(b) if b == decisive => return Ok(Datum::Bool(decisive)),
                Some(_) => {}
                None => saw_null = true,
            }
        }
        Ok(if saw_null {
            Datum::Null
        } else {
            Datum::Bool(!decisive)
        })
    }

    fn eval_sublink(
        &self,
        kind: SubLinkKind,
        testexpr: Option<&Expr>,
        subselect: &Query,
        stack: &mut Vec<Frame>,
    ) -> Result<Datum, FunnelError> {
        let rows = self.eval_query(subselect, stack)?;
        match kind {
            SubLinkKind::Exists => Ok(Datum::Bool(!rows.is_empty())),
            SubLinkKind::Expr => match rows.as_slice() {
                [] => Ok(Datum::Null),
                [row] => Ok(row.first().cloned().unwrap_or(Datum::Null)),
                _ => Err(FunnelError::ExecutionError(
                    "more than one row returned by a subquery used as an expression".to_string(),
                )),
            },
            SubLinkKind::Any => {
                let testexpr = testexpr.ok_or_else(|| {
                    FunnelError::InternalError("ANY sublink without test expression".to_string())
                })?;
                let lhs = self.eval_expr(testexpr, stack)?;
                let mut saw_null = false;
                for row in &rows {
                    let rhs = row.first().unwrap_or(&Datum::Null);
                    match lhs.compare(rhs) {
                        Some(Ordering::Equal) => return Ok(Datum::Bool(true)),
                        Some(_) => {}
                        None => saw_null = true,
                    }
                }
                Ok(if saw_null {
                    Datum::Null
                } else {
                    Datum::Bool(false)
                })
            }
        }
    }
}

fn top(stack: &mut [Frame]) -> Result<&mut Frame, FunnelError> {
    stack
        .last_mut()
        .ok_or_else(|| FunnelError::InternalError("no query level is being evaluated".to_string()))
}

fn frame_at(stack: &[Frame], levels_up: u32) -> Result<&Frame, FunnelError> {
    stack
        .len()
        .checked_sub(1 + levels_up as usize)
        .and_then(|i| stack.get(i))
        .ok_or_else(|| {
            FunnelError::InternalError(format!(
                "reference {levels_up} level(s) up from a depth of {}",
                stack.len()
            ))
        })
}

fn read_var(stack: &[Frame], var: &Var) -> Result<Datum, FunnelError> {
    let frame = frame_at(stack, var.levels_up)?;
    let row = var
        .varno
        .checked_sub(1)
        .and_then(|i| frame.bindings.get(i))
        .and_then(Option::as_ref)
        .ok_or_else(|| {
            FunnelError::InternalError(format!("Var {}.{} is not bound", var.varno, var.varattno))
        })?;
    var.varattno
        .checked_sub(1)
        .and_then(|i| row.get(i))
        .cloned()
        .ok_or_else(|| {
            FunnelError::InternalError(format!(
                "Var {}.{} is past the end of its row",
                var.varno, var.varattno
            ))
        })
}

fn merge(left: &Bindings, right: &Bindings) -> Bindings {
    left.iter()
        .zip(right)
        .map(|(l, r)| l.clone().or_else(|| r.clone()))
        .collect()
}

fn rt_indexes(node: &JoinTreeNode, out: &mut Vec<RtIndex>) {
    match node {
        JoinTreeNode::RangeTblRef(index) => out.push(*index),
        JoinTreeNode::Join(join) => {
            rt_indexes(&join.larg, out);
            rt_indexes(&join.rarg, out);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::make::*;
    use crate::query::{CmdType, Operator, RangeTblEntry};
    use crate::types::{BOOLOID, INT4OID, NUMERICOID, TEXTOID, numeric_typmod};
    use rust_decimal::Decimal;

    const PEOPLE: u32 = 100;
    const PETS: u32 = 101;

    fn tables() -> LocalTables {
        LocalTables::new()
            .with_table(
                PEOPLE,
                "people",
                &["id", "name"],
                vec![
                    vec![Datum::Int4(1), Datum::Text("ada".into())],
                    vec![Datum::Int4(2), Datum::Text("bob".into())],
                    vec![Datum::Int4(3), Datum::Null],
                ],
            )
            .with_table(
                PETS,
                "pets",
                &["owner", "pet"],
                vec![
                    vec![Datum::Int4(1), Datum::Text("cat".into())],
                    vec![Datum::Int4(1), Datum::Text("dog".into())],
                    vec![Datum::Int4(3), Datum::Text("eel".into())],
                ],
            )
    }

    fn run(query: &Query) -> Result<Vec<Row>, FunnelError> {
        let tables = tables();
        let params = ParamList::new(vec![Datum::Int4(2)]);
        Evaluator::new(&tables, &params, Utc::now()).run(query)
    }

    fn people_query() -> (Query, RtIndex) {
        let mut q = Query::new(CmdType::Select);
        let idx = q.add_rte(make_relation_rte(PEOPLE, "people", &["id", "name"]));
        q.jointree.fromlist.push(JoinTreeNode::RangeTblRef(idx));
        (q, idx)
    }

    // ── Scans and filters ──────────────────────────────────────────────

    #[test]
    fn test_select_without_from_yields_one_row() {
        let mut q = Query::new(CmdType::Select);
        q.target_list
            .push(make_target_entry(make_int4_const(42), 1, "answer"));
        assert_eq!(run(&q).unwrap(), vec![vec![Datum::Int4(42)]]);
    }

    #[test]
    fn test_where_with_param_and_null_logic() {
        let (mut q, p) = people_query();
        q.target_list
            .push(make_target_entry(make_var(p, 1, INT4OID), 1, "id"));
        // id >= $1 AND name IS NOT NULL
        q.jointree.quals = Some(make_and(vec![
            make_op(
                Operator::Ge,
                make_var(p, 1, INT4OID),
                make_param(1, INT4OID),
                BOOLOID,
            ),
            Expr::NullTest {
                arg: Box::new(make_var(p, 2, TEXTOID)),
                is_null: false,
            },
        ]));
        assert_eq!(run(&q).unwrap(), vec![vec![Datum::Int4(2)]]);
    }

    #[test]
    fn test_null_comparison_filters_row() {
        let (mut q, p) = people_query();
        q.target_list
            .push(make_target_entry(make_var(p, 1, INT4OID), 1, "id"));
        q.jointree.quals = Some(make_op(
            Operator::Ne,
            make_var(p, 2, TEXTOID),
            make_text_const("ada"),
            BOOLOID,
        ));
        assert_eq!(run(&q).unwrap(), vec![vec![Datum::Int4(2)]]);
    }

    #[test]
    fn test_projection_casts_with_typmod() {
        let (mut q, p) = people_query();
        q.target_list.push(make_target_entry(
            make_coerce(
                make_op(
                    Operator::Div,
                    make_coerce(make_var(p, 1, INT4OID), NUMERICOID, NO_TYPMOD),
                    make_int4_const(3),
                    NUMERICOID,
                ),
                NUMERICOID,
                numeric_typmod(10, 2),
            ),
            1,
            "third",
        ));
        let rows = run(&q).unwrap();
        assert_eq!(rows[0], vec![Datum::Numeric(Decimal::new(33, 2))]);
        assert_eq!(rows[1], vec![Datum::Numeric(Decimal::new(67, 2))]);
    }

    // ── Joins ──────────────────────────────────────────────────────────

    fn join_query(jointype: JoinType) -> Query {
        let mut q = Query::new(CmdType::Select);
        let p = q.add_rte(make_relation_rte(PEOPLE, "people", &["id", "name"]));
        let t = q.add_rte(make_relation_rte(PETS, "pets", &["owner", "pet"]));
        q.jointree.fromlist.push(make_join(
            jointype,
            JoinTreeNode::RangeTblRef(p),
            JoinTreeNode::RangeTblRef(t),
            Some(make_op(
                Operator::Eq,
                make_var(p, 1, INT4OID),
                make_var(t, 1, INT4OID),
                BOOLOID,
            )),
        ));
        q.target_list
            .push(make_target_entry(make_var(p, 1, INT4OID), 1, "id"));
        q.target_list
            .push(make_target_entry(make_var(t, 2, TEXTOID), 2, "pet"));
        q
    }

    #[test]
    fn test_inner_join() {
        let rows = run(&join_query(JoinType::Inner)).unwrap();
        assert_eq!(rows.len(), 3);
        assert!(rows.iter().all(|r| r[0] != Datum::Int4(2)));
    }

    #[test]
    fn test_left_join_pads_with_nulls() {
        let rows = run(&join_query(JoinType::Left)).unwrap();
        assert_eq!(rows.len(), 4);
        assert!(rows.contains(&vec![Datum::Int4(2), Datum::Null]));
    }

    #[test]
    fn test_cross_product_of_from_items() {
        let mut q = Query::new(CmdType::Select);
        let p = q.add_rte(make_relation_rte(PEOPLE, "people", &["id", "name"]));
        let t = q.add_rte(make_relation_rte(PETS, "pets", &["owner", "pet"]));
        q.jointree.fromlist.push(JoinTreeNode::RangeTblRef(p));
        q.jointree.fromlist.push(JoinTreeNode::RangeTblRef(t));
        q.target_list
            .push(make_target_entry(make_var(p, 1, INT4OID), 1, "id"));
        assert_eq!(run(&q).unwrap().len(), 9);
    }

    // ── CTEs and sublinks ──────────────────────────────────────────────

    fn named_people() -> Query {
        let (mut body, b) = people_query();
        body.target_list
            .push(make_target_entry(make_var(b, 1, INT4OID), 1, "id"));
        body.jointree.quals = Some(Expr::NullTest {
            arg: Box::new(make_var(b, 2, TEXTOID)),
            is_null: false,
        });
        body
    }

    #[test]
    fn test_cte_resolved_through_levels_up() {
        // WITH named AS (...) SELECT * FROM (SELECT id FROM named) s
        let mut inner = Query::new(CmdType::Select);
        let c = inner.add_rte(make_cte_rte("named", 1, &["id"]));
        inner.jointree.fromlist.push(JoinTreeNode::RangeTblRef(c));
        inner
            .target_list
            .push(make_target_entry(make_var(c, 1, INT4OID), 1, "id"));

        let mut outer = Query::new(CmdType::Select);
        outer.cte_list.push(make_cte("named", named_people()));
        let s = outer.add_rte(make_subquery_rte(inner, "s"));
        outer.jointree.fromlist.push(JoinTreeNode::RangeTblRef(s));
        outer
            .target_list
            .push(make_target_entry(make_var(s, 1, INT4OID), 1, "id"));

        assert_eq!(
            run(&outer).unwrap(),
            vec![vec![Datum::Int4(1)], vec![Datum::Int4(2)]]
        );
    }

    #[test]
    fn test_cte_with_wrong_levels_up_is_not_found() {
        let mut inner = Query::new(CmdType::Select);
        let c = inner.add_rte(make_cte_rte("named", 0, &["id"]));
        inner.jointree.fromlist.push(JoinTreeNode::RangeTblRef(c));
        inner
            .target_list
            .push(make_target_entry(make_var(c, 1, INT4OID), 1, "id"));

        let mut outer = Query::new(CmdType::Select);
        outer.cte_list.push(make_cte("named", named_people()));
        let s = outer.add_rte(make_subquery_rte(inner, "s"));
        outer.jointree.fromlist.push(JoinTreeNode::RangeTblRef(s));

        assert!(matches!(run(&outer), Err(FunnelError::NotFound(_))));
    }

    #[test]
    fn test_exists_sublink_with_outer_reference() {
        // SELECT id FROM people p WHERE EXISTS (SELECT 1 FROM pets t WHERE t.owner = p.id)
        let mut sub = Query::new(CmdType::Select);
        let t = sub.add_rte(make_relation_rte(PETS, "pets", &["owner", "pet"]));
        sub.jointree.fromlist.push(JoinTreeNode::RangeTblRef(t));
        sub.jointree.quals = Some(make_op(
            Operator::Eq,
            make_var(t, 1, INT4OID),
            make_outer_var(1, 1, INT4OID, 1),
            BOOLOID,
        ));
        sub.target_list
            .push(make_target_entry(make_int4_const(1), 1, "one"));

        let (mut q, p) = people_query();
        q.target_list
            .push(make_target_entry(make_var(p, 1, INT4OID), 1, "id"));
        q.jointree.quals = Some(Expr::SubLink {
            kind: SubLinkKind::Exists,
            testexpr: None,
            subselect: Box::new(sub),
        });
        assert_eq!(
            run(&q).unwrap(),
            vec![vec![Datum::Int4(1)], vec![Datum::Int4(3)]]
        );
    }

    #[test]
    fn test_scalar_sublink_with_many_rows_fails() {
        let mut sub = Query::new(CmdType::Select);
        let t = sub.add_rte(make_relation_rte(PETS, "pets", &["owner", "pet"]));
        sub.jointree.fromlist.push(JoinTreeNode::RangeTblRef(t));
        sub.target_list
            .push(make_target_entry(make_var(t, 2, TEXTOID), 1, "pet"));

        let mut q = Query::new(CmdType::Select);
        q.target_list.push(make_target_entry(
            Expr::SubLink {
                kind: SubLinkKind::Expr,
                testexpr: None,
                subselect: Box::new(sub),
            },
            1,
            "pet",
        ));
        assert!(matches!(run(&q), Err(FunnelError::ExecutionError(_))));
    }

    #[test]
    fn test_values_rte() {
        let mut q = Query::new(CmdType::Select);
        let v = q.add_rte(RangeTblEntry {
            alias: "v".into(),
            colnames: vec!["x".into()],
            kind: RteKind::Values {
                rows: vec![vec![make_int4_const(5)], vec![make_param(1, INT4OID)]],
            },
        });
        q.jointree.fromlist.push(JoinTreeNode::RangeTblRef(v));
        q.target_list
            .push(make_target_entry(make_var(v, 1, INT4OID), 1, "x"));
        assert_eq!(
            run(&q).unwrap(),
            vec![vec![Datum::Int4(5)], vec![Datum::Int4(2)]]
        );
    }
}
