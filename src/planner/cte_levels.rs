//! CTE scope rewriting.
//!
//! A CTE reference stores how many query levels up its definition lives.
//! When the WITH list of the INSERT is moved down into the SELECT, every
//! reference inside the SELECT that pointed at one of the moved CTEs now
//! points one level too far and must be lowered by one.
//!
//! The walk threads the depth by value: the SELECT itself sits at depth 1,
//! and each nested query (derived table, CTE body, sublink) adds one. A
//! reference is lowered exactly when its `levels_up` equals the depth of
//! the query owning it, i.e. when it reaches the INSERT level.

use crate::query::{Expr, FromExpr, JoinTreeNode, Query, RteKind, TargetEntry};

/// Lower the `levels_up` of every CTE reference inside `subquery` that
/// resolves to one of `relocated` at the level directly above it.
///
/// References to CTEs defined inside the subquery, and references to
/// relocated names at a depth where they do not reach the old top level,
/// are left untouched.
pub fn decrement_cte_levels(subquery: &mut Query, relocated: &[String]) {
    if relocated.is_empty() {
        return;
    }
    walk_query(subquery, relocated, 0);
}

fn walk_query(query: &mut Query, names: &[String], outer_depth: u32) {
    let depth = outer_depth + 1;

    for cte in &mut query.cte_list {
        walk_query(&mut cte.ctequery, names, depth);
    }

    for rte in &mut query.rtable {
        match &mut rte.kind {
            RteKind::Cte { ctename, levels_up } => {
                if *levels_up == depth && names.iter().any(|n| n == ctename) {
                    *levels_up -= 1;
                }
            }
            RteKind::Subquery { subquery } => walk_query(subquery, names, depth),
            RteKind::Values { rows } => {
                for expr in rows.iter_mut().flatten() {
                    walk_expr(expr, names, depth);
                }
            }
            RteKind::Relation { .. } => {}
        }
    }

    walk_from_expr(&mut query.jointree, names, depth);
    walk_targets(&mut query.target_list, names, depth);
    walk_targets(&mut query.returning_list, names, depth);

    if let Some(on_conflict) = &mut query.on_conflict {
        walk_targets(&mut on_conflict.set_list, names, depth);
        if let Some(expr) = &mut on_conflict.where_clause {
            walk_expr(expr, names, depth);
        }
    }
}

fn walk_targets(targets: &mut [TargetEntry], names: &[String], depth: u32) {
    for tle in targets {
        walk_expr(&mut tle.expr, names, depth);
    }
}

fn walk_from_expr(from: &mut FromExpr, names: &[String], depth: u32) {
    for node in &mut from.fromlist {
        walk_join_node(node, names, depth);
    }
    if let Some(quals) = &mut from.quals {
        walk_expr(quals, names, depth);
    }
}

fn walk_join_node(node: &mut JoinTreeNode, names: &[String], depth: u32) {
    match node {
        JoinTreeNode::RangeTblRef(_) => {}
        JoinTreeNode::Join(join) => {
            walk_join_node(&mut join.larg, names, depth);
            walk_join_node(&mut join.rarg, names, depth);
            if let Some(quals) = &mut join.quals {
                walk_expr(quals, names, depth);
            }
        }
    }
}

/// `depth` is the depth of the query the expression belongs to.
fn walk_expr(expr: &mut Expr, names: &[String], depth: u32) {
    match expr {
        Expr::Var(_) | Expr::Const { .. } | Expr::Param { .. } => {}
        Expr::OpExpr { args, .. } | Expr::FuncExpr { args, .. } | Expr::BoolExpr { args, .. } => {
            for arg in args {
                walk_expr(arg, names, depth);
            }
        }
        Expr::NullTest { arg, .. } | Expr::Coerce { arg, .. } => walk_expr(arg, names, depth),
        Expr::SubLink {
            testexpr,
            subselect,
            ..
        } => {
            if let Some(test) = testexpr {
                walk_expr(test, names, depth);
            }
            walk_query(subselect, names, depth);
        }
        Expr::FieldStore { arg, newvals, .. } => {
            walk_expr(arg, names, depth);
            for val in newvals {
                walk_expr(val, names, depth);
            }
        }
        Expr::ArrayRef {
            refexpr,
            subscripts,
            assign,
            ..
        } => {
            walk_expr(refexpr, names, depth);
            for sub in subscripts {
                walk_expr(sub, names, depth);
            }
            if let Some(assign) = assign {
                walk_expr(assign, names, depth);
            }
        }
    }
}
