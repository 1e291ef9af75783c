//! Render a query tree back to SQL.
//!
//! The output is for EXPLAIN and logs: it is valid-looking SQL but uses
//! range table aliases in place of qualified relation names.

use super::{
    BoolOp, CmdType, Expr, FromExpr, JoinTreeNode, JoinType, OnConflictAction, Query, RteKind,
    SubLinkKind, TargetEntry, Var,
};
use crate::datum::Datum;
use crate::types::{BOOLOID, FLOAT8OID, INT2OID, INT4OID, INT8OID, NUMERICOID, format_type};

impl Query {
    /// SQL text for this query.
    pub fn deparse(&self) -> String {
        let mut scopes = Vec::new();
        deparse_query(self, &mut scopes)
    }
}

/// Quote an identifier if it is not a plain lower-case name.
pub fn quote_ident(name: &str) -> String {
    let plain = !name.is_empty()
        && name
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_lowercase() || c == '_')
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
    if plain {
        name.to_string()
    } else {
        format!("\"{}\"", name.replace('"', "\"\""))
    }
}

/// Quote a string literal.
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

fn deparse_query<'a>(query: &'a Query, scopes: &mut Vec<&'a Query>) -> String {
    scopes.push(query);
    let mut sql = String::new();

    if !query.cte_list.is_empty() {
        let ctes: Vec<String> = query
            .cte_list
            .iter()
            .map(|cte| {
                let cols = if cte.aliascolnames.is_empty() {
                    String::new()
                } else {
                    format!("({})", ident_list(&cte.aliascolnames))
                };
                format!(
                    "{}{cols} AS ({})",
                    quote_ident(&cte.ctename),
                    deparse_query(&cte.ctequery, scopes)
                )
            })
            .collect();
        sql.push_str(&format!("WITH {} ", ctes.join(", ")));
    }

    match query.command_type {
        CmdType::Select => {
            sql.push_str("SELECT ");
            sql.push_str(&target_list_sql(&query.target_list, scopes, true));
            sql.push_str(&from_where_sql(&query.jointree, scopes));
        }
        CmdType::Insert => {
            let target = query
                .result_relation
                .and_then(|idx| query.rt_fetch(idx))
                .map(|rte| quote_ident(&rte.alias))
                .unwrap_or_else(|| "?relation?".to_string());
            let columns: Vec<String> = query
                .target_list
                .iter()
                .map(|tle| quote_ident(tle.resname.as_deref().unwrap_or("?column?")))
                .collect();
            sql.push_str(&format!("INSERT INTO {target} ({}) SELECT ", columns.join(", ")));
            sql.push_str(&target_list_sql(&query.target_list, scopes, false));
            sql.push_str(&from_where_sql(&query.jointree, scopes));

            if let Some(on_conflict) = &query.on_conflict {
                let arbiter = if on_conflict.arbiter_columns.is_empty() {
                    String::new()
                } else {
                    format!(" ({})", ident_list(&on_conflict.arbiter_columns))
                };
                match on_conflict.action {
                    OnConflictAction::Nothing => {
                        sql.push_str(&format!(" ON CONFLICT{arbiter} DO NOTHING"));
                    }
                    OnConflictAction::Update => {
                        let sets: Vec<String> = on_conflict
                            .set_list
                            .iter()
                            .map(|tle| {
                                format!(
                                    "{} = {}",
                                    quote_ident(tle.resname.as_deref().unwrap_or("?column?")),
                                    expr_sql(&tle.expr, scopes)
                                )
                            })
                            .collect();
                        sql.push_str(&format!(
                            " ON CONFLICT{arbiter} DO UPDATE SET {}",
                            sets.join(", ")
                        ));
                        if let Some(qual) = &on_conflict.where_clause {
                            sql.push_str(&format!(" WHERE {}", expr_sql(qual, scopes)));
                        }
                    }
                }
            }
            if !query.returning_list.is_empty() {
                sql.push_str(" RETURNING ");
                sql.push_str(&target_list_sql(&query.returning_list, scopes, true));
            }
        }
    }

    scopes.pop();
    sql
}

fn ident_list(names: &[String]) -> String {
    names
        .iter()
        .map(|n| quote_ident(n))
        .collect::<Vec<_>>()
        .join(", ")
}

fn target_list_sql<'a>(
    targets: &'a [TargetEntry],
    scopes: &mut Vec<&'a Query>,
    with_alias: bool,
) -> String {
    targets
        .iter()
        .filter(|tle| !tle.resjunk)
        .map(|tle| {
            let expr = expr_sql(&tle.expr, scopes);
            match (&tle.resname, with_alias) {
                (Some(name), true) => format!("{expr} AS {}", quote_ident(name)),
                _ => expr,
            }
        })
        .collect::<Vec<_>>()
        .join(", ")
}

fn from_where_sql<'a>(jointree: &'a FromExpr, scopes: &mut Vec<&'a Query>) -> String {
    let mut sql = String::new();
    if !jointree.fromlist.is_empty() {
        let items: Vec<String> = jointree
            .fromlist
            .iter()
            .map(|node| jointree_node_sql(node, scopes))
            .collect();
        sql.push_str(&format!(" FROM {}", items.join(", ")));
    }
    if let Some(quals) = &jointree.quals {
        sql.push_str(&format!(" WHERE {}", expr_sql(quals, scopes)));
    }
    sql
}

fn jointree_node_sql<'a>(node: &'a JoinTreeNode, scopes: &mut Vec<&'a Query>) -> String {
    match node {
        JoinTreeNode::RangeTblRef(index) => {
            let Some(query) = scopes.last().copied() else {
                return "?relation?".to_string();
            };
            let Some(rte) = query.rt_fetch(*index) else {
                return "?relation?".to_string();
            };
            let alias = quote_ident(&rte.alias);
            match &rte.kind {
                RteKind::Relation { .. } => alias,
                RteKind::Subquery { subquery } => {
                    format!("({}) {alias}", deparse_query(subquery, scopes))
                }
                RteKind::Cte { ctename, .. } if ctename == &rte.alias => alias,
                RteKind::Cte { ctename, .. } => format!("{} {alias}", quote_ident(ctename)),
                RteKind::Values { rows } => {
                    let rows: Vec<String> = rows
                        .iter()
                        .map(|row| {
                            let vals: Vec<String> =
                                row.iter().map(|e| expr_sql(e, scopes)).collect();
                            format!("({})", vals.join(", "))
                        })
                        .collect();
                    format!(
                        "(VALUES {}) {alias}({})",
                        rows.join(", "),
                        ident_list(&rte.colnames)
                    )
                }
            }
        }
        JoinTreeNode::Join(join) => {
            let keyword = match join.jointype {
                JoinType::Inner => "JOIN",
                JoinType::Left => "LEFT JOIN",
            };
            let on = join
                .quals
                .as_ref()
                .map(|q| expr_sql(q, scopes))
                .unwrap_or_else(|| "true".to_string());
            format!(
                "{} {keyword} {} ON {on}",
                jointree_node_sql(&join.larg, scopes),
                jointree_node_sql(&join.rarg, scopes)
            )
        }
    }
}

fn var_sql(var: &Var, scopes: &[&Query]) -> String {
    let level = scopes
        .len()
        .checked_sub(1 + var.levels_up as usize)
        .and_then(|i| scopes.get(i));
    let rte = level.and_then(|q| q.rt_fetch(var.varno));
    match rte {
        Some(rte) => {
            let column = rte
                .colnames
                .get(var.varattno.wrapping_sub(1))
                .map(|c| quote_ident(c))
                .unwrap_or_else(|| format!("col{}", var.varattno));
            format!("{}.{column}", quote_ident(&rte.alias))
        }
        None => "?column?".to_string(),
    }
}

fn const_sql(value: &Datum, consttype: u32) -> String {
    match value {
        Datum::Null => "NULL".to_string(),
        Datum::Bool(b) => b.to_string(),
        other => {
            let text = other.to_text().unwrap_or_default();
            match consttype {
                INT2OID | INT4OID | INT8OID | FLOAT8OID | NUMERICOID | BOOLOID => text,
                _ => format!("{}::{}", quote_literal(&text), format_type(consttype, -1)),
            }
        }
    }
}

fn expr_sql<'a>(expr: &'a Expr, scopes: &mut Vec<&'a Query>) -> String {
    match expr {
        Expr::Var(var) => var_sql(var, scopes),
        Expr::Const { value, consttype } => const_sql(value, *consttype),
        Expr::Param { paramid, .. } => format!("${paramid}"),
        Expr::OpExpr { op, args, .. } => match args.as_slice() {
            [left, right] => format!(
                "({} {} {})",
                expr_sql(left, scopes),
                op.symbol(),
                expr_sql(right, scopes)
            ),
            _ => {
                let parts: Vec<String> = args.iter().map(|a| expr_sql(a, scopes)).collect();
                format!("{}({})", op.symbol(), parts.join(", "))
            }
        },
        Expr::FuncExpr { funcname, args, .. } => {
            let parts: Vec<String> = args.iter().map(|a| expr_sql(a, scopes)).collect();
            format!("{funcname}({})", parts.join(", "))
        }
        Expr::BoolExpr { op, args } => {
            let parts: Vec<String> = args.iter().map(|a| expr_sql(a, scopes)).collect();
            match op {
                BoolOp::And => format!("({})", parts.join(" AND ")),
                BoolOp::Or => format!("({})", parts.join(" OR ")),
                BoolOp::Not => format!("(NOT {})", parts.join(", ")),
            }
        }
        Expr::NullTest { arg, is_null } => {
            let test = if *is_null { "IS NULL" } else { "IS NOT NULL" };
            format!("({} {test})", expr_sql(arg, scopes))
        }
        Expr::Coerce {
            arg,
            result_type,
            result_typmod,
        } => format!(
            "({})::{}",
            expr_sql(arg, scopes),
            format_type(*result_type, *result_typmod)
        ),
        Expr::SubLink {
            kind,
            testexpr,
            subselect,
        } => {
            let body = deparse_query(subselect, scopes);
            match kind {
                SubLinkKind::Exists => format!("EXISTS ({body})"),
                SubLinkKind::Expr => format!("({body})"),
                SubLinkKind::Any => {
                    let lhs = testexpr
                        .as_ref()
                        .map(|e| expr_sql(e, scopes))
                        .unwrap_or_else(|| "?".to_string());
                    format!("({lhs} IN ({body}))")
                }
            }
        }
        Expr::FieldStore {
            arg,
            fieldnames,
            newvals,
            ..
        } => {
            let base = expr_sql(arg, scopes);
            let assigns: Vec<String> = fieldnames
                .iter()
                .zip(newvals)
                .map(|(field, val)| format!("{base}.{} := {}", quote_ident(field), expr_sql(val, scopes)))
                .collect();
            assigns.join(", ")
        }
        Expr::ArrayRef {
            refexpr,
            subscripts,
            assign,
            ..
        } => {
            let subs: String = subscripts
                .iter()
                .map(|s| format!("[{}]", expr_sql(s, scopes)))
                .collect();
            let base = format!("{}{subs}", expr_sql(refexpr, scopes));
            match assign {
                Some(value) => format!("{base} := {}", expr_sql(value, scopes)),
                None => base,
            }
        }
    }
}
