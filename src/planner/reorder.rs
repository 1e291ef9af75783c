//! Positional alignment of the INSERT and SELECT target lists.
//!
//! After analysis the INSERT target list is ordered by target column and
//! each entry references some SELECT output by position, possibly through
//! an implicit coercion or as a bare constant (a column default). The
//! writer, however, consumes SELECT output rows positionally. This pass
//! rebuilds both lists so that entry *i* of the SELECT produces the value
//! for entry *i* of the INSERT.

use crate::error::FunnelError;
use crate::query::{Expr, Query, RtIndex, RteKind, TargetEntry, Var};

const INDIRECTION_HINT: &str =
    "Do not use array references and field stores on the INSERT target list.";

/// Rebuild `query.target_list` and the target list of the subquery at
/// `subquery_rt_index` so both line up position by position.
///
/// Each new insert entry is a `Var` over `insert_rt_index` whose
/// `varattno` is the target column and whose type is the type of the
/// matching SELECT expression. Junk SELECT entries are kept after the
/// visible ones.
pub fn reorder_insert_select_target_lists(
    query: &mut Query,
    insert_rt_index: RtIndex,
    subquery_rt_index: RtIndex,
) -> Result<(), FunnelError> {
    let insert_targets = std::mem::take(&mut query.target_list);

    let subquery = match query.rt_fetch_mut(subquery_rt_index).map(|rte| &mut rte.kind) {
        Some(RteKind::Subquery { subquery }) => subquery,
        _ => {
            return Err(FunnelError::InternalError(format!(
                "range table entry {subquery_rt_index} is not a subquery"
            )));
        }
    };
    let old_select_targets = std::mem::take(&mut subquery.target_list);

    let mut new_select_targets = Vec::with_capacity(old_select_targets.len());
    let mut new_insert_targets = Vec::with_capacity(insert_targets.len());
    let mut resno = 1;

    for insert_tle in insert_targets {
        if insert_tle.expr.is_indirection() {
            return Err(FunnelError::StatementRejected {
                message: "cannot plan INSERT ... SELECT via coordinator".to_string(),
                hint: Some(INDIRECTION_HINT.to_string()),
            });
        }

        let vars = {
            let mut vars = Vec::new();
            insert_tle.expr.pull_vars(&mut vars);
            vars.into_iter().cloned().collect::<Vec<Var>>()
        };

        let select_tle = match vars.as_slice() {
            [] => TargetEntry {
                expr: insert_tle.expr.clone(),
                resno,
                resname: insert_tle.resname.clone(),
                resjunk: insert_tle.resjunk,
            },
            [var] => {
                if var.varno != subquery_rt_index {
                    return Err(FunnelError::InternalError(format!(
                        "insert target \"{}\" does not reference the SELECT",
                        insert_tle.resname.as_deref().unwrap_or("?")
                    )));
                }
                let source = var
                    .varattno
                    .checked_sub(1)
                    .and_then(|i| old_select_targets.get(i))
                    .ok_or_else(|| {
                        FunnelError::InternalError(format!(
                            "SELECT has no output column {}",
                            var.varattno
                        ))
                    })?;
                TargetEntry {
                    resno,
                    ..source.clone()
                }
            }
            _ => {
                return Err(FunnelError::InternalError(format!(
                    "insert target \"{}\" references more than one column",
                    insert_tle.resname.as_deref().unwrap_or("?")
                )));
            }
        };

        let insert_var = Expr::Var(Var {
            varno: insert_rt_index,
            varattno: insert_tle.resno,
            vartype: select_tle.expr.expr_type(),
            vartypmod: select_tle.expr.expr_typmod(),
            levels_up: 0,
        });
        new_insert_targets.push(TargetEntry {
            expr: insert_var,
            resno: insert_tle.resno,
            resname: insert_tle.resname,
            resjunk: insert_tle.resjunk,
        });
        new_select_targets.push(select_tle);
        resno += 1;
    }

    for junk in old_select_targets.into_iter().filter(|tle| tle.resjunk) {
        new_select_targets.push(TargetEntry { resno, ..junk });
        resno += 1;
    }

    subquery.target_list = new_select_targets;
    query.target_list = new_insert_targets;
    Ok(())
}
