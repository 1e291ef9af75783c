//! Node constructors.

use super::{
    AttrNumber, BoolOp, CommonTableExpr, Expr, JoinExpr, JoinTreeNode, JoinType, Oid, Operator,
    Query, RangeTblEntry, RtIndex, RteKind, TargetEntry, Var,
};
use crate::datum::Datum;
use crate::types::{BOOLOID, INT4OID, NO_TYPMOD, TEXTOID, TypeOid};

/// A Var of the current query level without a type modifier.
pub fn make_var(varno: RtIndex, varattno: AttrNumber, vartype: TypeOid) -> Expr {
    Expr::Var(Var {
        varno,
        varattno,
        vartype,
        vartypmod: NO_TYPMOD,
        levels_up: 0,
    })
}

/// A Var referring to a range table `levels_up` query levels out.
pub fn make_outer_var(
    varno: RtIndex,
    varattno: AttrNumber,
    vartype: TypeOid,
    levels_up: u32,
) -> Expr {
    Expr::Var(Var {
        varno,
        varattno,
        vartype,
        vartypmod: NO_TYPMOD,
        levels_up,
    })
}

pub fn make_const(value: Datum, consttype: TypeOid) -> Expr {
    Expr::Const { value, consttype }
}

pub fn make_int4_const(value: i32) -> Expr {
    make_const(Datum::Int4(value), INT4OID)
}

pub fn make_text_const(value: &str) -> Expr {
    make_const(Datum::Text(value.to_string()), TEXTOID)
}

pub fn make_null_const(consttype: TypeOid) -> Expr {
    make_const(Datum::Null, consttype)
}

pub fn make_param(paramid: usize, paramtype: TypeOid) -> Expr {
    Expr::Param { paramid, paramtype }
}

/// A binary operator. Comparisons always yield boolean.
pub fn make_op(op: Operator, left: Expr, right: Expr, result_type: TypeOid) -> Expr {
    let result_type = if op.is_comparison() {
        BOOLOID
    } else {
        result_type
    };
    Expr::OpExpr {
        op,
        args: vec![left, right],
        result_type,
    }
}

pub fn make_func(funcname: &str, args: Vec<Expr>, result_type: TypeOid) -> Expr {
    Expr::FuncExpr {
        funcname: funcname.to_string(),
        args,
        result_type,
    }
}

/// AND of the given clauses; a single clause is returned as is.
pub fn make_and(mut args: Vec<Expr>) -> Expr {
    if args.len() == 1 {
        return args.remove(0);
    }
    Expr::BoolExpr {
        op: BoolOp::And,
        args,
    }
}

pub fn make_coerce(arg: Expr, result_type: TypeOid, result_typmod: i32) -> Expr {
    Expr::Coerce {
        arg: Box::new(arg),
        result_type,
        result_typmod,
    }
}

pub fn make_target_entry(expr: Expr, resno: AttrNumber, resname: &str) -> TargetEntry {
    TargetEntry {
        expr,
        resno,
        resname: Some(resname.to_string()),
        resjunk: false,
    }
}

pub fn make_junk_target_entry(expr: Expr, resno: AttrNumber, resname: &str) -> TargetEntry {
    TargetEntry {
        resjunk: true,
        ..make_target_entry(expr, resno, resname)
    }
}

pub fn make_relation_rte(relid: Oid, alias: &str, colnames: &[&str]) -> RangeTblEntry {
    RangeTblEntry {
        alias: alias.to_string(),
        colnames: colnames.iter().map(|c| c.to_string()).collect(),
        kind: RteKind::Relation { relid },
    }
}

/// A derived table whose columns are the subquery's visible outputs.
pub fn make_subquery_rte(subquery: Query, alias: &str) -> RangeTblEntry {
    RangeTblEntry {
        alias: alias.to_string(),
        colnames: subquery.output_names(),
        kind: RteKind::Subquery {
            subquery: Box::new(subquery),
        },
    }
}

pub fn make_cte_rte(ctename: &str, levels_up: u32, colnames: &[&str]) -> RangeTblEntry {
    RangeTblEntry {
        alias: ctename.to_string(),
        colnames: colnames.iter().map(|c| c.to_string()).collect(),
        kind: RteKind::Cte {
            ctename: ctename.to_string(),
            levels_up,
        },
    }
}

pub fn make_cte(ctename: &str, ctequery: Query) -> CommonTableExpr {
    CommonTableExpr {
        ctename: ctename.to_string(),
        ctequery: Box::new(ctequery),
        aliascolnames: Vec::new(),
    }
}

pub fn make_join(
    jointype: JoinType,
    larg: JoinTreeNode,
    rarg: JoinTreeNode,
    quals: Option<Expr>,
) -> JoinTreeNode {
    JoinTreeNode::Join(Box::new(JoinExpr {
        jointype,
        larg,
        rarg,
        quals,
    }))
}
