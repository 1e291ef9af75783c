//! Query tree representation.
//!
//! A post-analysis query tree in the shape of PostgreSQL's `Query` node:
//! a range table, a join tree over range table indexes, target lists of
//! `TargetEntry`, and CTE lists referenced by name plus a levels-up counter.
//!
//! Every node kind is a closed enum, so walkers in the planner are
//! exhaustive `match`es rather than tag checks.
//!
//! # Submodules
//! - `make`: node constructors (the `makefuncs` of this crate)
//! - `deparse`: render a tree back to SQL text

pub mod deparse;
pub mod make;

use serde::{Deserialize, Serialize};

use crate::datum::Datum;
use crate::types::{BOOLOID, NO_TYPMOD, TypeOid, UNKNOWNOID};

/// Object identifier of a relation.
pub type Oid = u32;

/// 1-based index into a query's range table.
pub type RtIndex = usize;

/// 1-based column number.
pub type AttrNumber = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CmdType {
    Select,
    Insert,
}

/// A parsed and analyzed statement, or one nesting level inside one.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub command_type: CmdType,
    /// CTEs defined at this level, in definition order.
    pub cte_list: Vec<CommonTableExpr>,
    pub rtable: Vec<RangeTblEntry>,
    pub jointree: FromExpr,
    pub target_list: Vec<TargetEntry>,
    /// Range table index of the INSERT target, `None` for SELECT.
    pub result_relation: Option<RtIndex>,
    pub returning_list: Vec<TargetEntry>,
    pub on_conflict: Option<OnConflictExpr>,
}

/// A named subquery defined in a `WITH` clause.
#[derive(Debug, Clone, PartialEq)]
pub struct CommonTableExpr {
    pub ctename: String,
    pub ctequery: Box<Query>,
    /// Column aliases from `WITH name(a, b) AS (...)`; empty when absent.
    pub aliascolnames: Vec<String>,
}

/// One entry of a query's range table.
#[derive(Debug, Clone, PartialEq)]
pub struct RangeTblEntry {
    pub alias: String,
    /// Output column names visible through this entry.
    pub colnames: Vec<String>,
    pub kind: RteKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RteKind {
    /// A plain table.
    Relation { relid: Oid },
    /// A derived table `(SELECT ...) alias`.
    Subquery { subquery: Box<Query> },
    /// A reference to a CTE defined `levels_up` query levels above the
    /// query owning this entry (0 = the owning query itself).
    Cte { ctename: String, levels_up: u32 },
    /// `VALUES (...), (...)`.
    Values { rows: Vec<Vec<Expr>> },
}

/// The FROM clause plus the WHERE clause.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FromExpr {
    pub fromlist: Vec<JoinTreeNode>,
    pub quals: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum JoinTreeNode {
    RangeTblRef(RtIndex),
    Join(Box<JoinExpr>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JoinType {
    Inner,
    Left,
}

#[derive(Debug, Clone, PartialEq)]
pub struct JoinExpr {
    pub jointype: JoinType,
    pub larg: JoinTreeNode,
    pub rarg: JoinTreeNode,
    pub quals: Option<Expr>,
}

/// One output column of a target list.
#[derive(Debug, Clone, PartialEq)]
pub struct TargetEntry {
    pub expr: Expr,
    /// Position in the target list (SELECT) or target attribute number
    /// (INSERT).
    pub resno: AttrNumber,
    pub resname: Option<String>,
    /// Helper column (e.g. for ORDER BY) not part of the visible output.
    pub resjunk: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OnConflictAction {
    Nothing,
    Update,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OnConflictExpr {
    pub action: OnConflictAction,
    pub arbiter_columns: Vec<String>,
    pub set_list: Vec<TargetEntry>,
    pub where_clause: Option<Expr>,
}

/// A column of some range table entry, possibly of an outer query level.
#[derive(Debug, Clone, PartialEq)]
pub struct Var {
    pub varno: RtIndex,
    pub varattno: AttrNumber,
    pub vartype: TypeOid,
    pub vartypmod: i32,
    pub levels_up: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operator {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Add,
    Sub,
    Mul,
    Div,
    Concat,
}

impl Operator {
    pub fn symbol(&self) -> &'static str {
        match self {
            Operator::Eq => "=",
            Operator::Ne => "<>",
            Operator::Lt => "<",
            Operator::Le => "<=",
            Operator::Gt => ">",
            Operator::Ge => ">=",
            Operator::Add => "+",
            Operator::Sub => "-",
            Operator::Mul => "*",
            Operator::Div => "/",
            Operator::Concat => "||",
        }
    }

    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            Operator::Eq | Operator::Ne | Operator::Lt | Operator::Le | Operator::Gt | Operator::Ge
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BoolOp {
    And,
    Or,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubLinkKind {
    /// `EXISTS (SELECT ...)`
    Exists,
    /// `testexpr IN (SELECT ...)`
    Any,
    /// `(SELECT ...)` returning one value.
    Expr,
}

/// An expression node.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Var(Var),
    Const {
        value: Datum,
        consttype: TypeOid,
    },
    /// A bound parameter `$paramid` (1-based).
    Param {
        paramid: usize,
        paramtype: TypeOid,
    },
    OpExpr {
        op: Operator,
        args: Vec<Expr>,
        result_type: TypeOid,
    },
    FuncExpr {
        funcname: String,
        args: Vec<Expr>,
        result_type: TypeOid,
    },
    BoolExpr {
        op: BoolOp,
        args: Vec<Expr>,
    },
    NullTest {
        arg: Box<Expr>,
        is_null: bool,
    },
    /// A type coercion inserted by the analyzer or the planner.
    Coerce {
        arg: Box<Expr>,
        result_type: TypeOid,
        result_typmod: i32,
    },
    SubLink {
        kind: SubLinkKind,
        testexpr: Option<Box<Expr>>,
        subselect: Box<Query>,
    },
    /// Assignment into fields of a composite column, e.g.
    /// `INSERT INTO t (comp.x) ...`.
    FieldStore {
        arg: Box<Expr>,
        fieldnames: Vec<String>,
        newvals: Vec<Expr>,
        result_type: TypeOid,
    },
    /// Array subscripting, e.g. `INSERT INTO t (arr[1]) ...` when `assign`
    /// is present.
    ArrayRef {
        refexpr: Box<Expr>,
        subscripts: Vec<Expr>,
        assign: Option<Box<Expr>>,
        result_type: TypeOid,
    },
}

impl Expr {
    /// The type this expression evaluates to (`exprType`).
    pub fn expr_type(&self) -> TypeOid {
        match self {
            Expr::Var(var) => var.vartype,
            Expr::Const { consttype, .. } => *consttype,
            Expr::Param { paramtype, .. } => *paramtype,
            Expr::OpExpr { result_type, .. }
            | Expr::FuncExpr { result_type, .. }
            | Expr::Coerce { result_type, .. }
            | Expr::FieldStore { result_type, .. }
            | Expr::ArrayRef { result_type, .. } => *result_type,
            Expr::BoolExpr { .. } | Expr::NullTest { .. } => BOOLOID,
            Expr::SubLink {
                kind, subselect, ..
            } => match kind {
                SubLinkKind::Exists | SubLinkKind::Any => BOOLOID,
                SubLinkKind::Expr => subselect
                    .target_list
                    .iter()
                    .find(|tle| !tle.resjunk)
                    .map(|tle| tle.expr.expr_type())
                    .unwrap_or(UNKNOWNOID),
            },
        }
    }

    /// The type modifier of the result (`exprTypmod`).
    pub fn expr_typmod(&self) -> i32 {
        match self {
            Expr::Var(var) => var.vartypmod,
            Expr::Coerce { result_typmod, .. } => *result_typmod,
            _ => NO_TYPMOD,
        }
    }

    /// Whether the expression writes into part of a column rather than the
    /// whole column.
    pub fn is_indirection(&self) -> bool {
        match self {
            Expr::FieldStore { .. } => true,
            Expr::ArrayRef { assign, .. } => assign.is_some(),
            _ => false,
        }
    }

    /// Collect the `Var`s of this query level (`pull_var_clause`).
    ///
    /// Does not descend into sublinks: their Vars belong to another level.
    pub fn pull_vars<'a>(&'a self, out: &mut Vec<&'a Var>) {
        match self {
            Expr::Var(var) => {
                if var.levels_up == 0 {
                    out.push(var);
                }
            }
            Expr::Const { .. } | Expr::Param { .. } | Expr::SubLink { .. } => {}
            Expr::OpExpr { args, .. } | Expr::FuncExpr { args, .. } | Expr::BoolExpr { args, .. } => {
                args.iter().for_each(|a| a.pull_vars(out));
            }
            Expr::NullTest { arg, .. } | Expr::Coerce { arg, .. } => arg.pull_vars(out),
            Expr::FieldStore { arg, newvals, .. } => {
                arg.pull_vars(out);
                newvals.iter().for_each(|v| v.pull_vars(out));
            }
            Expr::ArrayRef {
                refexpr,
                subscripts,
                assign,
                ..
            } => {
                refexpr.pull_vars(out);
                subscripts.iter().for_each(|s| s.pull_vars(out));
                if let Some(assign) = assign {
                    assign.pull_vars(out);
                }
            }
        }
    }
}

impl Query {
    /// An empty query of the given command type.
    pub fn new(command_type: CmdType) -> Self {
        Self {
            command_type,
            cte_list: Vec::new(),
            rtable: Vec::new(),
            jointree: FromExpr::default(),
            target_list: Vec::new(),
            result_relation: None,
            returning_list: Vec::new(),
            on_conflict: None,
        }
    }

    /// Fetch a range table entry by 1-based index (`rt_fetch`).
    pub fn rt_fetch(&self, index: RtIndex) -> Option<&RangeTblEntry> {
        index.checked_sub(1).and_then(|i| self.rtable.get(i))
    }

    pub fn rt_fetch_mut(&mut self, index: RtIndex) -> Option<&mut RangeTblEntry> {
        index.checked_sub(1).and_then(|i| self.rtable.get_mut(i))
    }

    /// Append a range table entry and return its 1-based index.
    pub fn add_rte(&mut self, rte: RangeTblEntry) -> RtIndex {
        self.rtable.push(rte);
        self.rtable.len()
    }

    /// Look up a CTE defined at this level.
    pub fn find_cte(&self, name: &str) -> Option<&CommonTableExpr> {
        self.cte_list.iter().find(|cte| cte.ctename == name)
    }

    /// The non-junk output entries of the target list.
    pub fn visible_targets(&self) -> impl Iterator<Item = &TargetEntry> {
        self.target_list.iter().filter(|tle| !tle.resjunk)
    }

    /// Names of the visible output columns.
    pub fn output_names(&self) -> Vec<String> {
        self.visible_targets()
            .map(|tle| tle.resname.clone().unwrap_or_else(|| "?column?".to_string()))
            .collect()
    }
}

impl CommonTableExpr {
    /// Effective column names: aliases when given, otherwise the body's
    /// output names.
    pub fn colnames(&self) -> Vec<String> {
        if self.aliascolnames.is_empty() {
            self.ctequery.output_names()
        } else {
            self.aliascolnames.clone()
        }
    }
}
