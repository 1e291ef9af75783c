//! Coercion of SELECT outputs to the target column types.
//!
//! The planner only decides *where* a cast is needed; *how* to cast is the
//! business of a [`Coercer`]. [`CastCoercer`] knows the built-in casts of
//! the types this crate evaluates and wraps the expression in an explicit
//! [`Expr::Coerce`] node.

use crate::error::FunnelError;
use crate::query::Expr;
use crate::types::{
    BOOLOID, INT4OID, NO_TYPMOD, TypeOid, is_numeric_category, is_string_category, type_name,
};

/// Produces an expression that evaluates to a requested type.
pub trait Coercer {
    /// Coerce `expr`, currently of type `from`, to `to` with modifier
    /// `typmod`, in explicit-cast context. Fails when no cast exists.
    fn coerce(
        &self,
        expr: Expr,
        from: TypeOid,
        to: TypeOid,
        typmod: i32,
    ) -> Result<Expr, FunnelError>;
}

/// Built-in cast matrix.
#[derive(Debug, Clone, Copy, Default)]
pub struct CastCoercer;

impl CastCoercer {
    /// Whether an explicit cast from `from` to `to` exists.
    pub fn can_coerce(from: TypeOid, to: TypeOid) -> bool {
        if from == to {
            return true;
        }
        // I/O conversion casts: everything has a text form and every
        // evaluable type has an input function.
        if is_string_category(to) || is_string_category(from) {
            return is_evaluable(from) && is_evaluable(to);
        }
        if is_numeric_category(from) && is_numeric_category(to) {
            return true;
        }
        matches!((from, to), (INT4OID, BOOLOID) | (BOOLOID, INT4OID))
    }
}

fn is_evaluable(oid: TypeOid) -> bool {
    use crate::types::{INTERVALOID, TIMESTAMPTZOID};
    is_string_category(oid)
        || is_numeric_category(oid)
        || matches!(oid, BOOLOID | TIMESTAMPTZOID | INTERVALOID)
}

impl Coercer for CastCoercer {
    fn coerce(
        &self,
        expr: Expr,
        from: TypeOid,
        to: TypeOid,
        typmod: i32,
    ) -> Result<Expr, FunnelError> {
        if from == to && typmod == NO_TYPMOD {
            return Ok(expr);
        }
        if !Self::can_coerce(from, to) {
            return Err(FunnelError::CoercionFailed {
                from: type_name(from),
                to: type_name(to),
            });
        }
        Ok(Expr::Coerce {
            arg: Box::new(expr),
            result_type: to,
            result_typmod: typmod,
        })
    }
}

/// Coerce `expr`, of type `from`, to `(to, typmod)` when the types differ;
/// otherwise return it unchanged.
pub fn coerce_to_target_type(
    coercer: &dyn Coercer,
    expr: Expr,
    from: TypeOid,
    to: TypeOid,
    typmod: i32,
) -> Result<Expr, FunnelError> {
    if from == to {
        return Ok(expr);
    }
    coercer.coerce(expr, from, to, typmod)
}
