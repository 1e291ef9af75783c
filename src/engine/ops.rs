//! Operators and built-in functions of the local engine.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::datum::Datum;
use crate::error::FunnelError;
use crate::query::Operator;
use crate::types::{
    FLOAT8OID, INT2OID, INT4OID, INT8OID, NO_TYPMOD, TypeOid, UNKNOWNOID, is_numeric_category,
    type_name,
};

/// Apply a binary operator. NULL in, NULL out.
pub(crate) fn apply_operator(
    op: Operator,
    left: Datum,
    right: Datum,
    result_type: TypeOid,
) -> Result<Datum, FunnelError> {
    if left.is_null() || right.is_null() {
        return Ok(Datum::Null);
    }

    if op.is_comparison() {
        let ordering = left
            .compare(&right)
            .ok_or_else(|| no_operator(op, &left, &right))?;
        return Ok(Datum::Bool(comparison_holds(op, ordering)));
    }

    if op == Operator::Concat {
        let mut text = left.to_text().unwrap_or_default();
        text.push_str(&right.to_text().unwrap_or_default());
        return Ok(Datum::Text(text));
    }

    match (&left, &right) {
        (Datum::Timestamptz(ts), Datum::Interval(delta)) => {
            let shifted = match op {
                Operator::Add => ts.checked_add_signed(*delta),
                Operator::Sub => ts.checked_sub_signed(*delta),
                _ => return Err(no_operator(op, &left, &right)),
            };
            shifted
                .map(Datum::Timestamptz)
                .ok_or_else(|| FunnelError::ExecutionError("timestamp out of range".to_string()))
        }
        (Datum::Interval(delta), Datum::Timestamptz(ts)) if op == Operator::Add => ts
            .checked_add_signed(*delta)
            .map(Datum::Timestamptz)
            .ok_or_else(|| FunnelError::ExecutionError("timestamp out of range".to_string())),
        (Datum::Timestamptz(a), Datum::Timestamptz(b)) if op == Operator::Sub => {
            Ok(Datum::Interval(a.signed_duration_since(*b)))
        }
        (Datum::Interval(a), Datum::Interval(b)) => {
            let combined = match op {
                Operator::Add => a.checked_add(b),
                Operator::Sub => a.checked_sub(b),
                _ => return Err(no_operator(op, &left, &right)),
            };
            combined
                .map(Datum::Interval)
                .ok_or_else(|| FunnelError::ExecutionError("interval out of range".to_string()))
        }
        (Datum::Float8(_), _) | (_, Datum::Float8(_)) => float_arith(op, &left, &right),
        _ if result_type == FLOAT8OID => float_arith(op, &left, &right),
        _ if is_integer(&left) && is_integer(&right) => {
            let value = integer_arith(op, &left, &right)?;
            Datum::Int8(value).cast(integer_result_type(result_type), NO_TYPMOD)
        }
        _ => {
            let value = decimal_arith(op, &left, &right)?;
            if is_numeric_category(result_type) {
                Datum::Numeric(value).cast(result_type, NO_TYPMOD)
            } else {
                Ok(Datum::Numeric(value))
            }
        }
    }
}

fn comparison_holds(op: Operator, ordering: Ordering) -> bool {
    match op {
        Operator::Eq => ordering == Ordering::Equal,
        Operator::Ne => ordering != Ordering::Equal,
        Operator::Lt => ordering == Ordering::Less,
        Operator::Le => ordering != Ordering::Greater,
        Operator::Gt => ordering == Ordering::Greater,
        Operator::Ge => ordering != Ordering::Less,
        Operator::Add | Operator::Sub | Operator::Mul | Operator::Div | Operator::Concat => false,
    }
}

fn no_operator(op: Operator, left: &Datum, right: &Datum) -> FunnelError {
    let name = |d: &Datum| d.type_oid().map(type_name).unwrap_or_else(|| "unknown".into());
    FunnelError::ExecutionError(format!(
        "operator does not exist: {} {} {}",
        name(left),
        op.symbol(),
        name(right)
    ))
}

fn is_integer(value: &Datum) -> bool {
    matches!(value, Datum::Int2(_) | Datum::Int4(_) | Datum::Int8(_))
}

fn integer_result_type(result_type: TypeOid) -> TypeOid {
    match result_type {
        INT2OID | INT4OID | INT8OID => result_type,
        _ => INT8OID,
    }
}

fn integer_arith(op: Operator, left: &Datum, right: &Datum) -> Result<i64, FunnelError> {
    let as_i64 = |d: &Datum| match d {
        Datum::Int2(v) => i64::from(*v),
        Datum::Int4(v) => i64::from(*v),
        Datum::Int8(v) => *v,
        _ => 0,
    };
    let (a, b) = (as_i64(left), as_i64(right));
    let result = match op {
        Operator::Add => a.checked_add(b),
        Operator::Sub => a.checked_sub(b),
        Operator::Mul => a.checked_mul(b),
        Operator::Div => {
            if b == 0 {
                return Err(division_by_zero());
            }
            a.checked_div(b)
        }
        _ => return Err(no_operator(op, left, right)),
    };
    result.ok_or_else(|| FunnelError::ExecutionError("integer out of range".to_string()))
}

fn decimal_arith(op: Operator, left: &Datum, right: &Datum) -> Result<Decimal, FunnelError> {
    let (Some(a), Some(b)) = (left.as_decimal(), right.as_decimal()) else {
        return Err(no_operator(op, left, right));
    };
    let result = match op {
        Operator::Add => a.checked_add(b),
        Operator::Sub => a.checked_sub(b),
        Operator::Mul => a.checked_mul(b),
        Operator::Div => {
            if b.is_zero() {
                return Err(division_by_zero());
            }
            a.checked_div(b)
        }
        _ => return Err(no_operator(op, left, right)),
    };
    result.ok_or_else(|| FunnelError::ExecutionError("numeric value out of range".to_string()))
}

fn float_arith(op: Operator, left: &Datum, right: &Datum) -> Result<Datum, FunnelError> {
    let (Some(a), Some(b)) = (left.as_f64(), right.as_f64()) else {
        return Err(no_operator(op, left, right));
    };
    let result = match op {
        Operator::Add => a + b,
        Operator::Sub => a - b,
        Operator::Mul => a * b,
        Operator::Div => {
            if b == 0.0 {
                return Err(division_by_zero());
            }
            a / b
        }
        _ => return Err(no_operator(op, left, right)),
    };
    Ok(Datum::Float8(result))
}

fn division_by_zero() -> FunnelError {
    FunnelError::ExecutionError("division by zero".to_string())
}

/// Call a built-in function by name.
pub(crate) fn call_function(
    name: &str,
    args: Vec<Datum>,
    result_type: TypeOid,
    statement_timestamp: DateTime<Utc>,
) -> Result<Datum, FunnelError> {
    let arity = |n: usize| {
        if args.len() == n {
            Ok(())
        } else {
            Err(FunnelError::ExecutionError(format!(
                "function {name}() takes {n} argument(s), got {}",
                args.len()
            )))
        }
    };

    let value = match name {
        "now" | "statement_timestamp" | "transaction_timestamp" => {
            arity(0)?;
            Datum::Timestamptz(statement_timestamp)
        }
        "coalesce" => args
            .iter()
            .find(|a| !a.is_null())
            .cloned()
            .unwrap_or(Datum::Null),
        "lower" | "upper" => {
            arity(1)?;
            match args[0].to_text() {
                Some(text) if name == "lower" => Datum::Text(text.to_lowercase()),
                Some(text) => Datum::Text(text.to_uppercase()),
                None => Datum::Null,
            }
        }
        "length" => {
            arity(1)?;
            match args[0].to_text() {
                Some(text) => Datum::Int4(text.chars().count() as i32),
                None => Datum::Null,
            }
        }
        "abs" => {
            arity(1)?;
            match &args[0] {
                Datum::Null => Datum::Null,
                Datum::Int2(v) => Datum::Int2(v.abs()),
                Datum::Int4(v) => Datum::Int4(v.abs()),
                Datum::Int8(v) => Datum::Int8(v.abs()),
                Datum::Float8(v) => Datum::Float8(v.abs()),
                Datum::Numeric(v) => Datum::Numeric(v.abs()),
                other => {
                    return Err(FunnelError::ExecutionError(format!(
                        "function abs({}) does not exist",
                        other.type_oid().map(type_name).unwrap_or_default()
                    )));
                }
            }
        }
        _ => {
            return Err(FunnelError::ExecutionError(format!(
                "function {name}() does not exist"
            )));
        }
    };

    if result_type == UNKNOWNOID {
        Ok(value)
    } else {
        value.cast(result_type, NO_TYPMOD)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BOOLOID, INTERVALOID, NUMERICOID, TEXTOID, TIMESTAMPTZOID};
    use chrono::{TimeDelta, TimeZone};

    // ── Operators ──────────────────────────────────────────────────────

    #[test]
    fn test_comparisons_across_numeric_types() {
        let out = apply_operator(
            Operator::Lt,
            Datum::Int4(3),
            Datum::Numeric(Decimal::new(35, 1)),
            BOOLOID,
        )
        .unwrap();
        assert_eq!(out, Datum::Bool(true));
        let out = apply_operator(Operator::Eq, Datum::Null, Datum::Int4(1), BOOLOID).unwrap();
        assert!(out.is_null());
    }

    #[test]
    fn test_integer_arithmetic() {
        assert_eq!(
            apply_operator(Operator::Add, Datum::Int4(2), Datum::Int4(3), INT4OID).unwrap(),
            Datum::Int4(5)
        );
        assert_eq!(
            apply_operator(Operator::Div, Datum::Int4(7), Datum::Int4(2), INT4OID).unwrap(),
            Datum::Int4(3)
        );
        assert!(apply_operator(Operator::Div, Datum::Int4(1), Datum::Int4(0), INT4OID).is_err());
        assert!(
            apply_operator(Operator::Mul, Datum::Int4(i32::MAX), Datum::Int4(2), INT4OID).is_err()
        );
    }

    #[test]
    fn test_numeric_arithmetic() {
        assert_eq!(
            apply_operator(
                Operator::Mul,
                Datum::Numeric(Decimal::new(150, 2)),
                Datum::Int4(2),
                NUMERICOID
            )
            .unwrap(),
            Datum::Numeric(Decimal::new(300, 2))
        );
    }

    #[test]
    fn test_timestamp_minus_interval() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 10, 12, 0, 0).unwrap();
        let out = apply_operator(
            Operator::Sub,
            Datum::Timestamptz(ts),
            Datum::Interval(TimeDelta::days(7)),
            TIMESTAMPTZOID,
        )
        .unwrap();
        assert_eq!(
            out,
            Datum::Timestamptz(Utc.with_ymd_and_hms(2024, 3, 3, 12, 0, 0).unwrap())
        );
        let diff = apply_operator(
            Operator::Sub,
            Datum::Timestamptz(ts),
            Datum::Timestamptz(ts),
            INTERVALOID,
        )
        .unwrap();
        assert_eq!(diff, Datum::Interval(TimeDelta::zero()));
    }

    #[test]
    fn test_concat() {
        assert_eq!(
            apply_operator(
                Operator::Concat,
                Datum::Text("id-".into()),
                Datum::Int4(7),
                TEXTOID
            )
            .unwrap(),
            Datum::Text("id-7".into())
        );
    }

    #[test]
    fn test_mismatched_operands() {
        let err = apply_operator(
            Operator::Lt,
            Datum::Bool(true),
            Datum::Text("x".into()),
            BOOLOID,
        )
        .unwrap_err();
        assert_eq!(err.to_string(), "execution error: operator does not exist: boolean < text");
    }

    // ── Functions ──────────────────────────────────────────────────────

    #[test]
    fn test_now_is_statement_timestamp() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(
            call_function("now", vec![], TIMESTAMPTZOID, ts).unwrap(),
            Datum::Timestamptz(ts)
        );
    }

    #[test]
    fn test_coalesce_and_text_functions() {
        let ts = Utc::now();
        assert_eq!(
            call_function("coalesce", vec![Datum::Null, Datum::Int4(4)], NUMERICOID, ts).unwrap(),
            Datum::Numeric(Decimal::from(4))
        );
        assert_eq!(
            call_function("upper", vec![Datum::Text("ab".into())], TEXTOID, ts).unwrap(),
            Datum::Text("AB".into())
        );
        assert_eq!(
            call_function("length", vec![Datum::Text("héllo".into())], INT4OID, ts).unwrap(),
            Datum::Int4(5)
        );
        assert!(call_function("nope", vec![], UNKNOWNOID, ts).is_err());
        assert!(call_function("lower", vec![], TEXTOID, ts).is_err());
    }
}
