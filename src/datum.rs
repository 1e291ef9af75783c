//! Runtime values flowing from the SELECT into the destination writer.
//!
//! A [`Datum`] carries its own type, so rows need no separate tuple
//! descriptor. Input/output conversion follows PostgreSQL's text formats
//! closely enough that a value cast through `text` and back is unchanged.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeDelta, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};

use crate::error::FunnelError;
use crate::types::{
    BOOLOID, FLOAT8OID, INT2OID, INT4OID, INT8OID, INTERVALOID, NUMERICOID, TEXTOID,
    TIMESTAMPTZOID, TypeOid, UNKNOWNOID, VARCHAROID, format_type, numeric_precision_scale,
    type_name, varchar_max_length,
};

/// A single column value.
#[derive(Debug, Clone, PartialEq)]
pub enum Datum {
    Null,
    Bool(bool),
    Int2(i16),
    Int4(i32),
    Int8(i64),
    Float8(f64),
    Numeric(Decimal),
    Text(String),
    Timestamptz(DateTime<Utc>),
    Interval(TimeDelta),
}

/// One output tuple.
pub type Row = Vec<Datum>;

impl Datum {
    pub fn is_null(&self) -> bool {
        matches!(self, Datum::Null)
    }

    /// The value's type, or `None` for NULL.
    pub fn type_oid(&self) -> Option<TypeOid> {
        match self {
            Datum::Null => None,
            Datum::Bool(_) => Some(BOOLOID),
            Datum::Int2(_) => Some(INT2OID),
            Datum::Int4(_) => Some(INT4OID),
            Datum::Int8(_) => Some(INT8OID),
            Datum::Float8(_) => Some(FLOAT8OID),
            Datum::Numeric(_) => Some(NUMERICOID),
            Datum::Text(_) => Some(TEXTOID),
            Datum::Timestamptz(_) => Some(TIMESTAMPTZOID),
            Datum::Interval(_) => Some(INTERVALOID),
        }
    }

    /// Output function: the value's text form, `None` for NULL.
    pub fn to_text(&self) -> Option<String> {
        match self {
            Datum::Null => None,
            Datum::Bool(b) => Some(if *b { "t" } else { "f" }.to_string()),
            Datum::Int2(v) => Some(v.to_string()),
            Datum::Int4(v) => Some(v.to_string()),
            Datum::Int8(v) => Some(v.to_string()),
            Datum::Float8(v) => Some(v.to_string()),
            Datum::Numeric(v) => Some(v.to_string()),
            Datum::Text(v) => Some(v.clone()),
            Datum::Timestamptz(v) => Some(format!("{}+00", v.format("%Y-%m-%d %H:%M:%S"))),
            Datum::Interval(v) => Some(format_interval(v)),
        }
    }

    /// Input function: parse `text` as a value of type `oid`.
    pub fn parse(text: &str, oid: TypeOid) -> Result<Datum, FunnelError> {
        let invalid = || {
            FunnelError::ExecutionError(format!(
                "invalid input syntax for type {}: \"{text}\"",
                type_name(oid)
            ))
        };
        let trimmed = text.trim();
        match oid {
            BOOLOID => match trimmed.to_ascii_lowercase().as_str() {
                "t" | "true" | "yes" | "on" | "1" => Ok(Datum::Bool(true)),
                "f" | "false" | "no" | "off" | "0" => Ok(Datum::Bool(false)),
                _ => Err(invalid()),
            },
            INT2OID => trimmed.parse().map(Datum::Int2).map_err(|_| invalid()),
            INT4OID => trimmed.parse().map(Datum::Int4).map_err(|_| invalid()),
            INT8OID => trimmed.parse().map(Datum::Int8).map_err(|_| invalid()),
            FLOAT8OID => trimmed.parse().map(Datum::Float8).map_err(|_| invalid()),
            NUMERICOID => Decimal::from_str(trimmed)
                .map(Datum::Numeric)
                .map_err(|_| invalid()),
            TEXTOID | VARCHAROID | UNKNOWNOID => Ok(Datum::Text(text.to_string())),
            TIMESTAMPTZOID => parse_timestamptz(trimmed)
                .map(Datum::Timestamptz)
                .ok_or_else(invalid),
            INTERVALOID => parse_interval(trimmed)
                .map(Datum::Interval)
                .ok_or_else(invalid),
            other => Err(FunnelError::ExecutionError(format!(
                "no input function for {}",
                type_name(other)
            ))),
        }
    }

    /// Runtime cast to `to`, applying the target type modifier.
    pub fn cast(self, to: TypeOid, typmod: i32) -> Result<Datum, FunnelError> {
        self.convert(to)?.apply_typmod(to, typmod)
    }

    /// Store conversion into a column of type `to`. Unlike an explicit
    /// cast, over-long `varchar(n)` input is an error unless only trailing
    /// spaces are cut.
    pub fn assign(self, to: TypeOid, typmod: i32) -> Result<Datum, FunnelError> {
        let converted = self.convert(to)?;
        if let (VARCHAROID, Datum::Text(value), Some(max)) =
            (to, &converted, varchar_max_length(typmod))
            && value.chars().skip(max).any(|c| c != ' ')
        {
            return Err(FunnelError::ExecutionError(format!(
                "value too long for type {}",
                format_type(to, typmod)
            )));
        }
        converted.apply_typmod(to, typmod)
    }

    fn convert(self, to: TypeOid) -> Result<Datum, FunnelError> {
        let Some(from) = self.type_oid() else {
            return Ok(Datum::Null);
        };
        let converted = if from == to {
            self
        } else if matches!(to, TEXTOID | VARCHAROID) {
            Datum::Text(self.to_text().unwrap_or_default())
        } else if from == TEXTOID {
            let text = self.to_text().unwrap_or_default();
            Datum::parse(&text, to)?
        } else {
            cast_between(self, from, to)?
        };
        Ok(converted)
    }

    /// Enforce `numeric(p,s)` scale/precision and `varchar(n)` length.
    pub fn apply_typmod(self, oid: TypeOid, typmod: i32) -> Result<Datum, FunnelError> {
        match (oid, self) {
            (NUMERICOID, Datum::Numeric(value)) => match numeric_precision_scale(typmod) {
                Some((precision, scale)) => {
                    let rounded =
                        value.round_dp_with_strategy(scale, RoundingStrategy::MidpointAwayFromZero);
                    let integral_digits = integral_digit_count(&rounded);
                    if integral_digits + scale > precision {
                        return Err(FunnelError::ExecutionError(format!(
                            "numeric field overflow: value {value} does not fit {}",
                            format_type(oid, typmod)
                        )));
                    }
                    Ok(Datum::Numeric(rounded))
                }
                None => Ok(Datum::Numeric(value)),
            },
            (VARCHAROID, Datum::Text(value)) => match varchar_max_length(typmod) {
                Some(max) if value.chars().count() > max => {
                    Ok(Datum::Text(value.chars().take(max).collect()))
                }
                _ => Ok(Datum::Text(value)),
            },
            (_, other) => Ok(other),
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Datum::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Exact numeric view of integer and numeric values.
    pub fn as_decimal(&self) -> Option<Decimal> {
        match self {
            Datum::Int2(v) => Some(Decimal::from(*v)),
            Datum::Int4(v) => Some(Decimal::from(*v)),
            Datum::Int8(v) => Some(Decimal::from(*v)),
            Datum::Numeric(v) => Some(*v),
            Datum::Float8(v) => Decimal::from_f64(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Datum::Float8(v) => Some(*v),
            other => other.as_decimal().and_then(|d| d.to_f64()),
        }
    }

    /// SQL comparison; `None` when either side is NULL or the types are not
    /// comparable.
    pub fn compare(&self, other: &Datum) -> Option<Ordering> {
        match (self, other) {
            (Datum::Null, _) | (_, Datum::Null) => None,
            (Datum::Bool(a), Datum::Bool(b)) => Some(a.cmp(b)),
            (Datum::Text(a), Datum::Text(b)) => Some(a.cmp(b)),
            (Datum::Timestamptz(a), Datum::Timestamptz(b)) => Some(a.cmp(b)),
            (Datum::Interval(a), Datum::Interval(b)) => Some(a.cmp(b)),
            (Datum::Float8(_), _) | (_, Datum::Float8(_)) => {
                self.as_f64()?.partial_cmp(&other.as_f64()?)
            }
            _ => Some(self.as_decimal()?.cmp(&other.as_decimal()?)),
        }
    }
}

impl fmt::Display for Datum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_text() {
            Some(text) => f.write_str(&text),
            None => f.write_str("NULL"),
        }
    }
}

fn cast_between(value: Datum, from: TypeOid, to: TypeOid) -> Result<Datum, FunnelError> {
    let out_of_range = || FunnelError::ExecutionError(format!("{} out of range", type_name(to)));
    let not_castable = || FunnelError::CoercionFailed {
        from: type_name(from),
        to: type_name(to),
    };
    match to {
        INT2OID | INT4OID | INT8OID => {
            let whole = match &value {
                Datum::Bool(b) => i64::from(*b),
                Datum::Float8(v) => {
                    let r = v.round();
                    if !r.is_finite() || r < i64::MIN as f64 || r > i64::MAX as f64 {
                        return Err(out_of_range());
                    }
                    r as i64
                }
                other => other
                    .as_decimal()
                    .ok_or_else(not_castable)?
                    .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
                    .to_i64()
                    .ok_or_else(out_of_range)?,
            };
            match to {
                INT2OID => i16::try_from(whole).map(Datum::Int2).map_err(|_| out_of_range()),
                INT4OID => i32::try_from(whole).map(Datum::Int4).map_err(|_| out_of_range()),
                _ => Ok(Datum::Int8(whole)),
            }
        }
        NUMERICOID => value
            .as_decimal()
            .map(Datum::Numeric)
            .ok_or_else(not_castable),
        FLOAT8OID => value.as_f64().map(Datum::Float8).ok_or_else(not_castable),
        BOOLOID => match value {
            Datum::Int4(v) => Ok(Datum::Bool(v != 0)),
            _ => Err(not_castable()),
        },
        _ => Err(not_castable()),
    }
}

fn integral_digit_count(value: &Decimal) -> u32 {
    let integral = value.trunc().abs();
    if integral.is_zero() {
        0
    } else {
        integral.to_string().len() as u32
    }
}

fn parse_timestamptz(text: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(text) {
        return Some(ts.with_timezone(&Utc));
    }
    if let Ok(ts) = DateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%#z") {
        return Some(ts.with_timezone(&Utc));
    }
    if let Ok(ts) = NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S") {
        return Some(ts.and_utc());
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()?
        .and_hms_opt(0, 0, 0)
        .map(|ts| ts.and_utc())
}

/// Parse `'<n> <unit> [<n> <unit> ...] [HH:MM:SS]'`.
fn parse_interval(text: &str) -> Option<TimeDelta> {
    let mut total = TimeDelta::zero();
    let mut tokens = text.split_whitespace().peekable();
    while let Some(token) = tokens.next() {
        if token.contains(':') {
            let parts: Vec<i64> = token
                .split(':')
                .map(|p| p.parse::<i64>())
                .collect::<Result<_, _>>()
                .ok()?;
            let [h, m, s] = parts.as_slice() else {
                return None;
            };
            let seconds = h
                .checked_mul(3600)?
                .checked_add(m.checked_mul(60)?)?
                .checked_add(*s)?;
            total = total.checked_add(&TimeDelta::try_seconds(seconds)?)?;
            continue;
        }
        let amount: i64 = token.parse().ok()?;
        let unit = tokens.next()?.to_ascii_lowercase();
        let seconds = match unit.trim_end_matches('s') {
            "week" => 7 * 86_400,
            "day" => 86_400,
            "hour" => 3_600,
            "minute" | "min" => 60,
            "second" | "sec" => 1,
            _ => return None,
        };
        total = total.checked_add(&TimeDelta::try_seconds(amount.checked_mul(seconds)?)?)?;
    }
    Some(total)
}

fn format_interval(value: &TimeDelta) -> String {
    let total = value.num_seconds();
    let sign = if total < 0 { "-" } else { "" };
    let total = total.abs();
    let days = total / 86_400;
    let rest = total % 86_400;
    let clock = format!(
        "{sign}{:02}:{:02}:{:02}",
        rest / 3600,
        (rest % 3600) / 60,
        rest % 60
    );
    match (days, rest) {
        (0, _) => clock,
        (1, 0) => format!("{sign}1 day"),
        (d, 0) => format!("{sign}{d} days"),
        (1, _) => format!("{sign}1 day {clock}"),
        (d, _) => format!("{sign}{d} days {clock}"),
    }
}
