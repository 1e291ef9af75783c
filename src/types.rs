//! Built-in type OIDs and type modifier helpers.
//!
//! OIDs match PostgreSQL's `pg_type` so plans built here line up with the
//! catalog of a real backend.

pub type TypeOid = u32;

pub const BOOLOID: TypeOid = 16;
pub const INT8OID: TypeOid = 20;
pub const INT2OID: TypeOid = 21;
pub const INT4OID: TypeOid = 23;
pub const TEXTOID: TypeOid = 25;
pub const FLOAT8OID: TypeOid = 701;
pub const UNKNOWNOID: TypeOid = 705;
pub const VARCHAROID: TypeOid = 1043;
pub const TIMESTAMPTZOID: TypeOid = 1184;
pub const INTERVALOID: TypeOid = 1186;
pub const NUMERICOID: TypeOid = 1700;
pub const RECORDOID: TypeOid = 2249;

/// Type modifier meaning "no modifier".
pub const NO_TYPMOD: i32 = -1;

const VARHDRSZ: i32 = 4;

/// Encode `numeric(precision, scale)` the way PostgreSQL stores it.
pub fn numeric_typmod(precision: u16, scale: u16) -> i32 {
    (((precision as i32) << 16) | scale as i32) + VARHDRSZ
}

/// Decode a numeric typmod into `(precision, scale)`.
pub fn numeric_precision_scale(typmod: i32) -> Option<(u32, u32)> {
    if typmod < VARHDRSZ {
        return None;
    }
    let raw = (typmod - VARHDRSZ) as u32;
    Some((raw >> 16, raw & 0xffff))
}

/// Encode `varchar(len)`.
pub fn varchar_typmod(len: u32) -> i32 {
    len as i32 + VARHDRSZ
}

/// Decode a varchar typmod into its maximum length.
pub fn varchar_max_length(typmod: i32) -> Option<usize> {
    if typmod < VARHDRSZ {
        None
    } else {
        Some((typmod - VARHDRSZ) as usize)
    }
}

/// SQL name of a type, as `format_type` without modifiers prints it.
pub fn type_name(oid: TypeOid) -> String {
    match oid {
        BOOLOID => "boolean".to_string(),
        INT8OID => "bigint".to_string(),
        INT2OID => "smallint".to_string(),
        INT4OID => "integer".to_string(),
        TEXTOID => "text".to_string(),
        FLOAT8OID => "double precision".to_string(),
        UNKNOWNOID => "unknown".to_string(),
        VARCHAROID => "character varying".to_string(),
        TIMESTAMPTZOID => "timestamp with time zone".to_string(),
        INTERVALOID => "interval".to_string(),
        NUMERICOID => "numeric".to_string(),
        RECORDOID => "record".to_string(),
        other => format!("type {other}"),
    }
}

/// SQL name of a type including its modifier, e.g. `numeric(10,2)`.
pub fn format_type(oid: TypeOid, typmod: i32) -> String {
    match oid {
        NUMERICOID => match numeric_precision_scale(typmod) {
            Some((p, s)) => format!("numeric({p},{s})"),
            None => type_name(oid),
        },
        VARCHAROID => match varchar_max_length(typmod) {
            Some(len) => format!("character varying({len})"),
            None => type_name(oid),
        },
        _ => type_name(oid),
    }
}

/// Whether the type belongs to the numeric category.
pub fn is_numeric_category(oid: TypeOid) -> bool {
    matches!(oid, INT2OID | INT4OID | INT8OID | FLOAT8OID | NUMERICOID)
}

/// Whether the type belongs to the string category.
pub fn is_string_category(oid: TypeOid) -> bool {
    matches!(oid, TEXTOID | VARCHAROID | UNKNOWNOID)
}
