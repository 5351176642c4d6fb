use chrono::{DateTime, NaiveDateTime};
use rust_decimal::Decimal;
use serde_json::{Number, Value};
use std::str::FromStr;
use tokio_postgres::types::{Kind, Type};
use tokio_postgres::{Column, SimpleQueryRow};

use crate::types::pg_error_message;
use crate::{Result, SqlGateError};

/// Maps text-protocol values to JSON using the prepared statement's column types.
///
/// Every Postgres type has a text form, so a value is never rejected: types
/// without a mapping here are returned as that text.
pub struct ValueConverter;

impl ValueConverter {
    /// Decode every column of a row, in column order
    pub fn row_to_values(row: &SimpleQueryRow, columns: &[Column]) -> Result<Vec<Value>> {
        columns
            .iter()
            .enumerate()
            .map(|(idx, column)| {
                let text = row.try_get(idx).map_err(|e| SqlGateError::Conversion {
                    column: column.name().to_string(),
                    message: pg_error_message(&e),
                })?;
                Ok(Self::text_value(column.type_(), text))
            })
            .collect()
    }

    /// SQL NULL becomes `Value::Null`
    pub fn text_value(ty: &Type, text: Option<&str>) -> Value {
        match text {
            Some(text) => Self::typed_value(ty, text),
            None => Value::Null,
        }
    }

    fn typed_value(ty: &Type, text: &str) -> Value {
        match *ty {
            Type::BOOL => match text {
                "t" => Value::Bool(true),
                "f" => Value::Bool(false),
                _ => Value::String(text.to_string()),
            },
            Type::INT2 | Type::INT4 | Type::INT8 | Type::OID => text
                .parse::<i64>()
                .map(Value::from)
                .unwrap_or_else(|_| Value::String(text.to_string())),
            // NaN and the infinities parse and become null
            Type::FLOAT4 | Type::FLOAT8 => text
                .parse::<f64>()
                .map(Value::from)
                .unwrap_or_else(|_| Value::String(text.to_string())),
            Type::NUMERIC => Self::numeric_value(text),
            Type::JSON | Type::JSONB => {
                serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
            }
            Type::TIMESTAMP => Self::timestamp_value(text),
            Type::TIMESTAMPTZ => Self::timestamptz_value(text),
            Type::BYTEA => Self::bytea_value(text),
            _ => match ty.kind() {
                // box is the one built-in type whose array delimiter is not a comma
                Kind::Array(element) if *element != Type::BOX => Self::array_value(element, text),
                _ => Value::String(text.to_string()),
            },
        }
    }

    /// A JSON number when `Decimal` holds the value exactly, else the text
    /// (`NaN`, `Infinity`, more than 28 significant digits)
    pub fn numeric_value(text: &str) -> Value {
        let Ok(decimal) = Decimal::from_str(text) else {
            return Value::String(text.to_string());
        };
        if decimal.to_string() != text {
            return Value::String(text.to_string());
        }
        match text.parse::<Number>() {
            Ok(number) => Value::Number(number),
            Err(_) => Value::String(text.to_string()),
        }
    }

    /// `2024-01-02 03:04:05.5` becomes `2024-01-02T03:04:05.500`; infinity and
    /// BC dates keep their text
    fn timestamp_value(text: &str) -> Value {
        match NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f") {
            Ok(ts) => Value::String(ts.format("%Y-%m-%dT%H:%M:%S%.f").to_string()),
            Err(_) => Value::String(text.to_string()),
        }
    }

    fn timestamptz_value(text: &str) -> Value {
        match DateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f%#z") {
            Ok(ts) => Value::String(ts.to_rfc3339()),
            Err(_) => Value::String(text.to_string()),
        }
    }

    /// Always `\x`-prefixed lowercase hex, whatever `bytea_output` is
    fn bytea_value(text: &str) -> Value {
        if text.starts_with("\\x") {
            return Value::String(text.to_string());
        }
        match unescape_bytea(text) {
            Some(bytes) => Value::String(format!("\\x{}", hex::encode(bytes))),
            None => Value::String(text.to_string()),
        }
    }

    /// One-dimensional arrays become JSON arrays of mapped elements; anything
    /// else (multi-dimensional, explicit bounds) keeps its text
    fn array_value(element: &Type, text: &str) -> Value {
        match parse_array_literal(text) {
            Some(items) => Value::Array(
                items
                    .into_iter()
                    .map(|item| Self::text_value(element, item.as_deref()))
                    .collect(),
            ),
            None => Value::String(text.to_string()),
        }
    }
}

/// Split `{a,"b c",NULL}` into its elements
fn parse_array_literal(text: &str) -> Option<Vec<Option<String>>> {
    let inner = text.strip_prefix('{')?.strip_suffix('}')?;
    let mut items = Vec::new();
    if inner.is_empty() {
        return Some(items);
    }

    let mut chars = inner.chars().peekable();
    loop {
        let item = if chars.peek() == Some(&'"') {
            chars.next();
            let mut quoted = String::new();
            loop {
                match chars.next()? {
                    '\\' => quoted.push(chars.next()?),
                    '"' => break,
                    c => quoted.push(c),
                }
            }
            Some(quoted)
        } else {
            let mut bare = String::new();
            while let Some(&c) = chars.peek() {
                match c {
                    ',' => break,
                    '{' | '}' | '"' => return None,
                    _ => {
                        bare.push(c);
                        chars.next();
                    }
                }
            }
            if bare == "NULL" { None } else { Some(bare) }
        };
        items.push(item);

        match chars.next() {
            None => return Some(items),
            Some(',') => continue,
            Some(_) => return None,
        }
    }
}

/// Decode the `escape` output format: `\\` and `\nnn` octal escapes
fn unescape_bytea(text: &str) -> Option<Vec<u8>> {
    let bytes = text.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'\\' {
            out.push(bytes[i]);
            i += 1;
        } else if bytes.get(i + 1) == Some(&b'\\') {
            out.push(b'\\');
            i += 2;
        } else {
            let octal = std::str::from_utf8(bytes.get(i + 1..i + 4)?).ok()?;
            out.push(u8::from_str_radix(octal, 8).ok()?);
            i += 4;
        }
    }
    Some(out)
}
