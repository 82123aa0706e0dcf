//! Native to semantic type mapping
//!
//! The catalog speaks an open-ended set of type names; the engine works on a
//! closed enum. The table below is exhaustive and anything it does not list is
//! rejected rather than coerced.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Semantic column type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SemanticType {
    Text,
    Integer,
    FloatingPoint,
    Boolean,
    Timestamp,
    Binary,
}

impl SemanticType {
    /// Map a PostgreSQL base type name (`pg_type.typname`)
    pub fn from_native(type_name: &str) -> Option<Self> {
        let mapped = match type_name.to_ascii_lowercase().as_str() {
            "text" | "varchar" | "bpchar" | "char" | "name" | "citext" | "uuid" | "json"
            | "jsonb" | "xml" | "inet" | "cidr" | "macaddr" => SemanticType::Text,
            "int2" | "int4" | "int8" | "oid" => SemanticType::Integer,
            "float4" | "float8" | "numeric" | "money" => SemanticType::FloatingPoint,
            "bool" => SemanticType::Boolean,
            "timestamp" | "timestamptz" | "date" | "time" | "timetz" => SemanticType::Timestamp,
            "bytea" => SemanticType::Binary,
            _ => return None,
        };
        Some(mapped)
    }

    /// Check that a clear-text value parses as this type before it is handed
    /// to the database. `native_type` narrows the temporal family.
    pub fn check_literal(&self, native_type: &str, value: &str) -> Result<(), String> {
        let value = value.trim();
        let ok = match self {
            SemanticType::Text => true,
            SemanticType::Integer => value.parse::<i64>().is_ok(),
            SemanticType::FloatingPoint => value.parse::<f64>().is_ok(),
            SemanticType::Boolean => matches!(
                value.to_ascii_lowercase().as_str(),
                "t" | "true" | "y" | "yes" | "on" | "1" | "f" | "false" | "n" | "no" | "off" | "0"
            ),
            SemanticType::Timestamp => is_temporal(native_type, value),
            SemanticType::Binary => match value.strip_prefix("\\x") {
                Some(hex) => hex.len() % 2 == 0 && hex.chars().all(|c| c.is_ascii_hexdigit()),
                None => true,
            },
        };

        if ok {
            Ok(())
        } else {
            Err(format!("'{}' is not a valid {} value", value, native_type))
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SemanticType::Text => "text",
            SemanticType::Integer => "integer",
            SemanticType::FloatingPoint => "floating_point",
            SemanticType::Boolean => "boolean",
            SemanticType::Timestamp => "timestamp",
            SemanticType::Binary => "binary",
        }
    }
}

fn is_temporal(native_type: &str, value: &str) -> bool {
    let native = native_type.to_ascii_lowercase();
    if native == "date" {
        return NaiveDate::parse_from_str(value, "%Y-%m-%d").is_ok();
    }
    if native.starts_with("time") && !native.starts_with("timestamp") {
        // drop a trailing zone offset of `time with time zone`
        let clock = value
            .find(|c: char| c == '+' || c == '-')
            .map_or(value, |idx| &value[..idx]);
        return ["%H:%M:%S%.f", "%H:%M"]
            .iter()
            .any(|fmt| NaiveTime::parse_from_str(clock, fmt).is_ok());
    }

    DateTime::parse_from_rfc3339(value).is_ok()
        || DateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S%.f%#z").is_ok()
        || ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M"]
            .iter()
            .any(|fmt| NaiveDateTime::parse_from_str(value, fmt).is_ok())
        || NaiveDate::parse_from_str(value, "%Y-%m-%d").is_ok()
}

impl fmt::Display for SemanticType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
