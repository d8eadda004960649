//! Conversion of statements and JSON parameters into neo4rs queries.

use std::collections::HashMap;

use neo4rs::{BoltBoolean, BoltFloat, BoltInteger, BoltList, BoltMap, BoltNull, BoltString, BoltType, Query};
use serde_json::Value;

use graphsync_core::Statement;

/// Convert a JSON value to its Bolt equivalent.
///
/// Numbers that fit an `i64` become integers; everything else numeric
/// becomes a float.
pub fn to_bolt(value: &Value) -> BoltType {
    match value {
        Value::Null => BoltType::Null(BoltNull),
        Value::Bool(b) => BoltType::Boolean(BoltBoolean::new(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => BoltType::Integer(BoltInteger::new(i)),
            None => BoltType::Float(BoltFloat::new(n.as_f64().unwrap_or(f64::NAN))),
        },
        Value::String(s) => BoltType::String(BoltString::new(s)),
        Value::Array(items) => BoltType::List(BoltList {
            value: items.iter().map(to_bolt).collect(),
        }),
        Value::Object(map) => BoltType::Map(BoltMap {
            value: map
                .iter()
                .map(|(k, v)| (BoltString::new(k), to_bolt(v)))
                .collect::<HashMap<_, _>>(),
        }),
    }
}

/// Build the neo4rs query for a statement, binding every parameter.
pub fn to_query(statement: &Statement) -> Query {
    statement
        .params()
        .iter()
        .fold(neo4rs::query(statement.text()), |q, (name, value)| {
            q.param(name, to_bolt(value))
        })
}
