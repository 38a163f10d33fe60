//! Conversion between delta operations and yrs text.
//!
//! Documents are created with UTF-16 offsets so that positions in a
//! [`DeltaOp`] and positions in a [`TextRef`] count the same units.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use yrs::types::Attrs;
use yrs::types::text::{Diff, YChange};
use yrs::{Any, Out, ReadTxn, Text, TextRef, TransactionMut};

use crate::delta::{self, Attributes, DeltaOp, utf16_len};
use crate::error::{BlockDocError, Result};

/// Append a document delta to `text`.
///
/// Only inserts are accepted; this is how texts are built at load or paste time.
pub fn to_native(txn: &mut TransactionMut, text: &TextRef, ops: &[DeltaOp]) -> Result<()> {
    if !delta::is_insert_only(ops) {
        return Err(BlockDocError::policy(
            "initial text may only contain insert operations",
        ));
    }
    let mut index = text.len(txn);
    for op in ops {
        if let DeltaOp::Insert { insert, attributes } = op
            && !insert.is_empty()
        {
            text.insert_with_attributes(txn, index, insert, to_attrs(attributes));
            index += utf16_len(insert);
        }
    }
    Ok(())
}

/// Read `text` as a normalized document delta.
pub fn from_native<T: ReadTxn>(txn: &T, text: &TextRef) -> Vec<DeltaOp> {
    let chunks: Vec<Diff<YChange>> = text.diff(txn, YChange::identity);
    delta::normalize(chunks.into_iter().filter_map(|chunk| match chunk.insert {
        Out::Any(Any::String(s)) => Some(DeltaOp::insert_with(
            s.to_string(),
            from_attrs(chunk.attributes.as_deref()),
        )),
        _ => None,
    }))
}

/// Apply a change delta (retain/insert/delete) to `text`.
///
/// A retain with attributes formats the retained range; a `null` attribute
/// value clears that attribute.
pub fn apply_to_native(txn: &mut TransactionMut, text: &TextRef, change: &[DeltaOp]) -> Result<()> {
    delta::check_change(change, text.len(txn))?;
    let mut index = 0u32;
    for op in change {
        match op {
            DeltaOp::Insert { insert, attributes } => {
                if insert.is_empty() {
                    continue;
                }
                text.insert_with_attributes(txn, index, insert, to_attrs(attributes));
                index += utf16_len(insert);
            }
            DeltaOp::Retain { retain, attributes } => {
                if !attributes.is_empty() {
                    text.format(txn, index, *retain, to_attrs(attributes));
                }
                index += retain;
            }
            DeltaOp::Delete { delete } => {
                if *delete > 0 {
                    text.remove_range(txn, index, *delete);
                }
            }
        }
    }
    Ok(())
}

// ============================================================================
// JSON <-> Any
// ============================================================================

/// Convert a JSON value to a yrs [`Any`]. Numbers are stored as doubles, like JS peers do.
pub fn json_to_any(value: &Value) -> Any {
    match value {
        Value::Null => Any::Null,
        Value::Bool(b) => Any::Bool(*b),
        Value::Number(n) => Any::Number(n.as_f64().unwrap_or_default()),
        Value::String(s) => Any::String(Arc::from(s.as_str())),
        Value::Array(items) => {
            let items: Vec<Any> = items.iter().map(json_to_any).collect();
            Any::Array(Arc::from(items))
        }
        Value::Object(map) => {
            let map: HashMap<String, Any> = map
                .iter()
                .map(|(k, v)| (k.clone(), json_to_any(v)))
                .collect();
            Any::Map(Arc::new(map))
        }
    }
}

/// Convert a yrs [`Any`] to JSON. Integral doubles become integers.
pub fn any_to_json(any: &Any) -> Value {
    match any {
        Any::Null | Any::Undefined => Value::Null,
        Any::Bool(b) => Value::Bool(*b),
        Any::Number(n) => number_to_json(*n),
        Any::BigInt(n) => Value::from(*n),
        Any::String(s) => Value::String(s.to_string()),
        Any::Buffer(bytes) => Value::Array(bytes.iter().map(|b| Value::from(*b)).collect()),
        Any::Array(items) => Value::Array(items.iter().map(any_to_json).collect()),
        Any::Map(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), any_to_json(v)))
                .collect(),
        ),
    }
}

fn number_to_json(n: f64) -> Value {
    // 2^53: above this doubles stop being exact integers
    const MAX_SAFE: f64 = 9_007_199_254_740_992.0;
    if n.fract() == 0.0 && n.abs() <= MAX_SAFE {
        Value::from(n as i64)
    } else {
        serde_json::Number::from_f64(n)
            .map(Value::Number)
            .unwrap_or(Value::Null)
    }
}

fn to_attrs(attributes: &Attributes) -> Attrs {
    attributes
        .iter()
        .map(|(k, v)| (Arc::from(k.as_str()), json_to_any(v)))
        .collect()
}

fn from_attrs(attrs: Option<&Attrs>) -> Attributes {
    let mut attributes: Attributes = attrs
        .map(|attrs| {
            attrs
                .iter()
                .filter(|(_, v)| !matches!(v, Any::Null | Any::Undefined))
                .map(|(k, v)| (k.to_string(), any_to_json(v)))
                .collect()
        })
        .unwrap_or_default();
    // HashMap iteration order is random; keep runs comparable
    attributes.sort_keys();
    attributes
}
