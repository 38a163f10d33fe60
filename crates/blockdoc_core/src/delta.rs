//! Rich-text delta operations.
//!
//! A delta is an ordered script of [`DeltaOp`]s. A *document* delta contains
//! only inserts (each run carrying an attribute map such as `bold` or `href`);
//! a *change* delta mixes retain/insert/delete runs and describes an edit of a
//! document. All lengths are counted in UTF-16 code units, which is how the
//! editing surface and the CRDT text address positions.
//!
//! The functions here are pure. Conversion to and from the CRDT's native text
//! lives in [`crate::crdt::codec`].
//!
//! # Example
//!
//! ```ignore
//! use blockdoc_core::delta::{self, DeltaOp};
//!
//! let old = vec![DeltaOp::insert("hello")];
//! let new = vec![DeltaOp::insert("hello world")];
//! let change = delta::diff(&old, &new);
//! assert_eq!(change, vec![DeltaOp::retain(5), DeltaOp::insert(" world")]);
//! assert_eq!(delta::compose(&old, &change)?, new);
//! ```

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use similar::{Algorithm, DiffOp};
use ts_rs::TS;

use crate::error::{BlockDocError, Result};

/// Attribute map of a run (`bold`, `italic`, `href`, `color`, ...).
///
/// On a retain, a `null` value removes the attribute.
pub type Attributes = IndexMap<String, Value>;

/// A single delta operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(untagged)]
#[ts(export, export_to = "bindings/")]
pub enum DeltaOp {
    /// Insert a run of text with attributes
    Insert {
        /// Inserted text
        insert: String,
        /// Attributes of the run
        #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
        attributes: Attributes,
    },
    /// Keep a number of units, optionally changing their attributes
    Retain {
        /// Retained length in UTF-16 units
        retain: u32,
        /// Attribute changes applied to the retained units
        #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
        attributes: Attributes,
    },
    /// Remove a number of units
    Delete {
        /// Deleted length in UTF-16 units
        delete: u32,
    },
}

impl DeltaOp {
    /// Plain insert.
    pub fn insert(text: impl Into<String>) -> Self {
        DeltaOp::Insert {
            insert: text.into(),
            attributes: Attributes::new(),
        }
    }

    /// Insert with attributes.
    pub fn insert_with(text: impl Into<String>, attributes: Attributes) -> Self {
        DeltaOp::Insert {
            insert: text.into(),
            attributes,
        }
    }

    /// Plain retain.
    pub fn retain(len: u32) -> Self {
        DeltaOp::Retain {
            retain: len,
            attributes: Attributes::new(),
        }
    }

    /// Retain that changes attributes.
    pub fn retain_with(len: u32, attributes: Attributes) -> Self {
        DeltaOp::Retain {
            retain: len,
            attributes,
        }
    }

    /// Delete.
    pub fn delete(len: u32) -> Self {
        DeltaOp::Delete { delete: len }
    }

    /// Length of this op in UTF-16 units.
    pub fn len(&self) -> u32 {
        match self {
            DeltaOp::Insert { insert, .. } => utf16_len(insert),
            DeltaOp::Retain { retain, .. } => *retain,
            DeltaOp::Delete { delete } => *delete,
        }
    }

    /// Whether this op has zero length.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether this op is an insert.
    pub fn is_insert(&self) -> bool {
        matches!(self, DeltaOp::Insert { .. })
    }

    /// Attributes carried by the op (empty for deletes).
    pub fn attributes(&self) -> Option<&Attributes> {
        match self {
            DeltaOp::Insert { attributes, .. } | DeltaOp::Retain { attributes, .. } => {
                Some(attributes)
            }
            DeltaOp::Delete { .. } => None,
        }
    }
}

/// Build an [`Attributes`] map from key/value pairs.
pub fn attrs<I, K>(pairs: I) -> Attributes
where
    I: IntoIterator<Item = (K, Value)>,
    K: Into<String>,
{
    pairs.into_iter().map(|(k, v)| (k.into(), v)).collect()
}

/// Length of a string in UTF-16 code units.
pub fn utf16_len(s: &str) -> u32 {
    s.encode_utf16().count() as u32
}

/// Split `s` after `at` UTF-16 units.
///
/// An offset landing inside a surrogate pair keeps the whole character on the left.
pub fn split_utf16(s: &str, at: u32) -> (&str, &str) {
    let mut units = 0u32;
    for (byte_idx, ch) in s.char_indices() {
        if units >= at {
            return s.split_at(byte_idx);
        }
        units += ch.len_utf16() as u32;
    }
    (s, "")
}

/// Total length of a delta in UTF-16 units. For a document this is the text length.
pub fn length(ops: &[DeltaOp]) -> u32 {
    ops.iter().map(DeltaOp::len).sum()
}

/// Whether every op is an insert.
pub fn is_insert_only(ops: &[DeltaOp]) -> bool {
    ops.iter().all(DeltaOp::is_insert)
}

/// Concatenated text of the inserts.
pub fn plain_text(ops: &[DeltaOp]) -> String {
    ops.iter()
        .filter_map(|op| match op {
            DeltaOp::Insert { insert, .. } => Some(insert.as_str()),
            _ => None,
        })
        .collect()
}

/// Merge adjacent runs with identical attributes and drop empty ops.
pub fn normalize(ops: impl IntoIterator<Item = DeltaOp>) -> Vec<DeltaOp> {
    let mut out: Vec<DeltaOp> = Vec::new();
    for op in ops {
        if op.is_empty() {
            continue;
        }
        if let Some(last) = out.last_mut()
            && merge_into(last, &op)
        {
            continue;
        }
        out.push(op);
    }
    out
}

fn merge_into(last: &mut DeltaOp, op: &DeltaOp) -> bool {
    match (last, op) {
        (
            DeltaOp::Insert {
                insert: prev,
                attributes: prev_attrs,
            },
            DeltaOp::Insert { insert, attributes },
        ) if prev_attrs == attributes => {
            prev.push_str(insert);
            true
        }
        (
            DeltaOp::Retain {
                retain: prev,
                attributes: prev_attrs,
            },
            DeltaOp::Retain { retain, attributes },
        ) if prev_attrs == attributes => {
            *prev += retain;
            true
        }
        (DeltaOp::Delete { delete: prev }, DeltaOp::Delete { delete }) => {
            *prev += delete;
            true
        }
        _ => false,
    }
}

/// Join two documents.
pub fn concat(left: &[DeltaOp], right: &[DeltaOp]) -> Vec<DeltaOp> {
    normalize(left.iter().chain(right).cloned())
}

/// Cut `[start, end)` out of a document. Offsets are clamped to its length.
pub fn slice(doc: &[DeltaOp], start: u32, end: u32) -> Vec<DeltaOp> {
    let mut cursor = RunCursor::new(doc);
    let mut out = Vec::new();
    cursor.skip(start);
    let mut remaining = end.saturating_sub(start);
    while remaining > 0 {
        let Some((text, attributes)) = cursor.take(remaining) else {
            break;
        };
        remaining = remaining.saturating_sub(utf16_len(text));
        out.push(DeltaOp::insert_with(text, attributes.clone()));
    }
    normalize(out)
}

/// Apply a change delta to a document and return the new document.
///
/// Fails with [`BlockDocError::PolicyViolation`] when the change retains or
/// deletes past the end of the document.
pub fn compose(doc: &[DeltaOp], change: &[DeltaOp]) -> Result<Vec<DeltaOp>> {
    if !is_insert_only(doc) {
        return Err(BlockDocError::policy("compose base must be a document delta"));
    }
    let mut cursor = RunCursor::new(doc);
    let mut out = Vec::new();

    for op in change {
        match op {
            DeltaOp::Insert { .. } => out.push(op.clone()),
            DeltaOp::Retain { retain, attributes } => {
                let mut remaining = *retain;
                while remaining > 0 {
                    let (text, base) = cursor.take(remaining).ok_or_else(|| {
                        BlockDocError::policy("retain runs past the end of the text")
                    })?;
                    remaining = remaining.saturating_sub(utf16_len(text));
                    out.push(DeltaOp::insert_with(text, merge_attributes(base, attributes)));
                }
            }
            DeltaOp::Delete { delete } => {
                let mut remaining = *delete;
                while remaining > 0 {
                    let (text, _) = cursor.take(remaining).ok_or_else(|| {
                        BlockDocError::policy("delete runs past the end of the text")
                    })?;
                    remaining = remaining.saturating_sub(utf16_len(text));
                }
            }
        }
    }

    while let Some((text, attributes)) = cursor.take(u32::MAX) {
        out.push(DeltaOp::insert_with(text, attributes.clone()));
    }
    Ok(normalize(out))
}

/// Check that a change delta fits a document of `doc_len` units.
pub fn check_change(change: &[DeltaOp], doc_len: u32) -> Result<()> {
    let consumed: u32 = change
        .iter()
        .filter(|op| !op.is_insert())
        .map(DeltaOp::len)
        .sum();
    if consumed > doc_len {
        return Err(BlockDocError::policy(format!(
            "change consumes {} units of a {} unit text",
            consumed, doc_len
        )));
    }
    Ok(())
}

/// Minimal change delta turning document `old` into document `new`.
///
/// Characters are compared together with their attributes, so a pure
/// formatting change becomes a retain with attribute changes rather than a
/// delete and re-insert. Trailing plain retains are dropped.
pub fn diff(old: &[DeltaOp], new: &[DeltaOp]) -> Vec<DeltaOp> {
    let mut interner = AttributeInterner::default();
    let old_chars = interner.tokens(old);
    let new_chars = interner.tokens(new);

    let ops = similar::capture_diff_slices(Algorithm::Myers, &old_chars, &new_chars);

    let mut out = Vec::new();
    for op in ops {
        match op {
            DiffOp::Equal { old_index, len, .. } => {
                out.push(DeltaOp::retain(units(&old_chars[old_index..old_index + len])));
            }
            DiffOp::Delete {
                old_index, old_len, ..
            } => {
                out.push(DeltaOp::delete(units(&old_chars[old_index..old_index + old_len])));
            }
            DiffOp::Insert {
                new_index, new_len, ..
            } => {
                push_inserts(&mut out, &new_chars[new_index..new_index + new_len], &interner);
            }
            DiffOp::Replace {
                old_index,
                old_len,
                new_index,
                new_len,
            } => {
                let removed = &old_chars[old_index..old_index + old_len];
                let added = &new_chars[new_index..new_index + new_len];
                if old_len == new_len && removed.iter().zip(added).all(|(a, b)| a.0 == b.0) {
                    push_formats(&mut out, removed, added, &interner);
                } else {
                    push_inserts(&mut out, added, &interner);
                    out.push(DeltaOp::delete(units(removed)));
                }
            }
        }
    }

    let mut out = normalize(out);
    if let Some(DeltaOp::Retain { attributes, .. }) = out.last()
        && attributes.is_empty()
    {
        out.pop();
    }
    out
}

/// Apply attribute changes on top of existing attributes (`null` removes).
pub fn merge_attributes(base: &Attributes, changes: &Attributes) -> Attributes {
    let mut merged = base.clone();
    for (key, value) in changes {
        if value.is_null() {
            merged.shift_remove(key);
        } else {
            merged.insert(key.clone(), value.clone());
        }
    }
    merged
}

/// Attribute changes that turn `old` into `new`.
pub fn attribute_changes(old: &Attributes, new: &Attributes) -> Attributes {
    let mut changes = Attributes::new();
    for (key, value) in new {
        if old.get(key) != Some(value) {
            changes.insert(key.clone(), value.clone());
        }
    }
    for key in old.keys() {
        if !new.contains_key(key) {
            changes.insert(key.clone(), Value::Null);
        }
    }
    changes
}

// ============================================================================
// Internals
// ============================================================================

fn units(chars: &[(char, usize)]) -> u32 {
    chars.iter().map(|(c, _)| c.len_utf16() as u32).sum()
}

fn push_inserts(out: &mut Vec<DeltaOp>, chars: &[(char, usize)], interner: &AttributeInterner) {
    for (ch, attr_idx) in chars {
        out.push(DeltaOp::insert_with(
            ch.to_string(),
            interner.get(*attr_idx).clone(),
        ));
    }
}

fn push_formats(
    out: &mut Vec<DeltaOp>,
    old: &[(char, usize)],
    new: &[(char, usize)],
    interner: &AttributeInterner,
) {
    for ((ch, old_idx), (_, new_idx)) in old.iter().zip(new) {
        let changes = attribute_changes(interner.get(*old_idx), interner.get(*new_idx));
        out.push(DeltaOp::retain_with(ch.len_utf16() as u32, changes));
    }
}

/// Maps distinct attribute maps to small integers so characters can be hashed.
#[derive(Default)]
struct AttributeInterner {
    sets: Vec<Attributes>,
}

impl AttributeInterner {
    fn intern(&mut self, attributes: &Attributes) -> usize {
        if let Some(idx) = self.sets.iter().position(|a| a == attributes) {
            return idx;
        }
        self.sets.push(attributes.clone());
        self.sets.len() - 1
    }

    fn get(&self, idx: usize) -> &Attributes {
        &self.sets[idx]
    }

    fn tokens(&mut self, doc: &[DeltaOp]) -> Vec<(char, usize)> {
        let mut tokens = Vec::new();
        for op in doc {
            if let DeltaOp::Insert { insert, attributes } = op {
                let idx = self.intern(attributes);
                tokens.extend(insert.chars().map(|c| (c, idx)));
            }
        }
        tokens
    }
}

/// Walks the insert runs of a document, handing out pieces of bounded length.
struct RunCursor<'a> {
    runs: Vec<(&'a str, &'a Attributes)>,
    index: usize,
    offset: usize,
}

impl<'a> RunCursor<'a> {
    fn new(doc: &'a [DeltaOp]) -> Self {
        let runs = doc
            .iter()
            .filter_map(|op| match op {
                DeltaOp::Insert { insert, attributes } => Some((insert.as_str(), attributes)),
                _ => None,
            })
            .collect();
        Self {
            runs,
            index: 0,
            offset: 0,
        }
    }

    /// Take up to `max` units from the current run.
    fn take(&mut self, max: u32) -> Option<(&'a str, &'a Attributes)> {
        loop {
            let (run, attributes) = *self.runs.get(self.index)?;
            let rest = &run[self.offset..];
            if rest.is_empty() {
                self.index += 1;
                self.offset = 0;
                continue;
            }
            let (head, tail) = split_utf16(rest, max);
            if tail.is_empty() {
                self.index += 1;
                self.offset = 0;
            } else {
                self.offset += head.len();
            }
            return Some((head, attributes));
        }
    }

    fn skip(&mut self, mut count: u32) {
        while count > 0 {
            match self.take(count) {
                Some((text, _)) => count = count.saturating_sub(utf16_len(text)),
                None => break,
            }
        }
    }
}
