/*!
# Record Model

Dynamically-typed nested record values and the helpers the matching core
needs to render and mark them up.

A [`Record`] is the unit that flows from a source through the matcher to a
sink: a named struct value whose fields are [`FieldValue`]s. Field trees are
walked recursively by the match engine; leaf values are rendered to text for
pattern matching, with collections rendered in their bracketed list form.
*/

use chrono::DateTime;
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Serialize, Serializer};
use std::collections::HashMap;
use std::fmt;

/// A value in a record field.
///
/// This enum represents all value shapes the matching engine understands:
/// scalars, byte blobs, homogeneous arrays, and nested structs.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    /// 64-bit signed integer (covers all builtin integer widths)
    Integer(i64),
    /// 64-bit floating point number
    Float(f64),
    /// Boolean value
    Boolean(bool),
    /// UTF-8 string
    String(String),
    /// Raw byte blob, rendered as a bracketed list of integers
    Bytes(Vec<u8>),
    /// Array of values
    Array(Vec<FieldValue>),
    /// Nested structured value with its own type name
    Struct {
        /// Type name of the nested struct, like "geometry/Vector3"
        type_name: String,
        /// Field name to value mapping
        fields: HashMap<String, FieldValue>,
    },
    /// Absent value
    Null,
}

impl FieldValue {
    /// Returns whether this value is a nested struct.
    pub fn is_struct(&self) -> bool {
        matches!(self, FieldValue::Struct { .. })
    }

    /// Returns whether this value is an array whose elements are structs.
    ///
    /// Such arrays are recursed into element by element rather than rendered
    /// as a single collection text.
    pub fn is_struct_array(&self) -> bool {
        match self {
            FieldValue::Array(items) => items.iter().any(FieldValue::is_struct),
            _ => false,
        }
    }

    /// Renders the value to the text form used for pattern matching.
    ///
    /// Arrays and byte blobs render as `[a, b, c]`; everything else renders
    /// as its `Display` form.
    pub fn render(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Integer(i) => write!(f, "{}", i),
            FieldValue::Float(v) => write!(f, "{}", v),
            FieldValue::Boolean(b) => write!(f, "{}", b),
            FieldValue::String(s) => write!(f, "{}", s),
            FieldValue::Bytes(bytes) => {
                write!(f, "[")?;
                for (i, b) in bytes.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", b)?;
                }
                write!(f, "]")
            }
            FieldValue::Array(items) => {
                write!(f, "[")?;
                for (i, v) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", v)?;
                }
                write!(f, "]")
            }
            FieldValue::Struct { fields, .. } => {
                write!(f, "{{")?;
                for (i, key) in sorted_keys(fields).into_iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", key, fields[key])?;
                }
                write!(f, "}}")
            }
            FieldValue::Null => write!(f, ""),
        }
    }
}

/// Custom Serialize implementation matching the rendered forms: bytes as
/// integer sequences, structs as maps in sorted key order.
impl Serialize for FieldValue {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            FieldValue::Integer(i) => serializer.serialize_i64(*i),
            FieldValue::Float(v) => serializer.serialize_f64(*v),
            FieldValue::Boolean(b) => serializer.serialize_bool(*b),
            FieldValue::String(s) => serializer.serialize_str(s),
            FieldValue::Bytes(bytes) => {
                let mut seq = serializer.serialize_seq(Some(bytes.len()))?;
                for b in bytes {
                    seq.serialize_element(b)?;
                }
                seq.end()
            }
            FieldValue::Array(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            FieldValue::Struct { fields, .. } => {
                let mut map = serializer.serialize_map(Some(fields.len()))?;
                for key in sorted_keys(fields) {
                    map.serialize_entry(key, &fields[key])?;
                }
                map.end()
            }
            FieldValue::Null => serializer.serialize_none(),
        }
    }
}

/// A record flowing through the search pipeline: a root struct value
/// together with its type name.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Record {
    /// Record type name, like "nav/Odometry"
    pub type_name: String,
    /// Top-level field name to value mapping
    pub fields: HashMap<String, FieldValue>,
}

impl Record {
    /// Create a record with the given type name and no fields.
    pub fn new(type_name: impl Into<String>) -> Self {
        Record {
            type_name: type_name.into(),
            fields: HashMap::new(),
        }
    }

    /// Builder-style field insertion.
    pub fn with_field(mut self, name: impl Into<String>, value: FieldValue) -> Self {
        self.fields.insert(name.into(), value);
        self
    }

    /// Yields `(dotted path, rendered leaf text)` for every leaf value in
    /// the record, in sorted field order. Used for brute prechecks and
    /// uniqueness hashing.
    pub fn flatten(&self) -> Vec<(String, String)> {
        let mut out = Vec::new();
        flatten_fields(&self.fields, &mut Vec::new(), &mut out);
        out
    }
}

fn flatten_fields(
    fields: &HashMap<String, FieldValue>,
    path: &mut Vec<String>,
    out: &mut Vec<(String, String)>,
) {
    for key in sorted_keys(fields) {
        path.push(key.clone());
        match &fields[key] {
            FieldValue::Struct { fields: nested, .. } => flatten_fields(nested, path, out),
            FieldValue::Array(items) if fields[key].is_struct_array() => {
                for item in items {
                    if let FieldValue::Struct { fields: nested, .. } = item {
                        flatten_fields(nested, path, out);
                    } else {
                        out.push((path.join("."), item.render()));
                    }
                }
            }
            value => out.push((path.join("."), value.render())),
        }
        path.pop();
    }
}

/// Keys of a field map in deterministic (sorted) order.
pub fn sorted_keys(fields: &HashMap<String, FieldValue>) -> Vec<&String> {
    let mut keys: Vec<&String> = fields.keys().collect();
    keys.sort();
    keys
}

/// Markers wrapped around matched spans in rendered field text.
///
/// Sinks that highlight replace these with their own decoration; sinks that
/// do not highlight are fed unmarked records in the first place.
pub struct MatchMarkers;

impl MatchMarkers {
    /// Start-of-match marker, a control character unlikely in field data.
    pub const START: &'static str = "\u{1}";
    /// End-of-match marker.
    pub const END: &'static str = "\u{2}";
}

/// Merges overlapping or adjacent spans into a minimal ordered list.
///
/// Input spans are half-open `(start, end)` byte ranges into one rendered
/// field text.
pub fn merge_spans(mut spans: Vec<(usize, usize)>) -> Vec<(usize, usize)> {
    if spans.is_empty() {
        return spans;
    }
    spans.sort();
    let mut merged: Vec<(usize, usize)> = vec![spans[0]];
    for (start, end) in spans.into_iter().skip(1) {
        match merged.last_mut() {
            Some(last) if start <= last.1 => last.1 = last.1.max(end),
            _ => merged.push((start, end)),
        }
    }
    merged
}

/// Compiles a `*`-glob into an anchored regular expression.
///
/// `*` matches any run of characters; all other characters are literal.
/// With `end`, the expression must match the whole text, otherwise a prefix
/// match suffices.
pub fn wildcard_to_regex(glob: &str, end: bool) -> Result<regex::Regex, regex::Error> {
    let escaped: Vec<String> = glob.split('*').map(regex::escape).collect();
    let body = escaped.join(".*");
    let pattern = if end {
        format!("^{}$", body)
    } else {
        format!("^{}", body)
    };
    regex::Regex::new(&pattern)
}

/// Formats a nanosecond timestamp as a human-readable UTC datetime.
pub fn format_stamp(nanos: i64) -> String {
    match DateTime::from_timestamp(nanos / 1_000_000_000, (nanos % 1_000_000_000) as u32) {
        Some(dt) => dt.format("%Y-%m-%d %H:%M:%S%.3f").to_string(),
        None => nanos.to_string(),
    }
}
