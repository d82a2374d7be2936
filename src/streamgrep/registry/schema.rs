/*!
Schema-definition text parsing and content-addressed hashing.

A schema definition is the raw text form of a record type: one field or
constant declaration per line, with nested subtype definitions concatenated
after `===...` separator lines, each introduced by a `MSG: pkg/Type` header.

The structural hash is computed in two passes over a type's own definition
block: constants first, then fields, with user-typed fields replaced by the
recursive hash of their subtype. The result is the hex MD5 of the
newline-joined lines, deterministic across runs and implementations.
*/

use md5::{Digest, Md5};
use regex::Regex;
use std::collections::HashMap;
use std::sync::OnceLock;

/// Builtin numeric scalar type names.
pub const NUMERIC_TYPES: &[&str] = &[
    "byte", "char", "int8", "int16", "int32", "int64", "uint8", "uint16", "uint32", "uint64",
    "float32", "float64", "bool",
];

/// Builtin string scalar type names.
pub const STRING_TYPES: &[&str] = &["string", "wstring"];

/// Builtin time scalar type names.
pub const TIME_TYPES: &[&str] = &["time", "duration"];

/// Returns whether a scalar type name is a builtin.
pub fn is_builtin(scalar_type: &str) -> bool {
    NUMERIC_TYPES.contains(&scalar_type)
        || STRING_TYPES.contains(&scalar_type)
        || TIME_TYPES.contains(&scalar_type)
}

/// Returns the scalar type from a possibly-arrayed or bounded type name,
/// like "uint8" from "uint8[4]" or "string" from "string<=10[<=5]".
pub fn scalar(type_name: &str) -> &str {
    let base = match type_name.find('[') {
        Some(pos) => &type_name[..pos],
        None => type_name,
    };
    match base.find("<=") {
        Some(pos) => &base[..pos],
        None => base,
    }
}

/// "type name (= constvalue)? (trailing)?" declaration line.
fn field_regex() -> &'static Regex {
    static RGX: OnceLock<Regex> = OnceLock::new();
    RGX.get_or_init(|| {
        Regex::new(r"(?i)^([a-z][^\s:]+)\s+([^\s=]+)(\s*=\s*([^\n]+))?(\s+([^\n]+))?").unwrap()
    })
}

/// String-constant declaration: its value may contain `#` so comment
/// stripping must leave the line intact.
fn string_const_regex() -> &'static Regex {
    static RGX: OnceLock<Regex> = OnceLock::new();
    RGX.get_or_init(|| Regex::new(r"^w?string\s+[^\s=#]+\s*=").unwrap())
}

/// Separator or subtype header line: all-'=' run, or "MSG: pkg/Type".
fn is_separator(line: &str) -> bool {
    !line.is_empty() && line.chars().all(|c| c == '=')
}

/// Strips a trailing line comment unless the line is a string constant.
fn strip_comment(line: &str) -> &str {
    if let Some(pos) = line.find('#') {
        if !string_const_regex().is_match(line) {
            return &line[..pos];
        }
    }
    line
}

/// Resolves a user scalar type against the current package, with the
/// special-cased header type.
fn qualify(scalar_type: &str, pkg: &str) -> String {
    if scalar_type.contains('/') {
        scalar_type.to_string()
    } else if scalar_type == "Header" {
        "std_msgs/Header".to_string()
    } else {
        format!("{}/{}", pkg, scalar_type)
    }
}

/// Splits a full definition into per-subtype definition blocks.
///
/// The root type's own block (everything before the first separator) is not
/// part of the result; it stays addressed by the root type name itself.
pub fn parse_subtype_definitions(full_text: &str) -> HashMap<String, String> {
    let mut result = HashMap::new();
    let mut current: Option<(String, Vec<&str>)> = None;
    for line in full_text.lines() {
        if is_separator(line) {
            if let Some((name, lines)) = current.take() {
                result.insert(name, lines.join("\n"));
            }
        } else if let Some(header) = line.strip_prefix("MSG: ") {
            if let Some((name, lines)) = current.take() {
                result.insert(name, lines.join("\n"));
            }
            current = Some((header.trim().to_string(), Vec::new()));
        } else if let Some((_, lines)) = current.as_mut() {
            lines.push(line);
        }
    }
    if let Some((name, lines)) = current.take() {
        result.insert(name, lines.join("\n"));
    }
    result
}

/// Computes the structural hash for a type's definition.
///
/// `subtypes` maps fully-qualified subtype names to their own definition
/// blocks; `memo` caches hashes across the recursion. A referenced subtype
/// missing from the map hashes as an empty definition, logged once per call
/// site rather than failing the run.
pub fn definition_hash(
    type_name: &str,
    typedef: &str,
    subtypes: &HashMap<String, String>,
    memo: &mut HashMap<String, String>,
) -> String {
    if let Some(cached) = memo.get(type_name) {
        return cached.clone();
    }
    let pkg = type_name.rsplit_once('/').map(|(p, _)| p).unwrap_or("");
    let mut lines: Vec<String> = Vec::new();

    // First pass: constants, verbatim.
    for line in typedef.lines() {
        if is_separator(line) {
            break;
        }
        let line = strip_comment(line);
        if let Some(caps) = field_regex().captures(line) {
            if caps.get(3).is_some() {
                lines.push(format!(
                    "{} {}={}",
                    &caps[1],
                    &caps[2],
                    caps[4].trim()
                ));
            }
        }
    }
    // Second pass: fields, with user types replaced by their subtype hash.
    for line in typedef.lines() {
        if is_separator(line) {
            break;
        }
        let line = strip_comment(line);
        let caps = match field_regex().captures(line) {
            Some(caps) if caps.get(3).is_none() => caps,
            _ => continue,
        };
        let declared_type = &caps[1];
        let scalar_type = scalar(declared_type);
        if is_builtin(scalar_type) {
            let mut name = caps[2].to_string();
            if let Some(trailing) = caps.get(6) {
                name = format!("{} {}", name, trailing.as_str()).trim().to_string();
            }
            lines.push(format!("{} {}", declared_type, name));
        } else {
            let subtype = qualify(scalar_type, pkg);
            let subdef = match subtypes.get(&subtype) {
                Some(text) => text.clone(),
                None => {
                    log::warn!(
                        "Definition for subtype {} not found while hashing {}",
                        subtype,
                        type_name
                    );
                    String::new()
                }
            };
            let subhash = definition_hash(&subtype, &subdef, subtypes, memo);
            lines.push(format!("{} {}", subhash, &caps[2]));
        }
    }

    let mut hasher = Md5::new();
    hasher.update(lines.join("\n").as_bytes());
    let digest = hex::encode(hasher.finalize());
    memo.insert(type_name.to_string(), digest.clone());
    digest
}

/// Computes the structural hash for a type from its full definition text
/// (own block plus concatenated subtype blocks).
pub fn schema_hash(type_name: &str, full_text: &str) -> String {
    let root = full_text
        .lines()
        .take_while(|line| !is_separator(line))
        .collect::<Vec<_>>()
        .join("\n");
    let subtypes = parse_subtype_definitions(full_text);
    definition_hash(type_name, &root, &subtypes, &mut HashMap::new())
}

/// Extracts the ordered `(field name, type name)` map from a type's own
/// definition block. Does not recurse into subtypes; user types are
/// package-qualified.
pub fn parse_definition_fields(type_name: &str, full_text: &str) -> Vec<(String, String)> {
    let pkg = type_name.rsplit_once('/').map(|(p, _)| p).unwrap_or("");
    let mut result = Vec::new();
    for line in full_text.lines() {
        if is_separator(line) {
            break;
        }
        let line = strip_comment(line);
        let caps = match field_regex().captures(line) {
            Some(caps) if caps.get(3).is_none() => caps,
            _ => continue,
        };
        let declared_type = &caps[1];
        let scalar_type = scalar(declared_type);
        let type_out = if is_builtin(scalar_type) {
            declared_type.to_string()
        } else {
            qualify(declared_type, pkg)
        };
        result.push((caps[2].to_string(), type_out));
    }
    result
}
