/*!
# Pattern Compilation

Compiles user content expressions and field-selection globs into the rule
lists the match engine walks records under.

Content expressions take the form `[FIELDPATH=]PATTERN`: an optional dotted
field path (with `*` as a full-segment wildcard) scoping the pattern to
matching fields, and a regular expression (or plain string in raw mode).
A configuration with no expressions installs a single universal match-all
rule.
*/

use crate::streamgrep::config::SearchConfig;
use crate::streamgrep::error::{GrepError, GrepResult};
use crate::streamgrep::model::{sorted_keys, wildcard_to_regex, FieldValue};
use regex::{Regex, RegexBuilder};
use std::collections::HashMap;

/// Regex fragments that rule out brute prechecking, since a probe over the
/// flattened record text cannot honor whole-text anchors or conditionals.
const NOBRUTE_SIGILS: &[&str] = &["\\A", "\\Z", "?("];

/// One compiled content rule: an optional field-path scope and the content
/// expression to run against rendered leaf values.
#[derive(Debug)]
pub struct PatternRule {
    /// Path scope matcher over dotted field paths; `None` applies to every
    /// field.
    pub path: Option<Regex>,
    /// Compiled content expression.
    pub content: Regex,
}

/// A compiled select/noselect field specification.
#[derive(Debug)]
pub struct FieldSpec {
    /// Dotted path segments as configured, wildcards included.
    pub segments: Vec<String>,
    /// Prefix-anchored regex over dotted field paths.
    pub regex: Regex,
}

impl FieldSpec {
    pub(crate) fn compile(spec: &str) -> GrepResult<Self> {
        let regex = wildcard_to_regex(spec, false)
            .map_err(|e| GrepError::pattern_error(e.to_string(), spec))?;
        Ok(FieldSpec {
            segments: spec.split('.').map(str::to_string).collect(),
            regex,
        })
    }

    /// Whether this spec selects the exact path or a descendant of it.
    pub fn matches(&self, path: &str) -> bool {
        self.regex.is_match(path)
    }

    /// Whether the given trail is an ancestor of this spec's path, so the
    /// field must stay visible for the walk to reach the selected leaf.
    pub fn is_ancestor(&self, trail: &[String]) -> bool {
        trail.len() <= self.segments.len()
            && trail.iter().zip(&self.segments).all(|(got, want)| {
                want == got || want.contains('*') && segment_matches(want, got)
            })
    }
}

fn segment_matches(glob: &str, segment: &str) -> bool {
    match wildcard_to_regex(glob, true) {
        Ok(rgx) => rgx.is_match(segment),
        Err(_) => false,
    }
}

/// Compiled set of content rules, selection filters and prechecks for one
/// search run.
#[derive(Debug)]
pub struct PatternSet {
    /// Content rules; a record matches when every rule matched somewhere.
    pub content: Vec<PatternRule>,
    /// Cheap probes over the flattened record text; all must hit for the
    /// full walk to run. Empty when inverted or patterns are anchor-bound.
    pub brute_prechecks: Vec<Regex>,
    /// Field paths to restrict matching to, if any.
    pub select: Vec<FieldSpec>,
    /// Field paths to exclude from matching.
    pub noselect: Vec<FieldSpec>,
    /// Whether the accept condition is flipped at whole-record level.
    pub invert: bool,
    /// Whether the content list is exactly the injected match-all rule.
    universal: bool,
}

impl PatternSet {
    /// Compiles patterns and field filters from configuration. Any
    /// malformed expression is a fatal configuration error.
    pub fn compile(config: &SearchConfig) -> GrepResult<PatternSet> {
        let mut content = Vec::new();
        let mut brute_prechecks = Vec::new();

        for raw_pattern in &config.patterns {
            let (path_spec, body) = split_path_prefix(raw_pattern);
            let mut expr = if config.raw {
                regex::escape(body)
            } else {
                body.to_string()
            };
            // '' and "" also match empty values.
            if body == "''" || body == "\"\"" {
                expr.push_str("|^$");
            }
            let path = match path_spec {
                Some(spec) => Some(compile_path_scope(spec, raw_pattern)?),
                None => None,
            };
            let compiled = RegexBuilder::new(&expr)
                .dot_matches_new_line(true)
                .case_insensitive(!config.case_sensitive)
                .build()
                .map_err(|e| GrepError::pattern_error(e.to_string(), raw_pattern))?;
            content.push(PatternRule {
                path,
                content: compiled,
            });

            let brute_ok = config.raw || !NOBRUTE_SIGILS.iter().any(|s| expr.contains(s));
            if !config.invert && brute_ok {
                let probe = RegexBuilder::new(&expr)
                    .case_insensitive(true)
                    .multi_line(true)
                    .build()
                    .map_err(|e| GrepError::pattern_error(e.to_string(), raw_pattern))?;
                brute_prechecks.push(probe);
            }
        }

        let universal = content.is_empty();
        if universal {
            content.push(PatternRule {
                path: None,
                content: RegexBuilder::new(".*")
                    .dot_matches_new_line(true)
                    .build()
                    .expect("match-all pattern compiles"),
            });
        }

        let select = config
            .select_fields
            .iter()
            .map(|s| FieldSpec::compile(s))
            .collect::<GrepResult<Vec<_>>>()?;
        let noselect = config
            .noselect_fields
            .iter()
            .map(|s| FieldSpec::compile(s))
            .collect::<GrepResult<Vec<_>>>()?;

        Ok(PatternSet {
            content,
            brute_prechecks,
            select,
            noselect,
            invert: config.invert,
            universal,
        })
    }

    /// Whether full matching can be skipped entirely: no field filters, no
    /// invert, and only the universal match-all rule. The final passthrough
    /// decision also requires a sink that needs no markup.
    pub fn is_passthrough_eligible(&self) -> bool {
        self.universal && self.select.is_empty() && self.noselect.is_empty() && !self.invert
    }

    /// Whether the content list is just the injected match-all rule.
    pub fn is_universal(&self) -> bool {
        self.universal
    }

    /// Applies select/noselect filters to one level of a field tree,
    /// returning the visible keys in deterministic order.
    pub fn visible_fields<'a>(
        &self,
        fields: &'a HashMap<String, FieldValue>,
        trail: &[String],
    ) -> Vec<&'a String> {
        let keys = sorted_keys(fields);
        if self.select.is_empty() && self.noselect.is_empty() {
            return keys;
        }
        keys.into_iter()
            .filter(|key| {
                let mut path: Vec<String> = trail.to_vec();
                path.push((*key).clone());
                let dotted = path.join(".");
                if self.noselect.iter().any(|spec| spec.matches(&dotted)) {
                    return false;
                }
                if self.select.is_empty() {
                    return true;
                }
                self.select
                    .iter()
                    .any(|spec| spec.matches(&dotted) || spec.is_ancestor(&path))
            })
            .collect()
    }
}

/// Splits `FIELDPATH=PATTERN` on an `=` strictly inside the expression,
/// so a leading or trailing `=` stays part of the pattern.
fn split_path_prefix(raw: &str) -> (Option<&str>, &str) {
    let last_char_start = raw.char_indices().next_back().map_or(0, |(pos, _)| pos);
    match raw.find('=') {
        Some(pos) if pos > 0 && pos < last_char_start => (Some(&raw[..pos]), &raw[pos + 1..]),
        _ => (None, raw),
    }
}

/// Path scope glob to a segment-bounded regex over dotted paths:
/// `a.*.b` becomes `(^|\.)a\..*\.b($|\.)` semantics.
fn compile_path_scope(spec: &str, raw_pattern: &str) -> GrepResult<Regex> {
    let body = spec
        .split('*')
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join(".*");
    Regex::new(&format!(r"(^|\.){}($|\.)", body))
        .map_err(|e| GrepError::pattern_error(e.to_string(), raw_pattern))
}
