/*!
# Match Engine

Walks a record's field tree under a compiled [`PatternSet`], producing a
marked-up copy with matched spans wrapped in [`MatchMarkers`], or a
match/no-match verdict.

The walk is a pure transform: the input record is never mutated, and a
well-formed record with a compiled pattern set cannot fail to evaluate.
*/

use crate::streamgrep::model::{merge_spans, FieldValue, MatchMarkers, Record};
use crate::streamgrep::pattern::PatternSet;
use std::collections::HashMap;

/// Stateless record matcher.
pub struct MatchEngine;

impl MatchEngine {
    /// Returns a transformed record if all content rules find a match, else
    /// `None`.
    ///
    /// Matching field values are converted to strings with matched spans
    /// surrounded by markers. In invert mode, returns the unmodified record
    /// when no rule matched anywhere.
    pub fn evaluate(record: &Record, patterns: &PatternSet) -> Option<Record> {
        if !patterns.brute_prechecks.is_empty() {
            let text = record
                .flatten()
                .into_iter()
                .map(|(_, value)| value)
                .collect::<Vec<_>>()
                .join("\n");
            if !patterns.brute_prechecks.iter().all(|p| p.is_match(&text)) {
                return None;
            }
        }

        let mut matched = vec![false; patterns.content.len()];
        let mut leaves = 0usize;
        let mut copy = record.clone();
        walk_fields(
            &mut copy.fields,
            &mut Vec::new(),
            patterns,
            &mut matched,
            &mut leaves,
        );

        // A record with no fields at all still satisfies a bare match-all
        // rule, so inversion must see it as matched.
        if leaves == 0
            && record.fields.is_empty()
            && patterns.is_universal()
            && patterns.select.is_empty()
        {
            for m in matched.iter_mut() {
                *m = true;
            }
        }

        if patterns.invert {
            let any = matched.iter().any(|m| *m);
            // The walk never wrote markers in invert mode, so the copy is
            // the original record verbatim.
            return if any { None } else { Some(copy) };
        }

        if matched.iter().all(|m| *m) {
            Some(copy)
        } else {
            None
        }
    }
}

fn walk_fields(
    fields: &mut HashMap<String, FieldValue>,
    trail: &mut Vec<String>,
    patterns: &PatternSet,
    matched: &mut [bool],
    leaves: &mut usize,
) {
    let visible: Vec<String> = patterns
        .visible_fields(fields, trail)
        .into_iter()
        .cloned()
        .collect();
    for key in visible {
        let Some(value) = fields.get_mut(&key) else {
            continue;
        };
        let is_struct_array = value.is_struct_array();
        trail.push(key);
        match value {
            FieldValue::Struct { fields: nested, .. } => {
                walk_fields(nested, trail, patterns, matched, leaves);
            }
            FieldValue::Array(items) if is_struct_array => {
                for item in items.iter_mut() {
                    match item {
                        FieldValue::Struct { fields: nested, .. } => {
                            walk_fields(nested, trail, patterns, matched, leaves);
                        }
                        other => {
                            *leaves += 1;
                            let rendered = other.render();
                            if let Some(wrapped) =
                                match_leaf(&rendered, trail, false, patterns, matched)
                            {
                                *other = FieldValue::String(wrapped);
                            }
                        }
                    }
                }
            }
            leaf => {
                *leaves += 1;
                let is_collection =
                    matches!(leaf, FieldValue::Array(_) | FieldValue::Bytes(_));
                let rendered = leaf.render();
                if let Some(wrapped) =
                    match_leaf(&rendered, trail, is_collection, patterns, matched)
                {
                    *leaf = FieldValue::String(wrapped);
                }
            }
        }
        trail.pop();
    }
}

/// Runs every applicable content rule against one rendered leaf value,
/// recording which rules hit, and returns the marker-wrapped text when any
/// span was marked. Collection brackets are stripped before matching unless
/// the collection is empty, keeping `[]` itself matchable.
fn match_leaf(
    rendered: &str,
    trail: &[String],
    is_collection: bool,
    patterns: &PatternSet,
    matched: &mut [bool],
) -> Option<String> {
    let strip = is_collection && rendered != "[]";
    let inner = if strip {
        &rendered[1..rendered.len() - 1]
    } else {
        rendered
    };
    let dotted = trail.join(".");

    let mut spans: Vec<(usize, usize)> = Vec::new();
    for (i, rule) in patterns.content.iter().enumerate() {
        let in_scope = rule.path.as_ref().map_or(true, |p| p.is_match(&dotted));
        if !in_scope {
            continue;
        }
        for m in rule.content.find_iter(inner) {
            // Skip zero-width matches except on an empty value.
            if !inner.is_empty() && m.start() == m.end() {
                continue;
            }
            matched[i] = true;
            spans.push((m.start(), m.end()));
            if patterns.invert {
                break;
            }
        }
    }

    if patterns.invert {
        return None;
    }
    let spans = merge_spans(spans);
    if spans.is_empty() {
        return None;
    }
    let mut wrapped = inner.to_string();
    for (start, end) in spans.into_iter().rev() {
        wrapped.insert_str(end, MatchMarkers::END);
        wrapped.insert_str(start, MatchMarkers::START);
    }
    Some(if strip {
        format!("[{}]", wrapped)
    } else {
        wrapped
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::streamgrep::config::SearchConfig;

    fn compile(patterns: &[&str], f: impl FnOnce(&mut SearchConfig)) -> PatternSet {
        let mut config = SearchConfig::default();
        config.patterns = patterns.iter().map(|s| s.to_string()).collect();
        f(&mut config);
        PatternSet::compile(&config).unwrap()
    }

    fn sample() -> Record {
        Record::new("nav/Status")
            .with_field("state", FieldValue::String("active".into()))
            .with_field("code", FieldValue::Integer(42))
            .with_field(
                "velocity",
                FieldValue::Struct {
                    type_name: "nav/Vector".into(),
                    fields: HashMap::from([
                        ("x".to_string(), FieldValue::Float(1.5)),
                        ("y".to_string(), FieldValue::Float(-0.25)),
                    ]),
                },
            )
    }

    #[test]
    fn test_simple_match_marks_span() {
        let patterns = compile(&["act"], |_| {});
        let result = MatchEngine::evaluate(&sample(), &patterns).unwrap();
        match &result.fields["state"] {
            FieldValue::String(s) => {
                assert_eq!(s, &format!("{}act{}ive", MatchMarkers::START, MatchMarkers::END));
            }
            other => panic!("unexpected value: {:?}", other),
        }
    }

    #[test]
    fn test_no_match_returns_none() {
        let patterns = compile(&["dormant"], |_| {});
        assert!(MatchEngine::evaluate(&sample(), &patterns).is_none());
    }

    #[test]
    fn test_all_rules_must_match() {
        let patterns = compile(&["active", "42"], |_| {});
        assert!(MatchEngine::evaluate(&sample(), &patterns).is_some());
        let patterns = compile(&["active", "nothere"], |_| {});
        assert!(MatchEngine::evaluate(&sample(), &patterns).is_none());
    }

    #[test]
    fn test_path_scoped_rule() {
        let patterns = compile(&["velocity.x=1\\.5"], |_| {});
        assert!(MatchEngine::evaluate(&sample(), &patterns).is_some());
        // Same value but scoped to a path that doesn't hold it.
        let patterns = compile(&["velocity.y=1\\.5"], |_| {});
        assert!(MatchEngine::evaluate(&sample(), &patterns).is_none());
    }

    #[test]
    fn test_invert_returns_unmodified() {
        let patterns = compile(&["dormant"], |c| c.invert = true);
        let record = sample();
        let result = MatchEngine::evaluate(&record, &patterns).unwrap();
        assert_eq!(result, record);

        let patterns = compile(&["active"], |c| c.invert = true);
        assert!(MatchEngine::evaluate(&record, &patterns).is_none());
    }

    #[test]
    fn test_collection_brackets_stripped() {
        let record = Record::new("test/Blob")
            .with_field("data", FieldValue::Bytes(vec![10, 20, 30]));
        // "[" must not be matchable inside a non-empty collection.
        let patterns = compile(&["\\["], |c| c.raw = false);
        assert!(MatchEngine::evaluate(&record, &patterns).is_none());
        // But the element text is.
        let patterns = compile(&["20"], |_| {});
        assert!(MatchEngine::evaluate(&record, &patterns).is_some());
    }

    #[test]
    fn test_empty_collection_matchable() {
        let record = Record::new("test/Blob").with_field("data", FieldValue::Array(vec![]));
        let patterns = compile(&["\\[\\]"], |_| {});
        assert!(MatchEngine::evaluate(&record, &patterns).is_some());
    }

    #[test]
    fn test_struct_array_recursion() {
        let inner = |v: i64| FieldValue::Struct {
            type_name: "test/Point".into(),
            fields: HashMap::from([("v".to_string(), FieldValue::Integer(v))]),
        };
        let record = Record::new("test/Path")
            .with_field("points", FieldValue::Array(vec![inner(7), inner(99)]));
        let patterns = compile(&["99"], |_| {});
        assert!(MatchEngine::evaluate(&record, &patterns).is_some());
    }

    #[test]
    fn test_empty_record_universal_match() {
        let record = Record::new("test/Empty");
        let patterns = compile(&[], |_| {});
        assert!(MatchEngine::evaluate(&record, &patterns).is_some());
        let patterns = compile(&[], |c| c.invert = true);
        assert!(MatchEngine::evaluate(&record, &patterns).is_none());
    }

    #[test]
    fn test_select_filter_blocks_match() {
        let patterns = compile(&["active"], |c| {
            c.select_fields = vec!["code".to_string()];
        });
        assert!(MatchEngine::evaluate(&sample(), &patterns).is_none());
    }

    #[test]
    fn test_overlapping_spans_merged() {
        let record = Record::new("test/Msg")
            .with_field("text", FieldValue::String("abcd".into()));
        let patterns = compile(&["abc", "bcd"], |_| {});
        let result = MatchEngine::evaluate(&record, &patterns).unwrap();
        match &result.fields["text"] {
            FieldValue::String(s) => {
                assert_eq!(s, &format!("{}abcd{}", MatchMarkers::START, MatchMarkers::END));
            }
            other => panic!("unexpected value: {:?}", other),
        }
    }
}
