//! Record gating by condition expressions over channel histories.
//!
//! Conditions are small boolean expressions evaluated against the current record
//! and the retained history of other channels, e.g.
//! `<channel /flags/*>.data == true and record.speed > 0.5`. A record passes
//! only when every configured condition is satisfied.
//!
//! Channel references may be literal names or `*`-globs. A glob is tried against
//! every known channel, and the condition passes if any combination of concrete
//! channels satisfies it. Per channel, only as many records are retained as the
//! subscripts used in the expressions require.

pub mod ast;
pub mod eval;
pub mod lexer;
pub mod parser;

use std::collections::{HashMap, VecDeque};

use regex::Regex;

use crate::streamgrep::condition::ast::{Expr, LiteralValue, UnaryOperator};
use crate::streamgrep::condition::eval::{eval, truthy, EvalContext, EvalSignal, HistoryView};
use crate::streamgrep::condition::parser::parse_condition;
use crate::streamgrep::error::{GrepError, GrepResult};
use crate::streamgrep::model::{wildcard_to_regex, Record};
use crate::streamgrep::registry::ChannelKey;

/// Retained records for one channel referenced by conditions.
#[derive(Debug, Default, Clone)]
pub struct ChannelHistory {
    /// Total records ever registered for the channel, regardless of retention.
    pub count: u64,
    /// Oldest records, for non-negative subscripts.
    pub firsts: VecDeque<Record>,
    /// Newest records, for negative subscripts and bare attribute access.
    pub lasts: VecDeque<Record>,
}

impl ChannelHistory {
    pub(crate) fn view(&self) -> HistoryView<'_> {
        HistoryView {
            count: self.count,
            firsts: &self.firsts,
            lasts: &self.lasts,
        }
    }
}

struct CompiledCondition {
    source: String,
    expr: Expr,
    /// Glob channel specs needing cross-product binding at gate time.
    wildcards: Vec<String>,
    error_logged: bool,
}

struct SpecState {
    spec: String,
    /// Compiled glob, None for literal channel names.
    regex: Option<Regex>,
    /// True when the channel feeds conditions only and is not itself searched.
    pure: bool,
    /// How many oldest records to keep, from the largest non-negative subscript.
    first_limit: usize,
    /// How many newest records to keep, from the deepest negative subscript.
    last_limit: usize,
}

impl SpecState {
    fn matches(&self, channel: &str) -> bool {
        match &self.regex {
            Some(regex) => regex.is_match(channel),
            None => self.spec == channel,
        }
    }
}

/// Evaluates configured conditions against incoming records.
pub struct ConditionEvaluator {
    conditions: Vec<CompiledCondition>,
    specs: Vec<SpecState>,
    histories: HashMap<ChannelKey, ChannelHistory>,
}

impl ConditionEvaluator {
    /// Parses the given expressions; fails on the first syntax error.
    pub fn new(expressions: &[String]) -> GrepResult<Self> {
        let mut conditions = Vec::new();
        let mut limits: HashMap<String, (usize, usize)> = HashMap::new();

        for text in expressions {
            let expr = parse_condition(text)?;
            let refs = expr.channel_refs();
            for spec in &refs {
                limits.entry(spec.clone()).or_insert((1, 1));
            }
            collect_retention_limits(&expr, &mut limits);
            let wildcards = refs
                .into_iter()
                .filter(|spec| spec.contains('*'))
                .collect();
            conditions.push(CompiledCondition {
                source: text.clone(),
                expr,
                wildcards,
                error_logged: false,
            });
        }

        let mut specs = Vec::new();
        for (spec, (first_limit, last_limit)) in limits {
            let regex = if spec.contains('*') {
                Some(wildcard_to_regex(&spec, true).map_err(|e| {
                    GrepError::condition_parse(
                        &format!("Invalid channel pattern '{}': {}", spec, e),
                        &spec,
                        None,
                    )
                })?)
            } else {
                None
            };
            specs.push(SpecState {
                spec,
                regex,
                pure: false,
                first_limit,
                last_limit,
            });
        }

        Ok(ConditionEvaluator {
            conditions,
            specs,
            histories: HashMap::new(),
        })
    }

    pub fn has_conditions(&self) -> bool {
        !self.conditions.is_empty()
    }

    /// Whether any condition references this channel.
    pub fn is_condition_channel(&self, channel: &str) -> bool {
        self.specs.iter().any(|spec| spec.matches(channel))
    }

    /// Whether this channel feeds conditions only, with no spec marked as
    /// also being searched for content.
    pub fn is_pure_condition_channel(&self, channel: &str) -> bool {
        let mut any = false;
        for spec in &self.specs {
            if spec.matches(channel) {
                if !spec.pure {
                    return false;
                }
                any = true;
            }
        }
        any
    }

    /// Marks channel specs matching `channel` as condition-only or not.
    pub fn set_channel_state(&mut self, channel: &str, pure: bool) {
        for spec in &mut self.specs {
            if spec.matches(channel) {
                spec.pure = pure;
            }
        }
    }

    /// Retains the record in the channel's history if conditions reference it.
    pub fn register(&mut self, key: &ChannelKey, record: &Record) {
        let mut first_limit = 0usize;
        let mut last_limit = 0usize;
        let mut referenced = false;
        for spec in &self.specs {
            if spec.matches(&key.channel) {
                referenced = true;
                first_limit = first_limit.max(spec.first_limit);
                last_limit = last_limit.max(spec.last_limit);
            }
        }
        if !referenced {
            return;
        }
        let history = self.histories.entry(key.clone()).or_default();
        history.count += 1;
        if history.firsts.len() < first_limit {
            history.firsts.push_back(record.clone());
        }
        history.lasts.push_back(record.clone());
        while history.lasts.len() > last_limit {
            history.lasts.pop_front();
        }
    }

    /// Evaluates all conditions against the record. Every condition must
    /// pass; a glob condition passes if any concrete channel combination
    /// satisfies it. Missing history makes an attempt false, while genuine
    /// evaluation errors are logged once per condition and returned.
    pub fn gate(&mut self, channel: &str, record: &Record) -> GrepResult<bool> {
        for i in 0..self.conditions.len() {
            let mut passed = false;
            let mut failure: Option<String> = None;
            {
                let cond = &self.conditions[i];
                let mut options: Vec<Vec<Option<ChannelKey>>> = Vec::new();
                for spec in &cond.wildcards {
                    let state = self.specs.iter().find(|s| s.spec == *spec);
                    let mut keys: Vec<Option<ChannelKey>> = self
                        .histories
                        .keys()
                        .filter(|key| state.map_or(false, |s| s.matches(&key.channel)))
                        .cloned()
                        .map(Some)
                        .collect();
                    if keys.is_empty() {
                        keys.push(None);
                    }
                    options.push(keys);
                }

                let mut indices = vec![0usize; options.len()];
                'attempts: loop {
                    let mut bindings = HashMap::new();
                    for (slot, spec) in cond.wildcards.iter().enumerate() {
                        if let Some(key) = &options[slot][indices[slot]] {
                            bindings.insert(spec.clone(), key.clone());
                        }
                    }
                    let ctx = EvalContext {
                        channel,
                        record,
                        histories: &self.histories,
                        bindings: &bindings,
                    };
                    match eval(&cond.expr, &ctx) {
                        Ok(value) => {
                            if truthy(&value) {
                                passed = true;
                                break;
                            }
                        }
                        Err(EvalSignal::NoData) => {}
                        Err(EvalSignal::Error(message)) => {
                            failure = Some(message);
                            break;
                        }
                    }
                    let mut slot = 0;
                    while slot < indices.len() {
                        indices[slot] += 1;
                        if indices[slot] < options[slot].len() {
                            continue 'attempts;
                        }
                        indices[slot] = 0;
                        slot += 1;
                    }
                    break;
                }
            }
            if let Some(message) = failure {
                let cond = &mut self.conditions[i];
                if !cond.error_logged {
                    log::error!(
                        "Error evaluating condition \"{}\": {}",
                        cond.source,
                        message
                    );
                    cond.error_logged = true;
                }
                return Err(GrepError::condition_error(message, cond.source.clone()));
            }
            if !passed {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Drops all retained history, at batch boundaries.
    pub fn close_batch(&mut self) {
        self.histories.clear();
    }
}

fn collect_retention_limits(expr: &Expr, limits: &mut HashMap<String, (usize, usize)>) {
    expr.walk(&mut |node| {
        if let Expr::Index { base, index } = node {
            if let Expr::ChannelRef(spec) = base.as_ref() {
                let position = match index.as_ref() {
                    Expr::Literal(LiteralValue::Integer(n)) => Some(*n),
                    Expr::Unary {
                        op: UnaryOperator::Negate,
                        operand,
                    } => match operand.as_ref() {
                        Expr::Literal(LiteralValue::Integer(n)) => Some(-n),
                        _ => None,
                    },
                    _ => None,
                };
                if let Some(n) = position {
                    let entry = limits.entry(spec.clone()).or_insert((1, 1));
                    if n >= 0 {
                        entry.0 = entry.0.max(n as usize + 1);
                    } else {
                        entry.1 = entry.1.max(n.unsigned_abs() as usize);
                    }
                }
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::streamgrep::model::FieldValue;

    fn tick(value: i64) -> Record {
        Record::new("std/Int64").with_field("data", FieldValue::Integer(value))
    }

    fn evaluator(expressions: &[&str]) -> ConditionEvaluator {
        let owned: Vec<String> = expressions.iter().map(|s| s.to_string()).collect();
        ConditionEvaluator::new(&owned).unwrap()
    }

    #[test]
    fn test_no_conditions_passes_everything() {
        let mut conditions = evaluator(&[]);
        assert!(!conditions.has_conditions());
        assert_eq!(conditions.gate("/any", &tick(1)).unwrap(), true);
    }

    #[test]
    fn test_literal_channel_gating() {
        let mut conditions = evaluator(&["<channel /flag>.data == 1"]);
        let flag_key = ChannelKey::new("/flag", "std/Int64", "h1");

        // No history yet: attribute access on the reference signals no data.
        assert_eq!(conditions.gate("/text", &tick(0)).unwrap(), false);

        conditions.register(&flag_key, &tick(0));
        assert_eq!(conditions.gate("/text", &tick(0)).unwrap(), false);

        conditions.register(&flag_key, &tick(1));
        assert_eq!(conditions.gate("/text", &tick(0)).unwrap(), true);
    }

    #[test]
    fn test_wildcard_cross_product_any_pass() {
        let mut conditions = evaluator(&["<channel */status>.data == 1"]);
        let a = ChannelKey::new("/a/status", "std/Int64", "h1");
        let b = ChannelKey::new("/b/status", "std/Int64", "h1");

        conditions.register(&a, &tick(0));
        conditions.register(&b, &tick(0));
        assert_eq!(conditions.gate("/text", &tick(0)).unwrap(), false);

        // One matching channel satisfying the condition is enough.
        conditions.register(&b, &tick(1));
        assert_eq!(conditions.gate("/text", &tick(0)).unwrap(), true);
    }

    #[test]
    fn test_retention_sized_by_subscripts() {
        let mut conditions =
            evaluator(&["<channel /odom>[2].data == 2 or <channel /odom>[-3].data == 100"]);
        let key = ChannelKey::new("/odom", "nav/Odometry", "h1");
        for i in 0..6 {
            conditions.register(&key, &tick(i));
        }
        // firsts keeps records 0..3, so [2] is the third record ever seen.
        assert_eq!(conditions.gate("/text", &tick(0)).unwrap(), true);

        let mut conditions = evaluator(&["<channel /odom>[-3].data == 3"]);
        let key = ChannelKey::new("/odom", "nav/Odometry", "h1");
        for i in 0..6 {
            conditions.register(&key, &tick(i));
        }
        // lasts keeps records 3, 4, 5; [-3] is the oldest of those.
        assert_eq!(conditions.gate("/text", &tick(0)).unwrap(), true);
    }

    #[test]
    fn test_multiple_conditions_all_must_pass() {
        let mut conditions =
            evaluator(&["<channel /a>.data == 1", "record.data > 10"]);
        let a = ChannelKey::new("/a", "std/Int64", "h1");
        conditions.register(&a, &tick(1));

        assert_eq!(conditions.gate("/text", &tick(5)).unwrap(), false);
        assert_eq!(conditions.gate("/text", &tick(15)).unwrap(), true);
    }

    #[test]
    fn test_pure_condition_channels() {
        let mut conditions = evaluator(&["<channel /tick>.data == 1"]);
        assert!(conditions.is_condition_channel("/tick"));
        assert!(!conditions.is_condition_channel("/other"));

        // Channels default to being searched as well as feeding conditions.
        assert!(!conditions.is_pure_condition_channel("/tick"));
        conditions.set_channel_state("/tick", true);
        assert!(conditions.is_pure_condition_channel("/tick"));
        assert!(!conditions.is_pure_condition_channel("/other"));
    }

    #[test]
    fn test_unreferenced_channel_not_retained() {
        let mut conditions = evaluator(&["<channel /flag>.data == 1"]);
        let other = ChannelKey::new("/noise", "std/Int64", "h1");
        conditions.register(&other, &tick(1));
        assert_eq!(conditions.gate("/text", &tick(0)).unwrap(), false);
    }

    #[test]
    fn test_close_batch_clears_history() {
        let mut conditions = evaluator(&["<channel /flag>.data == 1"]);
        let key = ChannelKey::new("/flag", "std/Int64", "h1");
        conditions.register(&key, &tick(1));
        assert_eq!(conditions.gate("/text", &tick(0)).unwrap(), true);

        conditions.close_batch();
        assert_eq!(conditions.gate("/text", &tick(0)).unwrap(), false);
    }

    #[test]
    fn test_evaluation_error_is_returned() {
        let mut conditions = evaluator(&["<channel /flag>.missing == 1"]);
        let key = ChannelKey::new("/flag", "std/Int64", "h1");
        conditions.register(&key, &tick(1));
        let result = conditions.gate("/text", &tick(0));
        assert!(matches!(result, Err(GrepError::ConditionError { .. })));
    }

    #[test]
    fn test_bad_expression_rejected_at_configure() {
        let expressions = vec!["<channel /a>.x ==".to_string()];
        assert!(ConditionEvaluator::new(&expressions).is_err());
    }
}
