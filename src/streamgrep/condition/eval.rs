/*!
Interpreter for gating condition expressions.

Evaluation yields either a value, or one of two signals: `NoData` when the
expression touched a channel with no history yet (the enclosing condition
attempt is simply false), or `Error` for genuine mistakes such as unknown
fields or type mismatches.
*/

use std::cmp::Ordering;
use std::collections::{HashMap, VecDeque};

use crate::streamgrep::condition::ast::{BinaryOperator, Expr, LiteralValue, UnaryOperator};
use crate::streamgrep::condition::ChannelHistory;
use crate::streamgrep::model::{FieldValue, Record};
use crate::streamgrep::registry::ChannelKey;

/// Non-value outcomes of evaluation.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum EvalSignal {
    /// A referenced channel had no records yet; the condition attempt is false.
    NoData,
    /// A real evaluation error, reported to the caller.
    Error(String),
}

pub(crate) type EvalResult<'a> = Result<Value<'a>, EvalSignal>;

/// Read-only view over one channel's retained records.
#[derive(Clone, Copy)]
pub(crate) struct HistoryView<'a> {
    pub count: u64,
    pub firsts: &'a VecDeque<Record>,
    pub lasts: &'a VecDeque<Record>,
}

/// Runtime values produced while evaluating an expression.
#[derive(Clone)]
pub(crate) enum Value<'a> {
    Integer(i64),
    Float(f64),
    Boolean(bool),
    Text(String),
    Field(&'a FieldValue),
    Record(&'a Record),
    History(HistoryView<'a>),
    /// Placeholder for a channel reference with no history.
    Empty,
}

/// Inputs available to one evaluation attempt.
pub(crate) struct EvalContext<'a> {
    /// Channel name of the record being gated.
    pub channel: &'a str,
    /// The record being gated.
    pub record: &'a Record,
    /// All retained channel histories.
    pub histories: &'a HashMap<ChannelKey, ChannelHistory>,
    /// Wildcard spec to concrete channel key, for this cross-product attempt.
    pub bindings: &'a HashMap<String, ChannelKey>,
}

impl<'a> EvalContext<'a> {
    fn resolve_channel(&self, spec: &str) -> Value<'a> {
        if let Some(key) = self.bindings.get(spec) {
            if let Some(history) = self.histories.get(key) {
                return Value::History(history.view());
            }
            return Value::Empty;
        }
        for (key, history) in self.histories {
            if key.channel == spec {
                return Value::History(history.view());
            }
        }
        Value::Empty
    }
}

pub(crate) fn eval<'a>(expr: &'a Expr, ctx: &EvalContext<'a>) -> EvalResult<'a> {
    match expr {
        Expr::Literal(value) => Ok(match value {
            LiteralValue::Integer(i) => Value::Integer(*i),
            LiteralValue::Float(f) => Value::Float(*f),
            LiteralValue::String(s) => Value::Text(s.clone()),
            LiteralValue::Boolean(b) => Value::Boolean(*b),
        }),
        Expr::Identifier(name) => match name.as_str() {
            "channel" => Ok(Value::Text(ctx.channel.to_string())),
            "record" => Ok(Value::Record(ctx.record)),
            _ => Err(EvalSignal::Error(format!("Unknown name '{}'", name))),
        },
        Expr::ChannelRef(spec) => Ok(ctx.resolve_channel(spec)),
        Expr::Unary { op, operand } => {
            let value = eval(operand, ctx)?;
            match op {
                UnaryOperator::Not => Ok(Value::Boolean(!truthy(&value))),
                UnaryOperator::Negate => match numeric_parts(&value) {
                    Some((Some(i), _)) => Ok(Value::Integer(-i)),
                    Some((None, f)) => Ok(Value::Float(-f)),
                    None => Err(EvalSignal::Error(format!(
                        "Cannot negate {}",
                        type_name(&value)
                    ))),
                },
            }
        }
        Expr::Binary { left, op, right } => eval_binary(left, *op, right, ctx),
        Expr::Attribute { base, name } => {
            let value = eval(base, ctx)?;
            eval_attribute(value, name)
        }
        Expr::Index { base, index } => {
            let value = eval(base, ctx)?;
            let index = eval(index, ctx)?;
            eval_index(value, &index)
        }
        Expr::Len(inner) => {
            let value = eval(inner, ctx)?;
            eval_len(&value)
        }
    }
}

fn eval_binary<'a>(
    left: &'a Expr,
    op: BinaryOperator,
    right: &'a Expr,
    ctx: &EvalContext<'a>,
) -> EvalResult<'a> {
    // And/Or short-circuit so only the operands actually needed can signal.
    match op {
        BinaryOperator::And => {
            if !truthy(&eval(left, ctx)?) {
                return Ok(Value::Boolean(false));
            }
            let right = eval(right, ctx)?;
            return Ok(Value::Boolean(truthy(&right)));
        }
        BinaryOperator::Or => {
            if truthy(&eval(left, ctx)?) {
                return Ok(Value::Boolean(true));
            }
            let right = eval(right, ctx)?;
            return Ok(Value::Boolean(truthy(&right)));
        }
        _ => {}
    }

    let lhs = eval(left, ctx)?;
    let rhs = eval(right, ctx)?;
    match op {
        BinaryOperator::Equal => Ok(Value::Boolean(compare(&lhs, &rhs) == Some(Ordering::Equal))),
        BinaryOperator::NotEqual => {
            Ok(Value::Boolean(compare(&lhs, &rhs) != Some(Ordering::Equal)))
        }
        BinaryOperator::LessThan
        | BinaryOperator::LessThanOrEqual
        | BinaryOperator::GreaterThan
        | BinaryOperator::GreaterThanOrEqual => match compare(&lhs, &rhs) {
            Some(ordering) => Ok(Value::Boolean(match op {
                BinaryOperator::LessThan => ordering == Ordering::Less,
                BinaryOperator::LessThanOrEqual => ordering != Ordering::Greater,
                BinaryOperator::GreaterThan => ordering == Ordering::Greater,
                _ => ordering != Ordering::Less,
            })),
            None => Err(EvalSignal::Error(format!(
                "Cannot compare {} and {}",
                type_name(&lhs),
                type_name(&rhs)
            ))),
        },
        BinaryOperator::Add => {
            if let (Some(a), Some(b)) = (text_of(&lhs), text_of(&rhs)) {
                return Ok(Value::Text(format!("{}{}", a, b)));
            }
            arithmetic(&lhs, &rhs, op)
        }
        BinaryOperator::Subtract
        | BinaryOperator::Multiply
        | BinaryOperator::Divide
        | BinaryOperator::Modulo => arithmetic(&lhs, &rhs, op),
        BinaryOperator::And | BinaryOperator::Or => unreachable!(),
    }
}

fn arithmetic<'a>(lhs: &Value<'a>, rhs: &Value<'a>, op: BinaryOperator) -> EvalResult<'a> {
    let (left, right) = match (numeric_parts(lhs), numeric_parts(rhs)) {
        (Some(a), Some(b)) => (a, b),
        _ => {
            return Err(EvalSignal::Error(format!(
                "Cannot apply arithmetic to {} and {}",
                type_name(lhs),
                type_name(rhs)
            )))
        }
    };
    if let ((Some(a), _), (Some(b), _)) = (left, right) {
        // Integer arithmetic stays integral, except division.
        let result = match op {
            BinaryOperator::Add => a.checked_add(b),
            BinaryOperator::Subtract => a.checked_sub(b),
            BinaryOperator::Multiply => a.checked_mul(b),
            BinaryOperator::Modulo => {
                if b == 0 {
                    return Err(EvalSignal::Error("Modulo by zero".to_string()));
                }
                a.checked_rem_euclid(b)
            }
            BinaryOperator::Divide => {
                if b == 0 {
                    return Err(EvalSignal::Error("Division by zero".to_string()));
                }
                return Ok(Value::Float(a as f64 / b as f64));
            }
            _ => unreachable!(),
        };
        return result
            .map(Value::Integer)
            .ok_or_else(|| EvalSignal::Error("Integer overflow".to_string()));
    }
    let (a, b) = (left.1, right.1);
    match op {
        BinaryOperator::Add => Ok(Value::Float(a + b)),
        BinaryOperator::Subtract => Ok(Value::Float(a - b)),
        BinaryOperator::Multiply => Ok(Value::Float(a * b)),
        BinaryOperator::Divide => {
            if b == 0.0 {
                return Err(EvalSignal::Error("Division by zero".to_string()));
            }
            Ok(Value::Float(a / b))
        }
        BinaryOperator::Modulo => {
            if b == 0.0 {
                return Err(EvalSignal::Error("Modulo by zero".to_string()));
            }
            Ok(Value::Float(a.rem_euclid(b)))
        }
        _ => unreachable!(),
    }
}

fn eval_attribute<'a>(value: Value<'a>, name: &str) -> EvalResult<'a> {
    match value {
        Value::History(view) => match view.lasts.back() {
            Some(record) => lookup_field(&record.fields, name, &record.type_name),
            None => Err(EvalSignal::NoData),
        },
        Value::Record(record) => lookup_field(&record.fields, name, &record.type_name),
        Value::Field(FieldValue::Struct { type_name, fields }) => {
            lookup_field(fields, name, type_name)
        }
        Value::Empty => Err(EvalSignal::NoData),
        other => Err(EvalSignal::Error(format!(
            "{} has no fields",
            type_name(&other)
        ))),
    }
}

fn lookup_field<'a>(
    fields: &'a HashMap<String, FieldValue>,
    name: &str,
    owner: &str,
) -> EvalResult<'a> {
    fields
        .get(name)
        .map(Value::Field)
        .ok_or_else(|| EvalSignal::Error(format!("No field '{}' in {}", name, owner)))
}

fn eval_index<'a>(value: Value<'a>, index: &Value<'a>) -> EvalResult<'a> {
    let position = match numeric_parts(index) {
        Some((Some(i), _)) => i,
        _ => {
            return Err(EvalSignal::Error(format!(
                "Subscript must be an integer, not {}",
                type_name(index)
            )))
        }
    };
    match value {
        Value::History(view) => {
            // Negative positions count back from the newest record; positive
            // ones count forward from the first record ever seen. Out-of-range
            // resolves to the empty placeholder, not an error.
            let record = if position < 0 {
                let offset = view.lasts.len() as i64 + position;
                if offset >= 0 {
                    view.lasts.get(offset as usize)
                } else {
                    None
                }
            } else {
                view.firsts.get(position as usize)
            };
            Ok(record.map(Value::Record).unwrap_or(Value::Empty))
        }
        Value::Field(FieldValue::Array(items)) => {
            let offset = if position < 0 {
                items.len() as i64 + position
            } else {
                position
            };
            items
                .get(offset.max(0) as usize)
                .filter(|_| offset >= 0)
                .map(Value::Field)
                .ok_or_else(|| {
                    EvalSignal::Error(format!("Index {} out of range", position))
                })
        }
        Value::Empty => Err(EvalSignal::NoData),
        other => Err(EvalSignal::Error(format!(
            "Cannot subscript {}",
            type_name(&other)
        ))),
    }
}

fn eval_len<'a>(value: &Value<'a>) -> EvalResult<'a> {
    let length = match value {
        Value::History(view) => view.count as i64,
        Value::Text(s) => s.chars().count() as i64,
        Value::Field(FieldValue::String(s)) => s.chars().count() as i64,
        Value::Field(FieldValue::Array(items)) => items.len() as i64,
        Value::Field(FieldValue::Bytes(bytes)) => bytes.len() as i64,
        Value::Empty => 0,
        other => {
            return Err(EvalSignal::Error(format!(
                "{} has no length",
                type_name(other)
            )))
        }
    };
    Ok(Value::Integer(length))
}

/// Truthiness rules: zero, empty, and the no-history placeholder are false.
pub(crate) fn truthy(value: &Value<'_>) -> bool {
    match value {
        Value::Integer(i) => *i != 0,
        Value::Float(f) => *f != 0.0,
        Value::Boolean(b) => *b,
        Value::Text(s) => !s.is_empty(),
        Value::Record(_) => true,
        Value::History(view) => view.count > 0,
        Value::Empty => false,
        Value::Field(field) => match field {
            FieldValue::Null => false,
            FieldValue::Integer(i) => *i != 0,
            FieldValue::Float(f) => *f != 0.0,
            FieldValue::Boolean(b) => *b,
            FieldValue::String(s) => !s.is_empty(),
            FieldValue::Bytes(bytes) => !bytes.is_empty(),
            FieldValue::Array(items) => !items.is_empty(),
            FieldValue::Struct { .. } => true,
        },
    }
}

/// Numeric interpretation as `(integer if integral, float)`.
fn numeric_parts(value: &Value<'_>) -> Option<(Option<i64>, f64)> {
    match value {
        Value::Integer(i) => Some((Some(*i), *i as f64)),
        Value::Float(f) => Some((None, *f)),
        Value::Boolean(b) => Some((Some(*b as i64), *b as i64 as f64)),
        Value::Field(FieldValue::Integer(i)) => Some((Some(*i), *i as f64)),
        Value::Field(FieldValue::Float(f)) => Some((None, *f)),
        Value::Field(FieldValue::Boolean(b)) => Some((Some(*b as i64), *b as i64 as f64)),
        _ => None,
    }
}

fn text_of<'v>(value: &'v Value<'_>) -> Option<&'v str> {
    match value {
        Value::Text(s) => Some(s),
        Value::Field(FieldValue::String(s)) => Some(s),
        _ => None,
    }
}

/// Three-way comparison; `None` means the operands are not comparable.
fn compare(lhs: &Value<'_>, rhs: &Value<'_>) -> Option<Ordering> {
    if let (Some((Some(a), _)), Some((Some(b), _))) = (numeric_parts(lhs), numeric_parts(rhs)) {
        return Some(a.cmp(&b));
    }
    if let (Some((_, a)), Some((_, b))) = (numeric_parts(lhs), numeric_parts(rhs)) {
        return a.partial_cmp(&b);
    }
    if let (Some(a), Some(b)) = (text_of(lhs), text_of(rhs)) {
        return Some(a.cmp(b));
    }
    None
}

fn type_name(value: &Value<'_>) -> &'static str {
    match value {
        Value::Integer(_) => "an integer",
        Value::Float(_) => "a float",
        Value::Boolean(_) => "a boolean",
        Value::Text(_) => "a string",
        Value::Record(_) => "a record",
        Value::History(_) => "a channel history",
        Value::Empty => "an empty channel",
        Value::Field(field) => match field {
            FieldValue::Null => "null",
            FieldValue::Integer(_) => "an integer",
            FieldValue::Float(_) => "a float",
            FieldValue::Boolean(_) => "a boolean",
            FieldValue::String(_) => "a string",
            FieldValue::Bytes(_) => "a byte array",
            FieldValue::Array(_) => "an array",
            FieldValue::Struct { .. } => "a struct",
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::streamgrep::condition::parser::parse_condition;

    fn context<'a>(
        record: &'a Record,
        histories: &'a HashMap<ChannelKey, ChannelHistory>,
        bindings: &'a HashMap<String, ChannelKey>,
    ) -> EvalContext<'a> {
        EvalContext {
            channel: "/input",
            record,
            histories,
            bindings,
        }
    }

    fn eval_text(
        text: &str,
        record: &Record,
        histories: &HashMap<ChannelKey, ChannelHistory>,
    ) -> Result<bool, EvalSignal> {
        let expr = parse_condition(text).unwrap();
        let bindings = HashMap::new();
        let ctx = context(record, histories, &bindings);
        eval(&expr, &ctx).map(|v| truthy(&v))
    }

    fn history_with(records: Vec<Record>) -> ChannelHistory {
        let mut history = ChannelHistory::default();
        for record in records {
            history.count += 1;
            if history.firsts.len() < 4 {
                history.firsts.push_back(record.clone());
            }
            history.lasts.push_back(record);
            while history.lasts.len() > 4 {
                history.lasts.pop_front();
            }
        }
        history
    }

    #[test]
    fn test_arithmetic_and_comparison() {
        let record = Record::new("t/Empty");
        let histories = HashMap::new();
        assert_eq!(eval_text("1 + 2 * 3 == 7", &record, &histories), Ok(true));
        assert_eq!(eval_text("7 / 2 > 3.4", &record, &histories), Ok(true));
        assert_eq!(eval_text("-5 % 3 == 1", &record, &histories), Ok(true));
        assert_eq!(eval_text("'ab' + 'cd' == 'abcd'", &record, &histories), Ok(true));
        assert!(matches!(
            eval_text("1 / 0", &record, &histories),
            Err(EvalSignal::Error(_))
        ));
    }

    #[test]
    fn test_record_field_access() {
        let record = Record::new("t/Status")
            .with_field("speed", FieldValue::Float(2.5))
            .with_field("name", FieldValue::String("alpha".to_string()));
        let histories = HashMap::new();
        assert_eq!(
            eval_text("record.speed > 2 and record.name == 'alpha'", &record, &histories),
            Ok(true)
        );
        assert_eq!(eval_text("channel == '/input'", &record, &histories), Ok(true));
        assert!(matches!(
            eval_text("record.missing == 1", &record, &histories),
            Err(EvalSignal::Error(_))
        ));
    }

    #[test]
    fn test_channel_history_latest_and_indexed() {
        let record = Record::new("t/Empty");
        let mut histories = HashMap::new();
        let key = ChannelKey::new("/odom", "nav/Odometry", "abc");
        let records: Vec<Record> = (0..6)
            .map(|i| Record::new("nav/Odometry").with_field("x", FieldValue::Integer(i)))
            .collect();
        histories.insert(key, history_with(records));

        // Bare reference reads the newest record through attribute access.
        assert_eq!(eval_text("<channel /odom>.x == 5", &record, &histories), Ok(true));
        // Negative index counts back from newest, positive from first seen.
        assert_eq!(
            eval_text("<channel /odom>[-2].x == 4", &record, &histories),
            Ok(true)
        );
        assert_eq!(
            eval_text("<channel /odom>[0].x == 0", &record, &histories),
            Ok(true)
        );
        assert_eq!(eval_text("len(<channel /odom>) == 6", &record, &histories), Ok(true));
    }

    #[test]
    fn test_missing_channel_signals_no_data() {
        let record = Record::new("t/Empty");
        let histories = HashMap::new();
        assert_eq!(
            eval_text("<channel /gone>.x == 1", &record, &histories),
            Err(EvalSignal::NoData)
        );
        // Bare truthiness of a missing channel is false, not a signal.
        assert_eq!(eval_text("<channel /gone>", &record, &histories), Ok(false));
        assert_eq!(eval_text("len(<channel /gone>) == 0", &record, &histories), Ok(true));
    }

    #[test]
    fn test_out_of_range_history_index_is_empty() {
        let record = Record::new("t/Empty");
        let mut histories = HashMap::new();
        let key = ChannelKey::new("/odom", "nav/Odometry", "abc");
        histories.insert(
            key,
            history_with(vec![
                Record::new("nav/Odometry").with_field("x", FieldValue::Integer(1))
            ]),
        );
        assert_eq!(
            eval_text("<channel /odom>[-3].x == 1", &record, &histories),
            Err(EvalSignal::NoData)
        );
    }

    #[test]
    fn test_short_circuit_skips_no_data() {
        let record = Record::new("t/Empty");
        let histories = HashMap::new();
        assert_eq!(
            eval_text("true or <channel /gone>.x == 1", &record, &histories),
            Ok(true)
        );
        assert_eq!(
            eval_text("false and <channel /gone>.x == 1", &record, &histories),
            Ok(false)
        );
    }

    #[test]
    fn test_nested_struct_and_array() {
        let mut pose_fields = HashMap::new();
        pose_fields.insert("x".to_string(), FieldValue::Float(1.5));
        let record = Record::new("t/State")
            .with_field(
                "pose",
                FieldValue::Struct {
                    type_name: "t/Pose".to_string(),
                    fields: pose_fields,
                },
            )
            .with_field(
                "ranges",
                FieldValue::Array(vec![
                    FieldValue::Integer(10),
                    FieldValue::Integer(20),
                    FieldValue::Integer(30),
                ]),
            );
        let histories = HashMap::new();
        assert_eq!(eval_text("record.pose.x == 1.5", &record, &histories), Ok(true));
        assert_eq!(eval_text("record.ranges[1] == 20", &record, &histories), Ok(true));
        assert_eq!(eval_text("record.ranges[-1] == 30", &record, &histories), Ok(true));
        assert_eq!(eval_text("len(record.ranges) == 3", &record, &histories), Ok(true));
        assert!(matches!(
            eval_text("record.ranges[7] == 1", &record, &histories),
            Err(EvalSignal::Error(_))
        ));
    }
}
