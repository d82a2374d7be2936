//! Condition gating through the full search loop: glob channel references,
//! condition-only channels, history subscripts and error surfacing.

use streamgrep::{FieldValue, GrepError, MemorySink, Record, SearchConfig, Searcher, VecSource};

fn text_record(text: &str) -> Record {
    Record::new("std/String").with_field("data", FieldValue::String(text.to_string()))
}

fn flag_record(value: i64) -> Record {
    Record::new("std/Int64").with_field("data", FieldValue::Integer(value))
}

#[test]
fn test_glob_cross_product_with_partial_data() {
    // One ctrl channel is enabled, another only shows up later in the
    // stream. The condition must pass on the combination that has data,
    // without raising for the one that doesn't.
    let mut config = SearchConfig::default();
    config.patterns = vec!["needle".to_string()];
    config.conditions =
        vec!["<channel */ctrl>.enabled and <channel */speed>.value > 0".to_string()];

    let ctrl = |enabled: bool| {
        Record::new("ctrl/Command").with_field("enabled", FieldValue::Boolean(enabled))
    };
    let speed = |value: f64| Record::new("nav/Speed").with_field("value", FieldValue::Float(value));

    let records = vec![
        ("/front/ctrl".to_string(), ctrl(true), 10),
        ("/wheel/speed".to_string(), speed(5.0), 20),
        ("/log".to_string(), text_record("needle event"), 30),
        ("/rear/ctrl".to_string(), ctrl(false), 40),
        ("/log".to_string(), text_record("needle again"), 50),
    ];

    let mut searcher = Searcher::new(config).unwrap();
    searcher.conditions_mut().set_channel_state("/front/ctrl", true);
    searcher.conditions_mut().set_channel_state("/wheel/speed", true);
    let mut source = VecSource::new(records);
    let mut sink = MemorySink::new();
    let total = searcher.search(&mut source, &mut sink).unwrap();

    assert_eq!(total, 2);
    assert!(sink.emissions.iter().all(|e| e.channel == "/log"));
    let emitted: Vec<u64> = sink.matches().iter().map(|e| e.index).collect();
    assert_eq!(emitted, vec![1, 2]);
}

#[test]
fn test_condition_blocks_until_flag_set() {
    let mut config = SearchConfig::default();
    config.conditions = vec!["<channel /flag>.data == 1".to_string()];

    let records = vec![
        ("/data".to_string(), text_record("m1"), 10),
        ("/flag".to_string(), flag_record(0), 20),
        ("/data".to_string(), text_record("m2"), 30),
        ("/flag".to_string(), flag_record(1), 40),
        ("/data".to_string(), text_record("m3"), 50),
    ];

    let mut searcher = Searcher::new(config).unwrap();
    searcher.conditions_mut().set_channel_state("/flag", true);
    let mut source = VecSource::new(records);
    let mut sink = MemorySink::new();
    let total = searcher.search(&mut source, &mut sink).unwrap();

    // Only the record arriving after the flag went high passes the gate.
    assert_eq!(total, 1);
    assert_eq!(sink.matches().len(), 1);
    assert_eq!(sink.matches()[0].index, 3);
}

#[test]
fn test_negative_subscript_reaches_previous_record() {
    let mut config = SearchConfig::default();
    config.conditions = vec!["<channel /flag>[-2].data == 1".to_string()];

    let records = vec![
        ("/flag".to_string(), flag_record(1), 10),
        ("/flag".to_string(), flag_record(0), 20),
        ("/data".to_string(), text_record("m1"), 30),
    ];

    let mut searcher = Searcher::new(config).unwrap();
    searcher.conditions_mut().set_channel_state("/flag", true);
    let mut source = VecSource::new(records);
    let mut sink = MemorySink::new();
    let total = searcher.search(&mut source, &mut sink).unwrap();

    // The latest flag value is 0, but [-2] looks one record back.
    assert_eq!(total, 1);
}

#[test]
fn test_unmatched_glob_gates_false_without_error() {
    let mut config = SearchConfig::default();
    config.conditions = vec!["<channel */absent>.flag".to_string()];

    let records = vec![("/data".to_string(), text_record("m1"), 10)];
    let mut searcher = Searcher::new(config).unwrap();
    let mut source = VecSource::new(records);
    let mut sink = MemorySink::new();
    let total = searcher.search(&mut source, &mut sink).unwrap();

    assert_eq!(total, 0);
    assert!(sink.emissions.is_empty());
}

#[test]
fn test_missing_field_surfaces_condition_error() {
    let mut config = SearchConfig::default();
    config.conditions = vec!["<channel /flag>.missing == 1".to_string()];

    let records = vec![
        ("/flag".to_string(), flag_record(1), 10),
        ("/data".to_string(), text_record("m1"), 20),
    ];
    let mut searcher = Searcher::new(config).unwrap();
    searcher.conditions_mut().set_channel_state("/flag", true);
    let mut source = VecSource::new(records);
    let mut sink = MemorySink::new();
    let result = searcher.search(&mut source, &mut sink);

    assert!(matches!(result, Err(GrepError::ConditionError { .. })));
}

#[test]
fn test_current_record_accessible_in_condition() {
    let mut config = SearchConfig::default();
    config.conditions = vec!["record.value > 10".to_string()];

    let reading = |value: i64| {
        Record::new("sensor/Reading").with_field("value", FieldValue::Integer(value))
    };
    let records = vec![
        ("/sensor".to_string(), reading(5), 10),
        ("/sensor".to_string(), reading(15), 20),
    ];
    let mut searcher = Searcher::new(config).unwrap();
    let mut source = VecSource::new(records);
    let mut sink = MemorySink::new();
    let total = searcher.search(&mut source, &mut sink).unwrap();

    assert_eq!(total, 1);
    assert_eq!(sink.matches()[0].index, 2);
}
