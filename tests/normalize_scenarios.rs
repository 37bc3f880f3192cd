use serde_json::json;

use metaquery::datatype::{Scalar, ValueType, parse_timestamp};
use metaquery::error::MetaQueryError;
use metaquery::field::FieldTypes;
use metaquery::normalize::Normalizer;
use metaquery::query::{Conjunction, MetaQuery};
use metaquery::term::{Op, Term};

fn setup() -> Normalizer {
    let mut types = FieldTypes::default();
    for (field, value_type) in [
        ("Size", ValueType::Int),
        ("Run", ValueType::Int),
        ("Energy", ValueType::Float),
        ("Status", ValueType::String),
        ("SE", ValueType::String),
        ("Date", ValueType::Timestamp),
        ("Calib", ValueType::FieldSet),
    ] {
        types.insert(field.to_string(), value_type);
    }
    Normalizer::new(types)
}

fn conjunction(entries: Vec<(&str, Term)>) -> Conjunction {
    entries
        .into_iter()
        .map(|(field, term)| (field.to_string(), term))
        .collect()
}

fn ints(values: &[i64]) -> Vec<Scalar> {
    values.iter().copied().map(Scalar::Int).collect()
}

fn is_parse_error(result: Result<MetaQuery, MetaQueryError>) -> bool {
    matches!(result, Err(MetaQueryError::Parse { .. }))
}

#[test]
fn disjoint_bounds_are_a_contradiction() {
    let result = setup().normalize("Size > 100 AND Size < 50");
    assert!(matches!(result, Err(MetaQueryError::Contradiction { .. })), "{result:?}");
}

#[test]
fn alternatives_stay_separate() {
    let query = setup()
        .normalize("Status = 'raw' OR Status = 'calibrated'")
        .expect("query ok");
    assert_eq!(
        query,
        MetaQuery::new(vec![
            Conjunction::single("Status", Term::Eq("raw".into())),
            Conjunction::single("Status", Term::Eq("calibrated".into())),
        ])
    );
}

#[test]
fn missing_sentinel() {
    let query = setup().normalize("Tag = Missing").expect("query ok");
    assert_eq!(query, Conjunction::single("Tag", Term::Missing).into());
    let query = setup().normalize("NOT Tag = missing").expect("query ok");
    assert_eq!(query, Conjunction::single("Tag", Term::Any).into());
    let query = setup().normalize("Tag != 'ANY'").expect("query ok");
    assert_eq!(query, Conjunction::single("Tag", Term::Missing).into());
}

#[test]
fn sentinels_reject_ordering_and_lists() {
    assert!(is_parse_error(setup().normalize("Size > Missing")));
    assert!(is_parse_error(setup().normalize("SE = A, Any")));
}

#[test]
fn list_minus_excluded_member() {
    let query = setup()
        .normalize("SE = SE1, SE2 AND SE != SE2")
        .expect("query ok");
    assert_eq!(query, Conjunction::single("SE", Term::Eq("SE1".into())).into());
}

#[test]
fn lists_intersect() {
    let query = setup()
        .normalize("SE = A, B, C AND SE = B, C, D")
        .expect("query ok");
    assert_eq!(
        query,
        Conjunction::single("SE", Term::In(vec!["B".into(), "C".into()])).into()
    );
}

#[test]
fn not_binds_to_the_next_operand() {
    let query = setup().normalize("NOT Run = 1 AND Size = 2").expect("query ok");
    assert_eq!(
        query,
        conjunction(vec![
            ("Run", Term::NotIn(ints(&[1]))),
            ("Size", Term::Eq(Scalar::Int(2))),
        ])
        .into()
    );
}

#[test]
fn negated_group_follows_de_morgan() {
    let query = setup()
        .normalize("NOT (Run = 1 AND Size = 2)")
        .expect("query ok");
    assert_eq!(
        query,
        MetaQuery::new(vec![
            Conjunction::single("Run", Term::NotIn(ints(&[1]))),
            Conjunction::single("Size", Term::NotIn(ints(&[2]))),
        ])
    );
    let query = setup()
        .normalize("NOT (Run = 1 OR Run = 2)")
        .expect("query ok");
    assert_eq!(query, Conjunction::single("Run", Term::NotIn(ints(&[1, 2]))).into());
}

#[test]
fn double_negation_cancels() {
    let normalizer = setup();
    assert_eq!(
        normalizer.normalize("NOT NOT Run > 3").expect("query ok"),
        normalizer.normalize("Run > 3").expect("query ok")
    );
    assert_eq!(
        normalizer.normalize("NOT Size > 5").expect("query ok"),
        Conjunction::single("Size", Term::Cmp(Op::Le, Scalar::Int(5))).into()
    );
}

#[test]
fn and_binds_tighter_than_or() {
    let query = setup()
        .normalize("Run = 1 OR Run = 2 AND Size = 3")
        .expect("query ok");
    assert_eq!(
        query,
        MetaQuery::new(vec![
            Conjunction::single("Run", Term::Eq(Scalar::Int(1))),
            conjunction(vec![
                ("Run", Term::Eq(Scalar::Int(2))),
                ("Size", Term::Eq(Scalar::Int(3))),
            ]),
        ])
    );
}

#[test]
fn redundant_alternatives_are_dropped() {
    let query = setup()
        .normalize("Size > 10 OR Size > 100 AND Run = 1")
        .expect("query ok");
    assert_eq!(query, Conjunction::single("Size", Term::Cmp(Op::Gt, Scalar::Int(10))).into());
}

#[test]
fn legacy_text_without_connectives() {
    let normalizer = setup();
    assert_eq!(
        normalizer.normalize("Run = 1 Size > 3 SE = A, B").expect("query ok"),
        normalizer
            .normalize("Run = 1 AND Size > 3 AND SE = A, B")
            .expect("query ok")
    );
}

#[test]
fn malformed_text_is_rejected() {
    let normalizer = setup();
    for text in [
        "",
        "(Run = 1",
        "Run = 1)",
        "Run = 1 AND",
        "()",
        "Run 1",
        "Run =",
        "Run ! 1",
        "Size > 1, 2",
        "Calib > gold",
        "SE = 'open",
    ] {
        assert!(is_parse_error(normalizer.normalize(text)), "accepted {text:?}");
    }
}

#[test]
fn values_must_fit_the_declared_type() {
    let result = setup().normalize("Size = big");
    assert!(matches!(result, Err(MetaQueryError::Type { .. })), "{result:?}");
    let strict = setup().with_default_type(ValueType::Int);
    assert!(matches!(strict.normalize("Foo = x"), Err(MetaQueryError::Type { .. })));
    assert!(setup().normalize("Foo = x").is_ok());
}

#[test]
fn timestamps_are_parsed() {
    let query = setup().normalize("Date >= '2024-01-01'").expect("query ok");
    let midnight = parse_timestamp("2024-01-01 00:00:00").expect("timestamp");
    assert_eq!(
        query,
        Conjunction::single("Date", Term::Cmp(Op::Ge, Scalar::Timestamp(midnight))).into()
    );
}

#[test]
fn condition_maps() {
    let map = json!({
        "Size": {">": 5, "<=": 10},
        "SE": ["A", "B"],
        "Tag": "Missing",
        "Energy": 2
    });
    let query = setup().normalize_condition_map(&map).expect("query ok");
    assert_eq!(
        query,
        conjunction(vec![
            (
                "Size",
                Term::Range {
                    lo_op: Op::Gt,
                    lo: Scalar::Int(5),
                    hi_op: Op::Le,
                    hi: Scalar::Int(10),
                }
            ),
            ("SE", Term::In(vec!["A".into(), "B".into()])),
            ("Tag", Term::Missing),
            ("Energy", Term::Eq(Scalar::Float(2.0))),
        ])
        .into()
    );
    assert!(is_parse_error(setup().normalize_condition_map(&json!({"SE": []}))));
    assert!(is_parse_error(setup().normalize_condition_map(&json!({"Size": {"=~": 1}}))));
}

#[test]
fn wire_form_reads_back() {
    let normalizer = setup();
    let query = normalizer
        .normalize("(Size > 5 AND Size <= 10) OR SE != A, B")
        .expect("query ok");
    let text = query.to_json().to_string();
    assert_eq!(MetaQuery::from_json(&text, &normalizer).expect("json ok"), query);
}

#[test]
fn printed_queries_parse_back() {
    let normalizer = setup();
    let query = normalizer
        .normalize("Status = 'raw', 'cal' AND NOT Size >= 3 OR Tag = Missing")
        .expect("query ok");
    assert_eq!(
        query.to_string(),
        "(Size < 3 AND Status = 'cal', 'raw') OR Tag = Missing"
    );
    assert_eq!(normalizer.normalize(&query.to_string()).expect("query ok"), query);
}

#[test]
fn embedded_quotes_survive_printing() {
    let normalizer = setup();
    let query = normalizer
        .normalize(r#"Status = "it's", 'a ''b'' c'"#)
        .expect("query ok");
    assert_eq!(query.to_string(), "Status = 'a ''b'' c', 'it''s'");
    assert_eq!(normalizer.normalize(&query.to_string()).expect("query ok"), query);
}

#[test]
fn combining_queries() {
    let normalizer = setup();
    let left = normalizer.normalize("Run = 1, 2").expect("query ok");
    let right = normalizer.normalize("Run = 2, 3 OR Size > 1").expect("query ok");
    assert_eq!(
        left.combine(&right).expect("combined"),
        MetaQuery::new(vec![
            Conjunction::single("Run", Term::Eq(Scalar::Int(2))),
            conjunction(vec![
                ("Run", Term::In(ints(&[1, 2]))),
                ("Size", Term::Cmp(Op::Gt, Scalar::Int(1))),
            ]),
        ])
    );
    let other = normalizer.normalize("Run = 3").expect("query ok");
    assert!(matches!(
        normalizer.normalize("Run = 1").expect("query ok").combine(&other),
        Err(MetaQueryError::Contradiction { .. })
    ));
}

#[test]
fn contradicting_alternatives_are_dropped_in_products() {
    let query = setup()
        .normalize("(Run = 1 OR Run = 2) AND Run > 1")
        .expect("query ok");
    assert_eq!(query, Conjunction::single("Run", Term::Eq(Scalar::Int(2))).into());
}

#[test]
fn projection_weakens_each_conjunction() {
    let query = setup()
        .normalize("Run = 1 AND Foo = x OR Foo = y")
        .expect("query ok");
    let projected = query.project(|field| field == "Run");
    assert_eq!(
        projected,
        MetaQuery::new(vec![
            Conjunction::single("Run", Term::Eq(Scalar::Int(1))),
            Conjunction::new(),
        ])
    );
}

#[test]
fn field_sets_expand_into_members() {
    let normalizer = setup();
    let query = normalizer
        .normalize("Calib = gold AND Run > 1")
        .expect("query ok");
    let expanded = query
        .expand_field_sets(normalizer.types(), |name| {
            Ok((name == "gold").then(|| {
                conjunction(vec![
                    ("Run", Term::Eq(Scalar::Int(5))),
                    ("Status", Term::Eq("good".into())),
                ])
            }))
        })
        .expect("expanded");
    assert_eq!(
        expanded,
        conjunction(vec![
            ("Run", Term::Eq(Scalar::Int(5))),
            ("Status", Term::Eq("good".into())),
        ])
        .into()
    );
    let unknown = normalizer
        .normalize("Calib = silver")
        .expect("query ok")
        .expand_field_sets(normalizer.types(), |_| Ok(None));
    assert!(matches!(unknown, Err(MetaQueryError::FieldDefinition(_))));
}
