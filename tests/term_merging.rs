use metaquery::datatype::Scalar;
use metaquery::error::MetaQueryError;
use metaquery::term::{Op, Term};

fn int(i: i64) -> Scalar {
    Scalar::Int(i)
}

fn ints(values: &[i64]) -> Vec<Scalar> {
    values.iter().copied().map(Scalar::Int).collect()
}

fn is_contradiction<T: std::fmt::Debug>(result: Result<T, MetaQueryError>) -> bool {
    matches!(result, Err(MetaQueryError::Contradiction { .. }))
}

#[test]
fn operator_negation_table() {
    assert_eq!(Op::Eq.opposite(), Op::Ne);
    assert_eq!(Op::Ne.opposite(), Op::Eq);
    assert_eq!(Op::Gt.opposite(), Op::Le);
    assert_eq!(Op::Le.opposite(), Op::Gt);
    assert_eq!(Op::Lt.opposite(), Op::Ge);
    assert_eq!(Op::Ge.opposite(), Op::Lt);
}

#[test]
fn scalar_against_list() {
    let three = Term::Eq(int(3));
    assert_eq!(three.and(&Term::In(ints(&[1, 3]))), Ok(Term::Eq(int(3))));
    assert!(is_contradiction(three.and(&Term::In(ints(&[1, 2])))));
    assert_eq!(Term::In(ints(&[1, 3])).and(&three), Ok(Term::Eq(int(3))));
}

#[test]
fn scalar_against_exclusion() {
    let three = Term::Eq(int(3));
    assert_eq!(three.and(&Term::NotIn(ints(&[4]))), Ok(Term::Eq(int(3))));
    assert!(is_contradiction(three.and(&Term::NotIn(ints(&[3, 4])))));
}

#[test]
fn scalar_against_bound() {
    let three = Term::Eq(int(3));
    assert_eq!(three.and(&Term::Cmp(Op::Gt, int(2))), Ok(Term::Eq(int(3))));
    assert_eq!(Term::Cmp(Op::Le, int(3)).and(&three), Ok(Term::Eq(int(3))));
    assert!(is_contradiction(three.and(&Term::Cmp(Op::Ge, int(4)))));
}

#[test]
fn lists_intersect() {
    let merged = Term::In(ints(&[1, 2, 3])).and(&Term::In(ints(&[2, 3, 4])));
    assert_eq!(merged, Ok(Term::In(ints(&[2, 3]))));
    let single = Term::In(ints(&[1, 2])).and(&Term::In(ints(&[2, 5])));
    assert_eq!(single, Ok(Term::Eq(int(2))));
    assert!(is_contradiction(Term::In(ints(&[1, 2])).and(&Term::In(ints(&[3, 4])))));
}

#[test]
fn list_minus_exclusion() {
    let se = Term::In(vec!["SE1".into(), "SE2".into()]);
    assert_eq!(se.and(&Term::NotIn(vec!["SE2".into()])), Ok(Term::Eq("SE1".into())));
    assert!(is_contradiction(se.and(&Term::NotIn(vec!["SE1".into(), "SE2".into()]))));
}

#[test]
fn list_filtered_by_bound() {
    let merged = Term::In(ints(&[1, 5, 9])).and(&Term::Cmp(Op::Gt, int(4)));
    assert_eq!(merged, Ok(Term::In(ints(&[5, 9]))));
    assert!(is_contradiction(Term::In(ints(&[1, 2])).and(&Term::Cmp(Op::Gt, int(4)))));
}

#[test]
fn exclusions_accumulate() {
    let merged = Term::NotIn(ints(&[1])).and(&Term::NotIn(ints(&[2, 1])));
    assert_eq!(merged, Ok(Term::NotIn(ints(&[1, 2]))));
}

#[test]
fn exclusion_with_bound_keeps_both() {
    let merged = Term::NotIn(ints(&[1, 5, 9])).and(&Term::Cmp(Op::Gt, int(4)));
    assert_eq!(
        merged,
        Ok(Term::Excluding {
            values: ints(&[5, 9]),
            within: Box::new(Term::Cmp(Op::Gt, int(4))),
        })
    );
    // exclusions outside the bound carry no information
    let merged = Term::Cmp(Op::Gt, int(4)).and(&Term::NotIn(ints(&[1])));
    assert_eq!(merged, Ok(Term::Cmp(Op::Gt, int(4))));
}

#[test]
fn bounds_in_one_direction_keep_the_tighter() {
    assert_eq!(
        Term::Cmp(Op::Gt, int(3)).and(&Term::Cmp(Op::Ge, int(5))),
        Ok(Term::Cmp(Op::Ge, int(5)))
    );
    assert_eq!(
        Term::Cmp(Op::Gt, int(5)).and(&Term::Cmp(Op::Ge, int(5))),
        Ok(Term::Cmp(Op::Gt, int(5)))
    );
    assert_eq!(
        Term::Cmp(Op::Lt, int(3)).and(&Term::Cmp(Op::Le, int(1))),
        Ok(Term::Cmp(Op::Le, int(1)))
    );
}

#[test]
fn opposite_bounds_form_intervals() {
    assert_eq!(
        Term::Cmp(Op::Gt, int(1)).and(&Term::Cmp(Op::Lt, int(5))),
        Ok(Term::Range {
            lo_op: Op::Gt,
            lo: int(1),
            hi_op: Op::Lt,
            hi: int(5),
        })
    );
    assert_eq!(
        Term::Cmp(Op::Ge, int(5)).and(&Term::Cmp(Op::Le, int(5))),
        Ok(Term::Eq(int(5)))
    );
    assert!(is_contradiction(Term::Cmp(Op::Gt, int(5)).and(&Term::Cmp(Op::Le, int(5)))));
    assert!(is_contradiction(Term::Cmp(Op::Gt, int(100)).and(&Term::Cmp(Op::Lt, int(50)))));
}

#[test]
fn intervals_narrow_further() {
    let range = Term::Range {
        lo_op: Op::Gt,
        lo: int(1),
        hi_op: Op::Lt,
        hi: int(10),
    };
    assert_eq!(
        range.and(&Term::Cmp(Op::Ge, int(4))),
        Ok(Term::Range {
            lo_op: Op::Ge,
            lo: int(4),
            hi_op: Op::Lt,
            hi: int(10),
        })
    );
    let excluding = Term::Excluding {
        values: ints(&[5, 9]),
        within: Box::new(Term::Cmp(Op::Gt, int(4))),
    };
    assert_eq!(
        excluding.and(&Term::Cmp(Op::Lt, int(7))),
        Ok(Term::Excluding {
            values: ints(&[5]),
            within: Box::new(Term::Range {
                lo_op: Op::Gt,
                lo: int(4),
                hi_op: Op::Lt,
                hi: int(7),
            }),
        })
    );
    let pinned = Term::Excluding {
        values: ints(&[5]),
        within: Box::new(Term::Cmp(Op::Ge, int(4))),
    };
    assert_eq!(pinned.and(&Term::Cmp(Op::Le, int(4))), Ok(Term::Eq(int(4))));
}

#[test]
fn sentinels() {
    assert_eq!(Term::Any.and(&Term::Eq(int(3))), Ok(Term::Eq(int(3))));
    assert_eq!(Term::Cmp(Op::Lt, int(3)).and(&Term::Any), Ok(Term::Cmp(Op::Lt, int(3))));
    assert_eq!(Term::Missing.and(&Term::Missing), Ok(Term::Missing));
    assert!(is_contradiction(Term::Missing.and(&Term::Any)));
    assert!(is_contradiction(Term::Eq(int(3)).and(&Term::Missing)));
}

#[test]
fn incomparable_operands_are_unsupported() {
    let merged = Term::Cmp(Op::Gt, int(3)).and(&Term::Cmp(Op::Lt, "abc".into()));
    assert!(matches!(merged, Err(MetaQueryError::UnsupportedCombination { .. })));
}

#[test]
fn contradiction_names_both_terms() {
    let error = Term::Cmp(Op::Gt, int(100))
        .and(&Term::Cmp(Op::Lt, int(50)))
        .unwrap_err()
        .on_field("Size");
    let message = error.to_string();
    assert!(message.contains("Size > 100"), "{message}");
    assert!(message.contains("Size < 50"), "{message}");
}

#[test]
fn implication() {
    assert!(Term::Eq(int(3)).implies(&Term::In(ints(&[1, 3]))));
    assert!(Term::In(ints(&[1, 3])).implies(&Term::Cmp(Op::Ge, int(1))));
    assert!(Term::Cmp(Op::Gt, int(5)).implies(&Term::Cmp(Op::Gt, int(3))));
    assert!(!Term::Cmp(Op::Gt, int(3)).implies(&Term::Cmp(Op::Gt, int(5))));
    assert!(Term::NotIn(ints(&[1, 2])).implies(&Term::NotIn(ints(&[1]))));
    assert!(!Term::NotIn(ints(&[1])).implies(&Term::NotIn(ints(&[1, 2]))));
    assert!(Term::Eq(int(1)).implies(&Term::Any));
    assert!(!Term::Missing.implies(&Term::Any));
    assert!(Term::Missing.implies(&Term::Missing));
}
