use tracing::debug;

use crate::query::{Conjunction, MetaQuery};

/// Remove disjuncts made redundant by a broader one.
///
/// A conjunction is dropped when another surviving conjunction is implied by
/// it (`narrow OR broad == broad`). Of two equivalent conjunctions the
/// earlier one is kept. The surviving disjuncts keep their order, so running
/// the optimizer twice gives the same query.
pub fn optimize(query: MetaQuery) -> MetaQuery {
    let disjuncts = query.into_disjuncts();
    let before = disjuncts.len();
    let mut dropped = vec![false; before];
    for i in 0..before {
        let redundant = (0..before).any(|j| {
            j != i && !dropped[j] && subsumed_by(&disjuncts[i], &disjuncts[j], j < i)
        });
        dropped[i] = redundant;
    }
    let kept: Vec<Conjunction> = disjuncts
        .into_iter()
        .zip(dropped)
        .filter_map(|(conjunction, dropped)| (!dropped).then_some(conjunction))
        .collect();
    if kept.len() < before {
        debug!("Optimizer dropped {} of {} disjuncts", before - kept.len(), before);
    }
    MetaQuery::new(kept)
}

// `narrow` is redundant next to `broad`; ties go to the one seen first
fn subsumed_by(narrow: &Conjunction, broad: &Conjunction, broad_first: bool) -> bool {
    narrow.implies(broad) && (broad_first || !broad.implies(narrow))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datatype::Scalar;
    use crate::term::{Op, Term};

    fn gt(field: &str, bound: i64) -> Conjunction {
        Conjunction::single(field, Term::Cmp(Op::Gt, Scalar::Int(bound)))
    }

    #[test]
    fn keeps_first_of_equal_disjuncts() {
        let query = MetaQuery::new(vec![gt("Run", 3), gt("Run", 3)]);
        assert_eq!(optimize(query), MetaQuery::new(vec![gt("Run", 3)]));
    }

    #[test]
    fn unrelated_disjuncts_survive() {
        let query = MetaQuery::new(vec![gt("Run", 3), gt("Energy", 3)]);
        assert_eq!(optimize(query.clone()), query);
    }
}
