use crate::datatype::Scalar;
use crate::error::{MetaQueryError, Result};
use crate::field::{AttributeMap, FieldTypes};
use crate::query::{Conjunction, MetaQuery};
use crate::term::Term;

/// What is left of a query once some of its fields are known.
#[derive(Clone, Debug, PartialEq)]
pub enum Outcome {
    /// Some conjunction holds on the known fields alone.
    Satisfied,
    /// Every conjunction fails on a known field.
    Unsatisfiable,
    /// The conjunctions still alive, reduced to their undecided fields.
    Pending(MetaQuery),
}

/// Check whether `attrs` satisfies the query. Fields not in `attrs` are
/// absent. A value that cannot be coerced to its field's type aborts the
/// evaluation with a type error.
pub fn evaluate(query: &MetaQuery, attrs: &AttributeMap, types: &FieldTypes) -> Result<bool> {
    for conjunction in query.disjuncts() {
        if holds(conjunction, attrs, types)? {
            return Ok(true);
        }
    }
    Ok(false)
}

fn holds(conjunction: &Conjunction, attrs: &AttributeMap, types: &FieldTypes) -> Result<bool> {
    for (field, term) in conjunction.terms() {
        if !term_holds(field, term, attrs.get(field), types)? {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Decide the fields present in `attrs` and keep the others open.
///
/// Unlike [`evaluate`], a field missing from `attrs` is not known to be
/// absent; it may still be defined further down the tree.
pub fn residual(query: &MetaQuery, attrs: &AttributeMap, types: &FieldTypes) -> Result<Outcome> {
    let mut pending = Vec::new();
    'disjuncts: for conjunction in query.disjuncts() {
        let mut open = Vec::new();
        for (field, term) in conjunction.terms() {
            match attrs.get(field) {
                Some(value) => {
                    if !term_holds(field, term, Some(value), types)? {
                        continue 'disjuncts;
                    }
                }
                None => open.push((field.to_string(), term.clone())),
            }
        }
        if open.is_empty() {
            return Ok(Outcome::Satisfied);
        }
        pending.push(open.into_iter().collect::<Conjunction>());
    }
    Ok(if pending.is_empty() {
        Outcome::Unsatisfiable
    } else {
        Outcome::Pending(MetaQuery::new(pending))
    })
}

fn term_holds(field: &str, term: &Term, value: Option<&Scalar>, types: &FieldTypes) -> Result<bool> {
    let value = match (term, value) {
        (Term::Missing, value) => return Ok(value.is_none()),
        (_, None) => return Ok(false),
        (Term::Any, Some(_)) => return Ok(true),
        (_, Some(value)) => value,
    };
    let value_type = types
        .get(field)
        .copied()
        .unwrap_or_else(|| value.value_type());
    let type_error = |shown: String| MetaQueryError::Type {
        field: field.to_string(),
        value: shown,
        expected: value_type.to_string(),
    };
    let value = value
        .coerce(value_type)
        .ok_or_else(|| type_error(value.to_string()))?;
    let term = term
        .coerce(value_type)
        .ok_or_else(|| type_error(term.to_string()))?;
    Ok(term.admits(&value))
}
