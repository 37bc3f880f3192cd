use serde_json::{Map, Value as JsonValue};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use tracing::debug;

use crate::datatype::{Scalar, ValueType};
use crate::error::{MetaQueryError, Result};
use crate::field::FieldTypes;
use crate::normalize::Normalizer;
use crate::optimize::optimize;
use crate::term::Term;

/// Field sets may name other field sets; expansion stops at this depth.
const MAX_SET_NESTING: usize = 16;

///
/// Conjunction
///
/// AND of per-field terms, at most one term per field.
///
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Conjunction {
    terms: BTreeMap<String, Term>,
}

impl Conjunction {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single(field: impl Into<String>, term: Term) -> Self {
        let mut terms = BTreeMap::new();
        terms.insert(field.into(), term);
        Self { terms }
    }

    pub fn get(&self, field: &str) -> Option<&Term> {
        self.terms.get(field)
    }

    pub fn terms(&self) -> impl Iterator<Item = (&str, &Term)> {
        self.terms.iter().map(|(field, term)| (field.as_str(), term))
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.terms.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.terms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    /// AND one more term into the conjunction, merging with an existing
    /// term on the same field.
    pub fn and_term(&mut self, field: &str, term: Term) -> Result<()> {
        let merged = match self.terms.get(field) {
            Some(existing) => existing.and(&term).map_err(|e| e.on_field(field))?,
            None => term,
        };
        self.terms.insert(field.to_string(), merged);
        Ok(())
    }

    pub fn and(&self, other: &Self) -> Result<Self> {
        let mut merged = self.clone();
        for (field, term) in other.terms() {
            merged.and_term(field, term.clone())?;
        }
        Ok(merged)
    }

    pub fn remove(&mut self, field: &str) -> Option<Term> {
        self.terms.remove(field)
    }

    /// Every assignment satisfying `self` also satisfies `other`.
    pub fn implies(&self, other: &Self) -> bool {
        other.terms().all(|(field, wanted)| {
            self.get(field)
                .is_some_and(|term| term.implies(wanted))
        })
    }

    pub fn project(&self, keep: impl Fn(&str) -> bool) -> Self {
        Self {
            terms: self
                .terms
                .iter()
                .filter(|(field, _)| keep(field.as_str()))
                .map(|(field, term)| (field.clone(), term.clone()))
                .collect(),
        }
    }

    pub fn to_json(&self) -> JsonValue {
        JsonValue::Object(
            self.terms
                .iter()
                .map(|(field, term)| (field.clone(), term.to_json()))
                .collect::<Map<String, JsonValue>>(),
        )
    }
}

impl fmt::Display for Conjunction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let entries: Vec<String> = self
            .terms
            .iter()
            .map(|(field, term)| term.render(field))
            .collect();
        write!(f, "{}", entries.join(" AND "))
    }
}

impl FromIterator<(String, Term)> for Conjunction {
    /// Builds without merging: later terms on the same field replace earlier ones.
    fn from_iter<I: IntoIterator<Item = (String, Term)>>(iter: I) -> Self {
        Self {
            terms: iter.into_iter().collect(),
        }
    }
}

///
/// MetaQuery
///
/// A query in disjunctive normal form: satisfied when any of its
/// conjunctions is. A query without conjunctions matches nothing.
///
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MetaQuery {
    disjuncts: Vec<Conjunction>,
}

impl MetaQuery {
    pub fn new(disjuncts: Vec<Conjunction>) -> Self {
        Self { disjuncts }
    }

    /// The query with one unconstrained conjunction, matching everything.
    pub fn everything() -> Self {
        Self::new(vec![Conjunction::new()])
    }

    pub fn disjuncts(&self) -> &[Conjunction] {
        &self.disjuncts
    }

    pub fn into_disjuncts(self) -> Vec<Conjunction> {
        self.disjuncts
    }

    pub fn len(&self) -> usize {
        self.disjuncts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.disjuncts.is_empty()
    }

    pub fn fields(&self) -> BTreeSet<&str> {
        self.disjuncts.iter().flat_map(Conjunction::fields).collect()
    }

    pub fn or(mut self, other: Self) -> Self {
        self.disjuncts.extend(other.disjuncts);
        self
    }

    /// Cartesian product of the two disjunct lists. Pairs that contradict are
    /// dropped; only when every pair does is the contradiction reported.
    pub fn and(&self, other: &Self) -> Result<Self> {
        let mut disjuncts = Vec::new();
        let mut first_failure = None;
        for left in &self.disjuncts {
            for right in &other.disjuncts {
                match left.and(right) {
                    Ok(merged) => disjuncts.push(merged),
                    Err(e @ MetaQueryError::Contradiction { .. }) => {
                        first_failure.get_or_insert(e);
                    }
                    Err(e) => return Err(e),
                }
            }
        }
        match first_failure {
            Some(e) if disjuncts.is_empty() => Err(e),
            _ => Ok(Self::new(disjuncts)),
        }
    }

    /// AND with another query, then drop redundant disjuncts.
    pub fn combine(&self, other: &Self) -> Result<Self> {
        let combined = optimize(self.and(other)?);
        debug!("Combined query: {}", combined);
        Ok(combined)
    }

    /// Keep only the entries on fields accepted by `keep`. Each conjunction
    /// gets weaker, so the projection matches at least what `self` matches.
    pub fn project(&self, keep: impl Fn(&str) -> bool) -> Self {
        Self::new(self.disjuncts.iter().map(|c| c.project(&keep)).collect())
    }

    /// Replace equality entries on `FieldSet` fields by the members of the
    /// named set, looked up through `lookup`.
    pub fn expand_field_sets(
        &self,
        types: &FieldTypes,
        lookup: impl Fn(&str) -> Result<Option<Conjunction>>,
    ) -> Result<Self> {
        let mut expanded = Vec::with_capacity(self.disjuncts.len());
        for conjunction in &self.disjuncts {
            expanded.push(expand_conjunction(conjunction, types, &lookup, 0)?);
        }
        Ok(Self::new(expanded))
    }

    pub fn to_json(&self) -> JsonValue {
        JsonValue::Array(self.disjuncts.iter().map(Conjunction::to_json).collect())
    }

    /// Read the wire form back: a list of condition maps (or a single one).
    pub fn from_json(text: &str, normalizer: &Normalizer) -> Result<Self> {
        let value: JsonValue = serde_json::from_str(text)?;
        let maps = match value {
            JsonValue::Array(maps) => maps,
            object @ JsonValue::Object(_) => vec![object],
            other => {
                return Err(MetaQueryError::parse(
                    "Expected a list of condition maps",
                    other.to_string(),
                ));
            }
        };
        let mut query = Self::default();
        for map in &maps {
            query = query.or(normalizer.normalize_condition_map(map)?);
        }
        Ok(query)
    }
}

fn expand_conjunction(
    conjunction: &Conjunction,
    types: &FieldTypes,
    lookup: &impl Fn(&str) -> Result<Option<Conjunction>>,
    depth: usize,
) -> Result<Conjunction> {
    if depth > MAX_SET_NESTING {
        return Err(MetaQueryError::FieldDefinition(format!(
            "Field sets nested deeper than {MAX_SET_NESTING} levels"
        )));
    }
    let mut plain = Conjunction::new();
    let mut members = Vec::new();
    for (field, term) in conjunction.terms() {
        match (types.get(field), term) {
            (Some(ValueType::FieldSet), Term::Eq(Scalar::Str(set_name))) => {
                let set = lookup(set_name)?.ok_or_else(|| {
                    MetaQueryError::FieldDefinition(format!("Unknown field set '{set_name}'"))
                })?;
                members.push(expand_conjunction(&set, types, lookup, depth + 1)?);
            }
            _ => plain.and_term(field, term.clone())?,
        }
    }
    members
        .iter()
        .try_fold(plain, |merged, member| merged.and(member))
}

impl fmt::Display for MetaQuery {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let grouped = self.disjuncts.len() > 1;
        let rendered: Vec<String> = self
            .disjuncts
            .iter()
            .map(|c| {
                if grouped && c.len() > 1 {
                    format!("({c})")
                } else {
                    c.to_string()
                }
            })
            .collect();
        write!(f, "{}", rendered.join(" OR "))
    }
}

impl From<Conjunction> for MetaQuery {
    fn from(conjunction: Conjunction) -> Self {
        Self::new(vec![conjunction])
    }
}
