//! Constraints on a single field and the algebra used to combine them.
//!
//! A [`Term`] is what one conjunction says about one field. Two terms on the
//! same field are combined with [`Term::and`], which either produces a single
//! equivalent term or proves that nothing can satisfy both. Negation happens
//! earlier, on the operator of an atom, via [`Op::opposite`].

use serde_json::{Map, Value as JsonValue};
use std::cmp::Ordering;
use std::fmt;

use crate::datatype::{Scalar, Sentinel, ValueType};
use crate::error::{MetaQueryError, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Op {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

impl Op {
    pub const ALL: [Op; 6] = [Op::Eq, Op::Ne, Op::Gt, Op::Ge, Op::Lt, Op::Le];

    pub const fn symbol(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "!=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Lt => "<",
            Self::Le => "<=",
        }
    }
    pub fn from_symbol(symbol: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|op| op.symbol() == symbol)
    }
    /// The operator holding exactly when this one does not.
    pub const fn opposite(self) -> Self {
        match self {
            Self::Eq => Self::Ne,
            Self::Ne => Self::Eq,
            Self::Gt => Self::Le,
            Self::Le => Self::Gt,
            Self::Lt => Self::Ge,
            Self::Ge => Self::Lt,
        }
    }
    pub const fn is_ordering(self) -> bool {
        !matches!(self, Self::Eq | Self::Ne)
    }
    pub const fn is_lower_bound(self) -> bool {
        matches!(self, Self::Gt | Self::Ge)
    }
    pub const fn is_inclusive(self) -> bool {
        matches!(self, Self::Eq | Self::Ge | Self::Le)
    }
    /// Apply the operator as `left op right`. Orderings across unrelated
    /// kinds of values never hold.
    pub fn test(self, left: &Scalar, right: &Scalar) -> bool {
        if !left.comparable(right) {
            return self == Self::Ne;
        }
        let ordering = left.cmp(right);
        match self {
            Self::Eq => ordering == Ordering::Equal,
            Self::Ne => ordering != Ordering::Equal,
            Self::Gt => ordering == Ordering::Greater,
            Self::Ge => ordering != Ordering::Less,
            Self::Lt => ordering == Ordering::Less,
            Self::Le => ordering != Ordering::Greater,
        }
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.symbol())
    }
}

/// One side of an interval: the bounding operator and its value.
type Bound = (Op, Scalar);

#[derive(Clone, Debug, PartialEq)]
pub enum Term {
    /// Plain scalar equality.
    Eq(Scalar),
    /// A single ordering bound (`>`, `>=`, `<`, `<=`).
    Cmp(Op, Scalar),
    /// Membership in a sorted list of at least two values.
    In(Vec<Scalar>),
    /// Exclusion of a sorted, non-empty list of values.
    NotIn(Vec<Scalar>),
    /// Both a lower and an upper bound, lower strictly below upper.
    Range {
        lo_op: Op,
        lo: Scalar,
        hi_op: Op,
        hi: Scalar,
    },
    /// Values inside `within` (a `Cmp` or `Range`) except the listed ones.
    Excluding {
        values: Vec<Scalar>,
        within: Box<Term>,
    },
    /// The field must not be defined.
    Missing,
    /// The field must be defined, with any value.
    Any,
}

fn sorted(mut values: Vec<Scalar>) -> Vec<Scalar> {
    values.sort();
    values.dedup();
    values
}

fn quoted(value: &Scalar) -> String {
    match value {
        Scalar::Int(_) | Scalar::Float(_) => value.to_string(),
        _ => format!("'{}'", value.to_string().replace('\'', "''")),
    }
}

fn quoted_list(values: &[Scalar]) -> String {
    values.iter().map(quoted).collect::<Vec<_>>().join(", ")
}

impl Term {
    /// Term for `field op value` with a single operand.
    pub fn scalar(op: Op, value: Scalar) -> Self {
        match op {
            Op::Eq => Self::Eq(value),
            Op::Ne => Self::NotIn(vec![value]),
            _ => Self::Cmp(op, value),
        }
    }

    /// Term for `field op v1, v2, ...`; only `=` and `!=` accept lists.
    pub fn list(op: Op, values: Vec<Scalar>) -> Option<Self> {
        if values.is_empty() {
            return None;
        }
        match op {
            Op::Eq => Some(Self::one_of(values)),
            Op::Ne => Some(Self::NotIn(sorted(values))),
            _ => None,
        }
    }

    /// Term for `field op Missing|Any`; only `=` and `!=` apply.
    pub fn sentinel(op: Op, sentinel: Sentinel) -> Option<Self> {
        match (op, sentinel) {
            (Op::Eq, Sentinel::Missing) | (Op::Ne, Sentinel::Any) => Some(Self::Missing),
            (Op::Eq, Sentinel::Any) | (Op::Ne, Sentinel::Missing) => Some(Self::Any),
            _ => None,
        }
    }

    fn one_of(values: Vec<Scalar>) -> Self {
        let mut values = sorted(values);
        if values.len() == 1 {
            Self::Eq(values.remove(0))
        } else {
            Self::In(values)
        }
    }

    /// Whether a present value satisfies this term.
    pub fn admits(&self, value: &Scalar) -> bool {
        match self {
            Self::Eq(x) => Op::Eq.test(value, x),
            Self::Cmp(op, bound) => op.test(value, bound),
            Self::In(values) => values.iter().any(|x| Op::Eq.test(value, x)),
            Self::NotIn(values) => !values.iter().any(|x| Op::Eq.test(value, x)),
            Self::Range { lo_op, lo, hi_op, hi } => lo_op.test(value, lo) && hi_op.test(value, hi),
            Self::Excluding { values, within } => {
                !values.iter().any(|x| Op::Eq.test(value, x)) && within.admits(value)
            }
            Self::Missing => false,
            Self::Any => true,
        }
    }

    fn scalars(&self) -> Vec<&Scalar> {
        match self {
            Self::Eq(x) | Self::Cmp(_, x) => vec![x],
            Self::In(values) | Self::NotIn(values) => values.iter().collect(),
            Self::Range { lo, hi, .. } => vec![lo, hi],
            Self::Excluding { values, within } => {
                let mut all: Vec<&Scalar> = values.iter().collect();
                all.extend(within.scalars());
                all
            }
            Self::Missing | Self::Any => Vec::new(),
        }
    }

    /// Convert every operand into the given declared type.
    pub fn coerce(&self, value_type: ValueType) -> Option<Self> {
        let convert = |values: &[Scalar]| -> Option<Vec<Scalar>> {
            values.iter().map(|x| x.coerce(value_type)).collect()
        };
        Some(match self {
            Self::Eq(x) => Self::Eq(x.coerce(value_type)?),
            Self::Cmp(op, x) => Self::Cmp(*op, x.coerce(value_type)?),
            Self::In(values) => Self::one_of(convert(values)?),
            Self::NotIn(values) => Self::NotIn(sorted(convert(values)?)),
            Self::Range { lo_op, lo, hi_op, hi } => Self::Range {
                lo_op: *lo_op,
                lo: lo.coerce(value_type)?,
                hi_op: *hi_op,
                hi: hi.coerce(value_type)?,
            },
            Self::Excluding { values, within } => Self::Excluding {
                values: sorted(convert(values)?),
                within: Box::new(within.coerce(value_type)?),
            },
            Self::Missing => Self::Missing,
            Self::Any => Self::Any,
        })
    }

    fn interval(&self) -> Option<(Option<Bound>, Option<Bound>)> {
        match self {
            Self::Cmp(op, x) if op.is_lower_bound() => Some((Some((*op, x.clone())), None)),
            Self::Cmp(op, x) => Some((None, Some((*op, x.clone())))),
            Self::Range { lo_op, lo, hi_op, hi } => {
                Some((Some((*lo_op, lo.clone())), Some((*hi_op, hi.clone()))))
            }
            _ => None,
        }
    }

    fn from_interval(lower: Option<Bound>, upper: Option<Bound>) -> Option<Self> {
        match (lower, upper) {
            (Some((lo_op, lo)), Some((hi_op, hi))) => match lo.cmp(&hi) {
                Ordering::Greater => None,
                Ordering::Equal if lo_op.is_inclusive() && hi_op.is_inclusive() => {
                    Some(Self::Eq(lo))
                }
                Ordering::Equal => None,
                Ordering::Less => Some(Self::Range { lo_op, lo, hi_op, hi }),
            },
            (Some((op, x)), None) | (None, Some((op, x))) => Some(Self::Cmp(op, x)),
            (None, None) => Some(Self::Any),
        }
    }

    /// AND-combine two terms on the same field.
    ///
    /// Patterns are tried in both operand orders. A combination that no
    /// value can satisfy is a `Contradiction`; operands that cannot be
    /// compared with each other are an `UnsupportedCombination`.
    pub fn and(&self, other: &Self) -> Result<Self> {
        let unsupported = || MetaQueryError::UnsupportedCombination {
            left: self.to_string(),
            right: other.to_string(),
        };
        let left = self.scalars();
        if other
            .scalars()
            .iter()
            .any(|r| left.iter().any(|l| !l.comparable(r)))
        {
            return Err(unsupported());
        }
        Self::merge_ordered(self, other)
            .or_else(|| Self::merge_ordered(other, self))
            .unwrap_or_else(|| Err(unsupported()))
    }

    fn merge_ordered(left: &Self, right: &Self) -> Option<Result<Self>> {
        let contradiction = || MetaQueryError::contradiction(left, right);
        let merged = match (left, right) {
            (Self::Missing, Self::Missing) => Ok(Self::Missing),
            (Self::Missing, _) | (_, Self::Missing) => Err(contradiction()),
            (Self::Any, other) => Ok(other.clone()),
            (Self::Eq(x), other) => {
                if other.admits(x) {
                    Ok(Self::Eq(x.clone()))
                } else {
                    Err(contradiction())
                }
            }
            (Self::In(values), other) => {
                let kept: Vec<Scalar> = values.iter().filter(|x| other.admits(x)).cloned().collect();
                if kept.is_empty() {
                    Err(contradiction())
                } else {
                    Ok(Self::one_of(kept))
                }
            }
            (Self::NotIn(a), Self::NotIn(b)) => Ok(Self::NotIn(sorted([a.clone(), b.clone()].concat()))),
            (Self::NotIn(a), Self::Cmp(..) | Self::Range { .. }) => {
                Self::excluding(a.clone(), right.clone()).ok_or_else(contradiction)
            }
            (Self::NotIn(a), Self::Excluding { values, within }) => {
                Self::excluding([a.clone(), values.clone()].concat(), (**within).clone())
                    .ok_or_else(contradiction)
            }
            (Self::Excluding { values, within }, Self::Cmp(..) | Self::Range { .. }) => {
                within.and(right).and_then(|merged| {
                    Self::excluding(values.clone(), merged).ok_or_else(contradiction)
                })
            }
            (Self::Excluding { values: a, within: wa }, Self::Excluding { values: b, within: wb }) => {
                wa.and(wb).and_then(|merged| {
                    Self::excluding([a.clone(), b.clone()].concat(), merged).ok_or_else(contradiction)
                })
            }
            (Self::Cmp(..) | Self::Range { .. }, Self::Cmp(..) | Self::Range { .. }) => {
                let (lo_a, hi_a) = left.interval()?;
                let (lo_b, hi_b) = right.interval()?;
                Self::from_interval(tighter(lo_a, lo_b, true), tighter(hi_a, hi_b, false))
                    .ok_or_else(contradiction)
            }
            _ => return None,
        };
        Some(merged)
    }

    /// Exclusion list restricted to the values `within` still admits.
    fn excluding(values: Vec<Scalar>, within: Self) -> Option<Self> {
        if let Self::Eq(x) = &within {
            return (!values.iter().any(|v| Op::Eq.test(x, v))).then_some(within);
        }
        let kept: Vec<Scalar> = values.into_iter().filter(|x| within.admits(x)).collect();
        if kept.is_empty() {
            Some(within)
        } else {
            Some(Self::Excluding {
                values: sorted(kept),
                within: Box::new(within),
            })
        }
    }

    /// Whether every present value satisfying `self` also satisfies
    /// `other`. Conservative: `false` when not provable.
    pub fn implies(&self, other: &Self) -> bool {
        match (self, other) {
            (_, Self::Any) => !matches!(self, Self::Missing),
            (Self::Missing, Self::Missing) => true,
            (Self::Missing, _) | (_, Self::Missing) | (Self::Any, _) => false,
            (Self::Eq(x), _) => other.admits(x),
            (Self::In(values), _) => values.iter().all(|x| other.admits(x)),
            (_, Self::Eq(_) | Self::In(_)) => false,
            (Self::NotIn(a), Self::NotIn(b)) => b.iter().all(|x| a.contains(x)),
            (Self::NotIn(_), _) => false,
            (_, Self::NotIn(b)) => b.iter().all(|x| !self.admits(x)),
            (_, Self::Excluding { values, within }) => {
                self.implies(within) && self.implies(&Self::NotIn(values.clone()))
            }
            (Self::Excluding { within, .. }, _) => within.implies(other),
            _ => match (self.interval(), other.interval()) {
                (Some((lo_a, hi_a)), Some((lo_b, hi_b))) => {
                    within_bound(&lo_a, &lo_b, true) && within_bound(&hi_a, &hi_b, false)
                }
                _ => false,
            },
        }
    }

    fn parts(&self) -> Vec<String> {
        match self {
            Self::Eq(x) => vec![format!("= {}", quoted(x))],
            Self::Cmp(op, x) => vec![format!("{op} {}", quoted(x))],
            Self::In(values) => vec![format!("= {}", quoted_list(values))],
            Self::NotIn(values) => vec![format!("!= {}", quoted_list(values))],
            Self::Range { lo_op, lo, hi_op, hi } => vec![
                format!("{lo_op} {}", quoted(lo)),
                format!("{hi_op} {}", quoted(hi)),
            ],
            Self::Excluding { values, within } => {
                let mut parts = vec![format!("!= {}", quoted_list(values))];
                parts.extend(within.parts());
                parts
            }
            Self::Missing => vec!["= Missing".to_string()],
            Self::Any => vec!["= Any".to_string()],
        }
    }

    /// Query-language text for `field <term>`, parseable again.
    pub fn render(&self, field: &str) -> String {
        self.parts()
            .iter()
            .map(|part| format!("{field} {part}"))
            .collect::<Vec<_>>()
            .join(" AND ")
    }

    /// Wire form: a scalar for equality, otherwise an object of operator
    /// to operand (lists for `=`/`!=` membership).
    pub fn to_json(&self) -> JsonValue {
        let list = |values: &[Scalar]| JsonValue::Array(values.iter().map(Scalar::to_json).collect());
        let mut object = Map::new();
        match self {
            Self::Eq(x) => return x.to_json(),
            Self::Missing => return JsonValue::String("Missing".to_string()),
            Self::Any => return JsonValue::String("Any".to_string()),
            Self::Cmp(op, x) => {
                object.insert(op.symbol().to_string(), x.to_json());
            }
            Self::In(values) => {
                object.insert("=".to_string(), list(values));
            }
            Self::NotIn(values) => {
                object.insert("!=".to_string(), list(values));
            }
            Self::Range { lo_op, lo, hi_op, hi } => {
                object.insert(lo_op.symbol().to_string(), lo.to_json());
                object.insert(hi_op.symbol().to_string(), hi.to_json());
            }
            Self::Excluding { values, within } => {
                object.insert("!=".to_string(), list(values));
                if let JsonValue::Object(inner) = within.to_json() {
                    object.extend(inner);
                }
            }
        }
        JsonValue::Object(object)
    }
}

fn tighter(a: Option<Bound>, b: Option<Bound>, lower: bool) -> Option<Bound> {
    match (a, b) {
        (Some(a), Some(b)) => {
            let ordering = a.1.cmp(&b.1);
            let a_wins = match ordering {
                Ordering::Equal => !a.0.is_inclusive(),
                Ordering::Greater => lower,
                Ordering::Less => !lower,
            };
            Some(if a_wins { a } else { b })
        }
        (a, b) => a.or(b),
    }
}

// whether bound `a` is at least as restrictive as bound `b`
fn within_bound(a: &Option<Bound>, b: &Option<Bound>, lower: bool) -> bool {
    match (a, b) {
        (_, None) => true,
        (None, Some(_)) => false,
        (Some((op_a, x_a)), Some((op_b, x_b))) => {
            if !x_a.comparable(x_b) {
                return false;
            }
            match x_a.cmp(x_b) {
                Ordering::Equal => !op_a.is_inclusive() || op_b.is_inclusive(),
                Ordering::Greater => lower,
                Ordering::Less => !lower,
            }
        }
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.parts().join(" AND "))
    }
}
