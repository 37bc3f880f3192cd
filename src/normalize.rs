//! Conversion of query text, tokens or condition maps into a [`MetaQuery`].
//!
//! The grammar, loosest binding first:
//!
//! ```text
//! or_expr  := and_expr ( OR and_expr )*
//! and_expr := unary ( AND unary )*
//! unary    := NOT unary | '(' or_expr ')' | atom
//! atom     := field op value ( ',' value )*
//! ```
//!
//! Negation is carried down as a flag instead of being materialized: an atom
//! reached under an odd number of `NOT`s gets the opposite operator, and the
//! connectives swap meaning (`AND` unions, `OR` multiplies out).

use serde_json::Value as JsonValue;
use tracing::debug;

use crate::datatype::{Scalar, Sentinel, ValueType};
use crate::error::{MetaQueryError, Result};
use crate::field::FieldTypes;
use crate::lexer::{Token, insert_implicit_and, tokenize};
use crate::optimize::optimize;
use crate::query::{Conjunction, MetaQuery};
use crate::term::{Op, Term};

#[derive(Clone, Debug)]
pub struct Normalizer {
    types: FieldTypes,
    default_type: ValueType,
    optimize: bool,
}

struct Cursor<'t> {
    tokens: &'t [Token],
    pos: usize,
}

impl<'t> Cursor<'t> {
    fn peek(&self) -> Option<&'t Token> {
        self.tokens.get(self.pos)
    }
    fn advance(&mut self) -> Option<&'t Token> {
        let token = self.tokens.get(self.pos);
        self.pos += 1;
        token
    }
    fn rest(&self) -> String {
        self.tokens
            .iter()
            .skip(self.pos)
            .map(Token::to_string)
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl Normalizer {
    pub fn new(types: FieldTypes) -> Self {
        Self {
            types,
            default_type: ValueType::String,
            optimize: true,
        }
    }
    pub fn with_default_type(mut self, default_type: ValueType) -> Self {
        self.default_type = default_type;
        self
    }
    pub fn with_optimize(mut self, optimize: bool) -> Self {
        self.optimize = optimize;
        self
    }
    pub fn types(&self) -> &FieldTypes {
        &self.types
    }
    /// Declared type of a field, or the default type when undeclared.
    pub fn value_type(&self, field: &str) -> ValueType {
        self.types.get(field).copied().unwrap_or(self.default_type)
    }

    /// Normalize query text. Text without any `AND`/`OR` is read in the
    /// legacy form where juxtaposed conditions are ANDed.
    pub fn normalize(&self, text: &str) -> Result<MetaQuery> {
        let tokens = insert_implicit_and(tokenize(text)?);
        let query = self.normalize_tokens(&tokens)?;
        debug!("Normalized '{}' into {}", text, query);
        Ok(query)
    }

    pub fn normalize_tokens(&self, tokens: &[Token]) -> Result<MetaQuery> {
        if tokens.is_empty() {
            return Err(MetaQueryError::parse("Empty query", ""));
        }
        let query = self.expression(tokens, false)?;
        Ok(if self.optimize { optimize(query) } else { query })
    }

    fn expression(&self, tokens: &[Token], negated: bool) -> Result<MetaQuery> {
        let mut cursor = Cursor { tokens, pos: 0 };
        let query = self.or_expr(&mut cursor, negated)?;
        match cursor.peek() {
            None => Ok(query),
            Some(Token::Close) => Err(MetaQueryError::parse("Unbalanced parenthesis", cursor.rest())),
            Some(_) => Err(MetaQueryError::parse("Unexpected token", cursor.rest())),
        }
    }

    fn join(left: MetaQuery, right: MetaQuery, multiply: bool) -> Result<MetaQuery> {
        if multiply {
            left.and(&right)
        } else {
            Ok(left.or(right))
        }
    }

    fn or_expr(&self, cursor: &mut Cursor, negated: bool) -> Result<MetaQuery> {
        let mut query = self.and_expr(cursor, negated)?;
        while cursor.peek() == Some(&Token::Or) {
            cursor.advance();
            let right = self.and_expr(cursor, negated)?;
            query = Self::join(query, right, negated)?;
        }
        Ok(query)
    }

    fn and_expr(&self, cursor: &mut Cursor, negated: bool) -> Result<MetaQuery> {
        let mut query = self.unary(cursor, negated)?;
        while cursor.peek() == Some(&Token::And) {
            cursor.advance();
            let right = self.unary(cursor, negated)?;
            query = Self::join(query, right, !negated)?;
        }
        Ok(query)
    }

    fn unary(&self, cursor: &mut Cursor, negated: bool) -> Result<MetaQuery> {
        match cursor.peek() {
            Some(Token::Not) => {
                cursor.advance();
                self.unary(cursor, !negated)
            }
            Some(Token::Open) => {
                let start = cursor.pos + 1;
                let mut depth = 0usize;
                let mut close = None;
                for (i, token) in cursor.tokens.iter().enumerate().skip(cursor.pos) {
                    match token {
                        Token::Open => depth += 1,
                        Token::Close => {
                            depth -= 1;
                            if depth == 0 {
                                close = Some(i);
                                break;
                            }
                        }
                        _ => {}
                    }
                }
                let close =
                    close.ok_or_else(|| MetaQueryError::parse("Unbalanced parenthesis", cursor.rest()))?;
                if close == start {
                    return Err(MetaQueryError::parse("Empty group", cursor.rest()));
                }
                let group = self.expression(&cursor.tokens[start..close], negated)?;
                cursor.pos = close + 1;
                Ok(group)
            }
            Some(Token::Word(_) | Token::Quoted(_)) => self.atom(cursor, negated),
            Some(_) => Err(MetaQueryError::parse("Unexpected token", cursor.rest())),
            None => Err(MetaQueryError::parse("Dangling operator at end of query", "")),
        }
    }

    fn atom(&self, cursor: &mut Cursor, negated: bool) -> Result<MetaQuery> {
        let fragment = cursor.rest();
        let field = match cursor.advance() {
            Some(Token::Word(field) | Token::Quoted(field)) => field.clone(),
            _ => return Err(MetaQueryError::parse("Expected a field name", fragment)),
        };
        let op = match cursor.advance() {
            Some(Token::Op(op)) => *op,
            _ => return Err(MetaQueryError::parse("Expected an operator", fragment)),
        };
        let mut values = Vec::new();
        loop {
            match cursor.advance() {
                Some(Token::Word(value) | Token::Quoted(value)) => values.push(value.clone()),
                _ => return Err(MetaQueryError::parse("Expected a value", fragment)),
            }
            if cursor.peek() == Some(&Token::Comma) {
                cursor.advance();
            } else {
                break;
            }
        }
        let op = if negated { op.opposite() } else { op };
        let term = self.atom_term(&field, op, &values, &fragment)?;
        Ok(Conjunction::single(field, term).into())
    }

    fn atom_term(&self, field: &str, op: Op, values: &[String], fragment: &str) -> Result<Term> {
        if let [value] = values {
            if let Some(sentinel) = Sentinel::recognize(value) {
                return Term::sentinel(op, sentinel).ok_or_else(|| {
                    MetaQueryError::parse(format!("Operator {op} cannot be used with {value}"), fragment)
                });
            }
        }
        let mut scalars = Vec::with_capacity(values.len());
        for value in values {
            if Sentinel::recognize(value).is_some() {
                return Err(MetaQueryError::parse("Reserved value inside a list", fragment));
            }
            scalars.push(self.typed(field, Scalar::from(value.as_str()))?);
        }
        self.build_term(field, op, scalars, fragment)
    }

    fn build_term(&self, field: &str, op: Op, mut scalars: Vec<Scalar>, fragment: &str) -> Result<Term> {
        if op.is_ordering() && !self.value_type(field).is_ordered() {
            return Err(MetaQueryError::parse(
                format!("Operator {op} is not defined for {}", self.value_type(field)),
                fragment,
            ));
        }
        if scalars.len() == 1 {
            return Ok(Term::scalar(op, scalars.remove(0)));
        }
        Term::list(op, scalars)
            .ok_or_else(|| MetaQueryError::parse(format!("Operator {op} does not accept a list"), fragment))
    }

    fn typed(&self, field: &str, raw: Scalar) -> Result<Scalar> {
        let expected = self.value_type(field);
        raw.coerce(expected).ok_or_else(|| MetaQueryError::Type {
            field: field.to_string(),
            value: raw.to_string(),
            expected: expected.to_string(),
        })
    }

    fn json_scalar(&self, field: &str, value: &JsonValue) -> Result<Scalar> {
        let raw = Scalar::from_json(value)
            .ok_or_else(|| MetaQueryError::parse("Unsupported value", value.to_string()))?;
        self.typed(field, raw)
    }

    fn json_term(&self, field: &str, op: Op, operand: &JsonValue) -> Result<Term> {
        let fragment = format!("{field} {op} {operand}");
        if let Some(sentinel) = operand.as_str().and_then(Sentinel::recognize) {
            return Term::sentinel(op, sentinel).ok_or_else(|| {
                MetaQueryError::parse(format!("Operator {op} cannot be used with {operand}"), fragment)
            });
        }
        match operand {
            JsonValue::Array(items) if items.is_empty() => {
                Err(MetaQueryError::parse("Empty list", fragment))
            }
            JsonValue::Array(items) => {
                let scalars = items
                    .iter()
                    .map(|item| self.json_scalar(field, item))
                    .collect::<Result<Vec<_>>>()?;
                self.build_term(field, op, scalars, &fragment)
            }
            scalar => {
                let value = self.json_scalar(field, scalar)?;
                self.build_term(field, op, vec![value], &fragment)
            }
        }
    }

    /// Normalize a raw per-field condition map: a scalar means equality, a
    /// list means membership, an object maps operators to operands which
    /// must all hold.
    pub fn normalize_condition_map(&self, map: &JsonValue) -> Result<MetaQuery> {
        let JsonValue::Object(entries) = map else {
            return Err(MetaQueryError::parse("Expected a condition map", map.to_string()));
        };
        let mut conjunction = Conjunction::new();
        for (field, condition) in entries {
            match condition {
                JsonValue::Object(ops) => {
                    for (symbol, operand) in ops {
                        let op = Op::from_symbol(symbol)
                            .ok_or_else(|| MetaQueryError::parse("Bad operator", symbol.clone()))?;
                        conjunction.and_term(field, self.json_term(field, op, operand)?)?;
                    }
                }
                other => conjunction.and_term(field, self.json_term(field, Op::Eq, other)?)?,
            }
        }
        Ok(conjunction.into())
    }
}
