use std::fmt;

use logos::Logos;

use crate::error::{MetaQueryError, Result};
use crate::term::Op;

/// Query tokens. Keywords are recognized in upper case only, so `and` is an
/// ordinary word.
#[derive(Logos, Clone, Debug, PartialEq)]
#[logos(skip r"\s+")]
pub enum Token {
    /// Bare field name or value.
    #[regex(r"[\w/.:+@-]+", |lex| lex.slice().to_string())]
    Word(String),
    /// Quoted value, taken verbatim.
    #[regex(r"'([^']|'')*'", |lex| unquote(lex.slice(), "'"))]
    #[regex(r#""([^"]|"")*""#, |lex| unquote(lex.slice(), "\""))]
    Quoted(String),
    #[token("=", |_| Op::Eq)]
    #[token("!=", |_| Op::Ne)]
    #[token("<", |_| Op::Lt)]
    #[token("<=", |_| Op::Le)]
    #[token(">", |_| Op::Gt)]
    #[token(">=", |_| Op::Ge)]
    Op(Op),
    #[token(",")]
    Comma,
    #[token("(")]
    Open,
    #[token(")")]
    Close,
    #[token("AND")]
    And,
    #[token("OR")]
    Or,
    #[token("NOT")]
    Not,
}

// a doubled quote inside a string stands for the quote itself
fn unquote(slice: &str, quote: &str) -> String {
    slice[1..slice.len() - 1].replace(&quote.repeat(2), quote)
}

impl Token {
    pub fn is_connective(&self) -> bool {
        matches!(self, Self::And | Self::Or)
    }
    /// A field name or value.
    pub fn is_operand(&self) -> bool {
        matches!(self, Self::Word(_) | Self::Quoted(_))
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Word(word) => write!(f, "{word}"),
            Self::Quoted(text) => write!(f, "'{}'", text.replace('\'', "''")),
            Self::Op(op) => write!(f, "{op}"),
            Self::Comma => write!(f, ","),
            Self::Open => write!(f, "("),
            Self::Close => write!(f, ")"),
            Self::And => write!(f, "AND"),
            Self::Or => write!(f, "OR"),
            Self::Not => write!(f, "NOT"),
        }
    }
}

/// Split query text into tokens.
///
/// Strings may be quoted with `'` or `"`; a doubled quote character inside a
/// string stands for the character itself.
pub fn tokenize(text: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    for (token, span) in Token::lexer(text).spanned() {
        match token {
            Ok(token) => tokens.push(token),
            Err(()) => {
                let rest = &text[span.start..];
                let message = if rest.starts_with(['\'', '"']) {
                    "Unterminated string"
                } else if rest.starts_with('!') {
                    "Bad operator"
                } else {
                    "Unexpected character"
                };
                return Err(MetaQueryError::parse(message, rest));
            }
        }
    }
    Ok(tokens)
}

/// Legacy queries list conditions side by side without connectives. When a
/// token stream carries no `AND`/`OR` at all, an `AND` is placed in front of
/// every condition after the first (ahead of any `NOT` or `(` leading it).
pub fn insert_implicit_and(tokens: Vec<Token>) -> Vec<Token> {
    if tokens.iter().any(Token::is_connective) {
        return tokens;
    }
    let mut starts = Vec::new();
    for i in 0..tokens.len() {
        let names_field = tokens[i].is_operand()
            && matches!(tokens.get(i + 1), Some(Token::Op(_)))
            && !matches!(i.checked_sub(1).map(|p| &tokens[p]), Some(Token::Op(_) | Token::Comma));
        if names_field {
            let mut start = i;
            while start > 0 && matches!(tokens[start - 1], Token::Not | Token::Open) {
                start -= 1;
            }
            starts.push(start);
        }
    }
    let mut tokens = tokens;
    for start in starts.into_iter().skip(1).rev() {
        tokens.insert(start, Token::And);
    }
    tokens
}
