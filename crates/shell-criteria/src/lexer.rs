//! Tokenizer for the criteria language
//!
//! The tokenizer is driven by the parser: at every step the parser names the
//! token kinds it is prepared to accept, in priority order, and the tokenizer
//! returns the first one that matches at the current position.

use crate::error::{Error, Result};

/// Kinds of token the criteria grammar knows about
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    /// End of input
    Eof,
    /// A run of whitespace
    Whitespace,
    /// Identifier, variable reference or bare literal
    Operand,
    /// Single-quoted literal
    Quoted,
    /// Balanced `{...}` body
    JsonObject,
    /// Balanced `[...]` body
    JsonArray,
    /// Balanced `(...)` body
    Grouping,
    /// Comparison operator
    Operator,
    /// `&&` or `||`
    LogicalOperator,
    /// Raw right-hand side of a `:` comparison
    MatchExpression,
}

/// A token together with its position in the expression
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token<'a> {
    /// Matched kind
    pub kind: TokenKind,
    /// Matched text
    pub text: &'a str,
    /// Byte offset of the token within the whole expression
    pub index: usize,
}

const OPERATORS: [&str; 8] = [">=", "<=", "<>", "!=", "=", ">", "<", ":"];
const LOGICAL_OPERATORS: [&str; 2] = ["&&", "||"];

/// Single-pass tokenizer over a criteria expression
#[derive(Debug, Clone)]
pub struct Tokenizer<'a> {
    input: &'a str,
    position: usize,
    offset: usize,
}

impl<'a> Tokenizer<'a> {
    /// Create a tokenizer over the whole expression
    pub fn new(input: &'a str) -> Self {
        Self::with_offset(input, 0)
    }

    /// Create a tokenizer over a nested body that starts at `offset` in the outer expression
    pub fn with_offset(input: &'a str, offset: usize) -> Self {
        Self {
            input,
            position: 0,
            offset,
        }
    }

    /// Absolute index of the current position
    pub fn index(&self) -> usize {
        self.offset + self.position
    }

    /// Return the first of `kinds` that matches at the current position
    pub fn next_of(&mut self, kinds: &[TokenKind]) -> Option<Token<'a>> {
        let rest = &self.input[self.position..];
        for &kind in kinds {
            if let Some(len) = match_kind(kind, rest) {
                let token = Token {
                    kind,
                    text: &rest[..len],
                    index: self.index(),
                };
                self.position += len;
                return Some(token);
            }
        }
        None
    }

    /// Skip optional whitespace, then require one of `kinds`
    pub fn expect(&mut self, kinds: &[TokenKind], expected: &str) -> Result<Token<'a>> {
        self.next_of(&[TokenKind::Whitespace]);
        self.next_of(kinds)
            .ok_or_else(|| Error::illegal_token(self.index(), expected))
    }
}

fn match_kind(kind: TokenKind, rest: &str) -> Option<usize> {
    let len = match kind {
        TokenKind::Eof => return rest.is_empty().then_some(0),
        TokenKind::Whitespace => rest.len() - rest.trim_start().len(),
        TokenKind::Operand => match_operand(rest),
        TokenKind::Quoted => match_quoted(rest)?,
        TokenKind::JsonObject => balanced(rest, '{', '}')?,
        TokenKind::JsonArray => balanced(rest, '[', ']')?,
        TokenKind::Grouping => balanced(rest, '(', ')')?,
        TokenKind::Operator => OPERATORS
            .iter()
            .find(|op| rest.starts_with(*op))
            .map_or(0, |op| op.len()),
        TokenKind::LogicalOperator => LOGICAL_OPERATORS
            .iter()
            .find(|op| rest.starts_with(*op))
            .map_or(0, |op| op.len()),
        TokenKind::MatchExpression => match_expression(rest),
    };
    (len > 0).then_some(len)
}

pub(crate) fn is_operand_char(c: char) -> bool {
    c.is_alphanumeric() || "._$[]{}!-/\\+*".contains(c)
}

fn match_operand(rest: &str) -> usize {
    let len = rest
        .char_indices()
        .find(|(_, c)| !is_operand_char(*c))
        .map_or(rest.len(), |(i, _)| i);
    if len == 0 {
        return 0;
    }
    // call suffix such as `$HasResource(path)` stays part of the operand
    match balanced(&rest[len..], '(', ')') {
        Some(call) => len + call,
        None => len,
    }
}

fn match_quoted(rest: &str) -> Option<usize> {
    let body = rest.strip_prefix('\'')?;
    body.find('\'').map(|end| end + 2)
}

fn balanced(rest: &str, open: char, close: char) -> Option<usize> {
    if !rest.starts_with(open) {
        return None;
    }
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, c) in rest.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        if c == '"' {
            in_string = true;
        } else if c == open {
            depth += 1;
        } else if c == close {
            depth -= 1;
            if depth == 0 {
                return Some(i + c.len_utf8());
            }
        }
    }
    None
}

fn match_expression(rest: &str) -> usize {
    let mut depth = 0usize;
    let mut end = rest.len();
    for (i, c) in rest.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            _ if depth == 0
                && LOGICAL_OPERATORS.iter().any(|op| rest[i..].starts_with(op)) =>
            {
                end = i;
                break;
            }
            _ => {}
        }
    }
    rest[..end].trim_end().len()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(input: &str, plan: &[&[TokenKind]]) -> Vec<(TokenKind, String)> {
        let mut tokenizer = Tokenizer::new(input);
        plan.iter()
            .map(|kinds| {
                let token = tokenizer.expect(kinds, "test").unwrap();
                (token.kind, token.text.to_string())
            })
            .collect()
    }

    #[test]
    fn test_operand_and_operator() {
        let tokens = kinds(
            "$key1 >= 12",
            &[
                &[TokenKind::Operand],
                &[TokenKind::Operator],
                &[TokenKind::Operand],
                &[TokenKind::Eof],
            ],
        );
        assert_eq!(tokens[0], (TokenKind::Operand, "$key1".to_string()));
        assert_eq!(tokens[1], (TokenKind::Operator, ">=".to_string()));
        assert_eq!(tokens[2], (TokenKind::Operand, "12".to_string()));
    }

    #[test]
    fn test_operand_keeps_braces_and_bang() {
        let tokens = kinds("${a.b}!=1", &[&[TokenKind::Operand], &[TokenKind::Operator]]);
        assert_eq!(tokens[0].1, "${a.b}!");
        assert_eq!(tokens[1].1, "=");
    }

    #[test]
    fn test_balanced_bodies() {
        let mut tokenizer = Tokenizer::new(r#"{"a":"}"} ($x && ($y))"#);
        let object = tokenizer.expect(&[TokenKind::JsonObject], "object").unwrap();
        assert_eq!(object.text, r#"{"a":"}"}"#);
        let group = tokenizer.expect(&[TokenKind::Grouping], "group").unwrap();
        assert_eq!(group.text, "($x && ($y))");
        assert_eq!(group.index, 10);
    }

    #[test]
    fn test_match_expression_stops_at_logical_operator() {
        let mut tokenizer = Tokenizer::new(" /12 3/  || $z");
        let token = tokenizer.expect(&[TokenKind::MatchExpression], "match").unwrap();
        assert_eq!(token.text, "/12 3/");

        let mut tokenizer = Tokenizer::new("~/a(b||c)/ && $z");
        let token = tokenizer.expect(&[TokenKind::MatchExpression], "match").unwrap();
        assert_eq!(token.text, "~/a(b||c)/");
    }

    #[test]
    fn test_illegal_token_reports_index() {
        let mut tokenizer = Tokenizer::new("$a ?");
        tokenizer.expect(&[TokenKind::Operand], "operand").unwrap();
        let err = tokenizer
            .expect(&[TokenKind::Operator, TokenKind::Eof], "operator")
            .unwrap_err();
        assert_eq!(err.to_string(), "illegal token at 3, expected operator");
    }
}
