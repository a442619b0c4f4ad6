//! Iterative parser for criteria expressions
//!
//! Each nesting level reads `operand [operator rightOperand]` terms separated by
//! logical operators. The first connective fixes the level; a different one
//! opens a new level that is chained onto the previous one as a
//! [`Criterion::Continuation`]. There is no precedence between `&&` and `||`:
//! `a && b || c` reads as `(a && b) || c`.

use std::str::FromStr;

use crate::error::{Error, Result};
use crate::lexer::{Token, TokenKind, Tokenizer};
use crate::model::{Comparison, Criteria, Criterion, LogicalOperator, Operator};

const LEFT_OPERAND: &[TokenKind] = &[
    TokenKind::JsonObject,
    TokenKind::JsonArray,
    TokenKind::Grouping,
    TokenKind::Quoted,
    TokenKind::Operand,
    TokenKind::Operator,
];
const AFTER_OPERAND: &[TokenKind] = &[
    TokenKind::Operator,
    TokenKind::LogicalOperator,
    TokenKind::Eof,
];
const AFTER_GROUP: &[TokenKind] = &[TokenKind::LogicalOperator, TokenKind::Eof];
const RIGHT_OPERAND: &[TokenKind] = &[
    TokenKind::Quoted,
    TokenKind::JsonObject,
    TokenKind::JsonArray,
    TokenKind::Operand,
    TokenKind::Eof,
];
const MATCH_OPERAND: &[TokenKind] = &[TokenKind::MatchExpression, TokenKind::Eof];

/// Parse a criteria expression
pub fn parse(expression: &str) -> Result<Criteria> {
    parse_body(expression, 0)
}

impl FromStr for Criteria {
    type Err = Error;

    fn from_str(expression: &str) -> Result<Self> {
        parse(expression)
    }
}

fn parse_body(expression: &str, offset: usize) -> Result<Criteria> {
    let mut tokenizer = Tokenizer::with_offset(expression, offset);
    let mut levels = vec![Criteria::default()];

    loop {
        let token = tokenizer.expect(LEFT_OPERAND, "operand or grouping expression")?;
        let mut leading_operator = None;
        let accepts = match token.kind {
            TokenKind::Grouping => {
                let body = &token.text[1..token.text.len() - 1];
                let group = parse_body(body, token.index + 1)?;
                let single_level = !group
                    .criteria
                    .iter()
                    .any(|c| matches!(c, Criterion::Continuation(_)));
                if levels.len() == 1 && levels[0].is_empty() && single_level {
                    levels[0] = group;
                } else {
                    push(&mut levels, Criterion::Group(group));
                }
                AFTER_GROUP
            }
            TokenKind::Operator => {
                push(&mut levels, Criterion::Comparison(Comparison::default()));
                leading_operator = Some(token);
                AFTER_OPERAND
            }
            _ => {
                let comparison = Comparison {
                    left_operand: Some(operand_text(&token)),
                    ..Comparison::default()
                };
                push(&mut levels, Criterion::Comparison(comparison));
                AFTER_OPERAND
            }
        };

        let token = match leading_operator {
            Some(token) => token,
            None => tokenizer.expect(accepts, "operator or logical conjunction")?,
        };
        let conjunction = match token.kind {
            TokenKind::Eof => break,
            TokenKind::Operator => {
                let Some(comparison) = current_comparison(&mut levels) else {
                    return Err(Error::illegal_token(token.index, "logical conjunction"));
                };
                let operator = apply_operator(comparison, &token)?;
                let kinds = match operator {
                    Operator::Matches | Operator::NotMatches => MATCH_OPERAND,
                    _ => RIGHT_OPERAND,
                };
                let right = tokenizer.expect(kinds, "right operand")?;
                if right.kind == TokenKind::Eof {
                    break;
                }
                comparison.right_operand = Some(operand_text(&right));

                let next = tokenizer.expect(AFTER_GROUP, "logical conjunction")?;
                if next.kind == TokenKind::Eof {
                    break;
                }
                next
            }
            _ => token,
        };

        let connective = LogicalOperator::from_symbol(conjunction.text)
            .ok_or_else(|| Error::illegal_token(conjunction.index, "&& or ||"))?;
        let Some(level) = levels.last_mut() else {
            break;
        };
        match level.logical_operator {
            None => level.logical_operator = Some(connective),
            Some(current) if current == connective => {}
            Some(_) => levels.push(Criteria::new(Some(connective))),
        }
    }

    let mut tail = levels.pop().unwrap_or_default();
    while let Some(mut parent) = levels.pop() {
        parent.criteria.push(Criterion::Continuation(tail));
        tail = parent;
    }
    Ok(tail)
}

fn push(levels: &mut [Criteria], criterion: Criterion) {
    if let Some(level) = levels.last_mut() {
        level.criteria.push(criterion);
    }
}

fn current_comparison(levels: &mut [Criteria]) -> Option<&mut Comparison> {
    match levels.last_mut()?.criteria.last_mut()? {
        Criterion::Comparison(comparison) if comparison.operator.is_none() => Some(comparison),
        _ => None,
    }
}

fn apply_operator(comparison: &mut Comparison, token: &Token<'_>) -> Result<Operator> {
    let mut operator = Operator::from_symbol(token.text)
        .ok_or_else(|| Error::illegal_token(token.index, "operator"))?;
    if let Some(left) = comparison.left_operand.as_mut() {
        if let Some(stripped) = left.strip_suffix('!') {
            operator = operator
                .negated()
                .ok_or_else(|| Error::illegal_token(token.index, "= or : after '!'"))?;
            *left = stripped.to_string();
        }
    }
    comparison.operator = Some(operator);
    Ok(operator)
}

fn operand_text(token: &Token<'_>) -> String {
    match token.kind {
        TokenKind::Quoted => token.text[1..token.text.len() - 1].to_string(),
        _ => token.text.to_string(),
    }
}
