//! Parsed criteria tree

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::lexer::is_operand_char;

/// Connective joining sibling criteria
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogicalOperator {
    /// `&&`
    #[serde(rename = "&&")]
    And,
    /// `||`
    #[serde(rename = "||")]
    Or,
}

impl LogicalOperator {
    /// Parse a connective from its symbol
    pub fn from_symbol(symbol: &str) -> Option<Self> {
        match symbol {
            "&&" => Some(Self::And),
            "||" => Some(Self::Or),
            _ => None,
        }
    }

    /// Symbol as written in an expression
    pub fn symbol(&self) -> &'static str {
        match self {
            Self::And => "&&",
            Self::Or => "||",
        }
    }
}

/// Comparison operator of a leaf criterion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operator {
    /// `=`
    Equal,
    /// `!=` or `<>`
    NotEqual,
    /// `>`
    Greater,
    /// `>=`
    GreaterOrEqual,
    /// `<`
    Less,
    /// `<=`
    LessOrEqual,
    /// `:` contains/regex/equality match
    Matches,
    /// `!:` negated match, written as a `!` suffix on the left operand
    NotMatches,
}

impl Operator {
    /// Parse an operator from its symbol
    pub fn from_symbol(symbol: &str) -> Option<Self> {
        Some(match symbol {
            "=" => Self::Equal,
            "!=" | "<>" => Self::NotEqual,
            ">" => Self::Greater,
            ">=" => Self::GreaterOrEqual,
            "<" => Self::Less,
            "<=" => Self::LessOrEqual,
            ":" => Self::Matches,
            _ => return None,
        })
    }

    /// The operator produced by a `!` suffix on the left operand, if allowed
    pub fn negated(self) -> Option<Self> {
        match self {
            Self::Equal => Some(Self::NotEqual),
            Self::Matches => Some(Self::NotMatches),
            _ => None,
        }
    }

    /// Canonical symbol
    pub fn symbol(&self) -> &'static str {
        match self {
            Self::Equal => "=",
            Self::NotEqual => "!=",
            Self::Greater => ">",
            Self::GreaterOrEqual => ">=",
            Self::Less => "<",
            Self::LessOrEqual => "<=",
            Self::Matches => ":",
            Self::NotMatches => "!:",
        }
    }
}

/// Leaf comparison
///
/// Without an operator the comparison is a truthiness test on the left operand.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comparison {
    /// Left side; absent when the expression starts with an operator (`:!$value`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub left_operand: Option<String>,
    /// Operator, absent for a bare operand
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operator: Option<Operator>,
    /// Right side as written
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub right_operand: Option<String>,
}

/// One node of a criteria level
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Criterion {
    /// Leaf comparison
    Comparison(Comparison),
    /// Parenthesized sub-expression
    Group(Criteria),
    /// Tail of a level whose connective changed; folds with everything before it as seed
    Continuation(Criteria),
}

/// A level of criteria joined by one connective
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Criteria {
    /// Connective for this level, fixed by the first one seen
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logical_operator: Option<LogicalOperator>,
    /// Nodes in declared order
    #[serde(default)]
    pub criteria: Vec<Criterion>,
}

impl Criteria {
    /// Create an empty level with the given connective
    pub fn new(logical_operator: Option<LogicalOperator>) -> Self {
        Self {
            logical_operator,
            criteria: Vec::new(),
        }
    }

    /// Whether the level holds no criteria
    pub fn is_empty(&self) -> bool {
        self.criteria.is_empty()
    }
}

fn literal(text: &str) -> String {
    if text.starts_with('{')
        || text.starts_with('[')
        || (!text.is_empty() && text.chars().all(is_operand_char))
    {
        text.to_string()
    } else {
        format!("'{text}'")
    }
}

impl fmt::Display for Comparison {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let left = self.left_operand.as_deref().map(literal).unwrap_or_default();
        match self.operator {
            None => write!(f, "{left}"),
            // `!:` is only reachable through the operand suffix
            Some(Operator::NotMatches) => {
                write!(f, "{left}!: {}", self.right_operand.as_deref().unwrap_or_default())
            }
            Some(operator) => {
                if !left.is_empty() {
                    write!(f, "{left} ")?;
                }
                write!(f, "{}", operator.symbol())?;
                match &self.right_operand {
                    Some(right) if operator == Operator::Matches => write!(f, " {right}")?,
                    Some(right) => write!(f, " {}", literal(right))?,
                    None => {}
                }
                Ok(())
            }
        }
    }
}

impl fmt::Display for Criteria {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let connective = self.logical_operator.map_or("&&", |op| op.symbol());
        for (i, criterion) in self.criteria.iter().enumerate() {
            match criterion {
                Criterion::Continuation(tail) => {
                    let symbol = tail.logical_operator.map_or("&&", |op| op.symbol());
                    write!(f, " {symbol} {tail}")?;
                    continue;
                }
                _ if i > 0 => write!(f, " {connective} ")?,
                _ => {}
            }
            match criterion {
                Criterion::Comparison(comparison) => write!(f, "{comparison}")?,
                Criterion::Group(group) => write!(f, "({group})")?,
                Criterion::Continuation(_) => {}
            }
        }
        Ok(())
    }
}
