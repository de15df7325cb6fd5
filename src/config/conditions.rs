//! Applicability predicates over knowledge-base facts.
//!
//! A condition is one or more clauses joined by `and`, each of the form
//! `attribute <op> literal`, e.g. `os_major_version >= 6 and os == 'Windows'`.

use std::cmp::Ordering;
use std::fmt;

use lazy_static::lazy_static;
use regex::Regex;

use crate::knowledge_base::KnowledgeBase;

lazy_static! {
    static ref CLAUSE: Regex =
        Regex::new(r"^\s*([A-Za-z_][A-Za-z0-9_.]*)\s*(==|!=|>=|<=|>|<)\s*(.+?)\s*$").unwrap();
    static ref AND: Regex = Regex::new(r"(?i)\s+and\s+").unwrap();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Eq,
    Ne,
    Ge,
    Le,
    Gt,
    Lt,
}

#[derive(Debug, Clone, PartialEq)]
enum Literal {
    Number(f64),
    Text(String),
}

#[derive(Debug, Clone, PartialEq)]
struct Clause {
    attribute: String,
    op: Op,
    value: Literal,
}

/// A parsed condition expression.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    source: String,
    clauses: Vec<Clause>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConditionParseError {
    pub expression: String,
    pub reason: String,
}

impl fmt::Display for ConditionParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid condition '{}': {}", self.expression, self.reason)
    }
}

impl Condition {
    pub fn parse(expression: &str) -> Result<Self, ConditionParseError> {
        let err = |reason: &str| ConditionParseError {
            expression: expression.to_string(),
            reason: reason.to_string(),
        };

        if expression.trim().is_empty() {
            return Err(err("empty expression"));
        }

        let mut clauses = Vec::new();
        for part in AND.split(expression.trim()) {
            let caps = CLAUSE
                .captures(part)
                .ok_or_else(|| err(&format!("cannot parse clause '{}'", part)))?;

            let op = match &caps[2] {
                "==" => Op::Eq,
                "!=" => Op::Ne,
                ">=" => Op::Ge,
                "<=" => Op::Le,
                ">" => Op::Gt,
                _ => Op::Lt,
            };

            clauses.push(Clause {
                attribute: caps[1].to_string(),
                op,
                value: parse_literal(&caps[3]),
            });
        }

        Ok(Condition {
            source: expression.to_string(),
            clauses,
        })
    }

    /// True when every clause holds. A clause over a missing attribute is false.
    pub fn evaluate(&self, kb: &KnowledgeBase) -> bool {
        self.clauses.iter().all(|clause| {
            let Some(actual) = kb.attribute(&clause.attribute) else {
                return false;
            };
            let ordering = match &clause.value {
                Literal::Number(expected) => match actual.trim().parse::<f64>() {
                    Ok(actual) => actual.partial_cmp(expected),
                    Err(_) => None,
                },
                Literal::Text(expected) => Some(actual.as_str().cmp(expected.as_str())),
            };
            match ordering {
                Some(ordering) => compare(clause.op, ordering),
                None => false,
            }
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }
}

fn compare(op: Op, ordering: Ordering) -> bool {
    match op {
        Op::Eq => ordering == Ordering::Equal,
        Op::Ne => ordering != Ordering::Equal,
        Op::Ge => ordering != Ordering::Less,
        Op::Le => ordering != Ordering::Greater,
        Op::Gt => ordering == Ordering::Greater,
        Op::Lt => ordering == Ordering::Less,
    }
}

fn parse_literal(raw: &str) -> Literal {
    let raw = raw.trim();
    for quote in ['\'', '"'] {
        if raw.len() >= 2 && raw.starts_with(quote) && raw.ends_with(quote) {
            return Literal::Text(raw[1..raw.len() - 1].to_string());
        }
    }
    match raw.parse::<f64>() {
        Ok(n) => Literal::Number(n),
        Err(_) => Literal::Text(raw.to_string()),
    }
}

/// Evaluate a list of condition strings; all must hold. An empty list holds.
pub fn all_hold(conditions: &[String], kb: &KnowledgeBase) -> Result<bool, ConditionParseError> {
    for expression in conditions {
        if !Condition::parse(expression)?.evaluate(kb) {
            return Ok(false);
        }
    }
    Ok(true)
}
