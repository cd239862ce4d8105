//! Boolean access policies over attribute literals.
//!
//! Policies are written as `A and (B or C)`. Operators are case-insensitive,
//! `and` binds tighter than `or`, and every literal is sanitized at parse
//! time, so `model:abc123 AND subscription` and `MODELABC123 and SUBSCRIPTION`
//! parse to the same tree.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use crate::attribute::Attribute;
use crate::error::{CoreError, Result};

/// A policy tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Policy {
    /// A single attribute literal.
    Attr(Attribute),
    /// Every child must be satisfied.
    And(Vec<Policy>),
    /// At least one child must be satisfied.
    Or(Vec<Policy>),
}

impl Policy {
    /// Parse a policy expression.
    pub fn parse(input: &str) -> Result<Self> {
        let tokens = tokenize(input)?;
        if tokens.is_empty() {
            return Err(CoreError::PolicyParse {
                offset: 0,
                message: "empty policy".into(),
            });
        }
        let mut parser = Parser { tokens, pos: 0 };
        let policy = parser.parse_or()?;
        if let Some((offset, tok)) = parser.tokens.get(parser.pos) {
            return Err(CoreError::PolicyParse {
                offset: *offset,
                message: format!("unexpected {}", tok),
            });
        }
        Ok(policy)
    }

    /// A conjunction of the given raw attributes.
    pub fn all_of<I, S>(attrs: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut children = attrs
            .into_iter()
            .map(|a| Attribute::new(a.as_ref()).map(Policy::Attr))
            .collect::<Result<Vec<_>>>()?;
        match children.len() {
            0 => Err(CoreError::PolicyParse {
                offset: 0,
                message: "empty attribute list".into(),
            }),
            1 => Ok(children.remove(0)),
            _ => Ok(Policy::And(children)),
        }
    }

    /// Leaf literals in left-to-right order, duplicates included.
    ///
    /// This is the order in which ciphertext leaf components are laid out.
    pub fn leaves(&self) -> Vec<&Attribute> {
        let mut out = Vec::new();
        self.collect_leaves(&mut out);
        out
    }

    fn collect_leaves<'a>(&'a self, out: &mut Vec<&'a Attribute>) {
        match self {
            Policy::Attr(a) => out.push(a),
            Policy::And(children) | Policy::Or(children) => {
                for child in children {
                    child.collect_leaves(out);
                }
            }
        }
    }

    /// Distinct literals mentioned anywhere in the policy.
    pub fn literals(&self) -> BTreeSet<Attribute> {
        self.leaves().into_iter().cloned().collect()
    }

    /// Number of leaves.
    pub fn leaf_count(&self) -> usize {
        match self {
            Policy::Attr(_) => 1,
            Policy::And(children) | Policy::Or(children) => {
                children.iter().map(Policy::leaf_count).sum()
            }
        }
    }

    /// Evaluate the policy against a set of held attributes.
    pub fn is_satisfied_by(&self, held: &BTreeSet<Attribute>) -> bool {
        match self {
            Policy::Attr(a) => held.contains(a),
            Policy::And(children) => children.iter().all(|c| c.is_satisfied_by(held)),
            Policy::Or(children) => children.iter().any(|c| c.is_satisfied_by(held)),
        }
    }

    /// Rewrite every literal, keeping the tree shape.
    pub fn map_literals<F>(&self, f: &mut F) -> Result<Policy>
    where
        F: FnMut(&Attribute) -> Result<Attribute>,
    {
        Ok(match self {
            Policy::Attr(a) => Policy::Attr(f(a)?),
            Policy::And(children) => Policy::And(
                children
                    .iter()
                    .map(|c| c.map_literals(f))
                    .collect::<Result<_>>()?,
            ),
            Policy::Or(children) => Policy::Or(
                children
                    .iter()
                    .map(|c| c.map_literals(f))
                    .collect::<Result<_>>()?,
            ),
        })
    }

    /// Threshold of this gate as `(k, n)`: AND is n-of-n, OR is 1-of-n, and a
    /// leaf is 1-of-1.
    pub fn threshold(&self) -> (usize, usize) {
        match self {
            Policy::Attr(_) => (1, 1),
            Policy::And(children) => (children.len(), children.len()),
            Policy::Or(children) => (1, children.len()),
        }
    }

    fn fmt_with_parent(&self, f: &mut fmt::Formatter<'_>, parent_is_and: bool) -> fmt::Result {
        match self {
            Policy::Attr(a) => write!(f, "{}", a),
            Policy::And(children) => join(f, children, " and ", true),
            Policy::Or(children) => {
                if parent_is_and {
                    f.write_str("(")?;
                    join(f, children, " or ", false)?;
                    f.write_str(")")
                } else {
                    join(f, children, " or ", false)
                }
            }
        }
    }
}

fn join(
    f: &mut fmt::Formatter<'_>,
    children: &[Policy],
    sep: &str,
    is_and: bool,
) -> fmt::Result {
    for (i, child) in children.iter().enumerate() {
        if i > 0 {
            f.write_str(sep)?;
        }
        child.fmt_with_parent(f, is_and)?;
    }
    Ok(())
}

impl fmt::Display for Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_with_parent(f, false)
    }
}

impl std::str::FromStr for Policy {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Parser
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    And,
    Or,
    Open,
    Close,
    Literal(String),
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::And => f.write_str("'and'"),
            Token::Or => f.write_str("'or'"),
            Token::Open => f.write_str("'('"),
            Token::Close => f.write_str("')'"),
            Token::Literal(s) => write!(f, "literal {:?}", s),
        }
    }
}

fn tokenize(input: &str) -> Result<Vec<(usize, Token)>> {
    let mut tokens = Vec::new();
    let mut chars = input.char_indices().peekable();

    while let Some(&(offset, c)) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
        } else if c == '(' {
            tokens.push((offset, Token::Open));
            chars.next();
        } else if c == ')' {
            tokens.push((offset, Token::Close));
            chars.next();
        } else {
            let mut word = String::new();
            while let Some(&(_, c)) = chars.peek() {
                if c.is_whitespace() || c == '(' || c == ')' {
                    break;
                }
                word.push(c);
                chars.next();
            }
            let token = match word.to_ascii_lowercase().as_str() {
                "and" => Token::And,
                "or" => Token::Or,
                _ => Token::Literal(word),
            };
            tokens.push((offset, token));
        }
    }

    Ok(tokens)
}

struct Parser {
    tokens: Vec<(usize, Token)>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(_, t)| t)
    }

    fn offset(&self) -> usize {
        self.tokens
            .get(self.pos)
            .map(|(o, _)| *o)
            .or_else(|| self.tokens.last().map(|(o, _)| *o + 1))
            .unwrap_or(0)
    }

    fn parse_or(&mut self) -> Result<Policy> {
        let mut children = vec![self.parse_and()?];
        while self.peek() == Some(&Token::Or) {
            self.pos += 1;
            children.push(self.parse_and()?);
        }
        Ok(flatten(children, false))
    }

    fn parse_and(&mut self) -> Result<Policy> {
        let mut children = vec![self.parse_atom()?];
        while self.peek() == Some(&Token::And) {
            self.pos += 1;
            children.push(self.parse_atom()?);
        }
        Ok(flatten(children, true))
    }

    fn parse_atom(&mut self) -> Result<Policy> {
        let offset = self.offset();
        match self.tokens.get(self.pos).map(|(_, t)| t.clone()) {
            Some(Token::Open) => {
                self.pos += 1;
                let inner = self.parse_or()?;
                if self.peek() != Some(&Token::Close) {
                    return Err(CoreError::PolicyParse {
                        offset: self.offset(),
                        message: "expected ')'".into(),
                    });
                }
                self.pos += 1;
                Ok(inner)
            }
            Some(Token::Literal(word)) => {
                self.pos += 1;
                let attr = Attribute::new(&word).map_err(|_| CoreError::PolicyParse {
                    offset,
                    message: format!("literal {:?} is empty after sanitization", word),
                })?;
                Ok(Policy::Attr(attr))
            }
            Some(other) => Err(CoreError::PolicyParse {
                offset,
                message: format!("unexpected {}", other),
            }),
            None => Err(CoreError::PolicyParse {
                offset,
                message: "unexpected end of policy".into(),
            }),
        }
    }
}

/// Collapse single-child gates and merge nested gates of the same kind.
fn flatten(mut children: Vec<Policy>, is_and: bool) -> Policy {
    if children.len() == 1 {
        return children.remove(0);
    }
    let mut flat = Vec::with_capacity(children.len());
    for child in children {
        match (child, is_and) {
            (Policy::And(inner), true) | (Policy::Or(inner), false) => flat.extend(inner),
            (other, _) => flat.push(other),
        }
    }
    if is_and {
        Policy::And(flat)
    } else {
        Policy::Or(flat)
    }
}
