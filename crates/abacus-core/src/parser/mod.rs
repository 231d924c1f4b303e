//! Recursive-descent parser for infix arithmetic expressions.
//!
//! Grammar (standard precedence, left-associative):
//!
//! ```text
//! expression := term (('+' | '-') term)*
//! term       := factor (('*' | '/') factor)*
//! factor     := number | '(' expression ')'
//! number     := digits ('.' digits)?
//! ```
//!
//! Whitespace between tokens is ignored. Literals parse as `f64`.
//! Division by zero is not a parse concern; it surfaces in the worker.

use std::fmt;

use thiserror::Error;

use abacus_db::models::Operator;

/// Errors produced while parsing an expression.
///
/// Positions are byte offsets into the input.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("empty expression")]
    EmptyInput,

    #[error("unexpected character {found:?} at position {pos}")]
    UnexpectedChar { found: char, pos: usize },

    #[error("unexpected end of expression")]
    UnexpectedEnd,

    #[error("unclosed parenthesis opened at position {open_pos}")]
    UnclosedParen { open_pos: usize },

    #[error("invalid number {literal:?} at position {pos}")]
    InvalidNumber { literal: String, pos: usize },

    #[error("unexpected trailing input at position {pos}")]
    TrailingInput { pos: usize },
}

/// A node in the operator tree.
///
/// Leaves carry a literal value. Internal nodes carry an operator and two
/// children plus a value slot that the planner fills once the operation
/// has been computed; a filled internal node is treated as a leaf for
/// planning purposes.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Number(f64),
    Binary {
        op: Operator,
        left: Box<Node>,
        right: Box<Node>,
        value: Option<f64>,
    },
}

impl Node {
    /// Build an unvalued internal node.
    pub fn binary(op: Operator, left: Node, right: Node) -> Self {
        Self::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
            value: None,
        }
    }

    /// The node's numeric value, if known.
    pub fn value(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            Self::Binary { value, .. } => *value,
        }
    }
}

/// Canonical stringification: fully parenthesised infix.
///
/// Re-parsing the output yields a structurally equivalent tree.
impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::Binary {
                op, left, right, ..
            } => write!(f, "({left} {op} {right})"),
        }
    }
}

/// Parse an expression string into an operator tree.
pub fn parse(input: &str) -> Result<Node, ParseError> {
    let mut parser = Parser::new(input);
    parser.skip_whitespace();
    if parser.at_end() {
        return Err(ParseError::EmptyInput);
    }
    let node = parser.expression()?;
    parser.skip_whitespace();
    if !parser.at_end() {
        return Err(ParseError::TrailingInput { pos: parser.pos });
    }
    Ok(node)
}

struct Parser<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    fn at_end(&self) -> bool {
        self.pos >= self.input.len()
    }

    fn peek(&self) -> Option<char> {
        self.input[self.pos..].chars().next()
    }

    fn bump(&mut self, c: char) {
        self.pos += c.len_utf8();
    }

    fn skip_whitespace(&mut self) {
        while let Some(c) = self.peek() {
            if c.is_whitespace() {
                self.bump(c);
            } else {
                break;
            }
        }
    }

    /// expression := term (('+' | '-') term)*
    fn expression(&mut self) -> Result<Node, ParseError> {
        let mut node = self.term()?;
        loop {
            self.skip_whitespace();
            let (op, symbol) = match self.peek() {
                Some('+') => (Operator::Add, '+'),
                Some('-') => (Operator::Sub, '-'),
                _ => break,
            };
            self.bump(symbol);
            let right = self.term()?;
            node = Node::binary(op, node, right);
        }
        Ok(node)
    }

    /// term := factor (('*' | '/') factor)*
    fn term(&mut self) -> Result<Node, ParseError> {
        let mut node = self.factor()?;
        loop {
            self.skip_whitespace();
            let (op, symbol) = match self.peek() {
                Some('*') => (Operator::Mul, '*'),
                Some('/') => (Operator::Div, '/'),
                _ => break,
            };
            self.bump(symbol);
            let right = self.factor()?;
            node = Node::binary(op, node, right);
        }
        Ok(node)
    }

    /// factor := number | '(' expression ')'
    fn factor(&mut self) -> Result<Node, ParseError> {
        self.skip_whitespace();
        match self.peek() {
            None => Err(ParseError::UnexpectedEnd),
            Some('(') => {
                let open_pos = self.pos;
                self.bump('(');
                let node = self.expression()?;
                self.skip_whitespace();
                match self.peek() {
                    Some(')') => {
                        self.bump(')');
                        Ok(node)
                    }
                    Some(found) => Err(ParseError::UnexpectedChar {
                        found,
                        pos: self.pos,
                    }),
                    None => Err(ParseError::UnclosedParen { open_pos }),
                }
            }
            Some(c) if c.is_ascii_digit() => self.number(),
            Some(found) => Err(ParseError::UnexpectedChar {
                found,
                pos: self.pos,
            }),
        }
    }

    /// number := digits ('.' digits)?
    fn number(&mut self) -> Result<Node, ParseError> {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() {
                self.bump(c);
            } else {
                break;
            }
        }
        if self.peek() == Some('.') {
            self.bump('.');
            let mut fraction_digits = 0usize;
            while let Some(c) = self.peek() {
                if c.is_ascii_digit() {
                    self.bump(c);
                    fraction_digits += 1;
                } else {
                    break;
                }
            }
            // The grammar requires at least one digit after the dot.
            if fraction_digits == 0 {
                return Err(ParseError::InvalidNumber {
                    literal: self.input[start..self.pos].to_owned(),
                    pos: start,
                });
            }
        }
        let literal = &self.input[start..self.pos];
        literal
            .parse::<f64>()
            .map(Node::Number)
            .map_err(|_| ParseError::InvalidNumber {
                literal: literal.to_owned(),
                pos: start,
            })
    }
}
