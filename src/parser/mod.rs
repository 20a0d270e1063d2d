//! Source text to statements.
//!
//! One statement per line. `#` starts a comment, whitespace separates tokens.
//! The head decides the statement kind (directive `.name`, label `name:`,
//! plain instruction call); every remaining token is classified by the first
//! matching literal rule. A line whose head or any argument fails to classify
//! is reported and discarded; parsing continues with the next line.

mod statement;

pub use statement::{ArgKind, Argument, Statement, StatementKind};

use std::io::BufRead;

use lazy_static::lazy_static;
use log::debug;
use regex::Regex;

use crate::errors::ErrorSink;

const COMMENT: char = '#';

lazy_static! {
    static ref RE_DIRECTIVE: Regex = Regex::new(r"^\.[A-Za-z_0-9]+$").unwrap();
    static ref RE_LABEL: Regex = Regex::new(r"^[A-Za-z_0-9]+:$").unwrap();
    static ref RE_IDENTIFIER: Regex = Regex::new(r"^[A-Za-z_0-9]+$").unwrap();
    static ref RE_CHAR: Regex = Regex::new(r"^'.'$").unwrap();
    static ref RE_DECIMAL: Regex = Regex::new(r"^[+-]?[1-9][0-9_]*$").unwrap();
    static ref RE_BINARY: Regex = Regex::new(r"^0[bB][_01]+$").unwrap();
    static ref RE_OCTAL: Regex = Regex::new(r"^[+-]?0[_0-8]*$").unwrap();
    static ref RE_HEX: Regex = Regex::new(r"^0[xX][_0-9a-fA-F]+$").unwrap();
    static ref RE_FLOAT: Regex = Regex::new(r"^[-+]?[0-9]+\.[0-9]+([eE][-+]?[0-9]+)?$").unwrap();
}

/// Classify one argument lexeme. Rule order matters: a bare `0` is octal, a
/// quoted character is its code point.
fn classify_argument(lexeme: &str) -> Result<Argument, String> {
    if RE_CHAR.is_match(lexeme) {
        if let Some(c) = lexeme.chars().nth(1) {
            return Ok(Argument::Integer(c as i128));
        }
    }
    if RE_DECIMAL.is_match(lexeme) {
        return parse_integer(lexeme, lexeme, 10);
    }
    if RE_BINARY.is_match(lexeme) {
        return parse_integer(lexeme, &lexeme[2..], 2);
    }
    if RE_OCTAL.is_match(lexeme) {
        return parse_integer(lexeme, lexeme, 8);
    }
    if RE_HEX.is_match(lexeme) {
        return parse_integer(lexeme, &lexeme[2..], 16);
    }
    if RE_FLOAT.is_match(lexeme) {
        return lexeme
            .parse::<f64>()
            .map(Argument::Float)
            .map_err(|e| format!("malformed float literal '{}': {}", lexeme, e));
    }
    if RE_IDENTIFIER.is_match(lexeme) {
        return Ok(Argument::Identifier(lexeme.to_string()));
    }
    Err(format!("unrecognised token '{}'", lexeme))
}

/// Underscores are digit separators; strip them before parsing.
fn parse_integer(lexeme: &str, digits: &str, radix: u32) -> Result<Argument, String> {
    let digits: String = digits.chars().filter(|c| *c != '_').collect();
    i128::from_str_radix(&digits, radix)
        .map(Argument::Integer)
        .map_err(|e| format!("malformed integer literal '{}': {}", lexeme, e))
}

pub struct Parser {
    errors: ErrorSink,
}

impl Parser {
    pub fn new(errors: &ErrorSink) -> Parser {
        Parser {
            errors: errors.child("parser"),
        }
    }

    /// Read every line of `reader` into statements. Lines that fail to
    /// classify are reported to the sink and skipped.
    pub fn run(&self, reader: impl BufRead) -> Vec<Statement> {
        let mut statements = Vec::new();

        for (i, line) in reader.lines().enumerate() {
            let index = i + 1;
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    self.errors
                        .write(format!("read failure at line {}: {}", index, e));
                    break;
                }
            };
            let clean = line.split(COMMENT).next().unwrap_or("").trim().to_string();
            if clean.is_empty() {
                continue;
            }
            if let Some(statement) = self.parse_line(index, &line, &clean) {
                statements.push(statement);
            }
        }

        debug!("parsed {} statements", statements.len());
        statements
    }

    fn parse_line(&self, index: usize, line: &str, clean: &str) -> Option<Statement> {
        let scope = self.errors.begin();

        let mut lexemes = clean.split_whitespace();
        let Some(head_lexeme) = lexemes.next() else {
            return None;
        };

        let arguments: Vec<Argument> = lexemes
            .enumerate()
            .filter_map(|(i, lexeme)| match classify_argument(lexeme) {
                Ok(argument) => Some(argument),
                Err(message) => {
                    self.errors
                        .write_line_at(line, index, format!("argument {}: {}", i, message));
                    None
                }
            })
            .collect();

        let head = self.classify_head(head_lexeme, index, line);

        if self.errors.failed(scope) {
            return None;
        }
        let (kind, head) = head?;

        if kind == StatementKind::LabelDeclare && !arguments.is_empty() {
            self.errors
                .write_line_at(line, index, "a label declaration takes no arguments");
            return None;
        }

        Some(Statement {
            kind,
            head,
            arguments,
            line_index: index,
            line: line.to_string(),
        })
    }

    fn classify_head(
        &self,
        lexeme: &str,
        index: usize,
        line: &str,
    ) -> Option<(StatementKind, String)> {
        if RE_DIRECTIVE.is_match(lexeme) {
            return Some((StatementKind::DirectiveUse, lexeme[1..].to_string()));
        }
        if RE_LABEL.is_match(lexeme) {
            let name = lexeme[..lexeme.len() - 1].to_string();
            return Some((StatementKind::LabelDeclare, name));
        }
        if RE_IDENTIFIER.is_match(lexeme) {
            return Some((StatementKind::InstructionCall, lexeme.to_string()));
        }
        self.errors.write_line_at(
            line,
            index,
            format!("unrecognised statement head '{}'", lexeme),
        );
        None
    }
}
