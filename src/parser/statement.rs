//! Parsed statements and their argument values.

use std::fmt;

use bitflags::bitflags;

bitflags! {
    /// Which views an argument value offers. Directive parameter tables match
    /// these against each slot.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ArgKind: u8 {
        const INTEGER = 1 << 0;
        const FLOAT = 1 << 1;
        const IDENTIFIER = 1 << 2;

        const NUMBER = Self::INTEGER.bits() | Self::FLOAT.bits();
        const ANY = Self::NUMBER.bits() | Self::IDENTIFIER.bits();
    }
}

/// An argument token, classified at parse time.
///
/// Numeric variants expose both views: an integer also reads as the float of
/// the same value, a float also reads as its floor.
#[derive(Debug, Clone, PartialEq)]
pub enum Argument {
    Integer(i128),
    Float(f64),
    Identifier(String),
}

impl Argument {
    pub fn kind(&self) -> ArgKind {
        match self {
            Argument::Integer(_) | Argument::Float(_) => ArgKind::NUMBER,
            Argument::Identifier(_) => ArgKind::IDENTIFIER,
        }
    }

    pub fn as_int(&self) -> Option<i128> {
        match self {
            Argument::Integer(value) => Some(*value),
            Argument::Float(value) => Some(value.floor() as i128),
            Argument::Identifier(_) => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Argument::Integer(value) => Some(*value as f64),
            Argument::Float(value) => Some(*value),
            Argument::Identifier(_) => None,
        }
    }

    pub fn identifier(&self) -> Option<&str> {
        match self {
            Argument::Identifier(name) => Some(name),
            _ => None,
        }
    }
}

impl fmt::Display for Argument {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Argument::Integer(value) => write!(f, "{}", value),
            Argument::Float(value) => write!(f, "{}", value),
            Argument::Identifier(name) => write!(f, "<{}>", name),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    DirectiveUse,
    LabelDeclare,
    InstructionCall,
}

impl StatementKind {
    fn label(&self) -> &'static str {
        match self {
            StatementKind::DirectiveUse => "directive",
            StatementKind::LabelDeclare => "label",
            StatementKind::InstructionCall => "instruction",
        }
    }
}

/// One classified source line.
#[derive(Debug, Clone)]
pub struct Statement {
    pub kind: StatementKind,
    /// Head name with the leading `.` or trailing `:` stripped.
    pub head: String,
    pub arguments: Vec<Argument>,
    /// 1-based line number in the source file.
    pub line_index: usize,
    /// Original line text, kept for diagnostics.
    pub line: String,
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{:<11} @{:<4} {}",
            self.kind.label(),
            self.line_index,
            self.head
        )?;
        if self.kind != StatementKind::LabelDeclare {
            write!(f, "(")?;
            for (i, argument) in self.arguments.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{}", argument)?;
            }
            write!(f, ")")?;
        }
        Ok(())
    }
}
