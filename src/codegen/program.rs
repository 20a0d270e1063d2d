//! Products of code generation: variables, packed instructions, and the
//! aggregate program data handed to the bytecode emitter.

use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use crate::core::environments::{Environment, EnvironmentInstruction};
use crate::core::primitives::PrimitiveType;
use crate::parser::Argument;

/// A named heap-resident value with an allocated address.
#[derive(Debug)]
pub struct Variable {
    pub name: String,
    /// Byte offset from the image base.
    pub address: usize,
    pub primitive: Rc<PrimitiveType>,
    /// Packed initial value.
    pub value: Vec<u8>,
}

impl fmt::Display for Variable {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "({}) {}@{} = {}",
            self.primitive,
            self.name,
            self.address,
            self.primitive.describe(&self.value)
        )
    }
}

/// An environment instruction paired with its packed argument bytes.
#[derive(Debug)]
pub struct CodeInstruction {
    pub instruction: Rc<EnvironmentInstruction>,
    pub arguments: Vec<Vec<u8>>,
}

impl fmt::Display for CodeInstruction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}(", self.instruction.name)?;
        for (i, bytes) in self.arguments.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "0x")?;
            for byte in bytes {
                write!(f, "{:02X}", byte)?;
            }
        }
        write!(f, ")")
    }
}

/// Everything a compilation established besides the instruction stream.
#[derive(Debug)]
pub struct ProgramData {
    pub environment: Rc<Environment>,
    pub constants: BTreeMap<String, Argument>,
    /// Declaration order, which fixes the heap layout.
    pub variables: Vec<Variable>,
    pub labels: BTreeMap<String, usize>,
    /// Byte offset of the first code instruction from the image base.
    pub start_address: usize,
}
