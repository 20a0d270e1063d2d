//! Instruction packages: named, ordered lists of instruction signatures.
//!
//! A package file (`<name>.blp`) holds one instruction per line:
//!
//! ```text
//! add u16 u16 u16*     # name, then argument types; '*' marks a pointer
//! ```
//!
//! Blank lines and `#` comments are skipped. Line order is preserved, since
//! it feeds opcode assignment when packages are composed into environments.

use std::cell::RefCell;
use std::collections::HashMap;
use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::PathBuf;
use std::rc::Rc;

use anyhow::{anyhow, bail, Context, Result};

use crate::core::primitives::{PrimitiveRegistry, PrimitiveType};

pub const POINTER_SUFFIX: char = '*';
const FILE_EXT: &str = "blp";

/// One argument slot of an instruction signature.
///
/// `is_pointer` means the wire-level value is an address into the heap, not
/// that the argument has indirect addressing at runtime.
#[derive(Debug, Clone)]
pub struct InstructionArgument {
    pub primitive: Rc<PrimitiveType>,
    pub is_pointer: bool,
}

impl fmt::Display for InstructionArgument {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.primitive)?;
        if self.is_pointer {
            write!(f, "{}", POINTER_SUFFIX)?;
        }
        Ok(())
    }
}

#[derive(Debug)]
pub struct PackageInstruction {
    /// Owning package name.
    pub package: String,
    pub name: String,
    pub arguments: Vec<InstructionArgument>,
}

impl fmt::Display for PackageInstruction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}::{}(", self.package, self.name)?;
        for (i, argument) in self.arguments.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", argument)?;
        }
        write!(f, ")")
    }
}

#[derive(Debug)]
pub struct Package {
    pub name: String,
    pub instructions: Vec<Rc<PackageInstruction>>,
}

pub struct PackageRegistry {
    folder: RefCell<Option<PathBuf>>,
    cache: RefCell<HashMap<String, Rc<Package>>>,
    primitives: Rc<PrimitiveRegistry>,
}

impl PackageRegistry {
    pub fn new(primitives: Rc<PrimitiveRegistry>) -> PackageRegistry {
        PackageRegistry {
            folder: RefCell::new(None),
            cache: RefCell::new(HashMap::new()),
            primitives,
        }
    }

    pub fn set_folder(&self, folder: impl Into<PathBuf>) {
        *self.folder.borrow_mut() = Some(folder.into());
        self.cache.borrow_mut().clear();
    }

    pub fn get(&self, name: &str) -> Result<Rc<Package>> {
        if let Some(package) = self.cache.borrow().get(name) {
            return Ok(package.clone());
        }
        let package = Rc::new(self.load(name)?);
        self.cache
            .borrow_mut()
            .insert(name.to_string(), package.clone());
        Ok(package)
    }

    fn load(&self, name: &str) -> Result<Package> {
        let folder = self
            .folder
            .borrow()
            .clone()
            .ok_or_else(|| anyhow!("packages folder is not set"))?;
        let file = folder.join(format!("{}.{}", name, FILE_EXT));
        let text = fs::read_to_string(&file)
            .with_context(|| format!("cannot read package '{}'", file.display()))?;

        let mut instructions = Vec::new();
        let mut used_names = HashSet::new();

        for line in text.lines() {
            let line = line.split('#').next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }

            let mut lexemes = line.split_whitespace();
            let Some(instruction_name) = lexemes.next() else {
                continue;
            };
            if !used_names.insert(instruction_name.to_string()) {
                bail!(
                    "package '{}': redefinition of instruction '{}'",
                    file.display(),
                    instruction_name
                );
            }

            let arguments = lexemes
                .enumerate()
                .map(|(i, lexeme)| {
                    let is_pointer = lexeme.ends_with(POINTER_SUFFIX);
                    let type_name = lexeme.trim_end_matches(POINTER_SUFFIX);
                    let primitive = self.primitives.get(type_name).with_context(|| {
                        format!(
                            "package '{}': instruction '{}', argument {}",
                            file.display(),
                            instruction_name,
                            i
                        )
                    })?;
                    Ok(InstructionArgument {
                        primitive,
                        is_pointer,
                    })
                })
                .collect::<Result<Vec<_>>>()?;

            instructions.push(Rc::new(PackageInstruction {
                package: name.to_string(),
                name: instruction_name.to_string(),
                arguments,
            }));
        }

        Ok(Package {
            name: name.to_string(),
            instructions,
        })
    }
}
