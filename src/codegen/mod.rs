//! Directive execution and instruction lowering.
//!
//! Generation is two passes over the statement stream. The first executes
//! directives (environment selection, constants, heap variables), pins label
//! offsets, and lays out every instruction, so that by its end all addresses
//! are known. The second resolves and packs argument values, which lets an
//! instruction jump to a label declared further down. Each statement runs
//! inside an error scope: a statement that reports anything contributes
//! nothing, and generation continues with the next one.

mod program;

pub use program::{CodeInstruction, ProgramData, Variable};

use std::collections::BTreeMap;
use std::collections::HashSet;
use std::rc::Rc;

use log::{debug, warn};

use crate::core::environments::{Environment, EnvironmentInstruction, EnvironmentRegistry};
use crate::core::packages::InstructionArgument;
use crate::core::primitives::{Encoding, PackError, PrimitiveRegistry, PrimitiveType};
use crate::errors::ErrorSink;
use crate::parser::{ArgKind, Argument, Statement, StatementKind};

/// A constant chased down to its numeric views.
#[derive(Clone, Copy)]
struct Resolved {
    int: i128,
    float: f64,
}

/// Work deferred to the packing pass, after all addresses are assigned.
enum Pending {
    /// An instruction call whose arguments still need resolving.
    Code {
        statement: usize,
        instruction: Rc<EnvironmentInstruction>,
    },
    /// A variable whose initial value still needs resolving.
    Init { statement: usize, variable: usize },
}

pub struct CodeGenerator {
    errors: ErrorSink,
    primitives: Rc<PrimitiveRegistry>,
    environments: Rc<EnvironmentRegistry>,

    env: Option<Rc<Environment>>,
    /// Where the next instruction would start, in bytes from the image base.
    mark_offset: usize,
    /// Where the next variable would sit, in bytes from the image base.
    variable_offset: usize,
    constants: BTreeMap<String, Argument>,
    variables: Vec<Variable>,
    variable_addresses: HashSet<usize>,
    labels: BTreeMap<String, usize>,
    /// Set once a label or instruction is seen; variables must come first.
    code_started: bool,
}

impl CodeGenerator {
    pub fn new(
        errors: &ErrorSink,
        primitives: Rc<PrimitiveRegistry>,
        environments: Rc<EnvironmentRegistry>,
    ) -> CodeGenerator {
        CodeGenerator {
            errors: errors.child("codegen"),
            primitives,
            environments,
            env: None,
            mark_offset: 0,
            variable_offset: 0,
            constants: BTreeMap::new(),
            variables: Vec::new(),
            variable_addresses: HashSet::new(),
            labels: BTreeMap::new(),
            code_started: false,
        }
    }

    /// Execute every statement. Returns the lowered instruction stream and,
    /// when an environment was selected, the program data for emission.
    pub fn run(mut self, statements: &[Statement]) -> (Vec<CodeInstruction>, Option<ProgramData>) {
        let mut pending: Vec<Pending> = Vec::new();

        for (index, statement) in statements.iter().enumerate() {
            let scope = self.errors.begin();
            match statement.kind {
                StatementKind::DirectiveUse => self.directive(statement, index, &mut pending),
                StatementKind::LabelDeclare => self.label(statement),
                StatementKind::InstructionCall => {
                    if let Some(instruction) = self.instruction_head(statement) {
                        if !self.errors.failed(scope) {
                            pending.push(Pending::Code {
                                statement: index,
                                instruction,
                            });
                        }
                    }
                }
            }
        }

        let mut instructions = Vec::new();
        for entry in &pending {
            let scope = self.errors.begin();
            match entry {
                Pending::Code {
                    statement,
                    instruction,
                } => {
                    let statement = &statements[*statement];
                    if let Some(code) = self.pack_instruction(statement, instruction.clone()) {
                        if !self.errors.failed(scope) {
                            instructions.push(code);
                        }
                    }
                }
                Pending::Init {
                    statement,
                    variable,
                } => {
                    let statement = &statements[*statement];
                    let primitive = self.variables[*variable].primitive.clone();
                    let Some(resolved) = self.resolve(&statement.arguments[2], statement) else {
                        continue;
                    };
                    match pack_resolved(resolved, &primitive) {
                        Ok(value) => self.variables[*variable].value = value,
                        Err(e) => self.write_at(statement, e),
                    }
                }
            }
        }

        debug!("generated {} code instructions", instructions.len());

        let data = match self.env {
            Some(environment) => Some(ProgramData {
                start_address: self.variable_offset,
                environment,
                constants: self.constants,
                variables: self.variables,
                labels: self.labels,
            }),
            None => {
                self.errors
                    .write("no environment selected: the '.env' directive is missing");
                None
            }
        };

        (instructions, data)
    }

    fn directive(&mut self, statement: &Statement, index: usize, pending: &mut Vec<Pending>) {
        let masks: &[ArgKind] = match statement.head.as_str() {
            "env" => &[ArgKind::IDENTIFIER],
            "def" => &[ArgKind::IDENTIFIER, ArgKind::ANY],
            "ptr" => &[ArgKind::IDENTIFIER, ArgKind::IDENTIFIER, ArgKind::ANY],
            unknown => {
                self.write_at(statement, format!("unknown directive '.{}'", unknown));
                return;
            }
        };

        if statement.arguments.len() != masks.len() {
            self.write_at(
                statement,
                format!(
                    "directive '.{}' takes {} argument(s), got {}",
                    statement.head,
                    masks.len(),
                    statement.arguments.len()
                ),
            );
            return;
        }
        for (i, (argument, mask)) in statement.arguments.iter().zip(masks).enumerate() {
            if !mask.intersects(argument.kind()) {
                self.write_at(
                    statement,
                    format!("argument {} of '.{}' cannot be {}", i, statement.head, argument),
                );
                return;
            }
        }

        match statement.head.as_str() {
            "env" => self.directive_env(statement),
            "def" => self.directive_def(statement),
            _ => self.directive_ptr(statement, index, pending),
        }
    }

    fn directive_env(&mut self, statement: &Statement) {
        if self.env.is_some() {
            self.write_at(statement, "'.env' may appear at most once");
            return;
        }
        let Some(name) = statement.arguments[0].identifier() else {
            return;
        };
        let environment = match self.environments.get(name) {
            Ok(environment) => environment,
            Err(e) => {
                self.write_at(statement, format!("{:#}", e));
                return;
            }
        };

        // Both cursors skip the heap prologue, which holds the start address.
        let prologue = environment.profile.pointer_heap.size;
        self.mark_offset = prologue;
        self.variable_offset = prologue;
        debug!(
            "environment '{}' selected: {} instructions, profile '{}'",
            name,
            environment.instructions.len(),
            environment.profile
        );
        self.env = Some(environment);
    }

    fn directive_def(&mut self, statement: &Statement) {
        let Some(name) = statement.arguments[0].identifier() else {
            return;
        };
        if let Some(kind) = self.name_in_use(name) {
            self.write_at(
                statement,
                format!("duplicate name '{}': already {}", name, kind),
            );
            return;
        }
        self.constants
            .insert(name.to_string(), statement.arguments[1].clone());
    }

    fn directive_ptr(&mut self, statement: &Statement, index: usize, pending: &mut Vec<Pending>) {
        let Some(environment) = self.require_environment(statement) else {
            return;
        };
        let (Some(name), Some(type_name)) = (
            statement.arguments[0].identifier(),
            statement.arguments[1].identifier(),
        ) else {
            return;
        };

        let primitive = match self.primitives.get(type_name) {
            Ok(primitive) => primitive,
            Err(e) => {
                self.write_at(statement, format!("{:#}", e));
                return;
            }
        };

        if self.code_started {
            self.write_at(
                statement,
                "variables must be declared before the first label or instruction",
            );
            return;
        }
        if let Some(kind) = self.name_in_use_by(name, Some(environment.as_ref())) {
            self.write_at(
                statement,
                format!("duplicate name '{}': already {}", name, kind),
            );
            return;
        }

        // A variable occupies a type-tag slot of heap-pointer width, then its
        // packed value. The value itself is filled in by the packing pass.
        let address = self.variable_offset;
        let occupied = environment.profile.pointer_heap.size + primitive.size;
        self.variable_offset += occupied;
        self.mark_offset += occupied;

        self.variable_addresses.insert(address);
        self.variables.push(Variable {
            name: name.to_string(),
            address,
            value: vec![0; primitive.size],
            primitive,
        });
        self.constants
            .insert(name.to_string(), Argument::Integer(address as i128));
        pending.push(Pending::Init {
            statement: index,
            variable: self.variables.len() - 1,
        });
    }

    fn label(&mut self, statement: &Statement) {
        if self.require_environment(statement).is_none() {
            return;
        }
        let name = &statement.head;
        if let Some(kind) = self.name_in_use(name) {
            self.write_at(
                statement,
                format!("duplicate name '{}': already {}", name, kind),
            );
            return;
        }
        self.code_started = true;
        self.constants
            .insert(name.clone(), Argument::Integer(self.mark_offset as i128));
        self.labels.insert(name.clone(), self.mark_offset);
    }

    /// Layout-pass half of an instruction call: look it up, check arity,
    /// and advance the mark cursor past it.
    fn instruction_head(&mut self, statement: &Statement) -> Option<Rc<EnvironmentInstruction>> {
        let environment = self.require_environment(statement)?;
        self.code_started = true;

        let Some(instruction) = environment.instruction(&statement.head).cloned() else {
            self.write_at(
                statement,
                format!("unknown instruction '{}'", statement.head),
            );
            return None;
        };

        if statement.arguments.len() != instruction.arguments.len() {
            self.write_at(
                statement,
                format!(
                    "instruction '{}' takes {} argument(s), got {}",
                    instruction.name,
                    instruction.arguments.len(),
                    statement.arguments.len()
                ),
            );
            return None;
        }

        self.mark_offset += instruction.size;
        Some(instruction)
    }

    /// Packing-pass half: every label and variable address is known by now.
    fn pack_instruction(
        &self,
        statement: &Statement,
        instruction: Rc<EnvironmentInstruction>,
    ) -> Option<CodeInstruction> {
        let mut packed = Vec::with_capacity(statement.arguments.len());
        for (slot, argument) in instruction.arguments.iter().zip(&statement.arguments) {
            packed.push(self.lower_argument(argument, slot, statement));
        }
        let arguments = packed.into_iter().collect::<Option<Vec<_>>>()?;

        Some(CodeInstruction {
            instruction,
            arguments,
        })
    }

    /// Resolve, validate and pack one instruction argument.
    fn lower_argument(
        &self,
        argument: &Argument,
        slot: &InstructionArgument,
        statement: &Statement,
    ) -> Option<Vec<u8>> {
        let resolved = self.resolve(argument, statement)?;

        if slot.is_pointer {
            let declared = resolved.int >= 0
                && self.variable_addresses.contains(&(resolved.int as usize));
            if !declared {
                // Packed anyway: raw addresses stay usable as jump targets.
                warn!(
                    "line {}: pointer argument {} does not refer to a declared variable",
                    statement.line_index, argument
                );
                self.errors.note(format!(
                    "line {} ('{}'): pointer argument {} does not refer to a declared variable",
                    statement.line_index,
                    statement.line.trim(),
                    argument
                ));
            }
        }

        match pack_resolved(resolved, &slot.primitive) {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                self.write_at(statement, e);
                None
            }
        }
    }

    /// Chase identifier aliases through the constants table until a numeric
    /// value is reached. Cycles and unknown names are reported.
    fn resolve(&self, argument: &Argument, statement: &Statement) -> Option<Resolved> {
        let mut current = argument.clone();
        let mut seen: HashSet<String> = HashSet::new();

        loop {
            let name = match &current {
                Argument::Identifier(name) => name.clone(),
                _ => {
                    let (Some(int), Some(float)) = (current.as_int(), current.as_float()) else {
                        return None;
                    };
                    return Some(Resolved { int, float });
                }
            };
            if !seen.insert(name.clone()) {
                self.write_at(
                    statement,
                    format!("identifier cycle while resolving {}", argument),
                );
                return None;
            }
            match self.constants.get(&name) {
                Some(value) => current = value.clone(),
                None => {
                    self.write_at(statement, format!("unresolved identifier '{}'", name));
                    return None;
                }
            }
        }
    }

    fn require_environment(&self, statement: &Statement) -> Option<Rc<Environment>> {
        match &self.env {
            Some(environment) => Some(environment.clone()),
            None => {
                self.write_at(statement, "no environment selected ('.env' must come first)");
                None
            }
        }
    }

    fn name_in_use(&self, name: &str) -> Option<&'static str> {
        self.name_in_use_by(name, None)
    }

    fn name_in_use_by(
        &self,
        name: &str,
        environment: Option<&Environment>,
    ) -> Option<&'static str> {
        if self.variables.iter().any(|v| v.name == name) {
            return Some("a variable");
        }
        if self.labels.contains_key(name) {
            return Some("a label");
        }
        if self.constants.contains_key(name) {
            return Some("a constant");
        }
        if let Some(environment) = environment {
            if environment.instruction(name).is_some() {
                return Some("an instruction");
            }
        }
        None
    }

    fn write_at(&self, statement: &Statement, message: impl std::fmt::Display) {
        self.errors
            .write_line_at(&statement.line, statement.line_index, message);
    }
}

/// Pack a resolved argument against the target primitive, taking the float
/// view for exponent encodings and the integer view otherwise.
fn pack_resolved(resolved: Resolved, primitive: &PrimitiveType) -> Result<Vec<u8>, PackError> {
    if primitive.encoding == Encoding::Exponent {
        primitive.pack_float(resolved.float)
    } else {
        primitive.pack_int(resolved.int)
    }
}
