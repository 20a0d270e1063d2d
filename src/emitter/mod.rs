//! Final image layout.
//!
//! The image is three regions, back to back: the heap prologue (the start
//! address of executable code, packed as the profile's heap pointer), the
//! variable region (a zeroed type-tag slot of heap-pointer width followed by
//! each packed initial value, in declaration order), and the code region
//! (opcode index packed as the instruction-index primitive, then every
//! argument in slot order).

use log::debug;

use crate::codegen::{CodeInstruction, ProgramData};
use crate::errors::ErrorSink;

pub struct BytecodeEmitter {
    errors: ErrorSink,
}

impl BytecodeEmitter {
    pub fn new(errors: &ErrorSink) -> BytecodeEmitter {
        BytecodeEmitter {
            errors: errors.child("emitter"),
        }
    }

    pub fn run(&self, instructions: &[CodeInstruction], data: &ProgramData) -> Option<Vec<u8>> {
        let profile = &data.environment.profile;
        let mut image = Vec::new();

        match profile.pointer_heap.pack_int(data.start_address as i128) {
            Ok(prologue) => image.extend(prologue),
            Err(e) => {
                self.errors
                    .write(format!("cannot encode start address: {}", e));
                return None;
            }
        }

        for variable in &data.variables {
            image.extend(std::iter::repeat(0u8).take(profile.pointer_heap.size));
            image.extend(&variable.value);
        }
        debug_assert_eq!(image.len(), data.start_address);

        for instruction in instructions {
            match profile
                .instruction_index
                .pack_int(instruction.instruction.index as i128)
            {
                Ok(opcode) => image.extend(opcode),
                Err(e) => {
                    self.errors.write(format!(
                        "cannot encode opcode of '{}': {}",
                        instruction.instruction.name, e
                    ));
                    return None;
                }
            }
            for argument in &instruction.arguments {
                image.extend(argument);
            }
        }

        if let Some(max) = profile.max_program_length {
            if image.len() > max {
                self.errors.write(format!(
                    "program size ({} bytes) exceeds the profile limit ({} bytes)",
                    image.len(),
                    max
                ));
                return None;
            }
        }

        debug!("emitted {} bytes", image.len());
        Some(image)
    }
}
