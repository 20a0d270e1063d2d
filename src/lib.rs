//! ByteLang: a compiler from a small assembly-like language to a binary
//! bytecode image for a configurable virtual machine.
//!
//! A program picks its target with `.env`, declares constants (`.def`) and
//! heap variables (`.ptr`), labels positions, and calls instructions defined
//! by the environment's packages. [`ByteLang`] wires the whole pipeline:
//! source text to statements, statements to packed code instructions and
//! symbol tables, and finally to the emitted image.

use std::fmt::Write as _;
use std::fs::File;
use std::io::BufReader;
use std::io::Write as _;
use std::path::Path;
use std::path::PathBuf;
use std::rc::Rc;

use anyhow::Result;
use log::debug;
use tempfile::NamedTempFile;

pub mod codegen;
pub mod core;
pub mod emitter;
pub mod errors;
pub mod parser;
pub mod test_utils;

use crate::codegen::{CodeGenerator, CodeInstruction, ProgramData};
use crate::core::environments::EnvironmentRegistry;
use crate::core::packages::PackageRegistry;
use crate::core::primitives::PrimitiveRegistry;
use crate::core::profiles::ProfileRegistry;
use crate::emitter::BytecodeEmitter;
use crate::errors::ErrorSink;
use crate::parser::{Parser, Statement};

/// Everything a successful compilation produced, kept for introspection.
pub struct CompileResult {
    pub statements: Vec<Statement>,
    pub instructions: Vec<CodeInstruction>,
    pub program: ProgramData,
    pub bytes: Vec<u8>,
}

impl CompileResult {
    /// Deterministic multi-line account of the compilation: statements,
    /// symbol tables, lowered instructions and a hex dump of the image.
    pub fn report(&self) -> String {
        let mut out = String::new();

        section(&mut out, "statements", self.statements.iter().map(|s| s.to_string()));
        section(
            &mut out,
            "constants",
            self.program
                .constants
                .iter()
                .map(|(name, value)| format!("{} = {}", name, value)),
        );
        section(&mut out, "variables", self.program.variables.iter().map(|v| v.to_string()));
        section(
            &mut out,
            "instructions",
            self.instructions
                .iter()
                .map(|i| format!("{:<24} {}", i.instruction.to_string(), i)),
        );
        section(
            &mut out,
            "bytecode",
            std::iter::once(pretty_bytes(&self.bytes)),
        );

        out
    }
}

fn section(out: &mut String, title: &str, lines: impl Iterator<Item = String>) {
    let _ = writeln!(out, "{:-^72}", format!(" <<< {} >>> ", title));
    for (index, line) in lines.enumerate() {
        let _ = writeln!(out, "{:>4}: {}", index, line);
    }
}

/// Hex rendering grouped by byte pairs: `0201_0005`.
fn pretty_bytes(bytes: &[u8]) -> String {
    bytes
        .chunks(2)
        .map(|pair| pair.iter().map(|b| format!("{:02X}", b)).collect::<String>())
        .collect::<Vec<_>>()
        .join("_")
}

/// The compiler façade.
///
/// Registries are shared, lazily populated, and reset whenever their source
/// is repointed. One instance compiles one file at a time; `compile` resets
/// the diagnostic buffer at entry.
pub struct ByteLang {
    primitives: Rc<PrimitiveRegistry>,
    profiles: Rc<ProfileRegistry>,
    packages: Rc<PackageRegistry>,
    environments: Rc<EnvironmentRegistry>,
    errors: ErrorSink,
}

impl ByteLang {
    pub fn new() -> ByteLang {
        let primitives = Rc::new(PrimitiveRegistry::new());
        let profiles = Rc::new(ProfileRegistry::new(primitives.clone()));
        let packages = Rc::new(PackageRegistry::new(primitives.clone()));
        let environments = Rc::new(EnvironmentRegistry::new(profiles.clone(), packages.clone()));
        ByteLang {
            primitives,
            profiles,
            packages,
            environments,
            errors: ErrorSink::new(),
        }
    }

    pub fn set_primitives_file(&self, file: impl Into<PathBuf>) {
        self.primitives.set_file(file);
    }

    pub fn set_profiles_folder(&self, folder: impl Into<PathBuf>) {
        self.profiles.set_folder(folder);
    }

    pub fn set_packages_folder(&self, folder: impl Into<PathBuf>) {
        self.packages.set_folder(folder);
    }

    pub fn set_environments_folder(&self, folder: impl Into<PathBuf>) {
        self.environments.set_folder(folder);
    }

    /// Compile `source` and, when clean, write the image to `output`.
    ///
    /// Returns `None` if any diagnostic fired; the output file is then left
    /// untouched. The full log is available through [`ByteLang::errors_log`].
    pub fn compile(&mut self, source: &Path, output: &Path) -> Option<CompileResult> {
        self.errors.reset();
        let errors = self.errors.child("compiler");

        // The source handle only lives for the parse.
        let statements = match File::open(source) {
            Ok(file) => Parser::new(&self.errors).run(BufReader::new(file)),
            Err(e) => {
                errors.write(format!("cannot open source '{}': {}", source.display(), e));
                return None;
            }
        };

        let generator = CodeGenerator::new(
            &self.errors,
            self.primitives.clone(),
            self.environments.clone(),
        );
        let (instructions, data) = generator.run(&statements);

        let bytes = data
            .as_ref()
            .and_then(|data| BytecodeEmitter::new(&self.errors).run(&instructions, data));

        if !self.errors.success() {
            return None;
        }
        let (Some(program), Some(bytes)) = (data, bytes) else {
            return None;
        };

        if let Err(e) = write_atomic(output, &bytes) {
            errors.write(format!(
                "cannot write output '{}': {:#}",
                output.display(),
                e
            ));
            return None;
        }

        debug!(
            "compiled '{}' into {} bytes at '{}'",
            source.display(),
            bytes.len(),
            output.display()
        );
        Some(CompileResult {
            statements,
            instructions,
            program,
            bytes,
        })
    }

    /// The accumulated diagnostics of the last `compile` call.
    pub fn errors_log(&self) -> String {
        self.errors.log()
    }
}

impl Default for ByteLang {
    fn default() -> ByteLang {
        ByteLang::new()
    }
}

/// The image lands in place only as a whole file.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let folder = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut file = NamedTempFile::new_in(folder)?;
    file.write_all(bytes)?;
    file.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::Fixture;

    #[test]
    fn empty_program_with_environment_only() {
        let fixture = Fixture::new();
        fixture.profile("wide", r#"{"ptr_prog": 2, "ptr_heap": 2, "ptr_inst": 1}"#);
        fixture.environment("bare", r#"{"profile": "wide", "packages": []}"#);

        let (compiler, result) = fixture.compile(".env bare\n");
        let result = result.expect(&compiler.errors_log());
        assert_eq!(result.bytes, vec![0x02, 0x00]);
        assert_eq!(result.program.start_address, 2);
    }

    #[test]
    fn single_variable_no_instructions() {
        let fixture = Fixture::new();
        fixture.profile("tiny", r#"{"ptr_prog": 1, "ptr_heap": 1, "ptr_inst": 1}"#);
        fixture.environment("bare", r#"{"profile": "tiny", "packages": []}"#);

        let (compiler, result) = fixture.compile(".env bare\n.ptr x u8 5\n");
        let result = result.expect(&compiler.errors_log());
        assert_eq!(result.bytes, vec![0x03, 0x00, 0x05]);
    }

    #[test]
    fn constant_and_single_instruction() {
        let fixture = Fixture::new();
        fixture.profile("tiny", r#"{"ptr_prog": 1, "ptr_heap": 1, "ptr_inst": 1}"#);
        fixture.package("base", "nop\n");
        fixture.environment("demo", r#"{"profile": "tiny", "packages": ["base"]}"#);

        let (compiler, result) = fixture.compile(".env demo\nnop\n");
        let result = result.expect(&compiler.errors_log());
        assert_eq!(result.bytes, vec![0x01, 0x00]);
    }

    #[test]
    fn label_resolves_as_a_constant() {
        let fixture = Fixture::new();
        fixture.profile("tiny", r#"{"ptr_prog": 1, "ptr_heap": 1, "ptr_inst": 1}"#);
        fixture.package("flow", "jmp u8\nnop\n");
        fixture.environment("demo", r#"{"profile": "tiny", "packages": ["flow"]}"#);

        let (compiler, result) = fixture.compile(".env demo\njmp start\nstart:\nnop\n");
        let result = result.expect(&compiler.errors_log());
        // Prologue, then jmp (opcode 0 + immediate), then nop at offset 3.
        assert_eq!(result.bytes, vec![0x01, 0x00, 0x03, 0x01]);
        assert_eq!(result.program.labels["start"], 3);

        // The prologue address lands on the first code instruction.
        let profile = &result.program.environment.profile;
        let decoded = profile.pointer_heap.unpack_int(&result.bytes[..profile.pointer_heap.size]);
        assert_eq!(decoded, 1);
    }

    #[test]
    fn pointer_argument_encodes_the_variable_address() {
        let fixture = Fixture::new();
        fixture.profile("wide", r#"{"ptr_prog": 2, "ptr_heap": 2, "ptr_inst": 1}"#);
        fixture.package("mem", "ld u8*\n");
        fixture.environment("demo", r#"{"profile": "wide", "packages": ["mem"]}"#);

        let (compiler, result) = fixture.compile(".env demo\n.ptr x u8 0\nld x\n");
        let result = result.expect(&compiler.errors_log());
        assert_eq!(
            result.bytes,
            vec![0x05, 0x00, 0x00, 0x00, 0x00, 0x00, 0x02, 0x00]
        );
    }

    #[test]
    fn capacity_violation_fails_and_writes_nothing() {
        let fixture = Fixture::new();
        fixture.profile(
            "capped",
            r#"{"ptr_prog": 1, "ptr_heap": 1, "ptr_inst": 1, "prog_len": 4}"#,
        );
        fixture.package("base", "nop\n");
        fixture.environment("demo", r#"{"profile": "capped", "packages": ["base"]}"#);

        let (compiler, result) = fixture.compile(".env demo\nnop\nnop\nnop\nnop\nnop\n");
        assert!(result.is_none());
        assert!(
            compiler.errors_log().contains("exceeds the profile limit"),
            "{}",
            compiler.errors_log()
        );
        assert!(!fixture.output_path().exists());
    }

    #[test]
    fn compiling_twice_is_byte_identical() {
        let fixture = Fixture::new();
        fixture.profile("tiny", r#"{"ptr_prog": 1, "ptr_heap": 1, "ptr_inst": 1}"#);
        fixture.package("base", "nop\npush u8\n");
        fixture.environment("demo", r#"{"profile": "tiny", "packages": ["base"]}"#);

        let source = ".env demo\n.def k 7\n.ptr x u8 k\nloop:\npush k\njmp_target:\nnop\n";
        let (compiler, first) = fixture.compile(source);
        let first = first.expect(&compiler.errors_log());
        let (compiler, second) = fixture.compile(source);
        let second = second.expect(&compiler.errors_log());
        assert_eq!(first.bytes, second.bytes);

        let written = std::fs::read(fixture.output_path()).unwrap();
        assert_eq!(written, second.bytes);
    }

    #[test]
    fn instruction_sizes_match_their_specialised_signatures() {
        let fixture = Fixture::new();
        fixture.profile("wide", r#"{"ptr_prog": 2, "ptr_heap": 2, "ptr_inst": 1}"#);
        fixture.package("mix", "nop\nmov u8* u32\nfst f64\n");
        fixture.environment("demo", r#"{"profile": "wide", "packages": ["mix"]}"#);

        let (compiler, result) = fixture.compile(".env demo\nnop\n");
        let result = result.expect(&compiler.errors_log());
        let profile = &result.program.environment.profile;
        for instruction in &result.program.environment.instructions {
            let argument_bytes: usize =
                instruction.arguments.iter().map(|a| a.primitive.size).sum();
            assert_eq!(
                instruction.size,
                profile.instruction_index.size + argument_bytes,
                "{}",
                instruction.name
            );
        }
    }

    #[test]
    fn integer_literals_round_trip_through_the_image() {
        let fixture = Fixture::new();
        fixture.profile("tiny", r#"{"ptr_prog": 1, "ptr_heap": 1, "ptr_inst": 1}"#);
        fixture.package("base", "put u32\n");
        fixture.environment("demo", r#"{"profile": "tiny", "packages": ["base"]}"#);

        let source = ".env demo\nput 42\nput 0x1F4\nput 0b1010\nput 017\nput '&'\n";
        let (compiler, result) = fixture.compile(source);
        let result = result.expect(&compiler.errors_log());

        let put = result
            .program
            .environment
            .instruction("put")
            .unwrap()
            .clone();
        let immediate = &put.arguments[0].primitive;
        let expected: [i128; 5] = [42, 0x1F4, 0b1010, 0o17, '&' as i128];
        for (i, value) in expected.iter().enumerate() {
            // Prologue, i whole instructions, then this one's opcode byte.
            let offset = 1 + i * put.size + 1;
            let bytes = &result.bytes[offset..offset + immediate.size];
            assert_eq!(immediate.unpack_int(bytes), *value, "literal {}", i);
        }
        assert_eq!(result.bytes.len(), 1 + expected.len() * put.size);
    }

    #[test]
    fn missing_source_file_is_reported() {
        let fixture = Fixture::new();
        let mut compiler = fixture.compiler();
        let result = compiler.compile(
            &fixture.dir.path().join("absent.bls"),
            &fixture.output_path(),
        );
        assert!(result.is_none());
        assert!(
            compiler.errors_log().contains("cannot open source"),
            "{}",
            compiler.errors_log()
        );
    }

    #[test]
    fn unknown_environment_is_reported_with_its_source() {
        let fixture = Fixture::new();
        let (compiler, result) = fixture.compile(".env absent\n");
        assert!(result.is_none());
        assert!(
            compiler.errors_log().contains("absent.json"),
            "{}",
            compiler.errors_log()
        );
    }

    #[test]
    fn report_covers_every_section() {
        let fixture = Fixture::new();
        fixture.profile("tiny", r#"{"ptr_prog": 1, "ptr_heap": 1, "ptr_inst": 1}"#);
        fixture.package("base", "push u8\n");
        fixture.environment("demo", r#"{"profile": "tiny", "packages": ["base"]}"#);

        let (compiler, result) = fixture.compile(".env demo\n.ptr x u8 3\npush x\n");
        let result = result.expect(&compiler.errors_log());
        let report = result.report();
        for title in ["statements", "constants", "variables", "instructions", "bytecode"] {
            assert!(report.contains(title), "missing '{}' in:\n{}", title, report);
        }
        assert!(report.contains("(u8) x@1 = 3"), "{}", report);
    }
}
