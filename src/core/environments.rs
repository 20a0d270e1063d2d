//! Environments: a profile bound to an ordered set of packages.
//!
//! Composing an environment assigns every instruction a dense opcode index
//! (package order, then definition order) and specialises each signature to
//! the profile: pointer slots adopt the heap-pointer primitive.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::PathBuf;
use std::rc::Rc;

use anyhow::{anyhow, bail, Context, Result};
use serde_derive::Deserialize;

use crate::core::packages::{InstructionArgument, PackageInstruction, PackageRegistry};
use crate::core::profiles::{Profile, ProfileRegistry};

#[derive(Debug, Deserialize)]
struct EnvironmentDescriptor {
    profile: String,
    packages: Vec<String>,
}

/// A package instruction specialised to one profile.
#[derive(Debug)]
pub struct EnvironmentInstruction {
    pub package: String,
    pub name: String,
    /// Opcode value written to the byte stream.
    pub index: usize,
    pub arguments: Vec<InstructionArgument>,
    /// Total on-wire size: instruction index width plus all argument widths.
    pub size: usize,
}

impl EnvironmentInstruction {
    fn specialise(source: &PackageInstruction, index: usize, profile: &Profile) -> EnvironmentInstruction {
        let arguments: Vec<_> = source
            .arguments
            .iter()
            .map(|argument| InstructionArgument {
                primitive: if argument.is_pointer {
                    profile.pointer_heap.clone()
                } else {
                    argument.primitive.clone()
                },
                is_pointer: argument.is_pointer,
            })
            .collect();
        let size = profile.instruction_index.size
            + arguments.iter().map(|a| a.primitive.size).sum::<usize>();

        EnvironmentInstruction {
            package: source.package.clone(),
            name: source.name.clone(),
            index,
            arguments,
            size,
        }
    }
}

impl fmt::Display for EnvironmentInstruction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}::{}@{}(", self.package, self.name, self.index)?;
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
pub struct Environment {
    pub name: String,
    pub profile: Rc<Profile>,
    /// All instructions ordered by opcode index.
    pub instructions: Vec<Rc<EnvironmentInstruction>>,
    by_name: HashMap<String, Rc<EnvironmentInstruction>>,
}

impl Environment {
    pub fn instruction(&self, name: &str) -> Option<&Rc<EnvironmentInstruction>> {
        self.by_name.get(name)
    }
}

pub struct EnvironmentRegistry {
    folder: RefCell<Option<PathBuf>>,
    cache: RefCell<HashMap<String, Rc<Environment>>>,
    profiles: Rc<ProfileRegistry>,
    packages: Rc<PackageRegistry>,
}

impl EnvironmentRegistry {
    pub fn new(profiles: Rc<ProfileRegistry>, packages: Rc<PackageRegistry>) -> EnvironmentRegistry {
        EnvironmentRegistry {
            folder: RefCell::new(None),
            cache: RefCell::new(HashMap::new()),
            profiles,
            packages,
        }
    }

    pub fn set_folder(&self, folder: impl Into<PathBuf>) {
        *self.folder.borrow_mut() = Some(folder.into());
        self.cache.borrow_mut().clear();
    }

    pub fn get(&self, name: &str) -> Result<Rc<Environment>> {
        if let Some(environment) = self.cache.borrow().get(name) {
            return Ok(environment.clone());
        }
        let environment = Rc::new(self.load(name)?);
        self.cache
            .borrow_mut()
            .insert(name.to_string(), environment.clone());
        Ok(environment)
    }

    fn load(&self, name: &str) -> Result<Environment> {
        let folder = self
            .folder
            .borrow()
            .clone()
            .ok_or_else(|| anyhow!("environments folder is not set"))?;
        let file = folder.join(format!("{}.json", name));
        let text = fs::read_to_string(&file)
            .with_context(|| format!("cannot read environment '{}'", file.display()))?;
        let descriptor: EnvironmentDescriptor = serde_json::from_str(&text)
            .with_context(|| format!("malformed environment '{}'", file.display()))?;

        let profile = self
            .profiles
            .get(&descriptor.profile)
            .with_context(|| format!("environment '{}'", file.display()))?;

        let mut instructions = Vec::new();
        let mut by_name = HashMap::new();

        for package_name in &descriptor.packages {
            let package = self
                .packages
                .get(package_name)
                .with_context(|| format!("environment '{}'", file.display()))?;

            for source in &package.instructions {
                let index = instructions.len();
                let instruction =
                    Rc::new(EnvironmentInstruction::specialise(source, index, &profile));
                if let Some(previous) = by_name.insert(instruction.name.clone(), instruction.clone())
                {
                    bail!(
                        "environment '{}': instruction '{}' from package '{}' collides with '{}'",
                        file.display(),
                        instruction.name,
                        instruction.package,
                        previous.package
                    );
                }
                instructions.push(instruction);
            }
        }

        Ok(Environment {
            name: name.to_string(),
            profile,
            instructions,
            by_name,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::primitives::PrimitiveRegistry;
    use std::io::Write as _;
    use std::path::Path;

    fn write(path: &Path, text: &str) {
        fs::File::create(path)
            .unwrap()
            .write_all(text.as_bytes())
            .unwrap();
    }

    fn fixture() -> (tempfile::TempDir, EnvironmentRegistry) {
        let dir = tempfile::tempdir().unwrap();
        write(
            &dir.path().join("primitives.json"),
            r#"{"u8": {"size": 1, "type": "unsigned"},
                "u16": {"size": 2, "type": "unsigned"},
                "i32": {"size": 4, "type": "signed"}}"#,
        );
        write(
            &dir.path().join("demo.json"),
            r#"{"ptr_prog": 2, "ptr_heap": 2, "ptr_inst": 1}"#,
        );

        let primitives = Rc::new(PrimitiveRegistry::new());
        primitives.set_file(dir.path().join("primitives.json"));
        let profiles = Rc::new(ProfileRegistry::new(primitives.clone()));
        profiles.set_folder(dir.path());
        let packages = Rc::new(PackageRegistry::new(primitives));
        packages.set_folder(dir.path());

        let registry = EnvironmentRegistry::new(profiles, packages);
        registry.set_folder(dir.path());
        (dir, registry)
    }

    #[test]
    fn assigns_dense_indices_in_package_order() {
        let (dir, registry) = fixture();
        write(&dir.path().join("flow.blp"), "nop\njmp u16\n");
        write(&dir.path().join("mem.blp"), "store u8* i32\n");
        write(
            &dir.path().join("env.json"),
            r#"{"profile": "demo", "packages": ["flow", "mem"]}"#,
        );

        let environment = registry.get("env").unwrap();
        let indexed: Vec<_> = environment
            .instructions
            .iter()
            .map(|i| (i.name.as_str(), i.index))
            .collect();
        assert_eq!(indexed, [("nop", 0), ("jmp", 1), ("store", 2)]);
    }

    #[test]
    fn pointer_arguments_adopt_the_heap_pointer() {
        let (dir, registry) = fixture();
        write(&dir.path().join("mem.blp"), "store u8* i32\n");
        write(
            &dir.path().join("env.json"),
            r#"{"profile": "demo", "packages": ["mem"]}"#,
        );

        let environment = registry.get("env").unwrap();
        let store = environment.instruction("store").unwrap();
        assert_eq!(store.arguments[0].primitive.name, "u16");
        assert!(store.arguments[0].is_pointer);
        assert_eq!(store.arguments[1].primitive.name, "i32");
        // index width 1 + pointer 2 + i32 4
        assert_eq!(store.size, 7);
    }

    #[test]
    fn name_collisions_across_packages_are_rejected() {
        let (dir, registry) = fixture();
        write(&dir.path().join("a.blp"), "nop\n");
        write(&dir.path().join("b.blp"), "nop u8\n");
        write(
            &dir.path().join("env.json"),
            r#"{"profile": "demo", "packages": ["a", "b"]}"#,
        );

        let err = registry.get("env").unwrap_err().to_string();
        assert!(err.contains("collides"), "{}", err);
    }

    #[test]
    fn unknown_profile_is_reported_with_environment_context() {
        let (dir, registry) = fixture();
        write(
            &dir.path().join("env.json"),
            r#"{"profile": "absent", "packages": []}"#,
        );
        let err = format!("{:#}", registry.get("env").unwrap_err());
        assert!(err.contains("environment"), "{}", err);
    }
}
