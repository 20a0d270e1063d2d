//! VM profiles: the sizing parameters of a target machine.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::PathBuf;
use std::rc::Rc;

use anyhow::{anyhow, Context, Result};
use serde_derive::Deserialize;

use crate::core::primitives::{Encoding, PrimitiveRegistry, PrimitiveType};

/// Descriptor file fields. Widths are in bytes and must resolve to unsigned
/// primitives of that size.
#[derive(Debug, Deserialize)]
struct ProfileDescriptor {
    ptr_prog: usize,
    ptr_heap: usize,
    ptr_inst: usize,
    #[serde(default)]
    prog_len: Option<usize>,
}

#[derive(Debug)]
pub struct Profile {
    pub name: String,
    pub pointer_program: Rc<PrimitiveType>,
    pub pointer_heap: Rc<PrimitiveType>,
    pub instruction_index: Rc<PrimitiveType>,
    pub max_program_length: Option<usize>,
}

impl fmt::Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

pub struct ProfileRegistry {
    folder: RefCell<Option<PathBuf>>,
    cache: RefCell<HashMap<String, Rc<Profile>>>,
    primitives: Rc<PrimitiveRegistry>,
}

impl ProfileRegistry {
    pub fn new(primitives: Rc<PrimitiveRegistry>) -> ProfileRegistry {
        ProfileRegistry {
            folder: RefCell::new(None),
            cache: RefCell::new(HashMap::new()),
            primitives,
        }
    }

    pub fn set_folder(&self, folder: impl Into<PathBuf>) {
        *self.folder.borrow_mut() = Some(folder.into());
        self.cache.borrow_mut().clear();
    }

    pub fn get(&self, name: &str) -> Result<Rc<Profile>> {
        if let Some(profile) = self.cache.borrow().get(name) {
            return Ok(profile.clone());
        }
        let profile = Rc::new(self.load(name)?);
        self.cache
            .borrow_mut()
            .insert(name.to_string(), profile.clone());
        Ok(profile)
    }

    fn load(&self, name: &str) -> Result<Profile> {
        let folder = self
            .folder
            .borrow()
            .clone()
            .ok_or_else(|| anyhow!("profiles folder is not set"))?;
        let file = folder.join(format!("{}.json", name));
        let text = fs::read_to_string(&file)
            .with_context(|| format!("cannot read profile '{}'", file.display()))?;
        let descriptor: ProfileDescriptor = serde_json::from_str(&text)
            .with_context(|| format!("malformed profile '{}'", file.display()))?;

        let pointer = |size| {
            self.primitives
                .get_by_size(size, Encoding::Unsigned)
                .with_context(|| format!("profile '{}'", file.display()))
        };

        Ok(Profile {
            name: name.to_string(),
            pointer_program: pointer(descriptor.ptr_prog)?,
            pointer_heap: pointer(descriptor.ptr_heap)?,
            instruction_index: pointer(descriptor.ptr_inst)?,
            max_program_length: descriptor.prog_len,
        })
    }
}
