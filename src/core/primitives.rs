//! Fixed-width numeric types and the registry that loads them.
//!
//! A primitive descriptor file is a single JSON map from type name to
//! `{"size": <bytes>, "type": "unsigned" | "signed" | "exponent"}`. Every
//! compiled value, from heap pointers to instruction immediates, goes through
//! the packers built here. Byte order is little-endian throughout.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::Path;
use std::path::PathBuf;
use std::rc::Rc;

use anyhow::{anyhow, bail, Context, Result};
use byteorder::{ByteOrder, LittleEndian};
use serde_derive::Deserialize;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    Unsigned,
    Signed,
    /// IEEE 754 binary32 / binary64. Only valid for sizes 4 and 8.
    Exponent,
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            Encoding::Unsigned => "unsigned",
            Encoding::Signed => "signed",
            Encoding::Exponent => "exponent",
        };
        write!(f, "{}", name)
    }
}

#[derive(Error, Debug)]
pub enum PackError {
    #[error("value {value} out of range [{min}; {max}] of {name}")]
    OutOfRange {
        name: String,
        value: i128,
        min: i128,
        max: i128,
    },
}

/// A fixed-width numeric type with its packing rule.
#[derive(Debug, PartialEq)]
pub struct PrimitiveType {
    pub name: String,
    /// Width in bytes, one of {1, 2, 4, 8}.
    pub size: usize,
    pub encoding: Encoding,
}

impl fmt::Display for PrimitiveType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

impl PrimitiveType {
    pub fn int_min(&self) -> i128 {
        match self.encoding {
            Encoding::Signed => -(1i128 << (8 * self.size - 1)),
            _ => 0,
        }
    }

    pub fn int_max(&self) -> i128 {
        match self.encoding {
            Encoding::Signed => (1i128 << (8 * self.size - 1)) - 1,
            _ => (1i128 << (8 * self.size)) - 1,
        }
    }

    /// Encode an integer value. Exponent-encoded types accept the integer
    /// through its float view.
    pub fn pack_int(&self, value: i128) -> Result<Vec<u8>, PackError> {
        if self.encoding == Encoding::Exponent {
            return self.pack_float(value as f64);
        }
        if value < self.int_min() || value > self.int_max() {
            return Err(PackError::OutOfRange {
                name: self.name.clone(),
                value,
                min: self.int_min(),
                max: self.int_max(),
            });
        }
        let mut buf = vec![0u8; self.size];
        if self.encoding == Encoding::Signed {
            LittleEndian::write_int(&mut buf, value as i64, self.size);
        } else {
            LittleEndian::write_uint(&mut buf, value as u64, self.size);
        }
        Ok(buf)
    }

    /// Encode a float value. Integer-encoded types accept the float through
    /// its floor view.
    pub fn pack_float(&self, value: f64) -> Result<Vec<u8>, PackError> {
        if self.encoding != Encoding::Exponent {
            return self.pack_int(value.floor() as i128);
        }
        let mut buf = vec![0u8; self.size];
        if self.size == 8 {
            LittleEndian::write_f64(&mut buf, value);
        } else {
            LittleEndian::write_f32(&mut buf, value as f32);
        }
        Ok(buf)
    }

    pub fn unpack_int(&self, bytes: &[u8]) -> i128 {
        match self.encoding {
            Encoding::Unsigned => LittleEndian::read_uint(bytes, self.size) as i128,
            Encoding::Signed => LittleEndian::read_int(bytes, self.size) as i128,
            Encoding::Exponent => self.unpack_float(bytes).floor() as i128,
        }
    }

    pub fn unpack_float(&self, bytes: &[u8]) -> f64 {
        match (self.encoding, self.size) {
            (Encoding::Exponent, 4) => LittleEndian::read_f32(bytes) as f64,
            (Encoding::Exponent, 8) => LittleEndian::read_f64(bytes),
            _ => self.unpack_int(bytes) as f64,
        }
    }

    /// Human-readable rendering of a packed value, used by the compile report.
    pub fn describe(&self, bytes: &[u8]) -> String {
        match self.encoding {
            Encoding::Exponent => format!("{}", self.unpack_float(bytes)),
            _ => format!("{}", self.unpack_int(bytes)),
        }
    }
}

#[derive(Debug, Deserialize)]
struct PrimitiveDescriptor {
    size: usize,
    #[serde(rename = "type")]
    encoding: Encoding,
}

struct PrimitiveSet {
    by_name: BTreeMap<String, Rc<PrimitiveType>>,
    by_layout: HashMap<(usize, Encoding), Rc<PrimitiveType>>,
}

impl PrimitiveSet {
    fn load(file: &Path) -> Result<PrimitiveSet> {
        let text = fs::read_to_string(file)
            .with_context(|| format!("cannot read primitive descriptor '{}'", file.display()))?;
        let descriptors: BTreeMap<String, PrimitiveDescriptor> = serde_json::from_str(&text)
            .with_context(|| format!("malformed primitive descriptor '{}'", file.display()))?;

        let mut by_name = BTreeMap::new();
        let mut by_layout = HashMap::new();

        for (name, descriptor) in descriptors {
            if name.is_empty() {
                bail!("'{}': primitive with empty name", file.display());
            }
            if !matches!(descriptor.size, 1 | 2 | 4 | 8) {
                bail!(
                    "'{}': primitive '{}' has unsupported size {}",
                    file.display(),
                    name,
                    descriptor.size
                );
            }
            if descriptor.encoding == Encoding::Exponent && !matches!(descriptor.size, 4 | 8) {
                bail!(
                    "'{}': exponent primitive '{}' must have size 4 or 8, got {}",
                    file.display(),
                    name,
                    descriptor.size
                );
            }

            let primitive = Rc::new(PrimitiveType {
                name: name.clone(),
                size: descriptor.size,
                encoding: descriptor.encoding,
            });
            let layout = (primitive.size, primitive.encoding);
            if let Some(previous) = by_layout.insert(layout, primitive.clone()) {
                bail!(
                    "'{}': primitives '{}' and '{}' share size {} and {} encoding",
                    file.display(),
                    previous.name,
                    name,
                    primitive.size,
                    primitive.encoding
                );
            }
            by_name.insert(name, primitive);
        }

        Ok(PrimitiveSet { by_name, by_layout })
    }
}

/// Lazily loads the descriptor file on first use; `set_file` drops the cache.
#[derive(Default)]
pub struct PrimitiveRegistry {
    file: RefCell<Option<PathBuf>>,
    cache: RefCell<Option<Rc<PrimitiveSet>>>,
}

impl PrimitiveRegistry {
    pub fn new() -> PrimitiveRegistry {
        PrimitiveRegistry::default()
    }

    pub fn set_file(&self, file: impl Into<PathBuf>) {
        *self.file.borrow_mut() = Some(file.into());
        self.cache.borrow_mut().take();
    }

    pub fn get(&self, name: &str) -> Result<Rc<PrimitiveType>> {
        let set = self.loaded()?;
        set.by_name
            .get(name)
            .cloned()
            .ok_or_else(|| anyhow!("unknown primitive type '{}'", name))
    }

    /// Resolve by layout; profiles use this for their pointer widths.
    pub fn get_by_size(&self, size: usize, encoding: Encoding) -> Result<Rc<PrimitiveType>> {
        let set = self.loaded()?;
        set.by_layout
            .get(&(size, encoding))
            .cloned()
            .ok_or_else(|| anyhow!("no {} primitive of size {}", encoding, size))
    }

    fn loaded(&self) -> Result<Rc<PrimitiveSet>> {
        if let Some(set) = self.cache.borrow().as_ref() {
            return Ok(set.clone());
        }
        let file = self
            .file
            .borrow()
            .clone()
            .ok_or_else(|| anyhow!("primitive descriptor file is not set"))?;
        let set = Rc::new(PrimitiveSet::load(&file)?);
        *self.cache.borrow_mut() = Some(set.clone());
        Ok(set)
    }
}
