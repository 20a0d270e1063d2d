#![cfg(test)]

//! Shared test fixtures: a registry tree in a temp directory plus a compiler
//! pointed at it.

use std::fs;
use std::io::Write as _;
use std::path::PathBuf;

use crate::{ByteLang, CompileResult};

/// A broad default primitive set; individual tests only need a few entries.
pub const PRIMITIVES: &str = r#"{
    "u8":  {"size": 1, "type": "unsigned"},
    "i8":  {"size": 1, "type": "signed"},
    "u16": {"size": 2, "type": "unsigned"},
    "i16": {"size": 2, "type": "signed"},
    "u32": {"size": 4, "type": "unsigned"},
    "i32": {"size": 4, "type": "signed"},
    "u64": {"size": 8, "type": "unsigned"},
    "i64": {"size": 8, "type": "signed"},
    "f32": {"size": 4, "type": "exponent"},
    "f64": {"size": 8, "type": "exponent"}
}"#;

pub struct Fixture {
    pub dir: tempfile::TempDir,
}

impl Fixture {
    pub fn new() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        for sub in ["packages", "profiles", "environments"] {
            fs::create_dir(dir.path().join(sub)).unwrap();
        }
        let fixture = Fixture { dir };
        fixture.write("primitives.json", PRIMITIVES);
        fixture
    }

    pub fn write(&self, relative: &str, text: &str) -> PathBuf {
        let path = self.dir.path().join(relative);
        fs::File::create(&path)
            .unwrap()
            .write_all(text.as_bytes())
            .unwrap();
        path
    }

    pub fn profile(&self, name: &str, json: &str) {
        self.write(&format!("profiles/{}.json", name), json);
    }

    pub fn package(&self, name: &str, text: &str) {
        self.write(&format!("packages/{}.blp", name), text);
    }

    pub fn environment(&self, name: &str, json: &str) {
        self.write(&format!("environments/{}.json", name), json);
    }

    pub fn compiler(&self) -> ByteLang {
        let compiler = ByteLang::new();
        compiler.set_primitives_file(self.dir.path().join("primitives.json"));
        compiler.set_profiles_folder(self.dir.path().join("profiles"));
        compiler.set_packages_folder(self.dir.path().join("packages"));
        compiler.set_environments_folder(self.dir.path().join("environments"));
        compiler
    }

    pub fn output_path(&self) -> PathBuf {
        self.dir.path().join("out.blc")
    }

    /// Write `source` to disk and compile it.
    pub fn compile(&self, source: &str) -> (ByteLang, Option<CompileResult>) {
        let source_path = self.write("program.bls", source);
        let mut compiler = self.compiler();
        let result = compiler.compile(&source_path, &self.output_path());
        (compiler, result)
    }
}
