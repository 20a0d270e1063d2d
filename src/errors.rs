/// Scoped, hierarchical diagnostic accumulator used by every compilation stage.
///
/// All sinks created from one root share a single buffer, so the final error
/// log preserves pipeline order no matter which component reported first. A
/// compilation is successful exactly when the buffer stayed empty.
use std::cell::RefCell;
use std::fmt::Display;
use std::fmt::Write as _;
use std::rc::Rc;

#[derive(Clone, Default)]
pub struct ErrorSink {
    entries: Rc<RefCell<Vec<String>>>,
    notes: Rc<RefCell<Vec<String>>>,
    prefix: String,
}

/// Snapshot of the buffer length, taken at scope entry with [`ErrorSink::begin`].
#[derive(Debug, Clone, Copy)]
pub struct Scope(usize);

impl ErrorSink {
    pub fn new() -> ErrorSink {
        ErrorSink::default()
    }

    /// A sink writing into the same buffer under a longer component prefix.
    pub fn child(&self, name: &str) -> ErrorSink {
        let prefix = if self.prefix.is_empty() {
            name.to_string()
        } else {
            format!("{}.{}", self.prefix, name)
        };
        ErrorSink {
            entries: self.entries.clone(),
            notes: self.notes.clone(),
            prefix,
        }
    }

    pub fn write(&self, message: impl Display) {
        self.entries
            .borrow_mut()
            .push(format!("[{}] {}", self.prefix, message));
    }

    /// Record a diagnostic carrying the offending source line.
    pub fn write_line_at(&self, line: &str, index: usize, message: impl Display) {
        self.write(format!("line {} ('{}'): {}", index, line.trim(), message));
    }

    /// Non-fatal remark. Kept out of the failure decision, but reported.
    pub fn note(&self, message: impl Display) {
        self.notes
            .borrow_mut()
            .push(format!("[{}] {}", self.prefix, message));
    }

    pub fn begin(&self) -> Scope {
        Scope(self.entries.borrow().len())
    }

    /// Did any diagnostic land since the scope was opened?
    pub fn failed(&self, scope: Scope) -> bool {
        self.entries.borrow().len() > scope.0
    }

    pub fn success(&self) -> bool {
        self.entries.borrow().is_empty()
    }

    pub fn count(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn notes(&self) -> Vec<String> {
        self.notes.borrow().clone()
    }

    pub fn reset(&self) {
        self.entries.borrow_mut().clear();
        self.notes.borrow_mut().clear();
    }

    /// The accumulated diagnostics, one per line, in the order they fired.
    pub fn log(&self) -> String {
        let mut out = String::new();
        for entry in self.entries.borrow().iter() {
            let _ = writeln!(out, "{}", entry);
        }
        out
    }
}
