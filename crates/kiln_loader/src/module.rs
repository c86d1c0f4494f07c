//! The script-visible module object.

use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use kiln_engine::{Object, ObjectRef, Value};

/// A module being loaded: its resolved filename and the `module` object
/// scripts see.
#[derive(Clone)]
pub struct Module {
    filename: PathBuf,
    object: ObjectRef,
}

impl Module {
    /// Creates a module for `filename` with empty `exports`.
    pub fn new(filename: &Path) -> Self {
        let name = filename.display().to_string();
        let mut object = Object::new();
        object.set("id", Value::string(&name));
        object.set("filename", Value::string(&name));
        object.set("exports", Value::object(Object::new()));
        object.set("loaded", Value::Bool(false));
        Self {
            filename: filename.to_path_buf(),
            object: Rc::new(RefCell::new(object)),
        }
    }

    /// The resolved filename.
    pub fn filename(&self) -> &Path {
        &self.filename
    }

    /// The directory containing the module.
    pub fn dirname(&self) -> &Path {
        self.filename.parent().unwrap_or_else(|| Path::new("."))
    }

    /// The `module` object passed to the wrapper.
    pub fn value(&self) -> Value {
        Value::Object(self.object.clone())
    }

    /// The current `module.exports`.
    pub fn exports(&self) -> Value {
        self.object
            .borrow()
            .get("exports")
            .cloned()
            .unwrap_or_default()
    }

    /// Whether the module finished evaluating.
    pub fn is_loaded(&self) -> bool {
        matches!(self.object.borrow().get("loaded"), Some(Value::Bool(true)))
    }

    pub(crate) fn mark_loaded(&self) {
        self.object.borrow_mut().set("loaded", Value::Bool(true));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_module_has_empty_exports() {
        let m = Module::new(Path::new("/srv/app/main.xxc"));
        assert_eq!(m.dirname(), Path::new("/srv/app"));
        assert_eq!(m.exports().type_of(), "object");
        assert!(!m.is_loaded());
        m.mark_loaded();
        assert!(m.is_loaded());
    }

    #[test]
    fn exports_can_be_replaced() {
        let m = Module::new(Path::new("a.xxc"));
        if let Value::Object(o) = m.value() {
            o.borrow_mut().set("exports", Value::Number(1.0));
        }
        assert_eq!(m.exports().as_number(), Some(1.0));
    }
}
