//! The [`Engine`] facade.
//!
//! One engine owns a global object and compiles, caches, and runs scripts
//! against it. It implements the [`Compile`] and [`InstantiateWithCache`]
//! capabilities the cache codec is written against.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use kiln_common::{Compile, FormatVersion, Instantiated, InstantiateWithCache};
use tracing::debug;

use crate::bytecode::{Chunk, FunctionBody, FunctionProto};
use crate::compiler::compile_script;
use crate::error::EngineError;
use crate::identity::{global_flags, BuildIdentity, EngineFlags};
use crate::parser::parse_program;
use crate::snapshot;
use crate::value::{Object, ObjectRef, Scope, Value};
use crate::vm;

/// Opening of the module-function envelope.
pub const MODULE_PREFIX: &str =
    "(function (exports, require, module, __filename, __dirname, process, global) { ";

/// Closing of the module-function envelope.
pub const MODULE_SUFFIX: &str = "\n})";

/// A compiled script, ready to run.
#[derive(Clone, Debug)]
pub struct Script {
    filename: String,
    source: Rc<str>,
    proto: Rc<FunctionProto>,
}

impl Script {
    /// The file name the script was compiled or loaded under.
    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// The source text the script carries. For a script restored from a
    /// cache this is the placeholder, not the original text.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// The top-level function prototype.
    pub fn proto(&self) -> &FunctionProto {
        &self.proto
    }
}

/// A reference engine instance.
pub struct Engine {
    identity: BuildIdentity,
    flags: EngineFlags,
    format: FormatVersion,
    global: ObjectRef,
    global_scope: Rc<Scope>,
    pub(crate) depth: Cell<usize>,
    pub(crate) reentry: Cell<usize>,
    console: RefCell<Option<Vec<String>>>,
    array_methods: Vec<(&'static str, Value)>,
}

impl Engine {
    /// Creates an engine with the process-wide flags.
    pub fn new(identity: BuildIdentity) -> Self {
        Self::with_flags(identity, global_flags())
    }

    /// Creates an engine with explicit flags.
    pub fn with_flags(identity: BuildIdentity, flags: EngineFlags) -> Self {
        let global = Rc::new(RefCell::new(Object::new()));
        let engine = Self {
            identity,
            flags,
            format: FormatVersion::default(),
            global_scope: Scope::global(Rc::clone(&global)),
            global,
            depth: Cell::new(0),
            reentry: Cell::new(0),
            console: RefCell::new(None),
            array_methods: array_methods(),
        };
        engine.install_console();
        engine
    }

    /// Sets the cache format version this engine writes and accepts.
    pub fn with_format(mut self, format: FormatVersion) -> Self {
        self.format = format;
        self
    }

    /// The build identity stamped into cache blobs.
    pub fn identity(&self) -> &BuildIdentity {
        &self.identity
    }

    /// The compilation flags.
    pub fn flags(&self) -> EngineFlags {
        self.flags
    }

    /// The global object.
    pub fn global_object(&self) -> &ObjectRef {
        &self.global
    }

    /// Binds a global name.
    pub fn set_global(&self, name: &str, value: Value) {
        self.global.borrow_mut().set(name, value);
    }

    pub(crate) fn global_scope(&self) -> Rc<Scope> {
        Rc::clone(&self.global_scope)
    }

    pub(crate) fn array_method(&self, name: &str) -> Option<Value> {
        self.array_methods
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| v.clone())
    }

    // ========================================================================
    // Compiling and running
    // ========================================================================

    /// Parses and compiles `source`.
    pub fn compile_script(&self, source: &str, filename: &str) -> Result<Script, EngineError> {
        let program = parse_program(source)?;
        let chunk = compile_script(&program, self.flags);
        debug!(
            filename,
            instructions = chunk.code.len(),
            lazy = self.flags.lazy_compilation,
            "compiled script"
        );
        Ok(Script {
            filename: filename.to_string(),
            source: Rc::from(source),
            proto: Rc::new(FunctionProto {
                name: None,
                params: Vec::new(),
                body: FunctionBody::Eager(Rc::new(chunk)),
            }),
        })
    }

    /// Runs a script against the global object and returns its completion value.
    pub fn run_in_this_context(&self, script: &Script) -> Result<Value, EngineError> {
        let FunctionBody::Eager(chunk) = &script.proto.body else {
            return Err(EngineError::InvalidBytecode(
                "top-level script body is not compiled".to_string(),
            ));
        };
        vm::execute(
            self,
            Rc::clone(chunk),
            self.global_scope(),
            Value::Object(Rc::clone(&self.global)),
            Rc::clone(&script.source),
        )
    }

    /// Compiles and runs `source`.
    pub fn eval(&self, source: &str) -> Result<Value, EngineError> {
        let script = self.compile_script(source, "<eval>")?;
        self.run_in_this_context(&script)
    }

    /// Calls a function value.
    pub fn call(&self, function: &Value, this: Value, args: &[Value]) -> Result<Value, EngineError> {
        vm::call(self, function, this, args)
    }

    // ========================================================================
    // Console
    // ========================================================================

    /// Redirects `console.log` output into a buffer instead of stdout.
    pub fn capture_console(&self) {
        self.console.replace(Some(Vec::new()));
    }

    /// Returns the lines captured since the last call.
    pub fn take_console(&self) -> Vec<String> {
        self.console
            .borrow_mut()
            .as_mut()
            .map(std::mem::take)
            .unwrap_or_default()
    }

    fn write_console(&self, line: String, to_stderr: bool) {
        match self.console.borrow_mut().as_mut() {
            Some(lines) => lines.push(line),
            None if to_stderr => eprintln!("{line}"),
            None => println!("{line}"),
        }
    }

    fn install_console(&self) {
        let mut console = Object::new();
        console.set(
            "log",
            Value::native("log", |engine, _this, args| {
                engine.write_console(format_args(args), false);
                Ok(Value::Undefined)
            }),
        );
        console.set(
            "error",
            Value::native("error", |engine, _this, args| {
                engine.write_console(format_args(args), true);
                Ok(Value::Undefined)
            }),
        );
        self.set_global("console", Value::object(console));
        self.set_global("globalThis", Value::Object(Rc::clone(&self.global)));
    }
}

fn format_args(args: &[Value]) -> String {
    args.iter().map(Value::inspect).collect::<Vec<_>>().join(" ")
}

fn array_methods() -> Vec<(&'static str, Value)> {
    vec![
        (
            "push",
            Value::native("push", |_engine, this, args| {
                let Value::Array(items) = this else {
                    return Err(EngineError::Type("push called on non-array".to_string()));
                };
                let mut items = items.borrow_mut();
                items.extend(args.iter().cloned());
                Ok(Value::Number(items.len() as f64))
            }),
        ),
        (
            "join",
            Value::native("join", |_engine, this, args| {
                let Value::Array(items) = this else {
                    return Err(EngineError::Type("join called on non-array".to_string()));
                };
                let sep = match args.first() {
                    None | Some(Value::Undefined) => ",".to_string(),
                    Some(v) => v.to_display_string(),
                };
                let joined = items
                    .borrow()
                    .iter()
                    .map(|v| match v {
                        Value::Undefined | Value::Null => String::new(),
                        other => other.to_display_string(),
                    })
                    .collect::<Vec<_>>()
                    .join(&sep);
                Ok(Value::string(joined))
            }),
        ),
    ]
}

impl Compile for Engine {
    type Error = EngineError;

    fn produce_cache(&self, source: &str) -> Result<Vec<u8>, EngineError> {
        let script = self.compile_script(source, "<compile>")?;
        snapshot::encode(
            &self.identity,
            self.flags,
            self.format,
            source,
            &script.proto,
        )
    }

    fn wrap_module(&self, source: &str) -> String {
        let mut wrapped = String::with_capacity(MODULE_PREFIX.len() + source.len() + 3);
        wrapped.push_str(MODULE_PREFIX);
        wrapped.push_str(source);
        wrapped.push_str(MODULE_SUFFIX);
        wrapped
    }

    fn format_version(&self) -> FormatVersion {
        self.format
    }
}

impl InstantiateWithCache for Engine {
    type Unit = Script;
    type Error = EngineError;

    fn instantiate(
        &self,
        placeholder_source: &str,
        cache: &[u8],
        filename: &str,
    ) -> Result<Instantiated<Script>, EngineError> {
        match snapshot::decode(
            &self.identity,
            self.flags,
            self.format,
            placeholder_source,
            cache,
        ) {
            Ok(proto) => Ok(Instantiated {
                unit: Script {
                    filename: filename.to_string(),
                    source: Rc::from(placeholder_source),
                    proto: Rc::new(proto),
                },
                cache_rejected: false,
            }),
            Err(rejection) => {
                debug!(filename, %rejection, "code cache rejected");
                // An inert unit: a placeholder carries no behavior worth compiling.
                let unit = Script {
                    filename: filename.to_string(),
                    source: Rc::from(""),
                    proto: Rc::new(FunctionProto {
                        name: None,
                        params: Vec::new(),
                        body: FunctionBody::Eager(Rc::new(Chunk::default())),
                    }),
                };
                Ok(Instantiated {
                    unit,
                    cache_rejected: true,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> Engine {
        Engine::with_flags(BuildIdentity::current(), EngineFlags::code_cache())
    }

    /// Placeholder of the same UTF-16 length, as the cache codec builds it.
    fn placeholder(len: usize) -> String {
        if len > 1 {
            format!("\"{}\"", "\u{200b}".repeat(len - 2))
        } else {
            String::new()
        }
    }

    #[test]
    fn console_log_is_captured() {
        let engine = engine();
        engine.capture_console();
        let v = engine.eval("console.log('hi', 1, [2]);43;").unwrap();
        assert_eq!(v.as_number(), Some(43.0));
        assert_eq!(engine.take_console(), vec!["hi 1 [ 2 ]"]);
        assert!(engine.take_console().is_empty());
    }

    #[test]
    fn cache_restores_without_original_source() {
        let engine = engine();
        engine.capture_console();
        let src = "console.log('hi');43;";
        let blob = engine.produce_cache(src).unwrap();
        let ph = placeholder(crate::source_length(src) as usize);
        let restored = engine.instantiate(&ph, &blob, "a.xxc").unwrap();
        assert!(!restored.cache_rejected);
        assert_eq!(restored.unit.source(), ph);
        let v = engine.run_in_this_context(&restored.unit).unwrap();
        assert_eq!(v.as_number(), Some(43.0));
        assert_eq!(engine.take_console(), vec!["hi"]);
    }

    #[test]
    fn cache_from_other_build_is_rejected() {
        let producer = Engine::with_flags(
            BuildIdentity::new(crate::ENGINE_LINE, "sibling"),
            EngineFlags::code_cache(),
        );
        let src = "1 + 1";
        let blob = producer.produce_cache(src).unwrap();
        let ph = placeholder(crate::source_length(src) as usize);
        let result = engine().instantiate(&ph, &blob, "b.xxc").unwrap();
        assert!(result.cache_rejected);
        // The fallback unit is inert.
        assert!(result.unit.source().is_empty());
        let v = engine().run_in_this_context(&result.unit).unwrap();
        assert!(v.is_undefined());

        // Rejection does not parse the placeholder, so even text that is not
        // a valid script comes back as the inert unit.
        let result = engine().instantiate("let = ;", &blob, "b.xxc").unwrap();
        assert!(result.cache_rejected);
    }

    #[test]
    fn lazy_cache_cannot_run_deferred_functions() {
        let lazy = Engine::with_flags(
            BuildIdentity::current(),
            EngineFlags {
                lazy_compilation: true,
                flush_bytecode: false,
            },
        );
        let src = "function f() { return 1; }\nf()";
        let blob = lazy.produce_cache(src).unwrap();
        let ph = placeholder(crate::source_length(src) as usize);
        let restored = lazy.instantiate(&ph, &blob, "lazy.xxc").unwrap();
        assert!(!restored.cache_rejected);
        let err = lazy.run_in_this_context(&restored.unit).unwrap_err();
        assert_eq!(
            err,
            EngineError::SourceUnavailable {
                name: "f".to_string()
            }
        );
    }

    #[test]
    fn module_wrapper_evaluates_to_a_function() {
        let engine = engine();
        let wrapped = engine.wrap_module("module.exports = 43;");
        let f = engine.eval(&wrapped).unwrap();
        assert_eq!(f.type_of(), "function");
        let module = Value::object(Object::new());
        let args = [
            Value::object(Object::new()),
            Value::Undefined,
            module.clone(),
        ];
        engine.call(&f, Value::Undefined, &args).unwrap();
        let exports = module.as_object().unwrap().borrow().get("exports").cloned();
        assert_eq!(exports.and_then(|v| v.as_number()), Some(43.0));
    }

    #[test]
    fn syntax_errors_surface_from_produce_cache() {
        let err = engine().produce_cache("let = ;").unwrap_err();
        assert!(matches!(err, EngineError::Syntax { .. }));
    }

    #[test]
    fn format_version_is_configurable() {
        let engine = engine().with_format(FormatVersion::Extended);
        assert_eq!(engine.format_version(), FormatVersion::Extended);
        let blob = engine.produce_cache("42").unwrap();
        let restored = engine.instantiate("\"\"", &blob, "x").unwrap();
        assert!(!restored.cache_rejected);
    }
}
