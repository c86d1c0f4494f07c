//! The module loader.

use std::cell::RefCell;
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::rc::Rc;

use kiln_cache::CacheCodec;
use kiln_common::source::strip_shebang;
use kiln_common::Compile;
use kiln_engine::{Engine, EngineError, Object, Script, Value, ENGINE_LINE};
use tracing::debug;

use crate::error::LoaderError;
use crate::module::Module;
use crate::registry::{Handler, ModuleRegistry};

/// Filename reported for blobs run without a file.
const BYTECODE_FILENAME: &str = "<bytecode>";

/// Loads modules and runs cache blobs on one engine.
///
/// Cloning a loader is cheap; clones share the engine, registry, and
/// module cache.
#[derive(Clone)]
pub struct Loader {
    inner: Rc<Inner>,
}

struct Inner {
    engine: Engine,
    registry: RefCell<ModuleRegistry>,
    modules: RefCell<HashMap<PathBuf, Module>>,
    process: Value,
}

impl Loader {
    /// Creates a loader with the default `.xxc` and `.js` handlers.
    pub fn new(engine: Engine) -> Self {
        Self::with_registry(engine, ModuleRegistry::with_defaults())
    }

    /// Creates a loader with an explicit registry.
    pub fn with_registry(engine: Engine, registry: ModuleRegistry) -> Self {
        Self {
            inner: Rc::new(Inner {
                engine,
                registry: RefCell::new(registry),
                modules: RefCell::new(HashMap::new()),
                process: process_object(),
            }),
        }
    }

    /// The engine modules run on.
    pub fn engine(&self) -> &Engine {
        &self.inner.engine
    }

    /// Registers a handler for `extension`.
    pub fn register(&self, extension: &str, handler: Handler) {
        self.inner.registry.borrow_mut().register(extension, handler);
    }

    /// A cache codec for the loader's engine.
    pub fn codec(&self) -> CacheCodec<'_, Engine> {
        CacheCodec::new(&self.inner.engine)
    }

    /// Validates `bytes` and returns the script, ready to run.
    pub fn load(&self, bytes: &[u8], filename: &str) -> Result<Script, LoaderError> {
        Ok(self.codec().validate(bytes, filename)?)
    }

    /// Validates `bytes`, runs the script in the global context, and returns
    /// its last expression value.
    pub fn run_bytecode(&self, bytes: &[u8]) -> Result<Value, LoaderError> {
        let script = self.load(bytes, BYTECODE_FILENAME)?;
        Ok(self.engine().run_in_this_context(&script)?)
    }

    /// Loads the module at `path` through the registry and returns its
    /// exports. Each file is evaluated once; later calls return the cached
    /// exports.
    pub fn require(&self, path: &Path) -> Result<Value, LoaderError> {
        let path = self.absolute(path)?;
        if let Some(module) = self.inner.modules.borrow().get(&path) {
            return Ok(module.exports());
        }
        let handler = self
            .inner
            .registry
            .borrow()
            .handler_for(&path)
            .ok_or_else(|| LoaderError::NoHandler { path: path.clone() })?;

        let module = Module::new(&path);
        // Cached before evaluation so cyclic requires see partial exports.
        self.inner
            .modules
            .borrow_mut()
            .insert(path.clone(), module.clone());
        debug!(path = %path.display(), "loading module");
        if let Err(e) = handler(self, &module) {
            self.inner.modules.borrow_mut().remove(&path);
            return Err(e);
        }
        module.mark_loaded();
        Ok(module.exports())
    }

    /// Resolves a `require` id against `from`.
    ///
    /// Only relative (`./`, `../`) and absolute ids resolve. The path is
    /// tried as given, then with each registered extension appended.
    pub fn resolve(&self, request: &str, from: &Path) -> Result<PathBuf, LoaderError> {
        let not_found = || LoaderError::ModuleNotFound {
            request: request.to_string(),
            from: from.to_path_buf(),
        };
        let is_relative = request == "."
            || request == ".."
            || request.starts_with("./")
            || request.starts_with("../");
        let candidate = if Path::new(request).is_absolute() {
            PathBuf::from(request)
        } else if is_relative {
            from.join(request)
        } else {
            return Err(not_found());
        };
        if candidate.is_file() {
            return Ok(normalize(&candidate));
        }
        let registry = self.inner.registry.borrow();
        let found = registry
            .extensions()
            .map(|ext| {
                let mut name = candidate.clone().into_os_string();
                name.push(".");
                name.push(ext);
                PathBuf::from(name)
            })
            .find(|p| p.is_file())
            .map(|p| normalize(&p));
        found.ok_or_else(not_found)
    }

    fn absolute(&self, path: &Path) -> Result<PathBuf, LoaderError> {
        if path.is_absolute() {
            return Ok(normalize(path));
        }
        let cwd = std::env::current_dir().map_err(|source| LoaderError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(normalize(&cwd.join(path)))
    }

    /// Builds the `require` function handed to modules in `dir`.
    fn require_function(&self, dir: PathBuf) -> Value {
        let weak = Rc::downgrade(&self.inner);
        Value::native("require", move |_engine, _this, args| {
            let inner = weak
                .upgrade()
                .ok_or_else(|| EngineError::Host("module loader was dropped".to_string()))?;
            let loader = Loader { inner };
            let Some(Value::Str(request)) = args.first() else {
                return Err(EngineError::Type(
                    "require id must be a string".to_string(),
                ));
            };
            let path = loader.resolve(request, &dir).map_err(into_engine_error)?;
            loader.require(&path).map_err(into_engine_error)
        })
    }

    /// Calls a module wrapper with `this = exports` and the module arguments.
    pub(crate) fn invoke_wrapper(&self, module: &Module, wrapper: Value) -> Result<(), LoaderError> {
        if wrapper.type_of() != "function" {
            return Err(LoaderError::NotAModule {
                path: module.filename().to_path_buf(),
            });
        }
        let exports = module.exports();
        let args = [
            exports.clone(),
            self.require_function(module.dirname().to_path_buf()),
            module.value(),
            Value::string(module.filename().display().to_string()),
            Value::string(module.dirname().display().to_string()),
            self.inner.process.clone(),
            Value::Object(Rc::clone(self.engine().global_object())),
        ];
        self.engine().call(&wrapper, exports, &args)?;
        Ok(())
    }
}

/// Handler for compiled files: validate, evaluate to the wrapper, call it.
pub(crate) fn compiled_handler(loader: &Loader, module: &Module) -> Result<(), LoaderError> {
    let bytes = std::fs::read(module.filename()).map_err(|source| LoaderError::Io {
        path: module.filename().to_path_buf(),
        source,
    })?;
    let filename = module.filename().display().to_string();
    let script = loader.codec().validate(&bytes, &filename)?;
    let wrapper = loader.engine().run_in_this_context(&script)?;
    loader.invoke_wrapper(module, wrapper)
}

/// Handler for plain source files, so compiled and source modules can
/// require each other.
pub(crate) fn source_handler(loader: &Loader, module: &Module) -> Result<(), LoaderError> {
    let text = std::fs::read_to_string(module.filename()).map_err(|source| LoaderError::Io {
        path: module.filename().to_path_buf(),
        source,
    })?;
    let engine = loader.engine();
    let wrapped = engine.wrap_module(strip_shebang(&text));
    let filename = module.filename().display().to_string();
    let script = engine.compile_script(&wrapped, &filename)?;
    let wrapper = engine.run_in_this_context(&script)?;
    loader.invoke_wrapper(module, wrapper)
}

fn into_engine_error(err: LoaderError) -> EngineError {
    match err {
        LoaderError::Engine(e) => e,
        other => EngineError::Host(other.to_string()),
    }
}

fn process_object() -> Value {
    let mut process = Object::new();
    process.set("platform", Value::string(std::env::consts::OS));
    process.set("version", Value::string(format!("v{ENGINE_LINE}")));
    process.set("argv", Value::array(Vec::new()));
    process.set("env", Value::object(Object::new()));
    Value::object(process)
}

/// Removes `.` and `..` components without touching the filesystem.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_cache::{compile, CompileOptions};
    use kiln_common::{ErrorKind, SourceUnit};
    use kiln_engine::{BuildIdentity, EngineFlags};

    fn loader() -> Loader {
        let engine = Engine::with_flags(BuildIdentity::current(), EngineFlags::code_cache());
        engine.capture_console();
        Loader::new(engine)
    }

    fn write_module(loader: &Loader, path: &Path, src: &str) {
        let blob = compile(loader.engine(), &SourceUnit::new(src), CompileOptions::default()).unwrap();
        std::fs::write(path, blob).unwrap();
    }

    #[test]
    fn run_bytecode_returns_last_value() {
        let loader = loader();
        let blob = compile(
            loader.engine(),
            &SourceUnit::script("console.log('hi');43;"),
            CompileOptions::default(),
        )
        .unwrap();
        let value = loader.run_bytecode(&blob).unwrap();
        assert_eq!(value.as_number(), Some(43.0));
        assert_eq!(loader.engine().take_console(), vec!["hi"]);
    }

    #[test]
    fn load_keeps_the_filename() {
        let loader = loader();
        let blob = compile(
            loader.engine(),
            &SourceUnit::script("1"),
            CompileOptions { compress: true },
        )
        .unwrap();
        let script = loader.load(&blob, "/srv/one.xxc").unwrap();
        assert_eq!(script.filename(), "/srv/one.xxc");
    }

    #[test]
    fn compiled_module_exports_and_arguments() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("main.xxc");
        let loader = loader();
        write_module(
            &loader,
            &path,
            "exports.same = this === exports\n\
             exports.file = __filename\n\
             exports.dir = __dirname\n\
             exports.answer = 43",
        );

        let exports = loader.require(&path).unwrap();
        let obj = exports.as_object().unwrap().borrow();
        assert!(matches!(obj.get("same"), Some(Value::Bool(true))));
        assert_eq!(
            obj.get("file").and_then(Value::as_str),
            Some(path.display().to_string().as_str())
        );
        assert_eq!(
            obj.get("dir").and_then(Value::as_str),
            Some(dir.path().display().to_string().as_str())
        );
        assert_eq!(obj.get("answer").and_then(Value::as_number), Some(43.0));
    }

    #[test]
    fn relative_require_between_compiled_modules() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("lib")).unwrap();
        let loader = loader();
        write_module(
            &loader,
            &dir.path().join("lib").join("math.xxc"),
            "module.exports = { add: function (a, b) { return a + b; } }",
        );
        write_module(
            &loader,
            &dir.path().join("main.xxc"),
            "let math = require('./lib/math')\nmodule.exports = math.add(40, 3)",
        );
        let exports = loader.require(&dir.path().join("main.xxc")).unwrap();
        assert_eq!(exports.as_number(), Some(43.0));
    }

    #[test]
    fn modules_are_evaluated_once() {
        let dir = tempfile::tempdir().unwrap();
        let loader = loader();
        let path = dir.path().join("once.xxc");
        write_module(&loader, &path, "console.log('evaluated')\nexports.n = 1");
        let a = loader.require(&path).unwrap();
        let b = loader.require(&dir.path().join(".").join("once.xxc")).unwrap();
        assert!(a.strict_equals(&b));
        assert_eq!(loader.engine().take_console(), vec!["evaluated"]);
    }

    #[test]
    fn source_module_can_require_compiled() {
        let dir = tempfile::tempdir().unwrap();
        let loader = loader();
        write_module(&loader, &dir.path().join("dep.xxc"), "module.exports = 'compiled'");
        std::fs::write(
            dir.path().join("entry.js"),
            "#!/usr/bin/env kiln\nmodule.exports = require('./dep') + ' via source'",
        )
        .unwrap();
        let exports = loader.require(&dir.path().join("entry.js")).unwrap();
        assert_eq!(exports.as_str(), Some("compiled via source"));
    }

    #[test]
    fn missing_dependency_surfaces_as_error() {
        let dir = tempfile::tempdir().unwrap();
        let loader = loader();
        let path = dir.path().join("main.xxc");
        write_module(&loader, &path, "require('./nowhere')");
        let err = loader.require(&path).unwrap_err();
        assert!(err.to_string().contains("cannot find module './nowhere'"));
        // A failed module is not cached.
        assert!(loader.require(&path).is_err());
    }

    #[test]
    fn bare_ids_do_not_resolve() {
        let loader = loader();
        let err = loader.resolve("fs", Path::new("/tmp")).unwrap_err();
        assert!(matches!(err, LoaderError::ModuleNotFound { .. }));
    }

    #[test]
    fn unknown_extension_has_no_handler() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, "hello").unwrap();
        let err = loader().require(&path).unwrap_err();
        assert!(matches!(err, LoaderError::NoHandler { .. }));
    }

    #[test]
    fn blob_from_other_line_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("old.xxc");
        let other = Engine::with_flags(BuildIdentity::new("0.9", "old"), EngineFlags::code_cache());
        let blob = compile(&other, &SourceUnit::new("exports.x = 1"), CompileOptions::default())
            .unwrap();
        std::fs::write(&path, blob).unwrap();
        let err = loader().require(&path).unwrap_err();
        assert_eq!(
            err.as_cache_error().map(|e| e.kind()),
            Some(ErrorKind::CacheRejected)
        );
    }

    #[test]
    fn custom_handler_can_be_registered() {
        fn constant(_: &Loader, module: &Module) -> Result<(), LoaderError> {
            if let Value::Object(m) = module.value() {
                m.borrow_mut().set("exports", Value::Number(7.0));
            }
            Ok(())
        }
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x.const");
        std::fs::write(&path, "").unwrap();
        let loader = loader();
        loader.register("const", constant);
        assert_eq!(loader.require(&path).unwrap().as_number(), Some(7.0));
    }

    #[test]
    fn normalize_removes_dot_components() {
        assert_eq!(
            normalize(Path::new("/a/./b/../c.xxc")),
            PathBuf::from("/a/c.xxc")
        );
    }
}
