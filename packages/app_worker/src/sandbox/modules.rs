//! CommonJS `require` for code running inside the sandbox.

use boa_engine::object::{FunctionObjectBuilder, ObjectInitializer};
use boa_engine::property::Attribute;
use boa_engine::{
    Context, JsNativeError, JsResult, JsString, JsValue, NativeFunction, Source, js_string,
};
use boa_gc::{Finalize, Trace};
use std::ffi::OsString;
use std::path::{Path, PathBuf};

use super::host::HostHandle;

/// The directory a `require` function resolves relative paths against.
#[derive(Clone, Trace, Finalize)]
pub(crate) struct RequireScope {
    host: HostHandle,
    #[unsafe_ignore_trace]
    dir: PathBuf,
}

impl RequireScope {
    pub fn new(host: HostHandle, dir: PathBuf) -> Self {
        Self { host, dir }
    }
}

/// Build a `require` function bound to `scope`.
pub(crate) fn require_function(scope: RequireScope, context: &mut Context) -> JsValue {
    let native = NativeFunction::from_copy_closure_with_captures(require, scope);
    FunctionObjectBuilder::new(context.realm(), native)
        .name(js_string!("require"))
        .length(1)
        .build()
        .into()
}

fn require(
    _this: &JsValue,
    args: &[JsValue],
    scope: &RequireScope,
    context: &mut Context,
) -> JsResult<JsValue> {
    let request = args
        .first()
        .ok_or_else(|| JsNativeError::typ().with_message("require expects a module path"))?
        .to_string(context)?
        .to_std_string_escaped();

    let resolved = resolve(&request, &scope.dir).ok_or_else(|| {
        JsNativeError::error().with_message(format!("Cannot find module '{}'", request))
    })?;
    // One cache entry per file, however the request spelled it
    let path = std::fs::canonicalize(&resolved).unwrap_or(resolved);

    let cached = scope.host.borrow().modules.get(&path).cloned();
    if let Some(module) = cached {
        return module.get(js_string!("exports"), context);
    }

    let source = std::fs::read_to_string(&path).map_err(|e| {
        JsNativeError::error().with_message(format!(
            "Cannot read module '{}': {}",
            path.display(),
            e
        ))
    })?;

    if path.extension().is_some_and(|ext| ext == "json") {
        return load_json(scope, path, &source, context);
    }
    load_script(scope, path, &source, context)
}

fn load_json(
    scope: &RequireScope,
    path: PathBuf,
    source: &str,
    context: &mut Context,
) -> JsResult<JsValue> {
    let json: serde_json::Value = serde_json::from_str(source).map_err(|e| {
        JsNativeError::syntax().with_message(format!("{}: {}", path.display(), e))
    })?;
    let exports = JsValue::from_json(&json, context)?;
    let module = ObjectInitializer::new(context)
        .property(js_string!("exports"), exports.clone(), Attribute::all())
        .build();
    scope.host.borrow_mut().modules.insert(path, module);
    Ok(exports)
}

fn load_script(
    scope: &RequireScope,
    path: PathBuf,
    source: &str,
    context: &mut Context,
) -> JsResult<JsValue> {
    let filename = JsString::from(path.to_string_lossy().as_ref());
    let dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
    let dirname = JsString::from(dir.to_string_lossy().as_ref());

    let exports = ObjectInitializer::new(context).build();
    let module = ObjectInitializer::new(context)
        .property(js_string!("exports"), exports.clone(), Attribute::all())
        .property(js_string!("id"), filename.clone(), Attribute::all())
        .build();

    // Registered before running so that cycles see the partial exports
    scope
        .host
        .borrow_mut()
        .modules
        .insert(path.clone(), module.clone());

    let wrapped = format!(
        "(function (exports, require, module, __filename, __dirname) {{{}\n}})",
        source
    );
    let child_require = require_function(RequireScope::new(scope.host.clone(), dir), context);

    let result = context
        .eval(Source::from_bytes(wrapped.as_bytes()).with_path(&path))
        .and_then(|wrapper| {
            let function = wrapper.as_callable().ok_or_else(|| {
                JsNativeError::typ().with_message("module wrapper is not callable")
            })?;
            function.call(
                &exports.clone().into(),
                &[
                    exports.into(),
                    child_require,
                    module.clone().into(),
                    filename.into(),
                    dirname.into(),
                ],
                context,
            )
        });

    if let Err(e) = result {
        scope.host.borrow_mut().modules.remove(&path);
        return Err(e);
    }
    module.get(js_string!("exports"), context)
}

/// Resolve a `require` request the way node does for files.
///
/// Relative and absolute requests resolve against `from_dir`; bare names are
/// looked up in `node_modules` directories from `from_dir` upwards.
pub(crate) fn resolve(request: &str, from_dir: &Path) -> Option<PathBuf> {
    let is_path = request.starts_with("./")
        || request.starts_with("../")
        || request == "."
        || request == ".."
        || Path::new(request).is_absolute();

    if is_path {
        return probe(&from_dir.join(request));
    }

    from_dir
        .ancestors()
        .find_map(|dir| probe(&dir.join("node_modules").join(request)))
}

fn probe(base: &Path) -> Option<PathBuf> {
    let candidates = [
        base.to_path_buf(),
        with_suffix(base, ".js"),
        with_suffix(base, ".json"),
        base.join("index.js"),
    ];
    candidates.into_iter().find(|candidate| candidate.is_file())
}

fn with_suffix(base: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(base.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}
