//! The fixed global surface installed into every sandbox.

use boa_engine::object::ObjectInitializer;
use boa_engine::property::Attribute;
use boa_engine::{Context, JsResult, JsString, JsValue, NativeFunction, js_string};
use serde_json::Value;
use std::path::Path;
use tracing::{debug, error, info, warn};

use super::host::HostHandle;
use super::modules::{RequireScope, require_function};

const CONSOLE_TARGET: &str = "app_worker::sandbox::console";

/// Seed `context` with `require`, `postMessage`, `importScripts`, `console`,
/// `self`, `onmessage`, `__filename` and `__dirname`.
pub(crate) fn install(context: &mut Context, host: &HostHandle, entry_path: &Path) -> JsResult<()> {
    let dir = entry_path.parent().map(Path::to_path_buf).unwrap_or_default();

    context.register_global_property(
        js_string!("__filename"),
        JsString::from(entry_path.to_string_lossy().as_ref()),
        Attribute::all(),
    )?;
    context.register_global_property(
        js_string!("__dirname"),
        JsString::from(dir.to_string_lossy().as_ref()),
        Attribute::all(),
    )?;

    let global = context.global_object();
    context.register_global_property(js_string!("self"), global, Attribute::all())?;
    context.register_global_property(js_string!("onmessage"), JsValue::null(), Attribute::all())?;

    let console = ObjectInitializer::new(context)
        .function(NativeFunction::from_fn_ptr(console_log), js_string!("log"), 0)
        .function(NativeFunction::from_fn_ptr(console_log), js_string!("info"), 0)
        .function(NativeFunction::from_fn_ptr(console_debug), js_string!("debug"), 0)
        .function(NativeFunction::from_fn_ptr(console_warn), js_string!("warn"), 0)
        .function(NativeFunction::from_fn_ptr(console_error), js_string!("error"), 0)
        .build();
    context.register_global_property(js_string!("console"), console, Attribute::all())?;

    let require = require_function(RequireScope::new(host.clone(), dir), context);
    context.register_global_property(js_string!("require"), require, Attribute::all())?;

    context.register_global_callable(
        js_string!("postMessage"),
        1,
        NativeFunction::from_copy_closure_with_captures(post_message, host.clone()),
    )?;
    context.register_global_callable(
        js_string!("importScripts"),
        1,
        NativeFunction::from_copy_closure_with_captures(import_scripts, host.clone()),
    )?;

    Ok(())
}

fn post_message(
    _this: &JsValue,
    args: &[JsValue],
    host: &HostHandle,
    context: &mut Context,
) -> JsResult<JsValue> {
    let payload = match args.first() {
        Some(value) => value.to_json(context)?.unwrap_or(Value::Null),
        None => Value::Null,
    };
    host.borrow_mut().post_reply(payload);
    Ok(JsValue::undefined())
}

fn import_scripts(
    _this: &JsValue,
    args: &[JsValue],
    host: &HostHandle,
    context: &mut Context,
) -> JsResult<JsValue> {
    for arg in args {
        let url = arg.to_string(context)?.to_std_string_escaped();
        debug!("Sandbox requested script <{}>", url);
        host.borrow_mut().request_import(url);
    }
    Ok(JsValue::undefined())
}

fn console_text(args: &[JsValue], context: &mut Context) -> JsResult<String> {
    let mut parts = Vec::with_capacity(args.len());
    for arg in args {
        let part = if arg.is_object() && !arg.is_callable() {
            match arg.to_json(context) {
                Ok(Some(json)) => json.to_string(),
                _ => arg.to_string(context)?.to_std_string_escaped(),
            }
        } else {
            arg.to_string(context)?.to_std_string_escaped()
        };
        parts.push(part);
    }
    Ok(parts.join(" "))
}

fn console_log(_this: &JsValue, args: &[JsValue], context: &mut Context) -> JsResult<JsValue> {
    let text = console_text(args, context)?;
    info!(target: CONSOLE_TARGET, "{}", text);
    Ok(JsValue::undefined())
}

fn console_debug(_this: &JsValue, args: &[JsValue], context: &mut Context) -> JsResult<JsValue> {
    let text = console_text(args, context)?;
    debug!(target: CONSOLE_TARGET, "{}", text);
    Ok(JsValue::undefined())
}

fn console_warn(_this: &JsValue, args: &[JsValue], context: &mut Context) -> JsResult<JsValue> {
    let text = console_text(args, context)?;
    warn!(target: CONSOLE_TARGET, "{}", text);
    Ok(JsValue::undefined())
}

fn console_error(_this: &JsValue, args: &[JsValue], context: &mut Context) -> JsResult<JsValue> {
    let text = console_text(args, context)?;
    error!(target: CONSOLE_TARGET, "{}", text);
    Ok(JsValue::undefined())
}
