//! Isolated JavaScript execution for the debugger worker.
//!
//! A [`Sandbox`] owns one `boa_engine` context seeded with a fixed set of
//! bindings. The host talks to it in two directions:
//!
//! - [`Sandbox::post_message`] delivers a message by calling the worker's
//!   `onmessage({ data })`.
//! - Sandboxed code calls `postMessage(reply)` and `importScripts(url)`.
//!   Replies are handed to the callback given at construction, except that a
//!   reply posted after `importScripts` by the same call is held until that
//!   import has been fetched and evaluated ([`Sandbox::complete_import`]).
//!
//! The context is not `Send`; a sandbox lives and dies on one thread.

mod bindings;
mod host;
mod modules;

pub use host::ImportRequest;

use boa_engine::object::ObjectInitializer;
use boa_engine::property::Attribute;
use boa_engine::{Context, JsError, JsValue, Source, js_string};
use script_importer::{FetchError, FetchedScript};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{SandboxError, print_debugging_error};
use host::{HostHandle, HostState};

/// Prepended to the worker source so the file can assign `onmessage`
/// without breaking its line numbers.
const ENTRY_PRELUDE: &str = "var onmessage = null; ";

pub struct Sandbox {
    host: HostHandle,
    context: Context,
    entry_path: PathBuf,
}

impl Sandbox {
    /// Create a sandbox for the worker at `entry_path`. `require` resolves
    /// relative to the entry file's directory.
    pub fn new(
        entry_path: PathBuf,
        post_reply: impl FnMut(Value) + 'static,
    ) -> Result<Self, SandboxError> {
        let host = HostHandle::new(HostState::new(post_reply));
        let mut context = Context::default();
        bindings::install(&mut context, &host, &entry_path)
            .map_err(|e| SandboxError::Bindings(e.to_string()))?;

        Ok(Self {
            host,
            context,
            entry_path,
        })
    }

    pub fn entry_path(&self) -> &Path {
        &self.entry_path
    }

    /// Read the worker entry file and run it in the context.
    pub fn start(&mut self) -> Result<(), SandboxError> {
        let path = self.entry_path.clone();
        let contents =
            std::fs::read_to_string(&path).map_err(|source| SandboxError::RuntimeStart {
                path: path.clone(),
                source,
            })?;

        debug!("Starting debugger worker {}", path.display());
        self.evaluate(&path, &format!("{}{}", ENTRY_PRELUDE, contents))
    }

    /// Deliver a message from the app: `onmessage({ data: payload })`.
    pub fn post_message(&mut self, payload: &Value) -> Result<(), SandboxError> {
        let data = JsValue::from_json(payload, &mut self.context)
            .map_err(|e| SandboxError::Conversion(e.to_string()))?;
        let event = ObjectInitializer::new(&mut self.context)
            .property(js_string!("data"), data, Attribute::all())
            .build();

        let global = self.context.global_object();
        let handler = global
            .get(js_string!("onmessage"), &mut self.context)
            .map_err(|e| evaluation_error("onmessage", e))?;
        let Some(callable) = handler.as_callable() else {
            return Err(SandboxError::NoMessageHandler);
        };

        let result = callable.call(&JsValue::undefined(), &[event.into()], &mut self.context);
        self.run_jobs();
        self.host.borrow_mut().gate.end_call();
        result
            .map(|_| ())
            .map_err(|e| evaluation_error("onmessage", e))
    }

    /// Imports requested by sandboxed code since the last call.
    pub fn take_import_requests(&mut self) -> Vec<ImportRequest> {
        std::mem::take(&mut self.host.borrow_mut().import_requests)
    }

    /// Evaluate a fetched import in this same context, then release the
    /// replies it was holding. A failed fetch or evaluation is logged and the
    /// held replies are dropped.
    pub fn complete_import(&mut self, request: &ImportRequest, fetched: Result<FetchedScript, FetchError>) {
        let outcome = match fetched {
            Ok(script) => self.evaluate(&script.filepath, &script.contents).map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };

        let succeeded = match outcome {
            Ok(()) => {
                debug!("Imported script <{}>", request.url);
                true
            }
            Err(reason) => {
                print_debugging_error(
                    &format!("Couldn't import script at <{}>", request.url),
                    &reason,
                );
                false
            }
        };
        self.host.borrow_mut().finish_import(request.ticket, succeeded);
    }

    /// Whether any reply is being held back by an unfinished import.
    pub fn has_held_replies(&self) -> bool {
        self.host.borrow().gate.held_len() > 0
    }

    fn evaluate(&mut self, path: &Path, code: &str) -> Result<(), SandboxError> {
        let result = self
            .context
            .eval(Source::from_bytes(code.as_bytes()).with_path(path));
        self.run_jobs();
        self.host.borrow_mut().gate.end_call();
        result
            .map(|_| ())
            .map_err(|e| evaluation_error(&path.display().to_string(), e))
    }

    fn run_jobs(&mut self) {
        let _ = self.context.run_jobs();
    }
}

impl Drop for Sandbox {
    fn drop(&mut self) {
        self.host.borrow_mut().modules.clear();
    }
}

fn evaluation_error(origin: &str, error: JsError) -> SandboxError {
    SandboxError::Evaluation {
        origin: origin.to_string(),
        message: error.to_string(),
    }
}
