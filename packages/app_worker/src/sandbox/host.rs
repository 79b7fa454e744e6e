//! Host-side state shared by the native functions of one sandbox.

use boa_engine::JsObject;
use boa_gc::{Finalize, Trace};
use serde_json::Value;
use std::cell::{Ref, RefCell, RefMut};
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::rc::Rc;
use tracing::warn;

/// A script the sandbox asked for via `importScripts`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportRequest {
    pub ticket: u64,
    pub url: String,
}

/// Holds replies back while a script import is in flight.
///
/// Gating is scoped to one call into the sandbox: after `importScripts`, any
/// reply posted by the same call is tagged with that import and released only
/// when it completes. Replies from later, unrelated calls go out directly.
#[derive(Debug, Default)]
pub(crate) struct ReplyGate {
    next_ticket: u64,
    pending: Option<u64>,
    held: VecDeque<(u64, Value)>,
}

impl ReplyGate {
    /// Start a new import; it gates every reply posted until it resolves.
    pub fn open_import(&mut self) -> u64 {
        self.next_ticket += 1;
        self.pending = Some(self.next_ticket);
        self.next_ticket
    }

    /// Returns the reply if it may go out now, or holds it.
    pub fn admit(&mut self, reply: Value) -> Option<Value> {
        match self.pending {
            Some(ticket) => {
                self.held.push_back((ticket, reply));
                None
            }
            None => Some(reply),
        }
    }

    /// Resolve `ticket` and hand back the replies it was holding, in order.
    pub fn resolve(&mut self, ticket: u64) -> Vec<Value> {
        if self.pending == Some(ticket) {
            self.pending = None;
        }
        let (released, kept): (VecDeque<_>, VecDeque<_>) = std::mem::take(&mut self.held)
            .into_iter()
            .partition(|(gate, _)| *gate == ticket);
        self.held = kept;
        released.into_iter().map(|(_, reply)| reply).collect()
    }

    /// The current call into the sandbox returned.
    pub fn end_call(&mut self) {
        self.pending = None;
    }

    #[cfg(test)]
    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn held_len(&self) -> usize {
        self.held.len()
    }
}

pub(crate) struct HostState {
    pub gate: ReplyGate,
    pub import_requests: Vec<ImportRequest>,
    /// CommonJS module objects keyed by resolved path
    pub modules: HashMap<PathBuf, JsObject>,
    post_reply: Box<dyn FnMut(Value)>,
}

impl HostState {
    pub fn new(post_reply: impl FnMut(Value) + 'static) -> Self {
        Self {
            gate: ReplyGate::default(),
            import_requests: Vec::new(),
            modules: HashMap::new(),
            post_reply: Box::new(post_reply),
        }
    }

    /// Sandbox code called `postMessage`.
    pub fn post_reply(&mut self, reply: Value) {
        if let Some(reply) = self.gate.admit(reply) {
            (self.post_reply)(reply);
        }
    }

    /// Sandbox code called `importScripts(url)`.
    pub fn request_import(&mut self, url: String) {
        let ticket = self.gate.open_import();
        self.import_requests.push(ImportRequest { ticket, url });
    }

    /// The import behind `ticket` finished. Held replies go out on success
    /// and are dropped on failure.
    pub fn finish_import(&mut self, ticket: u64, succeeded: bool) {
        let released = self.gate.resolve(ticket);
        if succeeded {
            for reply in released {
                (self.post_reply)(reply);
            }
        } else if !released.is_empty() {
            warn!(
                "Dropping {} repl{} held back by a failed script import",
                released.len(),
                if released.len() == 1 { "y" } else { "ies" }
            );
        }
    }
}

/// Shared handle captured by the sandbox's native functions.
#[derive(Clone, Trace, Finalize)]
pub(crate) struct HostHandle {
    #[unsafe_ignore_trace]
    inner: Rc<RefCell<HostState>>,
}

impl HostHandle {
    pub fn new(state: HostState) -> Self {
        Self {
            inner: Rc::new(RefCell::new(state)),
        }
    }

    pub fn borrow(&self) -> Ref<'_, HostState> {
        self.inner.borrow()
    }

    pub fn borrow_mut(&self) -> RefMut<'_, HostState> {
        self.inner.borrow_mut()
    }
}
