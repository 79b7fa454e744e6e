use script_importer::{FetchError, FetchedScript, ScriptFetcher};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::WorkerConfig;
use crate::error::{SandboxError, WorkerError, print_debugging_error};
use crate::sandbox::{ImportRequest, Sandbox};

/// Messages that can be sent to a lifetime's actor thread
pub enum LifetimeCommand {
    Start {
        respond_to: oneshot::Sender<Result<(), SandboxError>>,
    },
    Deliver {
        message: Value,
    },
}

/// A fetch started by `importScripts`, reported back to the actor.
struct ImportDone {
    request: ImportRequest,
    result: Result<FetchedScript, FetchError>,
}

/// One sandbox instance plus the thread that runs it.
///
/// The sandbox is created fresh for every `prepareJSRuntime`. Dropping the
/// handle cancels the lifetime: no further replies go out, in-flight imports
/// are abandoned and the thread exits.
pub struct WorkerLifetime {
    id: u64,
    sender: mpsc::UnboundedSender<LifetimeCommand>,
    cancel: CancellationToken,
}

impl WorkerLifetime {
    /// Spawn the actor thread. Must be called from within a tokio runtime;
    /// that runtime performs the script fetches.
    pub fn spawn(
        id: u64,
        config: WorkerConfig,
        fetcher: Arc<dyn ScriptFetcher>,
        post_reply: impl Fn(Value) + Send + 'static,
    ) -> Result<Self, WorkerError> {
        let host = Handle::try_current().map_err(|_| WorkerError::NoRuntime)?;
        let (sender, receiver) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let actor = LifetimeActor {
            id,
            config,
            fetcher,
            host,
            receiver,
            cancel: cancel.clone(),
        };

        std::thread::Builder::new()
            .name(format!("app-worker-lifetime-{}", id))
            .spawn(move || actor.run(post_reply))
            .map_err(WorkerError::Spawn)?;

        Ok(Self { id, sender, cancel })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Evaluate the debugger worker entry file.
    ///
    /// The returned future does not borrow the lifetime, so the caller may
    /// await it elsewhere while it keeps delivering messages.
    pub fn start(&self) -> impl Future<Output = Result<(), WorkerError>> + Send + 'static {
        let (respond_to, response) = oneshot::channel();
        let sent = self.sender.send(LifetimeCommand::Start { respond_to });

        async move {
            sent.map_err(|_| WorkerError::LifetimeGone)?;
            response.await.map_err(|_| WorkerError::LifetimeGone)??;
            Ok(())
        }
    }

    /// Hand a message to the sandbox's `onmessage`. Fire and forget.
    pub fn post_message(&self, message: Value) -> Result<(), WorkerError> {
        self.sender
            .send(LifetimeCommand::Deliver { message })
            .map_err(|_| WorkerError::LifetimeGone)
    }
}

impl Drop for WorkerLifetime {
    fn drop(&mut self) {
        debug!("Retiring app worker lifetime {}", self.id);
        self.cancel.cancel();
    }
}

/// The state owned by the lifetime thread
struct LifetimeActor {
    id: u64,
    config: WorkerConfig,
    fetcher: Arc<dyn ScriptFetcher>,
    host: Handle,
    receiver: mpsc::UnboundedReceiver<LifetimeCommand>,
    cancel: CancellationToken,
}

impl LifetimeActor {
    fn run(self, post_reply: impl Fn(Value) + Send + 'static) {
        let runtime = match tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
        {
            Ok(runtime) => runtime,
            Err(e) => {
                error!("Failed to build runtime for app worker lifetime {}: {}", self.id, e);
                return;
            }
        };

        let id = self.id;
        runtime.block_on(self.event_loop(post_reply));
        debug!("App worker lifetime {} thread exiting", id);
    }

    async fn event_loop(mut self, post_reply: impl Fn(Value) + Send + 'static) {
        let gate = self.cancel.clone();
        let sandbox = Sandbox::new(self.config.entry_path(), move |reply| {
            if !gate.is_cancelled() {
                post_reply(reply);
            }
        });
        let mut sandbox = match sandbox {
            Ok(sandbox) => sandbox,
            Err(e) => {
                error!("Couldn't create sandbox for lifetime {}: {}", self.id, e);
                self.refuse_commands(e.to_string()).await;
                return;
            }
        };

        let (done_tx, mut done_rx) = mpsc::unbounded_channel::<ImportDone>();

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                Some(done) = done_rx.recv() => {
                    sandbox.complete_import(&done.request, done.result);
                }
                command = self.receiver.recv() => match command {
                    Some(command) => self.handle_command(&mut sandbox, command),
                    None => break,
                },
            }
            self.dispatch_imports(&mut sandbox, &done_tx);
        }
    }

    fn handle_command(&self, sandbox: &mut Sandbox, command: LifetimeCommand) {
        match command {
            LifetimeCommand::Start { respond_to } => {
                let result = sandbox.start();
                if result.is_ok() {
                    info!("Debugger worker loaded from {}", sandbox.entry_path().display());
                }
                let _ = respond_to.send(result);
            }
            LifetimeCommand::Deliver { message } => {
                if let Err(e) = sandbox.post_message(&message) {
                    print_debugging_error(
                        "Unexpected internal error while processing a message from the RN App",
                        &e,
                    );
                }
            }
        }
    }

    /// Start fetches for whatever `importScripts` asked for.
    fn dispatch_imports(&self, sandbox: &mut Sandbox, done_tx: &mpsc::UnboundedSender<ImportDone>) {
        for request in sandbox.take_import_requests() {
            let fetch = self
                .fetcher
                .fetch(&request.url, self.config.debug_adapter_port);
            let cancel = self.cancel.clone();
            let done_tx = done_tx.clone();

            self.host.spawn(async move {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("Abandoning import of <{}>", request.url);
                    }
                    result = fetch => {
                        let _ = done_tx.send(ImportDone { request, result });
                    }
                }
            });
        }
    }

    /// The sandbox never came up: fail starts, drop deliveries.
    async fn refuse_commands(&mut self, reason: String) {
        loop {
            let command = tokio::select! {
                _ = self.cancel.cancelled() => break,
                command = self.receiver.recv() => command,
            };
            match command {
                Some(LifetimeCommand::Start { respond_to }) => {
                    let _ = respond_to.send(Err(SandboxError::Bindings(reason.clone())));
                }
                Some(LifetimeCommand::Deliver { .. }) => {
                    warn!("Dropping message for lifetime {} without a sandbox", self.id);
                }
                None => break,
            }
        }
    }
}
