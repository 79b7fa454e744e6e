use std::fmt;
use std::path::PathBuf;
use tokio_tungstenite::tungstenite;
use tracing::warn;

/// Failures inside a single sandbox.
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    /// The debugger worker entry file could not be read
    #[error("couldn't read the debugger worker at {}: {source}", path.display())]
    RuntimeStart {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Evaluating code inside the sandbox threw
    #[error("error while evaluating {origin}: {message}")]
    Evaluation { origin: String, message: String },

    /// The sandbox could not be seeded with its bindings
    #[error("couldn't install sandbox bindings: {0}")]
    Bindings(String),

    /// A message arrived but the worker never assigned `onmessage`
    #[error("the debugger worker has not installed an onmessage handler")]
    NoMessageHandler,

    /// The message could not be converted into a sandbox value
    #[error("couldn't convert the message into the sandbox: {0}")]
    Conversion(String),
}

/// Failures of a worker lifetime as seen by its owner.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error(transparent)]
    Sandbox(#[from] SandboxError),

    #[error("failed to spawn the sandbox thread: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("no tokio runtime is available to run script imports")]
    NoRuntime,

    #[error("the worker lifetime is gone")]
    LifetimeGone,
}

/// Failures of the socket to the debugger proxy.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error(transparent)]
    WebSocket(#[from] tungstenite::Error),

    #[error("the connection is closed")]
    Closed,

    #[error("{0}")]
    Other(String),
}

/// Log a warning that tells the user debugging is broken and how to recover.
pub(crate) fn print_debugging_error(message: &str, reason: &dyn fmt::Display) {
    warn!(
        "{}. Debugging won't work: Try reloading the JS from inside the app, or Reconnect the debugger: {}",
        message, reason
    );
}
