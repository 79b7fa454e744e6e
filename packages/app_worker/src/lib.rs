//! Debugger worker for React Native apps.
//!
//! Keeps a socket open to the packager's debugger proxy and runs the app's
//! JavaScript in a sandbox on the app's behalf. Every `prepareJSRuntime`
//! from the app gets a fresh sandbox ([`WorkerLifetime`]); everything else is
//! relayed into the current one. See [`LifetimeMultiplexer`].

pub mod config;
pub mod error;
pub mod lifetime;
pub mod limiter;
pub mod multiplexer;
pub mod protocol;
pub mod sandbox;
pub mod transport;

pub use config::{FileConfig, ProxyConfig, WorkerConfig};
pub use error::{SandboxError, TransportError, WorkerError};
pub use lifetime::WorkerLifetime;
pub use multiplexer::{LifetimeMultiplexer, MultiplexerHandle};
pub use protocol::{ReplyMessage, WireMessage};
pub use sandbox::Sandbox;
pub use transport::{ProxyConnection, ProxyConnector, WsConnector};
