//! Script Importer - fetches scripts from the React Native packager
//!
//! This crate downloads the debugger worker entry point and the application
//! bundles that the worker asks for via `importScripts`, and stores them under
//! a sources storage directory so a debugger can map them back to files.
//!
//! The [`ScriptFetcher`] trait is the seam the app worker consumes; tests swap
//! in an in-memory implementation.
//!
//! # Example
//!
//! ```no_run
//! use script_importer::{HttpScriptImporter, ScriptFetcher};
//!
//! #[tokio::main]
//! async fn main() {
//!     let importer = HttpScriptImporter::new("/tmp/project/.vscode/.react");
//!
//!     importer
//!         .download_debugger_worker("localhost:8081", "debuggerWorker.js")
//!         .await
//!         .unwrap();
//!
//!     let script = importer
//!         .fetch("http://localhost:8081/index.ios.bundle?platform=ios", 9090)
//!         .await
//!         .unwrap();
//!     println!("stored {} bytes at {}", script.contents.len(), script.filepath.display());
//! }
//! ```

mod error;
mod fetcher;
mod http;
pub mod source_map;

pub use error::FetchError;
pub use fetcher::{FetchedScript, ScriptFetcher};
pub use http::{DEBUGGER_WORKER_FILE_BASENAME, HttpScriptImporter};
