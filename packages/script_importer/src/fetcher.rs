use futures::future::BoxFuture;
use std::path::PathBuf;

use crate::FetchError;

/// A script downloaded from the packager and materialized on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedScript {
    /// Where the script was stored locally
    pub filepath: PathBuf,
    /// The script text, after any source-map rewriting
    pub contents: String,
}

/// Retrieves script source given a URL.
///
/// Implementations must be idempotent per URL: fetching the same URL twice
/// stores the script at the same local path.
pub trait ScriptFetcher: Send + Sync + 'static {
    fn fetch(
        &self,
        url: &str,
        debug_adapter_port: u16,
    ) -> BoxFuture<'static, Result<FetchedScript, FetchError>>;
}
