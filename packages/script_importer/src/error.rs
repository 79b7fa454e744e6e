use std::path::PathBuf;

/// Errors that can occur while fetching or storing a script
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// The script URL could not be parsed
    #[error("invalid script url <{url}>: {reason}")]
    InvalidUrl { url: String, reason: String },

    /// The HTTP request itself failed (connect, TLS, body decoding)
    #[error("request to <{url}> failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// The packager answered with a non-success status
    #[error("<{url}> responded with HTTP {status}")]
    Status { url: String, status: u16 },

    /// Writing the downloaded script to the storage path failed
    #[error("failed to store script at {}: {source}", path.display())]
    Store {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
