use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use script_importer::DEBUGGER_WORKER_FILE_BASENAME;

// =============================================================================
// File config (figment-deserialized from defaults / app-worker.toml / env vars)
// =============================================================================
//
//   app-worker.toml:  [proxy]
//                     packager_host = "localhost:8088"
//
//   env var:          RN_WORKER_PROXY__PACKAGER_HOST=localhost:8088

/// Name of the optional config file inside the sources storage path.
pub const CONFIG_FILE_NAME: &str = "app-worker.toml";

/// Top-level tunable configuration, deserialized by figment.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub proxy: ProxyFileConfig,
    #[serde(default)]
    pub worker: WorkerFileConfig,
}

/// Debugger proxy connection tunables (lives under `[proxy]`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProxyFileConfig {
    #[serde(default = "default_packager_host")]
    pub packager_host: String,
    /// Reported to the proxy as `name=` in the connection query
    #[serde(default = "default_client_name")]
    pub client_name: String,
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    /// How long `start()` waits before reporting success
    #[serde(default = "default_start_grace_ms")]
    pub start_grace_ms: u64,
    #[serde(default = "default_log_rate_limit_secs")]
    pub log_rate_limit_secs: u64,
}

impl Default for ProxyFileConfig {
    fn default() -> Self {
        Self {
            packager_host: default_packager_host(),
            client_name: default_client_name(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            start_grace_ms: default_start_grace_ms(),
            log_rate_limit_secs: default_log_rate_limit_secs(),
        }
    }
}

/// Sandbox tunables (lives under `[worker]`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkerFileConfig {
    #[serde(default = "default_debug_adapter_port")]
    pub debug_adapter_port: u16,
    #[serde(default = "default_entry_file")]
    pub entry_file: String,
}

impl Default for WorkerFileConfig {
    fn default() -> Self {
        Self {
            debug_adapter_port: default_debug_adapter_port(),
            entry_file: default_entry_file(),
        }
    }
}

fn default_packager_host() -> String {
    "localhost:8081".to_string()
}
fn default_client_name() -> String {
    "vscode".to_string()
}
fn default_reconnect_delay_ms() -> u64 {
    100
}
fn default_start_grace_ms() -> u64 {
    300
}
fn default_log_rate_limit_secs() -> u64 {
    10
}
fn default_debug_adapter_port() -> u16 {
    9090
}
fn default_entry_file() -> String {
    DEBUGGER_WORKER_FILE_BASENAME.to_string()
}

/// Build a figment that layers: defaults → app-worker.toml → RN_WORKER_* env vars.
///
/// Env vars use double-underscore for nesting into sections:
///   `RN_WORKER_WORKER__DEBUG_ADAPTER_PORT=9191`  →  `worker.debug_adapter_port = 9191`
pub fn load_config(storage_dir: &Path) -> figment::Figment {
    use figment::{
        Figment,
        providers::{Env, Format, Serialized, Toml},
    };

    Figment::from(Serialized::defaults(FileConfig::default()))
        .merge(Toml::file(storage_dir.join(CONFIG_FILE_NAME)))
        .merge(Env::prefixed("RN_WORKER_").split("__"))
}

/// Where downloaded scripts live for a given project.
pub fn sources_storage_path(project_root: &Path) -> PathBuf {
    project_root.join(".vscode").join(".react")
}

// =============================================================================
// Runtime config structs (derived from FileConfig)
// =============================================================================

/// Debugger proxy configuration (runtime view).
#[derive(Clone, Debug)]
pub struct ProxyConfig {
    pub packager_host: String,
    pub client_name: String,
    /// Fixed delay between a socket close and the next connection attempt
    pub reconnect_delay: Duration,
    pub start_grace: Duration,
    /// Window for the connected / disconnected log lines
    pub log_rate_limit: Duration,
}

impl ProxyConfig {
    pub fn from_file(fc: &ProxyFileConfig) -> Self {
        Self {
            packager_host: fc.packager_host.clone(),
            client_name: fc.client_name.clone(),
            reconnect_delay: Duration::from_millis(fc.reconnect_delay_ms),
            start_grace: Duration::from_millis(fc.start_grace_ms),
            log_rate_limit: Duration::from_secs(fc.log_rate_limit_secs),
        }
    }

    pub fn debugger_proxy_url(&self) -> String {
        format!(
            "ws://{}/debugger-proxy?role=debugger&name={}",
            self.packager_host, self.client_name
        )
    }
}

/// Sandbox configuration (runtime view).
#[derive(Clone, Debug)]
pub struct WorkerConfig {
    pub sources_storage_path: PathBuf,
    pub entry_file: String,
    /// Handed to the script fetcher with every import
    pub debug_adapter_port: u16,
}

impl WorkerConfig {
    pub fn from_file(fc: &WorkerFileConfig, sources_storage_path: PathBuf) -> Self {
        Self {
            sources_storage_path,
            entry_file: fc.entry_file.clone(),
            debug_adapter_port: fc.debug_adapter_port,
        }
    }

    pub fn entry_path(&self) -> PathBuf {
        self.sources_storage_path.join(&self.entry_file)
    }
}
