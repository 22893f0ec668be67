//! Command-line interface definitions using clap.

use crate::error::Result;
use crate::logging::{LogConfig, LogFormat, LogRotation};
use crate::signing;
use crate::state::Config;
use clap::{Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;
use std::time::Duration;
use tracing::Level;

/// Default upstream manifest URL.
const DEFAULT_UPSTREAM_URL: &str =
    "https://raw.githubusercontent.com/nim-lang/packages/master/packages.json";

/// nimpkgdir - Nim package directory service
#[derive(Parser, Debug)]
#[command(name = "nimpkgdir")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Workspace root for per-package build trees.
    #[arg(long, env = "NIMPKGDIR_WORKSPACE", default_value = "/tmp/nimpkgdir")]
    pub workspace: PathBuf,

    /// Local mirror of the upstream package manifest.
    #[arg(long, env = "NIMPKGDIR_PACKAGES_FILE", default_value = "packages.json")]
    pub packages_file: PathBuf,

    /// First-seen history cache file.
    #[arg(long, env = "NIMPKGDIR_CACHE_FILE", default_value = ".cache.json")]
    pub cache_file: PathBuf,

    /// Upstream manifest URL.
    #[arg(long, env = "NIMPKGDIR_UPSTREAM_URL", default_value = DEFAULT_UPSTREAM_URL)]
    pub upstream_url: String,

    /// Path to the nimble binary.
    #[arg(long, env = "NIMPKGDIR_NIMBLE_BIN", default_value = "/usr/bin/nimble")]
    pub nimble_bin: PathBuf,

    /// Path to the nim binary.
    #[arg(long, env = "NIMPKGDIR_NIM_BIN", default_value = "/usr/bin/nim")]
    pub nim_bin: PathBuf,

    /// Install-stage timeout in seconds.
    #[arg(long, env = "NIMPKGDIR_BUILD_TIMEOUT", default_value_t = 240)]
    pub build_timeout: u64,

    /// Per-source-file doc timeout in seconds.
    #[arg(long, env = "NIMPKGDIR_DOC_TIMEOUT", default_value_t = 10)]
    pub doc_timeout: u64,

    /// Minutes before a cached build is considered stale.
    #[arg(long, env = "NIMPKGDIR_BUILD_EXPIRY", default_value_t = 240)]
    pub build_expiry: u64,

    /// Upstream poll interval in seconds.
    #[arg(long, env = "NIMPKGDIR_POLL_INTERVAL", default_value_t = 600)]
    pub poll_interval: u64,

    /// Minisign public key (raw or .pub file path) for /update_package.
    #[arg(long, env = "NIMPKGDIR_UPDATE_PUBLIC_KEY")]
    pub update_public_key: Option<String>,

    /// Public base URL used in feeds and links.
    #[arg(long, env = "NIMPKGDIR_BASE_URL", default_value = "https://nimble.directory")]
    pub base_url: String,

    /// Enable verbose output (-v for debug, -vv for trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Log level: error, warn, info, debug, trace.
    #[arg(long, env = "NIMPKGDIR_LOG_LEVEL", global = true)]
    pub log_level: Option<String>,

    /// Log format: pretty, compact, json.
    #[arg(long, env = "NIMPKGDIR_LOG_FORMAT", global = true)]
    pub log_format: Option<String>,

    /// Log to file (in addition to stderr).
    #[arg(long, env = "NIMPKGDIR_LOG_FILE", global = true)]
    pub log_file: Option<PathBuf>,

    /// Log rotation: hourly, daily, never.
    #[arg(long, env = "NIMPKGDIR_LOG_ROTATION", default_value = "daily", global = true)]
    pub log_rotation: String,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the directory service.
    Serve(ServeArgs),

    /// Run a single poller tick against the upstream manifest and exit.
    PollOnce,

    /// Generate shell completions.
    Completions(CompletionsArgs),
}

#[derive(clap::Args, Debug)]
pub struct ServeArgs {
    /// Host address to bind to.
    #[arg(long, env = "NIMPKGDIR_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Port to listen on.
    #[arg(short, long, env = "NIMPKGDIR_PORT", default_value_t = 8080)]
    pub port: u16,
}

#[derive(clap::Args, Debug)]
pub struct CompletionsArgs {
    /// Shell to generate completions for.
    #[arg(value_enum)]
    pub shell: Shell,
}

impl CompletionsArgs {
    pub fn generate(&self) {
        use clap::CommandFactory;
        let mut cmd = Cli::command();
        let name = cmd.get_name().to_string();
        clap_complete::generate(self.shell, &mut cmd, name, &mut std::io::stdout());
    }
}

impl Cli {
    /// Resolve the service configuration, reading the update key content.
    pub fn to_config(&self) -> Result<Config> {
        let update_public_key = match &self.update_public_key {
            Some(key) => Some(signing::resolve_public_key(key)?),
            None => None,
        };
        Ok(Config {
            workspace: self.workspace.clone(),
            packages_file: self.packages_file.clone(),
            cache_file: self.cache_file.clone(),
            upstream_url: self.upstream_url.clone(),
            nimble_bin: self.nimble_bin.clone(),
            nim_bin: self.nim_bin.clone(),
            build_timeout: Duration::from_secs(self.build_timeout),
            doc_timeout: Duration::from_secs(self.doc_timeout),
            build_expiry: Duration::from_secs(self.build_expiry * 60),
            poll_interval: Duration::from_secs(self.poll_interval),
            update_public_key,
            base_url: self.base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Build the logging configuration from flags and env overrides.
    pub fn log_config(&self) -> LogConfig {
        let mut config = LogConfig::default();

        if self.verbose >= 2 {
            config.level = Level::TRACE;
        } else if self.verbose == 1 {
            config.level = Level::DEBUG;
        } else if let Some(level) = &self.log_level {
            config.filter = Some(level.clone());
        }

        if let Some(format) = &self.log_format {
            if let Ok(f) = format.parse::<LogFormat>() {
                config.format = f;
            }
        }
        if let Ok(rotation) = self.log_rotation.parse::<LogRotation>() {
            config.rotation = rotation;
        }
        if let Some(path) = &self.log_file {
            config.file_path = Some(path.clone());
        }

        config.with_env_overrides()
    }
}
