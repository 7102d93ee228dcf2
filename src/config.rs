//! Configuration: YAML config with `${VAR}` environment expansion
//! (`expand_env_vars`), overlaid by a `clap`-derived CLI surface.

use crate::secret_string::SecretString;
use crate::strategy::Strategy;
use anyhow::{Context, Result};
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use std::{env, fs, path::Path};
use tracing::info;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct WebhookConfig {
    /// A `SecretString`: webhook endpoints commonly carry bearer tokens in
    /// the query string, and this config gets logged in full on startup.
    pub url: SecretString,
    #[serde(default = "default_webhook_timeout_secs")]
    pub timeout_secs: u64,
}

impl WebhookConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn url(&self) -> &str {
        self.url.expose_secret()
    }
}

fn default_webhook_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Webserver {
    #[serde(default = "default_webserver_port")]
    pub port: u16,
}

impl Default for Webserver {
    fn default() -> Self {
        Webserver { port: default_webserver_port() }
    }
}

fn default_webserver_port() -> u16 {
    8080
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    #[serde(default, rename = "namespacesToIgnore")]
    pub namespaces_to_ignore: Vec<String>,
    #[serde(default, rename = "resourcesToIgnore")]
    pub resources_to_ignore: Vec<String>,
    #[serde(default = "default_reload_strategy", rename = "reloadStrategy")]
    pub reload_strategy: Strategy,
    #[serde(default, rename = "reloadOnCreate")]
    pub reload_on_create: bool,
    #[serde(default, rename = "reloadOnDelete")]
    pub reload_on_delete: bool,
    #[serde(default = "default_reconcile_workers", rename = "reconcileWorkers")]
    pub reconcile_workers: usize,
    #[serde(default = "default_queue_workers", rename = "queueWorkers")]
    pub queue_workers: usize,
    #[serde(default = "default_max_retries", rename = "maxRetries")]
    pub max_retries: u32,
    #[serde(default = "default_shutdown_timeout_secs", rename = "shutdownTimeoutSeconds")]
    pub shutdown_timeout_secs: u64,
    #[serde(default)]
    pub webhook: Option<WebhookConfig>,
    #[serde(default, rename = "enableDeploymentConfig")]
    pub enable_deployment_config: bool,
    #[serde(default, rename = "enableArgoRollouts")]
    pub enable_argo_rollouts: bool,
    /// Accepted for compatibility with the CLI flags; no leader
    /// election lives in the reload engine itself (see DESIGN.md).
    #[serde(default, rename = "enableHa")]
    pub enable_ha: bool,
    #[serde(default)]
    pub webserver: Webserver,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            namespaces_to_ignore: Vec::new(),
            resources_to_ignore: Vec::new(),
            reload_strategy: default_reload_strategy(),
            reload_on_create: false,
            reload_on_delete: false,
            reconcile_workers: default_reconcile_workers(),
            queue_workers: default_queue_workers(),
            max_retries: default_max_retries(),
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
            webhook: None,
            enable_deployment_config: false,
            enable_argo_rollouts: false,
            enable_ha: false,
            webserver: Webserver::default(),
        }
    }
}

fn default_reload_strategy() -> Strategy {
    Strategy::Annotation
}
fn default_reconcile_workers() -> usize {
    std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
}
fn default_queue_workers() -> usize {
    4
}
fn default_max_retries() -> u32 {
    crate::queue::DEFAULT_MAX_RETRIES
}
fn default_shutdown_timeout_secs() -> u64 {
    30
}

impl Config {
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    pub fn apply_cli(&mut self, cli: &Cli) {
        if let Some(strategy) = cli.reload_strategy.as_deref().and_then(Strategy::parse) {
            self.reload_strategy = strategy;
        }
        if cli.reload_on_create {
            self.reload_on_create = true;
        }
        if cli.reload_on_delete {
            self.reload_on_delete = true;
        }
        if let Some(namespaces) = &cli.namespaces_to_ignore {
            self.namespaces_to_ignore = namespaces.clone();
        }
        if let Some(resources) = &cli.resources_to_ignore {
            self.resources_to_ignore = resources.clone();
        }
        if let Some(url) = &cli.webhook_url {
            self.webhook =
                Some(WebhookConfig { url: SecretString::new(url.clone()), timeout_secs: default_webhook_timeout_secs() });
        }
        if cli.enable_ha {
            self.enable_ha = true;
        }
        if cli.enable_deployment_config {
            self.enable_deployment_config = true;
        }
        if cli.enable_argo_rollouts {
            self.enable_argo_rollouts = true;
        }
    }
}

/// Flag parsing is kept separate from the YAML config, but the values it
/// produces are consumed directly by the core, so they're modeled here
/// and overlaid onto the loaded [`Config`].
#[derive(Debug, Parser)]
#[command(name = "reloader", version, about = "Rolls workloads when their ConfigMaps/Secrets change")]
pub struct Cli {
    #[arg(long, env = "RELOADER_CONFIG", default_value = "/etc/reloader/config.yaml")]
    pub config_path: String,

    #[arg(long)]
    pub reload_strategy: Option<String>,

    #[arg(long, default_value_t = false)]
    pub reload_on_create: bool,

    #[arg(long, default_value_t = false)]
    pub reload_on_delete: bool,

    #[arg(long, value_delimiter = ',')]
    pub namespaces_to_ignore: Option<Vec<String>>,

    #[arg(long, value_delimiter = ',')]
    pub resources_to_ignore: Option<Vec<String>>,

    #[arg(long, env = "RELOADER_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    #[arg(long, default_value = "text")]
    pub log_format: String,

    #[arg(long, env = "RELOADER_WEBHOOK_URL")]
    pub webhook_url: Option<String>,

    #[arg(long, default_value_t = false)]
    pub enable_ha: bool,

    #[arg(long, default_value_t = false)]
    pub enable_deployment_config: bool,

    #[arg(long, default_value_t = false)]
    pub enable_argo_rollouts: bool,
}

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    info!("Loading config from file {}", path.as_ref().display());
    let yaml_str = fs::read_to_string(&path)
        .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

    let expanded = expand_env_vars(&yaml_str)?;

    let config: Config = serde_yaml_ng::from_str(&expanded)
        .context("Failed to parse YAML config after environment variable expansion")?;

    info!("Parsed valid application config:\n{}", serde_yaml_ng::to_string(&config)?);

    Ok(config)
}

/// Like [`load_config`], but tolerant of a missing file: Reloader can run
/// from CLI flags and environment alone.
pub fn load_config_or_default<P: AsRef<Path>>(path: P) -> Result<Config> {
    if path.as_ref().exists() {
        load_config(path)
    } else {
        info!(path = %path.as_ref().display(), "config file not found, using defaults overlaid by CLI/env");
        Ok(Config::default())
    }
}

/// Replaces `${VAR}` placeholders with environment variables values.
/// Returns an error if any env var is missing or regex fails.
fn expand_env_vars(input: &str) -> Result<String> {
    let regex = regex::Regex::new(r"\$\{([^}]+)}").context("Invalid regex pattern for env var substitution")?;

    let result = regex.replace_all(input, |caps: &regex::Captures| {
        let var_name = &caps[1];
        env::var(var_name).unwrap_or_else(|_| panic!("Missing environment variable: {}", var_name))
    });

    Ok(result.into_owned())
}
