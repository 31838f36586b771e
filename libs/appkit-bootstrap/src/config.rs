use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::config_tree::DEFAULT_PLACES;
use crate::paths::app_root::resolve_app_root;
use crate::sink::LogKind;

// ================= host (process level) configuration =================

/// Process-level settings: where the application lives and how the host logs.
/// Everything the application itself needs comes from its config tree instead.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct HostConfig {
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// Application root; normalized to an absolute path on load.
    #[serde(default)]
    pub root: String,
    #[serde(default = "default_places")]
    pub places: Vec<String>,
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_sec: u64,
    /// Upper bound for each open/close step. Unset means wait as long as the step needs.
    #[serde(default)]
    pub step_timeout_sec: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    #[serde(default = "default_console_level")]
    pub console_level: String,
    /// Per-target console levels, e.g. `sqlx: warn`.
    #[serde(default)]
    pub targets: BTreeMap<String, String>,
}

fn default_places() -> Vec<String> {
    DEFAULT_PLACES.iter().map(|p| p.to_string()).collect()
}

fn default_shutdown_timeout() -> u64 {
    30
}

fn default_console_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            root: String::new(),
            places: default_places(),
            shutdown_timeout_sec: default_shutdown_timeout(),
            step_timeout_sec: None,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            console_level: default_console_level(),
            targets: BTreeMap::new(),
        }
    }
}

impl HostConfig {
    /// Load configuration with layered loading: defaults → YAML file → environment variables.
    /// Also normalizes `server.root` into an absolute path.
    pub fn load_layered<P: AsRef<Path>>(config_path: P) -> Result<Self> {
        use figment::{
            providers::{Env, Format, Serialized, Yaml},
            Figment,
        };

        let figment = Figment::new()
            .merge(Serialized::defaults(HostConfig::default()))
            .merge(Yaml::file(config_path.as_ref()))
            // Example: APPSERVER__SERVER__ROOT=/srv/app maps to server.root
            .merge(Env::prefixed("APPSERVER__").split("__"));

        let mut config: HostConfig = figment
            .extract()
            .with_context(|| "Failed to extract host config from figment".to_string())?;

        normalize_root_inplace(&mut config.server).context("Failed to resolve server.root")?;
        Ok(config)
    }

    /// Load configuration from file or fall back to defaults.
    pub fn load_or_default<P: AsRef<Path>>(config_path: Option<P>) -> Result<Self> {
        match config_path {
            Some(path) => Self::load_layered(path),
            None => {
                let mut c = Self::default();
                normalize_root_inplace(&mut c.server)
                    .context("Failed to resolve server.root (defaults)")?;
                Ok(c)
            }
        }
    }

    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).context("Failed to serialize host config to YAML")
    }

    /// Apply overrides from command line arguments.
    pub fn apply_cli_overrides(&mut self, args: &CliArgs) -> Result<()> {
        if let Some(root) = &args.root {
            self.server.root = root.clone();
            normalize_root_inplace(&mut self.server).context("Failed to resolve --root")?;
        }

        self.logging.console_level = match args.verbose {
            0 => self.logging.console_level.clone(),
            1 => "debug".to_string(),
            _ => "trace".to_string(),
        };
        Ok(())
    }

    pub fn root(&self) -> PathBuf {
        PathBuf::from(&self.server.root)
    }
}

/// Command line arguments relevant to configuration.
#[derive(Debug, Clone, Default)]
pub struct CliArgs {
    pub config: Option<String>,
    pub root: Option<String>,
    pub print_config: bool,
    pub verbose: u8,
}

fn normalize_root_inplace(server: &mut ServerConfig) -> Result<()> {
    let raw = match server.root.trim() {
        "" => None,
        s => Some(s.to_string()),
    };
    let resolved = resolve_app_root(raw)?;
    server.root = resolved.to_string_lossy().into_owned();
    Ok(())
}

// ================= application config sections (from the config tree) =================

/// `config.log`: file sink settings.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(deny_unknown_fields, default)]
pub struct LogConfig {
    /// How often buffered lines are pushed to disk.
    pub write_interval_ms: u64,
    pub write_buffer_bytes: usize,
    /// Days of rotated files to keep; 0 keeps everything.
    pub keep_days: u32,
    pub streams: Vec<LogKind>,
    /// Relative to the application root unless absolute.
    pub dir: String,
    pub file_name: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            write_interval_ms: 3000,
            write_buffer_bytes: 64 * 1024,
            keep_days: 0,
            streams: LogKind::ALL.to_vec(),
            dir: "logs".to_string(),
            file_name: "server.log".to_string(),
        }
    }
}

impl LogConfig {
    pub fn log_path(&self, app_root: &Path) -> PathBuf {
        let dir = Path::new(&self.dir);
        let dir = if dir.is_absolute() {
            dir.to_path_buf()
        } else {
            app_root.join(dir)
        };
        dir.join(&self.file_name)
    }
}

/// `config.databases`: named connection settings.
pub type DatabasesConfig = BTreeMap<String, DatabaseConfig>;

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct DatabaseConfig {
    /// Full DSN; wins over the individual fields.
    #[serde(default)]
    pub dsn: Option<String>,
    /// URL scheme: postgres, mysql, sqlite.
    #[serde(default)]
    pub schema: Option<String>,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub user: Option<String>,
    /// Literal password or `${ENV_VAR}`.
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub database: Option<String>,
    #[serde(default)]
    pub params: BTreeMap<String, String>,
    #[serde(default)]
    pub max_conns: Option<u32>,
}

impl DatabaseConfig {
    pub const DEFAULT_MAX_CONNS: u32 = 5;

    pub fn max_conns(&self) -> u32 {
        self.max_conns.unwrap_or(Self::DEFAULT_MAX_CONNS)
    }

    /// Final connection string for this database.
    pub fn resolve_dsn(&self) -> Result<String> {
        if let Some(dsn) = &self.dsn {
            return expand_env_in_dsn(dsn);
        }
        let scheme = self
            .schema
            .as_deref()
            .context("database needs either 'dsn' or 'schema'")?;
        let password = resolve_password(self.password.as_deref())?;
        build_server_dsn(
            scheme,
            self.host.as_deref(),
            self.port,
            self.user.as_deref(),
            password.as_deref(),
            self.database.as_deref(),
            &self.params,
        )
    }
}

/// `config.application`: which services to run, in declaration order.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct ApplicationConfig {
    pub services: serde_json::Map<String, serde_json::Value>,
}

/// One declared service; `kind` selects the implementation, defaulting to the name.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceDecl {
    pub name: String,
    pub kind: String,
    pub config: serde_json::Value,
}

impl ApplicationConfig {
    pub fn service_decls(&self) -> Vec<ServiceDecl> {
        self.services
            .iter()
            .map(|(name, config)| {
                let kind = config
                    .get("kind")
                    .and_then(|k| k.as_str())
                    .unwrap_or(name)
                    .to_string();
                ServiceDecl {
                    name: name.clone(),
                    kind,
                    config: config.clone(),
                }
            })
            .collect()
    }
}

// ================= DSN helpers =================

/// Replaces `${VARNAME}` with the environment value; a missing variable is an error.
pub fn expand_env_in_dsn(dsn: &str) -> Result<String> {
    let re = regex::Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}")?;

    let mut result = dsn.to_string();
    for cap in re.captures_iter(dsn) {
        let var_name = &cap[1];
        let value = std::env::var(var_name)
            .with_context(|| format!("Environment variable '{var_name}' not found in DSN"))?;
        result = result.replace(&cap[0], &value);
    }
    Ok(result)
}

/// `${VAR}` passwords come from the environment, anything else is literal.
pub fn resolve_password(password: Option<&str>) -> Result<Option<String>> {
    let Some(pwd) = password else {
        return Ok(None);
    };
    match pwd.strip_prefix("${").and_then(|p| p.strip_suffix('}')) {
        Some(var_name) => {
            let resolved = std::env::var(var_name).with_context(|| {
                format!("Environment variable '{var_name}' not found for password")
            })?;
            Ok(Some(resolved))
        }
        None => Ok(Some(pwd.to_string())),
    }
}

/// Builds a server DSN from individual fields, percent-encoding credentials and db name.
pub fn build_server_dsn(
    scheme: &str,
    host: Option<&str>,
    port: Option<u16>,
    user: Option<&str>,
    password: Option<&str>,
    dbname: Option<&str>,
    params: &BTreeMap<String, String>,
) -> Result<String> {
    use url::Url;

    if scheme == "sqlite" {
        let file = dbname.unwrap_or(":memory:");
        return Ok(format!("sqlite:{file}"));
    }

    let host = host.unwrap_or("localhost");
    let mut url = Url::parse(&format!("{scheme}://dummy/"))
        .with_context(|| format!("Invalid scheme: {scheme}"))?;

    url.set_host(Some(host))
        .with_context(|| format!("Invalid host: {host}"))?;
    if let Some(port) = port {
        url.set_port(Some(port))
            .map_err(|_| anyhow::anyhow!("Invalid port: {port}"))?;
    }
    if let Some(user) = user {
        url.set_username(user)
            .map_err(|_| anyhow::anyhow!("Failed to set username: {user}"))?;
    }
    if let Some(password) = password {
        url.set_password(Some(password))
            .map_err(|_| anyhow::anyhow!("Failed to set password"))?;
    }
    match dbname {
        Some(dbname) => url.set_path(&format!("/{}", urlencoding::encode(dbname))),
        None => url.set_path("/"),
    }
    if !params.is_empty() {
        let mut pairs = url.query_pairs_mut();
        for (key, value) in params {
            pairs.append_pair(key, value);
        }
    }

    Ok(url.to_string())
}

#[cfg(test)]
mod tests;
