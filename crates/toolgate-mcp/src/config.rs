//! Declarative MCP configuration.
//!
//! The document has a settings block and a list of server entries:
//!
//! ```yaml
//! mcp:
//!   settings:
//!     init_timeout: 30
//!     call_timeout: 60
//!     auto_restart: true
//!     max_restarts: 3
//!   servers:
//!     - name: filesystem
//!       command: npx
//!       args: ["-y", "@modelcontextprotocol/server-filesystem", "$HOME"]
//!       env:
//!         LOG_LEVEL: "${MCP_LOG_LEVEL}"
//! ```
//!
//! YAML is the default format; files ending in `.toml` are parsed as TOML.
//! The settings keys also accept their camelCase long forms
//! (`initHandshakeTimeoutSeconds`, `callTimeoutSeconds`, `autoRestart`,
//! `maxRestarts`). Zero or missing values fall back to the defaults.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{McpError, Result};

/// Environment variable naming an explicit config file.
pub const CONFIG_PATH_ENV: &str = "TOOLGATE_MCP_CONFIG";

/// Default handshake (initialize + tools/list) timeout.
pub const DEFAULT_INIT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default tools/call timeout.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(60);

/// Default restart budget per server.
pub const DEFAULT_MAX_RESTARTS: u32 = 3;

/// Candidate files checked relative to the working directory.
const LOCAL_CANDIDATES: &[&str] = &[
    "toolgate.yaml",
    "toolgate.yml",
    "toolgate.toml",
    "config/toolgate.yaml",
];

/// System-wide fallback.
const SYSTEM_CONFIG: &str = "/etc/toolgate/toolgate.yaml";

const APP_NAME: &str = "toolgate";

// ─────────────────────────────────────────────────────────────────────────────
// Server Entries
// ─────────────────────────────────────────────────────────────────────────────

/// Launch configuration for one MCP server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServerConfig {
    /// Unique server name.
    pub name: String,
    /// Command to execute.
    pub command: String,
    /// Command arguments.
    #[serde(default)]
    pub args: Vec<String>,
    /// Environment overlay. Values may reference `$VAR` / `${VAR}`.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Disabled servers are never started.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl ServerConfig {
    /// Create an enabled server entry with no arguments.
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
            enabled: true,
        }
    }

    /// Append an argument.
    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append several arguments.
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Add an environment overlay entry.
    pub fn with_env_var(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Enable or disable the server.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Runtime Settings
// ─────────────────────────────────────────────────────────────────────────────

/// Process-wide timeouts and restart policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RuntimeSettings {
    /// Deadline for `initialize` and `tools/list`.
    pub init_timeout: Duration,
    /// Deadline for each `tools/call`.
    pub call_timeout: Duration,
    /// Restart a server after a transport failure or timeout.
    pub auto_restart: bool,
    /// Restart budget per server.
    pub max_restarts: u32,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            init_timeout: DEFAULT_INIT_TIMEOUT,
            call_timeout: DEFAULT_CALL_TIMEOUT,
            auto_restart: true,
            max_restarts: DEFAULT_MAX_RESTARTS,
        }
    }
}

impl RuntimeSettings {
    /// Set the handshake timeout.
    pub fn with_init_timeout(mut self, timeout: Duration) -> Self {
        self.init_timeout = timeout;
        self
    }

    /// Set the tool call timeout.
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Enable or disable automatic restarts.
    pub fn with_auto_restart(mut self, enabled: bool) -> Self {
        self.auto_restart = enabled;
        self
    }

    /// Set the restart budget.
    pub fn with_max_restarts(mut self, max: u32) -> Self {
        self.max_restarts = max;
        self
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawSettings {
    #[serde(alias = "initHandshakeTimeoutSeconds", alias = "initTimeout")]
    init_timeout: Option<u64>,
    #[serde(alias = "callTimeoutSeconds", alias = "callTimeout")]
    call_timeout: Option<u64>,
    #[serde(alias = "autoRestart")]
    auto_restart: Option<bool>,
    #[serde(alias = "maxRestarts")]
    max_restarts: Option<u32>,
}

impl From<RawSettings> for RuntimeSettings {
    fn from(raw: RawSettings) -> Self {
        let defaults = RuntimeSettings::default();
        let secs = |v: Option<u64>, default: Duration| match v {
            Some(s) if s > 0 => Duration::from_secs(s),
            _ => default,
        };
        Self {
            init_timeout: secs(raw.init_timeout, defaults.init_timeout),
            call_timeout: secs(raw.call_timeout, defaults.call_timeout),
            auto_restart: raw.auto_restart.unwrap_or(defaults.auto_restart),
            max_restarts: match raw.max_restarts {
                Some(n) if n > 0 => n,
                _ => defaults.max_restarts,
            },
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawSection {
    settings: RawSettings,
    servers: Vec<ServerConfig>,
}

/// Accepts both `{mcp: {settings, servers}}` and a bare `{settings, servers}`.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawDocument {
    mcp: Option<RawSection>,
    settings: Option<RawSettings>,
    servers: Option<Vec<ServerConfig>>,
}

impl RawDocument {
    fn into_section(self) -> RawSection {
        match self.mcp {
            Some(section) => section,
            None => RawSection {
                settings: self.settings.unwrap_or_default(),
                servers: self.servers.unwrap_or_default(),
            },
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// McpConfig
// ─────────────────────────────────────────────────────────────────────────────

/// Parsed MCP configuration. Loading never starts anything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct McpConfig {
    /// Timeouts and restart policy.
    pub settings: RuntimeSettings,
    /// Server entries, in declaration order.
    pub servers: Vec<ServerConfig>,
}

/// Supported document formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    /// YAML (default).
    Yaml,
    /// TOML.
    Toml,
}

impl ConfigFormat {
    /// Pick the format from a file extension.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => Self::Toml,
            _ => Self::Yaml,
        }
    }
}

impl McpConfig {
    /// Parse a YAML document.
    pub fn from_yaml(content: &str) -> Result<Self> {
        Self::parse(content, ConfigFormat::Yaml)
    }

    /// Parse a TOML document.
    pub fn from_toml(content: &str) -> Result<Self> {
        Self::parse(content, ConfigFormat::Toml)
    }

    /// Parse a document in the given format and validate it.
    pub fn parse(content: &str, format: ConfigFormat) -> Result<Self> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        let doc: RawDocument = match format {
            ConfigFormat::Yaml => serde_yaml::from_str(content)
                .map_err(|e| McpError::config(format!("invalid YAML: {}", e)))?,
            ConfigFormat::Toml => toml::from_str(content)
                .map_err(|e| McpError::config(format!("invalid TOML: {}", e)))?,
        };
        let section = doc.into_section();
        let config = Self {
            settings: section.settings.into(),
            servers: section.servers,
        };
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a config file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            McpError::config(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::parse(&content, ConfigFormat::from_path(path))
    }

    /// Locate and load the config file, if any.
    ///
    /// A missing config is not an error: MCP support is optional.
    pub fn discover() -> Result<LoadedMcpConfig> {
        let explicit = std::env::var(CONFIG_PATH_ENV).ok();
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        let user_dir = dirs::config_dir().map(|d| d.join(APP_NAME));
        match resolve_config_path(explicit.as_deref(), &cwd, user_dir.as_deref())? {
            Some(path) => {
                let config = Self::from_file(&path)?;
                tracing::info!(
                    path = %path.display(),
                    servers = config.servers.len(),
                    "Loaded MCP configuration"
                );
                Ok(LoadedMcpConfig {
                    config,
                    source: Some(path),
                })
            }
            None => {
                tracing::debug!("No MCP configuration found; MCP disabled");
                Ok(LoadedMcpConfig::default())
            }
        }
    }

    /// Servers that should be started.
    pub fn enabled_servers(&self) -> impl Iterator<Item = &ServerConfig> {
        self.servers.iter().filter(|s| s.enabled)
    }

    /// Look up a server entry by name.
    pub fn server(&self, name: &str) -> Option<&ServerConfig> {
        self.servers.iter().find(|s| s.name == name)
    }

    /// Check names and commands.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for server in &self.servers {
            if server.name.trim().is_empty() {
                return Err(McpError::config("server name cannot be empty"));
            }
            if server.command.trim().is_empty() {
                return Err(McpError::config(format!(
                    "server '{}' has an empty command",
                    server.name
                )));
            }
            if !seen.insert(server.name.as_str()) {
                return Err(McpError::config(format!(
                    "duplicate server name '{}'",
                    server.name
                )));
            }
        }
        Ok(())
    }
}

/// A loaded configuration and where it came from.
#[derive(Debug, Clone, Default)]
pub struct LoadedMcpConfig {
    /// The parsed configuration (empty when nothing was found).
    pub config: McpConfig,
    /// File the configuration was read from.
    pub source: Option<PathBuf>,
}

/// Resolve which config file to load.
///
/// Order: the explicit path (must exist), the local candidates under `cwd`,
/// `user_dir/toolgate.yaml`, then the system-wide file.
pub fn resolve_config_path(
    explicit: Option<&str>,
    cwd: &Path,
    user_dir: Option<&Path>,
) -> Result<Option<PathBuf>> {
    if let Some(path) = explicit.filter(|p| !p.trim().is_empty()) {
        let path = PathBuf::from(path);
        if !path.exists() {
            return Err(McpError::config(format!(
                "{} points to missing file {}",
                CONFIG_PATH_ENV,
                path.display()
            )));
        }
        return Ok(Some(path));
    }

    let mut candidates: Vec<PathBuf> = LOCAL_CANDIDATES.iter().map(|c| cwd.join(c)).collect();
    if let Some(dir) = user_dir {
        candidates.push(dir.join("toolgate.yaml"));
    }
    candidates.push(PathBuf::from(SYSTEM_CONFIG));

    Ok(candidates.into_iter().find(|p| p.is_file()))
}
