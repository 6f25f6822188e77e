//! Runtime configuration parsed from `dohgate.toml`.
//!
//! The override table, block patterns, and upstream region table are
//! deployment data: they load once at startup, validate fatally, and are
//! never mutated while serving.

use std::{
    collections::HashMap,
    fs,
    net::SocketAddr,
    path::{Path, PathBuf},
};

use directories::ProjectDirs;
use serde::Deserialize;
use thiserror::Error;

/// Startup-fatal configuration failures.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unable to read config at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("unable to write config at {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed config at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: Box<toml::de::Error>,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub cache: CacheSection,
    #[serde(default)]
    pub upstream: UpstreamSection,
    #[serde(default)]
    pub overrides: OverridesSection,
    #[serde(default)]
    pub blocklist: BlocklistSection,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Optional second listener serving Prometheus metrics.
    #[serde(default)]
    pub metrics_listen: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheSection {
    /// How long a forwarded answer may be served from cache, in seconds.
    #[serde(default = "default_cache_ttl")]
    pub ttl_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamSection {
    /// Endpoint used when the origin region is absent or unmapped.
    #[serde(default = "default_upstream_endpoint")]
    pub default: String,
    /// Region code (case-sensitive, e.g. "BD") to DoH endpoint.
    #[serde(default)]
    pub regions: HashMap<String, String>,
    #[serde(default = "default_upstream_timeout")]
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OverridesSection {
    /// TTL stamped on answers synthesized from the override table.
    #[serde(default = "default_override_ttl")]
    pub ttl: u32,
    /// Exact domain name to preferred addresses, checked before upstream.
    #[serde(default)]
    pub hosts: HashMap<String, Vec<String>>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct BlocklistSection {
    /// Literal substrings, or globs when the pattern contains `*`.
    #[serde(default)]
    pub patterns: Vec<String>,
}

fn default_listen() -> String {
    "127.0.0.1:8053".into()
}

fn default_cache_ttl() -> u64 {
    300
}

fn default_upstream_endpoint() -> String {
    "https://cloudflare-dns.com/dns-query".into()
}

fn default_upstream_timeout() -> u64 {
    5
}

fn default_override_ttl() -> u32 {
    3600
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            metrics_listen: None,
        }
    }
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            ttl_seconds: default_cache_ttl(),
        }
    }
}

impl Default for UpstreamSection {
    fn default() -> Self {
        Self {
            default: default_upstream_endpoint(),
            regions: HashMap::new(),
            timeout_seconds: default_upstream_timeout(),
        }
    }
}

impl Default for OverridesSection {
    fn default() -> Self {
        Self {
            ttl: default_override_ttl(),
            hosts: HashMap::new(),
        }
    }
}

impl RuntimeConfig {
    /// Read and validate a configuration file.
    pub fn load_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source: Box::new(source),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject tables the proxy must not serve traffic with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_socket(&self.server.listen, "server.listen")?;
        if let Some(metrics) = &self.server.metrics_listen {
            check_socket(metrics, "server.metrics_listen")?;
        }

        if self.upstream.default.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "upstream.default endpoint must not be empty".into(),
            ));
        }
        for (region, endpoint) in &self.upstream.regions {
            if region.trim().is_empty() {
                return Err(ConfigError::Invalid(
                    "upstream.regions contains an empty region code".into(),
                ));
            }
            if endpoint.trim().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "upstream.regions entry {region:?} has an empty endpoint"
                )));
            }
        }

        for (name, addresses) in &self.overrides.hosts {
            if name.trim().is_empty() {
                return Err(ConfigError::Invalid(
                    "overrides.hosts contains an empty domain name".into(),
                ));
            }
            if addresses.is_empty() || addresses.iter().any(|a| a.trim().is_empty()) {
                return Err(ConfigError::Invalid(format!(
                    "overrides.hosts entry {name:?} must list at least one non-empty address"
                )));
            }
        }

        if self.blocklist.patterns.iter().any(|p| p.trim().is_empty()) {
            return Err(ConfigError::Invalid(
                "blocklist.patterns contains an empty pattern".into(),
            ));
        }

        Ok(())
    }
}

fn check_socket(address: &str, label: &str) -> Result<(), ConfigError> {
    if address.trim().is_empty() {
        return Err(ConfigError::Invalid(format!("{label} address is empty")));
    }
    address
        .parse::<SocketAddr>()
        .map_err(|_| ConfigError::Invalid(format!("{label} address is invalid: {address}")))?;
    Ok(())
}

/// Commented starter configuration written on first run.
const DEFAULT_CONFIG: &str = r#"# dohgate configuration

[server]
listen = "127.0.0.1:8053"
# metrics_listen = "127.0.0.1:9095"

[cache]
ttl_seconds = 300

[upstream]
default = "https://cloudflare-dns.com/dns-query"
timeout_seconds = 5

# Requests carrying one of these origin region codes are forwarded to the
# mapped resolver instead of the default.
[upstream.regions]
BD = "https://dns.google/dns-query"

[overrides]
ttl = 3600

# Preferred addresses for specific domains (exact names only). Answers are
# synthesized locally and never forwarded upstream.
[overrides.hosts]
"youtube.com" = ["180.87.36.25"]
"facebook.com" = ["157.240.198.35"]
"google.com" = ["142.250.183.206"]
"prothomalo.com" = ["103.101.91.10"]

[blocklist]
patterns = ["doubleclick.net", "*.adnxs.com"]
"#;

/// Resolve the platform-specific default config location.
pub fn default_config_path() -> Result<PathBuf, ConfigError> {
    let dirs = ProjectDirs::from("dev", "dohgate", "dohgate")
        .ok_or_else(|| ConfigError::Invalid("unable to resolve platform config directory".into()))?;
    Ok(dirs.config_dir().join("dohgate.toml"))
}

/// Write the starter configuration, creating parent directories as needed.
pub fn write_default_config(path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|source| ConfigError::Write {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    fs::write(path, DEFAULT_CONFIG).map_err(|source| ConfigError::Write {
        path: path.to_path_buf(),
        source,
    })
}
