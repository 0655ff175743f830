//! Runtime configuration for Shipyard.
//!
//! Values are layered: built-in defaults, then `shipyard.toml`, then
//! `SHIPYARD_*` environment variables, then CLI flags. The resulting
//! [`ShipyardConfig`] is constructed once at startup and handed to each
//! component; nothing reads ambient configuration afterwards.
//!
//! # Configuration File Format
//!
//! ```toml
//! [server]
//! listen = "0.0.0.0:8000"
//! public_url = "http://localhost:8000"
//!
//! [paths]
//! deployments_dir = "deployments"
//! serving_dir = "Deployed"
//!
//! [build]
//! step_timeout_secs = 900
//! cleanup_grace_secs = 10
//! rewrite_homepage = true
//! npm_cmd = "npm"
//!
//! [processes]
//! go_base_port = 8000
//! python_base_port = 5000
//! host = "localhost"
//!
//! [source]
//! git_host = "github.com"
//! default_owner = "octocat"
//!
//! [proxy]
//! host = "apps.example.com"
//!
//! [logging]
//! json = false
//! dir = "logs"
//! ```

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Default config file name looked up in the working directory.
pub const CONFIG_FILE_NAME: &str = "shipyard.toml";

/// Prefix for environment overrides.
pub const ENV_PREFIX: &str = "SHIPYARD_";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub listen: SocketAddr,
    /// Prefix of the URLs returned for published projects.
    pub public_url: String,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], 8000)),
            public_url: "http://localhost:8000".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsSection {
    /// Transient root: one working directory per deployment.
    pub deployments_dir: PathBuf,
    /// Permanent serving root: one entry per clean project name.
    pub serving_dir: PathBuf,
}

impl Default for PathsSection {
    fn default() -> Self {
        Self {
            deployments_dir: PathBuf::from("deployments"),
            serving_dir: PathBuf::from("Deployed"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildSection {
    /// Upper bound for every subprocess (clone, install, build).
    pub step_timeout_secs: u64,
    /// Delay before a published deployment's working directory is removed.
    pub cleanup_grace_secs: u64,
    /// Set `homepage` in `package.json` to the serving path before building.
    pub rewrite_homepage: bool,
    pub git_cmd: String,
    pub npm_cmd: String,
    pub go_cmd: String,
    pub python_cmd: String,
}

impl Default for BuildSection {
    fn default() -> Self {
        Self {
            step_timeout_secs: 900,
            cleanup_grace_secs: 10,
            rewrite_homepage: true,
            git_cmd: "git".to_string(),
            npm_cmd: "npm".to_string(),
            go_cmd: "go".to_string(),
            python_cmd: "python".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessesSection {
    pub go_base_port: u16,
    pub python_base_port: u16,
    /// Host used in the URLs returned for launched processes.
    pub host: String,
}

impl Default for ProcessesSection {
    fn default() -> Self {
        Self {
            go_base_port: 8000,
            python_base_port: 5000,
            host: "localhost".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceSection {
    pub git_host: String,
    /// Owner used when a deploy request does not name one.
    pub default_owner: Option<String>,
}

impl Default for SourceSection {
    fn default() -> Self {
        Self {
            git_host: "github.com".to_string(),
            default_owner: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxySection {
    /// Host suffix for `{project}.{host}` routes.
    pub host: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    pub json: bool,
    /// Directory for daily-rolling log files, in addition to stderr.
    pub dir: Option<PathBuf>,
}

/// Complete Shipyard configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShipyardConfig {
    pub server: ServerSection,
    pub paths: PathsSection,
    pub build: BuildSection,
    pub processes: ProcessesSection,
    pub source: SourceSection,
    pub proxy: ProxySection,
    pub logging: LoggingSection,
}

impl ShipyardConfig {
    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse shipyard.toml")
    }

    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    /// Load an explicit file, or `shipyard.toml` from `dir` when present,
    /// or fall back to defaults.
    pub fn load_or_default(explicit: Option<&Path>, dir: &Path) -> Result<Self> {
        match explicit {
            Some(path) => Self::load(path),
            None => {
                let path = dir.join(CONFIG_FILE_NAME);
                if path.exists() {
                    Self::load(&path)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    /// Apply `SHIPYARD_*` overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary variable lookup.
    pub fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        let var = |name: &str| lookup(&format!("{}{}", ENV_PREFIX, name));

        if let Some(v) = var("LISTEN") {
            self.server.listen = v
                .parse()
                .with_context(|| format!("Invalid SHIPYARD_LISTEN '{}'", v))?;
        }
        if let Some(v) = var("PUBLIC_URL") {
            self.server.public_url = v;
        }
        if let Some(v) = var("DEPLOYMENTS_DIR") {
            self.paths.deployments_dir = PathBuf::from(v);
        }
        if let Some(v) = var("SERVING_DIR") {
            self.paths.serving_dir = PathBuf::from(v);
        }
        if let Some(v) = var("STEP_TIMEOUT_SECS") {
            self.build.step_timeout_secs = parse_number("STEP_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = var("CLEANUP_GRACE_SECS") {
            self.build.cleanup_grace_secs = parse_number("CLEANUP_GRACE_SECS", &v)?;
        }
        if let Some(v) = var("REWRITE_HOMEPAGE") {
            self.build.rewrite_homepage = v != "false" && v != "0";
        }
        if let Some(v) = var("GIT_CMD") {
            self.build.git_cmd = v;
        }
        if let Some(v) = var("NPM_CMD") {
            self.build.npm_cmd = v;
        }
        if let Some(v) = var("GO_CMD") {
            self.build.go_cmd = v;
        }
        if let Some(v) = var("PYTHON_CMD") {
            self.build.python_cmd = v;
        }
        if let Some(v) = var("GO_BASE_PORT") {
            self.processes.go_base_port = parse_number("GO_BASE_PORT", &v)?;
        }
        if let Some(v) = var("PYTHON_BASE_PORT") {
            self.processes.python_base_port = parse_number("PYTHON_BASE_PORT", &v)?;
        }
        if let Some(v) = var("PROCESS_HOST") {
            self.processes.host = v;
        }
        if let Some(v) = var("GIT_HOST") {
            self.source.git_host = v;
        }
        if let Some(v) = var("DEFAULT_OWNER") {
            self.source.default_owner = Some(v);
        }
        if let Some(v) = var("PROXY_HOST") {
            self.proxy.host = Some(v);
        }
        if let Some(v) = var("LOG_JSON") {
            self.logging.json = v == "true" || v == "1";
        }
        if let Some(v) = var("LOG_DIR") {
            self.logging.dir = Some(PathBuf::from(v));
        }
        Ok(())
    }

    pub fn step_timeout(&self) -> Duration {
        Duration::from_secs(self.build.step_timeout_secs)
    }

    pub fn cleanup_grace(&self) -> Duration {
        Duration::from_secs(self.build.cleanup_grace_secs)
    }

    /// Public URL for a published project.
    pub fn project_url(&self, serving_key: &str) -> String {
        format!(
            "{}/projects/{}",
            self.server.public_url.trim_end_matches('/'),
            serving_key
        )
    }

    /// Validate the configuration and return a list of warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.build.step_timeout_secs == 0 {
            warnings.push("build.step_timeout_secs is 0: every subprocess will time out".to_string());
        }
        if self.processes.go_base_port == self.processes.python_base_port {
            warnings.push(format!(
                "processes.go_base_port and processes.python_base_port are both {}",
                self.processes.go_base_port
            ));
        }
        for (name, base) in [
            ("go_base_port", self.processes.go_base_port),
            ("python_base_port", self.processes.python_base_port),
        ] {
            if u32::from(base) + 999 > u32::from(u16::MAX) {
                warnings.push(format!("processes.{} {} leaves no room for 1000 ports", name, base));
            }
        }
        if self.paths.deployments_dir == self.paths.serving_dir {
            warnings.push("paths.deployments_dir and paths.serving_dir must differ".to_string());
        }
        if !self.server.public_url.starts_with("http://")
            && !self.server.public_url.starts_with("https://")
        {
            warnings.push(format!(
                "server.public_url '{}' is not an http(s) URL",
                self.server.public_url
            ));
        }

        warnings
    }
}

fn parse_number<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| anyhow::anyhow!("Invalid {}{} '{}'", ENV_PREFIX, name, value))
}
