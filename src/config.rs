use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_API_URL: &str = "https://api.environments.bunnyshell.com";
const DEFAULT_HOST_SUFFIX: &str = "burrow";

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub source: Option<String>,
    pub api_url: String,
    pub token: Option<String>,
    pub request_timeout: Duration,
    pub context: DefaultContext,
    pub workspace_dir: PathBuf,
    pub ssh_config_path: PathBuf,
    pub host_suffix: String,
    pub kubernetes: KubernetesSettings,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DefaultContext {
    #[serde(default)]
    pub organization: Option<String>,
    #[serde(default)]
    pub project: Option<String>,
    #[serde(default)]
    pub environment: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct KubernetesSettings {
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default = "default_ssh_port")]
    pub ssh_port: u16,
    #[serde(default = "default_local_interface")]
    pub local_interface: String,
    #[serde(default)]
    pub local_port: u16,
}

impl Default for KubernetesSettings {
    fn default() -> Self {
        Self {
            namespace: None,
            ssh_port: default_ssh_port(),
            local_interface: default_local_interface(),
            local_port: 0,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
struct BurrowConfigFile {
    #[serde(default)]
    api_url: Option<String>,
    #[serde(default)]
    token: Option<String>,
    #[serde(default, alias = "timeout", alias = "timeout_secs")]
    request_timeout_secs: Option<u64>,
    #[serde(default)]
    context: DefaultContext,
    #[serde(default)]
    workspace_dir: Option<PathBuf>,
    #[serde(default)]
    ssh_config_path: Option<PathBuf>,
    #[serde(default)]
    host_suffix: Option<String>,
    #[serde(default)]
    kubernetes: KubernetesSettings,
}

impl RuntimeConfig {
    pub fn discover() -> Result<Self> {
        let Some(path) = discover_config_path() else {
            return Ok(Self::from_file(None, BurrowConfigFile::default()).with_env_overrides());
        };

        let raw = fs::read_to_string(&path)
            .with_context(|| format!("failed to read runtime config {}", path.display()))?;
        let parsed = Self::parse(&raw)
            .with_context(|| format!("failed to parse runtime config {}", path.display()))?;
        let mut config = parsed.with_env_overrides();
        config.source = Some(path.display().to_string());
        Ok(config)
    }

    pub fn parse(raw: &str) -> Result<Self> {
        let parsed: BurrowConfigFile = if raw.trim().is_empty() {
            BurrowConfigFile::default()
        } else {
            serde_yaml::from_str(raw)?
        };
        Ok(Self::from_file(None, parsed))
    }

    fn from_file(source: Option<String>, file: BurrowConfigFile) -> Self {
        let config_home = config_home();
        Self {
            source,
            api_url: file
                .api_url
                .filter(|value| !value.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_API_URL.to_string()),
            token: file.token.filter(|value| !value.trim().is_empty()),
            request_timeout: Duration::from_secs(file.request_timeout_secs.unwrap_or(30).max(1)),
            context: file.context,
            workspace_dir: file
                .workspace_dir
                .unwrap_or_else(|| config_home.join("workspace")),
            ssh_config_path: file
                .ssh_config_path
                .unwrap_or_else(default_ssh_config_path),
            host_suffix: file
                .host_suffix
                .filter(|value| !value.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_HOST_SUFFIX.to_string()),
            kubernetes: file.kubernetes,
        }
    }

    fn with_env_overrides(mut self) -> Self {
        if let Ok(token) = std::env::var("BURROW_TOKEN")
            && !token.trim().is_empty()
        {
            self.token = Some(token);
        }
        self
    }

    pub fn host_name(&self, component_name: &str) -> String {
        format!("{component_name}.{}", self.host_suffix)
    }
}

fn default_ssh_port() -> u16 {
    22
}

fn default_local_interface() -> String {
    "127.0.0.1".to_string()
}

fn config_home() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config/burrow")
}

pub fn default_ssh_config_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".ssh/config")
}

fn discover_config_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("BURROW_CONFIG")
        && !path.trim().is_empty()
    {
        return Some(PathBuf::from(path));
    }

    let cwd_candidates = [
        PathBuf::from("burrow.yaml"),
        PathBuf::from("burrow.yml"),
        PathBuf::from(".burrow.yaml"),
    ];
    for candidate in cwd_candidates {
        if candidate.exists() {
            return Some(candidate);
        }
    }

    let user_candidates = [
        config_home().join("config.yaml"),
        config_home().join("config.yml"),
    ];
    user_candidates
        .into_iter()
        .find(|candidate| candidate.exists())
}
