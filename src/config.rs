//! Configuration management
//!
//! The configuration is read once at process start (file, then environment
//! overrides) and handed to sessions by value. Nothing re-reads it mid-session.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use crate::Result;
use crate::error::Error;
use crate::agent::llm::{models, GenerationConfig};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Workspace directory path (file/terminal sandbox and archive root)
    #[serde(default = "default_workspace")]
    pub workspace: PathBuf,

    /// LLM provider to use ("gemini" or "openai")
    #[serde(default = "default_provider")]
    pub provider: String,

    /// Gemini API key (used when provider is "gemini")
    #[serde(default)]
    pub gemini_api_key: String,

    /// API key for OpenAI-compatible endpoints
    #[serde(default)]
    pub openai_api_key: String,

    /// Base URL for OpenAI-compatible endpoints
    #[serde(default = "default_openai_base_url")]
    pub openai_base_url: String,

    /// Model name or alias
    #[serde(default = "default_model")]
    pub model: String,

    /// Sampling temperature
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Output token cap per invocation
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,

    /// Maximum model cycles per turn
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,

    #[serde(default)]
    pub search: SearchConfig,

    #[serde(default)]
    pub guard: GuardConfig,

    #[serde(default)]
    pub timeouts: TimeoutConfig,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub context: ContextConfig,
}

/// Web search provider settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Tavily API key; search is unavailable when empty
    #[serde(default)]
    pub api_key: String,

    #[serde(default = "default_search_results")]
    pub max_results: usize,

    #[serde(default = "default_search_depth")]
    pub depth: String,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            max_results: default_search_results(),
            depth: default_search_depth(),
        }
    }
}

/// Anti-loop guard policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardConfig {
    #[serde(default = "default_max_repeats")]
    pub max_repeats: usize,

    /// How many recent action fingerprints are remembered
    #[serde(default = "default_guard_window")]
    pub window: usize,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            max_repeats: default_max_repeats(),
            window: default_guard_window(),
        }
    }
}

/// Remote call timeouts, in seconds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    #[serde(default = "default_llm_secs")]
    pub llm_secs: u64,

    #[serde(default = "default_search_secs")]
    pub search_secs: u64,

    #[serde(default = "default_terminal_secs")]
    pub terminal_secs: u64,
}

impl TimeoutConfig {
    pub fn llm(&self) -> Duration {
        Duration::from_secs(self.llm_secs)
    }

    pub fn search(&self) -> Duration {
        Duration::from_secs(self.search_secs)
    }

    pub fn terminal(&self) -> Duration {
        Duration::from_secs(self.terminal_secs)
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            llm_secs: default_llm_secs(),
            search_secs: default_search_secs(),
            terminal_secs: default_terminal_secs(),
        }
    }
}

/// WebSocket gateway settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Base URL of the static front-end, reported to clients on request
    #[serde(default)]
    pub static_base_url: String,
}

impl ServerConfig {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            static_base_url: String::new(),
        }
    }
}

/// Context window settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContextConfig {
    /// Overrides the model's context window when set
    #[serde(default)]
    pub token_budget: Option<usize>,
}

fn default_workspace() -> PathBuf {
    config_dir().join("workspace")
}

fn default_provider() -> String {
    "gemini".to_string()
}

fn default_openai_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_model() -> String {
    "gemini-2.0-flash".to_string()
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_tokens() -> usize {
    4096
}

fn default_max_iterations() -> usize {
    20
}

fn default_search_results() -> usize {
    5
}

fn default_search_depth() -> String {
    "advanced".to_string()
}

fn default_max_repeats() -> usize {
    3
}

fn default_guard_window() -> usize {
    5
}

fn default_llm_secs() -> u64 {
    60
}

fn default_search_secs() -> u64 {
    20
}

fn default_terminal_secs() -> u64 {
    30
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8001
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workspace: default_workspace(),
            provider: default_provider(),
            gemini_api_key: String::new(),
            openai_api_key: String::new(),
            openai_base_url: default_openai_base_url(),
            model: default_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            max_iterations: default_max_iterations(),
            search: SearchConfig::default(),
            guard: GuardConfig::default(),
            timeouts: TimeoutConfig::default(),
            server: ServerConfig::default(),
            context: ContextConfig::default(),
        }
    }
}

impl Config {
    /// Generation options for the configured model.
    pub fn generation(&self) -> GenerationConfig {
        let spec = models::resolve_or_custom(&self.model, &self.provider);
        GenerationConfig {
            temperature: self.temperature,
            max_tokens: self.max_tokens.min(spec.max_output_tokens),
            model_id: spec.id.to_string(),
        }
    }

    /// Token budget for a session's live history.
    pub fn token_budget(&self) -> usize {
        self.context
            .token_budget
            .unwrap_or_else(|| models::resolve_or_custom(&self.model, &self.provider).context_window)
    }

    /// Apply environment overrides. Called once, at startup.
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, get: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| get(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("PARLEY_PROVIDER") {
            self.provider = v;
        }
        if let Some(v) = get("PARLEY_MODEL") {
            self.model = v;
        }
        if let Some(v) = get("LLM_TEMPERATURE").and_then(|v| v.parse().ok()) {
            self.temperature = v;
        }
        if let Some(v) = get("LLM_MAX_TOKENS").and_then(|v| v.parse().ok()) {
            self.max_tokens = v;
        }
        if let Some(v) = get("GEMINI_API_KEY") {
            self.gemini_api_key = v;
        }
        if let Some(v) = get("OPENAI_API_KEY") {
            self.openai_api_key = v;
        }
        if let Some(v) = get("OPENAI_BASE_URL") {
            self.openai_base_url = v;
        }
        if let Some(v) = get("TAVILY_API_KEY") {
            self.search.api_key = v;
        }
        if let Some(v) = get("PARLEY_STATIC_BASE_URL") {
            self.server.static_base_url = v;
        }
    }

    /// Directory holding archived conversation ranges.
    pub fn archive_dir(&self) -> PathBuf {
        self.workspace.join("archive")
    }
}

/// Get the config directory path
pub fn config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".parley")
}

/// Get the config file path
pub fn config_path() -> PathBuf {
    config_dir().join("config.json")
}

/// Load configuration from file
pub fn load() -> Result<Config> {
    let path = config_path();

    if !path.exists() {
        return Err(Error::Config(format!(
            "Config not found at {:?}. Run 'parley onboard' first.",
            path
        )));
    }

    load_from(&path)
}

/// Load configuration from file, falling back to defaults, then apply
/// environment overrides.
pub fn load_or_default() -> Result<Config> {
    let path = config_path();
    let mut config = if path.exists() {
        load_from(&path)?
    } else {
        Config::default()
    };
    config.apply_env();
    Ok(config)
}

fn load_from(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)?;
    let config: Config = serde_json::from_str(&content)?;
    Ok(config)
}

/// Save configuration to file
pub fn save(config: &Config) -> Result<()> {
    let path = config_path();

    // Create parent directory
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let content = serde_json::to_string_pretty(config)?;
    std::fs::write(&path, content)?;
    Ok(())
}

/// Write a default configuration and create the workspace.
pub fn onboard() -> Result<Config> {
    let config = if config_path().exists() {
        load()?
    } else {
        let config = Config::default();
        save(&config)?;
        config
    };

    std::fs::create_dir_all(&config.workspace)?;
    std::fs::create_dir_all(config.archive_dir())?;

    Ok(config)
}
