use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Which wire protocol a provider speaks.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ApiStyle {
    #[default]
    Openai,
    Anthropic,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
pub struct ProviderConfig {
    pub name: String,
    pub api_base: String,
    /// Environment variable holding the API key. Local servers need none.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_env_var: Option<String>,
    /// Supported model names. Empty accepts any model.
    #[serde(default)]
    pub models: Vec<String>,
    #[serde(default)]
    pub api_style: ApiStyle,
}

impl ProviderConfig {
    pub fn supports(&self, model: &str) -> bool {
        self.models.is_empty() || self.models.iter().any(|m| m == model)
    }
}

/// Model ids of the form `provider/model`.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct ModelRoles {
    /// Drives the conversation loop.
    pub agent: String,
    pub code: String,
    pub light: String,
}

impl Default for ModelRoles {
    fn default() -> Self {
        Self {
            agent: "openai/gpt-4.1".to_string(),
            code: "openrouter/anthropic/claude-3.5-sonnet".to_string(),
            light: "openai/gpt-4.1-mini".to_string(),
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 2000,
            max_backoff_ms: 30_000,
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(default)]
pub struct Config {
    pub timeout_seconds: u64,
    pub max_iterations: u32,
    pub shell_timeout_seconds: u64,
    pub max_read_lines: u64,
    /// Messages `:compress` keeps verbatim at the end of the history.
    pub compress_keep_recent: u64,
    pub ignored_dirs: Vec<String>,
    /// Extra instructions appended to the built-in system prompt.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    pub log_filter: String,
    // Tables last, so the serialized TOML stays valid.
    pub models: ModelRoles,
    pub retry: RetryConfig,
    pub providers: Vec<ProviderConfig>,
}

fn default_providers() -> Vec<ProviderConfig> {
    vec![
        ProviderConfig {
            name: "openrouter".to_string(),
            api_base: "https://openrouter.ai/api/v1".to_string(),
            api_key_env_var: Some("OPENROUTER_API_KEY".to_string()),
            models: Vec::new(),
            api_style: ApiStyle::Openai,
        },
        ProviderConfig {
            name: "openai".to_string(),
            api_base: "https://api.openai.com/v1".to_string(),
            api_key_env_var: Some("OPENAI_API_KEY".to_string()),
            models: Vec::new(),
            api_style: ApiStyle::Openai,
        },
        ProviderConfig {
            name: "anthropic".to_string(),
            api_base: "https://api.anthropic.com/v1".to_string(),
            api_key_env_var: Some("ANTHROPIC_API_KEY".to_string()),
            models: Vec::new(),
            api_style: ApiStyle::Anthropic,
        },
        ProviderConfig {
            name: "ollama".to_string(),
            api_base: "http://localhost:11434/v1".to_string(),
            api_key_env_var: None,
            models: Vec::new(),
            api_style: ApiStyle::Openai,
        },
    ]
}

impl Default for Config {
    fn default() -> Self {
        Self {
            models: ModelRoles::default(),
            providers: default_providers(),
            timeout_seconds: 600,
            max_iterations: 25,
            shell_timeout_seconds: 120,
            max_read_lines: 1000,
            compress_keep_recent: 10,
            retry: RetryConfig::default(),
            ignored_dirs: [
                "env",
                "venv",
                ".env",
                "node_modules",
                "vendor",
                "__pycache__",
                ".git",
                ".idea",
                ".vscode",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            system_prompt: None,
            log_filter: "info".to_string(),
        }
    }
}

impl Config {
    pub fn provider(&self, name: &str) -> Option<&ProviderConfig> {
        self.providers.iter().find(|p| p.name == name)
    }

    /// Replaces empty or zero fields with their defaults.
    fn fill_defaults(self) -> Self {
        let defaults = Config::default();
        let or_default = |value: String, default: String| {
            if value.trim().is_empty() { default } else { value }
        };
        let nonzero = |value: u64, default: u64| if value == 0 { default } else { value };

        Config {
            models: ModelRoles {
                agent: or_default(self.models.agent, defaults.models.agent),
                code: or_default(self.models.code, defaults.models.code),
                light: or_default(self.models.light, defaults.models.light),
            },
            providers: if self.providers.is_empty() {
                defaults.providers
            } else {
                self.providers
            },
            timeout_seconds: nonzero(self.timeout_seconds, defaults.timeout_seconds),
            max_iterations: if self.max_iterations == 0 {
                defaults.max_iterations
            } else {
                self.max_iterations
            },
            shell_timeout_seconds: nonzero(
                self.shell_timeout_seconds,
                defaults.shell_timeout_seconds,
            ),
            max_read_lines: nonzero(self.max_read_lines, defaults.max_read_lines),
            compress_keep_recent: nonzero(
                self.compress_keep_recent,
                defaults.compress_keep_recent,
            ),
            retry: RetryConfig {
                max_attempts: if self.retry.max_attempts == 0 {
                    defaults.retry.max_attempts
                } else {
                    self.retry.max_attempts
                },
                initial_backoff_ms: nonzero(
                    self.retry.initial_backoff_ms,
                    defaults.retry.initial_backoff_ms,
                ),
                max_backoff_ms: nonzero(self.retry.max_backoff_ms, defaults.retry.max_backoff_ms),
            },
            ignored_dirs: if self.ignored_dirs.is_empty() {
                defaults.ignored_dirs
            } else {
                self.ignored_dirs
            },
            system_prompt: self.system_prompt.filter(|p| !p.trim().is_empty()),
            log_filter: or_default(self.log_filter, defaults.log_filter),
        }
    }
}

pub fn default_config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::new();
    Ok(xdg_dirs.place_config_file("bronie/config.toml")?)
}

/// Loads the config from the XDG config dir, creating it on first run.
pub fn load_or_create() -> Result<Config> {
    load_or_create_at(&default_config_path()?)
}

pub fn load_or_create_at(config_path: &Path) -> Result<Config> {
    if !config_path.exists() {
        let default_config = Config::default();
        let toml_string = toml::to_string_pretty(&default_config)?;

        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(config_path, toml_string)?;

        println!("Created default config at: {}", config_path.display());
        return Ok(default_config);
    }

    let config_string = fs::read_to_string(config_path)
        .with_context(|| format!("Failed to read config '{}'", config_path.display()))?;
    let config: Config = toml::from_str(&config_string)
        .with_context(|| format!("Failed to parse config '{}'", config_path.display()))?;
    let final_config = config.fill_defaults();

    // Write the completed config back so every option is visible.
    let final_toml_string = toml::to_string_pretty(&final_config)?;
    if final_toml_string != config_string {
        fs::write(config_path, final_toml_string)?;
    }

    Ok(final_config)
}
