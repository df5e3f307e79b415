//! Configuration loading.
//!
//! Non-secret settings live in a TOML file; every section has defaults so
//! the file may be partial or absent. Secrets are read from the environment
//! exactly once, in the entry point, into the credential structs at the
//! bottom of this module and handed to component constructors.
//!
//! ```toml
//! [drive]
//! folder_id = "1a2b3c"
//!
//! [embedding]
//! model = "text-embedding-3-large"
//!
//! [index]
//! name = "diary-vector"
//!
//! [sync]
//! window_days = 1
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub drive: DriveConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub chat: ChatConfig,
    #[serde(default)]
    pub local: LocalConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DriveConfig {
    /// Parent folder whose files are synced. `DRIVE_FOLDER_ID` overrides it.
    #[serde(default)]
    pub folder_id: Option<String>,
    #[serde(default = "default_drive_url")]
    pub base_url: String,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for DriveConfig {
    fn default() -> Self {
        Self {
            folder_id: None,
            base_url: default_drive_url(),
            page_size: default_page_size(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_drive_url() -> String {
    "https://www.googleapis.com".to_string()
}
fn default_page_size() -> u32 {
    100
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_model")]
    pub model: String,
    #[serde(default = "default_openai_url")]
    pub base_url: String,
    #[serde(default = "default_embedding_batch")]
    pub batch_size: usize,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: default_embedding_model(),
            base_url: default_openai_url(),
            batch_size: default_embedding_batch(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_embedding_model() -> String {
    "text-embedding-3-large".to_string()
}
fn default_openai_url() -> String {
    "https://api.openai.com".to_string()
}
fn default_embedding_batch() -> usize {
    16
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    #[serde(default = "default_index_name")]
    pub name: String,
    #[serde(default = "default_api_version")]
    pub api_version: String,
    /// Language analyzer for the `content` and `metadata` fields.
    #[serde(default = "default_analyzer")]
    pub analyzer: String,
    /// Name of the HNSW vector-search profile.
    #[serde(default = "default_profile")]
    pub profile: String,
    #[serde(default = "default_index_batch")]
    pub batch_size: usize,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            name: default_index_name(),
            api_version: default_api_version(),
            analyzer: default_analyzer(),
            profile: default_profile(),
            batch_size: default_index_batch(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_index_name() -> String {
    "diary-vector".to_string()
}
fn default_api_version() -> String {
    "2024-07-01".to_string()
}
fn default_analyzer() -> String {
    "ja.microsoft".to_string()
}
fn default_profile() -> String {
    "myHnswProfile".to_string()
}
fn default_index_batch() -> usize {
    100
}

#[derive(Debug, Deserialize, Clone)]
pub struct SyncConfig {
    #[serde(default = "default_window_days")]
    pub window_days: u32,
    /// Count a file modified exactly `window_days` ago as inside the window.
    #[serde(default)]
    pub inclusive_boundary: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            window_days: default_window_days(),
            inclusive_boundary: false,
        }
    }
}

fn default_window_days() -> u32 {
    1
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

fn default_max_retries() -> u32 {
    5
}
fn default_base_delay_ms() -> u64 {
    1000
}
fn default_max_delay_ms() -> u64 {
    32_000
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChatConfig {
    #[serde(default = "default_chat_model")]
    pub model: String,
    #[serde(default = "default_gemini_url")]
    pub base_url: String,
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Number of diary passages retrieved as context.
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
    /// Must contain `{question}` and `{context}`.
    #[serde(default = "default_user_template")]
    pub user_template: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            model: default_chat_model(),
            base_url: default_gemini_url(),
            max_output_tokens: default_max_output_tokens(),
            temperature: default_temperature(),
            top_k: default_top_k(),
            system_prompt: default_system_prompt(),
            user_template: default_user_template(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_chat_model() -> String {
    "gemini-1.5-pro-latest".to_string()
}
fn default_gemini_url() -> String {
    "https://generativelanguage.googleapis.com".to_string()
}
fn default_max_output_tokens() -> u32 {
    256
}
fn default_temperature() -> f32 {
    0.7
}
fn default_top_k() -> usize {
    3
}
fn default_system_prompt() -> String {
    "You are a friendly companion who remembers the user's diary.".to_string()
}
fn default_user_template() -> String {
    "Answer the user's question using the diary entries below.\n\n\
     # Question\n{question}\n\n# Diary entries\n{context}\n"
        .to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct LocalConfig {
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            include_globs: default_include_globs(),
            exclude_globs: Vec::new(),
        }
    }
}

fn default_include_globs() -> Vec<String> {
    vec!["**/*.txt".to_string(), "**/*.docx".to_string()]
}

impl RetryConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

/// Load `path` when it exists, otherwise fall back to defaults.
pub fn load_or_default(path: &Path) -> Result<Config> {
    if path.exists() {
        load_config(path)
    } else {
        tracing::debug!(path = %path.display(), "config file not found, using defaults");
        Ok(Config::default())
    }
}

fn validate(config: &Config) -> Result<()> {
    if config.drive.page_size == 0 || config.drive.page_size > 1000 {
        bail!("drive.page_size must be in [1, 1000]");
    }

    if config.embedding.batch_size == 0 {
        bail!("embedding.batch_size must be > 0");
    }
    if config.embedding.model.trim().is_empty() {
        bail!("embedding.model must not be empty");
    }

    // Azure AI Search accepts at most 1000 actions per indexing request
    if config.index.batch_size == 0 || config.index.batch_size > 1000 {
        bail!("index.batch_size must be in [1, 1000]");
    }
    if config.index.name.trim().is_empty() {
        bail!("index.name must not be empty");
    }

    if config.sync.window_days == 0 {
        bail!("sync.window_days must be >= 1");
    }

    if config.chat.top_k == 0 {
        bail!("chat.top_k must be >= 1");
    }
    for placeholder in ["{question}", "{context}"] {
        if !config.chat.user_template.contains(placeholder) {
            bail!("chat.user_template must contain {}", placeholder);
        }
    }

    Ok(())
}

// ============ Credentials ============

fn require_env(name: &str) -> Result<String> {
    let value =
        std::env::var(name).with_context(|| format!("{} environment variable not set", name))?;
    if value.trim().is_empty() {
        bail!("{} environment variable is empty", name);
    }
    Ok(value)
}

/// Drive access. The bearer token is minted outside this program.
#[derive(Debug, Clone)]
pub struct DriveCredentials {
    pub access_token: String,
    pub folder_id: String,
}

impl DriveCredentials {
    /// Read `GOOGLE_DRIVE_ACCESS_TOKEN`, and `DRIVE_FOLDER_ID` falling back
    /// to `drive.folder_id`.
    pub fn from_env(drive: &DriveConfig) -> Result<Self> {
        let access_token = require_env("GOOGLE_DRIVE_ACCESS_TOKEN")?;
        let folder_id = match std::env::var("DRIVE_FOLDER_ID") {
            Ok(id) if !id.trim().is_empty() => id,
            _ => drive.folder_id.clone().context(
                "drive folder not configured: set DRIVE_FOLDER_ID or drive.folder_id",
            )?,
        };
        Ok(Self {
            access_token,
            folder_id,
        })
    }
}

#[derive(Debug, Clone)]
pub struct OpenAiCredentials {
    pub api_key: String,
}

impl OpenAiCredentials {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            api_key: require_env("OPENAI_API_KEY")?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct SearchCredentials {
    pub endpoint: String,
    pub admin_key: String,
}

impl SearchCredentials {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            endpoint: require_env("AZURE_SEARCH_ENDPOINT")?,
            admin_key: require_env("AZURE_SEARCH_ADMIN_KEY")?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct GeminiCredentials {
    pub api_key: String,
}

impl GeminiCredentials {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            api_key: require_env("GOOGLE_API_KEY")?,
        })
    }
}

/// Default config location, relative to the working directory.
pub fn default_config_path() -> PathBuf {
    PathBuf::from("./config/diary.toml")
}
