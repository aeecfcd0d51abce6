//! Configuration loading for Inflamind.
//! Reads inflamind.toml from the current directory or path in INFLAMIND_CONFIG env var,
//! then fills the Gemini API key from the environment.

use secrecy::SecretString;
use serde::{Deserialize, Deserializer, Serialize};
use std::path::Path;

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub gemini: GeminiConfig,
    #[serde(default)]
    pub assistant: AssistantConfig,
}

#[derive(Debug, Deserialize)]
pub struct GeminiConfig {
    #[serde(default, deserialize_with = "deserialize_api_key")]
    pub api_key: Option<SecretString>,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "bool_true")]
    pub search_grounding: bool,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: default_model(),
            base_url: default_base_url(),
            search_grounding: true,
        }
    }
}

fn default_model()    -> String { "gemini-2.5-flash".to_string() }
fn default_base_url() -> String { "https://generativelanguage.googleapis.com/v1beta".to_string() }
fn bool_true()        -> bool   { true }

/// Blank keys are treated the same as a missing key.
fn deserialize_api_key<'de, D>(deserializer: D) -> Result<Option<SecretString>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(secret_from(raw))
}

fn secret_from(raw: Option<String>) -> Option<SecretString> {
    raw.filter(|k| !k.trim().is_empty()).map(SecretString::from)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssistantConfig {
    #[serde(default = "default_system_instruction")]
    pub system_instruction: String,
    #[serde(default = "default_welcome_message")]
    pub welcome_message: String,
    #[serde(default = "default_fallback_answer")]
    pub fallback_answer: String,
    #[serde(default = "default_empty_answer")]
    pub empty_answer: String,
    #[serde(default = "default_suggested_queries")]
    pub suggested_queries: Vec<String>,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            system_instruction: default_system_instruction(),
            welcome_message: default_welcome_message(),
            fallback_answer: default_fallback_answer(),
            empty_answer: default_empty_answer(),
            suggested_queries: default_suggested_queries(),
        }
    }
}

pub const DEFAULT_SYSTEM_INSTRUCTION: &str =
    "你是一個專業的醫學與神經科學專家。你的目標是解釋身體發炎（急性與慢性）如何影響人類的大腦認知、情緒調節與決策能力。請引用最新的醫學觀點。若使用搜尋工具，請務必列出來源。";

pub const DEFAULT_WELCOME_MESSAGE: &str =
    "你好，我是你的醫學研究助理。我可以幫你搜尋並整理關於「身體發炎」與「決策/認知功能」關聯的最新科學研究。請嘗試輸入問題，或點擊下方的範例。";

pub const DEFAULT_FALLBACK_ANSWER: &str =
    "抱歉，目前無法連接到 AI 研究中心，請稍後再試。請檢查您的 API Key 是否支持 Google Search Grounding。";

pub const DEFAULT_EMPTY_ANSWER: &str = "無法取得回應。";

fn default_system_instruction() -> String { DEFAULT_SYSTEM_INSTRUCTION.to_string() }
fn default_welcome_message()    -> String { DEFAULT_WELCOME_MESSAGE.to_string() }
fn default_fallback_answer()    -> String { DEFAULT_FALLBACK_ANSWER.to_string() }
fn default_empty_answer()       -> String { DEFAULT_EMPTY_ANSWER.to_string() }

fn default_suggested_queries() -> Vec<String> {
    vec![
        "慢性發炎如何影響大腦前額葉？".to_string(),
        "腸道菌群與焦慮決策的關係".to_string(),
        "細胞因子(Cytokines)對風險評估的影響".to_string(),
        "睡眠不足引起的發炎如何改變社交判斷？".to_string(),
    ]
}

/// Environment variables consulted for the Gemini key, in order.
pub const API_KEY_ENV_VARS: [&str; 2] = ["INFLAMIND_GEMINI_API_KEY", "API_KEY"];

mod tests;

impl Config {
    /// Load configuration from inflamind.toml plus the process environment.
    /// Checks INFLAMIND_CONFIG env var first, then current directory.
    /// A missing file is not an error: every field has a default, and the
    /// API key is only required when a query is actually sent.
    pub fn load() -> anyhow::Result<Self> {
        if let Ok(path) = dotenvy::dotenv() {
            tracing::debug!(path = %path.display(), "Loaded .env file");
        }

        let path = std::env::var("INFLAMIND_CONFIG")
            .unwrap_or_else(|_| "inflamind.toml".to_string());

        let config = if Path::new(&path).exists() {
            let content = std::fs::read_to_string(&path)
                .map_err(|e| anyhow::anyhow!("Could not read config file {}: {}", path, e))?;
            Self::from_toml_str(&content)?
        } else {
            tracing::info!(path = %path, "No config file found, using defaults");
            Self::default()
        };

        Ok(config.with_env_api_key(|name| std::env::var(name).ok()))
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    /// Fill in the API key from `lookup` unless the file already set one.
    pub fn with_env_api_key<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if self.gemini.api_key.is_none() {
            self.gemini.api_key = API_KEY_ENV_VARS
                .iter()
                .find_map(|name| secret_from(lookup(name)));
        }
        if self.gemini.api_key.is_none() {
            tracing::warn!(
                "No Gemini API key configured (set gemini.api_key or INFLAMIND_GEMINI_API_KEY); \
                 research queries will return the fallback answer"
            );
        }
        self
    }

    pub fn has_api_key(&self) -> bool {
        self.gemini.api_key.is_some()
    }
}
