//! Configuration management for the studio proxy server.
//!
//! Configuration is built once at startup, either from environment variables
//! alone ([`AppConfig::from_env`]) or from a YAML file with environment
//! variable expansion ([`AppConfig::load`]). The resulting [`AppConfig`] is
//! injected into every handler through the application state.

use anyhow::{Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;

/// Default upload limit, matching the image hosting provider's limit.
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 32 * 1024 * 1024;

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Server configuration (host, port)
    #[serde(default)]
    pub server: ServerConfig,

    /// Whether to verify SSL certificates for upstream requests
    #[serde(default = "default_verify_ssl")]
    pub verify_ssl: bool,

    /// Total timeout in seconds for buffered upstream calls
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Connect timeout in seconds for every upstream call
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Maximum wait in seconds for the next chunk of a streaming upstream body
    #[serde(default = "default_stream_idle_timeout")]
    pub stream_idle_timeout_secs: u64,

    /// Maximum accepted size of an uploaded image file
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,

    /// Framing used for the streaming chat routes
    #[serde(default)]
    pub chat_stream_format: StreamFormat,

    #[serde(default)]
    pub openai: OpenAiConfig,

    #[serde(default)]
    pub stability: StabilityConfig,

    #[serde(default)]
    pub imgbb: ImgbbConfig,
}

/// An upstream credential. Never printed by `Debug`.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ApiKey(String);

impl ApiKey {
    /// Wrap a key, treating blank values as absent.
    pub fn new(value: impl Into<String>) -> Option<Self> {
        let value = value.into();
        if value.trim().is_empty() {
            None
        } else {
            Some(Self(value))
        }
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKey(***)")
    }
}

/// OpenAI chat/vision completion settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiConfig {
    #[serde(default, deserialize_with = "deserialize_api_key")]
    pub api_key: Option<ApiKey>,

    #[serde(default = "default_openai_api_base")]
    pub api_base: String,

    #[serde(default = "default_openai_model")]
    pub model: String,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_base: default_openai_api_base(),
            model: default_openai_model(),
        }
    }
}

/// Stability AI image generation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StabilityConfig {
    #[serde(default, deserialize_with = "deserialize_api_key")]
    pub api_key: Option<ApiKey>,

    /// Base URL of the stable-image API; `/generate/sd3` is appended
    #[serde(default = "default_stability_api_base")]
    pub api_base: String,

    #[serde(default = "default_stability_model")]
    pub model: String,

    /// Strength applied in image-to-image mode
    #[serde(default = "default_image_strength")]
    pub image_strength: f32,

    #[serde(default = "default_image_dimension")]
    pub default_width: u32,

    #[serde(default = "default_image_dimension")]
    pub default_height: u32,
}

impl Default for StabilityConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_base: default_stability_api_base(),
            model: default_stability_model(),
            image_strength: default_image_strength(),
            default_width: default_image_dimension(),
            default_height: default_image_dimension(),
        }
    }
}

/// ImgBB image hosting settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImgbbConfig {
    #[serde(default, deserialize_with = "deserialize_api_key")]
    pub api_key: Option<ApiKey>,

    #[serde(default = "default_imgbb_api_base")]
    pub api_base: String,
}

impl Default for ImgbbConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_base: default_imgbb_api_base(),
        }
    }
}

/// Server-specific configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to bind to
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Outward framing of a streamed chat reply.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StreamFormat {
    /// Fragments written verbatim as `text/plain`
    Text,
    /// Line-oriented data stream parts (`0:"..."`) understood by the browser chat client
    #[default]
    DataStream,
}

impl std::str::FromStr for StreamFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "data-stream" | "data_stream" | "datastream" => Ok(Self::DataStream),
            other => Err(format!("unknown stream format: {}", other)),
        }
    }
}

fn deserialize_api_key<'de, D>(deserializer: D) -> std::result::Result<Option<ApiKey>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw.and_then(ApiKey::new))
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_verify_ssl() -> bool {
    true
}

fn default_request_timeout() -> u64 {
    60
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_stream_idle_timeout() -> u64 {
    60
}

fn default_max_upload_bytes() -> usize {
    DEFAULT_MAX_UPLOAD_BYTES
}

fn default_openai_api_base() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_openai_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_stability_api_base() -> String {
    "https://api.stability.ai/v2beta/stable-image".to_string()
}

fn default_stability_model() -> String {
    "sd3.5-large-turbo".to_string()
}

fn default_image_strength() -> f32 {
    0.7
}

fn default_image_dimension() -> u32 {
    1024
}

fn default_imgbb_api_base() -> String {
    "https://api.imgbb.com/1".to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            verify_ssl: default_verify_ssl(),
            request_timeout_secs: default_request_timeout(),
            connect_timeout_secs: default_connect_timeout(),
            stream_idle_timeout_secs: default_stream_idle_timeout(),
            max_upload_bytes: default_max_upload_bytes(),
            chat_stream_format: StreamFormat::default(),
            openai: OpenAiConfig::default(),
            stability: StabilityConfig::default(),
            imgbb: ImgbbConfig::default(),
        }
    }
}

impl AppConfig {
    /// Build configuration from defaults and environment variables.
    pub fn from_env() -> Result<Self> {
        let mut config = AppConfig::default();
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Load configuration from a YAML file.
    ///
    /// `${VAR}`, `${VAR:-default}` and `${VAR:default}` references are expanded
    /// before parsing, and environment variables override file values afterwards.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use studio_proxy_rust::core::config::AppConfig;
    ///
    /// let config = AppConfig::load("config.yaml").expect("Failed to load config");
    /// ```
    pub fn load(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path))?;

        let expanded = expand_env_vars(&content);

        let mut config: AppConfig = serde_yaml::from_str(&expanded)
            .with_context(|| format!("Failed to parse config file: {}", path))?;

        config.apply_env_overrides()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(host) = std::env::var("HOST") {
            self.server.host = host;
        }
        if let Some(port) = env_parse::<u16>("PORT")? {
            self.server.port = port;
        }
        if let Ok(verify_ssl) = std::env::var("VERIFY_SSL") {
            self.verify_ssl = str_to_bool(&verify_ssl);
        }
        if let Some(timeout) = env_parse::<u64>("REQUEST_TIMEOUT_SECS")? {
            self.request_timeout_secs = timeout;
        }
        if let Some(timeout) = env_parse::<u64>("CONNECT_TIMEOUT_SECS")? {
            self.connect_timeout_secs = timeout;
        }
        if let Some(timeout) = env_parse::<u64>("STREAM_IDLE_TIMEOUT_SECS")? {
            self.stream_idle_timeout_secs = timeout;
        }
        if let Some(limit) = env_parse::<usize>("MAX_UPLOAD_BYTES")? {
            self.max_upload_bytes = limit;
        }
        if let Ok(format) = std::env::var("CHAT_STREAM_FORMAT") {
            self.chat_stream_format = format
                .parse()
                .map_err(|e: String| anyhow::anyhow!("CHAT_STREAM_FORMAT: {}", e))?;
        }

        if let Ok(key) = std::env::var("OPENAI_API_KEY") {
            self.openai.api_key = ApiKey::new(key);
        }
        if let Ok(base) = std::env::var("OPENAI_API_BASE") {
            self.openai.api_base = base;
        }
        if let Ok(model) = std::env::var("OPENAI_MODEL") {
            self.openai.model = model;
        }

        if let Ok(key) = std::env::var("STABILITY_KEY").or_else(|_| std::env::var("STABILITY_API_KEY")) {
            self.stability.api_key = ApiKey::new(key);
        }
        if let Ok(base) = std::env::var("STABILITY_API_BASE") {
            self.stability.api_base = base;
        }
        if let Ok(model) = std::env::var("STABILITY_MODEL") {
            self.stability.model = model;
        }

        if let Ok(key) = std::env::var("IMGBB_API_KEY") {
            self.imgbb.api_key = ApiKey::new(key);
        }
        if let Ok(base) = std::env::var("IMGBB_API_BASE") {
            self.imgbb.api_base = base;
        }

        Ok(())
    }
}

fn env_parse<T>(name: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| anyhow::anyhow!("Invalid value for {}: {}", name, e)),
        Err(_) => Ok(None),
    }
}

/// Expand environment variables in configuration content.
///
/// Supports patterns: ${VAR}, ${VAR:-default}, ${VAR:default}
fn expand_env_vars(content: &str) -> String {
    let re = Regex::new(r"\$\{([^}:]+)(?::-?([^}]*))?\}").expect("static regex is valid");

    re.replace_all(content, |caps: &regex::Captures| {
        let var_name = &caps[1];
        let default_value = caps.get(2).map(|m| m.as_str()).unwrap_or("");
        std::env::var(var_name).unwrap_or_else(|_| default_value.to_string())
    })
    .to_string()
}

/// Convert string to boolean.
///
/// Accepts: "true", "1", "yes", "on" (case-insensitive)
fn str_to_bool(value: &str) -> bool {
    matches!(value.to_lowercase().as_str(), "true" | "1" | "yes" | "on")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const ENV_KEYS: &[&str] = &[
        "HOST",
        "PORT",
        "VERIFY_SSL",
        "REQUEST_TIMEOUT_SECS",
        "CONNECT_TIMEOUT_SECS",
        "STREAM_IDLE_TIMEOUT_SECS",
        "MAX_UPLOAD_BYTES",
        "CHAT_STREAM_FORMAT",
        "OPENAI_API_KEY",
        "OPENAI_API_BASE",
        "OPENAI_MODEL",
        "STABILITY_KEY",
        "STABILITY_API_KEY",
        "STABILITY_API_BASE",
        "STABILITY_MODEL",
        "IMGBB_API_KEY",
        "IMGBB_API_BASE",
    ];

    fn clear_env() {
        for key in ENV_KEYS {
            std::env::remove_var(key);
        }
    }

    #[test]
    #[serial]
    fn test_expand_env_vars() {
        std::env::set_var("STUDIO_TEST_VAR", "test_value");
        let output = expand_env_vars("api_key: ${STUDIO_TEST_VAR}");
        assert_eq!(output, "api_key: test_value");
        std::env::remove_var("STUDIO_TEST_VAR");
    }

    #[test]
    #[serial]
    fn test_expand_env_vars_with_defaults() {
        std::env::remove_var("STUDIO_MISSING_VAR");
        assert_eq!(
            expand_env_vars("api_key: ${STUDIO_MISSING_VAR:-fallback}"),
            "api_key: fallback"
        );
        assert_eq!(
            expand_env_vars("api_key: ${STUDIO_MISSING_VAR:fallback}"),
            "api_key: fallback"
        );
        assert_eq!(expand_env_vars("api_key: ${STUDIO_MISSING_VAR:-}"), "api_key: ");
    }

    #[test]
    fn test_str_to_bool() {
        assert!(str_to_bool("true"));
        assert!(str_to_bool("YES"));
        assert!(str_to_bool("1"));
        assert!(str_to_bool("On"));
        assert!(!str_to_bool("false"));
        assert!(!str_to_bool("0"));
        assert!(!str_to_bool(""));
    }

    #[test]
    fn test_api_key_blank_is_absent() {
        assert!(ApiKey::new("").is_none());
        assert!(ApiKey::new("   ").is_none());
        assert_eq!(ApiKey::new("sk-1").unwrap().expose(), "sk-1");
    }

    #[test]
    fn test_api_key_debug_is_redacted() {
        let config = OpenAiConfig {
            api_key: ApiKey::new("sk-very-secret"),
            ..OpenAiConfig::default()
        };
        let printed = format!("{:?}", config);
        assert!(!printed.contains("sk-very-secret"));
        assert!(printed.contains("***"));
    }

    #[test]
    fn test_stream_format_parse() {
        assert_eq!("text".parse::<StreamFormat>().unwrap(), StreamFormat::Text);
        assert_eq!(
            "Data-Stream".parse::<StreamFormat>().unwrap(),
            StreamFormat::DataStream
        );
        assert!("sse".parse::<StreamFormat>().is_err());
    }

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.max_upload_bytes, 32 * 1024 * 1024);
        assert_eq!(config.request_timeout_secs, 60);
        assert_eq!(config.openai.model, "gpt-4o-mini");
        assert_eq!(config.stability.model, "sd3.5-large-turbo");
        assert_eq!(config.stability.default_width, 1024);
        assert_eq!(config.chat_stream_format, StreamFormat::DataStream);
        assert!(config.openai.api_key.is_none());
    }

    #[test]
    #[serial]
    fn test_from_env_reads_credentials() {
        clear_env();
        std::env::set_var("OPENAI_API_KEY", "sk-env");
        std::env::set_var("STABILITY_KEY", "stab-env");
        std::env::set_var("IMGBB_API_KEY", "");
        std::env::set_var("PORT", "8088");

        let config = AppConfig::from_env().unwrap();
        assert_eq!(config.openai.api_key.as_ref().unwrap().expose(), "sk-env");
        assert_eq!(config.stability.api_key.as_ref().unwrap().expose(), "stab-env");
        assert!(config.imgbb.api_key.is_none());
        assert_eq!(config.server.port, 8088);

        clear_env();
    }

    #[test]
    #[serial]
    fn test_from_env_rejects_bad_number() {
        clear_env();
        std::env::set_var("REQUEST_TIMEOUT_SECS", "soon");
        assert!(AppConfig::from_env().is_err());
        clear_env();
    }

    #[test]
    #[serial]
    fn test_load_config_from_file() {
        clear_env();
        std::env::set_var("STUDIO_TEST_IMGBB", "imgbb-from-env");

        let mut temp_file = NamedTempFile::new().unwrap();
        let config_content = r#"
server:
  host: 127.0.0.1
  port: 8080
verify_ssl: false
chat_stream_format: text
openai:
  api_key: sk-file
  model: gpt-4o
imgbb:
  api_key: ${STUDIO_TEST_IMGBB}
stability:
  api_key: ${STUDIO_TEST_MISSING:-}
"#;
        temp_file.write_all(config_content.as_bytes()).unwrap();
        temp_file.flush().unwrap();

        let config = AppConfig::load(temp_file.path().to_str().unwrap()).unwrap();

        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 8080);
        assert!(!config.verify_ssl);
        assert_eq!(config.chat_stream_format, StreamFormat::Text);
        assert_eq!(config.openai.api_key.as_ref().unwrap().expose(), "sk-file");
        assert_eq!(config.openai.model, "gpt-4o");
        assert_eq!(config.openai.api_base, "https://api.openai.com/v1");
        assert_eq!(
            config.imgbb.api_key.as_ref().unwrap().expose(),
            "imgbb-from-env"
        );
        assert!(config.stability.api_key.is_none());

        std::env::remove_var("STUDIO_TEST_IMGBB");
    }

    #[test]
    #[serial]
    fn test_env_overrides_file() {
        clear_env();
        std::env::set_var("HOST", "192.168.1.1");
        std::env::set_var("OPENAI_API_KEY", "sk-override");

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file
            .write_all(b"server:\n  host: 127.0.0.1\nopenai:\n  api_key: sk-file\n")
            .unwrap();
        temp_file.flush().unwrap();

        let config = AppConfig::load(temp_file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.server.host, "192.168.1.1");
        assert_eq!(config.openai.api_key.as_ref().unwrap().expose(), "sk-override");

        clear_env();
    }

    #[test]
    fn test_load_config_missing_file() {
        assert!(AppConfig::load("nonexistent_file.yaml").is_err());
    }

    #[test]
    fn test_load_config_invalid_yaml() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(b"invalid: yaml: content:").unwrap();
        temp_file.flush().unwrap();

        assert!(AppConfig::load(temp_file.path().to_str().unwrap()).is_err());
    }
}
