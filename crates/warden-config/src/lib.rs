use std::net::SocketAddr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read config failed: {0}")]
    Read(String),
    #[error("parse config failed: {0}")]
    Parse(String),
    #[error("schema load failed: {0}")]
    SchemaLoad(String),
    #[error("schema validation failed: {0}")]
    SchemaValidation(String),
    #[error("unsupported config: {0}")]
    UnsupportedConfig(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: Server,
    pub platform: Platform,
    pub generation: Generation,
    pub store: Store,
    #[serde(default)]
    pub queue: Queue,
    #[serde(default)]
    pub limits: Limits,
    #[serde(default)]
    pub commands: Commands,
    #[serde(default)]
    pub messages: Messages,
    #[serde(default)]
    pub owners: Owners,
    #[serde(default)]
    pub audit: Audit,
    #[serde(default)]
    pub logging: Logging,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Server {
    pub listen_addr: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Platform {
    pub api_base: String,
    pub api_version: String,
    pub access_token: String,
    pub group_id: i64,
    pub secret: String,
    pub confirmation: String,
    #[serde(default = "default_platform_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_group_peer_threshold")]
    pub group_peer_threshold: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Generation {
    pub api_base: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_image_size")]
    pub image_size: String,
    #[serde(default = "default_generation_timeout_ms")]
    pub request_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Store {
    #[serde(rename = "type")]
    pub kind: String,
    pub sqlite_path: Option<String>,
    #[serde(default)]
    pub seed: StoreSeed,
}

/// Records written at startup when the store has none yet.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreSeed {
    #[serde(default)]
    pub shared_credential: Option<String>,
    #[serde(default)]
    pub help_text: Option<String>,
    #[serde(default)]
    pub privileged_users: Vec<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Queue {
    pub period_ms: u64,
    pub capacity: usize,
}

impl Default for Queue {
    fn default() -> Self {
        Self {
            period_ms: 3500,
            capacity: 250,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Limits {
    pub max_prompt_length: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_prompt_length: 150,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Commands {
    pub text: String,
    pub image: String,
    pub help: String,
    pub info: String,
    pub allow: String,
    pub disallow: String,
    pub set_help: String,
    pub set_override: String,
    pub set_shared: String,
    pub admin_prefix: String,
}

impl Default for Commands {
    fn default() -> Self {
        Self {
            text: ".gt".to_string(),
            image: ".gi".to_string(),
            help: ".help".to_string(),
            info: ".tech_info".to_string(),
            allow: ".allow".to_string(),
            disallow: ".disallow".to_string(),
            set_help: ".tech_help".to_string(),
            set_override: ".tech_custom_token".to_string(),
            set_shared: ".tech_public_token".to_string(),
            admin_prefix: ".tech".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Messages {
    pub unknown_command: String,
    pub busy: String,
    pub queue_position: String,
    pub queue_full: String,
    pub generic_error: String,
    pub prompt_too_long: String,
    pub done: String,
}

impl Default for Messages {
    fn default() -> Self {
        Self {
            unknown_command: "Unknown command. Send .help for usage.".to_string(),
            busy: "Wait for the result of your previous request.".to_string(),
            queue_position: "Queued! Position: ".to_string(),
            queue_full: "Too many requests in the queue. Try again later.".to_string(),
            generic_error: "Something went wrong...".to_string(),
            prompt_too_long: "Request is too long.".to_string(),
            done: "Done!".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Owners {
    #[serde(default)]
    pub superusers: Vec<i64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Audit {
    #[serde(default)]
    pub jsonl_path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Logging {
    pub filter: String,
    pub format: String,
}

impl Default for Logging {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            format: "text".to_string(),
        }
    }
}

fn default_platform_timeout_ms() -> u64 {
    30_000
}

fn default_group_peer_threshold() -> i64 {
    2_000_000_000
}

fn default_model() -> String {
    "text-davinci-003".to_string()
}

fn default_max_tokens() -> u32 {
    1000
}

fn default_image_size() -> String {
    "512x512".to_string()
}

fn default_generation_timeout_ms() -> u64 {
    180_000
}

pub fn load_and_validate(path: &str) -> Result<Config, ConfigError> {
    let config_text =
        std::fs::read_to_string(path).map_err(|e| ConfigError::Read(e.to_string()))?;
    let value: serde_yaml::Value =
        serde_yaml::from_str(&config_text).map_err(|e| ConfigError::Parse(e.to_string()))?;

    let instance = serde_json::to_value(value).map_err(|e| ConfigError::Parse(e.to_string()))?;
    validate_against_schema(&instance)?;

    let cfg: Config =
        serde_json::from_value(instance).map_err(|e| ConfigError::Parse(e.to_string()))?;
    validate_runtime_support(&cfg)?;
    Ok(cfg)
}

fn validate_against_schema(instance: &serde_json::Value) -> Result<(), ConfigError> {
    let schema_path = [
        std::path::PathBuf::from("config/config.schema.json"),
        std::path::Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("../..")
            .join("config/config.schema.json"),
    ]
    .into_iter()
    .find(|p| p.exists())
    .ok_or_else(|| {
        ConfigError::SchemaLoad(
            "config schema not found at config/config.schema.json or workspace config path"
                .to_string(),
        )
    })?;

    let schema_text =
        std::fs::read_to_string(schema_path).map_err(|e| ConfigError::SchemaLoad(e.to_string()))?;
    let schema: serde_json::Value =
        serde_json::from_str(&schema_text).map_err(|e| ConfigError::SchemaLoad(e.to_string()))?;

    let validator =
        jsonschema::validator_for(&schema).map_err(|e| ConfigError::SchemaLoad(e.to_string()))?;
    if let Err(first) = validator.validate(instance) {
        return Err(ConfigError::SchemaValidation(first.to_string()));
    }
    Ok(())
}

pub fn validate_runtime_support(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.server.listen_addr.parse::<SocketAddr>().is_err() {
        return Err(ConfigError::UnsupportedConfig(format!(
            "server.listen_addr={} is not a socket address",
            cfg.server.listen_addr
        )));
    }
    if cfg.store.kind != "memory" && cfg.store.kind != "sqlite" {
        return Err(ConfigError::UnsupportedConfig(format!(
            "store.type={} is not implemented; supported: memory, sqlite",
            cfg.store.kind
        )));
    }
    if cfg.store.kind == "memory" && cfg.store.sqlite_path.is_some() {
        return Err(ConfigError::UnsupportedConfig(
            "store.sqlite_path is not supported when store.type=memory".to_string(),
        ));
    }
    if cfg.store.kind == "sqlite"
        && cfg
            .store
            .sqlite_path
            .as_ref()
            .map(|v| v.trim().is_empty())
            .unwrap_or(true)
    {
        return Err(ConfigError::UnsupportedConfig(
            "store.sqlite_path is required when store.type=sqlite".to_string(),
        ));
    }
    if cfg.queue.period_ms == 0 {
        return Err(ConfigError::UnsupportedConfig(
            "queue.period_ms must be >= 1".to_string(),
        ));
    }
    if cfg.limits.max_prompt_length == 0 {
        return Err(ConfigError::UnsupportedConfig(
            "limits.max_prompt_length must be >= 1".to_string(),
        ));
    }
    if cfg.logging.format != "text" && cfg.logging.format != "json" {
        return Err(ConfigError::UnsupportedConfig(format!(
            "logging.format={} is not implemented; supported: text, json",
            cfg.logging.format
        )));
    }
    Ok(())
}
