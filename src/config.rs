use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub application: ApplicationConfig,
    #[serde(deserialize_with = "deserialize_log_level")]
    pub log_level: LogLevel,
    pub server: ServerConfig,
    pub upload: UploadConfig,
    pub model: ModelConfig,
}

fn deserialize_log_level<'de, D>(deserializer: D) -> Result<LogLevel, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    s.try_into().map_err(serde::de::Error::custom)
}

pub trait Validatable {
    fn validate(&self) -> Result<(), String>;
}

#[derive(Deserialize, Clone)]
pub struct ApplicationConfig {
    pub name: String,
    #[serde(default)]
    pub debug: bool,
    pub secret_key: String,
}

impl ApplicationConfig {
    pub fn version(&self) -> &'static str {
        env!("CARGO_PKG_VERSION")
    }
}

// The secret key must never end up in logs.
impl std::fmt::Debug for ApplicationConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApplicationConfig")
            .field("name", &self.name)
            .field("debug", &self.debug)
            .field("secret_key", &"<redacted>")
            .finish()
    }
}

impl Validatable for ApplicationConfig {
    fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("application.name must not be empty".into());
        }
        if self.secret_key.is_empty() {
            return Err("application.secret_key must not be empty".into());
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    #[serde(default = "default_allowed_origins")]
    pub allowed_origins: Vec<String>,
}

fn default_allowed_origins() -> Vec<String> {
    vec!["*".into()]
}

impl ServerConfig {
    pub fn get_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn allows_any_origin(&self) -> bool {
        self.allowed_origins.iter().any(|origin| origin == "*")
    }
}

impl Validatable for ServerConfig {
    fn validate(&self) -> Result<(), String> {
        if self.host.trim().is_empty() {
            return Err("server.host must not be empty".into());
        }
        if self.allowed_origins.is_empty() {
            return Err("server.allowed_origins must list at least one origin".into());
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct UploadConfig {
    pub max_file_size: usize,
    #[serde(default = "default_content_types")]
    pub allowed_content_types: Vec<String>,
    #[serde(default = "default_extensions")]
    pub allowed_extensions: Vec<String>,
    #[serde(default = "default_max_image_pixels")]
    pub max_image_pixels: u64,
    #[serde(default = "default_max_decode_alloc")]
    pub max_decode_alloc: u64,
}

fn default_content_types() -> Vec<String> {
    ["image/jpeg", "image/png", "image/tiff", "image/bmp"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_extensions() -> Vec<String> {
    ["jpg", "jpeg", "png", "tif", "tiff", "bmp"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_max_image_pixels() -> u64 {
    100_000_000
}

fn default_max_decode_alloc() -> u64 {
    512 * 1024 * 1024
}

impl UploadConfig {
    pub fn max_file_size_mb(&self) -> f64 {
        self.max_file_size as f64 / (1024.0 * 1024.0)
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_file_size: 50 * 1024 * 1024,
            allowed_content_types: default_content_types(),
            allowed_extensions: default_extensions(),
            max_image_pixels: default_max_image_pixels(),
            max_decode_alloc: default_max_decode_alloc(),
        }
    }
}

impl Validatable for UploadConfig {
    fn validate(&self) -> Result<(), String> {
        if self.max_file_size == 0 {
            return Err("upload.max_file_size must be greater than 0".into());
        }
        if self.allowed_content_types.is_empty() {
            return Err("upload.allowed_content_types must not be empty".into());
        }
        if self.max_image_pixels == 0 {
            return Err("upload.max_image_pixels must be greater than 0".into());
        }
        if self.max_decode_alloc == 0 {
            return Err("upload.max_decode_alloc must be greater than 0".into());
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ModelConfig {
    pub path: PathBuf,
    pub input_size: [u32; 2],
    #[serde(default = "default_input_channels")]
    pub input_channels: u32,
    pub confidence_threshold: f64,
    #[serde(default = "default_model_instances")]
    pub num_instances: usize,
}

fn default_input_channels() -> u32 {
    1
}

fn default_model_instances() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

impl ModelConfig {
    pub fn get_path(&self) -> &Path {
        &self.path
    }

    pub fn width(&self) -> u32 {
        self.input_size[0]
    }

    pub fn height(&self) -> u32 {
        self.input_size[1]
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./models/lung_cancer_model.onnx"),
            input_size: [224, 224],
            input_channels: default_input_channels(),
            confidence_threshold: 0.5,
            num_instances: default_model_instances(),
        }
    }
}

impl Validatable for ModelConfig {
    fn validate(&self) -> Result<(), String> {
        if self.input_size.iter().any(|&side| side == 0) {
            return Err(format!(
                "model.input_size must be two positive integers, got {:?}",
                self.input_size
            ));
        }
        if self.input_channels != 1 && self.input_channels != 3 {
            return Err(format!(
                "model.input_channels must be 1 or 3, got {}",
                self.input_channels
            ));
        }
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(format!(
                "model.confidence_threshold must be within [0, 1], got {}",
                self.confidence_threshold
            ));
        }
        if self.num_instances == 0 {
            return Err("model.num_instances must be at least 1".into());
        }
        Ok(())
    }
}

impl Validatable for Config {
    fn validate(&self) -> Result<(), String> {
        self.application.validate()?;
        self.server.validate()?;
        self.upload.validate()?;
        self.model.validate()
    }
}

#[derive(Debug, Deserialize, Clone)]
pub enum Environment {
    Local,
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Local => "local",
            Environment::Production => "production",
        }
    }
}

impl TryFrom<String> for Environment {
    type Error = String;

    fn try_from(s: String) -> Result<Self, String> {
        match s.to_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "production" => Ok(Self::Production),
            other => Err(format!(
                "{} is not a supported environment. Use either `local` or `production`.",
                other
            )),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl TryFrom<String> for LogLevel {
    type Error = String;

    fn try_from(s: String) -> Result<Self, String> {
        match s.to_lowercase().as_str() {
            "trace" => Ok(Self::Trace),
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" | "warning" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            other => Err(format!(
                "{} is not a supported log level. Use trace, debug, info, warn or error.",
                other
            )),
        }
    }
}

pub fn get_configuration() -> Result<Config, config::ConfigError> {
    let base_path = std::env::current_dir()
        .map_err(|e| config::ConfigError::Message(format!("cannot read current dir: {}", e)))?;
    let configuration_directory = base_path.join("configuration");

    let environment: Environment = std::env::var("APP_ENVIRONMENT")
        .unwrap_or_else(|_| "local".into())
        .try_into()
        .map_err(config::ConfigError::Message)?;

    let settings = config::Config::builder()
        .add_source(config::File::from(
            configuration_directory.join("base.yaml"),
        ))
        .add_source(
            config::File::from(
                configuration_directory.join(format!("{}.yaml", environment.as_str())),
            )
            .required(false),
        )
        .add_source(
            config::Environment::with_prefix("APP")
                .prefix_separator("_")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("server.allowed_origins")
                .with_list_parse_key("upload.allowed_content_types")
                .with_list_parse_key("upload.allowed_extensions")
                .try_parsing(true),
        )
        .build()?;

    let settings = settings.try_deserialize::<Config>()?;
    if let Err(e) = settings.validate() {
        return Err(config::ConfigError::Message(format!(
            "Configuration validation failed: {}",
            e
        )));
    }

    Ok(settings)
}
