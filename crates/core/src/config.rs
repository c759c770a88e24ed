use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub messenger: MessengerConfig,
    pub classifier: ClassifierConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
}

#[derive(Clone, Debug)]
pub struct MessengerConfig {
    pub verify_token: SecretString,
    pub access_token: SecretString,
    pub graph_api_base_url: String,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct ClassifierConfig {
    pub client_id: String,
    pub client_secret: SecretString,
    pub api_base_url: String,
    pub model: String,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub port: Option<u16>,
    pub log_level: Option<String>,
    pub messenger_verify_token: Option<String>,
    pub messenger_access_token: Option<String>,
    pub graph_api_base_url: Option<String>,
    pub classifier_client_id: Option<String>,
    pub classifier_client_secret: Option<String>,
    pub classifier_api_base_url: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig { bind_address: "0.0.0.0".to_string(), port: 3000 },
            messenger: MessengerConfig {
                verify_token: String::new().into(),
                access_token: String::new().into(),
                graph_api_base_url: "https://graph.facebook.com/v2.6".to_string(),
                timeout_secs: 10,
            },
            classifier: ClassifierConfig {
                client_id: String::new(),
                client_secret: String::new().into(),
                api_base_url: "https://api.clarifai.com".to_string(),
                model: "Stuff".to_string(),
                timeout_secs: 30,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("potholer.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
        }

        if let Some(messenger) = patch.messenger {
            if let Some(verify_token) = messenger.verify_token {
                self.messenger.verify_token = secret_value(verify_token);
            }
            if let Some(access_token) = messenger.access_token {
                self.messenger.access_token = secret_value(access_token);
            }
            if let Some(graph_api_base_url) = messenger.graph_api_base_url {
                self.messenger.graph_api_base_url = graph_api_base_url;
            }
            if let Some(timeout_secs) = messenger.timeout_secs {
                self.messenger.timeout_secs = timeout_secs;
            }
        }

        if let Some(classifier) = patch.classifier {
            if let Some(client_id) = classifier.client_id {
                self.classifier.client_id = client_id;
            }
            if let Some(client_secret) = classifier.client_secret {
                self.classifier.client_secret = secret_value(client_secret);
            }
            if let Some(api_base_url) = classifier.api_base_url {
                self.classifier.api_base_url = api_base_url;
            }
            if let Some(model) = classifier.model {
                self.classifier.model = model;
            }
            if let Some(timeout_secs) = classifier.timeout_secs {
                self.classifier.timeout_secs = timeout_secs;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("PORT") {
            self.server.port = parse_u16("PORT", &value)?;
        }
        if let Some(value) = read_env("POTHOLER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }

        if let Some(value) = read_env("MESSENGER_VERIFY_TOKEN") {
            self.messenger.verify_token = secret_value(value);
        }
        if let Some(value) = read_env("MESSENGER_ACCESS_TOKEN") {
            self.messenger.access_token = secret_value(value);
        }
        if let Some(value) = read_env("POTHOLER_GRAPH_API_BASE_URL") {
            self.messenger.graph_api_base_url = value;
        }
        if let Some(value) = read_env("POTHOLER_MESSENGER_TIMEOUT_SECS") {
            self.messenger.timeout_secs = parse_u64("POTHOLER_MESSENGER_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("CLARIFAI_CLIENT_ID") {
            self.classifier.client_id = value;
        }
        if let Some(value) = read_env("CLARIFAI_CLIENT_SECRET") {
            self.classifier.client_secret = secret_value(value);
        }
        if let Some(value) = read_env("POTHOLER_CLASSIFIER_API_BASE_URL") {
            self.classifier.api_base_url = value;
        }
        if let Some(value) = read_env("POTHOLER_CLASSIFIER_MODEL") {
            self.classifier.model = value;
        }
        if let Some(value) = read_env("POTHOLER_CLASSIFIER_TIMEOUT_SECS") {
            self.classifier.timeout_secs = parse_u64("POTHOLER_CLASSIFIER_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("POTHOLER_LOG_LEVEL") {
            self.logging.level = value;
        }
        if let Some(value) = read_env("POTHOLER_LOG_FORMAT") {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(port) = overrides.port {
            self.server.port = port;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(verify_token) = overrides.messenger_verify_token {
            self.messenger.verify_token = secret_value(verify_token);
        }
        if let Some(access_token) = overrides.messenger_access_token {
            self.messenger.access_token = secret_value(access_token);
        }
        if let Some(graph_api_base_url) = overrides.graph_api_base_url {
            self.messenger.graph_api_base_url = graph_api_base_url;
        }
        if let Some(client_id) = overrides.classifier_client_id {
            self.classifier.client_id = client_id;
        }
        if let Some(client_secret) = overrides.classifier_client_secret {
            self.classifier.client_secret = secret_value(client_secret);
        }
        if let Some(api_base_url) = overrides.classifier_api_base_url {
            self.classifier.api_base_url = api_base_url;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_server(&self.server)?;
        validate_messenger(&self.messenger)?;
        validate_classifier(&self.classifier)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("potholer.toml"), PathBuf::from("config/potholer.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.bind_address.trim().is_empty() {
        return Err(ConfigError::Validation("server.bind_address must not be empty".to_string()));
    }

    if server.port == 0 {
        return Err(ConfigError::Validation(
            "server.port must be greater than zero (env `PORT`)".to_string(),
        ));
    }

    Ok(())
}

fn validate_messenger(messenger: &MessengerConfig) -> Result<(), ConfigError> {
    require_secret(
        &messenger.verify_token,
        "messenger.verify_token",
        "MESSENGER_VERIFY_TOKEN",
    )?;
    require_secret(
        &messenger.access_token,
        "messenger.access_token",
        "MESSENGER_ACCESS_TOKEN",
    )?;
    require_http_url(&messenger.graph_api_base_url, "messenger.graph_api_base_url")?;
    require_timeout(messenger.timeout_secs, "messenger.timeout_secs")
}

fn validate_classifier(classifier: &ClassifierConfig) -> Result<(), ConfigError> {
    if classifier.client_id.trim().is_empty() {
        return Err(missing_credential("classifier.client_id", "CLARIFAI_CLIENT_ID"));
    }
    require_secret(
        &classifier.client_secret,
        "classifier.client_secret",
        "CLARIFAI_CLIENT_SECRET",
    )?;
    require_http_url(&classifier.api_base_url, "classifier.api_base_url")?;

    if classifier.model.trim().is_empty() {
        return Err(ConfigError::Validation("classifier.model must not be empty".to_string()));
    }

    require_timeout(classifier.timeout_secs, "classifier.timeout_secs")
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn require_secret(secret: &SecretString, key: &str, env_var: &str) -> Result<(), ConfigError> {
    if secret.expose_secret().trim().is_empty() {
        return Err(missing_credential(key, env_var));
    }
    Ok(())
}

fn missing_credential(key: &str, env_var: &str) -> ConfigError {
    ConfigError::Validation(format!("{key} is required. Set the `{env_var}` environment variable"))
}

fn require_http_url(value: &str, key: &str) -> Result<(), ConfigError> {
    if !value.starts_with("http://") && !value.starts_with("https://") {
        return Err(ConfigError::Validation(format!("{key} must start with http:// or https://")));
    }
    Ok(())
}

fn require_timeout(timeout_secs: u64, key: &str) -> Result<(), ConfigError> {
    if timeout_secs == 0 || timeout_secs > 300 {
        return Err(ConfigError::Validation(format!("{key} must be in range 1..=300")));
    }
    Ok(())
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    server: Option<ServerPatch>,
    messenger: Option<MessengerPatch>,
    classifier: Option<ClassifierPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
}

#[derive(Debug, Default, Deserialize)]
struct MessengerPatch {
    verify_token: Option<String>,
    access_token: Option<String>,
    graph_api_base_url: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ClassifierPatch {
    client_id: Option<String>,
    client_secret: Option<String>,
    api_base_url: Option<String>,
    model: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
