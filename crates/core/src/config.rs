use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::pricing::blend::{BlendWeights, DEFAULT_BLEND_WEIGHTS};

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub pricing: PricingConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct PricingConfig {
    pub artifact_dir: PathBuf,
    pub bucket_stats_path: Option<PathBuf>,
    pub similarity_index_path: Option<PathBuf>,
    pub model_path: Option<PathBuf>,
    /// Raw `"bucket,neighbor,model"` string, parsed leniently by [`Self::blend_weights`].
    pub blend_weights: String,
    pub vat_rate: f64,
    /// Residual used by callers when every estimator abstains, as a share of
    /// the rule-based subtotal.
    pub fallback_uplift_pct: f64,
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
    pub log_level: Option<String>,
    pub artifact_dir: Option<PathBuf>,
    pub blend_weights: Option<String>,
    pub bind_address: Option<String>,
    pub port: Option<u16>,
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
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 8080,
                graceful_shutdown_secs: 15,
            },
            pricing: PricingConfig::default(),
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            artifact_dir: PathBuf::from("models"),
            bucket_stats_path: None,
            similarity_index_path: None,
            model_path: None,
            blend_weights: DEFAULT_BLEND_WEIGHTS.to_string(),
            vat_rate: 0.20,
            fallback_uplift_pct: 0.0,
        }
    }
}

impl PricingConfig {
    pub fn blend_weights(&self) -> BlendWeights {
        BlendWeights::parse(&self.blend_weights)
    }
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
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("reliant.toml"));
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
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
        }

        if let Some(pricing) = patch.pricing {
            if let Some(artifact_dir) = pricing.artifact_dir {
                self.pricing.artifact_dir = artifact_dir;
            }
            if let Some(path) = pricing.bucket_stats_path {
                self.pricing.bucket_stats_path = Some(path);
            }
            if let Some(path) = pricing.similarity_index_path {
                self.pricing.similarity_index_path = Some(path);
            }
            if let Some(path) = pricing.model_path {
                self.pricing.model_path = Some(path);
            }
            if let Some(blend_weights) = pricing.blend_weights {
                self.pricing.blend_weights = blend_weights;
            }
            if let Some(vat_rate) = pricing.vat_rate {
                self.pricing.vat_rate = vat_rate;
            }
            if let Some(fallback_uplift_pct) = pricing.fallback_uplift_pct {
                self.pricing.fallback_uplift_pct = fallback_uplift_pct;
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
        if let Some(value) = read_env("RELIANT_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("RELIANT_SERVER_PORT") {
            self.server.port = parse_u16("RELIANT_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("RELIANT_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("RELIANT_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        if let Some(value) = read_env("RELIANT_PRICING_ARTIFACT_DIR") {
            self.pricing.artifact_dir = PathBuf::from(value);
        }
        if let Some(value) = read_env("RELIANT_PRICING_BUCKET_STATS_PATH") {
            self.pricing.bucket_stats_path = Some(PathBuf::from(value));
        }
        if let Some(value) = read_env("RELIANT_PRICING_SIMILARITY_INDEX_PATH") {
            self.pricing.similarity_index_path = Some(PathBuf::from(value));
        }
        if let Some(value) = read_env("RELIANT_PRICING_MODEL_PATH") {
            self.pricing.model_path = Some(PathBuf::from(value));
        }
        if let Some(value) = read_env("RELIANT_PRICING_BLEND_WEIGHTS") {
            self.pricing.blend_weights = value;
        }
        if let Some(value) = read_env("RELIANT_PRICING_VAT_RATE") {
            self.pricing.vat_rate = parse_f64("RELIANT_PRICING_VAT_RATE", &value)?;
        }
        if let Some(value) = read_env("RELIANT_PRICING_FALLBACK_UPLIFT_PCT") {
            self.pricing.fallback_uplift_pct =
                parse_f64("RELIANT_PRICING_FALLBACK_UPLIFT_PCT", &value)?;
        }

        let log_level = read_env("RELIANT_LOGGING_LEVEL").or_else(|| read_env("RELIANT_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("RELIANT_LOGGING_FORMAT").or_else(|| read_env("RELIANT_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(artifact_dir) = overrides.artifact_dir {
            self.pricing.artifact_dir = artifact_dir;
        }
        if let Some(blend_weights) = overrides.blend_weights {
            self.pricing.blend_weights = blend_weights;
        }
        if let Some(bind_address) = overrides.bind_address {
            self.server.bind_address = bind_address;
        }
        if let Some(port) = overrides.port {
            self.server.port = port;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_server(&self.server)?;
        validate_pricing(&self.pricing)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("reliant.toml"), PathBuf::from("config/reliant.toml")]
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
        return Err(ConfigError::Validation("server.port must be greater than zero".to_string()));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

// Blend weights are not validated here; malformed components parse as zero.
fn validate_pricing(pricing: &PricingConfig) -> Result<(), ConfigError> {
    if pricing.artifact_dir.as_os_str().is_empty() {
        return Err(ConfigError::Validation("pricing.artifact_dir must not be empty".to_string()));
    }

    if !pricing.vat_rate.is_finite() || !(0.0..=1.0).contains(&pricing.vat_rate) {
        return Err(ConfigError::Validation("pricing.vat_rate must be in range 0..=1".to_string()));
    }

    if !pricing.fallback_uplift_pct.is_finite()
        || !(0.0..=1.0).contains(&pricing.fallback_uplift_pct)
    {
        return Err(ConfigError::Validation(
            "pricing.fallback_uplift_pct must be in range 0..=1".to_string(),
        ));
    }

    Ok(())
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

fn parse_f64(key: &str, value: &str) -> Result<f64, ConfigError> {
    value.trim().parse::<f64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    server: Option<ServerPatch>,
    pricing: Option<PricingPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct PricingPatch {
    artifact_dir: Option<PathBuf>,
    bucket_stats_path: Option<PathBuf>,
    similarity_index_path: Option<PathBuf>,
    model_path: Option<PathBuf>,
    blend_weights: Option<String>,
    vat_rate: Option<f64>,
    fallback_uplift_pct: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

#[cfg(test)]
mod tests {
    use std::env;
    use std::fs;
    use std::io;
    use std::path::PathBuf;
    use std::sync::{Mutex, OnceLock};

    use tempfile::TempDir;

    use super::{AppConfig, ConfigError, ConfigOverrides, LoadOptions, LogFormat};

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

    fn env_lock() -> &'static Mutex<()> {
        ENV_LOCK.get_or_init(|| Mutex::new(()))
    }

    fn clear_vars(vars: &[&str]) {
        for var in vars {
            env::remove_var(var);
        }
    }

    fn ensure(condition: bool, message: &'static str) -> Result<(), String> {
        if condition {
            Ok(())
        } else {
            Err(message.to_string())
        }
    }

    #[test]
    fn defaults_load_without_file_or_env() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        let config = AppConfig::load(LoadOptions::default())
            .map_err(|err| format!("config load failed: {err}"))?;

        ensure(config.pricing.artifact_dir == PathBuf::from("models"), "default artifact dir")?;
        ensure(config.pricing.blend_weights == "0.70,0.25,0.05", "default blend weights")?;
        ensure(config.server.port == 8080, "default port")?;
        ensure(matches!(config.logging.format, LogFormat::Compact), "default log format")
    }

    #[test]
    fn file_load_supports_env_interpolation() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("TEST_RELIANT_MODEL_DIR", "/var/lib/reliant/models");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("reliant.toml");
            fs::write(
                &path,
                r#"
[pricing]
artifact_dir = "${TEST_RELIANT_MODEL_DIR}"
blend_weights = "0.5,0.5,0"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config =
                AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() })
                    .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.pricing.artifact_dir == PathBuf::from("/var/lib/reliant/models"),
                "artifact dir should be interpolated from environment",
            )?;
            let weights = config.pricing.blend_weights();
            ensure(weights.bucket == 0.5 && weights.model == 0.0, "file blend weights apply")?;
            Ok(())
        })();

        clear_vars(&["TEST_RELIANT_MODEL_DIR"]);
        result
    }

    #[test]
    fn logging_env_aliases_are_supported() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("RELIANT_LOG_LEVEL", "warn");
        env::set_var("RELIANT_LOG_FORMAT", "pretty");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;

            ensure(config.logging.level == "warn", "warning log level should be set from env var")?;
            ensure(
                matches!(config.logging.format, LogFormat::Pretty),
                "pretty logging format should be set from env var",
            )?;
            Ok(())
        })();

        clear_vars(&["RELIANT_LOG_LEVEL", "RELIANT_LOG_FORMAT"]);
        result
    }

    #[test]
    fn precedence_defaults_file_env_overrides() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("RELIANT_PRICING_ARTIFACT_DIR", "/from-env");
        env::set_var("RELIANT_PRICING_MODEL_PATH", "/models/override.json");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("reliant.toml");
            fs::write(
                &path,
                r#"
[pricing]
artifact_dir = "/from-file"
blend_weights = "1,0,0"

[logging]
level = "warn"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config = AppConfig::load(LoadOptions {
                config_path: Some(path),
                overrides: ConfigOverrides {
                    blend_weights: Some("0,1,0".to_string()),
                    log_level: Some("debug".to_string()),
                    ..ConfigOverrides::default()
                },
                ..LoadOptions::default()
            })
            .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.pricing.artifact_dir == PathBuf::from("/from-env"),
                "env artifact dir should win over file",
            )?;
            ensure(
                config.pricing.model_path == Some(PathBuf::from("/models/override.json")),
                "env model path should be applied",
            )?;
            ensure(config.pricing.blend_weights == "0,1,0", "override blend weights should win")?;
            ensure(config.logging.level == "debug", "overridden log level should be debug")?;
            Ok(())
        })();

        clear_vars(&["RELIANT_PRICING_ARTIFACT_DIR", "RELIANT_PRICING_MODEL_PATH"]);
        result
    }

    #[test]
    fn malformed_blend_weights_do_not_fail_validation() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("RELIANT_PRICING_BLEND_WEIGHTS", "lots,-2,0.5");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;
            let weights = config.pricing.blend_weights();
            ensure(
                weights.bucket == 0.0 && weights.neighbor == 0.0 && weights.model == 1.0,
                "only the valid component should carry weight",
            )
        })();

        clear_vars(&["RELIANT_PRICING_BLEND_WEIGHTS"]);
        result
    }

    #[test]
    fn validation_fails_fast_with_actionable_error() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("RELIANT_PRICING_VAT_RATE", "1.5");

        let result = (|| -> Result<(), String> {
            let error = match AppConfig::load(LoadOptions::default()) {
                Ok(_) => {
                    return Err("expected validation failure but config load succeeded".to_string())
                }
                Err(error) => error,
            };
            let has_message = matches!(
                error,
                ConfigError::Validation(ref message) if message.contains("pricing.vat_rate")
            );
            ensure(has_message, "validation failure should mention pricing.vat_rate")
        })();

        clear_vars(&["RELIANT_PRICING_VAT_RATE"]);
        result
    }

    #[test]
    fn non_numeric_env_override_is_rejected() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("RELIANT_SERVER_PORT", "eighty");

        let result = (|| -> Result<(), String> {
            let error = AppConfig::load(LoadOptions::default())
                .err()
                .ok_or_else(|| "expected invalid override".to_string())?;
            ensure(
                matches!(error, ConfigError::InvalidEnvOverride { ref key, .. } if key == "RELIANT_SERVER_PORT"),
                "error should name the offending variable",
            )
        })();

        clear_vars(&["RELIANT_SERVER_PORT"]);
        result
    }
}
