use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use reliant_core::config::{AppConfig, LoadOptions};
use reliant_core::pricing::ArtifactPaths;
use toml::Value;

struct ConfigSources {
    doc: Option<Value>,
    path: Option<PathBuf>,
}

impl ConfigSources {
    fn detect() -> Self {
        let path = detect_config_path();
        let doc = load_config_file_doc(path.as_deref());
        Self { doc, path }
    }

    fn line(&self, key_path: &str, value: &str, env_keys: &[&str]) -> String {
        render_line(key_path, value, self.field_source(key_path, env_keys))
    }

    fn field_source(&self, key_path: &str, env_keys: &[&str]) -> String {
        if let Some(env_key) = env_keys.iter().find(|key| env::var_os(key).is_some()) {
            return format!("env ({env_key})");
        }

        if let Some(doc) = &self.doc {
            if contains_path(doc, key_path) {
                let file_path = self
                    .path
                    .as_ref()
                    .map(|path| path.display().to_string())
                    .unwrap_or_else(|| "config file".to_string());
                return format!("file ({file_path})");
            }
        }

        "default".to_string()
    }
}

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let sources = ConfigSources::detect();
    let pricing = &config.pricing;
    let optional_path =
        |path: &Option<PathBuf>| path.as_ref().map(|p| p.display().to_string());
    let unset = || "<unset>".to_string();

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];

    lines.push(sources.line(
        "server.bind_address",
        &config.server.bind_address,
        &["RELIANT_SERVER_BIND_ADDRESS"],
    ));
    lines.push(sources.line(
        "server.port",
        &config.server.port.to_string(),
        &["RELIANT_SERVER_PORT"],
    ));
    lines.push(sources.line(
        "server.graceful_shutdown_secs",
        &config.server.graceful_shutdown_secs.to_string(),
        &["RELIANT_SERVER_GRACEFUL_SHUTDOWN_SECS"],
    ));

    lines.push(sources.line(
        "pricing.artifact_dir",
        &pricing.artifact_dir.display().to_string(),
        &["RELIANT_PRICING_ARTIFACT_DIR"],
    ));
    lines.push(sources.line(
        "pricing.bucket_stats_path",
        &optional_path(&pricing.bucket_stats_path).unwrap_or_else(unset),
        &["RELIANT_PRICING_BUCKET_STATS_PATH"],
    ));
    lines.push(sources.line(
        "pricing.similarity_index_path",
        &optional_path(&pricing.similarity_index_path).unwrap_or_else(unset),
        &["RELIANT_PRICING_SIMILARITY_INDEX_PATH"],
    ));
    lines.push(sources.line(
        "pricing.model_path",
        &optional_path(&pricing.model_path).unwrap_or_else(unset),
        &["RELIANT_PRICING_MODEL_PATH"],
    ));
    lines.push(sources.line(
        "pricing.blend_weights",
        &format!("{} (normalized {})", pricing.blend_weights, pricing.blend_weights()),
        &["RELIANT_PRICING_BLEND_WEIGHTS"],
    ));
    lines.push(sources.line(
        "pricing.vat_rate",
        &pricing.vat_rate.to_string(),
        &["RELIANT_PRICING_VAT_RATE"],
    ));
    lines.push(sources.line(
        "pricing.fallback_uplift_pct",
        &pricing.fallback_uplift_pct.to_string(),
        &["RELIANT_PRICING_FALLBACK_UPLIFT_PCT"],
    ));

    lines.push(sources.line(
        "logging.level",
        &config.logging.level,
        &["RELIANT_LOGGING_LEVEL", "RELIANT_LOG_LEVEL"],
    ));
    lines.push(sources.line(
        "logging.format",
        &format!("{:?}", config.logging.format),
        &["RELIANT_LOGGING_FORMAT", "RELIANT_LOG_FORMAT"],
    ));

    let resolved = ArtifactPaths::resolve(pricing);
    lines.push("resolved artifact paths:".to_string());
    lines.push(format!("- bucket_stats = {}", resolved.bucket_stats.display()));
    lines.push(format!("- similarity_index = {}", resolved.similarity_index.display()));
    lines.push(format!("- model = {}", resolved.model.display()));

    lines.join("\n")
}

fn detect_config_path() -> Option<PathBuf> {
    [PathBuf::from("reliant.toml"), PathBuf::from("config/reliant.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}
