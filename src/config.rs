use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::reader::DEFAULT_REVEAL_STEP;

const DEFAULT_ENV_PREFIX: &str = "MANGATUI";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Config {
    #[serde(default)]
    pub catalog: CatalogConfig,
    #[serde(default)]
    pub ui: UIConfig,
    #[serde(default)]
    pub reader: ReaderConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CatalogConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_request_timeout", with = "humantime_serde")]
    pub request_timeout: Duration,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            user_agent: default_user_agent(),
            request_timeout: default_request_timeout(),
        }
    }
}

fn default_base_url() -> String {
    crate::catalog::DEFAULT_BASE_URL.to_string()
}

fn default_user_agent() -> String {
    format!("manga-tui/{}", crate::VERSION)
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(20)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UIConfig {
    #[serde(default = "default_theme")]
    pub theme: String,
}

impl Default for UIConfig {
    fn default() -> Self {
        Self {
            theme: default_theme(),
        }
    }
}

fn default_theme() -> String {
    "default".into()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReaderConfig {
    #[serde(default = "default_reveal_step")]
    pub reveal_step: usize,
    #[serde(default = "default_prefetch_workers")]
    pub prefetch_workers: usize,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            reveal_step: default_reveal_step(),
            prefetch_workers: default_prefetch_workers(),
        }
    }
}

fn default_reveal_step() -> usize {
    DEFAULT_REVEAL_STEP
}

fn default_prefetch_workers() -> usize {
    2
}

#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    pub config_file: Option<PathBuf>,
    pub env_prefix: Option<String>,
}

pub fn load(options: LoadOptions) -> Result<Config> {
    let mut cfg = Config::default();

    if let Some(path) = options.config_file.as_ref() {
        if path.exists() {
            let from_file = read_config_file(path)?;
            cfg = merge_config(cfg, from_file);
        }
    } else if let Some(default_path) = default_config_path() {
        if default_path.exists() {
            let from_file = read_config_file(&default_path)?;
            cfg = merge_config(cfg, from_file);
        }
    }

    let prefix = options.env_prefix.as_deref().unwrap_or(DEFAULT_ENV_PREFIX);
    cfg = merge_config(cfg, load_env(prefix)?);

    Ok(cfg)
}

fn read_config_file(path: &Path) -> Result<Config> {
    let data = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file at {}", path.display()))?;
    let config: Config = serde_yaml::from_str(&data)
        .with_context(|| format!("Failed to parse config file at {}", path.display()))?;
    Ok(config)
}

fn merge_config(mut base: Config, other: Config) -> Config {
    if !other.catalog.base_url.is_empty() && other.catalog.base_url != default_base_url() {
        base.catalog.base_url = other.catalog.base_url;
    }
    if !other.catalog.user_agent.is_empty() && other.catalog.user_agent != default_user_agent() {
        base.catalog.user_agent = other.catalog.user_agent;
    }
    if other.catalog.request_timeout != default_request_timeout() {
        base.catalog.request_timeout = other.catalog.request_timeout;
    }

    if !other.ui.theme.is_empty() && other.ui.theme != default_theme() {
        base.ui.theme = other.ui.theme;
    }

    if other.reader.reveal_step != 0 && other.reader.reveal_step != default_reveal_step() {
        base.reader.reveal_step = other.reader.reveal_step;
    }
    if other.reader.prefetch_workers != 0
        && other.reader.prefetch_workers != default_prefetch_workers()
    {
        base.reader.prefetch_workers = other.reader.prefetch_workers;
    }

    base
}

fn load_env(prefix: &str) -> Result<Config> {
    let mut map: HashMap<String, String> = HashMap::new();
    let upper_prefix = format!("{}_", prefix.to_uppercase());

    for (key, value) in env::vars() {
        if let Some(stripped) = key.strip_prefix(&upper_prefix) {
            let normalized = stripped.to_ascii_lowercase().replace("__", ".");
            map.insert(normalized, value);
        }
    }

    if map.is_empty() {
        return Ok(Config::default());
    }

    let mut cfg = Config::default();

    for (key, value) in map {
        apply_env_value(&mut cfg, &key, value);
    }

    Ok(cfg)
}

fn apply_env_value(cfg: &mut Config, key: &str, value: String) {
    match key {
        "catalog.base_url" => cfg.catalog.base_url = value,
        "catalog.user_agent" => cfg.catalog.user_agent = value,
        "catalog.request_timeout" => {
            if let Ok(duration) = humantime::parse_duration(&value) {
                cfg.catalog.request_timeout = duration;
            }
        }
        "ui.theme" => cfg.ui.theme = value,
        "reader.reveal_step" => {
            if let Ok(parsed) = value.parse::<usize>() {
                cfg.reader.reveal_step = parsed;
            }
        }
        "reader.prefetch_workers" => {
            if let Ok(parsed) = value.parse::<usize>() {
                cfg.reader.prefetch_workers = parsed;
            }
        }
        _ => {}
    }
}

pub fn default_path() -> Option<PathBuf> {
    default_config_path()
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("manga-tui").join("config.yaml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn load_defaults_without_files() {
        let cfg = load(LoadOptions {
            env_prefix: Some("MANGATUI_TEST_NONE".into()),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(cfg.ui.theme, "default");
        assert_eq!(cfg.reader.reveal_step, DEFAULT_REVEAL_STEP);
        assert_eq!(cfg.catalog.base_url, default_base_url());
    }

    #[test]
    fn file_overrides_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        let mut file = fs::File::create(&path).unwrap();
        writeln!(
            file,
            "catalog:\n  base_url: http://example.com\nreader:\n  reveal_step: 5"
        )
        .unwrap();

        let cfg = load(LoadOptions {
            config_file: Some(path),
            env_prefix: Some("MANGATUI_TEST_FILE".into()),
        })
        .unwrap();
        assert_eq!(cfg.catalog.base_url, "http://example.com");
        assert_eq!(cfg.reader.reveal_step, 5);
        assert_eq!(cfg.ui.theme, "default");
    }

    #[test]
    fn env_overrides() {
        env::set_var("MANGATUI_UI__THEME", "midnight");
        env::set_var("MANGATUI_READER__REVEAL_STEP", "7");
        let cfg = load(LoadOptions::default()).unwrap();
        assert_eq!(cfg.ui.theme, "midnight");
        assert_eq!(cfg.reader.reveal_step, 7);
        env::remove_var("MANGATUI_UI__THEME");
        env::remove_var("MANGATUI_READER__REVEAL_STEP");
    }
}
