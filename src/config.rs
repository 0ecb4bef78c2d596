use anyhow::Result;
use clap::Parser;
use serde::Deserialize;
use serde_yaml;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[command(name = "bookshelf")]
#[command(about = "Runs the bookshelf web app", long_about = None)]
pub struct Cli {
    #[arg(short = 'c', long = "config")]
    pub config_path: Option<String>,

    /// Overrides `app.port` from the config file.
    #[arg(short = 'p', long = "port")]
    pub port: Option<u16>,
}

pub fn default_config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".bookshelf")
}

pub fn default_config_path() -> PathBuf {
    default_config_dir().join("config.yaml")
}

#[derive(Debug, Deserialize, Clone)]
pub struct App {
    #[serde(default = "default_database")]
    database: String,
    #[serde(default = "default_host")]
    host: String,
    #[serde(default = "default_port")]
    port: u16,
    #[serde(default)]
    pub turso_url: Option<String>,
    #[serde(default)]
    pub turso_auth_token: Option<String>,
    #[serde(default = "default_sync_interval")]
    pub sync_interval_seconds: u64,
}

fn default_database() -> String {
    "books-collection.db".to_string()
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    5000
}

fn default_sync_interval() -> u64 {
    60
}

impl Default for App {
    fn default() -> Self {
        App {
            database: default_database(),
            host: default_host(),
            port: default_port(),
            turso_url: None,
            turso_auth_token: None,
            sync_interval_seconds: default_sync_interval(),
        }
    }
}

impl App {
    pub fn get_db(&self) -> &str {
        &self.database
    }

    pub fn get_port(&self) -> u16 {
        self.port
    }

    pub fn set_port(&mut self, port: u16) {
        self.port = port;
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub app: App,
}

impl Config {
    /// Loads `path` when it exists, otherwise falls back to the built-in defaults.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Config::load_config(&path.to_string_lossy())
        } else {
            tracing::info!(path = ?path, "no config file found, using defaults");
            Ok(Config::default())
        }
    }

    fn load_config(path: &str) -> Result<Config> {
        let yaml_str = fs::read_to_string(path)?;
        Config::from_yaml(&yaml_str)
    }

    pub fn from_yaml(yaml_str: &str) -> Result<Config> {
        let yaml_with_env = Config::substitute_env_vars(yaml_str)?;
        let config: Config = serde_yaml::from_str(&yaml_with_env)?;
        Ok(config)
    }

    fn substitute_env_vars(yaml_str: &str) -> Result<String> {
        let mut result = yaml_str.to_string();
        let mut offset = 0;

        while let Some(start) = result[offset..].find("${") {
            let actual_start = offset + start;
            if let Some(end) = result[actual_start..].find("}") {
                let var_name = &result[actual_start + 2..actual_start + end];

                // ${VAR:-default}
                let env_value = if let Some(default_start) = var_name.find(":-") {
                    let actual_var = &var_name[..default_start];
                    let default_val = &var_name[default_start + 2..];
                    env::var(actual_var).unwrap_or_else(|_| default_val.to_string())
                } else {
                    env::var(var_name).unwrap_or_else(|_| {
                        tracing::warn!(var = var_name, "environment variable not found");
                        String::new()
                    })
                };

                result.replace_range(actual_start..actual_start + end + 1, &env_value);
                offset = actual_start + env_value.len();
            } else {
                break;
            }
        }

        Ok(result)
    }
}
