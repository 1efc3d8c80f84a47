// Configuration loader for Transcript API
//
// Loads the optional TOML configuration file into the process environment so that
// the sections in `config` see file values and real environment variables alike.

use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use toml::Value;

use crate::config::keys;

const CONFIG_FILE_PATH: &str = "transcript_api.conf";

/// Location of the configuration file, overridable through the environment
pub fn config_path() -> PathBuf {
    env::var(keys::CONFIG_FILE)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(CONFIG_FILE_PATH))
}

/// Loads configuration from the TOML file into environment variables
///
/// Configuration precedence (highest to lowest):
/// 1. Environment variables
/// 2. Configuration file values
/// 3. Default values (handled by `config`)
///
/// Returns true if the config file was loaded
pub fn load_config() -> bool {
    load_config_from(&config_path())
}

pub fn load_config_from(config_path: &Path) -> bool {
    if !config_path.exists() {
        debug!("Configuration file not found at: {}", config_path.display());
        return false;
    }

    let config_content = match fs::read_to_string(config_path) {
        Ok(content) => content,
        Err(e) => {
            warn!("Failed to read configuration file: {}", e);
            return false;
        }
    };

    let config_map = match parse_flat_table(&config_content) {
        Ok(map) => map,
        Err(e) => {
            warn!("Failed to parse configuration file: {}", e);
            return false;
        }
    };

    for (key, value) in config_map {
        // Real environment variables win over the file
        if env::var(&key).is_err() {
            debug!("Setting env var from config file: {} = {}", key, value);
            env::set_var(key, value);
        } else {
            debug!("Env var already exists, skipping: {}", key);
        }
    }

    info!("Configuration loaded from {}", config_path.display());
    true
}

/// Flatten a top-level TOML table into string values
///
/// Arrays of scalars become comma separated lists, matching the list syntax of the
/// environment variables.
fn parse_flat_table(content: &str) -> Result<HashMap<String, String>, toml::de::Error> {
    let values: Value = content.parse()?;
    let mut config_map = HashMap::new();

    if let Value::Table(table) = values {
        for (key, value) in table {
            match scalar_to_string(&value) {
                Some(s) => {
                    config_map.insert(key, s);
                }
                None => match value {
                    Value::Array(items) => {
                        let list: Option<Vec<String>> = items.iter().map(scalar_to_string).collect();
                        match list {
                            Some(list) => {
                                config_map.insert(key, list.join(","));
                            }
                            None => warn!("Skipping nested array for key: {}", key),
                        }
                    }
                    _ => warn!("Skipping unsupported TOML value type for key: {}", key),
                },
            }
        }
    }

    Ok(config_map)
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Integer(i) => Some(i.to_string()),
        Value::Float(f) => Some(f.to_string()),
        Value::Boolean(b) => Some(b.to_string()),
        _ => None,
    }
}
