use serde::Deserialize;
use std::{fs, path::PathBuf};

use crate::{
    error::{Result, StoreError},
    loader::LoadOptions,
};

/// Paths and settings shared by `build_store` and the forecast API.
///
/// Read from the JSON file named by `TRAFFIC_CONFIG` (every field optional),
/// then overridden field by field from the environment.
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub observed_csv: PathBuf,
    pub predicted_csv: PathBuf,
    pub store_path: PathBuf,
    /// Single-character delimiter; sniffed per file when unset.
    pub delimiter: Option<char>,
    pub port: u16,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            observed_csv: PathBuf::from("geo_cal_vel.csv"),
            predicted_csv: PathBuf::from("predictions.csv"),
            store_path: PathBuf::from("maria_ap7.store.json"),
            delimiter: None,
            port: 8080,
        }
    }
}

impl AppConfig {
    pub fn load(path: &str) -> Result<Self> {
        let data = fs::read_to_string(path)?;
        let cfg: Self = serde_json::from_str(&data)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject settings the loader cannot honour.
    pub fn validate(&self) -> Result<()> {
        match self.delimiter {
            Some(c) if !c.is_ascii() => Err(StoreError::InvalidConfig(format!(
                "delimiter {:?} is not a single-byte ASCII character",
                c
            ))),
            _ => Ok(()),
        }
    }

    /// `TRAFFIC_CONFIG` file if set, defaults otherwise, then env overrides.
    pub fn from_env() -> Result<Self> {
        let mut cfg = match std::env::var("TRAFFIC_CONFIG") {
            Ok(path) => Self::load(&path)?,
            Err(_) => Self::default(),
        };
        cfg.apply_overrides(|name| std::env::var(name).ok());
        Ok(cfg)
    }

    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(v) = var("OBSERVED_CSV") {
            self.observed_csv = PathBuf::from(v);
        }
        if let Some(v) = var("PREDICTED_CSV") {
            self.predicted_csv = PathBuf::from(v);
        }
        if let Some(v) = var("STORE_PATH") {
            self.store_path = PathBuf::from(v);
        }
        match var("PORT").map(|s| s.parse::<u16>()) {
            Some(Ok(port)) => self.port = port,
            Some(Err(e)) => tracing::warn!("ignoring PORT override: {}", e),
            None => {}
        }
    }

    pub fn load_options(&self) -> LoadOptions {
        let delimiter = match self.delimiter {
            Some(c) if c.is_ascii() => Some(c as u8),
            Some(c) => {
                tracing::warn!("ignoring non-ASCII delimiter {:?}; sniffing per file", c);
                None
            }
            None => None,
        };
        LoadOptions { delimiter }
    }
}
