use crate::store::RECORDS_KEY;
use serde::Deserialize;
use std::fs;
use std::io;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config io error: {0}")]
    Io(#[from] io::Error),
    #[error("config parse error: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct HistorianConfig {
    pub records_key: String,
    /// Absent means records never expire.
    pub max_record_age_secs: Option<u64>,
}

impl Default for HistorianConfig {
    fn default() -> Self {
        Self {
            records_key: RECORDS_KEY.to_string(),
            max_record_age_secs: None,
        }
    }
}

impl HistorianConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = fs::read_to_string(path)?;
        Ok(toml::from_str(&contents)?)
    }

    pub fn max_record_age(&self) -> Option<Duration> {
        self.max_record_age_secs.map(Duration::from_secs)
    }
}
