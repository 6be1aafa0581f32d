//! Engine configuration
//!
//! Thresholds and rendering switches used across resolution passes. The numeric
//! thresholds are empirical, so they are exposed here instead of being hard-coded.
//!
//! Values come from three places, later ones winning:
//! 1. `EngineConfig::default()`
//! 2. A JSON file (`EngineConfig::load`)
//! 3. `NLSQL_*` environment variables, including a `.env` file (`EngineConfig::from_env`)

use crate::error::{NlSqlError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Minimum score for single best-match lookups (columns, explicit terms)
    pub match_threshold: f64,

    /// Minimum score when resolving table references from a full prompt
    pub prompt_table_threshold: f64,

    /// Candidates within this many points of the best are subject to the
    /// data-bearing / shorter-name preference
    pub data_preference_margin: f64,

    /// Longest foreign-key path (in edges) allowed between two tables
    pub max_join_depth: usize,

    /// Row limit for LIST / default SELECT intents without an explicit count
    pub default_row_limit: u32,

    /// Collation used for accent- and case-insensitive place-name comparison
    pub location_collation: String,

    /// Annotate FROM/JOIN tables with `WITH (NOLOCK)`
    pub dirty_read_hint: bool,

    /// Maximum token distance between the two halves of a compound noun
    pub compound_window: usize,

    /// SQLite file for the learned hint store (`None` keeps hints in memory)
    pub hint_db_path: Option<PathBuf>,

    /// Example prompts kept per hint
    pub example_prompt_limit: usize,

    /// Execution times kept per hint
    pub execution_time_window: usize,

    /// Upper bound of the hint complexity score
    pub max_complexity: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            match_threshold: 70.0,
            prompt_table_threshold: 60.0,
            data_preference_margin: 10.0,
            max_join_depth: 3,
            default_row_limit: 100,
            location_collation: "Latin1_General_CI_AI".to_string(),
            dirty_read_hint: true,
            compound_window: 2,
            hint_db_path: None,
            example_prompt_limit: 10,
            execution_time_window: 100,
            max_complexity: 10.0,
        }
    }
}

impl EngineConfig {
    /// Load configuration from a JSON file. Missing fields keep their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| NlSqlError::Config(format!("Failed to read {}: {}", path.display(), e)))?;
        let config: EngineConfig = serde_json::from_str(&content)
            .map_err(|e| NlSqlError::Config(format!("Failed to parse {}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults overridden by `NLSQL_*` environment variables (and `.env`).
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        Self::default().with_env_overrides()
    }

    /// Apply `NLSQL_*` environment variables on top of this configuration.
    pub fn with_env_overrides(mut self) -> Result<Self> {
        if let Some(v) = env_parse::<f64>("NLSQL_MATCH_THRESHOLD")? {
            self.match_threshold = v;
        }
        if let Some(v) = env_parse::<f64>("NLSQL_PROMPT_TABLE_THRESHOLD")? {
            self.prompt_table_threshold = v;
        }
        if let Some(v) = env_parse::<f64>("NLSQL_DATA_PREFERENCE_MARGIN")? {
            self.data_preference_margin = v;
        }
        if let Some(v) = env_parse::<usize>("NLSQL_MAX_JOIN_DEPTH")? {
            self.max_join_depth = v;
        }
        if let Some(v) = env_parse::<u32>("NLSQL_DEFAULT_ROW_LIMIT")? {
            self.default_row_limit = v;
        }
        if let Ok(v) = std::env::var("NLSQL_LOCATION_COLLATION") {
            self.location_collation = v;
        }
        if let Some(v) = env_parse::<bool>("NLSQL_DIRTY_READ_HINT")? {
            self.dirty_read_hint = v;
        }
        if let Ok(v) = std::env::var("NLSQL_HINT_DB_PATH") {
            self.hint_db_path = Some(PathBuf::from(v));
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("match_threshold", self.match_threshold),
            ("prompt_table_threshold", self.prompt_table_threshold),
            ("data_preference_margin", self.data_preference_margin),
        ] {
            if !(0.0..=100.0).contains(&value) {
                return Err(NlSqlError::Config(format!(
                    "{} must be between 0 and 100, got {}",
                    name, value
                )));
            }
        }
        if self.max_join_depth == 0 {
            return Err(NlSqlError::Config("max_join_depth must be at least 1".to_string()));
        }
        if self.example_prompt_limit == 0 || self.execution_time_window == 0 {
            return Err(NlSqlError::Config("hint ring buffers must hold at least one entry".to_string()));
        }
        Ok(())
    }
}

fn env_parse<T: FromStr>(key: &str) -> Result<Option<T>> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| NlSqlError::Config(format!("Invalid value for {}: '{}'", key, raw))),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.match_threshold, 70.0);
        assert_eq!(config.prompt_table_threshold, 60.0);
        assert_eq!(config.data_preference_margin, 10.0);
        assert_eq!(config.max_join_depth, 3);
        assert_eq!(config.default_row_limit, 100);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_partial_json() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nlsql.json");
        std::fs::write(&path, r#"{"match_threshold": 80, "dirty_read_hint": false}"#).unwrap();

        let config = EngineConfig::load(&path).unwrap();
        assert_eq!(config.match_threshold, 80.0);
        assert!(!config.dirty_read_hint);
        assert_eq!(config.default_row_limit, 100);
    }

    #[test]
    fn test_validate_rejects_out_of_range() {
        let config = EngineConfig {
            prompt_table_threshold: 140.0,
            ..EngineConfig::default()
        };
        assert!(matches!(config.validate(), Err(NlSqlError::Config(_))));

        let config = EngineConfig {
            max_join_depth: 0,
            ..EngineConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
