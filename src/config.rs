use crate::data::Day;
use crate::error::EngineError;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Which search the optimizer runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    /// Branch-and-bound up to `exact_limit` candidates, meet-in-the-middle above.
    #[default]
    Auto,
    BranchAndBound,
    MeetInTheMiddle,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct SearchConfig {
    pub max_results: usize,
    pub exact_limit: usize,
    /// Half size above which a half is enumerated with the beam.
    pub beam_threshold: usize,
    /// Live states kept after each beam fold step.
    pub beam_width: usize,
    pub strategy: StrategyKind,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            max_results: 5,
            exact_limit: 16,
            beam_threshold: 22,
            beam_width: 200_000,
            strategy: StrategyKind::Auto,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct EngineConfig {
    pub search: SearchConfig,
    pub days: Vec<Day>,
    pub general_education_department: String,
    pub best_schedule_dir: String,
    pub file_extension: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            search: SearchConfig::default(),
            days: vec![Day::Mon, Day::Tue, Day::Wed, Day::Thu, Day::Fri, Day::Sat],
            general_education_department: "General Education".to_string(),
            best_schedule_dir: "best_schedules".to_string(),
            file_extension: "json".to_string(),
        }
    }
}

impl EngineConfig {
    pub fn from_json(json: &str) -> Result<Self, EngineError> {
        let config: EngineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, EngineError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if self.search.max_results == 0 {
            return Err(EngineError::Config("max_results must be at least 1".to_string()));
        }
        if self.search.beam_width == 0 {
            return Err(EngineError::Config("beam_width must be at least 1".to_string()));
        }
        if self.days.is_empty() {
            return Err(EngineError::Config("at least one day must be displayed".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let config =
            EngineConfig::from_json(r#"{"search": {"beam_width": 1000, "strategy": "meet_in_the_middle"}}"#)
                .unwrap();
        assert_eq!(config.search.beam_width, 1000);
        assert_eq!(config.search.beam_threshold, 22);
        assert_eq!(config.search.max_results, 5);
        assert_eq!(config.search.strategy, StrategyKind::MeetInTheMiddle);
        assert_eq!(config.days.len(), 6);
    }

    #[test]
    fn invalid_values_are_rejected() {
        let err = EngineConfig::from_json(r#"{"search": {"max_results": 0}}"#).unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));
        let err = EngineConfig::from_json(r#"{"days": []}"#).unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));
    }
}
