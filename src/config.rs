//! Pipeline configuration and environment loading.

use std::env;
use std::path::PathBuf;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::aggregate::EmptyWindowPolicy;
use crate::item_features::{EncoderConfig, DEFAULT_MIN_ITEM_SHARE};
use crate::ranking::RankingConfig;
use crate::sessions::JoinPolicy;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReportFormat {
    Text,
    Json,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub sessions_path: PathBuf,
    pub purchases_path: PathBuf,
    pub item_features_path: PathBuf,
    pub window_start: NaiveDate,
    pub window_end_exclusive: NaiveDate,
    pub join_policy: JoinPolicy,
    pub empty_window_policy: EmptyWindowPolicy,
    pub encoder: EncoderConfig,
    pub ranking_output: Option<PathBuf>,
    pub ranking: RankingConfig,
    pub report_format: ReportFormat,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            sessions_path: PathBuf::from("data/train_sessions.csv"),
            purchases_path: PathBuf::from("data/train_purchases.csv"),
            item_features_path: PathBuf::from("data/item_features.csv"),
            window_start: NaiveDate::from_ymd_opt(2020, 1, 1).unwrap_or_default(),
            window_end_exclusive: NaiveDate::from_ymd_opt(2021, 6, 1).unwrap_or_default(),
            join_policy: JoinPolicy::ReportAndSkip,
            empty_window_policy: EmptyWindowPolicy::ReportAndSkip,
            encoder: EncoderConfig {
                min_item_share: DEFAULT_MIN_ITEM_SHARE,
            },
            ranking_output: None,
            ranking: RankingConfig::default(),
            report_format: ReportFormat::Text,
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.window_end_exclusive <= self.window_start {
            return Err(ConfigError::Invalid(format!(
                "window end {} must be after window start {}",
                self.window_end_exclusive, self.window_start
            )));
        }
        if !(self.encoder.min_item_share > 0.0 && self.encoder.min_item_share < 1.0) {
            return Err(ConfigError::Invalid(format!(
                "feature min share must be in (0, 1), got {}",
                self.encoder.min_item_share
            )));
        }
        if self.ranking.max_candidates == 0 {
            return Err(ConfigError::Invalid(
                "ranking candidates must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var} has invalid value '{value}': expected {expected}")]
    InvalidVar {
        var: &'static str,
        value: String,
        expected: &'static str,
    },
    #[error("invalid pipeline config: {0}")]
    Invalid(String),
}

pub fn pipeline_config_from_env() -> Result<PipelineConfig, ConfigError> {
    let mut config = PipelineConfig::default();

    if let Some(path) = non_empty_var("RECSYS_SESSIONS_PATH") {
        config.sessions_path = PathBuf::from(path);
    }
    if let Some(path) = non_empty_var("RECSYS_PURCHASES_PATH") {
        config.purchases_path = PathBuf::from(path);
    }
    if let Some(path) = non_empty_var("RECSYS_ITEM_FEATURES_PATH") {
        config.item_features_path = PathBuf::from(path);
    }
    if let Some(raw) = non_empty_var("RECSYS_WINDOW_START") {
        config.window_start = parse_var("RECSYS_WINDOW_START", &raw, "YYYY-MM-DD", parse_date)?;
    }
    if let Some(raw) = non_empty_var("RECSYS_WINDOW_END") {
        config.window_end_exclusive =
            parse_var("RECSYS_WINDOW_END", &raw, "YYYY-MM-DD", parse_date)?;
    }
    if let Some(raw) = non_empty_var("RECSYS_JOIN_POLICY") {
        config.join_policy =
            parse_var("RECSYS_JOIN_POLICY", &raw, "strict|report", parse_join_policy)?;
    }
    if let Some(raw) = non_empty_var("RECSYS_EMPTY_WINDOW_POLICY") {
        config.empty_window_policy = parse_var(
            "RECSYS_EMPTY_WINDOW_POLICY",
            &raw,
            "strict|report",
            parse_empty_window_policy,
        )?;
    }
    if let Some(raw) = non_empty_var("RECSYS_FEATURE_MIN_SHARE") {
        config.encoder.min_item_share = parse_var(
            "RECSYS_FEATURE_MIN_SHARE",
            &raw,
            "a number in (0, 1)",
            |s| s.parse::<f64>().ok(),
        )?;
    }
    if let Some(path) = non_empty_var("RECSYS_RANKING_OUTPUT") {
        config.ranking_output = Some(PathBuf::from(path));
    }
    if let Some(raw) = non_empty_var("RECSYS_RANKING_CANDIDATES") {
        config.ranking.max_candidates = parse_var(
            "RECSYS_RANKING_CANDIDATES",
            &raw,
            "a positive integer",
            |s| s.parse::<usize>().ok(),
        )?;
    }
    if let Some(raw) = non_empty_var("RECSYS_REPORT_FORMAT") {
        config.report_format =
            parse_var("RECSYS_REPORT_FORMAT", &raw, "text|json", parse_report_format)?;
    }

    config.validate()?;
    Ok(config)
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_var<T>(
    var: &'static str,
    raw: &str,
    expected: &'static str,
    parse: impl FnOnce(&str) -> Option<T>,
) -> Result<T, ConfigError> {
    parse(raw).ok_or_else(|| ConfigError::InvalidVar {
        var,
        value: raw.to_string(),
        expected,
    })
}

fn parse_date(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok()
}

fn parse_join_policy(raw: &str) -> Option<JoinPolicy> {
    match raw.to_ascii_lowercase().as_str() {
        "strict" => Some(JoinPolicy::Strict),
        "report" | "report_and_skip" => Some(JoinPolicy::ReportAndSkip),
        _ => None,
    }
}

fn parse_empty_window_policy(raw: &str) -> Option<EmptyWindowPolicy> {
    match raw.to_ascii_lowercase().as_str() {
        "strict" => Some(EmptyWindowPolicy::Strict),
        "report" | "report_and_skip" => Some(EmptyWindowPolicy::ReportAndSkip),
        _ => None,
    }
}

fn parse_report_format(raw: &str) -> Option<ReportFormat> {
    match raw.to_ascii_lowercase().as_str() {
        "text" => Some(ReportFormat::Text),
        "json" => Some(ReportFormat::Json),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_env::with_env_vars;

    const ALL_VARS: [&str; 11] = [
        "RECSYS_SESSIONS_PATH",
        "RECSYS_PURCHASES_PATH",
        "RECSYS_ITEM_FEATURES_PATH",
        "RECSYS_WINDOW_START",
        "RECSYS_WINDOW_END",
        "RECSYS_JOIN_POLICY",
        "RECSYS_EMPTY_WINDOW_POLICY",
        "RECSYS_FEATURE_MIN_SHARE",
        "RECSYS_RANKING_OUTPUT",
        "RECSYS_RANKING_CANDIDATES",
        "RECSYS_REPORT_FORMAT",
    ];

    type EnvOverride = (&'static str, Option<&'static str>);

    fn cleared_with(overrides: &[EnvOverride]) -> Vec<EnvOverride> {
        let mut vars: Vec<EnvOverride> = ALL_VARS.iter().map(|name| (*name, None)).collect();
        for (name, value) in overrides {
            if let Some(slot) = vars.iter_mut().find(|(n, _)| *n == *name) {
                slot.1 = *value;
            }
        }
        vars
    }

    #[test]
    fn defaults_when_env_missing() {
        let cfg = with_env_vars(&cleared_with(&[]), pipeline_config_from_env).unwrap();
        assert_eq!(cfg, PipelineConfig::default());
    }

    #[test]
    fn parses_overrides_from_env() {
        let vars = cleared_with(&[
            ("RECSYS_SESSIONS_PATH", Some("/tmp/s.csv")),
            ("RECSYS_WINDOW_START", Some("2021-01-01")),
            ("RECSYS_WINDOW_END", Some("2021-04-01")),
            ("RECSYS_JOIN_POLICY", Some("Strict")),
            ("RECSYS_FEATURE_MIN_SHARE", Some("0.1")),
            ("RECSYS_RANKING_OUTPUT", Some("/tmp/out.svm")),
            ("RECSYS_RANKING_CANDIDATES", Some("5")),
            ("RECSYS_REPORT_FORMAT", Some("json")),
        ]);
        let cfg = with_env_vars(&vars, pipeline_config_from_env).unwrap();

        assert_eq!(cfg.sessions_path, PathBuf::from("/tmp/s.csv"));
        assert_eq!(cfg.window_start, NaiveDate::from_ymd_opt(2021, 1, 1).unwrap());
        assert_eq!(cfg.join_policy, JoinPolicy::Strict);
        assert_eq!(cfg.empty_window_policy, EmptyWindowPolicy::ReportAndSkip);
        assert_eq!(cfg.encoder.min_item_share, 0.1);
        assert_eq!(cfg.ranking_output, Some(PathBuf::from("/tmp/out.svm")));
        assert_eq!(cfg.ranking.max_candidates, 5);
        assert_eq!(cfg.report_format, ReportFormat::Json);
    }

    #[test]
    fn invalid_values_are_errors() {
        let vars = cleared_with(&[("RECSYS_JOIN_POLICY", Some("lenient"))]);
        let err = with_env_vars(&vars, pipeline_config_from_env).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidVar {
                var: "RECSYS_JOIN_POLICY",
                ..
            }
        ));

        let vars = cleared_with(&[
            ("RECSYS_WINDOW_START", Some("2021-05-01")),
            ("RECSYS_WINDOW_END", Some("2021-05-01")),
        ]);
        let err = with_env_vars(&vars, pipeline_config_from_env).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let vars = cleared_with(&[("RECSYS_RANKING_CANDIDATES", Some("0"))]);
        assert!(with_env_vars(&vars, pipeline_config_from_env).is_err());
    }
}
