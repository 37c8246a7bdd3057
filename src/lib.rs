//! Session feature engineering for the Dressipi recommendation dataset.
//!
//! Implemented scope:
//! - CSV loading of session views, purchases and item features
//! - per-session sequences joined with their purchase
//! - calendar-month windows and per-item aggregates per window
//! - sparse item feature encoding with a frequency cutoff
//! - SVMlight learning-to-rank export

mod aggregate;
mod config;
mod item_features;
mod observability;
mod pipeline;
mod ranking;
mod records;
mod sessions;
#[cfg(test)]
mod test_env;
mod windows;

pub use aggregate::{
    aggregate_window, aggregate_windows, item_summaries, AggregateError, AggregateReport,
    EmptyWindowPolicy, ItemSummary, ItemWindowStats, WindowAggregate,
};
pub use config::{pipeline_config_from_env, ConfigError, PipelineConfig, ReportFormat};
pub use item_features::{
    encode_item_features, EncoderConfig, EncodingError, FeatureColumn, ItemFeatureEncoding,
    DEFAULT_MIN_ITEM_SHARE,
};
pub use observability::{
    init_logging, log_inputs_selected, log_run_start, logging_config_from_env, LogFormat,
    LoggingConfig, LoggingInitError,
};
pub use pipeline::{
    load_inputs, run_pipeline, run_pipeline_on, window_summaries, PipelineError, PipelineInputs,
    PipelineOutput, WindowSummary,
};
pub use ranking::{
    export_ranking_file, session_candidates, session_ranking_lines, write_ranking,
    RankingConfig, RankingExportError, RankingLayout, RankingLine, RankingReport,
};
pub use records::{
    load_events_from_reader, load_item_features, load_item_features_from_reader,
    load_purchases, load_session_events, parse_date_ms, EventRow, ItemFeatureRow, ItemId,
    RecordLoadError, SessionId,
};
pub use sessions::{
    build_sessions, Event, JoinPolicy, Session, SessionBuildError, SessionBuildReport,
};
pub use windows::{month_windows, MonthWindow, WindowError, WindowKey};
