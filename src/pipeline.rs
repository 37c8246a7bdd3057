//! End-to-end run: load, build sessions, aggregate per window, encode features.

use serde::Serialize;
use thiserror::Error;
use tracing::info;

use crate::aggregate::{aggregate_windows, AggregateError, AggregateReport, WindowAggregate};
use crate::config::{ConfigError, PipelineConfig};
use crate::item_features::{encode_item_features, EncodingError, ItemFeatureEncoding};
use crate::ranking::{export_ranking_file, RankingExportError, RankingReport};
use crate::records::{
    load_item_features, load_purchases, load_session_events, EventRow, ItemFeatureRow,
    RecordLoadError,
};
use crate::sessions::{build_sessions, Session, SessionBuildError, SessionBuildReport};
use crate::windows::{month_windows, WindowError, WindowKey};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to load input: {0}")]
    Load(#[from] RecordLoadError),
    #[error("session build failed: {0}")]
    Sessions(#[from] SessionBuildError),
    #[error("window generation failed: {0}")]
    Windows(#[from] WindowError),
    #[error("aggregation failed: {0}")]
    Aggregate(#[from] AggregateError),
    #[error("item feature encoding failed: {0}")]
    Encoding(#[from] EncodingError),
    #[error("ranking export failed: {0}")]
    Ranking(#[from] RankingExportError),
}

/// In-memory inputs, already parsed.
#[derive(Debug, Clone, Default)]
pub struct PipelineInputs {
    pub events: Vec<EventRow>,
    pub purchases: Vec<EventRow>,
    pub item_features: Vec<ItemFeatureRow>,
}

#[derive(Debug, Clone)]
pub struct PipelineOutput {
    pub sessions: Vec<Session>,
    pub session_report: SessionBuildReport,
    pub aggregates: Vec<WindowAggregate>,
    pub aggregate_report: AggregateReport,
    pub encoding: ItemFeatureEncoding,
    pub ranking_report: Option<RankingReport>,
}

/// One printable line per window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WindowSummary {
    pub window: WindowKey,
    pub start_ts_ms_utc: i64,
    pub end_ts_ms_utc_exclusive: i64,
    pub sessions: u64,
    pub joined_events: u64,
    pub items: usize,
    pub purchased_items: usize,
    pub candidates: usize,
}

impl From<&WindowAggregate> for WindowSummary {
    fn from(aggregate: &WindowAggregate) -> Self {
        Self {
            window: aggregate.window.key,
            start_ts_ms_utc: aggregate.window.start_ts_ms_utc,
            end_ts_ms_utc_exclusive: aggregate.window.end_ts_ms_utc_exclusive,
            sessions: aggregate.session_count,
            joined_events: aggregate.joined_events,
            items: aggregate.all_events.len(),
            purchased_items: aggregate.purchased.len(),
            candidates: aggregate.candidates.len(),
        }
    }
}

pub fn load_inputs(cfg: &PipelineConfig) -> Result<PipelineInputs, PipelineError> {
    Ok(PipelineInputs {
        events: load_session_events(&cfg.sessions_path)?,
        purchases: load_purchases(&cfg.purchases_path)?,
        item_features: load_item_features(&cfg.item_features_path)?,
    })
}

pub fn run_pipeline(cfg: &PipelineConfig) -> Result<PipelineOutput, PipelineError> {
    cfg.validate()?;
    let inputs = load_inputs(cfg)?;
    run_pipeline_on(&inputs, cfg)
}

pub fn run_pipeline_on(
    inputs: &PipelineInputs,
    cfg: &PipelineConfig,
) -> Result<PipelineOutput, PipelineError> {
    cfg.validate()?;

    info!(
        component = "pipeline",
        event = "pipeline.start",
        event_rows = inputs.events.len(),
        purchase_rows = inputs.purchases.len(),
        item_feature_rows = inputs.item_features.len()
    );

    let (sessions, session_report) =
        build_sessions(&inputs.events, &inputs.purchases, cfg.join_policy)?;
    let windows = month_windows(cfg.window_start, cfg.window_end_exclusive)?;
    let (aggregates, aggregate_report) = aggregate_windows(
        &windows,
        &sessions,
        &inputs.events,
        cfg.empty_window_policy,
    )?;
    let encoding = encode_item_features(&inputs.item_features, &cfg.encoder)?;

    let ranking_report = match &cfg.ranking_output {
        Some(path) => Some(export_ranking_file(
            path,
            &aggregates,
            &sessions,
            &encoding,
            &cfg.ranking,
        )?),
        None => None,
    };

    info!(
        component = "pipeline",
        event = "pipeline.finish",
        sessions = sessions.len(),
        windows = aggregates.len(),
        empty_windows = aggregate_report.empty_windows.len(),
        selected_columns = encoding.selected_columns.len(),
        ranking_lines = ranking_report.as_ref().map(|r| r.lines).unwrap_or(0)
    );

    Ok(PipelineOutput {
        sessions,
        session_report,
        aggregates,
        aggregate_report,
        encoding,
        ranking_report,
    })
}

pub fn window_summaries(output: &PipelineOutput) -> Vec<WindowSummary> {
    output.aggregates.iter().map(WindowSummary::from).collect()
}
