//! Learning-to-rank export in SVMlight format.
//!
//! One line per (session, candidate item). Candidates come from the items
//! purchased in the session's window, the session's own purchase being the
//! positive example.

use std::collections::BTreeSet;
use std::fmt;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::aggregate::{ItemSummary, WindowAggregate};
use crate::item_features::ItemFeatureEncoding;
use crate::records::{ItemId, SessionId};
use crate::sessions::Session;

const SESSION_BLOCK_WIDTH: usize = 2;
const SUMMARY_BLOCK_WIDTH: usize = 7;
const MS_PER_HOUR: f64 = 3_600_000.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankingConfig {
    pub max_candidates: usize,
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self { max_candidates: 20 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankingLine {
    pub label: u8,
    pub session_id: SessionId,
    pub item_id: ItemId,
    pub features: Vec<(usize, f64)>,
}

impl fmt::Display for RankingLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} qid:{}", self.label, self.session_id)?;
        for (idx, value) in &self.features {
            write!(f, " {idx}:{value}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankingReport {
    pub sessions: u64,
    pub lines: u64,
    pub positives: u64,
    pub sessions_outside_windows: u64,
}

#[derive(Debug, Error)]
pub enum RankingExportError {
    #[error("invalid ranking config: {0}")]
    InvalidConfig(String),
    #[error("invalid output path: {0}")]
    InvalidOutputPath(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Feature index layout shared by every exported line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RankingLayout {
    pub feature_width: usize,
}

impl RankingLayout {
    pub fn new(encoding: &ItemFeatureEncoding) -> Self {
        Self {
            feature_width: encoding.width(),
        }
    }

    pub fn last_item_offset(&self) -> usize {
        SESSION_BLOCK_WIDTH
    }

    pub fn candidate_offset(&self) -> usize {
        self.last_item_offset() + self.item_block_width()
    }

    pub fn total_width(&self) -> usize {
        self.candidate_offset() + self.item_block_width()
    }

    fn item_block_width(&self) -> usize {
        SUMMARY_BLOCK_WIDTH + self.feature_width
    }
}

/// Candidate items for one session, ascending.
///
/// Items the session viewed are excluded. The purchase is always present.
pub fn session_candidates(
    session: &Session,
    aggregate: &WindowAggregate,
    max_candidates: usize,
) -> Vec<ItemId> {
    let viewed: BTreeSet<ItemId> = session.views().iter().map(|e| e.item_id).collect();
    let target = session.purchase.item_id;

    let mut out: Vec<ItemId> = aggregate
        .candidates
        .iter()
        .copied()
        .filter(|item| *item != target && !viewed.contains(item))
        .take(max_candidates.saturating_sub(1))
        .collect();
    out.push(target);
    out.sort_unstable();
    out
}

pub fn session_ranking_lines(
    session: &Session,
    aggregate: &WindowAggregate,
    encoding: &ItemFeatureEncoding,
    cfg: &RankingConfig,
) -> Vec<RankingLine> {
    let layout = RankingLayout::new(encoding);

    let mut prefix = vec![
        (0, session.event_count as f64),
        (1, session.duration_ms as f64 / MS_PER_HOUR),
    ];
    push_item_block(
        &mut prefix,
        layout.last_item_offset(),
        aggregate.item_summary(session.last_event.item_id),
        session.last_event.item_id,
        encoding,
    );

    session_candidates(session, aggregate, cfg.max_candidates)
        .into_iter()
        .map(|item_id| {
            let mut features = prefix.clone();
            push_item_block(
                &mut features,
                layout.candidate_offset(),
                aggregate.item_summary(item_id),
                item_id,
                encoding,
            );
            RankingLine {
                label: u8::from(item_id == session.purchase.item_id),
                session_id: session.session_id,
                item_id,
                features,
            }
        })
        .collect()
}

pub fn write_ranking<W: Write>(
    writer: W,
    aggregates: &[WindowAggregate],
    sessions: &[Session],
    encoding: &ItemFeatureEncoding,
    cfg: &RankingConfig,
) -> Result<RankingReport, RankingExportError> {
    if cfg.max_candidates == 0 {
        return Err(RankingExportError::InvalidConfig(
            "max_candidates must be > 0".to_string(),
        ));
    }

    let mut writer = BufWriter::new(writer);
    let mut report = RankingReport::default();

    for session in sessions {
        let first_ts = session.first_ts_ms_utc();
        let Some(aggregate) = aggregates
            .iter()
            .find(|aggregate| aggregate.window.contains(first_ts))
        else {
            report.sessions_outside_windows += 1;
            continue;
        };

        report.sessions += 1;
        for line in session_ranking_lines(session, aggregate, encoding, cfg) {
            writeln!(writer, "{line}")?;
            report.lines += 1;
            report.positives += u64::from(line.label);
        }
    }

    writer.flush()?;

    if report.sessions_outside_windows > 0 {
        warn!(
            component = "ranking",
            event = "ranking.sessions_outside_windows",
            sessions = report.sessions_outside_windows
        );
    }

    Ok(report)
}

/// Writes the export to a temporary sibling and renames it into place.
pub fn export_ranking_file(
    path: &Path,
    aggregates: &[WindowAggregate],
    sessions: &[Session],
    encoding: &ItemFeatureEncoding,
    cfg: &RankingConfig,
) -> Result<RankingReport, RankingExportError> {
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .ok_or_else(|| RankingExportError::InvalidOutputPath(path.display().to_string()))?;
    let tmp_path = path.with_file_name(format!("{file_name}.tmp"));

    info!(
        component = "ranking",
        event = "ranking.export.start",
        path = %path.display(),
        max_candidates = cfg.max_candidates,
        layout_width = RankingLayout::new(encoding).total_width(),
        encoding_fingerprint = %encoding.fingerprint
    );

    let report = {
        let file = fs::File::create(&tmp_path)?;
        let report = write_ranking(&file, aggregates, sessions, encoding, cfg)?;
        file.sync_all()?;
        report
    };
    fs::rename(&tmp_path, path)?;

    info!(
        component = "ranking",
        event = "ranking.export.finish",
        path = %path.display(),
        sessions = report.sessions,
        lines = report.lines,
        positives = report.positives
    );

    Ok(report)
}

fn push_item_block(
    out: &mut Vec<(usize, f64)>,
    offset: usize,
    summary: ItemSummary,
    item_id: ItemId,
    encoding: &ItemFeatureEncoding,
) {
    for (idx, value) in summary.values().into_iter().enumerate() {
        out.push((offset + idx, value));
    }

    let feature_offset = offset + SUMMARY_BLOCK_WIDTH;
    let mut features: Vec<(usize, f64)> = encoding
        .selected_for(item_id)
        .iter()
        .filter_map(|(column, count)| {
            encoding
                .column_index
                .get(column)
                .map(|idx| (feature_offset + idx, f64::from(*count)))
        })
        .collect();
    features.sort_by_key(|(idx, _)| *idx);
    out.extend(features);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_renders_svmlight_pairs() {
        let line = RankingLine {
            label: 1,
            session_id: 42,
            item_id: 7,
            features: vec![(0, 3.0), (1, 0.5), (9, 2.0)],
        };
        assert_eq!(line.to_string(), "1 qid:42 0:3 1:0.5 9:2");
    }

    #[test]
    fn layout_blocks_do_not_overlap() {
        let layout = RankingLayout { feature_width: 5 };
        assert_eq!(layout.last_item_offset(), 2);
        assert_eq!(layout.candidate_offset(), 2 + 7 + 5);
        assert_eq!(layout.total_width(), 2 + 2 * (7 + 5));
    }
}
