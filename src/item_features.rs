//! Sparse categorical encoding of item features with a frequency cutoff.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{info, warn};

use crate::records::{ItemFeatureRow, ItemId};

pub const DEFAULT_MIN_ITEM_SHARE: f64 = 0.05;

/// Column label derived from one feature row.
///
/// Ordering puts every category column before every category-value column,
/// which fixes the dense index layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum FeatureColumn {
    Category(u32),
    CategoryValue(u32, u32),
}

impl fmt::Display for FeatureColumn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Category(category) => write!(f, "{category}"),
            Self::CategoryValue(category, value) => write!(f, "{category}-{value}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EncoderConfig {
    pub min_item_share: f64,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            min_item_share: DEFAULT_MIN_ITEM_SHARE,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ItemFeatureEncoding {
    pub item_count: usize,
    /// Both label flavors held by each item.
    pub item_columns: BTreeMap<ItemId, BTreeSet<FeatureColumn>>,
    pub column_index: BTreeMap<FeatureColumn, usize>,
    /// Row counts per item for category columns only. Category-value labels are
    /// indexed but never counted here.
    pub item_counts: BTreeMap<ItemId, BTreeMap<FeatureColumn, u32>>,
    pub column_totals: BTreeMap<FeatureColumn, u64>,
    pub threshold: f64,
    pub selected_columns: BTreeSet<FeatureColumn>,
    pub selected: BTreeMap<ItemId, Vec<(FeatureColumn, u32)>>,
    pub fingerprint: String,
}

impl ItemFeatureEncoding {
    pub fn width(&self) -> usize {
        self.column_index.len()
    }

    pub fn selected_for(&self, item_id: ItemId) -> &[(FeatureColumn, u32)] {
        self.selected
            .get(&item_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum EncodingError {
    #[error("invalid encoder config: {0}")]
    InvalidConfig(String),
}

pub fn encode_item_features(
    rows: &[ItemFeatureRow],
    cfg: &EncoderConfig,
) -> Result<ItemFeatureEncoding, EncodingError> {
    if !(cfg.min_item_share > 0.0 && cfg.min_item_share < 1.0) {
        return Err(EncodingError::InvalidConfig(format!(
            "min_item_share must be in (0, 1), got {}",
            cfg.min_item_share
        )));
    }

    let mut item_columns: BTreeMap<ItemId, BTreeSet<FeatureColumn>> = BTreeMap::new();
    let mut item_counts: BTreeMap<ItemId, BTreeMap<FeatureColumn, u32>> = BTreeMap::new();

    for row in rows {
        let category = FeatureColumn::Category(row.category);
        let category_value = FeatureColumn::CategoryValue(row.category, row.value);

        let labels = item_columns.entry(row.item_id).or_default();
        labels.insert(category);
        labels.insert(category_value);

        *item_counts
            .entry(row.item_id)
            .or_default()
            .entry(category)
            .or_default() += 1;
    }

    let item_count = item_columns.len();
    if item_count == 0 {
        warn!(
            component = "item_features",
            event = "item_features.encode.empty"
        );
    }

    let column_index: BTreeMap<FeatureColumn, usize> = item_columns
        .values()
        .flatten()
        .copied()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .enumerate()
        .map(|(idx, column)| (column, idx))
        .collect();

    let mut column_totals: BTreeMap<FeatureColumn, u64> = BTreeMap::new();
    for counts in item_counts.values() {
        for (column, count) in counts {
            *column_totals.entry(*column).or_default() += u64::from(*count);
        }
    }

    let threshold = item_count as f64 * cfg.min_item_share;
    let selected_columns: BTreeSet<FeatureColumn> = column_totals
        .iter()
        .filter(|(_, total)| **total as f64 > threshold)
        .map(|(column, _)| *column)
        .collect();

    let selected: BTreeMap<ItemId, Vec<(FeatureColumn, u32)>> = item_counts
        .iter()
        .filter_map(|(item_id, counts)| {
            let kept: Vec<(FeatureColumn, u32)> = counts
                .iter()
                .filter(|(column, _)| selected_columns.contains(*column))
                .map(|(column, count)| (*column, *count))
                .collect();
            (!kept.is_empty()).then_some((*item_id, kept))
        })
        .collect();

    let fingerprint = layout_fingerprint(cfg, &column_index);

    info!(
        component = "item_features",
        event = "item_features.encode.finish",
        rows = rows.len(),
        item_count,
        columns = column_index.len(),
        counted_columns = column_totals.len(),
        selected_columns = selected_columns.len(),
        selected_items = selected.len(),
        threshold,
        fingerprint = %fingerprint
    );

    Ok(ItemFeatureEncoding {
        item_count,
        item_columns,
        column_index,
        item_counts,
        column_totals,
        threshold,
        selected_columns,
        selected,
        fingerprint,
    })
}

fn layout_fingerprint(
    cfg: &EncoderConfig,
    column_index: &BTreeMap<FeatureColumn, usize>,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("min_item_share:{};", cfg.min_item_share));
    hasher.update("columns:");
    for (column, idx) in column_index {
        hasher.update(format!("{column}={idx},"));
    }
    hex::encode(hasher.finalize())
}
