//! Per-window item aggregates over all views and over purchase-matching views.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::records::{EventRow, ItemId, SessionId};
use crate::sessions::Session;
use crate::windows::{MonthWindow, WindowKey};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EmptyWindowPolicy {
    Strict,
    ReportAndSkip,
}

/// Sums are taken once per distinct session containing the item.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemWindowStats {
    pub session_count: u64,
    pub event_count_sum: u64,
    pub duration_ms_sum: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowAggregate {
    pub window: MonthWindow,
    pub session_count: u64,
    pub joined_events: u64,
    pub all_events: BTreeMap<ItemId, ItemWindowStats>,
    pub purchased: BTreeMap<ItemId, ItemWindowStats>,
    pub candidates: BTreeSet<ItemId>,
}

impl WindowAggregate {
    pub fn is_empty(&self) -> bool {
        self.session_count == 0
    }

    pub fn item_summary(&self, item_id: ItemId) -> ItemSummary {
        let all = self.all_events.get(&item_id).copied().unwrap_or_default();
        let bought = self.purchased.get(&item_id).copied().unwrap_or_default();
        ItemSummary::from_stats(&all, &bought)
    }
}

/// Ratios derived from the two stats views of one item in one window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ItemSummary {
    pub session_count: u64,
    pub buy_count: u64,
    pub buy_ratio: f64,
    pub avg_session_len: f64,
    pub avg_session_duration_ms: f64,
    pub avg_bought_session_len: f64,
    pub avg_bought_session_duration_ms: f64,
}

impl ItemSummary {
    pub fn from_stats(all: &ItemWindowStats, bought: &ItemWindowStats) -> Self {
        Self {
            session_count: all.session_count,
            buy_count: bought.session_count,
            buy_ratio: ratio(bought.session_count as f64, all.session_count),
            avg_session_len: ratio(all.event_count_sum as f64, all.session_count),
            avg_session_duration_ms: ratio(all.duration_ms_sum as f64, all.session_count),
            avg_bought_session_len: ratio(bought.event_count_sum as f64, bought.session_count),
            avg_bought_session_duration_ms: ratio(
                bought.duration_ms_sum as f64,
                bought.session_count,
            ),
        }
    }

    pub fn values(&self) -> [f64; 7] {
        [
            self.session_count as f64,
            self.buy_count as f64,
            self.buy_ratio,
            self.avg_session_len,
            self.avg_session_duration_ms,
            self.avg_bought_session_len,
            self.avg_bought_session_duration_ms,
        ]
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateReport {
    pub windows: u64,
    pub empty_windows: Vec<WindowKey>,
    pub sessions_outside_windows: u64,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AggregateError {
    #[error("window {window} contains no sessions")]
    EmptyWindow { window: WindowKey },
}

pub fn aggregate_windows(
    windows: &[MonthWindow],
    sessions: &[Session],
    events: &[EventRow],
    policy: EmptyWindowPolicy,
) -> Result<(Vec<WindowAggregate>, AggregateReport), AggregateError> {
    info!(
        component = "aggregate",
        event = "aggregate.start",
        windows = windows.len(),
        sessions = sessions.len(),
        event_rows = events.len(),
        policy = ?policy
    );

    let mut report = AggregateReport {
        windows: windows.len() as u64,
        ..AggregateReport::default()
    };
    report.sessions_outside_windows = sessions
        .iter()
        .filter(|session| {
            !windows
                .iter()
                .any(|window| window.contains(session.first_ts_ms_utc()))
        })
        .count() as u64;
    if report.sessions_outside_windows > 0 {
        warn!(
            component = "aggregate",
            event = "aggregate.sessions_outside_windows",
            sessions = report.sessions_outside_windows
        );
    }

    let mut out = Vec::with_capacity(windows.len());
    for window in windows {
        let aggregate = aggregate_window(window, sessions, events);
        if aggregate.is_empty() {
            match policy {
                EmptyWindowPolicy::Strict => {
                    return Err(AggregateError::EmptyWindow { window: window.key })
                }
                EmptyWindowPolicy::ReportAndSkip => {
                    warn!(
                        component = "aggregate",
                        event = "aggregate.window.empty",
                        window = %window.key,
                        start_ts_ms_utc = window.start_ts_ms_utc,
                        end_ts_ms_utc_exclusive = window.end_ts_ms_utc_exclusive
                    );
                    report.empty_windows.push(window.key);
                }
            }
        }
        out.push(aggregate);
    }

    info!(
        component = "aggregate",
        event = "aggregate.finish",
        windows = report.windows,
        empty_windows = report.empty_windows.len(),
        sessions_outside_windows = report.sessions_outside_windows
    );

    Ok((out, report))
}

/// Aggregates one window.
///
/// Sessions are selected by their first view; raw events by their own timestamp.
/// Only events whose session was selected take part.
pub fn aggregate_window(
    window: &MonthWindow,
    sessions: &[Session],
    events: &[EventRow],
) -> WindowAggregate {
    let in_window: HashMap<SessionId, &Session> = sessions
        .iter()
        .filter(|session| window.contains(session.first_ts_ms_utc()))
        .map(|session| (session.session_id, session))
        .collect();

    let mut all_sessions: BTreeMap<ItemId, BTreeSet<SessionId>> = BTreeMap::new();
    let mut bought_sessions: BTreeMap<ItemId, BTreeSet<SessionId>> = BTreeMap::new();
    let mut joined_events = 0u64;

    for row in events.iter().filter(|row| window.contains(row.ts_ms_utc)) {
        let Some(session) = in_window.get(&row.session_id) else {
            continue;
        };
        joined_events += 1;
        all_sessions
            .entry(row.item_id)
            .or_default()
            .insert(row.session_id);
        if row.item_id == session.purchase.item_id {
            bought_sessions
                .entry(row.item_id)
                .or_default()
                .insert(row.session_id);
        }
    }

    let candidates = in_window
        .values()
        .map(|session| session.purchase.item_id)
        .collect();

    let aggregate = WindowAggregate {
        window: *window,
        session_count: in_window.len() as u64,
        joined_events,
        all_events: sum_per_item(&all_sessions, &in_window),
        purchased: sum_per_item(&bought_sessions, &in_window),
        candidates,
    };

    info!(
        component = "aggregate",
        event = "aggregate.window.finish",
        window = %window.key,
        sessions = aggregate.session_count,
        joined_events = aggregate.joined_events,
        items = aggregate.all_events.len(),
        purchased_items = aggregate.purchased.len(),
        candidates = aggregate.candidates.len()
    );

    aggregate
}

/// Derived ratios for every item seen in the window.
pub fn item_summaries(aggregate: &WindowAggregate) -> BTreeMap<ItemId, ItemSummary> {
    aggregate
        .all_events
        .keys()
        .map(|item_id| (*item_id, aggregate.item_summary(*item_id)))
        .collect()
}

fn sum_per_item(
    item_sessions: &BTreeMap<ItemId, BTreeSet<SessionId>>,
    sessions: &HashMap<SessionId, &Session>,
) -> BTreeMap<ItemId, ItemWindowStats> {
    item_sessions
        .iter()
        .map(|(item_id, session_ids)| {
            let mut stats = ItemWindowStats::default();
            for session in session_ids.iter().filter_map(|id| sessions.get(id)) {
                stats.session_count += 1;
                stats.event_count_sum += session.event_count as u64;
                stats.duration_ms_sum += session.duration_ms;
            }
            (*item_id, stats)
        })
        .collect()
}

fn ratio(numerator: f64, denominator: u64) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator / denominator as f64
    }
}
