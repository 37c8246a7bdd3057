//! Session builder: group view events per session and join the purchase outcome.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::records::{EventRow, ItemId, SessionId};
use crate::windows::WindowKey;

const MAX_REPORTED_SESSION_IDS: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JoinPolicy {
    Strict,
    ReportAndSkip,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub item_id: ItemId,
    pub ts_ms_utc: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub session_id: SessionId,
    pub window: WindowKey,
    /// Viewed events in ascending time order, followed by the purchase.
    pub events: Vec<Event>,
    pub event_count: usize,
    pub distinct_item_count: usize,
    pub duration_ms: i64,
    pub last_event: Event,
    pub purchase: Event,
}

impl Session {
    pub fn first_ts_ms_utc(&self) -> i64 {
        self.events[0].ts_ms_utc
    }

    /// Viewed events only, without the appended purchase.
    pub fn views(&self) -> &[Event] {
        &self.events[..self.event_count]
    }

    pub fn purchase_follows_last_view(&self) -> bool {
        self.purchase.ts_ms_utc >= self.last_event.ts_ms_utc
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionBuildReport {
    pub event_rows: u64,
    pub purchase_rows: u64,
    pub raw_sessions: u64,
    pub joined_sessions: u64,
    pub sessions_without_purchase: u64,
    pub purchases_without_session: u64,
    pub ordering_anomalies: u64,
    pub missing_purchase_ids: Vec<SessionId>,
    pub orphan_purchase_ids: Vec<SessionId>,
    pub ordering_anomaly_ids: Vec<SessionId>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionBuildError {
    #[error("session {session_id} has no purchase row")]
    MissingPurchase { session_id: SessionId },
    #[error("purchase for session {session_id} has no view events")]
    MissingSession { session_id: SessionId },
    #[error("session {session_id} has more than one purchase row")]
    DuplicatePurchase { session_id: SessionId },
    #[error("session {session_id} has an unrepresentable timestamp {ts_ms_utc}")]
    InvalidTimestamp {
        session_id: SessionId,
        ts_ms_utc: i64,
    },
}

/// Builds one [`Session`] per session id present in both inputs, ordered by id.
pub fn build_sessions(
    events: &[EventRow],
    purchases: &[EventRow],
    policy: JoinPolicy,
) -> Result<(Vec<Session>, SessionBuildReport), SessionBuildError> {
    info!(
        component = "sessions",
        event = "sessions.build.start",
        event_rows = events.len(),
        purchase_rows = purchases.len(),
        policy = ?policy
    );

    let mut grouped: BTreeMap<SessionId, Vec<Event>> = BTreeMap::new();
    for row in events {
        grouped.entry(row.session_id).or_default().push(Event {
            item_id: row.item_id,
            ts_ms_utc: row.ts_ms_utc,
        });
    }

    let mut purchase_by_session: BTreeMap<SessionId, Event> = BTreeMap::new();
    for row in purchases {
        let purchase = Event {
            item_id: row.item_id,
            ts_ms_utc: row.ts_ms_utc,
        };
        if purchase_by_session.insert(row.session_id, purchase).is_some() {
            return Err(SessionBuildError::DuplicatePurchase {
                session_id: row.session_id,
            });
        }
    }

    let mut report = SessionBuildReport {
        event_rows: events.len() as u64,
        purchase_rows: purchases.len() as u64,
        raw_sessions: grouped.len() as u64,
        ..SessionBuildReport::default()
    };

    for session_id in purchase_by_session.keys() {
        if !grouped.contains_key(session_id) {
            handle_join_miss(
                SessionBuildError::MissingSession {
                    session_id: *session_id,
                },
                policy,
                &mut report,
            )?;
        }
    }

    let mut sessions = Vec::with_capacity(grouped.len());
    for (session_id, mut views) in grouped {
        let Some(purchase) = purchase_by_session.get(&session_id).copied() else {
            handle_join_miss(
                SessionBuildError::MissingPurchase { session_id },
                policy,
                &mut report,
            )?;
            continue;
        };

        let session = assemble_session(session_id, &mut views, purchase)?;
        if !session.purchase_follows_last_view() {
            warn!(
                component = "sessions",
                event = "sessions.build.ordering_anomaly",
                session_id,
                last_view_ts_ms_utc = session.last_event.ts_ms_utc,
                purchase_ts_ms_utc = purchase.ts_ms_utc
            );
            report.ordering_anomalies += 1;
            push_capped(&mut report.ordering_anomaly_ids, session_id);
        }
        sessions.push(session);
    }

    report.joined_sessions = sessions.len() as u64;

    info!(
        component = "sessions",
        event = "sessions.build.finish",
        raw_sessions = report.raw_sessions,
        joined_sessions = report.joined_sessions,
        sessions_without_purchase = report.sessions_without_purchase,
        purchases_without_session = report.purchases_without_session,
        ordering_anomalies = report.ordering_anomalies
    );

    Ok((sessions, report))
}

fn assemble_session(
    session_id: SessionId,
    views: &mut Vec<Event>,
    purchase: Event,
) -> Result<Session, SessionBuildError> {
    // Stable sort: equal timestamps keep file order.
    views.sort_by_key(|event| event.ts_ms_utc);

    let first = views[0];
    let last = views[views.len() - 1];
    let window = WindowKey::from_ts_ms(first.ts_ms_utc).ok_or(
        SessionBuildError::InvalidTimestamp {
            session_id,
            ts_ms_utc: first.ts_ms_utc,
        },
    )?;
    let distinct_item_count = views
        .iter()
        .map(|event| event.item_id)
        .collect::<BTreeSet<_>>()
        .len();
    let event_count = views.len();

    let mut events = std::mem::take(views);
    events.push(purchase);

    Ok(Session {
        session_id,
        window,
        events,
        event_count,
        distinct_item_count,
        duration_ms: last.ts_ms_utc - first.ts_ms_utc,
        last_event: last,
        purchase,
    })
}

fn handle_join_miss(
    miss: SessionBuildError,
    policy: JoinPolicy,
    report: &mut SessionBuildReport,
) -> Result<(), SessionBuildError> {
    if policy == JoinPolicy::Strict {
        return Err(miss);
    }

    match miss {
        SessionBuildError::MissingPurchase { session_id } => {
            warn!(
                component = "sessions",
                event = "sessions.join.missing_purchase",
                session_id
            );
            report.sessions_without_purchase += 1;
            push_capped(&mut report.missing_purchase_ids, session_id);
        }
        SessionBuildError::MissingSession { session_id } => {
            warn!(
                component = "sessions",
                event = "sessions.join.orphan_purchase",
                session_id
            );
            report.purchases_without_session += 1;
            push_capped(&mut report.orphan_purchase_ids, session_id);
        }
        other => return Err(other),
    }

    Ok(())
}

fn push_capped(ids: &mut Vec<SessionId>, session_id: SessionId) {
    if ids.len() < MAX_REPORTED_SESSION_IDS {
        ids.push(session_id);
    }
}
