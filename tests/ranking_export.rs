use std::fs;

use chrono::{NaiveDate, TimeZone, Utc};
use recsys_sessions::{
    aggregate_window, build_sessions, encode_item_features, export_ranking_file, month_windows,
    session_candidates, session_ranking_lines, write_ranking, EncoderConfig, EventRow,
    ItemFeatureEncoding, ItemFeatureRow, ItemId, JoinPolicy, RankingConfig, RankingExportError,
    RankingLayout, Session, SessionId, WindowAggregate,
};
use tempfile::tempdir;

fn ts_ms(day: u32, hour: u32, minute: u32) -> i64 {
    Utc.with_ymd_and_hms(2020, 1, day, hour, minute, 0)
        .single()
        .expect("valid UTC timestamp expected")
        .timestamp_millis()
}

fn row(session_id: SessionId, item_id: ItemId, ts_ms_utc: i64) -> EventRow {
    EventRow {
        session_id,
        item_id,
        ts_ms_utc,
    }
}

struct Fixture {
    sessions: Vec<Session>,
    aggregate: WindowAggregate,
    encoding: ItemFeatureEncoding,
}

/// S1 views 1, 2 and buys 3. S2 views 1 and buys 1. S3 views 4 and buys 2.
fn fixture() -> Fixture {
    let events = vec![
        row(1, 1, ts_ms(3, 10, 0)),
        row(1, 2, ts_ms(3, 10, 30)),
        row(2, 1, ts_ms(4, 9, 0)),
        row(3, 4, ts_ms(5, 8, 0)),
    ];
    let purchases = vec![
        row(1, 3, ts_ms(3, 11, 0)),
        row(2, 1, ts_ms(4, 9, 5)),
        row(3, 2, ts_ms(5, 8, 10)),
    ];
    let (sessions, _) = build_sessions(&events, &purchases, JoinPolicy::Strict).unwrap();
    let windows = month_windows(
        NaiveDate::from_ymd_opt(2020, 1, 1).unwrap(),
        NaiveDate::from_ymd_opt(2020, 2, 1).unwrap(),
    )
    .unwrap();
    let aggregate = aggregate_window(&windows[0], &sessions, &events);
    let features: Vec<ItemFeatureRow> = [(1, 7, 1), (2, 7, 2), (3, 7, 1), (3, 8, 4)]
        .into_iter()
        .map(|(item_id, category, value)| ItemFeatureRow {
            item_id,
            category,
            value,
        })
        .collect();
    let encoding = encode_item_features(&features, &EncoderConfig::default()).unwrap();

    Fixture {
        sessions,
        aggregate,
        encoding,
    }
}

#[test]
fn candidates_exclude_viewed_items_and_keep_the_purchase() {
    let fx = fixture();

    assert_eq!(session_candidates(&fx.sessions[0], &fx.aggregate, 20), vec![3]);
    assert_eq!(
        session_candidates(&fx.sessions[2], &fx.aggregate, 20),
        vec![1, 2, 3]
    );
    assert_eq!(session_candidates(&fx.sessions[2], &fx.aggregate, 2), vec![1, 2]);
    assert_eq!(session_candidates(&fx.sessions[2], &fx.aggregate, 1), vec![2]);
}

#[test]
fn lines_carry_session_and_item_blocks() {
    let fx = fixture();
    let layout = RankingLayout::new(&fx.encoding);
    let lines = session_ranking_lines(
        &fx.sessions[2],
        &fx.aggregate,
        &fx.encoding,
        &RankingConfig::default(),
    );

    let labels: Vec<(ItemId, u8)> = lines.iter().map(|l| (l.item_id, l.label)).collect();
    assert_eq!(labels, vec![(1, 0), (2, 1), (3, 0)]);

    let first = &lines[0];
    assert_eq!(first.session_id, 3);
    assert_eq!(first.features[0], (0, 1.0));
    // One view only, so no duration; the purchase gap is not counted.
    assert_eq!(first.features[1], (1, 0.0));

    // Last viewed item 4 was seen in one session in the window.
    assert_eq!(first.features[2], (layout.last_item_offset(), 1.0));

    // Candidate 1 was seen in two sessions and bought in one.
    let candidate_block: Vec<(usize, f64)> = first
        .features
        .iter()
        .copied()
        .filter(|(idx, _)| *idx >= layout.candidate_offset())
        .collect();
    assert_eq!(candidate_block[0], (layout.candidate_offset(), 2.0));
    assert_eq!(candidate_block[1], (layout.candidate_offset() + 1, 1.0));
    assert_eq!(candidate_block[2], (layout.candidate_offset() + 2, 0.5));

    for line in &lines {
        assert!(line.features.windows(2).all(|pair| pair[0].0 < pair[1].0));
        assert!(line
            .features
            .iter()
            .all(|(idx, _)| *idx < layout.total_width()));
    }
}

#[test]
fn write_ranking_emits_one_positive_per_session() {
    let fx = fixture();
    let mut buf = Vec::new();

    let report = write_ranking(
        &mut buf,
        std::slice::from_ref(&fx.aggregate),
        &fx.sessions,
        &fx.encoding,
        &RankingConfig::default(),
    )
    .unwrap();

    let text = String::from_utf8(buf).unwrap();
    assert_eq!(report.sessions, 3);
    assert_eq!(report.positives, 3);
    assert_eq!(report.lines as usize, text.lines().count());
    assert!(text.lines().next().unwrap().starts_with("1 qid:1 0:2 1:0.5"));
}

#[test]
fn zero_candidates_is_rejected() {
    let fx = fixture();
    let err = write_ranking(
        Vec::new(),
        std::slice::from_ref(&fx.aggregate),
        &fx.sessions,
        &fx.encoding,
        &RankingConfig { max_candidates: 0 },
    )
    .unwrap_err();

    assert!(matches!(err, RankingExportError::InvalidConfig(_)));
}

#[test]
fn file_export_replaces_target_atomically() {
    let fx = fixture();
    let temp = tempdir().unwrap();
    let path = temp.path().join("session_features.svm");
    fs::write(&path, "stale\n").unwrap();

    let report = export_ranking_file(
        &path,
        std::slice::from_ref(&fx.aggregate),
        &fx.sessions,
        &fx.encoding,
        &RankingConfig::default(),
    )
    .unwrap();

    let text = fs::read_to_string(&path).unwrap();
    assert!(!text.contains("stale"));
    assert_eq!(text.lines().count() as u64, report.lines);
    assert!(!temp.path().join("session_features.svm.tmp").exists());
}
