use recsys_sessions::{
    init_logging, item_summaries, log_inputs_selected, log_run_start, logging_config_from_env,
    pipeline_config_from_env, run_pipeline, window_summaries, ReportFormat,
};

const TOP_ITEMS_PER_WINDOW: usize = 5;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let logging_cfg = logging_config_from_env();
    init_logging(&logging_cfg)?;

    let cfg = pipeline_config_from_env()?;
    log_run_start(&logging_cfg, &cfg);
    log_inputs_selected(&cfg);

    let output = run_pipeline(&cfg)?;

    match cfg.report_format {
        ReportFormat::Json => {
            for summary in window_summaries(&output) {
                println!("{}", serde_json::to_string(&summary)?);
            }
            println!("{}", serde_json::to_string(&output.session_report)?);
            println!("{}", serde_json::to_string(&output.aggregate_report)?);
            if let Some(report) = &output.ranking_report {
                println!("{}", serde_json::to_string(report)?);
            }
        }
        ReportFormat::Text => print_text_report(&output),
    }

    Ok(())
}

fn print_text_report(output: &recsys_sessions::PipelineOutput) {
    let report = &output.session_report;
    println!(
        "sessions | raw={} joined={} without_purchase={} orphan_purchases={} ordering_anomalies={}",
        report.raw_sessions,
        report.joined_sessions,
        report.sessions_without_purchase,
        report.purchases_without_session,
        report.ordering_anomalies
    );

    for (summary, aggregate) in window_summaries(output).iter().zip(&output.aggregates) {
        println!(
            "\nwindow {} | sessions={} joined_events={} items={} purchased_items={} candidates={}",
            summary.window,
            summary.sessions,
            summary.joined_events,
            summary.items,
            summary.purchased_items,
            summary.candidates
        );

        let mut ranked: Vec<_> = item_summaries(aggregate).into_iter().collect();
        ranked.sort_by(|a, b| {
            b.1.session_count
                .cmp(&a.1.session_count)
                .then(a.0.cmp(&b.0))
        });
        for (item_id, item) in ranked.iter().take(TOP_ITEMS_PER_WINDOW) {
            println!(
                "  item {} | sessions={} bought={} buy_ratio={:.4} avg_len={:.2} avg_dur_h={:.2}",
                item_id,
                item.session_count,
                item.buy_count,
                item.buy_ratio,
                item.avg_session_len,
                item.avg_session_duration_ms / 3_600_000.0
            );
        }
    }

    if !output.aggregate_report.empty_windows.is_empty() {
        let empty: Vec<String> = output
            .aggregate_report
            .empty_windows
            .iter()
            .map(ToString::to_string)
            .collect();
        println!("\nempty windows: {}", empty.join(", "));
    }

    let encoding = &output.encoding;
    println!(
        "\nitem features | items={} columns={} selected_columns={} selected_items={} threshold={:.2} fingerprint={}",
        encoding.item_count,
        encoding.width(),
        encoding.selected_columns.len(),
        encoding.selected.len(),
        encoding.threshold,
        encoding.fingerprint
    );

    if let Some(ranking) = &output.ranking_report {
        println!(
            "ranking export | sessions={} lines={} positives={}",
            ranking.sessions, ranking.lines, ranking.positives
        );
    }
}
