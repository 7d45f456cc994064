//! Run summary formatting.

use crate::error::Result;
use crate::metrics::Summary;
use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, Table};

/// Formats run summaries for output.
pub struct Report;

impl Report {
    /// Format a summary as a console table.
    pub fn format_table(summary: &Summary) -> String {
        let mut table = Table::new();
        table
            .load_preset(UTF8_FULL)
            .apply_modifier(UTF8_ROUND_CORNERS)
            .set_header(vec![format!("Run Summary: {}", summary.scenario)]);

        table.add_row(vec!["Duration:", &format!("{:.1}s", summary.duration_secs)]);
        table.add_row(vec!["VUs:", &format!("{}", summary.vus)]);
        table.add_row(vec!["Iterations:", &format!("{}", summary.iterations)]);
        table.add_row(vec![
            "Total Requests:",
            &format!("{}", summary.total_requests),
        ]);
        let success_rate = if summary.total_requests > 0 {
            let ok = summary.total_requests - summary.failed_requests;
            ok as f64 / summary.total_requests as f64 * 100.0
        } else {
            0.0
        };
        table.add_row(vec!["Success Rate:", &format!("{:.1}%", success_rate)]);
        table.add_row(vec![
            "Requests/sec:",
            &format!("{:.1}", summary.requests_per_second),
        ]);

        table.add_row(vec!["", ""]);
        table.add_row(vec!["Latency (ms)", "p50 / p75 / p90 / p95 / p99"]);
        table.add_row(vec![
            "",
            &format!(
                "{:.1} / {:.1} / {:.1} / {:.1} / {:.1}",
                summary.latency_p50,
                summary.latency_p75,
                summary.latency_p90,
                summary.latency_p95,
                summary.latency_p99
            ),
        ]);
        table.add_row(vec!["", "min / avg / max"]);
        table.add_row(vec![
            "",
            &format!(
                "{:.1} / {:.1} / {:.1}",
                summary.latency_min, summary.latency_avg, summary.latency_max
            ),
        ]);

        table.add_row(vec!["", ""]);
        table.add_row(vec![
            "Data Received:",
            &format!("{:.1} MB/s", summary.data_received_per_second / 1_000_000.0),
        ]);
        table.add_row(vec![
            "Data Sent:",
            &format!("{:.1} MB/s", summary.data_sent_per_second / 1_000_000.0),
        ]);

        if !summary.thresholds.is_empty() {
            table.add_row(vec!["", ""]);
            table.add_row(vec!["Thresholds", ""]);
            for verdict in &summary.thresholds {
                let mark = if verdict.passed { "✓" } else { "✗" };
                table.add_row(vec![
                    &format!("{} {}", mark, verdict.selector),
                    &format!("{} (observed {:.2})", verdict.expression, verdict.observed),
                ]);
            }
        }

        table.to_string()
    }

    /// Format a summary as JSON.
    pub fn format_json(summary: &Summary) -> Result<String> {
        Ok(serde_json::to_string_pretty(summary)?)
    }

    /// Format a summary as a CSV row.
    pub fn format_csv(summary: &Summary) -> String {
        format!(
            "{},{},{},{},{},{:.1},{:.1},{:.1},{:.1},{}",
            summary.timestamp,
            summary.scenario,
            summary.duration_secs,
            summary.total_requests,
            summary.failed_requests,
            summary.requests_per_second,
            summary.latency_p50,
            summary.latency_p90,
            summary.latency_p99,
            summary.thresholds_passed()
        )
    }

    /// CSV header row.
    pub fn csv_header() -> &'static str {
        "timestamp,scenario,duration,requests,failed,rps,p50,p90,p99,thresholds_passed"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::threshold::Verdict;

    fn summary() -> Summary {
        Summary {
            scenario: "simple".to_string(),
            timestamp: "2021-01-01T00:00:00+00:00".to_string(),
            duration_secs: 10.0,
            vus: 10,
            iterations: 90,
            total_requests: 100,
            failed_requests: 10,
            requests_per_second: 10.0,
            latency_p50: 5.0,
            latency_p75: 6.0,
            latency_p90: 7.0,
            latency_p95: 8.0,
            latency_p99: 9.0,
            latency_min: 1.0,
            latency_max: 12.0,
            latency_avg: 5.5,
            data_received_per_second: 1024.0,
            data_sent_per_second: 256.0,
            thresholds: vec![Verdict {
                selector: "http_reqs{expected_response:true}".to_string(),
                expression: "rate>5".to_string(),
                observed: 9.0,
                passed: true,
            }],
        }
    }

    #[test]
    fn table_includes_threshold_rows() {
        let table = Report::format_table(&summary());
        assert!(table.contains("Run Summary: simple"));
        assert!(table.contains("✓ http_reqs{expected_response:true}"));
        assert!(table.contains("rate>5"));
    }

    #[test]
    fn table_includes_full_latency_spread_and_throughput() {
        let table = Report::format_table(&summary());
        assert!(table.contains("p50 / p75 / p90 / p95 / p99"));
        assert!(table.contains("5.0 / 6.0 / 7.0 / 8.0 / 9.0"));
        assert!(table.contains("min / avg / max"));
        assert!(table.contains("1.0 / 5.5 / 12.0"));
        assert!(table.contains("Data Received:"));
        assert!(table.contains("Data Sent:"));
    }

    #[test]
    fn csv_row_matches_header_arity() {
        let header_fields = Report::csv_header().split(',').count();
        let row_fields = Report::format_csv(&summary()).split(',').count();
        assert_eq!(header_fields, row_fields);
    }

    #[test]
    fn json_round_trips() {
        let json = Report::format_json(&summary()).unwrap();
        let parsed: Summary = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.total_requests, 100);
        assert!(parsed.thresholds_passed());
    }
}
