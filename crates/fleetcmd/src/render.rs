//! Plain-text rendering for CLI output

use chrono::{DateTime, Utc};

use fleetcmd_core::FanOutReport;
use fleetcmd_store::{HistoryEntry, Host};

/// Host listing with stats
#[must_use]
pub fn hosts_table(hosts: &[Host]) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "{:<16} {:<22} {:<12} {:<20} {:>6} {:>6} {:>9}  {}\n",
        "NAME", "ADDRESS", "USER", "TAGS", "OK", "FAIL", "LAST(ms)", "LAST SEEN"
    ));
    for host in hosts {
        out.push_str(&format!(
            "{:<16} {:<22} {:<12} {:<20} {:>6} {:>6} {:>9}  {}\n",
            host.name,
            format!("{}:{}", host.addr, host.port),
            host.user,
            host.tags.join(","),
            host.stats.success_count,
            host.stats.failure_count,
            host.stats
                .last_latency_ms
                .map_or("-".to_string(), |ms| ms.to_string()),
            host.stats.last_seen_at.map_or("never".to_string(), fmt_ts),
        ));
    }
    out
}

/// Per-host breakdown of a fan-out
pub fn print_report(report: &FanOutReport) {
    for result in &report.results {
        println!(
            "── {} ({}, {}ms)",
            result.host,
            result.exit,
            result.duration.as_millis()
        );
        if !result.stdout.is_empty() {
            for line in result.stdout.lines() {
                println!("   {line}");
            }
        }
        if !result.stderr.is_empty() {
            for line in result.stderr.lines() {
                eprintln!(" ! {line}");
            }
        }
    }
    println!("{}", report.summary());
}

/// History listing, newest first
#[must_use]
pub fn history_table(entries: &[HistoryEntry]) -> String {
    let mut out = String::new();
    for entry in entries {
        out.push_str(&format!(
            "{}  [{:?}] {} ({})\n",
            fmt_ts(entry.timestamp),
            entry.kind,
            entry.command,
            entry.summary,
        ));
    }
    out
}

fn fmt_ts(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%d %H:%M:%S").to_string()
}
