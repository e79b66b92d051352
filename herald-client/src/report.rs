//! Channel summary reports.
//!
//! Renders the events one user reported on one channel into a numbered
//! textual report, sorted by event time.

use chrono::{Local, TimeZone};
use herald_protocol::Event;
use std::fmt::Write as _;

/// Renders the summary report for `user`'s events on `channel`.
///
/// Events are sorted ascending by timestamp; ties are broken by event name
/// (lexicographic, case-sensitive). The input slice is the raw per-channel
/// store content and is left untouched.
pub fn render_summary(channel: &str, user: &str, events: &[Event]) -> String {
    let mut selected: Vec<&Event> = events.iter().filter(|e| e.user == user).collect();
    selected.sort_by(|a, b| {
        a.date_time
            .cmp(&b.date_time)
            .then_with(|| a.name.cmp(&b.name))
    });

    let mut out = String::new();
    let _ = writeln!(out, "Channel {channel}");
    let _ = writeln!(out, "Total: {}", selected.len());
    out.push_str("Event Reports:\n");

    for (index, event) in selected.iter().enumerate() {
        let _ = writeln!(out, "\nReport_{}:", index + 1);
        let _ = writeln!(out, "  city: {}", event.city);
        let _ = writeln!(out, "  date time: {}", format_date_time(event.date_time));
        let _ = writeln!(out, "  event name: {}", event.name);
        let _ = writeln!(out, "  summary: {}", summarize_description(&event.description));
    }

    out
}

/// Formats epoch seconds as `DD/MM/YY HH:MM` in local time.
fn format_date_time(epoch_seconds: i64) -> String {
    Local
        .timestamp_opt(epoch_seconds, 0)
        .earliest()
        .map(|dt| dt.format("%d/%m/%y %H:%M").to_string())
        .unwrap_or_else(|| epoch_seconds.to_string())
}

/// Builds the summary line for a description.
///
/// The line is the first 27 characters; `...` is appended only when the
/// original description runs past 30 characters. The 27/30 asymmetry is
/// kept for output compatibility.
fn summarize_description(description: &str) -> String {
    let prefix: String = description.chars().take(27).collect();
    if description.chars().count() > 30 {
        format!("{prefix}...")
    } else {
        prefix
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn event(user: &str, name: &str, ts: i64, description: &str) -> Event {
        Event {
            user: user.to_string(),
            city: "Haifa".to_string(),
            name: name.to_string(),
            date_time: ts,
            general_information: BTreeMap::new(),
            description: description.to_string(),
        }
    }

    #[test]
    fn test_tie_break_and_truncation() {
        let long_desc = "x".repeat(40);
        let events = vec![
            event("bob", "B", 100, &long_desc),
            event("bob", "A", 100, "short text"),
        ];

        let report = render_summary("fire", "bob", &events);

        let report_1 = report.find("Report_1:").unwrap();
        let report_2 = report.find("Report_2:").unwrap();
        // Equal timestamps sort by name.
        assert!(report[report_1..report_2].contains("event name: A"));
        assert!(report[report_2..].contains("event name: B"));

        // 10-char description: verbatim, no ellipsis.
        assert!(report.contains("summary: short text\n"));
        // 40-char description: 27-char prefix plus ellipsis.
        let expected = format!("summary: {}...", "x".repeat(27));
        assert!(report.contains(&expected));
    }

    #[test]
    fn test_truncation_thresholds() {
        // Up to 30 characters: 27-char prefix, never an ellipsis.
        assert_eq!(summarize_description(&"a".repeat(27)), "a".repeat(27));
        assert_eq!(summarize_description(&"a".repeat(28)), "a".repeat(27));
        assert_eq!(summarize_description(&"a".repeat(30)), "a".repeat(27));
        // 31 and beyond: ellipsis appended.
        assert_eq!(
            summarize_description(&"a".repeat(31)),
            format!("{}...", "a".repeat(27))
        );
        // Shorter than the prefix: whole description.
        assert_eq!(summarize_description("tiny"), "tiny");
        assert_eq!(summarize_description(""), "");
    }

    #[test]
    fn test_truncation_counts_chars_not_bytes() {
        let description = "é".repeat(40);
        let summary = summarize_description(&description);
        assert_eq!(summary, format!("{}...", "é".repeat(27)));
    }

    #[test]
    fn test_filters_by_user() {
        let events = vec![
            event("bob", "A", 1, "one"),
            event("alice", "B", 2, "two"),
            event("bob", "C", 3, "three"),
        ];

        let report = render_summary("fire", "bob", &events);
        assert!(report.contains("Total: 2\n"));
        assert!(report.contains("event name: A"));
        assert!(report.contains("event name: C"));
        assert!(!report.contains("event name: B"));
    }

    #[test]
    fn test_empty_selection() {
        let report = render_summary("fire", "bob", &[]);
        assert_eq!(report, "Channel fire\nTotal: 0\nEvent Reports:\n");
    }

    #[test]
    fn test_date_format_matches_local_time() {
        let ts = 1_700_000_000;
        let expected = Local
            .timestamp_opt(ts, 0)
            .earliest()
            .unwrap()
            .format("%d/%m/%y %H:%M")
            .to_string();

        let report = render_summary("fire", "bob", &[event("bob", "A", ts, "d")]);
        assert!(report.contains(&format!("date time: {expected}")));
    }

    #[test]
    fn test_sorts_by_timestamp_before_name() {
        let events = vec![
            event("bob", "A", 200, "later"),
            event("bob", "Z", 100, "earlier"),
        ];
        let report = render_summary("fire", "bob", &events);

        let z = report.find("event name: Z").unwrap();
        let a = report.find("event name: A").unwrap();
        assert!(z < a);
    }
}
