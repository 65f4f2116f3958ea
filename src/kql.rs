//! Query text for the Application Insights log-query endpoint.
//!
//! Everything here is pure string templating. The queries are opaque to the
//! rest of the crate and evaluated entirely by the remote service.

use std::fmt;
use std::str::FromStr;

use anyhow::{bail, Result};
use clap::ValueEnum;

/// Page stride for the invocation list and row cap for keyword search.
pub const PAGE_SIZE: usize = 100;

const INVOCATION_COLUMNS: &str =
    "timestamp, name, success=successBool, resultCode=rc, duration, operation_Id, id";
const DETAIL_COLUMNS: &str = "timestamp, itemType, loglevel, message, severityLevel, resultCode, success, duration, type, cloud_RoleName";
const MESSAGE_COALESCE: &str =
    "| extend message = coalesce(tostring(message), tostring(outerMessage), tostring(name))";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, ValueEnum)]
pub enum TimeRange {
    #[value(name = "PT24H")]
    Last24Hours,
    #[value(name = "P7D")]
    Last7Days,
    #[default]
    #[value(name = "P30D")]
    Last30Days,
    #[value(name = "P60D")]
    Last60Days,
    #[value(name = "P90D")]
    Last90Days,
    #[value(name = "P365D")]
    Last365Days,
    #[value(name = "forever")]
    Forever,
}

impl TimeRange {
    pub const ALL: [TimeRange; 7] = [
        TimeRange::Last24Hours,
        TimeRange::Last7Days,
        TimeRange::Last30Days,
        TimeRange::Last60Days,
        TimeRange::Last90Days,
        TimeRange::Last365Days,
        TimeRange::Forever,
    ];

    pub fn code(self) -> &'static str {
        match self {
            TimeRange::Last24Hours => "PT24H",
            TimeRange::Last7Days => "P7D",
            TimeRange::Last30Days => "P30D",
            TimeRange::Last60Days => "P60D",
            TimeRange::Last90Days => "P90D",
            TimeRange::Last365Days => "P365D",
            TimeRange::Forever => "forever",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            TimeRange::Last24Hours => "Last 24 hours",
            TimeRange::Last7Days => "Last 7 days",
            TimeRange::Last30Days => "Last 30 days",
            TimeRange::Last60Days => "Last 60 days",
            TimeRange::Last90Days => "Last 90 days",
            TimeRange::Last365Days => "Last 365 days",
            TimeRange::Forever => "All time",
        }
    }

    /// Relative-age literal, or `None` when the range has no lower bound.
    pub fn ago(self) -> Option<&'static str> {
        match self {
            TimeRange::Last24Hours => Some("ago(24h)"),
            TimeRange::Last7Days => Some("ago(7d)"),
            TimeRange::Last30Days => Some("ago(30d)"),
            TimeRange::Last60Days => Some("ago(60d)"),
            TimeRange::Last90Days => Some("ago(90d)"),
            TimeRange::Last365Days => Some("ago(365d)"),
            TimeRange::Forever => None,
        }
    }

    pub fn next(self) -> TimeRange {
        let idx = TimeRange::ALL.iter().position(|r| *r == self).unwrap_or(0);
        TimeRange::ALL[(idx + 1) % TimeRange::ALL.len()]
    }
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for TimeRange {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        match TimeRange::ALL
            .iter()
            .find(|range| range.code().eq_ignore_ascii_case(trimmed))
        {
            Some(range) => Ok(*range),
            None => bail!(
                "unknown time range '{trimmed}'. expected one of: {}",
                TimeRange::ALL.map(TimeRange::code).join(", ")
            ),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvocationsPage {
    pub time_range: TimeRange,
    pub offset: usize,
    pub limit: usize,
}

/// `| where timestamp >= ago(..)` for bounded ranges, empty for `forever`.
pub fn time_filter(range: TimeRange) -> String {
    match range.ago() {
        Some(ago) => format!("| where timestamp >= {ago}"),
        None => String::new(),
    }
}

/// Escapes a value for use inside a double-quoted string literal.
pub fn escape_literal(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

fn push_time_filter(lines: &mut Vec<String>, range: TimeRange) {
    let filter = time_filter(range);
    if !filter.is_empty() {
        lines.push(filter);
    }
}

fn table_source(table: &str, range: TimeRange) -> String {
    let filter = time_filter(range);
    if filter.is_empty() {
        format!("({table})")
    } else {
        format!("({table} {filter})")
    }
}

fn success_derivation() -> [&'static str; 2] {
    [
        "| extend rc = tostring(resultCode), rcNum = toint(resultCode)",
        "| extend successBool = coalesce(tobool(success), rc == \"0\" or (isnotnull(rcNum) and rcNum between (200 .. 399)))",
    ]
}

/// One page of requests, newest first.
///
/// The backend has no skip operator, so rows are numbered after the full
/// sort and the window `[offset+1, offset+limit]` is kept. Bounds saturate
/// at `usize::MAX`.
pub fn invocations_query(page: &InvocationsPage) -> String {
    let start = page.offset.saturating_add(1);
    let end = page.offset.saturating_add(page.limit);

    let mut lines = vec!["requests".to_string()];
    push_time_filter(&mut lines, page.time_range);
    lines.push("| sort by timestamp desc".to_string());
    lines.push("| serialize rn = row_number()".to_string());
    lines.push(format!("| where rn between ({start} .. {end})"));
    lines.extend(success_derivation().map(str::to_string));
    lines.push(format!("| project {INVOCATION_COLUMNS}"));
    lines.push("| order by timestamp desc".to_string());
    lines.join("\n")
}

/// Traces, exceptions and dependencies correlated to one operation, oldest first.
pub fn invocation_details_query(operation_id: &str, time_range: TimeRange) -> String {
    let op = escape_literal(operation_id);
    let sources = ["requests", "traces", "exceptions", "dependencies"]
        .map(|table| format!("  {}", table_source(table, time_range)))
        .join(",\n");

    [
        "union isfuzzy=true".to_string(),
        sources,
        format!("| where operation_Id == \"{op}\""),
        "| extend itemType = tostring(itemType)".to_string(),
        "| extend loglevel = tostring(customDimensions.LogLevel)".to_string(),
        MESSAGE_COALESCE.to_string(),
        "| where itemType != \"request\"".to_string(),
        format!("| project {DETAIL_COLUMNS}"),
        "| order by timestamp asc".to_string(),
    ]
    .join("\n")
}

/// Requests whose traces or exceptions mention `keyword`, with a per-operation
/// match count.
pub fn search_invocations_query(keyword: &str, time_range: TimeRange, limit: usize) -> String {
    let kw = escape_literal(keyword);

    let mut lines = vec![
        "let hits = union isfuzzy=true".to_string(),
        format!("    {},", table_source("traces", time_range)),
        format!("    {}", table_source("exceptions", time_range)),
        format!("  {MESSAGE_COALESCE}"),
        format!("  | where message contains \"{kw}\""),
        "  | summarize matchCount = count() by operation_Id;".to_string(),
        "requests".to_string(),
    ];
    push_time_filter(&mut lines, time_range);
    lines.extend(success_derivation().map(str::to_string));
    lines.push("| join kind=inner (hits) on operation_Id".to_string());
    lines.push(format!("| project {INVOCATION_COLUMNS}, matchCount"));
    lines.push("| order by timestamp desc".to_string());
    lines.push(format!("| take {limit}"));
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use regex::Regex;

    fn rank_window(query: &str) -> (usize, usize) {
        let re = Regex::new(r"rn between \((\d+) \.\. (\d+)\)").expect("regex");
        let caps = re.captures(query).expect("rank window present");
        (
            caps[1].parse().expect("start"),
            caps[2].parse().expect("end"),
        )
    }

    /// Every string literal opened by an unescaped quote is closed again.
    fn literals_balanced(query: &str) -> bool {
        let mut in_literal = false;
        let mut chars = query.chars();
        while let Some(c) = chars.next() {
            match c {
                '\\' if in_literal => {
                    chars.next();
                }
                '"' => in_literal = !in_literal,
                _ => {}
            }
        }
        !in_literal
    }

    #[test]
    fn rank_window_matches_offset_and_limit() {
        for (offset, limit) in [(0, 1), (0, 100), (100, 100), (250, 25), (9_999, 7)] {
            let query = invocations_query(&InvocationsPage {
                time_range: TimeRange::Last7Days,
                offset,
                limit,
            });
            assert_eq!(rank_window(&query), (offset + 1, offset + limit));
        }
    }

    #[test]
    fn rank_window_saturates_near_usize_max() {
        let query = invocations_query(&InvocationsPage {
            time_range: TimeRange::Forever,
            offset: usize::MAX - 5,
            limit: 100,
        });
        assert_eq!(rank_window(&query), (usize::MAX - 4, usize::MAX));
    }

    #[test]
    fn rank_is_assigned_after_the_sort() {
        let query = invocations_query(&InvocationsPage {
            time_range: TimeRange::Last24Hours,
            offset: 0,
            limit: 10,
        });
        let sort = query.find("sort by timestamp desc").expect("sort");
        let rank = query.find("row_number()").expect("rank");
        let window = query.find("rn between").expect("window");
        assert!(sort < rank && rank < window);
    }

    #[test]
    fn forever_has_no_time_filter() {
        assert_eq!(time_filter(TimeRange::Forever), "");
        let query = invocations_query(&InvocationsPage {
            time_range: TimeRange::Forever,
            offset: 0,
            limit: 100,
        });
        assert!(!query.contains("ago("));
        assert!(query.starts_with("requests\n| sort by timestamp desc"));
    }

    #[test]
    fn bounded_ranges_use_relative_age() {
        let expected = [
            (TimeRange::Last24Hours, "ago(24h)"),
            (TimeRange::Last7Days, "ago(7d)"),
            (TimeRange::Last30Days, "ago(30d)"),
            (TimeRange::Last60Days, "ago(60d)"),
            (TimeRange::Last90Days, "ago(90d)"),
            (TimeRange::Last365Days, "ago(365d)"),
        ];
        for (range, literal) in expected {
            let filter = time_filter(range);
            assert!(filter.contains(literal), "{range}: {filter}");
            assert!(filter.starts_with("| where timestamp >= "));
        }
    }

    #[test]
    fn time_range_codes_parse_back() {
        for range in TimeRange::ALL {
            assert_eq!(range.code().parse::<TimeRange>().expect("parse"), range);
        }
        assert_eq!("p7d".parse::<TimeRange>().expect("case"), TimeRange::Last7Days);
        assert!("P2D".parse::<TimeRange>().is_err());
    }

    #[test]
    fn time_range_next_cycles_through_all() {
        let mut range = TimeRange::Last24Hours;
        for _ in 0..TimeRange::ALL.len() {
            range = range.next();
        }
        assert_eq!(range, TimeRange::Last24Hours);
        assert_eq!(TimeRange::Forever.next(), TimeRange::Last24Hours);
    }

    #[test]
    fn invocations_page_for_first_week_page() {
        let query = invocations_query(&InvocationsPage {
            time_range: TimeRange::Last7Days,
            offset: 0,
            limit: 100,
        });
        assert!(query.contains("ago(7d)"));
        assert!(query.contains("rn between (1 .. 100)"));
        assert!(query.contains(
            "project timestamp, name, success=successBool, resultCode=rc, duration, operation_Id, id"
        ));
        assert!(query.ends_with("| order by timestamp desc"));
    }

    #[test]
    fn success_fallback_classifies_result_codes() {
        let query = invocations_query(&InvocationsPage {
            time_range: TimeRange::Last7Days,
            offset: 0,
            limit: 100,
        });
        assert!(query.contains("coalesce(tobool(success)"));
        assert!(query.contains("rc == \"0\""));
        assert!(query.contains("rcNum between (200 .. 399)"));
    }

    #[test]
    fn details_query_escapes_operation_id() {
        let query = invocation_details_query("op\"1", TimeRange::Last30Days);
        assert!(query.contains(r#"operation_Id == "op\"1""#));
        assert!(literals_balanced(&query));
        assert!(query.contains("(dependencies | where timestamp >= ago(30d))"));
        assert!(query.contains("where itemType != \"request\""));
        assert!(query.contains("customDimensions.LogLevel"));
        assert!(query.ends_with("| order by timestamp asc"));
    }

    #[test]
    fn details_query_without_time_bound() {
        let query = invocation_details_query("abc", TimeRange::Forever);
        assert!(query.contains("  (traces),"));
        assert!(!query.contains("ago("));
    }

    #[test]
    fn search_query_escapes_keyword() {
        let query = search_invocations_query("time\"out", TimeRange::Last7Days, 100);
        assert!(query.contains(r#"message contains "time\"out""#));
        assert!(literals_balanced(&query));
        assert!(query.contains("summarize matchCount = count() by operation_Id"));
        assert!(query.contains("join kind=inner (hits) on operation_Id"));
        assert!(query.contains("operation_Id, id, matchCount"));
        assert!(query.ends_with("| take 100"));
    }

    #[test]
    fn trailing_backslash_keeps_literal_closed() {
        let query = search_invocations_query("path\\", TimeRange::Forever, 10);
        assert!(query.contains(r#"contains "path\\""#));
        assert!(literals_balanced(&query));
    }
}
