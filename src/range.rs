//! Scan range expressions
//!
//! - `""` scans from genesis through the current head
//! - `"start"` scans from `start` through the current head
//! - `"start:end"` scans `start..=end`

use anyhow::{Context, Result};
use std::ops::RangeInclusive;

/// Parse a range expression against the current head.
pub fn parse_scan_range(expr: &str, head: u64) -> Result<RangeInclusive<u64>> {
    let expr = expr.trim();
    let parts: Vec<&str> = expr.split(':').collect();

    let (start, end) = match parts.as_slice() {
        _ if expr.is_empty() => (0, head),
        [start] => (parse_bound(start, "start")?, head),
        [start, end] => (parse_bound(start, "start")?, parse_bound(end, "end")?),
        _ => anyhow::bail!("range must be in format start:end"),
    };

    if start > end {
        anyhow::bail!("Range start {} is past range end {}", start, end);
    }
    Ok(start..=end)
}

fn parse_bound(s: &str, which: &str) -> Result<u64> {
    s.trim()
        .parse::<u64>()
        .with_context(|| format!("Invalid range {}: {:?}", which, s))
}

/// Number of block ids in a range.
pub fn range_len(range: &RangeInclusive<u64>) -> u64 {
    range.end().saturating_sub(*range.start()).saturating_add(1)
}
