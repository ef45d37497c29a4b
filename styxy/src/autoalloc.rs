//! Range computation for catalogue auto-extension.
//!
//! When an allocation names a service type the catalogue does not know,
//! the daemon carves a fresh range out of the configured port window and
//! persists it to the user config. Everything here is pure computation;
//! the daemon performs it while holding the config file lock so that
//! concurrent writers serialize and gap spacing survives races.

use globset::Glob;

use crate::config::schema::{AutoAllocationRule, Placement};
use crate::error::{Error, Result};

/// How the winning chunk size and start hint were chosen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RulePick {
    /// Range width to allocate.
    pub chunk_size: u16,
    /// Start port preferred by the matching rule, if any.
    pub preferred_start: Option<u16>,
    /// The pattern that matched, for audit context.
    pub matched_pattern: Option<String>,
}

/// Resolves the chunk size for a service type from the rule list.
///
/// Rules are evaluated in order; the first glob match wins. Patterns that
/// fail to parse are skipped. Without a match the default chunk size
/// applies.
#[must_use]
pub fn resolve_rule(
    rules: &[AutoAllocationRule],
    service_type: &str,
    default_chunk_size: u16,
) -> RulePick {
    for rule in rules {
        let Ok(glob) = Glob::new(&rule.pattern) else {
            continue;
        };
        if glob.compile_matcher().is_match(service_type) {
            return RulePick {
                chunk_size: rule.chunk_size.unwrap_or(default_chunk_size),
                preferred_start: rule.preferred_range_start,
                matched_pattern: Some(rule.pattern.clone()),
            };
        }
    }
    RulePick {
        chunk_size: default_chunk_size,
        preferred_start: None,
        matched_pattern: None,
    }
}

/// Returns `true` if `[lo, hi]` intersects any of `ranges`.
#[must_use]
pub fn overlaps_any(ranges: &[(u16, u16)], lo: u16, hi: u16) -> bool {
    ranges.iter().any(|&(a, b)| a <= hi && lo <= b)
}

/// Computes a fresh `[start, start + chunk - 1]` range.
///
/// `existing` is the full set of catalogue ranges (shipped plus user).
/// The result never overlaps an existing range and lies inside
/// `[min_port, max_port]`. A rule-supplied `preferred_start` is honoured
/// when its slot is free; otherwise placement proceeds normally.
///
/// # Errors
///
/// Returns `noRangeAvailable` when no conforming slot exists.
pub fn compute_range(
    existing: &[(u16, u16)],
    chunk: u16,
    placement: Placement,
    min_port: u16,
    max_port: u16,
    gap: u16,
    preferred_start: Option<u16>,
) -> Result<(u16, u16)> {
    if chunk == 0 {
        return Err(Error::invalid_request("chunk size must be positive"));
    }

    let mut ranges: Vec<(u16, u16)> = existing.to_vec();
    ranges.sort_unstable();

    if let Some(start) = preferred_start {
        if let Some(found) = fit_at(start, chunk, min_port, max_port, &ranges) {
            return Ok(found);
        }
    }

    match placement {
        Placement::After => place_after(&ranges, chunk, min_port, max_port, gap),
        Placement::Before => place_before(&ranges, chunk, min_port, max_port, gap),
        Placement::Smart => place_smart(&ranges, chunk, min_port, max_port, gap)
            .map_or_else(|| place_after(&ranges, chunk, min_port, max_port, gap), Ok),
    }
}

fn fit_at(
    start: u16,
    chunk: u16,
    min_port: u16,
    max_port: u16,
    ranges: &[(u16, u16)],
) -> Option<(u16, u16)> {
    let end = u32::from(start) + u32::from(chunk) - 1;
    if start < min_port || end > u32::from(max_port) {
        return None;
    }
    let end = end as u16;
    if overlaps_any(ranges, start, end) {
        return None;
    }
    Some((start, end))
}

fn place_after(
    ranges: &[(u16, u16)],
    chunk: u16,
    min_port: u16,
    max_port: u16,
    gap: u16,
) -> Result<(u16, u16)> {
    let start = match ranges.iter().map(|&(_, hi)| hi).max() {
        Some(top) => (u32::from(top) + u32::from(gap) + 1).max(u32::from(min_port)),
        None => u32::from(min_port),
    };
    let end = start + u32::from(chunk) - 1;
    if end > u32::from(max_port) {
        return Err(Error::NoRangeAvailable {
            reason: format!(
                "appending a {chunk}-port range after {} would exceed max_port {max_port}",
                ranges.last().map_or(min_port, |&(_, hi)| hi)
            ),
        });
    }
    Ok((start as u16, end as u16))
}

fn place_before(
    ranges: &[(u16, u16)],
    chunk: u16,
    min_port: u16,
    max_port: u16,
    gap: u16,
) -> Result<(u16, u16)> {
    let Some(bottom) = ranges.iter().map(|&(lo, _)| lo).min() else {
        return place_after(ranges, chunk, min_port, max_port, gap);
    };
    let start = i64::from(bottom) - i64::from(gap) - i64::from(chunk);
    if start < i64::from(min_port) {
        return Err(Error::NoRangeAvailable {
            reason: format!(
                "prepending a {chunk}-port range before {bottom} would undercut min_port {min_port}"
            ),
        });
    }
    let start = start as u16;
    Ok((start, start + chunk - 1))
}

fn place_smart(
    ranges: &[(u16, u16)],
    chunk: u16,
    min_port: u16,
    max_port: u16,
    gap: u16,
) -> Option<(u16, u16)> {
    let needed = u32::from(chunk) + 2 * u32::from(gap);
    for pair in ranges.windows(2) {
        let (_, a_hi) = pair[0];
        let (b_lo, _) = pair[1];
        let free = u32::from(b_lo).saturating_sub(u32::from(a_hi) + 1);
        if free < needed {
            continue;
        }
        let start = u32::from(a_hi) + u32::from(gap) + 1;
        let end = start + u32::from(chunk) - 1;
        if start >= u32::from(min_port)
            && end <= u32::from(max_port)
            // A wide range sorted earlier can still span this gap.
            && !overlaps_any(ranges, start as u16, end as u16)
        {
            return Some((start as u16, end as u16));
        }
    }
    None
}
