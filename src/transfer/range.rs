//! Range-query arithmetic for `ALL_RANGE` and `NEW_RANGE`.
//!
//! Pure functions over a [`ProgressIndex`]; the dispatcher fetches records
//! and applies the resulting delta.

use crate::index::{ProgressDelta, ProgressIndex};

/// Range used when the request carries no `start-end` argument.
pub const DEFAULT_RANGE: (i64, i64) = (0, 59);

/// A parsed `"start-end"` argument, `start >= 0` and `end >= start`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeRequest {
    pub start: i64,
    pub end: i64,
}

/// Leading integer of `s`, like C `atol`: optional sign, digits, anything
/// after ignored, `0` when there are none.
fn leading_int(s: &[u8]) -> i64 {
    let s = s.trim_ascii_start();
    let (neg, digits) = match s.split_first() {
        Some((b'-', rest)) => (true, rest),
        Some((b'+', rest)) => (false, rest),
        _ => (false, s),
    };
    let value = digits
        .iter()
        .take_while(|b| b.is_ascii_digit())
        .fold(0i64, |acc, &b| {
            acc.saturating_mul(10).saturating_add(i64::from(b - b'0'))
        });
    if neg { -value } else { value }
}

/// Parse `"start-end"`. Without a dash after the first byte the default
/// range `0-59` applies.
pub fn parse_range(args: &[u8]) -> RangeRequest {
    let (mut start, mut end) = match args.iter().position(|&b| b == b'-') {
        Some(dash) if dash > 0 => (leading_int(&args[..dash]), leading_int(&args[dash + 1..])),
        _ => DEFAULT_RANGE,
    };
    if start < 0 {
        start = 0;
    }
    if end < start {
        end = start;
    }
    RangeRequest { start, end }
}

/// What a range query will answer with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangePlan {
    /// Absolute first index in the header.
    pub start: i64,
    /// Absolute last index in the header; `start - 1` for an empty range.
    pub end: i64,
    pub measured: u32,
    /// Records to fetch, inclusive. `None` means an empty list.
    pub fetch: Option<(u32, u32)>,
    /// Progress credited for this response.
    pub delta: Option<ProgressDelta>,
}

impl RangePlan {
    /// `"start-end/measured"`
    pub fn header(&self) -> String {
        format!("{}-{}/{}", self.start, self.end, self.measured)
    }
}

fn advance(index: ProgressIndex, abs_end: i64) -> Option<ProgressDelta> {
    let new_transmitted = (abs_end + 1).min(i64::from(index.measured));
    let gain = new_transmitted - i64::from(index.transmitted);
    (gain > 0).then(|| ProgressDelta::transmitted(gain))
}

/// Record index for the store, saturating at `u32::MAX`.
fn record_index(v: i64) -> u32 {
    u32::try_from(v.max(0)).unwrap_or(u32::MAX)
}

/// Absolute range, clamped to the records that exist.
pub fn plan_all_range(req: RangeRequest, index: ProgressIndex) -> RangePlan {
    let (mut start, mut end) = (req.start, req.end);
    let measured = index.measured;
    if measured > 0 {
        let max = i64::from(measured) - 1;
        start = start.min(max);
        end = end.min(max).max(start);
    }
    RangePlan {
        start,
        end,
        measured,
        fetch: Some((record_index(start), record_index(end))),
        delta: if measured > 0 { advance(index, end) } else { None },
    }
}

/// Range relative to `transmitted`, clamped to what has not been sent.
pub fn plan_new_range(req: RangeRequest, index: ProgressIndex) -> RangePlan {
    let available = i64::from(index.pending());
    let transmitted = i64::from(index.transmitted);
    if available == 0 {
        return RangePlan {
            start: transmitted,
            end: transmitted - 1,
            measured: index.measured,
            fetch: None,
            delta: None,
        };
    }
    let start = req.start.min(available - 1);
    let end = req.end.min(available - 1).max(start);
    let (abs_start, abs_end) = (transmitted + start, transmitted + end);
    RangePlan {
        start: abs_start,
        end: abs_end,
        measured: index.measured,
        fetch: Some((record_index(abs_start), record_index(abs_end))),
        delta: advance(index, abs_end),
    }
}

// ── Tests ────────────────────────────────────────────────────
