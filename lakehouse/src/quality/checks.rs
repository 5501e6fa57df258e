//! Checks that only compare numbers already gathered from storage.

use super::CheckResult;

const EPSILON: f64 = 1e-9;

/// `no_major_data_loss`: the cleaned count must keep at least `threshold` of
/// the raw count. With no raw records there is nothing to retain against.
pub fn retention_check(raw_count: u64, cleaned_count: u64, threshold: f64) -> CheckResult {
    const NAME: &str = "no_major_data_loss";
    if raw_count == 0 {
        return CheckResult::new(NAME, false, "no raw records to compare against");
    }
    let retention = cleaned_count as f64 / raw_count as f64;
    CheckResult::new(
        NAME,
        retention + EPSILON >= threshold,
        format!(
            "retained {} of {} raw records ({:.2}%, minimum {:.2}%)",
            cleaned_count,
            raw_count,
            retention * 100.0,
            threshold * 100.0
        ),
    )
}

/// `total_matches`: the aggregated total may differ from the cleaned count by
/// at most `tolerance`.
pub fn sum_check(aggregated_total: u64, cleaned_count: u64, tolerance: u64) -> CheckResult {
    let difference = aggregated_total.abs_diff(cleaned_count);
    CheckResult::new(
        "total_matches",
        difference <= tolerance,
        format!(
            "aggregates sum to {}, cleaned table has {} (difference {}, tolerance {})",
            aggregated_total, cleaned_count, difference, tolerance
        ),
    )
}

pub fn count_check(name: &str, count: u64, what: &str) -> CheckResult {
    CheckResult::new(name, count > 0, format!("{} {}", count, what))
}

/// Passes when `offending` is zero.
pub fn zero_check(name: &str, offending: u64, what: &str) -> CheckResult {
    let message = if offending == 0 {
        format!("no {}", what)
    } else {
        format!("{} {}", offending, what)
    };
    CheckResult::new(name, offending == 0, message)
}
