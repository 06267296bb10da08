//! Overall progress accounting.

use crate::itinerary::{total_section_time, Leg};

/// Progress through the whole itinerary in percent.
///
/// Completed legs count in full, the current leg contributes
/// `min(elapsed, section_time)`. Waiting at a stop contributes nothing, so callers
/// pass `current_elapsed_secs = 0` while a bot waits.
pub fn overall_progress(legs: &[Leg], current_leg_index: usize, current_elapsed_secs: f64) -> f64 {
    let total = total_section_time(legs) as f64;
    if total <= 0.0 {
        return if current_leg_index >= legs.len() { 100.0 } else { 0.0 };
    }
    let completed: f64 = legs
        .iter()
        .take(current_leg_index)
        .map(|l| f64::from(l.section_time_seconds))
        .sum();
    let current = legs
        .get(current_leg_index)
        .map(|l| current_elapsed_secs.clamp(0.0, f64::from(l.section_time_seconds)))
        .unwrap_or(0.0);
    ((completed + current) / total * 100.0).clamp(0.0, 100.0)
}

/// Applies the non-decreasing rule: a new reading never lowers reported progress.
pub fn advance_progress(previous: f64, computed: f64) -> f64 {
    computed.max(previous).min(100.0)
}

/// Index of the stop a vehicle is estimated to be at, given a leg ratio in `[0, 1]`.
pub fn estimated_stop_index(stop_count: usize, ratio: f64) -> usize {
    if stop_count <= 1 {
        return 0;
    }
    let last = stop_count - 1;
    ((ratio.clamp(0.0, 1.0) * last as f64).floor() as usize).min(last)
}
