//! Pure ranking rules.

use std::cmp::Ordering;

/// Rank of a participant finishing with `duration_secs`, given the durations of those
/// who already finished. Equal durations keep finish order, so ranks stay a
/// permutation of `1..=N`.
pub fn finish_rank(duration_secs: i64, already_finished: &[i64]) -> u32 {
    let ahead = already_finished.iter().filter(|d| **d <= duration_secs).count();
    ahead as u32 + 1
}

/// One participant's standing when a race is canceled.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Standing {
    pub participant_id: u64,
    pub progress_percent: f64,
    /// Set for participants who reached the destination before the cancellation.
    pub finished_duration_secs: Option<i64>,
}

impl Standing {
    fn effective_progress(&self) -> f64 {
        if self.finished_duration_secs.is_some() {
            100.0
        } else {
            self.progress_percent
        }
    }
}

/// Ranks every standing: progress descending, then finish duration ascending, then
/// participant id. Returns `(participant_id, rank)` in rank order.
pub fn cancellation_ranks(standings: &[Standing]) -> Vec<(u64, u32)> {
    let mut ordered = standings.to_vec();
    ordered.sort_by(|a, b| {
        b.effective_progress()
            .partial_cmp(&a.effective_progress())
            .unwrap_or(Ordering::Equal)
            .then_with(|| match (a.finished_duration_secs, b.finished_duration_secs) {
                (Some(x), Some(y)) => x.cmp(&y),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            })
            .then_with(|| a.participant_id.cmp(&b.participant_id))
    });
    ordered
        .iter()
        .enumerate()
        .map(|(i, s)| (s.participant_id, i as u32 + 1))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn running(id: u64, progress: f64) -> Standing {
        Standing {
            participant_id: id,
            progress_percent: progress,
            finished_duration_secs: None,
        }
    }

    #[test]
    fn finish_rank_counts_faster_and_equal_finishers() {
        assert_eq!(finish_rank(500, &[]), 1);
        assert_eq!(finish_rank(500, &[400]), 2);
        assert_eq!(finish_rank(500, &[400, 500]), 3);
        assert_eq!(finish_rank(300, &[400, 500]), 1);
    }

    #[test]
    fn cancellation_orders_by_progress() {
        let ranks = cancellation_ranks(&[running(1, 25.0), running(2, 40.0)]);
        assert_eq!(ranks, vec![(2, 1), (1, 2)]);
    }

    #[test]
    fn finished_participants_lead_and_keep_duration_order() {
        let standings = [
            running(1, 99.0),
            Standing {
                participant_id: 2,
                progress_percent: 100.0,
                finished_duration_secs: Some(900),
            },
            Standing {
                participant_id: 3,
                progress_percent: 100.0,
                finished_duration_secs: Some(600),
            },
        ];
        assert_eq!(cancellation_ranks(&standings), vec![(3, 1), (2, 2), (1, 3)]);
    }

    #[test]
    fn equal_progress_breaks_ties_by_id() {
        let ranks = cancellation_ranks(&[running(9, 50.0), running(4, 50.0), running(6, 10.0)]);
        assert_eq!(ranks, vec![(4, 1), (9, 2), (6, 3)]);
    }
}
