//! Travel direction on a line from station ordinal codes.
//!
//! Consecutive stops vote with the sign of their code delta. On loop lines a jump
//! larger than the seam threshold means the pair straddles the point where codes
//! wrap, so that pair's vote is inverted.

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::catalog::StationCatalog;

const SAMPLE_STOPS: usize = 4;
pub const DEFAULT_SEAM_THRESHOLD: i64 = 20;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Codes increasing on a linear line.
    Inbound,
    /// Codes decreasing on a linear line.
    Outbound,
    /// Codes decreasing on a loop line.
    Clockwise,
    /// Codes increasing on a loop line.
    CounterClockwise,
}

impl Direction {
    fn from_sign(increasing: bool, is_loop: bool) -> Self {
        match (is_loop, increasing) {
            (false, true) => Direction::Inbound,
            (false, false) => Direction::Outbound,
            (true, true) => Direction::CounterClockwise,
            (true, false) => Direction::Clockwise,
        }
    }

    /// The opposite direction on the same line.
    pub fn reversed(self) -> Self {
        match self {
            Direction::Inbound => Direction::Outbound,
            Direction::Outbound => Direction::Inbound,
            Direction::Clockwise => Direction::CounterClockwise,
            Direction::CounterClockwise => Direction::Clockwise,
        }
    }

    /// Label the Seoul rail feeds use in `updnLine`.
    pub fn provider_label(self) -> &'static str {
        match self {
            Direction::Inbound => "상행",
            Direction::Outbound => "하행",
            Direction::Clockwise => "외선",
            Direction::CounterClockwise => "내선",
        }
    }

    pub fn from_provider_label(label: &str) -> Option<Self> {
        match label.trim() {
            "상행" | "0" => Some(Direction::Inbound),
            "하행" | "1" => Some(Direction::Outbound),
            "외선" => Some(Direction::Clockwise),
            "내선" => Some(Direction::CounterClockwise),
            _ => None,
        }
    }

    /// Whether a provider label names this direction. Numeric `updnLine` codes
    /// (`0` up/inner, `1` down/outer) match both line shapes.
    pub fn matches_label(self, label: &str) -> bool {
        match label.trim() {
            "0" => matches!(self, Direction::Inbound | Direction::CounterClockwise),
            "1" => matches!(self, Direction::Outbound | Direction::Clockwise),
            other => other == self.provider_label(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DirectionResolver {
    catalog: Arc<StationCatalog>,
    loop_lines: HashSet<String>,
    seam_threshold: i64,
}

impl DirectionResolver {
    /// Resolver with line 2 (`1002`) as the only loop line.
    pub fn new(catalog: Arc<StationCatalog>) -> Self {
        Self {
            catalog,
            loop_lines: HashSet::from(["1002".to_string()]),
            seam_threshold: DEFAULT_SEAM_THRESHOLD,
        }
    }

    pub fn with_loop_lines<I, S>(mut self, lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.loop_lines = lines.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_seam_threshold(mut self, threshold: i64) -> Self {
        self.seam_threshold = threshold;
        self
    }

    pub fn is_loop_line(&self, line_id: &str) -> bool {
        self.loop_lines.contains(line_id)
    }

    /// Direction of travel along `ordered_stops`, or `None` if the catalog cannot
    /// place enough of them.
    pub fn resolve(&self, ordered_stops: &[String], line_id: &str) -> Option<Direction> {
        let is_loop = self.is_loop_line(line_id);
        let sampled: Vec<i64> = ordered_stops
            .iter()
            .take(SAMPLE_STOPS)
            .filter_map(|s| self.catalog.ordinal(line_id, s))
            .collect();

        if sampled.len() >= 2 {
            let votes: i64 = sampled.windows(2).map(|w| self.vote(w[0], w[1], is_loop)).sum();
            if votes != 0 {
                return Some(Direction::from_sign(votes > 0, is_loop));
            }
        }
        self.two_point(ordered_stops, line_id, is_loop)
    }

    fn two_point(&self, ordered_stops: &[String], line_id: &str, is_loop: bool) -> Option<Direction> {
        let first = self.catalog.ordinal(line_id, ordered_stops.first()?)?;
        let last = self.catalog.ordinal(line_id, ordered_stops.last()?)?;
        match self.vote(first, last, is_loop) {
            0 => None,
            v => Some(Direction::from_sign(v > 0, is_loop)),
        }
    }

    fn vote(&self, from: i64, to: i64, is_loop: bool) -> i64 {
        let delta = to - from;
        let sign = delta.signum();
        if is_loop && delta.abs() > self.seam_threshold {
            -sign
        } else {
            sign
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(stops: &[&str]) -> Vec<String> {
        stops.iter().map(|s| s.to_string()).collect()
    }

    fn linear_resolver() -> DirectionResolver {
        let mut catalog = StationCatalog::new();
        for (name, code) in [("A", 10), ("B", 20), ("C", 30), ("D", 40)] {
            catalog.insert("1009", name, code);
        }
        DirectionResolver::new(Arc::new(catalog))
    }

    #[test]
    fn sub_ranges_agree_and_reversal_flips() {
        let resolver = linear_resolver();
        let full = resolver.resolve(&names(&["A", "B", "C", "D"]), "1009");
        assert_eq!(full, Some(Direction::Inbound));
        assert_eq!(resolver.resolve(&names(&["B", "C"]), "1009"), full);
        assert_eq!(resolver.resolve(&names(&["A", "B", "C"]), "1009"), full);

        let reversed = resolver.resolve(&names(&["D", "C", "B", "A"]), "1009");
        assert_eq!(reversed, Some(Direction::Outbound));
        assert_eq!(reversed, full.map(Direction::reversed));
    }

    #[test]
    fn loop_seam_crossing_is_inverted() {
        // Loop line numbered 201..=243; 243 is adjacent to 201.
        let mut catalog = StationCatalog::new();
        for (name, code) in [("시청", 201), ("을지로입구", 202), ("충정로", 243), ("아현", 242)] {
            catalog.insert("1002", name, code);
        }
        let resolver = DirectionResolver::new(Arc::new(catalog));

        let forward = resolver.resolve(&names(&["충정로", "시청", "을지로입구"]), "1002");
        assert_eq!(forward, Some(Direction::CounterClockwise));

        let backward = resolver.resolve(&names(&["을지로입구", "시청", "충정로", "아현"]), "1002");
        assert_eq!(backward, Some(Direction::Clockwise));
        assert_eq!(Direction::Clockwise.provider_label(), "외선");
    }

    #[test]
    fn falls_back_to_endpoints_when_sample_is_sparse() {
        let mut catalog = StationCatalog::new();
        catalog.insert("1003", "first", 300);
        catalog.insert("1003", "last", 320);
        let resolver = DirectionResolver::new(Arc::new(catalog));

        let stops = names(&["first", "x1", "x2", "x3", "x4", "last"]);
        assert_eq!(resolver.resolve(&stops, "1003"), Some(Direction::Inbound));
        assert_eq!(resolver.resolve(&names(&["x1", "x2"]), "1003"), None);
    }

    #[test]
    fn provider_labels() {
        assert!(Direction::Inbound.matches_label("상행"));
        assert!(Direction::Inbound.matches_label("0"));
        assert!(Direction::Clockwise.matches_label("1"));
        assert!(!Direction::Outbound.matches_label("상행"));
        assert_eq!(Direction::from_provider_label("내선"), Some(Direction::CounterClockwise));
    }
}
