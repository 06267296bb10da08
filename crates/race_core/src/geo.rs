//! Geographic helpers: great-circle distance and interpolation along polylines.

use serde::{Deserialize, Serialize};

/// Mean Earth radius used for haversine distances.
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// A WGS84 point. Longitude first, matching the order providers send coordinates in.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub lon: f64,
    pub lat: f64,
}

impl Position {
    pub const fn new(lon: f64, lat: f64) -> Self {
        Self { lon, lat }
    }

    pub fn distance_m(&self, other: &Position) -> f64 {
        haversine_m(*self, *other)
    }
}

/// Great-circle distance in metres.
pub fn haversine_m(a: Position, b: Position) -> f64 {
    let (lat1, lat2) = (a.lat.to_radians(), b.lat.to_radians());
    let dlat = (b.lat - a.lat).to_radians();
    let dlon = (b.lon - a.lon).to_radians();
    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * h.sqrt().atan2((1.0 - h).sqrt())
}

/// Linear interpolation between two points; `ratio` is clamped to `[0, 1]`.
pub fn lerp(start: Position, end: Position, ratio: f64) -> Position {
    let t = ratio.clamp(0.0, 1.0);
    Position {
        lon: start.lon + (end.lon - start.lon) * t,
        lat: start.lat + (end.lat - start.lat) * t,
    }
}

/// Point at `ratio` of the total length of `path`, measured by haversine distance.
///
/// Returns `None` for an empty path. A single-point or zero-length path yields its
/// first point.
pub fn interpolate_along(path: &[Position], ratio: f64) -> Option<Position> {
    let first = *path.first()?;
    if path.len() == 1 {
        return Some(first);
    }
    let segments: Vec<f64> = path.windows(2).map(|w| haversine_m(w[0], w[1])).collect();
    let total: f64 = segments.iter().sum();
    if total <= 0.0 {
        return Some(first);
    }

    let target = total * ratio.clamp(0.0, 1.0);
    let mut walked = 0.0;
    for (i, seg) in segments.iter().enumerate() {
        if walked + seg >= target {
            let local = if *seg > 0.0 { (target - walked) / seg } else { 0.0 };
            return Some(lerp(path[i], path[i + 1], local));
        }
        walked += seg;
    }
    path.last().copied()
}

/// Position for a leg at `ratio`: along the geometry when there is one, otherwise
/// straight between the endpoints.
pub fn position_on_leg(path: &[Position], start: Position, end: Position, ratio: f64) -> Position {
    if path.len() >= 2 {
        interpolate_along(path, ratio).unwrap_or(start)
    } else {
        lerp(start, end, ratio)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn haversine_matches_known_distance() {
        // Seoul City Hall to Gangnam station, roughly 8.9 km.
        let city_hall = Position::new(126.9780, 37.5665);
        let gangnam = Position::new(127.0276, 37.4979);
        let d = haversine_m(city_hall, gangnam);
        assert!((8_500.0..9_300.0).contains(&d), "distance was {d}");
        assert_eq!(haversine_m(city_hall, city_hall), 0.0);
    }

    #[test]
    fn lerp_clamps_ratio() {
        let a = Position::new(0.0, 0.0);
        let b = Position::new(10.0, 20.0);
        assert_eq!(lerp(a, b, 0.5), Position::new(5.0, 10.0));
        assert_eq!(lerp(a, b, 2.0), b);
        assert_eq!(lerp(a, b, -1.0), a);
    }

    #[test]
    fn interpolation_follows_segment_lengths() {
        // Two equal-length legs of an L shape near the equator.
        let path = [
            Position::new(0.0, 0.0),
            Position::new(0.01, 0.0),
            Position::new(0.01, 0.01),
        ];
        let mid = interpolate_along(&path, 0.5).expect("point");
        assert!((mid.lon - 0.01).abs() < 1e-6);
        assert!(mid.lat.abs() < 1e-6);

        let quarter = interpolate_along(&path, 0.25).expect("point");
        assert!((quarter.lon - 0.005).abs() < 1e-6);

        assert_eq!(interpolate_along(&path, 1.0), Some(path[2]));
        assert_eq!(interpolate_along(&[], 0.5), None);
    }

    #[test]
    fn position_on_leg_without_geometry_is_linear() {
        let start = Position::new(127.0, 37.0);
        let end = Position::new(127.1, 37.1);
        let p = position_on_leg(&[], start, end, 0.5);
        assert!((p.lon - 127.05).abs() < 1e-9);
        assert!((p.lat - 37.05).abs() < 1e-9);
    }
}
