use geo::{Distance, Haversine, Point};
use log::warn;

use crate::error::SurveyError;

/// Great-circle distance in meters between two points (x = lon, y = lat)
pub fn haversine_distance_meters(p1: Point<f64>, p2: Point<f64>) -> f64 {
    Haversine.distance(p1, p2)
}

/// Summed haversine length of consecutive vertices, in meters
pub fn path_length(path: &[Point<f64>]) -> f64 {
    path.windows(2)
        .map(|pair| haversine_distance_meters(pair[0], pair[1]))
        .sum()
}

/// Locate the point lying `target_distance` meters along `path`.
///
/// The segment on which the cumulative distance first reaches the target is
/// linearly interpolated. A target past the end of the path is clamped to the
/// last vertex and logged, it is not treated as an error.
pub fn point_at_distance(path: &[Point<f64>], target_distance: f64) -> Result<Point<f64>, SurveyError> {
    if path.len() < 2 {
        return Err(SurveyError::InvalidInput(format!(
            "cannot interpolate along a path of {} point(s)",
            path.len()
        )));
    }

    let mut travelled = 0.0;
    for pair in path.windows(2) {
        let segment_length = haversine_distance_meters(pair[0], pair[1]);

        if travelled + segment_length >= target_distance {
            let ratio = if segment_length > 0.0 {
                ((target_distance - travelled) / segment_length).clamp(0.0, 1.0)
            } else {
                0.0
            };
            return Ok(interpolate(pair[0], pair[1], ratio));
        }

        travelled += segment_length;
    }

    warn!(
        "Distance {:.1}m exceeds path length {:.1}m, clamping to last point",
        target_distance, travelled
    );
    Ok(path[path.len() - 1])
}

/// Linear interpolation between two points, `ratio` in [0, 1]
pub fn interpolate(from: Point<f64>, to: Point<f64>, ratio: f64) -> Point<f64> {
    Point::new(
        from.x() + (to.x() - from.x()) * ratio,
        from.y() + (to.y() - from.y()) * ratio,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path() -> Vec<Point<f64>> {
        vec![
            Point::new(12.55, 55.70),
            Point::new(12.552, 55.701),
            Point::new(12.554, 55.702),
            Point::new(12.560, 55.702),
        ]
    }

    #[test]
    fn haversine_matches_known_distance() {
        // One degree of latitude is roughly 111.2 km
        let d = haversine_distance_meters(Point::new(0.0, 0.0), Point::new(0.0, 1.0));
        assert!((d - 111_195.0).abs() < 100.0, "got {}", d);
        assert_eq!(haversine_distance_meters(Point::new(5.0, 5.0), Point::new(5.0, 5.0)), 0.0);
    }

    #[test]
    fn zero_distance_is_first_point() {
        let path = path();
        assert_eq!(point_at_distance(&path, 0.0).unwrap(), path[0]);
    }

    #[test]
    fn vertex_distances_land_on_vertices() {
        let path = path();
        let first_leg = haversine_distance_meters(path[0], path[1]);
        let second_leg = haversine_distance_meters(path[1], path[2]);

        let p = point_at_distance(&path, first_leg).unwrap();
        assert!((p.x() - path[1].x()).abs() < 1e-9);
        assert!((p.y() - path[1].y()).abs() < 1e-9);

        let p = point_at_distance(&path, first_leg + second_leg).unwrap();
        assert!((p.x() - path[2].x()).abs() < 1e-9);
        assert!((p.y() - path[2].y()).abs() < 1e-9);
    }

    #[test]
    fn interpolates_inside_segment() {
        let path = path();
        let first_leg = haversine_distance_meters(path[0], path[1]);
        let p = point_at_distance(&path, first_leg / 2.0).unwrap();

        assert!((p.x() - 12.551).abs() < 1e-9);
        assert!((p.y() - 55.7005).abs() < 1e-9);
        let walked = haversine_distance_meters(path[0], p);
        assert!((walked - first_leg / 2.0).abs() < 0.5);
    }

    #[test]
    fn distance_past_the_end_clamps_to_last_point() {
        let path = path();
        let total = path_length(&path);
        assert_eq!(point_at_distance(&path, total + 1.0).unwrap(), path[3]);
        assert_eq!(point_at_distance(&path, total * 10.0).unwrap(), path[3]);
    }

    #[test]
    fn short_paths_are_rejected() {
        assert!(matches!(
            point_at_distance(&[], 1.0),
            Err(SurveyError::InvalidInput(_))
        ));
        assert!(matches!(
            point_at_distance(&[Point::new(1.0, 1.0)], 0.0),
            Err(SurveyError::InvalidInput(_))
        ));
    }

    #[test]
    fn path_length_sums_segments() {
        let path = path();
        let expected: f64 = (0..3)
            .map(|i| haversine_distance_meters(path[i], path[i + 1]))
            .sum();
        assert!((path_length(&path) - expected).abs() < 1e-9);
        assert_eq!(path_length(&path[..1]), 0.0);
    }
}
