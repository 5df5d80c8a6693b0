use geo::Point;
use log::{debug, warn};
use std::collections::HashMap;

use crate::geo_utils::{path_length, point_at_distance};
use crate::map_matcher::{MatchResult, distance_from_way_start};
use crate::road_network::Way;
use crate::survey::{SurveyPoint, TracePoint, WayTag};

/// Tag data points with the way they were captured on.
///
/// `trace` and the matched points of `matched` are index aligned, `data` must
/// be sorted by survey distance. `ways` is keyed by external id. Points whose
/// edge or way is unknown stay untagged. Returns how many points were tagged.
pub fn distribute<T: SurveyPoint>(
    trace: &[TracePoint],
    data: &mut [T],
    matched: &MatchResult,
    ways: &HashMap<i64, Way>,
) -> usize {
    let points = &matched.matched_points;
    if points.is_empty() || trace.is_empty() {
        debug!("Nothing matched, {} data points left untagged", data.len());
        return 0;
    }

    let len = points.len().min(trace.len());
    if points.len() != trace.len() {
        warn!(
            "{} matched points for {} trace samples, using the first {}",
            points.len(),
            trace.len(),
            len
        );
    }

    let mut cursor = 0;
    let mut tagged = 0;

    for item in data.iter_mut() {
        let distance = item.distance_survey();

        // Advance to the last sample at or before this point
        while cursor + 1 < len && trace[cursor + 1].distance_survey <= distance {
            cursor += 1;
        }

        let (nearest, position) = if cursor + 1 < len {
            let from = &trace[cursor];
            let to = &trace[cursor + 1];
            let span = to.distance_survey - from.distance_survey;
            let offset = distance - from.distance_survey;
            let ratio = if span > 0.0 {
                (offset / span).clamp(0.0, 1.0)
            } else {
                0.0
            };

            // Survey distance and snapped distance differ, carry the ratio over
            let a = points[cursor].coordinates;
            let b = points[cursor + 1].coordinates;
            let snapped = [a, b];
            let position =
                point_at_distance(&snapped, ratio * path_length(&snapped)).unwrap_or(a);

            let nearest = if ratio <= 0.5 { cursor } else { cursor + 1 };
            (nearest, position)
        } else {
            (cursor, points[cursor].coordinates)
        };

        if let Some(tag) = tag_for(matched, nearest, position, ways) {
            item.set_tag(tag);
            tagged += 1;
        }
    }

    debug!("Tagged {} of {} data points", tagged, data.len());
    tagged
}

fn tag_for(
    matched: &MatchResult,
    nearest: usize,
    position: Point<f64>,
    ways: &HashMap<i64, Way>,
) -> Option<WayTag> {
    let point = matched.matched_points.get(nearest)?;
    let edge = matched.edge_of(point)?;
    let Some(way) = ways.get(&edge.way_external_id) else {
        debug!("Way {} was not resolved, point left untagged", edge.way_external_id);
        return None;
    };

    Some(WayTag {
        way_id: way.id,
        distance_way: distance_from_way_start(point.coordinates, &way.geometry),
        position,
    })
}
