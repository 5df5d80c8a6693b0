use geo::Point;
use log::{debug, info, warn};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::{SurveyError, Upstream};
use crate::geo_utils::haversine_distance_meters;
use crate::valhalla::{MatchingService, TraceAttributes};

/// Edge index the matching service reports for samples it could not snap
pub const UNMATCHED_EDGE_INDEX: u64 = u64::MAX;

/// Precision of the encoded route shape
const SHAPE_PRECISION: u32 = 6;

/// One edge of the matched route
#[derive(Debug, Clone, PartialEq)]
pub struct RawEdge {
    pub way_external_id: i64,
    pub begin_point: Point<f64>,
    pub end_point: Point<f64>,
    pub length_meters: f64,
}

/// One trace sample snapped onto an edge
#[derive(Debug, Clone, PartialEq)]
pub struct MatchedPoint {
    pub edge_index: usize,
    pub distance_ratio_along_edge: f64,
    pub coordinates: Point<f64>,
}

/// Edges and matched points of one trace, matched points in trace order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MatchResult {
    pub edges: Vec<RawEdge>,
    pub matched_points: Vec<MatchedPoint>,
}

impl MatchResult {
    pub fn is_empty(&self) -> bool {
        self.matched_points.is_empty()
    }

    pub fn edge_of(&self, point: &MatchedPoint) -> Option<&RawEdge> {
        self.edges.get(point.edge_index)
    }

    /// External ids of the ways referenced by matched points, first use order
    pub fn way_external_ids(&self) -> Vec<i64> {
        let mut ids = Vec::new();
        for point in &self.matched_points {
            if let Some(edge) = self.edge_of(point) {
                if !ids.contains(&edge.way_external_id) {
                    ids.push(edge.way_external_id);
                }
            }
        }
        ids
    }
}

/// Snaps survey traces through an external matching service
pub struct MapMatcher {
    service: Arc<dyn MatchingService>,
    timeout: Duration,
}

impl MapMatcher {
    pub fn new(service: Arc<dyn MatchingService>, timeout: Duration) -> Self {
        Self { service, timeout }
    }

    /// Match an ordered trace, one request per trace
    pub async fn match_trace(
        &self,
        subject: &str,
        points: &[Point<f64>],
    ) -> Result<MatchResult, SurveyError> {
        if points.len() < 2 {
            return Err(SurveyError::InvalidInput(format!(
                "trace {} has {} point(s), at least 2 are needed",
                subject,
                points.len()
            )));
        }

        info!("Map matching {} with {} points", subject, points.len());
        let start_time = Instant::now();

        let response =
            match tokio::time::timeout(self.timeout, self.service.trace_attributes(subject, points))
                .await
            {
                Ok(response) => response?,
                Err(_) => {
                    return Err(SurveyError::UpstreamTimeout {
                        service: Upstream::MapMatching,
                        subject: subject.to_string(),
                    });
                }
            };

        let result = decode_trace(subject, response)?;
        info!(
            "Matched {} onto {} edges in {:.2?}",
            subject,
            result.edges.len(),
            start_time.elapsed()
        );
        Ok(result)
    }
}

fn malformed(subject: &str, message: impl ToString) -> SurveyError {
    SurveyError::upstream(Upstream::MapMatching, subject, message)
}

/// Turn a raw service response into edges and matched points
pub(crate) fn decode_trace(
    subject: &str,
    response: TraceAttributes,
) -> Result<MatchResult, SurveyError> {
    if let Some(error) = response.error {
        return Err(malformed(
            subject,
            format!("error {}: {}", response.error_code.unwrap_or_default(), error),
        ));
    }

    let encoded = response
        .shape
        .ok_or_else(|| malformed(subject, "response has no shape"))?;
    let shape: Vec<Point<f64>> = polyline::decode_polyline(&encoded, SHAPE_PRECISION)
        .map_err(|e| malformed(subject, format!("undecodable shape: {}", e)))?
        .into_points();

    let mut edges = Vec::with_capacity(response.edges.len());
    for (i, edge) in response.edges.iter().enumerate() {
        let way_id = edge
            .way_id
            .ok_or_else(|| malformed(subject, format!("edge {} has no way id", i)))?;
        let vertex = |index: Option<usize>| {
            index.and_then(|index| shape.get(index).copied()).ok_or_else(|| {
                malformed(subject, format!("edge {} shape index outside of the route", i))
            })
        };

        edges.push(RawEdge {
            way_external_id: way_id as i64,
            begin_point: vertex(edge.begin_shape_index)?,
            end_point: vertex(edge.end_shape_index)?,
            length_meters: edge.length.unwrap_or_default() * 1000.0,
        });
    }

    let raw_indices: Vec<u64> = response
        .matched_points
        .iter()
        .map(|p| p.edge_index.unwrap_or(UNMATCHED_EDGE_INDEX))
        .collect();
    let unmatched = raw_indices
        .iter()
        .filter(|index| **index == UNMATCHED_EDGE_INDEX)
        .count();
    if unmatched > 0 {
        debug!(
            "{} of {} points of {} carry the unmatched sentinel",
            unmatched,
            raw_indices.len(),
            subject
        );
    }

    if raw_indices.is_empty() {
        return Err(SurveyError::NoMatch);
    }

    let indices = normalize_edge_indices(&raw_indices)
        .ok_or_else(|| malformed(subject, "first matched point has no edge"))?;

    let mut matched_points = Vec::with_capacity(indices.len());
    for (point, edge_index) in response.matched_points.iter().zip(indices) {
        if edge_index >= edges.len() {
            return Err(malformed(
                subject,
                format!("edge index {} outside of {} edges", edge_index, edges.len()),
            ));
        }
        matched_points.push(MatchedPoint {
            edge_index,
            distance_ratio_along_edge: point.distance_along_edge.unwrap_or_default().clamp(0.0, 1.0),
            coordinates: Point::new(point.lon, point.lat),
        });
    }

    Ok(MatchResult {
        edges,
        matched_points,
    })
}

/// Replace unmatched sentinels with the last valid edge index before them.
///
/// Returns `None` when the very first point is unmatched, there is nothing
/// to carry forward in that case.
pub fn normalize_edge_indices(raw: &[u64]) -> Option<Vec<usize>> {
    let mut last_valid: Option<usize> = None;
    let mut normalized = Vec::with_capacity(raw.len());

    for &index in raw {
        let index = if index == UNMATCHED_EDGE_INDEX {
            last_valid?
        } else {
            let index = usize::try_from(index).ok()?;
            last_valid = Some(index);
            index
        };
        normalized.push(index);
    }

    Some(normalized)
}

/// Distance in meters from the start of a way to a snapped point.
///
/// Takes the first segment whose start vertex is closer to the point than its
/// end vertex and adds the straight distance from that vertex to the point.
/// This is not a perpendicular projection, stored distances rely on it.
pub fn distance_from_way_start(point: Point<f64>, geometry: &[Point<f64>]) -> f64 {
    let mut cumulative = 0.0;

    for pair in geometry.windows(2) {
        let to_start = haversine_distance_meters(point, pair[0]);
        let to_end = haversine_distance_meters(point, pair[1]);

        if to_start < to_end {
            return cumulative + to_start;
        }

        cumulative += haversine_distance_meters(pair[0], pair[1]);
    }

    if geometry.len() < 2 {
        warn!("Way geometry with {} vertices, distance is 0", geometry.len());
    }
    cumulative
}
