//! In-memory doubles for storage and upstream services, used by unit tests.

use async_trait::async_trait;
use geo::{Coord, Point};
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use uuid::Uuid;

use crate::error::{SurveyError, Upstream};
use crate::road_network::{GeometrySource, NewWay, Way};
use crate::store::{SurveyStore, WayStore};
use crate::survey::{Survey, SurveyData, SurveyImage};
use crate::valhalla::{MatchingService, TraceAttributes, TraceEdge, TraceMatchedPoint};

pub fn way(id: i32, name: &str, node_start: i64, node_end: i64, length: f64) -> Way {
    Way {
        id,
        external_id: id as i64 * 10,
        name: name.to_string(),
        node_start,
        node_end,
        length,
        geometry: Vec::new(),
        is_one_way: false,
    }
}

pub fn new_way(
    external_id: i64,
    name: &str,
    node_start: i64,
    node_end: i64,
    coords: &[(f64, f64)],
) -> NewWay {
    NewWay::new(
        external_id,
        name.to_string(),
        node_start,
        node_end,
        coords.iter().map(|&(x, y)| Point::new(x, y)).collect(),
    )
}

/// A `trace_attributes` answer with one edge along `points`, the n-th
/// matched point sitting on `points[n]` at `ratios[n]`
pub fn trace_response(
    points: &[Point<f64>],
    way_id: u64,
    length_km: f64,
    ratios: &[f64],
) -> TraceAttributes {
    let shape = polyline::encode_coordinates(points.iter().map(|p| Coord { x: p.x(), y: p.y() }), 6)
        .unwrap();

    TraceAttributes {
        shape: Some(shape),
        edges: vec![TraceEdge {
            way_id: Some(way_id),
            length: Some(length_km),
            begin_shape_index: Some(0),
            end_shape_index: Some(points.len() - 1),
        }],
        matched_points: points
            .iter()
            .zip(ratios)
            .map(|(p, ratio)| TraceMatchedPoint {
                lat: p.y(),
                lon: p.x(),
                kind: Some("matched".to_string()),
                edge_index: Some(0),
                distance_along_edge: Some(*ratio),
            })
            .collect(),
        error: None,
        error_code: None,
    }
}

#[derive(Default)]
pub struct InMemoryWayStore {
    ways: Mutex<Vec<Way>>,
    lookups: AtomicUsize,
    upserts: AtomicUsize,
}

impl InMemoryWayStore {
    pub fn len(&self) -> usize {
        self.ways.lock().unwrap().len()
    }

    /// Calls to `find_by_external_id`
    pub fn lookup_count(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }

    pub fn upsert_count(&self) -> usize {
        self.upserts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WayStore for InMemoryWayStore {
    async fn find_by_external_id(&self, external_id: i64) -> Result<Option<Way>, SurveyError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        let ways = self.ways.lock().unwrap();
        Ok(ways.iter().find(|w| w.external_id == external_id).cloned())
    }

    async fn find_by_id(&self, id: i32) -> Result<Option<Way>, SurveyError> {
        let ways = self.ways.lock().unwrap();
        Ok(ways.iter().find(|w| w.id == id).cloned())
    }

    async fn upsert_ways(&self, new_ways: &[NewWay]) -> Result<Vec<Way>, SurveyError> {
        self.upserts.fetch_add(1, Ordering::SeqCst);
        let mut ways = self.ways.lock().unwrap();
        let mut stored = Vec::with_capacity(new_ways.len());

        for new in new_ways {
            let existing = ways.iter().position(|w| w.external_id == new.external_id);
            let id = existing.map_or(ways.len() as i32 + 1, |i| ways[i].id);
            let way = Way {
                id,
                external_id: new.external_id,
                name: new.name.clone(),
                node_start: new.node_start,
                node_end: new.node_end,
                length: new.length,
                geometry: new.geometry.clone(),
                is_one_way: new.is_one_way,
            };
            match existing {
                Some(i) => ways[i] = way.clone(),
                None => ways.push(way.clone()),
            }
            stored.push(way);
        }

        Ok(stored)
    }

    async fn all_ways(&self) -> Result<Vec<Way>, SurveyError> {
        Ok(self.ways.lock().unwrap().clone())
    }
}

#[derive(Default)]
pub struct InMemorySurveyStore {
    pub surveys: Mutex<Vec<(Survey, bool)>>,
    pub measurements: Mutex<Vec<(Uuid, SurveyData)>>,
    pub images: Mutex<Vec<(Uuid, SurveyImage)>>,
}

#[async_trait]
impl SurveyStore for InMemorySurveyStore {
    async fn insert_survey(&self, survey: &Survey, matched: bool) -> Result<(), SurveyError> {
        self.surveys.lock().unwrap().push((survey.clone(), matched));
        Ok(())
    }

    async fn insert_measurements(
        &self,
        survey_id: Uuid,
        measurements: &[SurveyData],
    ) -> Result<usize, SurveyError> {
        let mut stored = self.measurements.lock().unwrap();
        stored.extend(measurements.iter().cloned().map(|m| (survey_id, m)));
        Ok(measurements.len())
    }

    async fn insert_images(
        &self,
        survey_id: Uuid,
        images: &[SurveyImage],
    ) -> Result<usize, SurveyError> {
        let mut stored = self.images.lock().unwrap();
        stored.extend(images.iter().cloned().map(|i| (survey_id, i)));
        Ok(images.len())
    }
}

/// Serves canned roads by seed id, unknown seeds resolve to nothing
#[derive(Default)]
pub struct StubGeometrySource {
    roads: HashMap<i64, Vec<NewWay>>,
    delay: Option<Duration>,
    fetches: AtomicUsize,
}

impl StubGeometrySource {
    pub fn with_road(seed: i64, ways: Vec<NewWay>) -> Self {
        Self::default().and_road(seed, ways)
    }

    pub fn and_road(mut self, seed: i64, ways: Vec<NewWay>) -> Self {
        self.roads.insert(seed, ways);
        self
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GeometrySource for StubGeometrySource {
    async fn connected_ways(&self, external_id: i64) -> Result<Vec<NewWay>, SurveyError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self.roads.get(&external_id).cloned().unwrap_or_default())
    }
}

/// Answers every trace with the same response, or fails when it has none
pub struct StubMatchingService {
    response: Option<TraceAttributes>,
    delay: Option<Duration>,
    requests: AtomicUsize,
}

impl StubMatchingService {
    pub fn responding(response: TraceAttributes) -> Self {
        Self {
            response: Some(response),
            delay: None,
            requests: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            response: None,
            delay: None,
            requests: AtomicUsize::new(0),
        }
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MatchingService for StubMatchingService {
    async fn trace_attributes(
        &self,
        subject: &str,
        _points: &[Point<f64>],
    ) -> Result<TraceAttributes, SurveyError> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.response
            .clone()
            .ok_or_else(|| SurveyError::upstream(Upstream::MapMatching, subject, "HTTP 400"))
    }
}
