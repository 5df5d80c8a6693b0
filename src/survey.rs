use chrono::{DateTime, FixedOffset};
use geo::Point;
use serde::Serialize;
use uuid::Uuid;

/// One GPS sample of a survey trace, with its distance from the survey start
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TracePoint {
    pub distance_survey: f64,
    pub coordinate: Point<f64>,
}

/// One data-collection run
#[derive(Debug, Clone, Serialize)]
pub struct Survey {
    pub id: Uuid,
    pub title: String,
    pub surveyed_at: DateTime<FixedOffset>,
    pub trace: Vec<TracePoint>,
}

impl Survey {
    pub fn new(title: String, surveyed_at: DateTime<FixedOffset>, trace: Vec<TracePoint>) -> Self {
        Self {
            id: Uuid::new_v4(),
            title,
            surveyed_at,
            trace,
        }
    }

    /// Distance covered by the trace, in meters
    pub fn distance_meters(&self) -> f64 {
        self.trace.last().map_or(0.0, |p| p.distance_survey)
    }

    pub fn coordinates(&self) -> Vec<Point<f64>> {
        self.trace.iter().map(|p| p.coordinate).collect()
    }
}

/// Way-relative location attached to a data point once it has been matched
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct WayTag {
    pub way_id: i32,
    pub distance_way: f64,
    pub position: Point<f64>,
}

/// A single pavement measurement
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SurveyData {
    pub distance_survey: f64,
    pub kind: String,
    pub value: f64,
    pub tag: Option<WayTag>,
}

/// A single road-surface image
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SurveyImage {
    pub distance_survey: f64,
    pub file_name: String,
    pub tag: Option<WayTag>,
}

/// Anything captured along a survey that can be placed on a way
pub trait SurveyPoint {
    fn distance_survey(&self) -> f64;
    fn tag(&self) -> Option<&WayTag>;
    fn set_tag(&mut self, tag: WayTag);
}

impl SurveyPoint for SurveyData {
    fn distance_survey(&self) -> f64 {
        self.distance_survey
    }

    fn tag(&self) -> Option<&WayTag> {
        self.tag.as_ref()
    }

    fn set_tag(&mut self, tag: WayTag) {
        self.tag = Some(tag);
    }
}

impl SurveyPoint for SurveyImage {
    fn distance_survey(&self) -> f64 {
        self.distance_survey
    }

    fn tag(&self) -> Option<&WayTag> {
        self.tag.as_ref()
    }

    fn set_tag(&mut self, tag: WayTag) {
        self.tag = Some(tag);
    }
}

/// The measurements and images belonging to one survey
#[derive(Debug, Clone, Default, Serialize)]
pub struct SurveyBatch {
    pub measurements: Vec<SurveyData>,
    pub images: Vec<SurveyImage>,
}

impl SurveyBatch {
    /// Order both collections by survey distance, the distributor relies on it
    pub fn sort_by_distance(&mut self) {
        self.measurements
            .sort_by(|a, b| a.distance_survey.total_cmp(&b.distance_survey));
        self.images
            .sort_by(|a, b| a.distance_survey.total_cmp(&b.distance_survey));
    }

    pub fn tagged_counts(&self) -> (usize, usize) {
        (tagged(&self.measurements), tagged(&self.images))
    }
}

fn tagged<T: SurveyPoint>(points: &[T]) -> usize {
    points.iter().filter(|p| p.tag().is_some()).count()
}
